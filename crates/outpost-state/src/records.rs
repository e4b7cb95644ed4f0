//! Per-identity records.
//!
//! [`PeerState`] holds the fields every agent has, whether it is the local
//! agent ([`SelfState`]) or a remote robot ([`PeerRecord`]). The base station
//! and beacon slots have their own, smaller records.

use std::collections::BTreeSet;

use crate::fragments::FragmentStore;
use crate::wire::{
    AgentState, ArtifactSummary, BeaconInfo, Detection, Goal, GoalPoint, OperatorCommand, Pose,
    Position, RelayedPeer,
};
use crate::{AgentId, Role, Timestamp};

/// Operator command pending delivery to (or just received by) an agent.
///
/// `task_accepted` covers name/value, `goal_accepted` covers the goal point.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PendingCommand {
    pub name: String,
    pub value: String,
    pub goal_point: Option<GoalPoint>,
    pub task_accepted: bool,
    pub goal_accepted: bool,
}

/// A command taken from [`PendingCommand`] for downstream dispatch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommandDispatch {
    /// `(name, value)` if a new task command arrived.
    pub task: Option<(String, String)>,
    /// Goal point if a new one arrived.
    pub goal_point: Option<GoalPoint>,
}

impl PendingCommand {
    /// The command fields as sent on the wire.
    pub fn as_command(&self) -> OperatorCommand {
        OperatorCommand {
            name: self.name.clone(),
            value: self.value.clone(),
            goal_point: self.goal_point.clone(),
        }
    }

    /// Replace the command fields with operator input (local issue).
    pub fn issue(&mut self, command: OperatorCommand) {
        self.name = command.name;
        self.value = command.value;
        self.goal_point = command.goal_point;
    }

    /// Field-wise merge: each non-empty field that differs is adopted and its
    /// accept flag raised. Returns true if anything was adopted.
    pub fn absorb(&mut self, incoming: &OperatorCommand) -> bool {
        let mut adopted = false;
        if !incoming.name.is_empty() && incoming.name != self.name {
            self.name.clone_from(&incoming.name);
            self.task_accepted = true;
            adopted = true;
        }
        if !incoming.value.is_empty() && incoming.value != self.value {
            self.value.clone_from(&incoming.value);
            self.task_accepted = true;
            adopted = true;
        }
        adopted |= self.absorb_goal_point(incoming);
        adopted
    }

    /// Merge for a command relayed back to its addressee: name and value must
    /// both be present and the pair must differ from what is held.
    pub fn absorb_relayed(&mut self, incoming: &OperatorCommand) -> bool {
        let mut adopted = false;
        if !incoming.name.is_empty()
            && !incoming.value.is_empty()
            && (incoming.name != self.name || incoming.value != self.value)
        {
            self.name.clone_from(&incoming.name);
            self.value.clone_from(&incoming.value);
            self.task_accepted = true;
            adopted = true;
        }
        adopted |= self.absorb_goal_point(incoming);
        adopted
    }

    fn absorb_goal_point(&mut self, incoming: &OperatorCommand) -> bool {
        match &incoming.goal_point {
            Some(point) if !point.frame_id.is_empty() && self.goal_point.as_ref() != Some(point) => {
                self.goal_point = Some(point.clone());
                self.goal_accepted = true;
                true
            }
            _ => false,
        }
    }

    /// Clear what the addressee echoed back as received.
    ///
    /// Name/value clear only when both are echoed and both match; the goal
    /// point clears when the echoed one equals the pending one.
    pub fn clear_confirmed(&mut self, echoed: &OperatorCommand) -> bool {
        let mut cleared = false;
        if !echoed.name.is_empty()
            && !echoed.value.is_empty()
            && echoed.name == self.name
            && echoed.value == self.value
        {
            self.name.clear();
            self.value.clear();
            cleared = true;
        }
        if let Some(point) = &echoed.goal_point {
            if !point.frame_id.is_empty() && self.goal_point.as_ref() == Some(point) {
                self.goal_point = None;
                cleared = true;
            }
        }
        cleared
    }

    /// Hand newly accepted commands to the caller and lower the accept flags.
    pub fn take_dispatch(&mut self) -> Option<CommandDispatch> {
        if !self.task_accepted && !self.goal_accepted {
            return None;
        }
        let dispatch = CommandDispatch {
            task: self
                .task_accepted
                .then(|| (self.name.clone(), self.value.clone())),
            goal_point: if self.goal_accepted {
                self.goal_point.clone()
            } else {
                None
            },
        };
        self.task_accepted = false;
        self.goal_accepted = false;
        Some(dispatch)
    }
}

/// The fields carried for an agent by both direct and relayed updates.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommonFields {
    pub status: String,
    pub pose: Pose,
    pub goal: Goal,
    pub detections: Vec<Detection>,
    pub fragment_count: u32,
    pub command: OperatorCommand,
}

impl From<&AgentState> for CommonFields {
    fn from(msg: &AgentState) -> Self {
        Self {
            status: msg.status.clone(),
            pose: msg.pose.clone(),
            goal: msg.goal.clone(),
            detections: msg.detections.clone(),
            fragment_count: msg.fragment_count,
            command: msg.command.clone(),
        }
    }
}

impl From<&RelayedPeer> for CommonFields {
    fn from(entry: &RelayedPeer) -> Self {
        Self {
            status: entry.status.clone(),
            pose: entry.pose.clone(),
            goal: entry.goal.clone(),
            detections: entry.detections.clone(),
            fragment_count: entry.fragment_count,
            command: entry.command.clone(),
        }
    }
}

/// State shared by the local agent and remote robots.
#[derive(Debug, Clone, Default)]
pub struct PeerState {
    pub status: String,
    pub pose: Pose,
    pub goal: Goal,
    /// Most recent detection list.
    pub detections: Vec<Detection>,
    /// Number of map fragments the agent is known to have produced.
    fragment_count: u32,
    /// Fragment indices below `fragment_count` not yet held locally.
    missing_fragments: BTreeSet<u32>,
    pub command: PendingCommand,
    /// Digest of the last detection list scanned for new artifacts.
    pub detection_digest: Option<String>,
}

impl PeerState {
    pub fn fragment_count(&self) -> u32 {
        self.fragment_count
    }

    pub fn missing_fragments(&self) -> &BTreeSet<u32> {
        &self.missing_fragments
    }

    /// Raise the known fragment count; the gap `[old, new)` becomes missing.
    /// Lower counts are ignored. Returns how many indices were added.
    pub fn advance_fragment_count(&mut self, new_count: u32) -> usize {
        if new_count <= self.fragment_count {
            return 0;
        }
        self.missing_fragments.extend(self.fragment_count..new_count);
        let added = (new_count - self.fragment_count) as usize;
        self.fragment_count = new_count;
        added
    }

    /// Set the count for fragments produced locally (nothing goes missing).
    pub fn set_local_fragment_count(&mut self, count: u32) {
        self.fragment_count = self.fragment_count.max(count);
    }

    /// Drop confirmed indices from the missing set. Returns how many were removed.
    pub fn confirm_fragments(&mut self, received: &[u32]) -> usize {
        received
            .iter()
            .filter(|index| self.missing_fragments.remove(*index))
            .count()
    }

    /// Last-writer-wins merge of the common fields.
    pub fn merge_common(&mut self, fields: CommonFields) {
        self.status = fields.status;
        self.pose = fields.pose;
        self.goal = fields.goal;
        self.detections = fields.detections;
        self.advance_fragment_count(fields.fragment_count);
        self.command.absorb(&fields.command);
    }
}

/// The local agent.
#[derive(Debug, Clone)]
pub struct SelfState {
    pub id: AgentId,
    pub role: Role,
    pub state: PeerState,
    /// Map fragments produced by this agent.
    pub fragments: FragmentStore,
}

impl SelfState {
    pub fn new(id: AgentId, role: Role) -> Self {
        Self {
            fragments: FragmentStore::new(id.clone()),
            id,
            role,
            state: PeerState::default(),
        }
    }

    /// Record a locally produced map fragment. Returns its index.
    pub fn add_fragment(&mut self, data: Vec<u8>) -> u32 {
        let index = self.fragments.push(data);
        self.state
            .set_local_fragment_count(u32::try_from(self.fragments.len()).unwrap_or(u32::MAX));
        index
    }
}

/// Local view of a remote robot.
#[derive(Debug, Clone)]
pub struct PeerRecord {
    pub id: AgentId,
    pub role: Role,
    /// Who last updated this record; the local id when updated directly.
    pub relay_id: Option<AgentId>,
    pub state: PeerState,
    /// Freshness of the record, on the local clock.
    pub last_message_time: Timestamp,
    pub last_direct_message_time: Timestamp,
    /// Heard from directly within the comm threshold.
    pub in_direct_comm: bool,
    /// Messages from this peer are admitted.
    pub reachable: bool,
    /// Beacons the peer reported active over its last direct message.
    pub active_beacons: Vec<BeaconInfo>,
    /// Fragments fetched for this peer's map.
    pub fragments: FragmentStore,
}

impl PeerRecord {
    pub fn new(id: AgentId, role: Role, created_at: Timestamp) -> Self {
        Self {
            fragments: FragmentStore::new(id.clone()),
            id,
            role,
            relay_id: None,
            state: PeerState::default(),
            last_message_time: created_at,
            last_direct_message_time: created_at,
            in_direct_comm: false,
            reachable: true,
            active_beacons: Vec::new(),
        }
    }

    /// Whether the record is currently backed by a live direct link from `local_id`.
    pub fn is_direct_from(&self, local_id: &AgentId) -> bool {
        self.in_direct_comm && self.relay_id.as_ref() == Some(local_id)
    }
}

/// Local view of the base station.
#[derive(Debug, Clone)]
pub struct BaseRecord {
    pub last_message_time: Timestamp,
    pub in_direct_comm: bool,
    pub reachable: bool,
    /// Per-agent artifact digests echoed by the base.
    pub artifact_summaries: Vec<ArtifactSummary>,
    pub fragment_count: u32,
    pub active_beacons: Vec<BeaconInfo>,
    /// The digest the base echoed for the local agent.
    pub acknowledged_digest: Option<String>,
    /// Local time the held summaries left the base, directly or relayed.
    pub heard_at: Option<Timestamp>,
}

impl BaseRecord {
    pub fn new(created_at: Timestamp) -> Self {
        Self {
            last_message_time: created_at,
            in_direct_comm: false,
            reachable: true,
            artifact_summaries: Vec::new(),
            fragment_count: 0,
            active_beacons: Vec::new(),
            acknowledged_digest: None,
            heard_at: None,
        }
    }

    /// Adopt a summary table that left the base at `heard_at` and pick out
    /// the entry for `local_id`.
    pub fn adopt_summaries(&mut self, summaries: &[ArtifactSummary], local_id: &AgentId, heard_at: Timestamp) {
        self.heard_at = self.heard_at.max(Some(heard_at));
        self.artifact_summaries = summaries.to_vec();
        if let Some(own) = summaries.iter().find(|s| &s.agent_id == local_id) {
            self.acknowledged_digest = Some(own.digest.clone());
        }
    }
}

/// A beacon slot.
#[derive(Debug, Clone)]
pub struct BeaconRecord {
    pub id: AgentId,
    /// Carried by the local agent; only the owner may deploy it.
    pub owned_locally: bool,
    pub position: Position,
    active: bool,
    pub reachable: bool,
    pub fragment_count: u32,
}

impl BeaconRecord {
    pub fn new(id: AgentId, owned_locally: bool) -> Self {
        Self {
            id,
            owned_locally,
            position: Position::default(),
            active: false,
            reachable: false,
            fragment_count: 0,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Mark active at `position`. Already-active beacons keep their position.
    /// Returns true if the beacon was newly activated.
    pub fn activate(&mut self, position: Position) -> bool {
        if self.active {
            return false;
        }
        self.position = position;
        self.active = true;
        true
    }

    pub fn info(&self) -> BeaconInfo {
        BeaconInfo {
            id: self.id.clone(),
            active: self.active,
            position: self.position,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn goal_point(frame: &str, x: f64) -> GoalPoint {
        GoalPoint {
            frame_id: frame.to_string(),
            pose: Pose::at(Position::new(x, 0.0, 0.0)),
        }
    }

    #[test]
    fn fragment_gap_is_appended() {
        let mut state = PeerState::default();
        state.advance_fragment_count(5);
        state.confirm_fragments(&[0, 1, 2, 3, 4]);
        assert!(state.missing_fragments().is_empty());

        assert_eq!(state.advance_fragment_count(8), 3);
        assert_eq!(
            state.missing_fragments().iter().copied().collect::<Vec<_>>(),
            vec![5, 6, 7]
        );
        assert_eq!(state.fragment_count(), 8);
    }

    #[test]
    fn lower_fragment_count_is_ignored() {
        let mut state = PeerState::default();
        state.advance_fragment_count(4);
        assert_eq!(state.advance_fragment_count(2), 0);
        assert_eq!(state.fragment_count(), 4);
        assert!(state.missing_fragments().iter().all(|i| *i < 4));
    }

    #[test]
    fn partial_confirmation_leaves_rest_pending() {
        let mut state = PeerState::default();
        state.advance_fragment_count(4);
        state.confirm_fragments(&[0]);
        assert_eq!(state.confirm_fragments(&[1, 3, 9]), 2);
        assert_eq!(
            state.missing_fragments().iter().copied().collect::<Vec<_>>(),
            vec![2]
        );
    }

    #[test]
    fn absorb_adopts_only_new_nonempty_fields() {
        let mut pending = PendingCommand::default();
        let incoming = OperatorCommand {
            name: "explore".into(),
            value: String::new(),
            goal_point: None,
        };
        assert!(pending.absorb(&incoming));
        assert!(pending.task_accepted);
        assert!(!pending.goal_accepted);

        pending.task_accepted = false;
        assert!(!pending.absorb(&incoming));
        assert!(!pending.task_accepted);
    }

    #[test]
    fn relayed_command_needs_name_and_value() {
        let mut pending = PendingCommand::default();
        let half = OperatorCommand {
            name: "goto".into(),
            ..OperatorCommand::default()
        };
        assert!(!pending.absorb_relayed(&half));

        let full = OperatorCommand {
            name: "goto".into(),
            value: "B03".into(),
            goal_point: Some(goal_point("world", 4.0)),
        };
        assert!(pending.absorb_relayed(&full));
        let dispatch = pending.take_dispatch().unwrap();
        assert_eq!(dispatch.task, Some(("goto".into(), "B03".into())));
        assert_eq!(dispatch.goal_point, Some(goal_point("world", 4.0)));
        assert!(pending.take_dispatch().is_none());
    }

    #[test]
    fn unframed_goal_point_is_ignored() {
        let mut pending = PendingCommand::default();
        let incoming = OperatorCommand {
            goal_point: Some(goal_point("", 1.0)),
            ..OperatorCommand::default()
        };
        assert!(!pending.absorb(&incoming));
        assert!(pending.goal_point.is_none());
    }

    #[test]
    fn confirmation_clears_matching_command() {
        let mut pending = PendingCommand::default();
        pending.issue(OperatorCommand {
            name: "stop".into(),
            value: "now".into(),
            goal_point: Some(goal_point("world", 2.0)),
        });

        // Wrong value: task stays, goal point matches and clears.
        let echoed = OperatorCommand {
            name: "stop".into(),
            value: "later".into(),
            goal_point: Some(goal_point("world", 2.0)),
        };
        assert!(pending.clear_confirmed(&echoed));
        assert_eq!(pending.name, "stop");
        assert!(pending.goal_point.is_none());

        let echoed = OperatorCommand {
            name: "stop".into(),
            value: "now".into(),
            goal_point: None,
        };
        assert!(pending.clear_confirmed(&echoed));
        assert!(pending.as_command().is_empty());
    }

    #[test]
    fn beacon_activation_is_sticky() {
        let mut beacon = BeaconRecord::new("B01".into(), false);
        assert!(beacon.activate(Position::new(1.0, 2.0, 0.0)));
        assert!(!beacon.activate(Position::new(9.0, 9.0, 9.0)));
        assert!(beacon.is_active());
        assert_eq!(beacon.position, Position::new(1.0, 2.0, 0.0));
    }

    #[test]
    fn base_picks_out_own_summary() {
        let mut base = BaseRecord::new(Timestamp::ZERO);
        let summaries = vec![
            ArtifactSummary {
                agent_id: "H01".into(),
                digest: "aa".into(),
            },
            ArtifactSummary {
                agent_id: "H02".into(),
                digest: "bb".into(),
            },
        ];
        assert_eq!(base.heard_at, None);
        base.adopt_summaries(&summaries, &"H02".into(), Timestamp::from_millis(30));
        assert_eq!(base.acknowledged_digest.as_deref(), Some("bb"));
        assert_eq!(base.artifact_summaries.len(), 2);

        // Older relayed copies never move the heard time back.
        base.adopt_summaries(&summaries, &"H02".into(), Timestamp::from_millis(10));
        assert_eq!(base.heard_at, Some(Timestamp::from_millis(30)));
    }

    #[test]
    fn self_fragment_count_follows_store() {
        let mut me = SelfState::new("H01".into(), Role::Robot);
        me.add_fragment(vec![1]);
        me.add_fragment(vec![2]);
        assert_eq!(me.state.fragment_count(), 2);
        assert!(me.state.missing_fragments().is_empty());
    }
}
