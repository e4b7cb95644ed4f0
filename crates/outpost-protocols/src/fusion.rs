//! Gossip fusion: merging one inbound [`AgentState`] into the record store.
//!
//! A message carries the sender's own state plus its relayed view of every
//! other robot it knows about. The sender's own fields are authoritative
//! (a direct merge). Relayed entries are accepted only when they are newer
//! than what is held, with two guards against stale copies circulating:
//!
//! - entries relayed through a third party must beat the local copy by the
//!   comm threshold (the relay margin);
//! - a record currently backed by a live direct link is never replaced by a
//!   relayed copy.
//!
//! All remote timestamps are translated to the local clock with the offset
//! between the local receive time and the sender's `sent_at`.

use std::time::Duration;

use outpost_state::{
    AgentId, AgentState, ClockOffset, CommonFields, OperatorCommand, PeerRecordStore, RelayedPeer,
    Role, Timestamp,
};
use tracing::{debug, info, trace};

use crate::config::FusionConfig;

/// Veto hook consulted by beacon nodes before fusing a message.
pub trait AdmissionGate: Send + Sync {
    /// Whether the message may be fused at all.
    fn admit(&self, msg: &AgentState) -> bool;
}

/// Gate that admits every message.
#[derive(Debug, Clone, Copy, Default)]
pub struct AdmitAll;

impl AdmissionGate for AdmitAll {
    fn admit(&self, _msg: &AgentState) -> bool {
        true
    }
}

/// Why a message was dropped without touching the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    /// The node has not finished initialising.
    NotListening,
    /// Our own broadcast looped back.
    OwnMessage,
    /// The admission gate vetoed it.
    Vetoed,
    /// The sender is not in the roster.
    UnknownSender,
    /// The sender is currently unreachable.
    Unreachable,
}

/// What a fused message changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FusionReport {
    pub sender: AgentId,
    /// Pending commands addressed to the sender that it confirmed.
    pub commands_confirmed: bool,
    /// The base artifact summary table was adopted from this message.
    pub summaries_adopted: bool,
    /// Relayed entries that overwrote a local record.
    pub relayed_accepted: Vec<AgentId>,
    /// Relayed entries that lost arbitration.
    pub relayed_rejected: Vec<AgentId>,
    /// A relayed operator command for the local node was adopted.
    pub command_received: bool,
}

/// Result of [`GossipFusion::fuse`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FusionOutcome {
    Ignored(IgnoreReason),
    Merged(FusionReport),
}

impl FusionOutcome {
    pub fn is_merged(&self) -> bool {
        matches!(self, Self::Merged(_))
    }
}

/// Merges inbound agent states into the store.
pub struct GossipFusion {
    local_id: AgentId,
    role: Role,
    comm_threshold: Duration,
    startup_grace: Duration,
    base_relay_grace: Duration,
    started_at: Timestamp,
    listening: bool,
    gate: Box<dyn AdmissionGate>,
}

impl std::fmt::Debug for GossipFusion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GossipFusion")
            .field("local_id", &self.local_id)
            .field("role", &self.role)
            .field("started_at", &self.started_at)
            .field("listening", &self.listening)
            .finish_non_exhaustive()
    }
}

impl GossipFusion {
    /// Create a fusion stage. Messages are ignored until
    /// [`set_listening`](Self::set_listening) is called.
    pub fn new(local_id: AgentId, role: Role, config: &FusionConfig, started_at: Timestamp) -> Self {
        Self {
            local_id,
            role,
            comm_threshold: config.comm_threshold,
            startup_grace: config.startup_grace,
            base_relay_grace: config.base_relay_grace,
            started_at,
            listening: false,
            gate: Box::new(AdmitAll),
        }
    }

    /// Replace the beacon admission gate.
    #[must_use]
    pub fn with_gate(mut self, gate: impl AdmissionGate + 'static) -> Self {
        self.gate = Box::new(gate);
        self
    }

    pub fn set_listening(&mut self, listening: bool) {
        if listening && !self.listening {
            info!(id = %self.local_id, "Fusion accepting messages");
        }
        self.listening = listening;
    }

    pub fn is_listening(&self) -> bool {
        self.listening
    }

    fn grace_elapsed(&self, now: Timestamp) -> bool {
        now >= self.started_at + self.startup_grace
    }

    /// Fuse one message received at local time `received_at`.
    pub fn fuse(
        &self,
        store: &mut PeerRecordStore,
        msg: &AgentState,
        received_at: Timestamp,
    ) -> FusionOutcome {
        if !self.listening {
            return FusionOutcome::Ignored(IgnoreReason::NotListening);
        }
        if msg.id == self.local_id {
            return FusionOutcome::Ignored(IgnoreReason::OwnMessage);
        }
        if self.role == Role::Beacon && !self.gate.admit(msg) {
            trace!(sender = %msg.id, "Message vetoed by beacon gate");
            return FusionOutcome::Ignored(IgnoreReason::Vetoed);
        }

        let offset = received_at - msg.sent_at;
        let mut report = FusionReport {
            sender: msg.id.clone(),
            ..FusionReport::default()
        };

        let admitted = match msg.role {
            Role::Beacon => self.merge_beacon(store, msg),
            Role::Base => self.merge_base(store, msg, received_at, &mut report),
            Role::Robot => self.merge_robot(store, msg, received_at, offset, &mut report),
        };
        if let Err(reason) = admitted {
            trace!(sender = %msg.id, ?reason, "Message ignored");
            return FusionOutcome::Ignored(reason);
        }

        let grace_elapsed = self.grace_elapsed(received_at);
        for entry in &msg.relayed_peers {
            if entry.id == msg.id {
                continue;
            }
            if entry.id == self.local_id {
                self.reflect(store, msg, entry, offset, &mut report);
                continue;
            }
            self.merge_relayed(store, msg, entry, offset, grace_elapsed, &mut report);
        }

        debug!(
            sender = %msg.id,
            accepted = report.relayed_accepted.len(),
            rejected = report.relayed_rejected.len(),
            "Fused agent state"
        );
        FusionOutcome::Merged(report)
    }

    fn merge_beacon(
        &self,
        store: &mut PeerRecordStore,
        msg: &AgentState,
    ) -> Result<(), IgnoreReason> {
        let beacon = store
            .beacon_mut(&msg.id)
            .ok_or(IgnoreReason::UnknownSender)?;
        if !beacon.reachable {
            return Err(IgnoreReason::Unreachable);
        }
        beacon.fragment_count = beacon.fragment_count.max(msg.fragment_count);
        Ok(())
    }

    fn merge_base(
        &self,
        store: &mut PeerRecordStore,
        msg: &AgentState,
        received_at: Timestamp,
        report: &mut FusionReport,
    ) -> Result<(), IgnoreReason> {
        if !msg.id.is_base() || self.role == Role::Base {
            return Err(IgnoreReason::UnknownSender);
        }
        let base = store.base_mut();
        if !base.reachable {
            return Err(IgnoreReason::Unreachable);
        }
        base.last_message_time = received_at;
        base.active_beacons.clone_from(&msg.active_beacons);
        base.fragment_count = msg.fragment_count;
        base.adopt_summaries(&msg.base_artifact_summaries, &self.local_id, received_at);
        report.summaries_adopted = true;
        Ok(())
    }

    fn merge_robot(
        &self,
        store: &mut PeerRecordStore,
        msg: &AgentState,
        received_at: Timestamp,
        offset: ClockOffset,
        report: &mut FusionReport,
    ) -> Result<(), IgnoreReason> {
        let peer = store
            .peer_mut(&msg.id)
            .ok_or(IgnoreReason::UnknownSender)?;
        if !peer.reachable {
            return Err(IgnoreReason::Unreachable);
        }

        report.commands_confirmed = peer.state.command.clear_confirmed(&msg.command);

        // Commands are only taken from relayed self-reflections.
        let mut fields = CommonFields::from(msg);
        fields.command = OperatorCommand::default();
        peer.state.merge_common(fields);
        peer.relay_id = Some(self.local_id.clone());
        peer.in_direct_comm = true;
        peer.last_message_time = received_at;
        peer.last_direct_message_time = received_at;
        peer.active_beacons.clone_from(&msg.active_beacons);

        if self.role != Role::Base {
            // A sender that never heard from the base has nothing to pass on.
            if let Some(heard_at) = msg.base_heard_at.map(|t| t + offset) {
                let base = store.base_mut();
                if heard_at + self.base_relay_grace > base.last_message_time {
                    base.adopt_summaries(&msg.base_artifact_summaries, &self.local_id, heard_at);
                    report.summaries_adopted = true;
                }
            }
        }
        Ok(())
    }

    fn merge_relayed(
        &self,
        store: &mut PeerRecordStore,
        msg: &AgentState,
        entry: &RelayedPeer,
        offset: ClockOffset,
        grace_elapsed: bool,
        report: &mut FusionReport,
    ) {
        let Some(peer) = store.peer_mut(&entry.id) else {
            debug!(sender = %msg.id, id = %entry.id, "Relayed entry for unknown peer skipped");
            return;
        };

        let margin = if entry.relay_id.as_ref() == Some(&msg.id) {
            Duration::ZERO
        } else {
            self.comm_threshold
        };
        let candidate = entry.last_message_timestamp + offset;
        let newer = candidate > peer.last_message_time + margin;
        let not_direct = peer.relay_id.as_ref() != Some(&self.local_id) || !peer.in_direct_comm;

        if !(grace_elapsed && newer && not_direct) {
            trace!(id = %entry.id, via = %msg.id, newer, not_direct, "Relayed entry rejected");
            report.relayed_rejected.push(entry.id.clone());
            return;
        }

        let mut fields = CommonFields::from(entry);
        if self.role == Role::Base {
            fields.command = OperatorCommand::default();
        }
        peer.state.merge_common(fields);
        peer.relay_id.clone_from(&entry.relay_id);
        peer.in_direct_comm = false;
        peer.last_message_time = candidate;
        report.relayed_accepted.push(entry.id.clone());
    }

    /// An entry about the local node: pick up operator commands relayed back
    /// to us and secondhand base knowledge.
    fn reflect(
        &self,
        store: &mut PeerRecordStore,
        msg: &AgentState,
        entry: &RelayedPeer,
        offset: ClockOffset,
        report: &mut FusionReport,
    ) {
        if self.role == Role::Base {
            return;
        }
        let candidate = entry.last_message_timestamp + offset;
        if candidate + self.base_relay_grace <= store.base().last_message_time {
            return;
        }

        if store.local_mut().state.command.absorb_relayed(&entry.command) {
            info!(via = %msg.id, "Received relayed operator command");
            report.command_received = true;
        }
        if msg.role != Role::Base {
            if let Some(heard_at) = msg.base_heard_at {
                store
                    .base_mut()
                    .adopt_summaries(&msg.base_artifact_summaries, &self.local_id, heard_at + offset);
                report.summaries_adopted = true;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use outpost_state::{ArtifactSummary, GoalPoint, Pose, Position, Roster};

    const T0: i64 = 1_000_000;

    fn ts(millis: i64) -> Timestamp {
        Timestamp::from_millis(millis)
    }

    fn store(local: &str, role: Role) -> PeerRecordStore {
        let roster = Roster {
            local_id: local.into(),
            role,
            neighbors: vec!["H01".into(), "H02".into(), "H03".into()],
            total_beacons: 4,
            owned_beacons: Vec::new(),
        };
        PeerRecordStore::new(&roster, ts(T0))
    }

    fn fusion(local: &str, role: Role) -> GossipFusion {
        let mut fusion = GossipFusion::new(local.into(), role, &FusionConfig::default(), ts(T0));
        fusion.set_listening(true);
        fusion
    }

    fn message(sender: &str, sent_at: i64) -> AgentState {
        AgentState {
            id: sender.into(),
            role: Role::Robot,
            status: "exploring".into(),
            pose: Pose::at(Position::new(1.0, 2.0, 0.0)),
            last_message_timestamp: ts(sent_at),
            sent_at: ts(sent_at),
            ..AgentState::default()
        }
    }

    fn relayed(id: &str, relay: &str, at: i64) -> RelayedPeer {
        RelayedPeer {
            id: id.into(),
            relay_id: Some(relay.into()),
            status: format!("relayed-{at}"),
            last_message_timestamp: ts(at),
            ..RelayedPeer::default()
        }
    }

    #[test]
    fn direct_merge_is_authoritative() {
        let mut store = store("H01", Role::Robot);
        let fusion = fusion("H01", Role::Robot);
        let mut msg = message("H02", T0 + 500);
        msg.fragment_count = 3;

        let outcome = fusion.fuse(&mut store, &msg, ts(T0 + 600));
        assert!(outcome.is_merged());

        let peer = store.peer(&"H02".into()).unwrap();
        assert_eq!(peer.state.status, "exploring");
        assert_eq!(peer.relay_id, Some(AgentId::from("H01")));
        assert!(peer.in_direct_comm);
        assert_eq!(peer.last_message_time, ts(T0 + 600));
        assert_eq!(peer.last_direct_message_time, ts(T0 + 600));
        assert_eq!(peer.state.missing_fragments().len(), 3);
    }

    #[test]
    fn unreachable_sender_is_discarded_whole() {
        let mut store = store("H01", Role::Robot);
        let fusion = fusion("H01", Role::Robot);
        store.peer_mut(&"H02".into()).unwrap().reachable = false;

        let mut msg = message("H02", T0 + 500);
        msg.relayed_peers.push(relayed("H03", "H02", T0 + 400));

        assert_eq!(
            fusion.fuse(&mut store, &msg, ts(T0 + 500)),
            FusionOutcome::Ignored(IgnoreReason::Unreachable)
        );
        assert!(store.peer(&"H02".into()).unwrap().state.status.is_empty());
        assert!(store.peer(&"H03".into()).unwrap().state.status.is_empty());
    }

    #[test]
    fn ignored_until_listening() {
        let mut store = store("H01", Role::Robot);
        let fusion = GossipFusion::new("H01".into(), Role::Robot, &FusionConfig::default(), ts(T0));
        assert_eq!(
            fusion.fuse(&mut store, &message("H02", T0), ts(T0)),
            FusionOutcome::Ignored(IgnoreReason::NotListening)
        );
    }

    #[test]
    fn direct_link_beats_relay() {
        let mut store = store("H01", Role::Robot);
        let fusion = fusion("H01", Role::Robot);
        fusion.fuse(&mut store, &message("H03", T0 + 1_000), ts(T0 + 1_000));

        let mut msg = message("H02", T0 + 9_000);
        msg.relayed_peers.push(relayed("H03", "H02", T0 + 8_000));
        let FusionOutcome::Merged(report) = fusion.fuse(&mut store, &msg, ts(T0 + 9_000)) else {
            panic!("expected merge");
        };
        assert_eq!(report.relayed_rejected, vec![AgentId::from("H03")]);
        assert_eq!(store.peer(&"H03".into()).unwrap().state.status, "exploring");
    }

    #[test]
    fn relay_margin_boundary() {
        // H03 was heard directly at t0, then the link went stale.
        let t0 = T0 + 1_000;
        let threshold = FusionConfig::default().comm_threshold.as_millis() as i64;
        let mut store = store("H01", Role::Robot);
        let fusion = fusion("H01", Role::Robot);
        fusion.fuse(&mut store, &message("H03", t0), ts(t0));
        store.peer_mut(&"H03".into()).unwrap().in_direct_comm = false;

        // Relayed through a third party: margin is the comm threshold.
        let mut msg = message("H02", T0 + 20_000);
        msg.relayed_peers.push(relayed("H03", "Hx", t0 + threshold));
        fusion.fuse(&mut store, &msg, ts(T0 + 20_000));
        assert_eq!(store.peer(&"H03".into()).unwrap().last_message_time, ts(t0));

        let mut msg = message("H02", T0 + 20_000);
        msg.relayed_peers.push(relayed("H03", "Hx", t0 + threshold + 1));
        fusion.fuse(&mut store, &msg, ts(T0 + 20_000));
        let peer = store.peer(&"H03".into()).unwrap();
        assert_eq!(peer.last_message_time, ts(t0 + threshold + 1));
        assert_eq!(peer.relay_id, Some(AgentId::from("Hx")));
        assert!(!peer.in_direct_comm);
    }

    #[test]
    fn direct_flag_alone_does_not_block_relays() {
        // Last heard through H02, still flagged as in direct comm.
        let mut store = store("H01", Role::Robot);
        let fusion = fusion("H01", Role::Robot);
        let peer = store.peer_mut(&"H03".into()).unwrap();
        peer.relay_id = Some("H02".into());
        peer.in_direct_comm = true;

        let mut msg = message("H02", T0 + 5_000);
        msg.relayed_peers.push(relayed("H03", "H02", T0 + 4_000));
        let FusionOutcome::Merged(report) = fusion.fuse(&mut store, &msg, ts(T0 + 5_000)) else {
            panic!("expected merge");
        };
        assert_eq!(report.relayed_accepted, vec![AgentId::from("H03")]);
        let peer = store.peer(&"H03".into()).unwrap();
        assert_eq!(peer.last_message_time, ts(T0 + 4_000));
        assert!(!peer.in_direct_comm);
    }

    #[test]
    fn own_direct_link_blocks_newer_relays() {
        let mut store = store("H01", Role::Robot);
        let fusion = fusion("H01", Role::Robot);
        let peer = store.peer_mut(&"H03".into()).unwrap();
        peer.relay_id = Some("H01".into());
        peer.in_direct_comm = true;

        let mut msg = message("H02", T0 + 5_000);
        msg.relayed_peers.push(relayed("H03", "H02", T0 + 4_000));
        let FusionOutcome::Merged(report) = fusion.fuse(&mut store, &msg, ts(T0 + 5_000)) else {
            panic!("expected merge");
        };
        assert_eq!(report.relayed_rejected, vec![AgentId::from("H03")]);
        let peer = store.peer(&"H03".into()).unwrap();
        assert_eq!(peer.last_message_time, ts(T0));
        assert!(peer.in_direct_comm);
    }

    #[test]
    fn same_origin_relay_has_no_margin() {
        let mut store = store("H01", Role::Robot);
        let fusion = fusion("H01", Role::Robot);
        let t1 = T0 + 5_000;

        let mut msg = message("H02", t1);
        msg.relayed_peers.push(relayed("H03", "H02", t1));
        fusion.fuse(&mut store, &msg, ts(t1));
        assert_eq!(store.peer(&"H03".into()).unwrap().last_message_time, ts(t1));

        let mut msg = message("H02", t1 + 100);
        msg.relayed_peers.push(relayed("H03", "H02", t1 + 1));
        fusion.fuse(&mut store, &msg, ts(t1 + 100));
        assert_eq!(store.peer(&"H03".into()).unwrap().last_message_time, ts(t1 + 1));
    }

    #[test]
    fn relayed_timestamps_use_sender_offset() {
        let mut store = store("H01", Role::Robot);
        let fusion = fusion("H01", Role::Robot);

        // Sender's clock runs 10 s behind ours.
        let mut msg = message("H02", T0);
        msg.relayed_peers.push(relayed("H03", "H02", T0 - 100));
        fusion.fuse(&mut store, &msg, ts(T0 + 10_000));

        let peer = store.peer(&"H03".into()).unwrap();
        assert_eq!(peer.last_message_time, ts(T0 + 9_900));
    }

    #[test]
    fn startup_grace_blocks_relays() {
        let mut store = store("H01", Role::Robot);
        let config = FusionConfig::default().with_startup_grace(Duration::from_secs(5));
        let mut fusion = GossipFusion::new("H01".into(), Role::Robot, &config, ts(T0));
        fusion.set_listening(true);

        let mut msg = message("H02", T0 + 4_000);
        msg.relayed_peers.push(relayed("H03", "H02", T0 + 4_000));
        fusion.fuse(&mut store, &msg, ts(T0 + 4_000));
        assert!(store.peer(&"H02".into()).unwrap().in_direct_comm);
        assert!(store.peer(&"H03".into()).unwrap().state.status.is_empty());

        let mut msg = message("H02", T0 + 5_000);
        msg.relayed_peers.push(relayed("H03", "H02", T0 + 5_000));
        fusion.fuse(&mut store, &msg, ts(T0 + 5_000));
        assert!(!store.peer(&"H03".into()).unwrap().state.status.is_empty());
    }

    #[test]
    fn unknown_relayed_ids_are_skipped() {
        let mut store = store("H01", Role::Robot);
        let fusion = fusion("H01", Role::Robot);
        let mut msg = message("H02", T0 + 100);
        msg.relayed_peers.push(relayed("H99", "H02", T0 + 100));
        assert!(fusion.fuse(&mut store, &msg, ts(T0 + 100)).is_merged());
        assert!(store.peer(&"H99".into()).is_none());
    }

    #[test]
    fn confirmed_command_is_cleared_and_sender_command_stripped() {
        let mut store = store("Base", Role::Base);
        let fusion = fusion("Base", Role::Base);
        let command = OperatorCommand {
            name: "goto".into(),
            value: "B02".into(),
            goal_point: None,
        };
        store
            .peer_mut(&"H02".into())
            .unwrap()
            .state
            .command
            .issue(command.clone());

        let mut msg = message("H02", T0 + 100);
        msg.command = command;
        let FusionOutcome::Merged(report) = fusion.fuse(&mut store, &msg, ts(T0 + 100)) else {
            panic!("expected merge");
        };
        assert!(report.commands_confirmed);
        let pending = &store.peer(&"H02".into()).unwrap().state.command;
        assert!(pending.as_command().is_empty());
        assert!(!pending.task_accepted);
    }

    #[test]
    fn base_strips_relayed_commands() {
        let mut store = store("Base", Role::Base);
        let fusion = fusion("Base", Role::Base);
        let mut entry = relayed("H03", "H02", T0 + 100);
        entry.command.name = "stop".into();
        entry.command.value = "now".into();
        let mut msg = message("H02", T0 + 100);
        msg.relayed_peers.push(entry);

        fusion.fuse(&mut store, &msg, ts(T0 + 100));
        let peer = store.peer(&"H03".into()).unwrap();
        assert_eq!(peer.state.status, format!("relayed-{}", T0 + 100));
        assert!(peer.state.command.name.is_empty());
    }

    #[test]
    fn relayed_command_reaches_addressee() {
        let mut store = store("H01", Role::Robot);
        let fusion = fusion("H01", Role::Robot);
        let point = GoalPoint {
            frame_id: "world".into(),
            pose: Pose::at(Position::new(3.0, 4.0, 0.0)),
        };
        let mut entry = relayed("H01", "Base", T0 + 100);
        entry.command = OperatorCommand {
            name: "explore".into(),
            value: "east".into(),
            goal_point: Some(point.clone()),
        };
        let mut msg = message("H02", T0 + 100);
        msg.relayed_peers.push(entry);

        let FusionOutcome::Merged(report) = fusion.fuse(&mut store, &msg, ts(T0 + 100)) else {
            panic!("expected merge");
        };
        assert!(report.command_received);
        let dispatch = store.local_mut().state.command.take_dispatch().unwrap();
        assert_eq!(dispatch.task, Some(("explore".into(), "east".into())));
        assert_eq!(dispatch.goal_point, Some(point));
    }

    #[test]
    fn stale_self_reflection_is_ignored() {
        let mut store = store("H01", Role::Robot);
        let fusion = fusion("H01", Role::Robot);
        store.base_mut().last_message_time = ts(T0 + 5_000);

        let mut entry = relayed("H01", "Base", T0 + 4_000);
        entry.command.name = "explore".into();
        entry.command.value = "east".into();
        let mut msg = message("H02", T0 + 5_000);
        msg.relayed_peers.push(entry);

        fusion.fuse(&mut store, &msg, ts(T0 + 5_000));
        assert!(store.local().state.command.name.is_empty());
    }

    #[test]
    fn base_sender_updates_base_record() {
        let mut store = store("H01", Role::Robot);
        let fusion = fusion("H01", Role::Robot);
        let mut msg = message("Base", T0 + 100);
        msg.role = Role::Base;
        msg.fragment_count = 7;
        msg.base_artifact_summaries = vec![ArtifactSummary {
            agent_id: "H01".into(),
            digest: "abc".into(),
        }];

        assert!(fusion.fuse(&mut store, &msg, ts(T0 + 200)).is_merged());
        let base = store.base();
        assert_eq!(base.last_message_time, ts(T0 + 200));
        assert_eq!(base.fragment_count, 7);
        assert_eq!(base.acknowledged_digest.as_deref(), Some("abc"));
        assert_eq!(base.heard_at, Some(ts(T0 + 200)));
    }

    #[test]
    fn summaries_need_a_sender_that_heard_the_base() {
        let mut store = store("H01", Role::Robot);
        let fusion = fusion("H01", Role::Robot);
        let summaries = vec![ArtifactSummary {
            agent_id: "H01".into(),
            digest: "abc".into(),
        }];

        // H02 has never heard the base: its empty table is not adopted.
        let mut msg = message("H02", T0 + 100);
        msg.base_artifact_summaries = Vec::new();
        let FusionOutcome::Merged(report) = fusion.fuse(&mut store, &msg, ts(T0 + 100)) else {
            panic!("expected merge");
        };
        assert!(!report.summaries_adopted);
        assert_eq!(store.base().heard_at, None);

        // H03 heard it 50ms before sending, on a clock 1s behind ours.
        let mut msg = message("H03", T0 - 1_000 + 300);
        msg.base_heard_at = Some(ts(T0 - 1_000 + 250));
        msg.base_artifact_summaries = summaries;
        let FusionOutcome::Merged(report) = fusion.fuse(&mut store, &msg, ts(T0 + 300)) else {
            panic!("expected merge");
        };
        assert!(report.summaries_adopted);
        let base = store.base();
        assert_eq!(base.heard_at, Some(ts(T0 + 250)));
        assert_eq!(base.acknowledged_digest.as_deref(), Some("abc"));
    }

    #[test]
    fn beacon_sender_updates_fragment_count_only() {
        let mut store = store("H01", Role::Robot);
        let fusion = fusion("H01", Role::Robot);
        store.beacon_mut(&"B02".into()).unwrap().reachable = true;

        let mut msg = message("B02", T0 + 100);
        msg.role = Role::Beacon;
        msg.fragment_count = 4;
        msg.relayed_peers.push(relayed("H02", "B02", T0 + 100));

        assert!(fusion.fuse(&mut store, &msg, ts(T0 + 100)).is_merged());
        assert_eq!(store.beacon(&"B02".into()).unwrap().fragment_count, 4);
        assert!(!store.peer(&"H02".into()).unwrap().state.status.is_empty());
    }

    #[test]
    fn beacon_gate_can_veto() {
        struct Inactive;
        impl AdmissionGate for Inactive {
            fn admit(&self, _msg: &AgentState) -> bool {
                false
            }
        }

        let mut store = store("B01", Role::Beacon);
        let mut fusion = GossipFusion::new("B01".into(), Role::Beacon, &FusionConfig::default(), ts(T0))
            .with_gate(Inactive);
        fusion.set_listening(true);
        assert_eq!(
            fusion.fuse(&mut store, &message("H02", T0), ts(T0)),
            FusionOutcome::Ignored(IgnoreReason::Vetoed)
        );
    }
}
