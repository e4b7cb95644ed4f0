//! Wire types exchanged between fleet nodes.
//!
//! Every gossip datagram is a [`WireMessage`], internally tagged by `kind`.
//! The map fragment service uses [`FragmentBatch`] / [`FragmentResponse`].

use serde::{Deserialize, Serialize};

use crate::{AgentId, Role, Timestamp};

/// A point in the shared world frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Position {
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }
}

/// Orientation quaternion.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Orientation {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub w: f64,
}

impl Default for Orientation {
    fn default() -> Self {
        Self { x: 0.0, y: 0.0, z: 0.0, w: 1.0 }
    }
}

/// Odometry snapshot of an agent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    pub position: Position,
    pub orientation: Orientation,
    /// Linear velocity in the world frame.
    #[serde(default)]
    pub velocity: Position,
}

impl Pose {
    /// A pose at `position` with identity orientation and no velocity.
    pub fn at(position: Position) -> Self {
        Self {
            position,
            ..Self::default()
        }
    }
}

/// Current task of an agent as reported by its planner.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Goal {
    /// Kind of goal (`frontier`, `anchor`, `home`, ...). Empty when idle.
    #[serde(default)]
    pub kind: String,
    /// Target pose, if any.
    #[serde(default)]
    pub target: Option<Pose>,
    /// Planned path toward the target.
    #[serde(default)]
    pub path: Vec<Position>,
}

/// Operator-issued goal point, tagged with its reference frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GoalPoint {
    pub frame_id: String,
    pub pose: Pose,
}

/// Operator command fields. Empty strings and `None` mean "no command".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OperatorCommand {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub goal_point: Option<GoalPoint>,
}

impl OperatorCommand {
    /// Whether no command field is set.
    pub fn is_empty(&self) -> bool {
        self.name.is_empty() && self.value.is_empty() && self.goal_point.is_none()
    }
}

/// An already-classified artifact detection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    /// Object class reported by the detector.
    pub class: String,
    /// Reported position in the world frame.
    pub position: Position,
    /// Detector confidence in `[0, 1]`.
    #[serde(default)]
    pub confidence: f64,
}

/// Per-agent digest of the detection list the base has received.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactSummary {
    pub agent_id: AgentId,
    pub digest: String,
}

/// Beacon announcement.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BeaconInfo {
    pub id: AgentId,
    pub active: bool,
    pub position: Position,
}

/// Compact copy of a third-party peer's last-known state, carried by a relay.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RelayedPeer {
    pub id: AgentId,
    /// Who last updated the relay's copy (`None` if never updated).
    #[serde(default)]
    pub relay_id: Option<AgentId>,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub pose: Pose,
    #[serde(default)]
    pub goal: Goal,
    #[serde(default)]
    pub detections: Vec<Detection>,
    #[serde(default)]
    pub fragment_count: u32,
    /// Freshness of the copy, on the relay's clock.
    pub last_message_timestamp: Timestamp,
    #[serde(default)]
    pub command: OperatorCommand,
}

/// Periodic broadcast of one agent's own state and its relayed view of others.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentState {
    pub id: AgentId,
    #[serde(default)]
    pub relay_id: Option<AgentId>,
    pub role: Role,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub pose: Pose,
    #[serde(default)]
    pub goal: Goal,
    #[serde(default)]
    pub detections: Vec<Detection>,
    #[serde(default)]
    pub fragment_count: u32,
    pub last_message_timestamp: Timestamp,
    /// Send time on the sender's clock.
    pub sent_at: Timestamp,
    /// When the sender's base summaries left the base, on the sender's clock.
    /// `None` until the sender has any.
    #[serde(default)]
    pub base_heard_at: Option<Timestamp>,
    #[serde(default)]
    pub base_artifact_summaries: Vec<ArtifactSummary>,
    #[serde(default)]
    pub active_beacons: Vec<BeaconInfo>,
    /// The sender's own pending command, echoed so the issuer can clear it.
    #[serde(default)]
    pub command: OperatorCommand,
    #[serde(default)]
    pub relayed_peers: Vec<RelayedPeer>,
}

/// One entry of a link vector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkReport {
    pub peer_id: AgentId,
    pub reachable: bool,
}

/// A node's direct-reachability observation of every other known node
/// (simulated comms only).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkVector {
    pub reporter_id: AgentId,
    pub links: Vec<LinkReport>,
}

/// Active beacon broadcast.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BeaconState {
    pub beacons: Vec<BeaconInfo>,
}

/// Gossip datagram.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WireMessage {
    AgentState(AgentState),
    LinkVector(LinkVector),
    BeaconState(BeaconState),
}

/// One unit of an incremental map delta.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapFragment {
    /// Position of this fragment in its owner's sequence.
    pub index: u32,
    pub data: Vec<u8>,
}

/// Fragments wanted for one target peer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FragmentRequest {
    pub target_peer_id: AgentId,
    pub missing_indices: Vec<u32>,
}

/// Batched fragment request sent to one directly reachable peer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FragmentBatch {
    pub requests: Vec<FragmentRequest>,
}

impl FragmentBatch {
    /// Total number of indices requested across all targets.
    pub fn index_count(&self) -> usize {
        self.requests.iter().map(|r| r.missing_indices.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.index_count() == 0
    }
}

/// Fragments supplied for one target peer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FragmentResult {
    pub peer_id: AgentId,
    pub fragments: Vec<MapFragment>,
    /// Indices the responder actually supplied.
    pub received_indices: Vec<u32>,
}

/// Fragment service reply.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FragmentResponse {
    pub results: Vec<FragmentResult>,
}
