//! Handle through which sensors, planners and operators talk to a node.

use std::sync::Arc;

use outpost_protocols::{artifacts, NeighborMaps};
use outpost_state::{
    AgentId, CommandDispatch, Detection, DetectionRecord, Goal, LinkReport, OperatorCommand,
    PeerRecord, Pose, Position,
};
use tokio::sync::{watch, RwLock};
use tracing::info;

use crate::error::Result;
use crate::node::FleetState;

/// Cheap to clone; every clone addresses the same node.
#[derive(Clone)]
pub struct NodeHandle {
    state: Arc<RwLock<FleetState>>,
    shutdown: Arc<watch::Sender<bool>>,
    neighbor_maps: watch::Receiver<NeighborMaps>,
}

impl NodeHandle {
    pub(crate) fn new(
        state: Arc<RwLock<FleetState>>,
        shutdown: Arc<watch::Sender<bool>>,
        neighbor_maps: watch::Receiver<NeighborMaps>,
    ) -> Self {
        Self {
            state,
            shutdown,
            neighbor_maps,
        }
    }

    pub async fn set_status(&self, status: impl Into<String>) {
        self.state.write().await.store.local_mut().state.status = status.into();
    }

    pub async fn set_pose(&self, pose: Pose) {
        self.state.write().await.store.local_mut().state.pose = pose;
    }

    pub async fn set_goal(&self, goal: Goal) {
        self.state.write().await.store.local_mut().state.goal = goal;
    }

    pub async fn set_detections(&self, detections: Vec<Detection>) {
        self.state.write().await.store.local_mut().state.detections = detections;
    }

    /// Append a fragment of this node's map. Returns its index.
    pub async fn add_map_fragment(&self, data: Vec<u8>) -> u32 {
        self.state.write().await.store.local_mut().add_fragment(data)
    }

    /// Deploy a beacon this node carries. Returns false if it was already active.
    pub async fn deploy_beacon(&self, id: &AgentId, position: Position) -> Result<bool> {
        Ok(self.state.write().await.deploy_beacon(id, position)?)
    }

    /// Queue an operator command for a robot; it travels in relayed entries
    /// until the robot echoes it back.
    pub async fn issue_command(&self, peer: &AgentId, command: OperatorCommand) -> Result<()> {
        let mut state = self.state.write().await;
        let record = state.store.require_peer_mut(peer)?;
        info!(%peer, name = %command.name, value = %command.value, "Command issued");
        record.state.command.issue(command);
        Ok(())
    }

    /// Commands received for this node since the last call.
    pub async fn take_command(&self) -> Option<CommandDispatch> {
        self.state
            .write()
            .await
            .store
            .local_mut()
            .state
            .command
            .take_dispatch()
    }

    /// Feed this node's own link observations (simulated comms).
    pub async fn report_links(&self, links: Vec<LinkReport>) {
        self.state.write().await.report_links(links);
    }

    /// Snapshot of one robot's record.
    pub async fn peer(&self, id: &AgentId) -> Option<PeerRecord> {
        self.state.read().await.store.peer(id).cloned()
    }

    pub async fn unreported(&self) -> Vec<DetectionRecord> {
        self.state
            .read()
            .await
            .store
            .artifacts()
            .unreported()
            .into_iter()
            .cloned()
            .collect()
    }

    pub async fn mark_reported(&self, key: &str) -> bool {
        self.state.write().await.store.artifacts_mut().mark_reported(key)
    }

    /// Whether the base has echoed the digest of this node's current detections.
    pub async fn acknowledged_by_base(&self) -> bool {
        artifacts::acknowledged_by_base(&self.state.read().await.store)
    }

    /// Per-peer fragment bundles, refreshed every published cycle.
    pub fn neighbor_maps(&self) -> watch::Receiver<NeighborMaps> {
        self.neighbor_maps.clone()
    }

    /// Stop every loop of the node.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }
}
