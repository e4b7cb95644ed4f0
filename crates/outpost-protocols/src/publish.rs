//! Building this node's outbound view.

use outpost_state::{
    AgentId, AgentState, MapFragment, PeerRecordStore, RelayedPeer, Role, Timestamp,
};
use serde::{Deserialize, Serialize};

use crate::{artifacts, beacons};

/// The node's own state plus a relayed copy of every robot it knows about.
pub fn build_agent_state(store: &PeerRecordStore, now: Timestamp) -> AgentState {
    let local = store.local();
    let base = store.base();

    let base_artifact_summaries = if local.role == Role::Base {
        artifacts::base_summaries(store)
    } else {
        base.artifact_summaries.clone()
    };

    let relayed_peers = store
        .peers()
        .map(|peer| RelayedPeer {
            id: peer.id.clone(),
            relay_id: peer.relay_id.clone(),
            status: peer.state.status.clone(),
            pose: peer.state.pose.clone(),
            goal: peer.state.goal.clone(),
            detections: peer.state.detections.clone(),
            fragment_count: peer.state.fragment_count(),
            last_message_timestamp: peer.last_message_time,
            command: peer.state.command.as_command(),
        })
        .collect();

    AgentState {
        id: local.id.clone(),
        relay_id: None,
        role: local.role,
        status: local.state.status.clone(),
        pose: local.state.pose.clone(),
        goal: local.state.goal.clone(),
        detections: local.state.detections.clone(),
        fragment_count: local.state.fragment_count(),
        last_message_timestamp: now,
        sent_at: now,
        base_heard_at: if local.role == Role::Base {
            Some(now)
        } else {
            base.heard_at
        },
        base_artifact_summaries,
        active_beacons: beacons::active_beacons(store),
        command: local.state.command.as_command(),
        relayed_peers,
    }
}

/// One peer's map fragments as held locally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NeighborMap {
    pub owner: AgentId,
    pub fragments: Vec<MapFragment>,
}

/// Every peer's fragments, handed to the map merger each cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NeighborMaps {
    pub neighbors: Vec<NeighborMap>,
}

impl NeighborMaps {
    pub fn collect(store: &PeerRecordStore) -> Self {
        let neighbors = store
            .peers()
            .map(|peer| NeighborMap {
                owner: peer.id.clone(),
                fragments: peer.fragments.iter().cloned().collect(),
            })
            .collect();
        Self { neighbors }
    }

    /// Total fragments across all neighbors.
    pub fn fragment_count(&self) -> usize {
        self.neighbors.iter().map(|n| n.fragments.len()).sum()
    }
}
