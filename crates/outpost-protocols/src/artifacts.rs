//! Artifact deduplication across the fleet.
//!
//! Each cycle the local detection list and the lists of peers in direct comm
//! are folded into the store's [`ArtifactLedger`](outpost_state::ArtifactLedger).
//! A digest per list skips lists that have not changed since the last scan.

use outpost_state::{AgentId, ArtifactSummary, Detection, PeerRecordStore, PeerState, Timestamp};
use tracing::{debug, info};

/// Content digest of a detection list (BLAKE3, hex).
///
/// Only a change detector: equal lists always digest equally.
pub fn detection_digest(detections: &[Detection]) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&(detections.len() as u64).to_le_bytes());
    for detection in detections {
        hasher.update(&(detection.class.len() as u64).to_le_bytes());
        hasher.update(detection.class.as_bytes());
        hasher.update(&detection.position.x.to_le_bytes());
        hasher.update(&detection.position.y.to_le_bytes());
        hasher.update(&detection.position.z.to_le_bytes());
        hasher.update(&detection.confidence.to_le_bytes());
    }
    hex::encode(hasher.finalize().as_bytes())
}

/// Result of one [`scan`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArtifactScan {
    /// Lists that changed and were folded in.
    pub scanned: Vec<AgentId>,
    /// First sightings, with the agent whose list carried them.
    pub new_artifacts: Vec<(AgentId, String)>,
}

/// Fold the local list and every directly connected peer's list into the ledger.
pub fn scan(store: &mut PeerRecordStore, now: Timestamp) -> ArtifactScan {
    let mut result = ArtifactScan::default();

    let local_id = store.local_id().clone();
    if let Some(detections) = changed_list(&mut store.local_mut().state) {
        observe(store, &local_id, &detections, now, &mut result);
    }

    for id in store.peer_ids() {
        let detections = match store.peer_mut(&id) {
            Some(peer) if peer.in_direct_comm => changed_list(&mut peer.state),
            _ => None,
        };
        if let Some(detections) = detections {
            observe(store, &id, &detections, now, &mut result);
        }
    }

    result
}

/// Returns the list if its digest moved, recording the new digest.
fn changed_list(state: &mut PeerState) -> Option<Vec<Detection>> {
    let digest = detection_digest(&state.detections);
    if state.detection_digest.as_deref() == Some(digest.as_str()) {
        return None;
    }
    state.detection_digest = Some(digest);
    Some(state.detections.clone())
}

fn observe(
    store: &mut PeerRecordStore,
    source: &AgentId,
    detections: &[Detection],
    now: Timestamp,
    result: &mut ArtifactScan,
) {
    result.scanned.push(source.clone());
    for detection in detections {
        if let Some(key) = store.artifacts_mut().observe(detection, now) {
            info!(from = %source, class = %detection.class, key = %key, "New artifact");
            result.new_artifacts.push((source.clone(), key));
        }
    }
    debug!(from = %source, count = detections.len(), "Scanned detection list");
}

/// Per-agent digests the base publishes so robots can tell whether their
/// latest list has been received.
pub fn base_summaries(store: &PeerRecordStore) -> Vec<ArtifactSummary> {
    store
        .peers()
        .filter_map(|peer| {
            peer.state
                .detection_digest
                .as_ref()
                .map(|digest| ArtifactSummary {
                    agent_id: peer.id.clone(),
                    digest: digest.clone(),
                })
        })
        .collect()
}

/// Whether the base has acknowledged the local node's current detection list.
pub fn acknowledged_by_base(store: &PeerRecordStore) -> bool {
    let digest = detection_digest(&store.local().state.detections);
    store.base().acknowledged_digest.as_deref() == Some(digest.as_str())
}
