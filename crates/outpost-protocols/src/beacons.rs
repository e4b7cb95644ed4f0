//! Beacon reconciliation.
//!
//! Activation only ever spreads: a beacon reported active by any neighbor
//! (or by the base) becomes active locally at the reported position and
//! stays active.

use outpost_state::{
    AgentId, BeaconInfo, BeaconState, Error, PeerRecordStore, Position, Role,
};
use tracing::{debug, info};

use crate::error::Result;

/// Adopt every active beacon reported by neighbors and, for robots, by the base.
/// Returns the ids newly activated.
pub fn reconcile(store: &mut PeerRecordStore, role: Role) -> Vec<AgentId> {
    let mut reports: Vec<BeaconInfo> = store
        .peers()
        .flat_map(|peer| peer.active_beacons.iter().cloned())
        .collect();
    if role != Role::Base {
        reports.extend(store.base().active_beacons.iter().cloned());
    }
    activate_reported(store, &reports)
}

/// Apply a beacon state broadcast. Returns the ids newly activated.
pub fn apply_beacon_state(store: &mut PeerRecordStore, state: &BeaconState) -> Vec<AgentId> {
    activate_reported(store, &state.beacons)
}

fn activate_reported(store: &mut PeerRecordStore, reports: &[BeaconInfo]) -> Vec<AgentId> {
    let mut activated = Vec::new();
    for report in reports.iter().filter(|b| b.active) {
        match store.beacon_mut(&report.id) {
            Some(beacon) => {
                if beacon.activate(report.position) {
                    info!(beacon = %report.id, "Beacon activated by report");
                    activated.push(report.id.clone());
                }
            }
            None => debug!(beacon = %report.id, "Report for unknown beacon skipped"),
        }
    }
    activated
}

/// Every locally known active beacon, as published.
pub fn active_beacons(store: &PeerRecordStore) -> Vec<BeaconInfo> {
    store
        .beacons()
        .filter(|beacon| beacon.is_active())
        .map(|beacon| beacon.info())
        .collect()
}

/// Deploy a beacon carried by this agent at `position`.
///
/// Returns false if the beacon was already active.
pub fn deploy(store: &mut PeerRecordStore, id: &AgentId, position: Position) -> Result<bool> {
    let beacon = store
        .beacon_mut(id)
        .ok_or_else(|| Error::UnknownBeacon(id.clone()))?;
    if !beacon.owned_locally {
        return Err(Error::BeaconNotOwned(id.clone()).into());
    }
    let deployed = beacon.activate(position);
    if deployed {
        info!(beacon = %id, x = position.x, y = position.y, "Beacon deployed");
    }
    Ok(deployed)
}
