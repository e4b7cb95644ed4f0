//! The owning record store.

use std::collections::BTreeMap;

use crate::error::{Error, Result};
use crate::ledger::ArtifactLedger;
use crate::records::{BaseRecord, BeaconRecord, PeerRecord, SelfState};
use crate::{beacon_slot_id, AgentId, Role, Timestamp};

/// Static roster of identities a node tracks, fixed at startup.
#[derive(Debug, Clone)]
pub struct Roster {
    pub local_id: AgentId,
    pub role: Role,
    /// Potential robot neighbors. The local id may appear and is skipped.
    pub neighbors: Vec<AgentId>,
    /// Number of beacon slots (`B01..`).
    pub total_beacons: usize,
    /// Beacon slots carried by this agent.
    pub owned_beacons: Vec<AgentId>,
}

impl Roster {
    /// All beacon slot ids.
    pub fn beacon_ids(&self) -> impl Iterator<Item = AgentId> {
        (1..=self.total_beacons).map(beacon_slot_id)
    }

    /// Robot neighbors other than the local agent, deduplicated, in order.
    pub fn remote_neighbors(&self) -> Vec<AgentId> {
        let mut out: Vec<AgentId> = Vec::with_capacity(self.neighbors.len());
        for id in &self.neighbors {
            if id != &self.local_id && !id.is_empty() && !out.contains(id) {
                out.push(id.clone());
            }
        }
        out
    }

    /// Every identity the node may hear from: neighbors, beacons and the base.
    pub fn known_ids(&self) -> Vec<AgentId> {
        let mut ids = self.remote_neighbors();
        ids.extend(self.beacon_ids().filter(|id| id != &self.local_id));
        if self.role != Role::Base {
            ids.push(AgentId::base());
        }
        ids
    }
}

/// What kind of record an identity maps to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    Local,
    Robot,
    Beacon,
    Base,
}

/// One record per known identity, created at startup and never removed.
#[derive(Debug, Clone)]
pub struct PeerRecordStore {
    local: SelfState,
    peers: BTreeMap<AgentId, PeerRecord>,
    base: BaseRecord,
    beacons: BTreeMap<AgentId, BeaconRecord>,
    artifacts: ArtifactLedger,
}

impl PeerRecordStore {
    /// Build every record the roster names.
    pub fn new(roster: &Roster, now: Timestamp) -> Self {
        let peers = roster
            .remote_neighbors()
            .into_iter()
            .map(|id| (id.clone(), PeerRecord::new(id, Role::Robot, now)))
            .collect();

        let beacons = roster
            .beacon_ids()
            .map(|id| {
                let owned = roster.owned_beacons.contains(&id);
                (id.clone(), BeaconRecord::new(id, owned))
            })
            .collect();

        Self {
            local: SelfState::new(roster.local_id.clone(), roster.role),
            peers,
            base: BaseRecord::new(now),
            beacons,
            artifacts: ArtifactLedger::new(),
        }
    }

    pub fn local_id(&self) -> &AgentId {
        &self.local.id
    }

    pub fn local(&self) -> &SelfState {
        &self.local
    }

    pub fn local_mut(&mut self) -> &mut SelfState {
        &mut self.local
    }

    /// Classify an identity.
    pub fn kind_of(&self, id: &AgentId) -> Option<RecordKind> {
        if id == &self.local.id {
            Some(RecordKind::Local)
        } else if self.peers.contains_key(id) {
            Some(RecordKind::Robot)
        } else if self.beacons.contains_key(id) {
            Some(RecordKind::Beacon)
        } else if id.is_base() {
            Some(RecordKind::Base)
        } else {
            None
        }
    }

    pub fn peer(&self, id: &AgentId) -> Option<&PeerRecord> {
        self.peers.get(id)
    }

    pub fn peer_mut(&mut self, id: &AgentId) -> Option<&mut PeerRecord> {
        self.peers.get_mut(id)
    }

    /// Like [`peer_mut`](Self::peer_mut) but an error for unknown ids.
    pub fn require_peer_mut(&mut self, id: &AgentId) -> Result<&mut PeerRecord> {
        self.peers
            .get_mut(id)
            .ok_or_else(|| Error::UnknownPeer(id.clone()))
    }

    pub fn peers(&self) -> impl Iterator<Item = &PeerRecord> {
        self.peers.values()
    }

    pub fn peers_mut(&mut self) -> impl Iterator<Item = &mut PeerRecord> {
        self.peers.values_mut()
    }

    pub fn peer_ids(&self) -> Vec<AgentId> {
        self.peers.keys().cloned().collect()
    }

    pub fn base(&self) -> &BaseRecord {
        &self.base
    }

    pub fn base_mut(&mut self) -> &mut BaseRecord {
        &mut self.base
    }

    pub fn beacon(&self, id: &AgentId) -> Option<&BeaconRecord> {
        self.beacons.get(id)
    }

    pub fn beacon_mut(&mut self, id: &AgentId) -> Option<&mut BeaconRecord> {
        self.beacons.get_mut(id)
    }

    pub fn beacons(&self) -> impl Iterator<Item = &BeaconRecord> {
        self.beacons.values()
    }

    pub fn beacons_mut(&mut self) -> impl Iterator<Item = &mut BeaconRecord> {
        self.beacons.values_mut()
    }

    /// Write a reachability flag onto whichever record `id` names.
    /// Returns false if the id is not tracked.
    pub fn set_reachable(&mut self, id: &AgentId, reachable: bool) -> bool {
        if let Some(peer) = self.peers.get_mut(id) {
            peer.reachable = reachable;
        } else if let Some(beacon) = self.beacons.get_mut(id) {
            beacon.reachable = reachable;
        } else if id.is_base() {
            self.base.reachable = reachable;
        } else {
            return false;
        }
        true
    }

    pub fn artifacts(&self) -> &ArtifactLedger {
        &self.artifacts
    }

    pub fn artifacts_mut(&mut self) -> &mut ArtifactLedger {
        &mut self.artifacts
    }
}
