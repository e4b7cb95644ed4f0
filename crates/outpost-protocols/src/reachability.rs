//! Per-cycle reachability.
//!
//! Two passes feed two different flags on the records:
//!
//! - The **timeout pass** runs every cycle in both modes. A peer is in direct
//!   comm if it was heard from directly within the comm threshold. This drives
//!   reconciliation and the priority of direct over relayed updates.
//! - The **closure pass** runs only with simulated comms. Every node reports
//!   which ids it can hear directly (a [`LinkVector`]); starting from the local
//!   node's own vector the engine walks the reported graph breadth-first and
//!   marks every id it reaches. The result is the admission flag `reachable`.
//!
//! With real links there is no closure; `reachable` stays set and a message
//! arriving at all is the evidence that its sender is reachable.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::time::Duration;

use outpost_state::{AgentId, LinkVector, PeerRecordStore, Role, Timestamp};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::config::FusionConfig;

/// Reachability strategy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReachabilityMode {
    /// Real links: direct comm from message timestamps only.
    #[default]
    Timeout,
    /// Simulated links: transitive closure over reported link vectors.
    Simulated,
}

/// What one [`ReachabilityEngine::update`] produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReachabilityReport {
    /// Robot peers currently in direct comm.
    pub in_direct_comm: Vec<AgentId>,
    /// Closure members, in simulated mode with a local link vector.
    pub reachable: Option<BTreeSet<AgentId>>,
}

/// Computes direct comm and reachability flags each control cycle.
#[derive(Debug, Clone)]
pub struct ReachabilityEngine {
    local_id: AgentId,
    role: Role,
    mode: ReachabilityMode,
    comm_threshold: Duration,
    solo: bool,
    /// The local node's own direct observations.
    own_links: Option<BTreeMap<AgentId, bool>>,
    /// Latest vector per remote reporter.
    reports: BTreeMap<AgentId, BTreeMap<AgentId, bool>>,
}

impl ReachabilityEngine {
    pub fn new(local_id: AgentId, role: Role, config: &FusionConfig) -> Self {
        Self {
            local_id,
            role,
            mode: config.mode,
            comm_threshold: config.comm_threshold,
            solo: config.solo,
            own_links: None,
            reports: BTreeMap::new(),
        }
    }

    pub fn mode(&self) -> ReachabilityMode {
        self.mode
    }

    /// Store a link vector, replacing any earlier one from the same reporter.
    pub fn record_link_vector(&mut self, vector: &LinkVector) {
        let links: BTreeMap<AgentId, bool> = vector
            .links
            .iter()
            .map(|link| (link.peer_id.clone(), link.reachable))
            .collect();

        if vector.reporter_id == self.local_id {
            trace!(links = links.len(), "Own link vector updated");
            self.own_links = Some(links);
        } else {
            trace!(reporter = %vector.reporter_id, links = links.len(), "Link vector stored");
            self.reports.insert(vector.reporter_id.clone(), links);
        }
    }

    /// The local node's own direct observations, if any have arrived.
    pub fn own_links(&self) -> Option<&BTreeMap<AgentId, bool>> {
        self.own_links.as_ref()
    }

    /// Every id reachable from the local node through reported links.
    ///
    /// Empty until the local node's own vector has arrived. The local id is
    /// never a member.
    pub fn closure(&self) -> BTreeSet<AgentId> {
        let mut visited = BTreeSet::new();
        let Some(own) = &self.own_links else {
            return visited;
        };

        let mut queue: VecDeque<AgentId> = VecDeque::new();
        for (id, reachable) in own {
            if *reachable && *id != self.local_id && visited.insert(id.clone()) {
                queue.push_back(id.clone());
            }
        }

        while let Some(hop) = queue.pop_front() {
            let Some(links) = self.reports.get(&hop) else {
                continue;
            };
            for (id, reachable) in links {
                if *reachable && *id != self.local_id && visited.insert(id.clone()) {
                    queue.push_back(id.clone());
                }
            }
        }

        visited
    }

    /// Run this cycle's passes and write the results onto the store.
    pub fn update(&self, store: &mut PeerRecordStore, now: Timestamp) -> ReachabilityReport {
        let in_direct_comm = self.timeout_pass(store, now);

        let reachable = match self.mode {
            ReachabilityMode::Simulated => self.closure_pass(store),
            ReachabilityMode::Timeout => {
                for peer in store.peers_mut() {
                    peer.reachable = true;
                }
                for beacon in store.beacons_mut() {
                    beacon.reachable = true;
                }
                store.base_mut().reachable = true;
                None
            }
        };

        ReachabilityReport {
            in_direct_comm,
            reachable,
        }
    }

    fn timeout_pass(&self, store: &mut PeerRecordStore, now: Timestamp) -> Vec<AgentId> {
        let mut in_comm = Vec::new();
        for peer in store.peers_mut() {
            let fresh = now.since(peer.last_direct_message_time) < self.comm_threshold;
            if fresh != peer.in_direct_comm {
                debug!(peer = %peer.id, in_comm = fresh, "Direct comm changed");
            }
            peer.in_direct_comm = fresh;
            if fresh {
                in_comm.push(peer.id.clone());
            }
        }

        if self.role == Role::Robot {
            let base = store.base_mut();
            let fresh = self.solo || now.since(base.last_message_time) < self.comm_threshold;
            if fresh != base.in_direct_comm {
                debug!(in_comm = fresh, "Base comm changed");
            }
            base.in_direct_comm = fresh;
        }

        in_comm
    }

    fn closure_pass(&self, store: &mut PeerRecordStore) -> Option<BTreeSet<AgentId>> {
        if self.own_links.is_none() {
            return None;
        }
        let closure = self.closure();

        // Every tracked record, so ids that left the closure are cleared too.
        for peer in store.peers_mut() {
            peer.reachable = closure.contains(&peer.id);
        }
        for beacon in store.beacons_mut() {
            beacon.reachable = closure.contains(&beacon.id);
        }

        if self.role != Role::Base {
            let base = AgentId::base();
            let from_base = self
                .reports
                .get(&base)
                .and_then(|links| links.get(&self.local_id).copied());
            store.set_reachable(&base, from_base.unwrap_or_else(|| closure.contains(&base)));
        }

        trace!(members = closure.len(), "Reachability closure applied");
        Some(closure)
    }
}
