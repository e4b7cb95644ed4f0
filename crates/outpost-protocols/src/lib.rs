//! Outpost Protocols - Reachability, Gossip Fusion and Map Reconciliation
//!
//! This crate holds the state-fusion logic that runs on every fleet node on
//! top of the [`outpost_state`] record store.
//!
//! # Overview
//!
//! ## Reachability
//!
//! [`ReachabilityEngine`] decides each control cycle which peers are in
//! direct comm (by message timeout) and, with simulated comms, which peers
//! are reachable at all (transitive closure over reported link vectors).
//!
//! ## Gossip Fusion
//!
//! [`GossipFusion`] merges an inbound [`AgentState`](outpost_state::AgentState)
//! into the store: the sender's own fields directly, its relayed view of
//! third parties under freshness and relay-margin arbitration.
//!
//! ## Map Reconciliation
//!
//! The [`reconcile`] module pulls missing map fragments from peers in direct
//! comm with a deadline per request and tolerates partial answers.
//!
//! ## Artifacts and Beacons
//!
//! [`artifacts`] deduplicates detections across the fleet; [`beacons`]
//! spreads beacon activation.
//!
//! # Example
//!
//! ```rust,ignore
//! use outpost_protocols::{FusionConfig, GossipFusion, ReachabilityEngine};
//!
//! let config = FusionConfig::default();
//! let reachability = ReachabilityEngine::new(id.clone(), role, &config);
//! let mut fusion = GossipFusion::new(id, role, &config, clock.now());
//! fusion.set_listening(true);
//!
//! // On every inbound agent state:
//! fusion.fuse(&mut store, &msg, clock.now());
//!
//! // Every cycle:
//! reachability.update(&mut store, clock.now());
//! let outbound = outpost_protocols::publish::build_agent_state(&store, clock.now());
//! ```

pub mod artifacts;
pub mod beacons;
pub mod config;
pub mod error;
pub mod fusion;
pub mod publish;
pub mod reachability;
pub mod reconcile;

pub use config::FusionConfig;
pub use error::{Error, Result};
pub use fusion::{AdmissionGate, AdmitAll, FusionOutcome, FusionReport, GossipFusion, IgnoreReason};
pub use publish::{build_agent_state, NeighborMap, NeighborMaps};
pub use reachability::{ReachabilityEngine, ReachabilityMode, ReachabilityReport};
pub use reconcile::{
    DiffReconciler, FragmentClient, ReconcileJob, ReconcileOutcome, ReconcilePlan,
};
