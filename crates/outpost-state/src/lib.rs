//! Outpost Fleet State
//!
//! The record store behind the Outpost fleet mesh: one mutable record per
//! known identity (the local agent, every potential robot neighbor, the base
//! station and every beacon slot), plus the wire types peers exchange.
//!
//! # Design
//!
//! Nothing in the mesh has a global view. Each node keeps an approximate,
//! eventually-consistent picture of every other node, refreshed either by a
//! direct message from that node or by a relayed copy carried inside some
//! other node's message. Records are last-writer-wins per field, with the
//! precedence rules living in `outpost-protocols`.
//!
//! The local agent and remote peers share their common fields through
//! [`PeerState`], which is embedded in both [`SelfState`] and [`PeerRecord`].
//!
//! # Time
//!
//! All timestamps are [`Timestamp`] values in milliseconds on the *local*
//! clock. Timestamps embedded by remote peers are translated with a
//! [`ClockOffset`] before they are compared with local ones.

mod error;
mod fragments;
mod id;
mod ledger;
mod records;
mod store;
mod time;
pub mod wire;

pub use error::{Error, Result};
pub use fragments::FragmentStore;
pub use id::{beacon_slot_id, AgentId, Role, BASE_ID};
pub use ledger::{detection_key, ArtifactLedger, DetectionRecord};
pub use records::{
    BaseRecord, BeaconRecord, CommonFields, CommandDispatch, PeerRecord, PeerState,
    PendingCommand, SelfState,
};
pub use store::{PeerRecordStore, RecordKind, Roster};
pub use time::{Clock, ClockOffset, ManualClock, SystemClock, Timestamp};
pub use wire::{
    AgentState, ArtifactSummary, BeaconInfo, BeaconState, Detection, FragmentBatch,
    FragmentRequest, FragmentResponse, FragmentResult, Goal, GoalPoint, LinkReport, LinkVector,
    MapFragment, OperatorCommand, Orientation, Pose, Position, RelayedPeer, WireMessage,
};
