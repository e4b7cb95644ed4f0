//! Error types for outpost-state.

use thiserror::Error;

use crate::AgentId;

/// Result type for outpost-state operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur when addressing the record store.
#[derive(Debug, Error)]
pub enum Error {
    /// No robot record exists for this identity.
    #[error("unknown peer: {0}")]
    UnknownPeer(AgentId),

    /// No beacon slot exists for this identity.
    #[error("unknown beacon: {0}")]
    UnknownBeacon(AgentId),

    /// The beacon exists but is carried by another agent.
    #[error("beacon {0} is not owned by this agent")]
    BeaconNotOwned(AgentId),

    /// A role string did not name a known role.
    #[error("invalid role: {0}")]
    InvalidRole(String),
}
