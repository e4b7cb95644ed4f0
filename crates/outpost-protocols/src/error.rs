//! Error types for outpost-protocols.

use std::time::Duration;

use thiserror::Error;

/// Result type for outpost-protocols operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during reconciliation and record updates.
#[derive(Debug, Error)]
pub enum Error {
    /// The record store rejected an operation.
    #[error("state error: {0}")]
    State(#[from] outpost_state::Error),

    /// A fragment request did not complete in time.
    #[error("fragment request timed out after {0:?}")]
    Timeout(Duration),

    /// The remote fragment service answered with an error.
    #[error("fragment service error: {0}")]
    Service(String),

    /// The request could not be delivered.
    #[error("transport error: {0}")]
    Transport(String),
}
