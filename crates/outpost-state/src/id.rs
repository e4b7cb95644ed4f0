//! Agent identities and roles.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Identity of the base station.
pub const BASE_ID: &str = "Base";

/// Name of an agent in the fleet (`H01`, `B03`, `Base`, ...).
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentId(String);

impl AgentId {
    /// Create an identity from any string-like value.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The base station identity.
    pub fn base() -> Self {
        Self(BASE_ID.to_string())
    }

    /// Borrow the identity as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this is the base station identity.
    pub fn is_base(&self) -> bool {
        self.0 == BASE_ID
    }

    /// Whether this is the empty sentinel identity.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AgentId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for AgentId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Name of beacon slot `n` (1-based): `B01`, `B02`, ..., `B10`, ...
pub fn beacon_slot_id(n: usize) -> AgentId {
    AgentId(format!("B{n:02}"))
}

/// What kind of agent a node is.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Mobile ground or aerial robot.
    #[default]
    Robot,
    /// Deployable relay beacon.
    Beacon,
    /// Base/anchor station.
    Base,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Robot => write!(f, "robot"),
            Self::Beacon => write!(f, "beacon"),
            Self::Base => write!(f, "base"),
        }
    }
}

impl FromStr for Role {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "robot" => Ok(Self::Robot),
            "beacon" => Ok(Self::Beacon),
            "base" => Ok(Self::Base),
            other => Err(Error::InvalidRole(other.to_string())),
        }
    }
}
