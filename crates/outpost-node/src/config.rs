//! Node configuration from the environment.

use std::collections::BTreeMap;
use std::fmt::Display;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use outpost_protocols::{FusionConfig, ReachabilityMode};
use outpost_state::{AgentId, Role, Roster};

use crate::error::{Error, Result};

/// Tracing filter used when `RUST_LOG` is unset; one directive per crate.
pub const DEFAULT_LOG_FILTER: &str = "outpost_node=info,outpost_protocols=info,outpost_state=info";

/// Configuration for an Outpost node.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// This node's identity
    pub id: AgentId,
    /// What kind of agent this node is
    pub role: Role,
    /// Control loop frequency
    pub rate_hz: f64,
    /// Direct comm window
    pub comm_threshold: Duration,
    /// Reachability from simulated link vectors instead of timeouts
    pub sim_comms: bool,
    /// Running without a base station
    pub solo: bool,
    /// Number of beacon slots
    pub total_beacons: usize,
    /// Potential robot neighbors
    pub neighbors: Vec<AgentId>,
    /// Beacons carried by this agent
    pub my_beacons: Vec<AgentId>,
    /// Gossip (UDP) listen address; the fragment service uses the next port
    pub listen_addr: SocketAddr,
    /// Gossip address of every peer
    pub peers: BTreeMap<AgentId, SocketAddr>,
    /// Deadline for one fragment request
    pub request_timeout: Duration,
    /// Relayed entries are ignored for this long after startup
    pub startup_grace: Duration,
    /// Wait before the control loop starts
    pub start_delay: Duration,
    /// Fragment requests in flight at once
    pub reconcile_concurrency: usize,
}

impl NodeConfig {
    /// Create config from `OUTPOST_*` environment variables with sensible defaults.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Create config from any variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let id = AgentId::from(get("OUTPOST_ID").unwrap_or_else(|| "H01".to_string()));
        let role: Role = parse(&get, "OUTPOST_ROLE", Role::Robot)?;

        let rate_hz: f64 = parse(&get, "OUTPOST_RATE_HZ", 1.0)?;
        if !(rate_hz.is_finite() && rate_hz > 0.0) {
            return Err(Error::Config(format!("OUTPOST_RATE_HZ must be positive, got {rate_hz}")));
        }

        let comm_threshold = secs(parse(&get, "OUTPOST_COMM_THRESHOLD_SECS", 2.0)?, "OUTPOST_COMM_THRESHOLD_SECS")?;
        let sim_comms = parse_bool(&get, "OUTPOST_SIM_COMMS", false)?;
        let solo = parse_bool(&get, "OUTPOST_SOLO", false)?;
        let total_beacons = parse(&get, "OUTPOST_TOTAL_BEACONS", 16usize)?;

        let neighbors = get("OUTPOST_NEIGHBORS")
            .map(|s| parse_ids(&s))
            .unwrap_or_else(|| parse_ids("H01,H02,H03"));
        let my_beacons = get("OUTPOST_MY_BEACONS")
            .map(|s| parse_ids(&s))
            .unwrap_or_default();

        let listen_addr = parse(&get, "OUTPOST_LISTEN_ADDR", SocketAddr::from(([0, 0, 0, 0], 9100)))?;
        let peers = match get("OUTPOST_PEERS") {
            Some(s) => parse_peers(&s)?,
            None => BTreeMap::new(),
        };
        // Port 0 binds an ephemeral port and is checked once bound.
        if listen_addr.port() != 0 {
            Self::fragment_addr(listen_addr)?;
        }
        for addr in peers.values() {
            Self::fragment_addr(*addr)?;
        }

        let request_timeout = Duration::from_millis(parse(&get, "OUTPOST_REQUEST_TIMEOUT_MS", 1000u64)?);
        let startup_grace = secs(parse(&get, "OUTPOST_STARTUP_GRACE_SECS", 0.0)?, "OUTPOST_STARTUP_GRACE_SECS")?;

        let default_delay = if role == Role::Robot && !sim_comms { 5.0 } else { 0.0 };
        let start_delay = secs(parse(&get, "OUTPOST_START_DELAY_SECS", default_delay)?, "OUTPOST_START_DELAY_SECS")?;

        let reconcile_concurrency: usize = parse(&get, "OUTPOST_RECONCILE_CONCURRENCY", 1)?;
        if reconcile_concurrency == 0 {
            return Err(Error::Config("OUTPOST_RECONCILE_CONCURRENCY must be at least 1".into()));
        }

        Ok(Self {
            id,
            role,
            rate_hz,
            comm_threshold,
            sim_comms,
            solo,
            total_beacons,
            neighbors,
            my_beacons,
            listen_addr,
            peers,
            request_timeout,
            startup_grace,
            start_delay,
            reconcile_concurrency,
        })
    }

    /// Time between control cycles.
    pub fn cycle_period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.rate_hz)
    }

    /// Static roster for the record store.
    pub fn roster(&self) -> Roster {
        Roster {
            local_id: self.id.clone(),
            role: self.role,
            neighbors: self.neighbors.clone(),
            total_beacons: self.total_beacons,
            owned_beacons: self.my_beacons.clone(),
        }
    }

    /// Parameters for reachability, fusion and reconciliation.
    pub fn fusion_config(&self) -> FusionConfig {
        let mode = if self.sim_comms {
            ReachabilityMode::Simulated
        } else {
            ReachabilityMode::Timeout
        };
        FusionConfig::default()
            .with_comm_threshold(self.comm_threshold)
            .with_startup_grace(self.startup_grace)
            .with_mode(mode)
            .with_solo(self.solo)
            .with_request_timeout(self.request_timeout)
            .with_reconcile_concurrency(self.reconcile_concurrency)
    }

    /// Fragment service address of the node whose gossip address is `gossip`.
    pub fn fragment_addr(gossip: SocketAddr) -> Result<SocketAddr> {
        let port = gossip
            .port()
            .checked_add(1)
            .ok_or_else(|| Error::Config(format!("no fragment port after gossip address {gossip}")))?;
        Ok(SocketAddr::new(gossip.ip(), port))
    }

    /// Gossip addresses of every peer but this node.
    pub fn peer_addrs(&self) -> impl Iterator<Item = (&AgentId, &SocketAddr)> {
        self.peers.iter().filter(move |(id, _)| **id != self.id)
    }
}

fn parse<T>(get: &impl Fn(&str) -> Option<String>, name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    match get(name) {
        Some(raw) => raw
            .parse()
            .map_err(|e| Error::Config(format!("invalid {name} {raw:?}: {e}"))),
        None => Ok(default),
    }
}

fn parse_bool(get: &impl Fn(&str) -> Option<String>, name: &str, default: bool) -> Result<bool> {
    match get(name).map(|v| v.to_ascii_lowercase()) {
        None => Ok(default),
        Some(v) => match v.as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(Error::Config(format!("invalid {name} {v:?}: expected a boolean"))),
        },
    }
}

fn secs(value: f64, name: &str) -> Result<Duration> {
    Duration::try_from_secs_f64(value)
        .map_err(|e| Error::Config(format!("invalid {name} {value}: {e}")))
}

fn parse_ids(s: &str) -> Vec<AgentId> {
    s.split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(AgentId::from)
        .collect()
}

/// Parse `ID=host:port,ID=host:port`.
fn parse_peers(s: &str) -> Result<BTreeMap<AgentId, SocketAddr>> {
    let mut peers = BTreeMap::new();
    for entry in s.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let (id, addr) = entry
            .split_once('=')
            .ok_or_else(|| Error::Config(format!("invalid peer entry {entry:?}: expected ID=host:port")))?;
        let addr: SocketAddr = addr
            .trim()
            .parse()
            .map_err(|e| Error::Config(format!("invalid address for peer {id}: {e}")))?;
        peers.insert(AgentId::from(id.trim()), addr);
    }
    Ok(peers)
}
