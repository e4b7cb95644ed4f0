//! Outpost Node - Fleet State Fusion Runtime
//!
//! Runs one member of an intermittently connected fleet: robots, beacons and
//! the base station all run the same node with a different role.
//!
//! # Architecture
//!
//! - **Config**: `OUTPOST_*` environment variables
//! - **Transport**: JSON datagrams over UDP, one-slot channel per sender
//! - **Fragment service**: newline-delimited JSON over TCP
//! - **Node**: shared fleet state and the fixed-rate control loop
//! - **Handle**: setters and queries for sensors, planners and operators
//!
//! # Example
//!
//! ```no_run
//! use outpost_node::{NodeConfig, OutpostNode};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = NodeConfig::from_env()?;
//!     let node = OutpostNode::new(config);
//!     let handle = node.handle();
//!     handle.set_status("exploring").await;
//!     node.run().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod fragment_service;
pub mod handle;
pub mod node;
pub mod transport;

pub use config::NodeConfig;
pub use error::{Error, Result};
pub use fragment_service::{FragmentService, TcpFragmentClient};
pub use handle::NodeHandle;
pub use node::{CycleHook, CycleReport, DefaultHook, FleetState, Outbound, OutpostNode};
pub use transport::GossipSocket;
