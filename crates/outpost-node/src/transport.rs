//! UDP gossip transport.
//!
//! Every gossip message is one JSON datagram. Inbound messages are sorted
//! into one-slot channels, one per sender and message kind: a handler that
//! falls behind only ever sees the newest message from each sender. Senders
//! outside the roster get no channel, so the channel count is bounded.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::Arc;

use outpost_state::{AgentId, Clock, Timestamp, WireMessage};
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tracing::{debug, info, trace, warn};

use crate::error::Result;

/// Largest datagram accepted.
const MAX_DATAGRAM: usize = 65_507;

/// Socket buffer size in both directions.
const SOCKET_BUFFER: usize = 4 * 1024 * 1024;

/// A decoded message and its local arrival time.
#[derive(Debug, Clone)]
pub struct Inbound {
    pub received_at: Timestamp,
    pub message: WireMessage,
}

/// Which one-slot channel a message lands in.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ChannelKey {
    AgentState(AgentId),
    LinkVector(AgentId),
    /// Beacon states replace each other whoever sends them.
    BeaconState,
}

impl ChannelKey {
    /// `None` for a sender that is not in `known`.
    fn of(message: &WireMessage, known: &HashSet<AgentId>) -> Option<Self> {
        let key = match message {
            WireMessage::AgentState(state) => Self::AgentState(state.id.clone()),
            WireMessage::LinkVector(vector) => Self::LinkVector(vector.reporter_id.clone()),
            WireMessage::BeaconState(_) => return Some(Self::BeaconState),
        };
        match &key {
            Self::AgentState(id) | Self::LinkVector(id) if !known.contains(id) => None,
            _ => Some(key),
        }
    }
}

/// Gossip socket shared by the receive loop and the control loop.
#[derive(Debug, Clone)]
pub struct GossipSocket {
    socket: Arc<UdpSocket>,
}

impl GossipSocket {
    /// Bind with enlarged buffers.
    pub async fn bind(addr: SocketAddr) -> Result<Self> {
        let domain = if addr.is_ipv4() {
            Domain::IPV4
        } else {
            Domain::IPV6
        };
        let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_send_buffer_size(SOCKET_BUFFER)?;
        socket.set_recv_buffer_size(SOCKET_BUFFER)?;
        socket.set_reuse_address(true)?;
        socket.bind(&addr.into())?;
        socket.set_nonblocking(true)?;

        let std_socket: std::net::UdpSocket = socket.into();
        let socket = UdpSocket::from_std(std_socket)?;
        info!("Gossip (UDP) listening on {}", socket.local_addr()?);

        Ok(Self {
            socket: Arc::new(socket),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Send one message.
    pub async fn send(&self, addr: SocketAddr, message: &WireMessage) -> Result<()> {
        let bytes = serde_json::to_vec(message)?;
        self.socket.send_to(&bytes, addr).await?;
        Ok(())
    }

    /// Send to every address, logging failures instead of stopping.
    pub async fn broadcast<'a>(
        &self,
        addrs: impl IntoIterator<Item = &'a SocketAddr>,
        message: &WireMessage,
    ) -> Result<usize> {
        let bytes = serde_json::to_vec(message)?;
        let mut sent = 0;
        for addr in addrs {
            match self.socket.send_to(&bytes, addr).await {
                Ok(_) => sent += 1,
                Err(e) => warn!("Gossip send to {} failed: {}", addr, e),
            }
        }
        Ok(sent)
    }

    /// Receive and decode one message. Undecodable datagrams are skipped.
    pub async fn recv(&self, buf: &mut [u8]) -> Result<(WireMessage, SocketAddr)> {
        loop {
            let (len, from) = self.socket.recv_from(buf).await?;
            match serde_json::from_slice::<WireMessage>(&buf[..len]) {
                Ok(message) => return Ok((message, from)),
                Err(e) => debug!("Dropping malformed datagram from {}: {}", from, e),
            }
        }
    }

    /// Receive until shutdown, routing every message to its one-slot channel.
    ///
    /// Messages from ids outside `known` are dropped. `spawn_handler` is
    /// called once per new channel with its receiving end.
    pub async fn run_receiver<F>(
        &self,
        clock: Arc<dyn Clock>,
        known: impl IntoIterator<Item = AgentId>,
        mut shutdown: watch::Receiver<bool>,
        mut spawn_handler: F,
    ) where
        F: FnMut(ChannelKey, watch::Receiver<Option<Inbound>>),
    {
        let known: HashSet<AgentId> = known.into_iter().collect();
        let mut slots: HashMap<ChannelKey, watch::Sender<Option<Inbound>>> = HashMap::new();
        let mut buf = vec![0u8; MAX_DATAGRAM];

        loop {
            tokio::select! {
                received = self.recv(&mut buf) => {
                    let (message, from) = match received {
                        Ok(received) => received,
                        Err(e) => {
                            warn!("Gossip receive error: {}", e);
                            continue;
                        }
                    };
                    let Some(key) = ChannelKey::of(&message, &known) else {
                        debug!("Dropping gossip from unknown sender at {}", from);
                        continue;
                    };
                    trace!(?key, "Gossip message received");
                    let inbound = Inbound {
                        received_at: clock.now(),
                        message,
                    };

                    if let Some(slot) = slots.get(&key) {
                        slot.send_replace(Some(inbound));
                    } else {
                        let (tx, rx) = watch::channel(Some(inbound));
                        spawn_handler(key.clone(), rx);
                        slots.insert(key, tx);
                    }
                }
                _ = shutdown.changed() => {
                    debug!("Gossip receiver stopping");
                    break;
                }
            }
        }
    }
}
