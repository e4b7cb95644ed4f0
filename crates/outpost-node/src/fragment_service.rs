//! Map fragment service.
//!
//! Newline-delimited JSON over TCP: one [`FragmentBatch`] per line in, one
//! [`FragmentReply`] per line out. The service listens on the gossip port + 1.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;

use outpost_protocols::{reconcile, FragmentClient};
use outpost_state::{AgentId, FragmentBatch, FragmentResponse};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{watch, RwLock};
use tracing::{debug, error, info, warn};

use crate::config::NodeConfig;
use crate::error::Result;
use crate::node::FleetState;

/// Longest request line the service reads, newline included.
const MAX_REQUEST_LINE: usize = 64 * 1024;

/// Longest reply line a client reads; replies carry whole fragments.
const MAX_REPLY_LINE: usize = 64 * 1024 * 1024;

/// One line of the service's answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FragmentReply {
    Ok(FragmentResponse),
    Error { message: String },
}

/// Serves fragment requests from the shared fleet state.
pub struct FragmentService {
    listener: TcpListener,
    state: Arc<RwLock<FleetState>>,
}

impl FragmentService {
    pub async fn bind(addr: SocketAddr, state: Arc<RwLock<FleetState>>) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        info!("Fragment service (TCP) listening on {}", listener.local_addr()?);
        Ok(Self { listener, state })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until shutdown.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        debug!("Fragment connection from {}", addr);
                        let state = Arc::clone(&self.state);
                        let shutdown = shutdown.clone();
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, state, shutdown).await {
                                warn!("Fragment connection error from {}: {}", addr, e);
                            }
                        });
                    }
                    Err(e) => error!("Accept error: {}", e),
                },
                _ = shutdown.changed() => {
                    debug!("Fragment service stopping");
                    break;
                }
            }
        }
    }
}

/// Read one line of at most `max` bytes. A line cut off at `max` is an error.
async fn read_capped_line<R>(reader: &mut R, line: &mut String, max: usize) -> std::io::Result<usize>
where
    R: AsyncBufRead + Unpin,
{
    let read = reader.take(max as u64).read_line(line).await?;
    if read == max && !line.ends_with('\n') {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("line exceeds {max} bytes"),
        ));
    }
    Ok(read)
}

async fn handle_connection(
    stream: TcpStream,
    state: Arc<RwLock<FleetState>>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    loop {
        line.clear();
        tokio::select! {
            read = read_capped_line(&mut reader, &mut line, MAX_REQUEST_LINE) => {
                let reply = match read {
                    Ok(0) => return Ok(()),
                    Ok(_) => answer(&state, &line).await,
                    Err(e) if e.kind() == std::io::ErrorKind::InvalidData => {
                        // The rest of the stream cannot be framed; reply and close.
                        let reply = FragmentReply::Error {
                            message: format!("oversized request: {e}"),
                        };
                        write_reply(&mut writer, &reply).await?;
                        return Ok(());
                    }
                    Err(e) => return Err(e.into()),
                };
                write_reply(&mut writer, &reply).await?;
            }
            _ = shutdown.changed() => return Ok(()),
        }
    }
}

async fn answer(state: &RwLock<FleetState>, line: &str) -> FragmentReply {
    match serde_json::from_str::<FragmentBatch>(line) {
        Ok(batch) => {
            let response = reconcile::serve(&state.read().await.store, &batch);
            debug!(
                requested = batch.index_count(),
                supplied = response.results.iter().map(|r| r.received_indices.len()).sum::<usize>(),
                "Served fragment request"
            );
            FragmentReply::Ok(response)
        }
        Err(e) => FragmentReply::Error {
            message: format!("malformed request: {e}"),
        },
    }
}

async fn write_reply(writer: &mut (impl AsyncWrite + Unpin), reply: &FragmentReply) -> Result<()> {
    let mut bytes = serde_json::to_vec(reply)?;
    bytes.push(b'\n');
    writer.write_all(&bytes).await?;
    Ok(())
}

/// Fetches fragments from peers' fragment services over TCP.
#[derive(Debug, Clone, Default)]
pub struct TcpFragmentClient {
    peers: BTreeMap<AgentId, SocketAddr>,
}

impl TcpFragmentClient {
    /// `peers` maps ids to gossip addresses; requests go to the port after each.
    pub fn new(peers: &BTreeMap<AgentId, SocketAddr>) -> Result<Self> {
        let peers = peers
            .iter()
            .map(|(id, gossip)| Ok((id.clone(), NodeConfig::fragment_addr(*gossip)?)))
            .collect::<Result<_>>()?;
        Ok(Self { peers })
    }

    async fn exchange(addr: SocketAddr, batch: &FragmentBatch) -> std::io::Result<String> {
        let stream = TcpStream::connect(addr).await?;
        let (reader, mut writer) = stream.into_split();

        let mut bytes = serde_json::to_vec(batch)?;
        bytes.push(b'\n');
        writer.write_all(&bytes).await?;

        let mut line = String::new();
        read_capped_line(&mut BufReader::new(reader), &mut line, MAX_REPLY_LINE).await?;
        Ok(line)
    }
}

impl FragmentClient for TcpFragmentClient {
    async fn fetch_fragments(
        &self,
        peer: &AgentId,
        batch: FragmentBatch,
    ) -> outpost_protocols::Result<FragmentResponse> {
        use outpost_protocols::Error;

        let addr = *self
            .peers
            .get(peer)
            .ok_or_else(|| Error::Transport(format!("no address for {peer}")))?;
        let line = Self::exchange(addr, &batch)
            .await
            .map_err(|e| Error::Transport(format!("{addr}: {e}")))?;
        if line.is_empty() {
            return Err(Error::Transport(format!("{addr}: connection closed")));
        }

        match serde_json::from_str::<FragmentReply>(&line) {
            Ok(FragmentReply::Ok(response)) => Ok(response),
            Ok(FragmentReply::Error { message }) => Err(Error::Service(message)),
            Err(e) => Err(Error::Service(format!("malformed reply: {e}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use outpost_protocols::Error as ProtocolError;
    use outpost_state::{FragmentRequest, Timestamp};

    async fn serving(vars: &[(&str, &str)]) -> (SocketAddr, Arc<RwLock<FleetState>>, watch::Sender<bool>) {
        let vars: Vec<(String, String)> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let config = NodeConfig::from_lookup(|name| {
            vars.iter().find(|(k, _)| k == name).map(|(_, v)| v.clone())
        })
        .unwrap();
        let state = Arc::new(RwLock::new(FleetState::new(&config, Timestamp::ZERO)));
        let service = FragmentService::bind("127.0.0.1:0".parse().unwrap(), Arc::clone(&state))
            .await
            .unwrap();
        let addr = service.local_addr().unwrap();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(service.run(shutdown_rx));
        (addr, state, shutdown_tx)
    }

    fn client_for(id: &str, fragment_addr: SocketAddr) -> TcpFragmentClient {
        // The client adds one to the gossip port.
        let gossip = SocketAddr::new(fragment_addr.ip(), fragment_addr.port() - 1);
        TcpFragmentClient::new(&BTreeMap::from([(AgentId::from(id), gossip)])).unwrap()
    }

    #[tokio::test]
    async fn serves_own_fragments_over_tcp() {
        let (addr, state, _shutdown) = serving(&[("OUTPOST_ID", "H02")]).await;
        {
            let mut state = state.write().await;
            state.store.local_mut().add_fragment(vec![1]);
            state.store.local_mut().add_fragment(vec![2]);
        }

        let client = client_for("H02", addr);
        let batch = FragmentBatch {
            requests: vec![FragmentRequest {
                target_peer_id: "H02".into(),
                missing_indices: vec![1, 5],
            }],
        };
        let response = client.fetch_fragments(&"H02".into(), batch).await.unwrap();
        assert_eq!(response.results.len(), 1);
        assert_eq!(response.results[0].received_indices, vec![1]);
        assert_eq!(response.results[0].fragments[0].data, vec![2]);
    }

    #[tokio::test]
    async fn unknown_peer_is_a_transport_error() {
        let client = TcpFragmentClient::default();
        let err = client
            .fetch_fragments(&"H09".into(), FragmentBatch::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ProtocolError::Transport(_)));
    }

    #[tokio::test]
    async fn malformed_request_gets_error_reply() {
        let (addr, _state, _shutdown) = serving(&[]).await;
        let line = TcpFragmentClient::exchange_raw(addr, b"{oops}\n").await;
        let reply: FragmentReply = serde_json::from_str(&line).unwrap();
        assert!(matches!(reply, FragmentReply::Error { .. }));
    }

    #[tokio::test]
    async fn oversized_request_is_refused_and_closed() {
        let (addr, _state, _shutdown) = serving(&[]).await;
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(&vec![b'x'; MAX_REQUEST_LINE]).await.unwrap();

        let mut reader = BufReader::new(stream);
        let mut line = String::new();
        reader.read_line(&mut line).await.unwrap();
        let reply: FragmentReply = serde_json::from_str(&line).unwrap();
        assert!(matches!(reply, FragmentReply::Error { ref message } if message.contains("oversized")));

        line.clear();
        assert_eq!(reader.read_line(&mut line).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn capped_reads_stop_at_the_limit() {
        let mut short = &b"{}\nrest"[..];
        let mut line = String::new();
        assert_eq!(read_capped_line(&mut short, &mut line, 8).await.unwrap(), 3);
        assert_eq!(line, "{}\n");

        let mut long = &b"0123456789\n"[..];
        line.clear();
        let err = read_capped_line(&mut long, &mut line, 8).await.unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);
    }

    impl TcpFragmentClient {
        async fn exchange_raw(addr: SocketAddr, raw: &[u8]) -> String {
            let mut stream = TcpStream::connect(addr).await.unwrap();
            stream.write_all(raw).await.unwrap();
            let mut line = String::new();
            BufReader::new(stream).read_line(&mut line).await.unwrap();
            line
        }
    }
}
