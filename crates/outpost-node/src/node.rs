//! Outpost Node - the fleet node runtime.
//!
//! Architecture:
//! - One shared [`FleetState`] behind an `Arc<RwLock<_>>`
//! - UDP gossip receiver with one-slot channels per sender
//! - TCP fragment service on the gossip port + 1
//! - Fixed-rate control loop: reachability, beacons, map reconciliation,
//!   artifact dedup, role hook, publication

use std::sync::Arc;

use outpost_protocols::{
    artifacts, beacons, build_agent_state, reconcile, AdmissionGate, DiffReconciler,
    FusionOutcome, GossipFusion, NeighborMaps, ReachabilityEngine, ReachabilityMode,
    ReconcileJob, ReconcileOutcome,
};
use outpost_state::{
    AgentId, AgentState, BeaconState, Clock, FragmentResponse, LinkReport, LinkVector,
    PeerRecordStore, Position, Role, SystemClock, Timestamp, WireMessage,
};
use tokio::sync::{watch, RwLock};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace, warn};

use crate::config::NodeConfig;
use crate::error::Result;
use crate::fragment_service::{FragmentService, TcpFragmentClient};
use crate::handle::NodeHandle;
use crate::transport::{ChannelKey, GossipSocket, Inbound};

/// Everything a node knows, shared by the control loop, the gossip
/// handlers and the fragment service.
#[derive(Debug)]
pub struct FleetState {
    pub store: PeerRecordStore,
    pub reachability: ReachabilityEngine,
    pub fusion: GossipFusion,
    pending_beacon_state: Option<BeaconState>,
}

/// What one control cycle produced before publication.
#[derive(Debug, Clone, Default)]
pub struct CycleReport {
    pub reconciled: Vec<(AgentId, ReconcileOutcome)>,
    pub new_artifacts: Vec<(AgentId, String)>,
}

/// Messages to send at the end of a cycle.
#[derive(Debug, Clone)]
pub struct Outbound {
    pub agent_state: AgentState,
    /// Own link vector, simulated comms only.
    pub link_vector: Option<LinkVector>,
    /// Queued after a local beacon deployment.
    pub beacon_state: Option<BeaconState>,
    pub neighbor_maps: NeighborMaps,
}

impl FleetState {
    pub fn new(config: &NodeConfig, now: Timestamp) -> Self {
        let fusion_config = config.fusion_config();
        Self {
            store: PeerRecordStore::new(&config.roster(), now),
            reachability: ReachabilityEngine::new(config.id.clone(), config.role, &fusion_config),
            fusion: GossipFusion::new(config.id.clone(), config.role, &fusion_config, now),
            pending_beacon_state: None,
        }
    }

    /// Replace the admission gate consulted before fusing.
    #[must_use]
    pub fn with_gate(mut self, gate: impl AdmissionGate + 'static) -> Self {
        self.fusion = self.fusion.with_gate(gate);
        self
    }

    /// Route one inbound message to its handler.
    pub fn handle_message(&mut self, message: &WireMessage, received_at: Timestamp) -> Option<FusionOutcome> {
        match message {
            WireMessage::AgentState(state) => {
                let outcome = self.fusion.fuse(&mut self.store, state, received_at);
                trace!(sender = %state.id, ?outcome, "Agent state handled");
                Some(outcome)
            }
            WireMessage::LinkVector(vector) => {
                self.reachability.record_link_vector(vector);
                None
            }
            WireMessage::BeaconState(state) => {
                let activated = beacons::apply_beacon_state(&mut self.store, state);
                if !activated.is_empty() {
                    debug!(?activated, "Beacon state applied");
                }
                None
            }
        }
    }

    /// Record this node's own link observations (simulated comms).
    pub fn report_links(&mut self, links: Vec<LinkReport>) {
        let vector = LinkVector {
            reporter_id: self.store.local_id().clone(),
            links,
        };
        self.reachability.record_link_vector(&vector);
    }

    /// Deploy a locally carried beacon and queue a beacon state broadcast.
    pub fn deploy_beacon(&mut self, id: &AgentId, position: Position) -> outpost_protocols::Result<bool> {
        let deployed = beacons::deploy(&mut self.store, id, position)?;
        if deployed {
            self.pending_beacon_state = Some(BeaconState {
                beacons: beacons::active_beacons(&self.store),
            });
        }
        Ok(deployed)
    }

    /// First half of a cycle: reachability and beacons, then the fragment
    /// requests to issue once the lock is released.
    pub fn begin_cycle(&mut self, now: Timestamp) -> Vec<ReconcileJob> {
        let report = self.reachability.update(&mut self.store, now);
        trace!(in_direct_comm = ?report.in_direct_comm, "Reachability updated");

        let role = self.store.local().role;
        let activated = beacons::reconcile(&mut self.store, role);
        if !activated.is_empty() {
            debug!(?activated, "Beacons activated from neighbor reports");
        }

        let plan = reconcile::plan(&self.store);
        if !plan.skipped.is_empty() {
            trace!(skipped = ?plan.skipped, "Nothing to request");
        }
        plan.jobs
    }

    /// Second half of a cycle: store fetched fragments and scan detections.
    pub fn finish_cycle(
        &mut self,
        results: Vec<(ReconcileJob, outpost_protocols::Result<FragmentResponse>)>,
        now: Timestamp,
    ) -> CycleReport {
        let reconciled = results
            .into_iter()
            .map(|(job, result)| {
                let outcome = match result {
                    Ok(response) => reconcile::apply(&mut self.store, &job, response),
                    Err(error) => reconcile::fail(&job, &error),
                };
                (job.peer, outcome)
            })
            .collect();

        let scan = artifacts::scan(&mut self.store, now);
        CycleReport {
            reconciled,
            new_artifacts: scan.new_artifacts,
        }
    }

    /// Build this cycle's outbound messages.
    pub fn outbound(&mut self, now: Timestamp) -> Outbound {
        let link_vector = match self.reachability.mode() {
            ReachabilityMode::Simulated => self.reachability.own_links().map(|links| LinkVector {
                reporter_id: self.store.local_id().clone(),
                links: links
                    .iter()
                    .map(|(peer_id, reachable)| LinkReport {
                        peer_id: peer_id.clone(),
                        reachable: *reachable,
                    })
                    .collect(),
            }),
            ReachabilityMode::Timeout => None,
        };

        Outbound {
            agent_state: build_agent_state(&self.store, now),
            link_vector,
            beacon_state: self.pending_beacon_state.take(),
            neighbor_maps: NeighborMaps::collect(&self.store),
        }
    }
}

/// Role-specific step run after reconciliation each cycle.
pub trait CycleHook: Send + Sync {
    /// Returning false skips publication for this cycle.
    fn on_cycle(&self, state: &mut FleetState, now: Timestamp) -> bool {
        let _ = now;
        publishes(&state.store)
    }
}

/// Hook used when none is supplied.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultHook;

impl CycleHook for DefaultHook {}

/// A beacon stays silent until it has been deployed.
pub fn publishes(store: &PeerRecordStore) -> bool {
    let local = store.local();
    if local.role != Role::Beacon {
        return true;
    }
    store.beacon(&local.id).map_or(true, |beacon| beacon.is_active())
}

/// An Outpost node instance.
pub struct OutpostNode {
    config: NodeConfig,
    clock: Arc<dyn Clock>,
    state: Arc<RwLock<FleetState>>,
    hook: Arc<dyn CycleHook>,
    shutdown: Arc<watch::Sender<bool>>,
    neighbor_maps: watch::Sender<NeighborMaps>,
}

impl OutpostNode {
    /// Create a node on the system clock.
    pub fn new(config: NodeConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: NodeConfig, clock: Arc<dyn Clock>) -> Self {
        let state = FleetState::new(&config, clock.now());
        Self::with_state(config, clock, state)
    }

    /// Create a node around a prepared state, e.g. one with a custom gate.
    pub fn with_state(config: NodeConfig, clock: Arc<dyn Clock>, state: FleetState) -> Self {
        let (shutdown, _) = watch::channel(false);
        let (neighbor_maps, _) = watch::channel(NeighborMaps::default());
        Self {
            config,
            clock,
            state: Arc::new(RwLock::new(state)),
            hook: Arc::new(DefaultHook),
            shutdown: Arc::new(shutdown),
            neighbor_maps,
        }
    }

    #[must_use]
    pub fn with_hook(mut self, hook: impl CycleHook + 'static) -> Self {
        self.hook = Arc::new(hook);
        self
    }

    /// Handle for the node's collaborators.
    pub fn handle(&self) -> NodeHandle {
        NodeHandle::new(
            Arc::clone(&self.state),
            Arc::clone(&self.shutdown),
            self.neighbor_maps.subscribe(),
        )
    }

    /// Run the node until shutdown or Ctrl-C.
    pub async fn run(self) -> Result<()> {
        info!("Outpost node starting");
        info!("  ID: {} ({})", self.config.id, self.config.role);
        info!("  Gossip: {}", self.config.listen_addr);
        info!("  Peers: {}", self.config.peer_addrs().count());
        info!(
            "  Reachability: {}",
            if self.config.sim_comms { "simulated" } else { "timeout" }
        );

        let socket = GossipSocket::bind(self.config.listen_addr).await?;
        let fragment_addr = NodeConfig::fragment_addr(socket.local_addr()?)?;
        let service = FragmentService::bind(fragment_addr, Arc::clone(&self.state)).await?;
        tokio::spawn(service.run(self.shutdown.subscribe()));

        let mut shutdown = self.shutdown.subscribe();
        if !self.config.start_delay.is_zero() {
            info!("Waiting {:?} before listening", self.config.start_delay);
            tokio::select! {
                _ = tokio::time::sleep(self.config.start_delay) => {}
                _ = shutdown.changed() => return Ok(()),
            }
        }
        self.state.write().await.fusion.set_listening(true);

        self.spawn_receiver(socket.clone());

        let reconciler = DiffReconciler::new(
            TcpFragmentClient::new(&self.config.peers)?,
            &self.config.fusion_config(),
        );
        let mut interval = tokio::time::interval(self.config.cycle_period());
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.cycle(&socket, &reconciler).await {
                        warn!("Control cycle error: {}", e);
                    }
                }
                _ = shutdown.changed() => {
                    info!("Shutdown requested");
                    break;
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("Ctrl-C received, shutting down");
                    self.shutdown.send_replace(true);
                    break;
                }
            }
        }

        Ok(())
    }

    fn spawn_receiver(&self, socket: GossipSocket) {
        let state = Arc::clone(&self.state);
        let clock = Arc::clone(&self.clock);
        let shutdown = self.shutdown.subscribe();
        let known = self.config.roster().known_ids();
        tokio::spawn(async move {
            let handler_shutdown = shutdown.clone();
            socket
                .run_receiver(clock, known, shutdown, move |key, rx| {
                    tokio::spawn(handle_channel(
                        key,
                        rx,
                        Arc::clone(&state),
                        handler_shutdown.clone(),
                    ));
                })
                .await;
        });
    }

    async fn cycle(
        &self,
        socket: &GossipSocket,
        reconciler: &DiffReconciler<TcpFragmentClient>,
    ) -> Result<()> {
        let jobs = self.state.write().await.begin_cycle(self.clock.now());

        // No lock is held while requests are in flight.
        let results = reconciler.fetch_all(jobs).await;

        let now = self.clock.now();
        let outbound = {
            let mut state = self.state.write().await;
            let report = state.finish_cycle(results, now);
            for (peer, outcome) in &report.reconciled {
                trace!(%peer, ?outcome, "Reconciled");
            }
            if self.hook.on_cycle(&mut state, now) {
                Some(state.outbound(now))
            } else {
                trace!("Publication suppressed this cycle");
                None
            }
        };
        let Some(outbound) = outbound else {
            return Ok(());
        };

        let peers: Vec<_> = self.config.peer_addrs().map(|(_, addr)| *addr).collect();
        socket
            .broadcast(&peers, &WireMessage::AgentState(outbound.agent_state))
            .await?;
        if let Some(vector) = outbound.link_vector {
            socket.broadcast(&peers, &WireMessage::LinkVector(vector)).await?;
        }
        if let Some(beacon_state) = outbound.beacon_state {
            info!(beacons = beacon_state.beacons.len(), "Broadcasting beacon state");
            socket
                .broadcast(&peers, &WireMessage::BeaconState(beacon_state))
                .await?;
        }
        self.neighbor_maps.send_replace(outbound.neighbor_maps);
        Ok(())
    }
}

/// Drain one sender's slot: always the latest message, one fusion per lock.
async fn handle_channel(
    key: ChannelKey,
    mut rx: watch::Receiver<Option<Inbound>>,
    state: Arc<RwLock<FleetState>>,
    mut shutdown: watch::Receiver<bool>,
) {
    debug!(?key, "Gossip channel opened");
    loop {
        let inbound = rx.borrow_and_update().clone();
        if let Some(inbound) = inbound {
            state
                .write()
                .await
                .handle_message(&inbound.message, inbound.received_at);
        }

        tokio::select! {
            changed = rx.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = shutdown.changed() => break,
        }
    }
    debug!(?key, "Gossip channel closed");
}
