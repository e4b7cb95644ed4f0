//! Pull-based map fragment reconciliation.
//!
//! Every cycle each peer in direct comm is asked, in one batch, for its own
//! missing fragments and for every other peer's missing fragments (it may
//! hold copies). Results are applied by target id and only the indices the
//! responder lists as received leave the missing set; the rest are asked
//! for again next cycle.
//!
//! Planning and applying are synchronous and touch the store; fetching is
//! async and does not, so callers never hold the store across a request.

use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use outpost_state::{
    AgentId, FragmentBatch, FragmentRequest, FragmentResponse, FragmentResult, PeerRecordStore,
};
use tracing::{debug, warn};

use crate::config::FusionConfig;
use crate::error::{Error, Result};

/// Something that can ask a peer's fragment service for fragments.
pub trait FragmentClient: Send + Sync {
    fn fetch_fragments(
        &self,
        peer: &AgentId,
        batch: FragmentBatch,
    ) -> impl Future<Output = Result<FragmentResponse>> + Send;
}

/// One batched request to one peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileJob {
    pub peer: AgentId,
    pub batch: FragmentBatch,
}

/// Requests for this cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcilePlan {
    pub jobs: Vec<ReconcileJob>,
    /// Peers in direct comm with nothing to ask for.
    pub skipped: Vec<AgentId>,
}

/// How one peer's reconciliation went.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Every requested index arrived.
    Complete,
    /// Some requested indices are still missing, per target.
    Partial { still_missing: BTreeMap<AgentId, Vec<u32>> },
    /// Nothing to request.
    Skipped,
    /// The request failed; the store was not touched.
    Failed { error: String },
}

/// Build one batch per peer in direct comm.
pub fn plan(store: &PeerRecordStore) -> ReconcilePlan {
    let missing: Vec<(AgentId, Vec<u32>)> = store
        .peers()
        .filter(|peer| !peer.state.missing_fragments().is_empty())
        .map(|peer| {
            (
                peer.id.clone(),
                peer.state.missing_fragments().iter().copied().collect(),
            )
        })
        .collect();

    let mut plan = ReconcilePlan::default();
    for peer in store.peers().filter(|peer| peer.in_direct_comm) {
        // The peer's own gaps go first.
        let requests: Vec<FragmentRequest> = missing
            .iter()
            .filter(|(target, _)| *target == peer.id)
            .chain(missing.iter().filter(|(target, _)| *target != peer.id))
            .map(|(target, indices)| FragmentRequest {
                target_peer_id: target.clone(),
                missing_indices: indices.clone(),
            })
            .collect();

        if requests.is_empty() {
            plan.skipped.push(peer.id.clone());
        } else {
            plan.jobs.push(ReconcileJob {
                peer: peer.id.clone(),
                batch: FragmentBatch { requests },
            });
        }
    }
    plan
}

/// Store the fragments a peer returned. Targets are looked up by id now,
/// whatever the store looked like when the job was planned.
pub fn apply(
    store: &mut PeerRecordStore,
    job: &ReconcileJob,
    response: FragmentResponse,
) -> ReconcileOutcome {
    for result in response.results {
        let FragmentResult {
            peer_id,
            fragments,
            received_indices,
        } = result;
        let Some(target) = store.peer_mut(&peer_id) else {
            debug!(from = %job.peer, target = %peer_id, "Fragments for unknown peer dropped");
            continue;
        };

        let mut stored = 0usize;
        for fragment in fragments {
            if target.fragments.insert(fragment) {
                stored += 1;
            }
        }
        let confirmed = target.state.confirm_fragments(&received_indices);
        debug!(
            from = %job.peer,
            target = %peer_id,
            stored,
            confirmed,
            "Applied fragments"
        );
    }

    let mut still_missing = BTreeMap::new();
    for request in &job.batch.requests {
        let Some(target) = store.peer(&request.target_peer_id) else {
            continue;
        };
        let pending: Vec<u32> = request
            .missing_indices
            .iter()
            .copied()
            .filter(|index| target.state.missing_fragments().contains(index))
            .collect();
        if !pending.is_empty() {
            still_missing.insert(request.target_peer_id.clone(), pending);
        }
    }

    if still_missing.is_empty() {
        ReconcileOutcome::Complete
    } else {
        ReconcileOutcome::Partial { still_missing }
    }
}

/// Record a failed request. The store is left untouched for a retry next cycle.
pub fn fail(job: &ReconcileJob, error: &Error) -> ReconcileOutcome {
    let requested: Vec<(&AgentId, &[u32])> = job
        .batch
        .requests
        .iter()
        .map(|r| (&r.target_peer_id, r.missing_indices.as_slice()))
        .collect();
    warn!(peer = %job.peer, ?requested, %error, "Fragment request failed");
    ReconcileOutcome::Failed {
        error: error.to_string(),
    }
}

/// Answer a fragment request from the fragments held locally: the node's
/// own map and the copies it holds of other peers' maps.
pub fn serve(store: &PeerRecordStore, batch: &FragmentBatch) -> FragmentResponse {
    let mut results = Vec::new();
    for request in &batch.requests {
        let fragments = if &request.target_peer_id == store.local_id() {
            &store.local().fragments
        } else if let Some(peer) = store.peer(&request.target_peer_id) {
            &peer.fragments
        } else {
            continue;
        };

        let (found, supplied) = fragments.select(&request.missing_indices);
        if !supplied.is_empty() {
            results.push(FragmentResult {
                peer_id: request.target_peer_id.clone(),
                fragments: found,
                received_indices: supplied,
            });
        }
    }
    FragmentResponse { results }
}

/// Issues fragment requests with a deadline through a bounded pool.
#[derive(Debug, Clone)]
pub struct DiffReconciler<C> {
    client: C,
    timeout: Duration,
    concurrency: usize,
}

impl<C: FragmentClient> DiffReconciler<C> {
    pub fn new(client: C, config: &FusionConfig) -> Self {
        Self {
            client,
            timeout: config.request_timeout,
            concurrency: config.reconcile_concurrency.max(1),
        }
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    /// One request, bounded by the configured timeout.
    pub async fn request(&self, job: &ReconcileJob) -> Result<FragmentResponse> {
        tokio::time::timeout(
            self.timeout,
            self.client.fetch_fragments(&job.peer, job.batch.clone()),
        )
        .await
        .map_err(|_| Error::Timeout(self.timeout))?
    }

    /// Run every job, at most `concurrency` at a time. Results come back in
    /// completion order.
    pub async fn fetch_all(
        &self,
        jobs: Vec<ReconcileJob>,
    ) -> Vec<(ReconcileJob, Result<FragmentResponse>)> {
        stream::iter(jobs)
            .map(|job| async move {
                let result = self.request(&job).await;
                (job, result)
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await
    }

    /// Plan, fetch and apply against a store owned by the caller.
    pub async fn reconcile(&self, store: &mut PeerRecordStore) -> Vec<(AgentId, ReconcileOutcome)> {
        let plan = plan(store);
        let mut outcomes: Vec<(AgentId, ReconcileOutcome)> = plan
            .skipped
            .into_iter()
            .map(|peer| (peer, ReconcileOutcome::Skipped))
            .collect();

        for (job, result) in self.fetch_all(plan.jobs).await {
            let outcome = match result {
                Ok(response) => apply(store, &job, response),
                Err(error) => fail(&job, &error),
            };
            outcomes.push((job.peer, outcome));
        }
        outcomes
    }
}
