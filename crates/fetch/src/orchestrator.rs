//! Fetch orchestration: cache-first range reads with single-flight
//! miss handling, candidate fallthrough and background prefetch.

use crate::error::{FetchError, Result};
use crate::metrics::{
    PREFETCH_DROPPED, PREFETCH_EXECUTED, UPSTREAM_FAILURES, UPSTREAM_FETCHES,
    UPSTREAM_FETCH_LATENCY,
};
use crate::source::{RangeSource, SourceError};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use peercache_route::PeerSelector;
use peercache_store::BlockStore;
use peercache_types::{covering_blocks, BlobKey, BlockKey, BLOCK_SIZE};
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, Weak};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::time::timeout;
use tracing::{debug, warn};

/// Read interface exposed to the serving endpoint.
#[async_trait]
pub trait BlobReader: Send + Sync {
    async fn read_range(&self, blob: &BlobKey, offset: u64, length: u64) -> Result<Bytes>;
}

/// Fetch orchestrator configuration
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// Budget for each individual candidate attempt
    pub attempt_timeout: Duration,
    /// Fixed prefetch worker-pool size
    pub prefetch_workers: usize,
    /// Bounded prefetch queue capacity; producers drop on full
    pub prefetch_queue: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            attempt_timeout: Duration::from_secs(10),
            prefetch_workers: 64,
            prefetch_queue: 1024,
        }
    }
}

struct PrefetchTask {
    blob: BlobKey,
    index: u64,
}

/// Shared in-flight slot: the fetch for one missing block runs on its
/// own task and publishes here; every concurrent caller awaits the
/// same slot and observes the identical outcome.
type FlightSlot = watch::Receiver<Option<Result<Bytes>>>;

/// Serves range reads, consulting the store first and falling back
/// through the selector's candidates.
pub struct FetchOrchestrator {
    store: Arc<BlockStore>,
    selector: PeerSelector,
    source: Arc<dyn RangeSource>,
    attempt_timeout: Duration,
    inflight: StdMutex<HashMap<BlockKey, FlightSlot>>,
    prefetch_tx: mpsc::Sender<PrefetchTask>,
    weak_self: Weak<Self>,
}

impl FetchOrchestrator {
    /// Wire up the orchestrator and spawn its prefetch worker pool.
    ///
    /// Workers live for the process lifetime; on shutdown pending
    /// prefetch tasks are discarded with the runtime.
    pub fn new(
        store: Arc<BlockStore>,
        selector: PeerSelector,
        source: Arc<dyn RangeSource>,
        config: FetchConfig,
    ) -> Arc<Self> {
        let (prefetch_tx, prefetch_rx) = mpsc::channel(config.prefetch_queue.max(1));

        let orchestrator = Arc::new_cyclic(|weak_self| Self {
            store,
            selector,
            source,
            attempt_timeout: config.attempt_timeout,
            inflight: StdMutex::new(HashMap::new()),
            prefetch_tx,
            weak_self: weak_self.clone(),
        });

        let prefetch_rx = Arc::new(Mutex::new(prefetch_rx));
        for worker in 0..config.prefetch_workers {
            let orchestrator = Arc::clone(&orchestrator);
            let prefetch_rx = Arc::clone(&prefetch_rx);
            tokio::spawn(async move {
                loop {
                    let task = { prefetch_rx.lock().await.recv().await };
                    let Some(task) = task else {
                        break;
                    };
                    PREFETCH_EXECUTED.inc();
                    match orchestrator.fetch_block(&task.blob, task.index).await {
                        Ok(_) => debug!(blob = %task.blob, index = task.index, "prefetched block"),
                        Err(e) => {
                            debug!(blob = %task.blob, index = task.index, error = %e, "prefetch failed")
                        }
                    }
                }
                debug!(worker, "prefetch worker stopped");
            });
        }

        orchestrator
    }

    /// Serve one byte range, assembling it from the covering blocks.
    ///
    /// After a completed read the next contiguous block is scheduled
    /// for prefetch, best-effort, unless the read already reached the
    /// blob's tail.
    pub async fn read_range(&self, blob: &BlobKey, offset: u64, length: u64) -> Result<Bytes> {
        if length == 0 {
            return Ok(Bytes::new());
        }

        let blocks = covering_blocks(offset, length);
        let last_index = *blocks.end();
        let mut assembled = BytesMut::with_capacity(length.min(8 * BLOCK_SIZE) as usize);
        let mut saw_tail = false;

        for index in blocks {
            let block = match self.fetch_block(blob, index).await {
                Ok(block) => block,
                // The blob simply ends inside the requested window.
                Err(FetchError::NotFound) if !assembled.is_empty() => {
                    saw_tail = true;
                    break;
                }
                Err(e) => return Err(e),
            };

            let block_start = index * BLOCK_SIZE;
            let lo = offset.saturating_sub(block_start).min(block.len() as u64) as usize;
            let hi = offset
                .saturating_add(length)
                .saturating_sub(block_start)
                .min(block.len() as u64) as usize;
            if lo < hi {
                assembled.extend_from_slice(&block[lo..hi]);
            }

            if (block.len() as u64) < BLOCK_SIZE {
                saw_tail = true;
                break;
            }
        }

        if assembled.is_empty() {
            return Err(FetchError::NotFound);
        }

        if !saw_tail {
            self.schedule_prefetch(blob, last_index + 1);
        }

        Ok(assembled.freeze())
    }

    /// Fetch one block: cache hit, or join/create the in-flight slot
    /// for it. The upstream fetch runs on its own task, so a caller
    /// that disconnects mid-fetch never aborts work other callers are
    /// waiting on.
    pub async fn fetch_block(&self, blob: &BlobKey, index: u64) -> Result<Bytes> {
        let key = BlockKey::new(blob.digest(), index);

        if let Some(block) = self.store.get(&key).await {
            return Ok(block);
        }

        let mut slot = {
            let mut inflight = self.inflight.lock().expect("inflight lock poisoned");
            match inflight.get(&key) {
                Some(slot) => slot.clone(),
                None => {
                    let (tx, rx) = watch::channel(None);
                    inflight.insert(key.clone(), rx.clone());
                    self.spawn_flight(blob.clone(), key.clone(), tx);
                    rx
                }
            }
        };

        let outcome = match slot.wait_for(Option::is_some).await {
            Ok(outcome) => (*outcome)
                .clone()
                .unwrap_or_else(|| Err(FetchError::Internal("empty in-flight slot".to_string()))),
            Err(_) => Err(FetchError::Internal(
                "in-flight fetch abandoned".to_string(),
            )),
        };
        outcome
    }

    /// Run the candidate walk for one missing block on a detached task
    /// and publish the outcome to every waiter of the slot.
    fn spawn_flight(
        &self,
        blob: BlobKey,
        key: BlockKey,
        tx: watch::Sender<Option<Result<Bytes>>>,
    ) {
        // Dropping `tx` unresolved surfaces as Internal to the waiters;
        // only reachable while the orchestrator is being torn down.
        let Some(this) = self.weak_self.upgrade() else {
            return;
        };
        tokio::spawn(async move {
            let result = this.fetch_from_candidates(&blob, &key).await;
            // Retire the slot before publishing so failures are never
            // joinable once observable; a later miss refetches.
            {
                let mut inflight = this.inflight.lock().expect("inflight lock poisoned");
                inflight.remove(&key);
            }
            let _ = tx.send(Some(result));
        });
    }

    /// Walk the candidate list with a bounded per-attempt timeout.
    /// First success is admitted to the store; an authoritative
    /// not-found short-circuits; anything else falls through.
    async fn fetch_from_candidates(&self, blob: &BlobKey, key: &BlockKey) -> Result<Bytes> {
        let offset = key.block_offset();
        let mut last_error = String::from("no candidates");

        for candidate in self.selector.pick(blob) {
            let started = Instant::now();
            let attempt = self
                .source
                .fetch_range(&candidate, blob, offset, BLOCK_SIZE);

            match timeout(self.attempt_timeout, attempt).await {
                Ok(Ok(block)) => {
                    UPSTREAM_FETCHES.inc();
                    UPSTREAM_FETCH_LATENCY.observe(started.elapsed().as_secs_f64());
                    debug!(
                        key = %key,
                        candidate = %candidate,
                        bytes = block.len(),
                        "fetched block"
                    );
                    // Admission failures degrade: the caller still gets
                    // its bytes, the block is just not cached.
                    if let Err(e) = self.store.put(key.clone(), block.clone()).await {
                        warn!(key = %key, error = %e, "failed to cache fetched block");
                    }
                    return Ok(block);
                }
                Ok(Err(SourceError::NotFound)) => {
                    debug!(key = %key, candidate = %candidate, "block not found upstream");
                    return Err(FetchError::NotFound);
                }
                Ok(Err(e)) => {
                    UPSTREAM_FAILURES.inc();
                    warn!(key = %key, candidate = %candidate, error = %e, "candidate attempt failed");
                    last_error = e.to_string();
                }
                Err(_) => {
                    UPSTREAM_FAILURES.inc();
                    warn!(key = %key, candidate = %candidate, "candidate attempt timed out");
                    last_error = SourceError::Timeout.to_string();
                }
            }
        }

        Err(FetchError::ExhaustedSources { last_error })
    }

    /// Non-blocking producer side of the prefetch queue; a full queue
    /// drops the task rather than backpressuring the read path.
    fn schedule_prefetch(&self, blob: &BlobKey, index: u64) {
        let task = PrefetchTask {
            blob: blob.clone(),
            index,
        };
        match self.prefetch_tx.try_send(task) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                PREFETCH_DROPPED.inc();
                debug!(blob = %blob, index, "prefetch queue full, task dropped");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }
}

#[async_trait]
impl BlobReader for FetchOrchestrator {
    async fn read_range(&self, blob: &BlobKey, offset: u64, length: u64) -> Result<Bytes> {
        FetchOrchestrator::read_range(self, blob, offset, length).await
    }
}
