//! Delivery report queues and the dispatcher that drains them.
//!
//! One bounded queue per protocol version. The submit handler enqueues a
//! report per destination; a pool of workers resolves the owning session
//! through the correlation cache and hands the report to the transport.
//! Reports are dequeued in enqueue order within a version.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;

use cmppsim_core::wire::{DeliverReq, ProtocolVersion};

use crate::cache::CorrelationCache;
use crate::context::ServerContext;
use crate::stats::{events, StatsCollector};
use crate::transport::DeliverTransport;

/// How an enqueue behaves when the queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueuePolicy {
    /// Wait for space.
    Block,
    /// Wait at most this long, then fail with [`EnqueueError::Overloaded`].
    Timeout(Duration),
}

impl EnqueuePolicy {
    /// `None` means block.
    pub fn from_timeout(timeout: Option<Duration>) -> Self {
        timeout.map_or(Self::Block, Self::Timeout)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EnqueueError {
    #[error("CMPP {version} delivery queue still full after {waited:?}")]
    Overloaded {
        version: ProtocolVersion,
        waited: Duration,
    },
    #[error("CMPP {version} delivery queue is closed")]
    Closed { version: ProtocolVersion },
}

/// A delivery report waiting for a worker.
///
/// `remaining` is shared by every report of one accepted submit. The worker
/// that takes it to zero deletes the submit's correlation entry.
#[derive(Debug)]
pub struct QueuedReport {
    pub report: DeliverReq,
    pub remaining: Arc<AtomicUsize>,
}

/// Sending half of both queues.
#[derive(Clone)]
pub struct DeliveryQueues {
    v2: mpsc::Sender<QueuedReport>,
    v3: mpsc::Sender<QueuedReport>,
    policy: EnqueuePolicy,
}

/// Receiving half of both queues, consumed by [`DeliveryReportDispatcher`].
pub struct DeliveryReceivers {
    v2: mpsc::Receiver<QueuedReport>,
    v3: mpsc::Receiver<QueuedReport>,
}

pub fn delivery_queues(
    capacity: usize,
    policy: EnqueuePolicy,
) -> (DeliveryQueues, DeliveryReceivers) {
    let (v2_tx, v2_rx) = mpsc::channel(capacity);
    let (v3_tx, v3_rx) = mpsc::channel(capacity);
    (
        DeliveryQueues {
            v2: v2_tx,
            v3: v3_tx,
            policy,
        },
        DeliveryReceivers {
            v2: v2_rx,
            v3: v3_rx,
        },
    )
}

impl DeliveryQueues {
    fn sender(&self, version: ProtocolVersion) -> &mpsc::Sender<QueuedReport> {
        match version {
            ProtocolVersion::V20 => &self.v2,
            ProtocolVersion::V30 => &self.v3,
        }
    }

    /// Free slots in the queue for `version`.
    pub fn available(&self, version: ProtocolVersion) -> usize {
        self.sender(version).capacity()
    }

    /// Queue `item` on the queue matching its report's version.
    pub async fn enqueue(&self, item: QueuedReport) -> Result<(), EnqueueError> {
        let version = item.report.version();
        let tx = self.sender(version);
        match self.policy {
            EnqueuePolicy::Block => tx
                .send(item)
                .await
                .map_err(|_| EnqueueError::Closed { version }),
            EnqueuePolicy::Timeout(waited) => {
                tx.send_timeout(item, waited).await.map_err(|e| match e {
                    mpsc::error::SendTimeoutError::Timeout(_) => {
                        EnqueueError::Overloaded { version, waited }
                    }
                    mpsc::error::SendTimeoutError::Closed(_) => EnqueueError::Closed { version },
                })
            }
        }
    }
}

// ── Dispatcher ────────────────────────────────────────────────────────────────

pub struct DeliveryReportDispatcher<T> {
    transport: Arc<T>,
    cache: Arc<dyn CorrelationCache>,
    stats: Arc<dyn StatsCollector>,
    receivers: DeliveryReceivers,
}

impl<T: DeliverTransport> DeliveryReportDispatcher<T> {
    pub fn new(
        transport: Arc<T>,
        cache: Arc<dyn CorrelationCache>,
        stats: Arc<dyn StatsCollector>,
        receivers: DeliveryReceivers,
    ) -> Self {
        Self {
            transport,
            cache,
            stats,
            receivers,
        }
    }

    /// Start `workers` tasks per queue. They run until `shutdown` fires or
    /// every queue sender is dropped.
    pub fn spawn(self, workers: usize, shutdown: &broadcast::Sender<()>) -> Vec<JoinHandle<()>> {
        let workers = workers.max(1);
        let queues = [
            (ProtocolVersion::V20, self.receivers.v2),
            (ProtocolVersion::V30, self.receivers.v3),
        ];

        let mut handles = Vec::with_capacity(workers * queues.len());
        for (version, rx) in queues {
            let rx = Arc::new(Mutex::new(rx));
            for id in 0..workers {
                let worker = DeliveryWorker {
                    id,
                    version,
                    rx: rx.clone(),
                    transport: self.transport.clone(),
                    cache: self.cache.clone(),
                    stats: self.stats.clone(),
                    shutdown: shutdown.subscribe(),
                };
                handles.push(tokio::spawn(worker.run()));
            }
        }
        tracing::info!(workers, "delivery dispatcher started");
        handles
    }
}

struct DeliveryWorker<T> {
    id: usize,
    version: ProtocolVersion,
    rx: Arc<Mutex<mpsc::Receiver<QueuedReport>>>,
    transport: Arc<T>,
    cache: Arc<dyn CorrelationCache>,
    stats: Arc<dyn StatsCollector>,
    shutdown: broadcast::Receiver<()>,
}

impl<T: DeliverTransport> DeliveryWorker<T> {
    async fn run(mut self) {
        let rx = self.rx.clone();
        loop {
            let next = tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::debug!(worker = self.id, version = %self.version, "delivery worker shutting down");
                    return;
                }
                next = async { rx.lock().await.recv().await } => next,
            };

            match next {
                Some(item) => dispatch(&*self.transport, &*self.cache, &*self.stats, item).await,
                None => {
                    tracing::debug!(worker = self.id, version = %self.version, "delivery queue closed, worker exiting");
                    return;
                }
            }
        }
    }
}

/// Resolve the session for one report and send it.
async fn dispatch<T: DeliverTransport>(
    transport: &T,
    cache: &dyn CorrelationCache,
    stats: &dyn StatsCollector,
    item: QueuedReport,
) {
    let QueuedReport { report, remaining } = item;
    let msg_id = report.msg_id();
    let key = msg_id.to_string();

    let context = cache.get(&key).and_then(|value| match ServerContext::decode(&value) {
        Ok(ctx) => Some(ctx),
        Err(e) => {
            tracing::warn!(msg_id, error = %e, "corrupt server context");
            None
        }
    });

    match context {
        Some(ctx) => match transport.send_deliver(&ctx.addr, report).await {
            Ok(seq_id) => {
                tracing::debug!(msg_id, seq_id, addr = %ctx.addr, "delivery report sent");
                stats.record(events::DELIVER_SEND, true);
            }
            Err(e) => {
                tracing::warn!(msg_id, addr = %ctx.addr, error = %e, "delivery report send failed");
                stats.record(events::DELIVER_SEND, false);
            }
        },
        None => {
            tracing::warn!(msg_id, "no session for delivery report, dropping");
            stats.record(events::DELIVER_SEND, false);
        }
    }

    if remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
        cache.delete(&key);
    }
}
