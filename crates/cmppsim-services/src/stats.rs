//! Packet statistics: success/failure counters per event name.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;

/// Event names recorded by the simulator.
pub mod events {
    /// Client received a submit response.
    pub const SUBMIT_RESP: &str = "SubmitResp";
    /// Client received a delivery report.
    pub const DELIVER: &str = "Deliver";
    /// Server received a delivery report acknowledgement.
    pub const DELIVER_RESP: &str = "DeliverResp";
    /// Server handed a delivery report to the transport.
    pub const DELIVER_SEND: &str = "DeliverSend";
}

/// Sink for outcome events. Fire-and-forget: must not block.
pub trait StatsCollector: Send + Sync {
    fn record(&self, event: &str, succeeded: bool);
}

#[derive(Default)]
struct Counter {
    succeeded: AtomicU64,
    failed: AtomicU64,
}

/// Counts of one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventCount {
    pub event: String,
    pub succeeded: u64,
    pub failed: u64,
}

/// In-memory [`StatsCollector`].
#[derive(Clone, Default)]
pub struct PacketStats {
    counters: Arc<DashMap<String, Counter>>,
}

impl PacketStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// `(succeeded, failed)` for `event`.
    pub fn get(&self, event: &str) -> (u64, u64) {
        self.counters
            .get(event)
            .map(|c| {
                (
                    c.succeeded.load(Ordering::Relaxed),
                    c.failed.load(Ordering::Relaxed),
                )
            })
            .unwrap_or((0, 0))
    }

    pub fn succeeded(&self, event: &str) -> u64 {
        self.get(event).0
    }

    pub fn failed(&self, event: &str) -> u64 {
        self.get(event).1
    }

    /// All counters, sorted by event name.
    pub fn snapshot(&self) -> Vec<EventCount> {
        let mut counts: Vec<EventCount> = self
            .counters
            .iter()
            .map(|entry| EventCount {
                event: entry.key().clone(),
                succeeded: entry.value().succeeded.load(Ordering::Relaxed),
                failed: entry.value().failed.load(Ordering::Relaxed),
            })
            .collect();
        counts.sort_by(|a, b| a.event.cmp(&b.event));
        counts
    }

    pub fn print_stats(&self) {
        for count in self.snapshot() {
            tracing::info!(
                event = %count.event,
                succeeded = count.succeeded,
                failed = count.failed,
                "packet stats"
            );
        }
    }
}

impl StatsCollector for PacketStats {
    fn record(&self, event: &str, succeeded: bool) {
        if let Some(counter) = self.counters.get(event) {
            bump(&counter, succeeded);
            return;
        }
        let counter = self.counters.entry(event.to_string()).or_default();
        bump(&counter, succeeded);
    }
}

fn bump(counter: &Counter, succeeded: bool) {
    if succeeded {
        counter.succeeded.fetch_add(1, Ordering::Relaxed);
    } else {
        counter.failed.fetch_add(1, Ordering::Relaxed);
    }
}
