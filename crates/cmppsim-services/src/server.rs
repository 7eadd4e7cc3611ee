//! Mock server: accepts CMPP_SUBMIT, allocates a Msg_Id, and schedules one
//! DELIVRD status report per destination.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;

use cmppsim_core::msg_id::{self, MsgIdError, MsgIdStamp};
use cmppsim_core::wire::{
    DeliverFields, DeliverReq, DeliverRsp, SubmitReq, SubmitRsp, MSG_FMT_ASCII, STAT_DELIVERED,
};
use cmppsim_core::SubmitStatus;

use crate::accounts::{Account, AccountTable};
use crate::cache::{CacheError, CorrelationCache};
use crate::context::ServerContext;
use crate::delivery::{DeliveryQueues, EnqueueError, QueuedReport};
use crate::stats::{events, StatsCollector};

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("no account logged in on {addr}")]
    Unauthorized { addr: String },
    #[error("msg_id allocation failed: {0}")]
    Allocation(#[from] MsgIdError),
    #[error("failed to register submit for correlation: {0}")]
    Correlation(#[from] CacheError),
    #[error("failed to encode session context: {0}")]
    Context(#[from] serde_json::Error),
    #[error("delivery reports for {msg_id} only partly queued ({enqueued} enqueued): {source}")]
    Overloaded {
        msg_id: u64,
        enqueued: usize,
        #[source]
        source: EnqueueError,
    },
}

impl ServerError {
    /// Result code reported back to the client.
    pub fn status(&self) -> SubmitStatus {
        match self {
            Self::Overloaded { .. } => SubmitStatus::FlowControl,
            _ => SubmitStatus::Others,
        }
    }
}

/// An accepted submit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmitAccepted {
    pub msg_id: u64,
    /// Delivery reports queued.
    pub reports: usize,
}

/// Build the CMPP_SUBMIT_RESP for `req` from the handler's outcome.
pub fn submit_response(req: &SubmitReq, outcome: &Result<SubmitAccepted, ServerError>) -> SubmitRsp {
    let (msg_id, status) = match outcome {
        Ok(accepted) => (accepted.msg_id, SubmitStatus::Ok),
        Err(ServerError::Overloaded { msg_id, .. }) => (*msg_id, SubmitStatus::FlowControl),
        Err(e) => (0, e.status()),
    };
    SubmitRsp {
        version: req.version(),
        seq_id: req.seq_id(),
        msg_id,
        result: status.code(),
    }
}

pub struct ServerSubmissionHandler {
    accounts: AccountTable,
    cache: Arc<dyn CorrelationCache>,
    queues: DeliveryQueues,
    stats: Arc<dyn StatsCollector>,
    clock: Option<fn() -> MsgIdStamp>,
}

impl ServerSubmissionHandler {
    pub fn new(
        accounts: AccountTable,
        cache: Arc<dyn CorrelationCache>,
        queues: DeliveryQueues,
        stats: Arc<dyn StatsCollector>,
    ) -> Self {
        Self {
            accounts,
            cache,
            queues,
            stats,
            clock: None,
        }
    }

    /// Stamp Msg_Ids from `clock` instead of the local wall clock.
    pub fn with_clock(mut self, clock: fn() -> MsgIdStamp) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Accept a submit from the connection at `addr`.
    ///
    /// The owning account comes from the account table, never from fields
    /// inside the packet. On success the correlation entry for the new
    /// Msg_Id exists before the first report is queued. A submit with no
    /// destinations is accepted without an entry since no report will
    /// ever look it up.
    ///
    /// Msg_Ids carry only the low 16 bits of the sequence id, so two
    /// submits in the same second can land on the same id. The second one
    /// is refused with [`CacheError::Occupied`] while the first is still in
    /// flight.
    pub async fn handle_submit(
        &self,
        addr: &str,
        req: &SubmitReq,
    ) -> Result<SubmitAccepted, ServerError> {
        let Some(account) = self.accounts.lookup(addr) else {
            tracing::warn!(%addr, seq_id = req.seq_id(), "submit from unknown connection");
            return Err(ServerError::Unauthorized {
                addr: addr.to_string(),
            });
        };

        let allocated = match self.clock {
            Some(clock) => msg_id::allocate_at(&account.sp_id, req.seq_id(), clock()),
            None => msg_id::allocate(&account.sp_id, req.seq_id()),
        };
        let msg_id = allocated.map_err(|e| {
            tracing::error!(%addr, sp_id = %account.sp_id, error = %e, "msg_id allocation failed");
            e
        })?;

        let fields = req.fields();
        tracing::info!(
            %addr,
            user_name = %account.user_name,
            seq_id = fields.seq_id,
            msg_id,
            pk_number = fields.pk_number,
            pk_total = fields.pk_total,
            content = %hex::encode(&fields.msg_content),
            "submit accepted"
        );

        let destinations = fields.dest_terminal_ids.len();
        if destinations == 0 {
            return Ok(SubmitAccepted { msg_id, reports: 0 });
        }

        let context = ServerContext {
            addr: addr.to_string(),
            user_name: account.user_name.clone(),
            sp_id: account.sp_id.clone(),
            sp_code: account.sp_code.clone(),
        };
        self.cache
            .set_if_absent(&msg_id.to_string(), context.encode()?)
            .map_err(|e| {
                tracing::warn!(%addr, seq_id = fields.seq_id, msg_id, error = %e, "submit refused");
                e
            })?;

        let remaining = Arc::new(AtomicUsize::new(destinations));
        for (enqueued, phone) in fields.dest_terminal_ids.iter().enumerate() {
            let item = QueuedReport {
                report: status_report(req, &account, msg_id, phone),
                remaining: remaining.clone(),
            };
            if let Err(source) = self.queues.enqueue(item).await {
                let skipped = destinations - enqueued;
                if remaining.fetch_sub(skipped, Ordering::AcqRel) == skipped {
                    self.cache.delete(&msg_id.to_string());
                }
                tracing::warn!(%addr, msg_id, enqueued, error = %source, "delivery queue overloaded");
                return Err(ServerError::Overloaded {
                    msg_id,
                    enqueued,
                    source,
                });
            }
        }

        Ok(SubmitAccepted {
            msg_id,
            reports: destinations,
        })
    }

    /// Record the client's acknowledgement of a delivery report.
    pub fn handle_deliver_response(&self, rsp: &DeliverRsp) {
        let succeeded = rsp.result == 0;
        if !succeeded {
            tracing::info!(msg_id = rsp.msg_id, result = rsp.result, "delivery report rejected");
        }
        self.stats.record(events::DELIVER_RESP, succeeded);
    }

    /// Unbind a connection from its account.
    pub fn logout(&self, addr: &str) -> Option<Account> {
        self.accounts.remove(addr)
    }
}

/// A DELIVRD status report for one destination of `req`.
fn status_report(req: &SubmitReq, account: &Account, msg_id: u64, phone: &str) -> DeliverReq {
    DeliverReq::new(
        req.version(),
        DeliverFields {
            seq_id: 0,
            msg_id,
            dest_id: account.sp_code.clone(),
            service_id: account.sp_id.clone(),
            tp_pid: 0,
            tp_udhi: 0,
            msg_fmt: MSG_FMT_ASCII,
            src_terminal_id: phone.to_string(),
            registered_delivery: 1,
            msg_content: Bytes::from_static(STAT_DELIVERED.as_bytes()),
        },
    )
}
