//! Client side of the simulation: submits messages and correlates the
//! asynchronous CMPP_SUBMIT_RESP packets with the fragments that caused them.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use cmppsim_core::message::{build_submits, MessageError};
use cmppsim_core::wire::{DeliverReq, DeliverRsp, ProtocolVersion, SubmitRsp, STAT_DELIVERED};
use cmppsim_core::{MessageSplitter, SenderIdentity, TextMessage};

use crate::cache::CorrelationCache;
use crate::context::ClientContext;
use crate::stats::{events, StatsCollector};
use crate::transport::{SubmitTransport, TransportError};

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error("failed to build submit packets: {0}")]
    Message(#[from] MessageError),
    #[error("transport failed after {} of {total} fragments: {source}", .sent.len())]
    Transport {
        /// Sequence ids of the fragments that did go out.
        sent: Vec<u32>,
        total: usize,
        #[source]
        source: TransportError,
    },
}

impl SubmitError {
    /// Sequence ids already on the wire when the submission failed.
    pub fn sent_ids(&self) -> &[u32] {
        match self {
            Self::Message(_) => &[],
            Self::Transport { sent, .. } => sent,
        }
    }
}

/// A response or event arrived that no pending request accounts for.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CorrelationError {
    #[error("no matching request for key {0}")]
    Unmatched(String),
}

// ── Coordinator ───────────────────────────────────────────────────────────────

/// Who a client is logged in as, and from where.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIdentity {
    pub addr: String,
    pub user_name: String,
    pub sender: SenderIdentity,
}

pub struct ClientSubmissionCoordinator<T> {
    identity: ClientIdentity,
    version: ProtocolVersion,
    splitter: MessageSplitter,
    transport: T,
    cache: Arc<dyn CorrelationCache>,
    stats: Arc<dyn StatsCollector>,
    next_reference: AtomicU8,
}

impl<T: SubmitTransport> ClientSubmissionCoordinator<T> {
    pub fn new(
        identity: ClientIdentity,
        version: ProtocolVersion,
        splitter: MessageSplitter,
        transport: T,
        cache: Arc<dyn CorrelationCache>,
        stats: Arc<dyn StatsCollector>,
    ) -> Self {
        Self {
            identity,
            version,
            splitter,
            transport,
            cache,
            stats,
            next_reference: AtomicU8::new(0),
        }
    }

    pub fn identity(&self) -> &ClientIdentity {
        &self.identity
    }

    /// Split `message`, send every fragment in order and register each one
    /// for response correlation. Returns the sequence ids sent.
    ///
    /// A transport failure stops the submission; the error carries the ids
    /// of the fragments that were already sent.
    pub async fn submit(&self, message: &TextMessage) -> Result<Vec<u32>, SubmitError> {
        let reference = self.next_reference.fetch_add(1, Ordering::Relaxed);
        let packets = build_submits(
            message,
            &self.identity.sender,
            &self.splitter,
            self.version,
            reference,
        )
        .map_err(|e| {
            tracing::error!(
                addr = %self.identity.addr,
                phone = %message.phone,
                error = %e,
                "failed to build submit packets"
            );
            e
        })?;

        let total = packets.len();
        let context = ClientContext {
            addr: self.identity.addr.clone(),
            user_name: self.identity.user_name.clone(),
            sp_id: self.identity.sender.sp_id.clone(),
            sp_code: self.identity.sender.sp_code.clone(),
            phone: message.phone.clone(),
        };
        let context = match context.encode() {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(error = %e, "failed to encode client context");
                None
            }
        };

        let mut seq_ids = Vec::with_capacity(total);
        for packet in packets {
            let pk_number = packet.fields().pk_number;
            let seq_id = match self.transport.send_submit(packet).await {
                Ok(seq_id) => seq_id,
                Err(e) => {
                    tracing::error!(
                        addr = %self.identity.addr,
                        pk_number,
                        pk_total = total,
                        sent = seq_ids.len(),
                        error = %e,
                        "submit send failed"
                    );
                    return Err(SubmitError::Transport {
                        sent: seq_ids,
                        total,
                        source: e,
                    });
                }
            };
            seq_ids.push(seq_id);

            if let Some(value) = &context {
                if let Err(e) = self.cache.set(&seq_id.to_string(), value.clone()) {
                    tracing::warn!(seq_id, error = %e, "failed to register submit for correlation");
                }
            }
        }

        tracing::info!(
            addr = %self.identity.addr,
            user_name = %self.identity.user_name,
            sp_id = %self.identity.sender.sp_id,
            sp_code = %self.identity.sender.sp_code,
            phone = %message.phone,
            seq_ids = ?seq_ids,
            "submit sent"
        );
        Ok(seq_ids)
    }
}

impl<T> ClientSubmissionCoordinator<T> {
    /// Match a CMPP_SUBMIT_RESP to its fragment, consume the correlation
    /// entry and record the outcome.
    pub fn handle_submit_response(&self, rsp: &SubmitRsp) -> Result<(), CorrelationError> {
        let key = rsp.seq_id.to_string();
        if self.cache.take(&key).is_none() {
            tracing::warn!(
                addr = %self.identity.addr,
                seq_id = rsp.seq_id,
                msg_id = rsp.msg_id,
                "submit response matches no pending submit"
            );
            return Err(CorrelationError::Unmatched(key));
        }

        if rsp.result == 0 {
            tracing::debug!(
                addr = %self.identity.addr,
                seq_id = rsp.seq_id,
                msg_id = rsp.msg_id,
                "submit accepted"
            );
            self.stats.record(events::SUBMIT_RESP, true);
        } else {
            tracing::info!(
                addr = %self.identity.addr,
                seq_id = rsp.seq_id,
                msg_id = rsp.msg_id,
                error_code = rsp.result,
                "submit rejected"
            );
            self.stats.record(events::SUBMIT_RESP, false);
        }
        Ok(())
    }

    /// Record a delivery report and build its acknowledgement.
    pub fn handle_deliver(&self, report: &DeliverReq) -> DeliverRsp {
        let fields = report.fields();
        let delivered = fields.msg_content.as_ref() == STAT_DELIVERED.as_bytes();
        tracing::debug!(
            addr = %self.identity.addr,
            msg_id = fields.msg_id,
            phone = %fields.src_terminal_id,
            delivered,
            "delivery report received"
        );
        self.stats.record(events::DELIVER, delivered);

        DeliverRsp {
            version: report.version(),
            seq_id: fields.seq_id,
            msg_id: fields.msg_id,
            result: 0,
        }
    }
}
