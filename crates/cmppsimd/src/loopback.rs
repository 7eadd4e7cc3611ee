//! In-process transport joining simulated clients to the mock server.
//!
//! Each client connection gets an inbound channel. Submits go straight to
//! the server handler on a spawned task; the SUBMIT_RESP and every DELIVER
//! come back through the client's inbound channel.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;

use cmppsim_core::wire::{DeliverReq, SubmitReq, SubmitRsp};
use cmppsim_services::{
    submit_response, DeliverTransport, ServerSubmissionHandler, SubmitTransport, TransportError,
};

const INBOUND_CAPACITY: usize = 1024;

/// A packet arriving on a client connection.
#[derive(Debug)]
pub enum Inbound {
    SubmitRsp(SubmitRsp),
    Deliver(DeliverReq),
}

pub struct Loopback {
    server: Arc<ServerSubmissionHandler>,
    sessions: DashMap<String, mpsc::Sender<Inbound>>,
    next_seq: AtomicU32,
}

impl Loopback {
    pub fn new(server: Arc<ServerSubmissionHandler>) -> Arc<Self> {
        Arc::new(Self {
            server,
            sessions: DashMap::new(),
            next_seq: AtomicU32::new(0),
        })
    }

    /// Open a client connection at `addr`.
    pub fn connect(self: &Arc<Self>, addr: &str) -> (ClientLink, mpsc::Receiver<Inbound>) {
        let (tx, rx) = mpsc::channel(INBOUND_CAPACITY);
        self.sessions.insert(addr.to_string(), tx);
        tracing::debug!(%addr, "client connected");
        (
            ClientLink {
                addr: addr.to_string(),
                loopback: self.clone(),
            },
            rx,
        )
    }

    pub fn disconnect(&self, addr: &str) {
        self.sessions.remove(addr);
        self.server.logout(addr);
        tracing::debug!(%addr, "client disconnected");
    }

    pub fn server_link(self: &Arc<Self>) -> ServerLink {
        ServerLink {
            loopback: self.clone(),
        }
    }

    /// Sequence ids are unique across all connections, so the clients can
    /// share one correlation cache.
    fn next_seq(&self) -> u32 {
        self.next_seq.fetch_add(1, Ordering::Relaxed).wrapping_add(1)
    }

    fn inbound(&self, addr: &str) -> Option<mpsc::Sender<Inbound>> {
        self.sessions.get(addr).map(|entry| entry.value().clone())
    }
}

/// Client end of one connection.
pub struct ClientLink {
    addr: String,
    loopback: Arc<Loopback>,
}

impl SubmitTransport for ClientLink {
    async fn send_submit(&self, mut req: SubmitReq) -> Result<u32, TransportError> {
        let inbound = self
            .loopback
            .inbound(&self.addr)
            .ok_or_else(|| TransportError::Closed(self.addr.clone()))?;
        let seq_id = self.loopback.next_seq();
        req.fields_mut().seq_id = seq_id;

        let server = self.loopback.server.clone();
        let addr = self.addr.clone();
        tokio::spawn(async move {
            let outcome = server.handle_submit(&addr, &req).await;
            if let Err(e) = &outcome {
                tracing::warn!(%addr, seq_id, error = %e, "submit refused");
            }
            let rsp = submit_response(&req, &outcome);
            if inbound.send(Inbound::SubmitRsp(rsp)).await.is_err() {
                tracing::debug!(%addr, seq_id, "client gone before submit response");
            }
        });
        Ok(seq_id)
    }
}

/// Server end of every connection.
pub struct ServerLink {
    loopback: Arc<Loopback>,
}

impl DeliverTransport for ServerLink {
    async fn send_deliver(&self, addr: &str, mut report: DeliverReq) -> Result<u32, TransportError> {
        let inbound = self
            .loopback
            .inbound(addr)
            .ok_or_else(|| TransportError::UnknownSession(addr.to_string()))?;
        let seq_id = self.loopback.next_seq();
        report.fields_mut().seq_id = seq_id;
        inbound
            .send(Inbound::Deliver(report))
            .await
            .map_err(|_| TransportError::Closed(addr.to_string()))?;
        Ok(seq_id)
    }
}
