//! Transport boundary.
//!
//! The simulator core never touches sockets. It hands finished packets to a
//! transport and gets back the sequence id the packet went out with.
//! Framing, encoding and keep-alive live on the other side of these traits.

use std::future::Future;
use std::sync::Arc;

use cmppsim_core::wire::{DeliverReq, SubmitReq};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("connection {0} is closed")]
    Closed(String),
    #[error("no session for {0}")]
    UnknownSession(String),
}

/// Client side: writes CMPP_SUBMIT on the client's connection.
pub trait SubmitTransport: Send + Sync {
    /// Stamp a sequence id on `req`, write it, and return that id.
    fn send_submit(
        &self,
        req: SubmitReq,
    ) -> impl Future<Output = Result<u32, TransportError>> + Send;
}

/// Server side: writes CMPP_DELIVER to the session at `addr`.
pub trait DeliverTransport: Send + Sync + 'static {
    fn send_deliver(
        &self,
        addr: &str,
        report: DeliverReq,
    ) -> impl Future<Output = Result<u32, TransportError>> + Send;
}

impl<T: SubmitTransport> SubmitTransport for Arc<T> {
    fn send_submit(
        &self,
        req: SubmitReq,
    ) -> impl Future<Output = Result<u32, TransportError>> + Send {
        (**self).send_submit(req)
    }
}

impl<T: DeliverTransport> DeliverTransport for Arc<T> {
    fn send_deliver(
        &self,
        addr: &str,
        report: DeliverReq,
    ) -> impl Future<Output = Result<u32, TransportError>> + Send {
        (**self).send_deliver(addr, report)
    }
}
