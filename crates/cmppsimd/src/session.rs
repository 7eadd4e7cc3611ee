//! One simulated client connection: submits its share of the load, answers
//! delivery reports, and hangs up once the line has been idle long enough.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use cmppsim_core::TextMessage;
use cmppsim_services::{ClientSubmissionCoordinator, ServerSubmissionHandler};

use crate::loopback::{ClientLink, Inbound, Loopback};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SessionReport {
    pub addr: String,
    pub submitted: usize,
    pub fragments: usize,
    pub failed: usize,
}

pub struct ClientSession {
    coordinator: ClientSubmissionCoordinator<ClientLink>,
    inbound: mpsc::Receiver<Inbound>,
    server: Arc<ServerSubmissionHandler>,
    loopback: Arc<Loopback>,
    message: TextMessage,
    messages: usize,
    idle_timeout: Duration,
}

impl ClientSession {
    pub fn new(
        coordinator: ClientSubmissionCoordinator<ClientLink>,
        inbound: mpsc::Receiver<Inbound>,
        loopback: Arc<Loopback>,
        server: Arc<ServerSubmissionHandler>,
        message: TextMessage,
        messages: usize,
        idle_timeout: Duration,
    ) -> Self {
        Self {
            coordinator,
            inbound,
            server,
            loopback,
            message,
            messages,
            idle_timeout,
        }
    }

    pub async fn run(mut self) -> SessionReport {
        let mut report = SessionReport {
            addr: self.coordinator.identity().addr.clone(),
            ..Default::default()
        };

        for _ in 0..self.messages {
            match self.coordinator.submit(&self.message).await {
                Ok(seq_ids) => {
                    report.submitted += 1;
                    report.fragments += seq_ids.len();
                }
                Err(e) => {
                    report.failed += 1;
                    report.fragments += e.sent_ids().len();
                    tracing::warn!(addr = %report.addr, error = %e, "submit failed");
                }
            }
            // Responses are only handled between submits, never while a
            // fragment's correlation entry is still being written.
            while let Ok(packet) = self.inbound.try_recv() {
                self.handle(packet);
            }
            tokio::task::yield_now().await;
        }

        loop {
            match tokio::time::timeout(self.idle_timeout, self.inbound.recv()).await {
                Ok(Some(packet)) => self.handle(packet),
                Ok(None) => break,
                Err(_) => {
                    tracing::debug!(addr = %report.addr, "connection idle, closing");
                    break;
                }
            }
        }

        self.loopback.disconnect(&report.addr);
        report
    }

    fn handle(&self, packet: Inbound) {
        match packet {
            Inbound::SubmitRsp(rsp) => {
                if let Err(e) = self.coordinator.handle_submit_response(&rsp) {
                    tracing::warn!(error = %e, "dropping submit response");
                }
            }
            Inbound::Deliver(deliver) => {
                let ack = self.coordinator.handle_deliver(&deliver);
                self.server.handle_deliver_response(&ack);
            }
        }
    }
}
