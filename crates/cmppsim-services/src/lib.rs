//! cmppsim-services: the async half of the simulator. Client submit
//! coordination, the mock server's submit handler, delivery report dispatch
//! and the shared state they correlate through.

pub mod accounts;
pub mod cache;
pub mod client;
pub mod context;
pub mod delivery;
pub mod server;
pub mod stats;
pub mod transport;

pub use accounts::{Account, AccountTable};
pub use cache::{reaper_loop, CacheError, CorrelationCache, MemoryCache};
pub use client::{ClientIdentity, ClientSubmissionCoordinator, CorrelationError, SubmitError};
pub use context::{ClientContext, ServerContext};
pub use delivery::{
    delivery_queues, DeliveryQueues, DeliveryReceivers, DeliveryReportDispatcher, EnqueueError,
    EnqueuePolicy, QueuedReport,
};
pub use server::{submit_response, ServerError, ServerSubmissionHandler, SubmitAccepted};
pub use stats::{events, EventCount, PacketStats, StatsCollector};
pub use transport::{DeliverTransport, SubmitTransport, TransportError};
