//! cmppsim-core: CMPP packet model, long-SMS splitting, Msg_Id allocation
//! and configuration. All other cmppsim crates depend on this one.

pub mod config;
pub mod message;
pub mod msg_id;
pub mod wire;

#[cfg(test)]
mod proptests;

pub use message::{MessageFragment, MessageSplitter, SenderIdentity, TextMessage};
pub use wire::{ProtocolVersion, SubmitStatus};
