//! CMPP packet model: the submit / deliver packets the simulator produces
//! and consumes, tagged by protocol version.
//!
//! Byte-level encoding and the connection lifecycle belong to the transport.
//! What lives here is the field set of each packet as the protocol defines it,
//! plus the constants both sides of the simulation agree on. CMPP 2.0 and 3.0
//! share most of their submit/deliver fields; the 3.0 extras are carried in the
//! `V3` variants so handlers dispatch on the tag instead of downcasting.

use std::fmt;
use std::str::FromStr;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

// ── Protocol version ─────────────────────────────────────────────────────────

/// Negotiated CMPP protocol version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProtocolVersion {
    #[serde(rename = "2.0")]
    V20,
    #[serde(rename = "3.0")]
    V30,
}

impl ProtocolVersion {
    /// Version byte as sent in CMPP_CONNECT.
    pub fn as_byte(self) -> u8 {
        match self {
            Self::V20 => 0x20,
            Self::V30 => 0x30,
        }
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::V20 => f.write_str("2.0"),
            Self::V30 => f.write_str("3.0"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown CMPP version: {0}")]
pub struct UnknownVersion(pub String);

impl FromStr for ProtocolVersion {
    type Err = UnknownVersion;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "2.0" | "2" | "20" => Ok(Self::V20),
            "3.0" | "3" | "30" => Ok(Self::V30),
            other => Err(UnknownVersion(other.to_string())),
        }
    }
}

// ── Constants ────────────────────────────────────────────────────────────────

/// Maximum octets of `Src_Id`.
pub const MAX_SRC_ID_LEN: usize = 21;

/// Maximum octets of `Msg_Content` in one packet.
pub const MAX_MSG_CONTENT: usize = 140;

/// Msg_Fmt for UCS-2 text.
pub const MSG_FMT_UCS2: u8 = 8;

/// Msg_Fmt for plain ASCII.
pub const MSG_FMT_ASCII: u8 = 0;

/// Status text carried by every simulated delivery report.
pub const STAT_DELIVERED: &str = "DELIVRD";

// ── Submit status ────────────────────────────────────────────────────────────

/// Result codes of CMPP_SUBMIT_RESP.
///
/// The simulator's own error taxonomy is translated onto this closed set at
/// the transport edge; nothing inside the core compares raw integers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SubmitStatus {
    Ok = 0,
    InvalidStructure = 1,
    InvalidCommand = 2,
    DuplicateSequence = 3,
    InvalidMsgLength = 4,
    InvalidFeeCode = 5,
    MsgTooLong = 6,
    InvalidServiceId = 7,
    FlowControl = 8,
    Others = 9,
}

impl SubmitStatus {
    pub fn code(self) -> u32 {
        self as u32
    }
}

// ── Submit ───────────────────────────────────────────────────────────────────

/// Fields shared by CMPP 2.0 and 3.0 CMPP_SUBMIT.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SubmitFields {
    /// Stamped by the transport when the packet is written.
    pub seq_id: u32,
    pub pk_total: u8,
    pub pk_number: u8,
    pub registered_delivery: u8,
    pub msg_level: u8,
    pub service_id: String,
    pub fee_user_type: u8,
    pub fee_terminal_id: String,
    pub tp_pid: u8,
    pub tp_udhi: u8,
    pub msg_fmt: u8,
    pub msg_src: String,
    pub fee_type: String,
    pub fee_code: String,
    pub valid_time: String,
    pub at_time: String,
    pub src_id: String,
    pub dest_terminal_ids: Vec<String>,
    /// Wire content: concatenation header (when `tp_udhi` is set) + payload.
    pub msg_content: Bytes,
}

impl SubmitFields {
    pub fn msg_length(&self) -> u8 {
        self.msg_content.len().min(u8::MAX as usize) as u8
    }
}

/// CMPP 3.0 additions to CMPP_SUBMIT.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SubmitExtV3 {
    pub fee_terminal_type: u8,
    pub dest_terminal_type: u8,
    pub link_id: String,
}

/// A CMPP_SUBMIT request, tagged by version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitReq {
    V2(SubmitFields),
    V3 {
        fields: SubmitFields,
        ext: SubmitExtV3,
    },
}

impl SubmitReq {
    /// Wrap common fields in the variant for `version`.
    pub fn new(version: ProtocolVersion, fields: SubmitFields) -> Self {
        match version {
            ProtocolVersion::V20 => Self::V2(fields),
            ProtocolVersion::V30 => Self::V3 {
                fields,
                ext: SubmitExtV3::default(),
            },
        }
    }

    pub fn version(&self) -> ProtocolVersion {
        match self {
            Self::V2(_) => ProtocolVersion::V20,
            Self::V3 { .. } => ProtocolVersion::V30,
        }
    }

    pub fn fields(&self) -> &SubmitFields {
        match self {
            Self::V2(fields) | Self::V3 { fields, .. } => fields,
        }
    }

    pub fn fields_mut(&mut self) -> &mut SubmitFields {
        match self {
            Self::V2(fields) | Self::V3 { fields, .. } => fields,
        }
    }

    pub fn seq_id(&self) -> u32 {
        self.fields().seq_id
    }
}

/// CMPP_SUBMIT_RESP. The result is one octet in 2.0 and four in 3.0; both
/// fit in `u32`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmitRsp {
    pub version: ProtocolVersion,
    pub seq_id: u32,
    pub msg_id: u64,
    pub result: u32,
}

// ── Deliver ──────────────────────────────────────────────────────────────────

/// Fields shared by CMPP 2.0 and 3.0 CMPP_DELIVER.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DeliverFields {
    pub seq_id: u32,
    pub msg_id: u64,
    pub dest_id: String,
    pub service_id: String,
    pub tp_pid: u8,
    pub tp_udhi: u8,
    pub msg_fmt: u8,
    pub src_terminal_id: String,
    pub registered_delivery: u8,
    pub msg_content: Bytes,
}

impl DeliverFields {
    pub fn msg_length(&self) -> u8 {
        self.msg_content.len().min(u8::MAX as usize) as u8
    }
}

/// CMPP 3.0 additions to CMPP_DELIVER.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DeliverExtV3 {
    pub src_terminal_type: u8,
    pub link_id: String,
}

/// A CMPP_DELIVER request, tagged by version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliverReq {
    V2(DeliverFields),
    V3 {
        fields: DeliverFields,
        ext: DeliverExtV3,
    },
}

impl DeliverReq {
    pub fn new(version: ProtocolVersion, fields: DeliverFields) -> Self {
        match version {
            ProtocolVersion::V20 => Self::V2(fields),
            ProtocolVersion::V30 => Self::V3 {
                fields,
                ext: DeliverExtV3::default(),
            },
        }
    }

    pub fn version(&self) -> ProtocolVersion {
        match self {
            Self::V2(_) => ProtocolVersion::V20,
            Self::V3 { .. } => ProtocolVersion::V30,
        }
    }

    pub fn fields(&self) -> &DeliverFields {
        match self {
            Self::V2(fields) | Self::V3 { fields, .. } => fields,
        }
    }

    pub fn fields_mut(&mut self) -> &mut DeliverFields {
        match self {
            Self::V2(fields) | Self::V3 { fields, .. } => fields,
        }
    }

    pub fn msg_id(&self) -> u64 {
        self.fields().msg_id
    }
}

/// CMPP_DELIVER_RESP.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliverRsp {
    pub version: ProtocolVersion,
    pub seq_id: u32,
    pub msg_id: u64,
    pub result: u32,
}
