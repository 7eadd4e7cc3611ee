//! CMPP Msg_Id allocation.
//!
//! Msg_Id is a 64-bit value whose layout is fixed by the protocol:
//!
//! ```text
//!  63    60 59   55 54   50 49     44 43     38 37            16 15        0
//! +--------+-------+-------+---------+---------+----------------+-----------+
//! | month  |  day  | hour  | minute  | second  |  gateway code  | sequence  |
//! |   4    |   5   |   5   |    6    |    6    |       22       |    16     |
//! +--------+-------+-------+---------+---------+----------------+-----------+
//! ```
//!
//! The mock server uses the account's SP id as the gateway code and the low
//! 16 bits of the submit sequence number as the sequence.

use chrono::{DateTime, Datelike, Local, TimeZone, Timelike};

/// Largest gateway code that fits the 22-bit field.
pub const MAX_GATEWAY_CODE: u32 = (1 << 22) - 1;

const MONTH_SHIFT: u32 = 60;
const DAY_SHIFT: u32 = 55;
const HOUR_SHIFT: u32 = 50;
const MINUTE_SHIFT: u32 = 44;
const SECOND_SHIFT: u32 = 38;
const GATEWAY_SHIFT: u32 = 16;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum MsgIdError {
    #[error("service id {0:?} is not a decimal number")]
    InvalidServiceId(String),
    #[error("service id {0} does not fit the 22-bit gateway field")]
    ServiceIdOverflow(u64),
}

/// The wall-clock part of a Msg_Id. One stamp is one allocation epoch:
/// allocations sharing a stamp are fully determined by their inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MsgIdStamp {
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
}

impl MsgIdStamp {
    pub fn now() -> Self {
        Self::from_datetime(&Local::now())
    }

    pub fn from_datetime<Tz: TimeZone>(at: &DateTime<Tz>) -> Self {
        Self {
            month: at.month() as u8,
            day: at.day() as u8,
            hour: at.hour() as u8,
            minute: at.minute() as u8,
            // leap seconds report 60; the field only has room for 0..=59
            second: at.second().min(59) as u8,
        }
    }
}

/// Decoded Msg_Id fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MsgIdParts {
    pub stamp: MsgIdStamp,
    pub gateway: u32,
    pub sequence: u16,
}

/// Allocate a Msg_Id for `sp_id` / `seq_id` stamped with the current local time.
pub fn allocate(sp_id: &str, seq_id: u32) -> Result<u64, MsgIdError> {
    allocate_at(sp_id, seq_id, MsgIdStamp::now())
}

/// Allocate a Msg_Id with an explicit stamp.
pub fn allocate_at(sp_id: &str, seq_id: u32, stamp: MsgIdStamp) -> Result<u64, MsgIdError> {
    let gateway = parse_gateway(sp_id)?;
    Ok((stamp.month as u64 & 0x0F) << MONTH_SHIFT
        | (stamp.day as u64 & 0x1F) << DAY_SHIFT
        | (stamp.hour as u64 & 0x1F) << HOUR_SHIFT
        | (stamp.minute as u64 & 0x3F) << MINUTE_SHIFT
        | (stamp.second as u64 & 0x3F) << SECOND_SHIFT
        | (gateway as u64) << GATEWAY_SHIFT
        | (seq_id as u64 & 0xFFFF))
}

pub fn decode(msg_id: u64) -> MsgIdParts {
    MsgIdParts {
        stamp: MsgIdStamp {
            month: (msg_id >> MONTH_SHIFT & 0x0F) as u8,
            day: (msg_id >> DAY_SHIFT & 0x1F) as u8,
            hour: (msg_id >> HOUR_SHIFT & 0x1F) as u8,
            minute: (msg_id >> MINUTE_SHIFT & 0x3F) as u8,
            second: (msg_id >> SECOND_SHIFT & 0x3F) as u8,
        },
        gateway: (msg_id >> GATEWAY_SHIFT & MAX_GATEWAY_CODE as u64) as u32,
        sequence: (msg_id & 0xFFFF) as u16,
    }
}

fn parse_gateway(sp_id: &str) -> Result<u32, MsgIdError> {
    let trimmed = sp_id.trim();
    if trimmed.is_empty() || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
        return Err(MsgIdError::InvalidServiceId(sp_id.to_string()));
    }
    let value: u64 = trimmed
        .parse()
        .map_err(|_| MsgIdError::InvalidServiceId(sp_id.to_string()))?;
    if value > MAX_GATEWAY_CODE as u64 {
        return Err(MsgIdError::ServiceIdOverflow(value));
    }
    Ok(value as u32)
}
