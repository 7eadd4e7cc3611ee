//! Text messages and long-SMS splitting.
//!
//! Text is transcoded to UCS-2 big-endian (Msg_Fmt 8) and cut into packets.
//! A message that fits in one packet (140 octets) goes out whole. Longer
//! messages are cut into 134-octet parts; each part is sent with TP_UDHI set
//! and a 6-octet concatenation header in front, so header + part still fits
//! in 140 octets.

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::wire::{ProtocolVersion, SubmitFields, SubmitReq, MAX_SRC_ID_LEN, MSG_FMT_UCS2};

/// Length of the concatenation user-data header (`05 00 03 ref total index`).
pub const UDH_LEN: usize = 6;

/// Default single-packet maximum, in octets.
pub const DEFAULT_MAX_SINGLE: usize = 140;

/// Default per-part maximum for concatenated messages, in octets.
pub const DEFAULT_MAX_MULTIPART: usize = DEFAULT_MAX_SINGLE - UDH_LEN;

/// Part counters are single octets.
pub const MAX_PARTS: usize = u8::MAX as usize;

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum MessageError {
    #[error("character {ch:?} at offset {offset} is not representable in UCS-2")]
    Unencodable { ch: char, offset: usize },
    #[error("message needs {parts} parts, at most {MAX_PARTS} are addressable")]
    TooManyParts { parts: usize },
    #[error("invalid split limits: multipart {multipart} must be below single {single}")]
    InvalidLimits { single: usize, multipart: usize },
}

// ── Input ─────────────────────────────────────────────────────────────────────

/// A text message to submit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextMessage {
    /// Destination terminal (phone number).
    pub phone: String,
    pub content: String,
    /// Routing suffix appended to the sender's short code.
    #[serde(default)]
    pub extend: String,
}

impl TextMessage {
    pub fn new(phone: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            phone: phone.into(),
            content: content.into(),
            extend: String::new(),
        }
    }

    pub fn with_extend(mut self, extend: impl Into<String>) -> Self {
        self.extend = extend.into();
        self
    }
}

/// Sending identity of an SP: service id (`Service_Id`/`Msg_Src`) and short
/// code (prefix of `Src_Id`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SenderIdentity {
    pub sp_id: String,
    pub sp_code: String,
}

// ── Transcoding ───────────────────────────────────────────────────────────────

/// UTF-8 → UCS-2 big-endian.
///
/// Fails on the first character outside the Basic Multilingual Plane; no
/// partial output is returned.
pub fn encode_ucs2(text: &str) -> Result<Vec<u8>, MessageError> {
    let mut out = Vec::with_capacity(text.len() * 2);
    for (offset, ch) in text.char_indices() {
        let code = ch as u32;
        if code > 0xFFFF {
            return Err(MessageError::Unencodable { ch, offset });
        }
        out.extend_from_slice(&(code as u16).to_be_bytes());
    }
    Ok(out)
}

// ── Splitting ─────────────────────────────────────────────────────────────────

/// One physical packet's worth of a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageFragment {
    /// 1-based.
    pub pk_number: u8,
    pub pk_total: u8,
    /// Concatenation flag; set iff `pk_total > 1`.
    pub tp_udhi: bool,
    /// Raw transcoded bytes of this part, without header.
    pub payload: Bytes,
    /// Concatenation reference shared by all parts of one message.
    pub reference: u8,
}

impl MessageFragment {
    /// Content as it goes into `Msg_Content`.
    pub fn wire_content(&self) -> Bytes {
        if !self.tp_udhi {
            return self.payload.clone();
        }
        let mut buf = BytesMut::with_capacity(UDH_LEN + self.payload.len());
        buf.put_slice(&[0x05, 0x00, 0x03, self.reference, self.pk_total, self.pk_number]);
        buf.put_slice(&self.payload);
        buf.freeze()
    }
}

/// Splits transcoded content into protocol-sized parts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageSplitter {
    max_single: usize,
    max_multipart: usize,
}

impl Default for MessageSplitter {
    fn default() -> Self {
        Self {
            max_single: DEFAULT_MAX_SINGLE,
            max_multipart: DEFAULT_MAX_MULTIPART,
        }
    }
}

impl MessageSplitter {
    pub fn new(max_single: usize, max_multipart: usize) -> Result<Self, MessageError> {
        if max_multipart == 0 || max_multipart >= max_single {
            return Err(MessageError::InvalidLimits {
                single: max_single,
                multipart: max_multipart,
            });
        }
        Ok(Self {
            max_single,
            max_multipart,
        })
    }

    pub fn max_single(&self) -> usize {
        self.max_single
    }

    pub fn max_multipart(&self) -> usize {
        self.max_multipart
    }

    /// Cut `content` into fragments, in content order.
    pub fn split(&self, content: &[u8], reference: u8) -> Result<Vec<MessageFragment>, MessageError> {
        if content.len() <= self.max_single {
            return Ok(vec![MessageFragment {
                pk_number: 1,
                pk_total: 1,
                tp_udhi: false,
                payload: Bytes::copy_from_slice(content),
                reference,
            }]);
        }

        let parts = content.len().div_ceil(self.max_multipart);
        if parts > MAX_PARTS {
            return Err(MessageError::TooManyParts { parts });
        }

        let content = Bytes::copy_from_slice(content);
        let fragments = (0..parts)
            .map(|i| {
                let start = i * self.max_multipart;
                let end = (start + self.max_multipart).min(content.len());
                MessageFragment {
                    pk_number: (i + 1) as u8,
                    pk_total: parts as u8,
                    tp_udhi: true,
                    payload: content.slice(start..end),
                    reference,
                }
            })
            .collect();
        Ok(fragments)
    }
}

// ── Submit packets ────────────────────────────────────────────────────────────

/// `sp_code + extend`, cut to the `Src_Id` width on a character boundary.
pub fn source_id(sp_code: &str, extend: &str) -> String {
    let mut src = String::with_capacity(sp_code.len() + extend.len());
    src.push_str(sp_code);
    src.push_str(extend);
    if src.len() > MAX_SRC_ID_LEN {
        let mut cut = MAX_SRC_ID_LEN;
        while !src.is_char_boundary(cut) {
            cut -= 1;
        }
        src.truncate(cut);
    }
    src
}

/// Transcode, split and wrap `message` into CMPP_SUBMIT packets for `version`.
///
/// Sequence ids are left at zero; the transport stamps them.
pub fn build_submits(
    message: &TextMessage,
    identity: &SenderIdentity,
    splitter: &MessageSplitter,
    version: ProtocolVersion,
    reference: u8,
) -> Result<Vec<SubmitReq>, MessageError> {
    let content = encode_ucs2(&message.content)?;
    let fragments = splitter.split(&content, reference)?;
    let src_id = source_id(&identity.sp_code, &message.extend);

    Ok(fragments
        .iter()
        .map(|fragment| {
            let fields = SubmitFields {
                seq_id: 0,
                pk_total: fragment.pk_total,
                pk_number: fragment.pk_number,
                registered_delivery: 1,
                msg_level: 1,
                service_id: identity.sp_id.clone(),
                fee_user_type: 2,
                fee_terminal_id: message.phone.clone(),
                tp_pid: 0,
                tp_udhi: fragment.tp_udhi as u8,
                msg_fmt: MSG_FMT_UCS2,
                msg_src: identity.sp_id.clone(),
                fee_type: "02".to_string(),
                fee_code: "10".to_string(),
                valid_time: "151105131555101+".to_string(),
                at_time: String::new(),
                src_id: src_id.clone(),
                dest_terminal_ids: vec![message.phone.clone()],
                msg_content: fragment.wire_content(),
            };
            SubmitReq::new(version, fields)
        })
        .collect())
}
