//! Property-based tests for splitting and Msg_Id allocation.
//!
//! - Short content is never split and never flagged for concatenation
//! - Long content splits into ceil(len / part) flagged, contiguous parts
//!   that reassemble to the input
//! - Msg_Id allocation is deterministic per stamp and collision-free over
//!   the 16-bit sequence space

use std::collections::HashSet;

use proptest::prelude::*;

use crate::message::{encode_ucs2, MessageSplitter, DEFAULT_MAX_MULTIPART, DEFAULT_MAX_SINGLE};
use crate::msg_id::{allocate_at, decode, MsgIdStamp};
use crate::wire::MAX_MSG_CONTENT;

fn stamp_strategy() -> impl Strategy<Value = MsgIdStamp> {
    (1u8..=12, 1u8..=31, 0u8..24, 0u8..60, 0u8..60).prop_map(|(month, day, hour, minute, second)| {
        MsgIdStamp {
            month,
            day,
            hour,
            minute,
            second,
        }
    })
}

// ==================== Splitting ====================

proptest! {
    #[test]
    fn short_content_single_fragment(
        content in prop::collection::vec(any::<u8>(), 0..=DEFAULT_MAX_SINGLE)
    ) {
        let frags = MessageSplitter::default().split(&content, 0).unwrap();
        prop_assert_eq!(frags.len(), 1);
        prop_assert_eq!(frags[0].pk_number, 1);
        prop_assert_eq!(frags[0].pk_total, 1);
        prop_assert!(!frags[0].tp_udhi);
        prop_assert_eq!(&frags[0].payload[..], &content[..]);
    }

    #[test]
    fn long_content_splits_and_reassembles(
        content in prop::collection::vec(any::<u8>(), (DEFAULT_MAX_SINGLE + 1)..2000),
        reference in any::<u8>(),
    ) {
        let frags = MessageSplitter::default().split(&content, reference).unwrap();

        prop_assert_eq!(frags.len(), content.len().div_ceil(DEFAULT_MAX_MULTIPART));
        for (i, frag) in frags.iter().enumerate() {
            prop_assert_eq!(frag.pk_number as usize, i + 1);
            prop_assert_eq!(frag.pk_total as usize, frags.len());
            prop_assert!(frag.tp_udhi);
            prop_assert!(frag.payload.len() <= DEFAULT_MAX_MULTIPART);
            prop_assert!(frag.wire_content().len() <= MAX_MSG_CONTENT);
        }

        let rebuilt: Vec<u8> = frags.iter().flat_map(|f| f.payload.iter().copied()).collect();
        prop_assert_eq!(rebuilt, content);
    }

    #[test]
    fn bmp_text_always_transcodes(text in "[\\u{0}-\\u{D7FF}\\u{E000}-\\u{FFFF}]{0,200}") {
        let encoded = encode_ucs2(&text).unwrap();
        prop_assert_eq!(encoded.len(), text.chars().count() * 2);
    }
}

// ==================== Msg_Id ====================

proptest! {
    #[test]
    fn msg_id_is_deterministic(stamp in stamp_strategy(), sp in 0u32..=4_194_303, seq in any::<u32>()) {
        let sp_id = sp.to_string();
        let a = allocate_at(&sp_id, seq, stamp).unwrap();
        let b = allocate_at(&sp_id, seq, stamp).unwrap();
        prop_assert_eq!(a, b);

        let parts = decode(a);
        prop_assert_eq!(parts.stamp, stamp);
        prop_assert_eq!(parts.gateway, sp);
        prop_assert_eq!(parts.sequence as u32, seq & 0xFFFF);
    }

    // Only the low 16 bits of the sequence reach the Msg_Id, so uniqueness
    // holds for sequences distinct modulo 2^16 within one second. Wider
    // collisions are rejected by the server's correlation cache.
    #[test]
    fn distinct_sequences_never_collide(
        stamp in stamp_strategy(),
        seqs in prop::collection::hash_set(0u32..=0xFFFF, 1..200),
    ) {
        let ids: HashSet<u64> = seqs
            .iter()
            .map(|seq| allocate_at("900001", *seq, stamp).unwrap())
            .collect();
        prop_assert_eq!(ids.len(), seqs.len());
    }

    #[test]
    fn sequences_equal_modulo_16_bits_collide(stamp in stamp_strategy(), seq in 0u32..=0xFFFF) {
        let a = allocate_at("900001", seq, stamp).unwrap();
        let b = allocate_at("900001", seq + 0x1_0000, stamp).unwrap();
        prop_assert_eq!(a, b);
    }
}
