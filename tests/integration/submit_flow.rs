use crate::*;

use cmppsim_core::msg_id;
use cmppsim_core::wire::{SubmitRsp, MSG_FMT_UCS2};
use cmppsim_core::TextMessage;
use cmppsim_services::{events, CorrelationCache, CorrelationError};

// ══════════════════════════════════════════════════════════════════════════════
//  Submit → SUBMIT_RESP → DELIVER → DELIVER_RESP
// ══════════════════════════════════════════════════════════════════════════════

/// 100 characters encode to 200 UCS-2 octets: two fragments of 134 and 66
/// octets, each behind a 6-byte header.
#[tokio::test]
async fn test_long_message_full_cycle() -> Result<()> {
    let sim = Sim::new(SimOptions::default());
    let workers = sim.start_dispatcher(1);

    let seq_ids = sim
        .client
        .submit(&TextMessage::new(PHONE, "A".repeat(100)).with_extend("01"))
        .await?;
    assert_eq!(seq_ids, vec![1, 2]);
    assert_eq!(sim.client_cache.len(), 2);

    let sent = sim.link.sent.lock().unwrap().clone();
    assert_eq!(sent.len(), 2);
    for (i, req) in sent.iter().enumerate() {
        let fields = req.fields();
        assert_eq!(req.version(), ProtocolVersion::V30);
        assert_eq!(fields.pk_total, 2);
        assert_eq!(fields.pk_number as usize, i + 1);
        assert_eq!(fields.tp_udhi, 1);
        assert_eq!(fields.msg_fmt, MSG_FMT_UCS2);
        assert_eq!(fields.src_id, "106900000101");
        assert_eq!(fields.dest_terminal_ids, vec![PHONE.to_string()]);
        assert_eq!(&fields.msg_content[..3], &[0x05, 0x00, 0x03]);
    }
    assert_eq!(sent[0].fields().msg_content.len(), 140);
    assert_eq!(sent[1].fields().msg_content.len(), 72);
    assert_eq!(sent[0].fields().msg_content[3], sent[1].fields().msg_content[3]);

    let msg_ids = sim.exchange().await?;
    assert!(sim.client_cache.is_empty(), "every response consumed its entry");
    assert_eq!(sim.stats.get(events::SUBMIT_RESP), (2, 0));
    for (msg_id, seq_id) in msg_ids.iter().zip(&seq_ids) {
        let parts = msg_id::decode(*msg_id);
        assert_eq!(parts.gateway, 900001);
        assert_eq!(u32::from(parts.sequence), *seq_id);
    }

    wait_for_condition(Duration::from_secs(5), || sim.inbox.len() == 2).await?;
    let reports = sim.acknowledge();
    for report in &reports {
        assert!(msg_ids.contains(&report.msg_id()));
        assert_eq!(report.fields().src_terminal_id, PHONE);
        assert_eq!(report.fields().msg_content.as_ref(), b"DELIVRD");
    }

    assert_eq!(sim.stats.get(events::DELIVER_SEND), (2, 0));
    assert_eq!(sim.stats.get(events::DELIVER), (2, 0));
    assert_eq!(sim.stats.get(events::DELIVER_RESP), (2, 0));
    assert!(sim.server_cache.is_empty(), "last report consumed the server entry");

    sim.shutdown.send(())?;
    for worker in workers {
        worker.await?;
    }
    Ok(())
}

#[tokio::test]
async fn test_short_message_is_single_fragment() -> Result<()> {
    let sim = Sim::new(SimOptions::default());
    let seq_ids = sim.client.submit(&TextMessage::new(PHONE, "hello")).await?;
    assert_eq!(seq_ids.len(), 1);

    let sent = sim.link.take();
    let fields = sent[0].fields();
    assert_eq!((fields.pk_total, fields.pk_number, fields.tp_udhi), (1, 1, 0));
    assert_eq!(fields.msg_content.as_ref(), &[0, b'h', 0, b'e', 0, b'l', 0, b'l', 0, b'o']);
    Ok(())
}

#[tokio::test]
async fn test_version_follows_client_configuration() -> Result<()> {
    let sim = Sim::new(SimOptions {
        version: ProtocolVersion::V20,
        ..Default::default()
    });
    sim.client.submit(&TextMessage::new(PHONE, "hi")).await?;
    let sent = sim.link.sent.lock().unwrap().clone();
    assert_eq!(sent[0].version(), ProtocolVersion::V20);

    sim.exchange().await?;
    assert_eq!(sim.stats.get(events::SUBMIT_RESP), (1, 0));
    Ok(())
}

#[tokio::test]
async fn test_unknown_response_is_unmatched() -> Result<()> {
    let sim = Sim::new(SimOptions::default());
    sim.client_cache.set("1", "ctx".into())?;

    let stray = SubmitRsp {
        version: ProtocolVersion::V30,
        seq_id: 999,
        msg_id: 0,
        result: 0,
    };
    assert_eq!(
        sim.client.handle_submit_response(&stray),
        Err(CorrelationError::Unmatched("999".into()))
    );
    assert_eq!(sim.client_cache.len(), 1, "other entries untouched");
    assert_eq!(sim.stats.get(events::SUBMIT_RESP), (0, 0));
    Ok(())
}
