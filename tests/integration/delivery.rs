use crate::*;

use cmppsim_core::wire::SubmitFields;
use cmppsim_core::SubmitStatus;
use cmppsim_services::{events, submit_response, ServerError};

// ══════════════════════════════════════════════════════════════════════════════
//  Delivery report fan-out and backpressure
// ══════════════════════════════════════════════════════════════════════════════

fn submit_to(version: ProtocolVersion, seq_id: u32, dests: &[&str]) -> SubmitReq {
    SubmitReq::new(
        version,
        SubmitFields {
            seq_id,
            dest_terminal_ids: dests.iter().map(|d| d.to_string()).collect(),
            ..Default::default()
        },
    )
}

#[tokio::test]
async fn test_one_report_per_destination() -> Result<()> {
    let sim = Sim::new(SimOptions::default());
    let dests = ["13800000001", "13800000002", "13800000003"];
    let accepted = sim
        .server
        .handle_submit(CLIENT_ADDR, &submit_to(ProtocolVersion::V30, 7, &dests))
        .await?;
    assert_eq!(accepted.reports, 3);

    let workers = sim.start_dispatcher(1);
    wait_for_condition(Duration::from_secs(5), || sim.inbox.len() == 3).await?;

    let delivered = sim.inbox.take();
    let phones: Vec<&str> = delivered
        .iter()
        .map(|(_, r)| r.fields().src_terminal_id.as_str())
        .collect();
    assert_eq!(phones, dests, "a single worker keeps enqueue order");
    for (addr, report) in &delivered {
        assert_eq!(addr, CLIENT_ADDR);
        assert_eq!(report.msg_id(), accepted.msg_id);
        assert_eq!(report.version(), ProtocolVersion::V30);
        assert_eq!(report.fields().dest_id, "1069000001");
    }
    assert!(sim.server_cache.is_empty());

    sim.shutdown.send(())?;
    for worker in workers {
        worker.await?;
    }
    Ok(())
}

#[tokio::test]
async fn test_reports_use_their_own_version_queue() -> Result<()> {
    let sim = Sim::new(SimOptions::default());
    let v2 = sim
        .server
        .handle_submit(CLIENT_ADDR, &submit_to(ProtocolVersion::V20, 1, &["1"]))
        .await?;
    let v3 = sim
        .server
        .handle_submit(CLIENT_ADDR, &submit_to(ProtocolVersion::V30, 2, &["2"]))
        .await?;

    let _workers = sim.start_dispatcher(2);
    wait_for_condition(Duration::from_secs(5), || sim.inbox.len() == 2).await?;

    for (_, report) in sim.inbox.take() {
        let expected = if report.msg_id() == v2.msg_id {
            ProtocolVersion::V20
        } else {
            assert_eq!(report.msg_id(), v3.msg_id);
            ProtocolVersion::V30
        };
        assert_eq!(report.version(), expected);
    }
    Ok(())
}

#[tokio::test]
async fn test_full_queue_answers_flow_control() -> Result<()> {
    let sim = Sim::new(SimOptions {
        queue_capacity: 2,
        policy: EnqueuePolicy::Timeout(Duration::from_millis(20)),
        ..Default::default()
    });

    // No dispatcher: the queue never drains.
    let first = submit_to(ProtocolVersion::V20, 1, &["1", "2"]);
    let outcome = sim.server.handle_submit(CLIENT_ADDR, &first).await;
    assert_eq!(submit_response(&first, &outcome).result, SubmitStatus::Ok.code());

    let second = submit_to(ProtocolVersion::V20, 2, &["3"]);
    let outcome = sim.server.handle_submit(CLIENT_ADDR, &second).await;
    assert!(matches!(
        outcome,
        Err(ServerError::Overloaded { enqueued: 0, .. })
    ));
    let rsp = submit_response(&second, &outcome);
    assert_eq!(rsp.result, SubmitStatus::FlowControl.code());
    assert_eq!(rsp.seq_id, 2);

    assert_eq!(sim.server_cache.len(), 1, "overloaded submit left no entry");
    Ok(())
}

#[tokio::test]
async fn test_report_for_expired_entry_is_dropped() -> Result<()> {
    let sim = Sim::new(SimOptions::default());
    let accepted = sim
        .server
        .handle_submit(CLIENT_ADDR, &submit_to(ProtocolVersion::V30, 3, &["1"]))
        .await?;
    cmppsim_services::CorrelationCache::delete(&sim.server_cache, &accepted.msg_id.to_string());

    let _workers = sim.start_dispatcher(1);
    wait_for_condition(Duration::from_secs(5), || {
        sim.stats.get(events::DELIVER_SEND) == (0, 1)
    })
    .await?;
    assert_eq!(sim.inbox.len(), 0);
    Ok(())
}

/// With the blocking policy a submit waits for queue space instead of
/// answering FlowControl, and goes through once the dispatcher drains.
#[tokio::test(start_paused = true)]
async fn test_block_policy_waits_for_room() -> Result<()> {
    let sim = Sim::new(SimOptions {
        queue_capacity: 1,
        policy: EnqueuePolicy::Block,
        ..Default::default()
    });

    let first = submit_to(ProtocolVersion::V30, 1, &["13800000001"]);
    sim.server.handle_submit(CLIENT_ADDR, &first).await?;

    let second = submit_to(ProtocolVersion::V30, 2, &["13800000002"]);
    let mut pending = std::pin::pin!(sim.server.handle_submit(CLIENT_ADDR, &second));
    assert!(
        tokio::time::timeout(Duration::from_secs(1), &mut pending)
            .await
            .is_err(),
        "submit returned while the queue was full"
    );

    let _workers = sim.start_dispatcher(1);
    let accepted = pending.await?;
    assert_eq!(accepted.reports, 1);

    wait_for_condition(Duration::from_secs(5), || sim.inbox.len() == 2).await?;
    assert_eq!(sim.stats.get(events::DELIVER_SEND), (2, 0));
    let phones: Vec<String> = sim
        .inbox
        .take()
        .into_iter()
        .map(|(_, r)| r.fields().src_terminal_id.clone())
        .collect();
    assert_eq!(phones, ["13800000001", "13800000002"]);
    wait_for_condition(Duration::from_secs(5), || sim.server_cache.is_empty()).await?;
    Ok(())
}
