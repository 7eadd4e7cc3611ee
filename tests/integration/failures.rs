use crate::*;

use cmppsim_core::msg_id::{MsgIdError, MsgIdStamp};
use cmppsim_core::wire::SubmitFields;
use cmppsim_core::{SubmitStatus, TextMessage};
use cmppsim_services::{
    events, reaper_loop, submit_response, CorrelationCache, ServerError, SubmitError,
};

// ══════════════════════════════════════════════════════════════════════════════
//  Failure paths
// ══════════════════════════════════════════════════════════════════════════════

/// 150 characters need three fragments; the second send fails.
#[tokio::test]
async fn test_transport_failure_mid_message() -> Result<()> {
    let sim = Sim::new(SimOptions {
        link: ScriptedLink::failing_at(2),
        ..Default::default()
    });

    let err = sim
        .client
        .submit(&TextMessage::new(PHONE, "A".repeat(150)))
        .await
        .unwrap_err();
    let SubmitError::Transport { sent, total, .. } = &err else {
        bail!("expected a transport error, got {err:?}");
    };
    assert_eq!(sent, &vec![1]);
    assert_eq!(*total, 3);
    assert_eq!(sim.link.sent.lock().unwrap().len(), 1);
    assert_eq!(sim.client_cache.len(), 1, "only the sent fragment is pending");
    Ok(())
}

#[tokio::test]
async fn test_unregistered_connection_is_refused() -> Result<()> {
    let sim = Sim::new(SimOptions::default());
    sim.accounts.remove(CLIENT_ADDR);

    sim.client.submit(&TextMessage::new(PHONE, "hi")).await?;
    let req = sim.link.take().remove(0);
    let outcome = sim.server.handle_submit(CLIENT_ADDR, &req).await;

    assert!(matches!(outcome, Err(ServerError::Unauthorized { .. })));
    assert_eq!(submit_response(&req, &outcome).result, SubmitStatus::Others.code());
    assert!(sim.server_cache.is_empty(), "no reports scheduled");
    Ok(())
}

#[tokio::test]
async fn test_non_numeric_sp_id_is_refused() -> Result<()> {
    let sim = Sim::new(SimOptions {
        sp_id: "SP0001",
        ..Default::default()
    });
    let req = SubmitReq::new(
        ProtocolVersion::V20,
        SubmitFields {
            seq_id: 1,
            dest_terminal_ids: vec![PHONE.into()],
            ..Default::default()
        },
    );

    let outcome = sim.server.handle_submit(CLIENT_ADDR, &req).await;
    assert!(matches!(
        outcome,
        Err(ServerError::Allocation(MsgIdError::InvalidServiceId(_)))
    ));
    assert_eq!(submit_response(&req, &outcome).result, SubmitStatus::Others.code());
    Ok(())
}

#[tokio::test]
async fn test_rejected_submit_counts_as_failure() -> Result<()> {
    let sim = Sim::new(SimOptions::default());
    sim.accounts.remove(CLIENT_ADDR);
    sim.client.submit(&TextMessage::new(PHONE, "hi")).await?;

    sim.exchange().await?;
    assert_eq!(sim.stats.get(events::SUBMIT_RESP), (0, 1));
    assert!(sim.client_cache.is_empty());
    Ok(())
}

/// A response that never arrives leaves an orphan; the reaper removes it
/// once the TTL passes.
#[tokio::test(start_paused = true)]
async fn test_orphaned_entries_are_reaped() -> Result<()> {
    let sim = Sim::new(SimOptions {
        ttl: Duration::from_secs(30),
        ..Default::default()
    });
    sim.client.submit(&TextMessage::new(PHONE, "lost")).await?;
    assert_eq!(sim.client_cache.len(), 1);

    let reaper = tokio::spawn(reaper_loop(
        sim.client_cache.clone(),
        Duration::from_secs(5),
        sim.shutdown.subscribe(),
    ));

    tokio::time::sleep(Duration::from_secs(20)).await;
    assert_eq!(sim.client_cache.len(), 1, "still within its TTL");

    tokio::time::sleep(Duration::from_secs(20)).await;
    assert!(sim.client_cache.is_empty());
    assert!(sim.client_cache.get("1").is_none());

    sim.shutdown.send(())?;
    reaper.await?;
    Ok(())
}

fn fixed_stamp() -> MsgIdStamp {
    MsgIdStamp {
        month: 10,
        day: 17,
        hour: 9,
        minute: 30,
        second: 0,
    }
}

/// Sequences 1 and 65537 share their low 16 bits, so within one second
/// they map to the same Msg_Id. The second submit is refused and the first
/// still gets exactly one report.
#[tokio::test]
async fn test_colliding_msg_id_is_refused() -> Result<()> {
    let sim = Sim::new(SimOptions {
        clock: Some(fixed_stamp),
        ..Default::default()
    });
    let submit = |seq_id: u32, phone: &str| {
        SubmitReq::new(
            ProtocolVersion::V30,
            SubmitFields {
                seq_id,
                dest_terminal_ids: vec![phone.into()],
                ..Default::default()
            },
        )
    };

    let first = submit(1, "13800000001");
    let accepted = sim.server.handle_submit(CLIENT_ADDR, &first).await?;

    let second = submit(0x1_0001, "13800000002");
    let outcome = sim.server.handle_submit(CLIENT_ADDR, &second).await;
    assert!(matches!(outcome, Err(ServerError::Correlation(_))));
    let rsp = submit_response(&second, &outcome);
    assert_eq!(rsp.result, SubmitStatus::Others.code());
    assert_eq!(sim.server_cache.len(), 1);

    let _workers = sim.start_dispatcher(1);
    wait_for_condition(Duration::from_secs(5), || sim.server_cache.is_empty()).await?;
    assert_eq!(sim.stats.get(events::DELIVER_SEND), (1, 0));

    let delivered = sim.inbox.take();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].1.msg_id(), accepted.msg_id);
    assert_eq!(delivered[0].1.fields().src_terminal_id, "13800000001");
    Ok(())
}
