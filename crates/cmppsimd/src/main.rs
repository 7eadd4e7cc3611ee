//! cmppsimd: CMPP client/server load simulator.
//!
//! Runs a mock SMS gateway and a set of simulated SP clients in one
//! process. Clients submit long messages, the server answers each submit
//! and pushes DELIVRD status reports back, and packet statistics are
//! printed as the run progresses.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::broadcast;

use cmppsim_core::config::SimConfig;
use cmppsim_core::TextMessage;
use cmppsim_services::{
    delivery_queues, reaper_loop, Account, AccountTable, ClientIdentity,
    ClientSubmissionCoordinator, DeliveryReportDispatcher, EnqueuePolicy, MemoryCache,
    PacketStats, ServerSubmissionHandler,
};

mod loopback;
mod session;

use loopback::Loopback;
use session::ClientSession;

const FIRST_CLIENT_PORT: usize = 20000;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Load config
    if let Err(e) = SimConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let config = SimConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        SimConfig::default()
    });
    let splitter = config
        .protocol
        .splitter()
        .context("invalid message size limits")?;
    let version = config.protocol.version;
    tracing::info!(
        %version,
        accounts = config.accounts.len(),
        clients_per_account = config.load.clients_per_account,
        messages_per_client = config.load.messages_per_client,
        "cmppsimd starting"
    );

    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let stats = PacketStats::new();

    // Correlation caches, one per role
    let client_cache = MemoryCache::new(config.cache.ttl(), config.cache.max_entries);
    let server_cache = MemoryCache::new(config.cache.ttl(), config.cache.max_entries);
    let client_reaper = tokio::spawn(reaper_loop(
        client_cache.clone(),
        config.cache.reap_interval(),
        shutdown_tx.subscribe(),
    ));
    let server_reaper = tokio::spawn(reaper_loop(
        server_cache.clone(),
        config.cache.reap_interval(),
        shutdown_tx.subscribe(),
    ));

    // Mock server
    let accounts = AccountTable::new();
    let (queues, receivers) = delivery_queues(
        config.delivery.queue_capacity,
        EnqueuePolicy::from_timeout(config.delivery.enqueue_timeout()),
    );
    let server = Arc::new(ServerSubmissionHandler::new(
        accounts.clone(),
        Arc::new(server_cache.clone()),
        queues,
        Arc::new(stats.clone()),
    ));
    let loopback = Loopback::new(server.clone());
    let workers = DeliveryReportDispatcher::new(
        Arc::new(loopback.server_link()),
        Arc::new(server_cache.clone()),
        Arc::new(stats.clone()),
        receivers,
    )
    .spawn(config.delivery.workers, &shutdown_tx);

    // Stats printer
    let stats_printer = {
        let stats = stats.clone();
        let interval = config.load.stats_interval();
        let mut shutdown = shutdown_tx.subscribe();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.recv() => return,
                    _ = ticker.tick() => stats.print_stats(),
                }
            }
        })
    };

    // Simulated clients
    let message = TextMessage::new(config.load.phone.clone(), config.load.content.clone())
        .with_extend(config.load.extend.clone());
    let mut sessions = Vec::new();
    for account_config in &config.accounts {
        let account = Account::from(account_config);
        for _ in 0..config.load.clients_per_account {
            let addr = format!("127.0.0.1:{}", FIRST_CLIENT_PORT + sessions.len());
            accounts.register(addr.clone(), account.clone());
            let (link, inbound) = loopback.connect(&addr);
            let coordinator = ClientSubmissionCoordinator::new(
                ClientIdentity {
                    addr,
                    user_name: account.user_name.clone(),
                    sender: account.identity(),
                },
                version,
                splitter,
                link,
                Arc::new(client_cache.clone()),
                Arc::new(stats.clone()),
            );
            let session = ClientSession::new(
                coordinator,
                inbound,
                loopback.clone(),
                server.clone(),
                message.clone(),
                config.load.messages_per_client,
                config.load.idle_timeout(),
            );
            sessions.push(tokio::spawn(session.run()));
        }
    }
    tracing::info!(clients = sessions.len(), "clients connected");

    tokio::select! {
        results = futures::future::join_all(sessions) => {
            for result in results {
                match result {
                    Ok(report) => tracing::info!(
                        addr = %report.addr,
                        submitted = report.submitted,
                        fragments = report.fragments,
                        failed = report.failed,
                        "client finished"
                    ),
                    Err(e) => tracing::error!("client task failed: {:?}", e),
                }
            }
        }
        _ = tokio::signal::ctrl_c() => tracing::info!("interrupted"),
    }

    let _ = shutdown_tx.send(());
    for worker in workers {
        if let Err(e) = worker.await {
            tracing::error!("delivery worker failed: {:?}", e);
        }
    }
    let _ = tokio::join!(client_reaper, server_reaper, stats_printer);

    stats.print_stats();
    tracing::info!(
        client_pending = client_cache.len(),
        server_pending = server_cache.len(),
        "cmppsimd finished"
    );
    Ok(())
}
