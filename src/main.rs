use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use open_charge_central::config::{Config, StoreBackend};
use open_charge_central::domain::ChargingStation;
use open_charge_central::ocpp::{Engine, PermissiveHooks};
use open_charge_central::registry::{Reconciler, SharedStore, StationRegistry};
use open_charge_central::store::{ElasticStore, MemoryStore};
use open_charge_central::{bus, server, telemetry};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    telemetry::init_tracing();

    let cfg = Config::load()?;

    let store: SharedStore = match cfg.store.backend {
        StoreBackend::Memory => Arc::new(MemoryStore::<ChargingStation>::new()),
        StoreBackend::Elastic => Arc::new(ElasticStore::new(&cfg.store.url, &cfg.store.index)),
    };
    let registry = Arc::new(StationRegistry::new(store));
    let engine = Arc::new(Engine::new(
        Arc::new(PermissiveHooks),
        cfg.protocol.heartbeat_interval_seconds,
    ));

    let (command_tx, commands) = bus::command_channel(cfg.bus.command_capacity);
    let (availability_tx, availability_rx) = bus::availability_channel();

    let reconciler = Reconciler::new(registry.clone(), cfg.reconcile.grace_seconds);
    let reconcile_every = Duration::from_secs(cfg.reconcile.interval_seconds);
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(reconcile_every);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tick.tick().await;
            if let Err(error) = reconciler.run_once().await {
                warn!(%error, "reconciliation pass failed");
            }
        }
    });

    let state = server::AppState {
        registry,
        engine,
        commands,
        command_tx,
        availability: Arc::new(availability_tx),
        availability_rx,
    };
    let app = server::router(state);

    let addr = cfg.server.socket_addr()?;
    if cfg.server.host == "0.0.0.0" {
        warn!(
            "Server binding to 0.0.0.0 - service will be accessible from network! \
            For production, bind to 127.0.0.1 unless behind a firewall/reverse proxy."
        );
    }
    info!(%addr, "starting Open Charge Central");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(telemetry::shutdown_signal())
    .await?;

    warn!("shutdown complete");
    Ok(())
}
