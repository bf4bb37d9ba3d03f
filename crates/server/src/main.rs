use std::{net::SocketAddr, sync::Arc};

use db::DBService;
use server::{routes, AppState};
use services::services::{
    activation::ActivationEngine,
    config::Config,
    directory::{Directory, StaticDirectory},
    events::EventService,
    flow::device_investigation,
    permission::PermissionGate,
};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::load_from_env()?;

    // A malformed flow or permission table must never reach traffic.
    let flow = Arc::new(device_investigation(config.decision_missing_as)?);
    let gate = Arc::new(PermissionGate::from_rules(&config.permissions)?);
    let directory: Arc<dyn Directory> = Arc::new(StaticDirectory::new(&config.employees));

    let db = match &config.database_path {
        Some(path) => DBService::new_with_path(path).await?,
        None => DBService::new().await?,
    };

    let events = EventService::new();
    // Detached on purpose; the audit trail lives for the process lifetime.
    let _audit = events.spawn_audit_logger();

    let engine = ActivationEngine::new(db.clone(), flow, events);
    let state = AppState {
        db,
        engine,
        gate,
        directory,
    };

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("listening on {addr}");
    axum::serve(listener, routes::router(state)).await?;
    Ok(())
}
