//! Start a claude-gateway server programmatically with an in-memory audit store.
//!
//! Usage:
//!   cargo run --example basic_gateway
//!   ANTHROPIC_BASE_URL=http://localhost:4222 claude

use claude_gateway::{build_router, AppState, AuditWriter, GatewayConfig, MemoryAuditStore};
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let mut config = GatewayConfig::find_and_load(None)?;
    if config.providers.vllm.base_url.is_none() {
        config.providers.vllm.base_url = Some("http://localhost:8000/v1".to_string());
    }

    let store = Arc::new(MemoryAuditStore::new());
    let audit = AuditWriter::new(store.clone());

    let port = config.port;
    let state = Arc::new(AppState::new(config, audit.clone())?);

    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}")).await?;

    println!("Listening on http://localhost:{port}");
    println!("Try model \"vllm:<model>\" or \"or:<model>\"; Ctrl-C to stop.");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    audit.shutdown().await;
    for key in store.keys().await {
        println!("audited: {key}");
    }

    Ok(())
}
