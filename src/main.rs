use claude_gateway::config::config_search_paths;
use claude_gateway::providers::Provider;
use claude_gateway::{build_router, AppState, AuditWriter, GatewayConfig};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(
    name = "claude-gateway",
    about = "Anthropic Messages gateway for native, OpenRouter, vLLM and SGLang backends",
    version
)]
struct Cli {
    /// Path to config file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port to listen on (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Directory for audit records (overrides config)
    #[arg(long)]
    audit_dir: Option<PathBuf>,

    /// Disable audit records
    #[arg(long)]
    no_audit: bool,

    /// Print config search paths and exit
    #[arg(long)]
    show_config_paths: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "claude_gateway=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if cli.show_config_paths {
        println!("Config search paths:");
        for (i, path) in config_search_paths().iter().enumerate() {
            println!("  {}. {}", i + 1, path.display());
        }
        return Ok(());
    }

    let mut config = GatewayConfig::find_and_load(cli.config.as_deref())?;

    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(dir) = cli.audit_dir {
        config.audit.dir = dir;
    }
    if cli.no_audit {
        config.audit.enabled = false;
    }

    info!("claude-gateway v{}", env!("CARGO_PKG_VERSION"));
    for provider in Provider::ALL {
        match config.effective_base_url(provider) {
            Ok(url) => info!("  {:<10} {}", provider.name(), url),
            Err(_) => info!("  {:<10} (not configured)", provider.name()),
        }
    }
    info!("  Server tools: {:?}", config.routing.server_tools);
    if config.audit.enabled {
        info!("  Audit dir:    {}", config.audit.dir.display());
    } else {
        info!("  Audit:        disabled");
    }

    let audit = AuditWriter::from_config(&config.audit);
    let state = Arc::new(AppState::new(config.clone(), audit.clone())?);

    let app = build_router(state);
    let bind_addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;

    info!("Listening on http://{}", bind_addr);
    info!("  ANTHROPIC_BASE_URL=http://localhost:{} claude", config.port);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Draining pending audit writes");
    audit.shutdown().await;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
