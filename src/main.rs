//! Remora Agent
//!
//! Run with: cargo run -- --name vdc --zipkin http://localhost:9411/api/v2/spans
//!
//! Every flag can also be given as an environment variable (`REMORA_PORT`,
//! `REMORA_NAME`, ...) or in a JSON file passed with `--config`.
//! - RUST_LOG: Log filter (default: remora=info, remora=debug with --verbose)

use clap::Parser;
use remora::api::run_server;
use remora::config::Cli;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let config = cli.load();

    // Initialize logging
    let verbose = config.as_ref().map(|c| c.verbose).unwrap_or(cli.verbose);
    let default_filter = if verbose {
        "remora=debug,tower_http=debug"
    } else {
        "remora=info,tower_http=info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match config {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    tracing::info!("Remora configuration:");
    tracing::info!("  Listen: {}:{}", config.host, config.port);
    tracing::info!("  Name: {} (index policy {:?})", config.name, config.index_policy);
    if config.tracing {
        tracing::info!("  Zipkin: {}", config.zipkin_endpoint);
    } else {
        tracing::info!("  Zipkin: DISABLED");
    }
    if config.store {
        tracing::info!("  Elasticsearch: {}", config.elastic_url);
    } else {
        tracing::info!("  Elasticsearch: DISABLED (documents are logged)");
    }
    if let Some(ttl) = config.span_ttl() {
        tracing::info!("  Span TTL: {:?}", ttl);
    }
    tracing::info!("  Shutdown grace period: {:?}", config.wait());

    println!(
        r#"
  ____  _____ __  __  ___  ____      _
 |  _ \| ____|  \/  |/ _ \|  _ \    / \
 | |_) |  _| | |\/| | | | | |_) |  / _ \
 |  _ <| |___| |  | | |_| |  _ <  / ___ \
 |_| \_\_____|_|  |_|\___/|_| \_\/_/   \_\

 Telemetry Sidecar Agent
 Version: {}
"#,
        env!("CARGO_PKG_VERSION")
    );

    if let Err(e) = run_server(config).await {
        tracing::error!("Failed to init agent: {}", e);
        std::process::exit(1);
    }
}
