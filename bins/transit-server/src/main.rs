mod seed;

use std::path::Path;
use std::sync::Arc;

use broker_memory::{MemoryBroker, MemorySchemaRegistry};
use clap::Parser;
use tokio_util::sync::CancellationToken;

use transit_config_hcl::HclParser;
use transit_engine::config::{ConfigParser, TomlParser};
use transit_engine::{ClientContext, Engine, TransitConfig};

#[derive(Parser)]
#[command(name = "transit-server", about = "Transit station stream processor")]
struct Cli {
    /// Path to configuration file (.toml or .hcl).
    #[arg(long, default_value = "transit.toml", env = "TRANSIT_CONFIG")]
    config: String,

    /// Broker address; overrides the config file.
    #[arg(long, env = "KAFKA_BROKER_URL")]
    broker_url: Option<String>,

    /// Schema registry address; overrides the config file.
    #[arg(long, env = "SCHEMA_REGISTRY_URL")]
    schema_registry_url: Option<String>,

    /// HTTP port of the table API; overrides the config file.
    #[arg(long)]
    api_port: Option<u16>,

    /// JSON-lines file of stations published to the input topic on startup.
    #[arg(long)]
    seed: Option<String>,
}

fn load_config(cli: &Cli) -> Result<TransitConfig, transit_engine::EngineError> {
    let parsers: [&dyn ConfigParser; 2] = [&TomlParser, &HclParser];
    let mut config = if Path::new(&cli.config).exists() {
        TransitConfig::load_with(&cli.config, &parsers)?
    } else {
        tracing::warn!(config = %cli.config, "config file not found, using defaults");
        TransitConfig::default()
    };
    if let Some(url) = &cli.broker_url {
        config.broker_url = url.clone();
    }
    if let Some(url) = &cli.schema_registry_url {
        config.schema_registry_url = url.clone();
    }
    if let Some(port) = cli.api_port {
        config.api_port = port;
    }
    config.validate()?;
    Ok(config)
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();

    tracing::info!(config = %cli.config, "loading configuration");
    let config = match load_config(&cli) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error = %e, "failed to load config");
            std::process::exit(1);
        }
    };

    let broker = Arc::new(MemoryBroker::new());
    let registry = Arc::new(MemorySchemaRegistry::new());
    let ctx = match ClientContext::new(
        broker,
        registry,
        config.broker_url.clone(),
        config.schema_registry_url.clone(),
    ) {
        Ok(ctx) => ctx,
        Err(e) => {
            tracing::error!(error = %e, "failed to connect to broker");
            std::process::exit(1);
        }
    };

    if let Some(path) = &cli.seed {
        match seed::publish_stations(&ctx, &config.stream, path).await {
            Ok(n) => tracing::info!(file = %path, stations = n, "seeded input topic"),
            Err(e) => {
                tracing::error!(file = %path, error = %e, "failed to seed stations");
                std::process::exit(1);
            }
        }
    }

    let api_port = config.api_port;
    tracing::info!(consumers = config.consumers.len(), "bootstrapping engine");
    let engine = match Engine::bootstrap(config, ctx).await {
        Ok(e) => e,
        Err(e) => {
            tracing::error!(error = %e, "failed to bootstrap engine");
            std::process::exit(1);
        }
    };

    let api_shutdown = CancellationToken::new();
    let api = tokio::spawn(transit_api_server::run(
        api_port,
        engine.tables().clone(),
        api_shutdown.clone(),
    ));

    tracing::info!("transit-server started, press Ctrl+C to stop");
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for Ctrl+C");
    }
    tracing::info!("shutting down...");

    api_shutdown.cancel();
    match api.await {
        Ok(Err(e)) => tracing::error!(error = %e, "table api failed"),
        Err(e) => tracing::error!(error = %e, "table api panicked"),
        Ok(Ok(())) => {}
    }
    engine.shutdown().await;
}
