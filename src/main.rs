//! Entry point for the `accord` discussion-orchestrator server.
//!
//! Startup sequence: parse CLI overlays, load [`AccordConfig`] (file, falling
//! back to defaults), initialize structured logging, register the available
//! model providers, and serve the HTTP + SSE surface until `ctrl_c`.

use accord_core::{AccordConfig, LogFormat};
use accord_provider::{MockProvider, ProviderRegistry};
use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use tracing::{error, info};

mod cli {
    use clap::Parser;

    #[derive(Debug, Parser)]
    #[command(name = "accord", about = "Turn-based discussion orchestrator for two LLM participants")]
    pub struct Cli {
        /// Override the configured bind address.
        #[arg(long, env = "ACCORD_SERVER_BIND_ADDRESS")]
        pub bind: Option<String>,

        /// Override the configured port.
        #[arg(long, env = "ACCORD_SERVER_PORT")]
        pub port: Option<u16>,

        /// Override the configured log format.
        #[arg(long, value_enum, env = "ACCORD_LOG_FORMAT")]
        pub log_format: Option<LogFormatArg>,
    }

    #[derive(Debug, Clone, Copy, clap::ValueEnum)]
    pub enum LogFormatArg {
        Json,
        Pretty,
    }
}

fn init_logging(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("accord=info"));
    match format {
        LogFormat::Json => {
            tracing_subscriber::fmt().with_env_filter(filter).json().init();
        }
        LogFormat::Pretty => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
        }
    }
}

/// Registers the two deterministic mock providers the server ships with.
/// Real vendor adapters implement [`accord_provider::ModelProvider`] and are
/// registered the same way; none are bundled here because reaching an actual
/// LLM vendor is outside this crate's scope.
fn register_mock_providers(registry: &ProviderRegistry) -> Result<()> {
    registry.register(Arc::new(MockProvider::new(
        "mock-a",
        "This is a deterministic placeholder response from the first mock participant.",
    )))?;
    registry.register(Arc::new(MockProvider::new(
        "mock-b",
        "This is a deterministic placeholder response from the second mock participant.",
    )))?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Cli::parse();
    let mut config = AccordConfig::load().await?;

    if let Some(bind) = args.bind {
        config.server.bind_address = bind;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(format) = args.log_format {
        config.log_format = match format {
            cli::LogFormatArg::Json => LogFormat::Json,
            cli::LogFormatArg::Pretty => LogFormat::Pretty,
        };
    }

    init_logging(config.log_format);
    info!("starting accord discussion orchestrator");

    let registry = Arc::new(ProviderRegistry::new());
    if let Err(err) = register_mock_providers(&registry) {
        error!("failed to register mock providers: {}", err);
        return Err(err);
    }

    let api = accord_api::DiscussionApi::new((&config).into(), Arc::clone(&registry));
    let bind_address = config.server.bind_address.clone();
    let port = config.server.port;
    let server = tokio::spawn(async move {
        if let Err(err) = api.serve().await {
            error!("discussion API server error: {}", err);
        }
    });

    info!(%bind_address, port, "accord is ready");

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("received shutdown signal, stopping accord"),
        Err(err) => error!("unable to listen for shutdown signal: {}", err),
    }

    server.abort();
    info!("accord stopped");
    Ok(())
}
