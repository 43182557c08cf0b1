//! RecordHub
//!
//! Operator front end for the federation engine: dry-run provider selection
//! and full record retrieval against HTTP providers.

mod config;

use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use clap::Parser;
use recordhub_federation::access::AllowAll;
use recordhub_federation::error::ErrorClass;
use recordhub_federation::providers::http_provider_set;
use recordhub_federation::registry::InMemoryRegistry;
use recordhub_federation::FederationCoordinator;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use config::{CliConfig, Command, RequestArgs};

/// Initializes the tracing subscriber. `RUST_LOG` takes precedence.
fn init_logging(level: &str) {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "recordhub={level},recordhub_federation={level},recordhub::audit={level}"
        ))
    });

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

/// Builds a coordinator over the registry file and its HTTP endpoints.
fn create_coordinator(config: &CliConfig) -> anyhow::Result<FederationCoordinator> {
    info!(registry = %config.registry.display(), "Loading provider registry");
    let registry = InMemoryRegistry::from_json_file(&config.registry)
        .with_context(|| format!("Cannot load registry {}", config.registry.display()))?;

    let client = reqwest::Client::builder()
        .user_agent(concat!("recordhub/", env!("CARGO_PKG_VERSION")))
        .build()?;
    let handles = http_provider_set(&registry.snapshot(), &client)?;
    info!(providers = handles.len(), "Bound HTTP provider handles");

    let coordinator =
        FederationCoordinator::builder(Arc::new(registry), Arc::new(AllowAll), handles)
            .with_config(config.federation_config())
            .build()?;
    Ok(coordinator)
}

/// Prints the providers a request would be sent to.
async fn select(coordinator: &FederationCoordinator, args: &RequestArgs) -> anyhow::Result<()> {
    let selected = coordinator
        .select_providers(&args.to_request(), Utc::now())
        .await?;
    let output = json!({
        "primary": selected.primary,
        "providers": selected.names(),
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

/// Fetches and prints the reconciled record. Returns the process exit code.
async fn fetch(coordinator: &FederationCoordinator, args: &RequestArgs) -> anyhow::Result<i32> {
    let cancellation = CancellationToken::new();
    let on_interrupt = cancellation.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling provider calls");
            on_interrupt.cancel();
        }
    });

    match coordinator
        .retrieve(&args.consumer(), args.to_request(), cancellation)
        .await
    {
        Ok(result) => {
            println!("{}", serde_json::to_string_pretty(&result)?);
            let unhealthy = coordinator.health().unhealthy;
            if !unhealthy.is_empty() {
                warn!(providers = ?unhealthy, "Some providers failed");
            }
            Ok(0)
        }
        Err(e) => {
            eprintln!("Error: {e}");
            Ok(match e.class() {
                ErrorClass::BadRequest => 2,
                ErrorClass::Forbidden => 3,
                ErrorClass::ServiceError => 4,
                ErrorClass::Cancelled => 130,
            })
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = CliConfig::parse();
    init_logging(&config.log_level);

    if let Err(errors) = config.validate() {
        for error in &errors {
            eprintln!("Configuration error: {}", error);
        }
        std::process::exit(1);
    }

    info!(
        max_provider_wait_ms = config.max_provider_wait_ms,
        audit_category = %config.audit_category,
        "Starting RecordHub"
    );

    let coordinator = create_coordinator(&config)?;

    let args = config.command.request_args();
    match &config.command {
        Command::Select(_) => select(&coordinator, args).await?,
        Command::Fetch(_) => {
            let code = fetch(&coordinator, args).await?;
            if code != 0 {
                std::process::exit(code);
            }
        }
    }

    Ok(())
}
