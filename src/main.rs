//! haip-server - HAIP protocol engine server
//!
//! Main entry point hosting the server façade across the three HAIP
//! transports.

use std::sync::Arc;

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use haip::auth::StaticTokenValidator;
use haip::cli::{Cli, Commands};
use haip::config::Config;
use haip::server::{reap_loop, router, AppState};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse_args();
    init_tracing(cli.verbose);

    let config_path = cli.config.as_deref().unwrap_or("config/haip.yaml");
    let config = Config::load(config_path)?;

    match cli.command {
        Commands::ValidateConfig => {
            config.validate()?;
            tracing::info!("configuration at {} is valid", config_path);
            Ok(())
        }
        Commands::Serve => serve(config).await,
    }
}

/// Development credential validator populated from `HAIP_DEV_TOKENS`
/// (`token:subject,token:subject,...`). Production deployments should
/// supply a real `TokenValidator` backed by a JWT verification library;
/// that collaborator is out of scope here (spec.md §1 Non-goals).
fn dev_token_validator() -> StaticTokenValidator {
    let mut validator = StaticTokenValidator::new();
    if let Ok(raw) = std::env::var("HAIP_DEV_TOKENS") {
        for entry in raw.split(',') {
            if let Some((token, subject)) = entry.split_once(':') {
                validator = validator.allow(token.to_string(), subject.to_string(), vec![]);
            }
        }
    }
    validator
}

async fn serve(config: Config) -> Result<()> {
    let addr = format!("{}:{}", config.host, config.port);
    let state = AppState::new(config, Arc::new(dev_token_validator()));
    let app = router(state.clone());

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("haip-server listening on {}", addr);

    tokio::spawn(reap_loop(state));

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown signal received, draining sessions");
}

fn init_tracing(verbose: bool) {
    let default_directive = if verbose { "haip=debug" } else { "haip=info" };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
