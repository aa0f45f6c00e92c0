mod actuator;
mod auth;
mod command;
mod config;
mod connection;
mod presence;
mod store;
#[cfg(test)]
mod testing;

use anyhow::{Context, Result};
use auth::{AuthTokenManager, CustomTokenExchange};
use clap::Parser;
use command::{CommandProcessor, LocalState};
use config::{AgentConfig, SourceKind};
use connection::{CommandSource, PollingSource, StreamConnectionManager};
use gharswitch_shared::StorePaths;
use presence::PresenceScheduler;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use store::{RemoteStore, RestStoreClient, TimestampMode};

use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Time allowed for the final offline write
const OFFLINE_WRITE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Parser, Debug)]
#[command(name = "gharswitch-edge", version, about = "GharSwitch relay agent")]
struct Args {
    /// Path to the agent configuration file
    #[arg(short, long, default_value = "gharswitch.toml")]
    config: PathBuf,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let args = Args::parse();
    let config = AgentConfig::load(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;

    info!("Relay agent starting: {}", config.device.device_id);
    info!("  Tenant: {}", config.device.tenant_id);
    info!("  Store: {}", config.store.base_url);

    let paths = StorePaths::new(&config.device.tenant_id, &config.device.device_id);
    let timestamps = if config.store.server_timestamps {
        TimestampMode::Server
    } else {
        TimestampMode::Local
    };
    let store: Arc<dyn RemoteStore> = Arc::new(
        RestStoreClient::new(&config.store.base_url, config.request_timeout(), timestamps)
            .context("building store client")?,
    );

    let exchange = CustomTokenExchange::new(
        &config.auth.token_url,
        &config.auth.identity_url,
        &config.auth.api_key,
        &config.device.device_id,
        &config.auth.device_secret,
        config.request_timeout(),
    )
    .context("building token exchange client")?;
    let auth = Arc::new(AuthTokenManager::new(Arc::new(exchange)));

    let pins = config.channel_pins();
    let state = LocalState::new(pins.keys().cloned());
    let actuator = actuator::build(&config.actuator, pins).context("opening relay outputs")?;
    info!("Relays: {} ({})", actuator.name(), state.summary());

    let mut processor = CommandProcessor::new(
        paths.clone(),
        store.clone(),
        auth.clone(),
        actuator,
        state,
        config.commands.unknown_channel,
    );
    processor.sync_from_remote().await;

    let presence = Arc::new(PresenceScheduler::new(
        store.clone(),
        auth.clone(),
        &paths,
        config.presence.interval(),
    ))
    .start();

    let mut source: Box<dyn CommandSource> = match config.stream.source {
        SourceKind::Stream => Box::new(StreamConnectionManager::new(
            store.clone(),
            auth.clone(),
            &paths,
            &config.stream,
        )),
        SourceKind::Poll => Box::new(PollingSource::new(
            store.clone(),
            auth.clone(),
            &paths,
            config.stream.poll_interval(),
        )),
    };
    info!("Command source: {}", source.name());

    let outcome = tokio::select! {
        result = source.run(&mut processor) => result,
        _ = shutdown_signal() => Ok(()),
    };
    if let Err(e) = &outcome {
        error!("Command source stopped: {:#}", e);
    }

    match tokio::time::timeout(OFFLINE_WRITE_TIMEOUT, presence.shutdown()).await {
        Ok(Ok(())) => info!("Offline record written"),
        Ok(Err(e)) => warn!("Offline record not written: {}", e),
        Err(_) => warn!("Offline record timed out"),
    }

    info!("Relay agent stopped ({})", processor.state().summary());
    outcome
}

/// Wait for Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, going offline"),
        _ = terminate => info!("Received SIGTERM, going offline"),
    }
}
