use crate::config::parse::load_config;
use crate::config::version::config_fingerprint;
use crate::remote::{HttpRemoteStore, RemoteStore};
use crate::rotation::{JobDispatcher, LogSource, SourceRunner, UploadSession};
use crate::upload::BackoffUploader;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::signal;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

#[derive(Debug, Error)]
pub enum RunError {
    #[error("config error: {0}")]
    Config(#[from] crate::config::parse::ConfigError),

    #[error("remote store error: {0}")]
    Remote(#[from] crate::remote::RemoteError),

    #[error("failed to listen for shutdown signal: {0}")]
    Signal(#[source] std::io::Error),
}

pub async fn run(config_path: Option<PathBuf>) -> Result<(), Box<dyn std::error::Error>> {
    let config_path = match config_path {
        Some(path) => path,
        None => {
            eprintln!("Error: config not found");
            eprintln!("Searched locations:");
            eprintln!("  ~/.config/mill/config.yml");
            eprintln!("  /etc/mill/config.yml");
            eprintln!("\nUse --config <path> to specify a config file, or run 'mill config init' to generate one.");
            std::process::exit(1);
        }
    };

    run_daemon(&config_path).await.map_err(|e| e.into())
}

async fn run_daemon(config_path: &Path) -> Result<(), RunError> {
    info!(config_path = %config_path.display(), "Loading configuration");

    let config = load_config(config_path)?;

    match config_fingerprint(config_path) {
        Ok(version) => info!(config_version = %version, "Configuration loaded"),
        Err(e) => warn!(error = %e, "Could not fingerprint config file"),
    }

    info!(url = %config.remote.url, account = %config.remote.account, "Connecting to remote store");
    let store: Arc<dyn RemoteStore> = Arc::new(HttpRemoteStore::new(&config.remote)?);
    let uploader = BackoffUploader::new(store.clone(), config.upload.retry.clone());
    let dispatcher = JobDispatcher::new(store);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut runners = JoinSet::new();

    for source in LogSource::all_from_config(&config) {
        info!(
            source_id = %source.id,
            service = %source.service,
            instance = %source.instance,
            staging_dir = %source.staging_dir.display(),
            "Creating source runner"
        );
        let session = UploadSession::new(
            source,
            uploader.clone(),
            dispatcher.clone(),
            config.upload.concurrency,
        );
        runners.spawn(SourceRunner::new(session).run(shutdown_rx.clone()));
    }

    info!(sources = runners.len(), "Mill started, press Ctrl+C to shutdown");

    tokio::select! {
        result = signal::ctrl_c() => {
            result.map_err(RunError::Signal)?;
            info!("Shutdown signal received");
        }
        Some(result) = runners.join_next() => {
            // Runners only return after shutdown, so an early exit is a panic.
            if let Err(e) = result {
                error!(error = %e, "Source runner task failed");
            }
        }
    }

    let _ = shutdown_tx.send(true);

    info!("Waiting for upload sessions to finish");
    while let Some(result) = runners.join_next().await {
        if let Err(e) = result {
            error!(error = %e, "Source runner task failed during shutdown");
        }
    }

    info!("Shutdown complete");
    Ok(())
}
