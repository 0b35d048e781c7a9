use crate::backfill::{run_backfill, BackfillOptions};
use crate::config::types::default_instance;
use crate::config::{load_config, remote_from_env, RemoteConfig};
use crate::remote::HttpRemoteStore;
use crate::upload::{BackoffUploader, RetryPolicy};
use clap::Args;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufRead, BufReader};
use tracing::{error, info};

#[derive(Debug, Args)]
pub struct BackfillArgs {
    /// Read lines from this file instead of stdin
    #[arg(long)]
    pub input: Option<PathBuf>,

    #[arg(long, env = "MILL_SERVICE")]
    pub service: String,

    /// Defaults to the hostname
    #[arg(long, env = "MILL_INSTANCE")]
    pub instance: Option<String>,

    #[arg(long, env = "MILL_LOG_TYPE", default_value = "generic")]
    pub log_type: String,

    /// Bucket length in milliseconds
    #[arg(long, env = "MILL_INTERVAL", default_value_t = 10_000)]
    pub interval: i64,

    /// Remote base directory, defaults to the config's data_dir
    #[arg(long, env = "MILL_DIR")]
    pub data_dir: Option<String>,

    /// Write final object names instead of `.t` names
    #[arg(long)]
    pub final_names: bool,

    /// Buckets allowed to upload while the next one fills
    #[arg(long, default_value_t = 1)]
    pub max_in_flight: usize,
}

pub async fn backfill(
    config_path: Option<PathBuf>,
    args: BackfillArgs,
) -> Result<(), Box<dyn std::error::Error>> {
    if args.interval <= 0 {
        return Err("--interval must be a positive number of milliseconds".into());
    }

    let (remote, retry, config_data_dir) = remote_settings(config_path.as_deref())?;
    let data_dir = args
        .data_dir
        .clone()
        .unwrap_or(config_data_dir)
        .trim_end_matches('/')
        .to_string();

    let instance = args.instance.clone().unwrap_or_else(default_instance);
    let options = BackfillOptions {
        service: args.service.clone(),
        instance,
        log_type: args.log_type.clone(),
        data_dir,
        interval_ms: args.interval,
        final_names: args.final_names,
        max_in_flight: args.max_in_flight,
    };

    let store = Arc::new(HttpRemoteStore::new(&remote)?);
    let uploader = BackoffUploader::new(store, retry);

    let input: Box<dyn AsyncBufRead + Unpin + Send> = match &args.input {
        Some(path) => {
            info!(input = %path.display(), "Reading backfill input");
            Box::new(BufReader::new(tokio::fs::File::open(path).await?))
        }
        None => Box::new(BufReader::new(tokio::io::stdin())),
    };

    let report = run_backfill(input, uploader, options).await?;

    for failed in &report.failed {
        error!(
            start_ms = failed.start_ms,
            path = failed.path.as_deref().unwrap_or("-"),
            error = %failed.error,
            "Bucket was not uploaded"
        );
    }

    println!(
        "{} lines, {} buckets, {} uploaded, {} failed",
        report.lines,
        report.buckets,
        report.uploaded.len(),
        report.failed.len()
    );

    if report.is_success() {
        Ok(())
    } else {
        Err(format!("{} buckets failed to upload", report.failed.len()).into())
    }
}

/// Remote identity, retry policy and default data dir, from the config file
/// when one was found and from the environment otherwise.
pub(crate) fn remote_settings(
    config_path: Option<&Path>,
) -> Result<(RemoteConfig, RetryPolicy, String), Box<dyn std::error::Error>> {
    match config_path {
        Some(path) => {
            let config = load_config(path)?;
            Ok((config.remote, config.upload.retry, config.data_dir))
        }
        None => {
            let remote = remote_from_env(&|name: &str| std::env::var(name).ok().filter(|v| !v.is_empty()))?;
            let data_dir = format!("/{}/stor/mill", remote.account);
            Ok((remote, RetryPolicy::default(), data_dir))
        }
    }
}
