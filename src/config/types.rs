use crate::remote::JobSpec;
use crate::upload::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub remote: RemoteConfig,
    /// Remote base directory. Defaults to `$MILL_DIR` or `/{account}/stor/mill`.
    #[serde(default)]
    pub data_dir: String,
    /// Local root for staging directories.
    #[serde(default = "default_rotate_dir")]
    pub rotate_dir: PathBuf,
    #[serde(default)]
    pub upload: UploadConfig,
    pub sources: HashMap<String, SourceConfig>,
}

fn default_rotate_dir() -> PathBuf {
    PathBuf::from("/var/tmp/mill")
}

/// Remote identity. Empty fields are filled from `MANTA_URL`, `MANTA_USER`
/// and `MANTA_KEY_ID` when the config is loaded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub account: String,
    #[serde(default)]
    pub key_id: String,
    #[serde(default = "default_signing_key")]
    pub signing_key: PathBuf,
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            account: String::new(),
            key_id: String::new(),
            signing_key: default_signing_key(),
            timeout: default_timeout(),
        }
    }
}

fn default_signing_key() -> PathBuf {
    PathBuf::from("~/.ssh/id_rsa")
}

fn default_timeout() -> Duration {
    Duration::from_secs(60)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    #[serde(flatten)]
    pub retry: RetryPolicy,
    /// Maximum concurrent uploads within one upload session. Unset means
    /// every staged file uploads at once.
    #[serde(default)]
    pub concurrency: Option<usize>,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            concurrency: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub service: String,
    #[serde(default = "default_instance")]
    pub instance: String,
    /// Live log file on disk.
    pub path: PathBuf,
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
    #[serde(default = "default_log_type")]
    pub log_type: String,
    pub job: JobSpec,
    /// Defaults to `{rotate_dir}/{source id}`.
    #[serde(default)]
    pub staging_dir: Option<PathBuf>,
}

pub fn default_instance() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.to_str().map(|s| s.to_string()))
        .unwrap_or_else(|| "localhost".to_string())
}

pub fn default_log_type() -> String {
    "generic".to_string()
}

impl Config {
    /// Staging directory for a source, falling back to `{rotate_dir}/{id}`.
    pub fn staging_dir(&self, source_id: &str) -> PathBuf {
        self.sources
            .get(source_id)
            .and_then(|s| s.staging_dir.clone())
            .unwrap_or_else(|| self.rotate_dir.join(source_id))
    }
}
