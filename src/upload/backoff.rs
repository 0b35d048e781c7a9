use super::payload::Payload;
use crate::remote::{EntryType, PutOptions, RemoteError, RemoteStore};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, warn};

/// Exponential backoff settings for a single object upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    #[serde(default = "default_initial_delay", with = "humantime_serde")]
    pub initial_delay: Duration,
    #[serde(default = "default_max_delay", with = "humantime_serde")]
    pub max_delay: Duration,
    /// Total attempts, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(10)
}

fn default_max_attempts() -> u32 {
    5
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            max_attempts: default_max_attempts(),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (1-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.initial_delay
            .checked_mul(factor)
            .map_or(self.max_delay, |d| d.min(self.max_delay))
    }
}

/// Why a single attempt failed.
#[derive(Debug, Error)]
pub enum AttemptError {
    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error("failed to open upload payload: {0}")]
    Payload(#[from] std::io::Error),

    #[error("target exists as a directory")]
    Directory,
}

impl AttemptError {
    fn is_retryable(&self) -> bool {
        match self {
            AttemptError::Remote(e) => e.is_retryable(),
            AttemptError::Payload(_) => true,
            AttemptError::Directory => false,
        }
    }
}

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("upload to {path} rejected: {source}")]
    Rejected {
        path: String,
        #[source]
        source: RemoteError,
    },

    #[error("upload to {path} failed after {attempts} attempts: {source}")]
    Exhausted {
        path: String,
        attempts: u32,
        #[source]
        source: AttemptError,
    },

    #[error("upload target {0} is a directory")]
    TargetIsDirectory(String),
}

/// Uploads one payload to one remote path, retrying transient failures.
#[derive(Clone)]
pub struct BackoffUploader {
    store: Arc<dyn RemoteStore>,
    policy: RetryPolicy,
}

impl BackoffUploader {
    pub fn new(store: Arc<dyn RemoteStore>, policy: RetryPolicy) -> Self {
        Self { store, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub async fn upload(&self, path: &str, payload: &dyn Payload) -> Result<(), UploadError> {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            match self.attempt(path, payload).await {
                Ok(()) => {
                    debug!(path = %path, attempt = attempt, "Upload complete");
                    return Ok(());
                }
                Err(AttemptError::Directory) => {
                    error!(path = %path, "Upload target is a directory");
                    return Err(UploadError::TargetIsDirectory(path.to_string()));
                }
                Err(AttemptError::Remote(RemoteError::PreconditionFailed(msg))) => {
                    error!(path = %path, attempt = attempt, error = %msg, "Upload rejected");
                    return Err(UploadError::Rejected {
                        path: path.to_string(),
                        source: RemoteError::PreconditionFailed(msg),
                    });
                }
                Err(e) if !e.is_retryable() || attempt >= max_attempts => {
                    error!(
                        path = %path,
                        attempts = attempt,
                        error = %e,
                        "Max upload attempts exceeded"
                    );
                    return Err(UploadError::Exhausted {
                        path: path.to_string(),
                        attempts: attempt,
                        source: e,
                    });
                }
                Err(e) => {
                    let backoff = self.policy.delay_for(attempt);
                    warn!(
                        path = %path,
                        attempt = attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "Upload failed, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }

    async fn attempt(&self, path: &str, payload: &dyn Payload) -> Result<(), AttemptError> {
        match self.store.info(path).await {
            Ok(info) if info.entry_type == EntryType::Directory => {
                return Err(AttemptError::Directory);
            }
            Ok(_) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e.into()),
        }

        let body = payload.open().await?;
        let options = PutOptions {
            mkdirs: true,
            size: payload.size_hint(),
        };
        self.store.put(path, body, options).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::{InjectedFault, MemoryRemoteStore};
    use crate::upload::BytesPayload;

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
            max_attempts,
        }
    }

    const PATH: &str = "/acct/stor/mill/logs/www/2023/11/14/22/web0-1700000000000.nginx.log";

    #[test]
    fn test_delay_doubles_up_to_cap() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for(4), Duration::from_secs(8));
        assert_eq!(policy.delay_for(5), Duration::from_secs(10));
        assert_eq!(policy.delay_for(40), Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_always_failing_store_stops_at_max_attempts() {
        let store = Arc::new(MemoryRemoteStore::new());
        store.fail_path(PATH);
        let uploader = BackoffUploader::new(store.clone(), fast_policy(5));

        let err = uploader
            .upload(PATH, &BytesPayload::new(b"x".to_vec()))
            .await
            .unwrap_err();

        assert!(matches!(err, UploadError::Exhausted { attempts: 5, .. }));
        assert_eq!(store.put_attempts().len(), 5);
        assert!(store.object(PATH).is_none());
    }

    #[tokio::test]
    async fn test_fail_once_succeeds_on_second_attempt() {
        let store = Arc::new(MemoryRemoteStore::new());
        store.fail_next_puts(1, InjectedFault::Unavailable);
        let uploader = BackoffUploader::new(store.clone(), fast_policy(5));

        uploader
            .upload(PATH, &BytesPayload::new(b"payload".to_vec()))
            .await
            .unwrap();

        assert_eq!(store.put_attempts().len(), 2);
        assert_eq!(store.object(PATH).unwrap(), b"payload");
    }

    #[tokio::test]
    async fn test_precondition_failure_is_not_retried() {
        let store = Arc::new(MemoryRemoteStore::new());
        store.fail_next_puts(1, InjectedFault::PreconditionFailed);
        let uploader = BackoffUploader::new(store.clone(), fast_policy(5));

        let err = uploader
            .upload(PATH, &BytesPayload::new(b"x".to_vec()))
            .await
            .unwrap_err();

        assert!(matches!(err, UploadError::Rejected { .. }));
        assert_eq!(store.put_attempts().len(), 1);
    }

    #[tokio::test]
    async fn test_directory_target_is_terminal() {
        let store = Arc::new(MemoryRemoteStore::new());
        store.create_dir(PATH);
        let uploader = BackoffUploader::new(store.clone(), fast_policy(5));

        let err = uploader
            .upload(PATH, &BytesPayload::new(b"x".to_vec()))
            .await
            .unwrap_err();

        assert!(matches!(err, UploadError::TargetIsDirectory(_)));
        assert!(store.put_attempts().is_empty());
    }
}
