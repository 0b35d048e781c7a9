use super::source::LogSource;
use super::staging::StagingArea;
use chrono::{Duration as ChronoDuration, Utc};
use std::io;
use std::path::PathBuf;
use thiserror::Error;
use tracing::{info, warn};

/// Attempts at finding an unused staged name before giving up.
const NAME_ATTEMPTS: i64 = 16;

#[derive(Debug, Error)]
pub enum CycleError {
    #[error("failed to stat {path}: {source}")]
    Stat {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to copy {path} into staging: {source}")]
    Copy {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("no free staged name for {0}")]
    NameCollision(PathBuf),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Missing,
    Empty,
}

#[derive(Debug)]
pub enum RotationOutcome {
    Skipped(SkipReason),
    Rotated {
        staged: PathBuf,
        bytes: u64,
        /// Set when the live file could not be truncated after the copy.
        /// The staged copy is still valid and will be uploaded.
        truncate_error: Option<io::Error>,
    },
}

/// Copy the live file into staging and truncate it.
///
/// Data appended between the copy and the truncate is lost.
pub async fn run_cycle(source: &LogSource, staging: &StagingArea) -> Result<RotationOutcome, CycleError> {
    let metadata = match tokio::fs::metadata(&source.path).await {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            info!(source_id = %source.id, path = %source.path.display(), "Live log missing, not rotating");
            return Ok(RotationOutcome::Skipped(SkipReason::Missing));
        }
        Err(e) => {
            return Err(CycleError::Stat {
                path: source.path.clone(),
                source: e,
            })
        }
    };

    if metadata.len() == 0 {
        info!(source_id = %source.id, path = %source.path.display(), "Live log empty, not rotating");
        return Ok(RotationOutcome::Skipped(SkipReason::Empty));
    }

    let now = Utc::now();
    let mut staged = None;
    for bump in 0..NAME_ATTEMPTS {
        let name = source.object_name(now + ChronoDuration::milliseconds(bump));
        let copied = staging
            .stage_copy(&source.path, &name)
            .await
            .map_err(|e| CycleError::Copy {
                path: source.path.clone(),
                source: e,
            })?;
        if copied.is_some() {
            staged = copied;
            break;
        }
    }
    let (staged, bytes) = staged.ok_or_else(|| CycleError::NameCollision(source.path.clone()))?;

    let truncate_error = truncate(&source.path).await.err();
    if let Some(e) = &truncate_error {
        warn!(
            source_id = %source.id,
            path = %source.path.display(),
            error = %e,
            "Failed to truncate live log after copy"
        );
    }

    info!(
        source_id = %source.id,
        staged = %staged.display(),
        bytes = bytes,
        "Rotated live log"
    );

    Ok(RotationOutcome::Rotated {
        staged,
        bytes,
        truncate_error,
    })
}

async fn truncate(path: &std::path::Path) -> io::Result<()> {
    let file = tokio::fs::OpenOptions::new().write(true).open(path).await?;
    file.set_len(0).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rotation::source::tests::source_in;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_rotate_copies_and_truncates() {
        let dir = TempDir::new().unwrap();
        let source = source_in(dir.path());
        tokio::fs::write(&source.path, b"a\nb\n").await.unwrap();
        let staging = StagingArea::new(&source.staging_dir);
        staging.ensure().await.unwrap();

        let (staged, bytes, truncate_error) = match run_cycle(&source, &staging).await.unwrap() {
            RotationOutcome::Rotated {
                staged,
                bytes,
                truncate_error,
            } => (staged, bytes, truncate_error),
            other => panic!("expected rotation, got {:?}", other),
        };

        assert_eq!(bytes, 4);
        assert!(truncate_error.is_none());
        assert_eq!(tokio::fs::read(&staged).await.unwrap(), b"a\nb\n");
        assert_eq!(tokio::fs::metadata(&source.path).await.unwrap().len(), 0);

        let scan = staging.scan().await.unwrap();
        assert_eq!(scan.staged.len(), 1);
        assert!(source.owns(&scan.staged[0].name));
    }

    #[tokio::test]
    async fn test_missing_and_empty_live_files_are_skipped() {
        let dir = TempDir::new().unwrap();
        let source = source_in(dir.path());
        let staging = StagingArea::new(&source.staging_dir);
        staging.ensure().await.unwrap();

        let outcome = run_cycle(&source, &staging).await.unwrap();
        assert!(matches!(outcome, RotationOutcome::Skipped(SkipReason::Missing)));

        tokio::fs::write(&source.path, b"").await.unwrap();
        let outcome = run_cycle(&source, &staging).await.unwrap();
        assert!(matches!(outcome, RotationOutcome::Skipped(SkipReason::Empty)));
        assert!(staging.scan().await.unwrap().staged.is_empty());
    }

    #[tokio::test]
    async fn test_back_to_back_rotations_get_distinct_names() {
        let dir = TempDir::new().unwrap();
        let source = source_in(dir.path());
        let staging = StagingArea::new(&source.staging_dir);
        staging.ensure().await.unwrap();

        for line in ["one\n", "two\n", "three\n"] {
            tokio::fs::write(&source.path, line).await.unwrap();
            run_cycle(&source, &staging).await.unwrap();
        }
        assert_eq!(staging.scan().await.unwrap().staged.len(), 3);
    }

    #[tokio::test]
    async fn test_copy_failure_is_reported_without_truncating() {
        let dir = TempDir::new().unwrap();
        let source = source_in(dir.path());
        tokio::fs::write(&source.path, b"keep me\n").await.unwrap();
        // Staging directory never created, so the copy target cannot be opened.
        let staging = StagingArea::new(&source.staging_dir);

        let err = run_cycle(&source, &staging).await.unwrap_err();
        assert!(matches!(err, CycleError::Copy { .. }));
        assert_eq!(tokio::fs::read(&source.path).await.unwrap(), b"keep me\n");
    }
}
