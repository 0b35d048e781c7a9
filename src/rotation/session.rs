use super::dispatch::{DispatchError, Dispatched, JobDispatcher};
use super::source::LogSource;
use super::staging::{StagedFile, StagingArea};
use crate::upload::{BackoffUploader, StagedPayload, UploadError};
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("failed to scan staging directory: {0}")]
    Scan(#[source] io::Error),

    #[error("failed to encode object header: {0}")]
    Header(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum UploadState {
    #[default]
    Idle,
    InFlight,
}

/// Per-source single-flight lock for upload sessions.
#[derive(Debug, Clone, Default)]
pub struct SessionGate {
    state: Arc<Mutex<UploadState>>,
}

impl SessionGate {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, UploadState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn state(&self) -> UploadState {
        *self.lock()
    }

    /// Move to `InFlight` unless a session is already running. The returned
    /// guard moves the state back to `Idle` when dropped.
    pub fn try_begin(&self) -> Option<SessionGuard> {
        let mut state = self.lock();
        match *state {
            UploadState::InFlight => None,
            UploadState::Idle => {
                *state = UploadState::InFlight;
                Some(SessionGuard {
                    state: self.state.clone(),
                })
            }
        }
    }
}

pub struct SessionGuard {
    state: Arc<Mutex<UploadState>>,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = UploadState::Idle;
    }
}

#[derive(Debug)]
pub struct SessionReport {
    pub session_id: Uuid,
    pub staged: usize,
    pub malformed: usize,
    pub uploaded: usize,
    pub failed: usize,
    pub deleted: usize,
    /// Remote paths written in this session.
    pub keys: Vec<String>,
    /// None when nothing was uploaded.
    pub dispatch: Option<Result<Dispatched, DispatchError>>,
}

impl SessionReport {
    fn new(session_id: Uuid) -> Self {
        Self {
            session_id,
            staged: 0,
            malformed: 0,
            uploaded: 0,
            failed: 0,
            deleted: 0,
            keys: Vec::new(),
            dispatch: None,
        }
    }
}

#[derive(Debug)]
pub enum SessionOutcome {
    AlreadyRunning,
    Completed(SessionReport),
}

/// Uploads everything in one source's staging area, hands the uploaded keys
/// to the job dispatcher, then deletes what was uploaded.
pub struct UploadSession {
    source: LogSource,
    staging: StagingArea,
    uploader: BackoffUploader,
    dispatcher: JobDispatcher,
    concurrency: Option<usize>,
    gate: SessionGate,
}

impl UploadSession {
    pub fn new(
        source: LogSource,
        uploader: BackoffUploader,
        dispatcher: JobDispatcher,
        concurrency: Option<usize>,
    ) -> Self {
        let staging = StagingArea::new(&source.staging_dir);
        Self {
            source,
            staging,
            uploader,
            dispatcher,
            concurrency: concurrency.map(|n| n.max(1)),
            gate: SessionGate::new(),
        }
    }

    pub fn source(&self) -> &LogSource {
        &self.source
    }

    pub fn staging(&self) -> &StagingArea {
        &self.staging
    }

    pub fn gate(&self) -> &SessionGate {
        &self.gate
    }

    pub async fn run(&self) -> Result<SessionOutcome, SessionError> {
        let Some(_guard) = self.gate.try_begin() else {
            info!(source_id = %self.source.id, "Upload session already in flight, skipping");
            return Ok(SessionOutcome::AlreadyRunning);
        };

        let session_id = Uuid::new_v4();
        let mut report = SessionReport::new(session_id);

        let scan = self.staging.scan().await.map_err(SessionError::Scan)?;
        for bad in &scan.malformed {
            warn!(
                source_id = %self.source.id,
                session_id = %session_id,
                file = %bad.name,
                reason = bad.reason,
                "Skipping malformed staged file"
            );
        }
        report.malformed = scan.malformed.len();

        let (files, foreign): (Vec<StagedFile>, Vec<StagedFile>) = scan
            .staged
            .into_iter()
            .partition(|file| self.source.owns(&file.name));
        for file in &foreign {
            warn!(
                source_id = %self.source.id,
                session_id = %session_id,
                file = %file.path.display(),
                "Skipping staged file written for another source"
            );
        }
        report.malformed += foreign.len();
        report.staged = files.len();

        if files.is_empty() {
            debug!(source_id = %self.source.id, session_id = %session_id, "Nothing staged");
            return Ok(SessionOutcome::Completed(report));
        }

        let header = self.source.header().to_line()?;
        let uploaded = self.upload_all(files, header, session_id).await;

        report.uploaded = uploaded.len();
        report.failed = report.staged - report.uploaded;
        report.keys = uploaded.iter().map(|(_, key)| key.clone()).collect();

        if !report.keys.is_empty() {
            let result = self
                .dispatcher
                .dispatch(&self.source.job.name, &self.source.job, &report.keys)
                .await;
            if let Err(e) = &result {
                error!(
                    source_id = %self.source.id,
                    session_id = %session_id,
                    error = %e,
                    "Job dispatch failed"
                );
            }
            report.dispatch = Some(result);
        }

        for (file, _) in &uploaded {
            match self.staging.remove(file).await {
                Ok(()) => report.deleted += 1,
                Err(e) => warn!(
                    source_id = %self.source.id,
                    session_id = %session_id,
                    file = %file.path.display(),
                    error = %e,
                    "Failed to delete uploaded staged file"
                ),
            }
        }

        info!(
            source_id = %self.source.id,
            session_id = %session_id,
            staged = report.staged,
            uploaded = report.uploaded,
            deleted = report.deleted,
            failed = report.failed,
            malformed = report.malformed,
            "Upload session complete"
        );

        Ok(SessionOutcome::Completed(report))
    }

    /// Upload every file, at most `concurrency` at a time when a bound is set,
    /// and wait for all of them. Returns the files that were uploaded with their remote paths.
    async fn upload_all(
        &self,
        files: Vec<StagedFile>,
        header: String,
        session_id: Uuid,
    ) -> Vec<(StagedFile, String)> {
        let permits = Arc::new(Semaphore::new(
            self.concurrency.unwrap_or(Semaphore::MAX_PERMITS),
        ));
        let mut tasks = JoinSet::new();

        for file in files {
            let permits = permits.clone();
            let uploader = self.uploader.clone();
            let header = header.clone();
            let remote_path = file.name.remote_path(&self.source.data_dir);

            tasks.spawn(async move {
                let _permit = permits.acquire().await;
                let result = upload_one(&uploader, &file, &remote_path, header).await;
                (file, remote_path, result)
            });
        }

        let mut uploaded = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((file, remote_path, Ok(()))) => {
                    debug!(session_id = %session_id, path = %remote_path, "Uploaded staged file");
                    uploaded.push((file, remote_path));
                }
                Ok((file, _, Err(e))) => {
                    error!(
                        source_id = %self.source.id,
                        session_id = %session_id,
                        file = %file.path.display(),
                        error = %e,
                        "Upload failed, keeping staged file"
                    );
                }
                Err(e) => {
                    error!(session_id = %session_id, error = %e, "Upload task failed");
                }
            }
        }

        uploaded.sort_by(|a, b| a.0.name.created.cmp(&b.0.name.created));
        uploaded
    }
}

#[derive(Debug, Error)]
enum FileUploadError {
    #[error("failed to read staged file: {0}")]
    Read(#[from] io::Error),

    #[error(transparent)]
    Upload(#[from] UploadError),
}

async fn upload_one(
    uploader: &BackoffUploader,
    file: &StagedFile,
    remote_path: &str,
    header: String,
) -> Result<(), FileUploadError> {
    let payload = StagedPayload::new(&file.path, header).await?;
    uploader.upload(remote_path, &payload).await?;
    Ok(())
}
