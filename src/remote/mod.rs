pub mod http;
pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::AsyncRead;

pub use http::HttpRemoteStore;
pub use memory::{InjectedFault, MemoryRemoteStore};

/// Body handed to a single PUT. Opened fresh for every attempt.
pub type ObjectBody = Box<dyn AsyncRead + Send + Sync + Unpin>;

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization/deserialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0} not found")]
    NotFound(String),

    #[error("precondition failed: {0}")]
    PreconditionFailed(String),

    #[error("remote returned error status {status}: {message}")]
    Status { status: u16, message: String },

    #[error("unexpected response: {0}")]
    Protocol(String),

    #[error("invalid signing key {0}")]
    Key(String),
}

impl RemoteError {
    /// A precondition failure will fail the same way on every retry; every
    /// other error (transport, 5xx, timeouts) may succeed on a later attempt.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, RemoteError::PreconditionFailed(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, RemoteError::NotFound(_))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PutOptions {
    /// Create missing parent directories before writing.
    pub mkdirs: bool,
    pub size: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryType {
    Object,
    Directory,
}

#[derive(Debug, Clone)]
pub struct ObjectInfo {
    pub path: String,
    pub entry_type: EntryType,
    pub size: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Queued,
    Running,
    Done,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::Running => "running",
            JobState::Done => "done",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobInfo {
    pub id: String,
    pub name: String,
    pub state: JobState,
    #[serde(alias = "timeCreated")]
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    pub name: Option<String>,
    pub state: Option<JobState>,
}

impl JobFilter {
    pub fn running(name: &str) -> Self {
        Self {
            name: Some(name.to_string()),
            state: Some(JobState::Running),
        }
    }

    pub fn matches(&self, job: &JobInfo) -> bool {
        self.name.as_ref().map_or(true, |n| *n == job.name)
            && self.state.map_or(true, |s| s == job.state)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PhaseKind {
    Map,
    Reduce,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobPhase {
    #[serde(rename = "type")]
    pub kind: PhaseKind,
    pub exec: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<u32>,
}

/// Definition of a downstream processing job. The name doubles as the logical
/// job name used to find a running job before creating a new one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSpec {
    pub name: String,
    pub phases: Vec<JobPhase>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct JobStats {
    pub errors: u64,
    pub outputs: u64,
    pub retries: u64,
    pub tasks: u64,
    pub tasks_done: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatus {
    pub state: JobState,
    #[serde(default)]
    pub cancelled: bool,
    #[serde(default)]
    pub stats: JobStats,
}

/// Client side of the remote object store and compute-job service.
///
/// Implementations are shared across every log source, so they must be safe
/// to call concurrently.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn put(&self, path: &str, body: ObjectBody, options: PutOptions)
        -> Result<(), RemoteError>;

    async fn info(&self, path: &str) -> Result<ObjectInfo, RemoteError>;

    async fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<JobInfo>, RemoteError>;

    async fn create_job(&self, spec: &JobSpec) -> Result<String, RemoteError>;

    async fn add_job_keys(&self, job_id: &str, keys: &[String]) -> Result<(), RemoteError>;

    async fn job(&self, job_id: &str) -> Result<JobStatus, RemoteError>;
}
