use super::{
    EntryType, JobFilter, JobInfo, JobSpec, JobState, JobStatus, JobStats, ObjectBody, ObjectInfo,
    PutOptions, RemoteError, RemoteStore,
};
use crate::naming::remote_ancestors;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::io::AsyncReadExt;
use tokio::sync::Semaphore;
use uuid::Uuid;

/// Failure injected into the next PUT call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectedFault {
    /// 503 from the remote, retryable.
    Unavailable,
    /// Conditional write rejected, terminal.
    PreconditionFailed,
    /// The call panics.
    Panic,
}

impl InjectedFault {
    fn into_error(self, path: &str) -> RemoteError {
        match self {
            InjectedFault::Unavailable => RemoteError::Status {
                status: 503,
                message: format!("injected failure for {}", path),
            },
            InjectedFault::PreconditionFailed => {
                RemoteError::PreconditionFailed(format!("injected failure for {}", path))
            }
            InjectedFault::Panic => panic!("injected panic for {}", path),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MemoryJob {
    pub info: JobInfo,
    pub spec: Option<JobSpec>,
    pub keys: Vec<String>,
}

#[derive(Default)]
struct MemoryState {
    objects: BTreeMap<String, Vec<u8>>,
    directories: BTreeSet<String>,
    jobs: Vec<MemoryJob>,
    put_attempts: Vec<String>,
    put_faults: VecDeque<InjectedFault>,
    fail_paths: BTreeSet<String>,
    fail_job_calls: bool,
}

/// In-process remote store. Objects and jobs live in memory; failures can be
/// injected to exercise retry and dispatch paths.
#[derive(Default)]
pub struct MemoryRemoteStore {
    state: Mutex<MemoryState>,
    put_gate: Mutex<Option<Arc<Semaphore>>>,
}

impl MemoryRemoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Fail the next `count` PUT calls with `fault`.
    pub fn fail_next_puts(&self, count: usize, fault: InjectedFault) {
        let mut state = self.state();
        for _ in 0..count {
            state.put_faults.push_back(fault);
        }
    }

    /// Fail every PUT to `path` with a retryable error.
    pub fn fail_path(&self, path: &str) {
        self.state().fail_paths.insert(path.to_string());
    }

    /// Make every job query, creation and key addition fail.
    pub fn fail_job_calls(&self, fail: bool) {
        self.state().fail_job_calls = fail;
    }

    /// Hold every PUT until `release_puts` is called.
    pub fn block_puts(&self) {
        *self.put_gate.lock().unwrap_or_else(|e| e.into_inner()) =
            Some(Arc::new(Semaphore::new(0)));
    }

    pub fn release_puts(&self) {
        if let Some(gate) = self
            .put_gate
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            gate.add_permits(Semaphore::MAX_PERMITS / 2);
        }
    }

    pub fn create_dir(&self, path: &str) {
        let mut state = self.state();
        for dir in remote_ancestors(path) {
            state.directories.insert(dir);
        }
        state.directories.insert(path.to_string());
    }

    pub fn object(&self, path: &str) -> Option<Vec<u8>> {
        self.state().objects.get(path).cloned()
    }

    pub fn object_paths(&self) -> Vec<String> {
        self.state().objects.keys().cloned().collect()
    }

    /// Every path a PUT was attempted against, in call order.
    pub fn put_attempts(&self) -> Vec<String> {
        self.state().put_attempts.clone()
    }

    pub fn jobs(&self) -> Vec<MemoryJob> {
        self.state().jobs.clone()
    }

    /// Register an existing job, as if created by another dispatcher.
    pub fn seed_job(&self, name: &str, state: JobState, created_at: DateTime<Utc>) -> String {
        let id = Uuid::new_v4().to_string();
        self.state().jobs.push(MemoryJob {
            info: JobInfo {
                id: id.clone(),
                name: name.to_string(),
                state,
                created_at,
            },
            spec: None,
            keys: Vec::new(),
        });
        id
    }

    fn check_job_calls(&self, operation: &str) -> Result<(), RemoteError> {
        if self.state().fail_job_calls {
            return Err(RemoteError::Status {
                status: 500,
                message: format!("injected {} failure", operation),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteStore for MemoryRemoteStore {
    async fn put(
        &self,
        path: &str,
        mut body: ObjectBody,
        options: PutOptions,
    ) -> Result<(), RemoteError> {
        let fault = {
            let mut state = self.state();
            state.put_attempts.push(path.to_string());
            if state.fail_paths.contains(path) {
                Some(InjectedFault::Unavailable)
            } else {
                state.put_faults.pop_front()
            }
        };

        let gate = self
            .put_gate
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        if let Some(gate) = gate {
            let _permit = gate
                .acquire()
                .await
                .map_err(|e| RemoteError::Protocol(e.to_string()))?;
        }

        if let Some(fault) = fault {
            return Err(fault.into_error(path));
        }

        let mut bytes = Vec::new();
        body.read_to_end(&mut bytes).await?;

        let mut state = self.state();
        if state.directories.contains(path) {
            return Err(RemoteError::Status {
                status: 400,
                message: format!("{} is a directory", path),
            });
        }

        let parents = remote_ancestors(path);
        if options.mkdirs {
            for dir in parents {
                state.directories.insert(dir);
            }
        } else if let Some(parent) = parents.last() {
            if !state.directories.contains(parent) {
                return Err(RemoteError::NotFound(parent.clone()));
            }
        }

        state.objects.insert(path.to_string(), bytes);
        Ok(())
    }

    async fn info(&self, path: &str) -> Result<ObjectInfo, RemoteError> {
        let state = self.state();
        if state.directories.contains(path) {
            return Ok(ObjectInfo {
                path: path.to_string(),
                entry_type: EntryType::Directory,
                size: None,
            });
        }
        match state.objects.get(path) {
            Some(bytes) => Ok(ObjectInfo {
                path: path.to_string(),
                entry_type: EntryType::Object,
                size: Some(bytes.len() as u64),
            }),
            None => Err(RemoteError::NotFound(path.to_string())),
        }
    }

    async fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<JobInfo>, RemoteError> {
        self.check_job_calls("list jobs")?;
        Ok(self
            .state()
            .jobs
            .iter()
            .filter(|job| filter.matches(&job.info))
            .map(|job| job.info.clone())
            .collect())
    }

    async fn create_job(&self, spec: &JobSpec) -> Result<String, RemoteError> {
        self.check_job_calls("create job")?;
        let id = Uuid::new_v4().to_string();
        self.state().jobs.push(MemoryJob {
            info: JobInfo {
                id: id.clone(),
                name: spec.name.clone(),
                state: JobState::Running,
                created_at: Utc::now(),
            },
            spec: Some(spec.clone()),
            keys: Vec::new(),
        });
        Ok(id)
    }

    async fn add_job_keys(&self, job_id: &str, keys: &[String]) -> Result<(), RemoteError> {
        self.check_job_calls("add job keys")?;
        let mut state = self.state();
        let job = state
            .jobs
            .iter_mut()
            .find(|job| job.info.id == job_id)
            .ok_or_else(|| RemoteError::NotFound(job_id.to_string()))?;
        job.keys.extend(keys.iter().cloned());
        Ok(())
    }

    async fn job(&self, job_id: &str) -> Result<JobStatus, RemoteError> {
        let state = self.state();
        let job = state
            .jobs
            .iter()
            .find(|job| job.info.id == job_id)
            .ok_or_else(|| RemoteError::NotFound(job_id.to_string()))?;
        Ok(JobStatus {
            state: job.info.state,
            cancelled: false,
            stats: JobStats {
                tasks: job.keys.len() as u64,
                ..JobStats::default()
            },
        })
    }
}
