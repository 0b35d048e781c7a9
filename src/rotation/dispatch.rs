use crate::remote::{JobFilter, JobSpec, RemoteError, RemoteStore};
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("failed to query running jobs named {name}: {source}")]
    Query {
        name: String,
        #[source]
        source: RemoteError,
    },

    #[error("failed to create job {name}: {source}")]
    Create {
        name: String,
        #[source]
        source: RemoteError,
    },

    #[error("failed to add {count} keys to job {job_id}: {source}")]
    AddKeys {
        job_id: String,
        count: usize,
        #[source]
        source: RemoteError,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dispatched {
    pub job_id: String,
    /// True when no running job existed and a new one was created.
    pub created: bool,
}

/// Feeds uploaded object keys into the running job for a logical name.
///
/// Two dispatchers racing on the same name may both create a job. Jobs are
/// never ended here.
#[derive(Clone)]
pub struct JobDispatcher {
    store: Arc<dyn RemoteStore>,
}

impl JobDispatcher {
    pub fn new(store: Arc<dyn RemoteStore>) -> Self {
        Self { store }
    }

    pub async fn dispatch(
        &self,
        name: &str,
        spec: &JobSpec,
        keys: &[String],
    ) -> Result<Dispatched, DispatchError> {
        let running = self
            .store
            .list_jobs(&JobFilter::running(name))
            .await
            .map_err(|source| DispatchError::Query {
                name: name.to_string(),
                source,
            })?;

        let (job_id, created) = match running.into_iter().max_by_key(|job| job.created_at) {
            Some(job) => (job.id, false),
            None => {
                let mut spec = spec.clone();
                spec.name = name.to_string();
                let id = self
                    .store
                    .create_job(&spec)
                    .await
                    .map_err(|source| DispatchError::Create {
                        name: name.to_string(),
                        source,
                    })?;
                info!(job_name = %name, job_id = %id, "Created job");
                (id, true)
            }
        };

        self.store
            .add_job_keys(&job_id, keys)
            .await
            .map_err(|source| DispatchError::AddKeys {
                job_id: job_id.clone(),
                count: keys.len(),
                source,
            })?;

        info!(job_name = %name, job_id = %job_id, keys = keys.len(), "Added keys to job");
        Ok(Dispatched { job_id, created })
    }
}
