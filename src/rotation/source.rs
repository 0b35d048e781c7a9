use crate::config::types::{Config, SourceConfig};
use crate::naming::ObjectName;
use crate::remote::JobSpec;
use crate::upload::{ObjectHeader, HEADER_VERSION};
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::time::Duration;

/// One rotated log file and everything needed to ship it. Fixed for the
/// lifetime of the daemon.
#[derive(Debug, Clone)]
pub struct LogSource {
    pub id: String,
    pub service: String,
    pub instance: String,
    pub path: PathBuf,
    pub interval: Duration,
    pub log_type: String,
    pub job: JobSpec,
    pub staging_dir: PathBuf,
    pub data_dir: String,
}

impl LogSource {
    pub fn from_config(config: &Config, id: &str, source: &SourceConfig) -> Self {
        Self {
            id: id.to_string(),
            service: source.service.clone(),
            instance: source.instance.clone(),
            path: source.path.clone(),
            interval: source.interval,
            log_type: source.log_type.clone(),
            job: source.job.clone(),
            staging_dir: config.staging_dir(id),
            data_dir: config.data_dir.clone(),
        }
    }

    /// All sources in the config, ordered by id.
    pub fn all_from_config(config: &Config) -> Vec<Self> {
        let mut sources: Vec<Self> = config
            .sources
            .iter()
            .map(|(id, source)| Self::from_config(config, id, source))
            .collect();
        sources.sort_by(|a, b| a.id.cmp(&b.id));
        sources
    }

    pub fn object_name(&self, created: DateTime<Utc>) -> ObjectName {
        ObjectName::new(&self.service, &self.instance, &self.log_type, created)
    }

    /// True when a staged name was produced by this source.
    pub fn owns(&self, name: &ObjectName) -> bool {
        name.service == self.service
            && name.instance == self.instance
            && name.log_type == self.log_type
    }

    pub fn header(&self) -> ObjectHeader {
        ObjectHeader {
            service: self.service.clone(),
            instance: self.instance.clone(),
            interval: self.interval.as_millis() as u64,
            location: self.path.display().to_string(),
            log_type: self.log_type.clone(),
            version: HEADER_VERSION,
        }
    }
}
