use chrono::{DateTime, Datelike, Timelike, Utc};
use thiserror::Error;

/// Suffix appended to objects written by the streaming backfill path.
pub const TEMPORARY_SUFFIX: &str = ".t";

const LOG_SUFFIX: &str = ".log";

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("malformed staged file name '{name}': {reason}")]
pub struct MalformedName {
    pub name: String,
    pub reason: &'static str,
}

impl MalformedName {
    fn new(name: &str, reason: &'static str) -> Self {
        Self {
            name: name.to_string(),
            reason,
        }
    }
}

/// Identity of one rotated log object: who wrote it, what kind of log it is,
/// and the millisecond timestamp it was cut at.
///
/// Both the staged file name and the remote object path are pure functions of
/// this value, so a file that is re-uploaded after a crash always lands on the
/// same remote key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectName {
    pub service: String,
    pub instance: String,
    pub log_type: String,
    pub created: DateTime<Utc>,
}

impl ObjectName {
    pub fn new(
        service: impl Into<String>,
        instance: impl Into<String>,
        log_type: impl Into<String>,
        created: DateTime<Utc>,
    ) -> Self {
        Self {
            service: service.into(),
            instance: instance.into(),
            log_type: log_type.into(),
            created,
        }
    }

    /// Build a name from a millisecond epoch timestamp.
    /// Returns None when the timestamp is outside chrono's representable range.
    pub fn at_millis(
        service: impl Into<String>,
        instance: impl Into<String>,
        log_type: impl Into<String>,
        timestamp_ms: i64,
    ) -> Option<Self> {
        let created = DateTime::from_timestamp_millis(timestamp_ms)?;
        Some(Self::new(service, instance, log_type, created))
    }

    pub fn timestamp_ms(&self) -> i64 {
        self.created.timestamp_millis()
    }

    /// `{service}:{instance}:{timestampMs}.{logType}.log`
    pub fn staged_file_name(&self) -> String {
        format!(
            "{}:{}:{}.{}{}",
            self.service,
            self.instance,
            self.timestamp_ms(),
            self.log_type,
            LOG_SUFFIX
        )
    }

    /// Parse a staged file name back into its identity.
    pub fn parse_staged(name: &str) -> Result<Self, MalformedName> {
        let stem = name
            .strip_suffix(LOG_SUFFIX)
            .ok_or_else(|| MalformedName::new(name, "missing .log suffix"))?;

        let mut parts = stem.splitn(3, ':');
        let service = parts.next().unwrap_or_default();
        let instance = parts
            .next()
            .ok_or_else(|| MalformedName::new(name, "missing instance"))?;
        let rest = parts
            .next()
            .ok_or_else(|| MalformedName::new(name, "missing timestamp"))?;

        if service.is_empty() || instance.is_empty() {
            return Err(MalformedName::new(name, "empty service or instance"));
        }

        let (ts, log_type) = rest
            .split_once('.')
            .ok_or_else(|| MalformedName::new(name, "missing log type"))?;

        if log_type.is_empty() || log_type.contains(':') {
            return Err(MalformedName::new(name, "invalid log type"));
        }
        if ts.is_empty() || !ts.bytes().all(|b| b.is_ascii_digit()) {
            return Err(MalformedName::new(name, "timestamp is not a decimal number"));
        }

        let timestamp_ms: i64 = ts
            .parse()
            .map_err(|_| MalformedName::new(name, "timestamp out of range"))?;

        Self::at_millis(service, instance, log_type, timestamp_ms)
            .ok_or_else(|| MalformedName::new(name, "timestamp out of range"))
    }

    /// `{dataDir}/logs/{service}/{yyyy}/{mm}/{dd}/{hh}/{instance}-{timestampMs}.{logType}.log`
    pub fn remote_path(&self, data_dir: &str) -> String {
        let t = self.created;
        format!(
            "{}/logs/{}/{}/{:02}/{:02}/{:02}/{}-{}.{}{}",
            data_dir.trim_end_matches('/'),
            self.service,
            t.year(),
            t.month(),
            t.day(),
            t.hour(),
            self.instance,
            self.timestamp_ms(),
            self.log_type,
            LOG_SUFFIX
        )
    }

    /// Remote path with the `.t` suffix used by the backfill entry point.
    pub fn temporary_remote_path(&self, data_dir: &str) -> String {
        let mut path = self.remote_path(data_dir);
        path.push_str(TEMPORARY_SUFFIX);
        path
    }
}

/// Parent directories of a remote object path, shallowest first, excluding
/// the root. `/a/stor/x/y.log` yields `/a`, `/a/stor`, `/a/stor/x`.
pub fn remote_ancestors(path: &str) -> Vec<String> {
    let mut ancestors = Vec::new();
    let mut end = 0;
    while let Some(offset) = path.get(end + 1..).and_then(|rest| rest.find('/')) {
        end += offset + 1;
        ancestors.push(path[..end].to_string());
    }
    ancestors
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_staged_name_round_trip() {
        let name = ObjectName::parse_staged("svcA:inst1:1700000000000.generic.log").unwrap();
        assert_eq!(name.service, "svcA");
        assert_eq!(name.instance, "inst1");
        assert_eq!(name.log_type, "generic");
        assert_eq!(name.timestamp_ms(), 1_700_000_000_000);
        assert_eq!(name.staged_file_name(), "svcA:inst1:1700000000000.generic.log");
    }

    #[test]
    fn test_remote_path_partitions_by_utc_hour() {
        let name = ObjectName::parse_staged("svcA:inst1:1700000000000.generic.log").unwrap();
        let path = name.remote_path("/acct/stor/mill");
        assert_eq!(
            path,
            "/acct/stor/mill/logs/svcA/2023/11/14/22/inst1-1700000000000.generic.log"
        );
    }

    #[test]
    fn test_remote_path_is_deterministic() {
        let a = ObjectName::parse_staged("svcA:inst1:1700000000000.generic.log").unwrap();
        let b = ObjectName::parse_staged("svcA:inst1:1700000000000.generic.log").unwrap();
        assert_eq!(a.remote_path("/d"), b.remote_path("/d"));
        assert_eq!(a.remote_path("/d/"), a.remote_path("/d"));
    }

    #[test]
    fn test_temporary_suffix() {
        let created = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap();
        let name = ObjectName::new("web", "w0", "nginx", created);
        let path = name.temporary_remote_path("/acct/stor/mill");
        assert!(path.starts_with("/acct/stor/mill/logs/web/2026/01/02/03/w0-"));
        assert!(path.ends_with(".nginx.log.t"));
    }

    #[test]
    fn test_malformed_names() {
        for bad in [
            "notes.txt",
            "svc:inst.generic.log",
            "svc:inst:abc.generic.log",
            "svc:inst:123.log",
            ":inst:123.generic.log",
            "svc:inst:-5.generic.log",
            "svc:inst:99999999999999999999999.generic.log",
        ] {
            assert!(ObjectName::parse_staged(bad).is_err(), "{bad} should be malformed");
        }
    }

    #[test]
    fn test_remote_ancestors() {
        assert_eq!(
            remote_ancestors("/a/stor/x/y.log"),
            vec!["/a".to_string(), "/a/stor".to_string(), "/a/stor/x".to_string()]
        );
        assert!(remote_ancestors("/y.log").is_empty());
    }
}
