use super::bucket::{TimeBucket, TimeBucketer};
use crate::naming::ObjectName;
use crate::upload::{BackoffUploader, UploadError};
use chrono::Utc;
use std::collections::BTreeMap;
use std::io;
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info};

#[derive(Debug, Error)]
pub enum BackfillError {
    /// Input failed mid-stream. Buckets closed before the failure, and the
    /// one still open, were uploaded before this was returned.
    #[error("failed to read input after {} lines: {source}", .report.lines)]
    Read {
        source: io::Error,
        report: Box<BackfillReport>,
    },

    #[error("upload slots closed")]
    SlotsClosed,
}

#[derive(Debug, Clone)]
pub struct BackfillOptions {
    pub service: String,
    pub instance: String,
    pub log_type: String,
    pub data_dir: String,
    pub interval_ms: i64,
    /// Write final object names instead of the `.t` temporary names.
    pub final_names: bool,
    /// Closed buckets allowed to upload at once. Reading stops while all
    /// slots are taken.
    pub max_in_flight: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedBucket {
    pub start_ms: i64,
    pub path: Option<String>,
    pub error: String,
}

#[derive(Debug, Default)]
pub struct BackfillReport {
    pub lines: u64,
    pub buckets: usize,
    /// Remote paths written, in bucket order.
    pub uploaded: Vec<String>,
    pub failed: Vec<FailedBucket>,
}

impl BackfillReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

#[derive(Debug, Error)]
enum BucketUploadError {
    #[error("bucket start {0} is not a representable timestamp")]
    Timestamp(i64),

    #[error(transparent)]
    Upload(#[from] UploadError),

    #[error("upload task failed: {0}")]
    Task(String),
}

type BucketResult = (usize, i64, Result<String, BucketUploadError>);

/// Read lines from `input`, cut them into buckets and upload each bucket as
/// one object. Returns once every upload has finished, including when the
/// input fails part way through.
///
/// Lines are split on `\n` and decoded lossily, so bytes that are not UTF-8
/// become U+FFFD instead of ending the run.
pub async fn run_backfill<R>(
    mut input: R,
    uploader: BackoffUploader,
    options: BackfillOptions,
) -> Result<BackfillReport, BackfillError>
where
    R: AsyncBufRead + Unpin,
{
    let started_ms = Utc::now().timestamp_millis();
    let options = Arc::new(options);
    let slots = Arc::new(Semaphore::new(options.max_in_flight.max(1)));
    let mut uploads: JoinSet<BucketResult> = JoinSet::new();
    let mut pending: BTreeMap<usize, i64> = BTreeMap::new();
    let mut bucketer = TimeBucketer::new(options.interval_ms);
    let mut report = BackfillReport::default();

    info!(
        service = %options.service,
        instance = %options.instance,
        interval_ms = options.interval_ms,
        "Starting backfill"
    );

    let mut buf = Vec::new();
    let read_error = loop {
        buf.clear();
        // On error, bytes read before the failure are still in `buf`.
        let (line, failed) = match input.read_until(b'\n', &mut buf).await {
            Ok(0) => break None,
            Ok(_) => (decode_line(&buf), None),
            Err(e) if buf.is_empty() => break Some(e),
            Err(e) => (decode_line(&buf), Some(e)),
        };
        report.lines += 1;
        if let Some(bucket) = bucketer.push(line) {
            pending.insert(report.buckets, bucket.start_ms);
            spawn_upload(&mut uploads, &slots, &uploader, &options, report.buckets, bucket).await?;
            report.buckets += 1;
        }
        if failed.is_some() {
            break failed;
        }
    };
    if let Some(e) = &read_error {
        error!(error = %e, lines = report.lines, "Input read failed, flushing open bucket");
    }

    if let Some(bucket) = bucketer.finish(started_ms) {
        pending.insert(report.buckets, bucket.start_ms);
        spawn_upload(&mut uploads, &slots, &uploader, &options, report.buckets, bucket).await?;
        report.buckets += 1;
    }

    debug!(buckets = report.buckets, "Input drained, waiting for uploads");

    let mut done = Vec::with_capacity(report.buckets);
    let mut lost = None;
    while let Some(joined) = uploads.join_next().await {
        match joined {
            Ok(result) => {
                pending.remove(&result.0);
                done.push(result);
            }
            Err(e) => {
                error!(error = %e, "Bucket upload task failed");
                lost = Some(e.to_string());
            }
        }
    }
    // Tasks that never reported back still have their bucket start.
    let lost = lost.unwrap_or_else(|| "upload task did not finish".to_string());
    for (seq, start_ms) in pending {
        done.push((seq, start_ms, Err(BucketUploadError::Task(lost.clone()))));
    }
    done.sort_by_key(|(seq, _, _)| *seq);

    for (_, start_ms, result) in done {
        match result {
            Ok(path) => report.uploaded.push(path),
            Err(e) => {
                let path = match &e {
                    BucketUploadError::Upload(UploadError::Rejected { path, .. })
                    | BucketUploadError::Upload(UploadError::Exhausted { path, .. })
                    | BucketUploadError::Upload(UploadError::TargetIsDirectory(path)) => {
                        Some(path.clone())
                    }
                    BucketUploadError::Timestamp(_) | BucketUploadError::Task(_) => None,
                };
                report.failed.push(FailedBucket {
                    start_ms,
                    path,
                    error: e.to_string(),
                });
            }
        }
    }

    info!(
        lines = report.lines,
        buckets = report.buckets,
        uploaded = report.uploaded.len(),
        failed = report.failed.len(),
        "Backfill complete"
    );

    match read_error {
        Some(source) => Err(BackfillError::Read {
            source,
            report: Box::new(report),
        }),
        None => Ok(report),
    }
}

/// One line without its `\n` or `\r\n` terminator.
fn decode_line(raw: &[u8]) -> String {
    let raw = raw.strip_suffix(b"\n").unwrap_or(raw);
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    String::from_utf8_lossy(raw).into_owned()
}

/// Wait for an upload slot, then upload `bucket` in the background.
async fn spawn_upload(
    uploads: &mut JoinSet<BucketResult>,
    slots: &Arc<Semaphore>,
    uploader: &BackoffUploader,
    options: &Arc<BackfillOptions>,
    seq: usize,
    bucket: TimeBucket,
) -> Result<(), BackfillError> {
    let permit = slots
        .clone()
        .acquire_owned()
        .await
        .map_err(|_| BackfillError::SlotsClosed)?;

    let uploader = uploader.clone();
    let options = options.clone();
    uploads.spawn(async move {
        let _permit = permit;
        let start_ms = bucket.start_ms;
        // Run the upload in its own task so a panic still reports this bucket.
        let upload = tokio::spawn(async move { upload_bucket(&uploader, &options, &bucket).await });
        let result = match upload.await {
            Ok(result) => result,
            Err(e) => Err(BucketUploadError::Task(e.to_string())),
        };
        (seq, start_ms, result)
    });
    Ok(())
}

async fn upload_bucket(
    uploader: &BackoffUploader,
    options: &BackfillOptions,
    bucket: &TimeBucket,
) -> Result<String, BucketUploadError> {
    let name = ObjectName::at_millis(
        &options.service,
        &options.instance,
        &options.log_type,
        bucket.start_ms,
    )
    .ok_or(BucketUploadError::Timestamp(bucket.start_ms))?;

    let path = if options.final_names {
        name.remote_path(&options.data_dir)
    } else {
        name.temporary_remote_path(&options.data_dir)
    };

    debug!(path = %path, lines = bucket.lines().len(), "Uploading bucket");
    uploader.upload(&path, &bucket.payload()).await?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::{InjectedFault, MemoryRemoteStore};
    use crate::upload::RetryPolicy;
    use std::time::Duration;

    fn options(final_names: bool) -> BackfillOptions {
        BackfillOptions {
            service: "svcA".to_string(),
            instance: "inst1".to_string(),
            log_type: "generic".to_string(),
            data_dir: "/acct/stor/mill".to_string(),
            interval_ms: 5000,
            final_names,
            max_in_flight: 1,
        }
    }

    fn uploader(store: Arc<MemoryRemoteStore>) -> BackoffUploader {
        BackoffUploader::new(
            store,
            RetryPolicy {
                initial_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(2),
                max_attempts: 2,
            },
        )
    }

    #[tokio::test]
    async fn test_scenario_uploads_two_buckets() {
        let store = Arc::new(MemoryRemoteStore::new());
        let input: &[u8] = b"HDR\n1000 a\n4000 b\n9000 c\n";

        let report = run_backfill(input, uploader(store.clone()), options(false))
            .await
            .unwrap();

        assert!(report.is_success());
        assert_eq!(report.lines, 4);
        assert_eq!(report.buckets, 2);
        assert_eq!(
            report.uploaded,
            vec![
                "/acct/stor/mill/logs/svcA/1970/01/01/00/inst1-1000.generic.log.t".to_string(),
                "/acct/stor/mill/logs/svcA/1970/01/01/00/inst1-9000.generic.log.t".to_string(),
            ]
        );
        assert_eq!(store.object(&report.uploaded[0]).unwrap(), b"HDR\n1000 a\n4000 b\n");
        assert_eq!(store.object(&report.uploaded[1]).unwrap(), b"HDR\n9000 c\n");
    }

    #[tokio::test]
    async fn test_final_names_drop_suffix() {
        let store = Arc::new(MemoryRemoteStore::new());
        let input: &[u8] = b"HDR\n1700000000000 a\n";

        let report = run_backfill(input, uploader(store.clone()), options(true))
            .await
            .unwrap();
        assert_eq!(
            report.uploaded,
            vec!["/acct/stor/mill/logs/svcA/2023/11/14/22/inst1-1700000000000.generic.log".to_string()]
        );
    }

    #[tokio::test]
    async fn test_failed_bucket_is_reported_and_others_continue() {
        let store = Arc::new(MemoryRemoteStore::new());
        store.fail_path("/acct/stor/mill/logs/svcA/1970/01/01/00/inst1-1000.generic.log.t");
        let input: &[u8] = b"HDR\n1000 a\n9000 b\n";

        let report = run_backfill(input, uploader(store.clone()), options(false))
            .await
            .unwrap();

        assert!(!report.is_success());
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].start_ms, 1000);
        assert_eq!(report.uploaded.len(), 1);
    }

    struct FailAfter {
        data: &'static [u8],
        sent: bool,
    }

    impl tokio::io::AsyncRead for FailAfter {
        fn poll_read(
            mut self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
            buf: &mut tokio::io::ReadBuf<'_>,
        ) -> std::task::Poll<io::Result<()>> {
            if self.sent {
                return std::task::Poll::Ready(Err(io::Error::new(io::ErrorKind::Other, "device gone")));
            }
            buf.put_slice(self.data);
            self.sent = true;
            std::task::Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn test_invalid_utf8_is_kept_lossily() {
        let store = Arc::new(MemoryRemoteStore::new());
        let input: &[u8] = b"HDR\n1000 a\n9000 b\n9500 caf\xe9\n20000 d\xff\r\n";

        let report = run_backfill(input, uploader(store.clone()), options(false))
            .await
            .unwrap();

        assert!(report.is_success());
        assert_eq!(report.lines, 5);
        assert_eq!(report.uploaded.len(), 3);
        assert_eq!(store.object(&report.uploaded[0]).unwrap(), b"HDR\n1000 a\n");
        assert_eq!(
            store.object(&report.uploaded[1]).unwrap(),
            "HDR\n9000 b\n9500 caf\u{FFFD}\n".as_bytes()
        );
        assert_eq!(
            store.object(&report.uploaded[2]).unwrap(),
            "HDR\n20000 d\u{FFFD}\n".as_bytes()
        );
    }

    #[tokio::test]
    async fn test_read_error_uploads_what_was_read() {
        let store = Arc::new(MemoryRemoteStore::new());
        let input = tokio::io::BufReader::new(FailAfter {
            data: b"HDR\n1000 a\n9000 b\n9500 cut",
            sent: false,
        });

        let err = run_backfill(input, uploader(store.clone()), options(false))
            .await
            .unwrap_err();

        let report = match err {
            BackfillError::Read { source, report } => {
                assert_eq!(source.to_string(), "device gone");
                report
            }
            other => panic!("expected read error, got {:?}", other),
        };
        assert_eq!(report.lines, 4);
        assert_eq!(report.uploaded.len(), 2);
        assert_eq!(
            store.object(&report.uploaded[1]).unwrap(),
            b"HDR\n9000 b\n9500 cut\n"
        );
    }

    #[tokio::test]
    async fn test_panicking_upload_keeps_bucket_start() {
        let store = Arc::new(MemoryRemoteStore::new());
        store.fail_next_puts(1, InjectedFault::Panic);
        let input: &[u8] = b"HDR\n1000 a\n9000 b\n";

        let report = run_backfill(input, uploader(store.clone()), options(false))
            .await
            .unwrap();

        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].start_ms, 1000);
        assert_eq!(report.failed[0].path, None);
        assert!(report.failed[0].error.contains("panicked"));
        assert_eq!(report.uploaded.len(), 1);
        assert!(report.uploaded[0].ends_with("inst1-9000.generic.log.t"));
    }

    #[test]
    fn test_decode_line_strips_terminators() {
        assert_eq!(decode_line(b"a b\n"), "a b");
        assert_eq!(decode_line(b"a b\r\n"), "a b");
        assert_eq!(decode_line(b"tail"), "tail");
        assert_eq!(decode_line(b"\xff\n"), "\u{FFFD}");
    }

    #[tokio::test]
    async fn test_header_only_input_uploads_nothing() {
        let store = Arc::new(MemoryRemoteStore::new());
        let input: &[u8] = b"HDR\n";

        let report = run_backfill(input, uploader(store.clone()), options(false))
            .await
            .unwrap();
        assert_eq!(report.buckets, 0);
        assert!(store.object_paths().is_empty());
    }
}
