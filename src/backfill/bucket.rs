use crate::upload::BytesPayload;
use std::sync::Arc;

/// Width of the timestamp field at the start of each data line.
pub const TIMESTAMP_WIDTH: usize = 14;

/// Millisecond timestamp from the start of a data line.
///
/// Reads the leading decimal digits of the first `TIMESTAMP_WIDTH` bytes,
/// after optional leading whitespace. Returns None when there are none.
pub fn parse_leading_timestamp(line: &str) -> Option<i64> {
    let field = line.get(..TIMESTAMP_WIDTH).unwrap_or(line);
    let digits: &str = {
        let trimmed = field.trim_start();
        let end = trimmed
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(trimmed.len());
        &trimmed[..end]
    };
    if digits.is_empty() {
        return None;
    }
    digits.parse().ok()
}

/// Lines collected for one interval, uploaded as a single object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeBucket {
    pub start_ms: i64,
    header: Arc<str>,
    lines: Vec<String>,
}

impl TimeBucket {
    fn new(start_ms: i64, header: Arc<str>) -> Self {
        Self {
            start_ms,
            header,
            lines: Vec::new(),
        }
    }

    pub fn header(&self) -> &str {
        &self.header
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// Header line followed by every data line, newline terminated.
    pub fn payload(&self) -> BytesPayload {
        let len = self.header.len() + 1 + self.lines.iter().map(|l| l.len() + 1).sum::<usize>();
        let mut bytes = Vec::with_capacity(len);
        bytes.extend_from_slice(self.header.as_bytes());
        bytes.push(b'\n');
        for line in &self.lines {
            bytes.extend_from_slice(line.as_bytes());
            bytes.push(b'\n');
        }
        BytesPayload::new(bytes)
    }
}

enum BucketerState {
    AwaitingHeader,
    /// Header seen, no timestamp yet. Lines without one are held here and
    /// go into the first bucket.
    AwaitingFirstLine { pending: Vec<String> },
    BucketOpen(TimeBucket),
}

/// Groups timestamped lines into fixed-length buckets.
///
/// The first line pushed is the header and is copied into every bucket. A
/// bucket closes when a line arrives whose timestamp is at least `interval_ms`
/// past the bucket start; that line opens the next bucket.
pub struct TimeBucketer {
    interval_ms: i64,
    header: Option<Arc<str>>,
    state: BucketerState,
}

impl TimeBucketer {
    pub fn new(interval_ms: i64) -> Self {
        Self {
            interval_ms: interval_ms.max(1),
            header: None,
            state: BucketerState::AwaitingHeader,
        }
    }

    pub fn header(&self) -> Option<&str> {
        self.header.as_deref()
    }

    /// Start of the open bucket, if any.
    pub fn open_start(&self) -> Option<i64> {
        match &self.state {
            BucketerState::BucketOpen(bucket) => Some(bucket.start_ms),
            _ => None,
        }
    }

    /// Feed one line. Returns the bucket it closed, if any.
    pub fn push(&mut self, line: String) -> Option<TimeBucket> {
        if self.header.is_none() {
            self.header = Some(Arc::from(line));
            self.state = BucketerState::AwaitingFirstLine {
                pending: Vec::new(),
            };
            return None;
        }

        let ts = parse_leading_timestamp(&line);
        match ts {
            Some(ts) if self.should_flush(ts) => {
                let closed = self.flush();
                self.append(line, Some(ts));
                closed
            }
            _ => {
                self.append(line, ts);
                None
            }
        }
    }

    /// Whether a line stamped `ts` belongs in a new bucket.
    pub fn should_flush(&self, ts: i64) -> bool {
        match &self.state {
            BucketerState::BucketOpen(bucket) => ts.saturating_sub(bucket.start_ms) >= self.interval_ms,
            _ => false,
        }
    }

    /// Add a line to the open bucket, opening one at `ts` when none is open.
    pub fn append(&mut self, line: String, ts: Option<i64>) {
        let Some(header) = self.header.clone() else {
            self.header = Some(Arc::from(line));
            self.state = BucketerState::AwaitingFirstLine {
                pending: Vec::new(),
            };
            return;
        };

        match (&mut self.state, ts) {
            (BucketerState::BucketOpen(bucket), _) => bucket.lines.push(line),
            (BucketerState::AwaitingFirstLine { pending }, None) => pending.push(line),
            (state, Some(ts)) => {
                let pending = match std::mem::replace(state, BucketerState::AwaitingHeader) {
                    BucketerState::AwaitingFirstLine { pending } => pending,
                    _ => Vec::new(),
                };
                let mut bucket = TimeBucket::new(ts, header);
                bucket.lines = pending;
                bucket.lines.push(line);
                *state = BucketerState::BucketOpen(bucket);
            }
            (BucketerState::AwaitingHeader, None) => {}
        }
    }

    /// Close the open bucket.
    pub fn flush(&mut self) -> Option<TimeBucket> {
        match std::mem::replace(
            &mut self.state,
            BucketerState::AwaitingFirstLine {
                pending: Vec::new(),
            },
        ) {
            BucketerState::BucketOpen(bucket) => Some(bucket),
            other => {
                self.state = other;
                None
            }
        }
    }

    /// End of input. Closes the open bucket; lines that never saw a timestamp
    /// form a bucket starting at `fallback_start_ms`.
    pub fn finish(&mut self, fallback_start_ms: i64) -> Option<TimeBucket> {
        if let Some(bucket) = self.flush() {
            return Some(bucket);
        }
        let header = self.header.clone()?;
        match std::mem::replace(&mut self.state, BucketerState::AwaitingHeader) {
            BucketerState::AwaitingFirstLine { pending } if !pending.is_empty() => {
                let mut bucket = TimeBucket::new(fallback_start_ms, header);
                bucket.lines = pending;
                Some(bucket)
            }
            _ => None,
        }
    }
}
