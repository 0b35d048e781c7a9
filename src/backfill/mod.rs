pub mod bucket;
pub mod runner;

pub use bucket::{parse_leading_timestamp, TimeBucket, TimeBucketer};
pub use runner::{run_backfill, BackfillError, BackfillOptions, BackfillReport, FailedBucket};
