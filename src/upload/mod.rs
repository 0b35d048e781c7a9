pub mod backoff;
pub mod payload;

pub use backoff::{AttemptError, BackoffUploader, RetryPolicy, UploadError};
pub use payload::{BytesPayload, ObjectHeader, Payload, StagedPayload, HEADER_VERSION};
