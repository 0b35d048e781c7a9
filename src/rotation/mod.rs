pub mod cycle;
pub mod dispatch;
pub mod runner;
pub mod session;
pub mod source;
pub mod staging;

pub use cycle::{run_cycle, CycleError, RotationOutcome, SkipReason};
pub use dispatch::{DispatchError, Dispatched, JobDispatcher};
pub use runner::SourceRunner;
pub use session::{
    SessionError, SessionGate, SessionOutcome, SessionReport, UploadSession, UploadState,
};
pub use source::LogSource;
pub use staging::{StagedFile, StagingArea, StagingScan};
