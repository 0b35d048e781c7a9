use super::cycle::run_cycle;
use super::session::{SessionOutcome, UploadSession};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, warn};

/// Drives one source: rotate on every tick, then start an upload session in
/// the background unless the previous one is still running.
pub struct SourceRunner {
    session: Arc<UploadSession>,
}

impl SourceRunner {
    pub fn new(session: UploadSession) -> Self {
        Self {
            session: Arc::new(session),
        }
    }

    pub fn session(&self) -> &Arc<UploadSession> {
        &self.session
    }

    /// One rotation followed by an upload session, run to completion.
    pub async fn tick(&self) -> Option<SessionOutcome> {
        self.rotate().await;
        run_session(&self.session).await
    }

    async fn rotate(&self) {
        let source = self.session.source();
        if let Err(e) = run_cycle(source, self.session.staging()).await {
            error!(source_id = %source.id, error = %e, "Rotation failed");
        }
    }

    /// Run until `shutdown` flips to true, then wait for any in-flight
    /// session to finish.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let source = self.session.source().clone();

        if let Err(e) = self.session.staging().ensure().await {
            error!(
                source_id = %source.id,
                dir = %self.session.staging().dir().display(),
                error = %e,
                "Failed to create staging directory"
            );
        }

        info!(
            source_id = %source.id,
            path = %source.path.display(),
            interval_ms = source.interval.as_millis() as u64,
            "Starting source runner"
        );

        // First tick completes immediately.
        let mut ticker = interval(source.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut in_flight: Option<JoinHandle<()>> = None;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.rotate().await;

                    if in_flight.as_ref().map_or(false, |h| !h.is_finished()) {
                        info!(source_id = %source.id, "Previous upload session still running, skipping");
                        continue;
                    }
                    let session = self.session.clone();
                    in_flight = Some(tokio::spawn(async move {
                        run_session(&session).await;
                    }));
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        if let Some(handle) = in_flight {
            info!(source_id = %source.id, "Waiting for in-flight upload session");
            if let Err(e) = handle.await {
                error!(source_id = %source.id, error = %e, "Upload session task failed");
            }
        }
        info!(source_id = %source.id, "Source runner stopped");
    }
}

async fn run_session(session: &UploadSession) -> Option<SessionOutcome> {
    match session.run().await {
        Ok(outcome) => Some(outcome),
        Err(e) => {
            warn!(source_id = %session.source().id, error = %e, "Upload session failed");
            None
        }
    }
}
