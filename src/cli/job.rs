use super::backfill::remote_settings;
use crate::remote::{HttpRemoteStore, RemoteStore};
use std::path::PathBuf;

pub async fn status(
    config_path: Option<PathBuf>,
    job_id: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let (remote, _, _) = remote_settings(config_path.as_deref())?;
    let store = HttpRemoteStore::new(&remote)?;

    let status = store.job(job_id).await?;

    println!("job:       {}", job_id);
    println!("state:     {}", status.state.as_str());
    println!("cancelled: {}", status.cancelled);
    println!("tasks:     {}", status.stats.tasks);
    println!("done:      {}", status.stats.tasks_done);
    println!("outputs:   {}", status.stats.outputs);
    println!("errors:    {}", status.stats.errors);
    println!("retries:   {}", status.stats.retries);
    Ok(())
}
