use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use stowage_backup::run_upload_chain;
use stowage_core::{JobInfo, Volume};

use super::{ctrl_c_token, format_bytes, load_config, open_backend};

pub async fn run(files: &[PathBuf], base_dir: &Path) -> Result<()> {
    let config = load_config(base_dir)?;
    let job = JobInfo::from_config(&config);

    println!("Hashing {} volume(s)...", files.len());
    let mut volumes = Vec::with_capacity(files.len());
    for path in files {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .with_context(|| format!("not a file: {}", path.display()))?;
        let volume = Volume::from_file(path, name)
            .await
            .with_context(|| format!("cannot read {}", path.display()))?;
        volumes.push(Arc::new(volume));
    }

    let cancel = ctrl_c_token();
    let backend = open_backend(&config, &cancel).await?;
    println!(
        "Sending to {} ({} parallel, policy {})",
        config.stowage.target_uri, job.max_parallel_uploads, job.failure_policy
    );

    let pb = ProgressBar::new(volumes.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")?
            .progress_chars("=>-"),
    );

    let (tx, rx) = async_channel::bounded(job.max_parallel_uploads);
    let (uploaded, handle) = run_upload_chain(
        &cancel,
        rx,
        backend.clone(),
        &job,
        &config.stowage.target_uri,
    );
    let summary = handle.summary();

    // Feed from a separate task so the output side is drained concurrently.
    let feeder = tokio::spawn(async move {
        for volume in volumes {
            if tx.send(volume).await.is_err() {
                break;
            }
        }
    });

    while let Ok(volume) = uploaded.recv().await {
        pb.set_message(volume.object_name().to_string());
        pb.inc(1);
    }
    let result = handle.join().await;
    feeder.abort();
    pb.finish_and_clear();
    backend.close().await?;

    println!(
        "Uploaded {} volume(s), {}; {} failed",
        summary.succeeded(),
        format_bytes(summary.bytes()),
        summary.failed()
    );
    result.context("upload run did not complete")?;
    Ok(())
}
