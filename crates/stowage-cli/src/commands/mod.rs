pub mod config;
pub mod delete;
pub mod fetch;
pub mod init;
pub mod list;
pub mod send;

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;

use stowage_core::config::StowageConfig;
use stowage_storage::{Backend, BackendConfig, BackendOptions};
use tokio_util::sync::CancellationToken;

pub fn load_config(base_dir: &Path) -> Result<StowageConfig> {
    let config_path = StowageConfig::default_path(base_dir);
    Ok(StowageConfig::load(&config_path)?)
}

/// Resolve and initialize the backend for the configured target.
pub async fn open_backend(
    config: &StowageConfig,
    cancel: &CancellationToken,
) -> Result<Arc<dyn Backend>> {
    let backend: Arc<dyn Backend> =
        Arc::from(stowage_storage::backend_for_uri(&config.stowage.target_uri)?);
    backend
        .init(
            cancel,
            &BackendConfig::from_config(config),
            BackendOptions::default(),
        )
        .await
        .with_context(|| format!("failed to open {}", config.stowage.target_uri))?;
    Ok(backend)
}

/// Token cancelled on Ctrl-C.
pub fn ctrl_c_token() -> CancellationToken {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nInterrupted, cancelling...");
            trigger.cancel();
        }
    });
    cancel
}

pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{bytes} B")
    }
}
