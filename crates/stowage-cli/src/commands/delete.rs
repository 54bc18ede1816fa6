use anyhow::Result;
use std::path::Path;

use super::{ctrl_c_token, load_config, open_backend};

pub async fn run(keys: &[String], base_dir: &Path) -> Result<()> {
    let config = load_config(base_dir)?;
    let cancel = ctrl_c_token();
    let backend = open_backend(&config, &cancel).await?;

    let mut failed = 0usize;
    for key in keys {
        match backend.delete(&cancel, key).await {
            Ok(()) => println!("Deleted {key}"),
            Err(e) => {
                eprintln!("Failed to delete {key}: {e}");
                failed += 1;
            }
        }
    }
    backend.close().await?;

    if failed > 0 {
        anyhow::bail!("{failed} of {} deletions failed", keys.len());
    }
    Ok(())
}
