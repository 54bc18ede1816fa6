use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};

use stowage_core::StowageError;
use stowage_core::cancel::cancellable;
use stowage_storage::Backend;
use tokio_util::sync::CancellationToken;

use super::{ctrl_c_token, format_bytes, load_config, open_backend};

pub async fn run(keys: &[String], dest: &Path, base_dir: &Path) -> Result<()> {
    let config = load_config(base_dir)?;
    let cancel = ctrl_c_token();
    let backend = open_backend(&config, &cancel).await?;

    std::fs::create_dir_all(dest)?;
    println!("Preparing {} object(s) for download...", keys.len());
    let result = fetch_all(backend.as_ref(), &cancel, keys, dest).await;
    backend.close().await?;

    let total = result?;
    println!(
        "\nFetched {} object(s), {} into {}",
        keys.len(),
        format_bytes(total),
        dest.display()
    );
    Ok(())
}

async fn fetch_all(
    backend: &dyn Backend,
    cancel: &CancellationToken,
    keys: &[String],
    dest: &Path,
) -> Result<u64> {
    backend
        .pre_download(cancel, keys)
        .await
        .context("objects could not be made available")?;

    let pb = ProgressBar::new(keys.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")?
            .progress_chars("=>-"),
    );

    let mut total = 0u64;
    for key in keys {
        pb.set_message(key.clone());
        let path = local_path(dest, key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut reader = backend.download(cancel, key).await?;
        let mut file = tokio::fs::File::create(&path).await?;
        let copied = cancellable(cancel, async {
            tokio::io::copy(&mut reader, &mut file)
                .await
                .map_err(StowageError::from)
        })
        .await
        .with_context(|| format!("failed to download {key}"))?;
        file.sync_all().await?;

        total += copied;
        pb.inc(1);
    }
    pb.finish_with_message("done");

    Ok(total)
}

/// Keys may contain `/`; they become subdirectories of `dest`.
fn local_path(dest: &Path, key: &str) -> PathBuf {
    key.split('/')
        .filter(|part| !part.is_empty() && *part != "." && *part != "..")
        .fold(dest.to_path_buf(), |path, part| path.join(part))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_stay_inside_dest() {
        let dest = Path::new("/restore");
        assert_eq!(local_path(dest, "vol1"), PathBuf::from("/restore/vol1"));
        assert_eq!(
            local_path(dest, "nightly/pool/vol1"),
            PathBuf::from("/restore/nightly/pool/vol1")
        );
        assert_eq!(
            local_path(dest, "../../etc/passwd"),
            PathBuf::from("/restore/etc/passwd")
        );
    }
}
