//! Local directory standing in for a bucket, for tests and NAS targets.

use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use md5::{Digest, Md5};
use stowage_core::cancel::cancellable;
use stowage_core::error::{Result, StowageError};
use stowage_core::{UploadSlots, Volume};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::backend::{Backend, BackendConfig, BackendOptions, ObjectReader};
use crate::uri::TargetUri;

pub const SCHEME: &str = "file";

const PARTIAL_SUFFIX: &str = ".partial";
const COPY_BUF_SIZE: usize = 256 * 1024;

struct Session {
    root: PathBuf,
    slots: UploadSlots,
}

impl Session {
    fn path_for(&self, key: &str) -> Result<PathBuf> {
        let relative = Path::new(key);
        let plain = relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
        if key.is_empty() || !plain {
            return Err(StowageError::InvalidPrefix(key.to_string()));
        }
        Ok(self.root.join(relative))
    }
}

/// Backend for `file:///<directory>` targets.
#[derive(Default)]
pub struct FileBackend {
    state: RwLock<Option<Arc<Session>>>,
}

impl FileBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Root directory of the current target, if initialized.
    pub fn root(&self) -> Option<PathBuf> {
        self.session().ok().map(|s| s.root.clone())
    }

    fn session(&self) -> Result<Arc<Session>> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(StowageError::NotInitialized)
    }
}

/// Copy the volume to `dest`, hashing as it goes, and fsync the result.
async fn copy_verified(volume: &Volume, dest: &Path, expected: &[u8]) -> Result<()> {
    let mut src = volume.open().await?;
    let mut out = tokio::fs::File::create(dest).await?;
    let mut hasher = Md5::new();
    let mut buf = vec![0u8; COPY_BUF_SIZE];

    loop {
        let n = src.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        out.write_all(&buf[..n]).await?;
    }

    let actual = hasher.finalize();
    if actual.as_slice() != expected {
        return Err(StowageError::ChecksumMismatch {
            key: volume.object_name().to_string(),
            expected: volume.checksum().to_string(),
            actual: hex::encode(actual),
        });
    }

    out.flush().await?;
    out.sync_all().await?;
    Ok(())
}

/// Every regular file under `root`, as `/`-joined relative names.
async fn walk(root: &Path) -> Result<Vec<String>> {
    let mut names = Vec::new();
    let mut pending = vec![root.to_path_buf()];

    while let Some(dir) = pending.pop() {
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let file_type = entry.file_type().await?;
            let path = entry.path();
            if file_type.is_dir() {
                pending.push(path);
            } else if file_type.is_file() {
                let Ok(relative) = path.strip_prefix(root) else {
                    continue;
                };
                let name = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                names.push(name);
            }
        }
    }

    Ok(names)
}

#[async_trait]
impl Backend for FileBackend {
    fn scheme(&self) -> &'static str {
        SCHEME
    }

    fn is_initialized(&self) -> bool {
        self.session().is_ok()
    }

    async fn init(
        &self,
        _cancel: &CancellationToken,
        config: &BackendConfig,
        _options: BackendOptions,
    ) -> Result<()> {
        if self.is_initialized() {
            return Err(StowageError::AlreadyInitialized);
        }
        let target = TargetUri::parse(&config.target_uri)?;
        if target.scheme != SCHEME {
            return Err(StowageError::InvalidUri(config.target_uri.clone()));
        }

        let root = PathBuf::from(&target.bucket);
        if !tokio::fs::metadata(&root).await?.is_dir() {
            return Err(StowageError::InvalidUri(config.target_uri.clone()));
        }

        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if state.is_some() {
            return Err(StowageError::AlreadyInitialized);
        }
        tracing::info!(root = %root.display(), "initialized file backend");
        *state = Some(Arc::new(Session {
            root,
            slots: config.upload_slots.clone(),
        }));
        Ok(())
    }

    async fn upload(&self, cancel: &CancellationToken, volume: &Volume) -> Result<()> {
        let session = self.session()?;
        let expected = volume.checksum_bytes()?;
        let _permit = session.slots.acquire(cancel).await?;

        let dest = session.path_for(volume.object_name())?;
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file_name = dest
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let tmp = dest.with_file_name(format!(
            "{file_name}.{}{PARTIAL_SUFFIX}",
            Uuid::now_v7().simple()
        ));

        let copied = cancellable(cancel, copy_verified(volume, &tmp, &expected)).await;
        if let Err(e) = copied {
            if let Err(cleanup) = tokio::fs::remove_file(&tmp).await {
                tracing::debug!(path = %tmp.display(), "could not remove partial file: {cleanup}");
            }
            return Err(e);
        }

        tokio::fs::rename(&tmp, &dest).await?;
        tracing::debug!(path = %dest.display(), size = volume.size(), "stored object");
        Ok(())
    }

    async fn download(&self, _cancel: &CancellationToken, key: &str) -> Result<ObjectReader> {
        let session = self.session()?;
        let file = tokio::fs::File::open(session.path_for(key)?).await?;
        Ok(Box::pin(file))
    }

    async fn pre_download(&self, _cancel: &CancellationToken, _keys: &[String]) -> Result<()> {
        self.session()?;
        Ok(())
    }

    async fn list(&self, cancel: &CancellationToken, prefix: &str) -> Result<Vec<String>> {
        let session = self.session()?;
        let mut names: Vec<String> = cancellable(cancel, walk(&session.root))
            .await?
            .into_iter()
            .filter(|name| name.starts_with(prefix) && !name.ends_with(PARTIAL_SUFFIX))
            .collect();
        names.sort();
        Ok(names)
    }

    async fn delete(&self, _cancel: &CancellationToken, key: &str) -> Result<()> {
        let session = self.session()?;
        tokio::fs::remove_file(session.path_for(key)?).await?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        Ok(())
    }
}
