use std::fmt;
use std::path::{Path, PathBuf};

use md5::{Digest, Md5};
use tokio::io::AsyncReadExt;

use crate::error::{Result, StowageError};

/// Length in bytes of a volume content digest (MD5).
pub const CHECKSUM_LEN: usize = 16;

const HASH_BUF_SIZE: usize = 64 * 1024;

/// A named, checksummed chunk of backup data backed by a local file.
///
/// The producer owns the backing file. Upload code only reopens and reads it,
/// once per attempt, and never deletes it.
#[derive(Clone, PartialEq, Eq)]
pub struct Volume {
    object_name: String,
    path: PathBuf,
    size: u64,
    checksum: String,
}

impl Volume {
    /// Describe an existing volume file with a precomputed hex MD5 checksum.
    pub fn new(
        object_name: impl Into<String>,
        path: impl Into<PathBuf>,
        size: u64,
        checksum: impl Into<String>,
    ) -> Self {
        Self {
            object_name: object_name.into(),
            path: path.into(),
            size,
            checksum: checksum.into(),
        }
    }

    /// Build a volume from a file on disk, streaming it once for size and MD5.
    pub async fn from_file(path: &Path, object_name: impl Into<String>) -> Result<Self> {
        let mut file = tokio::fs::File::open(path).await?;
        let mut hasher = Md5::new();
        let mut buf = vec![0u8; HASH_BUF_SIZE];
        let mut size = 0u64;
        loop {
            let n = file.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
            size += n as u64;
        }

        Ok(Self {
            object_name: object_name.into(),
            path: path.to_path_buf(),
            size,
            checksum: hex::encode(hasher.finalize()),
        })
    }

    pub fn object_name(&self) -> &str {
        &self.object_name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Hex-encoded MD5 checksum as supplied by the producer.
    pub fn checksum(&self) -> &str {
        &self.checksum
    }

    /// Decode the checksum, rejecting anything that is not a hex MD5 digest.
    pub fn checksum_bytes(&self) -> Result<[u8; CHECKSUM_LEN]> {
        let mut out = [0u8; CHECKSUM_LEN];
        hex::decode_to_slice(&self.checksum, &mut out)?;
        Ok(out)
    }

    /// Open a fresh reader over the backing file.
    ///
    /// Each upload attempt opens its own reader so retries never see a
    /// partially consumed stream.
    pub async fn open(&self) -> Result<tokio::fs::File> {
        tokio::fs::File::open(&self.path)
            .await
            .map_err(StowageError::from)
    }

    /// Remove the backing file.
    pub async fn delete(&self) -> Result<()> {
        tokio::fs::remove_file(&self.path).await?;
        Ok(())
    }
}

impl fmt::Debug for Volume {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Volume")
            .field("object_name", &self.object_name)
            .field("size", &self.size)
            .field("checksum", &self.checksum)
            .finish()
    }
}
