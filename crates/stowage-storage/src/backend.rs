use std::fmt;
use std::pin::Pin;
#[cfg(feature = "s3")]
use std::sync::Arc;

use async_trait::async_trait;
use stowage_core::config::{RestoreSettings, S3Settings, StowageConfig};
use stowage_core::error::Result;
use stowage_core::{UploadSlots, Volume};
use tokio::io::AsyncRead;
use tokio_util::sync::CancellationToken;

#[cfg(feature = "s3")]
use crate::s3::{S3Api, S3Uploader};

/// Readable stream over a downloaded object.
pub type ObjectReader = Pin<Box<dyn AsyncRead + Send>>;

/// Capabilities every storage provider adapter implements.
///
/// All methods take `&self`: an initialized backend is shared by concurrent
/// upload workers behind an `Arc`. Keys and listed names are relative to the
/// prefix of the target URI.
#[async_trait]
pub trait Backend: Send + Sync {
    /// URI scheme this adapter serves.
    fn scheme(&self) -> &'static str;

    /// Whether `init` has succeeded and `close` has not been called since.
    fn is_initialized(&self) -> bool;

    /// Validate the target and open the client and uploader.
    async fn init(
        &self,
        cancel: &CancellationToken,
        config: &BackendConfig,
        options: BackendOptions,
    ) -> Result<()>;

    /// Store a volume under `prefix + object_name`.
    ///
    /// Returns only once the provider has acknowledged the full object. A
    /// malformed checksum fails before any network traffic.
    async fn upload(&self, cancel: &CancellationToken, volume: &Volume) -> Result<()>;

    /// Stream an object's content. Archived objects must be made available
    /// with [`Backend::pre_download`] first.
    async fn download(&self, cancel: &CancellationToken, key: &str) -> Result<ObjectReader>;

    /// Make every key readable, restoring archived objects as needed.
    async fn pre_download(&self, cancel: &CancellationToken, keys: &[String]) -> Result<()>;

    /// All object names under `prefix`, across every provider page.
    async fn list(&self, cancel: &CancellationToken, prefix: &str) -> Result<Vec<String>>;

    async fn delete(&self, cancel: &CancellationToken, key: &str) -> Result<()>;

    /// Release the client and uploader. Later calls fail with `NotInitialized`.
    async fn close(&self) -> Result<()>;
}

/// Settings handed to [`Backend::init`].
#[derive(Debug, Clone)]
pub struct BackendConfig {
    pub target_uri: String,
    /// Part size for multipart uploads, in bytes.
    pub upload_chunk_size: u64,
    pub max_parallel_uploads: usize,
    /// Tokens bounding concurrent uploads; each upload attempt holds one.
    pub upload_slots: UploadSlots,
    pub s3: S3Settings,
    pub restore: RestoreSettings,
}

impl BackendConfig {
    pub fn new(target_uri: impl Into<String>) -> Self {
        let max_parallel_uploads = stowage_core::job::DEFAULT_MAX_PARALLEL_UPLOADS;
        Self {
            target_uri: target_uri.into(),
            upload_chunk_size: 10 * 1024 * 1024,
            max_parallel_uploads,
            upload_slots: UploadSlots::new(max_parallel_uploads),
            s3: S3Settings::default(),
            restore: RestoreSettings::default(),
        }
    }

    pub fn from_config(config: &StowageConfig) -> Self {
        let max_parallel_uploads = config.stowage.max_parallel_uploads.max(1);
        Self {
            target_uri: config.stowage.target_uri.clone(),
            upload_chunk_size: config.upload_chunk_size(),
            max_parallel_uploads,
            upload_slots: UploadSlots::new(max_parallel_uploads),
            s3: config.s3.clone(),
            restore: config.restore.clone(),
        }
    }

    /// Resize the upload budget, replacing the slot pool.
    pub fn with_max_parallel_uploads(mut self, max_parallel_uploads: usize) -> Self {
        self.max_parallel_uploads = max_parallel_uploads.max(1);
        self.upload_slots = UploadSlots::new(self.max_parallel_uploads);
        self
    }
}

/// Overrides applied during [`Backend::init`], mainly to substitute test doubles.
#[derive(Default, Clone)]
pub struct BackendOptions {
    #[cfg(feature = "s3")]
    pub(crate) s3_client: Option<Arc<dyn S3Api>>,
    #[cfg(feature = "s3")]
    pub(crate) s3_uploader: Option<Arc<dyn S3Uploader>>,
}

impl BackendOptions {
    /// Use this client instead of one built from the AWS environment.
    #[cfg(feature = "s3")]
    pub fn with_s3_client(mut self, client: Arc<dyn S3Api>) -> Self {
        self.s3_client = Some(client);
        self
    }

    /// Use this uploader instead of the multipart uploader over the SDK client.
    #[cfg(feature = "s3")]
    pub fn with_s3_uploader(mut self, uploader: Arc<dyn S3Uploader>) -> Self {
        self.s3_uploader = Some(uploader);
        self
    }
}

impl fmt::Debug for BackendOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("BackendOptions");
        #[cfg(feature = "s3")]
        {
            s.field("s3_client", &self.s3_client.is_some())
                .field("s3_uploader", &self.s3_uploader.is_some());
        }
        s.finish()
    }
}
