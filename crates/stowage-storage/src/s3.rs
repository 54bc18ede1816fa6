//! AWS S3 and S3-compatible object storage.
//!
//! The adapter talks to the provider through two seams: [`S3Api`] for
//! metadata, listing, restore and reads, and [`S3Uploader`] for writes.
//! Production code uses [`SdkClient`] and [`SdkUploader`] over one
//! `aws_sdk_s3::Client`; tests inject doubles via [`BackendOptions`].

use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{
    CompletedMultipartUpload, CompletedPart, GlacierJobParameters, RestoreRequest, StorageClass,
    Tier,
};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use futures::TryStreamExt;
use md5::{Digest, Md5};
use stowage_core::cancel::cancellable;
use stowage_core::config::S3Settings;
use stowage_core::error::{Result, StowageError};
use stowage_core::{ProviderError, ProviderErrorKind, UploadSlots, Volume};
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;

use crate::backend::{Backend, BackendConfig, BackendOptions, ObjectReader};
use crate::pagination::{ListPage, collect_pages};
use crate::restore::{
    Probe, RestorePolicy, RestoreStatus, RestoreTarget, StorageTier, ensure_available,
};
use crate::uri::TargetUri;

pub const SCHEME: &str = "s3";

/// Smallest part size S3 accepts for every part but the last.
pub const MIN_PART_SIZE: u64 = 5 * 1024 * 1024;

/// Most parts a single multipart upload may have.
pub const MAX_PARTS: u64 = 10_000;

/// User metadata key holding the hex MD5 of the whole object.
pub const MD5_METADATA_KEY: &str = "md5";

/// Object metadata returned by `HeadObject`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectHead {
    pub storage_class: Option<String>,
    /// Raw `x-amz-restore` header.
    pub restore: Option<String>,
    pub content_length: Option<i64>,
}

/// One object write handed to an [`S3Uploader`].
pub struct UploadRequest {
    pub bucket: String,
    pub key: String,
    pub body: ObjectReader,
    pub size: u64,
    /// Base64 MD5 digest, as sent in `Content-MD5`.
    pub content_md5: String,
    pub checksum_hex: String,
    pub storage_class: Option<String>,
}

impl std::fmt::Debug for UploadRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadRequest")
            .field("bucket", &self.bucket)
            .field("key", &self.key)
            .field("size", &self.size)
            .field("checksum_hex", &self.checksum_hex)
            .field("storage_class", &self.storage_class)
            .finish_non_exhaustive()
    }
}

/// S3 operations other than uploads.
#[async_trait]
pub trait S3Api: Send + Sync {
    async fn head_bucket(&self, bucket: &str) -> Result<()>;

    async fn head_object(&self, bucket: &str, key: &str) -> Result<ObjectHead>;

    async fn restore_object(&self, bucket: &str, key: &str, days: i32, tier: &str) -> Result<()>;

    async fn list_objects_page(
        &self,
        bucket: &str,
        prefix: &str,
        continuation_token: Option<String>,
    ) -> Result<ListPage>;

    async fn get_object(&self, bucket: &str, key: &str) -> Result<ObjectReader>;

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<()>;
}

/// Writes whole objects, returning once the provider has acknowledged them.
#[async_trait]
pub trait S3Uploader: Send + Sync {
    async fn upload(&self, request: UploadRequest) -> Result<()>;
}

/// Build an SDK client from the default credential chain plus `settings`.
pub async fn build_sdk_client(settings: &S3Settings) -> Client {
    let mut config_loader = aws_config::from_env();
    if let Some(region) = &settings.region {
        config_loader = config_loader.region(aws_config::Region::new(region.clone()));
    }
    let sdk_config = config_loader.load().await;

    let mut s3_config_builder = aws_sdk_s3::config::Builder::from(&sdk_config);
    if let Some(endpoint) = &settings.endpoint_url {
        s3_config_builder = s3_config_builder.endpoint_url(endpoint);
    }
    // Custom endpoints (MinIO, Ceph RGW, ...) default to path-style addressing.
    if settings
        .path_style
        .unwrap_or(settings.endpoint_url.is_some())
    {
        s3_config_builder = s3_config_builder.force_path_style(true);
    }

    Client::from_conf(s3_config_builder.build())
}

/// Map an SDK failure into the provider-neutral error.
pub fn provider_error<E>(err: SdkError<E, HttpResponse>) -> ProviderError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    let message = DisplayErrorContext(&err).to_string();
    let (kind, code) = match &err {
        SdkError::ServiceError(ctx) => {
            let code = ctx.err().code().map(str::to_owned);
            let status = ctx.raw().status().as_u16();
            (classify(code.as_deref(), Some(status)), code)
        }
        SdkError::ConstructionFailure(_) => (ProviderErrorKind::Permanent, None),
        // Dispatch failures, timeouts and unparseable responses.
        _ => (ProviderErrorKind::Transient, None),
    };

    let err = ProviderError::new(kind, message);
    match code {
        Some(code) => err.with_code(code),
        None => err,
    }
}

/// Classify a service error by S3 error code, falling back to HTTP status.
pub fn classify(code: Option<&str>, status: Option<u16>) -> ProviderErrorKind {
    match code {
        Some("NoSuchKey" | "NotFound" | "NoSuchBucket" | "NoSuchUpload") => {
            return ProviderErrorKind::NotFound;
        }
        Some("SlowDown" | "Throttling" | "ThrottlingException" | "TooManyRequests") => {
            return ProviderErrorKind::Throttled;
        }
        Some("RequestTimeout" | "InternalError" | "ServiceUnavailable") => {
            return ProviderErrorKind::Transient;
        }
        Some("RestoreAlreadyInProgress") => return ProviderErrorKind::RestoreInProgress,
        _ => {}
    }
    match status {
        Some(404) => ProviderErrorKind::NotFound,
        Some(429 | 503) => ProviderErrorKind::Throttled,
        Some(s) if s >= 500 => ProviderErrorKind::Transient,
        _ => ProviderErrorKind::Permanent,
    }
}

/// [`S3Api`] over the AWS SDK.
#[derive(Debug, Clone)]
pub struct SdkClient {
    client: Client,
}

impl SdkClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl S3Api for SdkClient {
    async fn head_bucket(&self, bucket: &str) -> Result<()> {
        self.client
            .head_bucket()
            .bucket(bucket)
            .send()
            .await
            .map_err(provider_error)?;
        Ok(())
    }

    async fn head_object(&self, bucket: &str, key: &str) -> Result<ObjectHead> {
        let out = self
            .client
            .head_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(provider_error)?;
        Ok(ObjectHead {
            storage_class: out.storage_class().map(|c| c.as_str().to_owned()),
            restore: out.restore().map(str::to_owned),
            content_length: out.content_length(),
        })
    }

    async fn restore_object(&self, bucket: &str, key: &str, days: i32, tier: &str) -> Result<()> {
        let params = GlacierJobParameters::builder()
            .tier(Tier::from(tier))
            .build()
            .map_err(|e| ProviderError::new(ProviderErrorKind::Permanent, e.to_string()))?;
        let request = RestoreRequest::builder()
            .days(days)
            .glacier_job_parameters(params)
            .build();
        self.client
            .restore_object()
            .bucket(bucket)
            .key(key)
            .restore_request(request)
            .send()
            .await
            .map_err(provider_error)?;
        Ok(())
    }

    async fn list_objects_page(
        &self,
        bucket: &str,
        prefix: &str,
        continuation_token: Option<String>,
    ) -> Result<ListPage> {
        let out = self
            .client
            .list_objects_v2()
            .bucket(bucket)
            .prefix(prefix)
            .set_continuation_token(continuation_token)
            .send()
            .await
            .map_err(provider_error)?;
        Ok(ListPage {
            names: out
                .contents()
                .iter()
                .filter_map(|o| o.key().map(str::to_owned))
                .collect(),
            is_truncated: out.is_truncated().unwrap_or(false),
            next_token: out.next_continuation_token().map(str::to_owned),
        })
    }

    async fn get_object(&self, bucket: &str, key: &str) -> Result<ObjectReader> {
        let out = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(provider_error)?;
        Ok(Box::pin(out.body.into_async_read()))
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<()> {
        self.client
            .delete_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(provider_error)?;
        Ok(())
    }
}

/// [`S3Uploader`] that uses a single `PutObject` for small objects and
/// multipart upload for everything else.
#[derive(Debug, Clone)]
pub struct SdkUploader {
    client: Client,
    part_size: u64,
}

impl SdkUploader {
    pub fn new(client: Client, upload_chunk_size: u64) -> Self {
        Self {
            client,
            part_size: upload_chunk_size.max(MIN_PART_SIZE),
        }
    }

    pub fn part_size(&self) -> u64 {
        self.part_size
    }

    /// Part size for an object of `object_size` bytes. Grows past the
    /// configured size when that would need more than [`MAX_PARTS`] parts.
    pub fn part_size_for(&self, object_size: u64) -> u64 {
        self.part_size.max(object_size.div_ceil(MAX_PARTS))
    }

    async fn put_single(&self, mut request: UploadRequest) -> Result<()> {
        let mut data = Vec::with_capacity(request.size as usize);
        request.body.read_to_end(&mut data).await?;

        let mut put = self
            .client
            .put_object()
            .bucket(&request.bucket)
            .key(&request.key)
            .content_md5(&request.content_md5)
            .metadata(MD5_METADATA_KEY, &request.checksum_hex)
            .body(ByteStream::from(data));
        if let Some(class) = &request.storage_class {
            put = put.storage_class(StorageClass::from(class.as_str()));
        }
        put.send().await.map_err(provider_error)?;
        Ok(())
    }

    async fn put_multipart(&self, mut request: UploadRequest) -> Result<()> {
        let mut create = self
            .client
            .create_multipart_upload()
            .bucket(&request.bucket)
            .key(&request.key)
            .metadata(MD5_METADATA_KEY, &request.checksum_hex);
        if let Some(class) = &request.storage_class {
            create = create.storage_class(StorageClass::from(class.as_str()));
        }
        let created = create.send().await.map_err(provider_error)?;
        let upload_id = created
            .upload_id()
            .ok_or_else(|| {
                ProviderError::new(
                    ProviderErrorKind::Transient,
                    "CreateMultipartUpload returned no upload id",
                )
            })?
            .to_owned();

        let part_size = self.part_size_for(request.size);
        if part_size != self.part_size {
            tracing::debug!(key = %request.key, part_size, "enlarged part size for large object");
        }
        let result = self.send_parts(&mut request, &upload_id, part_size).await;
        if result.is_err() {
            let abort = self
                .client
                .abort_multipart_upload()
                .bucket(&request.bucket)
                .key(&request.key)
                .upload_id(&upload_id)
                .send()
                .await;
            if let Err(e) = abort {
                tracing::warn!(
                    key = %request.key,
                    %upload_id,
                    "failed to abort multipart upload: {}",
                    DisplayErrorContext(&e)
                );
            }
        }
        result
    }

    async fn send_parts(
        &self,
        request: &mut UploadRequest,
        upload_id: &str,
        part_size: u64,
    ) -> Result<()> {
        let mut parts = Vec::new();
        let mut whole = Md5::new();
        let mut part_number = 1i32;

        loop {
            let mut data = Vec::with_capacity(part_size as usize);
            AsyncReadExt::take(&mut request.body, part_size)
                .read_to_end(&mut data)
                .await?;
            if data.is_empty() {
                break;
            }
            whole.update(&data);

            let out = self
                .client
                .upload_part()
                .bucket(&request.bucket)
                .key(&request.key)
                .upload_id(upload_id)
                .part_number(part_number)
                .content_md5(BASE64.encode(Md5::digest(&data)))
                .body(ByteStream::from(data))
                .send()
                .await
                .map_err(provider_error)?;
            tracing::debug!(key = %request.key, part_number, "uploaded part");
            parts.push(
                CompletedPart::builder()
                    .set_e_tag(out.e_tag().map(str::to_owned))
                    .part_number(part_number)
                    .build(),
            );
            part_number += 1;
        }

        // Multipart ETags are not content digests; check the whole object here.
        let actual = hex::encode(whole.finalize());
        if !actual.eq_ignore_ascii_case(&request.checksum_hex) {
            return Err(StowageError::ChecksumMismatch {
                key: request.key.clone(),
                expected: request.checksum_hex.clone(),
                actual,
            });
        }

        self.client
            .complete_multipart_upload()
            .bucket(&request.bucket)
            .key(&request.key)
            .upload_id(upload_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(parts))
                    .build(),
            )
            .send()
            .await
            .map_err(provider_error)?;
        Ok(())
    }
}

#[async_trait]
impl S3Uploader for SdkUploader {
    async fn upload(&self, request: UploadRequest) -> Result<()> {
        if request.size < self.part_size {
            self.put_single(request).await
        } else {
            self.put_multipart(request).await
        }
    }
}

/// Everything an initialized backend needs.
struct Session {
    client: Arc<dyn S3Api>,
    uploader: Arc<dyn S3Uploader>,
    target: TargetUri,
    slots: UploadSlots,
    max_parallel: usize,
    storage_class: Option<String>,
    restore: RestorePolicy,
}

#[async_trait]
impl RestoreTarget for Session {
    async fn probe(&self, key: &str) -> Result<Probe> {
        let head = self.client.head_object(&self.target.bucket, key).await?;
        Ok(Probe {
            tier: StorageTier::from_storage_class(head.storage_class.as_deref()),
            status: RestoreStatus::parse(head.restore.as_deref()),
        })
    }

    async fn request_restore(&self, key: &str, policy: &RestorePolicy) -> Result<()> {
        self.client
            .restore_object(&self.target.bucket, key, policy.days, &policy.tier)
            .await
    }
}

/// Backend for `s3://<bucket>[/<prefix>]` targets.
#[derive(Default)]
pub struct S3Backend {
    state: RwLock<Option<Arc<Session>>>,
}

impl S3Backend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Key prefix of the current target, if initialized.
    pub fn prefix(&self) -> Option<String> {
        self.session().ok().map(|s| s.target.prefix.clone())
    }

    fn session(&self) -> Result<Arc<Session>> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(StowageError::NotInitialized)
    }
}

#[async_trait]
impl Backend for S3Backend {
    fn scheme(&self) -> &'static str {
        SCHEME
    }

    fn is_initialized(&self) -> bool {
        self.session().is_ok()
    }

    async fn init(
        &self,
        cancel: &CancellationToken,
        config: &BackendConfig,
        options: BackendOptions,
    ) -> Result<()> {
        if self.is_initialized() {
            return Err(StowageError::AlreadyInitialized);
        }
        let target = TargetUri::parse(&config.target_uri)?;
        if target.scheme != SCHEME {
            return Err(StowageError::InvalidUri(config.target_uri.clone()));
        }

        let BackendOptions {
            s3_client,
            s3_uploader,
        } = options;
        let (client, uploader) = match (s3_client, s3_uploader) {
            (Some(client), Some(uploader)) => (client, uploader),
            (client, uploader) => {
                let sdk = cancellable(cancel, async { Ok(build_sdk_client(&config.s3).await) })
                    .await?;
                let client = match client {
                    Some(client) => client,
                    None => Arc::new(SdkClient::new(sdk.clone())) as Arc<dyn S3Api>,
                };
                let uploader = match uploader {
                    Some(uploader) => uploader,
                    None => Arc::new(SdkUploader::new(sdk, config.upload_chunk_size))
                        as Arc<dyn S3Uploader>,
                };
                (client, uploader)
            }
        };

        cancellable(cancel, client.head_bucket(&target.bucket)).await?;

        let session = Session {
            client,
            uploader,
            slots: config.upload_slots.clone(),
            max_parallel: config.max_parallel_uploads.max(1),
            storage_class: config.s3.storage_class.clone(),
            restore: RestorePolicy::from(&config.restore),
            target,
        };

        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if state.is_some() {
            return Err(StowageError::AlreadyInitialized);
        }
        tracing::info!(
            bucket = %session.target.bucket,
            prefix = %session.target.prefix,
            "initialized s3 backend"
        );
        *state = Some(Arc::new(session));
        Ok(())
    }

    async fn upload(&self, cancel: &CancellationToken, volume: &Volume) -> Result<()> {
        let session = self.session()?;
        let digest = volume.checksum_bytes()?;
        let _permit = session.slots.acquire(cancel).await?;

        let key = session.target.key_for(volume.object_name());
        let body = volume.open().await?;
        let request = UploadRequest {
            bucket: session.target.bucket.clone(),
            key: key.clone(),
            body: Box::pin(body),
            size: volume.size(),
            content_md5: BASE64.encode(digest),
            checksum_hex: volume.checksum().to_owned(),
            storage_class: session.storage_class.clone(),
        };
        cancellable(cancel, session.uploader.upload(request)).await?;
        tracing::debug!(%key, size = volume.size(), "stored object");
        Ok(())
    }

    async fn download(&self, cancel: &CancellationToken, key: &str) -> Result<ObjectReader> {
        let session = self.session()?;
        let key = session.target.key_for(key);
        cancellable(cancel, session.client.get_object(&session.target.bucket, &key)).await
    }

    async fn pre_download(&self, cancel: &CancellationToken, keys: &[String]) -> Result<()> {
        let session = self.session()?;
        let session: &Session = &session;

        futures::stream::iter(keys.iter().map(Ok::<_, StowageError>))
            .try_for_each_concurrent(session.max_parallel, move |name| async move {
                let key = session.target.key_for(name);
                ensure_available(session, &key, &session.restore, cancel).await?;
                Ok(())
            })
            .await
    }

    async fn list(&self, cancel: &CancellationToken, prefix: &str) -> Result<Vec<String>> {
        let session = self.session()?;
        let client = &session.client;
        let bucket = session.target.bucket.as_str();
        let full_prefix = session.target.key_for(prefix);
        let full_prefix = full_prefix.as_str();

        let keys = collect_pages(cancel, move |token| {
            client.list_objects_page(bucket, full_prefix, token)
        })
        .await?;

        Ok(keys
            .into_iter()
            .map(|key| match key.strip_prefix(session.target.prefix.as_str()) {
                Some(name) => name.to_owned(),
                None => key,
            })
            .collect())
    }

    async fn delete(&self, cancel: &CancellationToken, key: &str) -> Result<()> {
        let session = self.session()?;
        let key = session.target.key_for(key);
        cancellable(cancel, session.client.delete_object(&session.target.bucket, &key)).await?;
        tracing::debug!(%key, "deleted object");
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        let session = self
            .state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if session.is_some() {
            tracing::debug!("closed s3 backend");
        }
        Ok(())
    }
}
