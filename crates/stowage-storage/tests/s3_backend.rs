//! S3 adapter tests against in-process doubles of the client and uploader.
//!
//! `s3_live_roundtrip` talks to a real S3-compatible server and is skipped
//! unless `AWS_S3_CUSTOM_ENDPOINT` is set:
//!   AWS_S3_CUSTOM_ENDPOINT=http://localhost:9000 \
//!   AWS_ACCESS_KEY_ID=minioadmin AWS_SECRET_ACCESS_KEY=minioadmin \
//!   cargo test -p stowage-storage --test s3_backend -- --nocapture
#![cfg(feature = "s3")]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use stowage_core::error::{Result, StowageError};
use stowage_core::{ProviderError, ProviderErrorKind, Volume};
use stowage_storage::pagination::ListPage;
use stowage_storage::s3::{ObjectHead, S3Api, S3Backend, S3Uploader, UploadRequest};
use stowage_storage::{Backend, BackendConfig, BackendOptions};
use tempfile::TempDir;
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;

const BAD_BUCKET: &str = "badbucket";
const BAD_KEY: &str = "badkey";

fn test_error() -> StowageError {
    ProviderError::new(ProviderErrorKind::Permanent, "test error").into()
}

fn is_test_error(err: &StowageError) -> bool {
    matches!(err, StowageError::Provider(e) if e.message == "test error")
}

#[derive(Default)]
struct MockClient {
    /// HEAD requests against every key.
    total_heads: AtomicUsize,
    head_calls: AtomicUsize,
    busy_heads: AtomicUsize,
    restore_calls: AtomicUsize,
}

#[async_trait]
impl S3Api for MockClient {
    async fn head_bucket(&self, bucket: &str) -> Result<()> {
        if bucket == BAD_BUCKET {
            return Err(test_error());
        }
        Ok(())
    }

    async fn head_object(&self, _bucket: &str, key: &str) -> Result<ObjectHead> {
        self.total_heads.fetch_add(1, Ordering::SeqCst);
        match key {
            BAD_KEY => Err(test_error()),
            "alreadyrestoring" => {
                let calls = self.head_calls.fetch_add(1, Ordering::SeqCst) + 1;
                let restore = if calls >= 3 {
                    ""
                } else {
                    "ongoing-request=\"true\""
                };
                Ok(ObjectHead {
                    storage_class: Some("GLACIER".into()),
                    restore: Some(restore.into()),
                    content_length: Some(50),
                })
            }
            "needsrestore" => Ok(ObjectHead {
                storage_class: Some("GLACIER".into()),
                restore: Some(
                    "ongoing-request=\"false\", expiry-date=\"Wed, 07 Nov 2012 00:00:00 GMT\""
                        .into(),
                ),
                content_length: Some(50),
            }),
            // Archived with no restore status; someone else's restore is
            // already running once a request has been made.
            "restorebusy" => {
                let restore = if self.restore_calls.load(Ordering::SeqCst) == 0 {
                    None
                } else if self.busy_heads.fetch_add(1, Ordering::SeqCst) < 2 {
                    Some("ongoing-request=\"true\"".to_string())
                } else {
                    Some("ongoing-request=\"false\"".to_string())
                };
                Ok(ObjectHead {
                    storage_class: Some("GLACIER".into()),
                    restore,
                    content_length: Some(50),
                })
            }
            "archived" => Ok(ObjectHead {
                storage_class: Some("DEEP_ARCHIVE".into()),
                restore: if self.restore_calls.load(Ordering::SeqCst) > 0 {
                    Some("ongoing-request=\"false\"".into())
                } else {
                    None
                },
                content_length: Some(50),
            }),
            _ => Ok(ObjectHead {
                storage_class: Some("STANDARD".into()),
                restore: None,
                content_length: Some(50),
            }),
        }
    }

    async fn restore_object(
        &self,
        _bucket: &str,
        key: &str,
        _days: i32,
        _tier: &str,
    ) -> Result<()> {
        self.restore_calls.fetch_add(1, Ordering::SeqCst);
        match key {
            BAD_KEY => Err(test_error()),
            "alreadyrestoring" | "restorebusy" => Err(ProviderError::new(
                ProviderErrorKind::RestoreInProgress,
                "restore already in progress",
            )
            .with_code("RestoreAlreadyInProgress")
            .into()),
            _ => Ok(()),
        }
    }

    async fn list_objects_page(
        &self,
        bucket: &str,
        prefix: &str,
        continuation_token: Option<String>,
    ) -> Result<ListPage> {
        if bucket == BAD_BUCKET || prefix == BAD_KEY {
            return Err(test_error());
        }
        match continuation_token.as_deref() {
            None => Ok(ListPage {
                names: vec![format!("{prefix}random"); 3],
                is_truncated: true,
                next_token: Some("call2".into()),
            }),
            Some("call2") => Ok(ListPage {
                names: vec![format!("{prefix}random")],
                is_truncated: false,
                next_token: None,
            }),
            Some(_) => Err(test_error()),
        }
    }

    async fn get_object(&self, _bucket: &str, key: &str) -> Result<stowage_storage::ObjectReader> {
        if key == BAD_KEY {
            return Err(test_error());
        }
        Ok(Box::pin(&b"object body"[..]))
    }

    async fn delete_object(&self, _bucket: &str, key: &str) -> Result<()> {
        if key == BAD_KEY {
            return Err(test_error());
        }
        Ok(())
    }
}

#[derive(Default)]
struct MockUploader {
    calls: AtomicUsize,
    last_key: std::sync::Mutex<Option<String>>,
}

#[async_trait]
impl S3Uploader for MockUploader {
    async fn upload(&self, request: UploadRequest) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_key.lock().unwrap() = Some(request.key.clone());
        if request.key.ends_with(BAD_KEY) {
            return Err(test_error());
        }
        Ok(())
    }
}

struct Harness {
    backend: S3Backend,
    client: Arc<MockClient>,
    uploader: Arc<MockUploader>,
}

async fn init(uri: &str) -> (Harness, Result<()>) {
    let client = Arc::new(MockClient::default());
    let uploader = Arc::new(MockUploader::default());
    let backend = S3Backend::new();

    let mut config = BackendConfig::new(uri);
    config.restore.poll_interval_secs = 1;
    config.restore.max_poll_interval_secs = 4;
    config.restore.max_poll_secs = 60;

    let options = BackendOptions::default()
        .with_s3_client(client.clone())
        .with_s3_uploader(uploader.clone());
    let result = backend
        .init(&CancellationToken::new(), &config, options)
        .await;
    (
        Harness {
            backend,
            client,
            uploader,
        },
        result,
    )
}

async fn good_backend() -> Harness {
    let (harness, result) = init("s3://goodbucket").await;
    result.expect("init against goodbucket");
    harness
}

async fn test_volume(dir: &TempDir, name: &str) -> Volume {
    let path = dir.path().join("volume.bin");
    tokio::fs::write(&path, b"zfs send stream chunk").await.unwrap();
    Volume::from_file(&path, name).await.unwrap()
}

#[tokio::test]
async fn init_validates_target() {
    let (harness, result) = init("s3://goodbucket").await;
    result.unwrap();
    assert!(harness.backend.is_initialized());
    assert_eq!(harness.backend.prefix().as_deref(), Some(""));

    let (harness, result) = init("s3://badbucket").await;
    assert!(is_test_error(&result.unwrap_err()));
    assert!(!harness.backend.is_initialized());

    let (harness, result) = init("nots3://goodbucket").await;
    assert!(matches!(result, Err(StowageError::InvalidUri(_))));
    assert_eq!(harness.backend.prefix(), None);

    let (harness, result) = init("s3://goodbucket/prefix").await;
    result.unwrap();
    assert_eq!(harness.backend.prefix().as_deref(), Some("prefix"));
}

#[tokio::test]
async fn second_init_is_rejected() {
    let harness = good_backend().await;
    let options = BackendOptions::default()
        .with_s3_client(harness.client.clone())
        .with_s3_uploader(harness.uploader.clone());
    let result = harness
        .backend
        .init(
            &CancellationToken::new(),
            &BackendConfig::new("s3://goodbucket"),
            options,
        )
        .await;
    assert!(matches!(result, Err(StowageError::AlreadyInitialized)));
}

#[tokio::test]
async fn close_releases_the_session() {
    let harness = good_backend().await;
    harness.backend.close().await.unwrap();
    assert!(!harness.backend.is_initialized());
    // The backend dropped its handles; only the test still holds the doubles.
    assert_eq!(Arc::strong_count(&harness.client), 1);
    assert_eq!(Arc::strong_count(&harness.uploader), 1);

    let dir = TempDir::new().unwrap();
    let vol = test_volume(&dir, "goodkey").await;
    let err = harness
        .backend
        .upload(&CancellationToken::new(), &vol)
        .await
        .unwrap_err();
    assert!(matches!(err, StowageError::NotInitialized));

    harness.backend.close().await.unwrap();
}

#[tokio::test]
async fn delete() {
    let harness = good_backend().await;
    let cancel = CancellationToken::new();
    harness.backend.delete(&cancel, "goodkey").await.unwrap();
    let err = harness.backend.delete(&cancel, BAD_KEY).await.unwrap_err();
    assert!(is_test_error(&err));
}

#[tokio::test]
async fn download() {
    let harness = good_backend().await;
    let cancel = CancellationToken::new();

    let mut reader = harness.backend.download(&cancel, "goodkey").await.unwrap();
    let mut body = String::new();
    reader.read_to_string(&mut body).await.unwrap();
    assert_eq!(body, "object body");

    let err = match harness.backend.download(&cancel, BAD_KEY).await {
        Ok(_) => panic!("download of {BAD_KEY} should fail"),
        Err(e) => e,
    };
    assert!(is_test_error(&err));
}

#[tokio::test]
async fn upload() {
    let dir = TempDir::new().unwrap();
    let cancel = CancellationToken::new();

    let harness = good_backend().await;
    let good = test_volume(&dir, "goodkey").await;
    harness.backend.upload(&cancel, &good).await.unwrap();
    assert_eq!(
        harness.uploader.last_key.lock().unwrap().as_deref(),
        Some("goodkey")
    );

    let bad = test_volume(&dir, BAD_KEY).await;
    let err = harness.backend.upload(&cancel, &bad).await.unwrap_err();
    assert!(is_test_error(&err));
    assert_eq!(harness.uploader.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn upload_rejects_malformed_checksum_before_network() {
    let dir = TempDir::new().unwrap();
    let harness = good_backend().await;
    let good = test_volume(&dir, "goodkey").await;
    let mismatched = Volume::new(
        "goodkey",
        good.path(),
        5 * 1024 * 1024 - 1,
        "thisisn'thexdecodeable",
    );

    let err = harness
        .backend
        .upload(&CancellationToken::new(), &mismatched)
        .await
        .unwrap_err();
    assert!(matches!(err, StowageError::InvalidChecksum(_)));
    assert_eq!(harness.uploader.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn upload_uses_prefix() {
    let dir = TempDir::new().unwrap();
    let (harness, result) = init("s3://goodbucket/nightly/").await;
    result.unwrap();
    let vol = test_volume(&dir, "tank@snap.zstream.vol1").await;
    harness
        .backend
        .upload(&CancellationToken::new(), &vol)
        .await
        .unwrap();
    assert_eq!(
        harness.uploader.last_key.lock().unwrap().as_deref(),
        Some("nightly/tank@snap.zstream.vol1")
    );
}

#[tokio::test]
async fn list_follows_continuation_tokens() {
    let harness = good_backend().await;
    let cancel = CancellationToken::new();

    let names = harness.backend.list(&cancel, "").await.unwrap();
    assert_eq!(names.len(), 4);
    assert!(names.iter().all(|n| n == "random"));

    let err = harness.backend.list(&cancel, BAD_KEY).await.unwrap_err();
    assert!(is_test_error(&err));
}

#[tokio::test]
async fn list_strips_target_prefix() {
    let (harness, result) = init("s3://goodbucket/nightly/").await;
    result.unwrap();
    let names = harness
        .backend
        .list(&CancellationToken::new(), "")
        .await
        .unwrap();
    assert_eq!(names, vec!["random"; 4]);
}

#[tokio::test(start_paused = true)]
async fn pre_download_restores_archived_objects() {
    let cancel = CancellationToken::new();

    let harness = good_backend().await;
    harness.backend.pre_download(&cancel, &[]).await.unwrap();
    assert_eq!(harness.client.total_heads.load(Ordering::SeqCst), 0);
    assert_eq!(harness.client.restore_calls.load(Ordering::SeqCst), 0);

    let keys = ["good", "needsrestore", "alreadyrestoring"].map(String::from);
    harness.backend.pre_download(&cancel, &keys).await.unwrap();
    assert_eq!(harness.client.restore_calls.load(Ordering::SeqCst), 0);
    assert!(harness.client.head_calls.load(Ordering::SeqCst) >= 3);

    let harness = good_backend().await;
    harness
        .backend
        .pre_download(&cancel, &["archived".to_string()])
        .await
        .unwrap();
    assert_eq!(harness.client.restore_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn restore_already_in_progress_is_polled_to_completion() {
    let harness = good_backend().await;
    harness
        .backend
        .pre_download(&CancellationToken::new(), &["restorebusy".to_string()])
        .await
        .unwrap();
    assert_eq!(harness.client.restore_calls.load(Ordering::SeqCst), 1);
    // Two ongoing polls, then the completed one.
    assert_eq!(harness.client.busy_heads.load(Ordering::SeqCst), 3);
    assert_eq!(harness.client.total_heads.load(Ordering::SeqCst), 4);
}

#[tokio::test(start_paused = true)]
async fn pre_download_fails_on_bad_key() {
    let harness = good_backend().await;
    let keys = ["good", BAD_KEY, "good2"].map(String::from);
    let err = harness
        .backend
        .pre_download(&CancellationToken::new(), &keys)
        .await
        .unwrap_err();
    assert!(is_test_error(&err));
}

#[tokio::test(start_paused = true)]
async fn pre_download_is_cancellable() {
    let harness = good_backend().await;
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(500)).await;
        trigger.cancel();
    });

    // Still restoring after the first poll; cancellation lands while waiting.
    let err = harness
        .backend
        .pre_download(&cancel, &["alreadyrestoring".to_string()])
        .await
        .unwrap_err();
    assert!(matches!(err, StowageError::Cancelled));
}

#[tokio::test]
async fn operations_before_init_fail() {
    let backend = S3Backend::new();
    let cancel = CancellationToken::new();
    assert!(matches!(
        backend.list(&cancel, "").await,
        Err(StowageError::NotInitialized)
    ));
    assert!(matches!(
        backend.delete(&cancel, "goodkey").await,
        Err(StowageError::NotInitialized)
    ));
    backend.close().await.unwrap();
}

#[tokio::test]
async fn s3_live_roundtrip() {
    let Ok(endpoint) = std::env::var("AWS_S3_CUSTOM_ENDPOINT") else {
        eprintln!("SKIP: AWS_S3_CUSTOM_ENDPOINT not set");
        return;
    };
    let bucket = "s3bucketbackendtest";

    let mut config = BackendConfig::new(format!("s3://{bucket}"));
    config.s3.endpoint_url = Some(endpoint);
    config.s3.path_style = Some(true);
    config.s3.region.get_or_insert_with(|| "us-east-1".into());

    let client = stowage_storage::s3::build_sdk_client(&config.s3).await;
    if let Err(e) = client.create_bucket().bucket(bucket).send().await {
        let code = e.as_service_error().and_then(|se| {
            aws_sdk_s3::error::ProvideErrorMetadata::code(se).map(str::to_owned)
        });
        assert!(
            matches!(
                code.as_deref(),
                Some("BucketAlreadyOwnedByYou" | "BucketAlreadyExists")
            ),
            "could not create bucket: {e:?}"
        );
    }

    let cancel = CancellationToken::new();
    let backend = S3Backend::new();
    backend
        .init(&cancel, &config, BackendOptions::default())
        .await
        .expect("init failed");
    println!("OK: S3 init");

    let dir = TempDir::new().unwrap();
    let vol = test_volume(&dir, "live-test-volume").await;
    backend.upload(&cancel, &vol).await.expect("upload failed");
    println!("OK: S3 upload");

    let names = backend.list(&cancel, "").await.expect("list failed");
    assert_eq!(names, vec!["live-test-volume"]);

    let mut body = Vec::new();
    backend
        .download(&cancel, "live-test-volume")
        .await
        .expect("download failed")
        .read_to_end(&mut body)
        .await
        .unwrap();
    assert_eq!(body, b"zfs send stream chunk");
    println!("OK: S3 download matches");

    backend
        .delete(&cancel, "live-test-volume")
        .await
        .expect("delete failed");
    backend.close().await.unwrap();

    let _ = client.delete_bucket().bucket(bucket).send().await;
}
