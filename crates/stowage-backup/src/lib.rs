//! Upload orchestration: turns a stream of volumes into durable objects.

pub mod pipeline;

pub use pipeline::{FirstError, UploadHandle, UploadSummary, run_upload_chain};
