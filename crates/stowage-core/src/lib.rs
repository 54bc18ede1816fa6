//! Core types shared by every Stowage crate: volumes, run limits, errors and configuration.

pub mod backoff;
pub mod cancel;
pub mod config;
pub mod error;
pub mod job;
pub mod slots;
pub mod volume;

pub use error::{ProviderError, ProviderErrorKind, Result, StowageError};
pub use job::{FailurePolicy, JobInfo};
pub use slots::UploadSlots;
pub use volume::Volume;
