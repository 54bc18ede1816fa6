use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::config::StowageConfig;

pub const DEFAULT_MAX_PARALLEL_UPLOADS: usize = 4;
pub const DEFAULT_INITIAL_BACKOFF: Duration = Duration::from_millis(500);
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(30 * 60);
pub const DEFAULT_MAX_RETRY: Duration = Duration::from_secs(12 * 60 * 60);

/// What an upload run does after a volume fails permanently.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Keep uploading the remaining volumes; report the first error at the end.
    #[default]
    Continue,
    /// Stop taking new volumes once any volume has failed.
    Abort,
}

impl fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailurePolicy::Continue => write!(f, "continue"),
            FailurePolicy::Abort => write!(f, "abort"),
        }
    }
}

/// Limits applied to one upload run.
#[derive(Debug, Clone)]
pub struct JobInfo {
    pub max_parallel_uploads: usize,
    /// First retry delay for a volume; doubles on each transient failure.
    pub initial_backoff: Duration,
    /// Ceiling for a single retry delay.
    pub max_backoff_time: Duration,
    /// Wall-clock budget per volume across all of its attempts.
    pub max_retry_time: Duration,
    pub failure_policy: FailurePolicy,
}

impl Default for JobInfo {
    fn default() -> Self {
        Self {
            max_parallel_uploads: DEFAULT_MAX_PARALLEL_UPLOADS,
            initial_backoff: DEFAULT_INITIAL_BACKOFF,
            max_backoff_time: DEFAULT_MAX_BACKOFF,
            max_retry_time: DEFAULT_MAX_RETRY,
            failure_policy: FailurePolicy::default(),
        }
    }
}

impl JobInfo {
    pub fn from_config(config: &StowageConfig) -> Self {
        let s = &config.stowage;
        Self {
            max_parallel_uploads: s.max_parallel_uploads.max(1),
            initial_backoff: DEFAULT_INITIAL_BACKOFF,
            max_backoff_time: Duration::from_secs(s.max_backoff_secs),
            max_retry_time: Duration::from_secs(s.max_retry_secs),
            failure_policy: s.failure_policy,
        }
    }
}
