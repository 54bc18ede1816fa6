//! Bringing archived objects back to a readable tier.
//!
//! The transitions are pure functions over probe results; [`ensure_available`]
//! drives them against a [`RestoreTarget`] and a poll schedule.

use std::time::Duration;

use async_trait::async_trait;
use stowage_core::ProviderErrorKind;
use stowage_core::backoff::Backoff;
use stowage_core::cancel::{cancellable, sleep_or_cancel};
use stowage_core::config::RestoreSettings;
use stowage_core::error::{Result, StowageError};
use tokio_util::sync::CancellationToken;

/// Whether an object's storage class needs a restore before it can be read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageTier {
    Standard,
    Archival,
}

impl StorageTier {
    /// Classify an S3-style storage class name. A missing class means STANDARD.
    pub fn from_storage_class(class: Option<&str>) -> Self {
        match class {
            Some("GLACIER") | Some("DEEP_ARCHIVE") => StorageTier::Archival,
            _ => StorageTier::Standard,
        }
    }
}

/// Restore progress reported by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreStatus {
    /// No restore status attribute.
    Absent,
    Ongoing,
    /// A restored copy is readable. Any expiry date is ignored.
    Completed,
}

impl RestoreStatus {
    /// Parse an `x-amz-restore` style header such as
    /// `ongoing-request="false", expiry-date="Wed, 07 Nov 2012 00:00:00 GMT"`.
    pub fn parse(header: Option<&str>) -> Self {
        let Some(header) = header.map(str::trim).filter(|h| !h.is_empty()) else {
            return RestoreStatus::Absent;
        };
        let Some(rest) = header
            .split_once("ongoing-request=")
            .map(|(_, rest)| rest.trim_start_matches('"'))
        else {
            return RestoreStatus::Absent;
        };

        if rest.starts_with("true") {
            RestoreStatus::Ongoing
        } else if rest.starts_with("false") {
            RestoreStatus::Completed
        } else {
            RestoreStatus::Absent
        }
    }
}

/// Result of a metadata probe on one object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Probe {
    pub tier: StorageTier,
    pub status: RestoreStatus,
}

/// Per-key restore state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreState {
    /// Not archived; nothing to do.
    Standard,
    ArchivedUnrequested,
    RestoreRequested,
    Restoring,
    Available,
}

impl RestoreState {
    /// State implied by the first probe of a key.
    pub fn from_probe(probe: &Probe) -> Self {
        match (probe.tier, probe.status) {
            (StorageTier::Standard, _) => RestoreState::Standard,
            (StorageTier::Archival, RestoreStatus::Absent) => RestoreState::ArchivedUnrequested,
            (StorageTier::Archival, RestoreStatus::Ongoing) => RestoreState::Restoring,
            (StorageTier::Archival, RestoreStatus::Completed) => RestoreState::Available,
        }
    }

    /// State after a restore request returned `outcome`.
    ///
    /// "Already in progress" means another caller started the restore, so polling
    /// continues as if this request had succeeded.
    pub fn after_request(outcome: Result<()>) -> Result<Self> {
        match outcome {
            Ok(()) => Ok(RestoreState::RestoreRequested),
            Err(StowageError::Provider(e)) if e.kind == ProviderErrorKind::RestoreInProgress => {
                Ok(RestoreState::Restoring)
            }
            Err(e) => Err(e),
        }
    }

    /// State after a re-probe while waiting on a restore.
    pub fn after_poll(self, probe: &Probe) -> Self {
        if self.is_terminal() {
            return self;
        }
        match (probe.tier, probe.status) {
            (StorageTier::Standard, _) => RestoreState::Standard,
            (StorageTier::Archival, RestoreStatus::Ongoing) => RestoreState::Restoring,
            (StorageTier::Archival, RestoreStatus::Absent | RestoreStatus::Completed) => {
                RestoreState::Available
            }
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RestoreState::Standard | RestoreState::Available)
    }
}

/// Poll schedule and request parameters for restores.
#[derive(Debug, Clone)]
pub struct RestorePolicy {
    pub days: i32,
    pub tier: String,
    pub poll_interval: Duration,
    pub max_poll_interval: Duration,
    pub max_poll: Duration,
}

impl From<&RestoreSettings> for RestorePolicy {
    fn from(s: &RestoreSettings) -> Self {
        Self {
            days: s.days,
            tier: s.tier.clone(),
            poll_interval: s.poll_interval(),
            max_poll_interval: s.max_poll_interval(),
            max_poll: s.max_poll(),
        }
    }
}

impl Default for RestorePolicy {
    fn default() -> Self {
        Self::from(&RestoreSettings::default())
    }
}

/// Metadata probe and restore request for one provider.
#[async_trait]
pub trait RestoreTarget: Send + Sync {
    async fn probe(&self, key: &str) -> Result<Probe>;

    async fn request_restore(&self, key: &str, policy: &RestorePolicy) -> Result<()>;
}

/// Drive `key` to a readable state, returning the terminal state reached.
pub async fn ensure_available<T>(
    target: &T,
    key: &str,
    policy: &RestorePolicy,
    cancel: &CancellationToken,
) -> Result<RestoreState>
where
    T: RestoreTarget + ?Sized,
{
    let probe = cancellable(cancel, target.probe(key)).await?;
    let mut state = RestoreState::from_probe(&probe);
    tracing::debug!(key, ?probe, ?state, "probed object");

    if state == RestoreState::ArchivedUnrequested {
        let outcome = cancellable(cancel, target.request_restore(key, policy)).await;
        if let Err(StowageError::Cancelled) = outcome {
            return Err(StowageError::Cancelled);
        }
        state = RestoreState::after_request(outcome)?;
        match state {
            RestoreState::Restoring => {
                tracing::warn!(key, "restore already in progress, waiting for it to finish")
            }
            _ => tracing::info!(key, tier = %policy.tier, days = policy.days, "requested restore"),
        }
    }

    let mut schedule = Backoff::new(
        policy.poll_interval,
        policy.max_poll_interval,
        policy.max_poll,
    )
    .without_jitter();
    while !state.is_terminal() {
        let Some(delay) = schedule.next_delay() else {
            return Err(StowageError::RestoreTimeout {
                key: key.to_string(),
                waited: schedule.elapsed(),
            });
        };
        sleep_or_cancel(cancel, delay).await?;

        let probe = cancellable(cancel, target.probe(key)).await?;
        state = state.after_poll(&probe);
        tracing::debug!(key, ?probe, ?state, "polled restore");
    }

    if state == RestoreState::Available {
        tracing::info!(key, "object is available");
    }
    Ok(state)
}
