use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;

/// Shortest delay handed out, whatever the configured initial delay and ceiling.
pub const MIN_DELAY: Duration = Duration::from_millis(100);

/// Capped exponential backoff bounded by a wall-clock budget.
///
/// Each delay doubles the previous one up to `ceiling`. With jitter enabled a
/// delay is drawn from `[d/2, d]`. No delay ever reaches past the budget, and
/// once the budget is spent [`Backoff::next_delay`] returns `None`. Both the
/// initial delay and the ceiling are raised to at least [`MIN_DELAY`].
#[derive(Debug, Clone)]
pub struct Backoff {
    next: Duration,
    ceiling: Duration,
    budget: Duration,
    started: Instant,
    jitter: bool,
}

impl Backoff {
    pub fn new(initial: Duration, ceiling: Duration, budget: Duration) -> Self {
        let ceiling = ceiling.max(MIN_DELAY);
        Self {
            next: initial.max(MIN_DELAY).min(ceiling),
            ceiling,
            budget,
            started: Instant::now(),
            jitter: true,
        }
    }

    /// Use the exact exponential schedule.
    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    /// Time spent since the backoff was created.
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// The delay to wait before the next attempt, or `None` if the budget is spent.
    pub fn next_delay(&mut self) -> Option<Duration> {
        let remaining = self.budget.checked_sub(self.elapsed())?;
        if remaining.is_zero() {
            return None;
        }

        let base = self.next;
        self.next = (self.next * 2).min(self.ceiling);

        let delay = if self.jitter {
            let ms = base.as_millis() as u64;
            let jittered = rand::thread_rng().gen_range(ms / 2..=ms);
            Duration::from_millis(jittered)
        } else {
            base
        };

        Some(delay.min(remaining))
    }
}
