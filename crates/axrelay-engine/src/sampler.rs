//! Focus sampling with failure backoff.
//!
//! The sampler runs once per engine tick. Sampling failures (no permission,
//! nothing focused, unresolvable owner) never stop the loop; instead the next
//! few ticks are skipped, doubling the gap on each consecutive failure up to a
//! configured ceiling.

use tracing::{debug, info, warn};

use crate::source::{AccessibilitySource, FocusedApplication, SourceError};

/// Consecutive-failure tracker that decides which ticks to skip.
#[derive(Debug, Clone)]
pub struct SampleBackoff {
    /// Consecutive failures so far.
    failures: u32,
    /// Ticks still to skip before the next attempt.
    skip_remaining: u32,
    /// Upper bound on ticks skipped after a failure.
    max_skip: u32,
}

impl SampleBackoff {
    /// Create a tracker that never skips more than `max_skip` ticks in a row.
    pub fn new(max_skip: u32) -> Self {
        Self {
            failures: 0,
            skip_remaining: 0,
            max_skip,
        }
    }

    /// Consume one tick. Returns true when this tick should be skipped.
    pub fn should_skip(&mut self) -> bool {
        if self.skip_remaining > 0 {
            self.skip_remaining -= 1;
            true
        } else {
            false
        }
    }

    /// Record a failed attempt and arm the skip counter.
    pub fn on_failure(&mut self, err: &SourceError) {
        self.failures = self.failures.saturating_add(1);
        let shift = (self.failures - 1).min(31);
        let skip = ((1u64 << shift) - 1).min(u64::from(self.max_skip));
        self.skip_remaining = u32::try_from(skip).unwrap_or(self.max_skip);
        if self.failures == 1 {
            warn!(error = %err, "focus sampling failed");
        } else {
            debug!(
                error = %err,
                failures = self.failures,
                skip = self.skip_remaining,
                "focus sampling still failing"
            );
        }
    }

    /// Record a successful attempt and reset.
    pub fn on_success(&mut self) {
        if self.failures > 0 {
            info!(failures = self.failures, "focus sampling recovered");
        }
        self.failures = 0;
        self.skip_remaining = 0;
    }

    /// Consecutive failures so far.
    pub fn failures(&self) -> u32 {
        self.failures
    }
}

/// Samples the system-wide focused application once per tick.
#[derive(Debug, Clone)]
pub struct FocusSampler {
    /// Failure backoff.
    backoff: SampleBackoff,
}

impl FocusSampler {
    /// Create a sampler with the given backoff ceiling in ticks.
    pub fn new(max_backoff_ticks: u32) -> Self {
        Self {
            backoff: SampleBackoff::new(max_backoff_ticks),
        }
    }

    /// Sample the focused element and resolve its owning application.
    ///
    /// Returns `None` when the tick is skipped by backoff or the sample fails.
    pub fn sample<S>(&mut self, source: &mut S) -> Option<FocusedApplication>
    where
        S: AccessibilitySource + ?Sized,
    {
        if self.backoff.should_skip() {
            return None;
        }
        let result = source
            .sample_focused_element()
            .and_then(|el| source.resolve_application(&el));
        match result {
            Ok(app) => {
                self.backoff.on_success();
                Some(app)
            }
            Err(err) => {
                self.backoff.on_failure(&err);
                None
            }
        }
    }

    /// Backoff state, for inspection.
    pub fn backoff(&self) -> &SampleBackoff {
        &self.backoff
    }
}
