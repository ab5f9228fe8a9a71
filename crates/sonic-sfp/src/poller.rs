//! Presence poll scheduler.
//!
//! Drives a [`PresenceSource`] and a [`ChangeDetector`] at one-second
//! granularity until a change shows up or the caller's timeout runs out.
//!
//! | timeout | [`PollStrategy::Wait`] |
//! |---------|------------------------|
//! | `< 0`   | [`SfpError::InvalidTimeout`], nothing sampled |
//! | `0`     | block until a change is seen |
//! | `> 0`   | sample until a change or the deadline; an expired deadline is a clean, empty result |
//!
//! [`PollStrategy::Debounced`] never sleeps: it samples at most once per
//! `max(timeout, 1s)` after the last recorded change and otherwise returns
//! an empty result immediately.
//!
//! Sampling failures never abort a poll. They are logged, counted in
//! [`PollStats`] and treated as "no change this cycle".

use crate::bitmap::PresenceSource;
use crate::clock::Clock;
use crate::detector::{ChangeCache, ChangeDetector, PortEvents};
use crate::error::{SfpError, SfpResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Sampling granularity.
pub const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Shortest debounce window for [`PollStrategy::Debounced`].
pub const MIN_DEBOUNCE: Duration = Duration::from_millis(1000);

/// How `poll_for_change` spends the caller's timeout.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PollStrategy {
    /// Sleep and resample until a change or the deadline.
    #[default]
    Wait,
    /// Sample at most once per timeout window, never sleep.
    Debounced,
}

/// Counters since the poller was created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PollStats {
    /// Bitmap samples attempted.
    pub samples: u64,
    /// Samples that failed and were treated as "no change".
    pub read_failures: u64,
    /// Port events emitted.
    pub events: u64,
}

/// Owns the change cache and produces presence events on demand.
#[derive(Debug)]
pub struct PresencePoller<S, C> {
    source: S,
    clock: C,
    detector: ChangeDetector,
    cache: ChangeCache,
    strategy: PollStrategy,
    stats: PollStats,
}

impl<S: PresenceSource, C: Clock> PresencePoller<S, C> {
    pub fn new(source: S, clock: C, detector: ChangeDetector, strategy: PollStrategy) -> Self {
        let cache = detector.initial_cache();
        Self {
            source,
            clock,
            detector,
            cache,
            strategy,
            stats: PollStats::default(),
        }
    }

    pub fn strategy(&self) -> PollStrategy {
        self.strategy
    }

    pub fn cache(&self) -> &ChangeCache {
        &self.cache
    }

    pub fn stats(&self) -> PollStats {
        self.stats
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Waits for presence changes as configured by the strategy.
    pub fn poll_for_change(&mut self, timeout_ms: i64) -> SfpResult<PortEvents> {
        let timeout = u64::try_from(timeout_ms)
            .map(Duration::from_millis)
            .map_err(|_| SfpError::InvalidTimeout(timeout_ms))?;

        match self.strategy {
            PollStrategy::Wait => self.wait_for_change(timeout, timeout_ms),
            PollStrategy::Debounced => Ok(self.debounced(timeout)),
        }
    }

    fn wait_for_change(&mut self, timeout: Duration, timeout_ms: i64) -> SfpResult<PortEvents> {
        let blocking = timeout.is_zero();
        let start = self.clock.now();
        let deadline = start
            .checked_add(timeout)
            .ok_or(SfpError::ClockSkew { timeout_ms })?;

        loop {
            let events = self.sample();
            if !events.is_empty() {
                return Ok(events);
            }

            if blocking {
                self.clock.sleep(POLL_INTERVAL);
                continue;
            }

            let remaining = deadline.saturating_sub(self.clock.now());
            if remaining >= POLL_INTERVAL {
                self.clock.sleep(POLL_INTERVAL);
            } else {
                if !remaining.is_zero() {
                    self.clock.sleep(remaining);
                }
                debug!(timeout_ms, "presence poll timed out without change");
                return Ok(PortEvents::new());
            }
        }
    }

    fn debounced(&mut self, timeout: Duration) -> PortEvents {
        let window = timeout.max(MIN_DEBOUNCE);
        let now = self.clock.now();
        let next = self
            .cache
            .last_sample_time()
            .checked_add(window)
            .unwrap_or(Duration::MAX);
        if self.cache.is_valid() && now < next {
            return PortEvents::new();
        }
        self.sample()
    }

    fn sample(&mut self) -> PortEvents {
        self.stats.samples += 1;
        let bitmap = match self.source.read_presence_bitmap() {
            Ok(bitmap) => bitmap,
            Err(e) => {
                self.stats.read_failures += 1;
                if e.is_transient() {
                    warn!(error = %e, "presence bitmap unavailable, assuming no change");
                } else {
                    error!(error = %e, "presence bitmap source failed, assuming no change");
                }
                return PortEvents::new();
            }
        };

        let now = self.clock.now();
        let events: PortEvents = self
            .detector
            .diff(bitmap, &mut self.cache, now)
            .into_iter()
            .map(|e| (e.port, e.state))
            .collect();

        if !events.is_empty() {
            self.stats.events += events.len() as u64;
            let inserted = events.values().filter(|s| s.is_present()).count();
            info!(
                bitmap = %bitmap,
                inserted,
                removed = events.len() - inserted,
                "transceiver presence changed"
            );
        }
        events
    }
}
