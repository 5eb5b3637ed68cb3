//! Blocking wait for a freshly booted instance's remote shell service.
//!
//! Provider status only says the machine is running; `sshd` typically comes
//! up some seconds later. The poller repeatedly runs a caller supplied probe
//! until it reports success. For the first [`SOFT_DEADLINE`] it sleeps
//! [`POLL_INTERVAL`] between attempts and prints a progress marker; after
//! that it retries back-to-back. Without a hard timeout the loop only ends
//! when the probe succeeds or fails outright.

use std::io::Write;
use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, info, warn};

/// Time after which the poller stops sleeping between attempts.
pub const SOFT_DEADLINE: Duration = Duration::from_secs(30);

/// Pause between attempts before the soft deadline.
pub const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Source of time for blocking waits, swappable in tests.
pub trait Clock {
    /// Returns the current instant.
    fn now(&self) -> Instant;

    /// Blocks the calling thread for `duration`.
    fn sleep(&self, duration: Duration);
}

/// Wall clock backed by [`Instant`] and [`thread::sleep`].
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) {
        thread::sleep(duration);
    }
}

/// Summary of a successful wait.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PollReport {
    /// Number of probe attempts, including the successful one.
    pub attempts: u32,
    /// Time between the first attempt and success.
    pub elapsed: Duration,
}

/// Errors raised while waiting for readiness.
#[derive(Debug, Error)]
pub enum ReadinessError<E>
where
    E: std::error::Error + 'static,
{
    /// The probe itself failed rather than reporting "not yet".
    #[error("readiness probe failed: {0}")]
    Probe(#[source] E),
    /// The configured hard timeout elapsed.
    #[error("remote shell not reachable after {attempts} attempts ({elapsed_secs}s)")]
    Timeout {
        /// Attempts made before giving up.
        attempts: u32,
        /// Whole seconds spent waiting.
        elapsed_secs: u64,
    },
}

/// Retry loop used to detect remote shell readiness.
#[derive(Clone, Debug)]
pub struct ReadinessPoller<C: Clock = SystemClock> {
    clock: C,
    soft_deadline: Duration,
    interval: Duration,
    hard_timeout: Option<Duration>,
}

impl Default for ReadinessPoller<SystemClock> {
    fn default() -> Self {
        Self::new(SystemClock)
    }
}

impl<C: Clock> ReadinessPoller<C> {
    /// Creates a poller with the standard soft deadline and no hard timeout.
    #[must_use]
    pub const fn new(clock: C) -> Self {
        Self {
            clock,
            soft_deadline: SOFT_DEADLINE,
            interval: POLL_INTERVAL,
            hard_timeout: None,
        }
    }

    /// Gives up with [`ReadinessError::Timeout`] once `timeout` has elapsed.
    #[must_use]
    pub const fn with_hard_timeout(mut self, timeout: Duration) -> Self {
        self.hard_timeout = Some(timeout);
        self
    }

    /// Overrides the soft deadline.
    #[must_use]
    pub const fn with_soft_deadline(mut self, deadline: Duration) -> Self {
        self.soft_deadline = deadline;
        self
    }

    /// Overrides the pause between attempts.
    #[must_use]
    pub const fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Returns the clock used for waits.
    #[must_use]
    pub const fn clock(&self) -> &C {
        &self.clock
    }

    /// Returns the configured hard timeout, if any.
    #[must_use]
    pub const fn hard_timeout(&self) -> Option<Duration> {
        self.hard_timeout
    }

    /// Runs `probe` until it returns `Ok(true)`.
    ///
    /// `label` names the box in the progress line written to `progress`.
    /// Progress output is best-effort; write failures are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`ReadinessError::Probe`] as soon as the probe errors, or
    /// [`ReadinessError::Timeout`] when a hard timeout is set and elapses.
    pub fn wait<F, E, W>(
        &self,
        label: &str,
        progress: &mut W,
        mut probe: F,
    ) -> Result<PollReport, ReadinessError<E>>
    where
        F: FnMut() -> Result<bool, E>,
        E: std::error::Error + 'static,
        W: Write,
    {
        let started = self.clock.now();
        let mut attempts: u32 = 0;
        write!(progress, "..waiting for sshd on {label} to come online").ok();
        progress.flush().ok();

        loop {
            attempts = attempts.saturating_add(1);
            let reachable = probe().map_err(|err| {
                writeln!(progress).ok();
                ReadinessError::Probe(err)
            })?;
            let elapsed = self.clock.now().saturating_duration_since(started);

            if reachable {
                writeln!(progress).ok();
                info!(
                    label,
                    attempts,
                    elapsed_secs = elapsed.as_secs(),
                    "remote shell reachable"
                );
                return Ok(PollReport { attempts, elapsed });
            }

            debug!(
                label,
                attempt = attempts,
                elapsed_secs = elapsed.as_secs(),
                "remote shell not reachable yet"
            );

            if let Some(limit) = self.hard_timeout
                && elapsed >= limit
            {
                writeln!(progress).ok();
                warn!(label, attempts, "gave up waiting for remote shell");
                return Err(ReadinessError::Timeout {
                    attempts,
                    elapsed_secs: elapsed.as_secs(),
                });
            }

            if elapsed < self.soft_deadline {
                write!(progress, ".").ok();
                progress.flush().ok();
                self.clock.sleep(self.interval);
            }
        }
    }
}
