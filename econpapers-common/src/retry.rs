use std::{
    fmt,
    sync::atomic::{AtomicBool, Ordering},
    thread,
    time::{Duration, Instant},
};

use log::warn;
use rand::Rng;

use crate::error::{Error, Result as CommonResult};

const STOP_POLL: Duration = Duration::from_millis(200);
const MAX_PAUSE: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SleepRange {
    pub min: Duration,
    pub max: Duration,
}

fn pause_from_secs(name: &'static str, secs: f64) -> CommonResult<Duration> {
    let pause = Duration::try_from_secs_f64(secs).map_err(|e| Error::InvalidSetting {
        name,
        reason: format!("{} ({})", secs, e),
    })?;
    if pause > MAX_PAUSE {
        return Err(Error::InvalidSetting {
            name,
            reason: format!("{}s is longer than {}s", secs, MAX_PAUSE.as_secs()),
        });
    }
    Ok(pause)
}

impl SleepRange {
    /// A `max` below `min` collapses to a fixed pause of `min`.
    pub fn from_secs(min: f64, max: f64) -> CommonResult<Self> {
        let min = pause_from_secs("min-sleep", min)?;
        let max = pause_from_secs("max-sleep", max)?.max(min);
        Ok(SleepRange { min, max })
    }

    pub fn sample(&self) -> Duration {
        if self.max <= self.min {
            return self.min;
        }
        rand::thread_rng().gen_range(self.min..=self.max)
    }

    pub fn pause(&self, stop: Option<&AtomicBool>) -> bool {
        sleep_unless_stopped(self.sample(), stop)
    }
}

/// Returns `false` if `stop` was raised before `duration` passed.
pub fn sleep_unless_stopped(duration: Duration, stop: Option<&AtomicBool>) -> bool {
    let Some(stop) = stop else {
        thread::sleep(duration);
        return true;
    };
    let deadline = Instant::now() + duration;
    loop {
        if stop.load(Ordering::SeqCst) {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        thread::sleep((deadline - now).min(STOP_POLL));
    }
}

/// Bounded retry with exponential backoff plus random jitter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt; total attempts = `max_retries + 1`.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub jitter: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            jitter: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
        }
    }
}

#[derive(Debug)]
pub enum RetryError<E> {
    Exhausted { attempts: u32, last: E },
    Cancelled { attempts: u32, last: Option<E> },
}

impl<E: fmt::Display> fmt::Display for RetryError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryError::Exhausted { attempts, last } => {
                write!(f, "gave up after {} attempts: {}", attempts, last)
            }
            RetryError::Cancelled { attempts, .. } => {
                write!(f, "cancelled after {} attempts", attempts)
            }
        }
    }
}

impl RetryPolicy {
    pub fn with_max_retries(max_retries: u32) -> Self {
        RetryPolicy {
            max_retries,
            ..Default::default()
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Delay before retry number `retry` (1-based): `base * 2^retry`, capped,
    /// plus up to `jitter`.
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 1u32 << retry.min(16);
        let delay = self.base_delay.saturating_mul(factor).min(self.max_delay);
        if self.jitter.is_zero() {
            return delay;
        }
        delay + rand::thread_rng().gen_range(Duration::ZERO..=self.jitter)
    }

    pub fn run<T, E, F>(
        &self,
        label: &str,
        stop: Option<&AtomicBool>,
        mut op: F,
    ) -> Result<T, RetryError<E>>
    where
        E: fmt::Display,
        F: FnMut(u32) -> Result<T, E>,
    {
        let mut last = None;
        for attempt in 1..=self.max_attempts() {
            if stop.map_or(false, |s| s.load(Ordering::SeqCst)) {
                return Err(RetryError::Cancelled {
                    attempts: attempt - 1,
                    last,
                });
            }
            match op(attempt) {
                Ok(value) => return Ok(value),
                Err(e) if attempt < self.max_attempts() => {
                    warn!("Retry {}/{} for {}: {}", attempt, self.max_retries, label, e);
                    last = Some(e);
                    if !sleep_unless_stopped(self.backoff(attempt), stop) {
                        return Err(RetryError::Cancelled {
                            attempts: attempt,
                            last,
                        });
                    }
                }
                Err(e) => {
                    return Err(RetryError::Exhausted {
                        attempts: attempt,
                        last: e,
                    })
                }
            }
        }
        unreachable!("retry loop always returns")
    }
}
