//! Per-generator request budgets.

use crate::error::{GeneratorError, GeneratorResult};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::info;

const MINUTE: Duration = Duration::from_secs(60);
const DAY: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RateLimits {
    pub per_minute: Option<u32>,
    pub per_day: Option<u32>,
}

impl RateLimits {
    /// Zero means "no limit", same as absent.
    pub fn new(per_minute: Option<u32>, per_day: Option<u32>) -> Self {
        Self {
            per_minute: per_minute.filter(|n| *n > 0),
            per_day: per_day.filter(|n| *n > 0),
        }
    }

    pub fn unlimited() -> Self {
        Self::default()
    }
}

#[derive(Debug, Default)]
struct Windows {
    minute: VecDeque<Instant>,
    day: VecDeque<Instant>,
}

impl Windows {
    fn prune(&mut self, now: Instant) {
        while matches!(self.minute.front(), Some(t) if now.duration_since(*t) >= MINUTE) {
            self.minute.pop_front();
        }
        while matches!(self.day.front(), Some(t) if now.duration_since(*t) >= DAY) {
            self.day.pop_front();
        }
    }
}

/// Sliding-window limiter shared by every call a generator client makes.
///
/// A full per-minute window makes `acquire` wait for the oldest request to
/// age out. An exhausted per-day budget fails immediately with
/// `GeneratorError::RateLimited`, since waiting would block for hours.
#[derive(Debug)]
pub struct RateLimiter {
    name: String,
    limits: RateLimits,
    windows: Mutex<Windows>,
}

impl RateLimiter {
    pub fn new(name: impl Into<String>, limits: RateLimits) -> Self {
        Self {
            name: name.into(),
            limits,
            windows: Mutex::new(Windows::default()),
        }
    }

    pub fn limits(&self) -> RateLimits {
        self.limits
    }

    pub async fn acquire(&self) -> GeneratorResult<()> {
        loop {
            let wait = {
                let mut windows = self.windows.lock().await;
                let now = Instant::now();
                windows.prune(now);

                if let Some(per_day) = self.limits.per_day {
                    if windows.day.len() >= per_day as usize {
                        return Err(GeneratorError::RateLimited(format!(
                            "{} reached its daily limit of {} requests",
                            self.name, per_day
                        )));
                    }
                }

                let full = self
                    .limits
                    .per_minute
                    .is_some_and(|per_minute| windows.minute.len() >= per_minute as usize);
                match windows.minute.front().copied() {
                    Some(oldest) if full => MINUTE.saturating_sub(now.duration_since(oldest)),
                    _ => {
                        windows.minute.push_back(now);
                        windows.day.push_back(now);
                        return Ok(());
                    }
                }
            };

            info!(
                "{} hit its per-minute limit, waiting {:.1}s",
                self.name,
                wait.as_secs_f64()
            );
            tokio::time::sleep(wait).await;
        }
    }
}
