use crate::application::training::cancel::CancelToken;
use crate::domain::errors::TrainingError;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

/// Sliding-window request limiter for the market data provider.
///
/// At most `max_calls` permits are granted inside any `window`. Callers are served one
/// at a time, so requests are serialized in arrival order.
pub struct RequestThrottler {
    max_calls: u32,
    window: Duration,
    recent_calls: Mutex<VecDeque<Instant>>,
}

impl RequestThrottler {
    pub fn new(max_calls_per_minute: u32) -> Self {
        Self::with_window(max_calls_per_minute, Duration::from_secs(60))
    }

    pub fn with_window(max_calls: u32, window: Duration) -> Self {
        Self {
            max_calls: max_calls.max(1),
            window,
            recent_calls: Mutex::new(VecDeque::new()),
        }
    }

    pub fn max_calls(&self) -> u32 {
        self.max_calls
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Waits for a permit and returns the instant it was granted.
    /// Returns `Cancelled` if the token fires while waiting.
    pub async fn acquire(&self, cancel: &CancelToken) -> Result<Instant, TrainingError> {
        let mut recent = self.recent_calls.lock().await;

        loop {
            cancel.check()?;
            let now = Instant::now();
            Self::cleanup_old_timestamps(&mut recent, now, self.window);

            if (recent.len() as u32) < self.max_calls {
                recent.push_back(now);
                return Ok(now);
            }

            let Some(&oldest) = recent.front() else {
                continue;
            };
            let wait = (oldest + self.window).saturating_duration_since(now);
            debug!(
                "RequestThrottler: Rate limit reached ({} calls/{:?}). Waiting {:?}",
                self.max_calls, self.window, wait
            );

            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = cancel.cancelled() => return Err(TrainingError::Cancelled),
            }
        }
    }

    /// Permits granted inside the current window
    pub async fn calls_in_window(&self) -> usize {
        let mut recent = self.recent_calls.lock().await;
        Self::cleanup_old_timestamps(&mut recent, Instant::now(), self.window);
        recent.len()
    }

    fn cleanup_old_timestamps(recent: &mut VecDeque<Instant>, now: Instant, window: Duration) {
        while let Some(&timestamp) = recent.front() {
            if now.duration_since(timestamp) >= window {
                recent.pop_front();
            } else {
                break;
            }
        }
    }
}
