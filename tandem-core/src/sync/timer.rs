use std::time::Duration;

use tokio::time::Instant;

use super::SyncError;

/// Bounds the wall-clock duration of one sync session.
#[derive(Debug, Clone, Copy)]
pub struct SyncTimer {
    started: Instant,
    max: Duration,
}

impl SyncTimer {
    pub fn start(max: Duration) -> Self {
        Self {
            started: Instant::now(),
            max,
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Fails with [`SyncError::Timeout`] once the maximum duration is
    /// exceeded.
    pub fn tick(&self) -> Result<(), SyncError> {
        let elapsed = self.elapsed();
        if elapsed > self.max {
            return Err(SyncError::Timeout {
                elapsed,
                max: self.max,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_tick_fails_after_max_duration() {
        let timer = SyncTimer::start(Duration::from_secs(5));
        assert!(timer.tick().is_ok());

        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(timer.tick().is_ok());

        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(matches!(timer.tick(), Err(SyncError::Timeout { .. })));
    }
}
