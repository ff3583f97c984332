//! Session statistics
//!
//! Status snapshots handed to front ends, plus the sampling used for the
//! download speed estimate.

use std::sync::Mutex;
use std::time::Instant;

/// Lifecycle of a download session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Idle,
    Running,
    Completed,
    Stopped,
}

/// Snapshot of a download session
#[derive(Debug, Clone, Default)]
pub struct DownloadStatus {
    pub state: SessionState,
    pub downloaded_pieces: usize,
    pub total_pieces: usize,
    /// Payload bytes received this session
    pub bytes_downloaded: u64,
    /// Total content length
    pub total_bytes: u64,
    /// Bytes per second since the previous status sample
    pub speed: f64,
    pub connected_peers: usize,
}

impl DownloadStatus {
    /// Download progress (0.0 to 1.0)
    pub fn progress(&self) -> f64 {
        if self.total_pieces == 0 {
            return 0.0;
        }
        self.downloaded_pieces as f64 / self.total_pieces as f64
    }
}

/// Snapshot of a seed session
#[derive(Debug, Clone, Default)]
pub struct SeedStatus {
    pub running: bool,
    pub connected_peers: usize,
    pub blocks_served: u64,
    pub bytes_uploaded: u64,
}

/// Byte-rate estimate over the interval between consecutive samples
#[derive(Debug)]
pub struct RateEstimator {
    last: Mutex<(Instant, u64)>,
}

impl RateEstimator {
    pub fn new() -> Self {
        Self { last: Mutex::new((Instant::now(), 0)) }
    }

    /// Rate since the previous call, given the running byte total
    pub fn sample(&self, total: u64) -> f64 {
        self.sample_at(Instant::now(), total)
    }

    fn sample_at(&self, now: Instant, total: u64) -> f64 {
        let mut last = match self.last.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let (then, previous) = *last;
        let elapsed = now.saturating_duration_since(then).as_secs_f64();
        *last = (now, total);
        if elapsed <= 0.0 {
            return 0.0;
        }
        total.saturating_sub(previous) as f64 / elapsed
    }
}

impl Default for RateEstimator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_rate_over_interval() {
        let estimator = RateEstimator::new();
        let start = Instant::now();
        estimator.sample_at(start, 0);
        let rate = estimator.sample_at(start + Duration::from_secs(2), 4096);
        assert!((rate - 2048.0).abs() < 1e-6);

        // next interval only counts new bytes
        let rate = estimator.sample_at(start + Duration::from_secs(3), 5120);
        assert!((rate - 1024.0).abs() < 1e-6);
    }

    #[test]
    fn test_rate_zero_interval() {
        let estimator = RateEstimator::new();
        let now = Instant::now();
        estimator.sample_at(now, 10);
        assert_eq!(estimator.sample_at(now, 20), 0.0);
    }

    #[test]
    fn test_progress() {
        let status = DownloadStatus { downloaded_pieces: 1, total_pieces: 4, ..Default::default() };
        assert_eq!(status.progress(), 0.25);
        assert_eq!(DownloadStatus::default().progress(), 0.0);
    }
}
