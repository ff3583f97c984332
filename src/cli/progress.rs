//! Progress display module
//!
//! Handles displaying session progress in the CLI.

use std::io::{self, Write};
use std::time::{Duration, Instant};

use crate::session::{DownloadStatus, SeedStatus};

/// Format bytes to human readable string
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    format!("{:.2} {}", size, UNITS[unit_index])
}

/// Format speed to human readable string
pub fn format_speed(bytes_per_sec: f64) -> String {
    format!("{}/s", format_bytes(bytes_per_sec as u64))
}

/// Format duration to human readable string
pub fn format_duration(duration: Duration) -> String {
    let total_secs = duration.as_secs();
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;

    if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}

/// Time left at the current speed, if it can be estimated
pub fn calculate_eta(downloaded: u64, total: u64, speed: f64) -> Option<Duration> {
    if speed <= 0.0 || downloaded >= total {
        return None;
    }

    let remaining = total.saturating_sub(downloaded) as f64;
    Some(Duration::from_secs_f64(remaining / speed))
}

/// Single-line progress output for the CLI
pub struct ProgressDisplay {
    start_time: Instant,
    last_update: Option<Instant>,
    update_interval: Duration,
    quiet: bool,
}

impl ProgressDisplay {
    pub fn new(quiet: bool) -> Self {
        Self::with_interval(quiet, Duration::from_millis(500))
    }

    pub fn with_interval(quiet: bool, interval: Duration) -> Self {
        Self {
            start_time: Instant::now(),
            last_update: None,
            update_interval: interval,
            quiet,
        }
    }

    fn due(&mut self) -> bool {
        if self.quiet {
            return false;
        }
        if let Some(last) = self.last_update {
            if last.elapsed() < self.update_interval {
                return false;
            }
        }
        self.last_update = Some(Instant::now());
        true
    }

    /// Redraw the download line, rate-limited to the update interval
    pub fn update_download(&mut self, status: &DownloadStatus) -> io::Result<()> {
        if !self.due() {
            return Ok(());
        }
        print!("\r\x1b[2K{}", Self::download_line(status));
        io::stdout().flush()
    }

    /// Redraw the seeding line, rate-limited to the update interval
    pub fn update_seed(&mut self, status: &SeedStatus) -> io::Result<()> {
        if !self.due() {
            return Ok(());
        }
        print!(
            "\r\x1b[2KSeeding | Peers: {} | Blocks served: {} | ↑ {} | Up {}",
            status.connected_peers,
            status.blocks_served,
            format_bytes(status.bytes_uploaded),
            format_duration(self.elapsed()),
        );
        io::stdout().flush()
    }

    /// Progress line for a download status
    pub fn download_line(status: &DownloadStatus) -> String {
        let percent = status.progress() * 100.0;
        let bar_width: usize = 40;
        let filled = ((percent / 100.0) * bar_width as f64) as usize;
        let bar = "=".repeat(filled) + &" ".repeat(bar_width.saturating_sub(filled));

        let eta = calculate_eta(status.bytes_downloaded, status.total_bytes, status.speed)
            .map(format_duration)
            .unwrap_or_else(|| "∞".to_string());

        format!(
            "[{}] {:.1}% | {}/{} pieces | ↓ {} | Peers: {} | ETA: {}",
            bar,
            percent,
            status.downloaded_pieces,
            status.total_pieces,
            format_speed(status.speed),
            status.connected_peers,
            eta,
        )
    }

    /// Print completion message
    pub fn print_complete(&self, status: &DownloadStatus) -> io::Result<()> {
        if self.quiet {
            return Ok(());
        }
        println!("\r\x1b[2K");
        println!("Download Complete!");
        println!("  Pieces: {} / {}", status.downloaded_pieces, status.total_pieces);
        println!("  Received: {}", format_bytes(status.bytes_downloaded));
        println!("  Elapsed Time: {}", format_duration(self.elapsed()));
        Ok(())
    }

    /// Print a status message
    pub fn print_status(&self, message: &str) -> io::Result<()> {
        if self.quiet {
            return Ok(());
        }
        println!("\r\x1b[2K{}", message);
        Ok(())
    }

    /// Get the elapsed time since start
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    pub fn is_quiet(&self) -> bool {
        self.quiet
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0.00 B");
        assert_eq!(format_bytes(1024), "1.00 KB");
        assert_eq!(format_bytes(1024 * 1024), "1.00 MB");
        assert_eq!(format_bytes(1024 * 1024 * 1024), "1.00 GB");
    }

    #[test]
    fn test_format_speed() {
        assert_eq!(format_speed(1024.0), "1.00 KB/s");
        assert_eq!(format_speed(1024.0 * 1024.0), "1.00 MB/s");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_secs(30)), "30s");
        assert_eq!(format_duration(Duration::from_secs(90)), "1m 30s");
        assert_eq!(format_duration(Duration::from_secs(3661)), "1h 1m 1s");
    }

    #[test]
    fn test_calculate_eta() {
        assert_eq!(calculate_eta(50, 100, 10.0), Some(Duration::from_secs(5)));
        assert_eq!(calculate_eta(100, 100, 10.0), None);
        assert_eq!(calculate_eta(50, 100, 0.0), None);
    }

    #[test]
    fn test_download_line() {
        let status = DownloadStatus {
            downloaded_pieces: 1,
            total_pieces: 2,
            total_bytes: 100,
            ..Default::default()
        };
        let line = ProgressDisplay::download_line(&status);
        assert!(line.contains("50.0%"));
        assert!(line.contains("1/2 pieces"));
    }

    #[test]
    fn test_quiet_display_never_due() {
        let mut display = ProgressDisplay::new(true);
        assert!(display.is_quiet());
        assert!(!display.due());
    }
}
