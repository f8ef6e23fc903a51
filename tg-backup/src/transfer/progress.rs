//! Byte-level progress tracking for uploads.
//!
//! Progress is observational only: nothing in the pipeline branches on it.

use std::time::{Duration, Instant};

/// Minimum spacing between two progress reports
pub const DEFAULT_REPORT_INTERVAL: Duration = Duration::from_millis(300);

/// A progress observation handed to the report callback
#[derive(Debug, Clone, PartialEq)]
pub struct TransferProgress {
    /// Total bytes to transfer
    pub total_bytes: u64,

    /// Bytes transferred so far
    pub transferred_bytes: u64,

    /// Average speed since the start in bytes/second
    pub bytes_per_second: u64,

    /// Percentage complete (0-100)
    pub percent_complete: f64,

    /// Set on the single final report
    pub finished: bool,
}

/// Accumulates bytes read and decides when a report is due.
///
/// Reports are rate limited to one per interval, except the final one which
/// is always emitted, exactly once, when the total is reached or the source
/// hits end of file.
#[derive(Debug)]
pub struct UploadProgress {
    total_bytes: u64,
    read_bytes: u64,
    start_time: Instant,
    last_report: Instant,
    interval: Duration,
    finished: bool,
}

impl UploadProgress {
    pub fn new(total_bytes: u64, interval: Duration) -> Self {
        let now = Instant::now();
        Self {
            total_bytes,
            read_bytes: 0,
            start_time: now,
            last_report: now,
            interval,
            finished: false,
        }
    }

    /// Record `n` newly read bytes; `eof` marks a zero-length read at end of
    /// input. Returns an observation when one should be reported.
    pub fn advance(&mut self, n: usize, eof: bool) -> Option<TransferProgress> {
        if self.finished {
            return None;
        }
        self.read_bytes += n as u64;

        let now = Instant::now();
        if eof || self.read_bytes >= self.total_bytes {
            self.finished = true;
        } else if now.duration_since(self.last_report) < self.interval {
            return None;
        }

        self.last_report = now;
        Some(self.snapshot(now))
    }

    pub fn read_bytes(&self) -> u64 {
        self.read_bytes
    }

    fn snapshot(&self, now: Instant) -> TransferProgress {
        let elapsed = now.duration_since(self.start_time).as_secs_f64();
        let bytes_per_second = if elapsed > 0.0 {
            (self.read_bytes as f64 / elapsed) as u64
        } else {
            0
        };
        let percent_complete = if self.total_bytes > 0 {
            ((self.read_bytes as f64 / self.total_bytes as f64) * 100.0).min(100.0)
        } else {
            100.0
        };

        TransferProgress {
            total_bytes: self.total_bytes,
            transferred_bytes: self.read_bytes,
            bytes_per_second,
            percent_complete,
            finished: self.finished,
        }
    }
}

/// Format bytes as human-readable string
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

/// Format speed as human-readable string
pub fn format_speed(bytes_per_second: u64) -> String {
    format!("{}/s", format_bytes(bytes_per_second))
}

/// Format duration as human-readable string
pub fn format_duration(seconds: u64) -> String {
    if seconds < 60 {
        format!("{}s", seconds)
    } else if seconds < 3600 {
        format!("{}m {}s", seconds / 60, seconds % 60)
    } else {
        format!("{}h {}m", seconds / 3600, (seconds % 3600) / 60)
    }
}
