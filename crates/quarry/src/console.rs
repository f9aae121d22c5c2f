//! User-facing console output
//!
//! Drivers report notes, warnings and errors through a [`Console`] value that
//! is passed down to workers. Every line is mirrored into `tracing` and
//! counted, so summaries can report how many warnings a run produced. Tests use
//! [`Console::capture`] and inspect the lines afterwards.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

enum Sink {
    Stdout,
    Capture(Mutex<Vec<String>>),
}

struct Inner {
    sink: Sink,
    warnings: AtomicU64,
    errors: AtomicU64,
}

/// Console shared by a driver and its workers
#[derive(Clone)]
pub struct Console {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Console {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Console")
            .field("warnings", &self.warning_count())
            .field("errors", &self.error_count())
            .finish()
    }
}

impl Default for Console {
    fn default() -> Self {
        Self::stdout()
    }
}

impl Console {
    fn with_sink(sink: Sink) -> Self {
        Self {
            inner: Arc::new(Inner {
                sink,
                warnings: AtomicU64::new(0),
                errors: AtomicU64::new(0),
            }),
        }
    }

    /// Console printing to stdout
    pub fn stdout() -> Self {
        Self::with_sink(Sink::Stdout)
    }

    /// Console collecting lines in memory
    pub fn capture() -> Self {
        Self::with_sink(Sink::Capture(Mutex::new(Vec::new())))
    }

    fn emit(&self, line: String) {
        match &self.inner.sink {
            Sink::Stdout => println!("{}", line),
            Sink::Capture(lines) => lines.lock().push(line),
        }
    }

    /// Plain output line
    pub fn print(&self, message: impl AsRef<str>) {
        let message = message.as_ref();
        info!("{}", message);
        self.emit(message.to_string());
    }

    pub fn info(&self, message: impl AsRef<str>) {
        self.print(message)
    }

    pub fn note(&self, message: impl AsRef<str>) {
        let message = message.as_ref();
        info!("{}", message);
        self.emit(format!("NOTE: {}", message));
    }

    pub fn warning(&self, message: impl AsRef<str>) {
        let message = message.as_ref();
        warn!("{}", message);
        self.inner.warnings.fetch_add(1, Ordering::Relaxed);
        self.emit(format!("WARNING: {}", message));
    }

    pub fn error(&self, message: impl AsRef<str>) {
        let message = message.as_ref();
        error!("{}", message);
        self.inner.errors.fetch_add(1, Ordering::Relaxed);
        self.emit(format!("ERROR: {}", message));
    }

    pub fn warning_count(&self) -> u64 {
        self.inner.warnings.load(Ordering::Relaxed)
    }

    pub fn error_count(&self) -> u64 {
        self.inner.errors.load(Ordering::Relaxed)
    }

    /// Captured lines; empty for a stdout console
    pub fn lines(&self) -> Vec<String> {
        match &self.inner.sink {
            Sink::Stdout => Vec::new(),
            Sink::Capture(lines) => lines.lock().clone(),
        }
    }

    /// Whether any captured line contains `text`
    pub fn contains(&self, text: &str) -> bool {
        self.lines().iter().any(|l| l.contains(text))
    }
}

/// Render a byte count with a decimal unit, as `12.34 MB`
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["bytes", "KB", "MB", "GB", "TB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1000.0 && unit < UNITS.len() - 1 {
        value /= 1000.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} bytes", bytes)
    } else {
        format!("{:.2} {}", value, UNITS[unit])
    }
}

/// Render a duration as `HH:MM:SS`, as `00:01:02s`
pub fn format_duration(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    format!(
        "{:02}:{:02}:{:02}s",
        secs / 3600,
        (secs / 60) % 60,
        secs % 60
    )
}

/// Throughput over `elapsed`, as `1.20 MB/s`
pub fn format_throughput(bytes: u64, elapsed: Duration) -> String {
    let secs = elapsed.as_secs_f64();
    let rate = if secs > 0.0 {
        (bytes as f64 / secs) as u64
    } else {
        bytes
    };
    format!("{}/s", format_bytes(rate))
}

/// Row and byte counters reported periodically while a run progresses
#[derive(Debug)]
pub struct Progress {
    label: &'static str,
    started: Instant,
    rows: AtomicU64,
    bytes: AtomicU64,
    last_report: Mutex<Instant>,
    interval: Duration,
    enabled: bool,
}

impl Progress {
    pub fn new(label: &'static str, enabled: bool) -> Self {
        let now = Instant::now();
        Self {
            label,
            started: now,
            rows: AtomicU64::new(0),
            bytes: AtomicU64::new(0),
            last_report: Mutex::new(now),
            interval: Duration::from_secs(2),
            enabled,
        }
    }

    /// Count rows and bytes, reporting when the interval has passed
    pub fn add(&self, rows: u64, bytes: u64) {
        let rows = self.rows.fetch_add(rows, Ordering::Relaxed) + rows;
        let bytes = self.bytes.fetch_add(bytes, Ordering::Relaxed) + bytes;
        if !self.enabled {
            return;
        }
        let mut last = self.last_report.lock();
        if last.elapsed() >= self.interval {
            *last = Instant::now();
            info!(
                rows,
                bytes,
                "{}: {} rows, {}, {}",
                self.label,
                rows,
                format_bytes(bytes),
                format_throughput(bytes, self.started.elapsed())
            );
        }
    }

    pub fn rows(&self) -> u64 {
        self.rows.load(Ordering::Relaxed)
    }

    pub fn bytes(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_counts() {
        let console = Console::capture();
        console.note("Checking recent transactions");
        console.warning("DDL changes detected");
        console.error("failed");
        console.print("Schemas dumped: 1");
        assert_eq!(console.warning_count(), 1);
        assert_eq!(console.error_count(), 1);
        assert_eq!(
            console.lines(),
            vec![
                "NOTE: Checking recent transactions",
                "WARNING: DDL changes detected",
                "ERROR: failed",
                "Schemas dumped: 1",
            ]
        );
    }

    #[test]
    fn test_clones_share_counters() {
        let console = Console::capture();
        let worker = console.clone();
        worker.warning("w");
        assert_eq!(console.warning_count(), 1);
        assert!(console.contains("WARNING: w"));
    }

    #[test]
    fn test_formatting() {
        assert_eq!(format_bytes(512), "512 bytes");
        assert_eq!(format_bytes(1_500_000), "1.50 MB");
        assert_eq!(format_duration(Duration::from_secs(3723)), "01:02:03s");
        assert_eq!(format_throughput(2000, Duration::from_secs(2)), "1.00 KB/s");
    }

    #[test]
    fn test_progress_counts() {
        let progress = Progress::new("Dump", false);
        progress.add(10, 100);
        progress.add(5, 50);
        assert_eq!(progress.rows(), 15);
        assert_eq!(progress.bytes(), 150);
    }
}
