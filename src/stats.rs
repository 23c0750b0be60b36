use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::info;

/// Per-coupler traffic counters, shared between the coupler worker and
/// the reporting thread.
#[derive(Debug, Default)]
pub struct CouplerStats {
    /// Raw frames or lines read from the device.
    pub raw_in: AtomicU64,
    /// Complete messages produced after reassembly and decoding.
    pub messages_in: AtomicU64,
    /// Messages written to the device.
    pub messages_out: AtomicU64,
    /// Frames dropped for decode or reassembly errors.
    pub errors: AtomicU64,
}

impl CouplerStats {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn count_raw(&self) {
        self.raw_in.fetch_add(1, Ordering::Relaxed);
    }

    pub fn count_message(&self) {
        self.messages_in.fetch_add(1, Ordering::Relaxed);
    }

    pub fn count_sent(&self) {
        self.messages_out.fetch_add(1, Ordering::Relaxed);
    }

    pub fn count_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> (u64, u64, u64, u64) {
        (
            self.raw_in.load(Ordering::Relaxed),
            self.messages_in.load(Ordering::Relaxed),
            self.messages_out.load(Ordering::Relaxed),
            self.errors.load(Ordering::Relaxed),
        )
    }
}

/// Periodically logs the traffic of every coupler with input/output
/// rates computed since the previous report.
pub struct StatsReporter {
    entries: Vec<(String, Arc<CouplerStats>)>,
    last_report: Instant,
    last_counts: Vec<(u64, u64)>,
    interval: Duration,
}

impl StatsReporter {
    pub fn new(interval: Duration) -> Self {
        Self {
            entries: Vec::new(),
            last_report: Instant::now(),
            last_counts: Vec::new(),
            interval,
        }
    }

    pub fn register(&mut self, name: &str, stats: Arc<CouplerStats>) {
        self.entries.push((name.to_string(), stats));
        self.last_counts.push((0, 0));
    }

    /// Log a report when the interval elapsed. Returns true when one
    /// was written.
    pub fn check_and_log(&mut self, now: Instant) -> bool {
        let elapsed = now.duration_since(self.last_report);
        if elapsed < self.interval {
            return false;
        }
        let secs = elapsed.as_secs_f64();
        for (i, (name, stats)) in self.entries.iter().enumerate() {
            let (raw, msgs_in, msgs_out, errors) = stats.snapshot();
            let (prev_in, prev_out) = self.last_counts[i];
            let rate_in = (msgs_in - prev_in) as f64 / secs;
            let rate_out = (msgs_out - prev_out) as f64 / secs;
            info!(
                "coupler {}: raw {} in {} ({:.1}/s) out {} ({:.1}/s) errors {}",
                name, raw, msgs_in, rate_in, msgs_out, rate_out, errors
            );
            self.last_counts[i] = (msgs_in, msgs_out);
        }
        self.last_report = now;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let stats = CouplerStats::new();
        stats.count_raw();
        stats.count_raw();
        stats.count_message();
        stats.count_error();
        assert_eq!(stats.snapshot(), (2, 1, 0, 1));
    }

    #[test]
    fn test_reporter_interval() {
        let mut reporter = StatsReporter::new(Duration::from_secs(30));
        let stats = CouplerStats::new();
        reporter.register("test", stats);
        let start = Instant::now();
        assert!(!reporter.check_and_log(start + Duration::from_secs(10)));
        assert!(reporter.check_and_log(start + Duration::from_secs(31)));
        assert!(!reporter.check_and_log(start + Duration::from_secs(32)));
    }
}
