//! Shared fit counters and the polling reporter that renders them.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

/// Assumed duration of a fit before any has finished.
const DEFAULT_RUN_SECS: f64 = 10.0;

/// Counters updated by both worker pools.
#[derive(Debug, Default)]
pub struct FitCounters {
    feeds: AtomicU64,
    pending: AtomicU64,
    completed: AtomicU64,
    run_micros: AtomicU64,
    skipped: AtomicU64,
    timeouts: AtomicU64,
    failures: AtomicU64,
    feed_failures: AtomicU64,
}

impl FitCounters {
    /// A fit job was queued for a written or reused feed.
    pub fn job_queued(&self) {
        self.feeds.fetch_add(1, Ordering::Relaxed);
        self.pending.fetch_add(1, Ordering::Relaxed);
    }

    /// A job left the queue without running the fitter.
    pub fn job_skipped(&self) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
        self.finish_job();
    }

    /// A fit ran for `elapsed`, whatever its outcome.
    pub fn job_ran(&self, elapsed: Duration) {
        self.run_micros
            .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
        self.finish_job();
    }

    pub fn timed_out(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn failed(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Cutouts or feed for a source could not be written.
    pub fn feed_failed(&self) {
        self.feed_failures.fetch_add(1, Ordering::Relaxed);
    }

    fn finish_job(&self) {
        // queued before it was sent, so this never underflows
        self.pending.fetch_sub(1, Ordering::Relaxed);
        self.completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            feeds: self.feeds.load(Ordering::Relaxed),
            pending: self.pending.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            run_time: Duration::from_micros(self.run_micros.load(Ordering::Relaxed)),
            skipped: self.skipped.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            feed_failures: self.feed_failures.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CounterSnapshot {
    pub feeds: u64,
    pub pending: u64,
    pub completed: u64,
    pub run_time: Duration,
    pub skipped: u64,
    pub timeouts: u64,
    pub failures: u64,
    pub feed_failures: u64,
}

impl CounterSnapshot {
    /// Mean wall time per completed job.
    pub fn average_run_secs(&self) -> f64 {
        if self.completed == 0 {
            DEFAULT_RUN_SECS
        } else {
            self.run_time.as_secs_f64() / self.completed as f64
        }
    }

    /// Estimated time to drain the pending queue.
    pub fn eta(&self) -> Duration {
        Duration::from_secs_f64(self.pending as f64 * self.average_run_secs())
    }

    pub fn message(&self) -> String {
        format!(
            "Finished {} (of {}) galfit runs, {} (est. {:.1} seconds) left",
            self.completed,
            self.feeds,
            self.pending,
            self.eta().as_secs_f64()
        )
    }
}

/// Terminal progress bar, absent when output is quiet.
pub struct Progress {
    bar: Option<ProgressBar>,
}

impl Progress {
    #[must_use]
    pub fn bar(total: u64, message: &str, visible: bool) -> Self {
        if !visible {
            return Self { bar: None };
        }
        let bar = ProgressBar::new(total);
        bar.set_style(
            ProgressStyle::with_template("{bar:40.cyan/blue} {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );
        bar.set_message(message.to_string());
        Self { bar: Some(bar) }
    }

    #[must_use]
    pub fn hidden() -> Self {
        Self { bar: None }
    }

    pub fn inc(&self, delta: u64) {
        if let Some(bar) = &self.bar {
            bar.inc(delta);
        }
    }

    pub fn update(&self, position: u64, total: u64, message: &str) {
        if let Some(bar) = &self.bar {
            bar.set_length(total);
            bar.set_position(position);
            bar.set_message(message.to_string());
        }
    }

    pub fn finish(&self, message: &str) {
        if let Some(bar) = &self.bar {
            bar.finish_with_message(message.to_string());
        }
    }
}

/// Poll `counters` every `interval` until `stop` is closed or signalled,
/// then emit a final line.
pub fn report_until(
    counters: &FitCounters,
    interval: Duration,
    stop: &Receiver<()>,
    progress: &Progress,
) -> CounterSnapshot {
    loop {
        match stop.recv_timeout(interval) {
            Err(RecvTimeoutError::Timeout) => {
                let snap = counters.snapshot();
                let message = snap.message();
                progress.update(snap.completed, snap.feeds, &message);
                info!("{message}");
            }
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    let snap = counters.snapshot();
    progress.update(snap.completed, snap.feeds, &snap.message());
    progress.finish("done");
    snap
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::bounded;

    #[test]
    fn eta_defaults_before_first_completion() {
        let counters = FitCounters::default();
        counters.job_queued();
        counters.job_queued();
        let snap = counters.snapshot();
        assert_eq!(snap.feeds, 2);
        assert_eq!(snap.pending, 2);
        assert_eq!(snap.eta(), Duration::from_secs(20));
    }

    #[test]
    fn eta_uses_average_run_time() {
        let counters = FitCounters::default();
        for _ in 0..4 {
            counters.job_queued();
        }
        counters.job_ran(Duration::from_secs(3));
        counters.job_ran(Duration::from_secs(5));
        let snap = counters.snapshot();
        assert_eq!(snap.completed, 2);
        assert_eq!(snap.pending, 2);
        assert_eq!(snap.average_run_secs(), 4.0);
        assert_eq!(snap.eta(), Duration::from_secs(8));
        assert_eq!(
            snap.message(),
            "Finished 2 (of 4) galfit runs, 2 (est. 8.0 seconds) left"
        );
    }

    #[test]
    fn skipped_jobs_count_as_completed() {
        let counters = FitCounters::default();
        counters.job_queued();
        counters.job_skipped();
        let snap = counters.snapshot();
        assert_eq!(snap.pending, 0);
        assert_eq!(snap.completed, 1);
        assert_eq!(snap.skipped, 1);
        assert_eq!(snap.run_time, Duration::ZERO);
    }

    #[test]
    fn reporter_stops_when_channel_closes() {
        let counters = FitCounters::default();
        counters.job_queued();
        let (tx, rx) = bounded::<()>(1);
        drop(tx);
        let snap = report_until(&counters, Duration::from_secs(60), &rx, &Progress::hidden());
        assert_eq!(snap.feeds, 1);
    }
}
