use std::{
    fmt,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use comms::specs::ReportingSpec;
use log::{debug, info};
use tokio::time::Instant;

use crate::Reporter;

/// How reporting windows are delimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowMode {
    /// A window closes once it holds exactly this many images.
    Images(u64),
    /// A window closes every fixed interval, images or not.
    Duration(Duration),
}

impl From<ReportingSpec> for WindowMode {
    fn from(spec: ReportingSpec) -> Self {
        match spec {
            ReportingSpec::Images { count } => Self::Images(count.max(1)),
            ReportingSpec::Seconds { secs } => {
                Self::Duration(Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX))
            }
        }
    }
}

/// A closed accounting window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowReport {
    pub index: u64,
    pub received: u64,
    pub correct: u64,
    pub elapsed: Duration,
    /// Wall clock close time, in milliseconds since the unix epoch.
    pub unix_ms: u64,
}

impl WindowReport {
    /// Images per second over the window.
    pub fn rate(&self) -> f64 {
        per_second(self.received, self.elapsed)
    }

    pub fn accuracy_pct(&self) -> f64 {
        percent(self.correct, self.received)
    }
}

impl fmt::Display for WindowReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] window {}: received {}, correct {}, {:.2} img/s",
            self.unix_ms,
            self.index,
            self.received,
            self.correct,
            self.rate()
        )
    }
}

/// The totals of a whole run, computed once at the end of the stream.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RunSummary {
    pub total_received: u64,
    pub total_correct: u64,
    pub dropped: u64,
    pub failed: u64,
    pub windows: u64,
    pub idle_windows: u64,
    pub elapsed: Duration,
    pub throughput: f64,
    pub accuracy_pct: f64,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "received {}, correct {}, elapsed {:.3}s, throughput {:.2} img/s, accuracy {:.1}%",
            self.total_received,
            self.total_correct,
            self.elapsed.as_secs_f64(),
            self.throughput,
            self.accuracy_pct
        )?;

        if self.dropped > 0 || self.failed > 0 {
            write!(f, ", dropped {}, failed {}", self.dropped, self.failed)?;
        }

        Ok(())
    }
}

/// Accumulates classification results into windows and the final summary.
///
/// The clock starts with the first `start_clock` or `record` call, nothing is
/// timed while the stream hasn't delivered anything yet.
pub struct WindowedAggregator {
    mode: WindowMode,
    reporter: Box<dyn Reporter>,
    started_at: Option<Instant>,
    window_start: Instant,
    received: u64,
    correct: u64,
    total_received: u64,
    total_correct: u64,
    dropped: u64,
    failed: u64,
    idle_windows: u64,
    closed: Vec<WindowReport>,
    summary: Option<RunSummary>,
}

impl WindowedAggregator {
    /// Creates a new `WindowedAggregator`.
    ///
    /// # Arguments
    /// * `mode` - How windows are delimited.
    /// * `reporter` - Where closed windows and the summary are handed to.
    pub fn new(mode: WindowMode, reporter: Box<dyn Reporter>) -> Self {
        let mode = match mode {
            WindowMode::Images(0) => WindowMode::Images(1),
            mode => mode,
        };

        Self {
            mode,
            reporter,
            started_at: None,
            window_start: Instant::now(),
            received: 0,
            correct: 0,
            total_received: 0,
            total_correct: 0,
            dropped: 0,
            failed: 0,
            idle_windows: 0,
            closed: Vec::new(),
            summary: None,
        }
    }

    #[inline]
    pub fn mode(&self) -> WindowMode {
        self.mode
    }

    /// The instant the clock started at, if it did.
    #[inline]
    pub fn started_at(&self) -> Option<Instant> {
        self.started_at
    }

    /// Starts the clock at `now`, later calls are no-ops.
    pub fn start_clock(&mut self, now: Instant) {
        if self.started_at.is_none() {
            debug!("starting the clock");
            self.started_at = Some(now);
            self.window_start = now;
        }
    }

    /// Every closed window, in closing order.
    #[inline]
    pub fn closed_windows(&self) -> &[WindowReport] {
        &self.closed
    }

    /// The `(received, correct)` counters of the open window.
    #[inline]
    pub fn open_totals(&self) -> (u64, u64) {
        (self.received, self.correct)
    }

    /// When the open duration window is due to close, `None` in count mode or
    /// before the clock started.
    pub fn next_due(&self) -> Option<Instant> {
        match self.mode {
            WindowMode::Duration(interval) if self.started_at.is_some() => {
                self.window_start.checked_add(interval)
            }
            _ => None,
        }
    }

    /// Adds a scored batch to the open window.
    ///
    /// In count mode a batch that crosses the window boundary is split, its
    /// correct count is attributed proportionally to each part. In duration
    /// mode every window due by `now` is closed before the batch is added.
    ///
    /// # Arguments
    /// * `received` - The size of the batch.
    /// * `correct` - How many of them were classified correctly.
    /// * `now` - The instant the batch was scored at.
    pub fn record(&mut self, received: u64, correct: u64, now: Instant) {
        debug_assert!(self.summary.is_none(), "record after finalize");
        self.start_clock(now);

        let mut correct = correct.min(received);
        let mut remaining = received;

        let WindowMode::Images(limit) = self.mode else {
            self.flush_if_due(now);
            self.add(remaining, correct);
            return;
        };

        while remaining > 0 {
            let take = (limit - self.received).min(remaining);
            let take_correct = split_correct(correct, take, remaining);

            self.add(take, take_correct);
            remaining -= take;
            correct -= take_correct;

            if self.received == limit {
                self.close(now);
            }
        }
    }

    /// Counts images discarded before classification.
    pub fn record_dropped(&mut self, n: u64) {
        self.dropped += n;
    }

    /// Counts images whose batch failed to classify.
    pub fn record_failed(&mut self, n: u64) {
        self.failed += n;
    }

    /// Closes every duration window whose interval elapsed by `now`.
    ///
    /// Windows are aligned to the clock start, an interval without images is
    /// still reported and counted as idle.
    pub fn flush_if_due(&mut self, now: Instant) {
        let WindowMode::Duration(interval) = self.mode else {
            return;
        };

        if self.started_at.is_none() || interval.is_zero() {
            return;
        }

        while let Some(end) = self.window_start.checked_add(interval) {
            if now < end {
                break;
            }

            if self.received == 0 {
                self.idle_windows += 1;
                info!(window = self.closed.len(); "no input");
            }

            self.close(end);
        }
    }

    /// Closes the run now, see `finalize_at`.
    pub fn finalize(&mut self) -> RunSummary {
        self.finalize_at(Instant::now())
    }

    /// Closes the run after the source went quiet at `last_activity`.
    ///
    /// The run ends at `last_activity`, unless a window was already closed
    /// past it, in which case it ends at that window's boundary.
    pub fn finalize_idle(&mut self, last_activity: Instant) -> RunSummary {
        let end = match self.started_at {
            Some(_) => last_activity.max(self.window_start),
            None => last_activity,
        };

        self.finalize_at(end)
    }

    /// Closes the run at `end` and reports its summary.
    ///
    /// Due windows are closed first, then the open window if it holds any
    /// images. The summary is reported once and cached, later calls return it
    /// without reporting anything.
    pub fn finalize_at(&mut self, end: Instant) -> RunSummary {
        if let Some(summary) = self.summary {
            return summary;
        }

        self.flush_if_due(end);
        if self.received > 0 {
            self.close(end);
        }

        let elapsed = self
            .started_at
            .map(|start| end.saturating_duration_since(start))
            .unwrap_or_default();

        let summary = RunSummary {
            total_received: self.total_received,
            total_correct: self.total_correct,
            dropped: self.dropped,
            failed: self.failed,
            windows: self.closed.len() as u64,
            idle_windows: self.idle_windows,
            elapsed,
            throughput: per_second(self.total_received, elapsed),
            accuracy_pct: percent(self.total_correct, self.total_received),
        };

        self.reporter.summary(&summary);
        self.summary = Some(summary);
        summary
    }

    fn add(&mut self, received: u64, correct: u64) {
        self.received += received;
        self.correct += correct;
        self.total_received += received;
        self.total_correct += correct;
    }

    fn close(&mut self, end: Instant) {
        let report = WindowReport {
            index: self.closed.len() as u64,
            received: self.received,
            correct: self.correct,
            elapsed: end.saturating_duration_since(self.window_start),
            unix_ms: unix_ms(),
        };

        self.reporter.window(&report);
        self.closed.push(report);

        self.received = 0;
        self.correct = 0;
        self.window_start = end.max(self.window_start);
    }
}

/// The share of `correct` that goes to `take` out of `total` images, rounded
/// but never more than fits on either side of the split.
fn split_correct(correct: u64, take: u64, total: u64) -> u64 {
    if take >= total {
        return correct;
    }

    let rounded = (2 * correct * take + total) / (2 * total);
    let min = correct.saturating_sub(total - take);
    rounded.clamp(min, take.min(correct))
}

fn per_second(n: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 { n as f64 / secs } else { 0.0 }
}

fn percent(part: u64, whole: u64) -> f64 {
    if whole > 0 {
        100.0 * part as f64 / whole as f64
    } else {
        0.0
    }
}

fn unix_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CollectingReporter, ReportEvent};

    fn aggregator(mode: WindowMode) -> (WindowedAggregator, CollectingReporter) {
        let reporter = CollectingReporter::default();
        let agg = WindowedAggregator::new(mode, Box::new(reporter.clone()));
        (agg, reporter)
    }

    #[test]
    fn count_windows_split_batches_at_the_boundary() {
        let (mut agg, reporter) = aggregator(WindowMode::Images(100));
        let now = Instant::now();

        for _ in 0..5 {
            agg.record(70, 70, now);
        }
        agg.record(40, 0, now);

        let windows = reporter.windows();
        let received: Vec<_> = windows.iter().map(|w| w.received).collect();
        let correct: Vec<_> = windows.iter().map(|w| w.correct).collect();

        assert_eq!(received, [100, 100, 100]);
        assert_eq!(correct, [100, 100, 100]);
        assert_eq!(agg.open_totals(), (90, 50));

        let summary = agg.finalize_at(now);
        assert_eq!(summary.total_received, 390);
        assert_eq!(summary.total_correct, 350);
        assert_eq!(summary.windows, 4);
    }

    #[test]
    fn partial_correct_counts_are_conserved() {
        let (mut agg, reporter) = aggregator(WindowMode::Images(7));
        let now = Instant::now();
        let batches = [(5, 3), (11, 4), (2, 2), (13, 12), (9, 0)];

        for (received, correct) in batches {
            agg.record(received, correct, now);
        }
        let summary = agg.finalize_at(now);

        let windows = reporter.windows();
        let received: u64 = windows.iter().map(|w| w.received).sum();
        let correct: u64 = windows.iter().map(|w| w.correct).sum();

        assert_eq!(received, 40);
        assert_eq!(correct, 21);
        assert_eq!(summary.total_received, received);
        assert_eq!(summary.total_correct, correct);

        for w in &windows {
            assert!(w.correct <= w.received);
        }
        for w in &windows[..windows.len() - 1] {
            assert_eq!(w.received, 7);
        }
    }

    #[test]
    fn finalize_is_idempotent() {
        let (mut agg, reporter) = aggregator(WindowMode::Images(10));
        let now = Instant::now();

        agg.record(4, 3, now);
        let first = agg.finalize_at(now + Duration::from_secs(2));
        let second = agg.finalize_at(now + Duration::from_secs(5));

        assert_eq!(first, second);
        assert_eq!(first.elapsed, Duration::from_secs(2));
        assert_eq!(first.throughput, 2.0);
        assert_eq!(first.accuracy_pct, 75.0);

        let summaries = reporter
            .events()
            .into_iter()
            .filter(|e| matches!(e, ReportEvent::Summary(_)))
            .count();
        assert_eq!(summaries, 1);
        assert_eq!(reporter.windows().len(), 1);
    }

    #[test]
    fn empty_run_reports_a_zero_summary() {
        let (mut agg, reporter) = aggregator(WindowMode::Images(10));

        let summary = agg.finalize();

        assert_eq!(summary, RunSummary::default());
        assert!(reporter.windows().is_empty());
        assert_eq!(reporter.summary(), Some(summary));
    }

    #[tokio::test(start_paused = true)]
    async fn duration_windows_close_on_schedule() {
        let (mut agg, reporter) = aggregator(WindowMode::Duration(Duration::from_secs(1)));
        let start = Instant::now();

        assert_eq!(agg.next_due(), None);
        agg.record(10, 9, start);
        assert_eq!(agg.next_due(), Some(start + Duration::from_secs(1)));

        agg.flush_if_due(start + Duration::from_millis(999));
        assert!(reporter.windows().is_empty());

        agg.record(5, 5, start + Duration::from_millis(999));
        // Nothing arrives during the second and third intervals.
        agg.flush_if_due(start + Duration::from_millis(3200));
        agg.record(1, 1, start + Duration::from_millis(3300));

        let summary = agg.finalize_at(start + Duration::from_millis(3500));
        let windows = reporter.windows();
        let received: Vec<_> = windows.iter().map(|w| w.received).collect();

        assert_eq!(received, [15, 0, 0, 1]);
        assert_eq!(windows[0].elapsed, Duration::from_secs(1));
        assert_eq!(windows[0].rate(), 15.0);
        assert_eq!(summary.idle_windows, 2);
        assert_eq!(summary.windows, 4);
        assert_eq!(summary.total_received, 16);
        assert_eq!(summary.elapsed, Duration::from_millis(3500));
    }

    #[tokio::test(start_paused = true)]
    async fn late_batch_lands_in_its_own_window() {
        let (mut agg, reporter) = aggregator(WindowMode::Duration(Duration::from_secs(1)));
        let start = Instant::now();

        agg.record(10, 10, start);
        agg.record(10, 10, start + Duration::from_millis(1500));
        agg.flush_if_due(start + Duration::from_millis(1600));

        let windows = reporter.windows();
        assert_eq!(windows.len(), 1);
        assert_eq!(windows[0].received, 10);
        assert_eq!(windows[0].elapsed, Duration::from_secs(1));
        assert_eq!(agg.open_totals(), (10, 10));
    }

    #[tokio::test(start_paused = true)]
    async fn quiet_run_covers_the_windows_it_reported() {
        let (mut agg, reporter) = aggregator(WindowMode::Duration(Duration::from_secs(1)));
        let start = Instant::now();

        agg.record(10, 10, start);
        agg.flush_if_due(start + Duration::from_millis(3200));

        let summary = agg.finalize_idle(start + Duration::from_millis(500));
        let reported: Duration = reporter.windows().iter().map(|w| w.elapsed).sum();

        assert_eq!(summary.windows, 3);
        assert_eq!(summary.idle_windows, 2);
        assert_eq!(summary.elapsed, Duration::from_secs(3));
        assert_eq!(summary.elapsed, reported);
    }

    #[tokio::test(start_paused = true)]
    async fn quiet_run_ends_at_the_last_activity() {
        let (mut agg, _) = aggregator(WindowMode::Duration(Duration::from_secs(1)));
        let start = Instant::now();

        agg.record(10, 10, start);
        let summary = agg.finalize_idle(start + Duration::from_millis(500));

        assert_eq!(summary.windows, 1);
        assert_eq!(summary.elapsed, Duration::from_millis(500));
    }

    #[test]
    fn oversized_interval_saturates() {
        let mode = WindowMode::from(ReportingSpec::Seconds { secs: 1e30 });
        assert_eq!(mode, WindowMode::Duration(Duration::MAX));
    }

    #[test]
    fn lost_images_are_counted_apart() {
        let (mut agg, _) = aggregator(WindowMode::Images(10));
        let now = Instant::now();

        agg.record(5, 5, now);
        agg.record_dropped(20);
        agg.record_failed(3);

        let summary = agg.finalize_at(now);
        assert_eq!(summary.total_received, 5);
        assert_eq!(summary.dropped, 20);
        assert_eq!(summary.failed, 3);
        assert_eq!(summary.accuracy_pct, 100.0);
    }

    #[test]
    fn split_keeps_exact_extremes() {
        assert_eq!(split_correct(70, 30, 70), 30);
        assert_eq!(split_correct(0, 30, 70), 0);
        assert_eq!(split_correct(1, 1, 2), 1);
        assert_eq!(split_correct(9, 1, 10), 1);
        assert_eq!(split_correct(1, 9, 10), 1);
    }
}
