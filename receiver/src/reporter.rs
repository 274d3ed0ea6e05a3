use std::sync::Arc;

use comms::specs::ReportOutput;
use log::{debug, info};
use parking_lot::Mutex;
use tokio::{sync::mpsc, task::JoinHandle};

use crate::{RunSummary, WindowReport};

/// The sink of closed windows and of the final summary.
pub trait Reporter: Send {
    fn window(&mut self, report: &WindowReport);
    fn summary(&mut self, summary: &RunSummary);
}

impl<R: Reporter + ?Sized> Reporter for Box<R> {
    fn window(&mut self, report: &WindowReport) {
        (**self).window(report);
    }

    fn summary(&mut self, summary: &RunSummary) {
        (**self).summary(summary);
    }
}

/// Builds the reporter that writes to `output`.
pub fn build(output: ReportOutput) -> Box<dyn Reporter> {
    match output {
        ReportOutput::Stdout => Box::new(StdoutReporter),
        ReportOutput::Log => Box::new(LogReporter),
    }
}

/// Writes every event as an `info` record.
#[derive(Debug, Default)]
pub struct LogReporter;

impl Reporter for LogReporter {
    fn window(&mut self, report: &WindowReport) {
        info!(
            window = report.index,
            received = report.received,
            correct = report.correct,
            rate = report.rate();
            "window closed"
        );
    }

    fn summary(&mut self, summary: &RunSummary) {
        info!(
            received = summary.total_received,
            correct = summary.total_correct,
            elapsed_secs = summary.elapsed.as_secs_f64(),
            throughput = summary.throughput,
            accuracy_pct = summary.accuracy_pct;
            "run finished"
        );
    }
}

/// Prints every event as a line on stdout.
#[derive(Debug, Default)]
pub struct StdoutReporter;

impl Reporter for StdoutReporter {
    fn window(&mut self, report: &WindowReport) {
        println!("{report}");
    }

    fn summary(&mut self, summary: &RunSummary) {
        println!("summary: {summary}");
    }
}

/// A reporter event.
#[derive(Debug, Clone, PartialEq)]
pub enum ReportEvent {
    Window(WindowReport),
    Summary(RunSummary),
}

impl ReportEvent {
    fn deliver(&self, reporter: &mut dyn Reporter) {
        match self {
            Self::Window(report) => reporter.window(report),
            Self::Summary(summary) => reporter.summary(summary),
        }
    }
}

/// Keeps every event in memory, clones share the same log.
#[derive(Debug, Clone, Default)]
pub struct CollectingReporter {
    events: Arc<Mutex<Vec<ReportEvent>>>,
}

impl CollectingReporter {
    pub fn events(&self) -> Vec<ReportEvent> {
        self.events.lock().clone()
    }

    pub fn windows(&self) -> Vec<WindowReport> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                ReportEvent::Window(report) => Some(*report),
                ReportEvent::Summary(_) => None,
            })
            .collect()
    }

    /// The last reported summary, if any.
    pub fn summary(&self) -> Option<RunSummary> {
        self.events.lock().iter().rev().find_map(|e| match e {
            ReportEvent::Summary(summary) => Some(*summary),
            ReportEvent::Window(_) => None,
        })
    }
}

impl Reporter for CollectingReporter {
    fn window(&mut self, report: &WindowReport) {
        self.events.lock().push(ReportEvent::Window(*report));
    }

    fn summary(&mut self, summary: &RunSummary) {
        self.events.lock().push(ReportEvent::Summary(*summary));
    }
}

/// Forwards every event to a reporter task, it never blocks the caller.
#[derive(Debug, Clone)]
pub struct ChannelReporter {
    tx: mpsc::UnboundedSender<ReportEvent>,
}

impl ChannelReporter {
    fn forward(&self, event: ReportEvent) {
        if self.tx.send(event).is_err() {
            debug!("reporter task is gone, dropping event");
        }
    }
}

impl Reporter for ChannelReporter {
    fn window(&mut self, report: &WindowReport) {
        self.forward(ReportEvent::Window(*report));
    }

    fn summary(&mut self, summary: &RunSummary) {
        self.forward(ReportEvent::Summary(*summary));
    }
}

/// Moves `inner` into a background task fed through a `ChannelReporter`.
///
/// # Arguments
/// * `inner` - The reporter that does the actual output.
///
/// # Returns
/// The forwarding end and the task's handle. The task ends once every
/// `ChannelReporter` clone is dropped, handing `inner` back.
pub fn spawn_reporter<P>(mut inner: P) -> (ChannelReporter, JoinHandle<P>)
where
    P: Reporter + 'static,
{
    let (tx, mut rx) = mpsc::unbounded_channel::<ReportEvent>();

    let handle = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            event.deliver(&mut inner);
        }

        inner
    });

    (ChannelReporter { tx }, handle)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn report(index: u64) -> WindowReport {
        WindowReport {
            index,
            received: 10,
            correct: 7,
            elapsed: Duration::from_secs(1),
            unix_ms: 0,
        }
    }

    #[tokio::test]
    async fn channel_reporter_delivers_in_order() {
        let collecting = CollectingReporter::default();
        let (mut forward, handle) = spawn_reporter(collecting.clone());

        forward.window(&report(0));
        forward.window(&report(1));
        forward.summary(&RunSummary::default());
        drop(forward);

        handle.await.unwrap();

        let events = collecting.events();
        assert_eq!(
            events,
            [
                ReportEvent::Window(report(0)),
                ReportEvent::Window(report(1)),
                ReportEvent::Summary(RunSummary::default()),
            ]
        );
    }

    #[tokio::test]
    async fn boxed_reporter_forwards_to_the_inner_one() {
        let collecting = CollectingReporter::default();
        let boxed: Box<dyn Reporter> = Box::new(collecting.clone());
        let (mut forward, handle) = spawn_reporter(boxed);

        forward.window(&report(0));
        forward.summary(&RunSummary::default());
        drop(forward);

        handle.await.unwrap();
        assert_eq!(collecting.windows(), [report(0)]);
        assert_eq!(collecting.summary(), Some(RunSummary::default()));
    }

    #[tokio::test]
    async fn log_output_runs_in_the_reporter_task() {
        let (mut forward, handle) = spawn_reporter(build(ReportOutput::Log));

        forward.window(&report(0));
        forward.summary(&RunSummary::default());
        drop(forward);

        handle.await.unwrap();
    }

    #[test]
    fn log_reporter_takes_every_event() {
        let mut reporter = LogReporter;
        let summary = RunSummary {
            total_received: 10,
            total_correct: 7,
            windows: 1,
            elapsed: Duration::from_secs(1),
            throughput: 10.0,
            accuracy_pct: 70.0,
            ..RunSummary::default()
        };

        reporter.window(&report(0));
        reporter.summary(&summary);
    }

    #[test]
    fn window_line_carries_the_counters() {
        let line = report(3).to_string();
        assert_eq!(line, "[0] window 3: received 10, correct 7, 10.00 img/s");
    }
}
