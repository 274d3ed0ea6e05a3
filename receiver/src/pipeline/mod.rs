//! The receiving side of the benchmark.
//!
//! - `FrameReader` reframes the byte stream into images.
//! - `BatchAccumulator` groups them into batches.
//! - The classifier scores each batch on Tokio's blocking pool.
//! - `WindowedAggregator` turns the scores into windows and a summary.
//!
//! Two schedules drive these, see `cooperative` and `micro_batch`.

mod cooperative;
mod micro_batch;

use std::{sync::Arc, time::Duration};

use comms::{
    FrameCodec, FrameReader, Image,
    specs::{ExecutionSpec, FailurePolicy, ReceiverSpec, ScoringSpec, StreamSpec},
};
use log::{debug, info, warn};
use tokio::{
    io::AsyncRead,
    task,
    time::{self, Instant},
};
use tokio_util::sync::CancellationToken;

use crate::{
    Batch, BatchAccumulator, Classifier, ClassifierErr, Reporter, Result, RunSummary,
    WindowedAggregator, classifier, error::ReceiverErr,
};

/// Reads, classifies and accounts for an image stream.
pub struct Receiver {
    spec: ReceiverSpec,
    codec: FrameCodec,
    classifier: Arc<dyn Classifier>,
}

impl Receiver {
    /// Creates a new `Receiver`.
    ///
    /// # Arguments
    /// * `stream` - The shape of the stream's images.
    /// * `spec` - The receiver's configuration.
    /// * `classifier` - The capability batches are scored with.
    pub fn new(stream: &StreamSpec, spec: ReceiverSpec, classifier: Arc<dyn Classifier>) -> Self {
        Self {
            spec,
            codec: stream.codec(),
            classifier,
        }
    }

    #[inline]
    pub fn spec(&self) -> &ReceiverSpec {
        &self.spec
    }

    /// Consumes `rx` until it ends or goes idle, see `run_until`.
    pub async fn run<R>(&self, rx: R, reporter: Box<dyn Reporter>) -> Result<RunSummary>
    where
        R: AsyncRead + Unpin,
    {
        self.run_until(rx, reporter, CancellationToken::new()).await
    }

    /// Consumes `rx` until it ends, goes idle for `idle_timeout` or `cancel` fires.
    ///
    /// All three take the same clean path: whatever is batched gets
    /// classified, in flight batches are awaited and the run is finalized.
    ///
    /// # Arguments
    /// * `rx` - The byte source.
    /// * `reporter` - Where windows and the summary are reported.
    /// * `cancel` - Stops the run early.
    ///
    /// # Returns
    /// The run's summary, or a `ReceiverErr` on transport or protocol
    /// failures, or if the classifier fails under the abort policy.
    pub async fn run_until<R>(
        &self,
        rx: R,
        reporter: Box<dyn Reporter>,
        cancel: CancellationToken,
    ) -> Result<RunSummary>
    where
        R: AsyncRead + Unpin,
    {
        let rx = FrameReader::new(rx, self.codec);
        let agg = WindowedAggregator::new(self.spec.reporting.into(), reporter);

        info!(
            batch_size = self.spec.batch_size.get();
            "receiving {} images, {:?}",
            self.codec.shape(),
            self.spec.execution
        );

        let summary = match self.spec.execution {
            ExecutionSpec::Cooperative => cooperative::run(self, rx, agg, cancel).await?,
            ExecutionSpec::MicroBatch {
                tick_ms,
                workers,
                max_pending,
            } => {
                let tick = Duration::from_millis(tick_ms.max(1));
                let schedule = micro_batch::Schedule {
                    tick,
                    workers,
                    max_pending,
                };
                micro_batch::run(self, rx, agg, schedule, cancel).await?
            }
        };

        info!(
            received = summary.total_received,
            correct = summary.total_correct,
            dropped = summary.dropped,
            failed = summary.failed;
            "receiver finished"
        );

        Ok(summary)
    }

    fn accumulator(&self, max_wait: Option<Duration>) -> BatchAccumulator<Image> {
        BatchAccumulator::new(self.spec.batch_size, max_wait)
    }
}

/// Scores `batch` on the blocking pool.
///
/// # Returns
/// The classifier's outcome, or a `Task` error if the blocking task panicked.
async fn classify(
    classifier: Arc<dyn Classifier>,
    batch: Vec<Image>,
    scoring: ScoringSpec,
) -> Result<std::result::Result<usize, ClassifierErr>> {
    task::spawn_blocking(move || classifier::score(classifier.as_ref(), &batch, scoring))
        .await
        .map_err(|e| ReceiverErr::Task(format!("classifier join error: {e}")))
}

/// Accounts for a classified batch under the failure policy.
fn apply(
    agg: &mut WindowedAggregator,
    seq: u64,
    size: usize,
    outcome: std::result::Result<usize, ClassifierErr>,
    policy: FailurePolicy,
) -> Result<()> {
    let now = Instant::now();

    match outcome {
        Ok(correct) => {
            debug!(batch = seq, size = size, correct = correct; "batch scored");
            agg.record(size as u64, correct as u64, now);
            Ok(())
        }
        Err(e) => match policy {
            FailurePolicy::Skip => {
                warn!(batch = seq, size = size; "classifier failed, skipping batch: {e}");
                agg.record_failed(size as u64);
                Ok(())
            }
            FailurePolicy::Abort => Err(ReceiverErr::Classifier {
                batch: seq,
                source: e,
            }),
        },
    }
}

fn describe(batch: &Batch<Image>) -> String {
    format!("{} images on {:?}", batch.len(), batch.trigger)
}

/// Tracks when the byte source last made progress.
struct Activity {
    timeout: Option<Duration>,
    /// The last instant bytes were seen at.
    last: Instant,
    /// Where the countdown runs from, reading may have been paused since `last`.
    since: Instant,
    seen: u64,
}

impl Activity {
    fn new(timeout: Option<Duration>) -> Self {
        let now = Instant::now();

        Self {
            timeout,
            last: now,
            since: now,
            seen: 0,
        }
    }

    fn deadline(&self) -> Option<Instant> {
        Some(self.since + self.timeout?)
    }

    fn expired(&self, now: Instant) -> bool {
        self.deadline().is_some_and(|deadline| now >= deadline)
    }

    /// Restarts the countdown without counting as activity.
    fn resume(&mut self, now: Instant) {
        self.since = self.since.max(now);
    }

    /// Moves the deadline forward if any bytes arrived since the last call.
    ///
    /// # Returns
    /// Whether `bytes` moved.
    fn observe(&mut self, bytes: u64, now: Instant) -> bool {
        if bytes == self.seen {
            return false;
        }

        self.seen = bytes;
        self.last = now;
        self.since = self.since.max(now);
        true
    }
}

/// Sleeps until `deadline`, forever if there is none.
async fn until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
