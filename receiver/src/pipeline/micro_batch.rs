use std::{io, num::NonZeroUsize, sync::Arc, time::Duration};

use comms::{
    FrameReader, Image, ReadEvent,
    specs::{FailurePolicy, ScoringSpec},
};
use log::{debug, info, warn};
use parking_lot::Mutex;
use tokio::{
    io::AsyncRead,
    sync::Semaphore,
    task::{JoinError, JoinSet},
    time::{self, Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

use super::{Activity, Receiver, apply, classify, describe, until};
use crate::{
    Batch, Classifier, FlushTrigger, Result, RunSummary, WindowedAggregator, error::ReceiverErr,
};

/// The micro-batch schedule.
#[derive(Debug, Clone, Copy)]
pub(super) struct Schedule {
    pub tick: Duration,
    pub workers: NonZeroUsize,
    pub max_pending: usize,
}

enum Step {
    Read(io::Result<ReadEvent>),
    Joined(std::result::Result<Result<()>, JoinError>),
    Tick,
    Idle,
    Cancelled,
}

/// Drains arrivals on every tick and classifies the batches in parallel.
///
/// Reading never waits for the classifier. At most `workers` batches are
/// classified at once and `max_pending` more may wait for a worker, a batch
/// beyond that is dropped and counted.
pub(super) async fn run<R>(
    receiver: &Receiver,
    mut rx: FrameReader<R>,
    agg: WindowedAggregator,
    schedule: Schedule,
    cancel: CancellationToken,
) -> Result<RunSummary>
where
    R: AsyncRead + Unpin,
{
    let spec = receiver.spec();
    // Batches flush on the tick, or early once full.
    let mut acc = receiver.accumulator(None);
    let mut activity = Activity::new(spec.idle_timeout());
    let mut pool = Pool::new(receiver, agg, schedule);

    let mut ticker = time::interval_at(Instant::now() + schedule.tick, schedule.tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let idle_end = loop {
        let step = tokio::select! {
            biased;
            _ = cancel.cancelled() => Step::Cancelled,
            Some(joined) = pool.tasks.join_next(), if !pool.tasks.is_empty() => Step::Joined(joined),
            _ = ticker.tick() => Step::Tick,
            event = rx.next() => Step::Read(event),
            _ = until(activity.deadline()) => Step::Idle,
        };

        let now = Instant::now();
        if activity.observe(rx.bytes_received(), now) {
            pool.agg.lock().start_clock(now);
        }

        match step {
            Step::Joined(joined) => flatten(joined)?,
            Step::Read(Ok(ReadEvent::Image(img))) => {
                if let Some(batch) = acc.push(img, now) {
                    pool.dispatch(batch);
                }
            }
            Step::Read(Ok(ReadEvent::End { .. })) => {
                info!("stream ended");
                break None;
            }
            Step::Read(Err(e)) => return Err(ReceiverErr::from_read(e)),
            Step::Tick => {
                if let Some(batch) = acc.take(FlushTrigger::Tick) {
                    pool.dispatch(batch);
                }
                pool.agg.lock().flush_if_due(now);
            }
            Step::Idle => {
                if !activity.expired(now) {
                    continue;
                }

                info!(
                    "no bytes for {:?}, finalizing",
                    activity.timeout.unwrap_or_default()
                );
                break Some(activity.last);
            }
            Step::Cancelled => {
                info!("cancelled, finalizing");
                break None;
            }
        }
    };

    if let Some(batch) = acc.take(FlushTrigger::EndOfStream) {
        pool.dispatch(batch);
    }

    debug!(in_flight = pool.tasks.len(); "joining in flight batches");
    pool.join_all().await?;

    let mut agg = pool.agg.lock();
    let summary = match idle_end {
        Some(last) => agg.finalize_idle(last),
        None => agg.finalize_at(Instant::now()),
    };
    Ok(summary)
}

/// The classification workers and the state they share.
struct Pool {
    classifier: Arc<dyn Classifier>,
    scoring: ScoringSpec,
    policy: FailurePolicy,
    agg: Arc<Mutex<WindowedAggregator>>,
    permits: Arc<Semaphore>,
    capacity: usize,
    tasks: JoinSet<Result<()>>,
    seq: u64,
}

impl Pool {
    fn new(receiver: &Receiver, agg: WindowedAggregator, schedule: Schedule) -> Self {
        let workers = schedule.workers.get();

        Self {
            classifier: receiver.classifier.clone(),
            scoring: receiver.spec.scoring,
            policy: receiver.spec.on_classifier_error,
            agg: Arc::new(Mutex::new(agg)),
            permits: Arc::new(Semaphore::new(workers)),
            capacity: workers + schedule.max_pending,
            tasks: JoinSet::new(),
            seq: 0,
        }
    }

    /// Hands `batch` to a worker, or drops it if the pool is full.
    fn dispatch(&mut self, batch: Batch<Image>) {
        let size = batch.len();

        if self.tasks.len() >= self.capacity {
            warn!(
                size = size,
                in_flight = self.tasks.len();
                "classifier is behind, dropping {}",
                describe(&batch)
            );
            self.agg.lock().record_dropped(size as u64);
            return;
        }

        self.seq += 1;
        let seq = self.seq;
        let classifier = self.classifier.clone();
        let agg = self.agg.clone();
        let permits = self.permits.clone();
        let (scoring, policy) = (self.scoring, self.policy);

        debug!(batch = seq; "dispatching {}", describe(&batch));

        self.tasks.spawn(async move {
            let _permit = permits
                .acquire_owned()
                .await
                .map_err(|e| ReceiverErr::Task(e.to_string()))?;

            let outcome = classify(classifier, batch.items, scoring).await?;

            let mut agg = agg.lock();
            apply(&mut agg, seq, size, outcome, policy)
        });
    }

    async fn join_all(&mut self) -> Result<()> {
        while let Some(joined) = self.tasks.join_next().await {
            flatten(joined)?;
        }

        Ok(())
    }
}

fn flatten(joined: std::result::Result<Result<()>, JoinError>) -> Result<()> {
    joined.map_err(|e| ReceiverErr::Task(format!("classification task failed: {e}")))?
}
