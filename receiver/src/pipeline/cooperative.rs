use comms::{FrameReader, Image, ReadEvent};
use log::{debug, info};
use tokio::{io::AsyncRead, time::Instant};
use tokio_util::sync::CancellationToken;

use super::{Activity, Receiver, apply, classify, describe, until};
use crate::{Batch, FlushTrigger, Result, RunSummary, WindowedAggregator, error::ReceiverErr};

enum Step {
    Read(std::io::Result<ReadEvent>),
    BatchDue,
    WindowDue,
    Idle,
    Cancelled,
}

/// Reads, batches, classifies and aggregates on the calling task.
///
/// Reading stops while a batch is classified, so a slow classifier is
/// absorbed by the socket buffers and eventually stalls the sender. Nothing
/// is ever dropped.
pub(super) async fn run<R>(
    receiver: &Receiver,
    mut rx: FrameReader<R>,
    mut agg: WindowedAggregator,
    cancel: CancellationToken,
) -> Result<RunSummary>
where
    R: AsyncRead + Unpin,
{
    let spec = receiver.spec();
    let mut acc = receiver.accumulator(spec.max_wait());
    let mut activity = Activity::new(spec.idle_timeout());
    let mut seq = 0;

    let summary = loop {
        let step = tokio::select! {
            biased;
            _ = cancel.cancelled() => Step::Cancelled,
            event = rx.next() => Step::Read(event),
            _ = until(acc.deadline()) => Step::BatchDue,
            _ = until(agg.next_due()) => Step::WindowDue,
            _ = until(activity.deadline()) => Step::Idle,
        };

        let now = Instant::now();
        if activity.observe(rx.bytes_received(), now) {
            agg.start_clock(now);
        }

        let batch = match step {
            Step::Read(Ok(ReadEvent::Image(img))) => acc.push(img, now),
            Step::Read(Ok(ReadEvent::End { .. })) => {
                info!("stream ended");
                if let Some(batch) = acc.take(FlushTrigger::EndOfStream) {
                    seq += 1;
                    process(receiver, &mut agg, seq, batch).await?;
                }
                break agg.finalize_at(Instant::now());
            }
            Step::Read(Err(e)) => return Err(ReceiverErr::from_read(e)),
            Step::BatchDue => acc.poll_expired(now),
            Step::WindowDue => None,
            Step::Idle => {
                if !activity.expired(now) {
                    continue;
                }

                info!("no bytes for {:?}, finalizing", activity.timeout.unwrap_or_default());
                if let Some(batch) = acc.take(FlushTrigger::EndOfStream) {
                    seq += 1;
                    process(receiver, &mut agg, seq, batch).await?;
                }
                break agg.finalize_idle(activity.last);
            }
            Step::Cancelled => {
                info!("cancelled, finalizing");
                if let Some(batch) = acc.take(FlushTrigger::EndOfStream) {
                    seq += 1;
                    process(receiver, &mut agg, seq, batch).await?;
                }
                break agg.finalize_at(Instant::now());
            }
        };

        if let Some(batch) = batch {
            seq += 1;
            process(receiver, &mut agg, seq, batch).await?;
            // Nothing was read while classifying.
            activity.resume(Instant::now());
        }

        agg.flush_if_due(Instant::now());
    };

    Ok(summary)
}

async fn process(
    receiver: &Receiver,
    agg: &mut WindowedAggregator,
    seq: u64,
    batch: Batch<Image>,
) -> Result<()> {
    debug!(batch = seq; "classifying {}", describe(&batch));

    let spec = receiver.spec();
    let size = batch.len();
    let outcome = classify(receiver.classifier.clone(), batch.items, spec.scoring).await?;

    apply(agg, seq, size, outcome, spec.on_classifier_error)
}
