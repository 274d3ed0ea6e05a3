use std::time::Duration;

use comms::{
    FrameCodec, FrameWriter,
    specs::{DatasetSpec, SenderSpec, StreamSpec},
};
use log::{debug, info};
use tokio::{
    io::AsyncWrite,
    net::{TcpListener, ToSocketAddrs},
    time::{self, Instant},
};

use crate::{InMemoryDataset, MeanTransform, RateLimiter, Result, SenderErr};

/// The lifecycle of a `Sender`, it only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SenderState {
    Idle,
    Priming,
    Streaming,
    Drained,
    Closed,
}

/// What a finished run achieved.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SenderReport {
    pub sent: u64,
    pub elapsed: Duration,
    pub target_rate: f64,
}

impl SenderReport {
    /// The rate actually sustained while streaming, below the target if the sink stalled.
    pub fn achieved_rate(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.sent as f64 / secs
        } else {
            0.0
        }
    }
}

/// Streams a fixed dataset as wire records at a paced rate.
pub struct Sender {
    spec: SenderSpec,
    codec: FrameCodec,
    state: SenderState,
    dataset: Option<InMemoryDataset>,
}

impl Sender {
    /// Creates a new idle `Sender`.
    ///
    /// # Arguments
    /// * `stream` - The shape of the stream's images.
    /// * `spec` - The sender's configuration.
    pub fn new(stream: &StreamSpec, spec: SenderSpec) -> Self {
        Self {
            spec,
            codec: stream.codec(),
            state: SenderState::Idle,
            dataset: None,
        }
    }

    #[inline]
    pub fn state(&self) -> SenderState {
        self.state
    }

    #[inline]
    pub fn dataset(&self) -> Option<&InMemoryDataset> {
        self.dataset.as_ref()
    }

    /// Binds `addr`, then primes the configured dataset.
    ///
    /// The address is claimed before anything is loaded, so a receiver that
    /// starts first finds the port open and nothing is loaded for nothing if
    /// it is taken.
    ///
    /// # Returns
    /// The bound listener, or a `SenderErr` if binding or priming failed.
    pub async fn listen<A: ToSocketAddrs>(&mut self, addr: A) -> Result<TcpListener> {
        self.expect(SenderState::Idle)?;

        let list = TcpListener::bind(addr).await?;
        info!("listening at {}", list.local_addr()?);

        self.prime()?;
        Ok(list)
    }

    /// Loads the configured dataset and gets ready to stream.
    pub fn prime(&mut self) -> Result<()> {
        self.expect(SenderState::Idle)?;

        let dataset = match &self.spec.dataset {
            DatasetSpec::Synthetic { size, seed } => {
                InMemoryDataset::synthetic(self.codec, *size, *seed)?
            }
            DatasetSpec::CifarBin { path } => InMemoryDataset::from_cifar_file(self.codec, path)?,
        };

        self.prime_with(dataset)
    }

    /// Gets ready to stream the given `dataset`.
    ///
    /// If mean subtraction is enabled, the per channel means are computed once
    /// over the whole dataset, unless pinned means are configured, and applied
    /// to every image before anything is sent.
    pub fn prime_with(&mut self, mut dataset: InMemoryDataset) -> Result<()> {
        self.expect(SenderState::Idle)?;

        if dataset.shape() != self.codec.shape() {
            return Err(SenderErr::Dataset(format!(
                "dataset shape {} doesn't match the stream's {}",
                dataset.shape(),
                self.codec.shape()
            )));
        }

        self.transition(SenderState::Priming);

        if self.spec.subtract_mean {
            let transform = match &self.spec.channel_means {
                Some(means) => MeanTransform::pinned(means.clone()),
                None => MeanTransform::computed(&dataset),
            };

            if transform.means().len() != dataset.shape().channels {
                return Err(SenderErr::Dataset(format!(
                    "{} channel means for {} channels",
                    transform.means().len(),
                    dataset.shape().channels
                )));
            }

            info!("subtracting channel means {:?}", transform.means());
            dataset.apply(&transform);
        }

        info!(images = dataset.len(); "ready to stream {} images", dataset.shape());

        self.dataset = Some(dataset);
        Ok(())
    }

    /// Streams `total_images` records into `tx`, cycling over the dataset.
    ///
    /// Waits the grace period first, then paces every write through a
    /// `RateLimiter`. Once drained it optionally writes the end marker, keeps
    /// the connection open for the configured time and shuts it down.
    ///
    /// # Arguments
    /// * `tx` - The byte sink.
    ///
    /// # Returns
    /// A `SenderReport` or a `SenderErr`. Any write failure ends the run, sent
    /// data can't be taken back so nothing is retried.
    pub async fn run<W>(&mut self, tx: W) -> Result<SenderReport>
    where
        W: AsyncWrite + Unpin,
    {
        self.expect(SenderState::Priming)?;
        let dataset = self.dataset.take().ok_or(SenderErr::InvalidState {
            expected: SenderState::Priming,
            got: SenderState::Idle,
        })?;

        let grace = self.spec.grace_period();
        if !grace.is_zero() {
            info!("waiting {grace:?} for the receiver to settle");
            time::sleep(grace).await;
        }

        let mut tx = FrameWriter::new(tx, self.codec);
        let result = self.stream(&dataset, &mut tx).await;
        self.dataset = Some(dataset);

        let report = result?;
        self.drain(&mut tx).await?;

        info!(
            sent = report.sent,
            elapsed_secs = report.elapsed.as_secs_f64(),
            target_rate = report.target_rate,
            achieved_rate = report.achieved_rate();
            "sender closed"
        );

        Ok(report)
    }

    async fn stream<W>(
        &mut self,
        dataset: &InMemoryDataset,
        tx: &mut FrameWriter<W>,
    ) -> Result<SenderReport>
    where
        W: AsyncWrite + Unpin,
    {
        self.transition(SenderState::Streaming);

        let total = self.spec.total_images;
        let every = self.spec.progress_every;
        let mut limiter = RateLimiter::new(self.spec.images_per_second, self.spec.rate_quantum());

        limiter.start();
        let start = Instant::now();

        for idx in 0..total {
            limiter.acquire().await;
            tx.send(dataset.cycled(idx)).await?;

            let sent = idx + 1;
            if sent % every == 0 {
                let rate = sent as f64 / start.elapsed().as_secs_f64().max(f64::EPSILON);
                info!(sent = sent, total = total, rate = rate; "progress");
            }
        }

        tx.flush().await?;

        Ok(SenderReport {
            sent: tx.sent(),
            elapsed: start.elapsed(),
            target_rate: limiter.rate(),
        })
    }

    async fn drain<W>(&mut self, tx: &mut FrameWriter<W>) -> Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        self.transition(SenderState::Drained);

        if self.spec.send_end_marker {
            debug!("sending end marker");
            tx.send_end().await?;
            tx.flush().await?;
        }

        let keep_open = self.spec.keep_open();
        if !keep_open.is_zero() {
            info!("keeping the connection open for {keep_open:?}");
            time::sleep(keep_open).await;
        }

        tx.shutdown().await?;
        self.transition(SenderState::Closed);
        Ok(())
    }

    fn expect(&self, expected: SenderState) -> Result<()> {
        if self.state != expected {
            return Err(SenderErr::InvalidState {
                expected,
                got: self.state,
            });
        }

        Ok(())
    }

    fn transition(&mut self, next: SenderState) {
        debug_assert!(next > self.state, "{:?} -> {next:?}", self.state);
        info!("sender {:?} -> {next:?}", self.state);
        self.state = next;
    }
}
