pub mod batch;
pub mod classifier;
pub mod error;
pub mod net;
pub mod pipeline;
pub mod reporter;
pub mod window;

pub use batch::{Batch, BatchAccumulator, FlushTrigger};
pub use classifier::{
    Classifier, ClassifierErr, ConstantClassifier, Label, OracleClassifier, ShuffledClassifier,
};
pub use error::{ReceiverErr, Result};
pub use pipeline::Receiver;
pub use reporter::{
    ChannelReporter, CollectingReporter, LogReporter, ReportEvent, Reporter, StdoutReporter,
    spawn_reporter,
};
pub use window::{RunSummary, WindowMode, WindowReport, WindowedAggregator};
