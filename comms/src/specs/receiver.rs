use std::{num::NonZeroUsize, time::Duration};

use serde::{Deserialize, Serialize};

use super::{SpecErr, invalid};

/// How reporting windows are delimited.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportingSpec {
    Images { count: u64 },
    Seconds { secs: f64 },
}

impl Default for ReportingSpec {
    fn default() -> Self {
        Self::Images { count: 100 }
    }
}

/// How the receiver schedules classification work.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionSpec {
    /// Read, batch, classify and aggregate sequentially on a single task.
    #[default]
    Cooperative,
    /// Drain arrivals on a fixed tick and classify batches in parallel.
    MicroBatch {
        tick_ms: u64,
        workers: NonZeroUsize,
        max_pending: usize,
    },
}

/// Which classifier contract scores a batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoringSpec {
    /// Order independent correct count.
    #[default]
    Evaluate,
    /// Per item predictions compared by position.
    Predict,
}

/// What to do with a batch the classifier failed on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Count the batch as failed and keep going.
    #[default]
    Skip,
    /// End the whole run with an error.
    Abort,
}

/// The built-in classifiers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassifierSpec {
    #[default]
    Oracle,
    Constant { label: u8 },
}

/// Where windows and the summary are written to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportOutput {
    /// One line per event on stdout.
    #[default]
    Stdout,
    /// One `info` log record per event.
    Log,
}

/// The configuration of the receiving process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReceiverSpec {
    pub source_address: String,
    pub source_port: u16,
    pub batch_size: NonZeroUsize,
    pub max_wait_ms: Option<u64>,
    pub reporting: ReportingSpec,
    pub execution: ExecutionSpec,
    pub idle_timeout_ms: Option<u64>,
    pub scoring: ScoringSpec,
    pub on_classifier_error: FailurePolicy,
    pub classifier: ClassifierSpec,
    pub output: ReportOutput,
    /// Handed to the classifier as is.
    pub model_paths: Vec<String>,
    pub connect_attempts: u32,
    pub connect_backoff_ms: u64,
}

impl Default for ReceiverSpec {
    fn default() -> Self {
        Self {
            source_address: "127.0.0.1".to_string(),
            source_port: 9999,
            batch_size: NonZeroUsize::new(2000).unwrap_or(NonZeroUsize::MIN),
            max_wait_ms: Some(1000),
            reporting: ReportingSpec::default(),
            execution: ExecutionSpec::default(),
            idle_timeout_ms: Some(10_000),
            scoring: ScoringSpec::default(),
            on_classifier_error: FailurePolicy::default(),
            classifier: ClassifierSpec::default(),
            output: ReportOutput::default(),
            model_paths: Vec::new(),
            connect_attempts: 10,
            connect_backoff_ms: 500,
        }
    }
}

impl ReceiverSpec {
    pub fn max_wait(&self) -> Option<Duration> {
        self.max_wait_ms.map(Duration::from_millis)
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout_ms.map(Duration::from_millis)
    }

    pub fn connect_backoff(&self) -> Duration {
        Duration::from_millis(self.connect_backoff_ms)
    }

    pub fn validate(&self) -> Result<(), SpecErr> {
        match self.reporting {
            ReportingSpec::Images { count: 0 } => {
                return invalid("reporting window must hold at least one image");
            }
            ReportingSpec::Seconds { secs }
                if secs <= 0.0 || Duration::try_from_secs_f64(secs).is_err() =>
            {
                return invalid(format!(
                    "reporting interval must be a positive number of seconds, got {secs}"
                ));
            }
            _ => {}
        }

        if let ExecutionSpec::MicroBatch { tick_ms: 0, .. } = self.execution {
            return invalid("micro batch tick must be positive");
        }

        if self.max_wait_ms == Some(0) {
            return invalid("max_wait_ms must be positive when set");
        }

        if self.idle_timeout_ms == Some(0) {
            return invalid("idle_timeout_ms must be positive when set");
        }

        if self.connect_attempts == 0 {
            return invalid("connect_attempts must be positive");
        }

        Ok(())
    }
}
