use std::{path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};

use super::{SpecErr, StreamSpec, invalid};

/// Where the sender's images come from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatasetSpec {
    /// Seeded random images.
    Synthetic { size: usize, seed: u64 },
    /// A CIFAR-10 binary batch file, `label || pixels` per record.
    CifarBin { path: PathBuf },
}

impl Default for DatasetSpec {
    fn default() -> Self {
        Self::Synthetic {
            size: 1000,
            seed: 0,
        }
    }
}

/// The configuration of the sending process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SenderSpec {
    pub images_per_second: f64,
    pub total_images: u64,
    pub progress_every: u64,
    pub rate_quantum_ms: u64,
    pub subtract_mean: bool,
    /// Published per channel means, used instead of computing them over the dataset.
    pub channel_means: Option<Vec<f32>>,
    pub grace_period_ms: u64,
    pub keep_open_ms: u64,
    pub send_end_marker: bool,
    pub dataset: DatasetSpec,
}

impl Default for SenderSpec {
    fn default() -> Self {
        Self {
            images_per_second: 10.0,
            total_images: 100,
            progress_every: 100,
            rate_quantum_ms: 100,
            subtract_mean: false,
            channel_means: None,
            grace_period_ms: 0,
            keep_open_ms: 0,
            send_end_marker: false,
            dataset: DatasetSpec::default(),
        }
    }
}

impl SenderSpec {
    pub fn rate_quantum(&self) -> Duration {
        Duration::from_millis(self.rate_quantum_ms)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }

    pub fn keep_open(&self) -> Duration {
        Duration::from_millis(self.keep_open_ms)
    }

    pub fn validate(&self, stream: &StreamSpec) -> Result<(), SpecErr> {
        let rate = self.images_per_second;
        if !rate.is_finite() || rate <= 0.0 {
            return invalid(format!("images_per_second must be positive, got {rate}"));
        }

        if self.progress_every == 0 {
            return invalid("progress_every must be positive");
        }

        if self.rate_quantum_ms == 0 {
            return invalid("rate_quantum_ms must be positive");
        }

        if let Some(means) = &self.channel_means {
            if means.len() != stream.channels {
                return invalid(format!(
                    "channel_means has {} values for {} channels",
                    means.len(),
                    stream.channels
                ));
            }
        }

        if let DatasetSpec::Synthetic { size: 0, .. } = self.dataset {
            return invalid("synthetic dataset must hold at least one image");
        }

        Ok(())
    }
}
