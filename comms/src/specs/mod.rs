//! Serializable configuration of both ends of the benchmark.
//!
//! Every field has a default, a JSON file only needs to name what it changes.

mod receiver;
mod sender;
mod stream;

use std::{env, error::Error, fmt, fs, io, path::Path};

use serde::{Deserialize, Serialize, de::DeserializeOwned};

pub use receiver::{
    ClassifierSpec, ExecutionSpec, FailurePolicy, ReceiverSpec, ReportOutput, ReportingSpec,
    ScoringSpec,
};
pub use sender::{DatasetSpec, SenderSpec};
pub use stream::StreamSpec;

/// The environment variable naming the JSON configuration file.
pub const CONFIG_ENV: &str = "BENCH_CONFIG";

/// Configuration loading failures.
#[derive(Debug)]
pub enum SpecErr {
    Io(io::Error),
    Json(serde_json::Error),
    Invalid(String),
}

impl fmt::Display for SpecErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "io error: {e}"),
            Self::Json(e) => write!(f, "invalid json: {e}"),
            Self::Invalid(msg) => write!(f, "invalid config: {msg}"),
        }
    }
}

impl Error for SpecErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Json(e) => Some(e),
            Self::Invalid(_) => None,
        }
    }
}

impl From<io::Error> for SpecErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<serde_json::Error> for SpecErr {
    fn from(value: serde_json::Error) -> Self {
        Self::Json(value)
    }
}

/// The whole benchmark configuration, both binaries read the same file so the
/// stream's shape can't disagree between them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BenchSpec {
    pub stream: StreamSpec,
    pub sender: SenderSpec,
    pub receiver: ReceiverSpec,
}

impl BenchSpec {
    /// Loads the configuration named by `BENCH_CONFIG`, or the defaults if it isn't set.
    ///
    /// # Returns
    /// The validated spec or a `SpecErr`.
    pub fn from_env() -> Result<Self, SpecErr> {
        let spec = match env::var_os(CONFIG_ENV) {
            Some(path) => from_json_file(Path::new(&path))?,
            None => Self::default(),
        };

        spec.validate()?;
        Ok(spec)
    }

    /// Checks every section of the configuration.
    pub fn validate(&self) -> Result<(), SpecErr> {
        self.stream.validate()?;
        self.sender.validate(&self.stream)?;
        self.receiver.validate()
    }
}

/// Reads and deserializes a JSON file.
///
/// # Arguments
/// * `path` - The file to read.
pub fn from_json_file<T: DeserializeOwned>(path: &Path) -> Result<T, SpecErr> {
    let bytes = fs::read(path)?;
    Ok(serde_json::from_slice(&bytes)?)
}

fn invalid<T>(msg: impl Into<String>) -> Result<T, SpecErr> {
    Err(SpecErr::Invalid(msg.into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_object_is_all_defaults() {
        let spec: BenchSpec = serde_json::from_str("{}").unwrap();
        assert_eq!(spec, BenchSpec::default());
        spec.validate().unwrap();
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let json = r#"{
            "sender": { "images_per_second": 1000, "total_images": 10000 },
            "receiver": {
                "reporting": { "images": { "count": 2500 } },
                "execution": { "micro_batch": { "tick_ms": 500, "workers": 2, "max_pending": 1 } }
            }
        }"#;

        let spec: BenchSpec = serde_json::from_str(json).unwrap();
        assert_eq!(spec.sender.images_per_second, 1000.0);
        assert_eq!(spec.sender.total_images, 10000);
        assert_eq!(spec.sender.progress_every, 100);
        assert_eq!(spec.receiver.reporting, ReportingSpec::Images { count: 2500 });
        assert!(matches!(
            spec.receiver.execution,
            ExecutionSpec::MicroBatch { tick_ms: 500, .. }
        ));
        assert_eq!(spec.receiver.batch_size.get(), 2000);
        spec.validate().unwrap();
    }

    #[test]
    fn reporting_interval_must_fit_a_duration() {
        for secs in [0.0, -1.0, f64::NAN, f64::INFINITY, 1e30] {
            let mut spec = BenchSpec::default();
            spec.receiver.reporting = ReportingSpec::Seconds { secs };
            assert!(matches!(spec.validate(), Err(SpecErr::Invalid(_))), "{secs}");
        }

        let mut spec = BenchSpec::default();
        spec.receiver.reporting = ReportingSpec::Seconds { secs: 0.5 };
        spec.validate().unwrap();
    }

    #[test]
    fn zero_rate_is_rejected() {
        let mut spec = BenchSpec::default();
        spec.sender.images_per_second = 0.0;
        assert!(matches!(spec.validate(), Err(SpecErr::Invalid(_))));
    }
}
