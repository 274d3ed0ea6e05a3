use std::{error::Error, fmt, io};

use crate::ClassifierErr;

/// The receiver module's result type.
pub type Result<T> = std::result::Result<T, ReceiverErr>;

/// Receiver runtime failures, all of them end the run without a summary.
#[derive(Debug)]
pub enum ReceiverErr {
    Io(io::Error),
    /// The stream broke its framing, the connection can't be recovered.
    Protocol(io::Error),
    Classifier {
        batch: u64,
        source: ClassifierErr,
    },
    Task(String),
}

impl ReceiverErr {
    /// Sorts a read failure into a transport or a protocol error.
    pub fn from_read(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::InvalidData => Self::Protocol(e),
            _ => Self::Io(e),
        }
    }
}

impl fmt::Display for ReceiverErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReceiverErr::Io(e) => write!(f, "io error: {e}"),
            ReceiverErr::Protocol(e) => write!(f, "protocol violation: {e}"),
            ReceiverErr::Classifier { batch, source } => {
                write!(f, "classifier failed on batch {batch}: {source}")
            }
            ReceiverErr::Task(msg) => write!(f, "task failed: {msg}"),
        }
    }
}

impl Error for ReceiverErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ReceiverErr::Io(e) | ReceiverErr::Protocol(e) => Some(e),
            ReceiverErr::Classifier { source, .. } => Some(source),
            ReceiverErr::Task(_) => None,
        }
    }
}

impl From<io::Error> for ReceiverErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

/// Boundary conversion for binaries / I/O APIs.
impl From<ReceiverErr> for io::Error {
    fn from(value: ReceiverErr) -> Self {
        match value {
            ReceiverErr::Io(e) | ReceiverErr::Protocol(e) => e,
            other => io::Error::other(other),
        }
    }
}
