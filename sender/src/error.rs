use std::{error::Error, fmt, io};

use crate::SenderState;

/// The sender module's result type.
pub type Result<T> = std::result::Result<T, SenderErr>;

/// Sender failures, all of them end the run.
#[derive(Debug)]
pub enum SenderErr {
    Io(io::Error),
    Dataset(String),
    InvalidState {
        expected: SenderState,
        got: SenderState,
    },
}

impl fmt::Display for SenderErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SenderErr::Io(e) => write!(f, "io error: {e}"),
            SenderErr::Dataset(msg) => write!(f, "dataset error: {msg}"),
            SenderErr::InvalidState { expected, got } => {
                write!(f, "sender is {got:?}, expected it to be {expected:?}")
            }
        }
    }
}

impl Error for SenderErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            SenderErr::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for SenderErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

/// Boundary conversion for binaries / I/O APIs.
impl From<SenderErr> for io::Error {
    fn from(value: SenderErr) -> Self {
        match value {
            SenderErr::Io(e) => e,
            other => io::Error::new(io::ErrorKind::InvalidData, other),
        }
    }
}
