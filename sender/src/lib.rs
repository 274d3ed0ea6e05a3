pub mod dataset;
pub mod error;
pub mod rate;
pub mod sender;

pub use dataset::{InMemoryDataset, MeanTransform};
pub use error::{Result, SenderErr};
pub use rate::RateLimiter;
pub use sender::{Sender, SenderReport, SenderState};
