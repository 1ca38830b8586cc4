//! Application Services
//!
//! Services that orchestrate domain logic and coordinate between ports.
//!
//! - `ChangeDetector`: Suppresses quotes equal to the cached value
//! - `QuotePoller`: Periodic REST fallback feeding observations
//! - `QuotePipeline`: Merges sources, dedups and publishes

mod detector;
mod pipeline;
mod poller;

pub use detector::{ChangeDetector, cache_key};
pub use pipeline::QuotePipeline;
pub use poller::{CycleReport, PollingConfig, QuotePoller};
