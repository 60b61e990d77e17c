//! Release aggregation and publishing for Wheelwright.
//!
//! Gathers the per-platform wheels a run produced, builds the source
//! distribution, and performs the single gated publish action.

pub mod pipeline;
pub mod publish;

pub use pipeline::{ReleaseOutcome, ReleasePipeline};
pub use publish::{
    CommandPublisher, MemoryPublisher, PublishCredentials, PublishReceipt, PublishedSet, Publisher,
};
