//! Bulk campaign rendering.
//!
//! A run resolves its template once through the shared cache, then renders
//! every recipient on a bounded pool of tasks. Each recipient draws its own
//! selection, succeeds or fails on its own, and successful renders are
//! recorded by the variation tracker. Runs are streams of outcomes and can be
//! cancelled cooperatively or drained into a `DeliverySink`.

mod processor;
mod sink;
mod source;
mod types;

pub use processor::{BulkProcessor, BulkRun};
pub use sink::{DeliveryError, DeliverySink, JsonLinesSink, MemorySink};
pub use source::recipients_from_lines;
pub use types::{
    BulkConfig, BulkError, BulkProgress, BulkSummary, CampaignJob, CancelHandle, ProgressSnapshot,
    Recipient, RecipientError, RecipientErrorKind, RecipientOutcome, RecipientState,
    RenderedMessage,
};
