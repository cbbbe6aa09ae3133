//! Bulk run types: recipients, outcomes, progress, and configuration

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::error::AppError;
use crate::render::{RenderError, Variables};
use crate::selection::SelectionPath;
use crate::template::ParseError;

/// One recipient of a campaign
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Recipient {
    pub id: String,
    #[serde(default)]
    pub variables: Variables,
}

impl Recipient {
    pub fn new(id: impl Into<String>, variables: Variables) -> Self {
        Self {
            id: id.into(),
            variables,
        }
    }
}

/// A campaign job as loaded by the runner
#[derive(Debug, Clone, Deserialize)]
pub struct CampaignJob {
    pub campaign_id: String,
    pub template: String,
    #[serde(default)]
    pub concurrency: Option<usize>,
    #[serde(default)]
    pub recipients: Vec<Recipient>,
}

impl CampaignJob {
    /// Parse a job file body
    pub fn from_json(contents: &str) -> crate::error::Result<Self> {
        serde_json::from_str(contents).map_err(AppError::InvalidJob)
    }
}

/// Lifecycle of one recipient within a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecipientState {
    Pending,
    Rendering,
    Succeeded,
    Failed,
}

impl RecipientState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RecipientState::Succeeded | RecipientState::Failed)
    }
}

/// A successfully rendered message for one recipient
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenderedMessage {
    pub recipient_id: String,
    pub text: String,
    pub path: SelectionPath,
}

/// Why a recipient failed
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecipientErrorKind {
    #[error(transparent)]
    Render(#[from] RenderError),

    #[error("Delivery failed: {0}")]
    Delivery(String),

    #[error("Render task failed: {0}")]
    Worker(String),
}

impl RecipientErrorKind {
    pub fn code(&self) -> &'static str {
        match self {
            RecipientErrorKind::Render(e) => e.code(),
            RecipientErrorKind::Delivery(_) => "delivery_failed",
            RecipientErrorKind::Worker(_) => "worker_failed",
        }
    }
}

/// A failure attributed to one recipient
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Recipient {recipient_id}: {kind}")]
pub struct RecipientError {
    pub recipient_id: String,
    pub kind: RecipientErrorKind,
}

impl Serialize for RecipientError {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeStruct;

        let mut state = serializer.serialize_struct("RecipientError", 3)?;
        state.serialize_field("recipient_id", &self.recipient_id)?;
        state.serialize_field("code", self.kind.code())?;
        state.serialize_field("message", &self.kind.to_string())?;
        state.end()
    }
}

/// Terminal result for one recipient
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RecipientOutcome {
    Succeeded(RenderedMessage),
    Failed(RecipientError),
}

impl RecipientOutcome {
    pub fn recipient_id(&self) -> &str {
        match self {
            RecipientOutcome::Succeeded(message) => &message.recipient_id,
            RecipientOutcome::Failed(error) => &error.recipient_id,
        }
    }

    pub fn state(&self) -> RecipientState {
        match self {
            RecipientOutcome::Succeeded(_) => RecipientState::Succeeded,
            RecipientOutcome::Failed(_) => RecipientState::Failed,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, RecipientOutcome::Succeeded(_))
    }
}

/// Bulk-level error type, raised before any recipient is scheduled
#[derive(Debug, Clone, Error)]
pub enum BulkError {
    #[error("Invalid concurrency limit: {0} (must be at least 1)")]
    InvalidConcurrency(usize),

    #[error("Template rejected: {0}")]
    Template(#[from] ParseError),
}

/// Worker pool bounds
#[derive(Debug, Clone)]
pub struct BulkConfig {
    /// Limit used when a run does not request one
    pub default_concurrency: usize,
    /// Upper bound applied to every requested limit
    pub max_concurrency: usize,
}

impl Default for BulkConfig {
    fn default() -> Self {
        Self {
            default_concurrency: 32,
            max_concurrency: 256,
        }
    }
}

impl BulkConfig {
    /// Effective worker count for a requested limit
    pub fn resolve(&self, requested: Option<usize>) -> Result<usize, BulkError> {
        let limit = requested.unwrap_or(self.default_concurrency);
        if limit == 0 {
            return Err(BulkError::InvalidConcurrency(limit));
        }
        Ok(limit.min(self.max_concurrency.max(1)))
    }
}

/// Cooperative cancellation flag shared with a running bulk run
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    /// Stop scheduling new recipients; renders already running complete
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Live per-state recipient counts for a run
#[derive(Debug, Default)]
pub struct BulkProgress {
    scheduled: AtomicU64,
    rendering: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
}

impl BulkProgress {
    pub(crate) fn mark_scheduled(&self) {
        self.scheduled.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn mark_rendering(&self) {
        self.rendering.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn mark_finished(&self, state: RecipientState) {
        self.rendering.fetch_sub(1, Ordering::Relaxed);
        self.mark_terminal(state);
    }

    /// Terminal state for a recipient whose task never reported back
    pub(crate) fn mark_terminal(&self, state: RecipientState) {
        match state {
            RecipientState::Succeeded => self.succeeded.fetch_add(1, Ordering::Relaxed),
            _ => self.failed.fetch_add(1, Ordering::Relaxed),
        };
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        let succeeded = self.succeeded.load(Ordering::Relaxed);
        let failed = self.failed.load(Ordering::Relaxed);
        let rendering = self.rendering.load(Ordering::Relaxed);
        let scheduled = self.scheduled.load(Ordering::Relaxed);
        ProgressSnapshot {
            pending: scheduled.saturating_sub(rendering + succeeded + failed),
            rendering,
            succeeded,
            failed,
        }
    }
}

/// Point-in-time progress of a run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProgressSnapshot {
    /// Scheduled but not yet picked up by a worker
    pub pending: u64,
    pub rendering: u64,
    pub succeeded: u64,
    pub failed: u64,
}

impl ProgressSnapshot {
    /// Recipients currently in `state`
    pub fn count(&self, state: RecipientState) -> u64 {
        match state {
            RecipientState::Pending => self.pending,
            RecipientState::Rendering => self.rendering,
            RecipientState::Succeeded => self.succeeded,
            RecipientState::Failed => self.failed,
        }
    }

    pub fn completed(&self) -> u64 {
        self.succeeded + self.failed
    }
}

/// Result of draining a run into a delivery sink
#[derive(Debug, Clone, Serialize)]
pub struct BulkSummary {
    pub run_id: Uuid,
    pub campaign_id: String,
    /// Rendered and accepted by the sink
    pub succeeded: u64,
    /// Failed to render
    pub failed: u64,
    /// Rendered but rejected by the sink
    pub delivery_failures: u64,
    pub cancelled: bool,
    pub failures: Vec<RecipientError>,
}

impl BulkSummary {
    pub fn total(&self) -> u64 {
        self.succeeded + self.failed + self.delivery_failures
    }
}
