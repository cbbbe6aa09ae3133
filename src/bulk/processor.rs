//! Bounded, cancellable bulk rendering

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;

use futures::future;
use futures::stream::{self, BoxStream, Stream, StreamExt};
use tokio::task::JoinHandle;
use tracing::Instrument;
use uuid::Uuid;

use crate::cache::TemplateCache;
use crate::metrics::{BulkMetrics, RenderMetrics};
use crate::render::Renderer;
use crate::selection::{RngFactory, SystemRandom};
use crate::template::ParsedTemplate;
use crate::tracker::VariationTracker;

use super::sink::DeliverySink;
use super::types::{
    BulkConfig, BulkError, BulkProgress, BulkSummary, CancelHandle, ProgressSnapshot, Recipient,
    RecipientError, RecipientErrorKind, RecipientOutcome, RecipientState, RenderedMessage,
};

/// Renders one template for many recipients through a bounded worker pool
pub struct BulkProcessor<F: RngFactory = SystemRandom> {
    cache: Arc<TemplateCache>,
    tracker: Arc<VariationTracker>,
    renderer: Renderer,
    random: Arc<F>,
    config: BulkConfig,
}

impl BulkProcessor<SystemRandom> {
    pub fn new(
        cache: Arc<TemplateCache>,
        tracker: Arc<VariationTracker>,
        renderer: Renderer,
        config: BulkConfig,
    ) -> Self {
        Self::with_random(cache, tracker, renderer, config, SystemRandom)
    }
}

impl<F: RngFactory> BulkProcessor<F> {
    /// Create a processor drawing selections from a custom generator source
    pub fn with_random(
        cache: Arc<TemplateCache>,
        tracker: Arc<VariationTracker>,
        renderer: Renderer,
        config: BulkConfig,
        random: F,
    ) -> Self {
        Self {
            cache,
            tracker,
            renderer,
            random: Arc::new(random),
            config,
        }
    }

    pub fn cache(&self) -> &Arc<TemplateCache> {
        &self.cache
    }

    pub fn tracker(&self) -> &Arc<VariationTracker> {
        &self.tracker
    }

    pub fn config(&self) -> &BulkConfig {
        &self.config
    }

    /// Start a run over a lazily produced recipient sequence.
    ///
    /// The template is resolved once before any recipient is scheduled; a
    /// template that fails to parse rejects the whole run. Each recipient
    /// then gets its own selection draw and its own outcome.
    #[tracing::instrument(
        name = "bulk.process",
        skip(self, campaign_id, raw, recipients),
        fields(campaign_id = %campaign_id)
    )]
    pub async fn process<S>(
        &self,
        campaign_id: &str,
        raw: &str,
        recipients: S,
        concurrency: Option<usize>,
    ) -> Result<BulkRun, BulkError>
    where
        S: Stream<Item = Recipient> + Send + 'static,
    {
        let limit = self.config.resolve(concurrency).inspect_err(|_| {
            BulkMetrics::record_rejected();
        })?;

        let template = match self.cache.get_or_parse(raw).await {
            Ok(template) => template,
            Err(e) => {
                BulkMetrics::record_rejected();
                tracing::warn!(
                    campaign_id = %campaign_id,
                    error = %e,
                    "Rejecting bulk run, template does not parse"
                );
                return Err(BulkError::Template(e));
            }
        };

        let run_id = Uuid::new_v4();
        let span = tracing::info_span!(
            "bulk.run",
            run_id = %run_id,
            campaign_id = %campaign_id,
            concurrency = limit
        );
        let cancel = CancelHandle::default();
        let progress = Arc::new(BulkProgress::default());

        let groups = template.group_count();
        let context = Arc::new(RenderContext {
            campaign_id: Arc::from(campaign_id),
            template,
            tracker: self.tracker.clone(),
            renderer: self.renderer,
            random: self.random.clone(),
            progress: progress.clone(),
        });

        let gate = cancel.clone();
        let worker_span = span.clone();
        let outcomes = recipients
            .take_while(move |_| future::ready(!gate.is_cancelled()))
            .map(move |recipient| {
                context.progress.mark_scheduled();
                spawn_render(context.clone(), recipient, worker_span.clone())
            })
            .buffer_unordered(limit)
            .boxed();

        BulkMetrics::record_started();
        tracing::info!(parent: &span, groups = groups, "Bulk run started");

        Ok(BulkRun {
            run_id,
            campaign_id: campaign_id.to_string(),
            cancel,
            progress,
            outcomes,
            span,
            delivered: 0,
            finished: false,
        })
    }

    /// Start a run over an in-memory recipient list
    pub async fn process_iter<I>(
        &self,
        campaign_id: &str,
        raw: &str,
        recipients: I,
        concurrency: Option<usize>,
    ) -> Result<BulkRun, BulkError>
    where
        I: IntoIterator<Item = Recipient>,
        I::IntoIter: Send + 'static,
    {
        self.process(campaign_id, raw, stream::iter(recipients), concurrency)
            .await
    }
}

/// Shared state for the render tasks of one run
struct RenderContext<F: RngFactory> {
    campaign_id: Arc<str>,
    template: Arc<ParsedTemplate>,
    tracker: Arc<VariationTracker>,
    renderer: Renderer,
    random: Arc<F>,
    progress: Arc<BulkProgress>,
}

impl<F: RngFactory> RenderContext<F> {
    fn render_recipient(&self, recipient: Recipient) -> RecipientOutcome {
        self.progress.mark_rendering();
        let started = Instant::now();

        let mut rng = self.random.rng();
        let result = self
            .renderer
            .render_random(&self.template, &recipient.variables, &mut rng);

        let outcome = match result {
            Ok(rendered) => {
                self.tracker.record(&self.campaign_id, &rendered.choices);
                RenderMetrics::record_success(started.elapsed());
                RecipientOutcome::Succeeded(RenderedMessage {
                    recipient_id: recipient.id,
                    text: rendered.text,
                    path: rendered.path,
                })
            }
            Err(e) => {
                RenderMetrics::record_failure(e.code());
                tracing::debug!(
                    recipient_id = %recipient.id,
                    error = %e,
                    "Recipient render failed"
                );
                RecipientOutcome::Failed(RecipientError {
                    recipient_id: recipient.id,
                    kind: RecipientErrorKind::Render(e),
                })
            }
        };

        self.progress.mark_finished(outcome.state());
        outcome
    }
}

/// Render one recipient on the runtime, turning a lost task into a failure
async fn spawn_render<F: RngFactory>(
    context: Arc<RenderContext<F>>,
    recipient: Recipient,
    span: tracing::Span,
) -> RecipientOutcome {
    let recipient_id = recipient.id.clone();
    let worker = context.clone();
    let task = tokio::spawn(async move { worker.render_recipient(recipient) }.instrument(span));
    join_render(&context, recipient_id, task).await
}

async fn join_render<F: RngFactory>(
    context: &RenderContext<F>,
    recipient_id: String,
    task: JoinHandle<RecipientOutcome>,
) -> RecipientOutcome {
    match task.await {
        Ok(outcome) => outcome,
        Err(e) => {
            tracing::error!(
                recipient_id = %recipient_id,
                error = %e,
                "Render task did not complete"
            );
            // A cancelled task was never polled, so it never entered rendering.
            if e.is_cancelled() {
                context.progress.mark_terminal(RecipientState::Failed);
            } else {
                context.progress.mark_finished(RecipientState::Failed);
            }
            RenderMetrics::record_failure("worker_failed");
            RecipientOutcome::Failed(RecipientError {
                recipient_id,
                kind: RecipientErrorKind::Worker(e.to_string()),
            })
        }
    }
}

/// A running bulk job.
///
/// Yields one outcome per scheduled recipient, in completion order. Dropping
/// the run stops scheduling; renders already in progress still finish and
/// are recorded by the tracker.
pub struct BulkRun {
    run_id: Uuid,
    campaign_id: String,
    cancel: CancelHandle,
    progress: Arc<BulkProgress>,
    outcomes: BoxStream<'static, RecipientOutcome>,
    span: tracing::Span,
    delivered: u64,
    finished: bool,
}

impl BulkRun {
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn campaign_id(&self) -> &str {
        &self.campaign_id
    }

    /// Handle that stops scheduling new recipients when cancelled
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn progress(&self) -> ProgressSnapshot {
        self.progress.snapshot()
    }

    /// Drain the run into a vector of outcomes
    pub async fn collect_outcomes(self) -> Vec<RecipientOutcome> {
        self.collect().await
    }

    /// Drain the run, handing every rendered message to `sink`.
    ///
    /// Sink failures are recorded against their recipient and do not stop
    /// the run.
    pub async fn deliver_to<S>(mut self, sink: &S) -> BulkSummary
    where
        S: DeliverySink + ?Sized,
    {
        let mut succeeded = 0u64;
        let mut failed = 0u64;
        let mut delivery_failures = 0u64;
        let mut failures = Vec::new();

        while let Some(outcome) = self.next().await {
            match outcome {
                RecipientOutcome::Succeeded(message) => match sink.deliver(&message).await {
                    Ok(()) => succeeded += 1,
                    Err(e) => {
                        tracing::warn!(
                            parent: &self.span,
                            recipient_id = %message.recipient_id,
                            error = %e,
                            "Delivery failed"
                        );
                        delivery_failures += 1;
                        failures.push(RecipientError {
                            recipient_id: message.recipient_id,
                            kind: RecipientErrorKind::Delivery(e.to_string()),
                        });
                    }
                },
                RecipientOutcome::Failed(error) => {
                    failed += 1;
                    failures.push(error);
                }
            }
        }

        BulkSummary {
            run_id: self.run_id,
            campaign_id: self.campaign_id.clone(),
            succeeded,
            failed,
            delivery_failures,
            cancelled: self.cancel.is_cancelled(),
            failures,
        }
    }

    fn finish(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;

        let cancelled = self.cancel.is_cancelled();
        if cancelled {
            BulkMetrics::record_cancelled();
        }
        BulkMetrics::record_completed(self.delivered);

        let progress = self.progress.snapshot();
        tracing::info!(
            parent: &self.span,
            succeeded = progress.succeeded,
            failed = progress.failed,
            cancelled = cancelled,
            "Bulk run finished"
        );
    }
}

impl Stream for BulkRun {
    type Item = RecipientOutcome;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        match this.outcomes.poll_next_unpin(cx) {
            Poll::Ready(Some(outcome)) => {
                this.delivered += 1;
                Poll::Ready(Some(outcome))
            }
            Poll::Ready(None) => {
                this.finish();
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl std::fmt::Debug for BulkRun {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BulkRun")
            .field("run_id", &self.run_id)
            .field("campaign_id", &self.campaign_id)
            .field("progress", &self.progress.snapshot())
            .field("finished", &self.finished)
            .finish()
    }
}
