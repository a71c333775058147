//! AI workflow synthesis pipeline.
//!
//! One generation runs at a time; further requests queue FIFO and are never
//! dropped, but a request that has waited past the configured ceiling fails
//! busy instead of holding the UI hostage. Every request ends in exactly one
//! terminal `workflow_progress` stage (completed or error) and failures
//! are reported on the stream, never raised to the submitter.

pub mod generator;
pub mod models;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use uuid::Uuid;

use crate::bus::events::{EventKind, WorkflowStage};
use crate::bus::EventBus;
use crate::error::{Result, TraqError};
use crate::storage::{ArtifactKind, ArtifactStore};
use generator::WorkflowGenerator;
use models::Workflow;

/// Handle for a submitted request. The outcome also arrives on the event
/// stream; the ticket exists for callers that need the result in-process.
pub struct WorkflowTicket {
    pub request_id: Uuid,
    /// Resolves to the workflow on success, `None` on a terminal error.
    pub done: oneshot::Receiver<Option<Workflow>>,
}

struct PendingRequest {
    request_id: Uuid,
    source_text: String,
    enqueued_at: Instant,
    done: oneshot::Sender<Option<Workflow>>,
}

pub struct WorkflowSynthesizer {
    tx: mpsc::UnboundedSender<PendingRequest>,
    /// Queued plus in-flight requests
    depth: Arc<AtomicUsize>,
}

impl WorkflowSynthesizer {
    pub fn new(
        bus: Arc<EventBus>,
        generator: Arc<dyn WorkflowGenerator>,
        artifacts: Arc<ArtifactStore>,
        queue_ceiling: Duration,
    ) -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        let depth = Arc::new(AtomicUsize::new(0));
        tokio::spawn(worker(
            rx,
            bus,
            generator,
            artifacts,
            queue_ceiling,
            depth.clone(),
        ));
        Arc::new(Self { tx, depth })
    }

    /// Enqueue a generation request. Begins immediately if nothing is in
    /// flight, otherwise waits its turn in arrival order.
    pub fn submit(&self, source_text: impl Into<String>) -> Result<WorkflowTicket> {
        let source_text = source_text.into();
        if source_text.trim().chars().count() < 10 {
            return Err(TraqError::Validation(
                "transcript is too short to generate a workflow".to_string(),
            ));
        }

        let request_id = Uuid::new_v4();
        let (done_tx, done_rx) = oneshot::channel();
        self.depth.fetch_add(1, Ordering::SeqCst);
        self.tx
            .send(PendingRequest {
                request_id,
                source_text,
                enqueued_at: Instant::now(),
                done: done_tx,
            })
            .map_err(|_| TraqError::Internal("synthesis worker is gone".to_string()))?;

        tracing::debug!(%request_id, "workflow generation queued");
        Ok(WorkflowTicket {
            request_id,
            done: done_rx,
        })
    }

    /// Queued plus in-flight request count.
    pub fn pending(&self) -> usize {
        self.depth.load(Ordering::SeqCst)
    }
}

async fn worker(
    mut rx: mpsc::UnboundedReceiver<PendingRequest>,
    bus: Arc<EventBus>,
    generator: Arc<dyn WorkflowGenerator>,
    artifacts: Arc<ArtifactStore>,
    queue_ceiling: Duration,
    depth: Arc<AtomicUsize>,
) {
    while let Some(request) = rx.recv().await {
        let outcome = process(&request, &bus, generator.as_ref(), &artifacts, queue_ceiling).await;
        depth.fetch_sub(1, Ordering::SeqCst);
        let _ = request.done.send(outcome);
    }
}

fn progress(bus: &EventBus, stage: WorkflowStage, message: &str) {
    bus.publish(EventKind::WorkflowProgress {
        stage,
        message: message.to_string(),
    });
}

async fn process(
    request: &PendingRequest,
    bus: &Arc<EventBus>,
    generator: &dyn WorkflowGenerator,
    artifacts: &ArtifactStore,
    queue_ceiling: Duration,
) -> Option<Workflow> {
    if request.enqueued_at.elapsed() > queue_ceiling {
        tracing::warn!(request_id = %request.request_id, "request expired in queue");
        progress(
            bus,
            WorkflowStage::Error,
            "generator busy: request expired while waiting in queue",
        );
        return None;
    }

    progress(
        bus,
        WorkflowStage::Starting,
        "Initializing workflow generation...",
    );
    progress(
        bus,
        WorkflowStage::Processing,
        "Analyzing transcript with AI...",
    );

    // One bounded retry before the failure becomes terminal.
    let workflow = match generator.generate(&request.source_text).await {
        Ok(workflow) => workflow,
        Err(first) => {
            tracing::warn!(
                request_id = %request.request_id,
                "generation failed, retrying once: {first}"
            );
            match generator.generate(&request.source_text).await {
                Ok(workflow) => workflow,
                Err(e) => {
                    tracing::error!(request_id = %request.request_id, "generation failed: {e}");
                    progress(bus, WorkflowStage::Error, &format!("Error: {e}"));
                    return None;
                }
            }
        }
    };

    progress(
        bus,
        WorkflowStage::Formatting,
        "Formatting workflow structure...",
    );

    let artifact = persist(artifacts, &request.source_text, &workflow).await;

    progress(
        bus,
        WorkflowStage::Completed,
        "Workflow generation complete!",
    );
    bus.publish(EventKind::WorkflowGenerated {
        workflow: workflow.clone(),
        artifact,
    });

    tracing::info!(
        request_id = %request.request_id,
        title = %workflow.title,
        "workflow generated"
    );
    Some(workflow)
}

/// Write the workflow document; a persistence fault is logged, not fatal.
async fn persist(
    artifacts: &ArtifactStore,
    source_text: &str,
    workflow: &Workflow,
) -> Option<std::path::PathBuf> {
    let now = Utc::now();
    let document = json!({
        "generated_at": now.to_rfc3339(),
        "source_text": source_text,
        "workflow": workflow,
    });
    let contents = match serde_json::to_vec_pretty(&document) {
        Ok(contents) => contents,
        Err(e) => {
            tracing::warn!("failed to encode workflow document: {e}");
            return None;
        }
    };
    match artifacts.write(ArtifactKind::Workflow, now, &contents).await {
        Ok(path) => Some(path),
        Err(e) => {
            tracing::warn!("failed to persist workflow: {e}");
            None
        }
    }
}
