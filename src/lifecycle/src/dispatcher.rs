use cascade::{CascadeError, CascadeOutcome};
use common::event::TriggerEvent;
use derivative::{PipelineError, PipelineReport};
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use crate::Runtime;

#[derive(Debug)]
pub enum DispatchOutcome {
    Derivative(PipelineReport),
    Cascade(CascadeOutcome),
}

impl DispatchOutcome {
    pub fn is_not_applicable(&self) -> bool {
        match self {
            DispatchOutcome::Derivative(report) => report.is_noop(),
            DispatchOutcome::Cascade(outcome) => matches!(outcome, CascadeOutcome::NotApplicable),
        }
    }
}

/// A rejected event run, reported back to the trigger layer.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    #[error(transparent)]
    Cascade(#[from] CascadeError),
}

/// Tally of a batch of dispatched events.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    pub completed: usize,
    pub not_applicable: usize,
    pub failed: usize,
    /// Lines that did not parse as an event.
    pub malformed: usize,
}

/// Routes trigger events to the engine that handles them. Every event is an
/// independent run sharing no mutable state with other runs.
#[derive(Clone)]
pub struct Dispatcher {
    runtime: Arc<Runtime>,
}

impl Dispatcher {
    pub fn new(runtime: Arc<Runtime>) -> Self {
        Self { runtime }
    }

    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    pub async fn dispatch(&self, event: TriggerEvent) -> Result<DispatchOutcome, DispatchError> {
        tracing::debug!(event = %event, "Dispatching event");
        match event {
            TriggerEvent::ObjectFinalized(event) => Ok(DispatchOutcome::Derivative(
                self.runtime.pipeline().on_object_finalized(&event).await?,
            )),
            TriggerEvent::DocumentWritten(event) => Ok(DispatchOutcome::Derivative(
                self.runtime.pipeline().on_document_written(&event).await?,
            )),
            TriggerEvent::DocumentDeleted(event) => Ok(DispatchOutcome::Cascade(
                self.runtime.cascade().on_document_deleted(&event).await?,
            )),
        }
    }

    /// Dispatch newline-delimited JSON events, one spawned run per event, and
    /// wait for all of them.
    pub async fn dispatch_lines<R>(&self, reader: R) -> anyhow::Result<DispatchSummary>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut summary = DispatchSummary::default();
        let mut handles = Vec::new();
        let mut lines = reader.lines();
        let mut line_no = 0;

        while let Some(line) = lines.next_line().await? {
            line_no += 1;
            if line.trim().is_empty() {
                continue;
            }
            let event: TriggerEvent = match serde_json::from_str(&line) {
                Ok(event) => event,
                Err(e) => {
                    tracing::warn!(line = line_no, error = %e, "Skipping malformed event");
                    summary.malformed += 1;
                    continue;
                }
            };

            let dispatcher = self.clone();
            handles.push(tokio::spawn(async move {
                let label = event.to_string();
                let result = dispatcher.dispatch(event).await;
                (label, result)
            }));
        }

        for handle in handles {
            match handle.await {
                Ok((_, Ok(outcome))) if outcome.is_not_applicable() => summary.not_applicable += 1,
                Ok((_, Ok(_))) => summary.completed += 1,
                Ok((event, Err(e))) => {
                    tracing::error!(event = %event, error = %e, "Event run failed");
                    summary.failed += 1;
                }
                Err(e) => {
                    tracing::error!(error = %e, "Event task panicked");
                    summary.failed += 1;
                }
            }
        }

        tracing::info!(
            completed = summary.completed,
            not_applicable = summary.not_applicable,
            failed = summary.failed,
            malformed = summary.malformed,
            "Dispatched events"
        );
        Ok(summary)
    }
}
