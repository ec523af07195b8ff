//! Single-fire handling of the document's load-completion event.

use std::io::Write;

use crate::host::DocumentHost;
use crate::pipeline::{ExtractionPipeline, PipelineOutcome};
use crate::types::FetchResult;

/// How the process ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// The document loaded and the pipeline ran.
    Success,
    /// The document itself failed to load.
    FatalLoadFailure,
}

impl Termination {
    pub fn exit_code(self) -> i32 {
        match self {
            Termination::Success => 0,
            Termination::FatalLoadFailure => 1,
        }
    }
}

/// Flips once from pending to fired and never back.
#[derive(Debug, Default)]
pub struct CompletionLatch {
    fired: bool,
}

impl CompletionLatch {
    pub fn is_fired(&self) -> bool {
        self.fired
    }

    /// Fire the latch. Returns `false` if it had already fired.
    pub fn fire(&mut self) -> bool {
        !std::mem::replace(&mut self.fired, true)
    }
}

/// Decides what a load-completion event means and runs the pipeline once.
#[derive(Debug)]
pub struct LoadCoordinator {
    latch: CompletionLatch,
    pipeline: ExtractionPipeline,
    stdin_origin: bool,
}

impl LoadCoordinator {
    /// `stdin_origin` marks loads of locally supplied content, which never
    /// fail fatally on their own.
    pub fn new(pipeline: ExtractionPipeline, stdin_origin: bool) -> Self {
        Self {
            latch: CompletionLatch::default(),
            pipeline,
            stdin_origin,
        }
    }

    pub fn is_fired(&self) -> bool {
        self.latch.is_fired()
    }

    /// Handle one load-completion event.
    ///
    /// Returns `None` while the load should keep going. A failure with
    /// requests still in flight is noise from a sub-resource; a failure with
    /// nothing in flight on a real navigation is fatal. Success fires the
    /// pipeline exactly once; every later event is ignored.
    pub async fn on_load_finished<H, W>(
        &mut self,
        success: bool,
        in_flight: usize,
        host: &mut H,
        out: &mut W,
    ) -> FetchResult<Option<Termination>>
    where
        H: DocumentHost + ?Sized,
        W: Write + ?Sized,
    {
        if self.latch.is_fired() {
            tracing::debug!("load finished again after completion, ignoring");
            return Ok(None);
        }

        if !success {
            tracing::warn!("load finished with an error ({in_flight} request(s) in flight)");
            if in_flight == 0 && !self.stdin_origin {
                self.latch.fire();
                return Ok(Some(Termination::FatalLoadFailure));
            }
            return Ok(None);
        }

        self.latch.fire();
        if let Err(e) = host.set_scripts_enabled(true).await {
            tracing::warn!("could not enable scripts for extraction: {e}");
        }
        match self.pipeline.run(host, out).await? {
            PipelineOutcome::Completed => tracing::debug!("pipeline completed"),
            PipelineOutcome::Stopped { step } => {
                tracing::debug!("pipeline stopped at step {}", step + 1)
            }
        }
        Ok(Some(Termination::Success))
    }
}
