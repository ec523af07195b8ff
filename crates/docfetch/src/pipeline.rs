//! Ordered extraction steps run against the loaded document.

use std::io::Write;
use std::path::PathBuf;
use std::str::FromStr;

use serde_json::Value;

use crate::host::DocumentHost;
use crate::types::{FetchError, FetchResult};

/// Bundled readability script: rewrites the document down to its main content.
pub const READABILITY_JS: &str = include_str!("../assets/readability.js");

/// What a step prints after its script ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputGoal {
    /// The script's result.
    Value,
    /// The document's plain text.
    Text,
    /// The document's markup.
    Html,
    /// Nothing; the script runs for its side effects.
    None,
}

impl FromStr for OutputGoal {
    type Err = FetchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" | "value" => Ok(OutputGoal::Value),
            "text" => Ok(OutputGoal::Text),
            "html" => Ok(OutputGoal::Html),
            "none" => Ok(OutputGoal::None),
            other => Err(FetchError::Config(format!(
                "unknown output goal '{other}', expected value, text, html or none"
            ))),
        }
    }
}

/// One unit of the extraction pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineStep {
    /// Evaluate `script` (if any), then emit `goal`.
    Evaluate {
        script: Option<String>,
        goal: OutputGoal,
    },
    /// Render the document, paginated, into a file.
    PrintToFile(PathBuf),
}

impl PipelineStep {
    pub fn script(code: impl Into<String>, goal: OutputGoal) -> Self {
        PipelineStep::Evaluate {
            script: Some(code.into()),
            goal,
        }
    }

    /// Emit `goal` without running any script first.
    pub fn emit(goal: OutputGoal) -> Self {
        PipelineStep::Evaluate { script: None, goal }
    }

    pub fn readability(goal: OutputGoal) -> Self {
        Self::script(READABILITY_JS, goal)
    }

    pub fn print(path: impl Into<PathBuf>) -> Self {
        PipelineStep::PrintToFile(path.into())
    }
}

/// How a pipeline run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineOutcome {
    Completed,
    /// A step had no usable result; it and everything after it were skipped.
    Stopped { step: usize },
}

/// Steps executed in declaration order once the document has loaded.
#[derive(Debug, Clone, Default)]
pub struct ExtractionPipeline {
    steps: Vec<PipelineStep>,
}

impl ExtractionPipeline {
    pub fn new(steps: Vec<PipelineStep>) -> Self {
        Self { steps }
    }

    pub fn steps(&self) -> &[PipelineStep] {
        &self.steps
    }

    /// Run every step against `host`, writing one line per textual goal.
    ///
    /// Host failures end the run early and are only logged; failing to write
    /// the output is an error.
    pub async fn run<H, W>(&self, host: &mut H, out: &mut W) -> FetchResult<PipelineOutcome>
    where
        H: DocumentHost + ?Sized,
        W: Write + ?Sized,
    {
        for (index, step) in self.steps.iter().enumerate() {
            let (script, goal) = match step {
                PipelineStep::PrintToFile(path) => {
                    if let Err(e) = host.print_to_file(path).await {
                        tracing::warn!("print to {} failed: {e}", path.display());
                    }
                    continue;
                }
                PipelineStep::Evaluate { script, goal } => (script.as_deref(), *goal),
            };

            let mut result = None;
            if let Some(code) = script {
                result = evaluate(host, code).await;
                if goal == OutputGoal::None {
                    continue;
                }
                if result.is_none() {
                    tracing::warn!("evaluate: step {} produced no result", index + 1);
                    return Ok(PipelineOutcome::Stopped { step: index });
                }
            }

            let line = match goal {
                OutputGoal::None => continue,
                OutputGoal::Value => match result {
                    Some(value) => marshal(host, value).await,
                    None => {
                        tracing::warn!("evaluate: step {} has no script to take a value from", index + 1);
                        None
                    }
                },
                OutputGoal::Text => host
                    .plain_text()
                    .await
                    .map_err(|e| tracing::warn!("plain text extraction failed: {e}"))
                    .ok(),
                OutputGoal::Html => host
                    .html()
                    .await
                    .map_err(|e| tracing::warn!("html extraction failed: {e}"))
                    .ok(),
            };

            let Some(line) = line else {
                return Ok(PipelineOutcome::Stopped { step: index });
            };
            writeln!(out, "{line}")?;
        }

        out.flush()?;
        Ok(PipelineOutcome::Completed)
    }
}

async fn evaluate<H: DocumentHost + ?Sized>(host: &mut H, code: &str) -> Option<Value> {
    match host.evaluate(code).await {
        Ok(value) => value.filter(|v| !v.is_null()),
        Err(e) => {
            tracing::warn!("evaluate: {e}");
            None
        }
    }
}

/// Textual form of a script result: strings as-is, anything else through the
/// document's own `JSON.stringify`.
async fn marshal<H: DocumentHost + ?Sized>(host: &mut H, value: Value) -> Option<String> {
    if let Value::String(s) = value {
        return Some(s);
    }
    match host.stringify(&value).await {
        Ok(Some(s)) => Some(s),
        Ok(None) => {
            tracing::warn!("evaluate: bad value");
            None
        }
        Err(e) => {
            tracing::warn!("evaluate: bad value: {e}");
            None
        }
    }
}
