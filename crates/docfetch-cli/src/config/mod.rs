//! Configuration loading and resolution.

use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use url::Url;

use docfetch::{
    sniff_charset, LoadConfig, LocalContent, Origin, OutputGoal, PipelineStep, STDIN_URL,
};

use crate::cli::{Invocation, StepFlag};

/// Environment variable naming the Chromium binary.
pub const CHROMIUM_PATH_ENV: &str = "DOCFETCH_CHROMIUM_PATH";

const BROWSER_NAMES: [&str; 3] = ["google-chrome", "chromium", "chromium-browser"];

/// Resolve the Chromium binary: explicit path, then environment, then `PATH`.
pub fn resolve_chromium_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }

    if let Ok(env_path) = std::env::var(CHROMIUM_PATH_ENV) {
        let path = PathBuf::from(env_path);
        if path.exists() {
            return Some(path);
        }
        tracing::warn!("{CHROMIUM_PATH_ENV} points at {}, which does not exist", path.display());
    }

    BROWSER_NAMES
        .iter()
        .find_map(|name| which::which(name).ok())
}

/// Build the load configuration, reading `stdin` unless a URL was given.
pub fn load_config(invocation: &Invocation, stdin: &mut dyn Read) -> Result<LoadConfig> {
    let cli = &invocation.cli;

    let origin = match &cli.url {
        Some(url) => Origin::Remote(origin_url(url)?),
        None => {
            let base = origin_url(cli.baseurl.as_deref().unwrap_or(STDIN_URL))?;
            let mut body = Vec::new();
            stdin
                .read_to_end(&mut body)
                .context("failed to read the document from standard input")?;
            tracing::debug!("read {} bytes from standard input", body.len());
            let content = LocalContent::new(body, cli.mime.as_deref(), sniff_charset);
            Origin::Local { base, content }
        }
    };

    Ok(LoadConfig {
        origin,
        policy: invocation.policy,
        steps: pipeline_steps(&invocation.steps)?,
        enable_scripts: cli.enable_js > 0,
    })
}

/// Parse a document URL, giving an empty path the root path `/`.
pub fn origin_url(raw: &str) -> Result<Url> {
    let mut url = Url::parse(raw).with_context(|| format!("invalid URL '{raw}'"))?;
    if url.path().is_empty() {
        url.set_path("/");
    }
    Ok(url)
}

/// Turn pipeline flags into steps, reading script files now.
///
/// Without any pipeline flag the document is reduced by readability and
/// printed as text.
pub fn pipeline_steps(flags: &[StepFlag]) -> Result<Vec<PipelineStep>> {
    if flags.is_empty() {
        return Ok(vec![PipelineStep::readability(OutputGoal::Text)]);
    }

    flags
        .iter()
        .map(|flag| {
            Ok(match flag {
                StepFlag::Script { code, goal } => PipelineStep::script(code.clone(), *goal),
                StepFlag::ScriptFile { path, goal } => {
                    let code = std::fs::read_to_string(path).with_context(|| {
                        format!("failed to read script file {}", path.display())
                    })?;
                    PipelineStep::script(code, *goal)
                }
                StepFlag::Readability(goal) => PipelineStep::readability(*goal),
                StepFlag::Print(path) => PipelineStep::print(path.clone()),
            })
        })
        .collect()
}
