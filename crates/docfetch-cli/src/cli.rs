//! Command-line arguments.
//!
//! Pipeline flags run in the order they were given, across flag kinds, so the
//! derive struct alone is not enough: the order is recovered from clap's
//! argument indices.

use std::any::Any;
use std::ffi::OsString;
use std::path::PathBuf;

use clap::builder::PossibleValuesParser;
use clap::error::ErrorKind;
use clap::{ArgAction, ArgMatches, CommandFactory, FromArgMatches, Parser};

use docfetch::{AccessPolicy, OutputGoal};

#[derive(Parser, Debug)]
#[command(
    name = "docfetch",
    about = "Load one web page headlessly, run scripts against it and print the results",
    version
)]
pub struct Cli {
    /// Load the document from this URL instead of standard input.
    #[arg(long, value_name = "URL", conflicts_with_all = ["baseurl", "mime"])]
    pub url: Option<String>,

    /// Base URL the standard-input document is loaded under.
    #[arg(long, value_name = "URL")]
    pub baseurl: Option<String>,

    /// Content type of the standard-input document.
    #[arg(long, value_name = "MIME")]
    pub mime: Option<String>,

    /// Let the page's own scripts run while it loads.
    #[arg(long, action = ArgAction::Count)]
    pub enable_js: u8,

    /// Grant the page a request capability (repeatable, `none` resets).
    #[arg(
        long,
        value_name = "CAP",
        value_parser = PossibleValuesParser::new(["none", "css", "js", "redirect", "all"])
    )]
    pub allow: Vec<String>,

    /// Same as `--allow none`.
    #[arg(long, num_args = 0..=1, require_equals = true, default_missing_value = "true")]
    pub allow_none: Vec<bool>,

    /// Same as `--allow css`.
    #[arg(long, num_args = 0..=1, require_equals = true, default_missing_value = "true")]
    pub allow_css: Vec<bool>,

    /// Same as `--allow js`.
    #[arg(long, num_args = 0..=1, require_equals = true, default_missing_value = "true")]
    pub allow_js: Vec<bool>,

    /// Same as `--allow redirect`.
    #[arg(long, num_args = 0..=1, require_equals = true, default_missing_value = "true")]
    pub allow_redirect: Vec<bool>,

    /// Same as `--allow all`.
    #[arg(long, num_args = 0..=1, require_equals = true, default_missing_value = "true")]
    pub allow_all: Vec<bool>,

    /// Evaluate CODE and print its value.
    #[arg(long, value_name = "CODE", allow_hyphen_values = true)]
    pub js: Vec<String>,

    /// Evaluate CODE and print its value.
    #[arg(long, value_name = "CODE", allow_hyphen_values = true)]
    pub js_value: Vec<String>,

    /// Evaluate CODE and print nothing.
    #[arg(long, value_name = "CODE", allow_hyphen_values = true)]
    pub js_none: Vec<String>,

    /// Evaluate CODE, then print the document's text.
    #[arg(long, value_name = "CODE", allow_hyphen_values = true)]
    pub js_text: Vec<String>,

    /// Evaluate CODE, then print the document's HTML.
    #[arg(long, value_name = "CODE", allow_hyphen_values = true)]
    pub js_html: Vec<String>,

    /// Evaluate the script in FILE and print its value.
    #[arg(long, value_name = "FILE")]
    pub js_file: Vec<PathBuf>,

    /// Evaluate the script in FILE and print its value.
    #[arg(long, value_name = "FILE")]
    pub js_file_value: Vec<PathBuf>,

    /// Evaluate the script in FILE and print nothing.
    #[arg(long, value_name = "FILE")]
    pub js_file_none: Vec<PathBuf>,

    /// Evaluate the script in FILE, then print the document's text.
    #[arg(long, value_name = "FILE")]
    pub js_file_text: Vec<PathBuf>,

    /// Evaluate the script in FILE, then print the document's HTML.
    #[arg(long, value_name = "FILE")]
    pub js_file_html: Vec<PathBuf>,

    /// Reduce the page to its main content and print it as text.
    #[arg(long, num_args = 0..=1, require_equals = true, default_missing_value = "true")]
    pub readability: Vec<bool>,

    /// Reduce the page to its main content and print it as HTML.
    #[arg(long, num_args = 0..=1, require_equals = true, default_missing_value = "true")]
    pub readability_html: Vec<bool>,

    /// Render the page into a PDF file.
    #[arg(long, value_name = "FILE")]
    pub print: Vec<PathBuf>,

    /// Chromium binary to drive.
    #[arg(long, value_name = "PATH")]
    pub chromium: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "warn")]
    pub log_level: String,
}

/// A pipeline flag as given on the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepFlag {
    Script { code: String, goal: OutputGoal },
    ScriptFile { path: PathBuf, goal: OutputGoal },
    Readability(OutputGoal),
    Print(PathBuf),
}

const SCRIPT_FLAGS: [(&str, OutputGoal); 5] = [
    ("js", OutputGoal::Value),
    ("js_value", OutputGoal::Value),
    ("js_none", OutputGoal::None),
    ("js_text", OutputGoal::Text),
    ("js_html", OutputGoal::Html),
];

const SCRIPT_FILE_FLAGS: [(&str, OutputGoal); 5] = [
    ("js_file", OutputGoal::Value),
    ("js_file_value", OutputGoal::Value),
    ("js_file_none", OutputGoal::None),
    ("js_file_text", OutputGoal::Text),
    ("js_file_html", OutputGoal::Html),
];

const READABILITY_FLAGS: [(&str, OutputGoal); 2] = [
    ("readability", OutputGoal::Text),
    ("readability_html", OutputGoal::Html),
];

const POLICY_FLAGS: [(&str, AccessPolicy); 5] = [
    ("allow_none", AccessPolicy::NONE),
    ("allow_css", AccessPolicy::CSS),
    ("allow_js", AccessPolicy::JS),
    ("allow_redirect", AccessPolicy::REDIRECT),
    ("allow_all", AccessPolicy::ALL),
];

/// Parsed command line plus what only the argument order can tell.
#[derive(Debug)]
pub struct Invocation {
    pub cli: Cli,
    pub policy: AccessPolicy,
    pub steps: Vec<StepFlag>,
}

impl Invocation {
    pub fn parse_from<I, T>(args: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        let matches = Cli::command().try_get_matches_from(args)?;
        let cli = Cli::from_arg_matches(&matches)?;
        let policy = access_policy(&matches)?;
        let steps = ordered_steps(&matches);
        Ok(Self { cli, policy, steps })
    }
}

/// Fold `--allow` values and their aliases in command-line order.
fn access_policy(matches: &ArgMatches) -> Result<AccessPolicy, clap::Error> {
    let mut grants = Vec::new();
    for (index, name) in indexed_values::<String>(matches, "allow") {
        let policy: AccessPolicy = name
            .parse()
            .map_err(|e| clap::Error::raw(ErrorKind::InvalidValue, format!("{e}\n")))?;
        grants.push((index, policy));
    }
    for (id, policy) in POLICY_FLAGS {
        for index in switch_indices(matches, id) {
            grants.push((index, policy));
        }
    }
    grants.sort_by_key(|(index, _)| *index);

    Ok(grants
        .into_iter()
        .fold(AccessPolicy::NONE, |acc, (_, grant)| {
            if grant == AccessPolicy::NONE {
                AccessPolicy::NONE
            } else {
                acc | grant
            }
        }))
}

/// Every pipeline flag, in the order it appeared.
fn ordered_steps(matches: &ArgMatches) -> Vec<StepFlag> {
    let mut steps = Vec::new();
    for (id, goal) in SCRIPT_FLAGS {
        for (index, code) in indexed_values::<String>(matches, id) {
            steps.push((index, StepFlag::Script { code, goal }));
        }
    }
    for (id, goal) in SCRIPT_FILE_FLAGS {
        for (index, path) in indexed_values::<PathBuf>(matches, id) {
            steps.push((index, StepFlag::ScriptFile { path, goal }));
        }
    }
    for (id, goal) in READABILITY_FLAGS {
        for index in switch_indices(matches, id) {
            steps.push((index, StepFlag::Readability(goal)));
        }
    }
    for (index, path) in indexed_values::<PathBuf>(matches, "print") {
        steps.push((index, StepFlag::Print(path)));
    }
    steps.sort_by_key(|(index, _)| *index);
    steps.into_iter().map(|(_, step)| step).collect()
}

fn indexed_values<T>(matches: &ArgMatches, id: &str) -> Vec<(usize, T)>
where
    T: Any + Clone + Send + Sync + 'static,
{
    match (matches.indices_of(id), matches.get_many::<T>(id)) {
        (Some(indices), Some(values)) => indices.zip(values.cloned()).collect(),
        _ => Vec::new(),
    }
}

/// Positions of every occurrence of a repeatable switch.
///
/// Switches are optional-value boolean args so that each occurrence keeps its
/// own index; `--allow-css=false` is accepted and ignored.
fn switch_indices(matches: &ArgMatches, id: &str) -> Vec<usize> {
    indexed_values::<bool>(matches, id)
        .into_iter()
        .filter_map(|(index, on)| on.then_some(index))
        .collect()
}
