//! docfetch command-line tool: argument parsing, configuration and the
//! Chromium document host.

pub mod cli;
pub mod config;
pub mod host;

pub use cli::{Cli, Invocation, StepFlag};
pub use config::{load_config, resolve_chromium_path};
pub use host::ChromiumHost;
