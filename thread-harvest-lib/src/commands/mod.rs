//! Command-line interface and orchestration for thread-harvest
//!
//! This module implements the CLI commands and wires the [`crate::harvest`]
//! components together for an end-to-end run.
//!
//! ## Commands
//!
//! - **harvest**: Verify the repository, enumerate its issues and pull requests,
//!   process every thread and write checkpoint files
//! - **init**: Generate a default configuration file
//! - **validate**: Check a configuration file for syntax and value errors
//! - **latest**: Print the most recently written `*_FINAL.csv`
//!
//! ## Execution Flow
//!
//! The `run` function parses command-line arguments using clap and routes
//! to the appropriate command handler. Handlers write user-facing results
//! through a [`Host`], report failures on its error stream and set a non-zero
//! exit status before returning the error.
//!
//! Configuration comes from a TOML file (`harvest.toml` by default) whose values
//! can be overridden on the command line. API tokens come from `--token` or the
//! `GITHUB_TOKEN_1`, `GITHUB_TOKEN_2`, ... environment variables.

mod common;
mod config;
mod harvest;
mod host;
mod init;
mod latest;
mod progress_reporter;
mod run;
mod validate;

#[cfg(debug_assertions)]
pub use config::Config;

pub use common::{ColorMode, LogLevel};
pub use harvest::{HarvestArgs, harvest_repository};
pub use host::Host;
pub use init::{InitArgs, init_config};
pub use latest::{LatestArgs, print_latest};
pub use progress_reporter::ProgressReporter;
pub use run::run;
pub use validate::{ValidateArgs, validate_config};
