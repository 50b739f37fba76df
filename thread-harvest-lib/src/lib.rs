#![doc(hidden)]
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

//! Core library for thread-harvest
//!
//! This library consolidates all functionality for the thread-harvest tool, which collects
//! issue and pull request discussion threads from the GitHub REST API and writes them out
//! as flat CSV checkpoint tables.
//!
//! # Module Organization
//!
//! - [`commands`]: Command-line interface and orchestration
//! - [`harvest`]: Credential rotation, request execution, pagination, thread processing
//!   and checkpointing

pub type Result<T, E = ohno::AppError> = core::result::Result<T, E>;

#[cfg(any(debug_assertions, test))]
pub mod commands;
#[cfg(not(any(debug_assertions, test)))]
mod commands;

pub mod harvest;

pub use crate::commands::{Host, run};
