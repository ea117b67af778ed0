//! gsync - object-graph synchronization between record stores
//!
//! This crate provides the core functionality for the `gsync` CLI tool:
//! comparing, merging and importing typed record graphs (entries, senses,
//! examples, tags) from one store into another.
//!
//! # Architecture
//!
//! - [`cli`] - Command-line interface using clap
//! - [`model`] - Record types, identities and property values
//! - [`storage`] - Store traits and the SQLite backend
//! - [`sync`] - Matching, diffing, resolving, validation, merge and import
//! - [`config`] - Configuration management
//! - [`validate`] - Name normalization and "did you mean" suggestions
//! - [`error`] - Error types and handling

#![forbid(unsafe_code)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cli;
pub mod config;
pub mod error;
pub mod model;
pub mod storage;
pub mod sync;
pub mod validate;

pub use error::{Error, Result};

/// Escape a value for CSV output (wrap in quotes if it contains commas, quotes, or newlines).
#[must_use]
pub fn csv_escape(s: &str) -> String {
    if s.contains(',') || s.contains('"') || s.contains('\n') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::csv_escape;

    #[test]
    fn test_csv_escape() {
        assert_eq!(csv_escape("plain"), "plain");
        assert_eq!(csv_escape("a,b"), "\"a,b\"");
        assert_eq!(csv_escape("say \"hi\""), "\"say \"\"hi\"\"\"");
    }
}
