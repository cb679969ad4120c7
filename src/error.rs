//! # Error Handling
//!
//! This module defines the centralized error type for `modforge`. It uses the
//! `thiserror` library to create one `Error` enum covering every failure a
//! build cycle can run into, each variant carrying enough context (command,
//! arguments, captured output, remote, tag) to be logged on its own.
//!
//! The taxonomy follows how failures are treated by a cycle:
//!
//! - **Configuration errors** (`ConfigParse`, `ConfigInvalid`) are detected
//!   when the configuration is loaded and skip the cycle entirely.
//! - **Transient errors** (`Command`, `Network`, `Mirror`, `Io`) fail the unit
//!   that hit them and, transitively, the whole cycle.
//! - **Data errors** (`Archive`) are fatal to the unit. Unparseable version
//!   tags never become errors; they are logged and skipped.
//! - **`Batch`** is what an aggregation point returns when one or more of its
//!   concurrent units failed. The individual failures have already been logged
//!   by then.

use thiserror::Error;

/// Main error type for modforge operations
#[derive(Error, Debug)]
pub enum Error {
    /// The configuration file could not be read as YAML.
    #[error("Configuration parsing error: {message}{}", hint.as_ref().map(|h| format!("\n  hint: {}", h)).unwrap_or_default())]
    ConfigParse {
        message: String,
        /// Optional hint for how to fix the configuration issue
        hint: Option<String>,
    },

    /// The configuration parsed but failed validation.
    ///
    /// All problems are collected so the operator can fix them in one go.
    #[error("Invalid configuration:\n  - {}", problems.join("\n  - "))]
    ConfigInvalid { problems: Vec<String> },

    /// An external command could not be spawned or exited unsuccessfully.
    #[error("Command failed in {dir}: {exe} {} - {message}", args.join(" "))]
    Command {
        exe: String,
        args: Vec<String>,
        dir: String,
        message: String,
        stdout: String,
        stderr: String,
    },

    /// The remote listing API could not be queried.
    #[error("Network operation error: {url} - {message}")]
    Network { url: String, message: String },

    /// `git archive` produced a stream that could not be read.
    #[error("Bad archive stream for {remote}@{tag}: {message}")]
    Archive {
        remote: String,
        tag: String,
        message: String,
    },

    /// A mirror directory could not be created, inspected or moved into place.
    #[error("Mirror operation error at {path}: {message}")]
    Mirror { path: String, message: String },

    /// One or more concurrent units of a stage failed.
    #[error("{failed} of {total} {stage} failed")]
    Batch {
        stage: &'static str,
        failed: usize,
        total: usize,
    },

    /// An I/O error, wrapped from `std::io::Error`.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A YAML parsing error, wrapped from `serde_yaml::Error`.
    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// A regular expression error, wrapped from `regex::Error`.
    #[error("Regex error: {0}")]
    Regex(#[from] regex::Error),

    /// An HTTP client error, wrapped from `reqwest::Error`.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// A URL parsing error, wrapped from `url::ParseError`.
    #[error("URL parsing error: {0}")]
    UrlParse(#[from] url::ParseError),
}

/// A convenient type alias for `Result<T, Error>`.
pub type Result<T> = std::result::Result<T, Error>;
