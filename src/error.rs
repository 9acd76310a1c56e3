//! Error types for the analysis pipeline
//!
//! Collaborator failures are classified as transient (worth retrying) or
//! permanent (never retried). The fusion engine only fails outright when every
//! model has failed.

use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::engine::AdapterKind;

/// Retryability class of a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorClass {
    Transient,
    Permanent,
}

impl ErrorClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorClass::Transient => "transient",
            ErrorClass::Permanent => "permanent",
        }
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure surfaced by a model adapter or by the loader while initializing one
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AdapterError {
    /// Connection refused, reset, DNS failure, ...
    #[error("network failure: {0}")]
    Network(String),

    #[error("timed out: {0}")]
    Timeout(String),

    /// Weights missing or runtime could not load the model
    #[error("model load failed: {0}")]
    ModelLoad(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("adapter not initialized")]
    NotInitialized,

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("malformed input: {0}")]
    MalformedInput(String),

    #[error("internal adapter error: {0}")]
    Internal(String),
}

impl AdapterError {
    /// Classify this error for retry decisions
    pub fn class(&self) -> ErrorClass {
        match self {
            AdapterError::Network(_)
            | AdapterError::Timeout(_)
            | AdapterError::ModelLoad(_)
            | AdapterError::RateLimited(_)
            | AdapterError::NotInitialized => ErrorClass::Transient,
            AdapterError::Unauthorized(_)
            | AdapterError::MalformedInput(_)
            | AdapterError::Internal(_) => ErrorClass::Permanent,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.class() == ErrorClass::Transient
    }
}

/// Failure of a pixel-level or advanced detector.
/// Never fatal: the engine falls back to model-only estimates.
#[derive(Error, Debug, Clone)]
pub enum DetectorError {
    #[error("{detector} detector failed: {reason}")]
    Failed { detector: &'static str, reason: String },

    #[error("detector task aborted: {0}")]
    Aborted(String),
}

/// A model whose retried call ultimately failed
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelFailure {
    pub kind: AdapterKind,
    pub class: ErrorClass,
    pub attempts: u32,
    pub error: String,
}

impl ModelFailure {
    pub fn new(kind: AdapterKind, error: &AdapterError, attempts: u32) -> Self {
        Self {
            kind,
            class: error.class(),
            attempts,
            error: error.to_string(),
        }
    }
}

impl fmt::Display for ModelFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}, {} attempt{}): {}",
            self.kind.as_str(),
            self.class,
            self.attempts,
            if self.attempts == 1 { "" } else { "s" },
            self.error
        )
    }
}

/// Errors returned by the fusion engine
#[derive(Error, Debug)]
pub enum FusionError {
    #[error("invalid image: {0}")]
    InvalidImage(String),

    #[error("all models failed: {}", join_failures(.failures))]
    AllModelsFailed { failures: Vec<ModelFailure> },

    #[error("blocking task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

fn join_failures(failures: &[ModelFailure]) -> String {
    failures
        .iter()
        .map(|f| f.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Convenience Result type for the fusion engine
pub type Result<T> = std::result::Result<T, FusionError>;
