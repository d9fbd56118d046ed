//! Error types for the core crate.

use thiserror::Error;

/// Failure to resolve page metadata. Callers log it and keep the previous meta.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ResolveError {
    #[error("invalid url {url:?}: {detail}")]
    InvalidUrl { url: String, detail: String },

    #[error("unknown site: {0}")]
    UnknownSite(String),
}

/// Rejected settings blob.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SettingsError {
    #[error("setting {0} must be greater than zero")]
    ZeroValue(&'static str),

    #[error("setting {0} exceeds one year")]
    TooLarge(&'static str),

    #[error("malformed settings: {0}")]
    Malformed(String),
}

/// A tab id that is zero or negative.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("tab id must be a positive integer, got {0}")]
pub struct InvalidTabId(pub i64);
