// SPDX-FileCopyrightText: 2026 Nearby Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error types for the nearby proximity engine.

use thiserror::Error;

/// The primary error type shared by every nearby crate.
///
/// Per-item routing outcomes (rate limiting, unauthorized keys, malformed
/// bodies) are not errors at this level; the engine models them as
/// outcomes. This type covers failures that callers cannot absorb.
#[derive(Debug, Error)]
pub enum NearbyError {
    /// Configuration errors (invalid values, missing required keys).
    #[error("configuration error: {0}")]
    Config(String),

    /// Storage backend errors (connection, query failure, migration).
    #[error("storage error: {source}")]
    Storage {
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Routing API errors surfaced outside the engine.
    #[error("routing error: {message}")]
    Routing {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A referenced record does not exist.
    #[error("{kind} not found: {id}")]
    NotFound { kind: String, id: String },

    /// JSON (de)serialization of a stored blob failed.
    #[error("serialization error: {source}")]
    Serialization {
        #[from]
        source: serde_json::Error,
    },

    /// Internal or unexpected errors.
    #[error("internal error: {0}")]
    Internal(String),
}

impl NearbyError {
    /// Shorthand for a `NotFound` error.
    pub fn not_found(kind: &str, id: impl ToString) -> Self {
        Self::NotFound {
            kind: kind.to_string(),
            id: id.to_string(),
        }
    }
}
