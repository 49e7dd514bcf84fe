// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for vendor adapters

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AdapterError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("JSON parsing failed: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("{context}: HTTP {status}")]
    HttpStatus { context: String, status: u16 },

    #[error("authentication failed: {0}")]
    AuthError(String),

    #[error("vendor API error: {0}")]
    ApiError(String),

    #[error("required field missing: {0}")]
    EmptyField(String),
}

pub type Result<T> = std::result::Result<T, AdapterError>;
