// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for the data layer

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DataError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Redis error: {0}")]
    RedisError(#[from] redis::RedisError),

    #[error("SQL error: {0}")]
    SqlError(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Elasticsearch error: {0}")]
    ElasticError(String),

    #[error("index not acknowledged: {0}")]
    IndexNotAcknowledged(String),

    #[error("SNMP error: {0}")]
    SnmpError(String),

    #[error("connection error: {0}")]
    ConnectionError(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid config: {0}")]
    InvalidConfig(String),
}

pub type Result<T> = std::result::Result<T, DataError>;
