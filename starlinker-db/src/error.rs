use diesel::r2d2::PoolError;
use diesel::result::Error as DieselError;
use diesel::ConnectionError;
use miette::Diagnostic;
use serde::Serialize;
use thiserror::Error;

/// One field-level validation failure, e.g. from `StarlinkerConfig::validate`.
#[derive(Debug, Clone, Serialize)]
pub struct FieldError {
    pub path: String,
    pub message: String,
}

#[derive(Debug, Error, Diagnostic)]
pub enum StoreError {
    #[error("couldn't connect to database")]
    Connect(#[source] ConnectionError),

    #[error("couldn't check out a pooled connection")]
    Pool(#[source] PoolError),

    #[error("query failed")]
    Query(#[source] DieselError),

    #[error("stored value failed to (de)serialize: {0}")]
    Serde(#[source] serde_json::Error),

    #[error("timestamp '{0}' is not valid RFC 3339")]
    BadTimestamp(String),

    #[error("error running migrations")]
    Migration(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("invalid configuration: {0:?}")]
    Validation(Vec<FieldError>),
}

impl From<DieselError> for StoreError {
    fn from(e: DieselError) -> Self {
        StoreError::Query(e)
    }
}

impl From<PoolError> for StoreError {
    fn from(e: PoolError) -> Self {
        StoreError::Pool(e)
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serde(e)
    }
}
