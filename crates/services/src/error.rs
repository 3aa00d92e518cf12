//! Shared error types for the services crate.

use reqwest::StatusCode;
use thiserror::Error;

use storage::StorageError;
use studypact_core::model::IdentityError;

/// Errors emitted by `ApiClient`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ApiError {
    #[error("request failed with status {0}")]
    HttpStatus(StatusCode),
    #[error("bearer token rejected by the server")]
    Unauthorized,
    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

impl ApiError {
    /// True for failures a read-type query may retry once.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            ApiError::Http(e) => e.is_timeout() || e.is_connect(),
            ApiError::HttpStatus(code) => code.is_server_error(),
            ApiError::Unauthorized => false,
        }
    }
}

/// Errors emitted by `AuthSession`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AuthError {
    #[error(transparent)]
    Identity(#[from] IdentityError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Errors emitted by `BookService`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum BookServiceError {
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Errors emitted by session services.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SessionError {
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}
