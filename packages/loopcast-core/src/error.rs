//! Centralized error types for the Loopcast core library.
//!
//! This module provides a unified error handling system that:
//! - Gives every module error a machine-readable code via [`ErrorCode`]
//! - Maps errors to HTTP status codes
//! - Implements `IntoResponse` for JSON error responses

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

use crate::capture::CaptureError;
use crate::stream::{
    BufferError, FormatError, MetadataError, MultiplexerError, TransformError,
};

/// Trait for error types that provide machine-readable error codes.
pub trait ErrorCode {
    /// Returns a machine-readable error code for API responses.
    fn code(&self) -> &'static str;
}

impl ErrorCode for BufferError {
    fn code(&self) -> &'static str {
        match self {
            Self::CapacityExceeded { .. } => "capacity_exceeded",
            Self::Transform(e) => e.code(),
        }
    }
}

impl ErrorCode for TransformError {
    fn code(&self) -> &'static str {
        match self {
            Self::InvalidChunkLength { .. } => "invalid_chunk_length",
        }
    }
}

impl ErrorCode for MetadataError {
    fn code(&self) -> &'static str {
        match self {
            Self::TitleTooLong { .. } => "title_too_long",
        }
    }
}

impl ErrorCode for FormatError {
    fn code(&self) -> &'static str {
        match self {
            Self::UnknownFormat(_) => "unknown_format",
        }
    }
}

impl ErrorCode for CaptureError {
    fn code(&self) -> &'static str {
        match self {
            Self::UnknownDevice(_) => "unknown_device",
            Self::NoDevices => "no_devices",
            Self::UnsupportedFormat(_) => "unsupported_format",
            Self::StartFailed(_) => "capture_start_failed",
            Self::DeviceLost(_) => "device_lost",
        }
    }
}

/// Application-wide error type.
#[derive(Debug, Error)]
pub enum LoopcastError {
    #[error(transparent)]
    Format(#[from] FormatError),

    #[error(transparent)]
    Capture(#[from] CaptureError),

    #[error(transparent)]
    Buffer(#[from] BufferError),

    #[error(transparent)]
    Metadata(#[from] MetadataError),

    /// Client sent an invalid or malformed request.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Too many concurrent consumers.
    #[error("Session limit reached: {0}")]
    TooManySessions(usize),

    /// Configuration rejected at startup.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Internal server error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl LoopcastError {
    /// Returns a machine-readable error code for API responses.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Format(e) => e.code(),
            Self::Capture(e) => e.code(),
            Self::Buffer(e) => e.code(),
            Self::Metadata(e) => e.code(),
            Self::InvalidRequest(_) => "invalid_request",
            Self::TooManySessions(_) => "too_many_sessions",
            Self::Configuration(_) => "configuration_error",
            Self::Internal(_) => "internal_error",
        }
    }

    /// Maps the error to an appropriate HTTP status code.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Format(_) | Self::Metadata(_) | Self::InvalidRequest(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::Capture(CaptureError::UnknownDevice(_)) => StatusCode::NOT_FOUND,
            Self::Capture(_) | Self::TooManySessions(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Buffer(_) | Self::Configuration(_) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<MultiplexerError> for LoopcastError {
    fn from(err: MultiplexerError) -> Self {
        match err {
            MultiplexerError::Capture(e) => Self::Capture(e),
            MultiplexerError::Buffer(e) => Self::Buffer(e),
        }
    }
}

/// Convenient Result alias for application-wide operations.
pub type LoopcastResult<T> = Result<T, LoopcastError>;

/// JSON response body for error responses.
#[derive(Serialize)]
struct ErrorResponse {
    error: &'static str,
    message: String,
    status: u16,
}

impl IntoResponse for LoopcastError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            error: self.code(),
            message: self.to_string(),
            status: status.as_u16(),
        };
        (status, Json(body)).into_response()
    }
}
