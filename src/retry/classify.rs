//! Classify transport failures into canonical status codes.
//!
//! Classification is pure: the same failure value always maps to the same
//! code, which the retry loop relies on for budget correctness.

use std::fmt;

use super::error::{ApiError, BoxError};
use super::status::{Code, StatusCode};

/// A failure reported by an HTTP-backed transport: raw status plus an
/// optional structured reason string extracted from the response body.
#[derive(Debug)]
pub struct HttpError {
    status: u16,
    reason: Option<String>,
    message: String,
}

impl HttpError {
    pub fn new(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            reason: None,
            message: message.into(),
        }
    }

    pub fn with_reason(status: u16, reason: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            reason: Some(reason.into()),
            message: message.into(),
        }
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }
}

impl fmt::Display for HttpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.reason {
            Some(reason) => write!(f, "HTTP {} ({}): {}", self.status, reason, self.message),
            None => write!(f, "HTTP {}: {}", self.status, self.message),
        }
    }
}

impl std::error::Error for HttpError {}

/// Map an arbitrary attempt failure to its canonical status code.
///
/// Order: an already typed `ApiError` keeps its own status; a transport
/// failure with a recognized structured reason uses the reason table; a bare
/// raw status uses the default mapping; anything else is Unknown.
pub fn classify(failure: &BoxError) -> StatusCode {
    if let Some(api) = failure.downcast_ref::<ApiError>() {
        return api.status();
    }
    if let Some(http) = failure.downcast_ref::<HttpError>() {
        if let Some(code) = http.reason().and_then(Code::from_reason) {
            return StatusCode::with_transport(code, http.status());
        }
        return StatusCode::with_transport(Code::from_http_status(http.status()), http.status());
    }
    StatusCode::of(Code::Unknown)
}

/// Classify and wrap a failure, preserving it as the error's cause.
///
/// The message is the failure's own string representation, so a recognized
/// reason appears verbatim and an unclassifiable failure surfaces its display
/// form unmodified. An `ApiError` input passes through unchanged rather than
/// being wrapped a second time.
pub fn into_api_error(failure: BoxError) -> ApiError {
    match failure.downcast::<ApiError>() {
        Ok(api) => *api,
        Err(failure) => {
            let status = classify(&failure);
            let message = failure.to_string();
            ApiError::new(status, message, Some(failure))
        }
    }
}
