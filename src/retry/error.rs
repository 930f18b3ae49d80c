//! Typed terminal error for resilient calls.
//!
//! One variant per canonical failure code, each carrying the same payload:
//! a message, the raw transport status when known, and the original failure
//! preserved as the error's source so callers can walk to the exact value
//! that the transport produced.

use std::fmt;

use super::status::{Code, StatusCode};

/// Boxed failure as produced by the underlying single-attempt capability.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Uniform payload carried by every [`ApiError`] variant.
#[derive(Debug)]
pub struct ErrorDetails {
    /// Human-readable description; includes the matched structured reason
    /// verbatim when one was recognized.
    pub message: String,
    /// Raw transport status (e.g. HTTP status) when known.
    pub transport_status: Option<u16>,
    /// The original failure, reachable via `Error::source` and downcast.
    pub cause: Option<BoxError>,
}

/// Terminal failure of a resilient call.
///
/// Closed union: callers match on the variant to branch on known failure
/// kinds instead of catching by subclass.
#[derive(Debug)]
pub enum ApiError {
    Cancelled(ErrorDetails),
    Unknown(ErrorDetails),
    InvalidArgument(ErrorDetails),
    DeadlineExceeded(ErrorDetails),
    NotFound(ErrorDetails),
    AlreadyExists(ErrorDetails),
    PermissionDenied(ErrorDetails),
    ResourceExhausted(ErrorDetails),
    FailedPrecondition(ErrorDetails),
    Aborted(ErrorDetails),
    OutOfRange(ErrorDetails),
    Unimplemented(ErrorDetails),
    Internal(ErrorDetails),
    Unavailable(ErrorDetails),
    DataLoss(ErrorDetails),
    Unauthenticated(ErrorDetails),
}

impl ApiError {
    /// Construct the variant matching `status.code`.
    ///
    /// Classification never yields `Ok` for a failure; if it ever did, the
    /// error degrades to the Unknown variant rather than panicking.
    pub fn new(status: StatusCode, message: String, cause: Option<BoxError>) -> ApiError {
        let details = ErrorDetails {
            message,
            transport_status: status.transport,
            cause,
        };
        match status.code {
            Code::Cancelled => ApiError::Cancelled(details),
            Code::Ok | Code::Unknown => ApiError::Unknown(details),
            Code::InvalidArgument => ApiError::InvalidArgument(details),
            Code::DeadlineExceeded => ApiError::DeadlineExceeded(details),
            Code::NotFound => ApiError::NotFound(details),
            Code::AlreadyExists => ApiError::AlreadyExists(details),
            Code::PermissionDenied => ApiError::PermissionDenied(details),
            Code::ResourceExhausted => ApiError::ResourceExhausted(details),
            Code::FailedPrecondition => ApiError::FailedPrecondition(details),
            Code::Aborted => ApiError::Aborted(details),
            Code::OutOfRange => ApiError::OutOfRange(details),
            Code::Unimplemented => ApiError::Unimplemented(details),
            Code::Internal => ApiError::Internal(details),
            Code::Unavailable => ApiError::Unavailable(details),
            Code::DataLoss => ApiError::DataLoss(details),
            Code::Unauthenticated => ApiError::Unauthenticated(details),
        }
    }

    pub fn code(&self) -> Code {
        match self {
            ApiError::Cancelled(_) => Code::Cancelled,
            ApiError::Unknown(_) => Code::Unknown,
            ApiError::InvalidArgument(_) => Code::InvalidArgument,
            ApiError::DeadlineExceeded(_) => Code::DeadlineExceeded,
            ApiError::NotFound(_) => Code::NotFound,
            ApiError::AlreadyExists(_) => Code::AlreadyExists,
            ApiError::PermissionDenied(_) => Code::PermissionDenied,
            ApiError::ResourceExhausted(_) => Code::ResourceExhausted,
            ApiError::FailedPrecondition(_) => Code::FailedPrecondition,
            ApiError::Aborted(_) => Code::Aborted,
            ApiError::OutOfRange(_) => Code::OutOfRange,
            ApiError::Unimplemented(_) => Code::Unimplemented,
            ApiError::Internal(_) => Code::Internal,
            ApiError::Unavailable(_) => Code::Unavailable,
            ApiError::DataLoss(_) => Code::DataLoss,
            ApiError::Unauthenticated(_) => Code::Unauthenticated,
        }
    }

    pub fn details(&self) -> &ErrorDetails {
        match self {
            ApiError::Cancelled(d)
            | ApiError::Unknown(d)
            | ApiError::InvalidArgument(d)
            | ApiError::DeadlineExceeded(d)
            | ApiError::NotFound(d)
            | ApiError::AlreadyExists(d)
            | ApiError::PermissionDenied(d)
            | ApiError::ResourceExhausted(d)
            | ApiError::FailedPrecondition(d)
            | ApiError::Aborted(d)
            | ApiError::OutOfRange(d)
            | ApiError::Unimplemented(d)
            | ApiError::Internal(d)
            | ApiError::Unavailable(d)
            | ApiError::DataLoss(d)
            | ApiError::Unauthenticated(d) => d,
        }
    }

    pub fn message(&self) -> &str {
        &self.details().message
    }

    pub fn transport_status(&self) -> Option<u16> {
        self.details().transport_status
    }

    /// Canonical code plus raw transport status.
    pub fn status(&self) -> StatusCode {
        StatusCode {
            code: self.code(),
            transport: self.transport_status(),
        }
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code().as_str(), self.details().message)
    }
}

impl std::error::Error for ApiError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.details()
            .cause
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}
