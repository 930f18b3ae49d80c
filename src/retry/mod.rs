//! Retrying call executor and failure classification.
//!
//! This module encapsulates canonical error classification (status codes,
//! structured reason strings) and the exponential backoff / deadline state
//! machine, so every call site shares a consistent resiliency policy.

mod call;
mod classify;
mod error;
mod settings;
mod status;

pub use call::{CallContext, RetryingCall, UnaryCall};
pub use classify::{classify, into_api_error, HttpError};
pub use error::{ApiError, BoxError, ErrorDetails};
pub use settings::{RetrySettings, RetrySettingsBuilder, SettingsError};
pub use status::{Code, StatusCode};
