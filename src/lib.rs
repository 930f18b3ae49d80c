//! recall: resiliency layer for RPC clients.
//!
//! Turns a single, possibly-failing remote call into a resilient call with
//! automatic retry, exponential backoff, per-attempt and total deadlines, and
//! canonical failure classification. A separate channel component decides,
//! once per channel construction, whether the transport should carry a
//! mutual-TLS client certificate.

pub mod config;
pub mod logging;

pub mod channel;
pub mod clock;
pub mod retry;
