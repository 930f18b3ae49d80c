//! Transport-channel construction.
//!
//! Decides once, at channel-build time, whether the channel carries a mutual
//! TLS client certificate. Independent of the retry loop; no backoff
//! semantics apply here.

mod build;
mod mtls;

pub use build::{build_channel, ChannelDescriptor};
pub use mtls::{MtlsEndpointUsage, MtlsKeyStore, MtlsProvider, PemFileMtlsProvider};
