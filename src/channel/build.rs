//! Channel construction decision: plain vs client-certificate-bound.

use std::io;

use super::mtls::{MtlsEndpointUsage, MtlsKeyStore, MtlsProvider};

/// Everything the transport needs to open a connection: the target endpoint
/// and, when mutual TLS is active, the client identity. The channel is mTLS
/// if and only if the identity is present.
#[derive(Debug)]
pub struct ChannelDescriptor {
    endpoint: String,
    mtls_identity: Option<MtlsKeyStore>,
}

impl ChannelDescriptor {
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn mtls_identity(&self) -> Option<&MtlsKeyStore> {
        self.mtls_identity.as_ref()
    }

    pub fn is_mtls(&self) -> bool {
        self.mtls_identity.is_some()
    }
}

/// Decide, once per channel construction, whether the channel carries a
/// client certificate.
///
/// The certificate is attached iff the provider asks for one and a key store
/// is actually available; a key-store I/O failure propagates unchanged. The
/// endpoint-usage policy only selects which endpoint string is targeted.
pub fn build_channel(provider: &dyn MtlsProvider) -> io::Result<ChannelDescriptor> {
    let mtls_identity = if provider.use_client_certificate() {
        provider.key_store()?
    } else {
        None
    };

    let endpoint = match provider.endpoint_usage() {
        MtlsEndpointUsage::Always => provider.mtls_endpoint(),
        MtlsEndpointUsage::Auto if mtls_identity.is_some() => provider.mtls_endpoint(),
        _ => provider.endpoint(),
    };

    tracing::debug!(
        endpoint,
        mtls = mtls_identity.is_some(),
        "constructed channel descriptor"
    );

    Ok(ChannelDescriptor {
        endpoint: endpoint.to_string(),
        mtls_identity,
    })
}
