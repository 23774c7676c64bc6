//! Provider registry for certificate authorities.

use crate::authority::CertificateAuthority;
use latch_commons::{Error, ErrorKind, Result};
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

static CA_PROVIDERS: Lazy<RwLock<HashMap<String, Arc<CertificateAuthority>>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

/// Initializes a certificate authority provider from root CA PEM data.
///
/// Fails *invalid-argument* on an empty provider name and *already-exists*
/// when the provider was already initialized.
pub fn initialize_certificate_authority(
    provider: &str,
    root_cert_pem: &str,
    root_key_pem: &str,
) -> Result<Arc<CertificateAuthority>> {
    if provider.is_empty() {
        return Err(Error::wrap(ErrorKind::InvalidArgument, "provider is required"));
    }

    let mut providers = CA_PROVIDERS.write();
    if providers.contains_key(provider) {
        return Err(Error::wrap(
            ErrorKind::AlreadyExists,
            "certificate authority provider already exists",
        ));
    }

    let authority = Arc::new(CertificateAuthority::from_pem(root_cert_pem, root_key_pem)?);
    providers.insert(provider.to_string(), authority.clone());
    Ok(authority)
}

/// Returns a previously initialized certificate authority provider.
///
/// Fails *not-found* when the provider was never initialized.
pub fn certificate_authority(provider: &str) -> Result<Arc<CertificateAuthority>> {
    CA_PROVIDERS
        .read()
        .get(provider)
        .cloned()
        .ok_or_else(|| {
            Error::wrap(ErrorKind::NotFound, "certificate authority provider not found")
        })
}
