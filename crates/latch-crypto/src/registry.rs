//! Provider registry for field encryptors.
//!
//! One encryptor per named provider, initialized exactly once per process.
//! Multiple tasks share the registry, so access goes through a read-write
//! lock.

use crate::encryptor::FieldEncryptor;
use latch_commons::{Error, ErrorKind, Result};
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

static ENCRYPTORS: Lazy<RwLock<HashMap<String, Arc<FieldEncryptor>>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

/// Initializes a new encryptor for the given provider.
///
/// Fails *already-exists* when the provider is already initialized and
/// *invalid-argument* on an empty key.
pub fn initialize_encryptor(provider: &str, key: &str) -> Result<Arc<FieldEncryptor>> {
    let mut encryptors = ENCRYPTORS.write();
    if encryptors.contains_key(provider) {
        return Err(Error::wrap(ErrorKind::AlreadyExists, "encryptor already exists"));
    }
    if key.is_empty() {
        return Err(Error::wrap(ErrorKind::InvalidArgument, "invalid key length"));
    }

    let encryptor = Arc::new(FieldEncryptor::create(key.as_bytes())?);
    encryptors.insert(provider.to_string(), encryptor.clone());
    Ok(encryptor)
}

/// Returns the encryptor for the given provider.
///
/// Fails *not-found* when the provider was never initialized.
pub fn object_encryptor(provider: &str) -> Result<Arc<FieldEncryptor>> {
    ENCRYPTORS
        .read()
        .get(provider)
        .cloned()
        .ok_or_else(|| Error::wrap(ErrorKind::NotFound, "encryptor not found"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_lifecycle() {
        let provider = "registry-test-provider";
        assert!(object_encryptor(provider).unwrap_err().is_not_found());

        initialize_encryptor(provider, "k3y").unwrap();
        let err = initialize_encryptor(provider, "other").unwrap_err();
        assert!(err.is_already_exists());

        let enc = object_encryptor(provider).unwrap();
        let cipher = enc.encrypt_string("v").unwrap();
        assert_eq!(enc.decrypt_string(&cipher).unwrap(), "v");
    }

    #[test]
    fn test_empty_key_rejected() {
        let err = initialize_encryptor("empty-key-provider", "").unwrap_err();
        assert!(err.is_invalid_argument());
    }
}
