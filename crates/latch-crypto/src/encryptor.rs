//! AEAD string transformation and the declarative field walk.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use latch_commons::{Error, ErrorKind, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashSet;

/// Constant the fixed nonce is padded from.
const NONCE_SEED: &[u8] = b"latch nonce";

/// Pad byte for short keys and nonces.
const PAD_BYTE: u8 = 10;

/// Declared set of encrypted field paths.
///
/// Paths are dotted (`"password"`, `"credentials.token"`); arrays are
/// transparent, so `"users.token"` marks `token` inside every element of a
/// `users` array. Every string at or beneath a marked path is transformed.
#[derive(Debug, Clone, Default)]
pub struct EncryptedFields {
    paths: HashSet<String>,
}

impl EncryptedFields {
    pub fn new<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            paths: paths.into_iter().map(Into::into).collect(),
        }
    }

    fn contains(&self, path: &str) -> bool {
        self.paths.contains(path)
    }
}

/// Encrypts and decrypts marked string fields of structured values.
///
/// The fixed nonce makes encryption deterministic: identical plaintexts
/// under the same provider key yield identical ciphertexts, which leaks
/// equality. Acceptable for obfuscating database fields; not a substitute
/// for per-message nonces where confidentiality matters.
pub struct FieldEncryptor {
    cipher: Aes256Gcm,
    nonce: [u8; 12],
}

impl std::fmt::Debug for FieldEncryptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FieldEncryptor")
            .field("nonce", &self.nonce)
            .finish()
    }
}

impl FieldEncryptor {
    /// Creates an encryptor from a key of any length; the key is padded or
    /// truncated to 32 bytes.
    pub(crate) fn create(key: &[u8]) -> Result<Self> {
        let mut padded_key = [PAD_BYTE; 32];
        for (slot, byte) in padded_key.iter_mut().zip(key.iter()) {
            *slot = *byte;
        }
        let mut nonce = [PAD_BYTE; 12];
        for (slot, byte) in nonce.iter_mut().zip(NONCE_SEED.iter()) {
            *slot = *byte;
        }

        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&padded_key));
        Ok(Self { cipher, nonce })
    }

    /// Encrypts a string, returning hex-encoded ciphertext.
    pub fn encrypt_string(&self, message: &str) -> Result<String> {
        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&self.nonce), message.as_bytes())
            .map_err(|e| Error::wrap(ErrorKind::Unknown, format!("encrypt failed: {e}")))?;
        Ok(hex::encode(ciphertext))
    }

    /// Decrypts a hex-encoded ciphertext produced by [`Self::encrypt_string`].
    pub fn decrypt_string(&self, cipher_message: &str) -> Result<String> {
        let bytes = hex::decode(cipher_message)
            .map_err(|e| Error::wrap(ErrorKind::InvalidArgument, format!("bad ciphertext: {e}")))?;
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(&self.nonce), bytes.as_ref())
            .map_err(|e| Error::wrap(ErrorKind::Unknown, format!("decrypt failed: {e}")))?;
        String::from_utf8(plaintext)
            .map_err(|e| Error::wrap(ErrorKind::Unknown, format!("bad plaintext encoding: {e}")))
    }

    /// Encrypts every string at or beneath the marked paths, in place.
    pub fn encrypt_value(&self, value: &mut Value, fields: &EncryptedFields) -> Result<()> {
        self.walk(value, fields, "", false, &|s| self.encrypt_string(s))
    }

    /// Decrypts every string at or beneath the marked paths, in place.
    pub fn decrypt_value(&self, value: &mut Value, fields: &EncryptedFields) -> Result<()> {
        self.walk(value, fields, "", false, &|s| self.decrypt_string(s))
    }

    /// Round-trips a typed value through the walk, encrypting marked
    /// fields.
    pub fn encrypt_object<T>(&self, object: &T, fields: &EncryptedFields) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
    {
        self.process_object(object, fields, &|s| self.encrypt_string(s))
    }

    /// Round-trips a typed value through the walk, decrypting marked
    /// fields.
    pub fn decrypt_object<T>(&self, object: &T, fields: &EncryptedFields) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
    {
        self.process_object(object, fields, &|s| self.decrypt_string(s))
    }

    fn process_object<T>(
        &self,
        object: &T,
        fields: &EncryptedFields,
        oper: &dyn Fn(&str) -> Result<String>,
    ) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
    {
        let mut value = serde_json::to_value(object)
            .map_err(|e| Error::wrap(ErrorKind::InvalidArgument, e.to_string()))?;
        self.walk(&mut value, fields, "", false, oper)?;
        serde_json::from_value(value)
            .map_err(|e| Error::wrap(ErrorKind::Unknown, format!("object reshape failed: {e}")))
    }

    fn walk(
        &self,
        value: &mut Value,
        fields: &EncryptedFields,
        path: &str,
        marked: bool,
        oper: &dyn Fn(&str) -> Result<String>,
    ) -> Result<()> {
        match value {
            Value::String(s) => {
                if marked {
                    *s = oper(s)?;
                }
            }
            Value::Object(map) => {
                for (key, child) in map.iter_mut() {
                    let child_path = if path.is_empty() {
                        key.clone()
                    } else {
                        format!("{path}.{key}")
                    };
                    let child_marked = marked || fields.contains(&child_path);
                    self.walk(child, fields, &child_path, child_marked, oper)?;
                }
            }
            Value::Array(items) => {
                // Arrays are transparent: elements keep the array's path.
                for item in items.iter_mut() {
                    self.walk(item, fields, path, marked, oper)?;
                }
            }
            _ => {}
        }
        Ok(())
    }
}
