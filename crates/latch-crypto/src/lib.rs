//! # latch-crypto
//!
//! Field-level encryption for store-bound documents.
//!
//! A [`FieldEncryptor`] transforms the string fields of a structured value
//! that sit at or beneath declared field paths, leaving everything else
//! untouched. It exists so secret fields can cross a shared store without
//! resorting to a vault round-trip on every transaction.
//!
//! Encrypted fields are declared, not discovered: an [`EncryptedFields`]
//! set lists dotted paths, and the walk recurses through objects and
//! arrays, transforming every string under a marked path.
//!
//! ## Security note
//!
//! The cipher is AES-256-GCM with a *fixed* nonce derived from a constant,
//! so equal plaintexts under one provider key produce equal ciphertexts.
//! This is transport obfuscation for database fields, not IND-CPA
//! confidentiality; see [`FieldEncryptor`].

pub mod encryptor;
pub mod registry;

pub use encryptor::{EncryptedFields, FieldEncryptor};
pub use registry::{initialize_encryptor, object_encryptor};
