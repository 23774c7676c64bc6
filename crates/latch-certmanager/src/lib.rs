//! # latch-certmanager
//!
//! Certificate authority for signing and validating X.509 certificates,
//! with special support for mTLS connections.
//!
//! Applications issue short-lived certificates with embedded metadata
//! (dynamic values) usable for application-level authorization, tenant
//! identification, or context propagation during mTLS handshakes. The
//! dynamic values travel in a custom X.509 extension as JSON wrapped in an
//! ASN.1 OCTET STRING and are decoded back into [`Claims`] during
//! validation.
//!
//! ## Example
//!
//! ```rust,ignore
//! use latch_certmanager::{initialize_certificate_authority, Claims};
//!
//! let ca = initialize_certificate_authority("my-ca", &root_cert_pem, &root_key_pem)?;
//!
//! let mut claims = Claims::default();
//! claims.common_name = Some("client-app".into());
//! claims.dns_names = vec!["client.example.com".into()];
//! claims.dynamic_values = Some(serde_json::json!({
//!     "tenant_id": "acme-corp",
//!     "role": "admin",
//! }).as_object().unwrap().clone());
//!
//! let signed = ca.sign_with_key_pair(&client_key, expiry, &claims)?;
//!
//! // Later, during an mTLS handshake:
//! let details = ca.validate_certificate_pem(signed.pem.as_bytes(), None)?;
//! let tenant = &details.claims.dynamic_values.unwrap()["tenant_id"];
//! ```

pub mod authority;
pub mod registry;

pub use authority::{
    generate_root_authority, CertificateAuthority, CertificateDetails, Claims, KeyUsage,
    SignedCertificate, DEFAULT_DYNAMIC_VALUES_OID,
};
pub use registry::{certificate_authority, initialize_certificate_authority};
