//! Certificate authority: signing and validation against a root CA.

use latch_commons::{Error, ErrorKind, Result};
use rcgen::{
    BasicConstraints, CertificateParams, CertificateSigningRequestParams, CustomExtension, DnType,
    Ia5String, IsCa, KeyPair, KeyUsagePurpose, SanType, SerialNumber,
};
use serde_json::{Map, Value};
use std::net::IpAddr;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;
use x509_parser::prelude::{FromDer, GeneralName, X509Certificate};

/// OID of the X.509 extension carrying dynamic claims.
///
/// Structure `1.3.6.1.4.1.98765.1.1`: a private-enterprise arc with a
/// placeholder enterprise number. Replace with a registered enterprise
/// number before production deployment.
pub const DEFAULT_DYNAMIC_VALUES_OID: &[u64] = &[1, 3, 6, 1, 4, 1, 98765, 1, 1];

/// Key usage flags expressible in claims.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyUsage {
    DigitalSignature,
    ContentCommitment,
    KeyEncipherment,
    DataEncipherment,
    KeyAgreement,
    CertSign,
    CrlSign,
}

impl KeyUsage {
    fn to_rcgen(self) -> KeyUsagePurpose {
        match self {
            KeyUsage::DigitalSignature => KeyUsagePurpose::DigitalSignature,
            KeyUsage::ContentCommitment => KeyUsagePurpose::ContentCommitment,
            KeyUsage::KeyEncipherment => KeyUsagePurpose::KeyEncipherment,
            KeyUsage::DataEncipherment => KeyUsagePurpose::DataEncipherment,
            KeyUsage::KeyAgreement => KeyUsagePurpose::KeyAgreement,
            KeyUsage::CertSign => KeyUsagePurpose::KeyCertSign,
            KeyUsage::CrlSign => KeyUsagePurpose::CrlSign,
        }
    }
}

/// Additional fields embedded into a signed certificate.
///
/// Fields left empty are filled from the CSR when signing one.
#[derive(Debug, Clone, Default)]
pub struct Claims {
    pub common_name: Option<String>,
    pub organization: Option<String>,
    pub dns_names: Vec<String>,
    pub ip_addresses: Vec<IpAddr>,
    pub email_addresses: Vec<String>,
    pub key_usages: Vec<KeyUsage>,
    pub is_ca: bool,
    /// Big-endian serial number bytes; random 128-bit when absent.
    pub serial_number: Option<Vec<u8>>,
    pub not_before: Option<OffsetDateTime>,
    /// Arbitrary JSON claims carried in the dynamic-values extension.
    pub dynamic_values: Option<Map<String, Value>>,
}

/// A signed certificate with its PEM encoding.
#[derive(Debug, Clone)]
pub struct SignedCertificate {
    pub pem: String,
    pub der: Vec<u8>,
}

/// Certificate claims and details extracted during validation.
#[derive(Debug, Clone)]
pub struct CertificateDetails {
    pub claims: Claims,
    pub issuer: String,
    pub subject: String,
    pub serial_hex: String,
    pub not_before: OffsetDateTime,
    pub not_after: OffsetDateTime,
}

/// Certificate authority backed by a root certificate and key.
pub struct CertificateAuthority {
    issuer_cert: rcgen::Certificate,
    root_key: KeyPair,
    root_pem: String,
    root_der: Vec<u8>,
    root_not_before: OffsetDateTime,
    root_not_after: OffsetDateTime,
    dynamic_values_oid: Vec<u64>,
}

impl std::fmt::Debug for CertificateAuthority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertificateAuthority")
            .field("root_not_before", &self.root_not_before)
            .field("root_not_after", &self.root_not_after)
            .field("dynamic_values_oid", &self.dynamic_values_oid)
            .finish_non_exhaustive()
    }
}

impl CertificateAuthority {
    /// Creates an authority from PEM-encoded root certificate and key,
    /// using the default dynamic-values OID.
    pub fn from_pem(root_cert_pem: &str, root_key_pem: &str) -> Result<Self> {
        Self::from_pem_with_oid(root_cert_pem, root_key_pem, DEFAULT_DYNAMIC_VALUES_OID)
    }

    /// Creates an authority with a custom dynamic-values extension OID.
    pub fn from_pem_with_oid(
        root_cert_pem: &str,
        root_key_pem: &str,
        dynamic_values_oid: &[u64],
    ) -> Result<Self> {
        let root_key = KeyPair::from_pem(root_key_pem)
            .map_err(|e| Error::wrap(ErrorKind::InvalidArgument, format!("bad root key: {e}")))?;

        let root_der = pem_to_der(root_cert_pem)?;
        let (root_not_before, root_not_after, is_ca, cert_sign_allowed) = {
            let (_, root) = X509Certificate::from_der(&root_der).map_err(|e| {
                Error::wrap(ErrorKind::InvalidArgument, format!("bad root certificate: {e:?}"))
            })?;
            let validity = root.validity();
            let ku_allows = match root.key_usage() {
                Ok(Some(ku)) => ku.value.key_cert_sign(),
                _ => true,
            };
            let is_ca = matches!(root.basic_constraints(), Ok(Some(bc)) if bc.value.ca);
            (
                OffsetDateTime::from_unix_timestamp(validity.not_before.timestamp())
                    .map_err(|e| Error::wrap(ErrorKind::InvalidArgument, e.to_string()))?,
                OffsetDateTime::from_unix_timestamp(validity.not_after.timestamp())
                    .map_err(|e| Error::wrap(ErrorKind::InvalidArgument, e.to_string()))?,
                is_ca,
                ku_allows,
            )
        };
        if !is_ca {
            return Err(Error::wrap(
                ErrorKind::InvalidArgument,
                "root certificate is not a CA certificate",
            ));
        }
        if !cert_sign_allowed {
            return Err(Error::wrap(
                ErrorKind::InvalidArgument,
                "root certificate is not allowed to sign certificates",
            ));
        }

        // Rebuild an issuer handle for rcgen signing; the distinguished
        // name and key are what end-entity signatures depend on.
        let issuer_params = CertificateParams::from_ca_cert_pem(root_cert_pem).map_err(|e| {
            Error::wrap(ErrorKind::InvalidArgument, format!("bad root certificate: {e}"))
        })?;
        let issuer_cert = issuer_params
            .self_signed(&root_key)
            .map_err(|e| Error::wrap(ErrorKind::InvalidArgument, format!("root key mismatch: {e}")))?;

        let authority = Self {
            issuer_cert,
            root_key,
            root_pem: root_cert_pem.to_string(),
            root_der,
            root_not_before,
            root_not_after,
            dynamic_values_oid: dynamic_values_oid.to_vec(),
        };
        authority.verify_key_matches()?;
        Ok(authority)
    }

    /// Proves the supplied key matches the root certificate by signing a
    /// probe certificate and verifying it against the root's public key.
    fn verify_key_matches(&self) -> Result<()> {
        let claims = Claims {
            common_name: Some("key-probe".to_string()),
            ..Claims::default()
        };
        let expiry = OffsetDateTime::now_utc() + Duration::minutes(5);
        let probe_key = KeyPair::generate()
            .map_err(|e| Error::wrap(ErrorKind::Unknown, format!("probe key generation: {e}")))?;
        let probe = self.sign_with_key_pair(&probe_key, expiry, &claims)?;
        self.validate_certificate_pem(&probe.pem, None).map_err(|_| {
            Error::wrap(
                ErrorKind::InvalidArgument,
                "root certificate does not match the provided key",
            )
        })?;
        Ok(())
    }

    /// The PEM of the root certificate backing this authority.
    pub fn root_certificate_pem(&self) -> &str {
        &self.root_pem
    }

    /// Signs a certificate for the subject key pair with the given expiry
    /// and claims.
    ///
    /// The expiry must stay within the root certificate's validity; the
    /// not-before defaults to now and is clamped to the root's not-before.
    pub fn sign_with_key_pair(
        &self,
        subject_key: &KeyPair,
        expiry: OffsetDateTime,
        claims: &Claims,
    ) -> Result<SignedCertificate> {
        let (not_before, not_after) = self.validity_window(claims.not_before, expiry)?;
        let params = self.build_params(claims, not_before, not_after)?;
        let cert = params
            .signed_by(subject_key, &self.issuer_cert, &self.root_key)
            .map_err(|e| Error::wrap(ErrorKind::Unknown, format!("failed to sign certificate: {e}")))?;
        Ok(SignedCertificate {
            pem: cert.pem(),
            der: cert.der().to_vec(),
        })
    }

    /// Signs a PEM-encoded CSR.
    ///
    /// The CSR signature is checked while parsing; claim fields left empty
    /// are filled from the CSR's subject and subject alternative names.
    pub fn sign_csr_pem(
        &self,
        csr_pem: &str,
        expiry: OffsetDateTime,
        claims: &Claims,
    ) -> Result<SignedCertificate> {
        let csr = CertificateSigningRequestParams::from_pem(csr_pem).map_err(|e| {
            Error::wrap(ErrorKind::InvalidArgument, format!("invalid CSR: {e}"))
        })?;

        let (not_before, not_after) = self.validity_window(claims.not_before, expiry)?;
        let mut merged = claims.clone();
        merge_claims_from_params(&mut merged, &csr.params);

        // The CSR keeps its subject public key; only the certificate
        // parameters are rebuilt from the merged claims.
        let mut csr = csr;
        csr.params = self.build_params(&merged, not_before, not_after)?;
        let cert = csr
            .signed_by(&self.issuer_cert, &self.root_key)
            .map_err(|e| Error::wrap(ErrorKind::Unknown, format!("failed to sign CSR: {e}")))?;
        Ok(SignedCertificate {
            pem: cert.pem(),
            der: cert.der().to_vec(),
        })
    }

    /// Validates a PEM-encoded certificate against this authority at the
    /// given instant (now when `None`), returning its claims and details.
    pub fn validate_certificate_pem(
        &self,
        cert_pem: &str,
        at: Option<OffsetDateTime>,
    ) -> Result<CertificateDetails> {
        let der = pem_to_der(cert_pem)?;
        self.validate_certificate_der(&der, at)
    }

    /// Validates a DER-encoded certificate against this authority.
    pub fn validate_certificate_der(
        &self,
        cert_der: &[u8],
        at: Option<OffsetDateTime>,
    ) -> Result<CertificateDetails> {
        let at = at.unwrap_or_else(OffsetDateTime::now_utc);

        let (_, cert) = X509Certificate::from_der(cert_der).map_err(|e| {
            Error::wrap(ErrorKind::InvalidArgument, format!("bad certificate: {e:?}"))
        })?;
        let (_, root) = X509Certificate::from_der(&self.root_der)
            .map_err(|e| Error::wrap(ErrorKind::Unknown, format!("bad root state: {e:?}")))?;

        // Chain check: issued by our root, inside both validity windows.
        if cert.issuer().to_string() != root.subject().to_string() {
            return Err(Error::wrap(
                ErrorKind::InvalidArgument,
                "certificate validation failed: issuer mismatch",
            ));
        }
        cert.verify_signature(Some(root.public_key())).map_err(|e| {
            Error::wrap(
                ErrorKind::InvalidArgument,
                format!("certificate validation failed: {e:?}"),
            )
        })?;

        let not_before = OffsetDateTime::from_unix_timestamp(cert.validity().not_before.timestamp())
            .map_err(|e| Error::wrap(ErrorKind::InvalidArgument, e.to_string()))?;
        let not_after = OffsetDateTime::from_unix_timestamp(cert.validity().not_after.timestamp())
            .map_err(|e| Error::wrap(ErrorKind::InvalidArgument, e.to_string()))?;
        if at < not_before || at > not_after {
            return Err(Error::wrap(
                ErrorKind::InvalidArgument,
                "certificate validation failed: outside validity window",
            ));
        }
        if at < self.root_not_before || at > self.root_not_after {
            return Err(Error::wrap(
                ErrorKind::InvalidArgument,
                "certificate validation failed: root outside validity window",
            ));
        }

        let claims = self.claims_from_certificate(&cert)?;
        Ok(CertificateDetails {
            claims,
            issuer: cert.issuer().to_string(),
            subject: cert.subject().to_string(),
            serial_hex: cert.raw_serial_as_string(),
            not_before,
            not_after,
        })
    }

    fn validity_window(
        &self,
        requested_not_before: Option<OffsetDateTime>,
        expiry: OffsetDateTime,
    ) -> Result<(OffsetDateTime, OffsetDateTime)> {
        let mut not_before = requested_not_before.unwrap_or_else(OffsetDateTime::now_utc);
        if not_before < self.root_not_before {
            not_before = self.root_not_before;
        }
        if expiry > self.root_not_after {
            return Err(Error::wrap(
                ErrorKind::InvalidArgument,
                "expiry time exceeds root certificate validity",
            ));
        }
        if expiry <= not_before {
            return Err(Error::wrap(
                ErrorKind::InvalidArgument,
                "expiry time must be after not-before time",
            ));
        }
        Ok((not_before, expiry))
    }

    fn build_params(
        &self,
        claims: &Claims,
        not_before: OffsetDateTime,
        not_after: OffsetDateTime,
    ) -> Result<CertificateParams> {
        let mut params = CertificateParams::default();
        params.not_before = not_before;
        params.not_after = not_after;

        if let Some(cn) = &claims.common_name {
            params.distinguished_name.push(DnType::CommonName, cn.as_str());
        }
        if let Some(org) = &claims.organization {
            params
                .distinguished_name
                .push(DnType::OrganizationName, org.as_str());
        }

        for dns in &claims.dns_names {
            let name = Ia5String::try_from(dns.clone()).map_err(|e| {
                Error::wrap(ErrorKind::InvalidArgument, format!("bad DNS name {dns}: {e}"))
            })?;
            params.subject_alt_names.push(SanType::DnsName(name));
        }
        for ip in &claims.ip_addresses {
            params.subject_alt_names.push(SanType::IpAddress(*ip));
        }
        for email in &claims.email_addresses {
            let name = Ia5String::try_from(email.clone()).map_err(|e| {
                Error::wrap(ErrorKind::InvalidArgument, format!("bad email {email}: {e}"))
            })?;
            params.subject_alt_names.push(SanType::Rfc822Name(name));
        }

        params.serial_number = Some(match &claims.serial_number {
            Some(bytes) => SerialNumber::from_slice(bytes),
            None => SerialNumber::from_slice(&random_serial()),
        });

        let mut usages: Vec<KeyUsagePurpose> = if claims.key_usages.is_empty() {
            vec![
                KeyUsagePurpose::DigitalSignature,
                KeyUsagePurpose::KeyEncipherment,
            ]
        } else {
            claims.key_usages.iter().map(|u| u.to_rcgen()).collect()
        };
        if claims.is_ca {
            params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
            if !usages.contains(&KeyUsagePurpose::KeyCertSign) {
                usages.push(KeyUsagePurpose::KeyCertSign);
            }
        }
        params.key_usages = usages;

        if let Some(values) = &claims.dynamic_values {
            let encoded = encode_dynamic_values(values)?;
            params
                .custom_extensions
                .push(CustomExtension::from_oid_content(
                    &self.dynamic_values_oid,
                    encoded,
                ));
        }

        Ok(params)
    }

    fn claims_from_certificate(&self, cert: &X509Certificate<'_>) -> Result<Claims> {
        let mut claims = Claims::default();

        for attr in cert.subject().iter_common_name() {
            if let Ok(cn) = attr.as_str() {
                claims.common_name = Some(cn.to_string());
            }
        }
        for attr in cert.subject().iter_organization() {
            if let Ok(org) = attr.as_str() {
                claims.organization = Some(org.to_string());
            }
        }

        if let Ok(Some(san)) = cert.subject_alternative_name() {
            for name in &san.value.general_names {
                match name {
                    GeneralName::DNSName(dns) => claims.dns_names.push(dns.to_string()),
                    GeneralName::RFC822Name(email) => {
                        claims.email_addresses.push(email.to_string())
                    }
                    GeneralName::IPAddress(bytes) => {
                        if let Some(ip) = ip_from_bytes(bytes) {
                            claims.ip_addresses.push(ip);
                        }
                    }
                    _ => {}
                }
            }
        }

        if let Ok(Some(ku)) = cert.key_usage() {
            let flags = &ku.value;
            if flags.digital_signature() {
                claims.key_usages.push(KeyUsage::DigitalSignature);
            }
            if flags.non_repudiation() {
                claims.key_usages.push(KeyUsage::ContentCommitment);
            }
            if flags.key_encipherment() {
                claims.key_usages.push(KeyUsage::KeyEncipherment);
            }
            if flags.data_encipherment() {
                claims.key_usages.push(KeyUsage::DataEncipherment);
            }
            if flags.key_agreement() {
                claims.key_usages.push(KeyUsage::KeyAgreement);
            }
            if flags.key_cert_sign() {
                claims.key_usages.push(KeyUsage::CertSign);
            }
            if flags.crl_sign() {
                claims.key_usages.push(KeyUsage::CrlSign);
            }
        }

        claims.is_ca = matches!(cert.basic_constraints(), Ok(Some(bc)) if bc.value.ca);
        claims.serial_number = Some(cert.raw_serial().to_vec());
        claims.not_before =
            OffsetDateTime::from_unix_timestamp(cert.validity().not_before.timestamp()).ok();

        let oid_string = self
            .dynamic_values_oid
            .iter()
            .map(|n| n.to_string())
            .collect::<Vec<_>>()
            .join(".");
        for ext in cert.extensions() {
            if ext.oid.to_id_string() == oid_string {
                claims.dynamic_values = Some(decode_dynamic_values(ext.value)?);
            }
        }

        Ok(claims)
    }
}

/// Fills claim fields left empty from the CSR's subject and subject
/// alternative names.
fn merge_claims_from_params(claims: &mut Claims, params: &CertificateParams) {
    if claims.common_name.is_none() {
        claims.common_name = dn_value_string(params, DnType::CommonName);
    }
    if claims.organization.is_none() {
        claims.organization = dn_value_string(params, DnType::OrganizationName);
    }
    if claims.dns_names.is_empty()
        && claims.ip_addresses.is_empty()
        && claims.email_addresses.is_empty()
    {
        for san in &params.subject_alt_names {
            match san {
                SanType::DnsName(name) => claims.dns_names.push(name.as_str().to_string()),
                SanType::Rfc822Name(name) => {
                    claims.email_addresses.push(name.as_str().to_string())
                }
                SanType::IpAddress(ip) => claims.ip_addresses.push(*ip),
                _ => {}
            }
        }
    }
}

fn dn_value_string(params: &CertificateParams, dn_type: DnType) -> Option<String> {
    use rcgen::DnValue;
    match params.distinguished_name.get(&dn_type) {
        Some(DnValue::Utf8String(s)) => Some(s.clone()),
        Some(DnValue::PrintableString(s)) => Some(s.as_str().to_string()),
        Some(DnValue::Ia5String(s)) => Some(s.as_str().to_string()),
        _ => None,
    }
}

/// Generates a self-signed root authority, returning PEM-encoded
/// certificate and key. Intended for tests and development bootstraps.
pub fn generate_root_authority(common_name: &str, valid_for: Duration) -> Result<(String, String)> {
    let key = KeyPair::generate()
        .map_err(|e| Error::wrap(ErrorKind::Unknown, format!("key generation failed: {e}")))?;

    let mut params = CertificateParams::default();
    params.distinguished_name.push(DnType::CommonName, common_name);
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params.key_usages = vec![
        KeyUsagePurpose::KeyCertSign,
        KeyUsagePurpose::CrlSign,
        KeyUsagePurpose::DigitalSignature,
    ];
    params.not_before = OffsetDateTime::now_utc() - Duration::hours(1);
    params.not_after = OffsetDateTime::now_utc() + valid_for;
    params.serial_number = Some(SerialNumber::from_slice(&random_serial()));

    let cert = params
        .self_signed(&key)
        .map_err(|e| Error::wrap(ErrorKind::Unknown, format!("self-sign failed: {e}")))?;
    Ok((cert.pem(), key.serialize_pem()))
}

/// 128-bit random serial, positive and non-zero.
fn random_serial() -> [u8; 16] {
    let mut bytes = *Uuid::new_v4().as_bytes();
    bytes[0] &= 0x7f;
    bytes[15] |= 0x01;
    bytes
}

fn encode_dynamic_values(values: &Map<String, Value>) -> Result<Vec<u8>> {
    let payload = serde_json::to_vec(values)
        .map_err(|e| Error::wrap(ErrorKind::InvalidArgument, format!("bad dynamic values: {e}")))?;
    Ok(yasna::construct_der(|writer| writer.write_bytes(&payload)))
}

fn decode_dynamic_values(encoded: &[u8]) -> Result<Map<String, Value>> {
    let payload = yasna::parse_der(encoded, |reader| reader.read_bytes()).map_err(|e| {
        Error::wrap(
            ErrorKind::InvalidArgument,
            format!("bad dynamic values extension: {e}"),
        )
    })?;
    serde_json::from_slice(&payload)
        .map_err(|e| Error::wrap(ErrorKind::InvalidArgument, format!("bad dynamic values: {e}")))
}

fn ip_from_bytes(bytes: &[u8]) -> Option<IpAddr> {
    match bytes.len() {
        4 => {
            let mut v4 = [0u8; 4];
            v4.copy_from_slice(bytes);
            Some(IpAddr::from(v4))
        }
        16 => {
            let mut v6 = [0u8; 16];
            v6.copy_from_slice(bytes);
            Some(IpAddr::from(v6))
        }
        _ => None,
    }
}

fn pem_to_der(pem: &str) -> Result<Vec<u8>> {
    let (_, parsed) = x509_parser::pem::parse_x509_pem(pem.as_bytes())
        .map_err(|e| Error::wrap(ErrorKind::InvalidArgument, format!("invalid PEM: {e:?}")))?;
    if parsed.label != "CERTIFICATE" {
        return Err(Error::wrap(
            ErrorKind::InvalidArgument,
            format!("invalid PEM label {}", parsed.label),
        ));
    }
    Ok(parsed.contents)
}
