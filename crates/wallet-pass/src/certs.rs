use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use der::asn1::{Ia5StringRef, PrintableStringRef, Utf8StringRef};
use der::{Any, Decode, Encode};
use pkcs8::{DecodePrivateKey, DecodePublicKey};
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::{RsaPrivateKey, RsaPublicKey};
use sha2::{Digest, Sha256};
use ::time::OffsetDateTime;
use tracing::{info, warn};
use x509_cert::Certificate;
use x509_cert::name::Name;
use x509_parser::pem::parse_x509_pem;
use x509_parser::prelude::*;

use crate::error::{PassError, Result};
use crate::pem;

const OID_COMMON_NAME: &str = "2.5.4.3";
const OID_ORGANIZATIONAL_UNIT: &str = "2.5.4.11";
const OID_RSA_ENCRYPTION: &str = "1.2.840.113549.1.1.1";
const OID_EC_PUBLIC_KEY: &str = "1.2.840.10045.2.1";

const WWDR_AUTHORITY: &str = "Worldwide Developer Relations";
const WWDR_GENERATION: &str = "G4";
const WWDR_EXPECTED_EXPIRY_YEAR: i32 = 2030;
const WWDR_REMEDIATION: &str = "download the G4 WWDR certificate from https://www.apple.com/certificateauthority/";

pub const SIGNER_CERT_NAME: &str = "signer certificate";
pub const SIGNER_KEY_NAME: &str = "signer private key";
pub const WWDR_CERT_NAME: &str = "WWDR certificate";

/// The three PEM secrets needed to sign a pass, as supplied by configuration.
#[derive(Clone)]
pub struct CertificateBundle {
    pub signer_cert: String,
    pub signer_key: String,
    pub wwdr_cert: String,
}

impl std::fmt::Debug for CertificateBundle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertificateBundle")
            .field("signer_cert", &self.signer_cert.len())
            .field("signer_key", &"<redacted>")
            .field("wwdr_cert", &self.wwdr_cert.len())
            .finish()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeyAlgorithm {
    Rsa,
    EllipticCurve,
    Other,
}

impl KeyAlgorithm {
    fn from_oid(oid: &str) -> Self {
        match oid {
            OID_RSA_ENCRYPTION => KeyAlgorithm::Rsa,
            OID_EC_PUBLIC_KEY => KeyAlgorithm::EllipticCurve,
            _ => KeyAlgorithm::Other,
        }
    }
}

/// Owned summary of a certificate, independent of the parser that read it.
#[derive(Clone, Debug)]
pub struct CertificateInfo {
    pub der: Vec<u8>,
    pub common_names: Vec<String>,
    pub organizational_units: Vec<String>,
    pub subject: String,
    pub subject_der: Vec<u8>,
    pub issuer_der: Vec<u8>,
    pub serial_hex: String,
    pub not_before: OffsetDateTime,
    pub not_after: OffsetDateTime,
    pub key_algorithm: KeyAlgorithm,
    pub public_key_der: Vec<u8>,
}

impl CertificateInfo {
    pub fn common_name(&self) -> Option<&str> {
        self.common_names.first().map(String::as_str)
    }

    pub fn fingerprint_sha256(&self) -> String {
        hex::encode(Sha256::digest(&self.der))
    }

    pub fn is_valid_at(&self, instant: OffsetDateTime) -> bool {
        self.not_before <= instant && instant <= self.not_after
    }
}

/// Outcome of the two-stage certificate parse.
#[derive(Debug)]
pub enum CertificateParse {
    /// Read by the strict PEM parser.
    Parsed(CertificateInfo),
    /// Strict parse failed; the manual armour strip and DER decode succeeded.
    FallbackParsed(CertificateInfo),
    Failed { primary: String, fallback: String },
}

impl CertificateParse {
    pub fn into_result(self, name: &str) -> Result<CertificateInfo> {
        match self {
            CertificateParse::Parsed(info) => Ok(info),
            CertificateParse::FallbackParsed(info) => {
                info!(certificate = name, "certificate parsed via DER fallback");
                Ok(info)
            }
            CertificateParse::Failed { primary, fallback } => Err(PassError::CertParse {
                name: name.to_string(),
                primary,
                fallback,
            }),
        }
    }
}

/// Parses a normalized PEM certificate, falling back to a manual DER decode.
pub fn parse_certificate(pem: &str) -> CertificateParse {
    let primary = match parse_primary(pem) {
        Ok(info) => return CertificateParse::Parsed(info),
        Err(err) => err,
    };
    match parse_fallback(pem) {
        Ok(info) => CertificateParse::FallbackParsed(info),
        Err(fallback) => CertificateParse::Failed { primary, fallback },
    }
}

fn parse_primary(pem: &str) -> std::result::Result<CertificateInfo, String> {
    let (_, pem) = parse_x509_pem(pem.as_bytes()).map_err(|err| format!("invalid PEM: {err}"))?;
    let (_, cert) = X509Certificate::from_der(&pem.contents)
        .map_err(|err| format!("invalid certificate: {err}"))?;

    let subject = cert.subject();
    let spki = cert.public_key();
    Ok(CertificateInfo {
        der: pem.contents.clone(),
        common_names: subject
            .iter_common_name()
            .flat_map(|attr| attr.as_str())
            .map(str::to_string)
            .collect(),
        organizational_units: subject
            .iter_organizational_unit()
            .flat_map(|attr| attr.as_str())
            .map(str::to_string)
            .collect(),
        subject: subject.to_string(),
        subject_der: subject.as_raw().to_vec(),
        issuer_der: cert.issuer().as_raw().to_vec(),
        serial_hex: hex::encode(cert.raw_serial()),
        not_before: cert.validity().not_before.to_datetime(),
        not_after: cert.validity().not_after.to_datetime(),
        key_algorithm: KeyAlgorithm::from_oid(&spki.algorithm.algorithm.to_id_string()),
        public_key_der: spki.raw.to_vec(),
    })
}

fn parse_fallback(pem_text: &str) -> std::result::Result<CertificateInfo, String> {
    let der = STANDARD
        .decode(pem::body(pem_text))
        .map_err(|err| format!("invalid base64: {err}"))?;
    let cert = Certificate::from_der(&der).map_err(|err| format!("invalid ASN.1: {err}"))?;

    let tbs = &cert.tbs_certificate;
    let spki = &tbs.subject_public_key_info;
    Ok(CertificateInfo {
        common_names: name_attributes(&tbs.subject, OID_COMMON_NAME),
        organizational_units: name_attributes(&tbs.subject, OID_ORGANIZATIONAL_UNIT),
        subject: tbs.subject.to_string(),
        subject_der: encode_der(&tbs.subject)?,
        issuer_der: encode_der(&tbs.issuer)?,
        serial_hex: hex::encode(tbs.serial_number.as_bytes()),
        not_before: unix_instant(tbs.validity.not_before.to_unix_duration())?,
        not_after: unix_instant(tbs.validity.not_after.to_unix_duration())?,
        key_algorithm: KeyAlgorithm::from_oid(&spki.algorithm.oid.to_string()),
        public_key_der: encode_der(spki)?,
        der,
    })
}

fn encode_der<T: Encode>(value: &T) -> std::result::Result<Vec<u8>, String> {
    value.to_der().map_err(|err| format!("re-encode: {err}"))
}

fn unix_instant(since_epoch: std::time::Duration) -> std::result::Result<OffsetDateTime, String> {
    let secs = i64::try_from(since_epoch.as_secs()).map_err(|err| err.to_string())?;
    OffsetDateTime::from_unix_timestamp(secs).map_err(|err| err.to_string())
}

fn name_attributes(name: &Name, oid: &str) -> Vec<String> {
    name.0
        .iter()
        .flat_map(|rdn| rdn.0.iter())
        .filter(|atv| atv.oid.to_string() == oid)
        .filter_map(|atv| attribute_text(&atv.value))
        .collect()
}

fn attribute_text(value: &Any) -> Option<String> {
    if let Ok(text) = value.decode_as::<Utf8StringRef<'_>>() {
        return Some(text.to_string());
    }
    if let Ok(text) = value.decode_as::<PrintableStringRef<'_>>() {
        return Some(text.to_string());
    }
    value
        .decode_as::<Ia5StringRef<'_>>()
        .ok()
        .map(|text| text.to_string())
}

/// Enforces Apple's requirements on the WWDR intermediate.
pub fn validate_wwdr(info: &CertificateInfo) -> Result<()> {
    let common_names = info.common_names.join(", ");
    if !info
        .common_names
        .iter()
        .any(|cn| cn.contains(WWDR_AUTHORITY))
    {
        return Err(PassError::cert_validation(
            WWDR_CERT_NAME,
            format!(
                "subject CN \"{common_names}\" is not Apple {WWDR_AUTHORITY}; {WWDR_REMEDIATION}"
            ),
        ));
    }

    let has_generation = info
        .organizational_units
        .iter()
        .chain(info.common_names.iter())
        .any(|value| value.contains(WWDR_GENERATION));
    if !has_generation {
        return Err(PassError::cert_validation(
            WWDR_CERT_NAME,
            format!(
                "certificate is not generation {WWDR_GENERATION} (OU: {}); {WWDR_REMEDIATION}",
                info.organizational_units.join(", ")
            ),
        ));
    }

    match info.key_algorithm {
        KeyAlgorithm::Rsa => {}
        KeyAlgorithm::EllipticCurve => {
            return Err(PassError::cert_validation(
                WWDR_CERT_NAME,
                format!("certificate uses an elliptic-curve key, Apple Wallet requires RSA; {WWDR_REMEDIATION}"),
            ));
        }
        KeyAlgorithm::Other => {
            return Err(PassError::cert_validation(
                WWDR_CERT_NAME,
                format!("certificate public key is not RSA; {WWDR_REMEDIATION}"),
            ));
        }
    }

    if info.not_after.year() != WWDR_EXPECTED_EXPIRY_YEAR {
        warn!(
            expires = %info.not_after,
            expected_year = WWDR_EXPECTED_EXPIRY_YEAR,
            "WWDR certificate expiry year is unexpected for a G4 certificate"
        );
    }
    Ok(())
}

/// Reads an RSA private key from PKCS#8 PEM, or PKCS#1 PEM as a fallback.
pub fn parse_private_key(raw: &str) -> Result<RsaPrivateKey> {
    let normalized = pem::normalize(raw, SIGNER_KEY_NAME)?;
    let pkcs8 = match RsaPrivateKey::from_pkcs8_pem(&normalized) {
        Ok(key) => return Ok(key),
        Err(err) => err,
    };
    RsaPrivateKey::from_pkcs1_pem(&normalized).map_err(|pkcs1| {
        PassError::config(
            SIGNER_KEY_NAME,
            format!("not a PKCS#8 ({pkcs8}) or PKCS#1 ({pkcs1}) RSA private key"),
        )
    })
}

/// Validated signing material, parsed once and shared read-only.
pub struct SigningIdentity {
    signer: Certificate,
    wwdr: Certificate,
    signer_info: CertificateInfo,
    wwdr_info: CertificateInfo,
    key: RsaPrivateKey,
}

impl std::fmt::Debug for SigningIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningIdentity")
            .field("signer", &self.signer_info.subject)
            .field("wwdr", &self.wwdr_info.subject)
            .finish_non_exhaustive()
    }
}

impl SigningIdentity {
    /// Normalizes, parses and validates the bundle.
    pub fn from_bundle(bundle: &CertificateBundle) -> Result<Self> {
        Self::from_bundle_at(bundle, OffsetDateTime::now_utc())
    }

    pub fn from_bundle_at(bundle: &CertificateBundle, now: OffsetDateTime) -> Result<Self> {
        let signer_pem = pem::normalize(&bundle.signer_cert, SIGNER_CERT_NAME)?;
        let wwdr_pem = pem::normalize(&bundle.wwdr_cert, WWDR_CERT_NAME)?;

        let signer_info = parse_certificate(&signer_pem).into_result(SIGNER_CERT_NAME)?;
        let wwdr_info = parse_certificate(&wwdr_pem).into_result(WWDR_CERT_NAME)?;
        validate_wwdr(&wwdr_info)?;

        let key = parse_private_key(&bundle.signer_key)?;
        let cert_key = RsaPublicKey::from_public_key_der(&signer_info.public_key_der).map_err(
            |err| PassError::cert_validation(SIGNER_CERT_NAME, format!("public key is not RSA: {err}")),
        )?;
        if cert_key != key.to_public_key() {
            return Err(PassError::config(
                SIGNER_KEY_NAME,
                "private key does not match the signer certificate",
            ));
        }

        if !signer_info.is_valid_at(now) {
            warn!(
                not_before = %signer_info.not_before,
                not_after = %signer_info.not_after,
                "signer certificate is outside its validity window"
            );
        }
        if signer_info.issuer_der != wwdr_info.subject_der {
            warn!(
                wwdr = %wwdr_info.subject,
                "signer certificate was not issued by the supplied WWDR certificate"
            );
        }

        let signer = decode_cms_certificate(&signer_info, SIGNER_CERT_NAME)?;
        let wwdr = decode_cms_certificate(&wwdr_info, WWDR_CERT_NAME)?;
        info!(
            signer = signer_info.common_name().unwrap_or_default(),
            wwdr = wwdr_info.common_name().unwrap_or_default(),
            "signing identity loaded"
        );
        Ok(Self {
            signer,
            wwdr,
            signer_info,
            wwdr_info,
            key,
        })
    }

    pub fn signer_certificate(&self) -> &Certificate {
        &self.signer
    }

    pub fn wwdr_certificate(&self) -> &Certificate {
        &self.wwdr
    }

    pub fn signer_info(&self) -> &CertificateInfo {
        &self.signer_info
    }

    pub fn wwdr_info(&self) -> &CertificateInfo {
        &self.wwdr_info
    }

    pub(crate) fn private_key(&self) -> &RsaPrivateKey {
        &self.key
    }
}

fn decode_cms_certificate(info: &CertificateInfo, name: &str) -> Result<Certificate> {
    Certificate::from_der(&info.der).map_err(|err| PassError::CertParse {
        name: name.to_string(),
        primary: "parsed".to_string(),
        fallback: format!("not usable for signing: {err}"),
    })
}
