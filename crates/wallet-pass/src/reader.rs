use std::collections::BTreeMap;
use std::io::{Cursor, Read};

use cms::cert::CertificateChoices;
use cms::content_info::ContentInfo;
use cms::signed_data::{SignedData, SignerIdentifier, SignerInfo};
use der::asn1::{ObjectIdentifier, OctetString, UtcTime};
use der::{Decode, Encode};
use rsa::RsaPublicKey;
use rsa::pkcs1v15::{Signature, VerifyingKey};
use rsa::pkcs8::DecodePublicKey;
use rsa::signature::Verifier;
use serde::Serialize;
use serde_json::Value as JsonValue;
use sha1::{Digest, Sha1};
use time::OffsetDateTime;
use tracing::debug;
use x509_cert::Certificate;
use zip::ZipArchive;

use crate::builder::{MANIFEST_JSON, PASS_JSON, SIGNATURE, sha1_hex};
use crate::error::{PassError, Result};
use crate::signing::{OID_PKCS7_DATA, OID_SIGNING_TIME};

const OID_SIGNED_DATA: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.7.2");
const OID_CONTENT_TYPE: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.3");
const OID_MESSAGE_DIGEST: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.4");

/// What a verified signature says about itself.
#[derive(Debug, Clone, Serialize)]
pub struct SignatureReport {
    pub signer_subject: String,
    pub certificate_subjects: Vec<String>,
    pub certificate_count: usize,
    #[serde(with = "time::serde::rfc3339::option")]
    pub signing_time: Option<OffsetDateTime>,
}

/// A `.pkpass` whose manifest and signature both check out.
#[derive(Debug, Clone, Serialize)]
pub struct PassInspection {
    pub pass_json: JsonValue,
    pub manifest: BTreeMap<String, String>,
    /// Archive entry names in archive order.
    pub entries: Vec<String>,
    pub signature: SignatureReport,
}

/// Opens a pass archive and verifies it end to end.
pub fn open_pass(bytes: &[u8]) -> Result<PassInspection> {
    let files = read_archive(bytes)?;
    let entries: Vec<String> = files.iter().map(|(name, _)| name.clone()).collect();
    let lookup: BTreeMap<&str, &[u8]> = files
        .iter()
        .map(|(name, data)| (name.as_str(), data.as_slice()))
        .collect();
    if lookup.len() != files.len() {
        return Err(PassError::Packaging("archive contains duplicate entries".into()));
    }

    let required = |name: &str| {
        lookup
            .get(name)
            .copied()
            .ok_or_else(|| PassError::Packaging(format!("`{name}` missing from archive")))
    };
    let pass_bytes = required(PASS_JSON)?;
    let manifest_bytes = required(MANIFEST_JSON)?;
    let signature_bytes = required(SIGNATURE)?;

    let manifest: BTreeMap<String, String> = serde_json::from_slice(manifest_bytes)
        .map_err(|err| PassError::Packaging(format!("manifest.json is not a string map: {err}")))?;
    check_manifest(&manifest, &lookup)?;

    let pass_json = serde_json::from_slice(pass_bytes)
        .map_err(|err| PassError::Packaging(format!("pass.json is not valid JSON: {err}")))?;
    let signature = verify_detached_signature(signature_bytes, manifest_bytes)?;

    Ok(PassInspection {
        pass_json,
        manifest,
        entries,
        signature,
    })
}

fn read_archive(bytes: &[u8]) -> Result<Vec<(String, Vec<u8>)>> {
    let mut archive = ZipArchive::new(Cursor::new(bytes))
        .map_err(|err| PassError::Packaging(format!("not a zip archive: {err}")))?;
    let mut files = Vec::with_capacity(archive.len());
    for idx in 0..archive.len() {
        let mut file = archive
            .by_index(idx)
            .map_err(|err| PassError::Packaging(format!("failed to open entry {idx}: {err}")))?;
        if file.is_dir() {
            continue;
        }
        let name = file.name().to_string();
        let mut data = Vec::new();
        file.read_to_end(&mut data)
            .map_err(|err| PassError::Packaging(format!("failed to read {name}: {err}")))?;
        files.push((name, data));
    }
    Ok(files)
}

fn check_manifest(manifest: &BTreeMap<String, String>, files: &BTreeMap<&str, &[u8]>) -> Result<()> {
    for (name, data) in files {
        if *name == MANIFEST_JSON || *name == SIGNATURE {
            continue;
        }
        let expected = manifest.get(*name).ok_or_else(|| {
            PassError::Packaging(format!("`{name}` is not listed in manifest.json"))
        })?;
        let actual = sha1_hex(data);
        if !expected.eq_ignore_ascii_case(&actual) {
            return Err(PassError::Packaging(format!(
                "hash mismatch for `{name}`: manifest {expected}, archive {actual}"
            )));
        }
    }
    if let Some(extra) = manifest.keys().find(|name| !files.contains_key(name.as_str())) {
        return Err(PassError::Packaging(format!(
            "manifest.json lists `{extra}` which is not in the archive"
        )));
    }
    Ok(())
}

fn signature_error(reason: impl Into<String>) -> PassError {
    PassError::Signing(reason.into())
}

/// Verifies a detached PKCS#7 signature over `content`.
pub fn verify_detached_signature(signature: &[u8], content: &[u8]) -> Result<SignatureReport> {
    let content_info = ContentInfo::from_der(signature)
        .map_err(|err| signature_error(format!("signature is not DER ContentInfo: {err}")))?;
    if content_info.content_type != OID_SIGNED_DATA {
        return Err(signature_error(format!(
            "unexpected content type {}",
            content_info.content_type
        )));
    }
    let signed_data: SignedData = content_info
        .content
        .decode_as()
        .map_err(|err| signature_error(format!("malformed SignedData: {err}")))?;
    if signed_data.encap_content_info.econtent.is_some() {
        return Err(signature_error("signature is not detached"));
    }

    let certificates: Vec<&Certificate> = signed_data
        .certificates
        .as_ref()
        .map(|set| {
            set.0
                .iter()
                .filter_map(|choice| match choice {
                    CertificateChoices::Certificate(cert) => Some(cert),
                    _ => None,
                })
                .collect()
        })
        .unwrap_or_default();

    let mut signer_infos = signed_data.signer_infos.0.iter();
    let signer_info = match (signer_infos.next(), signer_infos.next()) {
        (Some(info), None) => info,
        (None, _) => return Err(signature_error("no signer info")),
        (Some(_), Some(_)) => return Err(signature_error("more than one signer info")),
    };

    let signer_cert = find_signer(signer_info, &certificates)?;
    let signing_time = check_signed_attributes(signer_info, content)?;
    verify_rsa(signer_info, signer_cert)?;

    debug!(certificates = certificates.len(), "detached signature verified");
    Ok(SignatureReport {
        signer_subject: signer_cert.tbs_certificate.subject.to_string(),
        certificate_subjects: certificates
            .iter()
            .map(|cert| cert.tbs_certificate.subject.to_string())
            .collect(),
        certificate_count: certificates.len(),
        signing_time,
    })
}

fn find_signer<'a>(signer_info: &SignerInfo, certificates: &[&'a Certificate]) -> Result<&'a Certificate> {
    let SignerIdentifier::IssuerAndSerialNumber(id) = &signer_info.sid else {
        return Err(signature_error("signer identified by key id, expected issuer and serial"));
    };
    certificates
        .iter()
        .copied()
        .find(|cert| {
            cert.tbs_certificate.serial_number == id.serial_number
                && cert.tbs_certificate.issuer == id.issuer
        })
        .ok_or_else(|| signature_error("signer certificate not embedded in signature"))
}

/// Checks content-type and message-digest; returns the signing time when present.
fn check_signed_attributes(signer_info: &SignerInfo, content: &[u8]) -> Result<Option<OffsetDateTime>> {
    let attrs = signer_info
        .signed_attrs
        .as_ref()
        .ok_or_else(|| signature_error("signed attributes missing"))?;

    let mut digest_seen = false;
    let mut signing_time = None;
    for attr in attrs.iter() {
        let Some(value) = attr.values.iter().next() else {
            continue;
        };
        if attr.oid == OID_CONTENT_TYPE {
            let content_type: ObjectIdentifier = value
                .decode_as()
                .map_err(|err| signature_error(format!("malformed content-type attribute: {err}")))?;
            if content_type != OID_PKCS7_DATA {
                return Err(signature_error(format!("signed content type is {content_type}")));
            }
        } else if attr.oid == OID_MESSAGE_DIGEST {
            let digest: OctetString = value
                .decode_as()
                .map_err(|err| signature_error(format!("malformed message-digest attribute: {err}")))?;
            if digest.as_bytes() != Sha1::digest(content).as_slice() {
                return Err(signature_error("message digest does not match manifest"));
            }
            digest_seen = true;
        } else if attr.oid == OID_SIGNING_TIME {
            signing_time = value
                .decode_as::<UtcTime>()
                .ok()
                .and_then(|utc| i64::try_from(utc.to_unix_duration().as_secs()).ok())
                .and_then(|secs| OffsetDateTime::from_unix_timestamp(secs).ok());
        }
    }
    if !digest_seen {
        return Err(signature_error("message-digest attribute missing"));
    }
    Ok(signing_time)
}

fn verify_rsa(signer_info: &SignerInfo, signer_cert: &Certificate) -> Result<()> {
    let spki = signer_cert
        .tbs_certificate
        .subject_public_key_info
        .to_der()
        .map_err(|err| signature_error(format!("signer public key: {err}")))?;
    let public_key = RsaPublicKey::from_public_key_der(&spki)
        .map_err(|err| signature_error(format!("signer public key is not RSA: {err}")))?;
    let signed = signer_info
        .signed_attrs
        .as_ref()
        .ok_or_else(|| signature_error("signed attributes missing"))?
        .to_der()
        .map_err(|err| signature_error(format!("signed attributes: {err}")))?;
    let signature = Signature::try_from(signer_info.signature.as_bytes())
        .map_err(|err| signature_error(format!("malformed signature value: {err}")))?;
    VerifyingKey::<Sha1>::new(public_key)
        .verify(&signed, &signature)
        .map_err(|_| signature_error("RSA signature does not verify"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::PassImages;
    use crate::builder::PassPackager;
    use crate::certs::{CertificateBundle, SigningIdentity};
    use std::io::Write;
    use time::macros::datetime;
    use zip::ZipWriter;
    use zip::write::SimpleFileOptions;

    const NOW: OffsetDateTime = datetime!(2026-03-01 08:00:00 UTC);
    // Produced with `openssl smime -sign -binary -md sha1 -outform DER` over the fixture identity.
    const OPENSSL_MANIFEST: &[u8] = include_bytes!("../tests/fixtures/openssl-manifest.json");
    const OPENSSL_SIGNATURE: &[u8] = include_bytes!("../tests/fixtures/openssl-manifest.sig");

    fn identity() -> SigningIdentity {
        SigningIdentity::from_bundle(&CertificateBundle {
            signer_cert: include_str!("../tests/fixtures/signer.pem").to_string(),
            signer_key: include_str!("../tests/fixtures/signer.key").to_string(),
            wwdr_cert: include_str!("../tests/fixtures/wwdr.pem").to_string(),
        })
        .unwrap()
    }

    fn sample_pass() -> Vec<u8> {
        PassPackager::new("1024", br#"{"serialNumber": "1024"}"#.to_vec())
            .with_images(&PassImages {
                icon: Some(b"icon".to_vec()),
                logo: None,
                strip: None,
            })
            .build(&identity(), NOW)
            .unwrap()
            .bytes
    }

    fn rewrite(bytes: &[u8], edit: impl Fn(&str, Vec<u8>) -> Option<Vec<u8>>) -> Vec<u8> {
        let files = read_archive(bytes).unwrap();
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        for (name, data) in files {
            if let Some(data) = edit(&name, data) {
                writer.start_file(name, SimpleFileOptions::default()).unwrap();
                writer.write_all(&data).unwrap();
            }
        }
        writer.finish().unwrap().into_inner()
    }

    #[test]
    fn signed_pass_opens_cleanly() {
        let inspection = open_pass(&sample_pass()).unwrap();
        assert_eq!(inspection.pass_json["serialNumber"], "1024");
        assert_eq!(inspection.entries.first().map(String::as_str), Some(PASS_JSON));
        assert_eq!(inspection.entries.last().map(String::as_str), Some(SIGNATURE));
        assert!(inspection.manifest.contains_key("icon@3x.png"));
        assert_eq!(inspection.signature.signing_time, Some(NOW));
        assert!(
            inspection
                .signature
                .certificate_subjects
                .iter()
                .any(|subject| subject.contains("Worldwide Developer Relations"))
        );
    }

    #[test]
    fn tampered_file_fails_manifest_check() {
        let tampered = rewrite(&sample_pass(), |name, mut data| {
            if name == "icon.png" {
                data[0] ^= 0x01;
            }
            Some(data)
        });
        let err = open_pass(&tampered).unwrap_err();
        assert!(err.to_string().contains("hash mismatch for `icon.png`"), "{err}");
    }

    #[test]
    fn tampered_manifest_fails_signature_check() {
        let pass = sample_pass();
        let files = read_archive(&pass).unwrap();
        let manifest = &files.iter().find(|(name, _)| name == MANIFEST_JSON).unwrap().1;
        let signature = &files.iter().find(|(name, _)| name == SIGNATURE).unwrap().1;
        let mut corrupted = manifest.clone();
        let last = corrupted.len() - 2;
        corrupted[last] ^= 0x01;
        let err = verify_detached_signature(signature, &corrupted).unwrap_err();
        assert!(matches!(err, PassError::Signing(_)));
    }

    #[test]
    fn missing_signature_is_rejected() {
        let stripped = rewrite(&sample_pass(), |name, data| (name != SIGNATURE).then_some(data));
        let err = open_pass(&stripped).unwrap_err();
        assert!(err.to_string().contains("`signature` missing"), "{err}");
    }

    #[test]
    fn unlisted_entry_is_rejected() {
        let pass = sample_pass();
        let files = read_archive(&pass).unwrap();
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        for (name, data) in files {
            writer.start_file(name, SimpleFileOptions::default()).unwrap();
            writer.write_all(&data).unwrap();
        }
        writer.start_file("extra.png", SimpleFileOptions::default()).unwrap();
        writer.write_all(b"surprise").unwrap();
        let bytes = writer.finish().unwrap().into_inner();

        let err = open_pass(&bytes).unwrap_err();
        assert!(err.to_string().contains("not listed in manifest.json"), "{err}");
    }

    #[test]
    fn garbage_signature_is_rejected() {
        let err = verify_detached_signature(b"not der", b"{}").unwrap_err();
        assert!(matches!(err, PassError::Signing(_)));
    }

    #[test]
    fn openssl_signature_verifies() {
        let report = verify_detached_signature(OPENSSL_SIGNATURE, OPENSSL_MANIFEST).unwrap();
        assert_eq!(report.certificate_count, 2);
        assert!(report.signer_subject.contains("pass.com.example.race"));
        assert_eq!(report.signing_time, Some(datetime!(2026-10-16 17:07:51 UTC)));

        let mut tampered = OPENSSL_MANIFEST.to_vec();
        tampered[2] ^= 0x01;
        let err = verify_detached_signature(OPENSSL_SIGNATURE, &tampered).unwrap_err();
        assert!(err.to_string().contains("digest"), "{err}");
    }
}
