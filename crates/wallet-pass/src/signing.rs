use std::fmt;
use std::time::SystemTime;

use cms::attr::SigningTime;
use cms::builder::{SignedDataBuilder, SignerInfoBuilder};
use cms::cert::{CertificateChoices, IssuerAndSerialNumber};
use cms::signed_data::{EncapsulatedContentInfo, SignerIdentifier};
use der::asn1::{ObjectIdentifier, SetOfVec, UtcTime};
use der::{Any, Encode};
use rsa::pkcs1v15::SigningKey;
use sha1::{Digest, Sha1};
use time::OffsetDateTime;
use tracing::debug;
use x509_cert::attr::Attribute;
use x509_cert::spki::AlgorithmIdentifierOwned;

use crate::builder::ManifestSigner;
use crate::certs::SigningIdentity;
use crate::error::{PassError, Result};

pub(crate) const OID_SHA1: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.14.3.2.26");
pub(crate) const OID_PKCS7_DATA: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.2.840.113549.1.7.1");
pub(crate) const OID_SIGNING_TIME: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.5");

fn signing_error(stage: &str, err: impl fmt::Display) -> PassError {
    PassError::Signing(format!("{stage}: {err}"))
}

/// Detached PKCS#7 SignedData over `manifest`, DER encoded.
///
/// SHA-1 digest with `sha1WithRSAEncryption`; signed attributes carry the
/// content type, message digest and `signing_time`. The signer and WWDR
/// certificates form a DER `SET OF`, so they encode in canonical byte order
/// rather than insertion order; verifiers locate the signer by issuer and serial.
pub fn sign_manifest(
    identity: &SigningIdentity,
    manifest: &[u8],
    signing_time: OffsetDateTime,
) -> Result<Vec<u8>> {
    let signer_cert = identity.signer_certificate();
    let signing_key = SigningKey::<Sha1>::new(identity.private_key().clone());
    let signer_id = SignerIdentifier::IssuerAndSerialNumber(IssuerAndSerialNumber {
        issuer: signer_cert.tbs_certificate.issuer.clone(),
        serial_number: signer_cert.tbs_certificate.serial_number.clone(),
    });
    let content_info = EncapsulatedContentInfo {
        econtent_type: OID_PKCS7_DATA,
        econtent: None,
    };
    let digest_algorithm = AlgorithmIdentifierOwned {
        oid: OID_SHA1,
        parameters: Some(Any::null()),
    };
    let message_digest = Sha1::digest(manifest);

    let mut signer_info = SignerInfoBuilder::new(
        &signing_key,
        signer_id,
        digest_algorithm.clone(),
        &content_info,
        Some(message_digest.as_slice()),
    )
    .map_err(|err| signing_error("signer info", err))?;
    signer_info
        .add_signed_attribute(signing_time_attribute(signing_time)?)
        .map_err(|err| signing_error("signing-time attribute", err))?;

    let signature = SignedDataBuilder::new(&content_info)
        .add_certificate(CertificateChoices::Certificate(signer_cert.clone()))
        .map_err(|err| signing_error("signer certificate", err))?
        .add_certificate(CertificateChoices::Certificate(
            identity.wwdr_certificate().clone(),
        ))
        .map_err(|err| signing_error("WWDR certificate", err))?
        .add_digest_algorithm(digest_algorithm)
        .map_err(|err| signing_error("digest algorithm", err))?
        .add_signer_info(signer_info)
        .map_err(|err| signing_error("signature", err))?
        .build()
        .map_err(|err| signing_error("signed data", err))?
        .to_der()
        .map_err(|err| signing_error("DER encoding", err))?;

    debug!(bytes = signature.len(), "manifest signed");
    Ok(signature)
}

fn signing_time_attribute(signing_time: OffsetDateTime) -> Result<Attribute> {
    let utc = UtcTime::from_system_time(SystemTime::from(signing_time))
        .map_err(|err| signing_error("signing time", err))?;
    let encoded = Any::encode_from(&SigningTime::UtcTime(utc))
        .map_err(|err| signing_error("signing time", err))?;
    let mut values: SetOfVec<Any> = SetOfVec::new();
    values
        .insert(encoded)
        .map_err(|err| signing_error("signing time", err))?;
    Ok(Attribute {
        oid: OID_SIGNING_TIME,
        values,
    })
}

impl ManifestSigner for SigningIdentity {
    fn sign_manifest(&self, manifest: &[u8], signing_time: OffsetDateTime) -> Result<Vec<u8>> {
        sign_manifest(self, manifest, signing_time)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::certs::CertificateBundle;
    use crate::reader::verify_detached_signature;
    use time::macros::datetime;

    const NOW: OffsetDateTime = datetime!(2026-03-01 08:00:00 UTC);

    fn identity() -> SigningIdentity {
        SigningIdentity::from_bundle(&CertificateBundle {
            signer_cert: include_str!("../tests/fixtures/signer.pem").to_string(),
            signer_key: include_str!("../tests/fixtures/signer.key").to_string(),
            wwdr_cert: include_str!("../tests/fixtures/wwdr.pem").to_string(),
        })
        .unwrap()
    }

    #[test]
    fn signature_verifies_against_manifest() {
        let manifest = br#"{"icon.png":"aa","pass.json":"bb"}"#;
        let signature = sign_manifest(&identity(), manifest, NOW).unwrap();
        let report = verify_detached_signature(&signature, manifest).unwrap();
        assert_eq!(report.signing_time, Some(NOW));
        assert_eq!(report.certificate_count, 2);
        assert!(report.signer_subject.contains("pass.com.example.race"));
    }

    #[test]
    fn any_manifest_change_breaks_verification() {
        let manifest = br#"{"pass.json":"0123456789abcdef"}"#.to_vec();
        let signature = sign_manifest(&identity(), &manifest, NOW).unwrap();
        for idx in [0, manifest.len() / 2, manifest.len() - 1] {
            let mut corrupted = manifest.clone();
            corrupted[idx] ^= 0x01;
            let err = verify_detached_signature(&signature, &corrupted).unwrap_err();
            assert!(err.to_string().contains("digest"), "{err}");
        }
    }

    #[test]
    fn signature_is_detached_der() {
        use cms::content_info::ContentInfo;
        use cms::signed_data::SignedData;
        use der::Decode;

        let signature = sign_manifest(&identity(), b"{}", NOW).unwrap();
        let content_info = ContentInfo::from_der(&signature).unwrap();
        let signed_data: SignedData = content_info.content.decode_as().unwrap();
        assert!(signed_data.encap_content_info.econtent.is_none());
        assert_eq!(signed_data.encap_content_info.econtent_type, OID_PKCS7_DATA);
        assert_eq!(signed_data.digest_algorithms.len(), 1);
    }

    #[test]
    fn certificate_set_uses_der_order() {
        use cms::content_info::ContentInfo;
        use cms::signed_data::SignedData;
        use der::Decode;

        let signature = sign_manifest(&identity(), b"{}", NOW).unwrap();
        let signed_data: SignedData = ContentInfo::from_der(&signature)
            .unwrap()
            .content
            .decode_as()
            .unwrap();
        let certificates = signed_data.certificates.unwrap();
        let choices: Vec<&CertificateChoices> = certificates.0.iter().collect();
        let encoded: Vec<Vec<u8>> = choices.iter().map(|choice| choice.to_der().unwrap()).collect();
        let mut sorted = encoded.clone();
        sorted.sort();
        assert_eq!(encoded, sorted);

        // The shorter WWDR encoding sorts ahead of the signer for these fixtures.
        let subjects: Vec<String> = choices
            .iter()
            .map(|choice| match choice {
                CertificateChoices::Certificate(cert) => cert.tbs_certificate.subject.to_string(),
                _ => panic!("unexpected certificate choice"),
            })
            .collect();
        assert_eq!(subjects.len(), 2);
        assert!(subjects[0].contains("Worldwide Developer Relations"), "{subjects:?}");
        assert!(subjects[1].contains("pass.com.example.race"), "{subjects:?}");
    }

    #[test]
    fn signed_attributes_verify_with_the_raw_key() {
        use cms::content_info::ContentInfo;
        use cms::signed_data::SignedData;
        use der::Decode;
        use der::asn1::OctetString;
        use rsa::RsaPublicKey;
        use rsa::pkcs1v15::{Signature, VerifyingKey};
        use rsa::signature::Verifier;

        const OID_MESSAGE_DIGEST: ObjectIdentifier =
            ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.4");

        let identity = identity();
        let manifest = br#"{"pass.json":"bb"}"#;
        let signature = sign_manifest(&identity, manifest, NOW).unwrap();
        let signed_data: SignedData = ContentInfo::from_der(&signature)
            .unwrap()
            .content
            .decode_as()
            .unwrap();
        let signer_info = signed_data.signer_infos.0.iter().next().unwrap();
        assert_eq!(signer_info.digest_alg.oid, OID_SHA1);

        let attrs = signer_info.signed_attrs.as_ref().unwrap();
        let digest: OctetString = attrs
            .iter()
            .find(|attr| attr.oid == OID_MESSAGE_DIGEST)
            .and_then(|attr| attr.values.iter().next())
            .unwrap()
            .decode_as()
            .unwrap();
        assert_eq!(digest.as_bytes(), Sha1::digest(manifest).as_slice());

        let public_key = RsaPublicKey::from(identity.private_key());
        let raw = Signature::try_from(signer_info.signature.as_bytes()).unwrap();
        VerifyingKey::<Sha1>::new(public_key)
            .verify(&attrs.to_der().unwrap(), &raw)
            .unwrap();
    }
}
