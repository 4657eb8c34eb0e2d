#![forbid(unsafe_code)]

use anyhow::Result;
use clap::Parser;
use serde::Serialize;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use wallet_pass::certs::CertificateInfo;

use crate::runtime::RuntimeContext;

#[derive(Debug, Parser)]
pub struct CheckCertsArgs {}

#[derive(Debug, Serialize)]
struct CertificateSummary {
    subject: String,
    serial: String,
    #[serde(with = "time::serde::rfc3339")]
    not_before: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    not_after: OffsetDateTime,
    sha256: String,
    valid_now: bool,
}

impl CertificateSummary {
    fn new(info: &CertificateInfo, now: OffsetDateTime) -> Self {
        Self {
            subject: info.subject.clone(),
            serial: info.serial_hex.clone(),
            not_before: info.not_before,
            not_after: info.not_after,
            sha256: info.fingerprint_sha256(),
            valid_now: info.is_valid_at(now),
        }
    }
}

pub fn handle(_args: CheckCertsArgs, json: bool, runtime: &RuntimeContext) -> Result<()> {
    let identity = runtime.signing_identity()?;
    let now = OffsetDateTime::now_utc();
    let signer = CertificateSummary::new(identity.signer_info(), now);
    let wwdr = CertificateSummary::new(identity.wwdr_info(), now);

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "status": "ok",
                "signer": signer,
                "wwdr": wwdr,
            }))?
        );
    } else {
        println!("signing certificates ok");
        for (label, cert) in [("signer", &signer), ("wwdr", &wwdr)] {
            println!(
                "  {label}: {}\n    serial: {}\n    expires: {}{}\n    sha256: {}",
                cert.subject,
                cert.serial,
                cert.not_after.format(&Rfc3339)?,
                if cert.valid_now { "" } else { " (not currently valid)" },
                cert.sha256
            );
        }
    }
    Ok(())
}
