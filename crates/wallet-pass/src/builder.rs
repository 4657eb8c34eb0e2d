use std::collections::{BTreeMap, BTreeSet};
use std::io::{Cursor, Write};

use sha1::{Digest, Sha1};
use time::OffsetDateTime;
use tracing::{debug, info, warn};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, DateTime as ZipDateTime, ZipWriter};

use crate::assets::PassImages;
use crate::error::{PassError, Result};

pub const PASS_JSON: &str = "pass.json";
pub const MANIFEST_JSON: &str = "manifest.json";
pub const SIGNATURE: &str = "signature";
pub(crate) const DEFLATE_LEVEL: i64 = 6;

const RESOLUTION_SUFFIXES: [&str; 3] = ["", "@2x", "@3x"];

/// Produces the detached signature stored as `signature`.
pub trait ManifestSigner: Send + Sync {
    fn sign_manifest(&self, manifest: &[u8], signing_time: OffsetDateTime) -> Result<Vec<u8>>;
}

/// A signed `.pkpass` archive, ready to hand to a client.
#[derive(Debug, Clone)]
pub struct PassBundle {
    pub bytes: Vec<u8>,
    pub manifest: BTreeMap<String, String>,
    /// Archive entry names in write order.
    pub entries: Vec<String>,
    pub serial_number: String,
    pub file_name: String,
}

impl PassBundle {
    pub const CONTENT_TYPE: &'static str = "application/vnd.apple.pkpass";

    pub fn content_disposition(&self) -> String {
        format!("attachment; filename=\"{}\"", self.file_name)
    }
}

/// `pass_<serial>_<unix-millis>.pkpass`, with the serial reduced to filename-safe characters.
pub fn suggested_file_name(serial_number: &str, generated_at: OffsetDateTime) -> String {
    let safe: String = serial_number
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let millis = generated_at.unix_timestamp_nanos() / 1_000_000;
    format!("pass_{safe}_{millis}.pkpass")
}

struct PendingFile {
    path: String,
    bytes: Vec<u8>,
}

impl PendingFile {
    fn new(path: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            path: path.into(),
            bytes,
        }
    }

    fn hash(&self) -> String {
        sha1_hex(&self.bytes)
    }
}

/// Collects pass files, writes the manifest and signature and zips the result.
pub struct PassPackager {
    serial_number: String,
    files: Vec<PendingFile>,
}

impl PassPackager {
    pub fn new(serial_number: impl Into<String>, pass_json: Vec<u8>) -> Self {
        Self {
            serial_number: serial_number.into(),
            files: vec![PendingFile::new(PASS_JSON, pass_json)],
        }
    }

    /// Adds icon, logo and strip images with their Wallet naming workarounds.
    ///
    /// A missing icon borrows the logo. Icon and strip are written at all three
    /// resolution names (same bytes) and the strip doubles as the thumbnail.
    pub fn with_images(mut self, images: &PassImages) -> Self {
        let icon = images.icon.as_ref().or(images.logo.as_ref());
        if images.icon.is_none() && images.logo.is_some() {
            debug!("no icon image; using the logo as icon");
        }
        if let Some(icon) = icon {
            self = self.with_resolutions("icon", icon);
        }
        if let Some(logo) = &images.logo {
            self = self.with_file("logo.png", logo.clone());
        }
        if let Some(strip) = &images.strip {
            self = self
                .with_resolutions("strip", strip)
                .with_resolutions("thumbnail", strip);
        }
        self
    }

    fn with_resolutions(mut self, base: &str, bytes: &[u8]) -> Self {
        for suffix in RESOLUTION_SUFFIXES {
            self.files
                .push(PendingFile::new(format!("{base}{suffix}.png"), bytes.to_vec()));
        }
        self
    }

    pub fn with_file(mut self, path: impl Into<String>, bytes: Vec<u8>) -> Self {
        self.files.push(PendingFile::new(path, bytes));
        self
    }

    /// The `manifest.json` map for the files added so far.
    pub fn manifest(&self) -> Result<BTreeMap<String, String>> {
        let mut seen = BTreeSet::new();
        let mut manifest = BTreeMap::new();
        for file in &self.files {
            if file.path == MANIFEST_JSON || file.path == SIGNATURE {
                return Err(PassError::Packaging(format!(
                    "`{}` is reserved and cannot be added as a pass file",
                    file.path
                )));
            }
            if !seen.insert(file.path.as_str()) {
                return Err(PassError::Packaging(format!(
                    "duplicate archive entry `{}`",
                    file.path
                )));
            }
            manifest.insert(file.path.clone(), file.hash());
        }
        if !manifest.contains_key(PASS_JSON) {
            return Err(PassError::Packaging("pass.json missing from manifest".into()));
        }
        if !manifest.contains_key("icon.png") {
            warn!("icon.png is missing; some Wallet versions refuse passes without an icon");
        }
        Ok(manifest)
    }

    /// Signs the manifest and writes the archive. Nothing is returned unless signing succeeds.
    pub fn build(self, signer: &dyn ManifestSigner, generated_at: OffsetDateTime) -> Result<PassBundle> {
        let manifest = self.manifest()?;
        let manifest_bytes = serde_json::to_vec(&manifest)
            .map_err(|err| PassError::Packaging(format!("failed to encode manifest: {err}")))?;
        let signature = signer.sign_manifest(&manifest_bytes, generated_at)?;

        let mut files = self.files;
        files.push(PendingFile::new(MANIFEST_JSON, manifest_bytes));
        files.push(PendingFile::new(SIGNATURE, signature));

        let bytes = write_zip(&files)?;
        let entries: Vec<String> = files.into_iter().map(|file| file.path).collect();
        info!(
            serial = %self.serial_number,
            entries = entries.len(),
            bytes = bytes.len(),
            "pass bundle written"
        );
        Ok(PassBundle {
            bytes,
            manifest,
            entries,
            file_name: suggested_file_name(&self.serial_number, generated_at),
            serial_number: self.serial_number,
        })
    }
}

pub fn sha1_hex(bytes: &[u8]) -> String {
    hex::encode(Sha1::digest(bytes))
}

fn write_zip(files: &[PendingFile]) -> Result<Vec<u8>> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let timestamp = zip_timestamp();

    for entry in files {
        let options = SimpleFileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .compression_level(Some(DEFLATE_LEVEL))
            .last_modified_time(timestamp)
            .unix_permissions(0o644)
            .large_file(false);
        writer
            .start_file(entry.path.as_str(), options)
            .map_err(|err| PassError::Packaging(format!("failed to add {}: {err}", entry.path)))?;
        writer
            .write_all(&entry.bytes)
            .map_err(|err| PassError::Packaging(format!("failed to write {}: {err}", entry.path)))?;
    }

    let cursor = writer
        .finish()
        .map_err(|err| PassError::Packaging(format!("failed to finish pkpass archive: {err}")))?;
    Ok(cursor.into_inner())
}

fn zip_timestamp() -> ZipDateTime {
    ZipDateTime::from_date_and_time(1980, 1, 1, 0, 0, 0).unwrap_or_else(|_| ZipDateTime::default())
}
