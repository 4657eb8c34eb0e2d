#![forbid(unsafe_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use serde::Serialize;
use wallet_pass::google::rest::WalletRestClient;
use wallet_pass::{CertificateBundle, GoogleServiceAccount, HttpImageSource, SigningIdentity};

use crate::config::{LoadedConfig, SecretRef, WalletcConfig, load_config};

pub struct RuntimeState {
    pub config: WalletcConfig,
    pub config_path: Option<PathBuf>,
    pub base_dir: PathBuf,
}

pub type RuntimeContext = Arc<RuntimeState>;

/// Whether a secret could be found, for `walletc config`. Never carries the value.
#[derive(Debug, Clone, Serialize)]
pub struct SecretStatus {
    pub name: &'static str,
    pub source: String,
    pub available: bool,
}

impl RuntimeState {
    fn secret(&self, name: &str, secret: &SecretRef) -> Result<String> {
        secret
            .resolve(&self.base_dir)
            .with_context(|| format!("failed to load {name}"))?
            .ok_or_else(|| anyhow!("{name} is not configured (expected {})", secret.describe()))
    }

    pub fn certificate_bundle(&self) -> Result<CertificateBundle> {
        let apple = &self.config.apple;
        Ok(CertificateBundle {
            signer_cert: self.secret("signer certificate", &apple.signer_cert)?,
            signer_key: self.secret("signer private key", &apple.signer_key)?,
            wwdr_cert: self.secret("WWDR certificate", &apple.wwdr_cert)?,
        })
    }

    pub fn signing_identity(&self) -> Result<Arc<SigningIdentity>> {
        let bundle = self.certificate_bundle()?;
        let identity =
            SigningIdentity::from_bundle(&bundle).context("signing certificates are unusable")?;
        Ok(Arc::new(identity))
    }

    pub fn google_account(&self) -> Result<Arc<GoogleServiceAccount>> {
        let raw = self.secret("Google service account", &self.config.google.credentials)?;
        let account = GoogleServiceAccount::from_json(&raw)
            .context("Google service account credentials are unusable")?;
        Ok(Arc::new(account))
    }

    pub fn image_source(&self) -> Result<HttpImageSource> {
        HttpImageSource::new(self.config.images.fetch_options())
            .context("failed to build image http client")
    }

    pub fn rest_client(&self) -> Result<WalletRestClient> {
        let google = &self.config.google;
        WalletRestClient::new(google.endpoints.clone(), google.timeout())
            .context("failed to build Google Wallet http client")
    }

    /// Which secrets resolve, without reading more than needed to tell.
    pub fn secret_statuses(&self) -> Vec<SecretStatus> {
        let apple = &self.config.apple;
        [
            ("signer_cert", &apple.signer_cert),
            ("signer_key", &apple.signer_key),
            ("wwdr_cert", &apple.wwdr_cert),
            ("google_credentials", &self.config.google.credentials),
        ]
        .into_iter()
        .map(|(name, secret)| SecretStatus {
            name,
            source: secret.describe(),
            available: matches!(secret.resolve(&self.base_dir), Ok(Some(_))),
        })
        .collect()
    }
}

pub fn resolve_runtime(cli_config: Option<&Path>) -> Result<RuntimeContext> {
    let cwd = std::env::current_dir().context("failed to determine current directory")?;
    let LoadedConfig {
        config,
        source,
        base_dir,
    } = load_config(cli_config, &cwd)?;
    if let Some(path) = &source {
        tracing::debug!(config = %path.display(), "loaded service config");
    }
    Ok(Arc::new(RuntimeState {
        config,
        config_path: source,
        base_dir,
    }))
}
