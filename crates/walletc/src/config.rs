use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use wallet_pass::assets::{DEFAULT_FETCH_RETRIES, DEFAULT_FETCH_TIMEOUT, ImageFetchOptions};
use wallet_pass::google::rest::{DEFAULT_REST_TIMEOUT, GoogleEndpoints};

pub const DEFAULT_CONFIG_FILE: &str = "walletc.toml";
pub const CONFIG_ENV: &str = "WALLETC_CONFIG";

pub const SIGNER_CERT_ENV: &str = "PASS_SIGNER_CERT";
pub const SIGNER_KEY_ENV: &str = "PASS_SIGNER_KEY";
pub const WWDR_CERT_ENV: &str = "PASS_WWDR";
pub const GOOGLE_CREDENTIALS_ENV: &str = "GOOGLE_SERVICE_ACCOUNT_CREDENTIALS";

/// Where a secret comes from: an environment variable, a file, or both
/// (the variable wins when set).
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct SecretRef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
}

impl SecretRef {
    pub fn env(name: &str) -> Self {
        Self {
            env: Some(name.to_string()),
            file: None,
        }
    }

    /// Reads the secret; relative files resolve against `base_dir`.
    pub fn resolve(&self, base_dir: &Path) -> Result<Option<String>> {
        if let Some(name) = &self.env
            && let Ok(value) = env::var(name)
            && !value.trim().is_empty()
        {
            return Ok(Some(value));
        }
        let Some(file) = &self.file else {
            return Ok(None);
        };
        let path = if file.is_relative() {
            base_dir.join(file)
        } else {
            file.clone()
        };
        let value = fs::read_to_string(&path)
            .with_context(|| format!("failed to read secret file {}", path.display()))?;
        Ok(Some(value))
    }

    /// Human description used in "missing secret" errors.
    pub fn describe(&self) -> String {
        match (&self.env, &self.file) {
            (Some(env), Some(file)) => format!("${env} or {}", file.display()),
            (Some(env), None) => format!("${env}"),
            (None, Some(file)) => file.display().to_string(),
            (None, None) => "no source configured".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct AppleSecrets {
    pub signer_cert: SecretRef,
    pub signer_key: SecretRef,
    pub wwdr_cert: SecretRef,
}

impl Default for AppleSecrets {
    fn default() -> Self {
        Self {
            signer_cert: SecretRef::env(SIGNER_CERT_ENV),
            signer_key: SecretRef::env(SIGNER_KEY_ENV),
            wwdr_cert: SecretRef::env(WWDR_CERT_ENV),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct GoogleSettings {
    pub credentials: SecretRef,
    #[serde(flatten)]
    pub endpoints: GoogleEndpoints,
    pub timeout_secs: u64,
}

impl Default for GoogleSettings {
    fn default() -> Self {
        Self {
            credentials: SecretRef::env(GOOGLE_CREDENTIALS_ENV),
            endpoints: GoogleEndpoints::default(),
            timeout_secs: DEFAULT_REST_TIMEOUT.as_secs(),
        }
    }
}

impl GoogleSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ImageSettings {
    pub timeout_secs: u64,
    pub retries: u32,
}

impl Default for ImageSettings {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_FETCH_TIMEOUT.as_secs(),
            retries: DEFAULT_FETCH_RETRIES,
        }
    }
}

impl ImageSettings {
    pub fn fetch_options(&self) -> ImageFetchOptions {
        ImageFetchOptions {
            timeout: Duration::from_secs(self.timeout_secs),
            retries: self.retries,
        }
    }
}

/// Contents of `walletc.toml`. Every section is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct WalletcConfig {
    pub apple: AppleSecrets,
    pub google: GoogleSettings,
    pub images: ImageSettings,
}

/// A parsed config plus where it came from.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: WalletcConfig,
    pub source: Option<PathBuf>,
    /// Directory relative secret files resolve against.
    pub base_dir: PathBuf,
}

/// Picks the config file: `--service-config`, then `$WALLETC_CONFIG`, then
/// `./walletc.toml` if it exists. No file at all means defaults.
pub fn load_config(cli_path: Option<&Path>, cwd: &Path) -> Result<LoadedConfig> {
    let explicit = cli_path
        .map(Path::to_path_buf)
        .or_else(|| env::var_os(CONFIG_ENV).map(PathBuf::from));
    let path = match explicit {
        Some(path) => {
            let path = if path.is_relative() { cwd.join(path) } else { path };
            if !path.is_file() {
                bail!("config file {} does not exist", path.display());
            }
            Some(path)
        }
        None => Some(cwd.join(DEFAULT_CONFIG_FILE)).filter(|path| path.is_file()),
    };

    let Some(path) = path else {
        return Ok(LoadedConfig {
            config: WalletcConfig::default(),
            source: None,
            base_dir: cwd.to_path_buf(),
        });
    };

    let contents = fs::read_to_string(&path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let config: WalletcConfig = toml::from_str(&contents)
        .with_context(|| format!("{} is not a valid walletc config", path.display()))?;
    let base_dir = path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| cwd.to_path_buf());
    Ok(LoadedConfig {
        config,
        source: Some(path),
        base_dir,
    })
}
