use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use wallet_pass::{RunnerRecord, WalletConfig};

fn read_json<T: DeserializeOwned>(path: &Path, what: &str) -> Result<T> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read {what} {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("{} is not a valid {what}", path.display()))
}

pub fn load_runner(path: &Path) -> Result<RunnerRecord> {
    read_json(path, "runner record")
}

pub fn load_wallet_config(path: &Path) -> Result<WalletConfig> {
    read_json(path, "wallet config")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn reads_runner_and_reports_bad_json() {
        let dir = tempdir().unwrap();
        let good = dir.path().join("runner.json");
        fs::write(&good, r#"{"access_key": "k-1", "bib": 1024}"#).unwrap();
        let runner = load_runner(&good).unwrap();
        assert_eq!(runner.text("bib").as_deref(), Some("1024"));

        let bad = dir.path().join("event.json");
        fs::write(&bad, "{ nope").unwrap();
        let err = load_wallet_config(&bad).unwrap_err();
        assert!(err.to_string().contains("is not a valid wallet config"));
    }
}
