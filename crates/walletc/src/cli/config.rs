#![forbid(unsafe_code)]

use anyhow::Result;
use clap::Parser;

use crate::runtime::RuntimeContext;

#[derive(Debug, Clone, Parser)]
pub struct ConfigArgs {}

pub fn handle(_args: ConfigArgs, json: bool, runtime: &RuntimeContext) -> Result<()> {
    let secrets = runtime.secret_statuses();
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "source": runtime.config_path,
                "base_dir": runtime.base_dir,
                "google": {
                    "token_url": runtime.config.google.endpoints.token_url,
                    "api_base": runtime.config.google.endpoints.api_base,
                    "timeout_secs": runtime.config.google.timeout_secs,
                },
                "images": runtime.config.images,
                "secrets": secrets,
            }))?
        );
        return Ok(());
    }

    match &runtime.config_path {
        Some(path) => println!("config: {}", path.display()),
        None => println!("config: defaults (no walletc.toml found)"),
    }
    println!("  google token url: {}", runtime.config.google.endpoints.token_url);
    println!("  google api base: {}", runtime.config.google.endpoints.api_base);
    println!(
        "  image fetch: timeout {}s, {} retries",
        runtime.config.images.timeout_secs, runtime.config.images.retries
    );
    println!("  secrets:");
    for secret in secrets {
        let state = if secret.available { "available" } else { "missing" };
        println!("    {}: {state} ({})", secret.name, secret.source);
    }
    Ok(())
}
