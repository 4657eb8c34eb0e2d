#![forbid(unsafe_code)]

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use wallet_pass::{ApplePassRequest, build_apple_pass};

use super::input::{load_runner, load_wallet_config};
use crate::runtime::RuntimeContext;

#[derive(Debug, Parser)]
pub struct AppleArgs {
    /// Runner record JSON
    #[arg(long, value_name = "FILE")]
    pub runner: PathBuf,

    /// Event wallet config JSON
    #[arg(long, value_name = "FILE")]
    pub config: PathBuf,

    /// Where to write the .pkpass (defaults to the suggested file name in the current directory)
    #[arg(long, value_name = "FILE")]
    pub out: Option<PathBuf>,
}

pub async fn handle(args: AppleArgs, json: bool, runtime: &RuntimeContext) -> Result<()> {
    let runner = load_runner(&args.runner)?;
    let config = load_wallet_config(&args.config)?;
    let identity = runtime.signing_identity()?;
    let images = runtime.image_source()?;

    let bundle = build_apple_pass(ApplePassRequest::new(runner, config, identity), &images)
        .await
        .context("failed to build Apple pass")?;

    let out = args
        .out
        .unwrap_or_else(|| PathBuf::from(&bundle.file_name));
    fs::write(&out, &bundle.bytes).with_context(|| format!("failed to write {}", out.display()))?;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "status": "built",
                "path": out,
                "serial_number": bundle.serial_number,
                "entries": bundle.entries,
                "bytes": bundle.bytes.len(),
            }))?
        );
    } else {
        println!(
            "built pass\n  path: {}\n  serial: {}\n  entries: {}",
            out.display(),
            bundle.serial_number,
            bundle.entries.join(", ")
        );
    }
    Ok(())
}
