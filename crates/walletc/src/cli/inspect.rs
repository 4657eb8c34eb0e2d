#![forbid(unsafe_code)]

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use wallet_pass::open_pass;

#[derive(Debug, Parser)]
pub struct InspectArgs {
    /// Path to a .pkpass archive
    #[arg(value_name = "FILE")]
    pub path: PathBuf,
}

pub fn handle(args: InspectArgs, json: bool) -> Result<()> {
    let bytes =
        fs::read(&args.path).with_context(|| format!("failed to read {}", args.path.display()))?;
    let inspection = open_pass(&bytes)
        .with_context(|| format!("{} failed verification", args.path.display()))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&inspection)?);
        return Ok(());
    }

    let pass = &inspection.pass_json;
    println!("pass verified: {}", args.path.display());
    for key in ["serialNumber", "passTypeIdentifier", "teamIdentifier", "organizationName"] {
        if let Some(value) = pass.get(key).and_then(|value| value.as_str()) {
            println!("  {key}: {value}");
        }
    }
    println!("  signer: {}", inspection.signature.signer_subject);
    if let Some(signed_at) = inspection.signature.signing_time {
        println!("  signed at: {signed_at}");
    }
    println!("  entries:");
    for entry in &inspection.entries {
        match inspection.manifest.get(entry) {
            Some(hash) => println!("    {entry}  {hash}"),
            None => println!("    {entry}"),
        }
    }
    Ok(())
}
