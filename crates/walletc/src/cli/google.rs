#![forbid(unsafe_code)]

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use wallet_pass::{GooglePassRequest, issue_google_pass};

use super::input::{load_runner, load_wallet_config};
use crate::runtime::RuntimeContext;

#[derive(Debug, Parser)]
pub struct GoogleArgs {
    /// Runner record JSON
    #[arg(long, value_name = "FILE")]
    pub runner: PathBuf,

    /// Event wallet config JSON
    #[arg(long, value_name = "FILE")]
    pub config: PathBuf,

    /// Push the object to Google for a pass the runner already saved
    #[arg(long)]
    pub update: bool,

    /// Only sign the save link; skip every Google REST call
    #[arg(long)]
    pub offline: bool,
}

pub async fn handle(args: GoogleArgs, json: bool, runtime: &RuntimeContext) -> Result<()> {
    let runner = load_runner(&args.runner)?;
    let config = load_wallet_config(&args.config)?;
    let account = runtime.google_account()?;
    let rest = if args.offline {
        None
    } else {
        Some(runtime.rest_client()?)
    };

    let request = GooglePassRequest::new(runner, config, account).updating(args.update);
    let link = issue_google_pass(request, rest.as_ref())
        .await
        .context("failed to issue Google pass")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&link)?);
    } else {
        println!(
            "{}\n  object: {}\n  link: {}",
            link.message, link.object_id, link.save_to_google_wallet_link
        );
    }
    Ok(())
}
