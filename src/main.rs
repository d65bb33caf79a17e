mod cli;
mod config;
mod extract;
mod fetch;
mod model;
mod output;
mod parsers;
mod rc_config;
mod reconcile;
mod record;
mod result;
mod selector;
mod signature;
mod store;
mod sync;

use std::path::Path;
use std::process;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use colored::control;
use tracing_subscriber::EnvFilter;

use cli::Cli;
use config::Config;
use fetch::{Fetcher, HttpFetcher};
use output::OutputFormat;
use rc_config::RcConfig;
use reconcile::RunOptions;
use result::RunReport;
use signature::TrustAnchor;
use store::DirStore;

fn main() {
    let cli = Cli::parse();

    let config_dir = cli
        .config
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
        .to_path_buf();
    let rc = RcConfig::load(&config_dir);

    let verbose = cli.verbose || rc.verbose.unwrap_or(false);
    init_logging(verbose);

    if cli.no_color || rc.no_color.unwrap_or(false) {
        control::set_override(false);
    }
    let format = if cli.json || rc.json.unwrap_or(false) {
        OutputFormat::Json
    } else {
        OutputFormat::Terminal
    };

    match run(&cli, &rc) {
        Ok((report, output_dir)) => {
            output::print_report(&report, verbose, format, &output_dir);
            if report.has_errors() {
                process::exit(1);
            }
        }
        Err(e) => {
            eprintln!("Error: {:#}", e);
            process::exit(2);
        }
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "fedsync=debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn run(cli: &Cli, rc: &RcConfig) -> Result<(RunReport, std::path::PathBuf)> {
    let mut config = Config::load(&cli.config)?;
    if let Some(ref dir) = cli.output_dir {
        config.output_dir = dir.clone();
    }
    if let Some(ref anchor) = cli.trust_anchor {
        config.trust_anchor = anchor.clone();
    }

    let timeout = cli
        .timeout
        .or(rc.timeout_secs)
        .map(Duration::from_secs)
        .unwrap_or(fetch::DEFAULT_TIMEOUT);
    let fetcher = HttpFetcher::new(config.proxy.as_deref(), timeout)?;

    // Anchor first: an unreadable anchor is fatal before any network traffic
    let anchor = TrustAnchor::load(&config.trust_anchor)?;

    let xml = match cli.metadata {
        Some(ref path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read metadata {}", path.display()))?,
        None => download_metadata(&config, &fetcher)?,
    };

    let mut store = DirStore::open(&config.output_dir)?;
    let opts = RunOptions {
        sps: &config.sps,
        cert_file_name: &config.cert_file_name,
        require_valid_signature: cli.require_valid_signature || rc.require_valid_signature.unwrap_or(false),
        now: chrono::Utc::now(),
    };
    let report = reconcile::run(&xml, &anchor, &opts, &mut store, &fetcher)?;
    Ok((report, config.output_dir))
}

/// Fetch the feed and keep a copy at `metadataFile`.
fn download_metadata(config: &Config, fetcher: &dyn Fetcher) -> Result<String> {
    if config.metadata_url.trim().is_empty() {
        bail!("spMetadataUrl is not set and no --metadata file was given");
    }
    tracing::info!(url = %config.metadata_url, "downloading metadata");
    let resource = fetcher
        .fetch(&config.metadata_url)
        .context("Failed to download metadata")?;
    let xml = String::from_utf8(resource.bytes).context("Metadata is not valid UTF-8")?;
    std::fs::write(&config.metadata_file, &xml)
        .with_context(|| format!("Failed to save metadata to {}", config.metadata_file.display()))?;
    Ok(xml)
}
