use clap::Parser;
use std::path::PathBuf;

/// Federation metadata to SP artifact synchronizer
#[derive(Parser, Debug)]
#[command(
    name = "fedsync",
    version,
    about = "Reconcile SAML federation metadata into per-SP artifact files",
    long_about = "Downloads the federation's SP metadata feed, verifies its signature against \
                  a pinned trust anchor and, for every enrolled SP, writes a fingerprinted \
                  JSON descriptor plus its signing certificate and public key. Artifacts of \
                  SPs that are no longer enrolled are deleted.",
    after_help = "\
EXAMPLES:
  fedsync                                 Use ./config.json
  fedsync /etc/fedsync/config.json -v     Also list unchanged SPs
  fedsync --metadata feed.xml --json      Process a local feed, report as JSON
  fedsync --require-valid-signature       Abort if the feed signature fails

EXIT CODES:
  0  Run completed, every enrolled SP in the feed was written or unchanged
  1  Run completed, but an SP was skipped or the signature did not verify
  2  Fatal failure (config, metadata, trust anchor, strict signature check)

LOGGING:
  Diagnostics go to stderr. Set RUST_LOG (e.g. RUST_LOG=fedsync=debug) to
  change verbosity."
)]
pub struct Cli {
    /// Enrollment configuration (JSON)
    #[arg(default_value = "config.json", value_name = "CONFIG")]
    pub config: PathBuf,

    /// Use a local metadata document instead of downloading spMetadataUrl
    #[arg(long, value_name = "FILE")]
    pub metadata: Option<PathBuf>,

    /// Directory the artifacts are written to (overrides outputDir)
    #[arg(long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// PEM certificate of the metadata signer (overrides trustAnchor)
    #[arg(long, value_name = "PEM")]
    pub trust_anchor: Option<PathBuf>,

    /// Timeout in seconds for each network request
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Treat a missing or invalid metadata signature as fatal
    #[arg(long)]
    pub require_valid_signature: bool,

    /// Output the run report as JSON (for scripting and CI)
    #[arg(long)]
    pub json: bool,

    /// Disable colored output
    #[arg(long)]
    pub no_color: bool,

    /// Also list unchanged SPs and enable debug logging
    #[arg(short, long)]
    pub verbose: bool,
}
