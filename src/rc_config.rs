use std::path::Path;

use serde::Deserialize;

/// Defaults loaded from a `.fedsyncrc` TOML file.
///
/// Looked up first next to the enrollment config, then in `$HOME`.
/// CLI flags always take precedence over file values.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RcConfig {
    pub verbose: Option<bool>,
    pub json: Option<bool>,
    pub no_color: Option<bool>,
    pub require_valid_signature: Option<bool>,
    pub timeout_secs: Option<u64>,
}

impl RcConfig {
    /// Load `.fedsyncrc` from the config directory, falling back to `$HOME`.
    pub fn load(config_dir: &Path) -> Self {
        let candidates = [
            Some(config_dir.join(".fedsyncrc")),
            dirs_home().map(|h| h.join(".fedsyncrc")),
        ];

        for candidate in candidates.iter().flatten() {
            if let Ok(contents) = std::fs::read_to_string(candidate) {
                match toml::from_str::<RcConfig>(&contents) {
                    Ok(cfg) => return cfg,
                    // Logging is not set up yet at this point
                    Err(e) => eprintln!("Warning: ignoring {}: {}", candidate.display(), e),
                }
            }
        }

        RcConfig::default()
    }
}

fn dirs_home() -> Option<std::path::PathBuf> {
    std::env::var_os("HOME").map(std::path::PathBuf::from)
}
