use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

const DEFAULT_TRUST_ANCHOR: &str = "dfn-aai.pem";
const DEFAULT_OUTPUT_DIR: &str = "SPs";
const DEFAULT_METADATA_FILE: &str = "metadata.xml";

/// One SP the operator has enrolled: the entityID to look for and the
/// application name its artifacts are written under.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EnrolledSp {
    #[serde(rename = "entityID")]
    pub entity_id: String,
    pub name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawConfig {
    #[serde(default)]
    sp_metadata_url: String,
    #[serde(default)]
    webproxy: Option<String>,
    cert_file_name: String,
    #[serde(default)]
    sp: Vec<EnrolledSp>,
    trust_anchor: Option<PathBuf>,
    output_dir: Option<PathBuf>,
    metadata_file: Option<PathBuf>,
}

/// Validated enrollment configuration with all paths resolved.
#[derive(Debug, Clone)]
pub struct Config {
    pub metadata_url: String,
    pub proxy: Option<String>,
    pub cert_file_name: String,
    pub sps: Vec<EnrolledSp>,
    pub trust_anchor: PathBuf,
    pub output_dir: PathBuf,
    pub metadata_file: PathBuf,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
        Self::from_json(&contents, base_dir)
            .with_context(|| format!("Invalid config {}", path.display()))
    }

    pub fn from_json(contents: &str, base_dir: &Path) -> Result<Self> {
        let raw: RawConfig = serde_json::from_str(contents)?;

        if raw.cert_file_name.trim().is_empty() {
            bail!("certFileName must not be empty");
        }
        let mut seen = HashSet::new();
        for sp in &raw.sp {
            if sp.name.trim().is_empty() {
                bail!("SP {} has an empty name", sp.entity_id);
            }
            if sp.name.contains(['/', '\\']) || sp.name == "." || sp.name == ".." {
                bail!("SP name {:?} must not contain path separators", sp.name);
            }
            if sp.entity_id.trim().is_empty() {
                bail!("SP {} has an empty entityID", sp.name);
            }
            if !seen.insert(sp.name.as_str()) {
                bail!("SP name {:?} is enrolled more than once", sp.name);
            }
        }

        let resolve = |p: Option<PathBuf>, default: &str| {
            let p = p.unwrap_or_else(|| PathBuf::from(default));
            if p.is_absolute() {
                p
            } else {
                base_dir.join(p)
            }
        };

        Ok(Self {
            metadata_url: raw.sp_metadata_url,
            proxy: raw.webproxy.filter(|p| !p.trim().is_empty()),
            cert_file_name: raw.cert_file_name,
            sps: raw.sp,
            trust_anchor: resolve(raw.trust_anchor, DEFAULT_TRUST_ANCHOR),
            output_dir: resolve(raw.output_dir, DEFAULT_OUTPUT_DIR),
            metadata_file: resolve(raw.metadata_file, DEFAULT_METADATA_FILE),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEPLOYED: &str = r#"{
        "spMetadataUrl": "https://www.aai.dfn.de/metadata/dfn-aai-sp-metadata.xml",
        "webproxy": "",
        "certFileName": "sp-signing",
        "sp": [
            { "entityID": "https://sp1.example.org/shibboleth", "name": "ServiceOne" },
            { "entityID": "https://sp2.example.org/shibboleth", "name": "ServiceTwo" }
        ]
    }"#;

    #[test]
    fn loads_deployed_format_with_defaults() {
        let cfg = Config::from_json(DEPLOYED, Path::new("/etc/fedsync")).unwrap();
        assert_eq!(cfg.cert_file_name, "sp-signing");
        assert_eq!(cfg.proxy, None);
        assert_eq!(cfg.sps.len(), 2);
        assert_eq!(cfg.sps[1].entity_id, "https://sp2.example.org/shibboleth");
        assert_eq!(cfg.trust_anchor, PathBuf::from("/etc/fedsync/dfn-aai.pem"));
        assert_eq!(cfg.output_dir, PathBuf::from("/etc/fedsync/SPs"));
        assert_eq!(cfg.metadata_file, PathBuf::from("/etc/fedsync/metadata.xml"));
    }

    #[test]
    fn absolute_paths_are_kept() {
        let json = r#"{ "certFileName": "x", "outputDir": "/srv/sps", "webproxy": "http://proxy:3128" }"#;
        let cfg = Config::from_json(json, Path::new("/etc/fedsync")).unwrap();
        assert_eq!(cfg.output_dir, PathBuf::from("/srv/sps"));
        assert_eq!(cfg.proxy.as_deref(), Some("http://proxy:3128"));
        assert!(cfg.sps.is_empty());
    }

    #[test]
    fn rejects_empty_cert_file_name() {
        let json = r#"{ "certFileName": " ", "sp": [] }"#;
        assert!(Config::from_json(json, Path::new(".")).is_err());
    }

    #[test]
    fn rejects_path_like_and_duplicate_names() {
        let traversal = r#"{ "certFileName": "x", "sp": [{ "entityID": "a", "name": "../etc" }] }"#;
        let err = Config::from_json(traversal, Path::new(".")).unwrap_err();
        assert!(err.to_string().contains("path separators"));

        let dup = r#"{ "certFileName": "x", "sp": [
            { "entityID": "a", "name": "Same" }, { "entityID": "b", "name": "Same" }
        ] }"#;
        let err = Config::from_json(dup, Path::new(".")).unwrap_err();
        assert!(err.to_string().contains("more than once"));
    }

    #[test]
    fn missing_file_names_the_path() {
        let err = Config::load(Path::new("/nonexistent/config.json")).unwrap_err();
        assert!(format!("{:#}", err).contains("/nonexistent/config.json"));
    }
}
