use anyhow::{Context, Result};
use base64::Engine;
use chrono::{DateTime, Utc};
use ::pem::{EncodeConfig, LineEnding, Pem};
use std::path::Path;
use x509_parser::pem::parse_x509_pem;
use x509_parser::prelude::*;

/// A decoded X.509 certificate taken from metadata or the trust anchor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCertificate {
    pub der: Vec<u8>,
    /// DER-encoded SubjectPublicKeyInfo
    pub spki: Vec<u8>,
    pub not_after: DateTime<Utc>,
    pub subject: String,
}

impl ParsedCertificate {
    pub fn from_der(der: Vec<u8>) -> Result<Self> {
        let (_, cert) = X509Certificate::from_der(&der)
            .map_err(|e| anyhow::anyhow!("X509 parse error: {}", e))?;

        let not_after = cert.validity().not_after.to_datetime();
        let spki = cert.public_key().raw.to_vec();
        let subject = cert.subject().to_string();

        Ok(Self {
            not_after: DateTime::from_timestamp(not_after.unix_timestamp(), 0).unwrap_or_default(),
            spki,
            subject,
            der,
        })
    }

    /// Decode the base64 text of a `<ds:X509Certificate>` element.
    pub fn from_base64(body: &str) -> Result<Self> {
        let compact: String = body.chars().filter(|c| !c.is_whitespace()).collect();
        let der = base64::engine::general_purpose::STANDARD
            .decode(compact)
            .context("Certificate body is not valid base64")?;
        Self::from_der(der)
    }

    pub fn to_pem(&self) -> String {
        encode_lf(Pem::new("CERTIFICATE", self.der.clone()))
    }

    /// SubjectPublicKeyInfo as a `PUBLIC KEY` PEM block.
    pub fn public_key_pem(&self) -> String {
        encode_lf(Pem::new("PUBLIC KEY", self.spki.clone()))
    }
}

fn encode_lf(block: Pem) -> String {
    ::pem::encode_config(&block, EncodeConfig::new().set_line_ending(LineEnding::LF))
}

pub fn parse_pem_file(path: &Path) -> Result<ParsedCertificate> {
    let content = std::fs::read(path)
        .with_context(|| format!("Failed to read certificate {}", path.display()))?;
    parse_pem_bytes(&content)
}

pub fn parse_pem_bytes(data: &[u8]) -> Result<ParsedCertificate> {
    let (_, pem) = parse_x509_pem(data).map_err(|e| anyhow::anyhow!("PEM parse error: {}", e))?;
    anyhow::ensure!(
        pem.label == "CERTIFICATE",
        "Expected a CERTIFICATE PEM block, found {}",
        pem.label
    );
    ParsedCertificate::from_der(pem.contents)
}
