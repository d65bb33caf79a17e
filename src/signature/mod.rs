//! XML-DSig verification of the metadata document against a pinned trust anchor.
//!
//! Only the external anchor is ever used as the verification key; any
//! `KeyInfo` inside the signature is ignored.

mod c14n;

use anyhow::{Context, Result};
use base64::Engine;
use chrono::Utc;
use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;
use rsa::pkcs1v15;
use rsa::pkcs8::DecodePublicKey;
use rsa::signature::Verifier;
use rsa::RsaPublicKey;
use serde::Serialize;
use sha2::{Digest, Sha256, Sha384, Sha512};
use std::path::Path;
use thiserror::Error;

use crate::parsers::certificate;
use c14n::{Mode, Options, Subtree};

const ENVELOPED: &str = "http://www.w3.org/2000/09/xmldsig#enveloped-signature";
const C14N: &str = "http://www.w3.org/TR/2001/REC-xml-c14n-20010315";
const C14N_COMMENTS: &str = "http://www.w3.org/TR/2001/REC-xml-c14n-20010315#WithComments";
const EXC_C14N: &str = "http://www.w3.org/2001/10/xml-exc-c14n#";
const EXC_C14N_COMMENTS: &str = "http://www.w3.org/2001/10/xml-exc-c14n#WithComments";

#[derive(Debug, Error)]
pub enum SignatureError {
    #[error("no Signature element in document")]
    Missing,
    #[error("malformed Signature element: {0}")]
    Malformed(String),
    #[error("unsupported algorithm {0}")]
    Unsupported(String),
    #[error("digest mismatch for reference \"{0}\"")]
    DigestMismatch(String),
    #[error("signature value does not verify against the trust anchor")]
    BadSignature,
    #[error("reference does not cover the document")]
    UncoveredReference,
}

/// Result of checking the document signature, as reported for the run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum SignatureOutcome {
    Verified,
    Invalid(String),
    Missing,
}

impl SignatureOutcome {
    pub fn is_verified(&self) -> bool {
        matches!(self, SignatureOutcome::Verified)
    }
}

/// RSA key of the federation's metadata signer, loaded once per run.
pub struct TrustAnchor {
    key: RsaPublicKey,
    pub subject: String,
}

impl TrustAnchor {
    pub fn load(path: &Path) -> Result<Self> {
        let cert = certificate::parse_pem_file(path)
            .with_context(|| format!("Failed to load trust anchor {}", path.display()))?;
        if cert.not_after < Utc::now() {
            tracing::warn!(
                anchor = %path.display(),
                expired = %cert.not_after.format("%Y-%m-%d"),
                "trust anchor certificate has expired"
            );
        }
        let key = RsaPublicKey::from_public_key_der(&cert.spki)
            .map_err(|e| anyhow::anyhow!("Trust anchor {} is not an RSA key: {}", path.display(), e))?;
        Ok(Self {
            key,
            subject: cert.subject,
        })
    }
}

/// Verify the signature and log the outcome. Never fails the run by itself.
pub fn check(xml: &str, anchor: &TrustAnchor) -> SignatureOutcome {
    match verify(xml, anchor) {
        Ok(()) => {
            tracing::info!(anchor = %anchor.subject, "metadata signature verified");
            SignatureOutcome::Verified
        }
        Err(SignatureError::Missing) => {
            tracing::error!("metadata is not signed");
            SignatureOutcome::Missing
        }
        Err(e) => {
            tracing::error!(error = %e, "Bad signature or metadata");
            SignatureOutcome::Invalid(e.to_string())
        }
    }
}

pub fn verify(xml: &str, anchor: &TrustAnchor) -> Result<(), SignatureError> {
    let sig = SignatureInfo::locate(xml)?;

    // Only a signature directly under the document element, over that element, counts
    if !sig.child_of_root {
        return Err(SignatureError::UncoveredReference);
    }
    let reference = match sig.reference_uri.as_str() {
        "" => Subtree::Document,
        uri => match uri.strip_prefix('#') {
            Some(id) if sig.root_ids.iter().any(|root_id| root_id == id) => Subtree::ElementId(id.to_string()),
            Some(id) if !id.is_empty() => return Err(SignatureError::UncoveredReference),
            _ => return Err(SignatureError::Unsupported(format!("reference URI {}", uri))),
        },
    };

    let mut enveloped = false;
    // A reference without an explicit c14n transform is serialized with inclusive C14N
    let mut reference_c14n = options_for(C14N, Vec::new())?;
    for (algorithm, prefixes) in &sig.transforms {
        if algorithm == ENVELOPED {
            enveloped = true;
        } else {
            reference_c14n = options_for(algorithm, prefixes.clone())?;
        }
    }

    let referenced = c14n::canonicalize(xml, &reference, enveloped.then_some(0), &reference_c14n)
        .map_err(|e| SignatureError::Malformed(format!("{:#}", e)))?;
    let digest = digest(&sig.digest_method, referenced.as_bytes())?;
    let expected = decode_b64(&sig.digest_value, "DigestValue")?;
    if digest != expected {
        return Err(SignatureError::DigestMismatch(sig.reference_uri));
    }

    let signed_info_c14n = options_for(&sig.canonicalization, sig.signed_info_prefixes.clone())?;
    let signed_info = c14n::canonicalize(xml, &Subtree::SignedInfo { signature: 0 }, None, &signed_info_c14n)
        .map_err(|e| SignatureError::Malformed(format!("{:#}", e)))?;
    let value = decode_b64(&sig.signature_value, "SignatureValue")?;
    let signature = pkcs1v15::Signature::try_from(value.as_slice()).map_err(|_| SignatureError::BadSignature)?;

    let key = anchor.key.clone();
    let result = match sig.signature_method.as_str() {
        "http://www.w3.org/2001/04/xmldsig-more#rsa-sha256" => {
            pkcs1v15::VerifyingKey::<Sha256>::new(key).verify(signed_info.as_bytes(), &signature)
        }
        "http://www.w3.org/2001/04/xmldsig-more#rsa-sha384" => {
            pkcs1v15::VerifyingKey::<Sha384>::new(key).verify(signed_info.as_bytes(), &signature)
        }
        "http://www.w3.org/2001/04/xmldsig-more#rsa-sha512" => {
            pkcs1v15::VerifyingKey::<Sha512>::new(key).verify(signed_info.as_bytes(), &signature)
        }
        other => return Err(SignatureError::Unsupported(other.to_string())),
    };
    result.map_err(|_| SignatureError::BadSignature)
}

fn options_for(algorithm: &str, inclusive_prefixes: Vec<String>) -> Result<Options, SignatureError> {
    let (mode, with_comments) = match algorithm {
        C14N => (Mode::Inclusive, false),
        C14N_COMMENTS => (Mode::Inclusive, true),
        EXC_C14N => (Mode::Exclusive, false),
        EXC_C14N_COMMENTS => (Mode::Exclusive, true),
        other => return Err(SignatureError::Unsupported(other.to_string())),
    };
    Ok(Options {
        mode,
        with_comments,
        inclusive_prefixes,
    })
}

fn digest(algorithm: &str, data: &[u8]) -> Result<Vec<u8>, SignatureError> {
    match algorithm {
        "http://www.w3.org/2001/04/xmlenc#sha256" => Ok(Sha256::digest(data).to_vec()),
        "http://www.w3.org/2001/04/xmldsig-more#sha384" => Ok(Sha384::digest(data).to_vec()),
        "http://www.w3.org/2001/04/xmlenc#sha512" => Ok(Sha512::digest(data).to_vec()),
        other => Err(SignatureError::Unsupported(other.to_string())),
    }
}

fn decode_b64(text: &str, element: &str) -> Result<Vec<u8>, SignatureError> {
    let compact: String = text.chars().filter(|c| !c.is_whitespace()).collect();
    base64::engine::general_purpose::STANDARD
        .decode(compact)
        .map_err(|e| SignatureError::Malformed(format!("{} is not base64: {}", element, e)))
}

/// The parts of the first `<ds:Signature>` needed for verification.
#[derive(Debug, Default)]
struct SignatureInfo {
    canonicalization: String,
    signed_info_prefixes: Vec<String>,
    signature_method: String,
    reference_uri: String,
    /// `(algorithm, InclusiveNamespaces prefixes)` in document order
    transforms: Vec<(String, Vec<String>)>,
    digest_method: String,
    digest_value: String,
    signature_value: String,
    /// `ID`, `Id` and `id` values of the document element
    root_ids: Vec<String>,
    child_of_root: bool,
}

impl SignatureInfo {
    fn locate(xml: &str) -> Result<Self, SignatureError> {
        let mut reader = Reader::from_str(xml);
        let mut info = SignatureInfo::default();
        let mut stack: Vec<String> = Vec::new();
        let mut signature_depth: Option<usize> = None;
        let mut references = 0usize;
        let mut text: Option<String> = None;

        loop {
            let event = reader
                .read_event()
                .map_err(|e| SignatureError::Malformed(e.to_string()))?;
            match event {
                Event::Eof => break,
                Event::Start(e) if signature_depth.is_none() => {
                    let name = local_name(&e);
                    if stack.is_empty() {
                        info.root_ids = ["ID", "Id", "id"]
                            .iter()
                            .filter_map(|attr| get_attr(&e, attr))
                            .collect();
                    }
                    if name == "Signature" {
                        signature_depth = Some(stack.len());
                        info.child_of_root = stack.len() == 1;
                    }
                    stack.push(name);
                }
                Event::Empty(e) if signature_depth.is_none() => {
                    if local_name(&e) == "Signature" {
                        return Err(SignatureError::Malformed("empty Signature element".to_string()));
                    }
                }
                Event::Start(e) => {
                    let name = local_name(&e);
                    info.element(&name, &e, &stack, &mut references)?;
                    if matches!(name.as_str(), "DigestValue" | "SignatureValue") && references <= 1 {
                        text = Some(String::new());
                    }
                    stack.push(name);
                }
                Event::Empty(e) => {
                    let name = local_name(&e);
                    info.element(&name, &e, &stack, &mut references)?;
                }
                Event::Text(t) => {
                    if let Some(buf) = text.as_mut() {
                        let t = t.unescape().map_err(|e| SignatureError::Malformed(e.to_string()))?;
                        buf.push_str(&t);
                    }
                }
                Event::End(_) => {
                    let name = stack.pop().unwrap_or_default();
                    if let Some(value) = text.take() {
                        match name.as_str() {
                            "DigestValue" => info.digest_value = value,
                            "SignatureValue" => info.signature_value = value,
                            _ => text = Some(value),
                        }
                    }
                    if signature_depth == Some(stack.len()) {
                        break;
                    }
                }
                _ => {}
            }
        }

        if signature_depth.is_none() {
            return Err(SignatureError::Missing);
        }
        if references != 1 {
            return Err(SignatureError::Malformed(format!(
                "expected exactly one Reference, found {}",
                references
            )));
        }
        for (field, value) in [
            ("CanonicalizationMethod", &info.canonicalization),
            ("SignatureMethod", &info.signature_method),
            ("DigestMethod", &info.digest_method),
            ("DigestValue", &info.digest_value),
            ("SignatureValue", &info.signature_value),
        ] {
            if value.trim().is_empty() {
                return Err(SignatureError::Malformed(format!("missing {}", field)));
            }
        }
        Ok(info)
    }

    fn element(
        &mut self,
        name: &str,
        e: &BytesStart<'_>,
        stack: &[String],
        references: &mut usize,
    ) -> Result<(), SignatureError> {
        let parent = stack.last().map(String::as_str);
        match name {
            "CanonicalizationMethod" if parent == Some("SignedInfo") => {
                self.canonicalization = algorithm(e)?;
            }
            "SignatureMethod" if parent == Some("SignedInfo") => {
                self.signature_method = algorithm(e)?;
            }
            "Reference" if parent == Some("SignedInfo") => {
                *references += 1;
                if *references == 1 {
                    self.reference_uri = get_attr(e, "URI").unwrap_or_default();
                }
            }
            "Transform" if *references == 1 && parent == Some("Transforms") => {
                self.transforms.push((algorithm(e)?, Vec::new()));
            }
            "DigestMethod" if *references == 1 && parent == Some("Reference") => {
                self.digest_method = algorithm(e)?;
            }
            "InclusiveNamespaces" => {
                let prefixes: Vec<String> = get_attr(e, "PrefixList")
                    .unwrap_or_default()
                    .split_whitespace()
                    .map(String::from)
                    .collect();
                match parent {
                    Some("CanonicalizationMethod") => self.signed_info_prefixes = prefixes,
                    Some("Transform") if *references == 1 => {
                        if let Some(last) = self.transforms.last_mut() {
                            last.1 = prefixes;
                        }
                    }
                    _ => {}
                }
            }
            _ => {}
        }
        Ok(())
    }
}

fn algorithm(e: &BytesStart<'_>) -> Result<String, SignatureError> {
    get_attr(e, "Algorithm").ok_or_else(|| SignatureError::Malformed("element without Algorithm".to_string()))
}

fn local_name(e: &BytesStart<'_>) -> String {
    let full = String::from_utf8_lossy(e.name().as_ref()).to_string();
    full.rsplit(':').next().unwrap_or(&full).to_string()
}

fn get_attr(e: &BytesStart<'_>, name: &str) -> Option<String> {
    e.attributes().filter_map(|a| a.ok()).find_map(|a| {
        if a.key.as_ref() == name.as_bytes() {
            a.unescape_value().ok().map(|v| v.to_string())
        } else {
            None
        }
    })
}
