//! Field extraction from one SP descriptor.

use base64::Engine;

use crate::fetch::Fetcher;
use crate::model::metadata::{ContactPerson, EntityDescriptor, RequestedAttribute, SpDescriptor};

const FALLBACK_CONTENT_TYPE: &str = "application/octet-stream";

/// Everything the record builder needs from the metadata, besides the certificate.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DescriptorFields {
    pub assertion_consumer_service: Option<String>,
    pub information_url: Option<String>,
    /// Inlined `data:` URI, empty when there is no logo or it could not be fetched
    pub logo: String,
    pub contacts: Vec<(Option<String>, Option<String>)>,
    pub required_attributes: Vec<String>,
}

pub fn extract(entity: &EntityDescriptor, sp: &SpDescriptor, fetcher: &dyn Fetcher) -> DescriptorFields {
    DescriptorFields {
        assertion_consumer_service: non_empty(sp.assertion_consumer_service.as_deref()),
        information_url: non_empty(sp.information_url.as_deref()),
        logo: sp
            .logo
            .as_deref()
            .map(|url| resolve_logo(url, fetcher))
            .unwrap_or_default(),
        contacts: contacts(&entity.contacts),
        required_attributes: required_attributes(&sp.requested_attributes),
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value.filter(|v| !v.is_empty()).map(|v| v.to_string())
}

/// Turn an mdui:Logo reference into a `data:` URI.
///
/// References that already are data URIs are kept as they are. Fetch failures
/// are logged and produce an empty logo.
pub fn resolve_logo(url: &str, fetcher: &dyn Fetcher) -> String {
    if url.is_empty() {
        return String::new();
    }
    if url.starts_with("data:") {
        return url.to_string();
    }

    match fetcher.fetch(url) {
        Ok(resource) if resource.bytes.is_empty() => {
            tracing::warn!(url, "logo response was empty");
            String::new()
        }
        Ok(resource) => {
            let content_type = resource
                .content_type
                .as_deref()
                .filter(|ct| !ct.is_empty())
                .unwrap_or(FALLBACK_CONTENT_TYPE);
            format!(
                "data:{};base64,{}",
                content_type,
                base64::engine::general_purpose::STANDARD.encode(&resource.bytes)
            )
        }
        Err(e) => {
            tracing::error!(url, error = %e, "could not fetch logo");
            String::new()
        }
    }
}

/// `(contactType, address)` with the `mailto:` scheme stripped.
fn contacts(people: &[ContactPerson]) -> Vec<(Option<String>, Option<String>)> {
    people
        .iter()
        .map(|c| {
            let address = c
                .email
                .as_deref()
                .and_then(|e| e.split(':').nth(1))
                .map(|e| e.to_string());
            (c.contact_type.clone(), address)
        })
        .collect()
}

fn required_attributes(attributes: &[RequestedAttribute]) -> Vec<String> {
    attributes
        .iter()
        .filter(|a| a.is_required.as_deref() == Some("true"))
        .map(|a| a.friendly_name.clone().unwrap_or_default())
        .collect()
}
