use std::fmt;

use crate::config::EnrolledSp;
use crate::extract::DescriptorFields;
use crate::model::sp_record::*;
use crate::parsers::certificate::ParsedCertificate;

/// A mandatory field that was absent when building an SP record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissingField {
    Certificate,
    PublicKey,
    Logo,
    AssertionConsumerService,
    InformationUrl,
}

impl fmt::Display for MissingField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MissingField::Certificate => write!(f, "Invalid or no certificate found"),
            MissingField::PublicKey => write!(f, "No public key found"),
            MissingField::Logo => write!(f, "No logo found"),
            MissingField::AssertionConsumerService => write!(f, "No assertion consumer service found"),
            MissingField::InformationUrl => write!(f, "No info/login found"),
        }
    }
}

/// Record plus the trust material that is written next to it.
#[derive(Debug, Clone, PartialEq)]
pub struct BuiltRecord {
    pub record: SpRecord,
    pub certificate_pem: String,
    pub public_key_pem: String,
}

pub fn cert_file(name: &str, cert_file_name: &str) -> String {
    format!("{}-{}.crt", name, cert_file_name)
}

pub fn pub_file(name: &str, cert_file_name: &str) -> String {
    format!("{}-{}.pub", name, cert_file_name)
}

/// Check completeness and assemble the record with the fixed policy defaults.
///
/// Every missing mandatory field is logged and returned; no record is produced
/// unless all of them are present.
pub fn build(
    sp: &EnrolledSp,
    certificate: Option<&ParsedCertificate>,
    fields: &DescriptorFields,
    cert_file_name: &str,
) -> Result<BuiltRecord, Vec<MissingField>> {
    let public_key_pem = certificate.map(|c| c.public_key_pem()).unwrap_or_default();
    let missing = check_complete(sp, certificate, &public_key_pem, fields);
    if !missing.is_empty() {
        return Err(missing);
    }

    // check_complete guarantees these are present
    let (Some(certificate), Some(acs), Some(info)) = (
        certificate,
        fields.assertion_consumer_service.clone(),
        fields.information_url.clone(),
    ) else {
        return Err(vec![MissingField::Certificate]);
    };

    let record = SpRecord {
        appl: sp.name.clone(),
        issuer: sp.entity_id.clone(),
        url: info,
        logo: fields.logo.clone(),
        protection_requirements: "normal".to_string(),
        users: Vec::new(),
        saml_ecp: SamlEcp::default(),
        groups: Vec::new(),
        preferred_authn_context: DEFAULT_AUTHN_CONTEXT.to_string(),
        preferred_nameid_format: DEFAULT_NAMEID_FORMAT.to_string(),
        single_logout_service: String::new(),
        logout_response_url: String::new(),
        assertion_consumer_service: acs,
        add_attribute_value_definition: true,
        send_error_response: true,
        visible: true,
        secure: false,
        cert: cert_file(&sp.name, cert_file_name),
        public_key: pub_file(&sp.name, cert_file_name),
        oidc_client: OidcClient::default(),
        req_attr: fields.required_attributes.clone(),
        contacts: fields.contacts.clone(),
    };

    Ok(BuiltRecord {
        record,
        certificate_pem: certificate.to_pem(),
        public_key_pem,
    })
}

fn check_complete(
    sp: &EnrolledSp,
    certificate: Option<&ParsedCertificate>,
    public_key_pem: &str,
    fields: &DescriptorFields,
) -> Vec<MissingField> {
    let mut missing = Vec::new();
    let name = sp.name.as_str();

    if certificate.is_none() {
        tracing::error!(sp = name, "Invalid or no certificate found");
        missing.push(MissingField::Certificate);
    } else if public_key_pem.is_empty() {
        // A parsed certificate always carries a key; reaching this is a bug
        tracing::error!(sp = name, "No public key found for a present certificate");
        missing.push(MissingField::PublicKey);
    }
    if fields.logo.is_empty() {
        tracing::error!(sp = name, "No logo found");
        missing.push(MissingField::Logo);
    }
    if fields.assertion_consumer_service.is_none() {
        tracing::error!(sp = name, "No assertion consumer service found");
        missing.push(MissingField::AssertionConsumerService);
    }
    if fields.information_url.is_none() {
        tracing::error!(sp = name, "No info/login found");
        missing.push(MissingField::InformationUrl);
    }
    if fields.contacts.is_empty() {
        tracing::warn!(sp = name, "No contact information found, record is created without contact");
    }

    missing
}
