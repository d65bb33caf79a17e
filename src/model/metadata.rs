/// Parsed representation of a federation metadata feed
#[derive(Debug, Default)]
pub struct MetadataDocument {
    pub entities: Vec<EntityDescriptor>,
}

/// One `<EntityDescriptor>` of the feed
#[derive(Debug, Default)]
pub struct EntityDescriptor {
    pub entity_id: String,
    /// The first `<SPSSODescriptor>` of the entity, if any
    pub sp: Option<SpDescriptor>,
    pub contacts: Vec<ContactPerson>,
}

#[derive(Debug, Default)]
pub struct SpDescriptor {
    pub certificates: Vec<CertificateCandidate>,
    pub assertion_consumer_service: Option<String>,
    pub information_url: Option<String>,
    pub logo: Option<String>,
    pub requested_attributes: Vec<RequestedAttribute>,
}

/// A `<ds:X509Certificate>` element together with its key context
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CertificateCandidate {
    /// Base64 body exactly as found in the element text
    pub body: String,
    /// `use` of the certificate element itself or of the enclosing `<KeyDescriptor>`
    pub key_use: Option<String>,
    /// `<ds:KeyName>` of the enclosing `<ds:KeyInfo>`
    pub key_name: Option<String>,
}

impl CertificateCandidate {
    /// Body with all whitespace stripped, ready for base64 decoding.
    pub fn compact_body(&self) -> String {
        self.body.chars().filter(|c| !c.is_whitespace()).collect()
    }

    pub fn is_signing_or_encryption(&self) -> bool {
        self.key_use
            .as_deref()
            .is_some_and(|u| u.contains("signing") || u.contains("encryption"))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContactPerson {
    pub contact_type: Option<String>,
    /// Raw `<EmailAddress>` text, usually `mailto:user@example.org`
    pub email: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestedAttribute {
    pub friendly_name: Option<String>,
    pub is_required: Option<String>,
}
