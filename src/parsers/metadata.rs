use anyhow::Result;
use quick_xml::events::Event;
use quick_xml::reader::Reader;

use crate::model::metadata::*;

pub fn parse_str(xml: &str) -> Result<MetadataDocument> {
    let mut reader = Reader::from_str(xml);
    let mut state = ParseState::default();
    let mut saw_root = false;

    loop {
        match reader.read_event() {
            Err(e) => anyhow::bail!("XML parse error at position {}: {}", reader.error_position(), e),
            Ok(Event::Eof) => break,
            Ok(Event::Start(e)) => {
                saw_root = true;
                let name = local_name(&e);
                state.start(&name, &e);
                state.stack.push(name);
            }
            Ok(Event::Empty(e)) => {
                saw_root = true;
                let name = local_name(&e);
                state.start(&name, &e);
                state.end(&name);
            }
            Ok(Event::End(_)) => {
                if let Some(name) = state.stack.pop() {
                    state.end(&name);
                }
            }
            Ok(Event::Text(t)) => {
                if let Some((_, ref mut buf)) = state.capture {
                    let text = t
                        .unescape()
                        .map_err(|e| anyhow::anyhow!("XML text error at position {}: {}", reader.error_position(), e))?;
                    buf.push_str(&text);
                }
            }
            Ok(Event::CData(c)) => {
                if let Some((_, ref mut buf)) = state.capture {
                    buf.push_str(&String::from_utf8_lossy(&c));
                }
            }
            _ => {}
        }
    }

    anyhow::ensure!(saw_root, "Metadata document has no root element");
    anyhow::ensure!(state.stack.is_empty(), "Metadata document ended with unclosed elements");

    Ok(MetadataDocument {
        entities: state.entities,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Capture {
    Certificate,
    KeyName,
    InformationUrl,
    Logo,
    Email,
}

#[derive(Default)]
struct KeyInfoState {
    key_name: Option<String>,
    certificates: Vec<CertificateCandidate>,
}

#[derive(Default)]
struct ParseState {
    stack: Vec<String>,
    entities: Vec<EntityDescriptor>,
    entity: Option<EntityDescriptor>,
    /// Depth of the open `<SPSSODescriptor>` being collected
    sp_depth: Option<usize>,
    key_use: Option<String>,
    key_info: Option<KeyInfoState>,
    pending_cert_use: Option<String>,
    contact: Option<ContactPerson>,
    capture: Option<(Capture, String)>,
}

impl ParseState {
    fn in_sp(&self) -> bool {
        self.sp_depth.is_some()
    }

    fn sp_mut(&mut self) -> Option<&mut SpDescriptor> {
        if !self.in_sp() {
            return None;
        }
        self.entity.as_mut().and_then(|e| e.sp.as_mut())
    }

    fn start(&mut self, name: &str, e: &quick_xml::events::BytesStart<'_>) {
        match name {
            "EntityDescriptor" => {
                self.entity = Some(EntityDescriptor {
                    entity_id: get_attr(e, "entityID").unwrap_or_default(),
                    ..Default::default()
                });
            }
            "SPSSODescriptor" => {
                // Only the first SP role of an entity is considered
                if let Some(entity) = self.entity.as_mut() {
                    if entity.sp.is_none() {
                        entity.sp = Some(SpDescriptor::default());
                        self.sp_depth = Some(self.stack.len());
                    }
                }
            }
            "KeyDescriptor" if self.in_sp() => {
                self.key_use = get_attr(e, "use");
            }
            "KeyInfo" if self.in_sp() => {
                self.key_info = Some(KeyInfoState::default());
            }
            "KeyName" if self.key_info.is_some() => {
                self.capture = Some((Capture::KeyName, String::new()));
            }
            "X509Certificate" if self.in_sp() => {
                self.pending_cert_use = get_attr(e, "use").or_else(|| self.key_use.clone());
                self.capture = Some((Capture::Certificate, String::new()));
            }
            "AssertionConsumerService" => {
                if let Some(sp) = self.sp_mut() {
                    if sp.assertion_consumer_service.is_none() {
                        sp.assertion_consumer_service = Some(get_attr(e, "Location").unwrap_or_default());
                    }
                }
            }
            "InformationURL" if self.in_sp() => {
                self.capture = Some((Capture::InformationUrl, String::new()));
            }
            "Logo" if self.in_sp() => {
                self.capture = Some((Capture::Logo, String::new()));
            }
            "RequestedAttribute" => {
                let attribute = RequestedAttribute {
                    friendly_name: get_attr(e, "FriendlyName"),
                    is_required: get_attr(e, "isRequired"),
                };
                if let Some(sp) = self.sp_mut() {
                    sp.requested_attributes.push(attribute);
                }
            }
            "ContactPerson" if self.entity.is_some() => {
                self.contact = Some(ContactPerson {
                    contact_type: get_attr(e, "contactType"),
                    email: None,
                });
            }
            "EmailAddress" if self.contact.is_some() => {
                self.capture = Some((Capture::Email, String::new()));
            }
            _ => {}
        }
    }

    fn end(&mut self, name: &str) {
        match name {
            "EntityDescriptor" => {
                if let Some(entity) = self.entity.take() {
                    self.entities.push(entity);
                }
                self.sp_depth = None;
            }
            "SPSSODescriptor" => {
                if self.sp_depth == Some(self.stack.len()) {
                    self.sp_depth = None;
                }
            }
            "KeyDescriptor" => {
                self.key_use = None;
            }
            "KeyInfo" => {
                if let Some(info) = self.key_info.take() {
                    let key_name = info.key_name;
                    let certs = info.certificates.into_iter().map(|mut c| {
                        c.key_name = key_name.clone();
                        c
                    });
                    let certs: Vec<_> = certs.collect();
                    if let Some(sp) = self.sp_mut() {
                        sp.certificates.extend(certs);
                    }
                }
            }
            "ContactPerson" => {
                if let (Some(contact), Some(entity)) = (self.contact.take(), self.entity.as_mut()) {
                    entity.contacts.push(contact);
                }
            }
            "KeyName" | "X509Certificate" | "InformationURL" | "Logo" | "EmailAddress" => {
                self.finish_capture(name);
            }
            _ => {}
        }
    }

    fn finish_capture(&mut self, name: &str) {
        let Some((kind, text)) = self.capture.take() else {
            return;
        };
        let expected = match kind {
            Capture::Certificate => "X509Certificate",
            Capture::KeyName => "KeyName",
            Capture::InformationUrl => "InformationURL",
            Capture::Logo => "Logo",
            Capture::Email => "EmailAddress",
        };
        if expected != name {
            self.capture = Some((kind, text));
            return;
        }

        match kind {
            Capture::Certificate => {
                let candidate = CertificateCandidate {
                    body: text,
                    key_use: self.pending_cert_use.take(),
                    key_name: None,
                };
                if let Some(info) = self.key_info.as_mut() {
                    info.certificates.push(candidate);
                } else if let Some(sp) = self.sp_mut() {
                    sp.certificates.push(candidate);
                }
            }
            Capture::KeyName => {
                if let Some(info) = self.key_info.as_mut() {
                    if info.key_name.is_none() {
                        info.key_name = Some(text.trim().to_string());
                    }
                }
            }
            Capture::InformationUrl => {
                if let Some(sp) = self.sp_mut() {
                    sp.information_url.get_or_insert_with(|| text.trim().to_string());
                }
            }
            Capture::Logo => {
                if let Some(sp) = self.sp_mut() {
                    sp.logo.get_or_insert_with(|| text.trim().to_string());
                }
            }
            Capture::Email => {
                if let Some(contact) = self.contact.as_mut() {
                    contact.email.get_or_insert_with(|| text.trim().to_string());
                }
            }
        }
    }
}

fn local_name(e: &quick_xml::events::BytesStart<'_>) -> String {
    let full = String::from_utf8_lossy(e.name().as_ref()).to_string();
    full.rsplit(':').next().unwrap_or(&full).to_string()
}

fn get_attr(e: &quick_xml::events::BytesStart<'_>, name: &str) -> Option<String> {
    e.attributes().filter_map(|a| a.ok()).find_map(|a| {
        let key = String::from_utf8_lossy(a.key.as_ref()).to_string();
        let local_key = key.rsplit(':').next().unwrap_or(&key);
        if local_key == name {
            let value = a
                .unescape_value()
                .map(|v| v.to_string())
                .unwrap_or_else(|_| String::from_utf8_lossy(&a.value).to_string());
            Some(value)
        } else {
            None
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const FEED: &str = r#"<?xml version="1.0"?>
    <md:EntitiesDescriptor xmlns:md="urn:oasis:names:tc:SAML:2.0:metadata"
        xmlns:ds="http://www.w3.org/2000/09/xmldsig#"
        xmlns:mdui="urn:oasis:names:tc:SAML:metadata:ui">
      <md:EntityDescriptor entityID="https://sp.example.org/shibboleth">
        <md:SPSSODescriptor protocolSupportEnumeration="urn:oasis:names:tc:SAML:2.0:protocol">
          <md:Extensions>
            <mdui:UIInfo>
              <mdui:InformationURL xml:lang="de">https://sp.example.org/de</mdui:InformationURL>
              <mdui:InformationURL xml:lang="en">https://sp.example.org/en</mdui:InformationURL>
              <mdui:Logo height="16" width="16">https://sp.example.org/logo.png?a=1&amp;b=2</mdui:Logo>
            </mdui:UIInfo>
          </md:Extensions>
          <md:KeyDescriptor use="signing">
            <ds:KeyInfo>
              <ds:X509Data><ds:X509Certificate>
                AAAA
                BBBB
              </ds:X509Certificate></ds:X509Data>
              <ds:KeyName>sp-key</ds:KeyName>
            </ds:KeyInfo>
          </md:KeyDescriptor>
          <md:KeyDescriptor>
            <ds:KeyInfo><ds:X509Data><ds:X509Certificate>CCCC</ds:X509Certificate></ds:X509Data></ds:KeyInfo>
          </md:KeyDescriptor>
          <md:AssertionConsumerService Binding="urn:oasis:names:tc:SAML:2.0:bindings:HTTP-POST"
              Location="https://sp.example.org/acs/post" index="1"/>
          <md:AssertionConsumerService Binding="urn:oasis:names:tc:SAML:2.0:bindings:HTTP-Artifact"
              Location="https://sp.example.org/acs/artifact" index="2"/>
          <md:AttributeConsumingService index="1">
            <md:RequestedAttribute FriendlyName="mail" Name="urn:oid:0.9.2342.19200300.100.1.3" isRequired="true"/>
            <md:RequestedAttribute FriendlyName="cn" Name="urn:oid:2.5.4.3"/>
          </md:AttributeConsumingService>
        </md:SPSSODescriptor>
        <md:ContactPerson contactType="technical">
          <md:EmailAddress>mailto:ops@example.org</md:EmailAddress>
          <md:EmailAddress>mailto:second@example.org</md:EmailAddress>
        </md:ContactPerson>
      </md:EntityDescriptor>
      <md:EntityDescriptor entityID="https://idp.example.org/idp">
        <md:IDPSSODescriptor protocolSupportEnumeration="urn:oasis:names:tc:SAML:2.0:protocol"/>
      </md:EntityDescriptor>
    </md:EntitiesDescriptor>"#;

    #[test]
    fn test_parse_sp_entity() {
        let doc = parse_str(FEED).unwrap();
        assert_eq!(doc.entities.len(), 2);

        let entity = &doc.entities[0];
        assert_eq!(entity.entity_id, "https://sp.example.org/shibboleth");
        let sp = entity.sp.as_ref().expect("SP descriptor");
        assert_eq!(sp.assertion_consumer_service.as_deref(), Some("https://sp.example.org/acs/post"));
        assert_eq!(sp.information_url.as_deref(), Some("https://sp.example.org/de"));
        assert_eq!(sp.logo.as_deref(), Some("https://sp.example.org/logo.png?a=1&b=2"));
        assert_eq!(sp.requested_attributes.len(), 2);
        assert_eq!(sp.requested_attributes[0].is_required.as_deref(), Some("true"));
        assert!(sp.requested_attributes[1].is_required.is_none());
    }

    #[test]
    fn test_certificates_carry_key_context() {
        let doc = parse_str(FEED).unwrap();
        let sp = doc.entities[0].sp.as_ref().unwrap();
        assert_eq!(sp.certificates.len(), 2);

        let first = &sp.certificates[0];
        assert_eq!(first.compact_body(), "AAAABBBB");
        assert_eq!(first.key_use.as_deref(), Some("signing"));
        // KeyName after X509Data still belongs to the same KeyInfo
        assert_eq!(first.key_name.as_deref(), Some("sp-key"));

        let second = &sp.certificates[1];
        assert_eq!(second.compact_body(), "CCCC");
        assert!(second.key_use.is_none());
        assert!(second.key_name.is_none());
    }

    #[test]
    fn test_contacts_take_first_email() {
        let doc = parse_str(FEED).unwrap();
        let contacts = &doc.entities[0].contacts;
        assert_eq!(contacts.len(), 1);
        assert_eq!(contacts[0].contact_type.as_deref(), Some("technical"));
        assert_eq!(contacts[0].email.as_deref(), Some("mailto:ops@example.org"));
    }

    #[test]
    fn test_idp_entity_has_no_sp_descriptor() {
        let doc = parse_str(FEED).unwrap();
        assert!(doc.entities[1].sp.is_none());
    }

    #[test]
    fn test_malformed_xml_is_an_error() {
        assert!(parse_str("<EntitiesDescriptor><EntityDescriptor></EntitiesDescriptor>").is_err());
        assert!(parse_str("").is_err());
    }

    #[test]
    fn test_signed_fixture_parses() {
        let doc = parse_str(include_str!("../../tests/fixtures/metadata-signed.xml")).unwrap();
        assert_eq!(doc.entities.len(), 5);
        let rollover = doc.entities[1].sp.as_ref().unwrap();
        assert_eq!(rollover.certificates.len(), 2);
        assert!(rollover.certificates.iter().all(|c| c.key_name.as_deref() == Some("sp2-key")));
        assert!(doc.entities[3].sp.as_ref().unwrap().assertion_consumer_service.is_none());
    }
}
