use serde::Serialize;

pub const DEFAULT_AUTHN_CONTEXT: &str = "urn:oasis:names:tc:SAML:2.0:ac:classes:unspecified";
pub const DEFAULT_NAMEID_FORMAT: &str = "urn:oasis:names:tc:SAML:1.1:nameid-format:unspecified";

/// Normalized per-SP configuration written as `<name>-<fingerprint>-metadata.json`.
///
/// Field order is the serialized order and therefore part of the fingerprint.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpRecord {
    pub appl: String,
    pub issuer: String,
    pub url: String,
    pub logo: String,
    pub protection_requirements: String,
    pub users: Vec<String>,
    pub saml_ecp: SamlEcp,
    pub groups: Vec<String>,
    #[serde(rename = "preferredAuthnContext")]
    pub preferred_authn_context: String,
    #[serde(rename = "preferredNameidFormat")]
    pub preferred_nameid_format: String,
    #[serde(rename = "singleLogoutService")]
    pub single_logout_service: String,
    #[serde(rename = "logoutResponseUrl")]
    pub logout_response_url: String,
    #[serde(rename = "assertionConsumerService")]
    pub assertion_consumer_service: String,
    #[serde(rename = "addAttributeValueDefinition")]
    pub add_attribute_value_definition: bool,
    #[serde(rename = "sendErrorResponse")]
    pub send_error_response: bool,
    pub visible: bool,
    pub secure: bool,
    pub cert: String,
    #[serde(rename = "pub")]
    pub public_key: String,
    #[serde(rename = "oidcClient")]
    pub oidc_client: OidcClient,
    #[serde(rename = "reqAttr")]
    pub req_attr: Vec<String>,
    /// `(contactType, address)` pairs, serialized as two-element arrays
    pub contacts: Vec<(Option<String>, Option<String>)>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SamlEcp {
    pub allowed: bool,
    pub service_accounts: Vec<String>,
    pub allowed_user: bool,
}

/// Placeholder OIDC block; never derived from SAML metadata.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OidcClient {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uris: Vec<String>,
    pub post_logout_redirect_uris: Vec<String>,
    pub backchannel_logout_uri: String,
    pub backchannel_logout_session_required: bool,
    pub response_types: Vec<String>,
    pub grant_types: Vec<String>,
    pub token_endpoint_auth_method: String,
    pub id_token_signed_response_alg: String,
    pub pkce: bool,
}

impl Default for OidcClient {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            redirect_uris: Vec::new(),
            post_logout_redirect_uris: Vec::new(),
            backchannel_logout_uri: String::new(),
            backchannel_logout_session_required: true,
            response_types: Vec::new(),
            grant_types: Vec::new(),
            token_endpoint_auth_method: String::new(),
            id_token_signed_response_alg: String::new(),
            pkce: true,
        }
    }
}

impl SpRecord {
    /// Pretty JSON with two-space indentation; this exact text is hashed and written.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
