use std::time::Duration;

use thiserror::Error;

/// Federation feeds easily exceed ureq's default 10 MB body limit.
const MAX_BODY_BYTES: u64 = 256 * 1024 * 1024;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("invalid proxy {proxy}: {message}")]
    Proxy { proxy: String, message: String },
    #[error("request to {url} failed: {message}")]
    Transport { url: String, message: String },
    #[error("empty response body from {url}")]
    EmptyBody { url: String },
}

/// Response body of a successful GET.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedResource {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
}

pub trait Fetcher {
    fn fetch(&self, url: &str) -> Result<FetchedResource, FetchError>;
}

/// Blocking HTTP client, optionally routed through the configured web proxy.
pub struct HttpFetcher {
    agent: ureq::Agent,
}

impl HttpFetcher {
    pub fn new(proxy: Option<&str>, timeout: Duration) -> Result<Self, FetchError> {
        let proxy = match proxy.filter(|p| !p.trim().is_empty()) {
            Some(p) => Some(ureq::Proxy::new(p).map_err(|e| FetchError::Proxy {
                proxy: p.to_string(),
                message: e.to_string(),
            })?),
            None => None,
        };

        let config = ureq::Agent::config_builder()
            .proxy(proxy)
            .timeout_global(Some(timeout))
            .build();

        Ok(Self {
            agent: config.into(),
        })
    }
}

impl Fetcher for HttpFetcher {
    fn fetch(&self, url: &str) -> Result<FetchedResource, FetchError> {
        let transport = |e: ureq::Error| FetchError::Transport {
            url: url.to_string(),
            message: e.to_string(),
        };

        tracing::debug!(url, "fetching");
        let mut response = self.agent.get(url).call().map_err(transport)?;

        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_string());

        let bytes = response
            .body_mut()
            .with_config()
            .limit(MAX_BODY_BYTES)
            .read_to_vec()
            .map_err(transport)?;
        if bytes.is_empty() {
            return Err(FetchError::EmptyBody {
                url: url.to_string(),
            });
        }

        Ok(FetchedResource {
            bytes,
            content_type,
        })
    }
}
