//! Transport seam between the call engine and the network.
//!
//! The engine only ever needs "POST these bytes with these headers and give
//! me back the body and its declared content type". [`HttpTransport`] does
//! that over reqwest; tests substitute scripted implementations.

use super::config::ClientConfig;
use crate::error::{ReariseError, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use tracing::debug;

/// One outbound POST
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundRequest {
    /// Route path relative to the API base URL
    pub path: String,
    /// Headers to send, in order
    pub headers: Vec<(&'static str, String)>,
    /// Encrypted body
    pub body: Vec<u8>,
}

impl OutboundRequest {
    /// Value of a header, matched case-insensitively
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// Raw response to an [`OutboundRequest`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundResponse {
    /// Declared `Content-Type`, if any
    pub content_type: Option<String>,
    /// Undecoded body
    pub body: Vec<u8>,
}

/// Sends requests for the call engine
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send one request
    ///
    /// ## Errors
    /// `ReariseError::Transport` with `timeout` set when the attempt timed
    /// out; any other failure is terminal for the call.
    async fn post(&self, request: OutboundRequest) -> Result<InboundResponse>;
}

/// reqwest-backed [`Transport`]
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: reqwest::Url,
}

impl HttpTransport {
    /// Build a client with the configured timeout and user agent
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let base_url = reqwest::Url::parse(&config.api_base_url).map_err(|e| {
            ReariseError::config_error(
                format!("Invalid API URL '{}'", config.api_base_url),
                Some(Box::new(e)),
            )
        })?;
        let client = reqwest::Client::builder()
            .use_rustls_tls()
            .timeout(config.request_timeout())
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| {
                ReariseError::config_error("Failed to build HTTP client", Some(Box::new(e)))
            })?;
        Ok(Self { client, base_url })
    }

    fn endpoint(&self, path: &str) -> Result<reqwest::Url> {
        self.base_url.join(path).map_err(|e| {
            ReariseError::request_error(format!("Invalid route path '{path}': {e}"))
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn post(&self, request: OutboundRequest) -> Result<InboundResponse> {
        let url = self.endpoint(&request.path)?;

        let mut headers = HeaderMap::with_capacity(request.headers.len());
        for (name, value) in &request.headers {
            let value = HeaderValue::from_str(value).map_err(|e| {
                ReariseError::request_error(format!("Invalid value for header {name}: {e}"))
            })?;
            let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
                ReariseError::request_error(format!("Invalid header name {name}: {e}"))
            })?;
            headers.insert(name, value);
        }

        debug!(%url, bytes = request.body.len(), "POST");
        let response = self
            .client
            .post(url)
            .headers(headers)
            .body(request.body)
            .send()
            .await?;

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let body = response.bytes().await?.to_vec();
        Ok(InboundResponse { content_type, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_joins_route_paths() {
        let transport = HttpTransport::new(&ClientConfig {
            api_base_url: "https://api.example.test/api/".to_string(),
            ..ClientConfig::default()
        })
        .unwrap();
        assert_eq!(
            transport.endpoint("user/login").unwrap().as_str(),
            "https://api.example.test/api/user/login"
        );
    }

    #[test]
    fn test_rejects_bad_base_url() {
        let config = ClientConfig {
            api_base_url: "::::".to_string(),
            ..ClientConfig::default()
        };
        assert!(HttpTransport::new(&config).is_err());
    }

    #[test]
    fn test_header_lookup_is_case_insensitive() {
        let request = OutboundRequest {
            path: "home/login".to_string(),
            headers: vec![("X-SID", "abc".to_string())],
            body: Vec::new(),
        };
        assert_eq!(request.header("x-sid"), Some("abc"));
        assert_eq!(request.header("X-REQUEST-ID"), None);
    }

    #[tokio::test]
    async fn test_connection_refused_is_not_a_timeout() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let transport = HttpTransport::new(&ClientConfig {
            api_base_url: format!("http://{addr}/api/"),
            ..ClientConfig::default()
        })
        .unwrap();
        let err = transport
            .post(OutboundRequest {
                path: "app/status".to_string(),
                headers: Vec::new(),
                body: Vec::new(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ReariseError::Transport { timeout: false, .. }));
    }
}
