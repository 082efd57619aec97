//! Authenticated HTTP lookup against the profile endpoint

use super::LocationFetcher;
use crate::config::BridgeConfig;
use crate::error::CoreError;
use reqwest::header::{ACCEPT, CONTENT_TYPE, COOKIE};
use reqwest::Url;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

/// JSON pointer to the declared location in the lookup response
pub const LOCATION_POINTER: &str =
    "/data/user_result_by_screen_name/result/about_profile/account_based_in";

/// Page-held credentials (cookies) available to the privileged context
pub trait CredentialSource: Send + Sync + 'static {
    fn cookie(&self, name: &str) -> Option<String>;

    /// Full `Cookie` header to forward, if any
    fn cookie_header(&self) -> Option<String>;
}

/// Cookies parsed from a `name=value; name2=value2` header string
#[derive(Debug, Clone, Default)]
pub struct CookieJar {
    pairs: Vec<(String, String)>,
}

impl CookieJar {
    pub fn parse(raw: &str) -> Self {
        let pairs = raw
            .split(';')
            .filter_map(|pair| {
                let (name, value) = pair.trim().split_once('=')?;
                let name = name.trim();
                (!name.is_empty()).then(|| (name.to_string(), value.trim().to_string()))
            })
            .collect();
        Self { pairs }
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

impl CredentialSource for CookieJar {
    fn cookie(&self, name: &str) -> Option<String> {
        self.pairs
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.clone())
    }

    fn cookie_header(&self) -> Option<String> {
        if self.pairs.is_empty() {
            return None;
        }
        Some(
            self.pairs
                .iter()
                .map(|(n, v)| format!("{}={}", n, v))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }
}

/// Pull the declared location out of a lookup response; absent means empty
pub fn extract_location(body: &Value) -> String {
    body.pointer(LOCATION_POINTER)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

/// Location fetcher that calls the remote endpoint with page credentials
pub struct HttpLocationFetcher {
    client: reqwest::Client,
    endpoint: Url,
    config: BridgeConfig,
    credentials: Arc<dyn CredentialSource>,
}

impl HttpLocationFetcher {
    pub fn new(
        config: BridgeConfig,
        credentials: Arc<dyn CredentialSource>,
    ) -> Result<Self, CoreError> {
        let endpoint = config.endpoint_url()?;
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| CoreError::InvalidConfig {
                message: format!("Failed to build HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            endpoint,
            config,
            credentials,
        })
    }

    /// Endpoint with the handle serialized into the `variables` parameter
    pub fn request_url(&self, handle: &str) -> Url {
        let variables = serde_json::json!({ "screenName": handle }).to_string();
        let mut url = self.endpoint.clone();
        url.query_pairs_mut().append_pair("variables", &variables);
        url
    }

    fn csrf_token(&self) -> String {
        self.credentials
            .cookie(&self.config.csrf_cookie)
            .unwrap_or_default()
    }
}

impl LocationFetcher for HttpLocationFetcher {
    async fn fetch(&self, handle: &str) -> Result<String, CoreError> {
        let url = self.request_url(handle);
        debug!(handle, url = %url, "Requesting profile location");

        let mut request = self
            .client
            .get(url)
            .header(ACCEPT, "application/json")
            .header(CONTENT_TYPE, "application/json")
            .bearer_auth(&self.config.bearer_token)
            .header("x-csrf-token", self.csrf_token());
        if let Some(cookies) = self.credentials.cookie_header() {
            request = request.header(COOKIE, cookies);
        }

        let response = request.send().await.map_err(|e| CoreError::Http {
            handle: handle.to_string(),
            source: e,
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(CoreError::HttpStatus {
                handle: handle.to_string(),
                status: status.as_u16(),
            });
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| CoreError::ResponseDecode {
                handle: handle.to_string(),
                message: e.to_string(),
            })?;

        Ok(extract_location(&body))
    }
}
