//! Proxy providers: a fixed list and a provider HTTP API, both checked the same way.

use std::time::Duration;

use galera_core::error::AppError;
use galera_core::models::ProxyEndpoint;
use galera_core::traits::{NoProxies, ProxyProvider};
use reqwest::Client;
use reqwest::header::HeaderMap;
use serde::Deserialize;

use crate::transport::build_client;

/// GETs `test_url` through `proxy`; anything but HTTP 200 fails the check.
async fn check_through(proxy: &ProxyEndpoint, test_url: &str, timeout: Duration) -> Result<(), AppError> {
    let client = build_client(&HeaderMap::new(), timeout, Some(proxy))?;
    let response = client
        .get(test_url)
        .send()
        .await
        .map_err(|e| AppError::ProxyError(format!("Health check via {} failed: {e}", proxy.display_url())))?;
    match response.status().as_u16() {
        200 => Ok(()),
        status => Err(AppError::ProxyError(format!(
            "Health check via {} returned HTTP {status}",
            proxy.display_url()
        ))),
    }
}

/// A configured list of proxies.
#[derive(Debug, Clone, Default)]
pub struct StaticProxyList {
    proxies: Vec<ProxyEndpoint>,
}

impl StaticProxyList {
    pub fn new(proxies: Vec<ProxyEndpoint>) -> Self {
        Self { proxies }
    }

    /// Parses `ip:port` or `scheme://[user:pass@]host:port` entries.
    pub fn parse<I, S>(entries: I) -> Result<Self, AppError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let proxies = entries
            .into_iter()
            .map(|entry| entry.as_ref().trim().parse::<ProxyEndpoint>())
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { proxies })
    }

    /// Applies the same credentials to every endpoint that has none.
    pub fn with_credentials(mut self, username: &str, password: &str) -> Self {
        self.proxies = self
            .proxies
            .into_iter()
            .map(|p| {
                if p.has_credentials() {
                    p
                } else {
                    p.with_credentials(username, password)
                }
            })
            .collect();
        self
    }

    pub fn len(&self) -> usize {
        self.proxies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.proxies.is_empty()
    }
}

impl ProxyProvider for StaticProxyList {
    async fn candidates(&self) -> Result<Vec<ProxyEndpoint>, AppError> {
        Ok(self.proxies.clone())
    }

    async fn health_check(&self, proxy: &ProxyEndpoint, test_url: &str, timeout: Duration) -> Result<(), AppError> {
        check_through(proxy, test_url, timeout).await
    }
}

/// Provider API reply: a bare list or a wrapped list of objects.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ApiReply {
    Plain(Vec<String>),
    Wrapped { proxies: Vec<ApiProxy> },
}

#[derive(Debug, Deserialize)]
struct ApiProxy {
    ip: String,
    port: serde_json::Value,
}

impl ApiProxy {
    fn address(&self) -> String {
        match &self.port {
            serde_json::Value::String(port) => format!("{}:{port}", self.ip),
            other => format!("{}:{other}", self.ip),
        }
    }
}

/// Fetches candidates from a proxy-provider HTTP API.
#[derive(Clone)]
pub struct ApiProxyProvider {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
    countries: Vec<String>,
    credentials: Option<(String, String)>,
}

impl ApiProxyProvider {
    pub fn new(endpoint: impl Into<String>) -> Result<Self, AppError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| AppError::HttpError(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            api_key: None,
            countries: Vec::new(),
            credentials: None,
        })
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Country codes sent as a comma-separated `country` parameter.
    pub fn with_countries(mut self, countries: Vec<String>) -> Self {
        self.countries = countries;
        self
    }

    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.credentials = Some((username.into(), password.into()));
        self
    }

    fn request_url(&self) -> Result<url::Url, AppError> {
        let mut url = url::Url::parse(&self.endpoint)
            .map_err(|e| AppError::ConfigError(format!("Invalid proxy API URL '{}': {e}", self.endpoint)))?;
        if self.api_key.is_some() || !self.countries.is_empty() {
            let mut pairs = url.query_pairs_mut();
            if let Some(key) = &self.api_key {
                pairs.append_pair("api_key", key);
            }
            if !self.countries.is_empty() {
                pairs.append_pair("country", &self.countries.join(","));
            }
        }
        Ok(url)
    }

    fn endpoints(&self, reply: ApiReply) -> Vec<ProxyEndpoint> {
        let addresses: Vec<String> = match reply {
            ApiReply::Plain(list) => list,
            ApiReply::Wrapped { proxies } => proxies.iter().map(ApiProxy::address).collect(),
        };

        addresses
            .into_iter()
            .filter_map(|address| match address.parse::<ProxyEndpoint>() {
                Ok(endpoint) => Some(endpoint),
                Err(e) => {
                    tracing::warn!(component = "proxy_api", %address, error = %e, "Skipping malformed proxy");
                    None
                }
            })
            .map(|endpoint| match &self.credentials {
                Some((user, pass)) if !endpoint.has_credentials() => endpoint.with_credentials(user, pass),
                _ => endpoint,
            })
            .collect()
    }
}

impl ProxyProvider for ApiProxyProvider {
    async fn candidates(&self) -> Result<Vec<ProxyEndpoint>, AppError> {
        let url = self.request_url()?;
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| AppError::ProxyError(format!("Proxy API unreachable: {e}")))?;

        let status = response.status();
        if status.as_u16() != 200 {
            return Err(AppError::ProxyError(format!(
                "Proxy API returned HTTP {}",
                status.as_u16()
            )));
        }

        let reply = response
            .json::<ApiReply>()
            .await
            .map_err(|e| AppError::ProxyError(format!("Unrecognized proxy API reply: {e}")))?;
        let endpoints = self.endpoints(reply);
        tracing::info!(component = "proxy_api", count = endpoints.len(), "Fetched proxy candidates");
        Ok(endpoints)
    }

    async fn health_check(&self, proxy: &ProxyEndpoint, test_url: &str, timeout: Duration) -> Result<(), AppError> {
        check_through(proxy, test_url, timeout).await
    }
}

/// The proxy source chosen at startup.
#[derive(Clone)]
pub enum ProxySource {
    Direct(NoProxies),
    List(StaticProxyList),
    Api(ApiProxyProvider),
}

impl ProxySource {
    pub fn direct() -> Self {
        ProxySource::Direct(NoProxies)
    }

    pub fn label(&self) -> &'static str {
        match self {
            ProxySource::Direct(_) => "direct",
            ProxySource::List(_) => "list",
            ProxySource::Api(_) => "api",
        }
    }
}

impl ProxyProvider for ProxySource {
    async fn candidates(&self) -> Result<Vec<ProxyEndpoint>, AppError> {
        match self {
            ProxySource::Direct(p) => p.candidates().await,
            ProxySource::List(p) => p.candidates().await,
            ProxySource::Api(p) => p.candidates().await,
        }
    }

    async fn health_check(&self, proxy: &ProxyEndpoint, test_url: &str, timeout: Duration) -> Result<(), AppError> {
        match self {
            ProxySource::Direct(p) => p.health_check(proxy, test_url, timeout).await,
            ProxySource::List(p) => p.health_check(proxy, test_url, timeout).await,
            ProxySource::Api(p) => p.health_check(proxy, test_url, timeout).await,
        }
    }
}
