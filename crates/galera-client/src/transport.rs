use std::time::Duration;

use dashmap::DashMap;
use galera_core::config::ScrapeConfig;
use galera_core::error::AppError;
use galera_core::models::{Identity, ProxyEndpoint, RawResponse};
use galera_core::traits::{AssetFetcher, HttpTransport};
use reqwest::Client;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, USER_AGENT};

/// HTTP transport using reqwest.
///
/// One client per proxy endpoint is built lazily and reused, since reqwest
/// binds the proxy at client construction. Direct requests share a single
/// client. The identity's user agent is sent per request, so rotating agents
/// never forces a new client.
#[derive(Clone)]
pub struct ReqwestTransport {
    direct: Client,
    proxied: std::sync::Arc<DashMap<String, Client>>,
    headers: HeaderMap,
    timeout: Duration,
}

impl ReqwestTransport {
    pub fn new() -> Result<Self, AppError> {
        Self::from_config(&ScrapeConfig::default())
    }

    /// Builds a transport carrying the configured extra headers and request timeout.
    pub fn from_config(config: &ScrapeConfig) -> Result<Self, AppError> {
        let headers = header_map(&config.headers)?;
        let direct = build_client(&headers, config.timeout, None)?;
        Ok(Self {
            direct,
            proxied: std::sync::Arc::new(DashMap::new()),
            headers,
            timeout: config.timeout,
        })
    }

    fn client_for(&self, identity: &Identity) -> Result<Client, AppError> {
        let Some(proxy) = &identity.proxy else {
            return Ok(self.direct.clone());
        };
        let key = proxy.url();
        if let Some(client) = self.proxied.get(&key) {
            return Ok(client.clone());
        }
        let client = build_client(&self.headers, self.timeout, Some(proxy))?;
        self.proxied.insert(key, client.clone());
        Ok(client)
    }
}

impl HttpTransport for ReqwestTransport {
    async fn get(&self, url: &str, identity: &Identity) -> Result<RawResponse, AppError> {
        let client = self.client_for(identity)?;
        let response = client
            .get(url)
            .header(USER_AGENT, identity.user_agent.as_str())
            .send()
            .await
            .map_err(|e| send_error(url, self.timeout, e))?;

        let status = response.status().as_u16();
        let final_url = response.url().to_string();
        let mut raw = RawResponse::new(status, String::new(), final_url);
        for (name, value) in response.headers() {
            if let Ok(value) = value.to_str() {
                raw = raw.with_header(name.as_str(), value);
            }
        }

        raw.body = response
            .text()
            .await
            .map_err(|e| AppError::HttpError(format!("Failed to read response body: {e}")))?;
        tracing::debug!(
            component = "transport",
            url = %url,
            status,
            proxy = %identity.label(),
            bytes = raw.body.len(),
            "Response received"
        );
        Ok(raw)
    }
}

impl AssetFetcher for ReqwestTransport {
    async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>, AppError> {
        let response = self
            .direct
            .get(url)
            .send()
            .await
            .map_err(|e| send_error(url, self.timeout, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::HttpError(format!(
                "HTTP {} for {}",
                status.as_u16(),
                url
            )));
        }

        response
            .bytes()
            .await
            .map(|bytes| bytes.to_vec())
            .map_err(|e| AppError::HttpError(format!("Failed to read response body: {e}")))
    }
}

/// A client routed through `proxy` (or direct), used by both the transport
/// and proxy health checks.
pub(crate) fn build_client(
    headers: &HeaderMap,
    timeout: Duration,
    proxy: Option<&ProxyEndpoint>,
) -> Result<Client, AppError> {
    let mut builder = Client::builder()
        .default_headers(headers.clone())
        .timeout(timeout);
    match proxy {
        Some(proxy) => {
            let proxy = reqwest::Proxy::all(proxy.url()).map_err(|e| {
                AppError::ProxyError(format!("Invalid proxy {}: {e}", proxy.display_url()))
            })?;
            builder = builder.proxy(proxy);
        }
        // Direct identities must not pick up proxies from the environment.
        None => builder = builder.no_proxy(),
    }
    builder
        .build()
        .map_err(|e| AppError::HttpError(e.to_string()))
}

/// Maps a failed send onto the error taxonomy.
pub(crate) fn send_error(url: &str, timeout: Duration, e: reqwest::Error) -> AppError {
    if e.is_timeout() {
        AppError::Timeout(timeout.as_secs())
    } else if e.is_connect() {
        AppError::NetworkError(format!("Connection failed for {url}: {e}"))
    } else {
        AppError::HttpError(e.to_string())
    }
}

pub(crate) fn header_map<'a, I>(headers: I) -> Result<HeaderMap, AppError>
where
    I: IntoIterator<Item = (&'a String, &'a String)>,
{
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| AppError::ConfigError(format!("Invalid header name '{name}': {e}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| AppError::ConfigError(format!("Invalid header value for '{name}': {e}")))?;
        map.insert(name, value);
    }
    Ok(map)
}
