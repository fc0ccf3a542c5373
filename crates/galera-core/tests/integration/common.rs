use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use galera_core::AppError;
use galera_core::models::{Identity, ProxyEndpoint, RawResponse};
use galera_core::traits::{AssetFetcher, HttpTransport, ProxyProvider};

/// In-memory site: each URL serves a queue of responses, the last one repeating.
#[derive(Clone, Default)]
pub struct FixtureSite {
    pages: Arc<Mutex<HashMap<String, Vec<RawResponse>>>>,
    hits: Arc<Mutex<Vec<(String, String)>>>,
}

impl FixtureSite {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page(self, url: &str, status: u16, body: &str) -> Self {
        self.pages
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_default()
            .push(RawResponse::new(status, body, url).with_header("Content-Type", "text/html"));
        self
    }

    /// `(url, proxy label)` for every request served.
    pub fn hits(&self) -> Vec<(String, String)> {
        self.hits.lock().unwrap().clone()
    }

    pub fn hits_for(&self, url: &str) -> usize {
        self.hits().iter().filter(|(u, _)| u == url).count()
    }
}

impl HttpTransport for FixtureSite {
    async fn get(&self, url: &str, identity: &Identity) -> Result<RawResponse, AppError> {
        self.hits
            .lock()
            .unwrap()
            .push((url.to_string(), identity.label()));
        let mut pages = self.pages.lock().unwrap();
        match pages.get_mut(url) {
            Some(queue) if queue.len() > 1 => Ok(queue.remove(0)),
            Some(queue) => Ok(queue[0].clone()),
            None => Err(AppError::NetworkError(format!("connection refused: {url}"))),
        }
    }
}

impl AssetFetcher for FixtureSite {
    async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>, AppError> {
        let pages = self.pages.lock().unwrap();
        pages
            .get(url)
            .and_then(|queue| queue.first())
            .map(|response| response.body.clone().into_bytes())
            .ok_or_else(|| AppError::NetworkError(format!("connection refused: {url}")))
    }
}

/// Fixed proxy list that passes every health check.
#[derive(Clone)]
pub struct FixtureProxies(pub Vec<ProxyEndpoint>);

impl ProxyProvider for FixtureProxies {
    async fn candidates(&self) -> Result<Vec<ProxyEndpoint>, AppError> {
        Ok(self.0.clone())
    }

    async fn health_check(&self, _proxy: &ProxyEndpoint, _test_url: &str, _timeout: Duration) -> Result<(), AppError> {
        Ok(())
    }
}

pub fn article(title: &str, body: &str) -> String {
    format!(
        "<html><head><title>{title}</title></head><body><h1>{title}</h1><p>{body}</p>\
         <a href=\"/related\">Related</a><img src=\"img/cover.jpg\" alt=\"cover\"></body></html>"
    )
}
