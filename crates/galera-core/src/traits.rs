use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;

use crate::behavior::InteractionStep;
use crate::error::AppError;
use crate::models::{
    BrowserCookie, CapturedExchange, ChallengeKind, ExtractionRecord, Identity, ProxyEndpoint,
    RawResponse, ScrapeResult,
};

/// Issues one HTTP GET through an identity's proxy and user agent.
pub trait HttpTransport: Send + Sync {
    fn get(
        &self,
        url: &str,
        identity: &Identity,
    ) -> impl Future<Output = Result<RawResponse, AppError>> + Send;
}

/// Downloads binary assets (challenge images).
pub trait AssetFetcher: Send + Sync {
    fn fetch_bytes(&self, url: &str) -> impl Future<Output = Result<Vec<u8>, AppError>> + Send;
}

/// Source of candidate proxies plus a health check.
pub trait ProxyProvider: Send + Sync {
    fn candidates(&self) -> impl Future<Output = Result<Vec<ProxyEndpoint>, AppError>> + Send;

    /// Issues a lightweight request through `proxy` against `test_url`.
    fn health_check(
        &self,
        proxy: &ProxyEndpoint,
        test_url: &str,
        timeout: Duration,
    ) -> impl Future<Output = Result<(), AppError>> + Send;
}

/// Parameters pulled out of a challenge page for an external solver.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChallengeParams {
    pub site_key: Option<String>,
    /// reCAPTCHA v3 action name.
    pub action: Option<String>,
    /// Canonical page URL the challenge is bound to.
    pub page_url: String,
    /// Base64-encoded image for image challenges.
    pub image_base64: Option<String>,
}

/// State of a submitted challenge at the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollStatus {
    Ready(String),
    Pending,
    Failed(String),
}

/// External CAPTCHA-solving service.
pub trait CaptchaBackend: Send + Sync {
    /// Submits a challenge and returns the backend's request id.
    fn submit(
        &self,
        kind: ChallengeKind,
        params: &ChallengeParams,
    ) -> impl Future<Output = Result<String, AppError>> + Send;

    fn poll(&self, request_id: &str) -> impl Future<Output = Result<PollStatus, AppError>> + Send;
}

/// Optical character recognition over raw image bytes.
pub trait OcrEngine: Send + Sync {
    fn recognize(&self, image: &[u8]) -> impl Future<Output = Result<String, AppError>> + Send;
}

/// Resolves a challenge to a token.
///
/// Never fails: absence of a solution is `None` and the fetch layer decides
/// what to do with it.
pub trait ChallengeSolver: Send + Sync {
    fn solve(
        &self,
        kind: ChallengeKind,
        html: &str,
        page_url: &str,
    ) -> impl Future<Output = Option<String>> + Send;
}

// ---------------------------------------------------------------------------
// Browser automation
// ---------------------------------------------------------------------------

/// Everything a browser needs to know before it starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchOptions {
    pub headless: bool,
    pub window_width: u32,
    pub window_height: u32,
    pub proxy: Option<ProxyEndpoint>,
    pub user_agent: String,
    pub extra_args: Vec<String>,
}

/// Raw HTML of one iframe document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameDocument {
    pub url: String,
    pub html: String,
}

/// Inner HTML of one open shadow root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShadowRootHtml {
    pub host_id: String,
    pub html: String,
}

/// Starts an exclusive browser for a single fetch attempt.
pub trait BrowserLauncher: Send + Sync {
    type Session: BrowserSession;

    fn launch(
        &self,
        options: &LaunchOptions,
    ) -> impl Future<Output = Result<Self::Session, AppError>> + Send;
}

/// One live browser owned by one attempt. Must be closed with [`close`](Self::close).
pub trait BrowserSession: Send + Sync {
    /// Installs the XHR/fetch capture hook for documents loaded afterwards.
    fn capture_network(&self) -> impl Future<Output = Result<(), AppError>> + Send;

    fn navigate(&self, url: &str) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Resolves once `document.readyState` is `complete`; `Timeout` past `timeout`.
    fn wait_until_ready(&self, timeout: Duration)
    -> impl Future<Output = Result<(), AppError>> + Send;

    fn scroll_height(&self) -> impl Future<Output = Result<u64, AppError>> + Send;

    fn scroll_to_bottom(&self) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Performs one non-pause interaction step.
    fn perform(&self, step: &InteractionStep) -> impl Future<Output = Result<(), AppError>> + Send;

    fn content(&self) -> impl Future<Output = Result<String, AppError>> + Send;

    fn current_url(&self) -> impl Future<Output = Result<String, AppError>> + Send;

    fn frames(&self) -> impl Future<Output = Result<Vec<FrameDocument>, AppError>> + Send;

    fn shadow_roots(&self) -> impl Future<Output = Result<Vec<ShadowRootHtml>, AppError>> + Send;

    fn captured_exchanges(
        &self,
    ) -> impl Future<Output = Result<Vec<CapturedExchange>, AppError>> + Send;

    fn cookies(&self) -> impl Future<Output = Result<Vec<BrowserCookie>, AppError>> + Send;

    fn local_storage(
        &self,
    ) -> impl Future<Output = Result<BTreeMap<String, String>, AppError>> + Send;

    /// Tears the browser down. Errors are logged, never returned.
    fn close(self) -> impl Future<Output = ()> + Send;
}

// ---------------------------------------------------------------------------
// Strategy, adapters and persistence
// ---------------------------------------------------------------------------

/// Fetches one URL to a terminal result. Retries happen inside.
pub trait FetchStrategy: Send + Sync {
    fn fetch(&self, url: &str) -> impl Future<Output = ScrapeResult> + Send;
}

/// Site-specific enrichment of a generic record.
pub trait PlatformAdapter: Send + Sync {
    fn name(&self) -> &str;

    /// Fields merged into `record.extra`. Must not depend on mutating the record.
    fn extra_fields(&self, record: &ExtractionRecord) -> serde_json::Map<String, serde_json::Value>;
}

/// Persists and retrieves final scrape results.
pub trait ResultStore: Send + Sync {
    fn save(&self, results: &[ScrapeResult]) -> impl Future<Output = Result<(), AppError>> + Send;

    fn load(&self) -> impl Future<Output = Result<Vec<ScrapeResult>, AppError>> + Send;
}

// ---------------------------------------------------------------------------
// No-op implementations
// ---------------------------------------------------------------------------

/// A no-op ResultStore for use when persistence is not needed.
#[derive(Debug, Clone)]
pub struct NullStore;

impl ResultStore for NullStore {
    async fn save(&self, _results: &[ScrapeResult]) -> Result<(), AppError> {
        Ok(())
    }

    async fn load(&self) -> Result<Vec<ScrapeResult>, AppError> {
        Ok(vec![])
    }
}

/// A CaptchaBackend for deployments without a solving service.
#[derive(Debug, Clone)]
pub struct NullBackend;

impl CaptchaBackend for NullBackend {
    async fn submit(&self, kind: ChallengeKind, _params: &ChallengeParams) -> Result<String, AppError> {
        Err(AppError::CaptchaError(format!(
            "No CAPTCHA backend configured for {kind}"
        )))
    }

    async fn poll(&self, _request_id: &str) -> Result<PollStatus, AppError> {
        Ok(PollStatus::Failed("No CAPTCHA backend configured".into()))
    }
}

/// An OcrEngine that recognises nothing.
#[derive(Debug, Clone)]
pub struct NullOcr;

impl OcrEngine for NullOcr {
    async fn recognize(&self, _image: &[u8]) -> Result<String, AppError> {
        Ok(String::new())
    }
}

/// A ProxyProvider with no proxies; every fetch goes direct.
#[derive(Debug, Clone)]
pub struct NoProxies;

impl ProxyProvider for NoProxies {
    async fn candidates(&self) -> Result<Vec<ProxyEndpoint>, AppError> {
        Ok(vec![])
    }

    async fn health_check(
        &self,
        _proxy: &ProxyEndpoint,
        _test_url: &str,
        _timeout: Duration,
    ) -> Result<(), AppError> {
        Ok(())
    }
}
