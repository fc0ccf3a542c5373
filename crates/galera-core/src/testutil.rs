//! Test utilities: mock implementations of all core traits.
//!
//! Handwritten mocks for dependency injection in unit tests.
//! All mocks use `Arc<Mutex<_>>` for interior mutability, allowing
//! test assertions on recorded calls.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::behavior::InteractionStep;
use crate::error::{AppError, ErrorKind};
use crate::extract;
use crate::models::{
    BrowserCookie, CapturedExchange, ChallengeKind, FetchMode, Identity, ProxyEndpoint,
    RawResponse, ScrapeResult,
};
use crate::reporter::{ScrapeEvent, ScrapeReporter};
use crate::traits::{
    AssetFetcher, BrowserLauncher, BrowserSession, CaptchaBackend, ChallengeParams,
    ChallengeSolver, FetchStrategy, FrameDocument, HttpTransport, LaunchOptions, OcrEngine,
    PollStatus, ProxyProvider, ResultStore, ShadowRootHtml,
};

/// A 200 response whose final URL is filled in by [`MockTransport`].
pub fn ok_page(html: &str) -> RawResponse {
    RawResponse::new(200, html, "")
}

// ---------------------------------------------------------------------------
// MockTransport
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct TransportCall {
    url: String,
    user_agent: String,
    proxy: String,
}

/// Transport that replays a queue of responses and records every request.
#[derive(Clone)]
pub struct MockTransport {
    responses: Arc<Mutex<VecDeque<Result<RawResponse, AppError>>>>,
    calls: Arc<Mutex<Vec<TransportCall>>>,
}

impl MockTransport {
    pub fn new(responses: Vec<Result<RawResponse, AppError>>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(responses.into())),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn urls(&self) -> Vec<String> {
        self.calls.lock().unwrap().iter().map(|c| c.url.clone()).collect()
    }

    pub fn user_agents(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|c| c.user_agent.clone())
            .collect()
    }

    /// Proxy label per request (`direct` when none).
    pub fn proxies(&self) -> Vec<String> {
        self.calls.lock().unwrap().iter().map(|c| c.proxy.clone()).collect()
    }
}

impl HttpTransport for MockTransport {
    async fn get(&self, url: &str, identity: &Identity) -> Result<RawResponse, AppError> {
        self.calls.lock().unwrap().push(TransportCall {
            url: url.to_string(),
            user_agent: identity.user_agent.clone(),
            proxy: identity.label(),
        });
        let next = self.responses.lock().unwrap().pop_front();
        match next {
            Some(Ok(mut response)) => {
                if response.final_url.is_empty() {
                    response.final_url = url.to_string();
                }
                Ok(response)
            }
            Some(Err(e)) => Err(e),
            None => Err(AppError::NetworkError("No more mock responses".into())),
        }
    }
}

// ---------------------------------------------------------------------------
// MockProxyProvider
// ---------------------------------------------------------------------------

/// Provider with a fixed candidate list; health checks fail for proxies marked dead.
#[derive(Clone)]
pub struct MockProxyProvider {
    candidates: Arc<Vec<ProxyEndpoint>>,
    dead: Arc<HashSet<String>>,
    candidate_calls: Arc<AtomicUsize>,
    fail_next: Arc<Mutex<bool>>,
}

impl MockProxyProvider {
    pub fn new(candidates: Vec<ProxyEndpoint>) -> Self {
        Self {
            candidates: Arc::new(candidates),
            dead: Arc::new(HashSet::new()),
            candidate_calls: Arc::new(AtomicUsize::new(0)),
            fail_next: Arc::new(Mutex::new(false)),
        }
    }

    /// Marks a proxy (by display URL) as failing its health check.
    pub fn with_dead(mut self, display_url: &str) -> Self {
        let mut dead = (*self.dead).clone();
        dead.insert(display_url.to_string());
        self.dead = Arc::new(dead);
        self
    }

    pub fn candidate_calls(&self) -> usize {
        self.candidate_calls.load(Ordering::SeqCst)
    }

    /// The next `candidates` call returns an error.
    pub fn fail_next_candidates(&self) {
        *self.fail_next.lock().unwrap() = true;
    }
}

impl ProxyProvider for MockProxyProvider {
    async fn candidates(&self) -> Result<Vec<ProxyEndpoint>, AppError> {
        self.candidate_calls.fetch_add(1, Ordering::SeqCst);
        let fail = std::mem::take(&mut *self.fail_next.lock().unwrap());
        if fail {
            return Err(AppError::ProxyError("mock provider down".into()));
        }
        Ok(self.candidates.as_ref().clone())
    }

    async fn health_check(&self, proxy: &ProxyEndpoint, _test_url: &str, _timeout: Duration) -> Result<(), AppError> {
        if self.dead.contains(&proxy.display_url()) {
            Err(AppError::ProxyError(format!("{} unreachable", proxy.display_url())))
        } else {
            Ok(())
        }
    }
}

// ---------------------------------------------------------------------------
// Solver collaborators
// ---------------------------------------------------------------------------

/// Solver returning a fixed answer.
#[derive(Clone)]
pub struct MockSolver {
    token: Option<String>,
    calls: Arc<AtomicUsize>,
}

impl MockSolver {
    pub fn none() -> Self {
        Self {
            token: None,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn token(token: &str) -> Self {
        Self {
            token: Some(token.to_string()),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ChallengeSolver for MockSolver {
    async fn solve(&self, _kind: ChallengeKind, _html: &str, _page_url: &str) -> Option<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.token.clone()
    }
}

/// CAPTCHA backend that records submissions and replays poll results.
#[derive(Clone)]
pub struct MockCaptchaBackend {
    submissions: Arc<Mutex<Vec<(ChallengeKind, ChallengeParams)>>>,
    polls: Arc<Mutex<VecDeque<Result<PollStatus, AppError>>>>,
    fail_submit: bool,
}

impl MockCaptchaBackend {
    /// Every poll returns the same token.
    pub fn ready(token: &str) -> Self {
        Self::with_polls(vec![Ok(PollStatus::Ready(token.to_string()))])
    }

    /// Polls pop from the queue; the last entry repeats.
    pub fn with_polls(polls: Vec<Result<PollStatus, AppError>>) -> Self {
        Self {
            submissions: Arc::new(Mutex::new(Vec::new())),
            polls: Arc::new(Mutex::new(polls.into())),
            fail_submit: false,
        }
    }

    pub fn failing_submit() -> Self {
        Self {
            fail_submit: true,
            ..Self::with_polls(vec![])
        }
    }

    pub fn submissions(&self) -> Vec<(ChallengeKind, ChallengeParams)> {
        self.submissions.lock().unwrap().clone()
    }
}

impl CaptchaBackend for MockCaptchaBackend {
    async fn submit(&self, kind: ChallengeKind, params: &ChallengeParams) -> Result<String, AppError> {
        let mut submissions = self.submissions.lock().unwrap();
        submissions.push((kind, params.clone()));
        if self.fail_submit {
            return Err(AppError::CaptchaError("ERROR_ZERO_BALANCE".into()));
        }
        Ok(format!("req-{}", submissions.len()))
    }

    async fn poll(&self, _request_id: &str) -> Result<PollStatus, AppError> {
        let mut polls = self.polls.lock().unwrap();
        match polls.len() {
            0 => Ok(PollStatus::Pending),
            1 => match &polls[0] {
                Ok(status) => Ok(status.clone()),
                Err(e) => Err(AppError::CaptchaError(e.to_string())),
            },
            _ => polls.pop_front().unwrap_or(Ok(PollStatus::Pending)),
        }
    }
}

/// OCR engine replaying canned results; empty text once exhausted.
#[derive(Clone)]
pub struct MockOcr {
    results: Arc<Mutex<VecDeque<Result<String, AppError>>>>,
}

impl MockOcr {
    pub fn new(results: Vec<Result<String, AppError>>) -> Self {
        Self {
            results: Arc::new(Mutex::new(results.into())),
        }
    }
}

impl OcrEngine for MockOcr {
    async fn recognize(&self, _image: &[u8]) -> Result<String, AppError> {
        self.results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(String::new()))
    }
}

/// Asset downloader replaying canned bodies and recording requested URLs.
#[derive(Clone)]
pub struct MockAssetFetcher {
    bodies: Arc<Mutex<VecDeque<Result<Vec<u8>, AppError>>>>,
    requested: Arc<Mutex<Vec<String>>>,
}

impl MockAssetFetcher {
    pub fn new(bodies: Vec<Result<Vec<u8>, AppError>>) -> Self {
        Self {
            bodies: Arc::new(Mutex::new(bodies.into())),
            requested: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn requested(&self) -> Vec<String> {
        self.requested.lock().unwrap().clone()
    }
}

impl AssetFetcher for MockAssetFetcher {
    async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>, AppError> {
        self.requested.lock().unwrap().push(url.to_string());
        self.bodies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(AppError::HttpError(format!("No mock asset for {url}"))))
    }
}

// ---------------------------------------------------------------------------
// MockBrowserLauncher
// ---------------------------------------------------------------------------

/// Browser-only record source that a [`MockPage`] can be told to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HarvestSource {
    Frames,
    ShadowRoots,
    Exchanges,
    Cookies,
    LocalStorage,
}

/// Scripted page served by one [`MockSession`].
#[derive(Clone)]
pub struct MockPage {
    html: String,
    solved_html: Option<String>,
    heights: Vec<u64>,
    frames: Vec<FrameDocument>,
    shadow_roots: Vec<ShadowRootHtml>,
    exchanges: Vec<CapturedExchange>,
    cookies: Vec<BrowserCookie>,
    local_storage: BTreeMap<String, String>,
    fail_navigation: bool,
    hang: bool,
    failing_sources: Vec<HarvestSource>,
    failing_step: Option<usize>,
}

impl MockPage {
    pub fn new(html: &str) -> Self {
        Self {
            html: html.to_string(),
            solved_html: None,
            heights: vec![1000],
            frames: Vec::new(),
            shadow_roots: Vec::new(),
            exchanges: Vec::new(),
            cookies: Vec::new(),
            local_storage: BTreeMap::new(),
            fail_navigation: false,
            hang: false,
            failing_sources: Vec::new(),
            failing_step: None,
        }
    }

    /// HTML served after navigating to a URL carrying a challenge solution.
    pub fn with_solved_html(mut self, html: &str) -> Self {
        self.solved_html = Some(html.to_string());
        self
    }

    /// Successive `scroll_height` values; the last one repeats.
    pub fn with_heights(mut self, heights: Vec<u64>) -> Self {
        self.heights = heights;
        self
    }

    pub fn with_frames(mut self, frames: Vec<FrameDocument>) -> Self {
        self.frames = frames;
        self
    }

    pub fn with_shadow_roots(mut self, roots: Vec<ShadowRootHtml>) -> Self {
        self.shadow_roots = roots;
        self
    }

    pub fn with_exchanges(mut self, exchanges: Vec<CapturedExchange>) -> Self {
        self.exchanges = exchanges;
        self
    }

    pub fn with_cookies(mut self, cookies: Vec<BrowserCookie>) -> Self {
        self.cookies = cookies;
        self
    }

    pub fn with_local_storage(mut self, entries: &[(&str, &str)]) -> Self {
        self.local_storage = entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        self
    }

    pub fn failing_navigation(mut self) -> Self {
        self.fail_navigation = true;
        self
    }

    /// Navigation never completes.
    pub fn hanging(mut self) -> Self {
        self.hang = true;
        self
    }

    /// Reading `source` from the session returns a render error.
    pub fn failing_source(mut self, source: HarvestSource) -> Self {
        self.failing_sources.push(source);
        self
    }

    /// The `index`-th performed interaction step (0-based) returns an error.
    pub fn failing_step(mut self, index: usize) -> Self {
        self.failing_step = Some(index);
        self
    }

    fn harvest<T: Clone>(&self, source: HarvestSource, value: &T) -> Result<T, AppError> {
        if self.failing_sources.contains(&source) {
            return Err(AppError::RenderError(format!("{source:?} unavailable")));
        }
        Ok(value.clone())
    }
}

#[derive(Default)]
struct BrowserLog {
    launches: Vec<LaunchOptions>,
    navigations: Vec<String>,
    performed: Vec<InteractionStep>,
    scrolls: usize,
    closes: usize,
}

/// Launcher handing out one scripted page per launch.
#[derive(Clone)]
pub struct MockBrowserLauncher {
    pages: Arc<Mutex<VecDeque<Result<MockPage, AppError>>>>,
    log: Arc<Mutex<BrowserLog>>,
}

impl MockBrowserLauncher {
    pub fn new(pages: Vec<Result<MockPage, AppError>>) -> Self {
        Self {
            pages: Arc::new(Mutex::new(pages.into())),
            log: Arc::new(Mutex::new(BrowserLog::default())),
        }
    }

    pub fn launches(&self) -> Vec<LaunchOptions> {
        self.log.lock().unwrap().launches.clone()
    }

    pub fn navigations(&self) -> Vec<String> {
        self.log.lock().unwrap().navigations.clone()
    }

    /// Every interaction step handed to a session, including failed ones.
    pub fn performed(&self) -> Vec<InteractionStep> {
        self.log.lock().unwrap().performed.clone()
    }

    pub fn scroll_count(&self) -> usize {
        self.log.lock().unwrap().scrolls
    }

    pub fn close_count(&self) -> usize {
        self.log.lock().unwrap().closes
    }
}

impl BrowserLauncher for MockBrowserLauncher {
    type Session = MockSession;

    async fn launch(&self, options: &LaunchOptions) -> Result<MockSession, AppError> {
        self.log.lock().unwrap().launches.push(options.clone());
        let page = self
            .pages
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(AppError::RenderError("No more mock pages".into())))?;
        Ok(MockSession {
            html: Mutex::new(page.html.clone()),
            heights: Mutex::new(page.heights.clone().into()),
            url: Mutex::new("about:blank".to_string()),
            page,
            log: Arc::clone(&self.log),
        })
    }
}

pub struct MockSession {
    page: MockPage,
    html: Mutex<String>,
    heights: Mutex<VecDeque<u64>>,
    url: Mutex<String>,
    log: Arc<Mutex<BrowserLog>>,
}

impl BrowserSession for MockSession {
    async fn capture_network(&self) -> Result<(), AppError> {
        Ok(())
    }

    async fn navigate(&self, url: &str) -> Result<(), AppError> {
        self.log.lock().unwrap().navigations.push(url.to_string());
        if self.page.hang {
            std::future::pending::<()>().await;
        }
        if self.page.fail_navigation {
            return Err(AppError::RenderError(format!("net::ERR_CONNECTION_RESET at {url}")));
        }
        if url.contains(crate::strategy::SOLUTION_PARAM) {
            if let Some(solved) = &self.page.solved_html {
                *self.html.lock().unwrap() = solved.clone();
            }
        }
        *self.url.lock().unwrap() = url.to_string();
        Ok(())
    }

    async fn wait_until_ready(&self, _timeout: Duration) -> Result<(), AppError> {
        Ok(())
    }

    async fn scroll_height(&self) -> Result<u64, AppError> {
        let mut heights = self.heights.lock().unwrap();
        let height = if heights.len() > 1 {
            heights.pop_front()
        } else {
            heights.front().copied()
        };
        Ok(height.unwrap_or(0))
    }

    async fn scroll_to_bottom(&self) -> Result<(), AppError> {
        self.log.lock().unwrap().scrolls += 1;
        Ok(())
    }

    async fn perform(&self, step: &InteractionStep) -> Result<(), AppError> {
        let mut log = self.log.lock().unwrap();
        let index = log.performed.len();
        log.performed.push(step.clone());
        if self.page.failing_step == Some(index) {
            return Err(AppError::RenderError(format!("Step {index} detached")));
        }
        Ok(())
    }

    async fn content(&self) -> Result<String, AppError> {
        Ok(self.html.lock().unwrap().clone())
    }

    async fn current_url(&self) -> Result<String, AppError> {
        Ok(self.url.lock().unwrap().clone())
    }

    async fn frames(&self) -> Result<Vec<FrameDocument>, AppError> {
        self.page.harvest(HarvestSource::Frames, &self.page.frames)
    }

    async fn shadow_roots(&self) -> Result<Vec<ShadowRootHtml>, AppError> {
        self.page.harvest(HarvestSource::ShadowRoots, &self.page.shadow_roots)
    }

    async fn captured_exchanges(&self) -> Result<Vec<CapturedExchange>, AppError> {
        self.page.harvest(HarvestSource::Exchanges, &self.page.exchanges)
    }

    async fn cookies(&self) -> Result<Vec<BrowserCookie>, AppError> {
        self.page.harvest(HarvestSource::Cookies, &self.page.cookies)
    }

    async fn local_storage(&self) -> Result<BTreeMap<String, String>, AppError> {
        self.page.harvest(HarvestSource::LocalStorage, &self.page.local_storage)
    }

    async fn close(self) {
        self.log.lock().unwrap().closes += 1;
    }
}

// ---------------------------------------------------------------------------
// MockReporter
// ---------------------------------------------------------------------------

/// Reporter recording event labels in order.
#[derive(Clone, Default)]
pub struct MockReporter {
    labels: Arc<Mutex<Vec<&'static str>>>,
}

impl MockReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn labels(&self) -> Vec<&'static str> {
        self.labels.lock().unwrap().clone()
    }

    pub fn count(&self, label: &str) -> usize {
        self.labels.lock().unwrap().iter().filter(|l| **l == label).count()
    }
}

impl ScrapeReporter for MockReporter {
    fn report(&self, event: ScrapeEvent<'_>) {
        self.labels.lock().unwrap().push(event.label());
    }
}

// ---------------------------------------------------------------------------
// MockStrategy
// ---------------------------------------------------------------------------

const MOCK_PAGE: &str = "<html><head><title>Mock</title></head><body><p>mock body</p><a href='/next'>next</a></body></html>";

/// Strategy that succeeds unless told otherwise, tracking peak concurrency.
#[derive(Clone)]
pub struct MockStrategy {
    delay: Duration,
    reverse: bool,
    failing: Arc<HashSet<String>>,
    panicking: Arc<HashSet<String>>,
    calls: Arc<AtomicUsize>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
}

impl MockStrategy {
    pub fn new() -> Self {
        Self {
            delay: Duration::ZERO,
            reverse: false,
            failing: Arc::new(HashSet::new()),
            panicking: Arc::new(HashSet::new()),
            calls: Arc::new(AtomicUsize::new(0)),
            in_flight: Arc::new(AtomicUsize::new(0)),
            max_in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// URLs ending in a higher number finish sooner.
    pub fn with_reverse_delays(mut self, unit: Duration) -> Self {
        self.delay = unit;
        self.reverse = true;
        self
    }

    pub fn failing_on(mut self, urls: &[&str]) -> Self {
        self.failing = Arc::new(urls.iter().map(|u| u.to_string()).collect());
        self
    }

    pub fn panicking_on(mut self, urls: &[&str]) -> Self {
        self.panicking = Arc::new(urls.iter().map(|u| u.to_string()).collect());
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn delay_for(&self, url: &str) -> Duration {
        if !self.reverse {
            return self.delay;
        }
        let n: u32 = url
            .rsplit('/')
            .next()
            .and_then(|tail| tail.parse().ok())
            .unwrap_or(0);
        self.delay * 32u32.saturating_sub(n)
    }
}

impl Default for MockStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl FetchStrategy for MockStrategy {
    async fn fetch(&self, url: &str) -> ScrapeResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let delay = self.delay_for(url);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.panicking.contains(url) {
            panic!("mock strategy panicked on {url}");
        }
        if self.failing.contains(url) {
            return ScrapeResult::failure(url, ErrorKind::Transport, "mock failure");
        }
        ScrapeResult::success(extract::build_record(
            url,
            url,
            FetchMode::Static,
            MOCK_PAGE.to_string(),
        ))
    }
}

// ---------------------------------------------------------------------------
// MockStore
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
pub struct MockStore {
    saved: Arc<Mutex<Vec<ScrapeResult>>>,
    save_calls: Arc<AtomicUsize>,
    fail: bool,
}

impl MockStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn saved(&self) -> Vec<ScrapeResult> {
        self.saved.lock().unwrap().clone()
    }

    pub fn save_calls(&self) -> usize {
        self.save_calls.load(Ordering::SeqCst)
    }
}

impl ResultStore for MockStore {
    async fn save(&self, results: &[ScrapeResult]) -> Result<(), AppError> {
        self.save_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(AppError::StorageError("disk full".into()));
        }
        self.saved.lock().unwrap().extend_from_slice(results);
        Ok(())
    }

    async fn load(&self) -> Result<Vec<ScrapeResult>, AppError> {
        Ok(self.saved())
    }
}
