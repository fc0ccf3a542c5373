//! Runtime configuration for every Galera component.
//!
//! Each section has a [`Default`] matching the harvester's stock behaviour and
//! `with_*` builders for overrides. [`GaleraConfig::from_env`] layers
//! `GALERA_*` environment variables on top of the defaults.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::AppError;
use crate::models::{FetchMode, ScrapeRequest};

/// Desktop browser user agents rotated by the identity pool.
pub const DEFAULT_USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Safari/605.1.15",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:125.0) Gecko/20100101 Firefox/125.0",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36 Edg/124.0.0.0",
];

/// How `scrape_many` schedules URLs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConcurrencyMode {
    /// One URL at a time on the caller's task.
    #[default]
    Sequential,
    /// Spawned tasks on the multi-threaded runtime, bounded by `concurrency`.
    Threaded,
    /// An ordered buffered stream polled on the caller's task.
    Cooperative,
}

impl ConcurrencyMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConcurrencyMode::Sequential => "sequential",
            ConcurrencyMode::Threaded => "threaded",
            ConcurrencyMode::Cooperative => "cooperative",
        }
    }
}

impl fmt::Display for ConcurrencyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ConcurrencyMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sequential" => Ok(ConcurrencyMode::Sequential),
            "threaded" => Ok(ConcurrencyMode::Threaded),
            "cooperative" | "async" => Ok(ConcurrencyMode::Cooperative),
            _ => Err(format!("Unknown concurrency mode: {}", s)),
        }
    }
}

// ---------------------------------------------------------------------------
// Scrape
// ---------------------------------------------------------------------------

/// Retry, pacing and request settings shared by both fetch strategies.
#[derive(Debug, Clone)]
pub struct ScrapeConfig {
    /// Request attempts per URL, every attempt counts whatever its outcome.
    pub retry_attempts: u32,
    /// Pacing delay drawn uniformly from this range after a failed attempt.
    pub request_delay: (Duration, Duration),
    /// Per-request timeout.
    pub timeout: Duration,
    /// Maximum in-flight URLs for the threaded and cooperative modes.
    pub concurrency: usize,
    pub concurrency_mode: ConcurrencyMode,
    pub fetch_mode: FetchMode,
    /// Extra headers sent with every static request.
    pub headers: BTreeMap<String, String>,
    /// Fail instead of falling back to a direct connection when no proxy is healthy.
    pub require_proxy: bool,
    /// Hand detected challenges to the solver.
    pub solve_challenges: bool,
}

impl Default for ScrapeConfig {
    fn default() -> Self {
        let headers = [
            ("Accept", "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
            ("Accept-Language", "en-US,en;q=0.5"),
            ("Connection", "keep-alive"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        Self {
            retry_attempts: 3,
            request_delay: (Duration::from_secs(1), Duration::from_secs(5)),
            timeout: Duration::from_secs(30),
            concurrency: 10,
            concurrency_mode: ConcurrencyMode::Sequential,
            fetch_mode: FetchMode::Static,
            headers,
            require_proxy: false,
            solve_challenges: true,
        }
    }
}

impl ScrapeConfig {
    pub fn with_retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = attempts.max(1);
        self
    }

    pub fn with_request_delay(mut self, min: Duration, max: Duration) -> Self {
        self.request_delay = ordered(min, max);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_concurrency_mode(mut self, mode: ConcurrencyMode) -> Self {
        self.concurrency_mode = mode;
        self
    }

    pub fn with_fetch_mode(mut self, mode: FetchMode) -> Self {
        self.fetch_mode = mode;
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_require_proxy(mut self, require: bool) -> Self {
        self.require_proxy = require;
        self
    }

    pub fn with_solve_challenges(mut self, solve: bool) -> Self {
        self.solve_challenges = solve;
        self
    }

    /// Build the immutable request driving one URL's attempt sequence.
    pub fn request_for(&self, url: &str) -> ScrapeRequest {
        ScrapeRequest {
            url: url.to_string(),
            retry_budget: self.retry_attempts.max(1),
            delay_range: self.request_delay,
        }
    }
}

// ---------------------------------------------------------------------------
// Identity pool
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Known-good endpoint used to health-check each candidate proxy.
    pub test_url: String,
    /// Failures after which a proxy leaves the healthy set.
    pub max_failures: u32,
    /// Age after which the healthy set is rebuilt on the next acquire.
    pub refresh_interval: Duration,
    pub check_timeout: Duration,
    /// Health-check candidates before admitting them.
    pub verify: bool,
    pub user_agents: Vec<String>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            test_url: "https://httpbin.org/ip".to_string(),
            max_failures: 3,
            refresh_interval: Duration::from_secs(3600),
            check_timeout: Duration::from_secs(10),
            verify: true,
            user_agents: DEFAULT_USER_AGENTS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl PoolConfig {
    pub fn with_max_failures(mut self, max_failures: u32) -> Self {
        self.max_failures = max_failures.max(1);
        self
    }

    pub fn with_refresh_interval(mut self, interval: Duration) -> Self {
        self.refresh_interval = interval;
        self
    }

    pub fn with_verify(mut self, verify: bool) -> Self {
        self.verify = verify;
        self
    }

    pub fn with_test_url(mut self, url: impl Into<String>) -> Self {
        self.test_url = url.into();
        self
    }

    pub fn with_user_agents(mut self, agents: Vec<String>) -> Self {
        if !agents.is_empty() {
            self.user_agents = agents;
        }
        self
    }
}

// ---------------------------------------------------------------------------
// Challenge solver
// ---------------------------------------------------------------------------

/// Where token challenges and image OCR are resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SolveStrategy {
    /// Arithmetic and local OCR only; token challenges yield no solution.
    #[default]
    Local,
    /// Token and image challenges go to the CAPTCHA backend service.
    External,
}

impl FromStr for SolveStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "local" => Ok(SolveStrategy::Local),
            "external" | "2captcha" => Ok(SolveStrategy::External),
            _ => Err(format!("Unknown solve strategy: {}", s)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SolverConfig {
    pub strategy: SolveStrategy,
    /// Total time allowed for the backend to produce a token.
    pub timeout: Duration,
    pub poll_interval: Duration,
    pub max_attempts: u32,
    pub delay_between_attempts: (Duration, Duration),
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            strategy: SolveStrategy::Local,
            timeout: Duration::from_secs(60),
            poll_interval: Duration::from_secs(5),
            max_attempts: 3,
            delay_between_attempts: (Duration::from_secs(2), Duration::from_secs(5)),
        }
    }
}

impl SolverConfig {
    pub fn with_strategy(mut self, strategy: SolveStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn with_delay_between_attempts(mut self, min: Duration, max: Duration) -> Self {
        self.delay_between_attempts = ordered(min, max);
        self
    }
}

// ---------------------------------------------------------------------------
// Behavior simulator
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct BehaviorConfig {
    /// When false the simulator never sleeps and plans no interactions.
    pub enabled: bool,
    pub min_pause: Duration,
    pub max_pause: Duration,
    /// Chance of one random button click per interaction plan.
    pub click_probability: f64,
    /// Chance of scrolling back to the top after the scroll-by step.
    pub scroll_back_probability: f64,
    /// Range of the pause after each typed character.
    pub typing_delay: (Duration, Duration),
}

impl Default for BehaviorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_pause: Duration::from_millis(500),
            max_pause: Duration::from_secs(2),
            click_probability: 0.1,
            scroll_back_probability: 0.3,
            typing_delay: (Duration::from_millis(100), Duration::from_millis(300)),
        }
    }
}

impl BehaviorConfig {
    /// A simulator that never sleeps, for tests and batch jobs.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            min_pause: Duration::ZERO,
            max_pause: Duration::ZERO,
            typing_delay: (Duration::ZERO, Duration::ZERO),
            ..Self::default()
        }
    }

    pub fn with_pauses(mut self, min: Duration, max: Duration) -> Self {
        (self.min_pause, self.max_pause) = ordered(min, max);
        self
    }

    pub fn with_click_probability(mut self, probability: f64) -> Self {
        self.click_probability = probability.clamp(0.0, 1.0);
        self
    }

    pub fn with_typing_delay(mut self, min: Duration, max: Duration) -> Self {
        self.typing_delay = ordered(min, max);
        self
    }
}

// ---------------------------------------------------------------------------
// Rendered fetcher
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct RenderConfig {
    pub headless: bool,
    pub window_width: u32,
    pub window_height: u32,
    /// Bound on navigation plus document-ready wait.
    pub load_timeout: Duration,
    pub wait_for_ready: bool,
    pub scroll_pause: Duration,
    pub max_scroll_attempts: u32,
    pub simulate_human: bool,
    pub traverse_iframes: bool,
    pub traverse_shadow_dom: bool,
    pub capture_xhr: bool,
    /// Time given to in-flight XHR/fetch calls before harvesting them.
    pub xhr_settle: Duration,
    pub collect_cookies: bool,
    /// `(selector, text)` pairs typed into the page after it loads.
    pub typed_inputs: Vec<(String, String)>,
    /// Extra Chromium command-line flags.
    pub browser_args: Vec<String>,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            headless: true,
            window_width: 1920,
            window_height: 1080,
            load_timeout: Duration::from_secs(30),
            wait_for_ready: true,
            scroll_pause: Duration::from_secs(1),
            max_scroll_attempts: 10,
            simulate_human: true,
            traverse_iframes: true,
            traverse_shadow_dom: true,
            capture_xhr: true,
            xhr_settle: Duration::from_secs(2),
            collect_cookies: true,
            typed_inputs: Vec::new(),
            browser_args: Vec::new(),
        }
    }
}

impl RenderConfig {
    pub fn with_headless(mut self, headless: bool) -> Self {
        self.headless = headless;
        self
    }

    pub fn with_window(mut self, width: u32, height: u32) -> Self {
        self.window_width = width;
        self.window_height = height;
        self
    }

    pub fn with_load_timeout(mut self, timeout: Duration) -> Self {
        self.load_timeout = timeout;
        self
    }

    pub fn with_scroll(mut self, pause: Duration, max_attempts: u32) -> Self {
        self.scroll_pause = pause;
        self.max_scroll_attempts = max_attempts;
        self
    }

    pub fn with_simulate_human(mut self, simulate: bool) -> Self {
        self.simulate_human = simulate;
        self
    }

    pub fn with_xhr_settle(mut self, settle: Duration) -> Self {
        self.xhr_settle = settle;
        self
    }

    pub fn with_typed_input(mut self, selector: impl Into<String>, text: impl Into<String>) -> Self {
        self.typed_inputs.push((selector.into(), text.into()));
        self
    }
}

// ---------------------------------------------------------------------------
// Distribution
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct DistributionConfig {
    pub worker_count: usize,
    pub chunk_size: usize,
}

impl Default for DistributionConfig {
    fn default() -> Self {
        Self {
            worker_count: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            chunk_size: 10,
        }
    }
}

// ---------------------------------------------------------------------------
// Aggregate + environment
// ---------------------------------------------------------------------------

/// Every section in one place, as loaded by the CLI.
#[derive(Debug, Clone, Default)]
pub struct GaleraConfig {
    pub scrape: ScrapeConfig,
    pub pool: PoolConfig,
    pub solver: SolverConfig,
    pub behavior: BehaviorConfig,
    pub render: RenderConfig,
    pub distribution: DistributionConfig,
}

impl GaleraConfig {
    /// Read configuration from `GALERA_*` environment variables.
    ///
    /// - `GALERA_RETRY_ATTEMPTS`, `GALERA_TIMEOUT` (seconds)
    /// - `GALERA_REQUEST_DELAY_MIN`, `GALERA_REQUEST_DELAY_MAX` (seconds)
    /// - `GALERA_CONCURRENCY`, `GALERA_CONCURRENCY_MODE`, `GALERA_FETCH_MODE`
    /// - `GALERA_REQUIRE_PROXY`, `GALERA_PROXY_TEST_URL`,
    ///   `GALERA_PROXY_MAX_FAILURES`, `GALERA_PROXY_REFRESH_INTERVAL`
    /// - `GALERA_CAPTCHA_STRATEGY`, `GALERA_CAPTCHA_TIMEOUT`, `GALERA_CAPTCHA_MAX_ATTEMPTS`
    /// - `GALERA_HEADLESS`, `GALERA_LOAD_TIMEOUT`
    /// - `GALERA_WORKERS`, `GALERA_CHUNK_SIZE`
    ///
    /// Unset variables keep their defaults; malformed ones are a `ConfigError`.
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an injectable variable source.
    pub fn from_lookup<L>(lookup: L) -> Result<Self, AppError>
    where
        L: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let env = EnvReader { lookup };

        let scrape = &mut config.scrape;
        scrape.retry_attempts = env.positive("GALERA_RETRY_ATTEMPTS", scrape.retry_attempts)?;
        scrape.timeout = env.seconds("GALERA_TIMEOUT", scrape.timeout)?;
        let min = env.seconds("GALERA_REQUEST_DELAY_MIN", scrape.request_delay.0)?;
        let max = env.seconds("GALERA_REQUEST_DELAY_MAX", scrape.request_delay.1)?;
        if min > max {
            return Err(AppError::ConfigError(
                "GALERA_REQUEST_DELAY_MIN must not exceed GALERA_REQUEST_DELAY_MAX".into(),
            ));
        }
        scrape.request_delay = (min, max);
        scrape.concurrency = env.positive("GALERA_CONCURRENCY", scrape.concurrency)?;
        scrape.concurrency_mode = env.parsed("GALERA_CONCURRENCY_MODE", scrape.concurrency_mode)?;
        scrape.fetch_mode = env.parsed("GALERA_FETCH_MODE", scrape.fetch_mode)?;
        scrape.require_proxy = env.flag("GALERA_REQUIRE_PROXY", scrape.require_proxy)?;

        let pool = &mut config.pool;
        if let Some(url) = env.get("GALERA_PROXY_TEST_URL") {
            pool.test_url = url;
        }
        pool.max_failures = env.positive("GALERA_PROXY_MAX_FAILURES", pool.max_failures)?;
        pool.refresh_interval = env.seconds("GALERA_PROXY_REFRESH_INTERVAL", pool.refresh_interval)?;

        let solver = &mut config.solver;
        solver.strategy = env.parsed("GALERA_CAPTCHA_STRATEGY", solver.strategy)?;
        solver.timeout = env.seconds("GALERA_CAPTCHA_TIMEOUT", solver.timeout)?;
        solver.max_attempts = env.positive("GALERA_CAPTCHA_MAX_ATTEMPTS", solver.max_attempts)?;

        let render = &mut config.render;
        render.headless = env.flag("GALERA_HEADLESS", render.headless)?;
        render.load_timeout = env.seconds("GALERA_LOAD_TIMEOUT", render.load_timeout)?;

        let distribution = &mut config.distribution;
        distribution.worker_count = env.positive("GALERA_WORKERS", distribution.worker_count)?;
        distribution.chunk_size = env.positive("GALERA_CHUNK_SIZE", distribution.chunk_size)?;

        Ok(config)
    }
}

struct EnvReader<L> {
    lookup: L,
}

impl<L> EnvReader<L>
where
    L: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parsed<T>(&self, key: &str, default: T) -> Result<T, AppError>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        match self.get(key) {
            None => Ok(default),
            Some(raw) => raw
                .parse()
                .map_err(|e| AppError::ConfigError(format!("Invalid {key} '{raw}': {e}"))),
        }
    }

    fn positive<T>(&self, key: &str, default: T) -> Result<T, AppError>
    where
        T: FromStr + PartialOrd + Default,
        T::Err: fmt::Display,
    {
        let value = self.parsed(key, default)?;
        if value <= T::default() {
            return Err(AppError::ConfigError(format!("{key} must be at least 1")));
        }
        Ok(value)
    }

    fn seconds(&self, key: &str, default: Duration) -> Result<Duration, AppError> {
        match self.get(key) {
            None => Ok(default),
            Some(raw) => {
                let secs: f64 = raw.parse().map_err(|_| {
                    AppError::ConfigError(format!(
                        "Invalid {key} '{raw}': must be a number of seconds"
                    ))
                })?;
                Duration::try_from_secs_f64(secs).map_err(|_| {
                    AppError::ConfigError(format!(
                        "Invalid {key} '{raw}': must be a non-negative number of seconds"
                    ))
                })
            }
        }
    }

    fn flag(&self, key: &str, default: bool) -> Result<bool, AppError> {
        match self.get(key).map(|v| v.to_lowercase()) {
            None => Ok(default),
            Some(v) if matches!(v.as_str(), "1" | "true" | "yes" | "on") => Ok(true),
            Some(v) if matches!(v.as_str(), "0" | "false" | "no" | "off") => Ok(false),
            Some(v) => Err(AppError::ConfigError(format!(
                "Invalid {key} '{v}': expected true or false"
            ))),
        }
    }
}

fn ordered(a: Duration, b: Duration) -> (Duration, Duration) {
    if a <= b { (a, b) } else { (b, a) }
}
