use std::sync::Arc;

use galera_core::behavior::BehaviorSimulator;
use galera_core::config::{BehaviorConfig, ConcurrencyMode, PoolConfig, ScrapeConfig, SolverConfig};
use galera_core::models::{ExtractionRecord, ProxyEndpoint};
use galera_core::solver::CaptchaSolver;
use galera_core::traits::{NullBackend, NullOcr};
use galera_core::{
    AdaptedStrategy, Distributor, ErrorKind, IdentityPool, Orchestrator, PlatformAdapter,
    ScrapeResult, StaticFetcher,
};

use crate::integration::common::{FixtureProxies, FixtureSite, article};

type Solver = CaptchaSolver<NullBackend, NullOcr, FixtureSite>;
type Fetcher = StaticFetcher<FixtureSite, FixtureProxies, Solver>;

fn fetcher(site: FixtureSite, proxies: Vec<ProxyEndpoint>, config: ScrapeConfig) -> Fetcher {
    let solver = CaptchaSolver::new(
        NullBackend,
        NullOcr,
        site.clone(),
        SolverConfig::default().with_max_attempts(1),
    );
    StaticFetcher::new(
        site,
        Arc::new(IdentityPool::new(FixtureProxies(proxies), PoolConfig::default())),
        Arc::new(solver),
        BehaviorSimulator::new(BehaviorConfig::disabled()),
        config,
    )
}

fn proxies() -> Vec<ProxyEndpoint> {
    vec![
        ProxyEndpoint::new("10.0.0.1:8080"),
        ProxyEndpoint::new("10.0.0.2:8080"),
        ProxyEndpoint::new("10.0.0.3:8080"),
    ]
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn mixed_batch_keeps_order_and_rotates_on_blocks() {
    let site = FixtureSite::new()
        .page("https://news.test/a", 200, &article("Alpha", "First story."))
        .page("https://news.test/b", 429, "")
        .page("https://news.test/b", 200, &article("Beta", "Second story."))
        .page("https://news.test/c", 503, "<p>Service unavailable</p>");
    let orchestrator = Orchestrator::new(
        fetcher(site.clone(), proxies(), ScrapeConfig::default()),
        &ScrapeConfig::default()
            .with_concurrency_mode(ConcurrencyMode::Threaded)
            .with_concurrency(2),
    );
    let urls: Vec<String> = ["a", "b", "c", "missing"]
        .iter()
        .map(|p| format!("https://news.test/{p}"))
        .collect();

    let results = orchestrator.scrape_many(&urls).await;

    assert_eq!(results.len(), 4);
    for (result, url) in results.iter().zip(&urls) {
        assert_eq!(result.url(), url);
    }

    let alpha = results[0].record().unwrap();
    assert_eq!(alpha.title, "Alpha");
    assert_eq!(alpha.text, "Alpha First story.");
    assert_eq!(alpha.links[0].href, "https://news.test/related");
    assert_eq!(alpha.images[0].src, "https://news.test/img/cover.jpg");

    assert_eq!(results[1].record().unwrap().title, "Beta");
    assert_eq!(site.hits_for("https://news.test/b"), 2);

    let blocked = results[2].as_failure().unwrap();
    assert_eq!(blocked.error_kind, ErrorKind::Blocked);
    assert_eq!(site.hits_for("https://news.test/c"), 3);

    let missing = results[3].as_failure().unwrap();
    assert_eq!(missing.error_kind, ErrorKind::Transport);
    assert!(missing.message.contains("connection refused"));
}

#[tokio::test]
async fn retries_use_a_different_proxy() {
    let site = FixtureSite::new()
        .page("https://shop.test/", 403, "")
        .page("https://shop.test/", 200, &article("Shop", "Open."));
    let fetcher = fetcher(site.clone(), proxies(), ScrapeConfig::default());
    let orchestrator = Orchestrator::new(fetcher, &ScrapeConfig::default());

    let result = orchestrator.scrape("https://shop.test/").await;

    assert!(result.is_success());
    let hits = site.hits();
    assert_eq!(hits.len(), 2);
    assert_ne!(hits[0].1, hits[1].1);
    assert!(hits.iter().all(|(_, proxy)| proxy.starts_with("http://10.0.0.")));
}

#[tokio::test]
async fn text_challenge_is_solved_and_resubmitted() {
    let site = FixtureSite::new()
        .page(
            "https://forum.test/join",
            200,
            "<form><p>What is 7 + 5?</p><input name='answer'></form>",
        )
        .page(
            "https://forum.test/join?captcha_solution=12",
            200,
            &article("Welcome", "You are in."),
        );
    let orchestrator = Orchestrator::new(
        fetcher(site.clone(), vec![], ScrapeConfig::default()),
        &ScrapeConfig::default(),
    );

    let result = orchestrator.scrape("https://forum.test/join").await;

    let record = result.record().unwrap();
    assert_eq!(record.title, "Welcome");
    assert_eq!(record.url, "https://forum.test/join");
    assert_eq!(site.hits_for("https://forum.test/join?captcha_solution=12"), 1);
}

#[tokio::test]
async fn token_challenge_without_service_is_unsolved() {
    let site = FixtureSite::new().page(
        "https://secure.test/",
        200,
        r#"<div class="h-captcha" data-sitekey="site-key"></div>"#,
    );
    let orchestrator = Orchestrator::new(
        fetcher(site.clone(), vec![], ScrapeConfig::default().with_retry_attempts(2)),
        &ScrapeConfig::default(),
    );

    let result = orchestrator.scrape("https://secure.test/").await;

    assert_eq!(
        result.as_failure().unwrap().error_kind,
        ErrorKind::ChallengeUnsolved
    );
    assert_eq!(site.hits_for("https://secure.test/"), 2);
}

struct WordCount;

impl PlatformAdapter for WordCount {
    fn name(&self) -> &str {
        "word-count"
    }

    fn extra_fields(&self, record: &ExtractionRecord) -> serde_json::Map<String, serde_json::Value> {
        let mut fields = serde_json::Map::new();
        fields.insert(
            "word_count".into(),
            record.text.split_whitespace().count().into(),
        );
        fields
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn distributed_adapted_results_serialize_round_trip() {
    let mut site = FixtureSite::new();
    let mut urls = Vec::new();
    for i in 0..7 {
        let url = format!("https://wiki.test/page/{i}");
        site = site.page(&url, 200, &article(&format!("Page {i}"), "one two three"));
        urls.push(url);
    }
    let strategy = AdaptedStrategy::new(fetcher(site, vec![], ScrapeConfig::default()), WordCount);
    let distributor = Distributor::new(Arc::new(strategy));

    let results = distributor.distribute(&urls, 3, 2).await;

    assert_eq!(results.len(), 7);
    for (i, result) in results.iter().enumerate() {
        let record = result.record().unwrap();
        assert_eq!(record.title, format!("Page {i}"));
        assert_eq!(record.extra["word_count"], 5);
    }

    let json = serde_json::to_string(&results).unwrap();
    let back: Vec<ScrapeResult> = serde_json::from_str(&json).unwrap();
    assert_eq!(back, results);
}
