use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use galera_client::{
    ApiProxyProvider, FileDownloader, ProxySource, ReqwestTransport, StaticProxyList, TesseractOcr,
    TwoCaptchaBackend, WikipediaAdapter,
};
use galera_core::behavior::BehaviorSimulator;
use galera_core::config::{ConcurrencyMode, GaleraConfig, SolveStrategy};
use galera_core::models::FetchMode;
use galera_core::solver::CaptchaSolver;
use galera_core::traits::ResultStore;
use galera_core::{
    AdaptedStrategy, Distributor, FetchStrategy, IdentityPool, Orchestrator, ScrapeResult,
    StaticFetcher,
};
use galera_store::{CsvStore, JsonFileStore};

#[derive(Parser)]
#[command(name = "galera", version, about = "Web harvesting engine")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scrape URLs on this process with the configured concurrency mode
    Scrape {
        #[command(flatten)]
        run: RunArgs,

        /// How URLs are scheduled
        #[arg(long, env = "GALERA_CONCURRENCY_MODE")]
        concurrency_mode: Option<ConcurrencyMode>,

        /// Maximum URLs in flight (threaded and cooperative modes)
        #[arg(short, long, env = "GALERA_CONCURRENCY")]
        concurrency: Option<usize>,
    },

    /// Split URLs into chunks and scrape them across bounded workers
    Distribute {
        #[command(flatten)]
        run: RunArgs,

        /// Concurrent chunk workers
        #[arg(short, long, env = "GALERA_WORKERS")]
        workers: Option<usize>,

        /// URLs per chunk
        #[arg(long, env = "GALERA_CHUNK_SIZE")]
        chunk_size: Option<usize>,
    },

    /// Stream a single file (PDF, CSV, archive) to disk
    Download {
        /// File URL
        url: String,

        /// Destination path; parent directories are created
        #[arg(short, long)]
        output: PathBuf,
    },
}

#[derive(Args)]
struct RunArgs {
    /// Target URLs
    urls: Vec<String>,

    /// File with one URL per line (`#` starts a comment)
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Write results here instead of printing JSON to stdout
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Output format (defaults to the output file extension, else json)
    #[arg(long, value_enum)]
    format: Option<OutputFormat>,

    /// static or rendered
    #[arg(short, long, env = "GALERA_FETCH_MODE")]
    mode: Option<FetchMode>,

    /// Attempts per URL
    #[arg(short, long, env = "GALERA_RETRY_ATTEMPTS")]
    retries: Option<u32>,

    /// Proxies (`host:port` or `scheme://[user:pass@]host:port`), comma separated
    #[arg(long, env = "GALERA_PROXIES", value_delimiter = ',')]
    proxies: Vec<String>,

    /// Proxy provider API endpoint
    #[arg(long, env = "GALERA_PROXY_API_URL")]
    proxy_api: Option<String>,

    #[arg(long, env = "GALERA_PROXY_API_KEY", hide_env_values = true)]
    proxy_api_key: Option<String>,

    /// Country filter for the proxy API, comma separated
    #[arg(long, env = "GALERA_PROXY_COUNTRIES", value_delimiter = ',')]
    proxy_countries: Vec<String>,

    #[arg(long, env = "GALERA_PROXY_USERNAME")]
    proxy_username: Option<String>,

    #[arg(long, env = "GALERA_PROXY_PASSWORD", hide_env_values = true)]
    proxy_password: Option<String>,

    /// Fail URLs instead of going direct when no proxy is healthy
    #[arg(long, default_value_t = false)]
    require_proxy: bool,

    /// Skip proxy health checks
    #[arg(long, default_value_t = false)]
    no_verify_proxies: bool,

    /// 2captcha API key; enables the external solving strategy
    #[arg(long, env = "GALERA_CAPTCHA_API_KEY", hide_env_values = true)]
    captcha_api_key: Option<String>,

    /// Do not attempt to solve challenges
    #[arg(long, default_value_t = false)]
    no_solve: bool,

    /// Disable pacing delays and human-like interaction
    #[arg(long, default_value_t = false)]
    no_behavior: bool,

    /// Add Wikipedia article fields to each record
    #[arg(long, default_value_t = false)]
    wikipedia: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Json,
    Csv,
}

/// How the URL list is executed.
enum Job {
    Scrape,
    Distribute { workers: usize, chunk_size: usize },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("galera=info".parse()?))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = GaleraConfig::from_env().map_err(|e| anyhow::anyhow!(e))?;

    let (run, job) = match cli.command {
        Commands::Scrape {
            run,
            concurrency_mode,
            concurrency,
        } => {
            if let Some(mode) = concurrency_mode {
                config.scrape.concurrency_mode = mode;
            }
            if let Some(n) = concurrency {
                config.scrape.concurrency = n.max(1);
            }
            (run, Job::Scrape)
        }
        Commands::Distribute {
            run,
            workers,
            chunk_size,
        } => {
            let workers = workers.unwrap_or(config.distribution.worker_count);
            let chunk_size = chunk_size.unwrap_or(config.distribution.chunk_size);
            (run, Job::Distribute { workers, chunk_size })
        }
        Commands::Download { url, output } => return download(&config, &url, &output).await,
    };

    apply_run_args(&mut config, &run);
    let urls = collect_urls(&run)?;
    if urls.is_empty() {
        bail!("No URLs given. Pass them as arguments or with --input.");
    }

    let results = dispatch(&config, &run, &job, &urls).await?;
    report(&results);

    match &run.output {
        Some(path) => save(path, run.format, &results).await?,
        None => println!("{}", serde_json::to_string_pretty(&results)?),
    }

    Ok(())
}

async fn download(config: &GaleraConfig, url: &str, output: &Path) -> Result<()> {
    let downloader = FileDownloader::from_config(&config.scrape)?;
    let written = downloader
        .download(url, output)
        .await
        .with_context(|| format!("Failed to download {url}"))?;
    println!("{} bytes -> {}", written, output.display());
    Ok(())
}

fn apply_run_args(config: &mut GaleraConfig, run: &RunArgs) {
    if let Some(mode) = run.mode {
        config.scrape.fetch_mode = mode;
    }
    if let Some(retries) = run.retries {
        config.scrape.retry_attempts = retries.max(1);
    }
    if run.require_proxy {
        config.scrape.require_proxy = true;
    }
    if run.no_verify_proxies {
        config.pool.verify = false;
    }
    if run.no_solve {
        config.scrape.solve_challenges = false;
    }
    if run.no_behavior {
        config.behavior.enabled = false;
        config.render.simulate_human = false;
    }
    if run.captcha_api_key.is_some() {
        config.solver.strategy = SolveStrategy::External;
    }
}

/// Positional URLs followed by those read from `--input`, each validated.
fn collect_urls(run: &RunArgs) -> Result<Vec<String>> {
    let mut urls = run.urls.clone();
    if let Some(path) = &run.input {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read URL list: {}", path.display()))?;
        urls.extend(parse_url_list(&raw));
    }
    for url in &urls {
        url::Url::parse(url).with_context(|| format!("Invalid URL: {url}"))?;
    }
    Ok(urls)
}

fn parse_url_list(raw: &str) -> Vec<String> {
    raw.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(String::from)
        .collect()
}

fn proxy_source(run: &RunArgs) -> Result<ProxySource> {
    let credentials = run.proxy_username.as_deref().zip(run.proxy_password.as_deref());

    if let Some(endpoint) = &run.proxy_api {
        let mut provider = ApiProxyProvider::new(endpoint)
            .map_err(|e| anyhow::anyhow!(e))?
            .with_countries(run.proxy_countries.clone());
        if let Some(key) = &run.proxy_api_key {
            provider = provider.with_api_key(key);
        }
        if let Some((user, pass)) = credentials {
            provider = provider.with_credentials(user, pass);
        }
        return Ok(ProxySource::Api(provider));
    }

    if !run.proxies.is_empty() {
        let mut list = StaticProxyList::parse(&run.proxies)
            .map_err(|e| anyhow::anyhow!(e))
            .context("Invalid --proxies entry")?;
        if let Some((user, pass)) = credentials {
            list = list.with_credentials(user, pass);
        }
        return Ok(ProxySource::List(list));
    }

    Ok(ProxySource::direct())
}

/// Builds the stack for the configured fetch mode and runs the job on it.
async fn dispatch(config: &GaleraConfig, run: &RunArgs, job: &Job, urls: &[String]) -> Result<Vec<ScrapeResult>> {
    let proxies = proxy_source(run)?;
    tracing::info!(
        proxies = proxies.label(),
        mode = %config.scrape.fetch_mode,
        urls = urls.len(),
        "Starting"
    );

    let transport = ReqwestTransport::from_config(&config.scrape)
        .map_err(|e| anyhow::anyhow!(e))
        .context("Failed to create HTTP client")?;
    let backend = TwoCaptchaBackend::new(run.captcha_api_key.clone().unwrap_or_default())
        .map_err(|e| anyhow::anyhow!(e))?;
    let solver = Arc::new(CaptchaSolver::new(
        backend,
        TesseractOcr::new(),
        transport.clone(),
        config.solver.clone(),
    ));
    let pool = Arc::new(IdentityPool::new(proxies, config.pool.clone()));
    let behavior = BehaviorSimulator::new(config.behavior.clone());

    match config.scrape.fetch_mode {
        FetchMode::Static => {
            let fetcher = StaticFetcher::new(transport, pool, solver, behavior, config.scrape.clone());
            with_adapter(fetcher, config, run, job, urls).await
        }
        #[cfg(feature = "browser")]
        FetchMode::Rendered => {
            let fetcher = galera_core::RenderedFetcher::new(
                galera_client::ChromiumLauncher::new(),
                pool,
                solver,
                behavior,
                config.scrape.clone(),
                config.render.clone(),
            );
            with_adapter(fetcher, config, run, job, urls).await
        }
        #[cfg(not(feature = "browser"))]
        FetchMode::Rendered => {
            bail!("Rendered mode needs a build with the `browser` feature")
        }
    }
}

async fn with_adapter<S>(
    strategy: S,
    config: &GaleraConfig,
    run: &RunArgs,
    job: &Job,
    urls: &[String],
) -> Result<Vec<ScrapeResult>>
where
    S: FetchStrategy + 'static,
{
    if run.wikipedia {
        execute(AdaptedStrategy::new(strategy, WikipediaAdapter::new()), config, job, urls).await
    } else {
        execute(strategy, config, job, urls).await
    }
}

async fn execute<S>(strategy: S, config: &GaleraConfig, job: &Job, urls: &[String]) -> Result<Vec<ScrapeResult>>
where
    S: FetchStrategy + 'static,
{
    match job {
        Job::Scrape => Ok(Orchestrator::new(strategy, &config.scrape).scrape_many(urls).await),
        Job::Distribute { workers, chunk_size } => {
            let cancel = CancellationToken::new();
            let on_signal = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::warn!("Interrupted, finishing in-flight chunks");
                    on_signal.cancel();
                }
            });

            let distributor = Distributor::new(Arc::new(strategy)).with_cancellation(cancel);
            Ok(distributor
                .distribute_with_progress(urls, *workers, *chunk_size, |done, total| {
                    tracing::info!(done, total, "Chunk finished");
                })
                .await)
        }
    }
}

fn report(results: &[ScrapeResult]) {
    let succeeded = results.iter().filter(|r| r.is_success()).count();
    tracing::info!(
        succeeded,
        failed = results.len() - succeeded,
        "Scrape complete"
    );
    for failure in results.iter().filter_map(ScrapeResult::as_failure) {
        tracing::warn!(
            url = %failure.url,
            kind = %failure.error_kind,
            "{}",
            failure.message
        );
    }
}

fn output_format(path: &Path, explicit: Option<OutputFormat>) -> OutputFormat {
    explicit.unwrap_or_else(|| match path.extension().and_then(|e| e.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("csv") => OutputFormat::Csv,
        _ => OutputFormat::Json,
    })
}

async fn save(path: &Path, format: Option<OutputFormat>, results: &[ScrapeResult]) -> Result<()> {
    let saved = match output_format(path, format) {
        OutputFormat::Json => JsonFileStore::new(path).save(results).await,
        OutputFormat::Csv => CsvStore::new(path).save(results).await,
    };
    saved
        .map_err(|e| anyhow::anyhow!(e))
        .with_context(|| format!("Failed to save results to {}", path.display()))
}
