use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::Semaphore;

use crate::config::{ConcurrencyMode, ScrapeConfig};
use crate::error::{AppError, ErrorKind};
use crate::models::ScrapeResult;
use crate::traits::{FetchStrategy, ResultStore};

/// Drives a fetch strategy over one or many URLs.
///
/// Returns exactly one result per input URL, in input order, in every
/// concurrency mode. Retries stay inside the strategy.
pub struct Orchestrator<S> {
    strategy: Arc<S>,
    mode: ConcurrencyMode,
    concurrency: usize,
}

impl<S> Clone for Orchestrator<S> {
    fn clone(&self) -> Self {
        Self {
            strategy: Arc::clone(&self.strategy),
            mode: self.mode,
            concurrency: self.concurrency,
        }
    }
}

impl<S> Orchestrator<S>
where
    S: FetchStrategy + 'static,
{
    /// Mode and concurrency are fixed here for the orchestrator's lifetime.
    pub fn new(strategy: S, config: &ScrapeConfig) -> Self {
        Self::shared(Arc::new(strategy), config.concurrency_mode, config.concurrency)
    }

    pub fn shared(strategy: Arc<S>, mode: ConcurrencyMode, concurrency: usize) -> Self {
        Self {
            strategy,
            mode,
            concurrency: concurrency.max(1),
        }
    }

    pub fn strategy(&self) -> &Arc<S> {
        &self.strategy
    }

    pub fn mode(&self) -> ConcurrencyMode {
        self.mode
    }

    pub async fn scrape(&self, url: &str) -> ScrapeResult {
        self.strategy.fetch(url).await
    }

    pub async fn scrape_many(&self, urls: &[String]) -> Vec<ScrapeResult> {
        tracing::info!(
            component = "orchestrator",
            urls = urls.len(),
            mode = %self.mode,
            concurrency = self.concurrency,
            "Scraping batch"
        );

        let results = match self.mode {
            ConcurrencyMode::Sequential => {
                let mut results = Vec::with_capacity(urls.len());
                for url in urls {
                    results.push(self.strategy.fetch(url).await);
                }
                results
            }
            ConcurrencyMode::Threaded => self.scrape_threaded(urls).await,
            ConcurrencyMode::Cooperative => {
                futures::stream::iter(urls)
                    .map(|url| self.strategy.fetch(url))
                    .buffered(self.concurrency)
                    .collect()
                    .await
            }
        };

        let succeeded = results.iter().filter(|r| r.is_success()).count();
        tracing::info!(
            component = "orchestrator",
            succeeded,
            failed = results.len() - succeeded,
            "Batch finished"
        );
        results
    }

    /// One spawned task per URL, bounded by a semaphore, joined in input order.
    async fn scrape_threaded(&self, urls: &[String]) -> Vec<ScrapeResult> {
        let permits = Arc::new(Semaphore::new(self.concurrency));
        let handles: Vec<_> = urls
            .iter()
            .map(|url| {
                let strategy = Arc::clone(&self.strategy);
                let permits = Arc::clone(&permits);
                let url = url.clone();
                tokio::spawn(async move {
                    let _permit = permits.acquire_owned().await;
                    strategy.fetch(&url).await
                })
            })
            .collect();

        let mut results = Vec::with_capacity(urls.len());
        for (url, handle) in urls.iter().zip(handles) {
            let result = match handle.await {
                Ok(result) => result,
                Err(e) => {
                    tracing::error!(component = "orchestrator", %url, error = %e, "Scrape task failed");
                    ScrapeResult::failure(url, ErrorKind::Internal, format!("Scrape task failed: {e}"))
                }
            };
            results.push(result);
        }
        results
    }

    /// Scrapes everything, then hands the final results to `store` once.
    pub async fn scrape_and_save<R: ResultStore>(
        &self,
        urls: &[String],
        store: &R,
    ) -> Result<Vec<ScrapeResult>, AppError> {
        let results = self.scrape_many(urls).await;
        store.save(&results).await?;
        Ok(results)
    }
}
