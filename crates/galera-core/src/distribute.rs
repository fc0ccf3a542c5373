//! Chunked fan-out of a URL list across bounded workers.
//!
//! ```text
//! urls --chunks(chunk_size)--> [c0][c1][c2]...
//!                                |   |   |     at most worker_count spawned
//!                                v   v   v     each chunk scraped sequentially
//!                              drained in submission order --> merged results
//! ```

use std::sync::Arc;

use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::models::ScrapeResult;
use crate::reporter::{ScrapeEvent, ScrapeReporter, TracingReporter};
use crate::traits::FetchStrategy;

pub struct Distributor<S> {
    strategy: Arc<S>,
    cancel: CancellationToken,
    reporter: Arc<dyn ScrapeReporter>,
}

impl<S> Distributor<S>
where
    S: FetchStrategy + 'static,
{
    pub fn new(strategy: Arc<S>) -> Self {
        Self {
            strategy,
            cancel: CancellationToken::new(),
            reporter: Arc::new(TracingReporter),
        }
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn ScrapeReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Token that stops further chunk submission when cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub async fn distribute(&self, urls: &[String], worker_count: usize, chunk_size: usize) -> Vec<ScrapeResult> {
        self.distribute_with_progress(urls, worker_count, chunk_size, |_, _| {})
            .await
    }

    /// Like [`distribute`](Self::distribute), calling `progress(completed, total)`
    /// as each chunk is drained.
    ///
    /// A chunk whose worker panics is logged and its URLs are left out. Once
    /// the token is cancelled no new chunk starts; chunks already running
    /// finish and their results are returned.
    pub async fn distribute_with_progress<F>(
        &self,
        urls: &[String],
        worker_count: usize,
        chunk_size: usize,
        mut progress: F,
    ) -> Vec<ScrapeResult>
    where
        F: FnMut(usize, usize),
    {
        let worker_count = worker_count.max(1);
        let chunks: Vec<Vec<String>> = urls.chunks(chunk_size.max(1)).map(<[String]>::to_vec).collect();
        let total = chunks.len();
        tracing::info!(
            component = "distributor",
            urls = urls.len(),
            chunks = total,
            workers = worker_count,
            "Distributing"
        );

        let cancel = self.cancel.clone();
        let mut drained = futures::stream::iter(chunks.into_iter().enumerate())
            .take_while(move |_| futures::future::ready(!cancel.is_cancelled()))
            .map(|(index, chunk)| {
                let strategy = Arc::clone(&self.strategy);
                let handle = tokio::spawn(async move {
                    let mut results = Vec::with_capacity(chunk.len());
                    for url in &chunk {
                        results.push(strategy.fetch(url).await);
                    }
                    results
                });
                async move { (index, handle.await) }
            })
            .buffered(worker_count);

        let mut results = Vec::with_capacity(urls.len());
        let mut completed = 0;
        while let Some((chunk, joined)) = drained.next().await {
            completed += 1;
            match joined {
                Ok(chunk_results) => {
                    results.extend(chunk_results);
                    self.reporter.report(ScrapeEvent::ChunkCompleted {
                        chunk,
                        completed,
                        total,
                    });
                }
                Err(e) => {
                    let error = e.to_string();
                    self.reporter.report(ScrapeEvent::ChunkFailed {
                        chunk,
                        error: &error,
                    });
                }
            }
            progress(completed, total);
        }

        if completed < total {
            self.reporter.report(ScrapeEvent::DistributionCancelled {
                submitted: completed,
                total,
            });
        }
        results
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use super::*;
    use crate::testutil::*;

    fn urls(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("https://site.test/{i}")).collect()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_merges_chunks_in_input_order() {
        let input = urls(23);
        let distributor = Distributor::new(Arc::new(
            MockStrategy::new().with_reverse_delays(Duration::from_millis(1)),
        ));

        let results = distributor.distribute(&input, 4, 5).await;

        assert_eq!(results.len(), 23);
        for (result, url) in results.iter().zip(&input) {
            assert_eq!(result.url(), url);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_at_most_worker_count_fetches_in_flight() {
        let strategy = Arc::new(MockStrategy::new().with_delay(Duration::from_millis(10)));
        let distributor = Distributor::new(Arc::clone(&strategy));

        distributor.distribute(&urls(20), 2, 3).await;

        assert!(strategy.max_in_flight() <= 2);
        assert_eq!(strategy.calls(), 20);
    }

    #[tokio::test]
    async fn test_progress_reports_every_chunk() {
        let distributor = Distributor::new(Arc::new(MockStrategy::new()));
        let seen = Mutex::new(Vec::new());

        distributor
            .distribute_with_progress(&urls(7), 2, 3, |done, total| {
                seen.lock().unwrap().push((done, total));
            })
            .await;

        assert_eq!(seen.into_inner().unwrap(), vec![(1, 3), (2, 3), (3, 3)]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_panicking_chunk_is_excluded() {
        let reporter = MockReporter::new();
        let distributor = Distributor::new(Arc::new(
            MockStrategy::new().panicking_on(&["https://site.test/3"]),
        ))
        .with_reporter(Arc::new(reporter.clone()));

        let results = distributor.distribute(&urls(9), 2, 3).await;

        let got: Vec<&str> = results.iter().map(ScrapeResult::url).collect();
        assert_eq!(
            got,
            vec![
                "https://site.test/0",
                "https://site.test/1",
                "https://site.test/2",
                "https://site.test/6",
                "https://site.test/7",
                "https://site.test/8",
            ]
        );
        assert_eq!(reporter.count("chunk_failed"), 1);
        assert_eq!(reporter.count("chunk_completed"), 2);
    }

    #[tokio::test]
    async fn test_cancellation_stops_new_chunks_and_keeps_drained_results() {
        let reporter = MockReporter::new();
        let distributor = Distributor::new(Arc::new(MockStrategy::new()))
            .with_reporter(Arc::new(reporter.clone()));
        let token = distributor.cancellation_token();

        let results = distributor
            .distribute_with_progress(&urls(6), 1, 2, |done, _| {
                if done == 1 {
                    token.cancel();
                }
            })
            .await;

        assert_eq!(results.len(), 2);
        assert_eq!(reporter.count("distribution_cancelled"), 1);
    }

    #[tokio::test]
    async fn test_zero_sizes_are_clamped() {
        let distributor = Distributor::new(Arc::new(MockStrategy::new()));
        let results = distributor.distribute(&urls(3), 0, 0).await;
        assert_eq!(results.len(), 3);
    }

    #[tokio::test]
    async fn test_empty_input_yields_nothing() {
        let distributor = Distributor::new(Arc::new(MockStrategy::new()));
        assert!(distributor.distribute(&[], 4, 10).await.is_empty());
    }
}
