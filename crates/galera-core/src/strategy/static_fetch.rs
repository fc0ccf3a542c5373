use std::sync::Arc;

use crate::behavior::BehaviorSimulator;
use crate::config::ScrapeConfig;
use crate::detect;
use crate::error::AppError;
use crate::extract;
use crate::models::{ExtractionRecord, FetchMode, FetchOutcome, Identity, RawResponse, ScrapeResult};
use crate::pool::IdentityPool;
use crate::reporter::{ScrapeEvent, ScrapeReporter, TracingReporter};
use crate::traits::{ChallengeSolver, FetchStrategy, HttpTransport, ProxyProvider};

use super::{AttemptLoop, solve_challenge, with_solution};

const COMPONENT: &str = "static";

/// Plain HTTP fetcher with identity rotation, block handling and challenge resubmission.
pub struct StaticFetcher<T, P, C> {
    transport: T,
    pool: Arc<IdentityPool<P>>,
    solver: Arc<C>,
    behavior: BehaviorSimulator,
    config: ScrapeConfig,
    reporter: Arc<dyn ScrapeReporter>,
}

impl<T, P, C> StaticFetcher<T, P, C>
where
    T: HttpTransport,
    P: ProxyProvider,
    C: ChallengeSolver,
{
    pub fn new(
        transport: T,
        pool: Arc<IdentityPool<P>>,
        solver: Arc<C>,
        behavior: BehaviorSimulator,
        config: ScrapeConfig,
    ) -> Self {
        Self {
            transport,
            pool,
            solver,
            behavior,
            config,
            reporter: Arc::new(TracingReporter),
        }
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn ScrapeReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn pool(&self) -> &Arc<IdentityPool<P>> {
        &self.pool
    }

    /// One `Request -> outcome` cycle, including a challenge resubmission.
    async fn attempt(&self, url: &str, identity: Identity, attempt: u32) -> Result<ExtractionRecord, AppError> {
        let response = self.transport.get(url, &identity).await?;

        match detect::assess(&response, None) {
            FetchOutcome::Success { .. } => self.parse(url, response),
            FetchOutcome::Blocked { signal } => Err(AppError::Blocked(signal)),
            FetchOutcome::TransportError { cause } => Err(AppError::NetworkError(cause)),
            FetchOutcome::ChallengePresented {
                challenge_kind,
                raw_content,
            } => {
                self.reporter.report(ScrapeEvent::ChallengeDetected {
                    component: COMPONENT,
                    url,
                    attempt,
                    kind: challenge_kind,
                });
                let token = solve_challenge(
                    self.solver.as_ref(),
                    self.config.solve_challenges,
                    challenge_kind,
                    &raw_content,
                    &response.final_url,
                )
                .await?;
                self.reporter.report(ScrapeEvent::ChallengeSolved {
                    component: COMPONENT,
                    url,
                    attempt,
                    kind: challenge_kind,
                });

                let resubmit_url = with_solution(url, &token)?;
                let response = self.transport.get(&resubmit_url, &identity).await?;
                if detect::is_blocked(response.status, &response.body) {
                    return Err(AppError::Blocked(format!(
                        "HTTP {} after challenge resubmission",
                        response.status
                    )));
                }
                self.parse(url, response)
            }
        }
    }

    fn parse(&self, url: &str, response: RawResponse) -> Result<ExtractionRecord, AppError> {
        if response.status >= 400 {
            return Err(AppError::HttpError(format!(
                "HTTP {} for {}",
                response.status, response.final_url
            )));
        }
        let RawResponse {
            status,
            headers,
            body,
            final_url,
        } = response;
        let mut record = extract::build_record(url, &final_url, FetchMode::Static, body);
        record.status_code = Some(status);
        record.headers = Some(headers);
        Ok(record)
    }
}

impl<T, P, C> FetchStrategy for StaticFetcher<T, P, C>
where
    T: HttpTransport,
    P: ProxyProvider,
    C: ChallengeSolver,
{
    async fn fetch(&self, url: &str) -> ScrapeResult {
        let request = self.config.request_for(url);
        let attempts = AttemptLoop {
            component: COMPONENT,
            pool: &self.pool,
            behavior: &self.behavior,
            reporter: &self.reporter,
            require_proxy: self.config.require_proxy,
        };
        attempts
            .run(&request, |identity, n| self.attempt(url, identity, n))
            .await
    }
}
