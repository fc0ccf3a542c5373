//! Fetch strategies and the attempt loop they share.
//!
//! ```text
//! Start -> acquire identity -> Request --clean--> Parse -> Success
//!              ^                  |
//!              |                  +--blocked/transport--> mark failed, pace --+
//!              |                  +--challenge--> Solve -> Resubmit -> Parse  |
//!              +--------------------------------------------------------------+
//! ```
//!
//! Every request consumes one unit of the retry budget whatever its outcome.

pub mod rendered;
pub mod static_fetch;

use std::future::Future;
use std::sync::Arc;

pub use rendered::RenderedFetcher;
pub use static_fetch::StaticFetcher;

use url::Url;

use crate::behavior::BehaviorSimulator;
use crate::error::AppError;
use crate::models::{ChallengeKind, ExtractionRecord, Identity, ScrapeRequest, ScrapeResult};
use crate::pool::IdentityPool;
use crate::reporter::{ScrapeEvent, ScrapeReporter};
use crate::traits::{ChallengeSolver, ProxyProvider};

/// Query parameter carrying a challenge token on resubmission.
pub const SOLUTION_PARAM: &str = "captcha_solution";

/// Collaborators the attempt loop needs, borrowed from a fetcher.
pub(crate) struct AttemptLoop<'a, P> {
    pub component: &'static str,
    pub pool: &'a IdentityPool<P>,
    pub behavior: &'a BehaviorSimulator,
    pub reporter: &'a Arc<dyn ScrapeReporter>,
    pub require_proxy: bool,
}

impl<P: ProxyProvider> AttemptLoop<'_, P> {
    /// Drives `attempt` until it yields a record or the budget runs out.
    pub async fn run<F, Fut>(&self, request: &ScrapeRequest, mut attempt: F) -> ScrapeResult
    where
        F: FnMut(Identity, u32) -> Fut,
        Fut: Future<Output = Result<ExtractionRecord, AppError>>,
    {
        let url = request.url.as_str();
        let budget = request.retry_budget.max(1);
        let mut last_error = None;

        for n in 1..=budget {
            let identity = match self.identity().await {
                Ok(identity) => identity,
                Err(e) => {
                    let message = e.to_string();
                    self.reporter.report(ScrapeEvent::Exhausted {
                        component: self.component,
                        url,
                        attempts: n - 1,
                        error: &message,
                    });
                    return ScrapeResult::from_error(url, &e);
                }
            };
            let proxy = identity.label();
            if n > 1 {
                self.reporter.report(ScrapeEvent::IdentityRotated {
                    component: self.component,
                    url,
                    attempt: n,
                    proxy: &proxy,
                });
            }
            self.reporter.report(ScrapeEvent::AttemptStarted {
                component: self.component,
                url,
                attempt: n,
                proxy: &proxy,
            });

            match attempt(identity.clone(), n).await {
                Ok(record) => {
                    self.behavior.pace_within(request.delay_range).await;
                    self.reporter.report(ScrapeEvent::Succeeded {
                        component: self.component,
                        url,
                        attempts: n,
                    });
                    return ScrapeResult::success(record);
                }
                Err(e) => {
                    if e.penalises_identity() {
                        self.pool.mark_failed(&identity);
                    }
                    let will_retry = n < budget;
                    let message = e.to_string();
                    if let AppError::Blocked(reason) = &e {
                        self.reporter.report(ScrapeEvent::Blocked {
                            component: self.component,
                            url,
                            attempt: n,
                            reason,
                        });
                    }
                    self.reporter.report(ScrapeEvent::AttemptFailed {
                        component: self.component,
                        url,
                        attempt: n,
                        error: &message,
                        will_retry,
                    });
                    if will_retry {
                        self.behavior.pace_within(request.delay_range).await;
                    }
                    last_error = Some(e);
                }
            }
        }

        let error = last_error
            .unwrap_or_else(|| AppError::Generic(format!("No attempt made for {url}")));
        let message = error.to_string();
        self.reporter.report(ScrapeEvent::Exhausted {
            component: self.component,
            url,
            attempts: budget,
            error: &message,
        });
        ScrapeResult::from_error(url, &error)
    }

    /// A pooled identity, or a direct one when the pool is empty and allowed.
    async fn identity(&self) -> Result<Identity, AppError> {
        match self.pool.acquire().await {
            Some(identity) => Ok(identity),
            None if self.require_proxy => Err(AppError::ProxyError(
                "No healthy proxy available and a proxy is required".into(),
            )),
            None => Ok(self.pool.direct_identity()),
        }
    }
}

/// Hands a detected challenge to the solver; no token is `ChallengeUnsolved`.
pub(crate) async fn solve_challenge<C: ChallengeSolver>(
    solver: &C,
    enabled: bool,
    kind: ChallengeKind,
    html: &str,
    page_url: &str,
) -> Result<String, AppError> {
    if !enabled {
        return Err(AppError::ChallengeUnsolved(format!(
            "{kind} challenge presented and solving is disabled"
        )));
    }
    solver
        .solve(kind, html, page_url)
        .await
        .ok_or_else(|| AppError::ChallengeUnsolved(format!("No solution for {kind} challenge")))
}

/// `url` with the challenge token appended as a query parameter.
pub fn with_solution(url: &str, token: &str) -> Result<String, AppError> {
    let mut parsed =
        Url::parse(url).map_err(|e| AppError::HttpError(format!("Invalid URL '{url}': {e}")))?;
    parsed.query_pairs_mut().append_pair(SOLUTION_PARAM, token);
    Ok(parsed.into())
}
