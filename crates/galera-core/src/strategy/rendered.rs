use std::sync::Arc;
use std::time::Duration;

use scraper::Html;

use crate::behavior::{BehaviorSimulator, InteractionStep};
use crate::config::{RenderConfig, ScrapeConfig};
use crate::detect;
use crate::error::AppError;
use crate::extract;
use crate::models::{
    ExtractionRecord, FetchMode, FetchOutcome, Identity, RawResponse, RenderedMeta, ScrapeResult,
};
use crate::pool::IdentityPool;
use crate::reporter::{ScrapeEvent, ScrapeReporter, TracingReporter};
use crate::traits::{
    BrowserLauncher, BrowserSession, ChallengeSolver, FetchStrategy, LaunchOptions, ProxyProvider,
};

use super::{AttemptLoop, solve_challenge, with_solution};

const COMPONENT: &str = "rendered";

/// Browser-driven fetcher. Each attempt owns a freshly launched browser that
/// is closed before the attempt returns, whatever the outcome.
pub struct RenderedFetcher<L, P, C> {
    launcher: L,
    pool: Arc<IdentityPool<P>>,
    solver: Arc<C>,
    behavior: BehaviorSimulator,
    config: ScrapeConfig,
    render: RenderConfig,
    reporter: Arc<dyn ScrapeReporter>,
}

impl<L, P, C> RenderedFetcher<L, P, C>
where
    L: BrowserLauncher,
    P: ProxyProvider,
    C: ChallengeSolver,
{
    pub fn new(
        launcher: L,
        pool: Arc<IdentityPool<P>>,
        solver: Arc<C>,
        behavior: BehaviorSimulator,
        config: ScrapeConfig,
        render: RenderConfig,
    ) -> Self {
        Self {
            launcher,
            pool,
            solver,
            behavior,
            config,
            render,
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

    fn launch_options(&self, identity: &Identity) -> LaunchOptions {
        LaunchOptions {
            headless: self.render.headless,
            window_width: self.render.window_width,
            window_height: self.render.window_height,
            proxy: identity.proxy.clone(),
            user_agent: identity.user_agent.clone(),
            extra_args: self.render.browser_args.clone(),
        }
    }

    /// Bound on one whole attempt: page load plus the request timeout.
    fn attempt_bound(&self) -> Duration {
        self.render.load_timeout.saturating_add(self.config.timeout)
    }

    async fn attempt(&self, url: &str, identity: Identity, attempt: u32) -> Result<ExtractionRecord, AppError> {
        let session = self.launcher.launch(&self.launch_options(&identity)).await?;

        let bound = self.attempt_bound();
        let outcome = tokio::time::timeout(bound, self.drive(&session, url, attempt)).await;

        session.close().await;
        self.reporter.report(ScrapeEvent::BrowserClosed { url, attempt });

        match outcome {
            Ok(result) => result,
            Err(_) => Err(AppError::Timeout(bound.as_secs())),
        }
    }

    async fn drive(&self, session: &L::Session, url: &str, attempt: u32) -> Result<ExtractionRecord, AppError> {
        if self.render.capture_xhr {
            session.capture_network().await?;
        }
        session.navigate(url).await?;
        self.settle(session).await?;

        let interaction_steps = self.interact(session).await?;
        let scroll_passes = self.scroll(session).await?;

        let html = session.content().await?;
        let final_url = session.current_url().await?;
        let meta = RenderedMeta {
            final_url: final_url.clone(),
            scroll_passes,
            interaction_steps,
        };
        let snapshot = RawResponse::new(200, html, final_url);

        let html = match detect::assess(&snapshot, Some(meta)) {
            FetchOutcome::Success {
                body,
                rendered_meta,
                ..
            } => {
                tracing::debug!(component = COMPONENT, %url, meta = ?rendered_meta, "Page rendered");
                body
            }
            FetchOutcome::Blocked { signal } => return Err(AppError::Blocked(signal)),
            FetchOutcome::TransportError { cause } => return Err(AppError::RenderError(cause)),
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
                    &snapshot.final_url,
                )
                .await?;
                self.reporter.report(ScrapeEvent::ChallengeSolved {
                    component: COMPONENT,
                    url,
                    attempt,
                    kind: challenge_kind,
                });

                session.navigate(&with_solution(url, &token)?).await?;
                self.settle(session).await?;
                let html = session.content().await?;
                if detect::is_blocked(200, &html) {
                    return Err(AppError::Blocked(
                        "block signal after challenge resubmission".into(),
                    ));
                }
                html
            }
        };

        let final_url = session.current_url().await?;
        let mut record = extract::build_record(url, &final_url, FetchMode::Rendered, html);
        self.harvest(session, &mut record).await;
        Ok(record)
    }

    async fn settle(&self, session: &L::Session) -> Result<(), AppError> {
        if self.render.wait_for_ready {
            session.wait_until_ready(self.render.load_timeout).await?;
        }
        Ok(())
    }

    /// Types the configured inputs, then runs the human-like plan when enabled.
    /// Individual step failures are skipped.
    async fn interact(&self, session: &L::Session) -> Result<usize, AppError> {
        let mut plan: Vec<InteractionStep> = self
            .render
            .typed_inputs
            .iter()
            .flat_map(|(selector, text)| self.behavior.plan_typing(selector, text))
            .collect();
        if self.render.simulate_human {
            let html = session.content().await?;
            plan.extend(self.plan(&html));
        }
        for step in &plan {
            match step {
                InteractionStep::Pause(pause) => tokio::time::sleep(*pause).await,
                step => {
                    if let Err(e) = session.perform(step).await {
                        tracing::debug!(component = COMPONENT, ?step, error = %e, "Interaction step skipped");
                    }
                }
            }
        }
        Ok(plan.len())
    }

    fn plan(&self, html: &str) -> Vec<InteractionStep> {
        let doc = Html::parse_document(html);
        self.behavior.plan_interactions(&doc)
    }

    /// Scrolls to the bottom until the height stops changing. Returns passes made.
    async fn scroll(&self, session: &L::Session) -> Result<u32, AppError> {
        let mut last_height = session.scroll_height().await?;
        let mut passes = 0;
        while passes < self.render.max_scroll_attempts {
            session.scroll_to_bottom().await?;
            passes += 1;
            if !self.render.scroll_pause.is_zero() {
                tokio::time::sleep(self.render.scroll_pause).await;
            }
            let height = session.scroll_height().await?;
            if height == last_height {
                break;
            }
            last_height = height;
        }
        Ok(passes)
    }

    /// Fills the browser-only record fields. A failing source leaves its field unset.
    async fn harvest(&self, session: &L::Session, record: &mut ExtractionRecord) {
        if self.render.traverse_iframes {
            match session.frames().await {
                Ok(frames) => {
                    record.iframes = Some(frames.into_iter().map(extract::frame_content).collect());
                }
                Err(e) => tracing::warn!(component = COMPONENT, url = %record.url, error = %e, "Iframe traversal failed"),
            }
        }

        if self.render.traverse_shadow_dom {
            match session.shadow_roots().await {
                Ok(roots) => {
                    let page_url = record.final_url.clone();
                    record.shadow_dom = Some(
                        roots
                            .into_iter()
                            .map(|root| extract::shadow_content(root, &page_url))
                            .collect(),
                    );
                }
                Err(e) => tracing::warn!(component = COMPONENT, url = %record.url, error = %e, "Shadow DOM traversal failed"),
            }
        }

        if self.render.capture_xhr {
            if !self.render.xhr_settle.is_zero() {
                tokio::time::sleep(self.render.xhr_settle).await;
            }
            match session.captured_exchanges().await {
                Ok(exchanges) => record.xhr_payloads = Some(extract::extract_api_payloads(&exchanges)),
                Err(e) => tracing::warn!(component = COMPONENT, url = %record.url, error = %e, "XHR capture failed"),
            }
        }

        if self.render.collect_cookies {
            match session.cookies().await {
                Ok(cookies) => record.cookies = Some(cookies),
                Err(e) => tracing::warn!(component = COMPONENT, url = %record.url, error = %e, "Cookie collection failed"),
            }
            match session.local_storage().await {
                Ok(storage) => record.local_storage = Some(storage),
                Err(e) => tracing::warn!(component = COMPONENT, url = %record.url, error = %e, "Local storage read failed"),
            }
        }
    }
}

impl<L, P, C> FetchStrategy for RenderedFetcher<L, P, C>
where
    L: BrowserLauncher,
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
