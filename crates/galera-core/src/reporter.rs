use crate::models::ChallengeKind;

/// Events emitted while scraping, for monitoring/logging.
///
/// `component` names the emitter (`static`, `rendered`, `orchestrator`,
/// `distributor`) so a single sink can serve every layer.
#[derive(Debug, Clone)]
pub enum ScrapeEvent<'a> {
    AttemptStarted {
        component: &'static str,
        url: &'a str,
        attempt: u32,
        proxy: &'a str,
    },
    IdentityRotated {
        component: &'static str,
        url: &'a str,
        attempt: u32,
        proxy: &'a str,
    },
    Blocked {
        component: &'static str,
        url: &'a str,
        attempt: u32,
        reason: &'a str,
    },
    ChallengeDetected {
        component: &'static str,
        url: &'a str,
        attempt: u32,
        kind: ChallengeKind,
    },
    ChallengeSolved {
        component: &'static str,
        url: &'a str,
        attempt: u32,
        kind: ChallengeKind,
    },
    AttemptFailed {
        component: &'static str,
        url: &'a str,
        attempt: u32,
        error: &'a str,
        will_retry: bool,
    },
    Succeeded {
        component: &'static str,
        url: &'a str,
        attempts: u32,
    },
    Exhausted {
        component: &'static str,
        url: &'a str,
        attempts: u32,
        error: &'a str,
    },
    BrowserClosed {
        url: &'a str,
        attempt: u32,
    },
    ChunkCompleted {
        chunk: usize,
        completed: usize,
        total: usize,
    },
    ChunkFailed {
        chunk: usize,
        error: &'a str,
    },
    DistributionCancelled {
        submitted: usize,
        total: usize,
    },
}

impl ScrapeEvent<'_> {
    /// Short stable name, used by test reporters.
    pub fn label(&self) -> &'static str {
        match self {
            ScrapeEvent::AttemptStarted { .. } => "attempt_started",
            ScrapeEvent::IdentityRotated { .. } => "identity_rotated",
            ScrapeEvent::Blocked { .. } => "blocked",
            ScrapeEvent::ChallengeDetected { .. } => "challenge_detected",
            ScrapeEvent::ChallengeSolved { .. } => "challenge_solved",
            ScrapeEvent::AttemptFailed { .. } => "attempt_failed",
            ScrapeEvent::Succeeded { .. } => "succeeded",
            ScrapeEvent::Exhausted { .. } => "exhausted",
            ScrapeEvent::BrowserClosed { .. } => "browser_closed",
            ScrapeEvent::ChunkCompleted { .. } => "chunk_completed",
            ScrapeEvent::ChunkFailed { .. } => "chunk_failed",
            ScrapeEvent::DistributionCancelled { .. } => "distribution_cancelled",
        }
    }
}

/// Trait for receiving scrape events (decoupled logging).
pub trait ScrapeReporter: Send + Sync {
    fn report(&self, event: ScrapeEvent<'_>) {
        let _ = event;
    }
}

/// Reporter that uses the `tracing` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl ScrapeReporter for TracingReporter {
    fn report(&self, event: ScrapeEvent<'_>) {
        match event {
            ScrapeEvent::AttemptStarted {
                component,
                url,
                attempt,
                proxy,
            } => {
                tracing::debug!(%component, %url, %attempt, %proxy, "Attempt started");
            }
            ScrapeEvent::IdentityRotated {
                component,
                url,
                attempt,
                proxy,
            } => {
                tracing::info!(%component, %url, %attempt, %proxy, "Identity rotated");
            }
            ScrapeEvent::Blocked {
                component,
                url,
                attempt,
                reason,
            } => {
                tracing::warn!(%component, %url, %attempt, %reason, "Blocked");
            }
            ScrapeEvent::ChallengeDetected {
                component,
                url,
                attempt,
                kind,
            } => {
                tracing::warn!(%component, %url, %attempt, %kind, "Challenge detected");
            }
            ScrapeEvent::ChallengeSolved {
                component,
                url,
                attempt,
                kind,
            } => {
                tracing::info!(%component, %url, %attempt, %kind, "Challenge solved");
            }
            ScrapeEvent::AttemptFailed {
                component,
                url,
                attempt,
                error,
                will_retry,
            } => {
                tracing::warn!(%component, %url, %attempt, %error, %will_retry, "Attempt failed");
            }
            ScrapeEvent::Succeeded {
                component,
                url,
                attempts,
            } => {
                tracing::info!(%component, %url, %attempts, "Scrape succeeded");
            }
            ScrapeEvent::Exhausted {
                component,
                url,
                attempts,
                error,
            } => {
                tracing::error!(%component, %url, %attempts, %error, "Retry budget exhausted");
            }
            ScrapeEvent::BrowserClosed { url, attempt } => {
                tracing::debug!(component = "rendered", %url, %attempt, "Browser closed");
            }
            ScrapeEvent::ChunkCompleted {
                chunk,
                completed,
                total,
            } => {
                tracing::info!(component = "distributor", %chunk, %completed, %total, "Chunk completed");
            }
            ScrapeEvent::ChunkFailed { chunk, error } => {
                tracing::error!(component = "distributor", %chunk, %error, "Chunk worker failed");
            }
            ScrapeEvent::DistributionCancelled { submitted, total } => {
                tracing::warn!(component = "distributor", %submitted, %total, "Distribution cancelled");
            }
        }
    }
}
