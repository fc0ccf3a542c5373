//! Challenge solving: local arithmetic and OCR, or an external service.
//!
//! Every attempt that errors is retried up to `max_attempts` times with a
//! random delay in between. Whatever happens, [`ChallengeSolver::solve`]
//! returns `None` instead of an error.

use std::sync::LazyLock;
use std::time::Duration;

use base64::Engine;
use rand::Rng;
use regex::Regex;
use scraper::{Html, Selector};
use url::Url;

use crate::config::{SolveStrategy, SolverConfig};
use crate::detect;
use crate::error::AppError;
use crate::models::ChallengeKind;
use crate::traits::{AssetFetcher, CaptchaBackend, ChallengeSolver, OcrEngine, PollStatus};

static ARITHMETIC: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:what\s+is|solve\s+this:)\s*(-?\d+)\s*([-+*/×÷−])\s*(-?\d+)")
        .expect("valid regex")
});

/// Solves "what is N op M" style questions.
///
/// Integer results for `+ - ×`, floating-point quotient for `÷` (`7 / 2` is
/// `3.5`, `8 / 4` is `2.0`). Division by zero and overflow yield `None`.
pub fn solve_text_challenge(text: &str) -> Option<String> {
    let caps = ARITHMETIC.captures(text)?;
    let lhs: i64 = caps[1].parse().ok()?;
    let rhs: i64 = caps[3].parse().ok()?;
    match &caps[2] {
        "+" => lhs.checked_add(rhs).map(|v| v.to_string()),
        "-" | "−" => lhs.checked_sub(rhs).map(|v| v.to_string()),
        "*" | "×" => lhs.checked_mul(rhs).map(|v| v.to_string()),
        "/" | "÷" => {
            if rhs == 0 {
                return None;
            }
            Some(format!("{:?}", lhs as f64 / rhs as f64))
        }
        _ => None,
    }
}

/// `src` of the first image that looks like a captcha.
pub fn captcha_image_src(html: &str) -> Option<String> {
    let doc = Html::parse_document(html);
    let selector = Selector::parse("img").ok()?;
    doc.select(&selector)
        .find(|img| {
            let el = img.value();
            let src = el.attr("src").unwrap_or_default().to_lowercase();
            src.contains("captcha")
                || src.contains("verify")
                || el
                    .attrs()
                    .any(|(_, value)| value.to_lowercase().contains("captcha"))
        })
        .and_then(|img| img.value().attr("src"))
        .map(str::to_string)
}

fn page_text(html: &str) -> String {
    let doc = Html::parse_document(html);
    doc.root_element()
        .text()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Solver backed by a CAPTCHA service, an OCR engine and an asset downloader.
pub struct CaptchaSolver<B, O, A> {
    backend: B,
    ocr: O,
    assets: A,
    config: SolverConfig,
}

impl<B, O, A> CaptchaSolver<B, O, A>
where
    B: CaptchaBackend,
    O: OcrEngine,
    A: AssetFetcher,
{
    pub fn new(backend: B, ocr: O, assets: A, config: SolverConfig) -> Self {
        Self {
            backend,
            ocr,
            assets,
            config,
        }
    }

    pub fn config(&self) -> &SolverConfig {
        &self.config
    }

    async fn try_solve(
        &self,
        kind: ChallengeKind,
        html: &str,
        page_url: &str,
    ) -> Result<Option<String>, AppError> {
        match kind {
            ChallengeKind::Text => Ok(solve_text_challenge(&page_text(html))),
            ChallengeKind::Image => self.solve_image(html, page_url).await,
            ChallengeKind::RecaptchaV2 | ChallengeKind::RecaptchaV3 | ChallengeKind::HCaptcha => {
                if self.config.strategy == SolveStrategy::Local {
                    return Ok(None);
                }
                let params = detect::challenge_params(kind, html, page_url);
                if params.site_key.is_none() {
                    tracing::warn!(component = "solver", %kind, url = %page_url, "No site key found");
                    return Ok(None);
                }
                self.solve_external(kind, params).await
            }
        }
    }

    async fn solve_image(&self, html: &str, page_url: &str) -> Result<Option<String>, AppError> {
        let Some(src) = captcha_image_src(html) else {
            return Ok(None);
        };
        let image_url = Url::parse(page_url)
            .and_then(|base| base.join(&src))
            .map_err(|e| AppError::CaptchaError(format!("Bad captcha image URL '{src}': {e}")))?;
        let bytes = self.assets.fetch_bytes(image_url.as_str()).await?;

        match self.config.strategy {
            SolveStrategy::Local => {
                let text = self.ocr.recognize(&bytes).await?;
                let text = text.trim();
                Ok((!text.is_empty()).then(|| text.to_string()))
            }
            SolveStrategy::External => {
                let mut params = detect::challenge_params(ChallengeKind::Image, html, page_url);
                params.image_base64 = Some(base64::engine::general_purpose::STANDARD.encode(&bytes));
                self.solve_external(ChallengeKind::Image, params).await
            }
        }
    }

    /// Submits, then polls every `poll_interval` until a token or `timeout`.
    async fn solve_external(
        &self,
        kind: ChallengeKind,
        params: crate::traits::ChallengeParams,
    ) -> Result<Option<String>, AppError> {
        let request_id = self.backend.submit(kind, &params).await?;
        tracing::debug!(component = "solver", %kind, %request_id, "Challenge submitted");

        // None when the timeout is past the clock's range: poll until the backend settles.
        let deadline = tokio::time::Instant::now().checked_add(self.config.timeout);
        loop {
            tokio::time::sleep(self.config.poll_interval).await;
            match self.backend.poll(&request_id).await? {
                PollStatus::Ready(token) => return Ok(Some(token)),
                PollStatus::Failed(reason) => return Err(AppError::CaptchaError(reason)),
                PollStatus::Pending => {
                    if deadline.is_some_and(|deadline| tokio::time::Instant::now() >= deadline) {
                        tracing::warn!(component = "solver", %kind, %request_id, "Timed out waiting for solution");
                        return Ok(None);
                    }
                }
            }
        }
    }

    fn retry_delay(&self) -> Duration {
        let (min, max) = self.config.delay_between_attempts;
        if min >= max {
            return min;
        }
        Duration::from_secs_f64(rand::rng().random_range(min.as_secs_f64()..=max.as_secs_f64()))
    }
}

impl<B, O, A> ChallengeSolver for CaptchaSolver<B, O, A>
where
    B: CaptchaBackend,
    O: OcrEngine,
    A: AssetFetcher,
{
    async fn solve(&self, kind: ChallengeKind, html: &str, page_url: &str) -> Option<String> {
        let max_attempts = self.config.max_attempts.max(1);
        for attempt in 1..=max_attempts {
            match self.try_solve(kind, html, page_url).await {
                Ok(token) => return token,
                Err(e) => {
                    tracing::warn!(component = "solver", %kind, %attempt, error = %e, "Solve attempt failed");
                    if attempt < max_attempts {
                        let delay = self.retry_delay();
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }
        tracing::warn!(component = "solver", %kind, url = %page_url, "Giving up on challenge");
        None
    }
}
