//! Blocking and challenge detection over raw responses.
//!
//! Challenge markers are checked before the block rules, so a challenge page
//! is never reported as a plain block.

use std::sync::LazyLock;

use regex::Regex;

use crate::models::{ChallengeKind, FetchOutcome, RawResponse, RenderedMeta};
use crate::traits::ChallengeParams;

/// Status codes treated as a block regardless of body.
pub const BLOCK_STATUS_CODES: &[u16] = &[403, 429, 503];

/// Case-insensitive body keywords that signal a block.
pub const BLOCK_KEYWORDS: &[&str] = &[
    "captcha",
    "blocked",
    "rate limit",
    "too many requests",
    "access denied",
    "forbidden",
    "ip has been blocked",
];

const DEFAULT_V3_ACTION: &str = "verify";

static RECAPTCHA_V3: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"recaptcha/api\.js\?(?:[^"'>]*&)?render=([^"'&>\s]+)"#).expect("valid regex")
});
static RECAPTCHA_V2: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"g-recaptcha|google\.com/recaptcha/api\.js|recaptcha/api2/"#).expect("valid regex")
});
static HCAPTCHA: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"hcaptcha\.com/captcha|hcaptcha\.com/1/api\.js|class=["'][^"']*\bh-captcha\b"#)
        .expect("valid regex")
});
static IMAGE_CAPTCHA: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)<img[^>]*captcha[^>]*>|<img[^>]*src=["'][^"']*(?:captcha|verify)[^"']*["']"#)
        .expect("valid regex")
});
static TEXT_CAPTCHA: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?is)what\s+is\s+-?\d+\s*[-+*/×÷−]\s*-?\d+|solve\s+this:\s*-?\d+\s*[-+*/×÷−]\s*-?\d+|captcha.*?\?.*?<input"#,
    )
    .expect("valid regex")
});
static SITE_KEY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"data-sitekey=["']([^"']+)["']"#).expect("valid regex"));
static V3_ACTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"execute\([^,]+,\s*\{\s*action:\s*['"]([^'"]+)['"]"#).expect("valid regex")
});
static CANONICAL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)<link[^>]*rel=["']canonical["'][^>]*href=["']([^"']+)["']|<link[^>]*href=["']([^"']+)["'][^>]*rel=["']canonical["']"#)
        .expect("valid regex")
});

/// Verdict on a single response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    Clean,
    Blocked(String),
    Challenge(ChallengeKind),
}

/// Classifies a response by status code and body.
pub fn classify(status_code: u16, body: &str) -> Classification {
    if let Some(kind) = detect_challenge(body) {
        return Classification::Challenge(kind);
    }
    match block_reason(status_code, body) {
        Some(reason) => Classification::Blocked(reason),
        None => Classification::Clean,
    }
}

/// The block rule alone: blocking status or any block keyword.
pub fn is_blocked(status_code: u16, body: &str) -> bool {
    block_reason(status_code, body).is_some()
}

fn block_reason(status_code: u16, body: &str) -> Option<String> {
    if BLOCK_STATUS_CODES.contains(&status_code) {
        return Some(format!("HTTP {status_code}"));
    }
    let lowered = body.to_lowercase();
    BLOCK_KEYWORDS
        .iter()
        .find(|keyword| lowered.contains(*keyword))
        .map(|keyword| format!("keyword '{keyword}'"))
}

/// Pattern-based challenge detection against raw HTML.
pub fn detect_challenge(html: &str) -> Option<ChallengeKind> {
    if let Some(caps) = RECAPTCHA_V3.captures(html) {
        // `render=explicit` is the v2 explicit-rendering loader, not a v3 key.
        if &caps[1] != "explicit" {
            return Some(ChallengeKind::RecaptchaV3);
        }
        return Some(ChallengeKind::RecaptchaV2);
    }
    if RECAPTCHA_V2.is_match(html) {
        return Some(ChallengeKind::RecaptchaV2);
    }
    if HCAPTCHA.is_match(html) {
        return Some(ChallengeKind::HCaptcha);
    }
    if IMAGE_CAPTCHA.is_match(html) {
        return Some(ChallengeKind::Image);
    }
    if TEXT_CAPTCHA.is_match(html) {
        return Some(ChallengeKind::Text);
    }
    None
}

/// Turns a raw response into a classified outcome.
pub fn assess(response: &RawResponse, rendered_meta: Option<RenderedMeta>) -> FetchOutcome {
    match classify(response.status, &response.body) {
        Classification::Clean => FetchOutcome::Success {
            status_code: response.status,
            headers: response.headers.clone(),
            body: response.body.clone(),
            rendered_meta,
        },
        Classification::Blocked(signal) => FetchOutcome::Blocked { signal },
        Classification::Challenge(challenge_kind) => FetchOutcome::ChallengePresented {
            challenge_kind,
            raw_content: response.body.clone(),
        },
    }
}

/// Site key from `data-sitekey`, or the v3 `render=` parameter.
pub fn site_key(html: &str) -> Option<String> {
    if let Some(caps) = SITE_KEY.captures(html) {
        return Some(caps[1].to_string());
    }
    RECAPTCHA_V3
        .captures(html)
        .map(|caps| caps[1].to_string())
        .filter(|key| key != "explicit")
}

/// The v3 action passed to `grecaptcha.execute`, `verify` when absent.
pub fn v3_action(html: &str) -> String {
    V3_ACTION
        .captures(html)
        .map(|caps| caps[1].to_string())
        .unwrap_or_else(|| DEFAULT_V3_ACTION.to_string())
}

/// `<link rel="canonical">` target, falling back to the request URL.
pub fn canonical_url(html: &str, fallback: &str) -> String {
    CANONICAL
        .captures(html)
        .and_then(|caps| caps.get(1).or_else(|| caps.get(2)))
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| fallback.to_string())
}

/// Everything an external solver needs for a token challenge.
pub fn challenge_params(kind: ChallengeKind, html: &str, page_url: &str) -> ChallengeParams {
    ChallengeParams {
        site_key: site_key(html),
        action: (kind == ChallengeKind::RecaptchaV3).then(|| v3_action(html)),
        page_url: canonical_url(html, page_url),
        image_base64: None,
    }
}
