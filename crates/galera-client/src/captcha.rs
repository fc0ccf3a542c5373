use std::time::Duration;

use galera_core::error::AppError;
use galera_core::models::ChallengeKind;
use galera_core::traits::{CaptchaBackend, ChallengeParams, PollStatus};
use reqwest::Client;
use reqwest::header::CONTENT_TYPE;
use serde::Deserialize;

const DEFAULT_BASE_URL: &str = "https://2captcha.com";
const NOT_READY: &str = "CAPCHA_NOT_READY";
const V3_MIN_SCORE: &str = "0.7";

/// Client for 2captcha-compatible solving services (`in.php` / `res.php`).
#[derive(Clone)]
pub struct TwoCaptchaBackend {
    client: Client,
    api_key: String,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct ServiceReply {
    status: i64,
    request: String,
}

impl TwoCaptchaBackend {
    pub fn new(api_key: impl Into<String>) -> Result<Self, AppError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| AppError::HttpError(e.to_string()))?;
        Ok(Self {
            client,
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
        })
    }

    /// Points the backend at another compatible service.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn submit_fields(&self, kind: ChallengeKind, params: &ChallengeParams) -> Result<Vec<(&'static str, String)>, AppError> {
        let mut fields = vec![("key", self.api_key.clone()), ("json", "1".to_string())];
        let site_key = || {
            params
                .site_key
                .clone()
                .ok_or_else(|| AppError::CaptchaError(format!("{kind} challenge without a site key")))
        };

        match kind {
            ChallengeKind::RecaptchaV2 => {
                fields.push(("method", "userrecaptcha".into()));
                fields.push(("googlekey", site_key()?));
                fields.push(("pageurl", params.page_url.clone()));
            }
            ChallengeKind::RecaptchaV3 => {
                fields.push(("method", "userrecaptcha".into()));
                fields.push(("version", "v3".into()));
                fields.push(("googlekey", site_key()?));
                fields.push(("pageurl", params.page_url.clone()));
                fields.push((
                    "action",
                    params.action.clone().unwrap_or_else(|| "verify".into()),
                ));
                fields.push(("min_score", V3_MIN_SCORE.into()));
            }
            ChallengeKind::HCaptcha => {
                fields.push(("method", "hcaptcha".into()));
                fields.push(("sitekey", site_key()?));
                fields.push(("pageurl", params.page_url.clone()));
            }
            ChallengeKind::Image => {
                let body = params.image_base64.clone().ok_or_else(|| {
                    AppError::CaptchaError("Image challenge without image data".into())
                })?;
                fields.push(("method", "base64".into()));
                fields.push(("body", body));
            }
            ChallengeKind::Text => {
                return Err(AppError::CaptchaError(
                    "Text challenges are solved locally".into(),
                ));
            }
        }
        Ok(fields)
    }

    async fn reply(&self, request: reqwest::RequestBuilder) -> Result<ServiceReply, AppError> {
        let response = request
            .send()
            .await
            .map_err(|e| AppError::CaptchaError(format!("Solver service unreachable: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            return Err(AppError::CaptchaError(format!(
                "Solver service returned HTTP {}",
                status.as_u16()
            )));
        }
        response
            .json::<ServiceReply>()
            .await
            .map_err(|e| AppError::CaptchaError(format!("Malformed solver reply: {e}")))
    }
}

impl CaptchaBackend for TwoCaptchaBackend {
    async fn submit(&self, kind: ChallengeKind, params: &ChallengeParams) -> Result<String, AppError> {
        let fields = self.submit_fields(kind, params)?;
        let body = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(fields.iter().map(|(k, v)| (*k, v.as_str())))
            .finish();

        let reply = self
            .reply(
                self.client
                    .post(format!("{}/in.php", self.base_url))
                    .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
                    .body(body),
            )
            .await?;

        if reply.status != 1 {
            return Err(AppError::CaptchaError(format!(
                "Submission rejected: {}",
                reply.request
            )));
        }
        tracing::debug!(component = "captcha", %kind, request_id = %reply.request, "Challenge submitted");
        Ok(reply.request)
    }

    async fn poll(&self, request_id: &str) -> Result<PollStatus, AppError> {
        let mut url = url::Url::parse(&format!("{}/res.php", self.base_url))
            .map_err(|e| AppError::CaptchaError(format!("Invalid solver URL: {e}")))?;
        url.query_pairs_mut()
            .append_pair("key", &self.api_key)
            .append_pair("action", "get")
            .append_pair("id", request_id)
            .append_pair("json", "1");

        let reply = self.reply(self.client.get(url)).await?;
        Ok(match (reply.status, reply.request.as_str()) {
            (1, _) => PollStatus::Ready(reply.request),
            (_, NOT_READY) => PollStatus::Pending,
            _ => PollStatus::Failed(reply.request),
        })
    }
}
