//! Chromium via the Chrome DevTools Protocol.
//!
//! [`ChromiumLauncher`] starts one browser process per fetch attempt;
//! [`ChromiumSession`] owns that process until [`BrowserSession::close`].

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use chromiumoxide::cdp::browser_protocol::network::SetUserAgentOverrideParams;
use chromiumoxide::cdp::browser_protocol::page::AddScriptToEvaluateOnNewDocumentParams;
use chromiumoxide::cdp::js_protocol::runtime::EvaluateParams;
use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::StreamExt;
use galera_core::behavior::InteractionStep;
use galera_core::error::AppError;
use galera_core::models::{BrowserCookie, CapturedExchange};
use galera_core::traits::{BrowserLauncher, BrowserSession, FrameDocument, LaunchOptions, ShadowRootHtml};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tokio::task::JoinHandle;

/// Records every XHR/fetch response body into `window.__galeraCaptured`.
const CAPTURE_HOOK: &str = r#"
(function () {
  if (window.__galeraCaptured) { return; }
  window.__galeraCaptured = [];
  const push = (url, body) => { try { window.__galeraCaptured.push({ url: String(url), body: String(body) }); } catch (e) {} };
  const origFetch = window.fetch;
  if (origFetch) {
    window.fetch = function (...args) {
      return origFetch.apply(this, args).then((resp) => {
        resp.clone().text().then((body) => push(resp.url, body)).catch(() => {});
        return resp;
      });
    };
  }
  const origOpen = XMLHttpRequest.prototype.open;
  XMLHttpRequest.prototype.open = function (method, url, ...rest) {
    this.addEventListener('load', () => push(this.responseURL || url, this.responseText));
    return origOpen.call(this, method, url, ...rest);
  };
})();
"#;

const FRAMES_SCRIPT: &str = r#"
Array.from(document.querySelectorAll('iframe')).map((frame) => {
  let html = null;
  try { html = frame.contentDocument ? frame.contentDocument.documentElement.outerHTML : null; } catch (e) {}
  return { url: frame.src || '', html: html };
})
"#;

const SHADOW_SCRIPT: &str = r#"
Array.from(document.querySelectorAll('*'))
  .filter((el) => el.shadowRoot)
  .map((el, i) => ({ host_id: el.id || (el.tagName.toLowerCase() + '-' + i), html: el.shadowRoot.innerHTML }))
"#;

const INTERACTIVE: &str = "a, button, input, select";

/// Launches headless Chromium for each attempt.
#[derive(Debug, Clone, Default)]
pub struct ChromiumLauncher {
    executable: Option<PathBuf>,
}

impl ChromiumLauncher {
    /// Uses `$CHROME_BIN` or the first well-known install location, falling
    /// back to chromiumoxide's own lookup.
    pub fn new() -> Self {
        Self {
            executable: find_chrome_binary(),
        }
    }

    pub fn with_executable(mut self, path: impl Into<PathBuf>) -> Self {
        self.executable = Some(path.into());
        self
    }
}

/// Chromium command-line flags for one launch.
fn launch_args(options: &LaunchOptions) -> Vec<String> {
    let mut args = vec![
        "--disable-gpu".to_string(),
        "--disable-dev-shm-usage".to_string(),
        "--disable-extensions".to_string(),
        "--disable-popup-blocking".to_string(),
        "--no-first-run".to_string(),
        format!("--window-size={},{}", options.window_width, options.window_height),
        format!("--user-agent={}", options.user_agent),
    ];
    if options.headless {
        args.push("--headless=new".to_string());
    }
    if let Some(proxy) = &options.proxy {
        // Chromium ignores credentials embedded in --proxy-server.
        args.push(format!("--proxy-server={}", proxy.display_url()));
    }
    args.extend(options.extra_args.iter().cloned());
    args
}

/// JavaScript for one interaction step; `None` for pauses.
fn step_script(step: &InteractionStep) -> Option<String> {
    match step {
        InteractionStep::ScrollToElement { index } => Some(format!(
            "(function () {{ const el = document.querySelectorAll('{INTERACTIVE}')[{index}]; \
             if (el) {{ el.scrollIntoView({{ behavior: 'smooth', block: 'center' }}); }} }})()"
        )),
        InteractionStep::ScrollBy { pixels } => Some(format!("window.scrollBy(0, {pixels})")),
        InteractionStep::ScrollToTop => Some("window.scrollTo(0, 0)".to_string()),
        InteractionStep::Click { index } => Some(format!(
            "(function () {{ const el = document.querySelectorAll('button')[{index}]; \
             if (el) {{ el.click(); }} }})()"
        )),
        InteractionStep::Type { selector, text } => {
            let selector = serde_json::Value::from(selector.as_str());
            let text = serde_json::Value::from(text.as_str());
            Some(format!(
                "(function () {{ const el = document.querySelector({selector}); \
                 if (!el) {{ throw new Error('No element matches ' + {selector}); }} \
                 el.focus(); el.value = (el.value || '') + {text}; \
                 el.dispatchEvent(new KeyboardEvent('keydown', {{ key: {text}, bubbles: true }})); \
                 el.dispatchEvent(new Event('input', {{ bubbles: true }})); \
                 el.dispatchEvent(new KeyboardEvent('keyup', {{ key: {text}, bubbles: true }})); }})()"
            ))
        }
        InteractionStep::Pause(_) => None,
    }
}

fn find_chrome_binary() -> Option<PathBuf> {
    if let Ok(p) = std::env::var("CHROME_BIN") {
        let path = PathBuf::from(p);
        if path.exists() {
            return Some(path);
        }
    }

    [
        "/snap/chromium/current/usr/lib/chromium-browser/chrome",
        "/usr/bin/google-chrome-stable",
        "/usr/bin/google-chrome",
        "/usr/bin/chromium",
        "/usr/bin/chromium-browser",
    ]
    .iter()
    .map(PathBuf::from)
    .find(|p| p.exists())
}

fn expression(script: &str) -> Result<EvaluateParams, AppError> {
    EvaluateParams::builder()
        .expression(script)
        .return_by_value(true)
        .await_promise(true)
        .build()
        .map_err(|e| AppError::RenderError(format!("Invalid script: {e}")))
}

fn render_error(context: &str) -> impl Fn(chromiumoxide::error::CdpError) -> AppError + '_ {
    move |e| AppError::RenderError(format!("{context}: {e}"))
}

impl BrowserLauncher for ChromiumLauncher {
    type Session = ChromiumSession;

    async fn launch(&self, options: &LaunchOptions) -> Result<ChromiumSession, AppError> {
        let mut builder = BrowserConfig::builder()
            .no_sandbox()
            .disable_default_args()
            .window_size(options.window_width, options.window_height);
        if !options.headless {
            builder = builder.with_head();
        }
        if let Some(bin) = &self.executable {
            builder = builder.chrome_executable(bin);
        }
        for arg in launch_args(options) {
            builder = builder.arg(arg);
        }
        let config = builder
            .build()
            .map_err(|e| AppError::RenderError(format!("Browser config error: {e}")))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(render_error("Failed to launch browser"))?;

        // The CDP handler must be polled for the connection to make progress.
        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    tracing::debug!(component = "browser", error = %e, "CDP handler stopped");
                    break;
                }
            }
        });

        let page = match browser.new_page("about:blank").await {
            Ok(page) => page,
            Err(e) => {
                let session = ChromiumSession {
                    browser,
                    page: None,
                    handler,
                };
                session.shutdown().await;
                return Err(AppError::RenderError(format!("Failed to open tab: {e}")));
            }
        };

        let session = ChromiumSession {
            browser,
            page: Some(page),
            handler,
        };
        if let Err(e) = session
            .page()?
            .execute(SetUserAgentOverrideParams::new(options.user_agent.clone()))
            .await
        {
            tracing::warn!(component = "browser", error = %e, "User agent override failed");
        }
        tracing::debug!(
            component = "browser",
            headless = options.headless,
            proxy = options.proxy.as_ref().map(|p| p.display_url()).unwrap_or_default(),
            "Browser launched"
        );
        Ok(session)
    }
}

/// One live Chromium process and its working tab.
pub struct ChromiumSession {
    browser: Browser,
    page: Option<Page>,
    handler: JoinHandle<()>,
}

#[derive(Deserialize)]
struct FrameEntry {
    url: String,
    html: Option<String>,
}

#[derive(Deserialize)]
struct ShadowEntry {
    host_id: String,
    html: String,
}

impl ChromiumSession {
    fn page(&self) -> Result<&Page, AppError> {
        self.page
            .as_ref()
            .ok_or_else(|| AppError::RenderError("Browser has no open tab".into()))
    }

    async fn eval<T: DeserializeOwned>(&self, script: &str) -> Result<T, AppError> {
        self.page()?
            .evaluate_expression(expression(script)?)
            .await
            .map_err(render_error("Script evaluation failed"))?
            .into_value::<T>()
            .map_err(|e| AppError::RenderError(format!("Unexpected script result: {e}")))
    }

    async fn run(&self, script: &str) -> Result<(), AppError> {
        self.page()?
            .evaluate_expression(expression(script)?)
            .await
            .map(|_| ())
            .map_err(render_error("Script evaluation failed"))
    }

    /// Loads a cross-origin frame in its own tab, which is always closed.
    async fn read_detached_frame(&self, url: &str) -> Result<String, AppError> {
        let tab = self
            .browser
            .new_page(url)
            .await
            .map_err(render_error("Failed to open frame tab"))?;
        let html = tab.content().await.map_err(render_error("Failed to read frame"));
        if let Err(e) = tab.close().await {
            tracing::debug!(component = "browser", url = %url, error = %e, "Frame tab close failed");
        }
        html
    }

    async fn shutdown(mut self) {
        if let Err(e) = self.browser.close().await {
            tracing::warn!(component = "browser", error = %e, "Browser close failed");
        }
        if let Err(e) = self.browser.wait().await {
            tracing::debug!(component = "browser", error = %e, "Browser process wait failed");
        }
        self.handler.abort();
    }
}

impl BrowserSession for ChromiumSession {
    async fn capture_network(&self) -> Result<(), AppError> {
        self.page()?
            .execute(AddScriptToEvaluateOnNewDocumentParams::new(CAPTURE_HOOK))
            .await
            .map(|_| ())
            .map_err(render_error("Failed to install capture hook"))
    }

    async fn navigate(&self, url: &str) -> Result<(), AppError> {
        tracing::debug!(component = "browser", url = %url, "Navigating");
        self.page()?
            .goto(url)
            .await
            .map(|_| ())
            .map_err(|e| AppError::RenderError(format!("Navigation failed for {url}: {e}")))
    }

    async fn wait_until_ready(&self, timeout: Duration) -> Result<(), AppError> {
        let poll = async {
            loop {
                let state: String = self.eval("document.readyState").await?;
                if state == "complete" {
                    return Ok::<(), AppError>(());
                }
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        };
        tokio::time::timeout(timeout, poll)
            .await
            .map_err(|_| AppError::Timeout(timeout.as_secs()))?
    }

    async fn scroll_height(&self) -> Result<u64, AppError> {
        self.eval("document.body ? document.body.scrollHeight : 0").await
    }

    async fn scroll_to_bottom(&self) -> Result<(), AppError> {
        self.run("window.scrollTo(0, document.body ? document.body.scrollHeight : 0)")
            .await
    }

    async fn perform(&self, step: &InteractionStep) -> Result<(), AppError> {
        match step_script(step) {
            Some(script) => self.run(&script).await,
            None => Ok(()),
        }
    }

    async fn content(&self) -> Result<String, AppError> {
        self.page()?
            .content()
            .await
            .map_err(render_error("Failed to read page content"))
    }

    async fn current_url(&self) -> Result<String, AppError> {
        self.page()?
            .url()
            .await
            .map(Option::unwrap_or_default)
            .map_err(render_error("Failed to read page URL"))
    }

    async fn frames(&self) -> Result<Vec<FrameDocument>, AppError> {
        let entries: Vec<FrameEntry> = self.eval(FRAMES_SCRIPT).await?;
        let mut frames = Vec::with_capacity(entries.len());
        for entry in entries {
            match entry.html {
                Some(html) => frames.push(FrameDocument {
                    url: entry.url,
                    html,
                }),
                None if entry.url.starts_with("http") => match self.read_detached_frame(&entry.url).await {
                    Ok(html) => frames.push(FrameDocument {
                        url: entry.url,
                        html,
                    }),
                    Err(e) => {
                        tracing::warn!(component = "browser", url = %entry.url, error = %e, "Skipping frame");
                    }
                },
                None => {}
            }
        }
        Ok(frames)
    }

    async fn shadow_roots(&self) -> Result<Vec<ShadowRootHtml>, AppError> {
        let entries: Vec<ShadowEntry> = self.eval(SHADOW_SCRIPT).await?;
        Ok(entries
            .into_iter()
            .map(|e| ShadowRootHtml {
                host_id: e.host_id,
                html: e.html,
            })
            .collect())
    }

    async fn captured_exchanges(&self) -> Result<Vec<CapturedExchange>, AppError> {
        self.eval("window.__galeraCaptured || []").await
    }

    async fn cookies(&self) -> Result<Vec<BrowserCookie>, AppError> {
        let cookies = self
            .page()?
            .get_cookies()
            .await
            .map_err(render_error("Failed to read cookies"))?;
        Ok(cookies
            .into_iter()
            .map(|c| BrowserCookie {
                name: c.name,
                value: c.value,
                domain: c.domain,
                path: c.path,
                secure: c.secure,
                http_only: c.http_only,
            })
            .collect())
    }

    async fn local_storage(&self) -> Result<BTreeMap<String, String>, AppError> {
        self.eval("Object.fromEntries(Object.entries(window.localStorage))")
            .await
    }

    async fn close(self) {
        self.shutdown().await;
    }
}
