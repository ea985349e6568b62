// browser.rs
//
// Browser and page traits plus their chromiumoxide implementation. The
// session pool only talks to the traits, so tests drive it with fakes.

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::fetch::{
    AuthChallengeResponse, AuthChallengeResponseResponse, ContinueRequestParams,
    ContinueWithAuthParams, EnableParams as FetchEnableParams, EventAuthRequired,
    EventRequestPaused, FailRequestParams, RequestPattern, RequestStage,
};
use chromiumoxide::cdp::browser_protocol::network::{
    ClearBrowserCookiesParams, ErrorReason, Headers, SetExtraHttpHeadersParams,
    SetUserAgentOverrideParams,
};
use chromiumoxide::cdp::browser_protocol::page::AddScriptToEvaluateOnNewDocumentParams;
use chromiumoxide::handler::viewport::Viewport;
use chromiumoxide::Page;
use futures::StreamExt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::scraper::proxy::{ProxyCredentials, ProxyEndpoint};
use crate::scraper::stealth::{should_block, stealth_script, Fingerprint};
use crate::scraper::ScraperError;

const SELECTOR_POLL: Duration = Duration::from_millis(250);
const SCROLL_PAUSE: Duration = Duration::from_millis(400);

#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    async fn launch(
        &self,
        proxy: Option<&ProxyEndpoint>,
        fingerprint: &Fingerprint,
    ) -> Result<Arc<dyn BrowserInstance>, ScraperError>;
}

#[async_trait]
pub trait BrowserInstance: Send + Sync {
    /// Opens a fully configured page (fingerprint, init script, blocking).
    async fn new_page(&self) -> Result<Arc<dyn BrowserPage>, ScraperError>;

    fn is_connected(&self) -> bool;

    /// Flips to `true` once the browser connection is gone.
    fn disconnected(&self) -> watch::Receiver<bool>;

    async fn close(&self);
}

#[async_trait]
pub trait BrowserPage: Send + Sync {
    async fn goto(&self, url: &str, timeout: Duration) -> Result<(), ScraperError>;

    async fn title(&self) -> Result<String, ScraperError>;

    /// Visible text of the document body.
    async fn body_text(&self) -> Result<String, ScraperError>;

    /// Serialized HTML of the current document.
    async fn content(&self) -> Result<String, ScraperError>;

    /// Waits until any selector matches. `Ok(false)` on timeout.
    async fn wait_for_any(
        &self,
        selectors: &[&str],
        timeout: Duration,
    ) -> Result<bool, ScraperError>;

    async fn scroll(&self, steps: u32) -> Result<(), ScraperError>;

    /// Clears cookies and storage and parks the page on `about:blank`.
    async fn reset(&self) -> Result<(), ScraperError>;

    async fn close(&self);
}

/// Looks for a Chromium binary: explicit path first, then `PATH`.
pub fn find_chromium(explicit: Option<&str>) -> Option<PathBuf> {
    if let Some(p) = explicit {
        let path = PathBuf::from(p);
        if path.exists() {
            return Some(path);
        }
        warn!(path = %p, "configured chromium path does not exist");
    }

    for name in ["google-chrome", "google-chrome-stable", "chromium", "chromium-browser"] {
        if let Ok(path) = which::which(name) {
            return Some(path);
        }
    }

    if cfg!(target_os = "macos") {
        let common = PathBuf::from("/Applications/Google Chrome.app/Contents/MacOS/Google Chrome");
        if common.exists() {
            return Some(common);
        }
    }

    None
}

pub struct ChromiumLauncher {
    executable: Option<String>,
    headless: bool,
}

impl ChromiumLauncher {
    pub fn new(executable: Option<String>, headless: bool) -> Self {
        Self { executable, headless }
    }
}

#[async_trait]
impl BrowserLauncher for ChromiumLauncher {
    async fn launch(
        &self,
        proxy: Option<&ProxyEndpoint>,
        fingerprint: &Fingerprint,
    ) -> Result<Arc<dyn BrowserInstance>, ScraperError> {
        let chrome_path = find_chromium(self.executable.as_deref())
            .ok_or_else(|| ScraperError::Browser("Chromium executable not found".into()))?;

        let mut builder = BrowserConfig::builder()
            .chrome_executable(chrome_path)
            .arg("--no-sandbox")
            .arg("--disable-setuid-sandbox")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-gpu")
            .arg("--disable-blink-features=AutomationControlled")
            .arg("--disable-features=VizDisplayCompositor")
            .arg("--disable-background-timer-throttling")
            .arg("--disable-backgrounding-occluded-windows")
            .arg("--disable-renderer-backgrounding")
            .arg("--no-first-run")
            .arg("--no-default-browser-check")
            .arg(format!("--lang={}", fingerprint.lang_arg()))
            .window_size(fingerprint.viewport.width, fingerprint.viewport.height)
            .viewport(Viewport {
                width: fingerprint.viewport.width,
                height: fingerprint.viewport.height,
                device_scale_factor: None,
                emulating_mobile: false,
                is_landscape: true,
                has_touch: false,
            });

        if let Some(p) = proxy {
            builder = builder.arg(format!("--proxy-server={}", p.server_arg()));
        }
        if !self.headless {
            builder = builder.with_head();
        }

        let config = builder
            .build()
            .map_err(|e| ScraperError::Browser(format!("failed to build browser config: {e}")))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| ScraperError::Browser(format!("failed to launch Chromium: {e}")))?;

        let (gone_tx, gone_rx) = watch::channel(false);
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!(error = %e, "CDP handler error");
                }
            }
            warn!("browser connection closed");
            let _ = gone_tx.send(true);
        });

        info!(
            proxy = proxy.map(|p| p.to_string()).unwrap_or_else(|| "direct".into()),
            "browser launched"
        );

        Ok(Arc::new(ChromiumInstance {
            browser: AsyncMutex::new(browser),
            gone: gone_rx,
            handler_task,
            fingerprint: fingerprint.clone(),
            credentials: proxy.and_then(|p| p.credentials.clone()),
        }))
    }
}

struct ChromiumInstance {
    browser: AsyncMutex<Browser>,
    gone: watch::Receiver<bool>,
    handler_task: JoinHandle<()>,
    fingerprint: Fingerprint,
    credentials: Option<ProxyCredentials>,
}

#[async_trait]
impl BrowserInstance for ChromiumInstance {
    async fn new_page(&self) -> Result<Arc<dyn BrowserPage>, ScraperError> {
        let page = {
            let browser = self.browser.lock().await;
            browser
                .new_page("about:blank")
                .await
                .map_err(|e| ScraperError::Browser(format!("failed to open page: {e}")))?
        };

        let listeners = configure_page(&page, &self.fingerprint, self.credentials.clone()).await?;
        debug!("page configured");

        Ok(Arc::new(ChromiumPage {
            page,
            listeners: Mutex::new(listeners),
        }))
    }

    fn is_connected(&self) -> bool {
        !*self.gone.borrow()
    }

    fn disconnected(&self) -> watch::Receiver<bool> {
        self.gone.clone()
    }

    async fn close(&self) {
        let mut browser = self.browser.lock().await;
        if let Err(e) = browser.close().await {
            debug!(error = %e, "browser close failed");
        }
        let _ = browser.wait().await;
        self.handler_task.abort();
    }
}

/// Applies the fingerprint and init script, then turns on request
/// interception for resource blocking and proxy auth.
async fn configure_page(
    page: &Page,
    fp: &Fingerprint,
    credentials: Option<ProxyCredentials>,
) -> Result<Vec<JoinHandle<()>>, ScraperError> {
    let cdp = |e: chromiumoxide::error::CdpError| ScraperError::Browser(e.to_string());

    let mut ua = SetUserAgentOverrideParams::new(fp.user_agent.clone());
    ua.accept_language = Some(fp.accept_language.clone());
    ua.platform = Some(fp.platform.clone());
    page.execute(ua).await.map_err(cdp)?;

    page.execute(SetExtraHttpHeadersParams::new(Headers::new(fp.headers_json())))
        .await
        .map_err(cdp)?;

    page.execute(AddScriptToEvaluateOnNewDocumentParams::new(stealth_script(fp)))
        .await
        .map_err(cdp)?;

    // Subscribe before enabling Fetch so no paused request is missed.
    let mut paused = page.event_listener::<EventRequestPaused>().await.map_err(cdp)?;
    let mut auth = page.event_listener::<EventAuthRequired>().await.map_err(cdp)?;
    let mut listeners = Vec::new();

    let intercept_page = page.clone();
    listeners.push(tokio::spawn(async move {
        while let Some(event) = paused.next().await {
            let resource_type = format!("{:?}", event.resource_type);
            let outcome = if should_block(&resource_type, &event.request.url) {
                intercept_page
                    .execute(FailRequestParams::new(
                        event.request_id.clone(),
                        ErrorReason::BlockedByClient,
                    ))
                    .await
                    .map(|_| ())
            } else {
                intercept_page
                    .execute(ContinueRequestParams::new(event.request_id.clone()))
                    .await
                    .map(|_| ())
            };
            if let Err(e) = outcome {
                debug!(error = %e, "request interception reply failed");
            }
        }
    }));

    let auth_page = page.clone();
    let has_credentials = credentials.is_some();
    listeners.push(tokio::spawn(async move {
        while let Some(event) = auth.next().await {
            let mut answer = AuthChallengeResponse::new(match &credentials {
                Some(_) => AuthChallengeResponseResponse::ProvideCredentials,
                None => AuthChallengeResponseResponse::CancelAuth,
            });
            if let Some(c) = &credentials {
                answer.username = Some(c.username.clone());
                answer.password = Some(c.password.clone());
            }
            if let Err(e) = auth_page
                .execute(ContinueWithAuthParams::new(event.request_id.clone(), answer))
                .await
            {
                debug!(error = %e, "proxy auth reply failed");
            }
        }
    }));

    let enable = FetchEnableParams {
        patterns: Some(vec![RequestPattern {
            url_pattern: Some("*".to_string()),
            resource_type: None,
            request_stage: Some(RequestStage::Request),
        }]),
        handle_auth_requests: Some(has_credentials),
    };
    if let Err(e) = page.execute(enable).await {
        for l in &listeners {
            l.abort();
        }
        return Err(cdp(e));
    }

    Ok(listeners)
}

struct ChromiumPage {
    page: Page,
    listeners: Mutex<Vec<JoinHandle<()>>>,
}

impl ChromiumPage {
    async fn eval_string(&self, expr: &str) -> Result<String, ScraperError> {
        let value = self
            .page
            .evaluate(expr)
            .await
            .map_err(|e| ScraperError::Browser(format!("evaluate failed: {e}")))?;
        value
            .into_value::<String>()
            .map_err(|e| ScraperError::Browser(format!("unexpected evaluate result: {e}")))
    }

    async fn eval_bool(&self, expr: &str) -> Result<bool, ScraperError> {
        let value = self
            .page
            .evaluate(expr)
            .await
            .map_err(|e| ScraperError::Browser(format!("evaluate failed: {e}")))?;
        value
            .into_value::<bool>()
            .map_err(|e| ScraperError::Browser(format!("unexpected evaluate result: {e}")))
    }
}

#[async_trait]
impl BrowserPage for ChromiumPage {
    async fn goto(&self, url: &str, timeout: Duration) -> Result<(), ScraperError> {
        match tokio::time::timeout(timeout, self.page.goto(url)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(ScraperError::Navigation(format!("{url}: {e}"))),
            Err(_) => Err(ScraperError::Navigation(format!(
                "{url}: timed out after {} ms",
                timeout.as_millis()
            ))),
        }
    }

    async fn title(&self) -> Result<String, ScraperError> {
        self.page
            .get_title()
            .await
            .map(|t| t.unwrap_or_default())
            .map_err(|e| ScraperError::Browser(format!("failed to read title: {e}")))
    }

    async fn body_text(&self) -> Result<String, ScraperError> {
        self.eval_string("document.body ? document.body.innerText : ''").await
    }

    async fn content(&self) -> Result<String, ScraperError> {
        self.page
            .content()
            .await
            .map_err(|e| ScraperError::Browser(format!("failed to read content: {e}")))
    }

    async fn wait_for_any(
        &self,
        selectors: &[&str],
        timeout: Duration,
    ) -> Result<bool, ScraperError> {
        if selectors.is_empty() {
            return Ok(false);
        }
        let list = serde_json::to_string(selectors)
            .map_err(|e| ScraperError::Browser(e.to_string()))?;
        let expr = format!(
            "{list}.some(s => {{ try {{ return document.querySelector(s) !== null; }} catch (e) {{ return false; }} }})"
        );

        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.eval_bool(&expr).await? {
                return Ok(true);
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(false);
            }
            tokio::time::sleep(SELECTOR_POLL).await;
        }
    }

    async fn scroll(&self, steps: u32) -> Result<(), ScraperError> {
        for _ in 0..steps {
            self.eval_bool("(() => { window.scrollBy(0, window.innerHeight); return true; })()")
                .await?;
            tokio::time::sleep(SCROLL_PAUSE).await;
        }
        Ok(())
    }

    async fn reset(&self) -> Result<(), ScraperError> {
        self.page
            .execute(ClearBrowserCookiesParams::default())
            .await
            .map_err(|e| ScraperError::Browser(format!("failed to clear cookies: {e}")))?;
        self.eval_bool(
            "(() => { try { localStorage.clear(); sessionStorage.clear(); } catch (e) {} return true; })()",
        )
        .await?;
        self.goto("about:blank", Duration::from_secs(10)).await
    }

    async fn close(&self) {
        if let Ok(mut listeners) = self.listeners.lock() {
            for l in listeners.drain(..) {
                l.abort();
            }
        }
        if let Err(e) = self.page.clone().close().await {
            debug!(error = %e, "page close failed");
        }
    }
}
