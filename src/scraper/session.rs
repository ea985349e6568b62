// session.rs
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{Mutex as AsyncMutex, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn};

use crate::scraper::browser::{BrowserInstance, BrowserLauncher, BrowserPage};
use crate::scraper::proxy::{ProxyId, ProxyPool};
use crate::scraper::stealth::Fingerprint;
use crate::scraper::ScraperError;

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub pool_size: usize,
    pub rotation_interval: Duration,
    pub fingerprint: Fingerprint,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            pool_size: 3,
            rotation_interval: Duration::from_secs(30 * 60),
            fingerprint: Fingerprint::desktop_es_ar(),
        }
    }
}

struct ActiveBrowser {
    instance: Arc<dyn BrowserInstance>,
    proxy: Option<ProxyId>,
    generation: u64,
    launched_at: Instant,
    launched_wall: DateTime<Utc>,
}

struct IdlePage {
    page: Arc<dyn BrowserPage>,
    generation: u64,
    dirty: bool,
}

type IdleQueue = Arc<Mutex<VecDeque<IdlePage>>>;

/// A checked-out page. Dropping it returns the page to the pool.
pub struct Session {
    page: Arc<dyn BrowserPage>,
    proxy: Option<ProxyId>,
    generation: u64,
    idle: IdleQueue,
    _permit: OwnedSemaphorePermit,
}

impl Session {
    pub fn page(&self) -> &dyn BrowserPage {
        self.page.as_ref()
    }

    /// The proxy this session egresses through, `None` when direct.
    pub fn proxy(&self) -> Option<ProxyId> {
        self.proxy
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn release(self) {
        drop(self);
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        let mut idle = self.idle.lock().unwrap_or_else(|e| e.into_inner());
        idle.push_back(IdlePage {
            page: Arc::clone(&self.page),
            generation: self.generation,
            dirty: true,
        });
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStats {
    pub browser_running: bool,
    pub generation: u64,
    pub launched_at: Option<DateTime<Utc>>,
    pub pool_size: usize,
    pub in_use: usize,
    pub idle: usize,
    pub proxy: Option<ProxyId>,
}

/// Owns the shared browser and hands out pooled pages.
///
/// At most `pool_size` sessions are out at once; further callers wait on
/// the semaphore. Launch, rotation and relaunch after a disconnect all go
/// through one async mutex so only one browser ever starts at a time.
pub struct SessionManager {
    launcher: Arc<dyn BrowserLauncher>,
    proxies: Arc<ProxyPool>,
    settings: SessionSettings,
    active: Arc<AsyncMutex<Option<ActiveBrowser>>>,
    permits: Arc<Semaphore>,
    idle: IdleQueue,
    generation: Arc<AtomicU64>,
}

impl SessionManager {
    pub fn new(
        launcher: Arc<dyn BrowserLauncher>,
        proxies: Arc<ProxyPool>,
        settings: SessionSettings,
    ) -> Self {
        let pool_size = settings.pool_size.max(1);
        Self {
            launcher,
            proxies,
            settings: SessionSettings { pool_size, ..settings },
            active: Arc::new(AsyncMutex::new(None)),
            permits: Arc::new(Semaphore::new(pool_size)),
            idle: Arc::new(Mutex::new(VecDeque::new())),
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    pub async fn get_session(&self) -> Result<Session, ScraperError> {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| ScraperError::NoSession("session pool closed".into()))?;

        let (instance, proxy, generation) = self.ensure_browser().await?;
        let page = self.checkout_page(instance.as_ref(), generation).await?;

        Ok(Session {
            page,
            proxy,
            generation,
            idle: Arc::clone(&self.idle),
            _permit: permit,
        })
    }

    /// Rotates the browser when it is past its rotation interval, or
    /// unconditionally with `force`. Returns whether a rotation happened.
    pub async fn rotate(&self, force: bool) -> Result<bool, ScraperError> {
        let mut active = self.active.lock().await;
        let due = match active.as_ref() {
            Some(b) => force || b.launched_at.elapsed() >= self.settings.rotation_interval,
            None => false,
        };
        if !due {
            return Ok(false);
        }

        if let Some(old) = active.take() {
            info!(generation = old.generation, "rotating browser");
            self.retire(old).await;
        }
        *active = Some(self.launch().await?);
        Ok(true)
    }

    pub async fn close(&self) {
        let mut active = self.active.lock().await;
        if let Some(old) = active.take() {
            info!(generation = old.generation, "closing browser");
            self.retire(old).await;
        }
    }

    pub async fn stats(&self) -> SessionStats {
        let active = self.active.lock().await;
        let idle = self.idle.lock().map(|q| q.len()).unwrap_or(0);
        SessionStats {
            browser_running: active.as_ref().map(|b| b.instance.is_connected()).unwrap_or(false),
            generation: self.generation.load(Ordering::SeqCst),
            launched_at: active.as_ref().map(|b| b.launched_wall),
            pool_size: self.settings.pool_size,
            in_use: self.settings.pool_size - self.permits.available_permits(),
            idle,
            proxy: active.as_ref().and_then(|b| b.proxy),
        }
    }

    async fn ensure_browser(
        &self,
    ) -> Result<(Arc<dyn BrowserInstance>, Option<ProxyId>, u64), ScraperError> {
        let mut active = self.active.lock().await;

        let stale = match active.as_ref() {
            None => true,
            Some(b) if !b.instance.is_connected() => {
                warn!(generation = b.generation, "browser disconnected, relaunching");
                true
            }
            Some(b) if b.proxy.is_some_and(|id| self.proxies.should_fail_over(id)) => {
                warn!(generation = b.generation, "browser proxy cooling down, relaunching");
                true
            }
            Some(b) if b.launched_at.elapsed() >= self.settings.rotation_interval => {
                info!(generation = b.generation, "browser past rotation interval");
                true
            }
            Some(_) => false,
        };

        if stale {
            if let Some(old) = active.take() {
                self.retire(old).await;
            }
            *active = Some(self.launch().await?);
        }

        match active.as_ref() {
            Some(b) => Ok((Arc::clone(&b.instance), b.proxy, b.generation)),
            None => Err(ScraperError::NoSession("browser unavailable".into())),
        }
    }

    async fn launch(&self) -> Result<ActiveBrowser, ScraperError> {
        let selected = self.proxies.select();
        let endpoint = selected.as_ref().map(|(_, e)| e);

        let instance = match self
            .launcher
            .launch(endpoint, &self.settings.fingerprint)
            .await
        {
            Ok(instance) => instance,
            Err(e) => {
                if let Some((id, _)) = &selected {
                    self.proxies.report_failure(*id);
                }
                warn!(error = %e, "browser launch failed");
                return Err(e);
            }
        };

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.watch_disconnect(Arc::clone(&instance), generation);
        info!(generation, "browser ready");

        Ok(ActiveBrowser {
            instance,
            proxy: selected.map(|(id, _)| id),
            generation,
            launched_at: Instant::now(),
            launched_wall: Utc::now(),
        })
    }

    /// Clears the shared state when this generation's browser goes away,
    /// so the next checkout relaunches.
    fn watch_disconnect(&self, instance: Arc<dyn BrowserInstance>, generation: u64) {
        let mut gone = instance.disconnected();
        let active = Arc::clone(&self.active);
        drop(instance);

        tokio::spawn(async move {
            if gone.wait_for(|g| *g).await.is_err() {
                return;
            }
            let mut active = active.lock().await;
            if active.as_ref().map(|b| b.generation) == Some(generation) {
                warn!(generation, "browser disconnected");
                *active = None;
            }
        });
    }

    /// Closes a browser and drops its idle pages. Pages still checked out
    /// are discarded when they come back with a stale generation.
    async fn retire(&self, old: ActiveBrowser) {
        let stale: Vec<IdlePage> = {
            let mut idle = self.idle.lock().unwrap_or_else(|e| e.into_inner());
            let (stale, keep): (Vec<_>, Vec<_>) =
                idle.drain(..).partition(|p| p.generation == old.generation);
            idle.extend(keep);
            stale
        };
        for p in stale {
            p.page.close().await;
        }
        old.instance.close().await;
    }

    async fn checkout_page(
        &self,
        instance: &dyn BrowserInstance,
        generation: u64,
    ) -> Result<Arc<dyn BrowserPage>, ScraperError> {
        loop {
            let next = {
                let mut idle = self.idle.lock().unwrap_or_else(|e| e.into_inner());
                idle.pop_front()
            };
            let Some(candidate) = next else { break };

            if candidate.generation != generation {
                debug!(page_generation = candidate.generation, "discarding page from old browser");
                candidate.page.close().await;
                continue;
            }
            if !candidate.dirty {
                return Ok(candidate.page);
            }
            match candidate.page.reset().await {
                Ok(()) => return Ok(candidate.page),
                Err(e) => {
                    warn!(error = %e, "page reset failed, replacing page");
                    candidate.page.close().await;
                }
            }
        }

        instance.new_page().await
    }
}
