use crate::router::AppState;
use crate::scraper::extract::{default_extractors, ExtractOptions};
use crate::scraper::navigator::{NavigateOptions, Navigator};
use crate::scraper::orchestrator::{Orchestrator, OrchestratorSettings, ScrapeMode};
use crate::scraper::proxy::{ProxyEndpoint, ProxyPool, ProxyProtocol};
use crate::scraper::session::{SessionManager, SessionSettings};
use crate::tests::fakes::FakeLauncher;
use astra::{Body, Request, Response};
use http::Method;
use std::io::Read;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Runtime;

/// A full app wired to a fake browser. Handlers block on `runtime`, so
/// tests using it are plain `#[test]`s.
pub struct TestApp {
    pub state: AppState,
    pub launcher: Arc<FakeLauncher>,
    _runtime: Runtime,
}

/// Navigation and waits tuned down so blocked routes fail fast.
fn quick_extract() -> ExtractOptions {
    ExtractOptions {
        navigate: NavigateOptions {
            max_retries: 2,
            timeout: Duration::from_secs(2),
            backoff_base: Duration::from_millis(10),
        },
        wait_timeout: Duration::from_millis(10),
        ..ExtractOptions::default()
    }
}

pub fn init_test_app(launcher: FakeLauncher) -> TestApp {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .unwrap_or_else(|e| panic!("runtime failed to start: {e}"));

    let launcher = Arc::new(launcher);
    let proxies = Arc::new(ProxyPool::new(
        Some(
            ProxyEndpoint::new("primary.example", 8080, ProxyProtocol::Http)
                .with_credentials("user", "pass"),
        ),
        vec![ProxyEndpoint::new("backup.example", 1080, ProxyProtocol::Socks5)],
    ));
    let sessions = Arc::new(SessionManager::new(
        Arc::clone(&launcher) as Arc<dyn crate::scraper::browser::BrowserLauncher>,
        Arc::clone(&proxies),
        SessionSettings::default(),
    ));
    let orchestrator = Arc::new(Orchestrator::new(
        Arc::clone(&sessions),
        Arc::new(Navigator::new(Arc::clone(&proxies))),
        default_extractors(),
        OrchestratorSettings {
            mode: ScrapeMode::Sequential { delay: Duration::ZERO },
            deadline: Duration::from_secs(20),
            default_extract: quick_extract(),
            jitter_ms: (0, 0),
            ..OrchestratorSettings::default()
        },
    ));

    TestApp {
        state: AppState {
            orchestrator,
            proxies,
            sessions,
            runtime: runtime.handle().clone(),
        },
        launcher,
        _runtime: runtime,
    }
}

pub fn post_json(uri: &str, body: &str) -> Request {
    http::Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header("Content-Type", "application/json")
        .body(Body::from(body.as_bytes().to_vec()))
        .unwrap()
}

pub fn get(uri: &str) -> Request {
    http::Request::builder()
        .method(Method::GET)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

pub fn body_string(resp: Response) -> String {
    let mut body = String::new();
    resp.into_body().reader().read_to_string(&mut body).unwrap();
    body
}

pub fn body_json(resp: Response) -> serde_json::Value {
    serde_json::from_str(&body_string(resp)).unwrap()
}
