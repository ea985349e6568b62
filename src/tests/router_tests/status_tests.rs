// src/tests/router_tests/status_tests.rs
use crate::errors::ServerError;
use crate::router::handle;
use crate::tests::fakes::FakeLauncher;
use crate::tests::utils::{body_json, body_string, get, init_test_app, post_json};

#[test]
fn health_is_plain_ok() {
    let app = init_test_app(FakeLauncher::new());

    let resp = handle(get("/health"), &app.state).unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(body_string(resp), "ok");
}

#[test]
fn proxy_status_reports_pool_without_credentials() {
    let app = init_test_app(FakeLauncher::new());
    app.state.proxies.report_failure(crate::scraper::proxy::ProxyId(0));

    let resp = handle(get("/api/proxy-status"), &app.state).unwrap();
    assert_eq!(resp.status(), 200);

    let raw = body_string(resp);
    assert!(!raw.contains("pass"));

    let body: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(body["proxies"]["configured"], true);
    let endpoints = body["proxies"]["endpoints"].as_array().unwrap();
    assert_eq!(endpoints.len(), 2);
    assert_eq!(endpoints[0]["isPrimary"], true);
    assert_eq!(endpoints[0]["authenticated"], true);
    assert_eq!(endpoints[0]["consecutiveFailures"], 1);
    assert_eq!(endpoints[1]["protocol"], "socks5");

    assert_eq!(body["sessions"]["browserRunning"], false);
    assert_eq!(body["sessions"]["poolSize"], 3);
    assert_eq!(body["sessions"]["inUse"], 0);
}

#[test]
fn proxy_status_reflects_a_running_browser() {
    let app = init_test_app(FakeLauncher::new());

    let req = post_json("/api/search-properties", r#"{"neighborhoods": ["Palermo"]}"#);
    handle(req, &app.state).unwrap();

    let body = body_json(handle(get("/api/proxy-status"), &app.state).unwrap());
    assert_eq!(body["sessions"]["browserRunning"], true);
    assert_eq!(body["sessions"]["generation"], 1);
    assert_eq!(app.launcher.launches(), 1);
}

#[test]
fn unknown_route_is_not_found() {
    let app = init_test_app(FakeLauncher::new());
    assert!(matches!(handle(get("/dashboard"), &app.state), Err(ServerError::NotFound)));
}

#[test]
fn wrong_method_is_not_allowed() {
    let app = init_test_app(FakeLauncher::new());

    assert!(matches!(
        handle(get("/api/search-properties"), &app.state),
        Err(ServerError::MethodNotAllowed)
    ));
    assert!(matches!(
        handle(post_json("/health", "{}"), &app.state),
        Err(ServerError::MethodNotAllowed)
    ));
}
