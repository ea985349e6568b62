// src/tests/router_tests/search_tests.rs
use crate::errors::ServerError;
use crate::router::handle;
use crate::tests::fakes::{FakeLauncher, FakeRoute};
use crate::tests::utils::{body_json, init_test_app, post_json};

const ZONAPROP_PAGE: &str = r#"
<html><head><title>Departamentos en venta en Palermo</title></head><body>
  <div data-qa="posting PROPERTY" data-to-posting="/propiedades/depto-2-amb-palermo-5100.html">
    <div>USD 165.000</div>
    <div>Expensas $ 95.000</div>
    <span>58 m² tot.</span><span>2 amb.</span>
    <h2 data-qa="POSTING_TITLE">Departamento 2 ambientes en Palermo Hollywood</h2>
    <div>Dueño directo</div>
  </div>
  <div data-qa="posting PROPERTY" data-to-posting="/propiedades/monoambiente-palermo-5101.html">
    <div>USD 120.000</div>
    <span>50 m²</span>
    <h2 data-qa="POSTING_TITLE">Monoambiente amplio en Palermo Soho</h2>
    <div>Inmobiliaria Norte</div>
  </div>
  <div data-qa="posting PROPERTY" data-to-posting="/propiedades/depto-belgrano-5102.html">
    <div>USD 300.000</div>
    <span>60 m²</span>
    <h2 data-qa="POSTING_TITLE">Departamento en Belgrano R con vista</h2>
  </div>
</body></html>"#;

fn zonaprop_launcher() -> FakeLauncher {
    let launcher = FakeLauncher::new();
    launcher.route(
        "zonaprop.com.ar",
        FakeRoute::html("Departamentos en venta en Palermo", ZONAPROP_PAGE),
    );
    launcher
}

#[test]
fn search_returns_filtered_and_ranked_listings() {
    let app = init_test_app(zonaprop_launcher());

    let req = post_json(
        "/api/search-properties",
        r#"{"neighborhoods": ["Palermo"], "globalMaxPricePerM2": 3000}"#,
    );
    let resp = handle(req, &app.state).unwrap();
    assert_eq!(resp.status(), 200);

    let body = body_json(resp);
    assert_eq!(body["success"], true);
    assert_eq!(body["count"], 2);
    assert_eq!(body["timedOut"], false);
    assert_eq!(body["usedFallback"], false);

    let properties = body["properties"].as_array().unwrap();
    assert_eq!(properties[0]["title"], "Monoambiente amplio en Palermo Soho");
    assert_eq!(properties[0]["pricePerArea"], 2400);
    assert_eq!(properties[1]["pricePerArea"], 2845);
    assert_eq!(properties[1]["isOwnerListed"], true);
    assert_eq!(properties[1]["source"], "Zonaprop");

    let sources = body["sources"].as_array().unwrap();
    assert_eq!(sources.len(), 3);
    assert!(sources.iter().all(|s| s["status"] == "completed"));
    assert_eq!(app.launcher.visits("zonaprop.com.ar"), 1);
}

#[test]
fn owner_only_and_neighborhood_ceiling_apply() {
    let app = init_test_app(zonaprop_launcher());

    let req = post_json(
        "/api/search-properties",
        r#"{
            "neighborhoods": ["Palermo"],
            "neighborhoodPrices": [{"neighborhood": "palermo", "maxPricePerM2": 2900}],
            "ownerOnly": true
        }"#,
    );
    let body = body_json(handle(req, &app.state).unwrap());

    assert_eq!(body["count"], 1);
    assert_eq!(
        body["properties"][0]["title"],
        "Departamento 2 ambientes en Palermo Hollywood"
    );
}

#[test]
fn zero_results_is_still_a_success_with_a_message() {
    let app = init_test_app(zonaprop_launcher());

    let req = post_json("/api/search-properties", r#"{"neighborhoods": ["Mataderos"]}"#);
    let resp = handle(req, &app.state).unwrap();
    assert_eq!(resp.status(), 200);

    let body = body_json(resp);
    assert_eq!(body["success"], true);
    assert_eq!(body["count"], 0);
    assert!(body["message"].as_str().unwrap().starts_with("No listings matched"));
}

#[test]
fn blocked_sources_are_reported_not_fatal() {
    let launcher = zonaprop_launcher();
    launcher.route("argenprop.com", FakeRoute::html("Access denied", "<html></html>"));
    let app = init_test_app(launcher);

    let req = post_json("/api/search-properties", r#"{"neighborhoods": ["Palermo"]}"#);
    let body = body_json(handle(req, &app.state).unwrap());

    assert_eq!(body["count"], 2);
    let argenprop = &body["sources"][1];
    assert_eq!(argenprop["source"], "Argenprop");
    assert_eq!(argenprop["status"], "failed");
    assert!(argenprop["error"].as_str().unwrap().contains("Blocked"));
    assert_eq!(app.launcher.visits("argenprop.com"), 2);
}

#[test]
fn empty_neighborhoods_is_a_bad_request() {
    let app = init_test_app(FakeLauncher::new());

    for body in [r#"{"neighborhoods": []}"#, r#"{"neighborhoods": ["  "]}"#, "{}"] {
        let req = post_json("/api/search-properties", body);
        assert!(matches!(handle(req, &app.state), Err(ServerError::BadRequest(_))));
    }
    assert_eq!(app.launcher.launches(), 0);
}

#[test]
fn malformed_json_is_a_bad_request() {
    let app = init_test_app(FakeLauncher::new());

    let req = post_json("/api/search-properties", "neighborhoods=Palermo");
    assert!(matches!(handle(req, &app.state), Err(ServerError::BadRequest(_))));
}
