use crate::config::Config;
use crate::router::{handle, AppState};
use crate::scraper::browser::ChromiumLauncher;
use crate::scraper::extract::default_extractors;
use crate::scraper::navigator::Navigator;
use crate::scraper::orchestrator::Orchestrator;
use crate::scraper::session::SessionManager;
use astra::Server;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

mod config;
mod domain;
mod errors;
mod responses;
mod router;
mod scraper;

#[cfg(test)]
mod tests;

fn main() {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,depto_scout=debug,chromiumoxide=warn")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // 1️⃣ Configuration
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("❌ Invalid configuration: {e}");
            std::process::exit(1);
        }
    };
    let catalog = match config.load_fallback_catalog() {
        Ok(catalog) => catalog,
        Err(e) => {
            error!("❌ {e}");
            std::process::exit(1);
        }
    };

    // 2️⃣ Async runtime for the browser and the scrapers
    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            error!("❌ Failed to start the async runtime: {e}");
            std::process::exit(1);
        }
    };

    // 3️⃣ Scraping stack
    let proxies = Arc::new(config.proxy_pool());
    if let Some(interval) = config.proxy_probe_interval.filter(|_| proxies.is_configured()) {
        let _guard = runtime.enter();
        Arc::clone(&proxies).spawn_health_probe(interval);
    }

    let launcher = Arc::new(ChromiumLauncher::new(
        config.chromium_path.clone(),
        config.browser_headless,
    ));
    let sessions = Arc::new(SessionManager::new(
        launcher,
        Arc::clone(&proxies),
        config.session_settings(),
    ));
    let navigator = Arc::new(Navigator::new(Arc::clone(&proxies)));
    let orchestrator = Arc::new(Orchestrator::new(
        Arc::clone(&sessions),
        navigator,
        default_extractors(),
        config.orchestrator_settings(catalog),
    ));

    let state = AppState {
        orchestrator,
        proxies,
        sessions: Arc::clone(&sessions),
        runtime: runtime.handle().clone(),
    };

    // 4️⃣ Serve
    info!(
        addr = %config.bind_addr,
        mode = ?config.mode,
        "Starting server at http://{}",
        config.bind_addr
    );
    let server = Server::bind(&config.bind_addr).max_workers(8);
    let result = server.serve(move |req, _info| {
        handle(req, &state).unwrap_or_else(responses::error_to_response)
    });

    if let Err(e) = result {
        error!("Server ended with error: {e}");
    }

    runtime.block_on(sessions.close());
    info!("Server shut down cleanly.");
}
