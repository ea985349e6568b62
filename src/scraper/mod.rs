pub mod browser;
pub mod extract;
pub mod navigator;
pub mod orchestrator;
pub mod proxy;
mod scraper_error;
pub mod session;
pub mod stealth;

pub use scraper_error::ScraperError;
