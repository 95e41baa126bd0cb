pub mod analyzer;
pub mod browser;
pub mod collector;
pub mod endpoints;
pub mod geocoder;
pub mod http;

pub use analyzer::AnalysisReport;
pub use browser::{BrowserDriver, ChromeSession};
pub use collector::{CollectionOutcome, PostCollector};
pub use endpoints::EndpointGenerator;
pub use geocoder::{CoordinateResolver, GeocodeSummary};
pub use http::create_api_client;
