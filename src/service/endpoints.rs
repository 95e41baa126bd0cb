use std::path::Path;
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use tracing::{error, info, warn};

use crate::config::EndpointSettings;
use crate::domain::models::EndpointRecord;
use crate::error::Result;
use crate::service::browser::BrowserDriver;
use crate::storage;

const PLACE_PAGE_ZOOM: &str = "12z";
const CARDLIST_MARKER: &str = "cardlist";

fn re_iframe_src() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"<iframe[^>]*src="([^"]*cardlist[^"]*)"[^>]*>"#).unwrap())
}

fn re_page_param() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"&page=\d+").unwrap())
}

#[derive(Debug, Clone, Copy)]
pub struct EndpointSummary {
    pub locations_processed: usize,
    pub successful_locations: usize,
}

/// Derives the container API endpoint for each resolved location by loading
/// its place map page and reading the feed iframe the page embeds.
pub struct EndpointGenerator {
    settings: EndpointSettings,
}

impl EndpointGenerator {
    pub fn new(settings: EndpointSettings) -> Self {
        Self { settings }
    }

    /// Processes every row of the coordinates CSV and writes one meta row
    /// per location whose feed iframe was found. Locations without
    /// coordinates or without an iframe are skipped; the output file is
    /// written (header included) even when nothing succeeded.
    pub async fn generate_from_csv(
        &self,
        driver: &dyn BrowserDriver,
        input_csv: &Path,
        output_csv: &Path,
    ) -> Result<EndpointSummary> {
        let rows = storage::read_coordinates(input_csv)?;
        let total = rows.len();

        info!("Generating meta URLs for {} locations...", total);

        let mut records = Vec::new();
        for (idx, row) in rows.iter().enumerate() {
            let location = row.location.trim();
            info!("Processing {}/{}: {}", idx + 1, total, location);

            let coordinates = row.coordinates.as_deref().map(str::trim).unwrap_or("");
            if coordinates.is_empty() {
                warn!("{}: no coordinates, skipping", location);
            } else {
                match self.derive_for_location(driver, location, coordinates).await {
                    Some(record) => {
                        info!("{}: Generated meta URL", location);
                        records.push(record);
                    }
                    None => warn!("{}: No URLs generated (iframe not found)", location),
                }
            }

            if idx < total - 1 {
                tokio::time::sleep(Duration::from_secs_f64(
                    self.settings.delay_between_locations,
                ))
                .await;
            }
        }

        storage::write_endpoints(output_csv, &records)?;

        let successful = records.len();
        info!("URL generation completed");
        info!("Locations processed: {}", total);
        info!("Successful locations: {}", successful);
        info!("Results saved to {}", output_csv.display());

        Ok(EndpointSummary {
            locations_processed: total,
            successful_locations: successful,
        })
    }

    async fn derive_for_location(
        &self,
        driver: &dyn BrowserDriver,
        location: &str,
        coordinates: &str,
    ) -> Option<EndpointRecord> {
        let place_url = place_url_from_coordinates(coordinates)?;

        let cardlist_url = match self
            .extract_cardlist_url(driver, &place_url, location)
            .await
        {
            Ok(Some(url)) => url,
            Ok(None) => return None,
            Err(e) => {
                error!("Error extracting cardlist URL for {}: {}", location, e);
                return None;
            }
        };

        info!("Successfully extracted cardlist URL for {}", location);
        let api_url = convert_cardlist_to_api_url(&cardlist_url, 1);

        Some(EndpointRecord {
            location: location.to_string(),
            url_type: EndpointRecord::URL_TYPE_CONTAINER_API.to_string(),
            api_url,
            page: 1,
            coordinates: coordinates.to_string(),
            cardlist_url,
            place_url,
        })
    }

    /// Loads the place page and pulls the feed URL out of its iframe. When
    /// the iframe never attaches to the DOM within the timeout, the
    /// serialized page source is scanned as a fallback; an iframe that is
    /// present but points elsewhere is treated as a definitive miss.
    async fn extract_cardlist_url(
        &self,
        driver: &dyn BrowserDriver,
        place_url: &str,
        location: &str,
    ) -> Result<Option<String>> {
        info!("Accessing place map page: {}", place_url);
        driver.navigate(place_url).await?;

        if driver
            .wait_for_selector("iframe", self.settings.iframe_timeout_secs)
            .await?
        {
            match driver.attribute("iframe", "src").await? {
                Some(src) if src.contains(CARDLIST_MARKER) => {
                    let url = src.replace("&amp;", "&");
                    info!("Found cardlist URL for {}: {}", location, url);
                    Ok(Some(url))
                }
                _ => {
                    warn!("No cardlist URL found in iframe src for {}", location);
                    Ok(None)
                }
            }
        } else {
            warn!("Timeout waiting for iframe for {}", location);
            let html = driver.page_html().await?;
            match extract_cardlist_from_html(&html) {
                Some(url) => {
                    info!("Found cardlist URL in page source for {}", location);
                    Ok(Some(url))
                }
                None => {
                    warn!("No cardlist URL found for {}", location);
                    Ok(None)
                }
            }
        }
    }
}

/// Builds the place map URL for a raw `lng,lat` string. The string is used
/// as-is so hand-edited coordinate files keep their precision.
pub fn place_url_from_coordinates(coordinates: &str) -> Option<String> {
    let parts: Vec<&str> = coordinates.split(',').collect();
    if parts.len() != 2 {
        warn!("Invalid coordinates format: {}", coordinates);
        return None;
    }
    Some(format!(
        "https://place.weibo.com/wandermap/?maploc={},{},{}",
        parts[0].trim(),
        parts[1].trim(),
        PLACE_PAGE_ZOOM
    ))
}

/// Rewrites a cardlist page URL into its JSON API equivalent, forcing the
/// page parameter so pagination starts from a known point.
pub fn convert_cardlist_to_api_url(cardlist_url: &str, page: u32) -> String {
    let api_url = cardlist_url.replace("/p/cardlist", "/api/container/getIndex");
    let replacement = format!("&page={}", page);
    if api_url.contains("&page=") {
        re_page_param()
            .replace_all(&api_url, replacement.as_str())
            .into_owned()
    } else {
        format!("{}{}", api_url, replacement)
    }
}

fn extract_cardlist_from_html(html: &str) -> Option<String> {
    let captures = re_iframe_src().captures(html)?;
    Some(captures.get(1)?.as_str().replace("&amp;", "&"))
}
