use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::config::GeocoderSettings;
use crate::domain::models::{CoordinateRecord, GeoPoint};
use crate::error::{AppError, Result};
use crate::service::browser::BrowserDriver;
use crate::storage;

/// Public coordinate picker hosted by Amap. Free to use and far more
/// accurate for Chinese place names than the geocoding HTTP APIs.
pub const PICKER_URL: &str = "https://lbs.amap.com/tools/picker";

const SEARCH_INPUT: &str = "#txtSearch";
const COORDINATE_OUTPUT: &str = "#txtCoordinate";
const MAP_CANVAS: &str = "#map";

/// Selectors tried in order when picking a search result. The picker has
/// changed its markup before, so the specific classes come first and the
/// loose class-substring matches act as a safety net.
const RESULT_SELECTORS: [&str; 4] = [
    ".search-result-item",
    ".poi-item",
    "[class*='result']",
    "[class*='item']",
];

#[derive(Debug, Clone, Copy)]
pub struct GeocodeSummary {
    pub total: usize,
    pub successful: usize,
    pub distinct: usize,
}

/// Resolves location names to coordinates by driving the Amap picker page.
pub struct CoordinateResolver {
    settings: GeocoderSettings,
    // coordinate key -> first location that claimed it
    collected: HashMap<String, String>,
}

impl CoordinateResolver {
    pub fn new(settings: GeocoderSettings) -> Self {
        Self {
            settings,
            collected: HashMap::new(),
        }
    }

    /// Resolves every location in `input_csv` and writes one row per input
    /// location to `output_csv`. Failed rows keep their location name but
    /// leave the coordinate columns empty, so downstream stages can skip
    /// them and a rerun can be diffed against the input.
    pub async fn collect_from_csv(
        &mut self,
        driver: &dyn BrowserDriver,
        input_csv: &Path,
        output_csv: &Path,
    ) -> Result<GeocodeSummary> {
        let locations = storage::read_locations(input_csv)?;
        let total = locations.len();

        info!("Starting coordinate collection for {} locations", total);
        info!(
            "Using delay: {}s between locations",
            self.settings.delay_between_locations
        );

        let mut records = Vec::with_capacity(total);
        for (idx, row) in locations.iter().enumerate() {
            let location = row.location.trim().to_string();
            info!("Processing {}/{}: {}", idx + 1, total, location);

            match self.resolve_one(driver, &location).await {
                Some(point) => {
                    info!("Resolved {}: {:.2}, {:.2}", location, point.lat, point.lng);
                    records.push(CoordinateRecord::resolved(&location, point));
                }
                None => {
                    warn!("No coordinates found for {}", location);
                    records.push(CoordinateRecord::unresolved(&location));
                }
            }

            if self.settings.delay_between_locations > 0.0 && idx < total - 1 {
                tokio::time::sleep(Duration::from_secs_f64(
                    self.settings.delay_between_locations,
                ))
                .await;
            }
        }

        storage::write_coordinates(output_csv, &records)?;

        let successful = records.iter().filter(|r| r.coordinates.is_some()).count();
        let distinct = self.collected.len();

        info!("Coordinate collection completed");
        info!("Successful: {}/{}", successful, total);
        info!("Failed: {}/{}", total - successful, total);
        info!("Results saved to {}", output_csv.display());
        info!("Unique coordinate sets: {}", distinct);

        Ok(GeocodeSummary {
            total,
            successful,
            distinct,
        })
    }

    /// Resolves a single location. Any driver error is logged and treated
    /// as a failed row rather than aborting the whole run.
    async fn resolve_one(&mut self, driver: &dyn BrowserDriver, location: &str) -> Option<GeoPoint> {
        match self.try_resolve(driver, location).await {
            Ok(point) => point,
            Err(e) => {
                error!("Error collecting coordinates for {}: {}", location, e);
                None
            }
        }
    }

    async fn try_resolve(
        &mut self,
        driver: &dyn BrowserDriver,
        location: &str,
    ) -> Result<Option<GeoPoint>> {
        driver.navigate(PICKER_URL).await?;
        tokio::time::sleep(Duration::from_secs(2)).await;

        if !self.search_and_select(driver, location).await? {
            warn!("Could not find/select location: {}", location);
            return Ok(None);
        }

        if !driver
            .wait_for_selector(COORDINATE_OUTPUT, self.settings.element_timeout_secs)
            .await?
        {
            error!("Timeout waiting for coordinate display for {}", location);
            return Ok(None);
        }

        let Some(raw) = driver.attribute(COORDINATE_OUTPUT, "value").await? else {
            warn!("No valid coordinates found for {}", location);
            return Ok(None);
        };
        let Some(point) = GeoPoint::parse_lng_lat(&raw) else {
            warn!("Invalid coordinates format for {}: {}", location, raw);
            return Ok(None);
        };
        let point = point.rounded();

        let key = point.coordinate_key();
        if let Some(previous) = self.collected.get(&key) {
            warn!("Duplicate coordinates for {}: {}", location, key);
            warn!("Already collected for: {}", previous);
            return Ok(None);
        }
        self.collected.insert(key, location.to_string());

        Ok(Some(point))
    }

    /// Types the location into the picker search box and clicks through to
    /// a result. Each selection strategy is tried in turn; clicking the map
    /// canvas is the last resort and accepts whatever point it reports.
    async fn search_and_select(
        &self,
        driver: &dyn BrowserDriver,
        location: &str,
    ) -> Result<bool> {
        if !driver
            .wait_for_selector(SEARCH_INPUT, self.settings.element_timeout_secs)
            .await?
        {
            return Err(AppError::browser(
                "Search input never appeared on the picker page",
            ));
        }
        driver.set_value(SEARCH_INPUT, location).await?;
        driver.press_enter(SEARCH_INPUT).await?;

        tokio::time::sleep(Duration::from_millis(1500)).await;

        for selector in RESULT_SELECTORS {
            match driver.click_matching(selector, Some(location)).await {
                Ok(true) => {
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    return Ok(true);
                }
                Ok(false) => {}
                Err(e) => debug!("Result selector {} failed: {}", selector, e),
            }
        }

        match driver.click_element_with_text(location).await {
            Ok(true) => {
                tokio::time::sleep(Duration::from_secs(1)).await;
                return Ok(true);
            }
            Ok(false) => {}
            Err(e) => debug!("Text-based selection failed: {}", e),
        }

        if let Ok(true) = driver.click_matching(MAP_CANVAS, None).await {
            tokio::time::sleep(Duration::from_secs(1)).await;
            return Ok(true);
        }

        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Scripted driver that hands out one coordinate string per location.
    struct FakeDriver {
        coordinate_values: Mutex<VecDeque<Option<String>>>,
    }

    impl FakeDriver {
        fn with_values(values: Vec<Option<&str>>) -> Self {
            Self {
                coordinate_values: Mutex::new(
                    values.into_iter().map(|v| v.map(|s| s.to_string())).collect(),
                ),
            }
        }
    }

    #[async_trait]
    impl BrowserDriver for FakeDriver {
        async fn navigate(&self, _url: &str) -> Result<()> {
            Ok(())
        }

        async fn wait_for_selector(&self, _selector: &str, _timeout_secs: u64) -> Result<bool> {
            Ok(true)
        }

        async fn attribute(&self, _selector: &str, _name: &str) -> Result<Option<String>> {
            Ok(self
                .coordinate_values
                .lock()
                .unwrap()
                .pop_front()
                .flatten())
        }

        async fn set_value(&self, _selector: &str, _value: &str) -> Result<bool> {
            Ok(true)
        }

        async fn press_enter(&self, _selector: &str) -> Result<bool> {
            Ok(true)
        }

        async fn click_matching(
            &self,
            _selector: &str,
            _preferred_text: Option<&str>,
        ) -> Result<bool> {
            Ok(true)
        }

        async fn click_element_with_text(&self, _text: &str) -> Result<bool> {
            Ok(true)
        }

        async fn page_html(&self) -> Result<String> {
            Ok(String::new())
        }
    }

    fn test_settings() -> GeocoderSettings {
        GeocoderSettings {
            headless: true,
            delay_between_locations: 0.0,
            element_timeout_secs: 1,
        }
    }

    fn write_locations_csv(dir: &tempfile::TempDir, names: &[&str]) -> std::path::PathBuf {
        let path = dir.path().join("locations.csv");
        let mut body = String::from("Location\n");
        for name in names {
            body.push_str(name);
            body.push('\n');
        }
        std::fs::write(&path, body).unwrap();
        path
    }

    #[tokio::test(start_paused = true)]
    async fn test_collect_writes_resolved_and_failed_rows() {
        let dir = tempfile::tempdir().unwrap();
        let input = write_locations_csv(&dir, &["北京大学", "清华大学"]);
        let output = dir.path().join("locations_with_coordinates.csv");

        let driver = FakeDriver::with_values(vec![Some("116.397428,39.90923"), None]);
        let mut resolver = CoordinateResolver::new(test_settings());

        let summary = resolver
            .collect_from_csv(&driver, &input, &output)
            .await
            .unwrap();

        assert_eq!(summary.total, 2);
        assert_eq!(summary.successful, 1, "Second location had no coordinate value");
        assert_eq!(summary.distinct, 1);

        let records = storage::read_coordinates(&output).unwrap();
        assert_eq!(records.len(), 2, "Failed rows must still be written");
        assert_eq!(records[0].coordinates.as_deref(), Some("116.40,39.91"));
        assert_eq!(records[0].latitude.as_deref(), Some("39.91"));
        assert!(records[1].coordinates.is_none(), "Failure leaves cells empty");
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_coordinates_fail_second_location() {
        let dir = tempfile::tempdir().unwrap();
        let input = write_locations_csv(&dir, &["东门", "西门"]);
        let output = dir.path().join("coords.csv");

        // Both searches land on the same point after rounding
        let driver =
            FakeDriver::with_values(vec![Some("116.401,39.912"), Some("116.399,39.908")]);
        let mut resolver = CoordinateResolver::new(test_settings());

        let summary = resolver
            .collect_from_csv(&driver, &input, &output)
            .await
            .unwrap();

        assert_eq!(summary.successful, 1, "Duplicate point must count as a failure");
        assert_eq!(summary.distinct, 1);

        let records = storage::read_coordinates(&output).unwrap();
        assert_eq!(records[0].coordinates.as_deref(), Some("116.40,39.91"));
        assert!(records[1].coordinates.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unparseable_coordinate_value_is_tolerated() {
        let dir = tempfile::tempdir().unwrap();
        let input = write_locations_csv(&dir, &["某地"]);
        let output = dir.path().join("coords.csv");

        let driver = FakeDriver::with_values(vec![Some("not-a-coordinate")]);
        let mut resolver = CoordinateResolver::new(test_settings());

        let summary = resolver
            .collect_from_csv(&driver, &input, &output)
            .await
            .unwrap();

        assert_eq!(summary.successful, 0);
        let records = storage::read_coordinates(&output).unwrap();
        assert_eq!(records.len(), 1);
        assert!(records[0].coordinates.is_none());
    }

    #[tokio::test]
    async fn test_missing_location_column_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("bad.csv");
        std::fs::write(&input, "Name\n北京大学\n").unwrap();
        let output = dir.path().join("coords.csv");

        let driver = FakeDriver::with_values(vec![]);
        let mut resolver = CoordinateResolver::new(test_settings());

        let result = resolver.collect_from_csv(&driver, &input, &output).await;
        assert!(
            matches!(result, Err(AppError::MissingColumn { .. })),
            "Input without a Location column must be rejected up front"
        );
    }
}
