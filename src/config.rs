//! Stage settings and the on-disk file layout.
//!
//! The three stages only communicate through CSV files; `PipelinePaths` is
//! the single place that knows where those files live.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Settings for the coordinate-resolution stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeocoderSettings {
    /// Run the browser without a visible window.
    pub headless: bool,
    /// Seconds to wait between locations.
    pub delay_between_locations: f64,
    /// Seconds to wait for picker elements before giving up on a location.
    pub element_timeout_secs: u64,
}

impl Default for GeocoderSettings {
    fn default() -> Self {
        Self {
            headless: true,
            delay_between_locations: 2.0,
            element_timeout_secs: 15,
        }
    }
}

/// Settings for the endpoint-derivation stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointSettings {
    /// Seconds to wait for the embedded frame on the place page.
    pub iframe_timeout_secs: u64,
    /// Seconds to wait between locations.
    pub delay_between_locations: f64,
}

impl Default for EndpointSettings {
    fn default() -> Self {
        Self {
            iframe_timeout_secs: 15,
            delay_between_locations: 2.0,
        }
    }
}

/// Settings for the paginated-collection stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectorSettings {
    /// Seconds to wait between page requests.
    pub delay_between_requests: f64,
    /// Attempts per page before the page is abandoned.
    pub retry_count: u32,
    /// Hard per-location page limit.
    pub max_pages: u32,
    /// HTTP timeout per request, in seconds.
    pub request_timeout_secs: u64,
}

impl Default for CollectorSettings {
    fn default() -> Self {
        Self {
            delay_between_requests: 1.0,
            retry_count: 3,
            max_pages: 100,
            request_timeout_secs: 15,
        }
    }
}

/// The fixed file layout under the data directory.
///
/// ```text
/// data/
///   input/         locations.csv, cookies.txt
///   intermediate/  locations_with_coordinates.csv, weibo_api_urls.csv
///   output/        weibo_posts.csv (+ _stats.txt sidecar)
/// ```
#[derive(Debug, Clone)]
pub struct PipelinePaths {
    root: PathBuf,
}

impl PipelinePaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn input_dir(&self) -> PathBuf {
        self.root.join("input")
    }

    pub fn intermediate_dir(&self) -> PathBuf {
        self.root.join("intermediate")
    }

    pub fn output_dir(&self) -> PathBuf {
        self.root.join("output")
    }

    pub fn locations_csv(&self) -> PathBuf {
        self.input_dir().join("locations.csv")
    }

    pub fn cookies_txt(&self) -> PathBuf {
        self.input_dir().join("cookies.txt")
    }

    pub fn coordinates_csv(&self) -> PathBuf {
        self.intermediate_dir().join("locations_with_coordinates.csv")
    }

    pub fn endpoints_csv(&self) -> PathBuf {
        self.intermediate_dir().join("weibo_api_urls.csv")
    }

    pub fn posts_csv(&self) -> PathBuf {
        self.output_dir().join("weibo_posts.csv")
    }

    /// Sidecar path for a given output CSV: same stem, `_stats.txt` suffix.
    pub fn stats_sidecar(output_csv: &Path) -> PathBuf {
        let stem = output_csv
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("output");
        output_csv.with_file_name(format!("{stem}_stats.txt"))
    }
}

impl Default for PipelinePaths {
    fn default() -> Self {
        Self::new("data")
    }
}
