//! Rich domain entities - behavior lives WITH data

use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use scraper::Html;
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ====== Enums ======

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gender {
    Male,
    Female,
    Unknown,
}

impl Gender {
    pub fn from_code(code: &str) -> Self {
        match code {
            "m" => Gender::Male,
            "f" => Gender::Female,
            _ => Gender::Unknown,
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Gender::Male => "Male",
            Gender::Female => "Female",
            Gender::Unknown => "Unknown",
        }
    }
}

// ====== Coordinates ======

/// A picked coordinate pair. The picker and all derived URLs use `lng,lat`
/// order; fields are named explicitly so the two never get swapped silently.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    /// Parse a `lng,lat` string as produced by the picker's coordinate box
    /// (and stored in the `Coordinates` CSV column).
    pub fn parse_lng_lat(value: &str) -> Option<Self> {
        let mut parts = value.split(',');
        let lng = parts.next()?.trim().parse::<f64>().ok()?;
        let lat = parts.next()?.trim().parse::<f64>().ok()?;
        Some(Self { lat, lng })
    }

    /// Round both axes to 2 decimal places, the resolution the pipeline
    /// works at.
    pub fn rounded(self) -> Self {
        Self {
            lat: (self.lat * 100.0).round() / 100.0,
            lng: (self.lng * 100.0).round() / 100.0,
        }
    }

    /// Canonical `lng,lat` key, used both as the CSV `Coordinates` value and
    /// for duplicate detection within a geocoding pass.
    pub fn coordinate_key(&self) -> String {
        format!("{:.2},{:.2}", self.lng, self.lat)
    }
}

// ====== CSV row types ======

/// Row of the stage-1 input CSV: just a human-readable location name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocationRecord {
    #[serde(rename = "Location")]
    pub location: String,
}

/// Row of the stage-1 output CSV. Coordinate columns are empty (not absent)
/// when resolution failed, so the row set always mirrors the input set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinateRecord {
    #[serde(rename = "Location")]
    pub location: String,
    #[serde(rename = "Latitude")]
    pub latitude: Option<String>,
    #[serde(rename = "Longitude")]
    pub longitude: Option<String>,
    #[serde(rename = "Coordinates")]
    pub coordinates: Option<String>,
}

impl CoordinateRecord {
    pub fn resolved(location: impl Into<String>, point: GeoPoint) -> Self {
        Self {
            location: location.into(),
            latitude: Some(format!("{:.2}", point.lat)),
            longitude: Some(format!("{:.2}", point.lng)),
            coordinates: Some(point.coordinate_key()),
        }
    }

    pub fn unresolved(location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            latitude: None,
            longitude: None,
            coordinates: None,
        }
    }

    pub fn point(&self) -> Option<GeoPoint> {
        GeoPoint::parse_lng_lat(self.coordinates.as_deref()?)
    }
}

/// Meta row of the stage-2 output CSV: one per location, from which the
/// collector regenerates every page URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointRecord {
    #[serde(rename = "Location")]
    pub location: String,
    #[serde(rename = "URL_Type", default)]
    pub url_type: String,
    #[serde(rename = "API_URL")]
    pub api_url: String,
    #[serde(rename = "Page")]
    pub page: u32,
    #[serde(rename = "Coordinates", default)]
    pub coordinates: String,
    #[serde(rename = "Cardlist_URL", default)]
    pub cardlist_url: String,
    #[serde(rename = "Place_URL", default)]
    pub place_url: String,
}

impl EndpointRecord {
    pub const URL_TYPE_CONTAINER_API: &'static str = "container_api";

    /// The API URL with its page parameter stripped; page URLs are rebuilt
    /// from this by appending `&page=N`.
    pub fn base_api_url(&self) -> &str {
        match self.api_url.split_once("&page=") {
            Some((base, _)) => base,
            None => &self.api_url,
        }
    }
}

// ====== Rich Entity: Post ======

/// A single collected post, flattened to the output CSV schema. Column order
/// follows field order here.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Post {
    pub mid: String,
    pub created_at: String,
    pub text: String,
    pub text_length: i64,
    pub source: String,
    pub favorited: bool,
    pub reposts_count: i64,
    pub comments_count: i64,
    pub attitudes_count: i64,
    pub pic_num: i64,
    pub user_id: String,
    pub screen_name: String,
    pub follow_count: String,
    pub followers_count: String,
    pub statuses_count: String,
    pub verified: bool,
    pub verified_type: i64,
    pub gender: String,
    pub retweeted_status: bool,
    pub is_long_text: bool,
    pub pic_urls: String,
    pub coordinates: String,
    pub location: String,
}

impl Post {
    /// Build a post from one `mblog` object of the container API. Returns
    /// `None` when the value is not an object; every field inside is
    /// defaulted rather than trusted.
    ///
    /// The location name is stamped on later by the collector; only the
    /// coordinate string is known at extraction time.
    pub fn from_mblog(mblog: &Value, coordinates: &str) -> Option<Self> {
        let obj = mblog.as_object()?;
        if obj.is_empty() {
            return None;
        }

        let user = match obj.get("user") {
            Some(Value::Object(map)) => Some(map),
            Some(other) if !other.is_null() => {
                tracing::warn!("user field is not an object: {}", type_name(other));
                None
            }
            _ => None,
        };

        let text = clean_post_text(string_field(obj.get("text")).as_str());
        let text_length = text.chars().count() as i64;

        let pic_urls = obj
            .get("pics")
            .and_then(Value::as_array)
            .map(|pics| {
                pics.iter()
                    .filter_map(|pic| pic.as_object())
                    .filter_map(|pic| pic.get("url").and_then(Value::as_str))
                    .filter(|url| !url.is_empty())
                    .collect::<Vec<_>>()
                    .join("; ")
            })
            .unwrap_or_default();

        Some(Self {
            mid: string_field(obj.get("mid")),
            created_at: string_field(obj.get("created_at")),
            text,
            text_length,
            source: string_field(obj.get("source")),
            favorited: bool_field(obj.get("favorited")),
            reposts_count: count_i64(obj.get("reposts_count")),
            comments_count: count_i64(obj.get("comments_count")),
            attitudes_count: count_i64(obj.get("attitudes_count")),
            pic_num: count_i64(obj.get("pic_num")),
            user_id: string_field(user.and_then(|u| u.get("id"))),
            screen_name: string_field(user.and_then(|u| u.get("screen_name"))),
            follow_count: count_string(user.and_then(|u| u.get("follow_count"))),
            followers_count: count_string(user.and_then(|u| u.get("followers_count"))),
            statuses_count: count_string(user.and_then(|u| u.get("statuses_count"))),
            verified: bool_field(user.and_then(|u| u.get("verified"))),
            verified_type: user
                .and_then(|u| u.get("verified_type"))
                .and_then(Value::as_i64)
                .unwrap_or(-1),
            gender: string_field(user.and_then(|u| u.get("gender"))),
            retweeted_status: is_truthy(obj.get("retweeted_status")),
            is_long_text: bool_field(obj.get("isLongText")),
            pic_urls,
            coordinates: coordinates.to_string(),
            location: String::new(),
        })
    }

    pub fn has_images(&self) -> bool {
        self.pic_num > 0
    }

    /// Follower count as a number where it parses as one. The API hands back
    /// display strings like `86.3万` for large accounts; those rank as
    /// unknown rather than being guessed at.
    pub fn followers_numeric(&self) -> Option<f64> {
        self.followers_count.trim().parse::<f64>().ok()
    }

    /// Helper for testing: a fully-populated post to minimize boilerplate.
    #[cfg(test)]
    pub fn default_test_instance() -> Self {
        Self {
            mid: "4900000000000001".into(),
            created_at: "Mon Jun 02 10:00:00 +0800 2025".into(),
            text: "校园的银杏黄了".into(),
            text_length: 7,
            source: "微博 weibo.com".into(),
            favorited: false,
            reposts_count: 3,
            comments_count: 5,
            attitudes_count: 12,
            pic_num: 1,
            user_id: "1234567890".into(),
            screen_name: "测试用户".into(),
            follow_count: "120".into(),
            followers_count: "4500".into(),
            statuses_count: "890".into(),
            verified: false,
            verified_type: -1,
            gender: "f".into(),
            retweeted_status: false,
            is_long_text: false,
            pic_urls: "https://wx1.sinaimg.cn/large/abc.jpg".into(),
            coordinates: "116.31,39.99".into(),
            location: "北京大学".into(),
        }
    }
}

// ====== Text cleaning ======

/// Clean raw post markup down to plain text.
///
/// Drops the trailing "full text" teaser link and everything after it,
/// strips tags, removes URLs and inline location-pin fragments, and
/// collapses whitespace.
pub fn clean_post_text(raw: &str) -> String {
    let mut text = raw.to_string();

    // The preview duplicates the head of the full post; cut at the teaser.
    if let Some(start) = text.find(r#"<a href="/status/"#) {
        if text[start..].contains(r#"">全文</a>"#) {
            text.truncate(start);
        }
    }

    if text.contains('<') {
        text = Html::parse_fragment(&text).root_element().text().collect();
    }

    let text = re_url().replace_all(&text, "");
    let text = re_pin_with_detail().replace_all(&text, "");
    let text = re_pin().replace_all(&text, "");
    let text = re_whitespace().replace_all(&text, " ");
    text.trim().to_string()
}

fn re_url() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"http[s]?://[^\s]+").unwrap())
}

// "城市·地点(描述)" pins, then the shorter "城市·地点" form
fn re_pin_with_detail() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^\s]*·[^\s]*\([^)]*\)").unwrap())
}

fn re_pin() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^\s]*·[^\s]*").unwrap())
}

fn re_whitespace() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s+").unwrap())
}

// ====== PRIVATE field helpers ======

pub(crate) fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// String content of the value: strings as-is, numbers rendered, anything
/// else empty.
fn string_field(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}

/// Like `string_field` but defaulting to "0": used for counters the API
/// sometimes serves as display strings.
fn count_string(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => "0".to_string(),
    }
}

fn count_i64(value: Option<&Value>) -> i64 {
    match value {
        Some(Value::Number(n)) => n.as_i64().unwrap_or(0),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0),
        _ => 0,
    }
}

fn bool_field(value: Option<&Value>) -> bool {
    value.and_then(Value::as_bool).unwrap_or(false)
}

/// Python-style truthiness for presence markers like `retweeted_status`,
/// which is an embedded object when set.
fn is_truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0) != 0.0,
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Array(a)) => !a.is_empty(),
        Some(Value::Object(m)) => !m.is_empty(),
    }
}

// ====== Collection statistics ======

/// Request/post counters accumulated across one collection run.
#[derive(Debug, Clone)]
pub struct CollectionStats {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub total_posts: u64,
    pub start_time: DateTime<Utc>,
}

impl CollectionStats {
    pub fn new() -> Self {
        Self {
            total_requests: 0,
            successful_requests: 0,
            failed_requests: 0,
            total_posts: 0,
            start_time: Utc::now(),
        }
    }

    pub fn elapsed_secs(&self) -> f64 {
        (Utc::now() - self.start_time).num_milliseconds() as f64 / 1000.0
    }

    /// Render the sidecar statistics report written next to the output CSV.
    pub fn render_report(&self, location_counts: &[(String, usize)]) -> String {
        let mut report = String::new();
        report.push_str("=== Weibo Data Collection Statistics ===\n");
        report.push_str(&format!(
            "Collection Date: {}\n",
            Utc::now().format("%Y-%m-%d %H:%M:%S")
        ));
        report.push_str(&format!("Total Requests: {}\n", self.total_requests));
        report.push_str(&format!(
            "Successful Requests: {}\n",
            self.successful_requests
        ));
        report.push_str(&format!("Failed Requests: {}\n", self.failed_requests));
        report.push_str(&format!("Total Posts Collected: {}\n", self.total_posts));
        report.push_str(&format!(
            "Collection Duration: {:.1}s\n\n",
            self.elapsed_secs()
        ));
        report.push_str("Location Statistics:\n");
        for (location, count) in location_counts {
            report.push_str(&format!("  {}: {} posts\n", location, count));
        }
        report
    }
}

impl Default for CollectionStats {
    fn default() -> Self {
        Self::new()
    }
}
