use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rquest::Client;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::config::{CollectorSettings, PipelinePaths};
use crate::domain::models::{type_name, CollectionStats, EndpointRecord, Post};
use crate::error::{AppError, Result};
use crate::service::http;
use crate::storage;

/// Body the container API returns past the last page. Pagination has no
/// explicit total, so this response is the only reliable end marker.
pub const END_OF_DATA_MSG: &str = "这里还没有内容";

#[derive(Debug, Clone)]
pub struct CollectionOutcome {
    pub output_path: PathBuf,
    pub stats_path: PathBuf,
    pub total_posts: usize,
    pub location_stats: Vec<(String, usize)>,
}

/// Walks every location's feed through the container API, page by page,
/// and accumulates run statistics along the way.
pub struct PostCollector {
    settings: CollectorSettings,
    stats: CollectionStats,
}

impl PostCollector {
    pub fn new(settings: CollectorSettings) -> Self {
        Self {
            settings,
            stats: CollectionStats::new(),
        }
    }

    /// Collects posts for every location in the endpoints CSV and writes
    /// them to `output_csv`, with a statistics sidecar next to it. A run
    /// that yields zero posts is a failure; nothing is written in that
    /// case.
    pub async fn collect_from_csv(
        &mut self,
        input_csv: &Path,
        cookie_path: &Path,
        output_csv: &Path,
    ) -> Result<CollectionOutcome> {
        let cookie_header = http::load_cookie_header(cookie_path)?;
        let client = http::create_api_client(&cookie_header, self.settings.request_timeout_secs)?;

        let rows = storage::read_endpoints(input_csv)?;

        // One group per location, in first-seen order
        let mut order: Vec<String> = Vec::new();
        for row in &rows {
            if !order.contains(&row.location) {
                order.push(row.location.clone());
            }
        }

        let mut all_posts: Vec<Post> = Vec::new();
        let mut location_stats: Vec<(String, usize)> = Vec::new();

        for location in &order {
            let mut location_rows: Vec<&EndpointRecord> =
                rows.iter().filter(|r| &r.location == location).collect();
            location_rows.sort_by_key(|r| r.page);

            let posts = self
                .collect_location(&client, location, &location_rows)
                .await;
            info!("{}: {} posts collected", location, posts.len());

            location_stats.push((location.clone(), posts.len()));
            all_posts.extend(posts);
        }

        if all_posts.is_empty() {
            warn!("No posts collected");
            return Err(AppError::service("collector", "no posts were collected"));
        }

        storage::write_posts(output_csv, &all_posts)?;
        info!("Results saved to {}", output_csv.display());

        let stats_path = PipelinePaths::stats_sidecar(output_csv);
        std::fs::write(&stats_path, self.stats.render_report(&location_stats))?;
        info!("Statistics saved to {}", stats_path.display());

        self.log_summary(&location_stats, &all_posts);

        Ok(CollectionOutcome {
            output_path: output_csv.to_path_buf(),
            stats_path,
            total_posts: all_posts.len(),
            location_stats,
        })
    }

    /// Pages through one location's feed starting from page 1. URLs present
    /// in the CSV are reused as-is; pages beyond the CSV are generated from
    /// the first row's base URL until the end marker or the page cap.
    async fn collect_location(
        &mut self,
        client: &Client,
        location: &str,
        rows: &[&EndpointRecord],
    ) -> Vec<Post> {
        let Some(first) = rows.first() else {
            return Vec::new();
        };

        info!("Processing {} (collecting all available pages)...", location);

        let base_url = first.base_api_url().to_string();
        let coordinates = first.coordinates.clone();

        info!(
            "Starting from page 1, will test up to page {}",
            self.settings.max_pages
        );

        let mut posts = Vec::new();
        for page in 1..=self.settings.max_pages {
            let api_url = rows
                .iter()
                .find(|r| r.page == page)
                .map(|r| r.api_url.clone())
                .unwrap_or_else(|| format!("{}&page={}", base_url, page));

            let (page_posts, is_end) = self
                .fetch_page(client, &api_url, location, page, &coordinates)
                .await;

            if !page_posts.is_empty() {
                info!("{} Page {}: {} posts collected", location, page, page_posts.len());
                posts.extend(page_posts);
            } else {
                info!("{} Page {}: No posts found", location, page);
            }

            if is_end {
                info!("{}: Reached end of data at page {}", location, page);
                break;
            }

            if self.settings.delay_between_requests > 0.0 {
                tokio::time::sleep(Duration::from_secs_f64(
                    self.settings.delay_between_requests,
                ))
                .await;
            }
        }

        posts
    }

    /// Fetches a single page with retries. Counts one request toward the
    /// run statistics regardless of how many attempts it takes; the bool in
    /// the return value marks the end-of-data response.
    async fn fetch_page(
        &mut self,
        client: &Client,
        api_url: &str,
        location: &str,
        page: u32,
        coordinates: &str,
    ) -> (Vec<Post>, bool) {
        self.stats.total_requests += 1;

        let retry_count = self.settings.retry_count;
        for attempt in 0..retry_count {
            info!(
                "Fetching {} Page {} (attempt {}/{})",
                location,
                page,
                attempt + 1,
                retry_count
            );

            match client.get(api_url).send().await {
                Ok(response) => {
                    let status = response.status().as_u16();
                    if status == 200 {
                        match response.json::<Value>().await {
                            Ok(json_data) => {
                                log_response_shape(&json_data, location, page);

                                let mut page_posts =
                                    extract_posts(&json_data, coordinates, location, page);
                                let is_end = is_end_of_data(&json_data);

                                for post in &mut page_posts {
                                    post.location = location.to_string();
                                }

                                self.stats.successful_requests += 1;
                                self.stats.total_posts += page_posts.len() as u64;

                                info!(
                                    "{} Page {}: Successfully collected {} posts",
                                    location,
                                    page,
                                    page_posts.len()
                                );
                                return (page_posts, is_end);
                            }
                            Err(e) => {
                                error!("{} Page {}: Invalid JSON response - {}", location, page, e);
                                if !self.backoff_or_fail(attempt).await {
                                    return (Vec::new(), false);
                                }
                            }
                        }
                    } else {
                        warn!("{} Page {}: HTTP {}", location, page, status);
                        if !self.backoff_or_fail(attempt).await {
                            return (Vec::new(), false);
                        }
                    }
                }
                Err(e) => {
                    error!(
                        "{} Page {}: Error on attempt {} - {}",
                        location,
                        page,
                        attempt + 1,
                        e
                    );
                    if !self.backoff_or_fail(attempt).await {
                        return (Vec::new(), false);
                    }
                }
            }
        }

        (Vec::new(), false)
    }

    /// Sleeps with linearly increasing backoff when attempts remain.
    /// Returns false once retries are exhausted, counting the failure.
    async fn backoff_or_fail(&mut self, attempt: u32) -> bool {
        if attempt + 1 < self.settings.retry_count {
            let backoff = self.settings.delay_between_requests * (attempt + 1) as f64;
            tokio::time::sleep(Duration::from_secs_f64(backoff)).await;
            true
        } else {
            self.stats.failed_requests += 1;
            false
        }
    }

    fn log_summary(&self, location_stats: &[(String, usize)], posts: &[Post]) {
        info!("==================================================");
        info!("COLLECTION SUMMARY");
        info!("==================================================");

        for (location, count) in location_stats {
            info!("  {}: {} posts", location, count);
        }

        info!("Total posts collected: {}", posts.len());
        info!("Collection time: {:.1}s", self.stats.elapsed_secs());
        info!(
            "Success rate: {}/{} requests",
            self.stats.successful_requests, self.stats.total_requests
        );

        if let Some(sample) = posts.first() {
            info!("Sample post from {}:", sample.location);
            info!("  User: {} (ID: {})", sample.screen_name, sample.user_id);
            info!("  Text: {}...", truncate_chars(&sample.text, 100));
            info!("  Created: {}", sample.created_at);
            info!(
                "  Likes: {}, Comments: {}, Reposts: {}",
                sample.attitudes_count, sample.comments_count, sample.reposts_count
            );
            info!(
                "  Images: {} ({} URLs)",
                sample.pic_num,
                if sample.has_images() { "Yes" } else { "No" }
            );
            info!(
                "  Verified: {}, Followers: {}",
                sample.verified, sample.followers_count
            );
        }
    }
}

/// True when the response is the canonical "nothing here" body marking the
/// end of a location's feed.
pub fn is_end_of_data(json_data: &Value) -> bool {
    json_data.get("ok").and_then(Value::as_i64) == Some(0)
        && json_data.get("msg").and_then(Value::as_str) == Some(END_OF_DATA_MSG)
}

/// Pulls every post out of a container API response. Cards of type 9 hold
/// a post directly; cards of type 11 hold a group of inner cards that may.
/// Anything malformed is logged and stepped over, never fatal.
pub fn extract_posts(json_data: &Value, coordinates: &str, location: &str, page: u32) -> Vec<Post> {
    let mut posts = Vec::new();

    let Some(body) = json_data.as_object() else {
        warn!("API response is not an object: {}", type_name(json_data));
        return posts;
    };

    if is_end_of_data(json_data) {
        info!("{} Page {}: No content available (end of data)", location, page);
        return posts;
    }

    if body.get("ok").and_then(Value::as_i64) != Some(1) {
        let msg = body
            .get("msg")
            .and_then(Value::as_str)
            .unwrap_or("Unknown error");
        warn!(
            "{} Page {}: API response indicates error: {}",
            location, page, msg
        );
        return posts;
    }

    let Some(data) = body.get("data").and_then(Value::as_object) else {
        warn!("Data field is not an object");
        return posts;
    };
    let Some(cards) = data.get("cards").and_then(Value::as_array) else {
        warn!("Cards field is not an array");
        return posts;
    };

    for card in cards {
        let Some(card_obj) = card.as_object() else {
            warn!("Card is not an object: {}", type_name(card));
            continue;
        };

        match card_obj.get("card_type").and_then(Value::as_i64) {
            Some(9) => {
                if let Some(post) = card_obj
                    .get("mblog")
                    .and_then(|mblog| Post::from_mblog(mblog, coordinates))
                {
                    posts.push(post);
                }
            }
            Some(11) => {
                let Some(group) = card_obj.get("card_group").and_then(Value::as_array) else {
                    warn!("Card group is not an array");
                    continue;
                };
                for item in group {
                    let Some(item_obj) = item.as_object() else {
                        warn!("Group item is not an object: {}", type_name(item));
                        continue;
                    };
                    if item_obj.get("card_type").and_then(Value::as_i64) == Some(9) {
                        if let Some(post) = item_obj
                            .get("mblog")
                            .and_then(|mblog| Post::from_mblog(mblog, coordinates))
                        {
                            posts.push(post);
                        }
                    }
                }
            }
            _ => {}
        }
    }

    posts
}

fn log_response_shape(json_data: &Value, location: &str, page: u32) {
    let Some(body) = json_data.as_object() else {
        return;
    };

    debug!(
        "{} Page {}: Response keys: {:?}",
        location,
        page,
        body.keys().collect::<Vec<_>>()
    );
    if let Some(ok) = body.get("ok") {
        debug!("{} Page {}: ok = {}", location, page, ok);
    }

    if let Some(cards) = body
        .get("data")
        .and_then(|d| d.get("cards"))
        .and_then(Value::as_array)
    {
        info!("{} Page {}: Found {} cards", location, page, cards.len());

        let mut card_types: HashMap<i64, usize> = HashMap::new();
        for card in cards {
            if let Some(card_type) = card.get("card_type").and_then(Value::as_i64) {
                *card_types.entry(card_type).or_insert(0) += 1;
            }
        }
        debug!("{} Page {}: Card types: {:?}", location, page, card_types);
    }
}

fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn test_settings() -> CollectorSettings {
        CollectorSettings {
            delay_between_requests: 0.0,
            retry_count: 3,
            max_pages: 100,
            request_timeout_secs: 15,
        }
    }

    fn post_card(mid: &str, text: &str) -> Value {
        json!({
            "card_type": 9,
            "mblog": {
                "mid": mid,
                "text": text,
                "user": {"id": 42, "screen_name": "某用户", "gender": "f"}
            }
        })
    }

    fn page_payload(cards: Vec<Value>) -> Value {
        json!({"ok": 1, "data": {"cards": cards}})
    }

    fn sentinel_payload() -> Value {
        json!({"ok": 0, "msg": END_OF_DATA_MSG})
    }

    // ===== extract_posts =====

    #[test]
    fn test_extract_posts_walks_direct_and_grouped_cards() {
        let payload = page_payload(vec![
            post_card("m1", "第一条"),
            json!({
                "card_type": 11,
                "card_group": [
                    post_card("m2", "第二条"),
                    {"card_type": 7, "title": "筛选"},
                    post_card("m3", "第三条"),
                ]
            }),
            json!({"card_type": 42, "mblog": {"mid": "ignored"}}),
        ]);

        let posts = extract_posts(&payload, "116.31,39.99", "北京大学", 1);

        assert_eq!(posts.len(), 3, "Direct and grouped type-9 cards both count");
        assert_eq!(posts[0].mid, "m1");
        assert_eq!(posts[1].mid, "m2");
        assert_eq!(posts[2].mid, "m3");
        assert_eq!(posts[0].coordinates, "116.31,39.99");
    }

    #[test]
    fn test_extract_posts_sentinel_yields_nothing() {
        let payload = sentinel_payload();
        assert!(extract_posts(&payload, "", "北京大学", 5).is_empty());
        assert!(is_end_of_data(&payload));
    }

    #[test]
    fn test_extract_posts_error_response_is_not_the_end() {
        let payload = json!({"ok": 0, "msg": "请先登录"});
        assert!(extract_posts(&payload, "", "北京大学", 1).is_empty());
        assert!(
            !is_end_of_data(&payload),
            "Only the exact no-content message marks the end"
        );
    }

    #[test]
    fn test_extract_posts_tolerates_malformed_shapes() {
        assert!(extract_posts(&json!([1, 2, 3]), "", "loc", 1).is_empty());
        assert!(extract_posts(&json!({"ok": 1, "data": "nope"}), "", "loc", 1).is_empty());
        assert!(
            extract_posts(&json!({"ok": 1, "data": {"cards": "nope"}}), "", "loc", 1).is_empty()
        );

        let mixed = page_payload(vec![
            json!("not a card"),
            post_card("m1", "存活"),
            json!({"card_type": 11, "card_group": "nope"}),
            json!({"card_type": 11, "card_group": ["not an object"]}),
        ]);
        let posts = extract_posts(&mixed, "", "loc", 1);
        assert_eq!(posts.len(), 1, "Malformed cards are skipped, not fatal");
    }

    // ===== fetch_page / collect_from_csv =====

    fn write_cookie_file(dir: &tempfile::TempDir) -> std::path::PathBuf {
        let path = dir.path().join("cookies.txt");
        std::fs::write(&path, "SUB=testvalue; _T_WM=123\n").unwrap();
        path
    }

    fn endpoint_row(location: &str, server_url: &str, container: &str) -> EndpointRecord {
        EndpointRecord {
            location: location.to_string(),
            url_type: EndpointRecord::URL_TYPE_CONTAINER_API.to_string(),
            api_url: format!(
                "{}/api/container/getIndex?containerid={}&page=1",
                server_url, container
            ),
            page: 1,
            coordinates: "116.31,39.99".to_string(),
            cardlist_url: format!("{}/p/cardlist?containerid={}", server_url, container),
            place_url: "https://place.weibo.com/wandermap/?maploc=116.31,39.99,12z".to_string(),
        }
    }

    #[tokio::test]
    async fn test_collect_paginates_until_sentinel() {
        let mut server = mockito::Server::new_async().await;
        let dir = tempfile::tempdir().unwrap();

        let page1 = server
            .mock("GET", "/api/container/getIndex")
            .match_query(mockito::Matcher::UrlEncoded("page".into(), "1".into()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                page_payload(vec![post_card("m1", "早八的图书馆"), post_card("m2", "食堂新菜")])
                    .to_string(),
            )
            .create_async()
            .await;
        let page2 = server
            .mock("GET", "/api/container/getIndex")
            .match_query(mockito::Matcher::UrlEncoded("page".into(), "2".into()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(sentinel_payload().to_string())
            .create_async()
            .await;

        let input = dir.path().join("weibo_api_urls.csv");
        storage::write_endpoints(&input, &[endpoint_row("北京大学", &server.url(), "pku")])
            .unwrap();
        let cookie_path = write_cookie_file(&dir);
        let output = dir.path().join("weibo_posts.csv");

        let mut collector = PostCollector::new(test_settings());
        let outcome = collector
            .collect_from_csv(&input, &cookie_path, &output)
            .await
            .unwrap();

        page1.assert_async().await;
        page2.assert_async().await;

        assert_eq!(outcome.total_posts, 2);
        assert_eq!(outcome.location_stats, vec![("北京大学".to_string(), 2)]);

        let posts = storage::read_posts(&output).unwrap();
        assert_eq!(posts.len(), 2);
        assert_eq!(posts[0].location, "北京大学", "Location is stamped onto posts");
        assert_eq!(posts[0].coordinates, "116.31,39.99");

        let sidecar = std::fs::read_to_string(&outcome.stats_path).unwrap();
        assert!(sidecar.starts_with("=== Weibo Data Collection Statistics ==="));
        assert!(sidecar.contains("Total Requests: 2"));
        assert!(sidecar.contains("Successful Requests: 2"));
        assert!(sidecar.contains("Failed Requests: 0"));
        assert!(sidecar.contains("Total Posts Collected: 2"));
        assert!(sidecar.contains("  北京大学: 2 posts"));
    }

    #[tokio::test]
    async fn test_failed_page_does_not_stop_pagination() {
        let mut server = mockito::Server::new_async().await;

        let page1 = server
            .mock("GET", "/api/container/getIndex")
            .match_query(mockito::Matcher::UrlEncoded("page".into(), "1".into()))
            .with_status(500)
            .expect(3)
            .create_async()
            .await;
        let page2 = server
            .mock("GET", "/api/container/getIndex")
            .match_query(mockito::Matcher::UrlEncoded("page".into(), "2".into()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(page_payload(vec![post_card("m9", "第二页依然有数据")]).to_string())
            .create_async()
            .await;
        let page3 = server
            .mock("GET", "/api/container/getIndex")
            .match_query(mockito::Matcher::UrlEncoded("page".into(), "3".into()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(sentinel_payload().to_string())
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("urls.csv");
        storage::write_endpoints(&input, &[endpoint_row("清华大学", &server.url(), "thu")])
            .unwrap();
        let cookie_path = write_cookie_file(&dir);
        let output = dir.path().join("posts.csv");

        let mut collector = PostCollector::new(test_settings());
        let outcome = collector
            .collect_from_csv(&input, &cookie_path, &output)
            .await
            .unwrap();

        page1.assert_async().await;
        page2.assert_async().await;
        page3.assert_async().await;

        assert_eq!(outcome.total_posts, 1, "Page 2 still collected after page 1 failed");
        assert_eq!(collector.stats.total_requests, 3);
        assert_eq!(collector.stats.successful_requests, 2);
        assert_eq!(collector.stats.failed_requests, 1);
    }

    #[tokio::test]
    async fn test_fetch_exhausted_retries_count_one_failure() {
        let mut server = mockito::Server::new_async().await;
        let always_500 = server
            .mock("GET", "/api/container/getIndex")
            .match_query(mockito::Matcher::Any)
            .with_status(500)
            .expect(3)
            .create_async()
            .await;

        let url = format!("{}/api/container/getIndex?containerid=x&page=1", server.url());
        let client = http::create_api_client("SUB=test", 15).unwrap();

        let mut collector = PostCollector::new(test_settings());
        let (posts, is_end) = collector
            .fetch_page(&client, &url, "复旦大学", 1, "")
            .await;

        always_500.assert_async().await;
        assert!(posts.is_empty());
        assert!(!is_end);
        assert_eq!(collector.stats.total_requests, 1);
        assert_eq!(collector.stats.failed_requests, 1);
        assert_eq!(collector.stats.successful_requests, 0);
    }

    #[tokio::test]
    async fn test_collect_with_zero_posts_is_a_failure() {
        let mut server = mockito::Server::new_async().await;
        let _empty = server
            .mock("GET", "/api/container/getIndex")
            .match_query(mockito::Matcher::Any)
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(sentinel_payload().to_string())
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("urls.csv");
        storage::write_endpoints(&input, &[endpoint_row("中山大学", &server.url(), "sysu")])
            .unwrap();
        let cookie_path = write_cookie_file(&dir);
        let output = dir.path().join("posts.csv");

        let mut collector = PostCollector::new(test_settings());
        let result = collector
            .collect_from_csv(&input, &cookie_path, &output)
            .await;

        assert!(matches!(result, Err(AppError::ServiceError { .. })));
        assert!(!output.exists(), "Nothing must be written on an empty run");
    }

    #[tokio::test]
    async fn test_collect_requires_cookies() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("urls.csv");
        storage::write_endpoints(&input, &[]).unwrap();
        let output = dir.path().join("posts.csv");

        let mut collector = PostCollector::new(test_settings());
        let result = collector
            .collect_from_csv(&input, &dir.path().join("cookies.txt"), &output)
            .await;

        assert!(matches!(result, Err(AppError::MissingCookies(_))));
    }

    #[tokio::test]
    async fn test_collect_requires_api_url_column() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("urls.csv");
        std::fs::write(&input, "Location,Page\n北京大学,1\n").unwrap();
        let cookie_path = write_cookie_file(&dir);
        let output = dir.path().join("posts.csv");

        let mut collector = PostCollector::new(test_settings());
        let result = collector
            .collect_from_csv(&input, &cookie_path, &output)
            .await;

        assert!(matches!(
            result,
            Err(AppError::MissingColumn {
                column: "API_URL",
                ..
            })
        ));
    }
}
