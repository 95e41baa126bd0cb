//! End-to-end tests over real files on disk.
//!
//! The collection test runs the collector against a mock feed API and then
//! feeds its output through the analyzer, the way workflow step 3 does.
//! The conversion test walks an external coordinate file through
//! conversion, validation, and locations extraction.

use std::fs;
use std::path::Path;

use mockito::Matcher;
use serde_json::json;

use placefeed::config::CollectorSettings;
use placefeed::service::{AnalysisReport, PostCollector};
use placefeed::storage::convert;

fn test_settings() -> CollectorSettings {
    CollectorSettings {
        delay_between_requests: 0.0,
        max_pages: 10,
        ..CollectorSettings::default()
    }
}

fn write_endpoints_csv(path: &Path, api_url: &str) {
    let body = format!(
        "Location,URL_Type,API_URL,Page,Coordinates,Cardlist_URL,Place_URL\n\
         北京大学,container_api,{api_url},1,\"116.31,39.99\",,\n"
    );
    fs::write(path, body).expect("Failed to write endpoints CSV");
}

fn post_card(mid: &str, screen_name: &str, followers: &str, likes: i64) -> serde_json::Value {
    json!({
        "card_type": 9,
        "mblog": {
            "mid": mid,
            "created_at": "Sat Aug 23 10:00:00 +0800 2025",
            "text": format!("在{screen_name}的一天"),
            "source": "weibo",
            "reposts_count": 1,
            "comments_count": 2,
            "attitudes_count": likes,
            "user": {
                "id": 100,
                "screen_name": screen_name,
                "followers_count": followers,
                "gender": "f",
                "verified": false
            }
        }
    })
}

#[tokio::test]
async fn test_collect_then_analyze_over_files() {
    let mut server = mockito::Server::new_async().await;
    let dir = tempfile::tempdir().expect("Failed to create temp dir");

    let endpoints_csv = dir.path().join("endpoints.csv");
    let cookies_txt = dir.path().join("cookies.txt");
    let posts_csv = dir.path().join("output/posts.csv");

    let api_url = format!(
        "{}/api/container/getIndex?containerid=123&page=1",
        server.url()
    );
    write_endpoints_csv(&endpoints_csv, &api_url);
    fs::write(&cookies_txt, "SUB=abc; SSOLoginState=123").expect("Failed to write cookies");

    let page1 = server
        .mock("GET", "/api/container/getIndex")
        .match_query(Matcher::UrlEncoded("page".into(), "1".into()))
        .with_status(200)
        .with_body(
            json!({
                "ok": 1,
                "data": {
                    "cards": [
                        post_card("4001", "甲", "1200", 10),
                        post_card("4002", "乙", "800", 20)
                    ]
                }
            })
            .to_string(),
        )
        .create_async()
        .await;
    let page2 = server
        .mock("GET", "/api/container/getIndex")
        .match_query(Matcher::UrlEncoded("page".into(), "2".into()))
        .with_status(200)
        .with_body(json!({"ok": 0, "msg": "这里还没有内容"}).to_string())
        .create_async()
        .await;

    let mut collector = PostCollector::new(test_settings());
    let outcome = collector
        .collect_from_csv(&endpoints_csv, &cookies_txt, &posts_csv)
        .await
        .expect("Collection failed");

    page1.assert_async().await;
    page2.assert_async().await;

    assert_eq!(outcome.total_posts, 2);
    assert_eq!(outcome.location_stats, vec![("北京大学".to_string(), 2)]);
    assert!(outcome.output_path.exists(), "Posts CSV should be written");

    let stats = fs::read_to_string(&outcome.stats_path).expect("Stats sidecar missing");
    assert!(stats.contains("Total Posts Collected: 2"));
    assert!(stats.contains("  北京大学: 2 posts"));

    // Step 3 runs the analyzer over whatever the collector wrote
    let report = AnalysisReport::from_file(&outcome.output_path).expect("Analysis failed");
    assert_eq!(report.total_posts, 2);
    assert_eq!(report.location_count, 1);
    assert_eq!(report.unique_users, 2);
    assert_eq!(report.avg_likes, 15.0);

    let rendered = report.render();
    assert!(rendered.contains("DATA ANALYSIS"));
    assert!(rendered.contains("  北京大学: 2 posts"));
    assert!(rendered.contains("  Female: 2 posts"));
}

#[test]
fn test_convert_validate_locations_roundtrip() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let raw = dir.path().join("external.csv");
    let coordinates = dir.path().join("coordinates.csv");
    let locations = dir.path().join("locations.csv");

    fs::write(
        &raw,
        "Location,Latitude,Longitude\n北京大学,39.993,116.313\n清华大学,40.003,116.333\n",
    )
    .expect("Failed to write input");

    convert::convert_coordinates_to_standard_format(&raw, &coordinates)
        .expect("Conversion failed");
    convert::validate_coordinates_file(&coordinates).expect("Converted file should validate");
    convert::create_locations_from_coordinates(&coordinates, &locations)
        .expect("Locations extraction failed");

    let body = fs::read_to_string(&locations).expect("Locations file missing");
    assert_eq!(body.trim_end(), "Location\n北京大学\n清华大学");
}
