use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use rquest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, COOKIE, REFERER, USER_AGENT};
use rquest::Client;
use rquest_util::Emulation;
use tracing::warn;

use crate::error::{AppError, Result};

const API_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";
const API_ACCEPT: &str = "application/json, text/plain, */*";
const API_ACCEPT_LANGUAGE: &str = "zh-CN,zh;q=0.9,en;q=0.8";
const API_REFERER: &str = "https://m.weibo.cn/";

/// Factory for the client used against the mobile container API. The endpoint
/// rejects anonymous traffic, so every request carries the session cookie
/// header plus browser-equivalent identification headers.
pub fn create_api_client(cookie_header: &str, timeout_secs: u64) -> Result<Client> {
    let mut headers = HeaderMap::new();
    headers.insert(USER_AGENT, HeaderValue::from_static(API_USER_AGENT));
    headers.insert(ACCEPT, HeaderValue::from_static(API_ACCEPT));
    headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static(API_ACCEPT_LANGUAGE));
    headers.insert(REFERER, HeaderValue::from_static(API_REFERER));
    headers.insert(
        COOKIE,
        HeaderValue::from_str(cookie_header)
            .context("Cookie header contains invalid characters")?,
    );

    Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .default_headers(headers)
        .cookie_store(true)
        .emulation(Emulation::Firefox136)
        .build()
        .context("Failed to build impersonated rquest client")
        .map_err(AppError::from)
}

/// Splits a raw browser cookie string ("k1=v1; k2=v2; ...") into pairs.
/// Fragments without an `=` are skipped, mirroring how browsers serialize
/// the header in devtools.
pub fn parse_cookie_string(raw: &str) -> Vec<(String, String)> {
    raw.split(';')
        .filter_map(|fragment| {
            let fragment = fragment.trim();
            let (name, value) = fragment.split_once('=')?;
            let name = name.trim();
            if name.is_empty() {
                return None;
            }
            Some((name.to_string(), value.trim().to_string()))
        })
        .collect()
}

/// Reads the session cookie header from disk. The file holds the single
/// `Cookie:` value copied out of a logged-in browser session.
pub fn load_cookie_header(path: &Path) -> Result<String> {
    if !path.exists() {
        return Err(AppError::MissingCookies(format!(
            "Cookie file not found: {}. Log in to https://m.weibo.cn in a browser, copy the Cookie request header, and save it there.",
            path.display()
        )));
    }

    let raw = std::fs::read_to_string(path)?;
    let header = raw.trim().to_string();
    if header.is_empty() {
        return Err(AppError::MissingCookies(format!(
            "Cookie file is empty: {}",
            path.display()
        )));
    }

    let pairs = parse_cookie_string(&header);
    if pairs.is_empty() {
        warn!("Cookie file has no name=value pairs; requests will likely be rejected");
    }

    Ok(header)
}
