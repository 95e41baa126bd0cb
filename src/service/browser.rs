use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::page::Page;
use futures::StreamExt;
use tracing::{debug, info, warn};

use crate::error::{AppError, Result};

const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";
const SELECTOR_POLL_INTERVAL_MS: u64 = 100;
const LAUNCH_ATTEMPTS: u64 = 3;

/// Abstraction over the page interactions the pipeline needs from a real
/// browser. Both map pages render their payload with JavaScript, so plain
/// HTTP fetches come back empty and a driven browser is the only way in.
#[async_trait]
pub trait BrowserDriver: Send + Sync {
    /// Navigates the active page and waits for the load to settle.
    async fn navigate(&self, url: &str) -> Result<()>;

    /// Polls until the selector matches an element. Returns false when the
    /// timeout elapses without a match.
    async fn wait_for_selector(&self, selector: &str, timeout_secs: u64) -> Result<bool>;

    /// Reads a property (falling back to the attribute) from the first
    /// element matching the selector. None when the element is missing or
    /// the value is unset.
    async fn attribute(&self, selector: &str, name: &str) -> Result<Option<String>>;

    /// Sets the value of an input element and fires input/change events.
    /// Returns false when no element matches.
    async fn set_value(&self, selector: &str, value: &str) -> Result<bool>;

    /// Dispatches an Enter key press on the matching element.
    async fn press_enter(&self, selector: &str) -> Result<bool>;

    /// Clicks the first matching element. When `preferred_text` is given,
    /// elements whose text contains it are tried first.
    async fn click_matching(&self, selector: &str, preferred_text: Option<&str>) -> Result<bool>;

    /// Clicks the parent of the first text node containing `text`.
    async fn click_element_with_text(&self, text: &str) -> Result<bool>;

    /// Returns the full serialized HTML of the current page.
    async fn page_html(&self) -> Result<String>;
}

/// A headless (or headful) Chrome instance driven over CDP.
pub struct ChromeSession {
    browser: Option<Browser>,
    page: Option<Page>,
}

impl ChromeSession {
    /// Launches Chrome and opens a blank page. Launch is retried because a
    /// lingering instance from a previous run can hold the profile lock for
    /// a moment after it exits.
    pub async fn launch(headless: bool) -> Result<Self> {
        info!("Launching Chrome (headless={})", headless);

        let mut builder = BrowserConfig::builder()
            .window_size(1920, 1080)
            .arg("--no-sandbox")
            .arg("--disable-dev-shm-usage")
            .arg(format!("--user-agent={}", BROWSER_USER_AGENT));

        if headless {
            builder = builder.arg("--headless").arg("--disable-gpu");
        } else {
            builder = builder.with_head();
        }

        let config = builder
            .build()
            .map_err(|e| AppError::browser(format!("Failed to build browser config: {}", e)))?;

        let mut last_error = None;
        for attempt in 1..=LAUNCH_ATTEMPTS {
            match Browser::launch(config.clone()).await {
                Ok((browser, mut handler)) => {
                    tokio::spawn(async move {
                        while let Some(event) = handler.next().await {
                            if let Err(e) = event {
                                let text = e.to_string();
                                // chromiumoxide logs a deserialization error for
                                // every CDP event it has no binding for
                                if !text.contains("data did not match any variant") {
                                    warn!("Browser handler error: {}", text);
                                }
                            }
                        }
                    });

                    let page = browser
                        .new_page("about:blank")
                        .await
                        .map_err(|e| AppError::browser(format!("Failed to open page: {}", e)))?;

                    debug!("Chrome launched on attempt {}", attempt);
                    return Ok(Self {
                        browser: Some(browser),
                        page: Some(page),
                    });
                }
                Err(e) => {
                    warn!("Chrome launch attempt {}/{} failed: {}", attempt, LAUNCH_ATTEMPTS, e);
                    last_error = Some(e);
                    if attempt < LAUNCH_ATTEMPTS {
                        tokio::time::sleep(Duration::from_millis(1000 * attempt)).await;
                    }
                }
            }
        }

        Err(AppError::browser(format!(
            "Failed to launch Chrome after {} attempts: {}",
            LAUNCH_ATTEMPTS,
            last_error.map(|e| e.to_string()).unwrap_or_else(|| "unknown error".to_string())
        )))
    }

    /// Closes the browser. Safe to call more than once.
    pub async fn close(&mut self) -> Result<()> {
        self.page = None;
        if let Some(mut browser) = self.browser.take() {
            browser
                .close()
                .await
                .map_err(|e| AppError::browser(format!("Failed to close browser: {}", e)))?;
        }
        Ok(())
    }

    fn page(&self) -> Result<&Page> {
        self.page
            .as_ref()
            .ok_or_else(|| AppError::browser("No page available"))
    }

    async fn evaluate(&self, script: String) -> Result<serde_json::Value> {
        let result = self
            .page()?
            .evaluate(script)
            .await
            .map_err(|e| AppError::browser(format!("Script evaluation failed: {}", e)))?;

        result
            .into_value()
            .map_err(|e| AppError::browser(format!("Script result was not deserializable: {}", e)))
    }
}

/// Escapes a string for interpolation into a single-quoted JS literal.
fn js_escape(raw: &str) -> String {
    raw.replace('\\', "\\\\").replace('\'', "\\'")
}

#[async_trait]
impl BrowserDriver for ChromeSession {
    async fn navigate(&self, url: &str) -> Result<()> {
        debug!("Navigating to {}", url);
        let page = self.page()?;

        page.goto(url)
            .await
            .map_err(|e| AppError::browser(format!("Failed to navigate to {}: {}", url, e)))?;

        // The load event can take a while on the map pages and sometimes
        // never fires at all; proceed either way and let selector waits
        // handle readiness.
        match tokio::time::timeout(Duration::from_secs(10), page.wait_for_navigation()).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => debug!("Navigation wait error (continuing): {}", e),
            Err(_) => debug!("Navigation wait timed out (continuing)"),
        }

        Ok(())
    }

    async fn wait_for_selector(&self, selector: &str, timeout_secs: u64) -> Result<bool> {
        let script = format!(
            "() => document.querySelector('{}') !== null",
            js_escape(selector)
        );
        let deadline = std::time::Instant::now() + Duration::from_secs(timeout_secs);

        loop {
            let found = self.evaluate(script.clone()).await?;
            if found.as_bool().unwrap_or(false) {
                return Ok(true);
            }
            if std::time::Instant::now() >= deadline {
                return Ok(false);
            }
            tokio::time::sleep(Duration::from_millis(SELECTOR_POLL_INTERVAL_MS)).await;
        }
    }

    async fn attribute(&self, selector: &str, name: &str) -> Result<Option<String>> {
        let script = format!(
            r#"() => {{
                const el = document.querySelector('{sel}');
                if (!el) {{ return null; }}
                const v = el['{name}'] !== undefined ? el['{name}'] : el.getAttribute('{name}');
                return (v === null || v === undefined) ? null : String(v);
            }}"#,
            sel = js_escape(selector),
            name = js_escape(name),
        );

        let value = self.evaluate(script).await?;
        Ok(value.as_str().map(|s| s.to_string()))
    }

    async fn set_value(&self, selector: &str, value: &str) -> Result<bool> {
        let script = format!(
            r#"() => {{
                const el = document.querySelector('{sel}');
                if (!el) {{ return false; }}
                el.focus();
                el.value = '{value}';
                el.dispatchEvent(new Event('input', {{ bubbles: true }}));
                el.dispatchEvent(new Event('change', {{ bubbles: true }}));
                return true;
            }}"#,
            sel = js_escape(selector),
            value = js_escape(value),
        );

        let value = self.evaluate(script).await?;
        Ok(value.as_bool().unwrap_or(false))
    }

    async fn press_enter(&self, selector: &str) -> Result<bool> {
        let script = format!(
            r#"() => {{
                const el = document.querySelector('{sel}');
                if (!el) {{ return false; }}
                const opts = {{ key: 'Enter', code: 'Enter', keyCode: 13, which: 13, bubbles: true }};
                el.dispatchEvent(new KeyboardEvent('keydown', opts));
                el.dispatchEvent(new KeyboardEvent('keypress', opts));
                el.dispatchEvent(new KeyboardEvent('keyup', opts));
                return true;
            }}"#,
            sel = js_escape(selector),
        );

        let value = self.evaluate(script).await?;
        Ok(value.as_bool().unwrap_or(false))
    }

    async fn click_matching(&self, selector: &str, preferred_text: Option<&str>) -> Result<bool> {
        let script = format!(
            r#"() => {{
                const elems = Array.from(document.querySelectorAll('{sel}'));
                if (elems.length === 0) {{ return false; }}
                const preferred = '{preferred}';
                if (preferred) {{
                    for (const el of elems) {{
                        if ((el.textContent || '').includes(preferred)) {{
                            el.click();
                            return true;
                        }}
                    }}
                }}
                elems[0].click();
                return true;
            }}"#,
            sel = js_escape(selector),
            preferred = js_escape(preferred_text.unwrap_or("")),
        );

        let value = self.evaluate(script).await?;
        Ok(value.as_bool().unwrap_or(false))
    }

    async fn click_element_with_text(&self, text: &str) -> Result<bool> {
        let script = format!(
            r#"() => {{
                const needle = '{needle}';
                const walker = document.createTreeWalker(document.body, NodeFilter.SHOW_TEXT);
                while (walker.nextNode()) {{
                    const node = walker.currentNode;
                    if (node.nodeValue && node.nodeValue.includes(needle)) {{
                        const el = node.parentElement;
                        if (el) {{
                            el.click();
                            return true;
                        }}
                    }}
                }}
                return false;
            }}"#,
            needle = js_escape(text),
        );

        let value = self.evaluate(script).await?;
        Ok(value.as_bool().unwrap_or(false))
    }

    async fn page_html(&self) -> Result<String> {
        self.page()?
            .content()
            .await
            .map_err(|e| AppError::browser(format!("Failed to read page content: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_js_escape_quotes_and_backslashes() {
        assert_eq!(js_escape("plain"), "plain");
        assert_eq!(js_escape("it's"), "it\\'s");
        assert_eq!(js_escape(r"a\b"), "a\\\\b");
    }

    #[test]
    fn test_js_escape_preserves_cjk() {
        assert_eq!(js_escape("北京大学"), "北京大学");
    }
}
