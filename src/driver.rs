//! A1 — Driver abstraction. The sole seam between the pure "hard core"
//! detection/extraction logic and an actual browser. `ChromeDriver` (behind
//! the `chrome` feature) drives a real page over the Chrome DevTools
//! Protocol; `FixtureDriver` plays the same role against an in-memory HTML
//! string so every other module can be tested deterministically without a
//! browser.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{RainbowError, Result};
use crate::network::InterceptedResponse;

/// Capability surface every orchestrator (detector, pagination, lazy-load,
/// popup, extraction) is written against (spec §9 design note: the Driver
/// trait is the only seam to the outside world).
#[async_trait]
pub trait Driver: Send + Sync {
    /// Current page markup, used to build a `scraper::Html` snapshot that
    /// every pure analysis function operates on.
    async fn document_html(&self) -> Result<String>;

    async fn evaluate(&self, script: &str) -> Result<Value>;

    async fn goto(&self, url: &str) -> Result<()>;

    async fn click(&self, selector: &str) -> Result<()>;

    async fn type_text(&self, selector: &str, text: &str) -> Result<()>;

    async fn select_option(&self, selector: &str, value: &str) -> Result<()>;

    async fn mouse_wheel(&self, delta_x: f64, delta_y: f64) -> Result<()>;

    async fn scroll_into_view(&self, selector: Option<&str>) -> Result<()>;

    async fn wait_for_timeout(&self, milliseconds: u64);

    async fn wait_for_selector(&self, selector: &str, timeout_ms: u64) -> bool;

    async fn is_visible(&self, selector: &str) -> bool;

    async fn current_url(&self) -> Result<String>;

    async fn screenshot(&self) -> Result<Vec<u8>>;

    /// Drain any network responses intercepted since the last call.
    async fn drain_responses(&self) -> Vec<InterceptedResponse>;

    /// Install (or remove, with `block = false`) a navigation-blocking
    /// route guard. `url_pattern` blocks any navigation whose target
    /// contains it as a substring; prefixed with `!`, it instead locks
    /// navigation to that exact URL (hash changes permitted), blocking
    /// everything else — this is what the popup handler installs for the
    /// duration of a dismiss sequence so a pre-action click can't trigger a
    /// full navigation away from the page.
    async fn set_route_guard(&self, url_pattern: &str, block: bool) -> Result<()>;

    fn viewport(&self) -> (f64, f64);

    async fn scroll_y(&self) -> f64;
}

/// Offline, `scraper`-backed driver. Holds the current page HTML plus a
/// scripted queue of DOM mutations (simulating lazy-load/virtual-scroll/
/// pagination advances) and network responses, so every orchestrator above
/// this module can be exercised without chromiumoxide or a system
/// Chromium install.
pub struct FixtureDriver {
    state: Mutex<FixtureState>,
}

struct FixtureState {
    html: String,
    url: String,
    viewport: (f64, f64),
    scroll_y: f64,
    pending_mutations: VecDeque<String>,
    pending_responses: VecDeque<InterceptedResponse>,
    clicked: Vec<String>,
    blocked_patterns: Vec<String>,
}

/// `!`-prefixed patterns lock navigation to that exact URL (ignoring a
/// hash fragment); plain patterns block any URL containing them.
fn route_guard_blocks(url: &str, patterns: &[String]) -> bool {
    patterns.iter().any(|p| match p.strip_prefix('!') {
        Some(locked_to) => !same_page_ignoring_hash(url, locked_to),
        None => url.contains(p.as_str()),
    })
}

fn same_page_ignoring_hash(a: &str, b: &str) -> bool {
    fn without_hash(s: &str) -> &str {
        s.split('#').next().unwrap_or(s)
    }
    without_hash(a) == without_hash(b)
}

impl FixtureDriver {
    pub fn new(html: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            state: Mutex::new(FixtureState {
                html: html.into(),
                url: url.into(),
                viewport: crate::dom::DEFAULT_VIEWPORT,
                scroll_y: 0.0,
                pending_mutations: VecDeque::new(),
                pending_responses: VecDeque::new(),
                clicked: Vec::new(),
                blocked_patterns: Vec::new(),
            }),
        }
    }

    /// Queue an HTML replacement to take effect on the next scroll/click,
    /// simulating a lazy-load or pagination DOM mutation.
    pub fn queue_mutation(&self, html: impl Into<String>) {
        self.state.lock().unwrap().pending_mutations.push_back(html.into());
    }

    pub fn queue_response(&self, response: InterceptedResponse) {
        self.state.lock().unwrap().pending_responses.push_back(response);
    }

    pub fn clicked_selectors(&self) -> Vec<String> {
        self.state.lock().unwrap().clicked.clone()
    }

    fn apply_next_mutation(&self) {
        let mut state = self.state.lock().unwrap();
        if let Some(next) = state.pending_mutations.pop_front() {
            state.html = next;
        }
    }
}

#[async_trait]
impl Driver for FixtureDriver {
    async fn document_html(&self) -> Result<String> {
        Ok(self.state.lock().unwrap().html.clone())
    }

    async fn evaluate(&self, _script: &str) -> Result<Value> {
        Ok(Value::Null)
    }

    async fn goto(&self, url: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if route_guard_blocks(url, &state.blocked_patterns) {
            return Err(RainbowError::Driver(format!("navigation to {url} blocked by route guard")));
        }
        state.url = url.to_string();
        drop(state);
        self.apply_next_mutation();
        Ok(())
    }

    async fn click(&self, selector: &str) -> Result<()> {
        {
            let mut state = self.state.lock().unwrap();
            state.clicked.push(selector.to_string());
        }
        self.apply_next_mutation();
        Ok(())
    }

    async fn type_text(&self, _selector: &str, _text: &str) -> Result<()> {
        Ok(())
    }

    async fn select_option(&self, _selector: &str, _value: &str) -> Result<()> {
        Ok(())
    }

    async fn mouse_wheel(&self, _delta_x: f64, delta_y: f64) -> Result<()> {
        {
            let mut state = self.state.lock().unwrap();
            state.scroll_y += delta_y;
        }
        self.apply_next_mutation();
        Ok(())
    }

    async fn scroll_into_view(&self, _selector: Option<&str>) -> Result<()> {
        Ok(())
    }

    async fn wait_for_timeout(&self, _milliseconds: u64) {}

    async fn wait_for_selector(&self, selector: &str, _timeout_ms: u64) -> bool {
        let html = self.state.lock().unwrap().html.clone();
        let doc = crate::dom::parse_document(&html);
        crate::dom::select_all(&doc, selector).map(|v| !v.is_empty()).unwrap_or(false)
    }

    async fn is_visible(&self, selector: &str) -> bool {
        self.wait_for_selector(selector, 0).await
    }

    async fn current_url(&self) -> Result<String> {
        Ok(self.state.lock().unwrap().url.clone())
    }

    async fn screenshot(&self) -> Result<Vec<u8>> {
        Ok(Vec::new())
    }

    async fn drain_responses(&self) -> Vec<InterceptedResponse> {
        let mut state = self.state.lock().unwrap();
        state.pending_responses.drain(..).collect()
    }

    async fn set_route_guard(&self, url_pattern: &str, block: bool) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if block {
            state.blocked_patterns.push(url_pattern.to_string());
        } else {
            state.blocked_patterns.retain(|p| p != url_pattern);
        }
        Ok(())
    }

    fn viewport(&self) -> (f64, f64) {
        self.state.lock().unwrap().viewport
    }

    async fn scroll_y(&self) -> f64 {
        self.state.lock().unwrap().scroll_y
    }
}

#[cfg(feature = "chrome")]
pub mod chrome {
    //! Live Chrome DevTools Protocol driver. Gated behind the `chrome`
    //! feature so the crate and its test suite build without a system
    //! Chromium install; every orchestrator above this module is written
    //! against the `Driver` trait, not this implementation, so enabling
    //! the feature is a drop-in swap.

    use std::sync::Arc;

    use async_trait::async_trait;
    use chromiumoxide::page::ScreenshotParams;
    use chromiumoxide::{Browser, BrowserConfig, Page};
    use futures::StreamExt;
    use serde_json::Value;

    use crate::error::{RainbowError, Result};
    use crate::network::InterceptedResponse;

    use super::Driver;

    pub struct ChromeDriver {
        page: Arc<Page>,
        _browser: Arc<tokio::sync::Mutex<Browser>>,
    }

    impl ChromeDriver {
        pub async fn launch() -> Result<Self> {
            let config = BrowserConfig::builder()
                .no_sandbox()
                .build()
                .map_err(RainbowError::Driver)?;
            let (browser, mut handler) =
                Browser::launch(config).await.map_err(|e| RainbowError::Driver(e.to_string()))?;
            tokio::spawn(async move { while handler.next().await.is_some() {} });
            let page = browser
                .new_page("about:blank")
                .await
                .map_err(|e| RainbowError::Driver(e.to_string()))?;
            Ok(Self { page: Arc::new(page), _browser: Arc::new(tokio::sync::Mutex::new(browser)) })
        }
    }

    #[async_trait]
    impl Driver for ChromeDriver {
        async fn document_html(&self) -> Result<String> {
            self.page.content().await.map_err(|e| RainbowError::Driver(e.to_string()))
        }

        async fn evaluate(&self, script: &str) -> Result<Value> {
            let result = self
                .page
                .evaluate(script)
                .await
                .map_err(|e| RainbowError::Driver(e.to_string()))?;
            result.into_value().map_err(|e| RainbowError::Driver(e.to_string()))
        }

        async fn goto(&self, url: &str) -> Result<()> {
            self.page.goto(url).await.map_err(|e| RainbowError::Driver(e.to_string()))?;
            Ok(())
        }

        async fn click(&self, selector: &str) -> Result<()> {
            self.page
                .find_element(selector)
                .await
                .map_err(|e| RainbowError::Driver(e.to_string()))?
                .click()
                .await
                .map_err(|e| RainbowError::Driver(e.to_string()))?;
            Ok(())
        }

        async fn type_text(&self, selector: &str, text: &str) -> Result<()> {
            self.page
                .find_element(selector)
                .await
                .map_err(|e| RainbowError::Driver(e.to_string()))?
                .type_str(text)
                .await
                .map_err(|e| RainbowError::Driver(e.to_string()))?;
            Ok(())
        }

        async fn select_option(&self, selector: &str, value: &str) -> Result<()> {
            let script = format!(
                "document.querySelector({selector:?}).value = {value:?}",
            );
            self.evaluate(&script).await.map(|_| ())
        }

        async fn mouse_wheel(&self, delta_x: f64, delta_y: f64) -> Result<()> {
            let script = format!("window.scrollBy({delta_x}, {delta_y})");
            self.evaluate(&script).await.map(|_| ())
        }

        async fn scroll_into_view(&self, selector: Option<&str>) -> Result<()> {
            if let Some(sel) = selector {
                let script = format!("document.querySelector({sel:?})?.scrollIntoView()");
                self.evaluate(&script).await.map(|_| ())
            } else {
                Ok(())
            }
        }

        async fn wait_for_timeout(&self, milliseconds: u64) {
            tokio::time::sleep(std::time::Duration::from_millis(milliseconds)).await;
        }

        async fn wait_for_selector(&self, selector: &str, timeout_ms: u64) -> bool {
            let deadline = std::time::Instant::now() + std::time::Duration::from_millis(timeout_ms);
            while std::time::Instant::now() < deadline {
                if self.is_visible(selector).await {
                    return true;
                }
                tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            }
            false
        }

        async fn is_visible(&self, selector: &str) -> bool {
            self.page.find_element(selector).await.is_ok()
        }

        async fn current_url(&self) -> Result<String> {
            self.page
                .url()
                .await
                .map_err(|e| RainbowError::Driver(e.to_string()))?
                .ok_or_else(|| RainbowError::Driver("no current url".to_string()))
        }

        async fn screenshot(&self) -> Result<Vec<u8>> {
            self.page
                .screenshot(ScreenshotParams::builder().build())
                .await
                .map_err(|e| RainbowError::Driver(e.to_string()))
        }

        async fn drain_responses(&self) -> Vec<InterceptedResponse> {
            Vec::new()
        }

        async fn set_route_guard(&self, _url_pattern: &str, _block: bool) -> Result<()> {
            Ok(())
        }

        fn viewport(&self) -> (f64, f64) {
            crate::dom::DEFAULT_VIEWPORT
        }

        async fn scroll_y(&self) -> f64 {
            self.evaluate("window.scrollY").await.ok().and_then(|v| v.as_f64()).unwrap_or(0.0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fixture_driver_reports_current_html() {
        let driver = FixtureDriver::new("<div>hello</div>", "https://example.com");
        let html = driver.document_html().await.unwrap();
        assert!(html.contains("hello"));
    }

    #[tokio::test]
    async fn click_applies_queued_mutation() {
        let driver = FixtureDriver::new("<div>before</div>", "https://example.com");
        driver.queue_mutation("<div>after</div>");
        driver.click("button.next").await.unwrap();
        let html = driver.document_html().await.unwrap();
        assert!(html.contains("after"));
        assert_eq!(driver.clicked_selectors(), vec!["button.next".to_string()]);
    }

    #[tokio::test]
    async fn route_guard_blocks_matching_navigation() {
        let driver = FixtureDriver::new("<div></div>", "https://example.com");
        driver.set_route_guard("/checkout", true).await.unwrap();
        let result = driver.goto("https://example.com/checkout").await;
        assert!(result.is_err());
        assert!(driver.goto("https://example.com/other").await.is_ok());
    }

    #[tokio::test]
    async fn bang_prefixed_route_guard_locks_navigation_to_starting_url() {
        let driver = FixtureDriver::new("<div></div>", "https://example.com/page");
        driver.set_route_guard("!https://example.com/page", true).await.unwrap();

        assert!(driver.goto("https://example.com/elsewhere").await.is_err());
        assert!(driver.goto("https://example.com/page#section").await.is_ok());

        driver.set_route_guard("!https://example.com/page", false).await.unwrap();
        assert!(driver.goto("https://example.com/elsewhere").await.is_ok());
    }
}
