use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use fantoccini::elements::Element;
use fantoccini::wd::{TimeoutConfiguration, WindowHandle};
use fantoccini::{Client, ClientBuilder, Locator};
use serde_json::json;
use thiserror::Error;
use tokio::time::Instant;
use tracing::warn;

/// How often polling waits re-query the page.
pub const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Element query, either CSS or XPath.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    Css(String),
    XPath(String),
}

impl Selector {
    pub fn css(s: impl Into<String>) -> Self {
        Selector::Css(s.into())
    }

    pub fn xpath(s: impl Into<String>) -> Self {
        Selector::XPath(s.into())
    }
}

/// Opaque handle to an element previously returned by a find call.
/// Handles go stale when the page navigates or re-renders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ElementId(pub u64);

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("webdriver command failed: {0}")]
    Command(#[from] fantoccini::error::CmdError),
    #[error("webdriver session could not be created: {0}")]
    Session(#[from] fantoccini::error::NewSessionError),
    #[error("webdriver command timed out")]
    CommandTimeout,
    #[error("invalid window handle: {0}")]
    WindowHandle(#[from] fantoccini::error::InvalidWindowHandle),
    #[error("stale or unknown element handle {0:?}")]
    UnknownElement(ElementId),
}

pub type DriverResult<T> = Result<T, DriverError>;

/// Capability surface the scraping core needs from a browser session.
///
/// Modeled as a blocking RPC-like service: every call completes or errors
/// before the next one is issued. A deterministic mock implementation backs
/// the tests, so the core never needs a live browser to be exercised.
#[async_trait]
pub trait Browser {
    async fn navigate(&mut self, url: &str) -> DriverResult<()>;
    async fn back(&mut self) -> DriverResult<()>;
    async fn find_elements(&mut self, selector: &Selector) -> DriverResult<Vec<ElementId>>;
    async fn find_in(&mut self, scope: ElementId, selector: &Selector)
        -> DriverResult<Vec<ElementId>>;
    async fn click(&mut self, element: ElementId) -> DriverResult<()>;
    async fn text(&mut self, element: ElementId) -> DriverResult<String>;
    async fn attribute(&mut self, element: ElementId, name: &str)
        -> DriverResult<Option<String>>;
    /// Displayed and enabled, i.e. a click can plausibly land.
    async fn is_interactable(&mut self, element: ElementId) -> DriverResult<bool>;
    async fn page_source(&mut self) -> DriverResult<String>;
    async fn window_handles(&mut self) -> DriverResult<Vec<String>>;
    async fn switch_window(&mut self, handle: &str) -> DriverResult<()>;
    async fn close_window(&mut self) -> DriverResult<()>;
}

/// Poll for the first element matching `selector`, up to `timeout`.
/// `Ok(None)` means the wait timed out; `Err` is a hard driver failure.
pub async fn wait_for_element<B: Browser + ?Sized>(
    browser: &mut B,
    selector: &Selector,
    timeout: Duration,
) -> DriverResult<Option<ElementId>> {
    let deadline = Instant::now() + timeout;
    loop {
        let found = browser.find_elements(selector).await?;
        if let Some(first) = found.first() {
            return Ok(Some(*first));
        }
        if Instant::now() >= deadline {
            return Ok(None);
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

/// Live WebDriver session backed by fantoccini.
///
/// Elements are cached under opaque ids; the cache is dropped whenever the
/// session navigates or changes window, since every cached handle is stale
/// from that point on.
pub struct WebDriverBrowser {
    client: Client,
    elements: HashMap<ElementId, Element>,
    next_id: u64,
    command_timeout: Duration,
}

macro_rules! cmd {
    ($self:ident, $fut:expr) => {
        match tokio::time::timeout($self.command_timeout, $fut).await {
            Ok(res) => res.map_err(DriverError::from),
            Err(_) => Err(DriverError::CommandTimeout),
        }
    };
}

impl WebDriverBrowser {
    /// Open a session against a WebDriver endpoint (e.g. a local chromedriver).
    pub async fn connect(
        webdriver_url: &str,
        headless: bool,
        page_load_timeout: Duration,
        command_timeout: Duration,
    ) -> DriverResult<Self> {
        let mut args = vec![
            "--disable-blink-features=AutomationControlled",
            "--disable-extensions",
            "--disable-gpu",
            "--no-sandbox",
            "--disable-dev-shm-usage",
            "--start-maximized",
            "--remote-allow-origins=*",
        ];
        if headless {
            args.push("--headless=new");
        }
        let mut caps = serde_json::map::Map::new();
        caps.insert(
            "goog:chromeOptions".to_string(),
            json!({
                "args": args,
                "excludeSwitches": ["enable-automation"],
                "useAutomationExtension": false,
            }),
        );

        let client = ClientBuilder::native()
            .capabilities(caps)
            .connect(webdriver_url)
            .await?;
        client
            .update_timeouts(TimeoutConfiguration::new(None, Some(page_load_timeout), None))
            .await?;

        Ok(Self {
            client,
            elements: HashMap::new(),
            next_id: 0,
            command_timeout,
        })
    }

    /// Release the browser session. Failures are logged, never raised: this
    /// runs unconditionally at the end of a run.
    pub async fn quit(self) {
        if let Err(e) = self.client.close().await {
            warn!("Failed to close webdriver session cleanly: {}", e);
        }
    }

    fn locator<'a>(selector: &'a Selector) -> Locator<'a> {
        match selector {
            Selector::Css(s) => Locator::Css(s),
            Selector::XPath(s) => Locator::XPath(s),
        }
    }

    fn store(&mut self, found: Vec<Element>) -> Vec<ElementId> {
        found
            .into_iter()
            .map(|el| {
                let id = ElementId(self.next_id);
                self.next_id += 1;
                self.elements.insert(id, el);
                id
            })
            .collect()
    }

    fn lookup(&self, id: ElementId) -> DriverResult<Element> {
        self.elements
            .get(&id)
            .cloned()
            .ok_or(DriverError::UnknownElement(id))
    }
}

#[async_trait]
impl Browser for WebDriverBrowser {
    async fn navigate(&mut self, url: &str) -> DriverResult<()> {
        self.elements.clear();
        cmd!(self, self.client.goto(url))
    }

    async fn back(&mut self) -> DriverResult<()> {
        self.elements.clear();
        cmd!(self, self.client.back())
    }

    async fn find_elements(&mut self, selector: &Selector) -> DriverResult<Vec<ElementId>> {
        let found = cmd!(self, self.client.find_all(Self::locator(selector)))?;
        Ok(self.store(found))
    }

    async fn find_in(
        &mut self,
        scope: ElementId,
        selector: &Selector,
    ) -> DriverResult<Vec<ElementId>> {
        let parent = self.lookup(scope)?;
        let found = cmd!(self, parent.find_all(Self::locator(selector)))?;
        Ok(self.store(found))
    }

    async fn click(&mut self, element: ElementId) -> DriverResult<()> {
        let el = self.lookup(element)?;
        cmd!(self, el.click())
    }

    async fn text(&mut self, element: ElementId) -> DriverResult<String> {
        let el = self.lookup(element)?;
        cmd!(self, el.text())
    }

    async fn attribute(
        &mut self,
        element: ElementId,
        name: &str,
    ) -> DriverResult<Option<String>> {
        let el = self.lookup(element)?;
        cmd!(self, el.attr(name))
    }

    async fn is_interactable(&mut self, element: ElementId) -> DriverResult<bool> {
        let el = self.lookup(element)?;
        let displayed = cmd!(self, el.is_displayed())?;
        if !displayed {
            return Ok(false);
        }
        cmd!(self, el.is_enabled())
    }

    async fn page_source(&mut self) -> DriverResult<String> {
        cmd!(self, self.client.source())
    }

    async fn window_handles(&mut self) -> DriverResult<Vec<String>> {
        let windows = cmd!(self, self.client.windows())?;
        Ok(windows.into_iter().map(String::from).collect())
    }

    async fn switch_window(&mut self, handle: &str) -> DriverResult<()> {
        self.elements.clear();
        // WebDriver reserves "current" as a handle value; try_from rejects it.
        let handle = WindowHandle::try_from(handle.to_string())?;
        cmd!(self, self.client.switch_to_window(handle))
    }

    async fn close_window(&mut self) -> DriverResult<()> {
        self.elements.clear();
        cmd!(self, self.client.close_window())
    }
}

// ── Mock browser for tests ──


// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_handle_round_trips_through_string() {
        let handle = WindowHandle::try_from("w-1234".to_string()).unwrap();
        assert_eq!(String::from(handle), "w-1234");
    }

    #[test]
    fn reserved_window_handle_maps_into_driver_error() {
        let err = WindowHandle::try_from("current".to_string()).unwrap_err();
        assert!(matches!(
            DriverError::from(err),
            DriverError::WindowHandle(_)
        ));
    }
}
