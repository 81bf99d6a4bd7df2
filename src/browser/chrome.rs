use std::collections::HashSet;
use std::ffi::OsStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use headless_chrome::{Browser, LaunchOptions, Tab};
use tracing::{debug, warn};

use super::{BrowserSession, DetailTab, PageView};
use crate::error::DriverError;

const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";
const POPUP_POLL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub struct LaunchConfig {
    pub headless: bool,
    pub user_agent: String,
    pub window_size: Option<(u32, u32)>,
    /// Chrome is killed after this long without any CDP traffic.
    pub idle_timeout: Duration,
}

impl Default for LaunchConfig {
    fn default() -> Self {
        Self {
            headless: true,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            window_size: Some((1440, 900)),
            idle_timeout: Duration::from_secs(600),
        }
    }
}

fn browser_error(e: impl std::fmt::Display) -> DriverError {
    DriverError::Browser(e.to_string())
}

fn wait_on(tab: &Tab, selector: &str, timeout: Duration) -> Result<(), DriverError> {
    tab.wait_for_element_with_custom_timeout(selector, timeout)
        .map(|_| ())
        .map_err(|_| DriverError::Timeout {
            selector: selector.to_string(),
            timeout,
        })
}

/// A headless_chrome browser plus the listing tab it drives.
pub struct ChromeSession {
    browser: Browser,
    tab: Arc<Tab>,
    /// Targets that are ours: the listing tab, launch tabs and detail tabs already handed out.
    seen: HashSet<String>,
}

impl ChromeSession {
    pub fn launch(config: &LaunchConfig) -> Result<Self, DriverError> {
        let user_agent = format!("--user-agent={}", config.user_agent);
        let browser = Browser::new(LaunchOptions {
            headless: config.headless,
            window_size: config.window_size,
            idle_browser_timeout: config.idle_timeout,
            args: vec![
                OsStr::new(&user_agent),
                OsStr::new("--disable-blink-features=AutomationControlled"),
            ],
            ..Default::default()
        })
        .map_err(browser_error)?;
        let tab = browser.new_tab().map_err(browser_error)?;

        let mut session = Self {
            browser,
            tab,
            seen: HashSet::new(),
        };
        session.seen = session.tabs()?.into_iter().map(|(id, _)| id).collect();
        Ok(session)
    }

    fn tabs(&self) -> Result<Vec<(String, Arc<Tab>)>, DriverError> {
        let tabs = self
            .browser
            .get_tabs()
            .lock()
            .map_err(|_| DriverError::Browser("tab registry lock poisoned".into()))?;
        Ok(tabs
            .iter()
            .map(|tab| (tab.get_target_id().to_string(), tab.clone()))
            .collect())
    }

    /// Closes tabs nobody asked for, such as a popup that showed up after its wait
    /// had already given up.
    fn close_strays(&mut self) -> Result<(), DriverError> {
        for (id, tab) in unseen(&self.seen, self.tabs()?) {
            warn!(target_id = %id, url = %tab.get_url(), "closing stray tab");
            if let Err(e) = tab.close(true) {
                warn!(target_id = %id, error = %e, "failed to close stray tab");
            }
            self.seen.insert(id);
        }
        Ok(())
    }

    fn adopt(&mut self, id: String, tab: Arc<Tab>, timeout: Duration) -> ChromeTab {
        tab.set_default_timeout(timeout);
        self.seen.insert(id);
        ChromeTab { tab }
    }
}

/// Tabs whose target id is not in `seen`, in registry order.
fn unseen<T>(seen: &HashSet<String>, tabs: Vec<(String, T)>) -> Vec<(String, T)> {
    tabs.into_iter().filter(|(id, _)| !seen.contains(id)).collect()
}

impl PageView for ChromeSession {
    fn wait_for(&self, selector: &str, timeout: Duration) -> Result<(), DriverError> {
        wait_on(&self.tab, selector, timeout)
    }

    fn content(&self) -> Result<String, DriverError> {
        self.tab.get_content().map_err(browser_error)
    }

    fn url(&self) -> String {
        self.tab.get_url()
    }
}

impl BrowserSession for ChromeSession {
    type Tab = ChromeTab;

    fn goto(&mut self, url: &str, timeout: Duration) -> Result<(), DriverError> {
        self.tab.set_default_timeout(timeout);
        self.tab
            .navigate_to(url)
            .and_then(|tab| tab.wait_until_navigated())
            .map(|_| ())
            .map_err(browser_error)
    }

    fn click(&mut self, selector: &str) -> Result<(), DriverError> {
        let element = self
            .tab
            .find_element(selector)
            .map_err(|_| DriverError::NoSuchElement(selector.to_string()))?;
        element.click().map_err(browser_error)?;
        Ok(())
    }

    fn open_popup(&mut self, selector: &str, timeout: Duration) -> Result<ChromeTab, DriverError> {
        self.close_strays()?;
        self.click(selector)?;

        let deadline = Instant::now() + timeout;
        loop {
            if let Some((id, tab)) = unseen(&self.seen, self.tabs()?).into_iter().next() {
                debug!(target_id = %id, "popup opened");
                return Ok(self.adopt(id, tab, timeout));
            }
            if Instant::now() >= deadline {
                if let Err(e) = self.close_strays() {
                    warn!(error = %e, "could not sweep tabs after popup wait");
                }
                return Err(DriverError::NoPopup(timeout));
            }
            std::thread::sleep(POPUP_POLL);
        }
    }

    fn open_tab(&mut self, url: &str, timeout: Duration) -> Result<ChromeTab, DriverError> {
        self.close_strays()?;
        let tab = self.browser.new_tab().map_err(browser_error)?;
        let id = tab.get_target_id().to_string();
        let mut opened = self.adopt(id, tab, timeout);

        let navigated = opened
            .tab
            .navigate_to(url)
            .and_then(|tab| tab.wait_until_navigated())
            .map(|_| ())
            .map_err(browser_error);
        if let Err(e) = navigated {
            let _ = opened.close();
            return Err(e);
        }
        Ok(opened)
    }
}

pub struct ChromeTab {
    tab: Arc<Tab>,
}

impl PageView for ChromeTab {
    fn wait_for(&self, selector: &str, timeout: Duration) -> Result<(), DriverError> {
        wait_on(&self.tab, selector, timeout)
    }

    fn content(&self) -> Result<String, DriverError> {
        self.tab.get_content().map_err(browser_error)
    }

    fn url(&self) -> String {
        self.tab.get_url()
    }
}

impl DetailTab for ChromeTab {
    fn close(&mut self) -> Result<(), DriverError> {
        self.tab.close(true).map(|_| ()).map_err(browser_error)
    }
}
