//! Scripted stand-in for a browser.
//!
//! Listing pages are plain HTML. Clicking an element with `data-goto="N"` shows
//! listing page N; clicking a row with `data-detail="key"` opens the detail
//! behaviour registered under `key`. Tab opens and closes are counted.

#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::time::Duration;

use careers_crawler::{BrowserSession, CancelFlag, DetailTab, DriverError, ListingSource, PageView};
use scraper::{Html, Selector};

pub const BASE_URL: &str = "https://jobs.example.com/list";

pub const SOURCE: &str = r##"
    name = "example"
    company = "示例科技"
    url = "https://jobs.example.com/list"

    [listing]
    ready = "#list"
    container = "#list"
    row = "li.job"
    timeout_secs = 1

    [listing.fields.title]
    css = ".title"

    [listing.fields.category]
    css = ".category"

    [listing.fields.location]
    css = ".location"

    [pagination]
    total = { ratio = { selector = ".pager .display" } }
    advance = { next = { selector = ".pager .next:not(.disabled)" } }
    timeout_secs = 1
    poll_ms = 10

    [detail]
    ready = ".detail"
    navigation = { popup = {} }
    timeout_secs = 1
    popup_timeout_secs = 1
    delay = { min_ms = 0, max_ms = 0 }

    [detail.sections.by-order]
    block = ".detail section"
"##;

pub fn source() -> ListingSource {
    ListingSource::from_toml_str(SOURCE).expect("test source parses")
}

#[derive(Debug, Clone)]
pub struct Job {
    pub title: String,
    pub category: Option<String>,
    pub location: String,
    pub detail: String,
}

pub fn job(title: &str, location: &str, detail: &str) -> Job {
    Job {
        title: title.to_string(),
        category: Some("技术类".to_string()),
        location: location.to_string(),
        detail: detail.to_string(),
    }
}

pub fn rows_html(jobs: &[Job]) -> String {
    jobs.iter()
        .map(|job| {
            let category = job
                .category
                .as_ref()
                .map(|c| format!(r#"<span class="category">{c}</span>"#))
                .unwrap_or_default();
            format!(
                r#"<li class="job" data-detail="{}"><span class="title">{}</span>{category}<span class="location">{}</span></li>"#,
                job.detail, job.title, job.location
            )
        })
        .collect()
}

/// A listing page with a "page/total" display and a next link.
pub fn listing_page(page: usize, total: usize, jobs: &[Job], next: Next) -> String {
    let next = match next {
        Next::Enabled => format!(r#"<a class="next" data-goto="{}">下一页</a>"#, page + 1),
        Next::Disabled => r#"<a class="next disabled">下一页</a>"#.to_string(),
        Next::Absent => String::new(),
    };
    format!(
        r#"<html><body><ul id="list">{}</ul><div class="pager"><span class="current">{page}</span><span class="display">{page}/{total}</span>{next}</div></body></html>"#,
        rows_html(jobs)
    )
}

#[derive(Debug, Clone, Copy)]
pub enum Next {
    Enabled,
    Disabled,
    Absent,
}

pub fn detail_page(key: &str) -> String {
    format!(
        r#"<html><body><div class="detail"><section><p>{key} 职位描述</p><p>第二行</p></section><section>{key} 职位要求</section></div></body></html>"#
    )
}

#[derive(Debug, Clone)]
pub enum Detail {
    Opens(String),
    /// The click never produces a tab.
    NoPopup,
    /// A tab opens but the content marker never shows up.
    NeverRenders,
}

#[derive(Debug, Default)]
pub struct Stats {
    pub opens: usize,
    pub closes: usize,
    pub double_closes: usize,
    pub clicks: Vec<String>,
    pub gotos: Vec<String>,
}

pub struct FakeSession {
    pages: HashMap<usize, String>,
    urls: HashMap<String, usize>,
    details: HashMap<String, Detail>,
    current: Option<usize>,
    url: String,
    pub stats: Rc<RefCell<Stats>>,
    cancel_after: Option<(usize, CancelFlag)>,
}

impl FakeSession {
    /// Listing pages are numbered from 1; page 1 lives at [`BASE_URL`].
    pub fn new(pages: Vec<String>) -> Self {
        let pages: HashMap<usize, String> = pages
            .into_iter()
            .enumerate()
            .map(|(i, html)| (i + 1, html))
            .collect();
        let mut urls = HashMap::new();
        urls.insert(BASE_URL.to_string(), 1);
        Self {
            pages,
            urls,
            details: HashMap::new(),
            current: None,
            url: "about:blank".to_string(),
            stats: Rc::default(),
            cancel_after: None,
        }
    }

    pub fn with_url(mut self, url: &str, page: usize) -> Self {
        self.urls.insert(url.to_string(), page);
        self
    }

    pub fn with_detail(mut self, key: &str, detail: Detail) -> Self {
        self.details.insert(key.to_string(), detail);
        self
    }

    /// Every `data-detail` key on every page opens [`detail_page`].
    pub fn with_default_details(mut self) -> Self {
        let selector = Selector::parse("[data-detail]").expect("selector");
        let keys: Vec<String> = self
            .pages
            .values()
            .flat_map(|html| {
                Html::parse_document(html)
                    .select(&selector)
                    .filter_map(|el| el.value().attr("data-detail").map(str::to_string))
                    .collect::<Vec<_>>()
            })
            .collect();
        for key in keys {
            self.details
                .entry(key.clone())
                .or_insert_with(|| Detail::Opens(detail_page(&key)));
        }
        self
    }

    /// Raises `flag` once `opens` detail tabs have been opened.
    pub fn cancel_after(mut self, opens: usize, flag: CancelFlag) -> Self {
        self.cancel_after = Some((opens, flag));
        self
    }

    fn html(&self) -> &str {
        self.current
            .and_then(|page| self.pages.get(&page))
            .map(String::as_str)
            .unwrap_or("<html></html>")
    }

    fn find_attr(&self, selector: &str, attr: &str) -> Result<Option<String>, DriverError> {
        let parsed = Selector::parse(selector)
            .map_err(|_| DriverError::NoSuchElement(selector.to_string()))?;
        let document = Html::parse_document(self.html());
        let element = document
            .select(&parsed)
            .next()
            .ok_or_else(|| DriverError::NoSuchElement(selector.to_string()))?;
        Ok(element.value().attr(attr).map(str::to_string))
    }

    fn open(&mut self, key: &str, timeout: Duration) -> Result<FakeTab, DriverError> {
        let html = match self.details.get(key) {
            Some(Detail::Opens(html)) => html.clone(),
            Some(Detail::NeverRenders) => "<html><body>加载中</body></html>".to_string(),
            Some(Detail::NoPopup) | None => return Err(DriverError::NoPopup(timeout)),
        };
        let opens = {
            let mut stats = self.stats.borrow_mut();
            stats.opens += 1;
            stats.opens
        };
        if let Some((after, flag)) = &self.cancel_after {
            if opens >= *after {
                flag.cancel();
            }
        }
        Ok(FakeTab {
            html,
            url: format!("https://jobs.example.com/position/{key}"),
            stats: self.stats.clone(),
            closed: false,
        })
    }
}

fn matches(html: &str, selector: &str) -> bool {
    Selector::parse(selector)
        .map(|parsed| Html::parse_document(html).select(&parsed).next().is_some())
        .unwrap_or(false)
}

impl PageView for FakeSession {
    fn wait_for(&self, selector: &str, timeout: Duration) -> Result<(), DriverError> {
        if matches(self.html(), selector) {
            Ok(())
        } else {
            Err(DriverError::Timeout {
                selector: selector.to_string(),
                timeout,
            })
        }
    }

    fn content(&self) -> Result<String, DriverError> {
        Ok(self.html().to_string())
    }

    fn url(&self) -> String {
        self.url.clone()
    }
}

impl BrowserSession for FakeSession {
    type Tab = FakeTab;

    fn goto(&mut self, url: &str, _timeout: Duration) -> Result<(), DriverError> {
        self.stats.borrow_mut().gotos.push(url.to_string());
        let page = self
            .urls
            .get(url)
            .copied()
            .ok_or_else(|| DriverError::Browser(format!("net::ERR_NAME_NOT_RESOLVED {url}")))?;
        self.current = Some(page);
        self.url = url.to_string();
        Ok(())
    }

    fn click(&mut self, selector: &str) -> Result<(), DriverError> {
        self.stats.borrow_mut().clicks.push(selector.to_string());
        if let Some(page) = self.find_attr(selector, "data-goto")? {
            self.current = page.parse().ok();
        }
        Ok(())
    }

    fn open_popup(&mut self, selector: &str, timeout: Duration) -> Result<FakeTab, DriverError> {
        let key = self
            .find_attr(selector, "data-detail")?
            .ok_or(DriverError::NoPopup(timeout))?;
        self.open(&key, timeout)
    }

    fn open_tab(&mut self, url: &str, timeout: Duration) -> Result<FakeTab, DriverError> {
        let key = url.rsplit('/').next().unwrap_or_default().to_string();
        self.open(&key, timeout)
    }
}

pub struct FakeTab {
    html: String,
    url: String,
    stats: Rc<RefCell<Stats>>,
    closed: bool,
}

impl PageView for FakeTab {
    fn wait_for(&self, selector: &str, timeout: Duration) -> Result<(), DriverError> {
        if matches(&self.html, selector) {
            Ok(())
        } else {
            Err(DriverError::Timeout {
                selector: selector.to_string(),
                timeout,
            })
        }
    }

    fn content(&self) -> Result<String, DriverError> {
        Ok(self.html.clone())
    }

    fn url(&self) -> String {
        self.url.clone()
    }
}

impl DetailTab for FakeTab {
    fn close(&mut self) -> Result<(), DriverError> {
        let mut stats = self.stats.borrow_mut();
        if self.closed {
            stats.double_closes += 1;
        }
        self.closed = true;
        stats.closes += 1;
        Ok(())
    }
}
