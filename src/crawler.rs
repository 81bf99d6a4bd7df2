use std::time::{Duration, Instant};

use scraper::Html;
use tracing::{debug, info, warn};

use crate::browser::{BrowserSession, PageView};
use crate::error::ScrapeError;
use crate::extract::{line_text, Query};
use crate::models::PageCursor;
use crate::source::{AdvanceStrategy, ListingConfig, ListingSource, PaginationConfig, TotalPages};
use crate::utils::settle;
use crate::Result;

/// Opens the listing page and works out how many pages there are.
pub struct Navigator {
    url: String,
    listing: ListingConfig,
    pagination: PaginationConfig,
}

impl Navigator {
    pub fn new(source: &ListingSource) -> Self {
        Self {
            url: source.url.clone(),
            listing: source.listing.clone(),
            pagination: source.pagination.clone(),
        }
    }

    /// Loads page 1 and waits for the list to render. Failure here ends the run.
    pub fn open<S: BrowserSession>(&self, session: &mut S) -> Result<()> {
        info!(url = %self.url, "opening listing");
        session
            .goto(&self.url, self.listing.navigation_timeout())
            .map_err(ScrapeError::Navigation)?;
        settle(self.listing.settle());
        session
            .wait_for(&self.listing.ready, self.listing.timeout())
            .map_err(ScrapeError::Navigation)?;
        Ok(())
    }

    /// Reads the page count off the opened listing.
    ///
    /// Anything unreadable is treated as a single page.
    pub fn resolve_total_pages<P: PageView>(&self, page: &P) -> Result<PageCursor> {
        let (selector, attribute) = match &self.pagination.total {
            TotalPages::Unknown => return Ok(PageCursor::new(None, None)),
            TotalPages::Ratio { selector } => (selector, None),
            TotalPages::Controls {
                selector,
                attribute,
            } => (selector, attribute.as_deref()),
        };

        if let Err(e) = page.wait_for(selector, self.pagination.timeout()) {
            warn!(error = %e, "pagination not rendered, assuming a single page");
            return Ok(PageCursor::new(Some(1), None));
        }

        let document = Html::parse_document(&page.content()?);
        let query = Query::new(selector)?;
        let labels: Vec<String> = query
            .all(&document)
            .into_iter()
            .filter_map(|element| match attribute {
                Some(attribute) => element.value().attr(attribute).map(str::to_string),
                None => Some(line_text(element)),
            })
            .collect();

        let total = match &self.pagination.total {
            TotalPages::Ratio { .. } => labels.first().and_then(|text| parse_ratio(text)),
            _ => max_page_label(&labels),
        };
        let shown = match &self.pagination.total {
            TotalPages::Ratio { .. } => labels.into_iter().next(),
            _ => None,
        };

        match total {
            Some(total) => {
                info!(total, display = ?shown, "total pages");
                Ok(PageCursor::new(Some(total), shown))
            }
            None => {
                warn!(display = ?shown, "could not parse page count, assuming a single page");
                Ok(PageCursor::new(Some(1), shown))
            }
        }
    }
}

/// Total from a "current/total" string such as `1/6` or `1 / 12 页`.
pub fn parse_ratio(text: &str) -> Option<usize> {
    let (_, right) = text.split_once('/')?;
    let digits: String = right
        .trim()
        .chars()
        .take_while(char::is_ascii_digit)
        .collect();
    digits.parse().ok().filter(|total| *total > 0)
}

/// Largest purely numeric label; ellipses and arrows are ignored.
pub fn max_page_label(labels: &[String]) -> Option<usize> {
    labels
        .iter()
        .filter_map(|label| label.trim().parse::<usize>().ok())
        .max()
}

/// Moves the live listing from one page to the next.
pub struct Paginator {
    listing_ready: String,
    listing_timeout: Duration,
    navigation_timeout: Duration,
    config: PaginationConfig,
}

impl Paginator {
    pub fn new(source: &ListingSource) -> Self {
        Self {
            listing_ready: source.listing.ready.clone(),
            listing_timeout: source.listing.timeout(),
            navigation_timeout: source.listing.navigation_timeout(),
            config: source.pagination.clone(),
        }
    }

    /// Brings the listing to page `target`.
    ///
    /// `Ok(false)` means there is nowhere to go: no strategy, or the control is
    /// absent or disabled. Once a control was used the page must actually show
    /// `target`, otherwise the run is out of sync and `PageSync` is returned.
    pub fn advance<S: BrowserSession>(&self, session: &mut S, target: usize) -> Result<bool> {
        let Some(strategy) = &self.config.advance else {
            return Ok(false);
        };

        if self.active_page(&*session)? == Some(target) {
            debug!(target, "already on target page");
            return Ok(true);
        }

        let sync_error = |reason: String| ScrapeError::PageSync { target, reason };

        match strategy {
            AdvanceStrategy::Next { selector } => {
                if !present(&*session, selector)? {
                    info!(target, "no next control, pages exhausted");
                    return Ok(false);
                }
                session
                    .click(selector)
                    .map_err(|e| sync_error(e.to_string()))?;
            }
            AdvanceStrategy::Index {
                item,
                attribute,
                fallback_next,
            } => {
                let control = format!("{item}[{attribute}=\"{target}\"]");
                let selector = if present(&*session, &control)? {
                    control
                } else {
                    match fallback_next {
                        Some(next) if present(&*session, next)? => {
                            debug!(target, "page control not shown, using next");
                            next.to_string()
                        }
                        _ => {
                            info!(target, "no control for page, pages exhausted");
                            return Ok(false);
                        }
                    }
                };
                session
                    .click(&selector)
                    .map_err(|e| sync_error(e.to_string()))?;
            }
            AdvanceStrategy::Url { template } => {
                let url = template.replace("{page}", &target.to_string());
                debug!(%url, "navigating to page");
                session
                    .goto(&url, self.navigation_timeout)
                    .map_err(|e| sync_error(e.to_string()))?;
            }
        }

        settle(self.config.settle());
        session
            .wait_for(&self.listing_ready, self.listing_timeout)
            .map_err(|e| sync_error(e.to_string()))?;
        self.confirm(&*session, target)?;

        info!(page = target, "advanced");
        Ok(true)
    }

    /// Polls the active-page indicator until it shows `target`.
    fn confirm<P: PageView>(&self, page: &P, target: usize) -> Result<()> {
        if self.config.active.is_none() {
            return Ok(());
        }

        let deadline = Instant::now() + self.config.timeout();
        loop {
            let active = self.active_page(page)?;
            if active == Some(target) {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(ScrapeError::PageSync {
                    target,
                    reason: match active {
                        Some(active) => format!("active page is {active}"),
                        None => "no active page indicator".to_string(),
                    },
                });
            }
            settle(self.config.poll());
        }
    }

    /// Page number the indicator currently marks, if there is an indicator.
    fn active_page<P: PageView>(&self, page: &P) -> Result<Option<usize>> {
        let Some(active) = &self.config.active else {
            return Ok(None);
        };
        let document = Html::parse_document(&page.content()?);
        let label = Query::new(&active.selector)?
            .first(&document)
            .ok()
            .and_then(|element| match &active.attribute {
                Some(attribute) => element.value().attr(attribute).map(str::to_string),
                None => Some(line_text(element)),
            });
        Ok(label.and_then(|label| label.trim().parse().ok()))
    }
}

fn present<P: PageView>(page: &P, selector: &str) -> Result<bool> {
    let document = Html::parse_document(&page.content()?);
    Ok(Query::new(selector)?.count(&document) > 0)
}
