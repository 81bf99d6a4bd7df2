use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::browser::BrowserSession;
use crate::crawler::{Navigator, Paginator};
use crate::detail::DetailFetcher;
use crate::list::ListExtractor;
use crate::models::PageCursor;
use crate::source::ListingSource;
use crate::utils::random_delay;
use crate::writer::{OutputTarget, RecordSink};
use crate::Result;

/// Shared stop request, checked between items and pages.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// Reached the resolved total or the page limit.
    LastPage,
    /// No further page control, or an empty page on a source that ends that way.
    Exhausted,
    /// Fewer rows than a full page.
    ShortPage,
    Cancelled,
    /// A page-level failure; records scraped so far are kept.
    Aborted(String),
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LastPage => write!(f, "last page reached"),
            Self::Exhausted => write!(f, "no more pages"),
            Self::ShortPage => write!(f, "short page"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Aborted(reason) => write!(f, "aborted: {reason}"),
        }
    }
}

/// Everything a run accumulates.
#[derive(Debug)]
pub struct RunState {
    pub cursor: PageCursor,
    pub sink: RecordSink,
    pub pages_scraped: usize,
    pub detail_failures: usize,
    pub row_warnings: usize,
    pub stop: StopReason,
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub source: String,
    pub pages_scraped: usize,
    pub total_pages: Option<usize>,
    pub records: usize,
    pub detail_failures: usize,
    pub row_warnings: usize,
    pub stop: StopReason,
    pub elapsed: Duration,
    pub outputs: Vec<PathBuf>,
}

pub struct CrawlPipeline<'a> {
    source: &'a ListingSource,
    cancel: CancelFlag,
    max_pages: Option<usize>,
}

#[must_use = "pipeline must end with .save() to execute"]
pub struct PipelineWithRecords<'a> {
    source: &'a ListingSource,
    state: RunState,
    started: Instant,
}

impl<'a> CrawlPipeline<'a> {
    pub fn new(source: &'a ListingSource) -> Self {
        Self {
            source,
            cancel: CancelFlag::new(),
            max_pages: None,
        }
    }

    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    /// Caps the number of pages; the lower of this and the site's total wins.
    pub fn max_pages(mut self, max_pages: Option<usize>) -> Self {
        self.max_pages = max_pages;
        self
    }

    /// Scrapes every page in order.
    ///
    /// Only configuration and initial navigation errors come back as `Err`. Anything
    /// that goes wrong later ends the run early with the records collected so far.
    pub fn crawl<S: BrowserSession>(self, session: &mut S) -> Result<PipelineWithRecords<'a>> {
        let started = Instant::now();
        let source = self.source;
        let extractor = ListExtractor::new(source)?;
        let fetcher = source.detail.as_ref().map(DetailFetcher::new).transpose()?;
        let delay = source.detail.as_ref().map(|d| d.delay);
        let navigator = Navigator::new(source);
        let paginator = Paginator::new(source);

        info!(source = %source.name, "crawl started");
        navigator.open(session)?;
        let cursor = navigator.resolve_total_pages(&*session)?;

        let mut state = RunState {
            cursor,
            sink: RecordSink::new(source.output.dedupe_by),
            pages_scraped: 0,
            detail_failures: 0,
            row_warnings: 0,
            stop: StopReason::LastPage,
        };

        let mut empty_streak = 0;
        let stop = 'pages: loop {
            let page = state.cursor.current;
            let html = match session.content() {
                Ok(html) => html,
                Err(e) => break StopReason::Aborted(format!("page {page}: {e}")),
            };

            let rows = extractor.extract_rows(&html);
            let row_count = rows.len();
            state.pages_scraped += 1;
            info!(
                page,
                total = ?state.cursor.total,
                rows = row_count,
                "page loaded"
            );

            if rows.is_empty() {
                if source.listing.zero_rows_means_exhausted {
                    info!(page, "empty page, pages exhausted");
                    break StopReason::Exhausted;
                }
                empty_streak += 1;
                if empty_streak >= source.listing.max_empty_pages {
                    warn!(page, empty = empty_streak, "empty pages in a row, pages exhausted");
                    break StopReason::Exhausted;
                }
                warn!(page, "no rows on page");
            } else {
                empty_streak = 0;
            }

            for row in rows {
                if self.cancel.is_cancelled() {
                    break 'pages StopReason::Cancelled;
                }

                state.row_warnings += row.warnings.len();
                let mut record = row.record;
                if let Some(fetcher) = &fetcher {
                    match fetcher.fetch(session, &row.target) {
                        Ok(details) => record = record.with_details(details),
                        Err(e) => {
                            warn!(page, row = row.target.index, title = %record.title, error = %e, "detail unavailable");
                            state.detail_failures += 1;
                        }
                    }
                }
                info!(page, row = row.target.index, title = %record.title, "scraped");
                state.sink.append(record);

                if let Some(delay) = delay {
                    random_delay(delay);
                }
            }

            if source.page_size.is_some_and(|size| row_count > 0 && row_count < size) {
                info!(page, rows = row_count, "short page, assuming last");
                break StopReason::ShortPage;
            }
            if state.cursor.is_last(self.max_pages) {
                break StopReason::LastPage;
            }
            if self.cancel.is_cancelled() {
                break StopReason::Cancelled;
            }

            let target = page + 1;
            match paginator.advance(session, target) {
                Ok(true) => state.cursor.current = target,
                Ok(false) => break StopReason::Exhausted,
                Err(e) => {
                    warn!(error = %e, "pagination failed, keeping partial results");
                    break StopReason::Aborted(e.to_string());
                }
            }
        };
        state.stop = stop;

        info!(
            source = %source.name,
            pages = state.pages_scraped,
            records = state.sink.len(),
            stop = %state.stop,
            "crawl finished"
        );

        Ok(PipelineWithRecords {
            source,
            state,
            started,
        })
    }
}

impl PipelineWithRecords<'_> {
    pub fn state(&self) -> &RunState {
        &self.state
    }

    pub fn into_state(self) -> RunState {
        self.state
    }

    /// Writes every target, then reports. A failed write is returned only after
    /// all targets were attempted.
    pub fn save(self, targets: &[OutputTarget]) -> Result<RunReport> {
        self.state
            .sink
            .flush_all(targets, &self.source.output.columns)?;
        Ok(self.report(targets))
    }

    fn report(&self, targets: &[OutputTarget]) -> RunReport {
        RunReport {
            source: self.source.name.clone(),
            pages_scraped: self.state.pages_scraped,
            total_pages: self.state.cursor.total,
            records: self.state.sink.output().len(),
            detail_failures: self.state.detail_failures,
            row_warnings: self.state.row_warnings,
            stop: self.state.stop.clone(),
            elapsed: self.started.elapsed(),
            outputs: targets.iter().map(|target| target.path.clone()).collect(),
        }
    }
}
