/// One scraped posting.
///
/// Created by the list extractor with the list-level fields, enriched by the
/// detail fetcher, then handed to the sink. Unavailable fields are empty strings,
/// never missing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobRecord {
    pub title: String,
    pub company: String,
    pub category: String,
    pub location: String,
    pub tags: Vec<String>,
    pub detail_url: String,
    pub description: String,
    pub requirements: String,
}

impl JobRecord {
    pub fn new(title: String, company: String) -> Self {
        Self {
            title,
            company,
            ..Default::default()
        }
    }

    pub fn with_details(mut self, details: DetailFields) -> Self {
        if !details.url.is_empty() {
            self.detail_url = details.url;
        }
        self.description = details.description;
        self.requirements = details.requirements;
        self
    }

    /// Adds tags in order, skipping blanks and repeats.
    pub fn push_tags<I>(&mut self, tags: I)
    where
        I: IntoIterator<Item = String>,
    {
        for tag in tags {
            if !tag.is_empty() && !self.tags.contains(&tag) {
                self.tags.push(tag);
            }
        }
    }
}

/// Long-form fields read from a detail view.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DetailFields {
    pub url: String,
    pub description: String,
    pub requirements: String,
}

/// How to reach one row's detail view from the listing page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowTarget {
    /// 1-based position within the page.
    pub index: usize,
    /// Selector that clicks exactly this row on the live page.
    pub click_selector: String,
    /// Absolute detail URL when the source exposes one on the row.
    pub link: Option<String>,
}

/// Transient pagination state for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageCursor {
    /// 1-based.
    pub current: usize,
    /// Resolved once at the start; `None` when the source cannot tell.
    pub total: Option<usize>,
    /// Raw pagination text the total was parsed from, if any.
    pub display: Option<String>,
}

impl PageCursor {
    pub fn new(total: Option<usize>, display: Option<String>) -> Self {
        Self {
            current: 1,
            total,
            display,
        }
    }

    /// Clamps the resolved total to an optional override.
    pub fn limit(&self, max_pages: Option<usize>) -> Option<usize> {
        match (self.total, max_pages) {
            (Some(total), Some(max)) => Some(total.min(max)),
            (Some(total), None) => Some(total),
            (None, max) => max,
        }
    }

    pub fn is_last(&self, max_pages: Option<usize>) -> bool {
        self.limit(max_pages)
            .is_some_and(|limit| self.current >= limit)
    }
}
