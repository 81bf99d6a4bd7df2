use scraper::{ElementRef, Html};
use tracing::{debug, trace, warn};

use crate::error::{recover_field, ExtractionError, ScrapeError};
use crate::extract::{child_position, CompiledLocator, Query};
use crate::models::{JobRecord, RowTarget};
use crate::source::{DetailNavigation, ListingSource, Locator};
use crate::Result;

/// A row read off a listing page: partial record plus how to reach its detail view.
#[derive(Debug, Clone)]
pub struct ListedRow {
    pub record: JobRecord,
    pub target: RowTarget,
    pub warnings: Vec<ExtractionError>,
}

enum LinkResolver {
    None,
    Click(Locator),
    Href {
        locator: CompiledLocator,
        base_url: Option<String>,
    },
}

/// Reads the rows of a rendered listing page.
pub struct ListExtractor {
    company: String,
    container: Query,
    container_css: String,
    rows: Query,
    row_css: String,
    title: CompiledLocator,
    category: Option<CompiledLocator>,
    location: Option<CompiledLocator>,
    tags: Option<CompiledLocator>,
    link: LinkResolver,
}

impl ListExtractor {
    pub fn new(source: &ListingSource) -> Result<Self> {
        let listing = &source.listing;
        let fields = &listing.fields;
        let compile = |locator: &Option<Locator>| locator.as_ref().map(CompiledLocator::new).transpose();

        let link = match source.detail.as_ref().map(|d| &d.navigation) {
            Some(DetailNavigation::Popup { click }) => {
                LinkResolver::Click(click.clone().unwrap_or_default())
            }
            Some(DetailNavigation::Link { locator, base_url }) => LinkResolver::Href {
                locator: CompiledLocator::new(locator)?,
                base_url: base_url.clone(),
            },
            None => LinkResolver::None,
        };

        Ok(Self {
            company: source.company.clone(),
            container: Query::new(&listing.container)?,
            container_css: listing.container.clone(),
            rows: Query::new(&listing.row)?,
            row_css: listing.row.clone(),
            title: compile(&fields.title)?.ok_or_else(|| {
                ScrapeError::Config(format!("{}: listing.fields.title is required", source.name))
            })?,
            category: compile(&fields.category)?,
            location: compile(&fields.location)?,
            tags: compile(&fields.tags)?,
            link,
        })
    }

    /// Reads every row of the page in document order.
    ///
    /// Field failures never drop a row: the field is left empty and the error is
    /// returned in [`ListedRow::warnings`]. A missing container yields no rows.
    pub fn extract_rows(&self, html: &str) -> Vec<ListedRow> {
        let document = Html::parse_document(html);
        let container = match self.container.first(&document) {
            Ok(container) => container,
            Err(e) => {
                warn!(error = %e, "listing container not found");
                return Vec::new();
            }
        };
        trace!(html = %container.html(), "listing container");

        let rows: Vec<_> = container
            .children()
            .filter_map(ElementRef::wrap)
            .filter(|child| self.rows.matches(child))
            .collect();
        debug!(count = rows.len(), "rows on page");

        rows.into_iter()
            .enumerate()
            .map(|(i, row)| {
                let index = i + 1;
                trace!(index, html = %row.html(), "row");
                let mut warnings = Vec::new();
                let mut field = |name: &str, result| {
                    let (value, warning) = recover_field(name, index, result);
                    warnings.extend(warning);
                    value
                };

                let title = field("title", self.title.read(row));
                let mut record = JobRecord::new(title, self.company.clone());
                if let Some(locator) = &self.category {
                    record.category = field("category", locator.read(row));
                }
                if let Some(locator) = &self.location {
                    record.location = field("location", locator.read(row));
                }
                if let Some(locator) = &self.tags {
                    match locator.read_all(row) {
                        Ok(tags) => record.push_tags(tags),
                        Err(e) => {
                            field("tags", Err(e));
                        }
                    }
                }

                let row_selector = format!(
                    "{} > {}:nth-child({})",
                    self.container_css,
                    self.row_css,
                    child_position(row)
                );
                let (click_selector, link) = match &self.link {
                    LinkResolver::None => (row_selector, None),
                    LinkResolver::Click(click) => (click.to_selector(&row_selector), None),
                    LinkResolver::Href { locator, base_url } => {
                        let href = field("detail_url", locator.read(row));
                        let link = (!href.is_empty()).then(|| absolute_url(base_url.as_deref(), &href));
                        (row_selector, link)
                    }
                };
                if let Some(link) = &link {
                    record.detail_url = link.clone();
                }

                ListedRow {
                    record,
                    target: RowTarget {
                        index,
                        click_selector,
                        link,
                    },
                    warnings,
                }
            })
            .collect()
    }
}

fn absolute_url(base_url: Option<&str>, href: &str) -> String {
    if href.starts_with("http://") || href.starts_with("https://") {
        return href.to_string();
    }
    match base_url {
        Some(base) => format!(
            "{}/{}",
            base.trim_end_matches('/'),
            href.trim_start_matches('/')
        ),
        None => href.to_string(),
    }
}
