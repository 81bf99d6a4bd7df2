use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::ScrapeError;
use crate::extract::compile;
use crate::Result;

/// Built-in job boards, kept as data so one engine serves every site.
const BUILTIN_SOURCES: &[(&str, &str)] = &[
    ("aliyun", include_str!("../sources/aliyun.toml")),
    ("taotian", include_str!("../sources/taotian.toml")),
    ("ant", include_str!("../sources/ant.toml")),
    ("qq", include_str!("../sources/qq.toml")),
];

pub fn builtin_names() -> impl Iterator<Item = &'static str> {
    BUILTIN_SOURCES.iter().map(|(name, _)| *name)
}

/// Identifies one job board and how to read it. Immutable for a run.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ListingSource {
    pub name: String,
    /// Written into every record's `company` field.
    pub company: String,
    pub url: String,
    /// Rows per full page; a shorter page is the last one.
    pub page_size: Option<usize>,
    pub listing: ListingConfig,
    #[serde(default)]
    pub pagination: PaginationConfig,
    pub detail: Option<DetailConfig>,
    #[serde(default)]
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ListingConfig {
    /// Marker that proves the list has rendered.
    pub ready: String,
    pub container: String,
    /// Direct children of the container matching this are rows.
    #[serde(default = "any_element")]
    pub row: String,
    #[serde(default = "default_listing_timeout")]
    pub timeout_secs: u64,
    /// Bound on the initial page load, before waiting for `ready`.
    #[serde(default = "default_navigation_timeout")]
    pub navigation_timeout_secs: u64,
    #[serde(default)]
    pub settle_ms: u64,
    #[serde(default)]
    pub zero_rows_means_exhausted: bool,
    /// Empty pages in a row tolerated when they do not end the run on their own.
    #[serde(default = "default_max_empty_pages")]
    pub max_empty_pages: usize,
    #[serde(default)]
    pub fields: FieldLocators,
}

impl ListingConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn navigation_timeout(&self) -> Duration {
        Duration::from_secs(self.navigation_timeout_secs)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FieldLocators {
    pub title: Option<Locator>,
    pub category: Option<Locator>,
    pub location: Option<Locator>,
    /// Every match becomes a tag.
    pub tags: Option<Locator>,
}

/// Structural locator, relative to a row or section.
///
/// `path` walks 1-based element children first, then `css` selects a descendant.
/// With `attribute` set the attribute value is read instead of the text.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Locator {
    #[serde(default)]
    pub path: Vec<usize>,
    pub css: Option<String>,
    pub attribute: Option<String>,
}

impl Locator {
    pub fn css(css: impl Into<String>) -> Self {
        Self {
            css: Some(css.into()),
            ..Default::default()
        }
    }

    pub fn path(path: impl Into<Vec<usize>>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    /// Appends this locator to `base` as a CSS selector for the live page.
    pub fn to_selector(&self, base: &str) -> String {
        let mut selector = base.to_string();
        for index in &self.path {
            selector.push_str(&format!(" > :nth-child({index})"));
        }
        if let Some(css) = &self.css {
            selector.push(' ');
            selector.push_str(css);
        }
        selector
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PaginationConfig {
    #[serde(default)]
    pub total: TotalPages,
    /// `None` means the source has a single page.
    pub advance: Option<AdvanceStrategy>,
    pub active: Option<ActiveIndicator>,
    #[serde(default = "default_pagination_timeout")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub settle_ms: u64,
    #[serde(default = "default_poll_ms")]
    pub poll_ms: u64,
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self {
            total: TotalPages::default(),
            advance: None,
            active: None,
            timeout_secs: default_pagination_timeout(),
            settle_ms: 0,
            poll_ms: default_poll_ms(),
        }
    }
}

impl PaginationConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    pub fn poll(&self) -> Duration {
        Duration::from_millis(self.poll_ms)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TotalPages {
    /// A "current/total" string such as `1/6`.
    Ratio { selector: String },
    /// Page-index controls; the largest numeric label wins.
    Controls {
        selector: String,
        attribute: Option<String>,
    },
    /// Keep going until the site runs out or the page limit is hit.
    #[default]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AdvanceStrategy {
    /// Click a "next" control. Must only match while enabled.
    Next { selector: String },
    /// Click the control labelled with the target page.
    Index {
        item: String,
        attribute: String,
        fallback_next: Option<String>,
    },
    /// Navigate to a URL built from the page number (`{page}`).
    Url { template: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ActiveIndicator {
    pub selector: String,
    pub attribute: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DetailConfig {
    /// Marker that proves the detail content has rendered.
    pub ready: String,
    #[serde(default)]
    pub navigation: DetailNavigation,
    pub sections: SectionMatch,
    #[serde(default = "default_detail_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_detail_timeout")]
    pub popup_timeout_secs: u64,
    #[serde(default)]
    pub settle_ms: u64,
    #[serde(default)]
    pub delay: DelayRange,
}

impl DetailConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn popup_timeout(&self) -> Duration {
        Duration::from_secs(self.popup_timeout_secs)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DetailNavigation {
    /// Click the row (or `click` inside it) and wait for a new tab.
    Popup {
        #[serde(default)]
        click: Option<Locator>,
    },
    /// Read the detail URL off the row and open it in a fresh tab.
    Link {
        locator: Locator,
        base_url: Option<String>,
    },
}

impl Default for DetailNavigation {
    fn default() -> Self {
        Self::Popup { click: None }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SectionMatch {
    /// The N-th block is the description, another the requirements.
    ByOrder {
        block: String,
        content: Option<String>,
        #[serde(default)]
        description: usize,
        #[serde(default = "one")]
        requirements: usize,
    },
    /// Sections are keyed by the text of their heading.
    ByHeadingText {
        heading: String,
        content: String,
        /// Scope for heading + content; the heading's parent when absent.
        block: Option<String>,
        description: String,
        requirements: String,
    },
}

/// Courtesy delay between detail fetches, picked uniformly from the range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DelayRange {
    pub min_ms: u64,
    pub max_ms: u64,
}

impl Default for DelayRange {
    fn default() -> Self {
        Self {
            min_ms: 300,
            max_ms: 1600,
        }
    }
}

impl DelayRange {
    pub const NONE: DelayRange = DelayRange {
        min_ms: 0,
        max_ms: 0,
    };
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OutputConfig {
    #[serde(default)]
    pub columns: FieldNames,
    pub dedupe_by: Option<DedupeKey>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DedupeKey {
    DetailUrl,
}

/// Output column names, used verbatim for CSV headers, JSON keys and text labels.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FieldNames {
    pub title: String,
    pub company: String,
    pub category: String,
    pub location: String,
    pub tags: String,
    pub detail_url: String,
    pub description: String,
    pub requirements: String,
}

impl Default for FieldNames {
    fn default() -> Self {
        Self {
            title: "title".into(),
            company: "company".into(),
            category: "category".into(),
            location: "location".into(),
            tags: "tags".into(),
            detail_url: "detail_url".into(),
            description: "description".into(),
            requirements: "requirements".into(),
        }
    }
}

impl FieldNames {
    /// Column order shared by every output format.
    pub fn ordered(&self) -> [&str; 8] {
        [
            &self.title,
            &self.company,
            &self.category,
            &self.location,
            &self.tags,
            &self.detail_url,
            &self.description,
            &self.requirements,
        ]
    }
}

impl ListingSource {
    pub fn builtin(name: &str) -> Result<Self> {
        let (_, text) = BUILTIN_SOURCES
            .iter()
            .find(|(builtin, _)| *builtin == name)
            .ok_or_else(|| {
                ScrapeError::Config(format!(
                    "unknown source `{name}` (available: {})",
                    builtin_names().collect::<Vec<_>>().join(", ")
                ))
            })?;
        Self::from_toml_str(text)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ScrapeError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        let source: Self =
            toml::from_str(text).map_err(|e| ScrapeError::Config(e.to_string()))?;
        source.validate()?;
        Ok(source)
    }

    /// Catches definitions that would only fail halfway through a run.
    pub fn validate(&self) -> Result<()> {
        if self.url.trim().is_empty() {
            return Err(ScrapeError::Config(format!("{}: url is empty", self.name)));
        }
        if self.listing.fields.title.is_none() {
            return Err(ScrapeError::Config(format!(
                "{}: listing.fields.title is required",
                self.name
            )));
        }
        if self.locators().any(|l| l.path.contains(&0)) {
            return Err(ScrapeError::Config(format!(
                "{}: locator paths are 1-based",
                self.name
            )));
        }

        compile(&self.listing.ready)?;
        compile(&self.listing.container)?;
        compile(&format!("{} > {}", self.listing.container, self.listing.row))?;
        for css in self.locators().filter_map(|l| l.css.as_deref()) {
            compile(css)?;
        }

        match &self.pagination.total {
            TotalPages::Ratio { selector } | TotalPages::Controls { selector, .. } => {
                compile(selector)?;
            }
            TotalPages::Unknown => {}
        }
        match &self.pagination.advance {
            Some(AdvanceStrategy::Next { selector }) => {
                compile(selector)?;
            }
            Some(AdvanceStrategy::Index {
                item,
                fallback_next,
                ..
            }) => {
                compile(item)?;
                if let Some(next) = fallback_next {
                    compile(next)?;
                }
            }
            Some(AdvanceStrategy::Url { template }) if !template.contains("{page}") => {
                return Err(ScrapeError::Config(format!(
                    "{}: url template has no {{page}} placeholder",
                    self.name
                )));
            }
            _ => {}
        }
        if let Some(active) = &self.pagination.active {
            compile(&active.selector)?;
        }

        if let Some(detail) = &self.detail {
            compile(&detail.ready)?;
            if detail.delay.min_ms > detail.delay.max_ms {
                return Err(ScrapeError::Config(format!(
                    "{}: detail.delay min_ms exceeds max_ms",
                    self.name
                )));
            }
            match &detail.sections {
                SectionMatch::ByOrder { block, content, .. } => {
                    compile(block)?;
                    if let Some(content) = content {
                        compile(content)?;
                    }
                }
                SectionMatch::ByHeadingText {
                    heading,
                    content,
                    block,
                    ..
                } => {
                    compile(heading)?;
                    compile(content)?;
                    if let Some(block) = block {
                        compile(block)?;
                    }
                }
            }
        }

        Ok(())
    }

    /// Points the run at another listing URL.
    ///
    /// For URL-paged sources the page parameter is carried over onto the new
    /// URL, so later pages stay on the same listing.
    pub fn override_url(&mut self, url: &str) -> Result<()> {
        if let Some(AdvanceStrategy::Url { template }) = &mut self.pagination.advance {
            let (key, value) = page_param(template).ok_or_else(|| {
                ScrapeError::Config(format!(
                    "{}: page number is not a query parameter, cannot page from {url}",
                    self.name
                ))
            })?;
            *template = with_query_param(url, &key, &value);
        }
        self.url = url.to_string();
        Ok(())
    }

    /// URL of a page for sources paginated by query string.
    pub fn page_url(&self, page: usize) -> Option<String> {
        match &self.pagination.advance {
            Some(AdvanceStrategy::Url { template }) => {
                Some(template.replace("{page}", &page.to_string()))
            }
            _ => None,
        }
    }

    fn locators(&self) -> impl Iterator<Item = &Locator> {
        let fields = &self.listing.fields;
        let navigation = self.detail.as_ref().and_then(|d| match &d.navigation {
            DetailNavigation::Popup { click } => click.as_ref(),
            DetailNavigation::Link { locator, .. } => Some(locator),
        });
        [
            fields.title.as_ref(),
            fields.category.as_ref(),
            fields.location.as_ref(),
            fields.tags.as_ref(),
            navigation,
        ]
        .into_iter()
        .flatten()
    }
}

/// The `key=value` query pair that carries `{page}`.
fn page_param(template: &str) -> Option<(String, String)> {
    let (_, query) = template.split_once('?')?;
    let query = query.split('#').next().unwrap_or_default();
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(_, value)| value.contains("{page}"))
        .map(|(key, value)| (key.to_string(), value.to_string()))
}

/// Sets `key` in the query string of `url`, replacing an existing value.
fn with_query_param(url: &str, key: &str, value: &str) -> String {
    let (url, fragment) = match url.split_once('#') {
        Some((url, fragment)) => (url, Some(fragment)),
        None => (url, None),
    };
    let (base, query) = url.split_once('?').unwrap_or((url, ""));

    let mut pairs: Vec<String> = Vec::new();
    let mut replaced = false;
    for pair in query.split('&').filter(|pair| !pair.is_empty()) {
        if pair.split('=').next() == Some(key) {
            if !replaced {
                pairs.push(format!("{key}={value}"));
                replaced = true;
            }
        } else {
            pairs.push(pair.to_string());
        }
    }
    if !replaced {
        pairs.push(format!("{key}={value}"));
    }

    let mut result = format!("{base}?{}", pairs.join("&"));
    if let Some(fragment) = fragment {
        result.push('#');
        result.push_str(fragment);
    }
    result
}

fn any_element() -> String {
    "*".to_string()
}

fn default_listing_timeout() -> u64 {
    30
}

fn default_navigation_timeout() -> u64 {
    60
}

fn default_max_empty_pages() -> usize {
    3
}

fn default_pagination_timeout() -> u64 {
    10
}

fn default_detail_timeout() -> u64 {
    15
}

fn default_poll_ms() -> u64 {
    250
}

fn one() -> usize {
    1
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r##"
        name = "demo"
        company = "Demo Corp"
        url = "https://jobs.example.com/list"

        [listing]
        ready = "#list"
        container = "#list > .rows"

        [listing.fields.title]
        path = [1]
    "##;

    #[test]
    fn every_builtin_source_parses() {
        for name in builtin_names() {
            let source = ListingSource::builtin(name)
                .unwrap_or_else(|e| panic!("builtin `{name}` is invalid: {e}"));
            assert_eq!(source.name, name);
            assert!(!source.company.is_empty());
        }
    }

    #[test]
    fn unknown_builtin_lists_alternatives() {
        let err = ListingSource::builtin("nope").unwrap_err().to_string();
        assert!(err.contains("aliyun"));
        assert!(err.contains("qq"));
    }

    #[test]
    fn minimal_source_gets_defaults() {
        let source = ListingSource::from_toml_str(MINIMAL).unwrap();
        assert_eq!(source.listing.row, "*");
        assert_eq!(source.listing.timeout_secs, 30);
        assert!(!source.listing.zero_rows_means_exhausted);
        assert_eq!(source.listing.max_empty_pages, 3);
        assert_eq!(source.pagination.total, TotalPages::Unknown);
        assert!(source.pagination.advance.is_none());
        assert!(source.detail.is_none());
        assert_eq!(source.output.columns, FieldNames::default());
        assert_eq!(source.output.dedupe_by, None);
    }

    #[test]
    fn aliyun_uses_ratio_pagination_and_heading_sections() {
        let source = ListingSource::builtin("aliyun").unwrap();
        assert!(matches!(source.pagination.total, TotalPages::Ratio { .. }));
        assert!(matches!(
            source.pagination.advance,
            Some(AdvanceStrategy::Next { .. })
        ));
        let detail = source.detail.unwrap();
        assert!(matches!(detail.sections, SectionMatch::ByHeadingText { .. }));
        assert_eq!(source.output.columns.title, "职位");
        assert_eq!(source.output.columns.description, "岗位描述");
    }

    #[test]
    fn ant_uses_index_advance_and_order_sections() {
        let source = ListingSource::builtin("ant").unwrap();
        match source.pagination.advance {
            Some(AdvanceStrategy::Index {
                attribute,
                fallback_next,
                ..
            }) => {
                assert_eq!(attribute, "title");
                assert!(fallback_next.is_some());
            }
            other => panic!("unexpected advance strategy: {other:?}"),
        }
        match source.detail.unwrap().sections {
            SectionMatch::ByOrder {
                description,
                requirements,
                ..
            } => assert_eq!((description, requirements), (0, 1)),
            other => panic!("unexpected section match: {other:?}"),
        }
    }

    #[test]
    fn qq_pages_by_url_template() {
        let source = ListingSource::builtin("qq").unwrap();
        assert_eq!(
            source.page_url(3).as_deref(),
            Some("https://join.qq.com/post.html?query=p_3")
        );
        assert!(source.listing.zero_rows_means_exhausted);
        assert_eq!(source.page_size, Some(10));
    }

    #[test]
    fn overridden_url_keeps_its_query_on_later_pages() {
        let mut source = ListingSource::builtin("qq").unwrap();
        source
            .override_url("https://join.qq.com/post.html?query=p_1&keyword=rust")
            .unwrap();
        assert_eq!(
            source.page_url(2).as_deref(),
            Some("https://join.qq.com/post.html?query=p_2&keyword=rust")
        );

        source
            .override_url("https://join.qq.com/post.html?keyword=go#top")
            .unwrap();
        assert_eq!(
            source.page_url(3).as_deref(),
            Some("https://join.qq.com/post.html?keyword=go&query=p_3#top")
        );
    }

    #[test]
    fn url_override_needs_page_in_query() {
        let text = format!(
            "{MINIMAL}\n[pagination.advance.url]\ntemplate = \"https://jobs.example.com/list/{{page}}\"\n"
        );
        let mut source = ListingSource::from_toml_str(&text).unwrap();
        assert!(matches!(
            source.override_url("https://jobs.example.com/other"),
            Err(ScrapeError::Config(_))
        ));

        let mut plain = ListingSource::from_toml_str(MINIMAL).unwrap();
        plain.override_url("https://jobs.example.com/other").unwrap();
        assert_eq!(plain.url, "https://jobs.example.com/other");
    }

    #[test]
    fn rejects_invalid_selector() {
        let text = MINIMAL.replace("#list > .rows", "#list >> ]");
        assert!(matches!(
            ListingSource::from_toml_str(&text),
            Err(ScrapeError::Config(_))
        ));
    }

    #[test]
    fn rejects_template_without_placeholder() {
        let text = format!(
            "{MINIMAL}\n[pagination.advance.url]\ntemplate = \"https://jobs.example.com/list\"\n"
        );
        let err = ListingSource::from_toml_str(&text).unwrap_err();
        assert!(err.to_string().contains("{page}"));
    }

    #[test]
    fn rejects_missing_title() {
        let text = MINIMAL.replace("[listing.fields.title]\n        path = [1]", "");
        assert!(ListingSource::from_toml_str(&text).is_err());
    }

    #[test]
    fn locator_to_selector() {
        let locator = Locator {
            path: vec![2, 1],
            css: Some("a.link".into()),
            attribute: None,
        };
        assert_eq!(
            locator.to_selector("#list > div:nth-child(3)"),
            "#list > div:nth-child(3) > :nth-child(2) > :nth-child(1) a.link"
        );
        assert_eq!(Locator::default().to_selector("li"), "li");
    }
}
