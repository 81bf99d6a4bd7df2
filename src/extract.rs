//! Field-level primitives over a parsed HTML snapshot.
//!
//! Every read returns `Result<_, ExtractionError>`; callers decide whether a failure
//! becomes a placeholder (see [`crate::error::recover_field`]) or stops the run.

use scraper::{ElementRef, Html, Node, Selector};

use crate::error::{ExtractionError, ScrapeError};
use crate::source::Locator;
use crate::utils::{normalize_lines, normalize_whitespace};
use crate::Result;

const BLOCK_TAGS: &[&str] = &[
    "address", "article", "aside", "blockquote", "dd", "div", "dl", "dt", "footer", "h1",
    "h2", "h3", "h4", "h5", "h6", "header", "li", "ol", "p", "pre", "section", "table",
    "tr", "ul",
];

pub fn compile(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| ScrapeError::Config(format!("bad selector `{css}`: {e:?}")))
}

/// A compiled selector that remembers its source text for diagnostics.
#[derive(Debug, Clone)]
pub struct Query {
    css: String,
    selector: Selector,
}

impl Query {
    pub fn new(css: &str) -> Result<Self> {
        Ok(Self {
            css: css.to_string(),
            selector: compile(css)?,
        })
    }

    pub fn css(&self) -> &str {
        &self.css
    }

    pub fn first<'a>(&self, document: &'a Html) -> Result<ElementRef<'a>, ExtractionError> {
        document
            .select(&self.selector)
            .next()
            .ok_or_else(|| self.not_found())
    }

    pub fn all<'a>(&self, document: &'a Html) -> Vec<ElementRef<'a>> {
        document.select(&self.selector).collect()
    }

    pub fn first_in<'a>(&self, scope: ElementRef<'a>) -> Result<ElementRef<'a>, ExtractionError> {
        scope
            .select(&self.selector)
            .next()
            .ok_or_else(|| self.not_found())
    }

    pub fn all_in<'a>(&self, scope: ElementRef<'a>) -> Vec<ElementRef<'a>> {
        scope.select(&self.selector).collect()
    }

    pub fn matches(&self, element: &ElementRef<'_>) -> bool {
        self.selector.matches(element)
    }

    pub fn count(&self, document: &Html) -> usize {
        document.select(&self.selector).count()
    }

    fn not_found(&self) -> ExtractionError {
        ExtractionError::NotFound {
            selector: self.css.clone(),
        }
    }
}

/// A [`Locator`] with its CSS compiled.
#[derive(Debug, Clone)]
pub struct CompiledLocator {
    path: Vec<usize>,
    query: Option<Query>,
    attribute: Option<String>,
}

impl CompiledLocator {
    pub fn new(locator: &Locator) -> Result<Self> {
        Ok(Self {
            path: locator.path.clone(),
            query: locator.css.as_deref().map(Query::new).transpose()?,
            attribute: locator.attribute.clone(),
        })
    }

    /// Reads the first match as one line of text (or the attribute).
    pub fn read(&self, scope: ElementRef<'_>) -> Result<String, ExtractionError> {
        let base = self.walk(scope)?;
        let element = match &self.query {
            Some(query) => query.first_in(base)?,
            None => base,
        };
        self.value(element)
    }

    /// Reads every match; failed reads of individual matches are skipped.
    pub fn read_all(&self, scope: ElementRef<'_>) -> Result<Vec<String>, ExtractionError> {
        let base = self.walk(scope)?;
        let elements = match &self.query {
            Some(query) => query.all_in(base),
            None => vec![base],
        };
        Ok(elements
            .into_iter()
            .filter_map(|element| self.value(element).ok())
            .collect())
    }

    fn walk<'a>(&self, scope: ElementRef<'a>) -> Result<ElementRef<'a>, ExtractionError> {
        self.path
            .iter()
            .try_fold(scope, |element, &index| nth_element_child(element, index))
    }

    fn value(&self, element: ElementRef<'_>) -> Result<String, ExtractionError> {
        match &self.attribute {
            Some(attribute) => element
                .value()
                .attr(attribute)
                .map(|value| value.trim().to_string())
                .ok_or_else(|| ExtractionError::MissingAttribute {
                    attribute: attribute.clone(),
                }),
            None => {
                let text = line_text(element);
                if text.is_empty() {
                    Err(ExtractionError::Empty)
                } else {
                    Ok(text)
                }
            }
        }
    }
}

/// 1-based, counting element children only (like `:nth-child`).
pub fn nth_element_child(
    element: ElementRef<'_>,
    index: usize,
) -> Result<ElementRef<'_>, ExtractionError> {
    index
        .checked_sub(1)
        .and_then(|skip| element.children().filter_map(ElementRef::wrap).nth(skip))
        .ok_or_else(|| ExtractionError::NotFound {
            selector: format!(":nth-child({index})"),
        })
}

/// Position of `element` among its element siblings, 1-based.
pub fn child_position(element: ElementRef<'_>) -> usize {
    element
        .prev_siblings()
        .filter(|sibling| sibling.value().is_element())
        .count()
        + 1
}

/// All text under `element` on one line.
pub fn line_text(element: ElementRef<'_>) -> String {
    normalize_whitespace(&element.text().collect::<String>())
}

/// Text under `element` with block boundaries and `<br>` kept as line breaks,
/// roughly what a browser reports as `innerText`.
pub fn inner_text(element: ElementRef<'_>) -> String {
    let mut raw = String::new();
    render_text(element, &mut raw);
    normalize_lines(&raw)
}

fn render_text(element: ElementRef<'_>, out: &mut String) {
    for child in element.children() {
        match child.value() {
            Node::Text(text) => out.push_str(text),
            Node::Element(el) => {
                let name = el.name();
                if name == "br" {
                    out.push('\n');
                    continue;
                }
                if matches!(name, "script" | "style" | "template") {
                    continue;
                }
                let Some(child) = ElementRef::wrap(child) else {
                    continue;
                };
                let block = BLOCK_TAGS.contains(&name);
                if block {
                    out.push('\n');
                }
                render_text(child, out);
                if block {
                    out.push('\n');
                }
            }
            _ => {}
        }
    }
}
