use scraper::{ElementRef, Html};
use tracing::{debug, warn};

use crate::browser::{BrowserSession, DetailHandle, DetailTab};
use crate::error::{DetailUnavailable, ExtractionError};
use crate::extract::{inner_text, Query};
use crate::models::{DetailFields, RowTarget};
use crate::source::{DetailConfig, DetailNavigation, SectionMatch};
use crate::utils::settle;
use crate::Result;

enum Sections {
    ByOrder {
        block: Query,
        content: Option<Query>,
        description: usize,
        requirements: usize,
    },
    ByHeadingText {
        heading: Query,
        content: Query,
        block: Option<Query>,
        description: String,
        requirements: String,
    },
}

/// Opens one row's detail view, reads the long-form fields and closes it again.
pub struct DetailFetcher {
    config: DetailConfig,
    sections: Sections,
}

impl DetailFetcher {
    pub fn new(config: &DetailConfig) -> Result<Self> {
        let sections = match &config.sections {
            SectionMatch::ByOrder {
                block,
                content,
                description,
                requirements,
            } => Sections::ByOrder {
                block: Query::new(block)?,
                content: content.as_deref().map(Query::new).transpose()?,
                description: *description,
                requirements: *requirements,
            },
            SectionMatch::ByHeadingText {
                heading,
                content,
                block,
                description,
                requirements,
            } => Sections::ByHeadingText {
                heading: Query::new(heading)?,
                content: Query::new(content)?,
                block: block.as_deref().map(Query::new).transpose()?,
                description: description.clone(),
                requirements: requirements.clone(),
            },
        };

        Ok(Self {
            config: config.clone(),
            sections,
        })
    }

    /// Fetches the detail fields for `row`.
    ///
    /// The secondary tab is closed before this returns, whatever happened.
    pub fn fetch<S>(
        &self,
        session: &mut S,
        row: &RowTarget,
    ) -> std::result::Result<DetailFields, DetailUnavailable>
    where
        S: BrowserSession,
    {
        let tab = match &self.config.navigation {
            DetailNavigation::Popup { .. } => {
                session.open_popup(&row.click_selector, self.config.popup_timeout())
            }
            DetailNavigation::Link { .. } => {
                let link = row.link.as_deref().ok_or(DetailUnavailable::NoLink)?;
                session.open_tab(link, self.config.popup_timeout())
            }
        }
        .map_err(DetailUnavailable::Open)?;

        let handle = DetailHandle::new(tab);
        let fields = self.read(&handle);
        if let Err(e) = handle.close() {
            warn!(row = row.index, error = %e, "failed to close detail tab");
        }
        fields
    }

    fn read<T: DetailTab>(
        &self,
        tab: &DetailHandle<T>,
    ) -> std::result::Result<DetailFields, DetailUnavailable> {
        tab.wait_for(&self.config.ready, self.config.timeout())
            .map_err(DetailUnavailable::MarkerMissing)?;
        settle(self.config.settle());

        let url = tab.url();
        let html = tab.content().map_err(DetailUnavailable::Content)?;
        let (description, requirements) = self.extract_sections(&html);
        debug!(%url, description = description.len(), requirements = requirements.len(), "detail read");

        Ok(DetailFields {
            url,
            description,
            requirements,
        })
    }

    /// Resolves description and requirements from a detail page. Either may be empty.
    pub fn extract_sections(&self, html: &str) -> (String, String) {
        let document = Html::parse_document(html);
        let read = |field: &str, result: std::result::Result<String, ExtractionError>| {
            result.unwrap_or_else(|e| {
                warn!(field, error = %e, "detail section not found");
                String::new()
            })
        };

        match &self.sections {
            Sections::ByOrder {
                block,
                content,
                description,
                requirements,
            } => {
                let blocks = block.all(&document);
                let section = |index: usize| {
                    let element = blocks.get(index).copied().ok_or_else(|| {
                        ExtractionError::NotFound {
                            selector: format!("{} #{index}", block.css()),
                        }
                    })?;
                    section_text(element, content.as_ref())
                };
                (
                    read("description", section(*description)),
                    read("requirements", section(*requirements)),
                )
            }
            Sections::ByHeadingText {
                heading,
                content,
                block,
                description,
                requirements,
            } => {
                let section = |label: &str| {
                    find_by_heading(&document, heading, content, block.as_ref(), label)
                };
                (
                    read("description", section(description.as_str())),
                    read("requirements", section(requirements.as_str())),
                )
            }
        }
    }
}

fn section_text(
    block: ElementRef<'_>,
    content: Option<&Query>,
) -> std::result::Result<String, ExtractionError> {
    let element = match content {
        Some(content) => content.first_in(block)?,
        None => block,
    };
    let text = inner_text(element);
    if text.is_empty() {
        Err(ExtractionError::Empty)
    } else {
        Ok(text)
    }
}

fn find_by_heading(
    document: &Html,
    heading: &Query,
    content: &Query,
    block: Option<&Query>,
    label: &str,
) -> std::result::Result<String, ExtractionError> {
    let not_found = || ExtractionError::NotFound {
        selector: format!("{}:contains({label})", heading.css()),
    };

    let scope = match block {
        Some(block) => block
            .all(document)
            .into_iter()
            .find(|scope| {
                heading
                    .first_in(*scope)
                    .is_ok_and(|h| inner_text(h).contains(label))
            })
            .ok_or_else(not_found)?,
        None => heading
            .all(document)
            .into_iter()
            .find(|h| inner_text(*h).contains(label))
            .and_then(|h| h.parent().and_then(ElementRef::wrap))
            .ok_or_else(not_found)?,
    };

    section_text(scope, Some(content))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::DelayRange;

    fn config(sections: SectionMatch) -> DetailConfig {
        DetailConfig {
            ready: ".detail".into(),
            navigation: DetailNavigation::default(),
            sections,
            timeout_secs: 1,
            popup_timeout_secs: 1,
            settle_ms: 0,
            delay: DelayRange::NONE,
        }
    }

    #[test]
    fn sections_by_order() {
        let fetcher = DetailFetcher::new(&config(SectionMatch::ByOrder {
            block: r#"[class^="positionDetailConditions"]"#.into(),
            content: Some("section".into()),
            description: 0,
            requirements: 1,
        }))
        .unwrap();
        let html = r#"
            <div class="positionDetailConditions--a1"><h3>职位描述</h3><section><p>负责支付核心链路</p><p>保障稳定性</p></section></div>
            <div class="positionDetailConditions--b2"><h3>职位要求</h3><section>本科及以上学历</section></div>
        "#;
        let (description, requirements) = fetcher.extract_sections(html);
        assert_eq!(description, "负责支付核心链路\n保障稳定性");
        assert_eq!(requirements, "本科及以上学历");
    }

    #[test]
    fn sections_by_order_missing_block_is_empty() {
        let fetcher = DetailFetcher::new(&config(SectionMatch::ByOrder {
            block: ".cond".into(),
            content: None,
            description: 0,
            requirements: 1,
        }))
        .unwrap();
        let (description, requirements) =
            fetcher.extract_sections(r#"<div class="cond">只有描述</div>"#);
        assert_eq!(description, "只有描述");
        assert_eq!(requirements, "");
    }

    #[test]
    fn sections_by_heading_under_parent() {
        let fetcher = DetailFetcher::new(&config(SectionMatch::ByHeadingText {
            heading: "div.card-header".into(),
            content: "div.main".into(),
            block: None,
            description: "职位描述".into(),
            requirements: "职位要求".into(),
        }))
        .unwrap();
        // requirements come first on the page; matching is by heading, not order
        let html = r#"
            <div class="deep-campus-position-detail">
              <div class="card"><div class="card-header">职位要求</div><div class="main">熟悉分布式系统<br>有开源经验优先</div></div>
              <div class="card"><div class="card-header">职位描述</div><div class="main">参与淘宝搜索研发</div></div>
              <div class="card"><div class="card-header">工作地点</div><div class="main">杭州</div></div>
            </div>
        "#;
        let (description, requirements) = fetcher.extract_sections(html);
        assert_eq!(description, "参与淘宝搜索研发");
        assert_eq!(requirements, "熟悉分布式系统\n有开源经验优先");
    }

    #[test]
    fn sections_by_heading_within_block() {
        let fetcher = DetailFetcher::new(&config(SectionMatch::ByHeadingText {
            heading: ".subtitle".into(),
            content: ".detail_text".into(),
            block: Some("ul.post_detail > li.detail_box".into()),
            description: "岗位职责".into(),
            requirements: "岗位要求".into(),
        }))
        .unwrap();
        let html = r#"
            <ul class="post_detail">
              <li class="detail_box"><h4 class="subtitle">岗位职责</h4><div class="text_box"><p class="detail_text">负责微信后台开发</p></div></li>
              <li class="detail_box"><h4 class="subtitle">岗位要求</h4><div class="detail_text">熟悉 C++</div></li>
            </ul>
        "#;
        let (description, requirements) = fetcher.extract_sections(html);
        assert_eq!(description, "负责微信后台开发");
        assert_eq!(requirements, "熟悉 C++");
    }

    #[test]
    fn unknown_heading_is_empty() {
        let fetcher = DetailFetcher::new(&config(SectionMatch::ByHeadingText {
            heading: "h2".into(),
            content: "p".into(),
            block: None,
            description: "职位描述".into(),
            requirements: "职位要求".into(),
        }))
        .unwrap();
        let (description, requirements) =
            fetcher.extract_sections("<div><h2>公司介绍</h2><p>...</p></div>");
        assert_eq!((description.as_str(), requirements.as_str()), ("", ""));
    }
}
