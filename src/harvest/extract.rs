//! Article extraction from the aggregator's rendered markup.
//!
//! The page is a grid of source blocks: each block has an `h3` heading
//! (the source name, usually inside a link) followed by a `ul` of article
//! links.

use scraper::node::Node;
use scraper::{ElementRef, Html, Selector};
use url::Url;

use super::ExtractError;
use crate::models::{Article, SourceGroup};

/// Name used when a heading has no link text.
pub const UNKNOWN_SOURCE: &str = "Unknown Source";

/// Group the articles on an aggregator page by source.
///
/// Sources appear in page order. A heading without a following list
/// yields a source with no articles; a heading repeated later on the page
/// replaces the earlier list. Items without a usable title or an
/// absolute http(s) link are skipped.
pub fn extract(html: &str, page_url: &Url) -> Result<SourceGroup, ExtractError> {
    let document = Html::parse_document(html);

    let grid_sel = Selector::parse("div.brutal-grid").unwrap();
    let heading_sel = Selector::parse("div.brutal-grid > div > h3").unwrap();
    let link_sel = Selector::parse("a").unwrap();
    let item_sel = Selector::parse("li").unwrap();

    if document.select(&grid_sel).next().is_none() {
        return Err(ExtractError::SkeletonMissing);
    }

    let base_url = document_base(&document, page_url);
    let mut group = SourceGroup::new();

    for heading in document.select(&heading_sel) {
        let source_name = heading
            .select(&link_sel)
            .next()
            .map(|a| first_line(&inner_text(&a)))
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| UNKNOWN_SOURCE.to_string());

        let items = group.insert_source(source_name.clone());

        let Some(list) = heading.next_siblings().find_map(ElementRef::wrap) else {
            continue;
        };
        if list.value().name() != "ul" {
            continue;
        }

        for item in list.select(&item_sel) {
            let Some(anchor) = item.select(&link_sel).next() else {
                continue;
            };

            let Some(href) = anchor.value().attr("href") else {
                continue;
            };

            let title = first_line(&inner_text(&anchor));
            if title.is_empty() {
                continue;
            }

            let link = match base_url.join(href.trim()) {
                Ok(u) => u,
                Err(_) => continue,
            };
            if !matches!(link.scheme(), "http" | "https") {
                continue;
            }

            items.push(Article::new(title, link, source_name.as_str()));
        }
    }

    Ok(group)
}

/// Base for relative links: `<base href>` if present, else the page URL.
fn document_base(document: &Html, page_url: &Url) -> Url {
    let base_sel = Selector::parse("base[href]").unwrap();
    document
        .select(&base_sel)
        .next()
        .and_then(|base| base.value().attr("href"))
        .and_then(|href| page_url.join(href.trim()).ok())
        .unwrap_or_else(|| page_url.clone())
}

/// Rendered text of an element: whitespace runs collapse to one space,
/// `br` and block elements break lines.
fn inner_text(element: &ElementRef) -> String {
    let mut text = String::new();
    collect_text(element, &mut text);
    text
}

fn collect_text(element: &ElementRef, text: &mut String) {
    const BLOCK_TAGS: &[&str] = &["p", "div", "li", "ul", "ol", "h1", "h2", "h3", "h4", "h5", "h6"];
    const SKIP_TAGS: &[&str] = &["script", "style", "noscript", "template"];

    for child in element.children() {
        match child.value() {
            Node::Text(t) => {
                let mut pending_space = false;
                for ch in t.text.chars() {
                    if ch.is_whitespace() {
                        pending_space = true;
                    } else {
                        if pending_space && needs_space(text) {
                            text.push(' ');
                        }
                        pending_space = false;
                        text.push(ch);
                    }
                }
                if pending_space && needs_space(text) {
                    text.push(' ');
                }
            }
            Node::Element(el) => {
                let tag = el.name();
                if tag == "br" {
                    text.push('\n');
                    continue;
                }
                if SKIP_TAGS.contains(&tag) {
                    continue;
                }
                if let Some(child_ref) = ElementRef::wrap(child) {
                    let is_block = BLOCK_TAGS.contains(&tag);
                    if is_block {
                        text.push('\n');
                    }
                    collect_text(&child_ref, text);
                    if is_block {
                        text.push('\n');
                    }
                }
            }
            _ => {}
        }
    }
}

fn needs_space(text: &str) -> bool {
    !text.is_empty() && !text.ends_with(|c: char| c == '\n' || c == ' ')
}

/// Trimmed text up to the first line break.
fn first_line(text: &str) -> String {
    text.trim()
        .split('\n')
        .next()
        .unwrap_or_default()
        .trim()
        .to_string()
}
