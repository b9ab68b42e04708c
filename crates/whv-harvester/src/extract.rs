use std::collections::HashSet;

use ego_tree::NodeRef;
use scraper::{Html, Node, Selector};
use url::Url;

/// Boilerplate subtrees that never contribute body text.
const SKIP_TAGS: &[&str] = &["script", "style", "noscript", "nav", "header", "footer", "aside"];

/// Selectors tried in order to locate the main content region.
const CONTENT_SELECTORS: &[&str] = &["article", "main", "[role=\"main\"]"];

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Extraction {
    /// Whitespace-normalized text of the content region.
    pub text: String,
    /// Absolute http(s) image URLs from the content region, first-seen order.
    pub image_urls: Vec<Url>,
}

/// Pure HTML → (text, image URLs). Malformed markup degrades to best-effort
/// output, never an error; html5ever recovers a tree from anything.
pub fn extract(html: &str, base_url: &Url) -> Extraction {
    let doc = Html::parse_document(html);

    let region = content_region(&doc);
    let text = match region {
        Some(el) => region_text(el),
        None => String::new(),
    };
    let image_urls = match region {
        Some(el) => region_images(el, base_url),
        None => vec![],
    };

    Extraction { text, image_urls }
}

fn content_region(doc: &Html) -> Option<scraper::ElementRef<'_>> {
    for raw in CONTENT_SELECTORS {
        // The selector literals above always parse.
        let selector = Selector::parse(raw).ok()?;
        if let Some(el) = doc.select(&selector).next() {
            return Some(el);
        }
    }
    let body = Selector::parse("body").ok()?;
    doc.select(&body).next()
}

fn region_text(el: scraper::ElementRef<'_>) -> String {
    let mut raw = String::new();
    push_text(*el, &mut raw);
    normalize_whitespace(&raw)
}

fn push_text(node: NodeRef<'_, Node>, out: &mut String) {
    for child in node.children() {
        match child.value() {
            Node::Text(t) => {
                out.push_str(t);
                out.push(' ');
            }
            Node::Element(el) => {
                if !SKIP_TAGS.contains(&el.name()) {
                    push_text(child, out);
                }
            }
            _ => {}
        }
    }
}

fn normalize_whitespace(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn region_images(el: scraper::ElementRef<'_>, base_url: &Url) -> Vec<Url> {
    let Ok(img) = Selector::parse("img") else {
        return vec![];
    };
    let mut seen = HashSet::new();
    let mut urls = vec![];
    for node in el.select(&img) {
        let Some(src) = node.value().attr("src") else {
            continue;
        };
        let src = src.trim();
        if src.is_empty() {
            continue;
        }
        let Ok(resolved) = base_url.join(src) else {
            continue;
        };
        if resolved.scheme() != "http" && resolved.scheme() != "https" {
            continue;
        }
        if seen.insert(resolved.to_string()) {
            urls.push(resolved);
        }
    }
    urls
}
