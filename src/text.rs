//! Text Normalizer (C2): HTML-to-text conversion and link extraction over
//! Confluence storage-format bodies.
//!
//! Uses `scraper` (a real HTML5 DOM parser) rather than regex tag-stripping,
//! the idiomatic choice this corpus reaches for when it needs to walk actual
//! markup. Regexes are kept only where the page-id extraction rules are
//! inherently lexical.

use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Node, Selector};

/// Confluence macros whose body should be preserved, mapped from
/// `ac:name` to how they render in the normalized text.
const CODE_MACRO: &str = "code";
const PRESERVED_PANEL_MACROS: &[&str] = &["panel", "info", "warning", "note", "tip", "expand"];
const REMOVED_MACROS: &[&str] = &["toc", "toc-zone", "children", "pagetree"];

static PAGE_ID_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        Regex::new(r"pageId=(\d+)").unwrap(),
        Regex::new(r"/pages/(\d+)").unwrap(),
        Regex::new(r"/wiki/spaces/\w+/pages/(\d+)").unwrap(),
    ]
});

/// Classification of a link extracted from a page body
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkType {
    Internal,
    External,
    Attachment,
}

/// A single link discovered while normalizing a page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedLink {
    pub url: String,
    pub text: String,
    pub link_type: LinkType,
    pub page_id: Option<String>,
}

/// Convert a Confluence storage-format body to normalized plain text.
///
/// `preserve_headings` controls whether heading elements are rendered as
/// markdown (`\n\n` + `#`*level + text + `\n\n`) or flattened into plain text.
pub fn to_text(body: &str, preserve_headings: bool) -> String {
    if body.trim().is_empty() {
        return String::new();
    }
    let fragment = Html::parse_fragment(body);
    let mut out = String::new();
    for node in fragment.tree.root().children() {
        if let Some(el) = ElementRef::wrap(node) {
            render_element(&el, preserve_headings, &mut out);
        } else if let Node::Text(text) = node.value() {
            out.push_str(text);
        }
    }
    clean_text(&out)
}

fn render_element(el: &ElementRef, preserve_headings: bool, out: &mut String) {
    let tag = el.value().name();

    match tag {
        "script" | "style" => return,
        "ac:structured-macro" => {
            render_macro(el, preserve_headings, out);
            return;
        }
        "h1" | "h2" | "h3" | "h4" | "h5" | "h6" if preserve_headings => {
            let level: usize = tag[1..].parse().unwrap_or(1);
            let heading_text = collect_text(el);
            out.push_str("\n\n");
            out.push_str(&"#".repeat(level));
            out.push(' ');
            out.push_str(heading_text.trim());
            out.push_str("\n\n");
            return;
        }
        "br" => {
            out.push('\n');
            return;
        }
        "p" | "div" | "li" | "tr" => {
            render_children(el, preserve_headings, out);
            out.push('\n');
            return;
        }
        _ => {}
    }

    render_children(el, preserve_headings, out);
}

fn render_children(el: &ElementRef, preserve_headings: bool, out: &mut String) {
    for node in el.children() {
        if let Some(child) = ElementRef::wrap(node) {
            render_element(&child, preserve_headings, out);
        } else if let Node::Text(text) = node.value() {
            out.push_str(text);
        }
    }
}

fn render_macro(el: &ElementRef, preserve_headings: bool, out: &mut String) {
    let name = el.value().attr("ac:name").unwrap_or("");

    if REMOVED_MACROS.contains(&name) {
        return;
    }

    if name == CODE_MACRO {
        let body_selector = Selector::parse("ac\\:plain-text-body").unwrap();
        if let Some(body) = el.select(&body_selector).next() {
            out.push_str("\n\n```\n");
            out.push_str(collect_text(&body).trim());
            out.push_str("\n```\n\n");
        }
        return;
    }

    if PRESERVED_PANEL_MACROS.contains(&name) {
        let body_selector = Selector::parse("ac\\:rich-text-body").unwrap();
        if let Some(body) = el.select(&body_selector).next() {
            out.push('\n');
            render_children(&body, preserve_headings, out);
            out.push('\n');
        }
        return;
    }

    // Unknown macro: fall back to rendering any rich-text-body present so
    // content is not silently dropped.
    let body_selector = Selector::parse("ac\\:rich-text-body").unwrap();
    if let Some(body) = el.select(&body_selector).next() {
        render_children(&body, preserve_headings, out);
    }
}

fn collect_text(el: &ElementRef) -> String {
    el.text().collect::<Vec<_>>().join("")
}

/// Collapse repeated whitespace/newlines and trim leading/trailing
/// whitespace overall and per line.
pub fn clean_text(raw: &str) -> String {
    if raw.trim().is_empty() {
        return String::new();
    }

    let space_collapsed: String = {
        let mut result = String::with_capacity(raw.len());
        let mut last_was_space = false;
        for ch in raw.chars() {
            if ch == ' ' || ch == '\t' {
                if !last_was_space {
                    result.push(' ');
                }
                last_was_space = true;
            } else {
                result.push(ch);
                last_was_space = false;
            }
        }
        result
    };

    let lines: Vec<&str> = space_collapsed.lines().map(|line| line.trim()).collect();

    let mut collapsed_lines: Vec<&str> = Vec::with_capacity(lines.len());
    let mut blank_run = 0;
    for line in lines {
        if line.is_empty() {
            blank_run += 1;
            if blank_run <= 1 {
                collapsed_lines.push(line);
            }
        } else {
            blank_run = 0;
            collapsed_lines.push(line);
        }
    }

    collapsed_lines
        .join("\n")
        .trim_matches('\n')
        .trim()
        .to_string()
}

/// Extract and classify every link in a page body, deduping by URL and
/// dropping anchor-only, javascript-scheme and self links.
pub fn extract_links(body: &str, base_url: &str, current_page_id: &str) -> Vec<ParsedLink> {
    if body.trim().is_empty() {
        return Vec::new();
    }

    let fragment = Html::parse_fragment(body);
    let mut links = Vec::new();
    let mut seen = std::collections::HashSet::new();

    let ac_link_selector = Selector::parse("ac\\:link").unwrap();
    for el in fragment.select(&ac_link_selector) {
        if let Some(link) = parse_ac_link(&el, base_url) {
            push_unique(&mut links, &mut seen, link, current_page_id);
        }
    }

    let a_selector = Selector::parse("a[href]").unwrap();
    for el in fragment.select(&a_selector) {
        if let Some(link) = parse_anchor(&el, base_url) {
            push_unique(&mut links, &mut seen, link, current_page_id);
        }
    }

    links
}

fn push_unique(
    links: &mut Vec<ParsedLink>,
    seen: &mut std::collections::HashSet<String>,
    link: ParsedLink,
    current_page_id: &str,
) {
    if let Some(id) = &link.page_id {
        if id == current_page_id {
            return;
        }
    }
    if seen.insert(link.url.clone()) {
        links.push(link);
    }
}

fn parse_ac_link(el: &ElementRef, base_url: &str) -> Option<ParsedLink> {
    let text = {
        let body_selector = Selector::parse("ac\\:link-body, ac\\:plain-text-link-body").unwrap();
        el.select(&body_selector)
            .next()
            .map(|b| collect_text(&b).trim().to_string())
            .unwrap_or_default()
    };

    let page_selector = Selector::parse("ri\\:page").unwrap();
    if let Some(page) = el.select(&page_selector).next() {
        let title = page.value().attr("ri:content-title").unwrap_or_default();
        let url = format!("{base_url}/wiki/spaces/_/pages/{title}");
        return Some(ParsedLink {
            url,
            text,
            link_type: LinkType::Internal,
            page_id: None,
        });
    }

    let attachment_selector = Selector::parse("ri\\:attachment").unwrap();
    if let Some(attachment) = el.select(&attachment_selector).next() {
        let filename = attachment.value().attr("ri:filename").unwrap_or_default();
        let url = format!("{base_url}/attachments/{filename}");
        return Some(ParsedLink {
            url,
            text,
            link_type: LinkType::Attachment,
            page_id: None,
        });
    }

    let url_selector = Selector::parse("ri\\:url").unwrap();
    if let Some(value) = el.select(&url_selector).next() {
        let url = value.value().attr("ri:value").unwrap_or_default().to_string();
        return Some(ParsedLink {
            url,
            text,
            link_type: LinkType::External,
            page_id: None,
        });
    }

    None
}

fn parse_anchor(el: &ElementRef, base_url: &str) -> Option<ParsedLink> {
    let href = el.value().attr("href")?;

    if href.starts_with('#') || href.starts_with("javascript:") || href.is_empty() {
        return None;
    }

    let text = collect_text(el).trim().to_string();
    let page_id = extract_page_id(href);

    let is_attachment = href.starts_with("attachment:") || href.contains("/attachments/");
    let is_internal = page_id.is_some() || href.starts_with(base_url) || href.starts_with('/');

    let link_type = if is_attachment {
        LinkType::Attachment
    } else if is_internal {
        LinkType::Internal
    } else {
        LinkType::External
    };

    let url = if href.starts_with("http") {
        href.to_string()
    } else {
        format!("{base_url}{href}")
    };

    Some(ParsedLink {
        url,
        text,
        link_type,
        page_id,
    })
}

/// Extract a page id from a URL using the ordered pattern list from §4.2.
fn extract_page_id(href: &str) -> Option<String> {
    for pattern in PAGE_ID_PATTERNS.iter() {
        if let Some(caps) = pattern.captures(href) {
            return caps.get(1).map(|m| m.as_str().to_string());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = "https://wiki.example.com";
    const CURRENT: &str = "111";

    #[test]
    fn empty_body_has_no_text_and_no_links() {
        assert_eq!(to_text("", true), "");
        assert!(extract_links("", BASE, CURRENT).is_empty());
    }

    #[test]
    fn plain_text_passes_through() {
        assert_eq!(to_text("hello world", true), "hello world");
    }

    #[test]
    fn tags_are_stripped_but_text_kept() {
        let html = "<p>Hello <strong>World</strong></p>";
        assert_eq!(to_text(html, true), "Hello World");
    }

    #[test]
    fn headings_render_as_markdown_when_preserved() {
        let html = "<h2>Intro</h2><p>body</p>";
        let text = to_text(html, true);
        assert!(text.contains("## Intro"));
    }

    #[test]
    fn code_macro_is_fenced() {
        let html = r#"<ac:structured-macro ac:name="code"><ac:plain-text-body><![CDATA[fn main() {}]]></ac:plain-text-body></ac:structured-macro>"#;
        let text = to_text(html, true);
        assert!(text.contains("```"));
        assert!(text.contains("fn main"));
    }

    #[test]
    fn toc_macro_is_removed() {
        let html = r#"<ac:structured-macro ac:name="toc"/><p>kept</p>"#;
        let text = to_text(html, true);
        assert!(!text.contains("toc"));
        assert_eq!(text, "kept");
    }

    #[test]
    fn panel_macro_body_is_preserved() {
        let html = r#"<ac:structured-macro ac:name="panel"><ac:rich-text-body><p>panel text</p></ac:rich-text-body></ac:structured-macro>"#;
        let text = to_text(html, true);
        assert!(text.contains("panel text"));
    }

    #[test]
    fn script_and_style_contents_are_removed() {
        let html = "<script>alert(1)</script><style>.a{}</style><p>visible</p>";
        let text = to_text(html, true);
        assert_eq!(text, "visible");
    }

    #[test]
    fn clean_text_collapses_whitespace_and_blank_lines() {
        let raw = "a   b\n\n\n\nc  ";
        assert_eq!(clean_text(raw), "a b\n\nc");
    }

    #[test]
    fn simple_external_link_is_classified_external() {
        let html = r#"<a href="https://other.example.com/page">Other</a>"#;
        let links = extract_links(html, BASE, CURRENT);
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].link_type, LinkType::External);
    }

    #[test]
    fn internal_link_extracts_page_id() {
        let html = r#"<a href="/wiki/spaces/TEST/pages/67890/SomeTitle">Some Title</a>"#;
        let links = extract_links(html, BASE, CURRENT);
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].link_type, LinkType::Internal);
        assert_eq!(links[0].page_id.as_deref(), Some("67890"));
    }

    #[test]
    fn plain_attachment_href_is_classified_attachment() {
        let html = r#"<a href="attachment:doc.pdf">Doc</a>"#;
        let links = extract_links(html, BASE, CURRENT);
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].link_type, LinkType::Attachment);
    }

    #[test]
    fn attachments_path_href_is_classified_attachment() {
        let html = r#"<a href="/download/attachments/123/report.xlsx">Report</a>"#;
        let links = extract_links(html, BASE, CURRENT);
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].link_type, LinkType::Attachment);
    }

    #[test]
    fn viewpage_action_query_param_extracts_page_id() {
        let html = r#"<a href="/pages/viewpage.action?pageId=99999">Legacy</a>"#;
        let links = extract_links(html, BASE, CURRENT);
        assert_eq!(links[0].page_id.as_deref(), Some("99999"));
    }

    #[test]
    fn self_link_is_dropped() {
        let html = r#"<a href="/pages/111">Self</a>"#;
        let links = extract_links(html, BASE, "111");
        assert!(links.is_empty());
    }

    #[test]
    fn anchor_only_and_javascript_links_are_dropped() {
        let html = r##"<a href="#section1">jump</a><a href="javascript:void(0)">nope</a>"##;
        let links = extract_links(html, BASE, CURRENT);
        assert!(links.is_empty());
    }

    #[test]
    fn confluence_page_link_macro_is_internal() {
        let html = r#"<ac:link><ri:page ri:content-title="Other Page" /><ac:link-body>Other Page</ac:link-body></ac:link>"#;
        let links = extract_links(html, BASE, CURRENT);
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].link_type, LinkType::Internal);
        assert_eq!(links[0].text, "Other Page");
    }

    #[test]
    fn confluence_attachment_link_macro_is_attachment() {
        let html = r#"<ac:link><ri:attachment ri:filename="document.pdf" /></ac:link>"#;
        let links = extract_links(html, BASE, CURRENT);
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].link_type, LinkType::Attachment);
        assert!(links[0].url.contains("document.pdf"));
    }

    #[test]
    fn confluence_url_link_macro_is_external() {
        let html = r#"<ac:link><ri:url ri:value="https://example.com/doc" /></ac:link>"#;
        let links = extract_links(html, BASE, CURRENT);
        assert_eq!(links[0].url, "https://example.com/doc");
        assert_eq!(links[0].link_type, LinkType::External);
    }

    #[test]
    fn duplicate_urls_are_deduped() {
        let html = r#"<a href="https://other.example.com/page">A</a><a href="https://other.example.com/page">B</a>"#;
        let links = extract_links(html, BASE, CURRENT);
        assert_eq!(links.len(), 1);
    }

    #[test]
    fn mixed_content_has_both_link_types() {
        let html = r#"<a href="https://other.example.com/x">ext</a><a href="/wiki/spaces/T/pages/5/Y">int</a>"#;
        let links = extract_links(html, BASE, CURRENT);
        assert_eq!(links.len(), 2);
        assert!(links.iter().any(|l| l.link_type == LinkType::External));
        assert!(links.iter().any(|l| l.link_type == LinkType::Internal));
    }
}
