//! Pure extractors from parsed documents to typed record fields.
//!
//! All URL-valued fields are resolved against the document base: `<base href>`
//! when present, the page URL otherwise. Values that are empty or cannot be
//! joined are skipped; order follows the document and nothing is de-duplicated.

use chrono::Utc;
use scraper::{ElementRef, Html, Selector};
use url::Url;

use crate::error::AppError;
use crate::models::{
    ApiPayload, CapturedExchange, ExtractionRecord, FetchMode, FrameContent, Image, Link,
    ShadowContent, Video,
};
use crate::traits::{FrameDocument, ShadowRootHtml};

const TEXT_SELECTOR: &str = "p, h1, h2, h3, h4, h5, h6";

/// Parses a selector, logging and returning `None` on failure.
fn selector(css: &str) -> Option<Selector> {
    match Selector::parse(css) {
        Ok(selector) => Some(selector),
        Err(e) => {
            let err = AppError::ExtractionError(format!("Invalid selector '{css}': {e}"));
            tracing::warn!(component = "extract", error = %err, "Field degraded to empty");
            None
        }
    }
}

fn normalized_text(element: ElementRef<'_>) -> String {
    element
        .text()
        .flat_map(|chunk| chunk.split_whitespace())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Joins `value` onto `base`, skipping empty or unresolvable values.
fn resolve(base: Option<&Url>, value: &str) -> Option<String> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    match base {
        Some(base) => base.join(value).ok().map(String::from),
        None => Url::parse(value).ok().map(String::from),
    }
}

/// The URL relative references resolve against.
pub fn document_base(doc: &Html, page_url: &str) -> Option<Url> {
    let page = Url::parse(page_url).ok();
    let base_href = selector("base[href]").and_then(|sel| {
        doc.select(&sel)
            .next()
            .and_then(|el| el.value().attr("href"))
            .map(str::to_string)
    });

    match (base_href, page) {
        (Some(href), Some(page)) => page.join(href.trim()).ok().or(Some(page)),
        (Some(href), None) => Url::parse(href.trim()).ok(),
        (None, page) => page,
    }
}

/// First `<title>`, trimmed.
pub fn extract_title(doc: &Html) -> String {
    selector("title")
        .and_then(|sel| doc.select(&sel).next().map(normalized_text))
        .unwrap_or_default()
}

/// Whitespace-normalized text of paragraphs and headings, in document order.
pub fn extract_text(doc: &Html) -> String {
    let Some(sel) = selector(TEXT_SELECTOR) else {
        return String::new();
    };
    doc.select(&sel)
        .map(normalized_text)
        .filter(|text| !text.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn extract_links(doc: &Html, base: Option<&Url>) -> Vec<Link> {
    let Some(sel) = selector("a[href]") else {
        return Vec::new();
    };
    doc.select(&sel)
        .filter_map(|a| {
            let href = resolve(base, a.value().attr("href")?)?;
            Some(Link {
                href,
                text: normalized_text(a),
            })
        })
        .collect()
}

pub fn extract_images(doc: &Html, base: Option<&Url>) -> Vec<Image> {
    let Some(sel) = selector("img[src]") else {
        return Vec::new();
    };
    doc.select(&sel)
        .filter_map(|img| {
            let el = img.value();
            let src = resolve(base, el.attr("src")?)?;
            Some(Image {
                src,
                alt: el.attr("alt").unwrap_or_default().trim().to_string(),
            })
        })
        .collect()
}

/// `<video src>` or its first `<source src>` child.
pub fn extract_videos(doc: &Html, base: Option<&Url>) -> Vec<Video> {
    let (Some(video_sel), Some(source_sel)) = (selector("video"), selector("source[src]")) else {
        return Vec::new();
    };
    doc.select(&video_sel)
        .filter_map(|video| {
            let raw_src = video
                .value()
                .attr("src")
                .filter(|s| !s.trim().is_empty())
                .or_else(|| {
                    video
                        .select(&source_sel)
                        .next()
                        .and_then(|source| source.value().attr("src"))
                })?;
            let src = resolve(base, raw_src)?;
            let poster = video
                .value()
                .attr("poster")
                .and_then(|poster| resolve(base, poster));
            Some(Video { src, poster })
        })
        .collect()
}

/// JSON-decodes captured bodies; undecodable ones are dropped.
pub fn extract_api_payloads(exchanges: &[CapturedExchange]) -> Vec<ApiPayload> {
    exchanges
        .iter()
        .filter_map(|exchange| {
            serde_json::from_str(&exchange.body)
                .ok()
                .map(|data| ApiPayload {
                    url: exchange.url.clone(),
                    data,
                })
        })
        .collect()
}

/// Title, text, links, images and videos of one page.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageContent {
    pub title: String,
    pub text: String,
    pub links: Vec<Link>,
    pub images: Vec<Image>,
    pub videos: Vec<Video>,
}

pub fn extract_page(html: &str, page_url: &str) -> PageContent {
    let doc = Html::parse_document(html);
    let base = document_base(&doc, page_url);
    PageContent {
        title: extract_title(&doc),
        text: extract_text(&doc),
        links: extract_links(&doc, base.as_ref()),
        images: extract_images(&doc, base.as_ref()),
        videos: extract_videos(&doc, base.as_ref()),
    }
}

/// Builds a record with every optional field unset.
pub fn build_record(url: &str, final_url: &str, fetch_mode: FetchMode, html: String) -> ExtractionRecord {
    let page = extract_page(&html, final_url);
    ExtractionRecord {
        url: url.to_string(),
        final_url: final_url.to_string(),
        fetch_mode,
        title: page.title,
        text: page.text,
        links: page.links,
        images: page.images,
        videos: page.videos,
        iframes: None,
        shadow_dom: None,
        xhr_payloads: None,
        cookies: None,
        local_storage: None,
        status_code: None,
        headers: None,
        timestamp: Utc::now(),
        raw_html: html,
        extra: serde_json::Map::new(),
    }
}

pub fn frame_content(frame: FrameDocument) -> FrameContent {
    let page = extract_page(&frame.html, &frame.url);
    FrameContent {
        url: frame.url,
        text: page.text,
        links: page.links,
        images: page.images,
        html: frame.html,
    }
}

/// Parses a shadow root's inner HTML as a detached fragment.
pub fn shadow_content(root: ShadowRootHtml, page_url: &str) -> ShadowContent {
    let fragment = Html::parse_fragment(&root.html);
    let base = Url::parse(page_url).ok();
    ShadowContent {
        host_id: root.host_id,
        text: extract_text(&fragment),
        links: extract_links(&fragment, base.as_ref()),
        images: extract_images(&fragment, base.as_ref()),
        html: root.html,
    }
}
