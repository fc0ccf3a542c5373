use std::sync::LazyLock;

use galera_core::models::ExtractionRecord;
use galera_core::traits::PlatformAdapter;
use scraper::{ElementRef, Html, Selector};
use serde_json::{Map, Value, json};

static HEADING: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("h1#firstHeading").expect("valid selector"));
static BODY: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("div.mw-parser-output").expect("valid selector"));
static PARAGRAPH: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("p").expect("valid selector"));
static REFERENCE: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("ol.references > li").expect("valid selector"));

/// Adds the article heading, lead paragraph, body text and reference list
/// of a Wikipedia page.
#[derive(Debug, Clone, Default)]
pub struct WikipediaAdapter;

impl WikipediaAdapter {
    pub fn new() -> Self {
        Self
    }
}

fn text_of(element: ElementRef<'_>) -> String {
    element
        .text()
        .flat_map(|chunk| chunk.split_whitespace())
        .collect::<Vec<_>>()
        .join(" ")
}

impl PlatformAdapter for WikipediaAdapter {
    fn name(&self) -> &str {
        "wikipedia"
    }

    fn extra_fields(&self, record: &ExtractionRecord) -> Map<String, Value> {
        let document = Html::parse_document(&record.raw_html);
        let body = document.select(&BODY).next();

        let heading = document.select(&HEADING).next().map(text_of).unwrap_or_default();
        let intro = body
            .and_then(|body| {
                body.select(&PARAGRAPH)
                    .map(text_of)
                    .find(|text| !text.is_empty())
            })
            .unwrap_or_default();
        let content = body.map(text_of).unwrap_or_default();
        let references: Vec<String> = document
            .select(&REFERENCE)
            .map(text_of)
            .filter(|text| !text.is_empty())
            .collect();

        let mut fields = Map::new();
        fields.insert("wiki_title".into(), json!(heading));
        fields.insert("intro".into(), json!(intro));
        fields.insert("content".into(), json!(content));
        fields.insert("references".into(), json!(references));
        fields
    }
}
