/// TikTok video and photo-slide pages
///
/// The post lives in the rehydration JSON under
/// `__DEFAULT_SCOPE__."webapp.video-detail".itemInfo.itemStruct`; photo
/// slides use `webapp.reflow.video.detail` instead.

use ::scraper::{Html, Selector};
use serde_json::Value;

use super::{ScrapeError, ScrapedPost};

const DATA_SCRIPT: &str = "script#__UNIVERSAL_DATA_FOR_REHYDRATION__";

const ITEM_STRUCT_PATHS: [&str; 2] = [
    "/__DEFAULT_SCOPE__/webapp.video-detail/itemInfo/itemStruct",
    "/__DEFAULT_SCOPE__/webapp.reflow.video.detail/itemInfo/itemStruct",
];

pub fn parse(html: &str) -> Result<ScrapedPost, ScrapeError> {
    let document = Html::parse_document(html);
    let selector = Selector::parse(DATA_SCRIPT).map_err(|e| ScrapeError::Parse(e.to_string()))?;

    let Some(script) = document.select(&selector).next() else {
        tracing::warn!("TikTok page has no rehydration data");
        return Ok(ScrapedPost::default());
    };

    let raw: String = script.text().collect();
    let data: Value = serde_json::from_str(&raw)
        .map_err(|e| ScrapeError::Parse(format!("rehydration JSON: {}", e)))?;

    let Some(item) = ITEM_STRUCT_PATHS
        .iter()
        .filter_map(|path| data.pointer(path))
        .find(|v| v.as_object().is_some_and(|o| !o.is_empty()))
    else {
        tracing::warn!("TikTok rehydration data has no item");
        return Ok(ScrapedPost::default());
    };

    Ok(ScrapedPost {
        description: string_at(item, "/desc"),
        creator: string_at(item, "/author/uniqueId"),
        image_url: string_at(item, "/video/cover"),
        tags: collect_tags(item),
    })
}

fn string_at(value: &Value, pointer: &str) -> Option<String> {
    value
        .pointer(pointer)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// `diversificationLabels` then `suggestedWords`, deduplicated in order
fn collect_tags(item: &Value) -> Vec<String> {
    let mut tags: Vec<String> = Vec::new();

    for field in ["diversificationLabels", "suggestedWords"] {
        let Some(values) = item.get(field).and_then(Value::as_array) else {
            continue;
        };
        for tag in values.iter().filter_map(Value::as_str).map(str::trim) {
            if !tag.is_empty() && !tags.iter().any(|t| t == tag) {
                tags.push(tag.to_string());
            }
        }
    }

    tags
}
