/// YouTube watch and Shorts pages

use ::scraper::{Html, Selector};

use super::{first_attr, ScrapedPost};

const THUMBNAIL_PREFIX: &str = "https://i.ytimg.com/vi/";

pub fn parse(html: &str) -> ScrapedPost {
    let document = Html::parse_document(html);

    let description = first_attr(&document, r#"meta[property="og:title"]"#, "content")
        .or_else(|| title(&document));

    let creator = shorts_anchor_creator(&document)
        .or_else(|| json_string_after(html, r#""canonicalBaseUrl":"/@"#))
        .or_else(|| json_string_after(html, r#""ownerChannelName":""#));

    ScrapedPost {
        description,
        creator,
        image_url: thumbnail_url(html),
        tags: Vec::new(),
    }
}

fn title(document: &Html) -> Option<String> {
    let selector = Selector::parse("title").ok()?;
    let text: String = document.select(&selector).next()?.text().collect();
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}

/// Handle from an `href=".../@{handle}/shorts"` anchor
fn shorts_anchor_creator(document: &Html) -> Option<String> {
    let selector = Selector::parse("a[href]").ok()?;

    document.select(&selector).find_map(|a| {
        let path = a.value().attr("href")?.strip_suffix("/shorts")?;
        let segment = path.rsplit('/').next()?;
        let handle = segment.strip_prefix('@')?;
        (!handle.is_empty()).then(|| handle.to_string())
    })
}

/// Text between `marker` and the next `"`
fn json_string_after(html: &str, marker: &str) -> Option<String> {
    let start = html.find(marker)? + marker.len();
    let rest = &html[start..];
    let end = rest.find('"')?;
    let value = &rest[..end];
    (!value.is_empty()).then(|| value.to_string())
}

/// First `i.ytimg.com/vi/` URL, ending at a quote or angle bracket
fn thumbnail_url(html: &str) -> Option<String> {
    let start = html.find(THUMBNAIL_PREFIX)?;
    let rest = &html[start..];
    let end = rest
        .find(|c: char| matches!(c, '"' | '\'' | '<' | '>'))
        .unwrap_or(rest.len());
    let url = &rest[..end];
    (url.len() > THUMBNAIL_PREFIX.len()).then(|| url.to_string())
}
