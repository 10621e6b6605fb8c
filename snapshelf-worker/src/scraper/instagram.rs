/// Instagram posts and reels
///
/// Everything comes from the Open Graph tags. `og:description` reads like
/// `123 likes, 4 comments - someone on May 1, 2025: "the caption"`.

use ::scraper::Html;

use super::{first_attr, ScrapedPost};

pub fn parse(html: &str) -> ScrapedPost {
    let document = Html::parse_document(html);
    let og_description = first_attr(&document, r#"meta[property="og:description"]"#, "content");

    ScrapedPost {
        description: og_description.as_deref().and_then(caption),
        creator: og_description.as_deref().and_then(username),
        image_url: first_attr(&document, r#"meta[property="og:image"]"#, "content"),
        tags: Vec::new(),
    }
}

/// Text between `comments - ` and the following ` on `
pub fn username(text: &str) -> Option<String> {
    const START: &str = "comments - ";
    const END: &str = " on ";

    let start = text.find(START)? + START.len();
    let end = text[start..].find(END)? + start;
    let name = &text[start..end];
    (!name.is_empty()).then(|| name.to_string())
}

/// Text after `: "` (or the first `"`) up to the last `"`
pub fn caption(text: &str) -> Option<String> {
    let start = match text.find(": \"") {
        Some(i) => i + 3,
        None => text.find('"')? + 1,
    };
    let end = text.rfind('"')?;
    (end > start).then(|| text[start..end].to_string())
}
