/// Page scraping for supported platforms
///
/// A [`Scraper`] turns a submitted URL into a [`ScrapedPost`]: one image URL
/// plus whatever metadata the page exposes. Fetching goes through the
/// [`PageFetcher`] seam; the parsers themselves are synchronous functions
/// over the page HTML.
///
/// # Platforms
///
/// | URL contains | Platform | Source of data |
/// |---|---|---|
/// | `tiktok` | TikTok | `__UNIVERSAL_DATA_FOR_REHYDRATION__` JSON |
/// | `youtube.com`, `youtu.be` | YouTube | `og:title`, inline JSON, `i.ytimg.com` URLs |
/// | `instagram.com` | Instagram | `og:description`, `og:image` |
///
/// # Example
///
/// ```no_run
/// use snapshelf_worker::scraper::{HttpFetcher, Scraper};
/// use std::sync::Arc;
///
/// # async fn example() -> anyhow::Result<()> {
/// let scraper = Scraper::new(Arc::new(HttpFetcher::new()?));
/// let post = scraper.scrape("https://www.tiktok.com/@someone/video/123").await?;
/// println!("{:?} by {:?}", post.image_url, post.creator);
/// # Ok(())
/// # }
/// ```

pub mod fetcher;
pub mod instagram;
pub mod tiktok;
pub mod youtube;

pub use fetcher::{FetchedImage, HttpFetcher, PageFetcher};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Scrape failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScrapeError {
    #[error("Unsupported platform for URL: {0}")]
    UnsupportedPlatform(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("HTTP {status} from {url}")]
    Http { status: u16, url: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out")]
    Timeout,

    #[error("Failed to parse page: {0}")]
    Parse(String),

    #[error("No media found on page")]
    NoMedia,

    #[error("Image larger than {limit} bytes")]
    TooLarge { limit: usize },
}

impl ScrapeError {
    /// Whether retrying later can plausibly succeed
    pub fn is_transient(&self) -> bool {
        match self {
            ScrapeError::UnsupportedPlatform(_) | ScrapeError::InvalidUrl(_) | ScrapeError::TooLarge { .. } => false,
            ScrapeError::Http { status, .. } => *status >= 500 || *status == 429,
            ScrapeError::Network(_)
            | ScrapeError::Timeout
            | ScrapeError::Parse(_)
            | ScrapeError::NoMedia => true,
        }
    }
}

/// Supported source platforms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    TikTok,
    YouTube,
    Instagram,
}

impl Platform {
    /// Substring match on the URL, TikTok first
    pub fn detect(url: &str) -> Option<Platform> {
        if url.contains("tiktok") {
            Some(Platform::TikTok)
        } else if url.contains("youtube.com") || url.contains("youtu.be") {
            Some(Platform::YouTube)
        } else if url.contains("instagram.com") {
            Some(Platform::Instagram)
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::TikTok => "tiktok",
            Platform::YouTube => "youtube",
            Platform::Instagram => "instagram",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a page yielded
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScrapedPost {
    pub description: Option<String>,
    pub creator: Option<String>,
    pub image_url: Option<String>,
    pub tags: Vec<String>,
}

/// Validates `url` and returns its platform
///
/// Only absolute http(s) URLs are accepted.
pub fn classify_url(url: &str) -> Result<Platform, ScrapeError> {
    let parsed = url::Url::parse(url).map_err(|e| ScrapeError::InvalidUrl(format!("{}: {}", url, e)))?;
    if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
        return Err(ScrapeError::InvalidUrl(url.to_string()));
    }

    Platform::detect(url).ok_or_else(|| ScrapeError::UnsupportedPlatform(url.to_string()))
}

/// Parses already fetched HTML for `platform`
pub fn parse_page(platform: Platform, html: &str) -> Result<ScrapedPost, ScrapeError> {
    match platform {
        Platform::TikTok => tiktok::parse(html),
        Platform::YouTube => Ok(youtube::parse(html)),
        Platform::Instagram => Ok(instagram::parse(html)),
    }
}

/// URL-to-post pipeline over a [`PageFetcher`]
#[derive(Clone)]
pub struct Scraper {
    fetcher: Arc<dyn PageFetcher>,
}

impl Scraper {
    pub fn new(fetcher: Arc<dyn PageFetcher>) -> Self {
        Scraper { fetcher }
    }

    pub fn fetcher(&self) -> &Arc<dyn PageFetcher> {
        &self.fetcher
    }

    /// Fetches and parses `url`
    ///
    /// # Errors
    ///
    /// [`ScrapeError::NoMedia`] when the page parsed but had no image URL.
    pub async fn scrape(&self, url: &str) -> Result<ScrapedPost, ScrapeError> {
        let platform = classify_url(url)?;

        tracing::debug!(url, platform = %platform, "Fetching page");
        let html = self.fetcher.fetch_page(url, platform).await?;

        let post = parse_page(platform, &html)?;
        if post.image_url.as_deref().map_or(true, str::is_empty) {
            tracing::warn!(url, platform = %platform, "Page had no image");
            return Err(ScrapeError::NoMedia);
        }

        tracing::info!(
            url,
            platform = %platform,
            has_creator = post.creator.is_some(),
            has_description = post.description.is_some(),
            tags = post.tags.len(),
            "Page scraped"
        );
        Ok(post)
    }

    /// Downloads an image the page pointed at
    pub async fn download(&self, url: &str) -> Result<FetchedImage, ScrapeError> {
        self.fetcher.fetch_image(url).await
    }
}

/// Attribute `attr` of the first element matching `css`
pub(crate) fn first_attr(document: &::scraper::Html, css: &str, attr: &str) -> Option<String> {
    let selector = ::scraper::Selector::parse(css).ok()?;
    document
        .select(&selector)
        .find_map(|el| el.value().attr(attr))
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}
