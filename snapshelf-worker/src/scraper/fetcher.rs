/// Page and image fetching
///
/// [`PageFetcher`] is the seam between scraping logic and whatever renders
/// pages. [`HttpFetcher`] issues plain HTTP requests with browser-like
/// headers; a headless-browser backend can implement the same trait.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, CONTENT_TYPE, USER_AGENT};
use reqwest::redirect::Policy;
use reqwest::Client;
use std::time::Duration;

use super::{Platform, ScrapeError};

/// Page request timeout
pub const PAGE_TIMEOUT: Duration = Duration::from_secs(20);

/// Image download timeout
pub const IMAGE_TIMEOUT: Duration = Duration::from_secs(30);

const MAX_REDIRECTS: usize = 10;

/// Largest image body read into memory
pub const MAX_IMAGE_BYTES: usize = 20 * 1024 * 1024;

/// Used when the image response has no content type
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

const DESKTOP_UA: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";
const IPHONE_UA: &str = "Mozilla/5.0 (iPhone; CPU iPhone OS 17_0 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.0 Mobile/15E148 Safari/604.1";
const ANDROID_UA: &str = "Mozilla/5.0 (Linux; Android 10; K) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/114.0.0.0 Mobile Safari/537.36";

/// A downloaded image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedImage {
    pub bytes: Bytes,
    /// Content type without parameters
    pub content_type: String,
}

#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// Returns the page HTML
    async fn fetch_page(&self, url: &str, platform: Platform) -> Result<String, ScrapeError>;

    /// Downloads an image, following redirects
    async fn fetch_image(&self, url: &str) -> Result<FetchedImage, ScrapeError>;
}

/// User agent each platform serves the most complete markup to
pub fn user_agent_for(platform: Platform) -> &'static str {
    match platform {
        Platform::TikTok => IPHONE_UA,
        Platform::YouTube => ANDROID_UA,
        Platform::Instagram => DESKTOP_UA,
    }
}

/// Fetcher over `reqwest`
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    pages: Client,
    images: Client,
    max_image_bytes: usize,
}

impl HttpFetcher {
    pub fn new() -> Result<Self, ScrapeError> {
        Self::with_timeouts(PAGE_TIMEOUT, IMAGE_TIMEOUT)
    }

    pub fn with_timeouts(page_timeout: Duration, image_timeout: Duration) -> Result<Self, ScrapeError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));
        headers.insert(
            ACCEPT,
            HeaderValue::from_static(
                "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,image/apng,*/*;q=0.8",
            ),
        );

        let pages = Client::builder()
            .default_headers(headers)
            .user_agent(DESKTOP_UA)
            .timeout(page_timeout)
            .redirect(Policy::limited(MAX_REDIRECTS))
            .build()
            .map_err(|e| ScrapeError::Network(e.to_string()))?;

        let images = Client::builder()
            .user_agent(DESKTOP_UA)
            .timeout(image_timeout)
            .redirect(Policy::limited(MAX_REDIRECTS))
            .build()
            .map_err(|e| ScrapeError::Network(e.to_string()))?;

        Ok(HttpFetcher {
            pages,
            images,
            max_image_bytes: MAX_IMAGE_BYTES,
        })
    }

    pub fn with_max_image_bytes(mut self, limit: usize) -> Self {
        self.max_image_bytes = limit;
        self
    }
}

fn map_reqwest_error(err: reqwest::Error) -> ScrapeError {
    if err.is_timeout() {
        ScrapeError::Timeout
    } else if let Some(status) = err.status() {
        ScrapeError::Http {
            status: status.as_u16(),
            url: err.url().map(|u| u.to_string()).unwrap_or_default(),
        }
    } else {
        ScrapeError::Network(err.to_string())
    }
}

fn check_status(response: &reqwest::Response) -> Result<(), ScrapeError> {
    let status = response.status();
    if status.is_success() {
        Ok(())
    } else {
        Err(ScrapeError::Http {
            status: status.as_u16(),
            url: response.url().to_string(),
        })
    }
}

/// `image/jpeg; charset=binary` → `image/jpeg`
pub fn normalize_content_type(raw: &str) -> String {
    let essence = raw.split(';').next().unwrap_or("").trim().to_ascii_lowercase();
    if essence.is_empty() {
        DEFAULT_CONTENT_TYPE.to_string()
    } else {
        essence
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch_page(&self, url: &str, platform: Platform) -> Result<String, ScrapeError> {
        let response = self
            .pages
            .get(url)
            .header(USER_AGENT, user_agent_for(platform))
            .send()
            .await
            .map_err(map_reqwest_error)?;

        check_status(&response)?;
        response.text().await.map_err(map_reqwest_error)
    }

    async fn fetch_image(&self, url: &str) -> Result<FetchedImage, ScrapeError> {
        let mut response = self.images.get(url).send().await.map_err(map_reqwest_error)?;
        check_status(&response)?;

        let limit = self.max_image_bytes;
        if response.content_length().is_some_and(|len| len > limit as u64) {
            return Err(ScrapeError::TooLarge { limit });
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(normalize_content_type)
            .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string());

        // Content-Length may be absent or wrong; enforce the limit while reading
        let mut body = BytesMut::new();
        while let Some(chunk) = response.chunk().await.map_err(map_reqwest_error)? {
            if body.len() + chunk.len() > limit {
                return Err(ScrapeError::TooLarge { limit });
            }
            body.extend_from_slice(&chunk);
        }
        let bytes: Bytes = body.freeze();
        tracing::debug!(url, content_type = %content_type, size = bytes.len(), "Image downloaded");

        Ok(FetchedImage { bytes, content_type })
    }
}
