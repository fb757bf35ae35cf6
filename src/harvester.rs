//! Page harvesting for the survey listing.
//!
//! A `PageSource` hands back the raw markup of one listing page. The HTTP
//! implementation sends a fixed identifying header set and decodes the body
//! lossily; it never retries. Any failure is returned to the scrape driver,
//! which aborts the run.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT_LANGUAGE, REFERER, USER_AGENT};
use std::time::Duration;
use tracing::debug;

/// Site root; relative result links are resolved against it.
pub const BASE_URL: &str = "https://www.thegradcafe.com";

/// Listing endpoint, paginated with `page` and `pp`.
pub const SURVEY_URL: &str = "https://www.thegradcafe.com/survey/";

pub const SCRAPER_USER_AGENT: &str = "GradCafeScraper/1.0";

/// Errors raised while fetching a listing page.
#[derive(Debug, thiserror::Error)]
pub enum HarvestError {
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("request for {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },
}

/// Anything that can produce the markup of a listing page.
#[async_trait]
pub trait PageSource: Send + Sync {
    /// Fetch page `page` (1-based) holding `per_page` results.
    async fn fetch_page(&self, page: u32, per_page: u32) -> Result<String, HarvestError>;
}

/// Fetches listing pages from the live survey site.
pub struct HttpHarvester {
    client: reqwest::Client,
    survey_url: String,
}

impl HttpHarvester {
    pub fn new() -> Result<Self, HarvestError> {
        Self::with_survey_url(SURVEY_URL, BASE_URL)
    }

    /// Point the harvester at another listing endpoint (a mirror or a test server).
    pub fn with_survey_url(survey_url: &str, referer: &str) -> Result<Self, HarvestError> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static(SCRAPER_USER_AGENT));
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));
        if let Ok(value) = HeaderValue::from_str(referer) {
            headers.insert(REFERER, value);
        }

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(HarvestError::Client)?;

        Ok(Self {
            client,
            survey_url: survey_url.to_string(),
        })
    }

    pub fn page_url(&self, page: u32, per_page: u32) -> String {
        format!("{}?page={}&pp={}", self.survey_url, page, per_page)
    }
}

#[async_trait]
impl PageSource for HttpHarvester {
    async fn fetch_page(&self, page: u32, per_page: u32) -> Result<String, HarvestError> {
        let url = self.page_url(page, per_page);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|source| HarvestError::Request {
                url: url.clone(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(HarvestError::Status {
                url,
                status: status.as_u16(),
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|source| HarvestError::Request {
                url: url.clone(),
                source,
            })?;

        debug!(page, bytes = bytes.len(), "fetched listing page");

        // Invalid byte sequences are replaced, never fatal
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, headers, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_page_url() {
        let harvester = HttpHarvester::new().unwrap();
        assert_eq!(
            harvester.page_url(3, 100),
            "https://www.thegradcafe.com/survey/?page=3&pp=100"
        );
    }

    #[tokio::test]
    async fn test_fetch_page_sends_pagination_and_headers() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/survey/"))
            .and(query_param("page", "2"))
            .and(query_param("pp", "50"))
            .and(header("user-agent", SCRAPER_USER_AGENT))
            // the matcher compares comma-separated values one by one
            .and(headers("accept-language", vec!["en-US", "en;q=0.9"]))
            .and(header("referer", server.uri().as_str()))
            .respond_with(ResponseTemplate::new(200).set_body_string("<table></table>"))
            .expect(1)
            .mount(&server)
            .await;

        let survey_url = format!("{}/survey/", server.uri());
        let harvester = HttpHarvester::with_survey_url(&survey_url, &server.uri()).unwrap();

        let body = harvester.fetch_page(2, 50).await.unwrap();
        assert_eq!(body, "<table></table>");
    }

    #[tokio::test]
    async fn test_fetch_page_tolerates_invalid_utf8() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![b'o', b'k', 0xFF, b'!']))
            .mount(&server)
            .await;

        let harvester = HttpHarvester::with_survey_url(&server.uri(), &server.uri()).unwrap();

        let body = harvester.fetch_page(1, 100).await.unwrap();
        assert!(body.starts_with("ok"));
        assert!(body.ends_with('!'));
    }

    #[tokio::test]
    async fn test_fetch_page_http_error_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let harvester = HttpHarvester::with_survey_url(&server.uri(), &server.uri()).unwrap();

        let err = harvester.fetch_page(1, 100).await.unwrap_err();
        assert!(matches!(err, HarvestError::Status { status: 503, .. }));
    }
}
