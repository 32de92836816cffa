//! Search page transport behind the scrape fallback.

use std::time::Duration;

use thiserror::Error;

const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64; rv:128.0) Gecko/20100101 Firefox/128.0";

#[derive(Debug, Error)]
pub enum PageError {
    /// The frontend asked us to slow down (429).
    #[error("throttled by the search frontend")]
    Throttled,
    #[error("search page fetch failed: {0}")]
    Other(String),
}

/// GET a search results page as text.
pub trait SearchPage {
    fn fetch(&self, url: &str) -> Result<String, PageError>;
}

/// Production page fetcher over blocking reqwest.
///
/// The search frontend serves browsers, so the client announces itself
/// as one.
pub struct HttpSearchPage {
    client: reqwest::blocking::Client,
}

impl HttpSearchPage {
    pub fn new() -> Result<Self, PageError> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(BROWSER_USER_AGENT)
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|err| PageError::Other(err.to_string()))?;
        Ok(Self { client })
    }
}

impl SearchPage for HttpSearchPage {
    fn fetch(&self, url: &str) -> Result<String, PageError> {
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|err| PageError::Other(err.to_string()))?;
        if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(PageError::Throttled);
        }
        if !response.status().is_success() {
            return Err(PageError::Other(format!("status {}", response.status())));
        }
        response.text().map_err(|err| PageError::Other(err.to_string()))
    }
}
