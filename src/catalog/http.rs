// Shared HTTP client for upstream catalogs

use anyhow::Result;
use reqwest::header::{ACCEPT, AUTHORIZATION};
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;

/// User-Agent string for all HTTP requests
const USER_AGENT: &str = concat!("pkgmirror/", env!("CARGO_PKG_VERSION"));

/// Environment variable holding an optional token for the tag-listing API
const GITHUB_TOKEN_ENV: &str = "GITHUB_TOKEN";

/// HTTP client with the discovery timeout baked in
///
/// Built once per discovery run and shared by every catalog client.
#[derive(Debug, Clone)]
pub struct CatalogHttp {
    client: Client,
    timeout: Duration,
    token: Option<String>,
}

impl CatalogHttp {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to create HTTP client: {}", e))?;

        let token = std::env::var(GITHUB_TOKEN_ENV)
            .ok()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty());

        Ok(Self {
            client,
            timeout,
            token,
        })
    }

    /// Client for artifact downloads: the timeout bounds connecting and each
    /// read, not the whole transfer
    pub fn for_downloads(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(timeout)
            .read_timeout(timeout)
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to create HTTP client: {}", e))?;
        Ok(Self {
            client,
            timeout,
            token: None,
        })
    }

    /// Get a reference to the underlying client
    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Fetch JSON from a URL and deserialize it
    pub async fn fetch_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        let response = self
            .client
            .get(url)
            .header(ACCEPT, "application/json")
            .send()
            .await?;
        let response = check_status(response, url)?;
        let result = response.json().await?;
        Ok(result)
    }

    /// Fetch JSON from the tag-listing API, sending the API token when one is set
    pub async fn fetch_api_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        let mut request = self
            .client
            .get(url)
            .header(ACCEPT, "application/vnd.github+json");
        if let Some(token) = &self.token {
            request = request.header(AUTHORIZATION, format!("Bearer {}", token));
        }
        let response = check_status(request.send().await?, url)?;
        Ok(response.json().await?)
    }

    /// Fetch a text body (XML feeds)
    pub async fn fetch_text(&self, url: &str) -> Result<String> {
        let response = self.client.get(url).send().await?;
        let response = check_status(response, url)?;
        Ok(response.text().await?)
    }

    /// Start a download and hand back the response for streaming
    pub async fn download(&self, url: &str) -> Result<Response> {
        let response = self.client.get(url).send().await?;
        check_status(response, url)
    }
}

fn check_status(response: Response, url: &str) -> Result<Response> {
    if response.status() == StatusCode::NOT_FOUND {
        anyhow::bail!("Resource not found: {}", url);
    }

    if !response.status().is_success() {
        anyhow::bail!("HTTP request failed: {} ({})", url, response.status());
    }

    Ok(response)
}

/// Extract the file name component of a URL, ignoring any query string
pub fn filename_from_url(url: &str) -> Option<String> {
    url.split('?')
        .next()
        .and_then(|u| u.split('/').next_back())
        .filter(|name| !name.is_empty())
        .map(|name| {
            urlencoding::decode(name)
                .map(|n| n.into_owned())
                .unwrap_or_else(|_| name.to_string())
        })
}
