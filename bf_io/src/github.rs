use std::time::Duration;

use regex::Regex;
use serde::Deserialize;
use tracing::debug;

use bf_core::{BuildOptions, Error};

use crate::download::USER_AGENT;
use crate::npm::transport_error;

pub const DEFAULT_API: &str = "https://api.github.com";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Release {
    pub tag_name: String,
    pub tarball_url: Option<String>,
    #[serde(default)]
    pub assets: Vec<ReleaseAsset>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ReleaseAsset {
    pub name: String,
    #[serde(default)]
    pub size: u64,
    pub browser_download_url: String,
    pub content_type: Option<String>,
}

/// First asset whose name matches `pattern`.
pub fn select_asset<'a>(release: &'a Release, pattern: &Regex) -> Option<&'a ReleaseAsset> {
    release.assets.iter().find(|a| pattern.is_match(&a.name))
}

pub struct GitHubClient {
    api_base: String,
    client: reqwest::Client,
    token: Option<String>,
    timeout: Duration,
}

impl GitHubClient {
    pub fn new() -> Self {
        Self::from_options(&BuildOptions::default())
    }

    /// Uses `GITHUB_TOKEN`, then `GH_TOKEN`, when set.
    pub fn from_options(options: &BuildOptions) -> Self {
        let token = std::env::var("GITHUB_TOKEN")
            .or_else(|_| std::env::var("GH_TOKEN"))
            .ok()
            .filter(|t| !t.is_empty());
        Self::with_base_url(DEFAULT_API.to_string(), token, options.download_timeout)
    }

    pub fn with_base_url(api_base: String, token: Option<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(timeout)
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            api_base: api_base.trim_end_matches('/').to_string(),
            client,
            token,
            timeout,
        }
    }

    pub async fn latest_release(&self, owner: &str, repo: &str) -> Result<Release, Error> {
        let url = format!("{}/repos/{owner}/{repo}/releases/latest", self.api_base);
        self.get_release(&url, owner, repo, "latest").await
    }

    pub async fn release_by_tag(&self, owner: &str, repo: &str, tag: &str) -> Result<Release, Error> {
        let url = format!("{}/repos/{owner}/{repo}/releases/tags/{tag}", self.api_base);
        self.get_release(&url, owner, repo, tag).await
    }

    async fn get_release(
        &self,
        url: &str,
        owner: &str,
        repo: &str,
        tag: &str,
    ) -> Result<Release, Error> {
        debug!(%url, "fetching GitHub release");
        let mut request = self
            .client
            .get(url)
            .header("Accept", "application/vnd.github+json");
        if let Some(token) = &self.token {
            request = request.header("Authorization", format!("Bearer {token}"));
        }

        let response = request
            .send()
            .await
            .map_err(|e| transport_error(url, e, self.timeout))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(Error::UnknownVersion {
                package: format!("{owner}/{repo}"),
                version: tag.to_string(),
            });
        }
        if !response.status().is_success() {
            return Err(Error::HttpStatus {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }

        response.json().await.map_err(|e| {
            if e.is_timeout() {
                transport_error(url, e, self.timeout)
            } else {
                Error::NetworkFailure {
                    url: url.to_string(),
                    message: format!("failed to parse release: {e}"),
                }
            }
        })
    }
}

impl Default for GitHubClient {
    fn default() -> Self {
        Self::new()
    }
}
