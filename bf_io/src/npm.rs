use std::collections::HashMap;
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use bf_core::{BuildOptions, Error};

use crate::download::USER_AGENT;

pub const DEFAULT_REGISTRY: &str = "https://registry.npmjs.org";

#[derive(Debug, Clone, Deserialize)]
struct Packument {
    #[serde(rename = "dist-tags", default)]
    dist_tags: HashMap<String, String>,
    #[serde(default)]
    versions: HashMap<String, VersionEntry>,
}

#[derive(Debug, Clone, Deserialize)]
struct VersionEntry {
    dist: Dist,
}

#[derive(Debug, Clone, Deserialize)]
struct Dist {
    tarball: String,
    shasum: Option<String>,
    integrity: Option<String>,
}

/// One published version of a package, as needed to fetch it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageVersion {
    pub name: String,
    pub version: String,
    pub tarball_url: String,
    pub shasum: Option<String>,
    /// SRI string (`sha512-...`).
    pub integrity: Option<String>,
}

pub struct NpmClient {
    base_url: String,
    client: reqwest::Client,
    timeout: Duration,
}

impl NpmClient {
    pub fn new() -> Self {
        Self::from_options(&BuildOptions::default())
    }

    pub fn from_options(options: &BuildOptions) -> Self {
        Self::with_base_url(DEFAULT_REGISTRY.to_string(), options.download_timeout)
    }

    /// `timeout` bounds each metadata request end to end.
    pub fn with_base_url(base_url: String, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(timeout)
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            timeout,
        }
    }

    pub fn metadata_url(&self, package: &str) -> String {
        format!("{}/{}", self.base_url, encode_package_name(package))
    }

    /// Resolves `version`, or the `latest` dist-tag when `None`.
    pub async fn resolve(
        &self,
        package: &str,
        version: Option<&str>,
    ) -> Result<PackageVersion, Error> {
        let url = self.metadata_url(package);
        debug!(%url, "fetching package metadata");

        let response = self
            .client
            .get(&url)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| transport_error(&url, e, self.timeout))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(Error::PackageNotFound {
                package: package.to_string(),
            });
        }
        if !response.status().is_success() {
            return Err(Error::HttpStatus {
                url,
                status: response.status().as_u16(),
            });
        }

        let packument: Packument = response.json().await.map_err(|e| {
            if e.is_timeout() {
                transport_error(&url, e, self.timeout)
            } else {
                Error::NetworkFailure {
                    url: url.clone(),
                    message: format!("failed to parse package metadata: {e}"),
                }
            }
        })?;

        let wanted = match version {
            Some(v) => packument.dist_tags.get(v).map(String::as_str).unwrap_or(v),
            None => packument
                .dist_tags
                .get("latest")
                .map(String::as_str)
                .ok_or_else(|| Error::UnknownVersion {
                    package: package.to_string(),
                    version: "latest".to_string(),
                })?,
        };

        let entry = packument
            .versions
            .get(wanted)
            .ok_or_else(|| Error::UnknownVersion {
                package: package.to_string(),
                version: wanted.to_string(),
            })?;

        Ok(PackageVersion {
            name: package.to_string(),
            version: wanted.to_string(),
            tarball_url: entry.dist.tarball.clone(),
            shasum: entry.dist.shasum.clone(),
            integrity: entry.dist.integrity.clone(),
        })
    }
}

impl Default for NpmClient {
    fn default() -> Self {
        Self::new()
    }
}

/// Maps a reqwest failure, keeping timeouts distinct from other transport errors.
pub(crate) fn transport_error(url: &str, err: reqwest::Error, timeout: Duration) -> Error {
    if err.is_timeout() {
        Error::Timeout {
            url: url.to_string(),
            seconds: timeout.as_secs(),
        }
    } else {
        Error::NetworkFailure {
            url: url.to_string(),
            message: err.to_string(),
        }
    }
}

/// `@scope/name` becomes `@scope%2Fname`; unscoped names pass through.
pub fn encode_package_name(package: &str) -> String {
    match package.strip_prefix('@').and_then(|rest| rest.split_once('/')) {
        Some((scope, name)) => format!("@{scope}%2F{name}"),
        None => package.to_string(),
    }
}
