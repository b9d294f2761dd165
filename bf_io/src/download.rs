use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::header::LOCATION;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use bf_core::{BuildOptions, Error};

use crate::integrity::Integrity;
use crate::partial::PartialFile;
use crate::progress::{BuildEvent, ProgressCallback, emit};

pub(crate) const USER_AGENT: &str = concat!("binforge/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Downloaded {
    pub path: PathBuf,
    pub bytes: u64,
    /// URL after redirects.
    pub final_url: String,
}

/// Streams HTTP bodies to disk. Redirects are followed here rather than by
/// reqwest so the hop limit and the per-hop timeout are ours.
#[derive(Clone)]
pub struct Downloader {
    client: reqwest::Client,
    timeout: Duration,
    max_redirects: usize,
}

impl Downloader {
    pub fn new(timeout: Duration, max_redirects: usize) -> Self {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::none())
            .connect_timeout(timeout)
            .pool_max_idle_per_host(8)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            timeout,
            max_redirects,
        }
    }

    pub fn from_options(options: &BuildOptions) -> Self {
        Self::new(options.download_timeout, options.max_redirects)
    }

    /// Downloads `url` to `dest`.
    ///
    /// The body goes to a temporary sibling of `dest` and is renamed into
    /// place only after the transfer completed and `integrity` (if given)
    /// matched. Any failure leaves neither file behind.
    pub async fn download_file(
        &self,
        url: &str,
        dest: &Path,
        integrity: Option<&Integrity>,
        progress: Option<&ProgressCallback>,
        cancel: &CancellationToken,
    ) -> Result<Downloaded, Error> {
        info!(%url, dest = %dest.display(), "downloading");
        let (response, final_url) = self.open(url, cancel).await?;
        let total = response.content_length();
        emit(
            progress,
            BuildEvent::DownloadStarted {
                url: final_url.clone(),
                total_bytes: total,
            },
        );

        let mut part = PartialFile::create(dest)?;
        let mut hasher = integrity.map(Integrity::hasher);
        let mut received: u64 = 0;
        let mut stream = response.bytes_stream();

        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                next = tokio::time::timeout(self.timeout, stream.next()) => next,
            };
            let chunk = match next {
                Err(_) => {
                    return Err(Error::Timeout {
                        url: final_url,
                        seconds: self.timeout.as_secs(),
                    });
                }
                Ok(None) => break,
                Ok(Some(Err(e))) => {
                    return Err(Error::NetworkFailure {
                        url: final_url,
                        message: format!("failed to read response body: {e}"),
                    });
                }
                Ok(Some(Ok(chunk))) => chunk,
            };

            part.write_all(&chunk)
                .map_err(|e| Error::fs(part.tmp_path(), e))?;
            if let Some(hasher) = hasher.as_mut() {
                hasher.update(&chunk);
            }
            received += chunk.len() as u64;

            if let Some(total) = total
                && total > 0
            {
                emit(
                    progress,
                    BuildEvent::DownloadProgress {
                        url: final_url.clone(),
                        received,
                        total,
                        percent: received as f64 * 100.0 / total as f64,
                    },
                );
            }
        }

        if let Some(total) = total
            && received < total
        {
            return Err(Error::NetworkFailure {
                url: final_url,
                message: format!("connection closed after {received} of {total} bytes"),
            });
        }

        if let (Some(integrity), Some(hasher)) = (integrity, hasher) {
            let file_name = dest.file_name().map(|n| n.to_string_lossy().into_owned());
            integrity.verify(&hasher.finish(), file_name.as_deref())?;
            debug!(algorithm = integrity.algorithm.as_str(), "integrity verified");
        }

        let path = part.commit()?;
        emit(
            progress,
            BuildEvent::DownloadCompleted {
                url: final_url.clone(),
                bytes: received,
            },
        );

        Ok(Downloaded {
            path,
            bytes: received,
            final_url,
        })
    }

    /// Sends the request, following up to `max_redirects` 3xx hops.
    async fn open(
        &self,
        url: &str,
        cancel: &CancellationToken,
    ) -> Result<(reqwest::Response, String), Error> {
        let mut current = url.to_string();

        for hop in 0..=self.max_redirects {
            let send = self.client.get(&current).send();
            let response = tokio::select! {
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                result = tokio::time::timeout(self.timeout, send) => match result {
                    Err(_) => {
                        return Err(Error::Timeout {
                            url: current,
                            seconds: self.timeout.as_secs(),
                        });
                    }
                    Ok(Err(e)) => {
                        return Err(Error::NetworkFailure {
                            url: current,
                            message: e.to_string(),
                        });
                    }
                    Ok(Ok(response)) => response,
                },
            };

            let status = response.status();
            if status.is_redirection() {
                let location = response
                    .headers()
                    .get(LOCATION)
                    .and_then(|v| v.to_str().ok())
                    .ok_or_else(|| Error::NetworkFailure {
                        url: current.clone(),
                        message: format!("HTTP {status} without a Location header"),
                    })?;
                let next = response
                    .url()
                    .join(location)
                    .map_err(|e| Error::NetworkFailure {
                        url: current.clone(),
                        message: format!("bad redirect target '{location}': {e}"),
                    })?;
                debug!(from = %current, to = %next, hop, "following redirect");
                current = next.to_string();
                continue;
            }

            if !status.is_success() {
                return Err(Error::HttpStatus {
                    url: current,
                    status: status.as_u16(),
                });
            }
            return Ok((response, current));
        }

        Err(Error::RedirectLoop {
            url: url.to_string(),
            hops: self.max_redirects,
        })
    }
}

impl Default for Downloader {
    fn default() -> Self {
        Self::from_options(&BuildOptions::default())
    }
}
