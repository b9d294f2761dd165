//! Resolve, download and unpack a tool's source package, consulting the
//! manifest cache first.
//!
//! Layout of a tool's destination directory:
//!
//! ```text
//! <dest>/.binforge-manifest.json
//! <dest>/source/            extracted package root
//! <dest>/.downloads/        tarballs while in flight
//! ```

use std::fs;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use bf_core::{BuildOptions, DownloadManifest, Error, ToolDescriptor, ToolSource};

use crate::cache;
use crate::download::Downloader;
use crate::extract::{self, ExtractStrategy};
use crate::github::GitHubClient;
use crate::integrity::Integrity;
use crate::npm::NpmClient;
use crate::progress::{BuildEvent, ProgressCallback, emit};

pub const SOURCE_DIR: &str = "source";
const DOWNLOADS_DIR: &str = ".downloads";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchOptions {
    /// Version, dist-tag or release tag; latest when `None`.
    pub version: Option<String>,
    /// Download even when the cache says up to date.
    pub force: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchOutcome {
    pub tool_id: String,
    pub source_dir: PathBuf,
    pub version: Option<String>,
    pub downloaded: bool,
    pub reason: String,
}

/// What to fetch, whichever registry it came from.
struct RemoteArchive {
    package_name: String,
    version: String,
    shasum: Option<String>,
    integrity: Option<String>,
    url: String,
}

pub struct ToolFetcher {
    npm: NpmClient,
    github: GitHubClient,
    downloader: Downloader,
    strategies: Arc<Vec<Box<dyn ExtractStrategy>>>,
}

impl ToolFetcher {
    pub fn new(npm: NpmClient, github: GitHubClient, downloader: Downloader) -> Self {
        Self {
            npm,
            github,
            downloader,
            strategies: Arc::new(extract::default_strategies()),
        }
    }

    pub fn from_options(options: &BuildOptions) -> Self {
        Self::new(
            NpmClient::from_options(options),
            GitHubClient::from_options(options),
            Downloader::from_options(options),
        )
    }

    pub fn with_strategies(mut self, strategies: Vec<Box<dyn ExtractStrategy>>) -> Self {
        self.strategies = Arc::new(strategies);
        self
    }

    /// Makes the tool's source available under `dest_dir`.
    ///
    /// Local tools are never fetched: `dest_dir` is taken to be the source.
    pub async fn download_tool(
        &self,
        tool: &ToolDescriptor,
        dest_dir: &Path,
        options: &FetchOptions,
        progress: Option<&ProgressCallback>,
        cancel: &CancellationToken,
    ) -> Result<FetchOutcome, Error> {
        let remote = match &tool.source {
            ToolSource::Local => {
                return Ok(FetchOutcome {
                    tool_id: tool.id.clone(),
                    source_dir: dest_dir.to_path_buf(),
                    version: None,
                    downloaded: false,
                    reason: "local tool; nothing to download".to_string(),
                });
            }
            ToolSource::Npm { package } => {
                emit(
                    progress,
                    BuildEvent::ResolvingPackage {
                        tool_id: tool.id.clone(),
                        package: package.clone(),
                    },
                );
                let meta = cancellable(
                    cancel,
                    self.npm.resolve(package, options.version.as_deref()),
                )
                .await?;
                RemoteArchive {
                    package_name: meta.name,
                    version: meta.version,
                    shasum: meta.shasum,
                    integrity: meta.integrity,
                    url: meta.tarball_url,
                }
            }
            ToolSource::GitHub { owner, repo } => {
                let package = format!("{owner}/{repo}");
                emit(
                    progress,
                    BuildEvent::ResolvingPackage {
                        tool_id: tool.id.clone(),
                        package: package.clone(),
                    },
                );
                let release = match &options.version {
                    Some(tag) => {
                        cancellable(cancel, self.github.release_by_tag(owner, repo, tag)).await?
                    }
                    None => cancellable(cancel, self.github.latest_release(owner, repo)).await?,
                };
                let url = release.tarball_url.ok_or_else(|| Error::UnknownVersion {
                    package: package.clone(),
                    version: format!("{} (no source tarball)", release.tag_name),
                })?;
                RemoteArchive {
                    package_name: package,
                    version: release.tag_name,
                    shasum: None,
                    integrity: None,
                    url,
                }
            }
        };

        self.fetch_archive(tool, dest_dir, remote, options.force, progress, cancel)
            .await
    }

    async fn fetch_archive(
        &self,
        tool: &ToolDescriptor,
        dest_dir: &Path,
        remote: RemoteArchive,
        force: bool,
        progress: Option<&ProgressCallback>,
        cancel: &CancellationToken,
    ) -> Result<FetchOutcome, Error> {
        let verdict = cache::check_if_up_to_date(
            dest_dir,
            &remote.package_name,
            &remote.version,
            remote.shasum.as_deref(),
        );
        emit(
            progress,
            BuildEvent::CacheDecision {
                tool_id: tool.id.clone(),
                up_to_date: verdict.is_up_to_date() && !force,
                reason: verdict.reason(),
            },
        );

        if verdict.is_up_to_date() && !force {
            let source_dir = cache::read_manifest(dest_dir)
                .map(|m| m.extraction_dir)
                .unwrap_or_else(|| dest_dir.join(SOURCE_DIR));
            return Ok(FetchOutcome {
                tool_id: tool.id.clone(),
                source_dir,
                version: Some(remote.version),
                downloaded: false,
                reason: verdict.reason(),
            });
        }
        let reason = if verdict.is_up_to_date() {
            "forced re-download".to_string()
        } else {
            verdict.reason()
        };

        let integrity = expected_digest(&remote)?;

        let archive_name = format!("{}-{}.tgz", tool.id, remote.version.replace(['/', '\\'], "_"));
        let archive = dest_dir.join(DOWNLOADS_DIR).join(archive_name);
        let downloaded = self
            .downloader
            .download_file(&remote.url, &archive, integrity.as_ref(), progress, cancel)
            .await;
        if let Err(e) = downloaded {
            let _ = fs::remove_dir(dest_dir.join(DOWNLOADS_DIR));
            return Err(e);
        }

        let staging = dest_dir.join(format!(".staging-{}", std::process::id()));
        let unpacked = self.unpack(&archive, &staging, cancel).await;
        let _ = fs::remove_file(&archive);
        let _ = fs::remove_dir(dest_dir.join(DOWNLOADS_DIR));
        let strategy = match unpacked {
            Ok(strategy) => strategy,
            Err(e) => {
                let _ = fs::remove_dir_all(&staging);
                return Err(e);
            }
        };

        let source_dir = dest_dir.join(SOURCE_DIR);
        let installed = install_staging(dest_dir, &staging, &source_dir);
        let _ = fs::remove_dir_all(&staging);
        installed?;

        cache::write_manifest(
            dest_dir,
            &DownloadManifest {
                package_name: remote.package_name.clone(),
                version: remote.version.clone(),
                shasum: remote.shasum.clone(),
                tarball_url: remote.url.clone(),
                extracted_at: Utc::now(),
                extraction_dir: source_dir.clone(),
            },
        )?;
        emit(
            progress,
            BuildEvent::Extracted {
                strategy,
                dest: source_dir.clone(),
            },
        );
        info!(tool = %tool.id, version = %remote.version, %strategy, "source ready");

        Ok(FetchOutcome {
            tool_id: tool.id.clone(),
            source_dir,
            version: Some(remote.version),
            downloaded: true,
            reason,
        })
    }

    async fn unpack(
        &self,
        archive: &Path,
        staging: &Path,
        cancel: &CancellationToken,
    ) -> Result<&'static str, Error> {
        if staging.exists() {
            fs::remove_dir_all(staging).map_err(|e| Error::fs(staging, e))?;
        }
        let strategies = Arc::clone(&self.strategies);
        let (archive_buf, staging_buf) = (archive.to_path_buf(), staging.to_path_buf());
        let cancel = cancel.clone();
        tokio::task::spawn_blocking(move || {
            extract::extract_tar_gz_with(&strategies, &archive_buf, &staging_buf, &cancel)
        })
        .await
        .map_err(|e| Error::ExtractionFailed {
            archive: archive.to_path_buf(),
            message: e.to_string(),
        })?
    }
}

/// Races `fut` against cancellation.
async fn cancellable<T>(
    cancel: &CancellationToken,
    fut: impl Future<Output = Result<T, Error>>,
) -> Result<T, Error> {
    tokio::select! {
        _ = cancel.cancelled() => Err(Error::Cancelled),
        result = fut => result,
    }
}

/// The digest the download must match: SRI `integrity` when published,
/// otherwise the SHA-1 `shasum`. A published value that cannot be parsed
/// is an error; only a registry that publishes neither is trusted as is.
fn expected_digest(remote: &RemoteArchive) -> Result<Option<Integrity>, Error> {
    if let Some(sri) = remote.integrity.as_deref() {
        return Integrity::parse(sri).map(Some);
    }
    if let Some(shasum) = remote.shasum.as_deref() {
        return Integrity::from_shasum(shasum).map(Some);
    }
    warn!(package = %remote.package_name, "registry published no digest; downloading unverified");
    Ok(None)
}

/// Moves the package root out of `staging` into `source_dir`, replacing any
/// previous extraction. The old manifest goes first so an interrupted swap
/// never looks up to date.
fn install_staging(dest_dir: &Path, staging: &Path, source_dir: &Path) -> Result<(), Error> {
    let root = extract::single_top_level_dir(staging)?.unwrap_or_else(|| staging.to_path_buf());

    let manifest = cache::manifest_path(dest_dir);
    if manifest.exists() {
        fs::remove_file(&manifest).map_err(|e| Error::fs(&manifest, e))?;
    }
    if source_dir.exists() {
        fs::remove_dir_all(source_dir).map_err(|e| Error::fs(source_dir, e))?;
    }
    fs::rename(&root, source_dir).map_err(|e| Error::fs(source_dir, e))
}
