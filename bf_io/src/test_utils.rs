//! Test utilities for binforge
//!
//! Shared infrastructure for unit tests and the CLI crate's integration tests:
//!
//! - `TestContext` - Wraps TempDir, MockServer, and a pre-wired `ToolFetcher`
//! - Package fixtures - npm metadata JSON and package tarballs
//! - Network failure helpers - Mock timeouts, 404 and 500 errors
//! - Source fixtures - minified entry points with the shapes the patcher targets
//!
//! # Example
//!
//! ```ignore
//! use bf_io::test_utils::TestContext;
//!
//! #[tokio::test]
//! async fn downloads_codex() {
//!     let ctx = TestContext::new().await;
//!     ctx.mount_npm_package("@openai/codex", "0.2.0", &[("bin/codex.js", b"1", 0o644)]).await;
//!
//!     let outcome = ctx.fetcher().download_tool(&codex, &ctx.tool_dir("codex"), ...).await.unwrap();
//!     assert!(outcome.downloaded);
//! }
//! ```

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use flate2::Compression;
use flate2::write::GzEncoder;
use sha1::{Digest, Sha1};
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use bf_core::Paths;

use crate::download::Downloader;
use crate::fetch::ToolFetcher;
use crate::github::GitHubClient;
use crate::integrity::{Algorithm, sri_for};
use crate::npm::{NpmClient, encode_package_name};

// ============================================================================
// Package fixtures
// ============================================================================

/// A file inside a fixture tarball: (relative path, content, unix mode).
pub type FixtureFile<'a> = (&'a str, &'a [u8], u32);

/// Gzipped tarball with every file under `top_dir/`.
pub fn tarball_with_top_dir(top_dir: &str, files: &[FixtureFile<'_>]) -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());

    for (rel, content, mode) in files {
        let mut header = tar::Header::new_ustar();
        header.set_size(content.len() as u64);
        header.set_mode(*mode);
        header.set_cksum();
        builder
            .append_data(&mut header, format!("{top_dir}/{rel}"), *content)
            .expect("failed to append fixture file");
    }

    let tar_data = builder.into_inner().expect("failed to finish tar");
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&tar_data).expect("failed to gzip fixture");
    encoder.finish().expect("failed to finish gzip")
}

/// npm tarballs put everything under `package/`.
pub fn npm_package_tarball(files: &[FixtureFile<'_>]) -> Vec<u8> {
    tarball_with_top_dir("package", files)
}

/// npm's `dist.shasum`: SHA-1, lowercase hex.
pub fn sha1_hex(data: &[u8]) -> String {
    hex::encode(Sha1::digest(data))
}

/// Metadata document for a package with a single published version.
pub fn npm_packument_json(
    package: &str,
    version: &str,
    tarball_url: &str,
    shasum: &str,
    integrity: &str,
) -> serde_json::Value {
    serde_json::json!({
        "name": package,
        "dist-tags": { "latest": version },
        "versions": {
            version: {
                "name": package,
                "version": version,
                "dist": {
                    "tarball": tarball_url,
                    "shasum": shasum,
                    "integrity": integrity
                }
            }
        }
    })
}

/// What `TestContext::mount_npm_package` published.
#[derive(Debug, Clone)]
pub struct PublishedPackage {
    pub tarball: Vec<u8>,
    pub shasum: String,
    pub integrity: String,
    pub tarball_path: String,
}

// ============================================================================
// Source fixtures
// ============================================================================

/// Minified entry point carrying both upstream shapes the patcher rewrites.
pub const PATCHABLE_ENTRY: &str = r#"#!/usr/bin/env node
import{createRequire as a}from"node:module";const u=import.meta.url;
function sh(){let s=process.env.SHELL;if(!s)throw new Error("No suitable shell found. Claude CLI requires a Posix shell environment. Please ensure you have a valid shell installed and the SHELL environment variable set.");return s}
process.env.CLAUDE_CODE_ENTRYPOINT="cli";main(sh());
"#;

/// Entry point with none of the shapes; strict mode rejects it for profiles
/// that require the rewrites.
pub const PLAIN_ENTRY: &str = "#!/usr/bin/env node\nconsole.log(\"hello\");\n";

/// Writes `files` below `dir`, creating parents.
pub fn write_tree(dir: &Path, files: &[(&str, &str)]) {
    for (rel, content) in files {
        let path = dir.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("failed to create fixture dir");
        }
        fs::write(&path, content).expect("failed to write fixture file");
    }
}

// ============================================================================
// Network failure helpers
// ============================================================================

/// A response that arrives only after `delay`.
pub fn mock_timeout_response(delay: Duration, body: Option<&[u8]>) -> ResponseTemplate {
    let mut response = ResponseTemplate::new(200).set_delay(delay);
    if let Some(data) = body {
        response = response.set_body_bytes(data.to_vec());
    }
    response
}

pub fn mock_500_error(message: Option<&str>) -> ResponseTemplate {
    ResponseTemplate::new(500).set_body_string(message.unwrap_or("Internal Server Error"))
}

pub fn mock_404_error() -> ResponseTemplate {
    ResponseTemplate::new(404).set_body_string("Not Found")
}

// ============================================================================
// TestContext - Main test infrastructure
// ============================================================================

/// Temporary binforge root plus a mock server standing in for both the npm
/// registry and the GitHub API.
pub struct TestContext {
    pub tmp: TempDir,
    pub mock_server: MockServer,
}

impl TestContext {
    pub async fn new() -> Self {
        let mock_server = MockServer::start().await;
        let tmp = TempDir::new().expect("failed to create temp dir");
        Self { tmp, mock_server }
    }

    /// The binforge data root.
    pub fn root(&self) -> PathBuf {
        self.tmp.path().join("binforge")
    }

    pub fn paths(&self) -> Paths {
        Paths::from_root(self.root())
    }

    /// Download destination for `tool_id`.
    pub fn tool_dir(&self, tool_id: &str) -> PathBuf {
        self.paths().tool_sources(tool_id)
    }

    pub fn fetcher(&self) -> ToolFetcher {
        ToolFetcher::new(
            NpmClient::with_base_url(self.mock_server.uri(), Duration::from_secs(5)),
            GitHubClient::with_base_url(self.mock_server.uri(), None, Duration::from_secs(5)),
            Downloader::new(Duration::from_secs(5), 5),
        )
    }

    /// Publishes `package@version` as the latest version, tarball included.
    pub async fn mount_npm_package(
        &self,
        package: &str,
        version: &str,
        files: &[FixtureFile<'_>],
    ) -> PublishedPackage {
        let tarball = npm_package_tarball(files);
        let shasum = sha1_hex(&tarball);
        let integrity = sri_for(Algorithm::Sha512, &tarball);
        let base_name = package.rsplit('/').next().unwrap_or(package);
        let tarball_path = format!("/{package}/-/{base_name}-{version}.tgz");
        let tarball_url = format!("{}{}", self.mock_server.uri(), tarball_path);

        Mock::given(method("GET"))
            .and(path(format!("/{}", encode_package_name(package))))
            .respond_with(ResponseTemplate::new(200).set_body_json(npm_packument_json(
                package,
                version,
                &tarball_url,
                &shasum,
                &integrity,
            )))
            .mount(&self.mock_server)
            .await;

        Mock::given(method("GET"))
            .and(path(tarball_path.clone()))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(tarball.clone()))
            .mount(&self.mock_server)
            .await;

        PublishedPackage {
            tarball,
            shasum,
            integrity,
            tarball_path,
        }
    }

    /// Publishes a release as both `latest` and its tag, with a source
    /// tarball rooted the way GitHub roots them (`owner-repo-sha/`).
    pub async fn mount_github_release(
        &self,
        owner: &str,
        repo: &str,
        tag: &str,
        files: &[FixtureFile<'_>],
    ) {
        let tarball = tarball_with_top_dir(&format!("{owner}-{repo}-0a1b2c3"), files);
        let tarball_path = format!("/repos/{owner}/{repo}/tarball/{tag}");
        let release = serde_json::json!({
            "tag_name": tag,
            "tarball_url": format!("{}{}", self.mock_server.uri(), tarball_path),
            "assets": []
        });

        for release_path in [
            format!("/repos/{owner}/{repo}/releases/latest"),
            format!("/repos/{owner}/{repo}/releases/tags/{tag}"),
        ] {
            Mock::given(method("GET"))
                .and(path(release_path))
                .respond_with(ResponseTemplate::new(200).set_body_json(release.clone()))
                .mount(&self.mock_server)
                .await;
        }

        Mock::given(method("GET"))
            .and(path(tarball_path))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(tarball))
            .mount(&self.mock_server)
            .await;
    }
}
