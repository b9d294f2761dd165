//! Download manifest record and the up-to-date verdict computed from it.
//!
//! The verdict is a conjunction: package, version, shasum and extraction
//! directory must all agree before a download is skipped. The first failing
//! condition becomes the reason.

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// File written inside each package's destination directory.
pub const MANIFEST_FILE_NAME: &str = ".binforge-manifest.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadManifest {
    pub package_name: String,
    pub version: String,
    pub shasum: Option<String>,
    pub tarball_url: String,
    pub extracted_at: DateTime<Utc>,
    pub extraction_dir: PathBuf,
}

impl DownloadManifest {
    /// Parses a manifest; anything unreadable is reported as absent.
    pub fn from_json(contents: &str) -> Option<Self> {
        serde_json::from_str(contents).ok()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// What the registry currently advertises for the requested package.
#[derive(Debug, Clone, Copy)]
pub struct RemotePackage<'a> {
    pub name: &'a str,
    pub version: &'a str,
    pub shasum: Option<&'a str>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StaleReason {
    NoManifest,
    PackageMismatch { recorded: String, requested: String },
    VersionMismatch { local: String, remote: String },
    ShasumMismatch { local: Option<String>, remote: String },
    ExtractionMissing { path: PathBuf },
}

impl fmt::Display for StaleReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StaleReason::NoManifest => write!(f, "no usable manifest"),
            StaleReason::PackageMismatch {
                recorded,
                requested,
            } => write!(
                f,
                "package mismatch: manifest records '{recorded}', requested '{requested}'"
            ),
            StaleReason::VersionMismatch { local, remote } => {
                write!(f, "version mismatch: local {local} vs remote {remote}")
            }
            StaleReason::ShasumMismatch { local, remote } => write!(
                f,
                "shasum mismatch: local {} vs remote {remote}",
                local.as_deref().unwrap_or("<none>")
            ),
            StaleReason::ExtractionMissing { path } => {
                write!(f, "extraction directory {} is missing", path.display())
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheVerdict {
    UpToDate { version: String },
    Stale(StaleReason),
}

impl CacheVerdict {
    pub fn is_up_to_date(&self) -> bool {
        matches!(self, CacheVerdict::UpToDate { .. })
    }

    pub fn reason(&self) -> String {
        match self {
            CacheVerdict::UpToDate { version } => format!("up to date at {version}"),
            CacheVerdict::Stale(reason) => reason.to_string(),
        }
    }
}

/// Decides whether `manifest` proves the extraction matches `remote`.
///
/// A remote without a shasum skips the hash check. A remote with one requires
/// the manifest to record the same value.
pub fn evaluate(
    manifest: Option<&DownloadManifest>,
    remote: RemotePackage<'_>,
    dir_exists: impl FnOnce(&Path) -> bool,
) -> CacheVerdict {
    let Some(manifest) = manifest else {
        return CacheVerdict::Stale(StaleReason::NoManifest);
    };
    if manifest.package_name != remote.name {
        return CacheVerdict::Stale(StaleReason::PackageMismatch {
            recorded: manifest.package_name.clone(),
            requested: remote.name.to_string(),
        });
    }
    if manifest.version != remote.version {
        return CacheVerdict::Stale(StaleReason::VersionMismatch {
            local: manifest.version.clone(),
            remote: remote.version.to_string(),
        });
    }
    if let Some(remote_sum) = remote.shasum
        && manifest.shasum.as_deref() != Some(remote_sum)
    {
        return CacheVerdict::Stale(StaleReason::ShasumMismatch {
            local: manifest.shasum.clone(),
            remote: remote_sum.to_string(),
        });
    }
    if !dir_exists(&manifest.extraction_dir) {
        return CacheVerdict::Stale(StaleReason::ExtractionMissing {
            path: manifest.extraction_dir.clone(),
        });
    }
    CacheVerdict::UpToDate {
        version: manifest.version.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn manifest(version: &str, shasum: Option<&str>) -> DownloadManifest {
        DownloadManifest {
            package_name: "@anthropic-ai/claude-code".to_string(),
            version: version.to_string(),
            shasum: shasum.map(str::to_string),
            tarball_url: "https://registry.npmjs.org/x.tgz".to_string(),
            extracted_at: DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
            extraction_dir: PathBuf::from("/cache/claude-code/source"),
        }
    }

    fn remote<'a>(version: &'a str, shasum: Option<&'a str>) -> RemotePackage<'a> {
        RemotePackage {
            name: "@anthropic-ai/claude-code",
            version,
            shasum,
        }
    }

    #[test]
    fn newer_remote_version_forces_download() {
        let m = manifest("2.0.75", Some("aaa"));
        let verdict = evaluate(Some(&m), remote("2.0.76", Some("aaa")), |_| true);
        assert!(!verdict.is_up_to_date());
        assert!(verdict.reason().contains("version mismatch"));
        assert!(verdict.reason().contains("2.0.75"));
        assert!(verdict.reason().contains("2.0.76"));
    }

    #[test]
    fn matching_manifest_is_up_to_date() {
        let m = manifest("2.0.76", Some("aaa"));
        let verdict = evaluate(Some(&m), remote("2.0.76", Some("aaa")), |_| true);
        assert_eq!(
            verdict,
            CacheVerdict::UpToDate {
                version: "2.0.76".to_string()
            }
        );
    }

    #[test]
    fn remote_without_shasum_skips_hash_check() {
        let m = manifest("2.0.76", None);
        assert!(evaluate(Some(&m), remote("2.0.76", None), |_| true).is_up_to_date());
    }

    #[test]
    fn recorded_shasum_absent_but_remote_known_is_stale() {
        let m = manifest("2.0.76", None);
        let verdict = evaluate(Some(&m), remote("2.0.76", Some("bbb")), |_| true);
        assert!(matches!(
            verdict,
            CacheVerdict::Stale(StaleReason::ShasumMismatch { .. })
        ));
    }

    #[test]
    fn missing_extraction_dir_is_stale() {
        let m = manifest("2.0.76", Some("aaa"));
        let verdict = evaluate(Some(&m), remote("2.0.76", Some("aaa")), |_| false);
        assert!(verdict.reason().contains("missing"));
    }

    #[test]
    fn corrupt_manifest_parses_as_absent() {
        assert_eq!(DownloadManifest::from_json("{\"packageName\": 3"), None);
        assert_eq!(DownloadManifest::from_json(""), None);
    }

    #[test]
    fn json_uses_camel_case_keys() {
        let json = manifest("1.0.0", Some("abc")).to_json().unwrap();
        assert!(json.contains("\"packageName\""));
        assert!(json.contains("\"extractionDir\""));
    }

    proptest! {
        #[test]
        fn verdict_is_the_conjunction_of_all_checks(
            same_name in any::<bool>(),
            same_version in any::<bool>(),
            remote_has_sum in any::<bool>(),
            same_sum in any::<bool>(),
            dir_exists in any::<bool>(),
        ) {
            let m = manifest("1.2.3", Some("sum-a"));
            let name = if same_name { m.package_name.clone() } else { "other".to_string() };
            let version = if same_version { "1.2.3" } else { "1.2.4" };
            let sum = if same_sum { "sum-a" } else { "sum-b" };
            let remote = RemotePackage {
                name: &name,
                version,
                shasum: remote_has_sum.then_some(sum),
            };

            let verdict = evaluate(Some(&m), remote, |_| dir_exists);
            let expected = same_name
                && same_version
                && (!remote_has_sum || same_sum)
                && dir_exists;
            prop_assert_eq!(verdict.is_up_to_date(), expected);
        }
    }

    #[test]
    fn each_failed_condition_has_a_distinct_reason() {
        let m = manifest("1.2.3", Some("sum-a"));
        let reasons = [
            evaluate(None, remote("1.2.3", Some("sum-a")), |_| true),
            evaluate(
                Some(&m),
                RemotePackage {
                    name: "other",
                    version: "1.2.3",
                    shasum: Some("sum-a"),
                },
                |_| true,
            ),
            evaluate(Some(&m), remote("1.2.4", Some("sum-a")), |_| true),
            evaluate(Some(&m), remote("1.2.3", Some("sum-b")), |_| true),
            evaluate(Some(&m), remote("1.2.3", Some("sum-a")), |_| false),
        ]
        .map(|v| v.reason());

        let unique: std::collections::HashSet<_> = reasons.iter().collect();
        assert_eq!(unique.len(), reasons.len());
    }
}
