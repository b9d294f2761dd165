//! On-disk side of the download manifest: one JSON file per package
//! destination directory.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use bf_core::manifest::{self, CacheVerdict, DownloadManifest, MANIFEST_FILE_NAME, RemotePackage};
use bf_core::Error;

pub fn manifest_path(dest_dir: &Path) -> PathBuf {
    dest_dir.join(MANIFEST_FILE_NAME)
}

/// Missing, unreadable and corrupt manifests all read as `None`.
pub fn read_manifest(dest_dir: &Path) -> Option<DownloadManifest> {
    let path = manifest_path(dest_dir);
    let contents = match fs::read_to_string(&path) {
        Ok(contents) => contents,
        Err(e) => {
            debug!(path = %path.display(), error = %e, "no readable manifest");
            return None;
        }
    };
    let parsed = DownloadManifest::from_json(&contents);
    if parsed.is_none() {
        debug!(path = %path.display(), "ignoring corrupt manifest");
    }
    parsed
}

/// Replaces the manifest wholesale via a temporary file and rename.
pub fn write_manifest(dest_dir: &Path, manifest: &DownloadManifest) -> Result<(), Error> {
    fs::create_dir_all(dest_dir).map_err(|e| Error::fs(dest_dir, e))?;
    let path = manifest_path(dest_dir);
    let json = manifest.to_json().map_err(|e| Error::fs(&path, e))?;

    let tmp = path.with_extension(format!("json.tmp.{}", std::process::id()));
    fs::write(&tmp, json).map_err(|e| Error::fs(&tmp, e))?;
    if let Err(e) = fs::rename(&tmp, &path) {
        let _ = fs::remove_file(&tmp);
        return Err(Error::fs(&path, e));
    }
    Ok(())
}

pub fn check_if_up_to_date(
    dest_dir: &Path,
    package_name: &str,
    remote_version: &str,
    remote_shasum: Option<&str>,
) -> CacheVerdict {
    let manifest = read_manifest(dest_dir);
    let verdict = manifest::evaluate(
        manifest.as_ref(),
        RemotePackage {
            name: package_name,
            version: remote_version,
            shasum: remote_shasum,
        },
        |dir| dir.is_dir(),
    );
    info!(
        package = package_name,
        up_to_date = verdict.is_up_to_date(),
        reason = %verdict.reason(),
        "cache check"
    );
    verdict
}

/// Deletes the manifest and the extraction it points at. Returns whether
/// anything was removed.
pub fn clear_cache(dest_dir: &Path) -> Result<bool, Error> {
    let mut removed = false;
    if let Some(manifest) = read_manifest(dest_dir)
        && manifest.extraction_dir.starts_with(dest_dir)
        && manifest.extraction_dir.is_dir()
    {
        fs::remove_dir_all(&manifest.extraction_dir)
            .map_err(|e| Error::fs(&manifest.extraction_dir, e))?;
        removed = true;
    }
    let path = manifest_path(dest_dir);
    if path.exists() {
        fs::remove_file(&path).map_err(|e| Error::fs(&path, e))?;
        removed = true;
    }
    Ok(removed)
}

/// A cached package as listed by `binforge cache status`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedPackage {
    pub tool_id: String,
    pub manifest: DownloadManifest,
}

/// Every tool directory under `sources_root` holding a readable manifest,
/// sorted by tool id.
pub fn list_cached(sources_root: &Path) -> Result<Vec<CachedPackage>, Error> {
    let entries = match fs::read_dir(sources_root) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(Error::fs(sources_root, e)),
    };

    let mut cached = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| Error::fs(sources_root, e))?;
        if !entry.path().is_dir() {
            continue;
        }
        if let Some(manifest) = read_manifest(&entry.path()) {
            cached.push(CachedPackage {
                tool_id: entry.file_name().to_string_lossy().into_owned(),
                manifest,
            });
        }
    }
    cached.sort_by(|a, b| a.tool_id.cmp(&b.tool_id));
    Ok(cached)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tempfile::TempDir;

    fn manifest_for(dest: &Path, version: &str, shasum: Option<&str>) -> DownloadManifest {
        DownloadManifest {
            package_name: "@openai/codex".to_string(),
            version: version.to_string(),
            shasum: shasum.map(str::to_string),
            tarball_url: "https://registry.npmjs.org/@openai/codex/-/codex-1.0.0.tgz".to_string(),
            extracted_at: Utc::now(),
            extraction_dir: dest.join("source"),
        }
    }

    #[test]
    fn written_manifest_reads_back_identically() {
        let tmp = TempDir::new().unwrap();
        let m = manifest_for(tmp.path(), "1.0.0", Some("abc"));
        write_manifest(tmp.path(), &m).unwrap();

        assert_eq!(read_manifest(tmp.path()), Some(m));
    }

    #[test]
    fn round_trip_then_check_is_up_to_date() {
        let tmp = TempDir::new().unwrap();
        let m = manifest_for(tmp.path(), "1.0.0", Some("abc"));
        fs::create_dir_all(&m.extraction_dir).unwrap();
        write_manifest(tmp.path(), &m).unwrap();

        let verdict = check_if_up_to_date(tmp.path(), "@openai/codex", "1.0.0", Some("abc"));
        assert!(verdict.is_up_to_date(), "{}", verdict.reason());
    }

    #[test]
    fn corrupt_manifest_means_download() {
        let tmp = TempDir::new().unwrap();
        fs::write(manifest_path(tmp.path()), "{not json").unwrap();

        let verdict = check_if_up_to_date(tmp.path(), "@openai/codex", "1.0.0", None);
        assert!(!verdict.is_up_to_date());
        assert_eq!(verdict.reason(), "no usable manifest");
    }

    #[test]
    fn deleted_extraction_invalidates_cache() {
        let tmp = TempDir::new().unwrap();
        let m = manifest_for(tmp.path(), "1.0.0", Some("abc"));
        write_manifest(tmp.path(), &m).unwrap();

        let verdict = check_if_up_to_date(tmp.path(), "@openai/codex", "1.0.0", Some("abc"));
        assert!(verdict.reason().contains("missing"));
    }

    #[test]
    fn clear_removes_manifest_and_sources() {
        let tmp = TempDir::new().unwrap();
        let m = manifest_for(tmp.path(), "1.0.0", None);
        fs::create_dir_all(&m.extraction_dir).unwrap();
        fs::write(m.extraction_dir.join("cli.js"), "x").unwrap();
        write_manifest(tmp.path(), &m).unwrap();

        assert!(clear_cache(tmp.path()).unwrap());
        assert!(!m.extraction_dir.exists());
        assert!(!manifest_path(tmp.path()).exists());
        assert!(!clear_cache(tmp.path()).unwrap());
    }

    #[test]
    fn clear_never_touches_directories_outside_dest() {
        let tmp = TempDir::new().unwrap();
        let outside = TempDir::new().unwrap();
        let mut m = manifest_for(tmp.path(), "1.0.0", None);
        m.extraction_dir = outside.path().to_path_buf();
        write_manifest(tmp.path(), &m).unwrap();

        clear_cache(tmp.path()).unwrap();
        assert!(outside.path().exists());
    }

    #[test]
    fn list_cached_skips_dirs_without_manifest() {
        let tmp = TempDir::new().unwrap();
        let codex = tmp.path().join("codex");
        write_manifest(&codex, &manifest_for(&codex, "1.0.0", None)).unwrap();
        fs::create_dir_all(tmp.path().join("empty")).unwrap();

        let cached = list_cached(tmp.path()).unwrap();
        assert_eq!(cached.len(), 1);
        assert_eq!(cached[0].tool_id, "codex");
        assert!(list_cached(&tmp.path().join("nope")).unwrap().is_empty());
    }
}
