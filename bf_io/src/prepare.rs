//! File I/O around the patcher: locate the entry point, probe which vendor
//! assets exist, write the prepared sibling file.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use bf_core::patch::{self, EmbeddedAsset, PatchContext, PatchReport};
use bf_core::{BuildTarget, Error, PatchMode, Platform, ToolDescriptor};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedSource {
    pub path: PathBuf,
    pub report: PatchReport,
}

pub fn entry_point_path(source_dir: &Path, tool: &ToolDescriptor) -> PathBuf {
    source_dir.join(&tool.build.entry_point)
}

/// Where the prepared script for `platform` lands, next to the entry point.
pub fn prepared_source_path(source_dir: &Path, tool: &ToolDescriptor, platform: Platform) -> PathBuf {
    let entry = entry_point_path(source_dir, tool);
    let file_name = entry
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "index.js".to_string());
    entry.with_file_name(patch::prepared_file_name(&file_name, platform))
}

/// Vendor assets for `platform` that actually exist under `source_dir`.
pub fn probe_assets(source_dir: &Path, tool: &ToolDescriptor, platform: Platform) -> Vec<EmbeddedAsset> {
    tool.assets
        .iter()
        .filter(|asset| asset.applies_to(platform))
        .filter(|asset| {
            let present = source_dir.join(&asset.path).is_file();
            if !present {
                debug!(asset = %asset.path, "asset not shipped; not embedding");
            }
            present
        })
        .map(|asset| EmbeddedAsset {
            key: asset.path.clone(),
            specifier: patch::relative_specifier(&tool.build.entry_point, &asset.path),
        })
        .collect()
}

/// Patches the pristine entry point for `target` and writes the result.
///
/// Always starts from the entry point on disk, so calling this again for
/// another target (or the same one) never stacks patches.
pub fn prepare_source(
    source_dir: &Path,
    tool: &ToolDescriptor,
    target: &BuildTarget,
    mode: PatchMode,
) -> Result<PreparedSource, Error> {
    let entry = entry_point_path(source_dir, tool);
    if !entry.is_file() {
        return Err(Error::MissingEntryPoint {
            tool: tool.id.clone(),
            path: entry,
        });
    }

    let source = fs::read_to_string(&entry).map_err(|e| Error::fs(&entry, e))?;
    let assets = probe_assets(source_dir, tool, target.platform);
    let ctx = PatchContext {
        tool_id: &tool.id,
        env_prefix: &tool.build.env_prefix,
        platform: target.platform,
        default_shell: target.default_shell.as_deref(),
        profile: tool.patches,
        assets: &assets,
        mode,
    };
    let prepared = patch::prepare_script(&source, &ctx, &entry)?;

    let path = prepared_source_path(source_dir, tool, target.platform);
    fs::write(&path, &prepared.contents).map_err(|e| Error::fs(&path, e))?;

    for skipped in &prepared.report.skipped {
        debug!(patch = %skipped.name, requirement = ?skipped.requirement, "patch skipped");
    }
    debug!(
        path = %path.display(),
        assets = assets.len(),
        applied = prepared.report.applied.len(),
        "prepared source"
    );

    Ok(PreparedSource {
        path,
        report: prepared.report,
    })
}

/// Removes prepared scripts for every platform. Returns what was deleted;
/// nothing to delete is not an error.
pub fn clean_prepared_sources(source_dir: &Path, tool: &ToolDescriptor) -> Result<Vec<PathBuf>, Error> {
    let mut removed = Vec::new();
    for platform in Platform::ALL {
        let path = prepared_source_path(source_dir, tool, platform);
        match fs::remove_file(&path) {
            Ok(()) => removed.push(path),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to remove prepared source");
                return Err(Error::fs(&path, e));
            }
        }
    }
    Ok(removed)
}
