//! cache status, cache clear and clean commands.

use std::fs;
use std::path::{Path, PathBuf};

use console::style;

use bf_core::{Error, Paths, Registry};
use bf_io::fetch::SOURCE_DIR;
use bf_io::{clean_prepared_sources, clear_cache, list_cached, read_manifest};

pub fn run_status(paths: &Paths) -> Result<(), Error> {
    let cached = list_cached(&paths.sources)?;
    if cached.is_empty() {
        println!("{} No cached sources", style("==>").cyan().bold());
        return Ok(());
    }

    println!(
        "{} {} cached packages:",
        style("==>").cyan().bold(),
        cached.len()
    );
    for entry in cached {
        let m = &entry.manifest;
        let present = if m.extraction_dir.is_dir() {
            style("✓").green()
        } else {
            style("✗").red()
        };
        println!(
            "    {} {:<14} {}@{}  {}",
            present,
            style(&entry.tool_id).bold(),
            m.package_name,
            m.version,
            style(m.extracted_at.format("%Y-%m-%d %H:%M UTC")).dim()
        );
    }
    Ok(())
}

/// Clears one tool's cache, or every cached tool when `tool` is `None`.
pub fn run_clear(registry: &Registry, paths: &Paths, tool: Option<&str>) -> Result<(), Error> {
    let ids: Vec<String> = match tool {
        Some(id) => vec![registry.tool(id)?.id.clone()],
        None => list_cached(&paths.sources)?
            .into_iter()
            .map(|c| c.tool_id)
            .collect(),
    };

    let mut cleared = 0;
    for id in &ids {
        let dest = paths.tool_sources(id);
        if clear_cache(&dest)? {
            cleared += 1;
            println!("    {} {}", style("✓").green(), id);
        }
        // Drop the directory too when nothing else lives in it.
        let _ = fs::remove_dir(&dest);
    }

    println!(
        "{} Cleared {} cached package{}",
        style("==>").cyan().bold(),
        cleared,
        if cleared == 1 { "" } else { "s" }
    );
    Ok(())
}

/// Where `tool`'s source lives when the user did not say.
pub fn default_source_dir(paths: &Paths, tool_id: &str) -> PathBuf {
    let dest = paths.tool_sources(tool_id);
    read_manifest(&dest)
        .map(|m| m.extraction_dir)
        .unwrap_or_else(|| dest.join(SOURCE_DIR))
}

pub fn run_clean(
    registry: &Registry,
    paths: &Paths,
    tool: &str,
    source_dir: Option<&Path>,
) -> Result<(), Error> {
    let tool = registry.tool(tool)?;
    let source_dir = match source_dir {
        Some(dir) => dir.to_path_buf(),
        None => default_source_dir(paths, &tool.id),
    };

    let removed = clean_prepared_sources(&source_dir, tool)?;
    for path in &removed {
        println!("    {} {}", style("removed").dim(), path.display());
    }
    println!(
        "{} Removed {} prepared source{}",
        style("==>").cyan().bold(),
        removed.len(),
        if removed.len() == 1 { "" } else { "s" }
    );
    Ok(())
}
