//! download command, plus the fetch step `build` runs first.

use console::style;
use indicatif::MultiProgress;
use tokio_util::sync::CancellationToken;

use bf_core::{BuildOptions, Error, Paths, Registry, ToolDescriptor};
use bf_io::{FetchOptions, FetchOutcome, ToolFetcher};

use crate::display::{ProgressStyles, create_progress_callback, finish_progress_bars};

/// Downloads (or confirms the cache of) `tool` into its sources directory,
/// rendering progress bars.
pub async fn fetch_with_progress(
    tool: &ToolDescriptor,
    paths: &Paths,
    fetch: FetchOptions,
    options: &BuildOptions,
    cancel: &CancellationToken,
) -> Result<FetchOutcome, Error> {
    let multi = MultiProgress::new();
    let (progress, bars) = create_progress_callback(multi, ProgressStyles::default());

    let fetcher = ToolFetcher::from_options(options);
    let outcome = fetcher
        .download_tool(
            tool,
            &paths.tool_sources(&tool.id),
            &fetch,
            Some(&progress),
            cancel,
        )
        .await;
    finish_progress_bars(&bars);
    let outcome = outcome?;

    let version = outcome.version.as_deref().unwrap_or("-");
    if outcome.downloaded {
        println!(
            "{} {} {} ready ({})",
            style("==>").cyan().bold(),
            style(&tool.id).bold(),
            version,
            outcome.reason
        );
    } else {
        println!(
            "{} {} {} {}",
            style("==>").cyan().bold(),
            style(&tool.id).bold(),
            version,
            style(format!("cached: {}", outcome.reason)).dim()
        );
    }
    Ok(outcome)
}

pub async fn run_download(
    registry: &Registry,
    paths: &Paths,
    tool_id: &str,
    version: Option<String>,
    force: bool,
    options: &BuildOptions,
    cancel: &CancellationToken,
) -> Result<(), Error> {
    let tool = registry.tool(tool_id)?;
    if tool.is_local() {
        println!(
            "{} {} is built from a local checkout; pass it to {} --source-dir",
            style("==>").cyan().bold(),
            style(&tool.id).bold(),
            style("binforge build").cyan()
        );
        return Ok(());
    }

    println!(
        "{} Fetching {}...",
        style("==>").cyan().bold(),
        style(&tool.display_name).bold()
    );
    let outcome =
        fetch_with_progress(tool, paths, FetchOptions { version, force }, options, cancel).await?;
    println!("    {}", style(outcome.source_dir.display()).dim());
    Ok(())
}
