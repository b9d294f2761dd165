//! build command.

use std::path::PathBuf;
use std::sync::Arc;

use console::style;
use indicatif::MultiProgress;
use tokio_util::sync::CancellationToken;

use bf_core::{BuildOptions, Error, Host, Paths, Platform, Registry};
use bf_io::compiler::CompilerBackend;
use bf_io::{BuildOrchestrator, CompilerLocator, ExternalCompiler, FetchOptions};

use crate::BuildArgs;
use crate::commands::download::fetch_with_progress;
use crate::display::{
    ProgressStyles, create_progress_callback, finish_progress_bars, format_result_line,
};

/// Which targets a build selects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    Targets(Vec<String>),
    Platform(String),
    All,
    Current,
}

impl Selection {
    pub fn from_args(args: &BuildArgs) -> Self {
        if !args.targets.is_empty() {
            Selection::Targets(args.targets.clone())
        } else if let Some(platform) = &args.platform {
            Selection::Platform(platform.clone())
        } else if args.all {
            Selection::All
        } else {
            Selection::Current
        }
    }

    /// Target ids in build order. Unknown ids fail here, before any download.
    pub fn resolve(&self, registry: &Registry, host: &Host) -> Result<Vec<String>, Error> {
        match self {
            Selection::Targets(ids) => {
                for id in ids {
                    registry.resolve_target(id, None)?;
                }
                Ok(ids.clone())
            }
            Selection::Platform(name) => {
                let platform: Platform = name.parse()?;
                Ok(registry
                    .targets_for_platform(platform)
                    .into_iter()
                    .map(|t| t.id)
                    .collect())
            }
            Selection::All => Ok(registry.templates().iter().map(|t| t.id.to_string()).collect()),
            Selection::Current => Ok(vec![registry.current_target(host).id]),
        }
    }
}

pub async fn run_build(
    registry: &Registry,
    paths: &Paths,
    args: &BuildArgs,
    options: BuildOptions,
    cancel: CancellationToken,
) -> Result<(), Error> {
    let tool = registry.tool(&args.tool)?.clone();
    let target_ids = Selection::from_args(args).resolve(registry, &Host::detect())?;

    let compiler = ExternalCompiler::new(CompilerLocator::new(
        options.compiler.clone(),
        Some(paths.tools.clone()),
    ));
    let compiler_path = compiler.locate()?;

    let source_dir = match &args.source_dir {
        Some(dir) => dir.clone(),
        None if tool.is_local() => {
            std::env::current_dir().map_err(|e| Error::fs(PathBuf::from("."), e))?
        }
        None => {
            let fetch = FetchOptions {
                version: args.version.clone(),
                force: args.force_download,
            };
            fetch_with_progress(&tool, paths, fetch, &options, &cancel)
                .await?
                .source_dir
        }
    };
    let output_dir = args.out.clone().unwrap_or_else(|| paths.dist.clone());

    println!(
        "{} Building {} for {} target{} with {}",
        style("==>").cyan().bold(),
        style(&tool.display_name).bold(),
        target_ids.len(),
        if target_ids.len() == 1 { "" } else { "s" },
        style(compiler_path.display()).dim()
    );

    let multi = MultiProgress::new();
    let (progress, bars) = create_progress_callback(multi, ProgressStyles::default());
    let orchestrator = BuildOrchestrator::new(registry.clone(), Arc::new(compiler), options)
        .with_progress(progress)
        .with_cancel(cancel);

    let results = orchestrator
        .build_targets(&target_ids, &source_dir, &output_dir, Some(&tool))
        .await;
    finish_progress_bars(&bars);

    if args.clean {
        orchestrator.clean_build_artifacts(&source_dir, Some(&tool))?;
    }

    println!();
    for result in &results {
        println!("    {}", format_result_line(result));
    }

    let succeeded = results.iter().filter(|r| r.success).count();
    println!(
        "\n{} {} of {} targets built into {}",
        style("==>").cyan().bold(),
        succeeded,
        results.len(),
        output_dir.display()
    );

    match results.into_iter().find_map(|r| r.error) {
        Some(first_error) => Err(first_error),
        None => Ok(()),
    }
}
