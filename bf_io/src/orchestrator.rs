//! Public build entry points: resolve a target, prepare the source for its
//! platform, compile, report.
//!
//! Batches run one target at a time. Targets sharing a platform share a
//! prepared-source path, so running them concurrently would race.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use bf_core::{BuildOptions, Error, Platform, Registry, ToolDescriptor};

use crate::compiler::{CompileRequest, CompilerBackend, OutputCallback};
use crate::prepare;
use crate::progress::{BuildEvent, ProgressCallback, emit};

/// Outcome of one compilation attempt. Batch calls record failures here with
/// `success == false` and the error attached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildResult {
    pub success: bool,
    pub target_id: String,
    pub tool_id: String,
    pub output_path: PathBuf,
    pub duration: Duration,
    pub size: u64,
    pub error: Option<Error>,
}

impl BuildResult {
    fn failed(target_id: &str, tool_id: &str, output_path: PathBuf, error: Error) -> Self {
        Self {
            success: false,
            target_id: target_id.to_string(),
            tool_id: tool_id.to_string(),
            output_path,
            duration: Duration::ZERO,
            size: 0,
            error: Some(error),
        }
    }
}

pub struct BuildOrchestrator {
    registry: Registry,
    compiler: Arc<dyn CompilerBackend>,
    options: BuildOptions,
    progress: Option<ProgressCallback>,
    cancel: CancellationToken,
}

impl BuildOrchestrator {
    pub fn new(registry: Registry, compiler: Arc<dyn CompilerBackend>, options: BuildOptions) -> Self {
        Self {
            registry,
            compiler,
            options,
            progress: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_progress(mut self, progress: ProgressCallback) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn options(&self) -> &BuildOptions {
        &self.options
    }

    fn tool_or_default<'a>(&'a self, tool: Option<&'a ToolDescriptor>) -> &'a ToolDescriptor {
        tool.unwrap_or_else(|| self.registry.default_tool())
    }

    /// Builds one target into `output_dir/<platform>/`.
    ///
    /// Unknown targets and a missing compiler fail before anything is
    /// written.
    pub async fn build_target(
        &self,
        target_id: &str,
        source_dir: &Path,
        output_dir: &Path,
        tool: Option<&ToolDescriptor>,
    ) -> Result<BuildResult, Error> {
        let tool = self.tool_or_default(tool);
        let target = self.registry.resolve_target(target_id, Some(tool))?;
        self.compiler.locate()?;
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let prepared = prepare::prepare_source(source_dir, tool, &target, self.options.patch_mode)?;
        emit(
            self.progress.as_ref(),
            BuildEvent::Prepared {
                target_id: target.id.clone(),
                path: prepared.path.clone(),
                skipped_patches: prepared.report.skipped.len(),
            },
        );

        let platform_dir = output_dir.join(target.platform.as_str());
        fs::create_dir_all(&platform_dir).map_err(|e| Error::fs(&platform_dir, e))?;
        let outfile = platform_dir.join(&target.output);

        let on_output: Option<OutputCallback> = self.progress.clone().map(|progress| {
            let target_id = target.id.clone();
            Arc::new(move |line: &str| {
                progress(BuildEvent::CompilerOutput {
                    target_id: target_id.clone(),
                    line: line.to_string(),
                })
            }) as OutputCallback
        });

        emit(
            self.progress.as_ref(),
            BuildEvent::CompileStarted {
                target_id: target.id.clone(),
            },
        );
        let compiled = self
            .compiler
            .compile(CompileRequest {
                target: target.clone(),
                entry: prepared.path,
                outfile,
                working_dir: source_dir.to_path_buf(),
                minify: self.options.minify,
                sourcemap: self.options.sourcemap,
                timeout: self.options.compile_timeout,
                cancel: self.cancel.clone(),
                on_output,
            })
            .await?;

        emit(
            self.progress.as_ref(),
            BuildEvent::CompileFinished {
                target_id: target.id.clone(),
                size: compiled.size,
                elapsed: compiled.duration,
            },
        );
        info!(tool = %tool.id, target = %target.id, output = %compiled.output.display(), "build succeeded");

        Ok(BuildResult {
            success: true,
            target_id: target.id,
            tool_id: tool.id.clone(),
            output_path: compiled.output,
            duration: compiled.duration,
            size: compiled.size,
            error: None,
        })
    }

    /// Builds each target in turn. A failure is recorded in that target's
    /// entry and the rest still run.
    pub async fn build_targets(
        &self,
        target_ids: &[String],
        source_dir: &Path,
        output_dir: &Path,
        tool: Option<&ToolDescriptor>,
    ) -> Vec<BuildResult> {
        let tool = self.tool_or_default(tool);
        let mut results = Vec::with_capacity(target_ids.len());

        for target_id in target_ids {
            match self
                .build_target(target_id, source_dir, output_dir, Some(tool))
                .await
            {
                Ok(result) => results.push(result),
                Err(Error::Cancelled) => {
                    info!(tool = %tool.id, target = %target_id, "build cancelled; skipping remaining targets");
                    let planned = self.planned_output(target_id, output_dir, tool);
                    results.push(BuildResult::failed(
                        target_id,
                        &tool.id,
                        planned,
                        Error::Cancelled,
                    ));
                    break;
                }
                Err(e) => {
                    warn!(tool = %tool.id, target = %target_id, error = %e, "build failed");
                    emit(
                        self.progress.as_ref(),
                        BuildEvent::TargetFailed {
                            target_id: target_id.clone(),
                            message: e.to_string(),
                        },
                    );
                    let planned = self.planned_output(target_id, output_dir, tool);
                    results.push(BuildResult::failed(target_id, &tool.id, planned, e));
                }
            }
        }
        results
    }

    fn planned_output(&self, target_id: &str, output_dir: &Path, tool: &ToolDescriptor) -> PathBuf {
        self.registry
            .resolve_target(target_id, Some(tool))
            .map(|t| output_dir.join(t.platform.as_str()).join(t.output))
            .unwrap_or_default()
    }

    /// Every target of `platform`, in table order.
    pub async fn build_platform(
        &self,
        platform: Platform,
        source_dir: &Path,
        output_dir: &Path,
        tool: Option<&ToolDescriptor>,
    ) -> Vec<BuildResult> {
        let ids: Vec<String> = self
            .registry
            .targets_for_platform(platform)
            .into_iter()
            .map(|t| t.id)
            .collect();
        self.build_targets(&ids, source_dir, output_dir, tool).await
    }

    /// Deletes prepared sources left in `source_dir`. Idempotent.
    pub fn clean_build_artifacts(
        &self,
        source_dir: &Path,
        tool: Option<&ToolDescriptor>,
    ) -> Result<Vec<PathBuf>, Error> {
        prepare::clean_prepared_sources(source_dir, self.tool_or_default(tool))
    }
}
