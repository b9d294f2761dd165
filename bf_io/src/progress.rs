use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Pipeline events for whatever is rendering progress.
#[derive(Debug, Clone, PartialEq)]
pub enum BuildEvent {
    ResolvingPackage {
        tool_id: String,
        package: String,
    },
    CacheDecision {
        tool_id: String,
        up_to_date: bool,
        reason: String,
    },
    DownloadStarted {
        url: String,
        total_bytes: Option<u64>,
    },
    /// Only emitted when the response declared a Content-Length.
    DownloadProgress {
        url: String,
        received: u64,
        total: u64,
        percent: f64,
    },
    DownloadCompleted {
        url: String,
        bytes: u64,
    },
    Extracted {
        strategy: &'static str,
        dest: PathBuf,
    },
    Prepared {
        target_id: String,
        path: PathBuf,
        skipped_patches: usize,
    },
    CompileStarted {
        target_id: String,
    },
    CompilerOutput {
        target_id: String,
        line: String,
    },
    CompileFinished {
        target_id: String,
        size: u64,
        elapsed: Duration,
    },
    TargetFailed {
        target_id: String,
        message: String,
    },
}

pub type ProgressCallback = Arc<dyn Fn(BuildEvent) + Send + Sync>;

pub(crate) fn emit(progress: Option<&ProgressCallback>, event: BuildEvent) {
    if let Some(cb) = progress {
        cb(event);
    }
}
