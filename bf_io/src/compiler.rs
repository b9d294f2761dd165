//! Discovery and invocation of the external ahead-of-time compiler.
//!
//! The compiler contract:
//!
//! ```text
//! <compiler> build --compile [--minify] [--sourcemap] --target=<triple> <entry> --outfile=<path>
//! ```
//!
//! run from the source directory, producing one executable at `<path>` and
//! exiting 0.

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use bf_core::{BuildTarget, Error};

/// Receives compiler stdout one line at a time.
pub type OutputCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// One compiler invocation.
#[derive(Clone)]
pub struct CompileRequest {
    pub target: BuildTarget,
    pub entry: PathBuf,
    pub outfile: PathBuf,
    pub working_dir: PathBuf,
    pub minify: bool,
    pub sourcemap: bool,
    pub timeout: Duration,
    pub cancel: CancellationToken,
    pub on_output: Option<OutputCallback>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileOutput {
    pub output: PathBuf,
    pub size: u64,
    pub duration: Duration,
}

/// Seam between orchestration and the real compiler so builds can be
/// exercised without one installed.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait CompilerBackend: Send + Sync {
    /// Path of the compiler executable, or `CompilerNotFound`.
    fn locate(&self) -> Result<PathBuf, Error>;

    async fn compile(&self, request: CompileRequest) -> Result<CompileOutput, Error>;
}

fn executable_name(name: &str) -> String {
    if cfg!(windows) {
        format!("{name}.exe")
    } else {
        name.to_string()
    }
}

/// Finds the compiler, in order: project tool cache, PATH, the user-profile
/// install (`~/.<name>/bin`), then platform default locations.
#[derive(Debug, Clone)]
pub struct CompilerLocator {
    name: String,
    tools_dir: Option<PathBuf>,
    home: Option<PathBuf>,
    search_path: bool,
}

impl CompilerLocator {
    pub fn new(name: impl Into<String>, tools_dir: Option<PathBuf>) -> Self {
        Self {
            name: name.into(),
            tools_dir,
            home: dirs::home_dir(),
            search_path: true,
        }
    }

    pub fn with_home(mut self, home: Option<PathBuf>) -> Self {
        self.home = home;
        self
    }

    /// Skips the PATH lookup; tests use this to stay hermetic.
    pub fn without_path_search(mut self) -> Self {
        self.search_path = false;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn project_candidates(&self) -> Vec<PathBuf> {
        let exe = executable_name(&self.name);
        match &self.tools_dir {
            Some(dir) => vec![dir.join(&self.name).join("bin").join(&exe), dir.join(&exe)],
            None => Vec::new(),
        }
    }

    fn fallback_candidates(&self) -> Vec<PathBuf> {
        let exe = executable_name(&self.name);
        let mut out = Vec::new();
        if let Some(home) = &self.home {
            out.push(home.join(format!(".{}", self.name)).join("bin").join(&exe));
        }
        if cfg!(windows) {
            if let Some(local) = dirs::data_local_dir() {
                out.push(local.join(&self.name).join("bin").join(&exe));
            }
        } else {
            out.push(PathBuf::from("/usr/local/bin").join(&exe));
            out.push(PathBuf::from("/opt/homebrew/bin").join(&exe));
        }
        out
    }

    pub fn locate(&self) -> Result<PathBuf, Error> {
        let mut searched = Vec::new();

        for candidate in self.project_candidates() {
            if candidate.is_file() {
                debug!(path = %candidate.display(), "compiler found in project tools");
                return Ok(candidate);
            }
            searched.push(candidate);
        }

        if self.search_path {
            match which::which(&self.name) {
                Ok(path) => {
                    debug!(path = %path.display(), "compiler found on PATH");
                    return Ok(path);
                }
                Err(_) => searched.push(PathBuf::from("$PATH")),
            }
        }

        for candidate in self.fallback_candidates() {
            if candidate.is_file() {
                debug!(path = %candidate.display(), "compiler found in default location");
                return Ok(candidate);
            }
            searched.push(candidate);
        }

        Err(Error::CompilerNotFound {
            name: self.name.clone(),
            searched,
        })
    }
}

/// Arguments for one invocation. The entry point is passed relative to the
/// working directory when it lives under it.
pub fn compile_args(request: &CompileRequest) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec!["build".into(), "--compile".into()];
    if request.minify {
        args.push("--minify".into());
    }
    if request.sourcemap {
        args.push("--sourcemap".into());
    }
    args.push(format!("--target={}", request.target.triple).into());

    let entry = request
        .entry
        .strip_prefix(&request.working_dir)
        .unwrap_or(&request.entry);
    args.push(entry.as_os_str().to_os_string());

    let mut outfile = OsString::from("--outfile=");
    outfile.push(request.outfile.as_os_str());
    args.push(outfile);
    args
}

fn remove_partial(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => debug!(path = %path.display(), "removed partial output"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "failed to remove partial output"),
    }
}

/// Drives a real compiler executable as a subprocess.
pub struct ExternalCompiler {
    locator: CompilerLocator,
}

impl ExternalCompiler {
    pub fn new(locator: CompilerLocator) -> Self {
        Self { locator }
    }
}

#[async_trait]
impl CompilerBackend for ExternalCompiler {
    fn locate(&self) -> Result<PathBuf, Error> {
        self.locator.locate()
    }

    async fn compile(&self, request: CompileRequest) -> Result<CompileOutput, Error> {
        let program = self.locate()?;
        if request.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        if let Some(parent) = request.outfile.parent() {
            fs::create_dir_all(parent).map_err(|e| Error::fs(parent, e))?;
        }

        let args = compile_args(&request);
        debug!(program = %program.display(), ?args, cwd = %request.working_dir.display(), "spawning compiler");

        let target_id = request.target.id.clone();
        let started = Instant::now();
        let mut child = Command::new(&program)
            .args(&args)
            .current_dir(&request.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::CompileFailed {
                target: target_id.clone(),
                exit_code: None,
                stderr: format!("failed to start {}: {e}", program.display()),
            })?;

        let stdout = child.stdout.take();
        let on_output = request.on_output.clone();
        let stdout_task = tokio::spawn(async move {
            let Some(stdout) = stdout else { return };
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if let Some(cb) = &on_output {
                    cb(&line);
                }
            }
        });

        let stderr = child.stderr.take();
        let stderr_task = tokio::spawn(async move {
            let mut captured = String::new();
            if let Some(mut stderr) = stderr {
                let _ = stderr.read_to_string(&mut captured).await;
            }
            captured
        });

        let status = tokio::select! {
            status = child.wait() => status.map_err(|e| Error::CompileFailed {
                target: target_id.clone(),
                exit_code: None,
                stderr: e.to_string(),
            }),
            _ = tokio::time::sleep(request.timeout) => {
                let _ = child.kill().await;
                Err(Error::CompileTimeout {
                    target: target_id.clone(),
                    seconds: request.timeout.as_secs(),
                })
            }
            _ = request.cancel.cancelled() => {
                let _ = child.kill().await;
                Err(Error::Cancelled)
            }
        };

        let status = match status {
            Ok(status) => status,
            Err(e) => {
                stdout_task.abort();
                stderr_task.abort();
                remove_partial(&request.outfile);
                return Err(e);
            }
        };

        let _ = stdout_task.await;
        let stderr = stderr_task.await.unwrap_or_default();
        let duration = started.elapsed();

        if !status.success() {
            remove_partial(&request.outfile);
            return Err(Error::CompileFailed {
                target: target_id,
                exit_code: status.code(),
                stderr,
            });
        }

        let size = fs::metadata(&request.outfile)
            .map_err(|_| Error::CompileFailed {
                target: target_id.clone(),
                exit_code: status.code(),
                stderr: format!(
                    "compiler reported success but wrote no {}\n{stderr}",
                    request.outfile.display()
                ),
            })?
            .len();

        info!(target = %target_id, size, elapsed_ms = duration.as_millis() as u64, "compiled");
        Ok(CompileOutput {
            output: request.outfile,
            size,
            duration,
        })
    }
}
