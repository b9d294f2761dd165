//! Archive extraction.
//!
//! Gzip tarballs go through an ordered list of [`ExtractStrategy`]s; the
//! first that succeeds wins and failures fall through to the next:
//!
//! 1. [`ExternalTar`]: the host `tar` binary
//! 2. [`WindowsShell`]: PowerShell's GZipStream plus [`ustar`], Windows only
//! 3. [`InProcess`]: flate2 plus [`ustar`]
//!
//! Zip archives have no in-process fallback; the native tool must work.

pub mod ustar;

use std::fs;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;

use flate2::read::GzDecoder;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use bf_core::Error;

pub trait ExtractStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    fn is_available(&self) -> bool;

    fn extract(&self, archive: &Path, dest: &Path, cancel: &CancellationToken)
    -> Result<(), Error>;
}

pub struct ExternalTar;

impl ExtractStrategy for ExternalTar {
    fn name(&self) -> &'static str {
        "tar"
    }

    fn is_available(&self) -> bool {
        which::which("tar").is_ok()
    }

    fn extract(
        &self,
        archive: &Path,
        dest: &Path,
        cancel: &CancellationToken,
    ) -> Result<(), Error> {
        fs::create_dir_all(dest).map_err(|e| Error::fs(dest, e))?;
        let mut cmd = Command::new("tar");
        cmd.arg("-xzf").arg(archive).arg("-C").arg(dest);
        run_tool(&mut cmd, archive, cancel)
    }
}

/// Decompresses with PowerShell into a temporary `.tar`, then reads that
/// with the bundled ustar reader.
pub struct WindowsShell;

impl ExtractStrategy for WindowsShell {
    fn name(&self) -> &'static str {
        "powershell"
    }

    fn is_available(&self) -> bool {
        cfg!(windows) && which::which("powershell").is_ok()
    }

    fn extract(
        &self,
        archive: &Path,
        dest: &Path,
        cancel: &CancellationToken,
    ) -> Result<(), Error> {
        let parent = dest.parent().unwrap_or(dest);
        fs::create_dir_all(parent).map_err(|e| Error::fs(parent, e))?;
        let tar = tempfile::Builder::new()
            .suffix(".tar")
            .tempfile_in(parent)
            .map_err(|e| Error::fs(parent, e))?;

        let script = format!(
            "$ErrorActionPreference='Stop'; \
             $in=[IO.File]::OpenRead('{src}'); $out=[IO.File]::Create('{dst}'); \
             $gz=New-Object IO.Compression.GZipStream($in,[IO.Compression.CompressionMode]::Decompress); \
             try {{ $gz.CopyTo($out) }} finally {{ $gz.Dispose(); $out.Dispose(); $in.Dispose() }}",
            src = ps_quote(archive),
            dst = ps_quote(tar.path()),
        );
        let mut cmd = Command::new("powershell");
        cmd.args(["-NoProfile", "-NonInteractive", "-Command", &script]);
        run_tool(&mut cmd, archive, cancel)?;

        let file = fs::File::open(tar.path()).map_err(|e| Error::fs(tar.path(), e))?;
        ustar::unpack(BufReader::new(file), dest, archive, cancel)?;
        Ok(())
    }
}

pub struct InProcess;

impl ExtractStrategy for InProcess {
    fn name(&self) -> &'static str {
        "in-process"
    }

    fn is_available(&self) -> bool {
        true
    }

    fn extract(
        &self,
        archive: &Path,
        dest: &Path,
        cancel: &CancellationToken,
    ) -> Result<(), Error> {
        let file = fs::File::open(archive).map_err(|e| Error::fs(archive, e))?;
        let stats = ustar::unpack(GzDecoder::new(BufReader::new(file)), dest, archive, cancel)?;
        debug!(
            files = stats.files,
            dirs = stats.directories,
            skipped = stats.skipped,
            "unpacked in process"
        );
        Ok(())
    }
}

pub fn default_strategies() -> Vec<Box<dyn ExtractStrategy>> {
    vec![Box::new(ExternalTar), Box::new(WindowsShell), Box::new(InProcess)]
}

/// Extracts with the default strategy list; returns the strategy that worked.
pub fn extract_tar_gz(
    archive: &Path,
    dest: &Path,
    cancel: &CancellationToken,
) -> Result<&'static str, Error> {
    extract_tar_gz_with(&default_strategies(), archive, dest, cancel)
}

/// Tries `strategies` in order. When `dest` did not exist beforehand it is
/// emptied between attempts so a half-finished attempt leaves nothing behind.
pub fn extract_tar_gz_with(
    strategies: &[Box<dyn ExtractStrategy>],
    archive: &Path,
    dest: &Path,
    cancel: &CancellationToken,
) -> Result<&'static str, Error> {
    let owns_dest = !dest.exists();
    let mut failures = Vec::new();

    for strategy in strategies.iter().filter(|s| s.is_available()) {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        match strategy.extract(archive, dest, cancel) {
            Ok(()) => {
                debug!(strategy = strategy.name(), archive = %archive.display(), "extracted");
                return Ok(strategy.name());
            }
            Err(Error::Cancelled) => return Err(Error::Cancelled),
            Err(e) => {
                warn!(strategy = strategy.name(), error = %e, "extraction strategy failed");
                failures.push(format!("{}: {}", strategy.name(), first_line(&e.to_string())));
                if owns_dest && dest.exists() {
                    fs::remove_dir_all(dest).map_err(|e| Error::fs(dest, e))?;
                }
            }
        }
    }

    Err(Error::ExtractionFailed {
        archive: archive.to_path_buf(),
        message: if failures.is_empty() {
            "no extraction strategy available".to_string()
        } else {
            failures.join("; ")
        },
    })
}

/// Native unzip. Failure is final; there is no fallback.
pub fn extract_zip(archive: &Path, dest: &Path, cancel: &CancellationToken) -> Result<(), Error> {
    fs::create_dir_all(dest).map_err(|e| Error::fs(dest, e))?;
    let mut cmd = if cfg!(windows) {
        let script = format!(
            "$ErrorActionPreference='Stop'; Expand-Archive -LiteralPath '{}' -DestinationPath '{}' -Force",
            ps_quote(archive),
            ps_quote(dest)
        );
        let mut cmd = Command::new("powershell");
        cmd.args(["-NoProfile", "-NonInteractive", "-Command", &script]);
        cmd
    } else {
        let mut cmd = Command::new("unzip");
        cmd.arg("-o").arg("-q").arg(archive).arg("-d").arg(dest);
        cmd
    };
    run_tool(&mut cmd, archive, cancel)
}

/// The sole directory inside `dir`, if it contains exactly one entry and
/// that entry is a directory. npm tarballs wrap everything in `package/`,
/// GitHub source tarballs in `{repo}-{sha}/`.
pub fn single_top_level_dir(dir: &Path) -> Result<Option<PathBuf>, Error> {
    let mut entries = fs::read_dir(dir).map_err(|e| Error::fs(dir, e))?;
    let Some(first) = entries.next() else {
        return Ok(None);
    };
    let first = first.map_err(|e| Error::fs(dir, e))?;
    if entries.next().is_some() {
        return Ok(None);
    }
    let is_dir = first.file_type().map(|t| t.is_dir()).unwrap_or(false);
    Ok(is_dir.then(|| first.path()))
}

fn ps_quote(path: &Path) -> String {
    path.display().to_string().replace('\'', "''")
}

fn first_line(s: &str) -> &str {
    s.lines().next().unwrap_or(s)
}

/// Runs an archive tool to completion, killing it if `cancel` fires.
///
/// Stderr is drained on its own thread from the moment the child starts;
/// a tool that fills the pipe would otherwise block forever.
fn run_tool(cmd: &mut Command, archive: &Path, cancel: &CancellationToken) -> Result<(), Error> {
    debug!(command = ?cmd, "spawning archive tool");
    let mut child = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| Error::ExtractionFailed {
            archive: archive.to_path_buf(),
            message: format!("failed to spawn {:?}: {e}", cmd.get_program()),
        })?;

    let stderr_reader = child.stderr.take().map(|mut pipe| {
        std::thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = pipe.read_to_end(&mut buf);
            String::from_utf8_lossy(&buf).into_owned()
        })
    });
    let collect_stderr = |reader: Option<std::thread::JoinHandle<String>>| {
        reader
            .and_then(|handle| handle.join().ok())
            .unwrap_or_default()
    };

    let status = loop {
        if cancel.is_cancelled() {
            let _ = child.kill();
            let _ = child.wait();
            collect_stderr(stderr_reader);
            return Err(Error::Cancelled);
        }
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) => std::thread::sleep(Duration::from_millis(25)),
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                collect_stderr(stderr_reader);
                return Err(Error::ExtractionFailed {
                    archive: archive.to_path_buf(),
                    message: e.to_string(),
                });
            }
        }
    };

    let stderr = collect_stderr(stderr_reader);
    if status.success() {
        return Ok(());
    }
    Err(Error::ExtractionFailed {
        archive: archive.to_path_buf(),
        message: format!("{:?} exited with {status}: {}", cmd.get_program(), stderr.trim()),
    })
}
