use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum Error {
    #[error("unknown tool '{id}'\n  hint: run 'binforge tools' to list the available tools")]
    UnknownTool { id: String },

    #[error(
        "unknown build target '{id}'\n  hint: run 'binforge targets' to list the available targets"
    )]
    UnknownTarget { id: String },

    #[error("unknown platform '{name}'\n  hint: expected one of windows, linux, macos, android")]
    UnknownPlatform { name: String },

    #[error("invalid registry: {message}\n  hint: this is a bug in the built-in tables; please report it")]
    InvalidRegistry { message: String },

    #[error(
        "entry point for '{tool}' not found at {}\n  hint: run 'binforge download {tool}' or check --source-dir",
        .path.display()
    )]
    MissingEntryPoint { tool: String, path: PathBuf },

    #[error(
        "{} has already been prepared for compilation\n  hint: prepare from the pristine entry point, not from a prepared copy",
        .path.display()
    )]
    AlreadyPrepared { path: PathBuf },

    #[error("package '{package}' not found in the registry\n  hint: check the package name")]
    PackageNotFound { package: String },

    #[error("version '{version}' of '{package}' does not exist\n  hint: omit --version to use the latest release")]
    UnknownVersion { package: String, version: String },

    #[error("network error fetching {url}: {message}\n  hint: check your internet connection and try again")]
    NetworkFailure { url: String, message: String },

    #[error("HTTP {status} fetching {url}\n  hint: the server rejected the request; try again later")]
    HttpStatus { url: String, status: u16 },

    #[error("timed out after {seconds}s waiting for {url}\n  hint: raise --download-timeout on slow connections")]
    Timeout { url: String, seconds: u64 },

    #[error("too many redirects ({hops}) fetching {url}\n  hint: the server is redirecting in a loop")]
    RedirectLoop { url: String, hops: usize },

    #[error(
        "checksum verification failed{}\n  expected: {expected}\n  got:      {actual}\n  hint: this may indicate a corrupted download or CDN issue; try again",
        for_file(.file_name)
    )]
    ChecksumMismatch {
        expected: String,
        actual: String,
        file_name: Option<String>,
    },

    #[error("unsupported integrity digest '{algorithm}'\n  hint: SRI sha1/sha256/sha384/sha512 and 40-character hex shasums are supported")]
    UnsupportedDigest { algorithm: String },

    #[error("failed to extract {}: {message}", .archive.display())]
    ExtractionFailed { archive: PathBuf, message: String },

    #[error(
        "patch '{patch}' did not match {}\n  hint: the upstream source changed shape; rerun with --lenient-patches to build anyway",
        .file.display()
    )]
    PatchNotApplied { patch: String, file: PathBuf },

    #[error(
        "compiler '{name}' not found (searched: {})\n  hint: install it or put it on PATH",
        joined(.searched)
    )]
    CompilerNotFound { name: String, searched: Vec<PathBuf> },

    #[error("compilation for '{target}' failed{}\n{stderr}", exit_suffix(.exit_code))]
    CompileFailed {
        target: String,
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("compilation for '{target}' exceeded {seconds}s\n  hint: raise --compile-timeout")]
    CompileTimeout { target: String, seconds: u64 },

    #[error("operation cancelled")]
    Cancelled,

    #[error("{}: {message}", .path.display())]
    FileSystem { path: PathBuf, message: String },
}

impl Error {
    pub fn fs(path: impl AsRef<Path>, err: impl std::fmt::Display) -> Self {
        Error::FileSystem {
            path: path.as_ref().to_path_buf(),
            message: err.to_string(),
        }
    }
}

fn for_file(name: &Option<String>) -> String {
    match name {
        Some(name) => format!(" for '{name}'"),
        None => String::new(),
    }
}

fn joined(paths: &[PathBuf]) -> String {
    if paths.is_empty() {
        return "nothing".to_string();
    }
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

fn exit_suffix(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!(" (exit code {code})"),
        None => " (terminated by signal)".to_string(),
    }
}
