use serde::Serialize;

use crate::platform::{Arch, Platform, Variant};

/// Shell a Termux-style target falls back to when nothing else resolves.
pub const TERMUX_SHELL: &str = "/data/data/com.termux/files/usr/bin/bash";

/// One compiler invocation shape, before a tool's binary name is applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildTargetTemplate {
    pub id: &'static str,
    /// Value passed to the compiler as `--target=`.
    pub triple: &'static str,
    pub platform: Platform,
    pub arch: Arch,
    pub variant: Variant,
    pub extension: &'static str,
    pub cpu_note: Option<&'static str>,
    pub default_shell: Option<&'static str>,
}

impl BuildTargetTemplate {
    /// Concrete target with output `{binary_name}-{id}{extension}`.
    pub fn render(&self, binary_name: &str) -> BuildTarget {
        BuildTarget {
            id: self.id.to_string(),
            triple: self.triple.to_string(),
            platform: self.platform,
            arch: self.arch,
            variant: self.variant,
            extension: self.extension.to_string(),
            cpu_note: self.cpu_note.map(str::to_string),
            default_shell: self.default_shell.map(str::to_string),
            output: format!("{}-{}{}", binary_name, self.id, self.extension),
        }
    }
}

/// A template bound to one tool. Generated per run, never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildTarget {
    pub id: String,
    pub triple: String,
    pub platform: Platform,
    pub arch: Arch,
    pub variant: Variant,
    pub extension: String,
    pub cpu_note: Option<String>,
    pub default_shell: Option<String>,
    /// Output file name, relative to the per-platform output directory.
    pub output: String,
}

const fn template(
    id: &'static str,
    triple: &'static str,
    platform: Platform,
    arch: Arch,
    variant: Variant,
) -> BuildTargetTemplate {
    BuildTargetTemplate {
        id,
        triple,
        platform,
        arch,
        variant,
        extension: match platform {
            Platform::Windows => ".exe",
            _ => "",
        },
        cpu_note: None,
        default_shell: None,
    }
}

/// The built-in target matrix. Ordering is the display order.
pub fn builtin_templates() -> Vec<BuildTargetTemplate> {
    use Arch::*;
    use Platform::*;
    use Variant::*;

    vec![
        template("windows-x64", "bun-windows-x64", Windows, X64, Standard),
        BuildTargetTemplate {
            cpu_note: Some("requires AVX2 (Haswell or newer)"),
            ..template(
                "windows-x64-modern",
                "bun-windows-x64-modern",
                Windows,
                X64,
                Modern,
            )
        },
        BuildTargetTemplate {
            cpu_note: Some("for CPUs without AVX2"),
            ..template(
                "windows-x64-baseline",
                "bun-windows-x64-baseline",
                Windows,
                X64,
                Baseline,
            )
        },
        template("linux-x64", "bun-linux-x64", Linux, X64, Standard),
        BuildTargetTemplate {
            cpu_note: Some("for CPUs without AVX2"),
            ..template(
                "linux-x64-baseline",
                "bun-linux-x64-baseline",
                Linux,
                X64,
                Baseline,
            )
        },
        template("linux-x64-musl", "bun-linux-x64-musl", Linux, X64, Musl),
        template("linux-arm64", "bun-linux-arm64", Linux, Arm64, Standard),
        template("linux-arm64-musl", "bun-linux-arm64-musl", Linux, Arm64, Musl),
        template("macos-x64", "bun-darwin-x64", Macos, X64, Standard),
        BuildTargetTemplate {
            cpu_note: Some("for CPUs without AVX2"),
            ..template(
                "macos-x64-baseline",
                "bun-darwin-x64-baseline",
                Macos,
                X64,
                Baseline,
            )
        },
        template("macos-arm64", "bun-darwin-arm64", Macos, Arm64, Standard),
        BuildTargetTemplate {
            default_shell: Some(TERMUX_SHELL),
            ..template("android-arm64", "bun-linux-arm64", Android, Arm64, Termux)
        },
    ]
}
