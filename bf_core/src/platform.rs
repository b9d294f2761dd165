//! Platform, architecture and build-variant model, plus host detection.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::Error;

/// Operating system family a binary is built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Windows,
    Linux,
    Macos,
    Android,
}

impl Platform {
    pub const ALL: [Platform; 4] = [
        Platform::Windows,
        Platform::Linux,
        Platform::Macos,
        Platform::Android,
    ];

    pub const fn as_str(&self) -> &'static str {
        match self {
            Platform::Windows => "windows",
            Platform::Linux => "linux",
            Platform::Macos => "macos",
            Platform::Android => "android",
        }
    }

    /// Platform whose vendored helper binaries run on this one. Termux runs
    /// stock Linux executables.
    pub const fn asset_family(&self) -> Platform {
        match self {
            Platform::Android => Platform::Linux,
            other => *other,
        }
    }

    /// Maps a host OS identifier onto a platform. Hosts are only ever
    /// windows, linux or macos; android is reachable as a build target only.
    pub fn from_os(os: &str) -> Option<Platform> {
        match os.to_ascii_lowercase().as_str() {
            "windows" | "win32" => Some(Platform::Windows),
            "linux" | "android" => Some(Platform::Linux),
            "macos" | "darwin" => Some(Platform::Macos),
            _ => None,
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "windows" | "win32" => Ok(Platform::Windows),
            "linux" => Ok(Platform::Linux),
            "macos" | "darwin" => Ok(Platform::Macos),
            "android" | "termux" => Ok(Platform::Android),
            _ => Err(Error::UnknownPlatform {
                name: s.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Arch {
    X64,
    Arm64,
}

impl Arch {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Arch::X64 => "x64",
            Arch::Arm64 => "arm64",
        }
    }

    pub fn from_machine(arch: &str) -> Option<Arch> {
        match arch.to_ascii_lowercase().as_str() {
            "x86_64" | "x64" | "amd64" => Some(Arch::X64),
            "aarch64" | "arm64" => Some(Arch::Arm64),
            _ => None,
        }
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Build flavor within one platform/arch pair: CPU baseline, libc or
/// sandboxed environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Variant {
    Standard,
    Modern,
    Baseline,
    Musl,
    Termux,
}

impl Variant {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Variant::Standard => "standard",
            Variant::Modern => "modern",
            Variant::Baseline => "baseline",
            Variant::Musl => "musl",
            Variant::Termux => "termux",
        }
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The machine binforge itself runs on. Either half may be unrecognized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Host {
    pub platform: Option<Platform>,
    pub arch: Option<Arch>,
}

impl Host {
    pub fn detect() -> Self {
        Self::from_identifiers(std::env::consts::OS, std::env::consts::ARCH)
    }

    /// Builds a host from raw OS/arch identifiers, e.g. `("windows", "x86_64")`.
    pub fn from_identifiers(os: &str, arch: &str) -> Self {
        Self {
            platform: Platform::from_os(os),
            arch: Arch::from_machine(arch),
        }
    }
}

impl fmt::Display for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let platform = self.platform.map(|p| p.as_str()).unwrap_or("unknown");
        let arch = self.arch.map(|a| a.as_str()).unwrap_or("unknown");
        write!(f, "{platform}-{arch}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn os_identifiers_map_onto_three_host_platforms() {
        assert_eq!(Platform::from_os("win32"), Some(Platform::Windows));
        assert_eq!(Platform::from_os("darwin"), Some(Platform::Macos));
        assert_eq!(Platform::from_os("linux"), Some(Platform::Linux));
        assert_eq!(Platform::from_os("android"), Some(Platform::Linux));
        assert_eq!(Platform::from_os("freebsd"), None);
    }

    #[test]
    fn machine_names_normalize() {
        assert_eq!(Arch::from_machine("x86_64"), Some(Arch::X64));
        assert_eq!(Arch::from_machine("AMD64"), Some(Arch::X64));
        assert_eq!(Arch::from_machine("aarch64"), Some(Arch::Arm64));
        assert_eq!(Arch::from_machine("riscv64"), None);
    }

    #[test]
    fn platform_parses_target_names() {
        assert_eq!("android".parse::<Platform>().unwrap(), Platform::Android);
        assert_eq!("MacOS".parse::<Platform>().unwrap(), Platform::Macos);
        assert!(matches!(
            "plan9".parse::<Platform>(),
            Err(Error::UnknownPlatform { .. })
        ));
    }

    #[test]
    fn android_uses_linux_assets() {
        assert_eq!(Platform::Android.asset_family(), Platform::Linux);
        assert_eq!(Platform::Windows.asset_family(), Platform::Windows);
    }

    #[test]
    fn host_display_marks_unknown_parts() {
        let host = Host::from_identifiers("haiku", "x86_64");
        assert_eq!(host.to_string(), "unknown-x64");
    }
}
