use serde::Serialize;

use crate::platform::Platform;

/// Where a tool's source package comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ToolSource {
    Npm { package: String },
    #[serde(rename = "github")]
    GitHub { owner: String, repo: String },
    /// Built from a directory the caller supplies; never downloaded.
    Local,
}

impl ToolSource {
    /// Name recorded in the download manifest.
    pub fn package_name(&self) -> Option<String> {
        match self {
            ToolSource::Npm { package } => Some(package.clone()),
            ToolSource::GitHub { owner, repo } => Some(format!("{owner}/{repo}")),
            ToolSource::Local => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildMeta {
    /// Entry-point script, relative to the source root, `/`-separated.
    pub entry_point: String,
    /// Prefix for the `{PREFIX}_ENTRYPOINT` / `{PREFIX}_BUNDLED` / `{PREFIX}_SHELL`
    /// variables.
    pub env_prefix: String,
    pub binary_name: Option<String>,
}

/// Which upstream code shapes a tool is known to contain. Strict patching
/// fails when a rewrite listed here does not match.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PatchProfile {
    pub shell_bypass: bool,
    pub entrypoint_marker: bool,
}

/// An auxiliary file shipped inside the package and embedded into the binary
/// when present on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VendorAsset {
    /// Path relative to the source root, `/`-separated.
    pub path: String,
    /// Only embedded for targets of this platform family; `None` means all.
    pub platform: Option<Platform>,
}

impl VendorAsset {
    pub fn applies_to(&self, platform: Platform) -> bool {
        self.platform
            .is_none_or(|p| p == platform.asset_family())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolDescriptor {
    pub id: String,
    pub display_name: String,
    pub source: ToolSource,
    pub build: BuildMeta,
    pub patches: PatchProfile,
    pub assets: Vec<VendorAsset>,
}

impl ToolDescriptor {
    pub fn binary_name(&self) -> &str {
        self.build.binary_name.as_deref().unwrap_or(&self.id)
    }

    pub fn is_local(&self) -> bool {
        matches!(self.source, ToolSource::Local)
    }
}

fn ripgrep_assets() -> Vec<VendorAsset> {
    [
        ("x64-win32", "rg.exe", Platform::Windows),
        ("arm64-win32", "rg.exe", Platform::Windows),
        ("x64-linux", "rg", Platform::Linux),
        ("arm64-linux", "rg", Platform::Linux),
        ("x64-darwin", "rg", Platform::Macos),
        ("arm64-darwin", "rg", Platform::Macos),
    ]
    .into_iter()
    .map(|(dir, file, platform)| VendorAsset {
        path: format!("vendor/ripgrep/{dir}/{file}"),
        platform: Some(platform),
    })
    .collect()
}

/// Tools binforge knows how to build. The first entry is the default tool.
pub fn builtin_tools() -> Vec<ToolDescriptor> {
    let mut claude_assets = vec![VendorAsset {
        path: "yoga.wasm".to_string(),
        platform: None,
    }];
    claude_assets.extend(ripgrep_assets());

    vec![
        ToolDescriptor {
            id: "claude-code".to_string(),
            display_name: "Claude Code".to_string(),
            source: ToolSource::Npm {
                package: "@anthropic-ai/claude-code".to_string(),
            },
            build: BuildMeta {
                entry_point: "cli.js".to_string(),
                env_prefix: "CLAUDE_CODE".to_string(),
                binary_name: None,
            },
            patches: PatchProfile {
                shell_bypass: true,
                entrypoint_marker: true,
            },
            assets: claude_assets,
        },
        ToolDescriptor {
            id: "codex".to_string(),
            display_name: "OpenAI Codex".to_string(),
            source: ToolSource::Npm {
                package: "@openai/codex".to_string(),
            },
            build: BuildMeta {
                entry_point: "bin/codex.js".to_string(),
                env_prefix: "CODEX".to_string(),
                binary_name: Some("codex".to_string()),
            },
            patches: PatchProfile::default(),
            assets: Vec::new(),
        },
        ToolDescriptor {
            id: "gemini-cli".to_string(),
            display_name: "Gemini CLI".to_string(),
            source: ToolSource::Npm {
                package: "@google/gemini-cli".to_string(),
            },
            build: BuildMeta {
                entry_point: "dist/index.js".to_string(),
                env_prefix: "GEMINI_CLI".to_string(),
                binary_name: Some("gemini".to_string()),
            },
            patches: PatchProfile::default(),
            assets: Vec::new(),
        },
        ToolDescriptor {
            id: "opencode".to_string(),
            display_name: "opencode".to_string(),
            source: ToolSource::GitHub {
                owner: "sst".to_string(),
                repo: "opencode".to_string(),
            },
            build: BuildMeta {
                entry_point: "packages/opencode/src/index.ts".to_string(),
                env_prefix: "OPENCODE".to_string(),
                binary_name: None,
            },
            patches: PatchProfile::default(),
            assets: Vec::new(),
        },
        ToolDescriptor {
            id: "local".to_string(),
            display_name: "Local build".to_string(),
            source: ToolSource::Local,
            build: BuildMeta {
                entry_point: "cli.js".to_string(),
                env_prefix: "LOCAL_CLI".to_string(),
                binary_name: Some("cli".to_string()),
            },
            patches: PatchProfile::default(),
            assets: Vec::new(),
        },
    ]
}
