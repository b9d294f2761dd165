//! Text transforms that turn a tool's entry-point script into one the
//! compiler can bundle into a standalone executable.
//!
//! Pipeline, each stage a pure `&str -> String` step:
//! 1. refuse input that already carries [`PREPARED_MARKER`]
//! 2. keep the shebang line in front
//! 3. asset-embedding imports plus a lookup table keyed by relative path
//! 4. windows-only shims: executable path/dir, module URL, POSIX-isms
//! 5. common shims: runtime shell resolver and the bundled-build flag
//! 6. rewrites of known upstream code shapes (shell bypass, entry marker)
//!
//! Rewrites are regex substitutions on minified output. Each is `Required`
//! or `Optional`; see [`PatchMode`] for what happens when one matches nothing.

use std::path::Path;

use regex::Regex;
use tracing::{debug, warn};

use crate::Error;
use crate::context::PatchMode;
use crate::platform::Platform;
use crate::target::TERMUX_SHELL;
use crate::tool::PatchProfile;

/// First line of every prepared script after the shebang.
pub const PREPARED_MARKER: &str = "// binforge:prepared";

/// Extension tag between the entry point's stem and its extension.
const PREPARED_TAG: &str = "prepared";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requirement {
    Required,
    Optional,
}

/// An asset found on disk, ready to embed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbeddedAsset {
    /// Lookup key: path relative to the source root.
    pub key: String,
    /// Import specifier relative to the prepared script.
    pub specifier: String,
}

#[derive(Debug, Clone)]
pub struct PatchContext<'a> {
    pub tool_id: &'a str,
    pub env_prefix: &'a str,
    pub platform: Platform,
    pub default_shell: Option<&'a str>,
    pub profile: PatchProfile,
    pub assets: &'a [EmbeddedAsset],
    pub mode: PatchMode,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedPatch {
    pub name: String,
    pub requirement: Requirement,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PatchReport {
    pub applied: Vec<String>,
    pub skipped: Vec<SkippedPatch>,
}

impl PatchReport {
    pub fn skipped_required(&self) -> impl Iterator<Item = &SkippedPatch> {
        self.skipped
            .iter()
            .filter(|s| s.requirement == Requirement::Required)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedScript {
    pub contents: String,
    pub report: PatchReport,
}

struct Rewrite {
    name: &'static str,
    pattern: Regex,
    replacement: String,
    requirement: Requirement,
}

impl Rewrite {
    fn new(
        name: &'static str,
        pattern: &str,
        replacement: impl Into<String>,
        requirement: Requirement,
    ) -> Result<Self, Error> {
        let pattern = Regex::new(pattern).map_err(|e| Error::InvalidRegistry {
            message: format!("patch '{name}' has an invalid pattern: {e}"),
        })?;
        Ok(Self {
            name,
            pattern,
            replacement: replacement.into(),
            requirement,
        })
    }
}

/// Runs the whole pipeline over a pristine entry point. `file` only labels
/// errors.
pub fn prepare_script(
    source: &str,
    ctx: &PatchContext<'_>,
    file: &Path,
) -> Result<PreparedScript, Error> {
    if source.contains(PREPARED_MARKER) {
        return Err(Error::AlreadyPrepared {
            path: file.to_path_buf(),
        });
    }

    let mut report = PatchReport::default();
    let (shebang, body) = split_shebang(source);

    let mut header = format!(
        "{PREPARED_MARKER} {} for {}\n",
        ctx.tool_id, ctx.platform
    );
    if !ctx.assets.is_empty() {
        header.push_str(&embed_assets(ctx.assets));
        report.applied.push(format!("embed-assets ({})", ctx.assets.len()));
    }
    if ctx.platform == Platform::Windows {
        header.push_str(WINDOWS_SHIM);
        report.applied.push("windows-shim".to_string());
    }
    header.push_str(&common_shims(ctx));
    report.applied.push("common-shims".to_string());

    let mut body = body.to_string();
    for rewrite in rewrites(ctx)? {
        let hits = rewrite.pattern.find_iter(&body).count();
        if hits > 0 {
            body = rewrite
                .pattern
                .replace_all(&body, rewrite.replacement.as_str())
                .into_owned();
            debug!(patch = rewrite.name, hits, "applied rewrite");
            report.applied.push(rewrite.name.to_string());
            continue;
        }
        if rewrite.requirement == Requirement::Required && ctx.mode == PatchMode::Strict {
            return Err(Error::PatchNotApplied {
                patch: rewrite.name.to_string(),
                file: file.to_path_buf(),
            });
        }
        warn!(patch = rewrite.name, file = %file.display(), "rewrite matched nothing; skipped");
        report.skipped.push(SkippedPatch {
            name: rewrite.name.to_string(),
            requirement: rewrite.requirement,
        });
    }

    let mut contents = String::with_capacity(shebang.len() + header.len() + body.len() + 1);
    contents.push_str(shebang);
    contents.push_str(&header);
    contents.push_str(&body);
    Ok(PreparedScript { contents, report })
}

/// Splits off a leading `#!` line, newline included.
fn split_shebang(source: &str) -> (&str, &str) {
    if !source.starts_with("#!") {
        return ("", source);
    }
    match source.find('\n') {
        Some(i) => source.split_at(i + 1),
        None => (source, ""),
    }
}

fn embed_assets(assets: &[EmbeddedAsset]) -> String {
    let mut out = String::new();
    for (i, asset) in assets.iter().enumerate() {
        out.push_str(&format!(
            "import __bfAsset{i} from {} with {{ type: \"file\" }};\n",
            js_string(&asset.specifier)
        ));
    }
    out.push_str("globalThis.__bfEmbeddedAssets = Object.freeze({\n");
    for (i, asset) in assets.iter().enumerate() {
        out.push_str(&format!("  {}: __bfAsset{i},\n", js_string(&asset.key)));
    }
    out.push_str("});\n");
    out
}

const WINDOWS_SHIM: &str = r#"import { pathToFileURL as __bfPathToFileURL } from "node:url";
import { dirname as __bfDirname } from "node:path";
globalThis.__bfSelfPath = process.execPath;
globalThis.__bfSelfDir = __bfDirname(process.execPath);
globalThis.__bfSelfFileUrl = __bfPathToFileURL(process.execPath).href;
"#;

const SHELL_RESOLVER: &str = r#"import * as __bfFs from "node:fs";
globalThis.__bfResolveShell = function __bfResolveShell() {
  const exists = (p) => {
    try {
      return !!p && __bfFs.existsSync(p);
    } catch {
      return false;
    }
  };
  const override = process.env.__PREFIX___SHELL;
  if (override) return override;
  if (process.platform === "win32") {
    const sysRoot = process.env.SystemRoot || "C:\\Windows";
    const programFiles = process.env.ProgramFiles || "C:\\Program Files";
    const candidates = [
      programFiles + "\\PowerShell\\7\\pwsh.exe",
      sysRoot + "\\System32\\WindowsPowerShell\\v1.0\\powershell.exe",
      process.env.ComSpec || sysRoot + "\\System32\\cmd.exe",
    ];
    for (const c of candidates) if (exists(c)) return c;
    return "cmd.exe";
  }
  const sandboxShell = __SANDBOX_SHELL__;
  if (exists(sandboxShell)) return sandboxShell;
  if (exists(process.env.SHELL)) return process.env.SHELL;
  const common = [
    "/bin/bash", "/usr/bin/bash", "/usr/local/bin/bash",
    "/bin/zsh", "/usr/bin/zsh", "/usr/local/bin/zsh",
    "/bin/sh", "/usr/bin/sh",
  ];
  for (const c of common) if (exists(c)) return c;
  return "sh";
};
if (!process.env.__PREFIX___BUNDLED) process.env.__PREFIX___BUNDLED = "1";
"#;

fn common_shims(ctx: &PatchContext<'_>) -> String {
    let sandbox = ctx.default_shell.unwrap_or(TERMUX_SHELL);
    SHELL_RESOLVER
        .replace("__SANDBOX_SHELL__", &js_string(sandbox))
        .replace("__PREFIX__", ctx.env_prefix)
}

fn rewrites(ctx: &PatchContext<'_>) -> Result<Vec<Rewrite>, Error> {
    use Requirement::*;

    let mut out = Vec::new();
    if ctx.platform == Platform::Windows {
        out.push(Rewrite::new(
            "module-url",
            r"import\.meta\.url\b",
            "globalThis.__bfSelfFileUrl",
            Optional,
        )?);
        out.push(Rewrite::new(
            "module-dir",
            r"import\.meta\.(?:dirname|dir)\b",
            "globalThis.__bfSelfDir",
            Optional,
        )?);
        out.push(Rewrite::new(
            "module-path",
            r"import\.meta\.(?:filename|path)\b",
            "globalThis.__bfSelfPath",
            Optional,
        )?);
        out.push(Rewrite::new(
            "null-device",
            r#"(["'])/dev/null(["'])"#,
            "${1}NUL${2}",
            Optional,
        )?);
        out.push(Rewrite::new(
            "null-redirect",
            r"([0-9&]?>)\s*/dev/null\b",
            "${1}NUL",
            Optional,
        )?);
        out.push(Rewrite::new(
            "shell-source",
            r#"\bsource\s+([~/$][^\s;&|"'`]*)"#,
            ". ${1}",
            Optional,
        )?);
        out.push(Rewrite::new(
            "shell-eval",
            r#"\beval\s+(\\?)"\$\(([^)"\\]*)\)\\?""#,
            "Invoke-Expression (${2})",
            Optional,
        )?);
    }

    let requirement = |needed: bool| if needed { Required } else { Optional };
    out.push(Rewrite::new(
        "shell-bypass",
        concat!(
            r#"throw\s+new\s+Error\(\s*(?:"No suitable shell found[^"]*"|"#,
            r#"'No suitable shell found[^']*'|`No suitable shell found[^`]*`)\s*\)"#
        ),
        "return globalThis.__bfResolveShell()",
        requirement(ctx.profile.shell_bypass),
    )?);

    let prefix = regex::escape(ctx.env_prefix);
    out.push(Rewrite::new(
        "entrypoint-marker",
        &format!(r#"process\.env\.{prefix}_ENTRYPOINT\s*=\s*(?:"[^"]*"|'[^']*')"#),
        format!(r#"${{0}},process.env.{}_BUNDLED="1""#, ctx.env_prefix),
        requirement(ctx.profile.entrypoint_marker),
    )?);
    Ok(out)
}

/// Quotes `s` as a double-quoted JS string literal.
fn js_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

/// Import specifier for `asset` (relative to the source root) as seen from
/// the directory holding `entry` (also relative to the source root).
pub fn relative_specifier(entry: &str, asset: &str) -> String {
    let entry_dir: Vec<&str> = entry
        .split('/')
        .filter(|c| !c.is_empty() && *c != ".")
        .collect();
    let entry_dir = &entry_dir[..entry_dir.len().saturating_sub(1)];
    let asset: Vec<&str> = asset
        .split('/')
        .filter(|c| !c.is_empty() && *c != ".")
        .collect();

    let common = entry_dir
        .iter()
        .zip(&asset)
        .take_while(|(a, b)| a == b)
        .count();
    let ups = entry_dir.len() - common;
    let rest = asset[common..].join("/");
    if ups == 0 {
        format!("./{rest}")
    } else {
        format!("{}{rest}", "../".repeat(ups))
    }
}

/// `cli.js` for windows becomes `cli.windows.prepared.js`.
pub fn prepared_file_name(entry_file_name: &str, platform: Platform) -> String {
    match entry_file_name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => {
            format!("{stem}.{platform}.{PREPARED_TAG}.{ext}")
        }
        _ => format!("{entry_file_name}.{platform}.{PREPARED_TAG}.js"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    const UPSTREAM: &str = concat!(
        "#!/usr/bin/env node\n",
        "import{createRequire as cR}from\"node:module\";var req=cR(import.meta.url);",
        "function pS(){let Q=process.env.SHELL;if(!Q)throw new Error(\"No suitable shell found. ",
        "Claude CLI requires a Posix shell environment.\");return Q}",
        "process.env.CLAUDE_CODE_ENTRYPOINT=\"cli\";",
        "var nul=\"/dev/null\";run(\"git status 2>/dev/null\");run('source ~/.bashrc');\n",
    );

    fn ctx<'a>(platform: Platform, assets: &'a [EmbeddedAsset]) -> PatchContext<'a> {
        PatchContext {
            tool_id: "claude-code",
            env_prefix: "CLAUDE_CODE",
            platform,
            default_shell: None,
            profile: PatchProfile {
                shell_bypass: true,
                entrypoint_marker: true,
            },
            assets,
            mode: PatchMode::Strict,
        }
    }

    fn file() -> PathBuf {
        PathBuf::from("/src/cli.js")
    }

    #[test]
    fn shebang_stays_on_first_line() {
        let out = prepare_script(UPSTREAM, &ctx(Platform::Linux, &[]), &file()).unwrap();
        let mut lines = out.contents.lines();
        assert_eq!(lines.next(), Some("#!/usr/bin/env node"));
        assert!(lines.next().unwrap().starts_with(PREPARED_MARKER));
    }

    #[test]
    fn shell_bypass_replaces_the_hard_failure() {
        let out = prepare_script(UPSTREAM, &ctx(Platform::Linux, &[]), &file()).unwrap();
        assert!(!out.contents.contains("No suitable shell found"));
        assert!(out.contents.contains("return globalThis.__bfResolveShell()"));
        assert!(out.contents.contains("process.env.CLAUDE_CODE_SHELL"));
    }

    #[test]
    fn entrypoint_marker_gains_bundled_flag() {
        let out = prepare_script(UPSTREAM, &ctx(Platform::Linux, &[]), &file()).unwrap();
        assert!(out.contents.contains(
            "process.env.CLAUDE_CODE_ENTRYPOINT=\"cli\",process.env.CLAUDE_CODE_BUNDLED=\"1\""
        ));
    }

    #[test]
    fn linux_output_keeps_posix_idioms() {
        let out = prepare_script(UPSTREAM, &ctx(Platform::Linux, &[]), &file()).unwrap();
        assert!(out.contents.contains("\"/dev/null\""));
        assert!(out.contents.contains("import.meta.url"));
        assert!(!out.contents.contains("__bfSelfFileUrl"));
    }

    #[test]
    fn windows_output_rewrites_posix_idioms() {
        let out = prepare_script(UPSTREAM, &ctx(Platform::Windows, &[]), &file()).unwrap();
        assert!(out.contents.contains("var nul=\"NUL\""));
        assert!(out.contents.contains("git status 2>NUL"));
        assert!(out.contents.contains("'. ~/.bashrc'"));
        assert!(out.contents.contains("cR(globalThis.__bfSelfFileUrl)"));
        assert!(out.contents.contains("globalThis.__bfSelfDir = __bfDirname(process.execPath)"));
        assert!(out.report.applied.iter().any(|a| a == "windows-shim"));
    }

    #[test]
    fn windows_eval_becomes_invoke_expression() {
        let source = "run('eval \"$(fnm env)\"');process.env.CLAUDE_CODE_ENTRYPOINT='cli';throw new Error('No suitable shell found')";
        let out = prepare_script(source, &ctx(Platform::Windows, &[]), &file()).unwrap();
        assert!(out.contents.contains("run('Invoke-Expression (fnm env)')"));
    }

    #[test]
    fn assets_become_imports_and_table_entries() {
        let assets = vec![
            EmbeddedAsset {
                key: "yoga.wasm".to_string(),
                specifier: "./yoga.wasm".to_string(),
            },
            EmbeddedAsset {
                key: "vendor/ripgrep/x64-linux/rg".to_string(),
                specifier: "./vendor/ripgrep/x64-linux/rg".to_string(),
            },
        ];
        let out = prepare_script(UPSTREAM, &ctx(Platform::Linux, &assets), &file()).unwrap();
        assert!(out.contents.contains(
            "import __bfAsset0 from \"./yoga.wasm\" with { type: \"file\" };"
        ));
        assert!(out.contents.contains("\"vendor/ripgrep/x64-linux/rg\": __bfAsset1,"));
        assert_eq!(out.report.applied[0], "embed-assets (2)");
    }

    #[test]
    fn termux_target_probes_its_default_shell() {
        let mut c = ctx(Platform::Android, &[]);
        c.default_shell = Some("/data/data/com.termux/files/usr/bin/bash");
        let out = prepare_script(UPSTREAM, &c, &file()).unwrap();
        assert!(out.contents.contains(
            "const sandboxShell = \"/data/data/com.termux/files/usr/bin/bash\";"
        ));
    }

    #[test]
    fn identical_inputs_give_identical_output() {
        let a = prepare_script(UPSTREAM, &ctx(Platform::Windows, &[]), &file()).unwrap();
        let b = prepare_script(UPSTREAM, &ctx(Platform::Windows, &[]), &file()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn prepared_output_is_rejected_as_input() {
        let once = prepare_script(UPSTREAM, &ctx(Platform::Linux, &[]), &file()).unwrap();
        let err = prepare_script(&once.contents, &ctx(Platform::Linux, &[]), &file()).unwrap_err();
        assert!(matches!(err, Error::AlreadyPrepared { .. }));
    }

    #[test]
    fn strict_mode_fails_when_required_rewrite_misses() {
        let source = "console.log('upstream changed shape');";
        let err = prepare_script(source, &ctx(Platform::Linux, &[]), &file()).unwrap_err();
        assert_eq!(
            err,
            Error::PatchNotApplied {
                patch: "shell-bypass".to_string(),
                file: file(),
            }
        );
    }

    #[test]
    fn lenient_mode_reports_skipped_required_rewrites() {
        let source = "console.log('upstream changed shape');";
        let mut c = ctx(Platform::Linux, &[]);
        c.mode = PatchMode::Lenient;
        let out = prepare_script(source, &c, &file()).unwrap();
        let skipped: Vec<_> = out.report.skipped_required().map(|s| s.name.as_str()).collect();
        assert_eq!(skipped, vec!["shell-bypass", "entrypoint-marker"]);
    }

    #[test]
    fn tools_without_profile_never_fail_on_missing_shapes() {
        let mut c = ctx(Platform::Linux, &[]);
        c.profile = PatchProfile::default();
        let out = prepare_script("console.log(1);", &c, &file()).unwrap();
        assert_eq!(out.report.skipped_required().count(), 0);
        assert_eq!(out.report.skipped.len(), 2);
    }

    #[test]
    fn specifier_is_relative_to_entry_directory() {
        assert_eq!(relative_specifier("cli.js", "yoga.wasm"), "./yoga.wasm");
        assert_eq!(
            relative_specifier("bin/codex.js", "vendor/rg"),
            "../vendor/rg"
        );
        assert_eq!(
            relative_specifier("dist/a/index.js", "dist/assets/x.wasm"),
            "../assets/x.wasm"
        );
        assert_eq!(relative_specifier("bin/cli.js", "bin/x.node"), "./x.node");
    }

    #[test]
    fn prepared_name_is_platform_qualified() {
        assert_eq!(
            prepared_file_name("cli.js", Platform::Windows),
            "cli.windows.prepared.js"
        );
        assert_eq!(
            prepared_file_name("index.mjs", Platform::Macos),
            "index.macos.prepared.mjs"
        );
        assert_eq!(
            prepared_file_name("codex", Platform::Linux),
            "codex.linux.prepared.js"
        );
    }
}
