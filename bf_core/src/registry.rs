//! Static tool and target tables, validated once at load time.

use std::collections::{BTreeMap, HashSet};

use regex::Regex;

use crate::Error;
use crate::platform::{Host, Platform, Variant};
use crate::target::{BuildTarget, BuildTargetTemplate, builtin_templates};
use crate::tool::{ToolDescriptor, builtin_tools};

/// Target chosen when the host matches no standard template.
pub const FALLBACK_TARGET: &str = "linux-x64";

#[derive(Debug, Clone)]
pub struct Registry {
    tools: Vec<ToolDescriptor>,
    templates: Vec<BuildTargetTemplate>,
}

impl Registry {
    pub fn new(
        tools: Vec<ToolDescriptor>,
        templates: Vec<BuildTargetTemplate>,
    ) -> Result<Self, Error> {
        validate(&tools, &templates)?;
        Ok(Self { tools, templates })
    }

    pub fn builtin() -> Result<Self, Error> {
        Self::new(builtin_tools(), builtin_templates())
    }

    pub fn tools(&self) -> &[ToolDescriptor] {
        &self.tools
    }

    pub fn templates(&self) -> &[BuildTargetTemplate] {
        &self.templates
    }

    pub fn tool(&self, id: &str) -> Result<&ToolDescriptor, Error> {
        self.tools
            .iter()
            .find(|t| t.id == id)
            .ok_or_else(|| Error::UnknownTool { id: id.to_string() })
    }

    /// The first-registered tool; non-empty is checked at load.
    pub fn default_tool(&self) -> &ToolDescriptor {
        &self.tools[0]
    }

    /// Every template rendered with `binary_name`, or `tool_id` when the tool
    /// declares no binary name.
    pub fn generate_build_targets(
        &self,
        tool_id: &str,
        binary_name: Option<&str>,
    ) -> BTreeMap<String, BuildTarget> {
        let name = binary_name.unwrap_or(tool_id);
        self.templates
            .iter()
            .map(|t| (t.id.to_string(), t.render(name)))
            .collect()
    }

    pub fn targets_for_tool(&self, tool: &ToolDescriptor) -> BTreeMap<String, BuildTarget> {
        self.generate_build_targets(&tool.id, tool.build.binary_name.as_deref())
    }

    /// Resolves one target id for `tool`, or for the default tool.
    pub fn resolve_target(
        &self,
        target_id: &str,
        tool: Option<&ToolDescriptor>,
    ) -> Result<BuildTarget, Error> {
        let tool = tool.unwrap_or_else(|| self.default_tool());
        self.templates
            .iter()
            .find(|t| t.id == target_id)
            .map(|t| t.render(tool.binary_name()))
            .ok_or_else(|| Error::UnknownTarget {
                id: target_id.to_string(),
            })
    }

    /// Default tool's targets for one platform, in table order. Callers
    /// building a specific tool should use [`Registry::targets_for_tool`].
    pub fn targets_for_platform(&self, platform: Platform) -> Vec<BuildTarget> {
        let name = self.default_tool().binary_name();
        self.templates
            .iter()
            .filter(|t| t.platform == platform)
            .map(|t| t.render(name))
            .collect()
    }

    /// Standard-variant target matching the host, else [`FALLBACK_TARGET`].
    ///
    /// Hosts outside the table (unknown OS, unknown arch) get the fallback,
    /// which is the wrong binary for them; the caller is expected to surface
    /// the chosen id.
    pub fn current_target(&self, host: &Host) -> BuildTarget {
        let name = self.default_tool().binary_name();
        let matched = self.templates.iter().find(|t| {
            t.variant == Variant::Standard
                && Some(t.platform) == host.platform
                && Some(t.arch) == host.arch
        });
        match matched {
            Some(t) => t.render(name),
            None => {
                tracing::warn!(%host, fallback = FALLBACK_TARGET, "no build target matches host");
                self.templates
                    .iter()
                    .find(|t| t.id == FALLBACK_TARGET)
                    .unwrap_or(&self.templates[0])
                    .render(name)
            }
        }
    }
}

fn validate(tools: &[ToolDescriptor], templates: &[BuildTargetTemplate]) -> Result<(), Error> {
    let invalid = |message: String| Err(Error::InvalidRegistry { message });

    if tools.is_empty() {
        return invalid("no tools registered".to_string());
    }
    if templates.is_empty() {
        return invalid("no build targets registered".to_string());
    }

    let prefix_re = Regex::new(r"^[A-Z][A-Z0-9_]*$").map_err(|e| Error::InvalidRegistry {
        message: e.to_string(),
    })?;

    let mut ids = HashSet::new();
    for tool in tools {
        if !ids.insert(tool.id.as_str()) {
            return invalid(format!("duplicate tool id '{}'", tool.id));
        }
        let entry = &tool.build.entry_point;
        if entry.is_empty() || entry.starts_with('/') || entry.split('/').any(|c| c == "..") {
            return invalid(format!(
                "tool '{}' entry point '{}' must be a relative path inside the package",
                tool.id, entry
            ));
        }
        if !prefix_re.is_match(&tool.build.env_prefix) {
            return invalid(format!(
                "tool '{}' env prefix '{}' is not an upper-case identifier",
                tool.id, tool.build.env_prefix
            ));
        }
    }

    let mut target_ids = HashSet::new();
    let mut shapes = HashSet::new();
    for t in templates {
        if !target_ids.insert(t.id) {
            return invalid(format!("duplicate target id '{}'", t.id));
        }
        if !shapes.insert((t.platform, t.arch, t.variant)) {
            return invalid(format!(
                "target '{}' repeats {}/{}/{}",
                t.id, t.platform, t.arch, t.variant
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::Arch;
    use crate::tool::{BuildMeta, PatchProfile, ToolSource};
    use proptest::prelude::*;

    fn registry() -> Registry {
        Registry::builtin().unwrap()
    }

    fn tool(id: &str, prefix: &str) -> ToolDescriptor {
        ToolDescriptor {
            id: id.to_string(),
            display_name: id.to_string(),
            source: ToolSource::Local,
            build: BuildMeta {
                entry_point: "cli.js".to_string(),
                env_prefix: prefix.to_string(),
                binary_name: None,
            },
            patches: PatchProfile::default(),
            assets: Vec::new(),
        }
    }

    #[test]
    fn builtin_tables_validate() {
        let r = registry();
        assert_eq!(r.default_tool().id, "claude-code");
    }

    #[test]
    fn unknown_tool_is_an_error() {
        let err = registry().tool("nope").unwrap_err();
        assert_eq!(err, Error::UnknownTool { id: "nope".to_string() });
    }

    #[test]
    fn codex_targets_use_binary_name() {
        let targets = registry().generate_build_targets("codex", Some("codex"));
        assert_eq!(targets["windows-x64"].output, "codex-windows-x64.exe");
        assert_eq!(targets["linux-arm64"].output, "codex-linux-arm64");
    }

    #[test]
    fn claude_code_android_target_is_termux() {
        let r = registry();
        let tool = r.tool("claude-code").unwrap();
        let target = &r.targets_for_tool(tool)["android-arm64"];
        assert_eq!(target.platform, Platform::Android);
        assert_eq!(target.variant, Variant::Termux);
        assert_eq!(
            target.default_shell.as_deref(),
            Some("/data/data/com.termux/files/usr/bin/bash")
        );
        assert_eq!(target.output, "claude-code-android-arm64");
    }

    #[test]
    fn resolve_target_rejects_unknown_id() {
        assert!(matches!(
            registry().resolve_target("solaris-sparc", None),
            Err(Error::UnknownTarget { .. })
        ));
    }

    #[test]
    fn platform_view_uses_default_tool() {
        let targets = registry().targets_for_platform(Platform::Macos);
        assert!(!targets.is_empty());
        assert!(targets.iter().all(|t| t.platform == Platform::Macos));
        assert!(targets.iter().all(|t| t.output.starts_with("claude-code-macos")));
    }

    #[test]
    fn windows_host_gets_windows_target() {
        let host = Host::from_identifiers("windows", "x86_64");
        let target = registry().current_target(&host);
        assert!(target.id.starts_with("windows-"));
        assert_eq!(target.variant, Variant::Standard);
    }

    #[test]
    fn apple_silicon_host_gets_macos_arm64() {
        let host = Host::from_identifiers("macos", "aarch64");
        assert_eq!(registry().current_target(&host).id, "macos-arm64");
    }

    #[test]
    fn unmatched_host_falls_back_to_linux_x64() {
        let host = Host::from_identifiers("windows", "aarch64");
        assert_eq!(registry().current_target(&host).id, FALLBACK_TARGET);

        let host = Host::from_identifiers("freebsd", "x86_64");
        assert_eq!(registry().current_target(&host).id, FALLBACK_TARGET);
    }

    #[test]
    fn duplicate_tool_ids_are_rejected() {
        let err = Registry::new(
            vec![tool("a", "A"), tool("a", "B")],
            builtin_templates(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidRegistry { .. }));
    }

    #[test]
    fn lower_case_env_prefix_is_rejected() {
        let err = Registry::new(vec![tool("a", "claude")], builtin_templates()).unwrap_err();
        assert!(err.to_string().contains("env prefix"));
    }

    #[test]
    fn entry_point_escaping_package_is_rejected() {
        let mut t = tool("a", "A");
        t.build.entry_point = "../outside.js".to_string();
        assert!(Registry::new(vec![t], builtin_templates()).is_err());
    }

    #[test]
    fn repeated_target_shape_is_rejected() {
        let mut templates = builtin_templates();
        let mut copy = templates[0].clone();
        copy.id = "windows-x64-again";
        templates.push(copy);
        let err = Registry::new(vec![tool("a", "A")], templates).unwrap_err();
        assert!(err.to_string().contains("repeats"));
    }

    #[test]
    fn arm_linux_host_has_a_native_target() {
        let host = Host {
            platform: Some(Platform::Linux),
            arch: Some(Arch::Arm64),
        };
        assert_eq!(registry().current_target(&host).id, "linux-arm64");
    }

    proptest! {
        #[test]
        fn output_is_binary_dash_target_dot_extension(
            tool_id in "[a-z][a-z0-9-]{0,15}",
            binary in proptest::option::of("[a-z][a-z0-9_-]{0,15}"),
        ) {
            let r = registry();
            let targets = r.generate_build_targets(&tool_id, binary.as_deref());
            let name = binary.clone().unwrap_or_else(|| tool_id.clone());
            prop_assert_eq!(targets.len(), r.templates().len());
            for t in r.templates() {
                let expected = format!("{}-{}{}", name, t.id, t.extension);
                prop_assert_eq!(&targets[t.id].output, &expected);
            }
        }
    }
}
