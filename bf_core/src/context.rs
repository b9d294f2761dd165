use std::path::{Path, PathBuf};
use std::time::Duration;

/// Directory layout under the binforge root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Paths {
    pub root: PathBuf,
    /// Per-tool download destinations.
    pub sources: PathBuf,
    /// Build outputs, one subdirectory per platform.
    pub dist: PathBuf,
    /// Project-local compiler installs, searched before PATH.
    pub tools: PathBuf,
}

impl Paths {
    pub fn from_root(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            sources: root.join("sources"),
            dist: root.join("dist"),
            tools: root.join("tools"),
            root,
        }
    }

    pub fn tool_sources(&self, tool_id: &str) -> PathBuf {
        self.sources.join(tool_id)
    }

    pub fn with_dist(mut self, dist: &Path) -> Self {
        self.dist = dist.to_path_buf();
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PatchMode {
    /// A required rewrite that matches nothing aborts preparation.
    #[default]
    Strict,
    /// Unmatched required rewrites are reported and skipped.
    Lenient,
}

/// Immutable configuration passed into every orchestration call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildOptions {
    pub compiler: String,
    pub compile_timeout: Duration,
    /// Longest wait for a response or for the next body chunk.
    pub download_timeout: Duration,
    pub max_redirects: usize,
    pub patch_mode: PatchMode,
    pub minify: bool,
    pub sourcemap: bool,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            compiler: "bun".to_string(),
            compile_timeout: Duration::from_secs(600),
            download_timeout: Duration::from_secs(60),
            max_redirects: 10,
            patch_mode: PatchMode::Strict,
            minify: true,
            sourcemap: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_hang_off_root() {
        let paths = Paths::from_root("/home/u/.binforge");
        assert_eq!(paths.sources, PathBuf::from("/home/u/.binforge/sources"));
        assert_eq!(
            paths.tool_sources("codex"),
            PathBuf::from("/home/u/.binforge/sources/codex")
        );
        assert_eq!(paths.tools, PathBuf::from("/home/u/.binforge/tools"));
    }

    #[test]
    fn dist_can_be_overridden() {
        let paths = Paths::from_root("/r").with_dist(Path::new("/out"));
        assert_eq!(paths.dist, PathBuf::from("/out"));
    }

    #[test]
    fn defaults_are_strict_and_bounded() {
        let opts = BuildOptions::default();
        assert_eq!(opts.patch_mode, PatchMode::Strict);
        assert_eq!(opts.compiler, "bun");
        assert!(opts.compile_timeout > opts.download_timeout);
    }
}
