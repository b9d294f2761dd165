//! Progress bars and formatting helpers.

use console::style;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bf_io::{BuildEvent, BuildResult, ProgressCallback};

pub type Bars = Arc<Mutex<HashMap<String, ProgressBar>>>;

/// Progress styles used by download and build operations.
pub struct ProgressStyles {
    pub download: ProgressStyle,
    pub spinner: ProgressStyle,
    pub done: ProgressStyle,
}

impl Default for ProgressStyles {
    fn default() -> Self {
        Self {
            download: ProgressStyle::default_bar()
                .template(
                    "    {prefix:<20} {bar:25.cyan/dim} {bytes:>10}/{total_bytes:<10} {eta:>6}",
                )
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("━━╸"),
            spinner: ProgressStyle::default_spinner()
                .template("    {prefix:<20} {spinner:.cyan} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏"),
            done: ProgressStyle::default_spinner()
                .template("    {prefix:<20} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        }
    }
}

/// Bars are keyed by download URL while fetching and by target id while
/// compiling.
pub fn create_progress_callback(multi: MultiProgress, styles: ProgressStyles) -> (ProgressCallback, Bars) {
    let bars: Bars = Arc::new(Mutex::new(HashMap::new()));
    let bars_clone = bars.clone();

    let callback: ProgressCallback = Arc::new(move |event: BuildEvent| {
        let Ok(mut bars) = bars_clone.lock() else {
            return;
        };
        match event {
            BuildEvent::DownloadStarted { url, total_bytes } => {
                let pb = match total_bytes {
                    Some(total) => {
                        let pb = multi.add(ProgressBar::new(total));
                        pb.set_style(styles.download.clone());
                        pb
                    }
                    None => {
                        let pb = multi.add(ProgressBar::new_spinner());
                        pb.set_style(styles.spinner.clone());
                        pb.set_message("downloading...");
                        pb.enable_steady_tick(Duration::from_millis(80));
                        pb
                    }
                };
                pb.set_prefix(short_name(&url));
                bars.insert(url, pb);
            }
            BuildEvent::DownloadProgress { url, received, .. } => {
                if let Some(pb) = bars.get(&url) {
                    pb.set_position(received);
                }
            }
            BuildEvent::DownloadCompleted { url, bytes } => {
                if let Some(pb) = bars.get(&url) {
                    pb.set_position(bytes);
                    pb.set_style(styles.spinner.clone());
                    pb.set_message("unpacking...");
                    pb.enable_steady_tick(Duration::from_millis(80));
                }
            }
            BuildEvent::Extracted { strategy, .. } => {
                for pb in bars.values().filter(|pb| !pb.is_finished()) {
                    pb.set_style(styles.done.clone());
                    pb.finish_with_message(format!("{} unpacked ({strategy})", style("✓").green()));
                }
            }
            BuildEvent::CompileStarted { target_id } => {
                let pb = multi.add(ProgressBar::new_spinner());
                pb.set_style(styles.spinner.clone());
                pb.set_prefix(target_id.clone());
                pb.set_message("compiling...");
                pb.enable_steady_tick(Duration::from_millis(80));
                bars.insert(target_id, pb);
            }
            BuildEvent::CompilerOutput { target_id, line } => {
                if let Some(pb) = bars.get(&target_id) {
                    pb.set_message(line);
                }
            }
            BuildEvent::CompileFinished {
                target_id,
                size,
                elapsed,
            } => {
                if let Some(pb) = bars.get(&target_id) {
                    pb.set_style(styles.done.clone());
                    pb.finish_with_message(format!(
                        "{} {} in {}",
                        style("✓").green(),
                        format_bytes(size),
                        format_duration(elapsed)
                    ));
                }
            }
            BuildEvent::TargetFailed { target_id, .. } => {
                if let Some(pb) = bars.get(&target_id) {
                    pb.set_style(styles.done.clone());
                    pb.finish_with_message(format!("{} failed", style("✗").red()));
                }
            }
            BuildEvent::ResolvingPackage { .. }
            | BuildEvent::CacheDecision { .. }
            | BuildEvent::Prepared { .. } => {}
        }
    });

    (callback, bars)
}

/// Finish any remaining progress bars.
pub fn finish_progress_bars(bars: &Bars) {
    if let Ok(bars) = bars.lock() {
        for pb in bars.values() {
            if !pb.is_finished() {
                pb.finish_and_clear();
            }
        }
    }
}

/// Last path segment of a URL, for bar prefixes.
pub fn short_name(url: &str) -> String {
    url.trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(url)
        .to_string()
}

/// Format bytes into a human-readable string (e.g., "1.5 MB").
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} bytes", bytes)
    }
}

pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs_f64();
    if secs >= 60.0 {
        format!("{}m{:02}s", d.as_secs() / 60, d.as_secs() % 60)
    } else if secs >= 1.0 {
        format!("{secs:.1}s")
    } else {
        format!("{}ms", d.as_millis())
    }
}

/// One summary line per build result.
pub fn format_result_line(result: &BuildResult) -> String {
    if result.success {
        format!(
            "{} {:<22} {:>10}  {:>7}  {}",
            style("✓").green(),
            result.target_id,
            format_bytes(result.size),
            format_duration(result.duration),
            result.output_path.display()
        )
    } else {
        let reason = result
            .error
            .as_ref()
            .map(|e| e.to_string())
            .unwrap_or_default();
        let first_line = reason.lines().next().unwrap_or_default().to_string();
        format!("{} {:<22} {}", style("✗").red(), result.target_id, first_line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn result(success: bool) -> BuildResult {
        BuildResult {
            success,
            target_id: "linux-x64".to_string(),
            tool_id: "codex".to_string(),
            output_path: PathBuf::from("/dist/linux/codex-linux-x64"),
            duration: Duration::from_millis(1500),
            size: 3 * 1024 * 1024,
            error: (!success).then(|| bf_core::Error::CompileFailed {
                target: "linux-x64".to_string(),
                exit_code: Some(1),
                stderr: "error: boom".to_string(),
            }),
        }
    }

    #[test]
    fn bytes_are_humanized() {
        assert_eq!(format_bytes(512), "512 bytes");
        assert_eq!(format_bytes(1536), "1.5 KB");
        assert_eq!(format_bytes(95 * 1024 * 1024), "95.0 MB");
        assert_eq!(format_bytes(2 * 1024 * 1024 * 1024), "2.0 GB");
    }

    #[test]
    fn durations_pick_a_unit() {
        assert_eq!(format_duration(Duration::from_millis(250)), "250ms");
        assert_eq!(format_duration(Duration::from_millis(2500)), "2.5s");
        assert_eq!(format_duration(Duration::from_secs(125)), "2m05s");
    }

    #[test]
    fn url_prefix_is_last_segment() {
        assert_eq!(
            short_name("https://registry.npmjs.org/@openai/codex/-/codex-0.2.0.tgz"),
            "codex-0.2.0.tgz"
        );
    }

    #[test]
    fn result_lines() {
        let ok = format_result_line(&result(true));
        assert!(ok.contains("linux-x64"));
        assert!(ok.contains("3.0 MB"));
        assert!(ok.contains("1.5s"));

        let failed = format_result_line(&result(false));
        assert!(failed.contains("compilation for 'linux-x64' failed (exit code 1)"));
        assert!(!failed.contains("boom"));
    }
}
