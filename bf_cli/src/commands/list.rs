//! tools, targets and current commands.

use console::style;

use bf_core::{BuildTarget, Error, Host, Platform, Registry, ToolSource};

fn json_error(e: serde_json::Error) -> Error {
    Error::fs("<stdout>", e)
}

fn source_label(source: &ToolSource) -> String {
    match source {
        ToolSource::Npm { package } => format!("npm {package}"),
        ToolSource::GitHub { owner, repo } => format!("github {owner}/{repo}"),
        ToolSource::Local => "local".to_string(),
    }
}

pub fn run_tools(registry: &Registry, json: bool) -> Result<(), Error> {
    if json {
        println!("{}", serde_json::to_string_pretty(registry.tools()).map_err(json_error)?);
        return Ok(());
    }

    println!(
        "{} {} tools:",
        style("==>").cyan().bold(),
        registry.tools().len()
    );
    for tool in registry.tools() {
        println!(
            "    {:<14} {:<16} {:<34} {}",
            style(&tool.id).bold(),
            tool.display_name,
            source_label(&tool.source),
            style(tool.binary_name()).dim()
        );
    }
    Ok(())
}

/// Targets for `tool` (or the default tool) in table order, optionally
/// limited to one platform.
pub fn list_targets(
    registry: &Registry,
    tool: Option<&str>,
    platform: Option<&str>,
) -> Result<Vec<BuildTarget>, Error> {
    let tool = match tool {
        Some(id) => registry.tool(id)?,
        None => registry.default_tool(),
    };
    let platform = platform.map(str::parse::<Platform>).transpose()?;
    let rendered = registry.targets_for_tool(tool);

    Ok(registry
        .templates()
        .iter()
        .filter(|t| platform.is_none_or(|p| t.platform == p))
        .filter_map(|t| rendered.get(t.id).cloned())
        .collect())
}

pub fn run_targets(
    registry: &Registry,
    tool: Option<&str>,
    platform: Option<&str>,
    json: bool,
) -> Result<(), Error> {
    let targets = list_targets(registry, tool, platform)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&targets).map_err(json_error)?);
        return Ok(());
    }

    println!("{} {} targets:", style("==>").cyan().bold(), targets.len());
    for t in &targets {
        let note = t
            .cpu_note
            .as_deref()
            .or(t.default_shell.as_deref())
            .unwrap_or("");
        println!(
            "    {:<22} {:<26} {:<9} {:<34} {}",
            style(&t.id).bold(),
            t.triple,
            t.variant.as_str(),
            t.output,
            style(note).dim()
        );
    }
    Ok(())
}

pub fn run_current(registry: &Registry) -> Result<(), Error> {
    let host = Host::detect();
    let target = registry.current_target(&host);
    println!("{} host:   {}", style("==>").cyan().bold(), host);
    println!(
        "{} target: {}",
        style("==>").cyan().bold(),
        style(&target.id).bold()
    );
    if Some(target.platform) != host.platform || Some(target.arch) != host.arch {
        println!(
            "    {} no target matches this host; {} is a fallback",
            style("!").yellow().bold(),
            target.id
        );
    }
    Ok(())
}
