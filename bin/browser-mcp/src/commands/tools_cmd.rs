use browser_mcp_core::{Config, Paths};
use browser_mcp_tools::browser::ChromeLauncher;
use browser_mcp_tools::{ServerState, ToolCatalog};
use serde_json::Value;
use std::sync::Arc;

/// List the tools clients will see.
pub fn list(config: &Config) -> anyhow::Result<()> {
    let catalog = ToolCatalog::new(config.tools.extended)?;

    println!();
    println!("🔧 Browser tools ({} total)", catalog.len());
    println!();
    for tool in catalog.list() {
        let short_desc: String = tool.description.chars().take(60).collect();
        let ellipsis = if tool.description.chars().count() > 60 { "..." } else { "" };
        let extended = if tool.id.is_extended() { " [extended]" } else { "" };
        println!("  {:<24} {}{}{}", tool.name, short_desc, ellipsis, extended);
    }
    if !config.tools.extended {
        println!();
        println!("  Set tools.extended = true to add get_element_text and get_element_attribute.");
    }
    println!();
    Ok(())
}

/// Show a tool's parameters.
pub fn info(config: &Config, tool_name: &str) -> anyhow::Result<()> {
    let catalog = ToolCatalog::new(config.tools.extended)?;
    let Some(tool) = catalog.get(tool_name) else {
        anyhow::bail!(
            "tool '{}' not found; available: {}",
            tool_name,
            catalog.names().join(", ")
        );
    };

    println!();
    println!("🔧 {}", tool.name);
    println!();
    println!("  Description: {}", tool.description);
    println!();
    if tool.params.is_empty() {
        println!("  Parameters: none");
    } else {
        println!("  Parameters:");
        for param in &tool.params {
            let marker = if param.required { "*" } else { " " };
            let default = param
                .default
                .as_ref()
                .map(|d| format!(" (default {})", d))
                .unwrap_or_default();
            println!(
                "    {}{:<12} {:<8} {}{}",
                marker,
                param.name,
                param.ty.as_str(),
                param.description,
                default
            );
        }
        println!();
        println!("  * = required");
    }
    println!();
    println!("  Schema:");
    println!("{}", serde_json::to_string_pretty(&tool.input_schema())?);
    println!();
    Ok(())
}

/// Call one tool against a freshly launched browser and print the envelope.
pub async fn call(config: Config, paths: Paths, tool_name: &str, args: &str) -> anyhow::Result<()> {
    let args: Value = serde_json::from_str(args)
        .map_err(|e| anyhow::anyhow!("arguments must be a JSON object: {}", e))?;

    let state = ServerState::new(config, paths, Arc::new(ChromeLauncher::new()))?;
    let scope = state.connect("cli");
    let response = state.call_tool(&scope, tool_name, Some(&args)).await;
    state.shutdown().await;

    println!("{}", serde_json::to_string_pretty(&response)?);
    if !response.success {
        std::process::exit(1);
    }
    Ok(())
}
