use browser_mcp_core::Config;
use std::path::Path;

/// Show the effective configuration (file, environment and flags merged).
pub fn show(config: &Config, path: &Path) -> anyhow::Result<()> {
    println!();
    println!("📋 Current Configuration");
    if path.exists() {
        println!("  File: {}", path.display());
    } else {
        println!("  File: {} (not found, using defaults)", path.display());
    }
    println!();
    println!("{}", serde_json::to_string_pretty(config)?);
    Ok(())
}

/// Write a default config file.
pub fn init(path: &Path, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        println!("⚠️  Config already exists: {}", path.display());
        println!("  Use --force to overwrite.");
        return Ok(());
    }
    Config::default().save(path)?;
    println!("✅ Wrote default config to {}", path.display());
    Ok(())
}
