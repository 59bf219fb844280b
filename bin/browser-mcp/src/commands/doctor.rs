use browser_mcp_core::{Config, Paths};
use browser_mcp_tools::browser::{find_browser_binary, list_available_browsers, ChromeLauncher};
use browser_mcp_tools::{ServerState, ToolCatalog};
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

/// Run environment diagnostics.
pub async fn run(config: &Config, config_path: &Path) -> anyhow::Result<()> {
    println!();
    println!("🩺 browser-mcp doctor — Environment Diagnostics");
    println!("================================");
    println!();

    let mut ok_count = 0u32;
    let mut warn_count = 0u32;
    let mut err_count = 0u32;

    // --- 1. Config ---
    println!("📋 Configuration");
    if config_path.exists() {
        print_ok("Config file", &config_path.display().to_string());
    } else {
        print_warn("No config file", "Defaults in use; run `browser-mcp config init` to create one");
        warn_count += 1;
    }
    match config.validate() {
        Ok(()) => {
            print_ok("Config valid", "");
            ok_count += 1;
        }
        Err(e) => {
            print_err("Config invalid", &e.to_string());
            err_count += 1;
        }
    }
    println!(
        "  Transport: {}  Pool: {} ({:?})",
        config.server.transport_mode, config.pool.size, config.pool.scope
    );
    println!();

    // --- 2. Browsers ---
    println!("🌐 Browsers");
    let found = list_available_browsers();
    if found.is_empty() {
        print_err("No Chrome, Chromium or Edge found", "Install one or set browser.executablePath");
        err_count += 1;
    }
    for (kind, path) in &found {
        print_ok(kind.as_str(), path);
        ok_count += 1;
    }
    let configured = config
        .browser
        .executable_path
        .clone()
        .or_else(|| find_browser_binary(config.browser.engine));
    match &configured {
        Some(path) => {
            print_ok("Configured engine", &format!("{} → {}", config.browser.engine.as_str(), path));
            ok_count += 1;
        }
        None => {
            print_err(
                "Configured engine not found",
                &format!("browser.engine = {}", config.browser.engine.as_str()),
            );
            err_count += 1;
        }
    }
    println!();

    // --- 3. Tools ---
    println!("🔧 Tools");
    match ToolCatalog::new(config.tools.extended) {
        Ok(catalog) => {
            print_ok("Catalog", &format!("{} tools", catalog.len()));
            ok_count += 1;
        }
        Err(e) => {
            print_err("Catalog invalid", &e.to_string());
            err_count += 1;
        }
    }
    println!();

    // --- 4. Launch check ---
    println!("🚀 Launch check");
    if configured.is_some() && err_count == 0 {
        let mut probe = config.clone();
        probe.pool.size = 1;
        probe.pool.warmup = false;
        let started = Instant::now();
        let state = ServerState::new(probe, Paths::new(), Arc::new(ChromeLauncher::new()))?;
        let scope = state.connect("doctor");
        let response = state
            .call_tool(&scope, "navigate_to_url", Some(&json!({ "url": "https://example.com/" })))
            .await;
        state.shutdown().await;
        match response.error {
            None => {
                print_ok(
                    "Browser launched and navigated",
                    &format!("{}ms", started.elapsed().as_millis()),
                );
                ok_count += 1;
            }
            Some(failure) => {
                print_err(&format!("Launch check failed ({})", failure.kind), &failure.message);
                err_count += 1;
            }
        }
    } else {
        print_warn("Skipped", "fix the errors above first");
        warn_count += 1;
    }
    println!();

    println!("================================");
    println!("  ✅ {} ok   ⚠️  {} warnings   ❌ {} errors", ok_count, warn_count, err_count);
    println!();
    Ok(())
}

fn print_ok(label: &str, detail: &str) {
    if detail.is_empty() {
        println!("  ✅ {}", label);
    } else {
        println!("  ✅ {} — {}", label, detail);
    }
}

fn print_warn(label: &str, hint: &str) {
    if hint.is_empty() {
        println!("  ⚠️  {}", label);
    } else {
        println!("  ⚠️  {} — {}", label, hint);
    }
}

fn print_err(label: &str, hint: &str) {
    if hint.is_empty() {
        println!("  ❌ {}", label);
    } else {
        println!("  ❌ {} — {}", label, hint);
    }
}
