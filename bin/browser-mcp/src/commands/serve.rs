use browser_mcp_core::{Config, Paths, TransportMode};
use browser_mcp_tools::browser::ChromeLauncher;
use browser_mcp_tools::ServerState;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Run the MCP server on the configured transport until shutdown.
pub async fn run(config: Config, paths: Paths) -> anyhow::Result<()> {
    let mode = config.server.transport_mode;
    print_banner(&config);

    let state = Arc::new(ServerState::new(config, paths, Arc::new(ChromeLauncher::new()))?);
    if let Err(e) = state.warmup().await {
        error!(error = %e, "Pool warmup failed; sessions will launch on demand");
    }

    let shutdown = CancellationToken::new();
    browser_mcp_transports::cancel_on_ctrl_c(shutdown.clone());

    let served = browser_mcp_transports::run(state.clone(), mode, shutdown).await;
    state.shutdown().await;
    info!("Server stopped");
    served?;
    Ok(())
}

// stdout belongs to the protocol on stdio, so the banner goes to stderr.
fn print_banner(config: &Config) {
    let server = &config.server;
    eprintln!();
    eprintln!("🌐 {} v{}", server.name, server.version);
    eprintln!("   Transport: {} ({})", server.transport_mode, server.transport_mode.description());
    match server.transport_mode {
        TransportMode::Stdio => eprintln!("   Reading JSON-RPC from stdin"),
        TransportMode::Sse => {
            eprintln!("   Stream:   GET  http://{}:{}/sse", server.host, server.port);
            eprintln!("   Messages: POST http://{}:{}/messages?sessionId=<id>", server.host, server.port);
        }
        TransportMode::HttpStream => {
            eprintln!("   Endpoint: POST http://{}:{}/mcp", server.host, server.port);
            eprintln!("   Health:   GET  http://{}:{}/health", server.host, server.port);
        }
    }
    eprintln!(
        "   Browser:  {} ({}), pool size {}",
        config.browser.engine.as_str(),
        if config.browser.headless { "headless" } else { "headed" },
        config.pool.size
    );
    eprintln!();
}
