use browser_mcp_core::TransportMode;

/// Print the supported transports.
pub fn run() {
    println!();
    println!("🔌 Available transports");
    println!();
    for mode in TransportMode::ALL {
        println!("  {:<12} {}", mode.as_str(), mode.description());
    }
    println!();
    println!("  Select with --transport <mode> or MCP_TRANSPORT_MODE.");
    println!();
}
