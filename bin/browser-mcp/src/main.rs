mod commands;

use browser_mcp_core::{Config, Paths, TransportMode};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "browser-mcp")]
#[command(about = "Browser automation tools served over the Model Context Protocol", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    #[command(flatten)]
    overrides: Overrides,

    /// List the available transports and exit
    #[arg(long)]
    list_transports: bool,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

/// Settings that win over the config file and `MCP_*` environment variables.
#[derive(Args, Debug, Default, Clone)]
pub struct Overrides {
    /// Config file (defaults to ~/.browser-mcp/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Transport: stdio, sse or http_stream
    #[arg(long, global = true)]
    transport: Option<TransportMode>,

    /// Host to bind for network transports
    #[arg(long, global = true)]
    host: Option<String>,

    /// Port to bind for network transports
    #[arg(short, long, global = true)]
    port: Option<u16>,

    /// Log level: trace, debug, info, warn or error
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Server name reported to clients
    #[arg(long, global = true)]
    server_name: Option<String>,

    /// Server version reported to clients
    #[arg(long, global = true)]
    server_version: Option<String>,
}

impl Overrides {
    fn paths(&self) -> Paths {
        Paths::new()
    }

    fn config_path(&self) -> PathBuf {
        self.config.clone().unwrap_or_else(|| self.paths().config_file())
    }

    /// File, then environment, then flags.
    pub fn load(&self) -> anyhow::Result<Config> {
        let path = self.config_path();
        let mut config = if path.exists() {
            Config::load(&path)?
        } else {
            Config::default()
        };
        config.apply_env_overrides()?;
        self.apply(&mut config);
        config.validate()?;
        Ok(config)
    }

    fn apply(&self, config: &mut Config) {
        if let Some(mode) = self.transport {
            config.server.transport_mode = mode;
        }
        if let Some(host) = &self.host {
            config.server.host = host.clone();
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(level) = &self.log_level {
            config.server.log_level = level.to_lowercase();
        }
        if let Some(name) = &self.server_name {
            config.server.name = name.clone();
        }
        if let Some(version) = &self.server_version {
            config.server.version = version.clone();
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Start the MCP server (default when no command is given)
    Serve,

    /// Inspect and call browser tools
    Tools {
        #[command(subcommand)]
        command: ToolsCommands,
    },

    /// List the available transports
    Transports,

    /// Run environment diagnostics
    Doctor,

    /// Manage configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
enum ToolsCommands {
    /// List the tools exposed to clients
    List,
    /// Show the argument schema of a tool
    Info {
        /// Tool name
        tool_name: String,
    },
    /// Call a tool once against a fresh browser
    Call {
        /// Tool name
        tool_name: String,
        /// JSON arguments (e.g. '{"url":"https://example.com"}')
        #[arg(default_value = "{}")]
        args: String,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Show the effective configuration
    Show,
    /// Write a default config file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

fn init_tracing(level: &str, verbose: bool) {
    // RUST_LOG wins when set; -v forces debug otherwise.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"))
        }
    });

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.list_transports {
        commands::transports::run();
        return Ok(());
    }

    // config init must work even when the existing file is broken.
    if let Some(Commands::Config {
        command: ConfigCommands::Init { force },
    }) = &cli.command
    {
        return commands::config_cmd::init(&cli.overrides.config_path(), *force);
    }

    let config = cli.overrides.load()?;
    init_tracing(&config.server.log_level, cli.verbose);

    match cli.command {
        None | Some(Commands::Serve) => {
            commands::serve::run(config, cli.overrides.paths()).await?;
        }
        Some(Commands::Tools { command }) => match command {
            ToolsCommands::List => commands::tools_cmd::list(&config)?,
            ToolsCommands::Info { tool_name } => commands::tools_cmd::info(&config, &tool_name)?,
            ToolsCommands::Call { tool_name, args } => {
                commands::tools_cmd::call(config, cli.overrides.paths(), &tool_name, &args).await?
            }
        },
        Some(Commands::Transports) => commands::transports::run(),
        Some(Commands::Doctor) => commands::doctor::run(&config, &cli.overrides.config_path()).await?,
        Some(Commands::Config { command }) => match command {
            ConfigCommands::Show => commands::config_cmd::show(&config, &cli.overrides.config_path())?,
            ConfigCommands::Init { .. } => {}
        },
    }

    Ok(())
}
