use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "cardflow")]
#[command(version = "0.1.0")]
#[command(about = "Real-time card positioning service for collaborative task boards", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Config directory (default.toml plus one file per CARDFLOW_ENV)
    #[arg(short, long, default_value = "config", env = "CARDFLOW_CONFIG_DIR")]
    pub config: String,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Run the HTTP/WebSocket server (default)
    Serve {
        /// Override server.bind_addr
        #[arg(short, long)]
        bind: Option<String>,
    },
    /// Apply database migrations and exit
    Migrate,
    /// Respace the order keys of one column cell on a running server
    Rebalance {
        #[arg(long)]
        board: String,
        #[arg(long)]
        column: String,
        #[arg(long)]
        swimlane: Option<String>,
        /// Base URL of the server that owns the board
        #[arg(long, env = "CARDFLOW_SERVER_URL", default_value = "http://127.0.0.1:8080")]
        server: String,
    },
    /// Drop a deleted task from every board
    RemoveTask {
        #[arg(long)]
        task: String,
    },
    /// Drop every position on a deleted board
    RemoveBoard {
        #[arg(long)]
        board: String,
    },
}

impl Cli {
    /// Subcommand to run; `serve` when none was given
    pub fn command(&self) -> Commands {
        self.command
            .clone()
            .unwrap_or(Commands::Serve { bind: None })
    }
}
