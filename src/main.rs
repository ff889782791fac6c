use cardflow::adapters::{start_api_server, AdminClient, PostgresStore};
use cardflow::cli::{Cli, Commands};
use cardflow::config::{AppConfig, LoggingConfig};
use cardflow::domain::{Identity, Swimlane};
use cardflow::error::{CardflowError, Result};
use cardflow::runtime::{Backends, Services};
use clap::Parser;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::load_from(&cli.config)?;
    config.validate().map_err(CardflowError::Validation)?;

    match cli.command() {
        Commands::Serve { bind } => {
            init_logging(&config.logging);
            run_server(config, bind).await?;
        }
        Commands::Migrate => {
            init_logging_simple();
            let url = config.database.url.as_deref().ok_or_else(|| {
                CardflowError::Validation("database.url is required to migrate".to_string())
            })?;
            let store = PostgresStore::new(url, config.database.max_connections).await?;
            store.migrate().await?;
            println!("Migrations applied");
        }
        Commands::Rebalance {
            board,
            column,
            swimlane,
            server,
        } => {
            init_logging_simple();
            // The server sequences and broadcasts the rebalance to its sessions.
            let client = AdminClient::new(&server, admin_identity())?;
            let swimlane = swimlane.map(Swimlane::from);
            let event = client
                .rebalance_column(&board.into(), &column.into(), swimlane.as_ref())
                .await?;
            println!(
                "Rebalanced {} rows in {}/{} (generation {})",
                event.rows.len(),
                event.board_id,
                event.column_id,
                event.generation
            );
        }
        Commands::RemoveTask { task } => {
            init_logging_simple();
            let services = Services::new(Backends::connect(&config.database).await?, &config);
            let removed = services.coordinator.remove_task(&task.into()).await?;
            println!("Removed {} positions", removed);
        }
        Commands::RemoveBoard { board } => {
            init_logging_simple();
            let services = Services::new(Backends::connect(&config.database).await?, &config);
            let removed = services.coordinator.remove_board(&board.into()).await?;
            println!("Removed {} positions", removed);
        }
    }

    Ok(())
}

fn admin_identity() -> Identity {
    Identity::new("cardflow-cli", "Cardflow CLI")
}

async fn run_server(config: AppConfig, bind: Option<String>) -> Result<()> {
    let bind_addr = bind.unwrap_or_else(|| config.server.bind_addr.clone());
    info!("Starting cardflow on {}", bind_addr);

    let services = Services::new(Backends::connect(&config.database).await?, &config);
    let background = services.spawn_background(&config.session);

    let result = start_api_server(services.app_state(), &bind_addr, shutdown_signal()).await;
    if let Err(ref e) = result {
        error!("Server stopped with error: {}", e);
    }

    for task in background {
        task.abort();
    }
    info!("Shutdown complete");
    result
}

fn init_logging(config: &LoggingConfig) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("{},cardflow=debug,sqlx=warn", config.level))
    });

    // File logging only when CARDFLOW_LOG_DIR is set.
    let log_dir = std::env::var("CARDFLOW_LOG_DIR").ok();
    let file_layer = log_dir.as_deref().and_then(|dir| {
        // `rolling::daily` panics if it cannot create the first file, so
        // check writability up front.
        let writable = std::fs::create_dir_all(dir).is_ok() && {
            let test_path = std::path::Path::new(dir).join(".cardflow_write_test");
            let ok = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&test_path)
                .is_ok();
            let _ = std::fs::remove_file(&test_path);
            ok
        };
        if !writable {
            eprintln!(
                "Warning: Could not write to log directory {}, file logging disabled",
                dir
            );
            return None;
        }

        let file_appender = tracing_appender::rolling::daily(dir, "cardflow.log");
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        // Keep the guard alive for the life of the process
        Box::leak(Box::new(guard));

        Some(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_target(true),
        )
    });

    let json_layer = config
        .json
        .then(|| tracing_subscriber::fmt::layer().json().with_target(true));
    let console_layer = (!config.json).then(|| {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
    });

    let file_logging_enabled = file_layer.is_some();
    tracing_subscriber::registry()
        .with(filter)
        .with(json_layer)
        .with(console_layer)
        .with(file_layer)
        .init();

    if let (true, Some(dir)) = (file_logging_enabled, log_dir) {
        eprintln!("Logging to: {}/cardflow.log", dir);
    }
}

fn init_logging_simple() {
    // Minimal logging for one-shot commands
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::WARN)
        .try_init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => error!("Failed to install SIGTERM handler: {}", e),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}
