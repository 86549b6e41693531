use clap::{Parser, Subcommand};

mod inspect;

use inspect::CliResult;
use stepline_core::{CancellationToken, StreamCursor};
use stepline_runtime::{AgentRuntimeCoordinator, StatusQuery};

#[derive(Parser, Debug)]
#[command(name = "stepline", version = "0.3.0")]
#[command(about = "Stepline CLI - Inspect and follow agent operations")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Follow an operation's event stream until interrupted
    Tail {
        /// Operation id
        operation_id: String,
        /// Replay retained events before following
        #[arg(long)]
        from_start: bool,
        /// Resume after this stream id (overrides --from-start)
        #[arg(long)]
        after: Option<String>,
    },
    /// Print the most recent events, oldest first
    History {
        /// Operation id
        operation_id: String,
        #[arg(long, default_value_t = 50)]
        count: usize,
    },
    /// Show an operation's status report
    Status {
        /// Operation id
        operation_id: String,
        /// Include step history and recent events
        #[arg(long)]
        history: bool,
        /// Number of history records to include
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// Operation counts by status
    Stats,
    /// Drop index entries for expired operations
    Cleanup,
    /// Delete an operation's state and events
    Delete {
        /// Operation id
        operation_id: String,
    },
}

#[tokio::main]
async fn main() {
    let env_filter = tracing_subscriber::EnvFilter::from_default_env();
    let env_filter = match "info".parse() {
        Ok(directive) => env_filter.add_directive(directive),
        Err(_) => env_filter,
    };

    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .json()
        .try_init();

    let cli = Cli::parse();
    let coordinator = AgentRuntimeCoordinator::from_environment().await;

    if let Err(e) = run(&coordinator, cli.command).await {
        tracing::error!(error = %e, "Command failed");
        std::process::exit(1);
    }

    if let Err(e) = coordinator.disconnect().await {
        tracing::warn!(error = %e, "Failed to disconnect backends");
    }
}

async fn run(coordinator: &AgentRuntimeCoordinator, command: Commands) -> CliResult<()> {
    let mut stdout = std::io::stdout();
    match command {
        Commands::Tail {
            operation_id,
            from_start,
            after,
        } => {
            let from = match after {
                Some(id) => StreamCursor::parse(&id).map_err(stepline_runtime::RuntimeError::from)?,
                None if from_start => StreamCursor::Beginning,
                None => StreamCursor::Latest,
            };
            let cancel = CancellationToken::new();
            let on_signal = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    on_signal.cancel();
                }
            });
            inspect::tail(coordinator, &operation_id, from, cancel).await
        }
        Commands::History {
            operation_id,
            count,
        } => {
            let printed = inspect::history(coordinator, &operation_id, count, &mut stdout).await?;
            tracing::debug!(operation_id = %operation_id, printed, "Printed stream history");
            Ok(())
        }
        Commands::Status {
            operation_id,
            history,
            limit,
        } => {
            let query = if history {
                StatusQuery::with_history(limit)
            } else {
                StatusQuery::default()
            };
            inspect::status(coordinator, &operation_id, query, &mut stdout).await
        }
        Commands::Stats => inspect::stats(coordinator, &mut stdout).await,
        Commands::Cleanup => inspect::cleanup(coordinator, &mut stdout).await.map(|_| ()),
        Commands::Delete { operation_id } => {
            inspect::delete(coordinator, &operation_id, &mut stdout).await
        }
    }
}
