//! FretCoach command-line entry point.
//!
//! `chat` runs an interactive coaching session against the local practice
//! database; `migrate` creates the schema. The HTTP transport (when
//! deployed) wraps the same [`TurnHandler`] — the CLI exists so the engine
//! can be exercised end to end without it.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use tracing::info;

use fretcoach::agent::plan::MemoryPendingPlans;
use fretcoach::agent::{TurnHandler, TurnMessage, TurnRequest};
use fretcoach::config::{load_config, Config};
use fretcoach::credentials::Credentials;
use fretcoach::providers::gateway::ModelGateway;
use fretcoach::store::Store;
use fretcoach::trace::LogTraceSink;

#[derive(Parser)]
#[command(name = "fretcoach", about = "AI guitar practice coach", version)]
struct Cli {
    /// Path to the configuration file.
    #[arg(long, default_value = "fretcoach.toml")]
    config: PathBuf,

    /// Path to the SQLite database.
    #[arg(long, default_value = "fretcoach.db")]
    db: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start an interactive coaching chat.
    Chat {
        /// User identifier to coach.
        #[arg(long, default_value = "default_user")]
        user: String,
    },
    /// Create the database schema.
    Migrate,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    fretcoach::logging::init_cli();

    let cli = Cli::parse();

    let config = if cli.config.exists() {
        load_config(&cli.config)?
    } else {
        Config::default()
    };

    let options = SqliteConnectOptions::new()
        .filename(&cli.db)
        .create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .connect_with(options)
        .await
        .with_context(|| format!("failed to open database at {}", cli.db.display()))?;
    let store = Store::new(pool);
    store.migrate().await.context("schema migration failed")?;

    match cli.command {
        Command::Migrate => {
            info!(db = %cli.db.display(), "schema ready");
            Ok(())
        }
        Command::Chat { user } => run_chat(config, store, user).await,
    }
}

/// Interactive REPL: one line in, one coached turn out.
async fn run_chat(config: Config, store: Store, user: String) -> Result<()> {
    let credentials = Credentials::from_env();
    let gateway = ModelGateway::from_config(&config.models, &credentials)
        .context("failed to build model gateway")?;

    let handler = TurnHandler::new(
        gateway,
        store,
        Arc::new(MemoryPendingPlans::new()),
        Arc::new(config),
        Some(Arc::new(LogTraceSink)),
    );

    let conversation_id = format!("cli-{}", uuid::Uuid::new_v4());
    let mut history: Vec<TurnMessage> = Vec::new();

    println!("FretCoach coach ready. Type a question, or 'quit' to exit.");
    let stdin = std::io::stdin();
    loop {
        let mut line = String::new();
        if stdin.read_line(&mut line)? == 0 {
            break;
        }
        let text = line.trim();
        if text.is_empty() {
            continue;
        }
        if text.eq_ignore_ascii_case("quit") || text.eq_ignore_ascii_case("exit") {
            break;
        }

        history.push(TurnMessage {
            role: "user".to_owned(),
            content: text.to_owned(),
        });

        let outcome = handler
            .handle_turn(TurnRequest {
                messages: history.clone(),
                user_id: user.clone(),
                conversation_id: Some(conversation_id.clone()),
            })
            .await;

        println!("\n{}\n", outcome.final_answer);
        if !outcome.success {
            eprintln!("(turn degraded; model: {})", outcome.model_used);
        }

        history.push(TurnMessage {
            role: "assistant".to_owned(),
            content: outcome.final_answer,
        });
    }

    Ok(())
}
