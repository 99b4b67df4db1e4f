use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::io::BufReader;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use uuid::Uuid;

use hypotree::{
    config::{Config, LogFormat},
    engine::{Engine, JsonLinesSink, NodeEdit, RunOutcome, Session},
    error::StorageError,
    generation::LangbaseGenerator,
    langbase::LangbaseClient,
    review::LineReviewGate,
    storage::{SessionSnapshot, SqliteStorage, Storage, StorageContext},
    tree::{render, NodeId},
};

/// Build and refine hypothesis trees with Langbase Pipes.
#[derive(Parser)]
#[command(name = "hypotree", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Build a hypothesis tree for a problem statement
    Run {
        /// The problem statement to decompose
        problem: String,
        /// Session id to persist under (generated if omitted)
        #[arg(long)]
        session: Option<String>,
        /// Text files to attach as session documents
        #[arg(long = "document")]
        documents: Vec<PathBuf>,
        /// Pause after every step for review
        #[arg(long)]
        review: bool,
    },
    /// Edit a node of a stored session and regenerate its subtree
    Restart {
        #[arg(long)]
        session: String,
        /// Dotted id of the node to restart from, e.g. 1.2
        #[arg(long)]
        node: String,
        #[arg(long)]
        text: Option<String>,
        #[arg(long)]
        reasoning: Option<String>,
        #[arg(long)]
        review: bool,
    },
    /// Continue a stored session from its pending queue
    Resume {
        session: String,
        #[arg(long)]
        review: bool,
    },
    /// Print the tree and analyses of a stored session
    Show { session: String },
    /// List stored sessions
    List,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    // Initialize logging
    init_logging(&config);

    info!(version = env!("CARGO_PKG_VERSION"), "Hypotree starting...");

    // Initialize storage
    let storage = match SqliteStorage::new(&config.database).await {
        Ok(s) => {
            info!(path = %config.database.path.display(), "Database initialized");
            Arc::new(s)
        }
        Err(e) => {
            error!(error = %e, "Failed to initialize database");
            return Err(e.into());
        }
    };

    match cli.command {
        Command::Run {
            problem,
            session,
            documents,
            review,
        } => {
            let session_id = session.unwrap_or_else(|| Uuid::new_v4().to_string());
            for path in documents {
                let content = tokio::fs::read_to_string(&path).await?;
                let filename = path
                    .file_name()
                    .map(|f| f.to_string_lossy().into_owned())
                    .unwrap_or_else(|| path.display().to_string());
                storage.add_document(&session_id, &filename, &content).await?;
            }

            let engine = build_engine(&config, storage.clone()).await?;
            let session = Session::new(problem).with_id(session_id);
            drive(&engine, session, review).await
        }
        Command::Restart {
            session,
            node,
            text,
            reasoning,
            review,
        } => {
            let snapshot = storage
                .load_tree(&session)
                .await?
                .ok_or_else(|| StorageError::SessionNotFound {
                    session_id: session.clone(),
                })?;
            let restart_id = NodeId::parse(node)?;
            let edit = NodeEdit { text, reasoning };

            let engine = build_engine(&config, storage.clone()).await?;
            let restarted = engine.restart_session(Session::from(snapshot), &restart_id, &edit);
            drive(&engine, restarted, review).await
        }
        Command::Resume { session, review } => {
            let snapshot = storage
                .load_tree(&session)
                .await?
                .ok_or_else(|| StorageError::SessionNotFound {
                    session_id: session.clone(),
                })?;

            let engine = build_engine(&config, storage.clone()).await?;
            drive(&engine, Session::from(snapshot), review).await
        }
        Command::Show { session } => {
            let snapshot = storage
                .load_tree(&session)
                .await?
                .ok_or_else(|| StorageError::SessionNotFound {
                    session_id: session.clone(),
                })?;
            print_report(&snapshot);
            Ok(())
        }
        Command::List => {
            for id in storage.list_sessions().await? {
                println!("{}", id);
            }
            Ok(())
        }
    }
}

/// Wire the Langbase generator, storage-backed context and progress sink.
async fn build_engine(config: &Config, storage: Arc<SqliteStorage>) -> anyhow::Result<Engine> {
    let client = match LangbaseClient::new(&config.langbase, config.request.clone()) {
        Ok(c) => {
            info!(base_url = %config.langbase.base_url, "Langbase client initialized");
            c
        }
        Err(e) => {
            error!(error = %e, "Failed to initialize Langbase client");
            return Err(e.into());
        }
    };

    let generator = LangbaseGenerator::new(client, config.pipes.clone());

    // Ensure required pipes exist (create if needed)
    info!("Ensuring required Langbase pipes exist...");
    if let Err(e) = generator.ensure_pipes().await {
        error!(error = %e, "Failed to ensure pipes exist");
        return Err(e.into());
    }

    let context = StorageContext::new(storage.clone());
    Ok(
        Engine::new(Arc::new(generator), Arc::new(context), config.engine.clone())
            .with_storage(storage)
            .with_progress(Arc::new(JsonLinesSink::stdout())),
    )
}

async fn drive(engine: &Engine, mut session: Session, review: bool) -> anyhow::Result<()> {
    let outcome = if review {
        let gate = LineReviewGate::new(BufReader::new(tokio::io::stdin()), tokio::io::stderr());
        engine.run_reviewed(&mut session, &gate).await?
    } else {
        engine.run(&mut session).await?
    };

    let session_id = session.id.as_deref().unwrap_or_default();
    match outcome {
        RunOutcome::Completed => info!(
            session_id = %session_id,
            nodes = session.tree.len(),
            analyses = session.analyses.len(),
            "Hypothesis tree complete"
        ),
        RunOutcome::Stopped => info!(
            session_id = %session_id,
            pending = session.queue.len(),
            "Run stopped; continue with `resume`"
        ),
    }
    Ok(())
}

fn print_report(snapshot: &SessionSnapshot) {
    println!("Problem: {}", snapshot.problem_statement);
    println!();
    for (depth, node) in render(&snapshot.tree) {
        let indent = "  ".repeat(depth.saturating_sub(1));
        let marker = if node.is_leaf { " (LEAF)" } else { "" };
        println!("{}[{}] {}{}", indent, node.id, node.text, marker);
    }

    if !snapshot.analyses.is_empty() {
        println!();
        println!("Analyses:");
        for a in &snapshot.analyses {
            println!("  [{}] {}", a.hypothesis_id, a.analysis_required);
            println!("      Source: {}", a.source_of_reference);
        }
    }

    if !snapshot.queue.is_empty() {
        let pending: Vec<String> = snapshot.queue.iter().map(|i| i.to_string()).collect();
        println!();
        println!("Pending: {}", pending.join(", "));
    }
}

/// Initialize tracing/logging
fn init_logging(config: &Config) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    match config.logging.format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Pretty => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}
