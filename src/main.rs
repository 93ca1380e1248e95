use std::io::Write as _;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use futures::StreamExt;

use jotdex::config::{load_config, Config};
use jotdex::index::SnapshotIndex;
use jotdex::service::AiService;

#[derive(Parser)]
#[command(name = "jotdex", about = "Note embedding index with retrieval-augmented chat")]
struct Cli {
    /// Path to the TOML config file
    #[arg(short, long, default_value = "./config/jotdex.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database and an empty index snapshot
    Init,
    /// Manage notes
    Note {
        #[command(subcommand)]
        command: NoteCommands,
    },
    /// Retrieve the notes closest to a query
    Search {
        query: String,
        /// Chunk-level result bound (defaults to retrieval.top_k)
        #[arg(short, long)]
        limit: Option<usize>,
    },
    /// Ask a question, streaming the answer
    Ask { question: String },
    /// Rebuild the whole index from stored notes
    Reindex,
    /// Run the HTTP server
    Serve,
}

#[derive(Subcommand)]
enum NoteCommands {
    /// Add a note and index it
    Add {
        content: String,
        #[arg(long, default_value = "note")]
        kind: String,
    },
    /// Update a note's content and reindex it
    Update { id: i64, content: String },
    /// Delete a note and its index entries
    Delete { id: i64 },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "jotdex=info".into()),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    match cli.command {
        Commands::Init => init(config).await,
        Commands::Note { command } => {
            let service = Arc::new(AiService::from_config(config).await?);
            match command {
                NoteCommands::Add { content, kind } => {
                    let note = service.create_note(&content, &kind).await?;
                    println!("Added note {}", note.id);
                }
                NoteCommands::Update { id, content } => {
                    let note = service.update_note(id, &content).await?;
                    println!("Updated note {}", note.id);
                }
                NoteCommands::Delete { id } => {
                    if service.delete_note(id).await? {
                        println!("Deleted note {}", id);
                    } else {
                        println!("Note {} not found", id);
                    }
                }
            }
            Ok(())
        }
        Commands::Search { query, limit } => {
            let service = AiService::from_config(config).await?;
            let results = service.retrieve(&query, limit).await?;
            if results.is_empty() {
                println!("No results.");
            } else {
                for result in results {
                    println!("{}. [note {}] {}", result.rank + 1, result.note.id, result.note.content);
                }
            }
            Ok(())
        }
        Commands::Ask { question } => {
            let service = AiService::from_config(config).await?;
            let reply = service.chat_completion(&question, &[]).await?;

            if !reply.notes.is_empty() {
                eprintln!("Using {} note(s) as context.", reply.notes.len());
            }

            let mut stream = reply.stream;
            let mut stdout = std::io::stdout();
            while let Some(item) = stream.next().await {
                let fragment = item?;
                print!("{}", fragment);
                stdout.flush()?;
            }
            println!();
            Ok(())
        }
        Commands::Reindex => {
            let service = AiService::from_config(config).await?;
            let (notes, chunks) = service.reindex().await?;
            println!("Reindexed {} note(s) into {} chunk(s)", notes, chunks);
            Ok(())
        }
        Commands::Serve => {
            let service = Arc::new(AiService::from_config(config).await?);
            jotdex::server::run_server(service).await
        }
    }
}

/// Set up the database and snapshot without requiring AI configuration,
/// so a fresh checkout can be initialized before any API key exists.
async fn init(config: Config) -> Result<()> {
    let pool = jotdex::db::connect(&config.db.path).await?;
    jotdex::migrate::run_migrations(&pool).await?;

    let index = SnapshotIndex::load(&config.index.snapshot_path);
    index.persist()?;

    println!("jotdex initialized");
    println!("  database: {}", config.db.path.display());
    println!("  index:    {}", config.index.snapshot_path.display());
    Ok(())
}
