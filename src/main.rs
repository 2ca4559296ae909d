use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use knowflow::{
    config, logging,
    error::RagError,
    ingestion::IngestMetadata,
    pipeline::{KnowledgeBase, QueryRequest},
};
use serde::Serialize;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(
    name = "knowflow",
    version,
    about = "Ingest documents and answer questions over them with role-scoped retrieval"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Ingest a file or every supported file under a directory.
    Ingest {
        path: PathBuf,
        #[arg(long)]
        department: Option<String>,
        #[arg(long)]
        doc_type: Option<String>,
        #[arg(long)]
        access_level: Option<String>,
    },
    /// Ask a question.
    Query {
        text: String,
        #[arg(long)]
        role: Option<String>,
        #[arg(long)]
        department: Option<String>,
        #[arg(long)]
        method: Option<String>,
        #[arg(long)]
        top_k: Option<usize>,
    },
    /// Show index statistics.
    Stats,
    /// Delete index entries by id.
    Delete {
        #[arg(required = true)]
        ids: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    logging::init_tracing();
    match run(Cli::parse()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            match error.downcast_ref::<RagError>() {
                Some(rag) => eprintln!("error [{}]: {}", rag.kind(), rag.public_message()),
                None => eprintln!("error: {error:#}"),
            }
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = config::init_config().context("Failed to load configuration")?;
    let knowledge = KnowledgeBase::from_config(config).await?;

    match cli.command {
        Command::Ingest {
            path,
            department,
            doc_type,
            access_level,
        } => {
            let metadata = IngestMetadata {
                department,
                doc_type,
                access_level,
                ..IngestMetadata::default()
            };
            if path.is_dir() {
                print_json(&knowledge.ingest_directory(&path, &metadata).await?)
            } else {
                print_json(&knowledge.ingest_file(&path, &metadata).await?)
            }
        }
        Command::Query {
            text,
            role,
            department,
            method,
            top_k,
        } => {
            let request = QueryRequest {
                text,
                role,
                department,
                method,
                top_k,
            };
            print_json(&knowledge.query(request).await?)
        }
        Command::Stats => print_json(&knowledge.stats().await?),
        Command::Delete { ids } => {
            if knowledge.delete(&ids).await {
                print_json(&serde_json::json!({ "success": true, "deleted": ids.len() }))
            } else {
                Err(anyhow!("Failed to delete {} entries", ids.len()))
            }
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
