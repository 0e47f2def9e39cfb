//! # resume-rag CLI (`rrag`)
//!
//! Operator interface to the resume knowledge base.
//!
//! ## Usage
//!
//! ```bash
//! rrag --config ./config/rrag.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `rrag upload <file>` | Replace the knowledge base with one document and rebuild |
//! | `rrag build` | Rebuild the index from the knowledge-base directory |
//! | `rrag query "<text>"` | Print the nearest chunks with distances |
//! | `rrag context "<text>"` | Print the grounding context handed to the chat layer |
//! | `rrag info` | Show index status |

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use resume_rag::config;
use resume_rag::embedding;
use resume_rag::knowledge::{KnowledgeBase, RebuildError, RebuildReport};

/// resume-rag: chunk, embed, and search a resume knowledge base.
#[derive(Parser)]
#[command(
    name = "rrag",
    about = "resume-rag: a local-first resume knowledge base for job-search assistants",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/rrag.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replace the knowledge base contents with a single document, then rebuild.
    ///
    /// Every file currently in the knowledge-base directory is removed first.
    Upload {
        /// Document to store (.txt, .md, .pdf, .docx).
        file: PathBuf,
    },

    /// Rebuild the vector index from every file in the knowledge-base directory.
    Build {
        /// Load and chunk files and report counts without embedding or writing.
        #[arg(long)]
        dry_run: bool,
    },

    /// Search the knowledge base and print ranked chunks.
    Query {
        /// The query text.
        query: String,

        /// Number of chunks to return (defaults to `retrieval.top_k`).
        #[arg(long)]
        top_k: Option<usize>,
    },

    /// Print the grounding context assembled for a query.
    Context {
        /// The query text.
        query: String,

        /// Number of chunks to join (defaults to `retrieval.top_k`).
        #[arg(long)]
        top_k: Option<usize>,
    },

    /// Show index status: state, chunk count, model, and a sample chunk.
    Info,
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("resume_rag=info,rrag=info")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let cfg = config::load_config(&cli.config)?;

    if let Commands::Build { dry_run: true } = cli.command {
        return run_dry_run(&cfg);
    }

    let embedder = embedding::create_embedder(&cfg.embedding).await?;
    let kb = KnowledgeBase::new(cfg, Arc::clone(&embedder));
    let default_k = kb.config().retrieval.top_k;

    match cli.command {
        Commands::Upload { file } => {
            let stored = kb.replace_documents(&file).await?;
            println!("upload {}", file.display());
            println!("  stored: {}", stored.display());
            run_build(&kb).await?;
        }
        Commands::Build { .. } => {
            run_build(&kb).await?;
        }
        Commands::Query { query, top_k } => {
            let hits = kb.search(&query, top_k.unwrap_or(default_k)).await?;
            if hits.is_empty() {
                println!("no results");
            }
            for (rank, hit) in hits.iter().enumerate() {
                println!(
                    "{}. [{:.4}] {}#{}",
                    rank + 1,
                    hit.distance,
                    hit.source,
                    hit.chunk_id
                );
                println!("   {}", preview(&hit.text, 240));
            }
        }
        Commands::Context { query, top_k } => {
            let context = kb
                .grounding_context(&query, top_k.unwrap_or(default_k))
                .await;
            println!("{}", context);
        }
        Commands::Info => {
            let info = kb.info();
            println!("knowledge base");
            println!("  directory: {}", kb.config().knowledge_base.dir.display());
            println!("  state: {}", info.state.as_str());
            println!("  index exists: {}", info.num_chunks > 0);
            println!("  chunks: {}", info.num_chunks);
            if let (Some(model), Some(dims)) = (&info.model, info.dims) {
                println!("  model: {} ({} dims)", model, dims);
            }
            if let Some(ts) = info.built_at {
                println!("  built: {}", ts.format("%Y-%m-%d %H:%M:%S UTC"));
            }
            println!("  sample: {}", info.sample_chunk);
        }
    }

    Ok(())
}

async fn run_build(kb: &KnowledgeBase) -> Result<()> {
    match kb.rebuild().await {
        Ok(report) => {
            print_report(&report);
            println!("ok");
            Ok(())
        }
        Err(RebuildError::NoChunks { files }) => {
            for f in &files {
                if let Err(e) = &f.outcome {
                    println!("  skipped {}: {}", f.path.display(), e);
                }
            }
            anyhow::bail!("no extractable text in any of {} file(s)", files.len())
        }
        Err(e) => Err(e.into()),
    }
}

fn print_report(report: &RebuildReport) {
    println!("build");
    for f in &report.files {
        match &f.outcome {
            Ok(n) => println!("  {}: {} chunks", f.path.display(), n),
            Err(e) => println!("  skipped {}: {}", f.path.display(), e),
        }
    }
    println!("  files indexed: {}", report.indexed_files());
    println!("  files skipped: {}", report.skipped_files());
    println!("  chunks indexed: {}", report.chunks);
    println!("  model: {} ({} dims)", report.model, report.dims);
    println!("  elapsed: {} ms", report.elapsed.as_millis());
}

fn run_dry_run(cfg: &config::Config) -> Result<()> {
    // Chunking needs no embedder; a hashing one keeps model loading out of it.
    let kb = KnowledgeBase::new(
        cfg.clone(),
        Arc::new(embedding::HashEmbedder::new(embedding::DEFAULT_HASH_DIMS)),
    );
    let (sequence, files) = kb.collect_chunks()?;
    println!("build (dry-run)");
    for f in &files {
        match &f.outcome {
            Ok(n) => println!("  {}: {} chunks", f.path.display(), n),
            Err(e) => println!("  skipped {}: {}", f.path.display(), e),
        }
    }
    println!("  estimated chunks: {}", sequence.len());
    Ok(())
}

fn preview(text: &str, max: usize) -> String {
    let cut = resume_rag::knowledge::truncate_chars(text, max);
    if cut.len() < text.len() {
        format!("{}...", cut)
    } else {
        cut
    }
}
