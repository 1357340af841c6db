use anyhow::Result;
use clap::{Parser, Subcommand};
use cli::{commands, render};
use indexer_core::config::{self, Secrets};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::warn;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "drive-indexer")]
#[command(about = "Index a cloud drive's sync folder into hybrid vector search", long_about = None)]
struct Cli {
    /// Path to config TOML
    #[arg(short, long)]
    config: Option<String>,

    /// Print machine-readable JSON instead of a report
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Crawl the source and bring the index up to date
    Index {
        /// Override the source root
        #[arg(long)]
        root: Option<String>,
        /// Number of files processed concurrently
        #[arg(long)]
        workers: Option<usize>,
        /// Leave deleted files in the index
        #[arg(long, default_value_t = false)]
        no_sweep: bool,
        /// Fail files whose cloud OCR fails instead of falling back
        #[arg(long, default_value_t = false)]
        strict_ocr: bool,
    },
    /// Hybrid search over indexed documents
    Search {
        query: String,
        /// Number of results
        #[arg(long)]
        top_k: Option<usize>,
    },
    /// Remove blobs without vectors and vectors without blobs
    Cleanup,
    /// Remove every indexed document under a folder
    Purge {
        /// Folder path, e.g. /Documents/Old
        folder: String,
    },
    /// Create the vector collection if it is missing
    Init,
    /// Validate configuration, credentials and the collection
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut cfg = config::load(cli.config.as_deref())?;
    let secrets = Secrets::from_env();

    match cli.command {
        Commands::Index {
            root,
            workers,
            no_sweep,
            strict_ocr,
        } => {
            if let Some(root) = root {
                cfg.source.root = root;
            }
            if let Some(workers) = workers {
                cfg.pipeline.workers = workers;
            }
            if no_sweep {
                cfg.pipeline.sweep = false;
            }
            if strict_ocr {
                cfg.ocr.strict = true;
            }

            let cancel = Arc::new(AtomicBool::new(false));
            {
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        warn!("Interrupted; finishing in-flight files");
                        cancel.store(true, Ordering::SeqCst);
                    }
                });
            }

            let summary = commands::index(&cfg, &secrets, cancel).await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                print!("{}", summary);
            }
            if !summary.failures.is_empty() {
                std::process::exit(2);
            }
        }
        Commands::Search { query, top_k } => {
            if let Some(k) = top_k {
                cfg.query.top_k = k;
            }
            let resp = commands::search(&cfg, &secrets, &query).await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&resp)?);
            } else {
                print!("{}", render::search(&resp));
            }
        }
        Commands::Cleanup => {
            let report = commands::cleanup(&cfg, &secrets).await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print!("{}", render::cleanup(&report));
            }
        }
        Commands::Purge { folder } => {
            let removed = commands::purge(&cfg, &secrets, &folder).await?;
            if cli.json {
                println!("{}", serde_json::json!({ "removed": removed }));
            } else {
                print!("{}", render::purge(&folder, &removed));
            }
        }
        Commands::Init => {
            let created = commands::init(&cfg, &secrets).await?;
            if cli.json {
                println!("{}", serde_json::json!({ "created": created }));
            } else if created {
                println!("Created collection {}", cfg.vectors.collection);
            } else {
                println!("Collection {} already exists", cfg.vectors.collection);
            }
        }
        Commands::Check => {
            let report = commands::check(&cfg, &secrets).await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print!("{}", render::check(&report));
            }
            if !report.is_ok() {
                std::process::exit(1);
            }
        }
    }
    Ok(())
}
