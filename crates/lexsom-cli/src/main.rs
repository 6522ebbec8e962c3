//! CLI entry point for the lexsom engine (for dev and testing).

use std::path::{Path, PathBuf};

use clap::Parser;
use lexsom_core::{
    app_data_dir, load_config, load_config_from, save_config, scan_corpus, status, Engine,
    EngineConfig, EngineError, EmbeddingVector, TrainReport,
};
use serde::Serialize;
use tracing::info;

#[derive(Parser)]
#[command(name = "lexsom")]
#[command(about = "lexsom: self-organizing map clustering and search for legal documents")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(clap::Args)]
struct EngineArgs {
    /// Engine config (TOML). Defaults to the one in the app data directory.
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,
    /// Seed for reproducible runs; overrides the config.
    #[arg(long)]
    seed: Option<u64>,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Show backend status (for dev).
    Status,
    /// Show where lexsom stores its config and snapshots (app data directory).
    DataDir,
    /// Print the effective engine config.
    Config {
        /// Write the default config to the app data directory first.
        #[arg(long)]
        init: bool,
    },
    /// Train on a directory of pre-embedded documents and print the clusters.
    Train {
        /// Directory with .json / .jsonl document records.
        #[arg(value_name = "PATH")]
        path: PathBuf,
        #[command(flatten)]
        engine: EngineArgs,
        /// Write a JSON snapshot of the trained engine here.
        #[arg(long, value_name = "FILE")]
        export: Option<PathBuf>,
        /// Print the training summary as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Train, then search with the embedding of one of the corpus documents.
    Search {
        #[arg(value_name = "PATH")]
        path: PathBuf,
        /// Id of the corpus document whose embedding is the query.
        #[arg(long, value_name = "DOC_ID")]
        query: String,
        #[arg(long, default_value_t = 10)]
        limit: usize,
        #[command(flatten)]
        engine: EngineArgs,
    },
}

#[derive(Serialize)]
struct TrainSummary {
    accepted: usize,
    rejected: Vec<String>,
    epochs_completed: usize,
    cancelled: bool,
    clusters: Vec<ClusterSummary>,
}

#[derive(Serialize)]
struct ClusterSummary {
    id: String,
    nodes: usize,
    documents: usize,
    avg_confidence: f32,
    dominant_evidence_type: Option<String>,
    pattern: [[bool; 2]; 2],
}

impl TrainSummary {
    fn new(report: &TrainReport, engine: &Engine) -> Self {
        Self {
            accepted: report.accepted,
            rejected: report.rejected.iter().map(|e| e.to_string()).collect(),
            epochs_completed: report.epochs_completed,
            cancelled: report.cancelled,
            clusters: engine
                .clusters()
                .iter()
                .map(|c| ClusterSummary {
                    id: c.id.clone(),
                    nodes: c.node_ids.len(),
                    documents: c.document_ids.len(),
                    avg_confidence: c.metadata.avg_confidence,
                    dominant_evidence_type: c
                        .metadata
                        .dominant_evidence_type
                        .as_ref()
                        .map(|e| e.to_string()),
                    pattern: c.boolean_pattern.0,
                })
                .collect(),
        }
    }

    fn print(&self) {
        println!(
            "Trained on {} document(s) for {} epoch(s){}",
            self.accepted,
            self.epochs_completed,
            if self.cancelled { " (cancelled)" } else { "" }
        );
        for r in &self.rejected {
            println!("  skipped: {}", r);
        }
        for c in &self.clusters {
            println!(
                "  {}  nodes={} docs={} confidence={:.2} evidence={} pattern={:?}",
                c.id,
                c.nodes,
                c.documents,
                c.avg_confidence,
                c.dominant_evidence_type.as_deref().unwrap_or("-"),
                c.pattern
            );
        }
    }
}

fn engine_config(args: &EngineArgs, corpus: &[EmbeddingVector]) -> Result<EngineConfig, String> {
    let mut config = match &args.config {
        Some(path) => load_config_from(path).map_err(|e| e.to_string())?,
        None => {
            let mut config = load_config();
            // Without an explicit config, size the grid inputs to the corpus.
            if let Some(first) = corpus.first() {
                if first.embedding.len() != config.dimensions {
                    info!(dimensions = first.embedding.len(), "using corpus embedding size");
                    config.dimensions = first.embedding.len();
                }
            }
            config
        }
    };
    if args.seed.is_some() {
        config.seed = args.seed;
    }
    config.validate().map_err(|e| e.to_string())?;
    Ok(config)
}

/// Loads the corpus and trains an engine on a blocking worker thread.
async fn train_engine(
    path: &Path,
    args: &EngineArgs,
) -> Result<(Engine, TrainReport, Vec<EmbeddingVector>), String> {
    let corpus = scan_corpus(path).map_err(|e| e.to_string())?;
    let config = engine_config(args, &corpus)?;
    info!(documents = corpus.len(), "loaded corpus");
    let docs = corpus.clone();
    let (engine, report) = tokio::task::spawn_blocking(move || {
        let mut engine = Engine::new(config)?;
        let report = engine.train(docs);
        Ok::<_, EngineError>((engine, report))
    })
    .await
    .map_err(|e| format!("training task failed: {}", e))?
    .map_err(|e| e.to_string())?;
    Ok((engine, report, corpus))
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Status) {
        Commands::Status => {
            println!("lexsom backend");
            println!("  core: {}", status());
        }
        Commands::DataDir => match app_data_dir() {
            Some(p) => println!("{}", p.display()),
            None => eprintln!("Could not determine app data directory."),
        },
        Commands::Config { init } => {
            if init {
                if let Err(e) = save_config(&EngineConfig::default()) {
                    eprintln!("Error: {}", e);
                    return;
                }
            }
            match load_config().to_toml() {
                Ok(s) => print!("{}", s),
                Err(e) => eprintln!("Error: {}", e),
            }
        }
        Commands::Train {
            path,
            engine,
            export,
            json,
        } => {
            let (trained, report, _) = match train_engine(&path, &engine).await {
                Ok(t) => t,
                Err(e) => {
                    eprintln!("Error: {}", e);
                    return;
                }
            };
            let summary = TrainSummary::new(&report, &trained);
            if json {
                match serde_json::to_string_pretty(&summary) {
                    Ok(s) => println!("{}", s),
                    Err(e) => eprintln!("Error: {}", e),
                }
            } else {
                summary.print();
            }
            if let Some(out) = export {
                match trained.export().write_to(&out) {
                    Ok(()) => println!("Snapshot written to {}", out.display()),
                    Err(e) => eprintln!("Error: {}", e),
                }
            }
        }
        Commands::Search {
            path,
            query,
            limit,
            engine,
        } => {
            let (trained, _, corpus) = match train_engine(&path, &engine).await {
                Ok(t) => t,
                Err(e) => {
                    eprintln!("Error: {}", e);
                    return;
                }
            };
            let Some(q) = corpus.iter().rev().find(|d| d.id == query) else {
                eprintln!("Error: no document with id {} in {}", query, path.display());
                return;
            };
            match trained.search(&q.embedding, limit) {
                Ok(results) => {
                    println!("{} result(s) for {}", results.len(), query);
                    for r in results {
                        let preview = r.content.lines().next().unwrap_or("").trim();
                        let preview: String = preview.chars().take(60).collect();
                        println!(
                            "  {:.3}  {}  [{} {}]  {}",
                            r.score,
                            r.id,
                            r.node_id,
                            r.cluster_id.as_deref().unwrap_or("-"),
                            preview
                        );
                    }
                }
                Err(e) => eprintln!("Error: {}", e),
            }
        }
    }
}
