use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use veilsearch::index::build::{IndexStore, build_index_auto};
use veilsearch::index::{ScoringKind, stats};
use veilsearch::output::{ResolvedHit, print_hits, print_json};
use veilsearch::utils::{self, AppConfig};

#[derive(Parser)]
#[command(name = "veil")]
#[command(about = "Ranked full-text search over a lazily-paged object store")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build or update the index
    Index {
        /// Path to index (auto-detects git root)
        #[arg(default_value = ".")]
        path: PathBuf,

        /// Force full rebuild
        #[arg(short, long)]
        force: bool,

        /// Rank with Okapi BM25 instead of the incremental merge
        #[arg(long)]
        okapi: bool,
    },
    /// Search the index, most relevant documents first
    Search {
        /// Query words, or glob patterns with --glob
        #[arg(required = true)]
        query: Vec<String>,

        /// Path to search in
        #[arg(short, long, default_value = ".")]
        path: PathBuf,

        /// Treat the query as glob patterns (`*` and `?`)
        #[arg(short, long)]
        glob: bool,

        /// Maximum number of results
        #[arg(short = 'n', long, default_value_t = 20)]
        limit: usize,

        /// Skip this many results first
        #[arg(long, default_value_t = 0)]
        offset: usize,

        /// Print results as JSON
        #[arg(long)]
        json: bool,

        /// Disable colors
        #[arg(long)]
        no_color: bool,
    },
    /// Show index statistics
    Stats {
        /// Path to index
        #[arg(default_value = ".")]
        path: PathBuf,
    },
    /// List all indexed roots
    List,
    /// Remove an index
    Remove {
        /// Directory whose index should be removed
        path: PathBuf,
    },
    /// Print the effective configuration
    Config {
        /// Write it to the config file
        #[arg(long)]
        save: bool,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Index { path, force, okapi } => {
            let scoring = okapi.then_some(ScoringKind::Okapi);
            build_index_auto(&path, force, scoring)?;
        }
        Commands::Search {
            query,
            path,
            glob,
            limit,
            offset,
            json,
            no_color,
        } => {
            let query = query.join(" ");
            let hits = run_search(&path, &query, glob, offset, limit)?;
            if json {
                print_json(&query, &hits)?;
            } else if hits.is_empty() {
                eprintln!("No matches");
            } else {
                print_hits(&hits, !no_color)?;
            }
        }
        Commands::Stats { path } => {
            stats::show_stats(&path)?;
        }
        Commands::List => {
            stats::list_indexes()?;
        }
        Commands::Remove { path } => {
            let root = utils::find_search_root(&path)?;
            utils::remove_index(&root)?;
            println!("Removed index for: {}", root.display());
        }
        Commands::Config { save } => {
            let config = AppConfig::load()?;
            println!("{}", serde_json::to_string_pretty(&config)?);
            if save {
                config.save()?;
                println!("Saved to: {}", utils::config_path()?.display());
            }
        }
    }

    Ok(())
}

fn run_search(
    path: &std::path::Path,
    query: &str,
    glob: bool,
    offset: usize,
    limit: usize,
) -> Result<Vec<ResolvedHit>> {
    let root = utils::find_search_root(path)?;
    let config = AppConfig::load()?;
    let mut index = IndexStore::open(&root, config.engine)?;

    let hits = if glob {
        index.engine.search_glob(&mut index.session, query)
    } else {
        index.engine.search(&mut index.session, query)
    }
    .context("Search failed")?;

    let mut window = index.engine.sliceable(hits);
    let hits = window.slice(&mut index.session, offset..offset.saturating_add(limit))?;
    let docs: Vec<u64> = hits.iter().map(|h| h.doc_id).collect();
    let paths = index.resolve(&docs)?;

    Ok(hits
        .into_iter()
        .zip(paths)
        .enumerate()
        .map(|(i, (hit, path))| ResolvedHit {
            rank: offset + i + 1,
            doc_id: hit.doc_id,
            score: hit.score,
            path,
        })
        .collect())
}
