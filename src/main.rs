use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use findex::catalog::MemoryCatalog;
use findex::crawl::{CrawlOptions, Crawler};
use findex::engine::{EngineEvent, SearchEngine};
use findex::index::{SortKey, SortSpec};
use findex::{utils, watch};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "findex")]
#[command(about = "Interactive file-search engine over an indexed filesystem")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Crawl the root directories and build the snapshot
    Index {
        /// Root directory to index (defaults to the configured roots)
        root: Option<PathBuf>,
    },
    /// Query the existing snapshot
    Search {
        /// Substring query; whitespace-separated tokens must all match
        query: String,

        /// Sort key
        #[arg(long, value_enum, default_value = "name")]
        sort: SortArg,

        /// Sort descending
        #[arg(long)]
        desc: bool,

        /// Maximum results to print (0 = unlimited)
        #[arg(short = 'n', long, default_value = "50")]
        limit: usize,
    },
    /// Crawl the roots, then watch them for changes until interrupted
    Watch {
        /// Root directory to index and watch (defaults to the configured
        /// roots)
        root: Option<PathBuf>,
    },
    /// Remove the snapshot and reset state
    Clear,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum SortArg {
    Name,
    Path,
    Size,
    Date,
}

impl From<SortArg> for SortKey {
    fn from(arg: SortArg) -> Self {
        match arg {
            SortArg::Name => SortKey::Name,
            SortArg::Path => SortKey::Path,
            SortArg::Size => SortKey::Size,
            SortArg::Date => SortKey::Date,
        }
    }
}

fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();
    let config = utils::AppConfig::load();
    let snapshot = utils::snapshot_path()?;

    let catalog = Arc::new(MemoryCatalog::new());
    let engine = SearchEngine::new(catalog.clone(), snapshot, config.rebuild_debounce());

    match cli.command {
        Commands::Index { root } => {
            let roots = resolve_roots(root, &config)?;
            let crawler = Crawler::new(catalog, engine.clone(), crawl_options(&config));
            for root in &roots {
                let stats = crawler.crawl(root)?;
                println!(
                    "{}: indexed {} entries ({} skipped)",
                    root.display(),
                    stats.indexed,
                    stats.skipped
                );
            }
            println!("snapshot at {}", engine.snapshot_path().display());
        }
        Commands::Search {
            query,
            sort,
            desc,
            limit,
        } => {
            engine.load()?;
            let spec = SortSpec {
                key: sort.into(),
                ascending: !desc,
            };
            let results = engine.search(&query, spec, limit);
            for item in results.iter_items() {
                println!("{}\t{}\t{}", item.size, item.name, item.path);
            }
            eprintln!("{} of {} matches", results.len(), results.total());
        }
        Commands::Watch { root } => {
            let roots = resolve_roots(root, &config)?;
            engine.load()?;
            let crawler = Crawler::new(catalog.clone(), engine.clone(), crawl_options(&config));
            for root in &roots {
                crawler.crawl(root)?;
            }

            let _watcher =
                watch::spawn_watcher(&roots, catalog, engine.clone(), config.watch_debounce())?;

            let events = engine.subscribe();
            for root in &roots {
                println!("watching {} (ctrl-c to stop)", root.display());
            }
            for event in events {
                if event == EngineEvent::IndexUpdated {
                    println!("index updated: {} items in snapshot", engine.item_count());
                }
            }
        }
        Commands::Clear => {
            engine.clear()?;
            println!("snapshot removed");
        }
    }

    Ok(())
}

fn crawl_options(config: &utils::AppConfig) -> CrawlOptions {
    CrawlOptions {
        excluded_prefixes: config.excluded_paths.clone(),
        skip_hidden: config.skip_hidden,
        batch_size: config.crawl_batch_size,
    }
}

fn resolve_roots(arg: Option<PathBuf>, config: &utils::AppConfig) -> Result<Vec<PathBuf>> {
    let roots = match arg {
        Some(root) => vec![root],
        None => config.roots.clone(),
    };
    if roots.is_empty() {
        anyhow::bail!("no root given and no roots configured; pass a directory or set `roots` in config.toml");
    }
    Ok(roots)
}
