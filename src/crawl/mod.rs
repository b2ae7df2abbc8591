//! Filesystem crawler that populates the catalog.
//!
//! Walks a root recursively, batches metadata into bulk catalog inserts,
//! and checks the generation token at batch boundaries so a superseding
//! operation cancels it cooperatively. On completion it asks the engine for
//! a snapshot rebuild; on cancellation it drops the partial batch and
//! commits nothing further.

use crate::catalog::Catalog;
use crate::engine::SearchEngine;
use crate::error::EngineError;
use crate::index::types::Item;
use crate::utils::canonicalize_path;
use ignore::WalkBuilder;
use log::{debug, info, warn};
use std::path::Path;
use std::sync::Arc;
use std::time::SystemTime;

/// Counters reported by one crawl.
#[derive(Debug, Default, Clone, Copy)]
pub struct CrawlStats {
    /// Entries the walker yielded.
    pub seen: u64,
    /// Entries submitted to the catalog.
    pub indexed: u64,
    /// Entries skipped (walk errors, unreadable metadata, post-start
    /// mtimes).
    pub skipped: u64,
}

/// Crawl policy knobs, read once per crawl.
#[derive(Debug, Clone)]
pub struct CrawlOptions {
    /// Path prefixes excluded from indexing.
    pub excluded_prefixes: Vec<String>,
    /// Skip entries whose name starts with `.`.
    pub skip_hidden: bool,
    /// Batch size for bulk inserts and for cancellation checks.
    pub batch_size: usize,
}

impl Default for CrawlOptions {
    fn default() -> Self {
        Self {
            excluded_prefixes: Vec::new(),
            skip_hidden: true,
            batch_size: 1000,
        }
    }
}

pub struct Crawler {
    catalog: Arc<dyn Catalog>,
    engine: Arc<SearchEngine>,
    options: CrawlOptions,
}

impl Crawler {
    pub fn new(catalog: Arc<dyn Catalog>, engine: Arc<SearchEngine>, options: CrawlOptions) -> Self {
        Self {
            catalog,
            engine,
            options,
        }
    }

    /// Reindex one root: clear its catalog prefix, walk it, then trigger a
    /// rebuild. Returns [`EngineError::Cancelled`] if a newer operation
    /// superseded this crawl or shutdown was requested.
    pub fn crawl(&self, root: &Path) -> Result<CrawlStats, EngineError> {
        let root_path = canonicalize_path(root);
        let generation = self.engine.begin_operation();
        let started = SystemTime::now();
        let batch_size = self.options.batch_size.max(1);

        info!("crawl start: {root_path}");
        self.catalog
            .delete_prefix(&root_path)
            .map_err(EngineError::Catalog)?;

        let excluded = self.options.excluded_prefixes.clone();
        let walker = WalkBuilder::new(&root_path)
            .hidden(self.options.skip_hidden)
            .ignore(false)
            .git_ignore(false)
            .git_global(false)
            .git_exclude(false)
            .parents(false)
            .follow_links(false)
            .filter_entry(move |entry| {
                let path = entry.path().to_string_lossy();
                !excluded.iter().any(|prefix| path.starts_with(prefix.as_str()))
            })
            .build();

        let mut stats = CrawlStats::default();
        let mut batch: Vec<Item> = Vec::with_capacity(batch_size);

        for entry in walker {
            stats.seen += 1;

            // Batch-boundary check: a bumped generation or a shutdown
            // request stops the crawl without flushing the partial batch;
            // the next crawl re-observes whatever was dropped.
            if stats.seen % batch_size as u64 == 0 && self.should_stop(generation) {
                info!("crawl cancelled: {root_path} ({} entries in)", stats.seen);
                return Err(EngineError::Cancelled);
            }

            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    warn!("walk error under {root_path}: {err}");
                    stats.skipped += 1;
                    continue;
                }
            };
            if entry.depth() == 0 {
                continue;
            }

            let metadata = match entry.metadata() {
                Ok(metadata) => metadata,
                Err(err) => {
                    debug!("stat failed for {}: {err}", entry.path().display());
                    stats.skipped += 1;
                    continue;
                }
            };

            let modified = metadata.modified().ok();
            // Entries touched after the crawl started belong to the
            // watcher; indexing them here would double-apply the churn the
            // crawl itself induces.
            if matches!(modified, Some(m) if m > started) {
                stats.skipped += 1;
                continue;
            }

            let name = entry.file_name().to_string_lossy().into_owned();
            batch.push(Item {
                path: entry.path().to_string_lossy().into_owned(),
                name,
                is_dir: metadata.is_dir(),
                size: metadata.len() as i64,
                modified,
            });
            stats.indexed += 1;

            if batch.len() >= batch_size {
                self.catalog
                    .insert_batch(std::mem::take(&mut batch))
                    .map_err(EngineError::Catalog)?;
            }
        }

        if !batch.is_empty() {
            self.catalog
                .insert_batch(batch)
                .map_err(EngineError::Catalog)?;
        }

        info!(
            "crawl done: {root_path} ({} indexed, {} skipped)",
            stats.indexed, stats.skipped
        );
        self.engine.force_rebuild()?;
        Ok(stats)
    }

    fn should_stop(&self, generation: crate::engine::Generation) -> bool {
        !self.engine.generation_valid(generation) || self.engine.shutdown_requested()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::MemoryCatalog;
    use crate::engine::DEFAULT_REBUILD_DEBOUNCE;
    use crate::index::types::SortSpec;
    use std::fs;
    use tempfile::TempDir;

    fn setup() -> (TempDir, Arc<MemoryCatalog>, Arc<SearchEngine>) {
        let dir = TempDir::new().unwrap();
        let catalog = Arc::new(MemoryCatalog::new());
        let engine = SearchEngine::new(
            catalog.clone(),
            dir.path().join("index.bin"),
            DEFAULT_REBUILD_DEBOUNCE,
        );
        (dir, catalog, engine)
    }

    #[test]
    fn test_crawl_indexes_files_and_dirs() {
        let (dir, catalog, engine) = setup();
        let root = dir.path().join("tree");
        fs::create_dir_all(root.join("sub")).unwrap();
        fs::write(root.join("a.txt"), b"aaa").unwrap();
        fs::write(root.join("sub/b.log"), b"bb").unwrap();

        let crawler = Crawler::new(catalog.clone(), engine.clone(), CrawlOptions::default());
        let stats = crawler.crawl(&root).unwrap();

        assert_eq!(stats.indexed, 3); // a.txt, sub, sub/b.log
        assert_eq!(catalog.count().unwrap(), 3);

        // Crawl completion triggered a rebuild; queries see the tree.
        let results = engine.search("b.log", SortSpec::default(), 0);
        assert_eq!(results.total(), 1);
    }

    #[test]
    fn test_crawl_skips_hidden() {
        let (dir, catalog, engine) = setup();
        let root = dir.path().join("tree");
        fs::create_dir_all(&root).unwrap();
        fs::write(root.join("visible.txt"), b"v").unwrap();
        fs::write(root.join(".hidden"), b"h").unwrap();

        let crawler = Crawler::new(catalog.clone(), engine, CrawlOptions::default());
        crawler.crawl(&root).unwrap();

        let paths: Vec<String> = catalog
            .fetch_by_name(None)
            .unwrap()
            .into_iter()
            .map(|i| i.path)
            .collect();
        assert_eq!(paths.len(), 1);
        assert!(paths[0].ends_with("visible.txt"));
    }

    #[test]
    fn test_crawl_respects_excluded_prefixes() {
        let (dir, catalog, engine) = setup();
        let root = dir.path().join("tree");
        fs::create_dir_all(root.join("keep")).unwrap();
        fs::create_dir_all(root.join("skip")).unwrap();
        fs::write(root.join("keep/k.txt"), b"k").unwrap();
        fs::write(root.join("skip/s.txt"), b"s").unwrap();

        let excluded = canonicalize_path(&root.join("skip"));
        let options = CrawlOptions {
            excluded_prefixes: vec![excluded],
            ..Default::default()
        };
        let crawler = Crawler::new(catalog.clone(), engine, options);
        crawler.crawl(&root).unwrap();

        let paths: Vec<String> = catalog
            .fetch_by_name(None)
            .unwrap()
            .into_iter()
            .map(|i| i.path)
            .collect();
        assert!(paths.iter().all(|p| !p.contains("skip")));
        assert!(paths.iter().any(|p| p.ends_with("k.txt")));
    }

    #[test]
    fn test_crawl_clears_previous_root_entries() {
        let (dir, catalog, engine) = setup();
        let root = dir.path().join("tree");
        fs::create_dir_all(&root).unwrap();
        fs::write(root.join("now.txt"), b"n").unwrap();

        // A stale record under the root from an earlier crawl.
        let stale = canonicalize_path(&root.join("stale.txt"));
        catalog
            .upsert(Item {
                path: stale.clone(),
                name: "stale.txt".into(),
                is_dir: false,
                size: 1,
                modified: None,
            })
            .unwrap();

        let crawler = Crawler::new(catalog.clone(), engine, CrawlOptions::default());
        crawler.crawl(&root).unwrap();

        let paths: Vec<String> = catalog
            .fetch_by_name(None)
            .unwrap()
            .into_iter()
            .map(|i| i.path)
            .collect();
        assert!(!paths.contains(&stale));
    }

    #[test]
    fn test_crawl_cancelled_by_newer_generation() {
        let (dir, catalog, engine) = setup();
        let root = dir.path().join("tree");
        fs::create_dir_all(&root).unwrap();
        for i in 0..10 {
            fs::write(root.join(format!("f{i}.txt")), b"x").unwrap();
        }

        // Shutdown requested before the first batch boundary: with a batch
        // size of 2 the crawl stops at the first check.
        engine.request_shutdown();
        let options = CrawlOptions {
            batch_size: 2,
            ..Default::default()
        };
        let crawler = Crawler::new(catalog, engine, options);
        let err = crawler.crawl(&root).unwrap_err();
        assert!(matches!(err, EngineError::Cancelled));
    }
}
