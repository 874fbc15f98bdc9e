use crate::engine::SearchEngine;
use crate::index::types::{DocId, EngineConfig, IndexMeta, ScoringKind};
use crate::store::{MemoryStore, Session};
use crate::tree::BTree;
use crate::tree::prefetch::batch_lookup;
use crate::utils::{
    AppConfig, META_FILE, SNAPSHOT_FILE, find_search_root, index_dir_for, key_u64, remove_index,
    u64_key,
};
use anyhow::{Context, Result};
use ignore::WalkBuilder;
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use rustc_hash::FxHashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::debug;

/// Bytes inspected when deciding whether a file is binary
const BINARY_PROBE: usize = 8192;

/// An index directory: the store snapshot, its engine and the
/// DocId -> relative path tree, opened in one session
pub struct IndexStore {
    pub dir: PathBuf,
    pub store: Arc<MemoryStore>,
    pub session: Session,
    pub engine: SearchEngine,
    /// DocId -> path relative to the indexed root
    pub documents: BTree,
    pub meta: IndexMeta,
}

impl IndexStore {
    /// Start an empty index for `root`
    pub fn create(root: &Path, config: EngineConfig) -> Result<Self> {
        let dir = index_dir_for(root)?;
        fs::create_dir_all(&dir)?;

        let store = Arc::new(MemoryStore::new());
        let mut session = Session::new(store.clone());
        let engine = SearchEngine::create(&mut session, config.clone());
        let documents = BTree::create(&mut session, config.tree);
        let now = unix_now();
        let meta = IndexMeta {
            root_path: root.to_path_buf(),
            engine_root: engine.root().0,
            documents_root: documents.root().0,
            scoring: config.scoring,
            created_at: now,
            updated_at: now,
            ..IndexMeta::default()
        };
        Ok(Self {
            dir,
            store,
            session,
            engine,
            documents,
            meta,
        })
    }

    /// Open the index previously built for `root`
    pub fn open(root: &Path, config: EngineConfig) -> Result<Self> {
        let dir = index_dir_for(root)?;
        let meta_path = dir.join(META_FILE);
        let file = fs::File::open(&meta_path)
            .with_context(|| format!("No index found for {}. Run 'veil index' first", root.display()))?;
        let meta: IndexMeta = serde_json::from_reader(file).context("Failed to parse meta.json")?;

        let store = Arc::new(
            MemoryStore::open(&dir.join(SNAPSHOT_FILE)).context("Failed to open store snapshot")?,
        );
        let mut session = Session::new(store.clone());
        let engine = SearchEngine::open(&mut session, meta.engine_root(), config.clone())
            .context("Failed to open search engine")?;
        let documents = BTree::open(meta.documents_root(), config.tree);
        Ok(Self {
            dir,
            store,
            session,
            engine,
            documents,
            meta,
        })
    }

    /// Every indexed relative path with its DocId
    pub fn paths(&mut self) -> Result<FxHashMap<String, DocId>> {
        let mut paths = FxHashMap::default();
        for (key, value) in self.documents.items(&mut self.session)? {
            let doc = key_u64(&key).context("Corrupt document key")?;
            paths.insert(String::from_utf8_lossy(&value).into_owned(), doc);
        }
        Ok(paths)
    }

    /// Paths of `docs`, resolved in one batched lookup
    pub fn resolve(&mut self, docs: &[DocId]) -> Result<Vec<Option<String>>> {
        let keys: Vec<[u8; 8]> = docs.iter().map(|&d| u64_key(d)).collect();
        let lookups: Vec<_> = keys
            .iter()
            .map(|k| (self.documents.root(), k.as_slice()))
            .collect();
        batch_lookup(&mut self.session, &lookups)?;

        let mut paths = Vec::with_capacity(docs.len());
        for key in &keys {
            let path = self.documents.get(&mut self.session, key)?;
            paths.push(path.map(|p| String::from_utf8_lossy(&p).into_owned()));
        }
        Ok(paths)
    }

    /// Commit pending changes, then write the snapshot and meta.json
    pub fn save(&mut self) -> Result<()> {
        self.session.commit()?;
        self.meta.doc_count = self.engine.document_count(&mut self.session)?;
        self.meta.word_count = self.engine.word_count(&mut self.session)?;
        self.meta.updated_at = unix_now();

        self.store
            .save(&self.dir.join(SNAPSHOT_FILE))
            .context("Failed to write store snapshot")?;
        let meta = serde_json::to_string_pretty(&self.meta)?;
        fs::write(self.dir.join(META_FILE), meta).context("Failed to write meta.json")?;
        debug!(dir = %self.dir.display(), docs = self.meta.doc_count, "index saved");
        Ok(())
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Read a file as indexable text; binary and non UTF-8 files are skipped
fn read_text(path: &Path, max_file_size: u64) -> Option<String> {
    let content = fs::read(path).ok()?;
    if content.len() as u64 > max_file_size {
        return None;
    }
    if memchr::memchr(0, &content[..content.len().min(BINARY_PROBE)]).is_some() {
        return None;
    }
    String::from_utf8(content).ok()
}

fn spinner(message: &'static str) -> Result<ProgressBar> {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}")?);
    spinner.set_message(message);
    spinner.enable_steady_tick(std::time::Duration::from_millis(80));
    Ok(spinner)
}

/// Build or update the search index.
///
/// Files already indexed keep their DocId and are reindexed, so unchanged
/// files cost no writes; files that disappeared are unindexed.
pub fn build_index(root_path: &Path, force: bool, scoring: Option<ScoringKind>) -> Result<()> {
    build_index_with_progress(root_path, force, scoring, false)
}

pub fn build_index_with_progress(
    root_path: &Path,
    force: bool,
    scoring: Option<ScoringKind>,
    silent: bool,
) -> Result<()> {
    let root = root_path.canonicalize().context("Invalid path")?;
    let app = AppConfig::load()?;
    let mut config = app.engine.clone();
    if let Some(kind) = scoring {
        config.scoring = kind;
    }

    let existing = index_dir_for(&root)?.join(META_FILE).exists();
    let reopened = if existing && !force {
        let index = IndexStore::open(&root, config.clone())?;
        // A different strategy needs a rebuild from scratch
        (scoring.is_none() || index.engine.kind() == config.scoring).then_some(index)
    } else {
        None
    };
    if reopened.is_none() && existing {
        remove_index(&root).context("Failed to remove existing index")?;
    }
    let mut index = match reopened {
        Some(index) => index,
        None => IndexStore::create(&root, config)?,
    };

    if !silent {
        println!("Indexing: {}", root.display());
    }

    // Phase 1: Collect all file paths with spinner
    let collect_spinner = if !silent {
        Some(spinner("Discovering files...")?)
    } else {
        None
    };

    let ignored = app.index.ignored_paths.clone();
    let walker = WalkBuilder::new(&root)
        .hidden(true)
        .git_ignore(true)
        .git_global(true)
        .git_exclude(true)
        .filter_entry(move |entry| {
            let name = entry.file_name().to_string_lossy();
            !ignored.iter().any(|ignored| ignored.as_str() == name.as_ref())
        })
        .build();

    let file_entries: Vec<(PathBuf, String)> = walker
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().is_file())
        .filter_map(|entry| {
            let path = entry.path().to_path_buf();
            let rel_path = path.strip_prefix(&root).ok()?.to_string_lossy().into_owned();
            Some((path, rel_path))
        })
        .collect();

    let total_files = file_entries.len();
    if let Some(spinner) = collect_spinner {
        spinner.finish_with_message(format!("Found {} files", total_files));
    }

    // Phase 2: Read in parallel, index and commit chunk by chunk
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(app.reader_threads())
        .build()
        .context("Failed to start reader threads")?;

    let mut stale = index.paths()?;
    let mut next_id = stale.values().max().map_or(1, |max| max + 1);
    let skipped = AtomicUsize::new(0);
    let chunk_size = app.index.chunk_size.max(1);
    let max_file_size = app.index.max_file_size;
    let num_chunks = total_files.div_ceil(chunk_size);
    let mut total_terms = 0usize;

    for (chunk_idx, chunk) in file_entries.chunks(chunk_size).enumerate() {
        let progress_bar = if !silent {
            let pb = ProgressBar::new(chunk.len() as u64);
            pb.set_style(
                ProgressStyle::default_bar()
                    .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({percent}%) {msg}")?
                    .progress_chars("█▓▒░  "),
            );
            if num_chunks > 1 {
                pb.set_message(format!("Chunk {}/{}", chunk_idx + 1, num_chunks));
            } else {
                pb.set_message("Reading files...");
            }
            Some(pb)
        } else {
            None
        };

        let texts: Vec<(&str, String)> = pool.install(|| {
            chunk
                .par_iter()
                .filter_map(|(full_path, rel_path)| {
                    let text = read_text(full_path, max_file_size);
                    if text.is_none() {
                        skipped.fetch_add(1, Ordering::Relaxed);
                    }
                    if let Some(ref pb) = progress_bar {
                        pb.inc(1);
                    }
                    Some((rel_path.as_str(), text?))
                })
                .collect()
        });

        let mut docs = Vec::with_capacity(texts.len());
        for (rel_path, text) in &texts {
            let doc = match stale.remove(*rel_path) {
                Some(doc) => doc,
                None => {
                    let doc = next_id;
                    next_id += 1;
                    index
                        .documents
                        .insert(&mut index.session, &u64_key(doc), rel_path.as_bytes())?;
                    doc
                }
            };
            docs.push((doc, text.as_str()));
        }
        total_terms += index.engine.index_many(&mut index.session, &docs)?;
        index.session.commit()?;

        if let Some(pb) = progress_bar {
            pb.finish_with_message(format!("Indexed {} files", docs.len()));
        }
    }

    // Phase 3: Drop files that are gone, then persist
    let finalize_spinner = if !silent {
        Some(spinner("Finalizing index...")?)
    } else {
        None
    };

    if !stale.is_empty() {
        let gone: Vec<DocId> = stale.values().copied().collect();
        index.engine.unindex_many(&mut index.session, &gone)?;
        for doc in &gone {
            index.documents.remove(&mut index.session, &u64_key(*doc))?;
        }
        debug!(removed = gone.len(), "unindexed missing files");
    }
    index.save()?;

    if let Some(spinner) = finalize_spinner {
        spinner.finish_with_message("Index complete");
    }

    if !silent {
        println!(
            "{} documents, {} distinct terms, {} terms read",
            index.meta.doc_count, index.meta.word_count, total_terms
        );
        if !stale.is_empty() {
            println!("Removed {} missing files", stale.len());
        }
        println!("Index stored at: {}", index.dir.display());
    }

    let skipped = skipped.load(Ordering::Relaxed);
    if skipped > 0 && !silent {
        eprintln!("({} files skipped: unreadable, binary or too large)", skipped);
    }

    Ok(())
}

/// Build the index of the root `start_path` belongs to
pub fn build_index_auto(start_path: &Path, force: bool, scoring: Option<ScoringKind>) -> Result<()> {
    let root = find_search_root(start_path)?;
    println!("Detected root: {}", root.display());
    build_index(&root, force, scoring)
}
