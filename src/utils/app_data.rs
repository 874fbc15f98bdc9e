//! Where indexes live on disk and which root a path belongs to.
//!
//! Each indexed root gets a slot directory under the data dir, named after
//! the root's folder plus a hash of its canonical path. A slot holds the
//! store snapshot and `meta.json`.

use crate::index::types::{EngineConfig, IndexConfig, IndexMeta};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::fs;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const APP_NAME: &str = "veil";
const CONFIG_FILE: &str = "config.json";
const INDEXES_DIR: &str = "indexes";
pub const META_FILE: &str = "meta.json";
pub const SNAPSHOT_FILE: &str = "store.bin";

/// Settings read from `config.json` in the data directory
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Strategy and tuning of newly created engines
    pub engine: EngineConfig,
    pub index: IndexConfig,
    /// File reader threads while indexing; 0 picks the core count
    pub read_threads: usize,
}

impl AppConfig {
    /// Settings on disk, or the defaults when none were saved
    pub fn load() -> Result<Self> {
        let path = config_path()?;
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        serde_json::from_str(&text).with_context(|| format!("Failed to parse {}", path.display()))
    }

    pub fn save(&self) -> Result<()> {
        let path = config_path()?;
        fs::write(&path, serde_json::to_string_pretty(self)?)
            .with_context(|| format!("Failed to write {}", path.display()))
    }

    pub fn reader_threads(&self) -> usize {
        match self.read_threads {
            0 => std::thread::available_parallelism().map_or(4, |n| n.get()),
            n => n,
        }
    }
}

fn data_dir() -> Result<PathBuf> {
    let dir = dirs::data_local_dir()
        .context("Could not determine the data directory")?
        .join(APP_NAME);
    fs::create_dir_all(&dir)?;
    Ok(dir)
}

pub fn config_path() -> Result<PathBuf> {
    Ok(data_dir()?.join(CONFIG_FILE))
}

/// Slot directory for the index of `root`; not created here
pub fn index_dir_for(root: &Path) -> Result<PathBuf> {
    Ok(data_dir()?.join(INDEXES_DIR).join(slot_name(root)))
}

/// `<folder>-<hash of canonical path>`
fn slot_name(root: &Path) -> String {
    let canonical = root.canonicalize().unwrap_or_else(|_| root.to_path_buf());
    let mut hasher = DefaultHasher::new();
    canonical.hash(&mut hasher);

    let label: String = canonical
        .file_name()
        .map(|name| {
            name.to_string_lossy()
                .chars()
                .filter(|c| c.is_alphanumeric() || matches!(c, '-' | '_'))
                .take(16)
                .collect()
        })
        .unwrap_or_default();
    let label = if label.is_empty() { "root" } else { label.as_str() };
    format!("{}-{:016x}", label, hasher.finish())
}

/// Root that `start` belongs to: the nearest ancestor already indexed,
/// else the nearest enclosing git checkout, else `start` itself
pub fn find_search_root(start: &Path) -> Result<PathBuf> {
    let start = start
        .canonicalize()
        .with_context(|| format!("Invalid path {}", start.display()))?;
    let mut checkout = None;
    for dir in start.ancestors() {
        if index_dir_for(dir)?.join(META_FILE).exists() {
            return Ok(dir.to_path_buf());
        }
        if checkout.is_none() && dir.join(".git").exists() {
            checkout = Some(dir.to_path_buf());
        }
    }
    Ok(checkout.unwrap_or(start))
}

/// A slot with readable metadata
#[derive(Debug, Clone)]
pub struct IndexLocation {
    pub root_path: PathBuf,
    pub index_dir: PathBuf,
}

/// Every indexed root, sorted by path
pub fn indexed_roots() -> Result<Vec<IndexLocation>> {
    let slots = data_dir()?.join(INDEXES_DIR);
    if !slots.exists() {
        return Ok(Vec::new());
    }

    let mut found = Vec::new();
    for entry in fs::read_dir(&slots)? {
        let index_dir = entry?.path();
        let meta_path = index_dir.join(META_FILE);
        let Ok(file) = fs::File::open(&meta_path) else {
            continue;
        };
        match serde_json::from_reader::<_, IndexMeta>(file) {
            Ok(meta) => found.push(IndexLocation {
                root_path: meta.root_path,
                index_dir,
            }),
            Err(err) => warn!(path = %meta_path.display(), %err, "skipping unreadable index metadata"),
        }
    }
    found.sort_by(|a, b| a.root_path.cmp(&b.root_path));
    Ok(found)
}

pub fn remove_index(root: &Path) -> Result<()> {
    let dir = index_dir_for(root)?;
    if dir.exists() {
        fs::remove_dir_all(&dir).with_context(|| format!("Failed to remove {}", dir.display()))?;
        debug!(root = %root.display(), "removed index");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::ScoringKind;

    #[test]
    fn test_slot_name() {
        let a = slot_name(Path::new("/srv/corpus/news feed!"));
        assert_eq!(a, slot_name(Path::new("/srv/corpus/news feed!")));
        assert_ne!(a, slot_name(Path::new("/srv/other/news feed!")));
        assert!(a.starts_with("newsfeed-"));
        assert!(slot_name(Path::new("/")).starts_with("root-"));
    }

    #[test]
    fn test_find_search_root_prefers_checkout() {
        let dir = tempfile::tempdir().unwrap();
        let checkout = dir.path().join("site");
        let deep = checkout.join("pages").join("archive");
        fs::create_dir_all(&deep).unwrap();
        fs::create_dir_all(checkout.join(".git")).unwrap();

        let root = find_search_root(&deep).unwrap();
        assert_eq!(root, checkout.canonicalize().unwrap());

        let loose = dir.path().join("loose");
        fs::create_dir_all(&loose).unwrap();
        assert_eq!(find_search_root(&loose).unwrap(), loose.canonicalize().unwrap());
    }

    #[test]
    fn test_reader_threads() {
        let mut config = AppConfig::default();
        assert!(config.reader_threads() >= 1);
        config.read_threads = 3;
        assert_eq!(config.reader_threads(), 3);
    }

    #[test]
    fn test_app_config_partial_json() {
        let json = r#"{"engine": {"scoring": "okapi", "merge": {"window": 5}}}"#;
        let config: AppConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.engine.scoring, ScoringKind::Okapi);
        assert_eq!(config.engine.merge.window, 5);
        assert_eq!(config.engine.merge.initial_read, 40);
        assert_eq!(config.read_threads, 0);
        assert_eq!(config.index.chunk_size, 2000);

        let empty: AppConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(empty.engine, EngineConfig::default());
    }
}
