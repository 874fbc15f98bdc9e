use crate::index::build::IndexStore;
use crate::store::ObjectStore;
use crate::utils::{AppConfig, find_search_root, indexed_roots};
use anyhow::Result;
use std::path::Path;

/// Display index statistics
pub fn show_stats(root_path: &Path) -> Result<()> {
    // Resolve the root the path belongs to
    let root = find_search_root(root_path)?;
    let config = AppConfig::load()?;
    let mut index = IndexStore::open(&root, config.engine)?;
    let session = &mut index.session;

    let documents = index.engine.document_count(session)?;
    let words = index.engine.word_count(session)?;
    let vocabulary = index.engine.lexicon().word_count(session)?;
    let store = index.store.stats();

    println!("Index Statistics");
    println!("================");
    println!();
    println!("Root path:        {}", index.meta.root_path.display());
    println!("Index location:   {}", index.dir.display());
    println!("Index version:    {}", index.meta.version);
    println!("Scoring:          {:?}", index.engine.kind());
    println!("Document count:   {}", documents);
    println!("Indexed terms:    {}", words);
    println!("Vocabulary:       {}", vocabulary);
    println!("Store nodes:      {}", store.node_count);
    println!("Round trips:      {}", session.round_trips());

    // Index size
    if let Ok(size) = dir_size(&index.dir) {
        println!();
        println!("Index size:       {}", format_size(size));
    }

    // Timestamps
    println!();
    println!(
        "Created:          {}",
        format_timestamp(index.meta.created_at)
    );
    println!(
        "Updated:          {}",
        format_timestamp(index.meta.updated_at)
    );

    Ok(())
}

/// List every indexed root
pub fn list_indexes() -> Result<()> {
    let roots = indexed_roots()?;

    if roots.is_empty() {
        println!("No indexes found.");
        return Ok(());
    }

    println!("Indexed Roots");
    println!("=============");
    println!();

    for location in roots {
        let exists = location.root_path.exists();
        let status = if exists { "" } else { " [missing]" };
        println!("  {}{}", location.root_path.display(), status);
        println!("    Index: {}", location.index_dir.display());
        println!();
    }

    Ok(())
}

/// Calculate directory size recursively
fn dir_size(path: &Path) -> std::io::Result<u64> {
    let mut size = 0;
    if path.is_dir() {
        for entry in std::fs::read_dir(path)? {
            let entry = entry?;
            let path = entry.path();
            if path.is_file() {
                size += entry.metadata()?.len();
            } else if path.is_dir() {
                size += dir_size(&path)?;
            }
        }
    }
    Ok(size)
}

/// Format byte size to human readable
fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} bytes", bytes)
    }
}

/// Format unix timestamp
fn format_timestamp(ts: u64) -> String {
    use std::time::{Duration, UNIX_EPOCH};
    let datetime = UNIX_EPOCH + Duration::from_secs(ts);
    format!("{:?}", datetime)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(512), "512 bytes");
        assert_eq!(format_size(2048), "2.00 KB");
        assert_eq!(format_size(3 * 1024 * 1024), "3.00 MB");
    }
}
