use anyhow::{Context, Result};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

const FEED_EXTENSIONS: [&str; 2] = ["json", "jsonld"];

fn is_feed_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| FEED_EXTENSIONS.contains(&ext))
}

fn visit_dir(dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    let mut latest: Option<(SystemTime, PathBuf)> = None;
    let mut subdirs = Vec::new();

    let entries = fs::read_dir(dir).with_context(|| format!("failed to read {}", dir.display()))?;
    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            subdirs.push(path);
            continue;
        }
        if !path.is_file() || !is_feed_file(&path) {
            continue;
        }
        let modified = entry.metadata()?.modified().unwrap_or(UNIX_EPOCH);
        match &latest {
            Some((best, best_path)) if (modified, &path) <= (*best, best_path) => {}
            _ => latest = Some((modified, path)),
        }
    }

    if let Some((_, path)) = latest {
        out.push(path);
    }

    subdirs.sort();
    for sub in subdirs {
        visit_dir(&sub, out)?;
    }
    Ok(())
}

/// The most recently modified `.json`/`.jsonld` file of every directory under
/// `root`, the root included. Directories without feed files contribute nothing.
pub fn latest_feed_files(root: &Path) -> Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    if !root.is_dir() {
        return Ok(out);
    }
    visit_dir(root, &mut out)?;
    Ok(out)
}

pub fn load_document(path: &Path) -> Result<Value> {
    let raw = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_slice(&raw).with_context(|| format!("failed to parse {}", path.display()))
}
