use crate::logging::RunLog;
use anyhow::{Context, Result};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

pub const MARKER_SUFFIX: &str = ".joined";

#[derive(Debug, Clone, Default)]
pub struct ArchiveOutcome {
    pub archived: Vec<PathBuf>,
    pub failed: Vec<PathBuf>,
}

pub fn marker_path(archive_dir: &Path, file_name: &str) -> PathBuf {
    archive_dir.join(format!("{file_name}{MARKER_SUFFIX}"))
}

/// A converted file name is spent once its marker exists in the archive.
pub fn is_archived(archive_dir: &Path, file_name: &str) -> bool {
    marker_path(archive_dir, file_name).exists()
}

fn move_file(from: &Path, to: &Path) -> Result<()> {
    if from == to {
        return Ok(());
    }
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }

    match fs::rename(from, to) {
        Ok(_) => Ok(()),
        Err(rename_err) => {
            if matches!(
                rename_err.kind(),
                ErrorKind::CrossesDevices | ErrorKind::PermissionDenied
            ) {
                fs::copy(from, to).with_context(|| {
                    format!("failed to copy {} to {}", from.display(), to.display())
                })?;
                fs::remove_file(from)
                    .with_context(|| format!("failed to remove {}", from.display()))?;
                Ok(())
            } else {
                Err(rename_err).with_context(|| {
                    format!("failed to move {} to {}", from.display(), to.display())
                })
            }
        }
    }
}

fn archive_one(file: &Path, archive_dir: &Path) -> Result<PathBuf> {
    let name = file
        .file_name()
        .and_then(|n| n.to_str())
        .with_context(|| format!("no usable file name in {}", file.display()))?;
    let target = archive_dir.join(name);
    move_file(file, &target)?;
    let marker = marker_path(archive_dir, name);
    fs::File::create(&marker).with_context(|| format!("failed to create {}", marker.display()))?;
    Ok(target)
}

/// Move every joined file into `archive_dir` and drop its marker next to it.
/// Failures are logged per file and never undo the join.
pub fn archive_joined(
    files: &[PathBuf],
    archive_dir: &Path,
    label: &str,
    log: &RunLog,
) -> ArchiveOutcome {
    let mut out = ArchiveOutcome::default();
    for file in files {
        match archive_one(file, archive_dir) {
            Ok(target) => out.archived.push(target),
            Err(err) => {
                log.error(format!("[{label}] ARCHIVE FAILED: {}: {err:#}", file.display()));
                out.failed.push(file.clone());
            }
        }
    }
    if !out.archived.is_empty() {
        log.info(format!(
            "[{label}] Archived {} joined file(s) -> {}",
            out.archived.len(),
            archive_dir.display()
        ));
    }
    out
}
