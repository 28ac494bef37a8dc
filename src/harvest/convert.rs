use crate::error::HarvestError;
use crate::harvest::archive;
use crate::harvest::clock::ProcessingDay;
use crate::harvest::config::ConversionConfig;
use crate::harvest::util::{
    ProcessOutcome, modified_time, non_empty_file, run_with_timeout, truncate_with_ellipsis,
};
use crate::logging::RunLog;
use anyhow::{Context, Result};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;
use thiserror::Error;

const SOURCE_SUFFIXES: [&str; 2] = [".xml", ".marcxml"];
const DOUBLED_SUFFIX: &str = ".marcxml";
const STDERR_TAIL_CHARS: usize = 240;

#[derive(Debug, Error)]
pub enum ConversionError {
    #[error("converter could not be started: {0}")]
    Spawn(String),
    #[error("timeout expired after {}s", .0.as_secs())]
    Timeout(Duration),
    #[error("converter exited with {status}: {stderr}")]
    NonZeroExit { status: String, stderr: String },
    #[error("converter produced no output at {0}")]
    MissingOutput(String),
}

/// Maps one source record file onto one converted file.
pub trait RecordConverter {
    fn convert(&self, src: &Path, dest: &Path) -> Result<(), ConversionError>;
}

#[derive(Debug, Clone)]
pub struct ExternalConverter {
    bin: PathBuf,
    format_flag: String,
    timeout: Duration,
}

impl ExternalConverter {
    /// Locate the converter: the configured path when it exists, otherwise a
    /// `PATH` lookup of its file name.
    pub fn resolve(cfg: &ConversionConfig) -> Result<Self, HarvestError> {
        let configured = PathBuf::from(cfg.converter_bin.trim());
        let bin = if configured.is_file() {
            configured
        } else {
            let name = configured
                .file_name()
                .map(|n| n.to_os_string())
                .unwrap_or_else(|| configured.clone().into_os_string());
            which::which(&name).map_err(|err| {
                HarvestError::MissingConverter(format!("{}: {err}", configured.display()))
            })?
        };
        Ok(Self {
            bin,
            format_flag: cfg.output_format_flag.clone(),
            timeout: Duration::from_secs(cfg.timeout_secs),
        })
    }

    pub fn bin(&self) -> &Path {
        &self.bin
    }
}

impl RecordConverter for ExternalConverter {
    fn convert(&self, src: &Path, dest: &Path) -> Result<(), ConversionError> {
        let mut cmd = Command::new(&self.bin);
        cmd.arg("-s").arg(src).arg("-d").arg(dest).arg(&self.format_flag);

        let outcome = run_with_timeout(&mut cmd, self.timeout)
            .map_err(|err| ConversionError::Spawn(format!("{err:#}")))?;
        let output = match outcome {
            ProcessOutcome::Exited(output) => output,
            ProcessOutcome::TimedOut { after } => return Err(ConversionError::Timeout(after)),
        };
        if !output.status.success() {
            return Err(ConversionError::NonZeroExit {
                status: output.status.to_string(),
                stderr: truncate_with_ellipsis(
                    String::from_utf8_lossy(&output.stderr).trim(),
                    STDERR_TAIL_CHARS,
                ),
            });
        }
        Ok(())
    }
}

fn is_source_file(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    let lower = name.to_ascii_lowercase();
    SOURCE_SUFFIXES.iter().any(|suffix| lower.ends_with(suffix))
}

/// MARCXML files waiting in a download directory, sorted and deduplicated.
pub fn list_source_files(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut out = BTreeSet::new();
    for entry in fs::read_dir(dir).with_context(|| format!("failed to read {}", dir.display()))? {
        let path = entry?.path();
        if path.is_file() && is_source_file(&path) {
            out.insert(path);
        }
    }
    Ok(out.into_iter().collect())
}

/// `n123.marcxml.xml` → `n123.{ext}`; `n123.xml` → `n123.{ext}`.
pub fn converted_name(src: &Path, target_ext: &str) -> Option<String> {
    let stem = src.file_stem()?.to_str()?;
    let cut = stem.len().checked_sub(DOUBLED_SUFFIX.len());
    let base = match cut.and_then(|at| stem.get(at..).map(|tail| (at, tail))) {
        Some((at, tail)) if tail.eq_ignore_ascii_case(DOUBLED_SUFFIX) => &stem[..at],
        _ => stem,
    };
    if base.is_empty() {
        return None;
    }
    Some(format!("{base}.{target_ext}"))
}

#[derive(Debug, Clone, Default)]
pub struct ConversionOutcome {
    /// Valid converted files, freshly produced or reused from earlier today.
    pub converted: Vec<PathBuf>,
    pub reused: usize,
    pub already_joined: usize,
    pub failed: Vec<(PathBuf, String)>,
}

pub struct ConversionStage<'a, C> {
    pub converter: &'a C,
    pub day: ProcessingDay,
    pub target_ext: &'a str,
}

impl<C: RecordConverter> ConversionStage<'_, C> {
    pub fn convert_all(
        &self,
        label: &str,
        sources: &[PathBuf],
        out_dir: &Path,
        archive_dir: &Path,
        log: &RunLog,
    ) -> Result<ConversionOutcome> {
        fs::create_dir_all(out_dir)
            .with_context(|| format!("failed to create {}", out_dir.display()))?;

        let mut out = ConversionOutcome::default();
        let mut produced = BTreeSet::new();
        for src in sources {
            let src_name = src
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            let Some(dest_name) = converted_name(src, self.target_ext) else {
                log.error(format!("[{label}] FAILED: {src_name}: no usable file name"));
                out.failed.push((src.clone(), "no usable file name".to_string()));
                continue;
            };

            if archive::is_archived(archive_dir, &dest_name) {
                out.already_joined += 1;
                continue;
            }

            if !produced.insert(dest_name.clone()) {
                let reason = format!("{dest_name} already produced by another source");
                log.error(format!("[{label}] FAILED: {src_name}: {reason}"));
                out.failed.push((src.clone(), reason));
                continue;
            }

            let dest = out_dir.join(&dest_name);
            if self.is_fresh(&dest) {
                log.info(format!("[{label}] [SKIP] Already converted: {src_name}"));
                out.reused += 1;
                out.converted.push(dest);
                continue;
            }

            let result = self.converter.convert(src, &dest).and_then(|()| {
                if non_empty_file(&dest) {
                    Ok(())
                } else {
                    Err(ConversionError::MissingOutput(dest.display().to_string()))
                }
            });
            match result {
                Ok(()) => {
                    log.info(format!("[{label}] SUCCESS: {src_name}"));
                    out.converted.push(dest);
                }
                Err(err) => {
                    log.error(format!("[{label}] FAILED: {src_name}: {err}"));
                    // A partial output must not pass as "converted today" next run.
                    let _ = fs::remove_file(&dest);
                    out.failed.push((src.clone(), err.to_string()));
                }
            }
        }

        if out.already_joined > 0 {
            log.info(format!(
                "[{label}] [SKIP] {} source file(s) already joined and archived",
                out.already_joined
            ));
        }
        Ok(out)
    }

    fn is_fresh(&self, dest: &Path) -> bool {
        non_empty_file(dest) && modified_time(dest).is_ok_and(|mtime| self.day.contains(mtime))
    }
}
