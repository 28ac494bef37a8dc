use crate::harvest::clock::ProcessingDay;
use crate::harvest::config::BundleConfig;
use crate::harvest::extract::ActivityType;
use crate::harvest::ledger::{self, LedgerRecord};
use crate::harvest::paths::HarvestPaths;
use crate::harvest::util::{modified_time, now_epoch_secs, staging_file};
use crate::logging::RunLog;
use anyhow::{Context, Result};
use std::fs::{self, File};
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

const COPY_BUFFER_BYTES: usize = 1024 * 1024;

/// File names of the bundles for one record type on one day:
/// `{prefix}_{type}_{date}.{ext}` first, then `_v2`, `_v3`, ...
#[derive(Debug, Clone)]
pub struct BundleNaming {
    base: String,
    extension: String,
}

impl BundleNaming {
    pub fn new(prefix: &str, record_type: ActivityType, date: &str, extension: &str) -> Self {
        Self {
            base: format!("{prefix}_{record_type}_{date}"),
            extension: extension.to_string(),
        }
    }

    pub fn file_name(&self, version: u32) -> String {
        if version <= 1 {
            format!("{}.{}", self.base, self.extension)
        } else {
            format!("{}_v{version}.{}", self.base, self.extension)
        }
    }

    /// Version encoded in `file_name`, or None when it is not one of ours.
    pub fn parse_version(&self, file_name: &str) -> Option<u32> {
        let stem = file_name
            .strip_suffix(self.extension.as_str())?
            .strip_suffix('.')?
            .strip_prefix(self.base.as_str())?;
        if stem.is_empty() {
            return Some(1);
        }
        let digits = stem.strip_prefix("_v")?;
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        digits.parse().ok()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinOutcome {
    /// First bundle of the day held back until enough files exist.
    BelowMinimum { available: usize, required: usize },
    /// A bundle exists and nothing arrived since.
    UpToDate { current: PathBuf },
    Joined {
        bundle: PathBuf,
        version: u32,
        files: Vec<PathBuf>,
        bytes: u64,
    },
}

pub struct JoinStage<'a> {
    pub joined_dir: &'a Path,
    pub ledger_path: PathBuf,
    pub bundle: &'a BundleConfig,
    pub day: ProcessingDay,
}

impl<'a> JoinStage<'a> {
    pub fn new(paths: &'a HarvestPaths, bundle: &'a BundleConfig, day: ProcessingDay) -> Self {
        Self {
            joined_dir: &paths.joined_dir,
            ledger_path: paths.ledger_file(),
            bundle,
            day,
        }
    }

    pub fn naming(&self, record_type: ActivityType) -> BundleNaming {
        BundleNaming::new(
            &self.bundle.prefix,
            record_type,
            &self.day.stamp(),
            &self.bundle.extension,
        )
    }

    /// The bundle new files are measured against: the unversioned one if
    /// present, else the most recently written versioned one.
    pub fn current_bundle(&self, naming: &BundleNaming) -> Result<Option<PathBuf>> {
        let unversioned = self.joined_dir.join(naming.file_name(1));
        if unversioned.exists() {
            return Ok(Some(unversioned));
        }
        if !self.joined_dir.exists() {
            return Ok(None);
        }

        let mut best: Option<(SystemTime, u32, PathBuf)> = None;
        let entries = fs::read_dir(self.joined_dir)
            .with_context(|| format!("failed to read {}", self.joined_dir.display()))?;
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name();
            let Some(version) = name.to_str().and_then(|n| naming.parse_version(n)) else {
                continue;
            };
            let path = entry.path();
            let mtime = modified_time(&path)?;
            let newer = best
                .as_ref()
                .is_none_or(|(m, v, _)| (mtime, version) > (*m, *v));
            if newer {
                best = Some((mtime, version, path));
            }
        }
        Ok(best.map(|(_, _, path)| path))
    }

    /// First free slot in the version sequence.
    pub fn next_bundle(&self, naming: &BundleNaming) -> (u32, PathBuf) {
        let mut version = 1;
        loop {
            let candidate = self.joined_dir.join(naming.file_name(version));
            if !candidate.exists() {
                return (version, candidate);
            }
            version += 1;
        }
    }

    /// Fold the not-yet-bundled part of `converted` into a new bundle and
    /// record every folded file in the ledger.
    pub fn join(
        &self,
        record_type: ActivityType,
        converted: &[PathBuf],
        log: &RunLog,
    ) -> Result<JoinOutcome> {
        let label = record_type.as_str();
        let date = self.day.stamp();
        let records = ledger::read_ledger(&self.ledger_path)?;
        let history = ledger::partition_history(&records, record_type, &date);

        let mut candidates: Vec<PathBuf> = converted
            .iter()
            .filter(|path| !history.joined_sources.contains(&path.display().to_string()))
            .cloned()
            .collect();
        let recorded = converted.len() - candidates.len();
        candidates.sort();
        candidates.dedup();
        if recorded > 0 {
            log.info(format!(
                "[{label}] [SKIP] {recorded} file(s) already recorded in a bundle"
            ));
        }

        let naming = self.naming(record_type);
        let new_files = match self.current_bundle(&naming)? {
            None => {
                let required = self.bundle.min_first_bundle_files;
                if candidates.len() < required {
                    log.info(format!(
                        "[{label}] Skipping initial join: only {} file(s), need {required}",
                        candidates.len()
                    ));
                    return Ok(JoinOutcome::BelowMinimum {
                        available: candidates.len(),
                        required,
                    });
                }
                candidates
            }
            Some(current) => {
                let new_files = if history.has_records_for_day {
                    candidates
                } else {
                    let watermark = modified_time(&current)?;
                    newer_than(candidates, watermark)?
                };
                if new_files.is_empty() {
                    log.info(format!(
                        "[{label}] [SKIP] No new converted files since last join ({})",
                        current.display()
                    ));
                    return Ok(JoinOutcome::UpToDate { current });
                }
                new_files
            }
        };

        let (version, target) = self.next_bundle(&naming);
        if version > 1 {
            log.info(format!(
                "[{label}] Existing bundle detected. Creating new version: {}",
                target.display()
            ));
        }
        log.info(format!(
            "[{label}] Joining {} file(s) -> {}",
            new_files.len(),
            target.display()
        ));

        // An unreadable input must fail the join before any bundle exists.
        let joined_at = now_epoch_secs()?;
        let mut entries = Vec::with_capacity(new_files.len());
        for file in &new_files {
            entries.push(LedgerRecord {
                record_type,
                date: date.clone(),
                bundle_path: target.display().to_string(),
                bundle_version: version,
                source_path: file.display().to_string(),
                content_hash: ledger::file_hash(file)?,
                joined_at_epoch_secs: joined_at,
            });
        }

        let bytes = self.publish(&new_files, &target)?;
        if bytes == 0 {
            log.warn(format!("[{label}] Bundle is empty: {}", target.display()));
        } else {
            log.info(format!(
                "[{label}] SUCCESS: Bundle created: {} ({bytes} bytes)",
                target.display()
            ));
        }

        ledger::append_records(&self.ledger_path, &entries)?;

        Ok(JoinOutcome::Joined {
            bundle: target,
            version,
            files: new_files,
            bytes,
        })
    }

    /// Concatenate `files` into a staging file and move it to `target`
    /// without ever replacing an existing bundle.
    fn publish(&self, files: &[PathBuf], target: &Path) -> Result<u64> {
        fs::create_dir_all(self.joined_dir)
            .with_context(|| format!("failed to create {}", self.joined_dir.display()))?;
        let mut staged = staging_file(self.joined_dir)
            .with_context(|| format!("failed to stage in {}", self.joined_dir.display()))?;

        let mut buf = vec![0u8; COPY_BUFFER_BYTES];
        let mut total = 0u64;
        for file in files {
            let mut input =
                File::open(file).with_context(|| format!("failed to open {}", file.display()))?;
            total += copy_buffered(&mut input, staged.as_file_mut(), &mut buf)
                .with_context(|| format!("failed to append {}", file.display()))?;
        }
        staged.as_file_mut().flush()?;
        staged.as_file().sync_all()?;

        staged.persist_noclobber(target).map_err(|err| {
            let kind = err.error.kind();
            let err = anyhow::Error::from(err.error);
            if kind == ErrorKind::AlreadyExists {
                err.context(format!("bundle appeared concurrently: {}", target.display()))
            } else {
                err.context(format!("failed to publish {}", target.display()))
            }
        })?;
        Ok(total)
    }
}

fn newer_than(files: Vec<PathBuf>, watermark: SystemTime) -> Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    for file in files {
        if modified_time(&file)? > watermark {
            out.push(file);
        }
    }
    Ok(out)
}

fn copy_buffered(input: &mut impl Read, output: &mut impl Write, buf: &mut [u8]) -> Result<u64> {
    let mut total = 0u64;
    loop {
        let n = match input.read(buf) {
            Ok(0) => return Ok(total),
            Ok(n) => n,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        };
        output.write_all(&buf[..n])?;
        total += n as u64;
    }
}
