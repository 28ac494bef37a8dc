use crate::harvest::archive::archive_joined;
use crate::harvest::audit;
use crate::harvest::clock::ProcessingDay;
use crate::harvest::config::HarvestConfig;
use crate::harvest::convert::{ConversionStage, ExternalConverter, RecordConverter, list_source_files};
use crate::harvest::extract::{ActivityType, ExtractRules, extract};
use crate::harvest::feed;
use crate::harvest::fetch::{HttpSource, ResourceFetcher, ResourceSource};
use crate::harvest::join::{JoinOutcome, JoinStage};
use crate::harvest::lock::RunLock;
use crate::harvest::paths::{HarvestPaths, resolve_paths};
use crate::harvest::report::{self, FetchRow, FetchTally};
use crate::logging::RunLog;
use anyhow::Result;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default)]
pub struct FetchSummary {
    pub feeds_found: usize,
    pub documents: usize,
    pub unreadable: Vec<(PathBuf, String)>,
    pub rows: Vec<FetchRow>,
    pub tally: FetchTally,
    pub csv: Option<PathBuf>,
    pub log: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct TypeSummary {
    pub record_type: ActivityType,
    pub sources: usize,
    pub converted: usize,
    pub reused: usize,
    pub already_joined: usize,
    pub conversion_failures: Vec<(PathBuf, String)>,
    pub join: Option<JoinOutcome>,
    pub error: Option<String>,
    pub archived: usize,
    pub archive_failures: Vec<PathBuf>,
}

impl TypeSummary {
    fn new(record_type: ActivityType) -> Self {
        Self {
            record_type,
            sources: 0,
            converted: 0,
            reused: 0,
            already_joined: 0,
            conversion_failures: Vec::new(),
            join: None,
            error: None,
            archived: 0,
            archive_failures: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ConvertSummary {
    pub converter: Option<PathBuf>,
    pub log: Option<PathBuf>,
    pub types: Vec<TypeSummary>,
}

/// One harvest run: the resolved layout, the processing day, and the run lock
/// that keeps a second run out of the output tree until this one is dropped.
pub struct Harvester {
    cfg: HarvestConfig,
    paths: HarvestPaths,
    day: ProcessingDay,
    _lock: RunLock,
}

impl Harvester {
    pub fn open(cfg: HarvestConfig) -> Result<Self> {
        let paths = resolve_paths(&cfg);
        paths.ensure_output_dirs()?;
        let lock = RunLock::acquire(&paths.lock_file)?;
        let day = ProcessingDay::today(cfg.conversion.time_zone.as_deref())?;
        Ok(Self {
            cfg,
            paths,
            day,
            _lock: lock,
        })
    }

    pub fn paths(&self) -> &HarvestPaths {
        &self.paths
    }

    pub fn day(&self) -> ProcessingDay {
        self.day
    }

    pub fn fetch_phase(&self) -> Result<FetchSummary> {
        let source = HttpSource::new(&self.cfg.fetch.user_agent, self.cfg.fetch_timeout())?;
        self.fetch_with(source)
    }

    /// Discover the latest feeds, extract their record URLs, and download
    /// every record not already on disk.
    pub fn fetch_with<S: ResourceSource>(&self, source: S) -> Result<FetchSummary> {
        let log = RunLog::open(&self.paths.download_log())?;
        log.info("=== Fetch run started ===");

        let rules = ExtractRules::from_config(&self.cfg.extract);
        let fetcher = ResourceFetcher::new(source, self.cfg.politeness_delay());
        let mut out = FetchSummary {
            log: log.path().map(Path::to_path_buf),
            ..FetchSummary::default()
        };

        let feeds = feed::latest_feed_files(&self.paths.input_root)?;
        out.feeds_found = feeds.len();
        if feeds.is_empty() {
            log.critical(format!(
                "No feed documents found under {}",
                self.paths.input_root.display()
            ));
        }

        for path in feeds {
            log.info(format!("Processing feed: {}", path.display()));
            let document = match feed::load_document(&path) {
                Ok(doc) => doc,
                Err(err) => {
                    log.error(format!("Skipping {}: {err:#}", path.display()));
                    out.unreadable.push((path, format!("{err:#}")));
                    continue;
                }
            };
            out.documents += 1;

            let buckets = extract(&document, &rules);
            log.info(format!("Extracted {} record URL(s)", buckets.total()));
            for record_type in rules.recognized.iter() {
                log.info(format!(
                    "[{record_type}] {} URL(s) found",
                    buckets.get(record_type).len()
                ));
            }
            for record_type in rules.recognized.iter() {
                let dest = self.paths.download_dir(record_type);
                for url in buckets.get(record_type) {
                    let status = fetcher.fetch(url, &dest, &log);
                    out.rows.push(FetchRow {
                        record_type,
                        url: url.clone(),
                        status,
                    });
                }
            }
        }

        out.tally = report::tally(&out.rows);
        let csv = report::csv_path(&self.paths.logs_dir, &self.day.stamp());
        match report::write_csv(&csv, &out.rows) {
            Ok(()) => out.csv = Some(csv),
            Err(err) => log.error(format!("Failed to write activity report: {err:#}")),
        }

        let summary = format!(
            "success={} skipped={} failed={}",
            out.tally.success, out.tally.skipped, out.tally.failed
        );
        log.info(format!("=== Fetch run finished: {summary} ==="));
        let status = if out.tally.failed == 0 && out.unreadable.is_empty() {
            "ok"
        } else {
            "partial"
        };
        audit::append_event(&self.paths, "fetch", status, None, &summary)?;
        Ok(out)
    }

    /// Resolve the converter, then convert and join every recognized type.
    /// A missing converter stops this phase before any file is touched.
    pub fn convert_phase(&self) -> Result<ConvertSummary> {
        let log = RunLog::open(&self.paths.conversion_log())?;
        let converter = match ExternalConverter::resolve(&self.cfg.conversion) {
            Ok(converter) => converter,
            Err(err) => {
                log.critical(err.to_string());
                audit::append_event(
                    &self.paths,
                    "convert",
                    err.code().as_str(),
                    None,
                    &err.to_string(),
                )?;
                return Err(err.into());
            }
        };
        log.info(format!("Using converter: {}", converter.bin().display()));
        let mut out = self.convert_with(&converter, &log)?;
        out.converter = Some(converter.bin().to_path_buf());
        Ok(out)
    }

    pub fn convert_with<C: RecordConverter>(
        &self,
        converter: &C,
        log: &RunLog,
    ) -> Result<ConvertSummary> {
        log.info(format!(
            "=== Conversion run started for {} ===",
            self.day.stamp()
        ));
        let stage = ConversionStage {
            converter,
            day: self.day,
            target_ext: &self.cfg.bundle.extension,
        };
        let joiner = JoinStage::new(&self.paths, &self.cfg.bundle, self.day);

        let mut out = ConvertSummary {
            log: log.path().map(Path::to_path_buf),
            ..ConvertSummary::default()
        };
        for record_type in ExtractRules::from_config(&self.cfg.extract).recognized.iter() {
            let summary = self.process_type(record_type, &stage, &joiner, log);
            let status = if summary.error.is_some() {
                "error"
            } else if summary.conversion_failures.is_empty() && summary.archive_failures.is_empty()
            {
                "ok"
            } else {
                "partial"
            };
            let message = describe_join(&summary);
            audit::append_event(&self.paths, "join", status, Some(record_type), &message)?;
            out.types.push(summary);
        }
        log.info("=== Conversion run finished ===");
        Ok(out)
    }

    fn process_type<C: RecordConverter>(
        &self,
        record_type: ActivityType,
        stage: &ConversionStage<'_, C>,
        joiner: &JoinStage<'_>,
        log: &RunLog,
    ) -> TypeSummary {
        let label = record_type.as_str();
        let mut out = TypeSummary::new(record_type);

        let sources = match list_source_files(&self.paths.download_dir(record_type)) {
            Ok(sources) => sources,
            Err(err) => {
                log.error(format!("[{label}] ERROR listing sources: {err:#}"));
                out.error = Some(format!("{err:#}"));
                return out;
            }
        };
        out.sources = sources.len();
        if sources.is_empty() {
            log.info(format!("[{label}] No source files to convert"));
        }

        let archive_dir = self.paths.archive_dir(record_type);
        let converted = match stage.convert_all(
            label,
            &sources,
            &self.paths.converted_dir(record_type),
            &archive_dir,
            log,
        ) {
            Ok(converted) => converted,
            Err(err) => {
                log.error(format!("[{label}] ERROR during conversion: {err:#}"));
                out.error = Some(format!("{err:#}"));
                return out;
            }
        };
        out.converted = converted.converted.len();
        out.reused = converted.reused;
        out.already_joined = converted.already_joined;
        out.conversion_failures = converted.failed;

        match joiner.join(record_type, &converted.converted, log) {
            Ok(outcome) => {
                if let JoinOutcome::Joined { files, .. } = &outcome {
                    let archived = archive_joined(files, &archive_dir, label, log);
                    out.archived = archived.archived.len();
                    out.archive_failures = archived.failed;
                }
                out.join = Some(outcome);
            }
            Err(err) => {
                log.error(format!("[{label}] ERROR during join: {err:#}"));
                out.error = Some(format!("{err:#}"));
            }
        }
        out
    }
}

pub fn describe_join(summary: &TypeSummary) -> String {
    if let Some(err) = &summary.error {
        return format!("error: {err}");
    }
    match &summary.join {
        Some(JoinOutcome::Joined {
            bundle,
            version,
            files,
            bytes,
        }) => format!(
            "joined {} file(s) into {} (v{version}, {bytes} bytes)",
            files.len(),
            bundle.display()
        ),
        Some(JoinOutcome::UpToDate { current }) => {
            format!("up to date ({})", current.display())
        }
        Some(JoinOutcome::BelowMinimum {
            available,
            required,
        }) => format!("waiting for first bundle ({available}/{required} file(s))"),
        None => "not joined".to_string(),
    }
}
