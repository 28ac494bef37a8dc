use crate::error::HarvestError;
use crate::harvest::extract::ActivityType;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (compatible; LCHarvester/1.0; +https://example.org)";

fn default_base_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("lc_harvest")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub input_root: PathBuf,
    pub output_root: PathBuf,
    pub logs_dir: Option<PathBuf>,
}

impl Default for PathsConfig {
    fn default() -> Self {
        let base = default_base_dir();
        Self {
            input_root: base.join("Daily_LC_Activity_Streams"),
            output_root: base.join("LC_Activity_Downloads"),
            logs_dir: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    pub timeout_secs: u64,
    pub politeness_delay_secs: u64,
    pub user_agent: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            politeness_delay_secs: 5,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversionConfig {
    /// Absolute path, or a bare name looked up on `PATH`.
    pub converter_bin: String,
    pub timeout_secs: u64,
    pub output_format_flag: String,
    /// IANA zone deciding the calendar day; local time when unset.
    pub time_zone: Option<String>,
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            converter_bin: "cmarcedit".to_string(),
            timeout_secs: 90,
            output_format_flag: "-xmlmarc".to_string(),
            time_zone: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractConfig {
    pub recognized_types: Vec<ActivityType>,
    pub media_type: String,
    pub href_suffix: String,
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            recognized_types: ActivityType::ALL.to_vec(),
            media_type: "application/marc+xml".to_string(),
            href_suffix: ".marcxml.xml".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BundleConfig {
    pub prefix: String,
    pub extension: String,
    pub min_first_bundle_files: usize,
}

impl Default for BundleConfig {
    fn default() -> Self {
        Self {
            prefix: "LC_Authorities".to_string(),
            extension: "mrc".to_string(),
            min_first_bundle_files: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct HarvestConfig {
    pub paths: PathsConfig,
    pub fetch: FetchConfig,
    pub conversion: ConversionConfig,
    pub extract: ExtractConfig,
    pub bundle: BundleConfig,
}

impl HarvestConfig {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch.timeout_secs)
    }

    pub fn politeness_delay(&self) -> Duration {
        Duration::from_secs(self.fetch.politeness_delay_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialHarvestConfig {
    paths: Option<PathsConfig>,
    fetch: Option<FetchConfig>,
    conversion: Option<ConversionConfig>,
    extract: Option<ExtractConfig>,
    bundle: Option<BundleConfig>,
}

fn env_or_u64(var: &str, fallback: u64) -> u64 {
    match env::var(var) {
        Ok(v) => v.trim().parse::<u64>().ok().unwrap_or(fallback),
        Err(_) => fallback,
    }
}

fn env_or_string(var: &str, fallback: &str) -> String {
    match env::var(var) {
        Ok(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => fallback.to_string(),
    }
}

fn env_or_path(var: &str, fallback: &Path) -> PathBuf {
    match env::var(var) {
        Ok(v) if !v.trim().is_empty() => PathBuf::from(v.trim()),
        _ => fallback.to_path_buf(),
    }
}

fn env_optional_string(var: &str, fallback: Option<String>) -> Option<String> {
    match env::var(var) {
        Ok(v) if !v.trim().is_empty() => Some(v.trim().to_string()),
        _ => fallback,
    }
}

fn env_or_types(var: &str, fallback: &[ActivityType]) -> Result<Vec<ActivityType>> {
    let Ok(raw) = env::var(var) else {
        return Ok(fallback.to_vec());
    };
    let names = raw
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>();
    if names.is_empty() {
        return Ok(fallback.to_vec());
    }
    names
        .into_iter()
        .map(|name| {
            ActivityType::from_str(name).map_err(|_| {
                anyhow::Error::from(HarvestError::InvalidConfig(format!(
                    "{var}: unrecognized activity type `{name}`"
                )))
            })
        })
        .collect()
}

pub fn validate(cfg: &HarvestConfig) -> Result<()> {
    let invalid = |msg: &str| -> anyhow::Error { HarvestError::InvalidConfig(msg.to_string()).into() };

    if cfg.fetch.timeout_secs == 0 {
        return Err(invalid("fetch timeout must be >= 1 second"));
    }
    if cfg.conversion.timeout_secs == 0 {
        return Err(invalid("conversion timeout must be >= 1 second"));
    }
    if cfg.fetch.user_agent.trim().is_empty() {
        return Err(invalid("user agent cannot be empty"));
    }
    if cfg.conversion.converter_bin.trim().is_empty() {
        return Err(invalid("converter binary cannot be empty"));
    }
    if cfg.extract.recognized_types.is_empty() {
        return Err(invalid("recognized activity types cannot be empty"));
    }
    if cfg.extract.media_type.trim().is_empty() || cfg.extract.href_suffix.trim().is_empty() {
        return Err(invalid("media type and href suffix cannot be empty"));
    }
    if cfg.bundle.prefix.trim().is_empty() || cfg.bundle.extension.trim().is_empty() {
        return Err(invalid("bundle prefix and extension cannot be empty"));
    }
    if cfg.bundle.extension.starts_with('.') {
        return Err(invalid("bundle extension is given without a leading dot"));
    }
    if cfg.bundle.min_first_bundle_files == 0 {
        return Err(invalid("minimum first bundle size must be >= 1"));
    }
    if let Some(zone) = cfg.conversion.time_zone.as_deref() {
        zone.parse::<chrono_tz::Tz>()
            .map_err(|err| invalid(&format!("time zone `{zone}`: {err}")))?;
    }
    Ok(())
}

fn resolve_config_path() -> Option<PathBuf> {
    if let Ok(custom) = env::var("HARVEST_CONFIG_PATH") {
        let trimmed = custom.trim();
        if !trimmed.is_empty() {
            return Some(PathBuf::from(trimmed));
        }
    }

    let home = dirs::home_dir()?;
    Some(home.join(".lc_harvest").join("harvest.toml"))
}

fn merge_toml(base: &mut HarvestConfig, raw: &str, origin: &Path) -> Result<()> {
    let parsed: PartialHarvestConfig = toml::from_str(raw).map_err(|err| {
        HarvestError::InvalidConfig(format!("failed to parse {}: {err}", origin.display()))
    })?;
    if let Some(paths) = parsed.paths {
        base.paths = paths;
    }
    if let Some(fetch) = parsed.fetch {
        base.fetch = fetch;
    }
    if let Some(conversion) = parsed.conversion {
        base.conversion = conversion;
    }
    if let Some(extract) = parsed.extract {
        base.extract = extract;
    }
    if let Some(bundle) = parsed.bundle {
        base.bundle = bundle;
    }
    Ok(())
}

fn merge_file_config(base: &mut HarvestConfig) -> Result<Option<PathBuf>> {
    let Some(path) = resolve_config_path() else {
        return Ok(None);
    };
    if !path.exists() {
        return Ok(None);
    }

    let raw = fs::read_to_string(&path)
        .map_err(|err| HarvestError::InvalidConfig(format!("{}: {err}", path.display())))?;
    merge_toml(base, &raw, &path)?;
    Ok(Some(path))
}

#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: HarvestConfig,
    pub source_file: Option<PathBuf>,
}

pub fn load_config() -> Result<LoadedConfig> {
    let mut cfg = HarvestConfig::default();
    let source_file = merge_file_config(&mut cfg)?;

    cfg.paths.input_root = env_or_path("HARVEST_INPUT_ROOT", &cfg.paths.input_root);
    cfg.paths.output_root = env_or_path("HARVEST_OUTPUT_ROOT", &cfg.paths.output_root);
    if let Ok(v) = env::var("HARVEST_LOGS_DIR")
        && !v.trim().is_empty()
    {
        cfg.paths.logs_dir = Some(PathBuf::from(v.trim()));
    }
    cfg.fetch.timeout_secs = env_or_u64("HARVEST_FETCH_TIMEOUT_SECS", cfg.fetch.timeout_secs);
    cfg.fetch.politeness_delay_secs = env_or_u64(
        "HARVEST_POLITENESS_DELAY_SECS",
        cfg.fetch.politeness_delay_secs,
    );
    cfg.fetch.user_agent = env_or_string("HARVEST_USER_AGENT", &cfg.fetch.user_agent);
    cfg.conversion.converter_bin =
        env_or_string("HARVEST_CONVERTER_BIN", &cfg.conversion.converter_bin);
    cfg.conversion.timeout_secs = env_or_u64(
        "HARVEST_CONVERSION_TIMEOUT_SECS",
        cfg.conversion.timeout_secs,
    );
    cfg.conversion.output_format_flag = env_or_string(
        "HARVEST_CONVERTER_FORMAT_FLAG",
        &cfg.conversion.output_format_flag,
    );
    cfg.conversion.time_zone =
        env_optional_string("HARVEST_TIME_ZONE", cfg.conversion.time_zone.take());
    cfg.extract.recognized_types =
        env_or_types("HARVEST_RECOGNIZED_TYPES", &cfg.extract.recognized_types)?;
    cfg.extract.media_type = env_or_string("HARVEST_MEDIA_TYPE", &cfg.extract.media_type);
    cfg.extract.href_suffix = env_or_string("HARVEST_HREF_SUFFIX", &cfg.extract.href_suffix);
    cfg.bundle.prefix = env_or_string("HARVEST_BUNDLE_PREFIX", &cfg.bundle.prefix);
    cfg.bundle.extension = env_or_string("HARVEST_BUNDLE_EXTENSION", &cfg.bundle.extension);
    cfg.bundle.min_first_bundle_files = env_or_u64(
        "HARVEST_MIN_FIRST_BUNDLE_FILES",
        cfg.bundle.min_first_bundle_files as u64,
    ) as usize;

    validate(&cfg)?;
    Ok(LoadedConfig {
        config: cfg,
        source_file,
    })
}

#[cfg(test)]
mod tests {
    use super::{HarvestConfig, merge_toml, validate};
    use crate::harvest::extract::ActivityType;
    use std::path::{Path, PathBuf};

    #[test]
    fn defaults_are_valid() {
        validate(&HarvestConfig::default()).expect("defaults validate");
    }

    #[test]
    fn partial_sections_keep_unlisted_defaults() {
        let mut cfg = HarvestConfig::default();
        let raw = r#"
[paths]
output_root = "/data/lc"

[conversion]
timeout_secs = 15

[extract]
recognized_types = ["Create", "Remove"]
"#;
        merge_toml(&mut cfg, raw, Path::new("harvest.toml")).expect("merge");

        assert_eq!(cfg.paths.output_root, PathBuf::from("/data/lc"));
        assert_eq!(cfg.conversion.timeout_secs, 15);
        assert_eq!(cfg.conversion.output_format_flag, "-xmlmarc");
        assert_eq!(
            cfg.extract.recognized_types,
            vec![ActivityType::Create, ActivityType::Remove]
        );
        assert_eq!(cfg.extract.media_type, "application/marc+xml");
        assert_eq!(cfg.fetch.politeness_delay_secs, 5);
    }

    #[test]
    fn unknown_activity_type_in_file_is_rejected() {
        let mut cfg = HarvestConfig::default();
        let raw = "[extract]\nrecognized_types = [\"Delete\"]\n";
        let err = merge_toml(&mut cfg, raw, Path::new("harvest.toml")).unwrap_err();
        assert!(format!("{err:#}").contains("E005_CONFIG_INVALID"));
    }

    #[test]
    fn zero_timeouts_are_rejected() {
        let mut cfg = HarvestConfig::default();
        cfg.conversion.timeout_secs = 0;
        assert!(validate(&cfg).is_err());

        let mut cfg = HarvestConfig::default();
        cfg.fetch.timeout_secs = 0;
        assert!(validate(&cfg).is_err());
    }

    #[test]
    fn empty_recognized_types_are_rejected() {
        let mut cfg = HarvestConfig::default();
        cfg.extract.recognized_types.clear();
        let err = validate(&cfg).unwrap_err();
        assert!(err.to_string().contains("recognized activity types"));
    }

    #[test]
    fn bad_time_zone_is_rejected() {
        let mut cfg = HarvestConfig::default();
        cfg.conversion.time_zone = Some("Mars/Olympus_Mons".to_string());
        assert!(validate(&cfg).is_err());

        cfg.conversion.time_zone = Some("America/New_York".to_string());
        validate(&cfg).expect("known zone");
    }
}
