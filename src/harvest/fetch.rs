use crate::harvest::extract::canonical_url;
use crate::harvest::util::staging_file;
use crate::logging::RunLog;
use anyhow::{Context, Result};
use reqwest::blocking::Client;
use serde::Serialize;
use std::fs;
use std::io::Write;
use std::path::Path;
use std::thread;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected status {0}")]
    Status(u16),
    #[error("url has no file name: {0}")]
    NoFileName(String),
    #[error("write failed: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchStatus {
    Success,
    Skipped,
    Failed,
}

impl FetchStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Skipped => "skipped",
            Self::Failed => "failed",
        }
    }
}

/// Anything that can hand back the bytes behind a URL.
pub trait ResourceSource {
    fn get(&self, url: &str) -> Result<Vec<u8>, FetchError>;
}

pub struct HttpSource {
    client: Client,
}

impl HttpSource {
    pub fn new(user_agent: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self { client })
    }
}

impl ResourceSource for HttpSource {
    fn get(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let response = self.client.get(url).send()?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }
        Ok(response.bytes()?.to_vec())
    }
}

/// Destination file name for a resource: the basename of its canonical URL.
pub fn file_name_for_url(url: &str) -> Option<&str> {
    canonical_url(url)
        .rsplit('/')
        .next()
        .filter(|name| !name.is_empty())
}

pub struct ResourceFetcher<S> {
    source: S,
    politeness_delay: Duration,
}

impl<S: ResourceSource> ResourceFetcher<S> {
    pub fn new(source: S, politeness_delay: Duration) -> Self {
        Self {
            source,
            politeness_delay,
        }
    }

    /// Materialize `url` under `dest_dir`. An existing file of the same name
    /// counts as already fetched and no request is made.
    pub fn fetch(&self, url: &str, dest_dir: &Path, log: &RunLog) -> FetchStatus {
        let name = file_name_for_url(url).unwrap_or(url);
        match self.try_fetch(url, dest_dir) {
            Ok(FetchStatus::Skipped) => {
                log.info(format!("[SKIP] Already downloaded: {name}"));
                FetchStatus::Skipped
            }
            Ok(status) => {
                log.info(format!("[OK] Downloaded: {name} -> {}", dest_dir.display()));
                if !self.politeness_delay.is_zero() {
                    thread::sleep(self.politeness_delay);
                }
                status
            }
            Err(err) => {
                log.error(format!("[FAIL] {name}: {err}"));
                FetchStatus::Failed
            }
        }
    }

    fn try_fetch(&self, url: &str, dest_dir: &Path) -> Result<FetchStatus, FetchError> {
        let name = file_name_for_url(url).ok_or_else(|| FetchError::NoFileName(url.to_string()))?;
        fs::create_dir_all(dest_dir)?;
        let dest = dest_dir.join(name);
        if dest.exists() {
            return Ok(FetchStatus::Skipped);
        }

        let body = self.source.get(url)?;
        let mut staged = staging_file(dest_dir)?;
        staged.write_all(&body)?;
        staged.persist(&dest).map_err(|err| err.error)?;
        Ok(FetchStatus::Success)
    }
}

#[cfg(test)]
mod tests {
    use super::{FetchError, FetchStatus, ResourceFetcher, ResourceSource, file_name_for_url};
    use crate::logging::RunLog;
    use std::cell::RefCell;
    use std::fs;
    use std::time::{Duration, Instant};
    use tempfile::tempdir;

    #[derive(Default)]
    struct FakeSource {
        requested: RefCell<Vec<String>>,
        fail_with: Option<u16>,
    }

    impl ResourceSource for FakeSource {
        fn get(&self, url: &str) -> Result<Vec<u8>, FetchError> {
            self.requested.borrow_mut().push(url.to_string());
            match self.fail_with {
                Some(code) => Err(FetchError::Status(code)),
                None => Ok(format!("<record>{url}</record>").into_bytes()),
            }
        }
    }

    #[test]
    fn file_name_comes_from_canonical_url() {
        assert_eq!(
            file_name_for_url("https://id.loc.gov/authorities/names/n1.marcxml.xml?x=1"),
            Some("n1.marcxml.xml")
        );
        assert_eq!(file_name_for_url("https://id.loc.gov/authorities/"), None);
    }

    #[test]
    fn new_resource_is_written() {
        let tmp = tempdir().expect("tempdir");
        let dest = tmp.path().join("Create");
        let fetcher = ResourceFetcher::new(FakeSource::default(), Duration::ZERO);
        let log = RunLog::capture();

        let url = "https://id.loc.gov/a/n1.marcxml.xml";
        assert_eq!(fetcher.fetch(url, &dest, &log), FetchStatus::Success);

        let body = fs::read_to_string(dest.join("n1.marcxml.xml")).expect("read");
        assert_eq!(body, format!("<record>{url}</record>"));
        let names = fs::read_dir(&dest).expect("read dir").count();
        assert_eq!(names, 1, "no staging leftovers");
    }

    #[test]
    fn existing_destination_skips_without_request() {
        let tmp = tempdir().expect("tempdir");
        fs::write(tmp.path().join("n1.marcxml.xml"), "cached").expect("write");
        let fetcher = ResourceFetcher::new(FakeSource::default(), Duration::ZERO);
        let log = RunLog::capture();

        let status = fetcher.fetch("https://id.loc.gov/a/n1.marcxml.xml", tmp.path(), &log);

        assert_eq!(status, FetchStatus::Skipped);
        assert!(fetcher.source.requested.borrow().is_empty());
        assert_eq!(
            fs::read_to_string(tmp.path().join("n1.marcxml.xml")).expect("read"),
            "cached"
        );
        assert!(log.lines()[0].contains("[SKIP] Already downloaded: n1.marcxml.xml"));
    }

    #[test]
    fn failure_leaves_no_file_behind() {
        let tmp = tempdir().expect("tempdir");
        let source = FakeSource {
            fail_with: Some(503),
            ..FakeSource::default()
        };
        let fetcher = ResourceFetcher::new(source, Duration::ZERO);
        let log = RunLog::capture();

        let status = fetcher.fetch("https://id.loc.gov/a/n1.marcxml.xml", tmp.path(), &log);

        assert_eq!(status, FetchStatus::Failed);
        assert!(!tmp.path().join("n1.marcxml.xml").exists());
        assert_eq!(fs::read_dir(tmp.path()).expect("read dir").count(), 0);
        assert!(log.lines()[0].contains("unexpected status 503"));
    }

    #[test]
    fn politeness_delay_follows_only_successful_downloads() {
        let delay = Duration::from_millis(500);
        let tmp = tempdir().expect("tempdir");
        let log = RunLog::capture();
        let fetcher = ResourceFetcher::new(FakeSource::default(), delay);

        let started = Instant::now();
        let status = fetcher.fetch("https://id.loc.gov/a/n1.marcxml.xml", tmp.path(), &log);
        assert_eq!(status, FetchStatus::Success);
        assert!(started.elapsed() >= delay);

        let started = Instant::now();
        let status = fetcher.fetch("https://id.loc.gov/a/n1.marcxml.xml", tmp.path(), &log);
        assert_eq!(status, FetchStatus::Skipped);
        assert!(started.elapsed() < delay);

        let failing = ResourceFetcher::new(
            FakeSource {
                fail_with: Some(503),
                ..FakeSource::default()
            },
            delay,
        );
        let started = Instant::now();
        let status = failing.fetch("https://id.loc.gov/a/n2.marcxml.xml", tmp.path(), &log);
        assert_eq!(status, FetchStatus::Failed);
        assert!(started.elapsed() < delay);
    }
}
