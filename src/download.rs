//! Checkpoint downloads with bounded retries

use crate::config::{AssetSource, DownloadConfig};
use crate::error::{Error, Result};
use crate::hf::fetch_hub_file;
use log::{info, warn};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Transfers one asset into `dest`. Implementations may leave a partial file
/// behind on error; [`download_with_retry`] cleans it up.
pub trait AssetFetcher: Send + Sync {
    fn fetch(&self, source: &AssetSource, dest: &Path) -> Result<()>;
}

pub struct HttpFetcher {
    client: reqwest::blocking::Client,
    hub_cache_dir: Option<PathBuf>,
}

impl HttpFetcher {
    pub fn new(config: &DownloadConfig) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            hub_cache_dir: config.hub_cache_dir.clone(),
        })
    }

    fn fetch_url(&self, url: &str, dest: &Path) -> Result<()> {
        if !url.starts_with("https://") {
            return Err(Error::Download {
                url: url.to_string(),
                reason: "only https URLs are allowed".into(),
            });
        }
        let mut response = self.client.get(url).send()?;
        if !response.status().is_success() {
            return Err(Error::Download {
                url: url.to_string(),
                reason: format!("HTTP {}", response.status()),
            });
        }
        let mut writer = BufWriter::new(File::create(dest)?);
        let written = response.copy_to(&mut writer)?;
        writer.flush()?;
        if written == 0 {
            return Err(Error::Download {
                url: url.to_string(),
                reason: "empty response body".into(),
            });
        }
        info!("downloaded {} bytes from {}", written, url);
        Ok(())
    }
}

impl AssetFetcher for HttpFetcher {
    fn fetch(&self, source: &AssetSource, dest: &Path) -> Result<()> {
        match source {
            AssetSource::Url { url } => self.fetch_url(url, dest),
            AssetSource::Hub { repo, file } => {
                let cached = fetch_hub_file(repo, file, self.hub_cache_dir.as_deref())?;
                fs::copy(cached, dest)?;
                Ok(())
            }
        }
    }
}

fn partial_path(dest: &Path) -> PathBuf {
    let mut name = dest
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".part");
    dest.with_file_name(name)
}

/// Downloads `source` to `dest`, making at most `retries` attempts (at least
/// one). Each attempt writes to a `.part` file that is removed on failure and
/// renamed into place on success.
pub fn download_with_retry(
    fetcher: &dyn AssetFetcher,
    source: &AssetSource,
    dest: &Path,
    retries: u32,
    retry_delay: Duration,
) -> Result<PathBuf> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }
    let part = partial_path(dest);
    let attempts = retries.max(1);
    let mut last_error = String::new();
    for attempt in 1..=attempts {
        info!(
            "downloading {} to {:?} (attempt {}/{})",
            source, dest, attempt, attempts
        );
        let _ = fs::remove_file(&part);
        match fetcher.fetch(source, &part) {
            Ok(()) => {
                fs::rename(&part, dest).inspect_err(|_| {
                    let _ = fs::remove_file(&part);
                })?;
                return Ok(dest.to_path_buf());
            }
            Err(e) => {
                warn!("attempt {}/{} for {} failed: {}", attempt, attempts, source, e);
                let _ = fs::remove_file(&part);
                last_error = e.to_string();
                if attempt < attempts && !retry_delay.is_zero() {
                    std::thread::sleep(retry_delay * attempt);
                }
            }
        }
    }
    Err(Error::Download {
        url: source.to_string(),
        reason: format!("gave up after {attempts} attempts: {last_error}"),
    })
}
