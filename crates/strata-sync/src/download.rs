//! Mirror probing and verified artifact download.
//!
//! A downloader serves one basename (e.g. `fast_cache.cache`) from a list
//! of mirror base URLs. Each run probes every mirror's `<basename>.timestamp`,
//! picks the numerically largest, decides whether a fetch is needed (the
//! decision reasons are part of the observable contract), and then fetches
//! settings, size, checksum, and the compressed body. Publication order on
//! disk is: data file rename, sidecars, timestamp files, with
//! `timestamp.latest` strictly last.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::Rng;
use tracing::{debug, info, warn};

use strata_types::properties::{self, Properties};
use strata_types::{CacheError, Result};

use crate::cleanup;
use crate::fetch::{build_base_urls, make_fetcher, Fetcher};
use crate::storage::{LocalStorage, Storage};
use crate::verify::{write_decompressed, ChecksumKind};

/// Why a run decided to fetch (or not). Logged on every decision and
/// asserted by tests.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DownloadReason {
    UpToDate,
    NoTimestamp,
    MissingLatestTimestamp,
    MissingRemoteInputs,
    MissingLocalInputs,
    EmptyRemoteInputs,
    EmptyLocalInputs,
    SimilarRemoteAndLocalInputs,
    DifferentRemoteAndLocalInputs,
    NotEnoughFiles,
}

impl std::fmt::Display for DownloadReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            DownloadReason::UpToDate => "UpToDate",
            DownloadReason::NoTimestamp => "NoTimestamp",
            DownloadReason::MissingLatestTimestamp => "MissingLatestTimestamp",
            DownloadReason::MissingRemoteInputs => "MissingRemoteInputs",
            DownloadReason::MissingLocalInputs => "MissingLocalInputs",
            DownloadReason::EmptyRemoteInputs => "EmptyRemoteInputs",
            DownloadReason::EmptyLocalInputs => "EmptyLocalInputs",
            DownloadReason::SimilarRemoteAndLocalInputs => "SimilarRemoteAndLocalInputs",
            DownloadReason::DifferentRemoteAndLocalInputs => "DifferentRemoteAndLocalInputs",
            DownloadReason::NotEnoughFiles => "NotEnoughFiles",
        })
    }
}

/// Outcome of one successful download.
#[derive(Debug)]
pub struct DownloadStats {
    pub timestamp: u64,
    pub base_url: String,
    pub decompressed_path: PathBuf,
    pub decompressed_size: u64,
    pub saved_files: Vec<PathBuf>,
    pub elapsed: Duration,
}

/// Configuration for [`Downloader::new`].
#[derive(Clone, Debug)]
pub struct DownloaderOptions {
    /// Artifact basename including its extension, e.g. `fast_cache.cache`.
    pub basename: String,
    pub destination: PathBuf,
    /// Comma-separated mirror base URLs.
    pub base_urls: String,
    /// Per-request deadline for metadata fetches.
    pub metadata_timeout: Duration,
    /// No-progress deadline for the body stream.
    pub body_no_progress_timeout: Duration,
    /// Timestamp groups kept on disk after a successful run.
    pub retain_downloads: usize,
}

impl DownloaderOptions {
    pub fn new(
        basename: impl Into<String>,
        destination: impl Into<PathBuf>,
        base_urls: impl Into<String>,
    ) -> Self {
        DownloaderOptions {
            basename: basename.into(),
            destination: destination.into(),
            base_urls: base_urls.into(),
            metadata_timeout: Duration::from_secs(1),
            body_no_progress_timeout: Duration::from_secs(300),
            retain_downloads: 1,
        }
    }
}

pub struct Downloader {
    basename: String,
    basename_no_ext: String,
    destination: PathBuf,
    base_urls: Vec<String>,
    /// Short-deadline transport for timestamps, settings, checksums.
    meta_fetcher: Arc<dyn Fetcher>,
    /// Unbounded transport for body streams.
    body_fetcher: Arc<dyn Fetcher>,
    storage: Arc<dyn Storage>,
    retain_downloads: usize,
    default_compression: &'static str,
    default_checksum: &'static str,
}

impl Downloader {
    pub fn new(options: &DownloaderOptions) -> Result<Downloader> {
        let base_urls = build_base_urls(&options.base_urls);
        let meta_fetcher = make_fetcher(&base_urls, Some(options.metadata_timeout), None)?;
        // The body stream has no overall deadline, only a no-progress
        // watchdog: large artifacts may take arbitrarily long.
        let body_fetcher = make_fetcher(&base_urls, None, Some(options.body_no_progress_timeout))?;
        Ok(Self::with_fetchers(
            options,
            meta_fetcher,
            body_fetcher,
            Arc::new(LocalStorage),
        ))
    }

    /// Construct with injected transports: object-store mirrors and tests.
    pub fn with_fetchers(
        options: &DownloaderOptions,
        meta_fetcher: Arc<dyn Fetcher>,
        body_fetcher: Arc<dyn Fetcher>,
        storage: Arc<dyn Storage>,
    ) -> Downloader {
        Downloader {
            basename: options.basename.clone(),
            basename_no_ext: options
                .basename
                .split('.')
                .next()
                .unwrap_or(&options.basename)
                .to_string(),
            destination: options.destination.clone(),
            base_urls: build_base_urls(&options.base_urls),
            meta_fetcher,
            body_fetcher,
            storage,
            retain_downloads: options.retain_downloads,
            default_compression: "zst",
            default_checksum: "xxh3",
        }
    }

    pub fn basename(&self) -> &str {
        &self.basename
    }

    /// Probe every mirror's `<basename>.timestamp` and pick the one with
    /// the numerically largest timestamp.
    pub fn probe(&self) -> Result<(String, u64)> {
        let mut best: Option<(String, u64)> = None;
        for (index, base_url) in self.base_urls.iter().enumerate() {
            let url = format!("{base_url}/{}.timestamp", self.basename);
            debug!(index, %url, "checking base url");
            let timestamp = match self
                .meta_fetcher
                .get(&url)
                .and_then(|response| response.into_string(&url))
            {
                Ok(body) => match body.trim().parse::<u64>() {
                    Ok(ts) => ts,
                    Err(err) => {
                        warn!(%url, %err, "cannot parse remote timestamp");
                        continue;
                    }
                },
                Err(err) => {
                    warn!(%url, %err, "cannot fetch timestamp");
                    continue;
                }
            };
            if best.as_ref().map_or(true, |(_, ts)| timestamp > *ts) {
                best = Some((base_url.clone(), timestamp));
            }
        }
        best.ok_or_else(|| {
            CacheError::transport(
                self.base_urls.join(","),
                format!("cannot retrieve any timestamp, tried {} base urls", self.base_urls.len()),
            )
        })
    }

    fn fetch_small(&self, url: &str) -> Result<String> {
        self.meta_fetcher.get(url)?.into_string(url)
    }

    /// Fetch `<basename>.<ts>.settings`, or the un-timestamped fallback
    /// when `timestamp` is `None`.
    fn fetch_remote_settings(&self, base_url: &str, timestamp: Option<u64>) -> Result<Properties> {
        let url = match timestamp {
            Some(ts) => format!("{base_url}/{}.{ts}.settings", self.basename),
            None => format!("{base_url}/{}.settings", self.basename),
        };
        debug!(%url, "fetching remote settings");
        let body = self.fetch_small(&url)?;
        properties::parse_properties(body.as_bytes())
    }

    fn fetch_checksum(&self, base_url: &str, timestamp: u64, extension: &str) -> Result<String> {
        let url = format!("{base_url}/{}.{timestamp}.{extension}", self.basename);
        Ok(self.fetch_small(&url)?.trim().to_string())
    }

    fn fetch_uncompressed_size(&self, base_url: &str, timestamp: u64) -> Option<u64> {
        let url = format!("{base_url}/{}.{timestamp}.size", self.basename);
        match self.fetch_small(&url) {
            Ok(body) => body.trim().parse().ok(),
            Err(err) => {
                warn!(%url, %err, "cannot fetch size file");
                None
            }
        }
    }

    fn fetch_remote_inputs(&self, base_url: &str) -> Result<Vec<u8>> {
        let url = format!("{base_url}/{}.inputs", self.basename);
        self.meta_fetcher.get(&url)?.into_bytes(&url)
    }

    /// A `timestamp.latest` marker alone does not prove the data arrived;
    /// require the timestamp group to actually exist on disk.
    fn has_enough_local_files(&self, timestamp: u64) -> bool {
        let needle = timestamp.to_string();
        let prefix = format!("{}.", self.basename_no_ext);
        match self.storage.list(&self.destination, &|name| {
            name.starts_with(&prefix) && name.contains(&needle)
        }) {
            Ok(paths) => paths.len() > 2,
            Err(_) => false,
        }
    }

    /// Decide whether a fetch is needed, without side effects.
    pub fn should_download(&self) -> (bool, DownloadReason) {
        let Ok((base_url, timestamp)) = self.probe() else {
            return (true, DownloadReason::NoTimestamp);
        };

        let latest_path = self
            .destination
            .join(format!("{}.timestamp.latest", self.basename));
        let local = match std::fs::read_to_string(&latest_path) {
            Ok(content) => content.trim().to_string(),
            Err(err) => {
                debug!(path = %latest_path.display(), %err, "cannot read local timestamp");
                return (true, DownloadReason::MissingLatestTimestamp);
            }
        };

        if local != timestamp.to_string() {
            let remote_inputs = match self.fetch_remote_inputs(&base_url) {
                Ok(inputs) => inputs,
                Err(err) => {
                    debug!(%err, "cannot fetch remote inputs file");
                    return (true, DownloadReason::MissingRemoteInputs);
                }
            };
            if remote_inputs.is_empty() {
                return (true, DownloadReason::EmptyRemoteInputs);
            }

            let inputs_path = self.destination.join(format!("{}.inputs", self.basename));
            let local_inputs = match std::fs::read(&inputs_path) {
                Ok(inputs) => inputs,
                Err(err) => {
                    debug!(path = %inputs_path.display(), %err, "cannot read local inputs");
                    return (true, DownloadReason::MissingLocalInputs);
                }
            };
            if local_inputs.is_empty() {
                return (true, DownloadReason::EmptyLocalInputs);
            }

            if local_inputs == remote_inputs {
                if !self.has_enough_local_files(timestamp) {
                    return (true, DownloadReason::NotEnoughFiles);
                }
                return (false, DownloadReason::SimilarRemoteAndLocalInputs);
            }
            return (true, DownloadReason::DifferentRemoteAndLocalInputs);
        }

        if !self.has_enough_local_files(timestamp) {
            return (true, DownloadReason::NotEnoughFiles);
        }
        (false, DownloadReason::UpToDate)
    }

    /// Final on-disk name of the decompressed artifact. `<task>.cache`
    /// basenames flip to `<task>.<ts>.cache` so the extension stays last.
    fn decompressed_path(&self, timestamp: u64) -> PathBuf {
        match self.basename.strip_suffix(".cache") {
            Some(task) => self.destination.join(format!("{task}.{timestamp}.cache")),
            None => self
                .destination
                .join(format!("{}.{timestamp}", self.basename)),
        }
    }

    /// Fetch and publish the artifact group for `timestamp` from
    /// `base_url`.
    fn download_from(&self, base_url: &str, timestamp: u64) -> Result<DownloadStats> {
        let start = Instant::now();
        let mut saved_files = Vec::new();

        let remote_properties = match self.fetch_remote_settings(base_url, Some(timestamp)) {
            Ok(props) => props,
            Err(_) => {
                info!("no per-timestamp settings available, using fallback");
                self.fetch_remote_settings(base_url, None)?
            }
        };

        // Persist settings before the body so parallel consumers and later
        // builds can read them.
        let settings_path = self
            .destination
            .join(format!("{}.{timestamp}.settings", self.basename));
        properties::write_properties_file(&remote_properties, &settings_path)?;
        saved_files.push(settings_path);

        let compression = properties::get_string(
            &remote_properties,
            strata_types::constants::settings_key::COMPRESSION_METHOD,
            self.default_compression,
        )
        .to_string();
        let checksum_extension = properties::get_string(
            &remote_properties,
            strata_types::constants::settings_key::CHECKSUM_EXTENSION,
            self.default_checksum,
        )
        .to_string();
        let checksum_kind = ChecksumKind::from_extension(&checksum_extension)?;

        let uncompressed_size = self.fetch_uncompressed_size(base_url, timestamp);

        // Fetch the published digest before the long body stream; the
        // sidecar could rotate away while we download.
        let published_cksum = self.fetch_checksum(base_url, timestamp, &checksum_extension)?;
        debug!(%published_cksum, %checksum_extension, "fetched remote checksum");

        let body_url = format!("{base_url}/{}.{timestamp}.{compression}", self.basename);
        let response = self.body_fetcher.get(&body_url)?;
        if response.status != 200 {
            return Err(CacheError::transport(
                &body_url,
                format!("non-200 response status code {}", response.status),
            ));
        }

        let final_path = self.decompressed_path(timestamp);
        let (decompressed_path, decompressed_size) = write_decompressed(
            response.body,
            &final_path,
            &compression,
            checksum_kind,
            &published_cksum,
            uncompressed_size,
        )?;
        saved_files.push(decompressed_path.clone());

        // Sidecars after the data, readiness markers last.
        let size_path = self
            .destination
            .join(format!("{}.{timestamp}.size", self.basename));
        properties::write_string_atomic(&size_path, &decompressed_size.to_string())?;
        saved_files.push(size_path);

        let cksum_path = self
            .destination
            .join(format!("{}.{timestamp}.{checksum_extension}", self.basename));
        properties::write_string_atomic(&cksum_path, &published_cksum)?;
        saved_files.push(cksum_path);

        let timestamp_text = timestamp.to_string();
        let mut marker_paths = vec![
            self.destination.join(format!("{}.timestamp", self.basename)),
            decompressed_path.with_file_name(format!(
                "{}.timestamp",
                decompressed_path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default()
            )),
        ];
        // `timestamp.latest` is the readiness signal and must come last.
        marker_paths.push(
            self.destination
                .join(format!("{}.timestamp.latest", self.basename)),
        );
        for marker in marker_paths {
            properties::write_string_atomic(&marker, &timestamp_text)?;
            saved_files.push(marker);
        }

        info!(
            basename = %self.basename,
            timestamp,
            bytes = decompressed_size,
            elapsed = ?start.elapsed(),
            "download successful"
        );

        Ok(DownloadStats {
            timestamp,
            base_url: base_url.to_string(),
            decompressed_path,
            decompressed_size,
            saved_files,
            elapsed: start.elapsed(),
        })
    }

    /// One best-effort sync: decide, fetch if needed, garbage-collect.
    /// `Ok(None)` means the local copy was already current.
    pub fn run(&self) -> Result<Option<DownloadStats>> {
        let (needs_update, reason) = self.should_download();
        if !needs_update {
            debug!(basename = %self.basename, %reason, "already up to date");
            return Ok(None);
        }
        info!(basename = %self.basename, %reason, "file is out of date and should be synced");

        let (base_url, timestamp) = self.probe()?;
        match self.download_from(&base_url, timestamp) {
            Ok(stats) => {
                cleanup::remove_old_files(
                    self.storage.as_ref(),
                    &self.destination,
                    &self.basename,
                    self.retain_downloads,
                );
                Ok(Some(stats))
            }
            Err(err) => {
                // Never leave a half-fetched group behind.
                cleanup::remove_after_error(
                    self.storage.as_ref(),
                    &self.destination,
                    &self.basename,
                    Some(timestamp),
                );
                Err(err)
            }
        }
    }

    /// Block until a new artifact is observed remotely, with exponential
    /// backoff between probes (5s doubling to 30s, jittered).
    pub fn wait_until_new_file(&self, timeout: Option<Duration>) -> Result<()> {
        let min_backoff = Duration::from_secs(5);
        let max_backoff = Duration::from_secs(30);
        let mut backoff = min_backoff;
        let start = Instant::now();

        loop {
            if let Some(limit) = timeout {
                if start.elapsed() > limit {
                    return Err(CacheError::transport(
                        self.base_urls.join(","),
                        format!(
                            "reached timeout {limit:?} waiting for a new file for {}",
                            self.basename
                        ),
                    ));
                }
            }

            let (needs_update, reason) = self.should_download();
            if needs_update {
                debug!(basename = %self.basename, %reason, "new file available");
                return Ok(());
            }

            let jittered = rand::thread_rng().gen_range(min_backoff..=backoff);
            debug!(basename = %self.basename, %reason, ?jittered, "up to date, will retry");
            std::thread::sleep(jittered);
            backoff = (backoff * 2).min(max_backoff);
        }
    }
}
