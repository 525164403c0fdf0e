//! Fetching remote files
//!
//! The cache only needs "put the bytes at this URL into that file". That is
//! the [`Fetcher`] trait; [`HttpFetcher`] implements it on top of a blocking
//! `ureq` agent with timeouts, bounded retries and cooperative cancellation.

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, info, warn};
use url::Url;

use super::retry::RetryPolicy;
use crate::config::ConfigStore;
use crate::utils::FetchError;

/// Connect timeout, independent of the per-transfer timeout
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Read buffer size for streaming downloads
const CHUNK_SIZE: usize = 64 * 1024;

/// Granularity of cancellation checks while backing off
const SLEEP_SLICE: Duration = Duration::from_millis(50);

/// Something that can copy a URL into a local file
pub trait Fetcher: Send + Sync {
    /// Download `url` into `destination`, returning the number of bytes written
    ///
    /// Implementations apply their own retry policy and only return an
    /// error once it is exhausted.
    fn fetch(&self, url: &str, destination: &Path) -> Result<u64, FetchError>;
}

impl<F: Fetcher + ?Sized> Fetcher for Arc<F> {
    fn fetch(&self, url: &str, destination: &Path) -> Result<u64, FetchError> {
        (**self).fetch(url, destination)
    }
}

/// Shared flag used to abort a running fetch
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// HTTP(S) fetcher backed by `ureq`
///
/// `file://` URLs are copied from the local filesystem, which makes offline
/// mirrors work through the same code path.
pub struct HttpFetcher {
    agent: ureq::Agent,
    policy: RetryPolicy,
    cancel: CancelToken,
    show_progress: bool,
}

impl HttpFetcher {
    /// Create a fetcher with a per-transfer timeout and retry policy
    pub fn new(timeout: Duration, policy: RetryPolicy) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(CONNECT_TIMEOUT.min(timeout))
            .timeout(timeout)
            .build();

        Self {
            agent,
            policy,
            cancel: CancelToken::new(),
            show_progress: false,
        }
    }

    /// Create a fetcher from the `fetch_*` settings
    pub fn from_config(config: &ConfigStore) -> Self {
        Self::new(config.fetch_timeout(), RetryPolicy::from_config(config))
    }

    /// Draw a progress bar on stderr while downloading
    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    /// Handle that aborts downloads made by this fetcher
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Sleep for `delay`, waking early if cancelled
    fn backoff(&self, delay: Duration, url: &str) -> Result<(), FetchError> {
        let deadline = Instant::now() + delay;
        loop {
            if self.cancel.is_cancelled() {
                return Err(FetchError::Cancelled(url.to_string()));
            }
            if Instant::now() >= deadline {
                return Ok(());
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            std::thread::sleep(remaining.min(SLEEP_SLICE));
        }
    }

    /// Attempt a single download
    fn try_fetch(&self, url: &Url, destination: &Path) -> Result<u64, FetchError> {
        if url.scheme() == "file" {
            let source = url.to_file_path().map_err(|_| FetchError::InvalidUrl {
                url: url.to_string(),
                reason: "not a local path".to_string(),
            })?;
            return Ok(fs::copy(&source, destination)?);
        }

        let response = match self.agent.get(url.as_str()).call() {
            Ok(response) => response,
            Err(ureq::Error::Status(status, _)) => {
                return Err(FetchError::Status {
                    url: url.to_string(),
                    status,
                })
            }
            Err(ureq::Error::Transport(transport)) => {
                return Err(FetchError::Transport {
                    url: url.to_string(),
                    message: transport.to_string(),
                })
            }
        };

        let total: Option<u64> = response
            .header("Content-Length")
            .and_then(|v| v.parse().ok());
        let progress = self.progress_bar(total, url);

        let mut file = File::create(destination)?;
        let mut reader = response.into_reader();
        let mut buffer = vec![0u8; CHUNK_SIZE];
        let mut downloaded: u64 = 0;

        loop {
            if self.cancel.is_cancelled() {
                progress.abandon_with_message("cancelled");
                return Err(FetchError::Cancelled(url.to_string()));
            }

            let n = reader.read(&mut buffer).map_err(|e| FetchError::Transport {
                url: url.to_string(),
                message: format!("read error: {}", e),
            })?;
            if n == 0 {
                break;
            }

            file.write_all(&buffer[..n])?;
            downloaded += n as u64;
            progress.set_position(downloaded);
        }

        file.sync_all()?;
        progress.finish_and_clear();

        if let Some(expected) = total {
            if downloaded != expected {
                return Err(FetchError::Transport {
                    url: url.to_string(),
                    message: format!("incomplete body: {} of {} bytes", downloaded, expected),
                });
            }
        }

        Ok(downloaded)
    }

    fn progress_bar(&self, total: Option<u64>, url: &Url) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }

        let name = url
            .path_segments()
            .and_then(|mut s| s.next_back())
            .unwrap_or("download")
            .to_string();

        match total {
            Some(len) => {
                let pb = ProgressBar::new(len);
                pb.set_style(
                    ProgressStyle::default_bar()
                        .template(
                            "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({msg})",
                        )
                        .unwrap_or_else(|_| ProgressStyle::default_bar())
                        .progress_chars("#>-"),
                );
                pb.set_message(name);
                pb
            }
            None => {
                let pb = ProgressBar::new_spinner();
                pb.set_message(name);
                pb
            }
        }
    }
}

impl Fetcher for HttpFetcher {
    fn fetch(&self, url: &str, destination: &Path) -> Result<u64, FetchError> {
        let parsed = Url::parse(url).map_err(|e| FetchError::InvalidUrl {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

        let max_attempts = self.policy.max_attempts.max(1);
        let mut last_error: Option<FetchError> = None;

        for attempt in 0..max_attempts {
            self.backoff(self.policy.delay_for_attempt(attempt), url)?;

            debug!("Fetching {} (attempt {}/{})", url, attempt + 1, max_attempts);
            match self.try_fetch(&parsed, destination) {
                Ok(bytes) => {
                    info!("Fetched {} ({} bytes)", url, bytes);
                    return Ok(bytes);
                }
                Err(err) if err.is_retryable() => {
                    warn!("Attempt {} for {} failed: {}", attempt + 1, url, err);
                    last_error = Some(err);
                }
                Err(err) => return Err(err),
            }
        }

        Err(FetchError::Exhausted {
            url: url.to_string(),
            attempts: max_attempts,
            last_error: last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "unknown error".to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_policy(attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts: attempts,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            jitter_factor: 0.0,
        }
    }

    #[test]
    fn test_invalid_url() {
        let fetcher = HttpFetcher::new(Duration::from_secs(1), fast_policy(1));
        let dir = tempfile::TempDir::new().unwrap();
        let err = fetcher.fetch("::nope::", &dir.path().join("out")).unwrap_err();
        assert!(matches!(err, FetchError::InvalidUrl { .. }));
    }

    #[test]
    fn test_file_url_is_copied() {
        let dir = tempfile::TempDir::new().unwrap();
        let source = dir.path().join("source.bin");
        fs::write(&source, b"hello idx").unwrap();
        let url = Url::from_file_path(&source).unwrap();

        let fetcher = HttpFetcher::new(Duration::from_secs(1), fast_policy(1));
        let dest = dir.path().join("dest.bin");
        let n = fetcher.fetch(url.as_str(), &dest).unwrap();
        assert_eq!(n, 9);
        assert_eq!(fs::read(&dest).unwrap(), b"hello idx");
    }

    #[test]
    fn test_missing_file_exhausts_retries() {
        let dir = tempfile::TempDir::new().unwrap();
        let url = Url::from_file_path(dir.path().join("missing.gz")).unwrap();

        let fetcher = HttpFetcher::new(Duration::from_secs(1), fast_policy(3));
        let err = fetcher
            .fetch(url.as_str(), &dir.path().join("out"))
            .unwrap_err();
        assert!(matches!(err, FetchError::Exhausted { attempts: 3, .. }));
    }

    #[test]
    fn test_cancelled_fetch() {
        let dir = tempfile::TempDir::new().unwrap();
        let url = Url::from_file_path(dir.path().join("missing.gz")).unwrap();

        let policy = RetryPolicy {
            initial_delay: Duration::from_secs(5),
            ..fast_policy(3)
        };
        let fetcher = HttpFetcher::new(Duration::from_secs(1), policy);
        fetcher.cancel_token().cancel();

        let err = fetcher
            .fetch(url.as_str(), &dir.path().join("out"))
            .unwrap_err();
        assert!(matches!(err, FetchError::Cancelled(_)));
    }
}
