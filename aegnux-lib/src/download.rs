//! Streaming downloads with throttled progress and checksum verification

use crate::cancel::CancelFlag;
use crate::error::{AegnuxError, Result};
use crate::events::{Progress, Reporter};
use reqwest::Client;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio::time::Instant;
use tracing::{debug, info};

/// Optional knobs for a single download
#[derive(Debug, Clone, Default)]
pub struct FetchOptions {
    /// Size to report against when the server sends no Content-Length
    pub expected_size: Option<u64>,

    /// Expected SHA-256 (lowercase hex) of the complete file
    pub sha256: Option<String>,
}

/// Outcome of a completed download
#[derive(Debug, Clone)]
pub struct DownloadSummary {
    pub path: PathBuf,
    pub bytes: u64,
}

/// HTTP(S) downloader
#[derive(Debug, Clone)]
pub struct Downloader {
    client: Client,
    progress_interval: Duration,
    poll_interval: Duration,
}

impl Downloader {
    /// Create a new downloader
    pub fn new(progress_interval: Duration, poll_interval: Duration) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("Aegnux/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            progress_interval,
            poll_interval,
        })
    }

    /// Download `url` to `dest`
    ///
    /// Data is streamed into a sibling `.part` file that is renamed into place
    /// once complete. On cancellation or any error the partial file is removed,
    /// so `dest` only ever holds a complete download.
    pub async fn fetch(
        &self,
        url: &str,
        dest: &Path,
        options: &FetchOptions,
        cancel: &CancelFlag,
        reporter: &dyn Reporter,
    ) -> Result<DownloadSummary> {
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let part = partial_path(dest);

        let result = self
            .stream_to(url, dest, &part, options, cancel, reporter)
            .await;

        match result {
            Ok(bytes) => {
                tokio::fs::rename(&part, dest).await?;
                Ok(DownloadSummary {
                    path: dest.to_path_buf(),
                    bytes,
                })
            }
            Err(e) => {
                if e.is_cancelled() {
                    reporter.log(format!(
                        "[DOWNLOAD] Cancelled by user. Deleting partial file: {}",
                        dest.display()
                    ));
                }
                remove_if_exists(&part).await;
                Err(e)
            }
        }
    }

    async fn stream_to(
        &self,
        url: &str,
        dest: &Path,
        part: &Path,
        options: &FetchOptions,
        cancel: &CancelFlag,
        reporter: &dyn Reporter,
    ) -> Result<u64> {
        info!("Downloading {} to {:?}", url, dest);
        cancel.check()?;

        // bounded waits so a silent server cannot delay cancellation
        let request = self.client.get(url).send();
        tokio::pin!(request);
        let response = loop {
            cancel.check()?;
            if let Ok(response) = tokio::time::timeout(self.poll_interval, &mut request).await {
                break response?;
            }
        };
        let mut response = response.error_for_status()?;

        let declared = response.content_length();
        let total = expected_total(options.expected_size, declared);
        let name = dest.display();

        let mut file = File::create(part).await?;
        let mut hasher = Sha256::new();
        let mut downloaded: u64 = 0;
        let mut since_update: u64 = 0;
        let mut last_update = Instant::now();

        loop {
            cancel.check()?;
            let chunk = match tokio::time::timeout(self.poll_interval, response.chunk()).await {
                Ok(chunk) => chunk?,
                Err(_) => continue,
            };
            let Some(chunk) = chunk else { break };

            file.write_all(&chunk).await?;
            hasher.update(&chunk);
            downloaded += chunk.len() as u64;
            since_update += chunk.len() as u64;

            let now = Instant::now();
            let elapsed = now.duration_since(last_update);
            if elapsed >= self.progress_interval {
                let speed = transfer_rate(since_update, elapsed);
                let percent = percent_of(downloaded, total);
                reporter.progress(Progress::Percent(percent));
                reporter.log(format!(
                    "[DOWNLOADING] {} ({}%/{}), {}/s",
                    name,
                    percent,
                    format_size(total),
                    format_size(speed)
                ));
                last_update = now;
                since_update = 0;
            }
        }

        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        if let Some(declared) = declared.filter(|&d| downloaded < d) {
            return Err(AegnuxError::Download(format!(
                "{} ended after {} of {} bytes",
                url, downloaded, declared
            )));
        }

        if let Some(ref expected) = options.sha256 {
            let computed = format!("{:x}", hasher.finalize());
            if !computed.eq_ignore_ascii_case(expected) {
                return Err(AegnuxError::ChecksumMismatch {
                    expected: expected.clone(),
                    got: computed,
                });
            }
            debug!("Checksum verified for {:?}", dest);
        }

        reporter.progress(Progress::Percent(100));
        reporter.log(format!("[DOWNLOADED] {} (100%/{})", name, format_size(downloaded)));
        Ok(downloaded)
    }
}

fn partial_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".part");
    dest.with_file_name(name)
}

async fn remove_if_exists(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            debug!("Failed to remove {:?}: {}", path, e);
        }
    }
}

/// Size to report progress against: the caller's hint, else the response header
fn expected_total(hint: Option<u64>, header: Option<u64>) -> u64 {
    hint.or(header).unwrap_or(0)
}

/// Bytes per second over the last progress interval
fn transfer_rate(bytes: u64, elapsed: Duration) -> u64 {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 {
        (bytes as f64 / secs) as u64
    } else {
        0
    }
}

fn percent_of(done: u64, total: u64) -> u8 {
    if total == 0 {
        0
    } else {
        (done.saturating_mul(100) / total).min(100) as u8
    }
}

/// Human readable byte count, e.g. `1.5 MB`
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 7] = ["B", "KB", "MB", "GB", "TB", "PB", "EB"];
    let mut exponent = 0;
    let mut scaled = bytes;
    while scaled >= 1024 && exponent < UNITS.len() - 1 {
        scaled /= 1024;
        exponent += 1;
    }
    if exponent == 0 {
        return format!("{} B", bytes);
    }
    let value = bytes as f64 / 1024f64.powi(exponent as i32);
    let rounded = (value * 100.0).round() / 100.0;
    format!("{} {}", rounded, UNITS[exponent])
}

/// SHA-256 of a file on disk, lowercase hex
pub fn sha256_file(path: &Path) -> Result<String> {
    let mut hasher = Sha256::new();
    let mut file = std::fs::File::open(path)?;
    std::io::copy(&mut file, &mut hasher)?;
    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::MemoryReporter;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve one response announcing `declared` bytes, send `body`, then hold the
    /// connection open for `hold`
    async fn serve_once(declared: usize, body: Vec<u8>, hold: Duration) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = [0u8; 1024];
            let _ = socket.read(&mut request).await;
            let header = format!(
                "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                declared
            );
            socket.write_all(header.as_bytes()).await.unwrap();
            socket.write_all(&body).await.unwrap();
            socket.flush().await.unwrap();
            tokio::time::sleep(hold).await;
        });
        format!("http://{}/file.bin", addr)
    }

    fn downloader() -> Downloader {
        Downloader::new(Duration::from_millis(10), Duration::from_millis(50)).unwrap()
    }

    #[tokio::test]
    async fn completed_download_lands_at_destination() {
        let body = vec![7u8; 1000];
        let url = serve_once(1000, body.clone(), Duration::ZERO).await;
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("nested").join("file.bin");

        let expected = format!("{:x}", Sha256::digest(&body));
        let options = FetchOptions {
            sha256: Some(expected.clone()),
            ..Default::default()
        };
        let summary = downloader()
            .fetch(&url, &dest, &options, &CancelFlag::new(), &MemoryReporter::new())
            .await
            .unwrap();

        assert_eq!(summary.bytes, 1000);
        assert_eq!(std::fs::read(&dest).unwrap(), body);
        assert_eq!(sha256_file(&dest).unwrap(), expected);
        assert!(!partial_path(&dest).exists());
    }

    #[tokio::test]
    async fn cancelled_download_leaves_no_file() {
        let url = serve_once(1000, vec![1u8; 400], Duration::from_secs(30)).await;
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("file.bin");

        let cancel = CancelFlag::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(400)).await;
            trigger.cancel();
        });

        let reporter = MemoryReporter::new();
        let err = downloader()
            .fetch(&url, &dest, &FetchOptions::default(), &cancel, &reporter)
            .await
            .unwrap_err();

        assert!(err.is_cancelled());
        assert!(!dest.exists());
        assert!(!partial_path(&dest).exists());
        assert!(reporter.lines().iter().any(|l| l.contains("Cancelled by user")));
    }

    #[tokio::test]
    async fn cancel_is_observed_while_waiting_for_headers() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = [0u8; 1024];
            let _ = socket.read(&mut request).await;
            tokio::time::sleep(Duration::from_secs(60)).await;
        });
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("file.bin");

        let cancel = CancelFlag::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            trigger.cancel();
        });

        let dl = downloader();
        let url = format!("http://{}/file.bin", addr);
        let options = FetchOptions::default();
        let reporter = MemoryReporter::new();
        let fetch = dl.fetch(&url, &dest, &options, &cancel, &reporter);
        let err = tokio::time::timeout(Duration::from_secs(3), fetch)
            .await
            .expect("fetch ignored cancellation")
            .unwrap_err();

        assert!(err.is_cancelled());
        assert!(!dest.exists());
        assert!(!partial_path(&dest).exists());
    }

    #[test]
    fn size_hint_wins_over_header_and_rate_is_per_interval() {
        assert_eq!(expected_total(Some(2048), Some(1000)), 2048);
        assert_eq!(expected_total(None, Some(1000)), 1000);
        assert_eq!(expected_total(None, None), 0);

        assert_eq!(transfer_rate(500, Duration::from_millis(500)), 1000);
        assert_eq!(transfer_rate(500, Duration::ZERO), 0);
    }

    #[tokio::test]
    async fn checksum_mismatch_removes_file() {
        let url = serve_once(10, vec![0u8; 10], Duration::ZERO).await;
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("file.bin");
        let options = FetchOptions {
            sha256: Some("00".repeat(32)),
            ..Default::default()
        };

        let err = downloader()
            .fetch(&url, &dest, &options, &CancelFlag::new(), &MemoryReporter::new())
            .await
            .unwrap_err();

        assert!(matches!(err, AegnuxError::ChecksumMismatch { .. }));
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn unreachable_server_is_a_failure() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let dir = tempfile::tempdir().unwrap();
        let err = downloader()
            .fetch(
                &format!("http://{}/x", addr),
                &dir.path().join("x"),
                &FetchOptions::default(),
                &CancelFlag::new(),
                &MemoryReporter::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AegnuxError::Http(_)));
    }

    #[test]
    fn sizes_are_human_readable() {
        assert_eq!(format_size(0), "0 B");
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(1536), "1.5 KB");
        assert_eq!(format_size(1024 * 1024), "1 MB");
    }
}
