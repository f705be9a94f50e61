mod command;
mod error;
mod types;

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::StreamExt;
use reqwest::header::{REFERER, USER_AGENT};
use reqwest::Client;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info, warn};
use url::Url;

use crate::browser::ManifestDescriptor;
use crate::config::FetcherSection;
use crate::subtitles::SubtitleTrack;

pub use command::{CommandExecutor, SystemCommandExecutor};
pub use error::{FetchError, FetchResult};
pub use types::{FetchedMedia, ReconnectPolicy};

const STDERR_TAIL_LINES: usize = 20;

const NO_STREAM_MARKERS: &[&str] = &[
    "does not contain any stream",
    "invalid data found when processing input",
    "no streams",
    "could not find codec parameters",
];

/// Remuxes an HLS manifest into a single MP4 with ffmpeg, replaying the browser's
/// referer, user agent and cookies.
pub struct MediaFetcher {
    ffmpeg: PathBuf,
    loglevel: String,
    io_timeout: Duration,
    reconnect: ReconnectPolicy,
    executor: Arc<dyn CommandExecutor>,
    http_client: Client,
    allow_file_urls: bool,
}

impl MediaFetcher {
    pub fn new(config: &FetcherSection) -> FetchResult<Self> {
        let reconnect = ReconnectPolicy::try_from(config.reconnect.clone())?;
        let http_client = Client::builder()
            .timeout(Duration::from_secs(config.io_timeout_seconds.max(1)))
            .build()?;
        Ok(Self {
            ffmpeg: PathBuf::from(&config.ffmpeg_binary),
            loglevel: config.loglevel.clone(),
            io_timeout: Duration::from_secs(config.io_timeout_seconds),
            reconnect,
            executor: Arc::new(SystemCommandExecutor),
            http_client,
            allow_file_urls: config.allow_file_urls,
        })
    }

    pub fn with_executor(mut self, executor: Arc<dyn CommandExecutor>) -> Self {
        self.executor = executor;
        self
    }

    pub fn ffmpeg_binary(&self) -> &Path {
        &self.ffmpeg
    }

    pub fn ffmpeg_args(&self, manifest: &ManifestDescriptor, output: &Path) -> Vec<String> {
        let mut args = vec![
            "-hide_banner".to_string(),
            "-nostdin".to_string(),
            "-loglevel".to_string(),
            self.loglevel.clone(),
            "-y".to_string(),
            "-user_agent".to_string(),
            manifest.user_agent.clone(),
            "-headers".to_string(),
            request_headers(manifest),
        ];
        args.extend(self.reconnect.ffmpeg_args());
        if !self.io_timeout.is_zero() {
            args.push("-rw_timeout".into());
            args.push(self.io_timeout.as_micros().to_string());
        }
        args.extend([
            "-i".to_string(),
            manifest.manifest_url.clone(),
            "-c".to_string(),
            "copy".to_string(),
            "-bsf:a".to_string(),
            "aac_adtstoasc".to_string(),
            "-f".to_string(),
            "mp4".to_string(),
            output.to_string_lossy().to_string(),
        ]);
        args
    }

    /// Downloads the stream behind `manifest` to `destination`.
    ///
    /// Output goes to `<destination>.part` first; `destination` only appears once ffmpeg
    /// finished and produced a non-empty file.
    pub async fn fetch(
        &self,
        manifest: ManifestDescriptor,
        destination: &Path,
    ) -> FetchResult<FetchedMedia> {
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|source| FetchError::io(parent, source))?;
        }
        let staging = staging_path(destination);
        let args = self.ffmpeg_args(&manifest, &staging);
        drop(manifest);

        info!(destination = %destination.display(), "starting ffmpeg remux");
        let mut command = Command::new(&self.ffmpeg);
        command
            .args(&args)
            .stdin(Stdio::null())
            .kill_on_drop(true);
        let output = match self.executor.run(&mut command).await {
            Ok(output) => output,
            Err(source) => {
                remove_staging(&staging).await;
                return Err(FetchError::io(&self.ffmpeg, source));
            }
        };
        let stderr = stderr_tail(&output.stderr);

        if !output.status.success() {
            remove_staging(&staging).await;
            if reports_no_stream(&stderr) {
                return Err(FetchError::NoPlayableStream(stderr));
            }
            warn!(status = ?output.status.code(), destination = %destination.display(), "ffmpeg failed");
            return Err(FetchError::ProcessFailed {
                status: output.status.code(),
                stderr,
            });
        }

        let size_bytes = match fs::metadata(&staging).await {
            Ok(metadata) => metadata.len(),
            Err(_) => 0,
        };
        if size_bytes == 0 {
            remove_staging(&staging).await;
            let reason = if stderr.is_empty() {
                "ffmpeg produced no output".to_string()
            } else {
                stderr
            };
            return Err(FetchError::NoPlayableStream(reason));
        }

        if let Err(source) = fs::rename(&staging, destination).await {
            remove_staging(&staging).await;
            return Err(FetchError::io(destination, source));
        }
        info!(destination = %destination.display(), size_bytes, "episode downloaded");
        Ok(FetchedMedia {
            path: destination.to_path_buf(),
            size_bytes,
            completed_at: Utc::now(),
        })
    }

    /// Saves a subtitle file. Errors are reported as `FetchError::Subtitle`.
    pub async fn fetch_subtitle(
        &self,
        track: &SubtitleTrack,
        destination: &Path,
        referer: &str,
        user_agent: &str,
    ) -> FetchResult<PathBuf> {
        self.download_to_file(&track.url, destination, referer, user_agent)
            .await
            .map_err(|err| FetchError::Subtitle(format!("{}: {err}", track.url)))?;
        debug!(url = %track.url, destination = %destination.display(), "subtitle saved");
        Ok(destination.to_path_buf())
    }

    /// Streams `url` into `<destination>.part` and renames it into place once the whole
    /// body arrived. Nothing is left at either path on failure.
    async fn download_to_file(
        &self,
        url: &str,
        destination: &Path,
        referer: &str,
        user_agent: &str,
    ) -> FetchResult<()> {
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|source| FetchError::io(parent, source))?;
        }
        let staging = staging_path(destination);
        if let Err(err) = self.write_body(url, &staging, referer, user_agent).await {
            remove_staging(&staging).await;
            return Err(err);
        }
        if let Err(source) = fs::rename(&staging, destination).await {
            remove_staging(&staging).await;
            return Err(FetchError::io(destination, source));
        }
        Ok(())
    }

    async fn write_body(
        &self,
        url: &str,
        staging: &Path,
        referer: &str,
        user_agent: &str,
    ) -> FetchResult<()> {
        if let Ok(parsed) = Url::parse(url) {
            if parsed.scheme() == "file" {
                if !self.allow_file_urls {
                    return Err(FetchError::Network(format!(
                        "file urls are disabled, refusing {url}"
                    )));
                }
                let source_path = parsed
                    .to_file_path()
                    .map_err(|_| FetchError::Network(format!("invalid file url {url}")))?;
                fs::copy(&source_path, staging)
                    .await
                    .map_err(|source| FetchError::io(&source_path, source))?;
                return Ok(());
            }
        }

        let response = self
            .http_client
            .get(url)
            .header(REFERER, referer)
            .header(USER_AGENT, user_agent)
            .send()
            .await?
            .error_for_status()?;
        let mut stream = response.bytes_stream();
        let mut file = fs::File::create(staging)
            .await
            .map_err(|source| FetchError::io(staging, source))?;
        while let Some(chunk) = stream.next().await {
            let data = chunk?;
            file.write_all(&data)
                .await
                .map_err(|source| FetchError::io(staging, source))?;
        }
        file.flush()
            .await
            .map_err(|source| FetchError::io(staging, source))?;
        Ok(())
    }
}

/// `Referer` and, when cookies were captured, `Cookie` lines; each CRLF-terminated.
pub fn request_headers(manifest: &ManifestDescriptor) -> String {
    let mut headers = format!("Referer: {}\r\n", manifest.referer);
    if let Some(cookie) = manifest.auth.cookie_header() {
        headers.push_str(&format!("Cookie: {cookie}\r\n"));
    }
    headers
}

pub fn staging_path(destination: &Path) -> PathBuf {
    let mut name = destination
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_default();
    name.push(".part");
    destination.with_file_name(name)
}

async fn remove_staging(staging: &Path) {
    match fs::remove_file(staging).await {
        Ok(()) => {}
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => warn!(path = %staging.display(), error = %err, "failed to remove staging file"),
    }
}

fn stderr_tail(raw: &[u8]) -> String {
    let text = String::from_utf8_lossy(raw);
    let lines: Vec<&str> = text.lines().filter(|line| !line.trim().is_empty()).collect();
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    lines[start..].join("\n")
}

fn reports_no_stream(stderr: &str) -> bool {
    let lowered = stderr.to_lowercase();
    NO_STREAM_MARKERS
        .iter()
        .any(|marker| lowered.contains(marker))
}
