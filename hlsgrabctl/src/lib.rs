pub mod commands;

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use hlsgrab_core::browser::{BrowserMetrics, ManifestSummary};
use hlsgrab_core::session::{ItemOutcome, ProcessorSettings};
use hlsgrab_core::{
    load_hlsgrab_config, DownloadPipeline, DrainStatus, EpisodeArtifacts, EpisodeCatalog,
    EpisodeJob, EpisodeRef, HlsgrabConfig, JsonCatalog, MediaFetcher, QueueEvent, QueueProcessor,
    SeriesHit, SessionId, SessionStore,
};
use serde::Serialize;
use thiserror::Error;
use tracing::info;
use tracing_subscriber::EnvFilter;

use commands::{
    select_episodes, BatchArgs, DownloadArgs, EpisodesArgs, ResolveArgs, SearchArgs,
};

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(#[from] hlsgrab_core::ConfigError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error(transparent)]
    Browser(#[from] hlsgrab_core::BrowserError),
    #[error(transparent)]
    Pipeline(#[from] hlsgrab_core::PipelineError),
    #[error(transparent)]
    Catalog(#[from] hlsgrab_core::CatalogError),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("required resource missing: {0}")]
    MissingResource(String),
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Capture and download HLS episodes", long_about = None)]
pub struct Cli {
    /// Path to hlsgrab.toml
    #[arg(long, default_value = "configs/hlsgrab.toml")]
    pub config: PathBuf,
    /// Overrides paths.download_dir (and HLSGRAB_DOWNLOAD_DIR)
    #[arg(long)]
    pub download_dir: Option<PathBuf>,
    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
    /// Debug-level logging
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Capture the manifest behind an episode page
    Resolve(ResolveArgs),
    /// Download one episode
    Download(DownloadArgs),
    /// Queue and download several episodes of a series
    Batch(BatchArgs),
    /// Search series in a catalog file
    Search(SearchArgs),
    /// List episodes of a series in a catalog file
    Episodes(EpisodesArgs),
    /// Verify configuration and external binaries
    Check,
}

pub fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

pub async fn run(cli: Cli) -> Result<()> {
    let context = AppContext::new(&cli)?;

    match &cli.command {
        Commands::Resolve(args) => {
            let report = context.resolve(args).await?;
            render(&report, cli.format)?;
        }
        Commands::Download(args) => {
            let artifacts = context.download(args).await?;
            render(&artifacts, cli.format)?;
        }
        Commands::Batch(args) => {
            let status = context.batch(args, cli.format).await?;
            render(&status, cli.format)?;
        }
        Commands::Search(args) => {
            let hits = context.search(args).await?;
            render(&hits, cli.format)?;
        }
        Commands::Episodes(args) => {
            let episodes = context.episodes(args).await?;
            render(&episodes, cli.format)?;
        }
        Commands::Check => {
            let report = context.health_check();
            render(&report, cli.format)?;
            if report
                .iter()
                .any(|entry| matches!(entry.status, CheckStatus::Error))
            {
                return Err(AppError::MissingResource(
                    "one or more checks failed".to_string(),
                ));
            }
        }
    }

    Ok(())
}

struct AppContext {
    config: Arc<HlsgrabConfig>,
    config_path: PathBuf,
}

impl AppContext {
    fn new(cli: &Cli) -> Result<Self> {
        let mut config = load_hlsgrab_config(&cli.config)?;
        if let Some(dir) = &cli.download_dir {
            config.paths.download_dir = dir.to_string_lossy().to_string();
        }
        Ok(Self {
            config: Arc::new(config),
            config_path: cli.config.clone(),
        })
    }

    fn pipeline(&self) -> Result<DownloadPipeline> {
        Ok(DownloadPipeline::from_config(Arc::clone(&self.config))?)
    }

    async fn resolve(&self, args: &ResolveArgs) -> Result<ResolveReport> {
        let pipeline = self.pipeline()?;
        let manifest = pipeline.resolver().resolve(&args.view_url).await?;
        Ok(ResolveReport {
            manifest: manifest.summary(),
            metrics: pipeline.resolver().metrics(),
        })
    }

    async fn download(&self, args: &DownloadArgs) -> Result<EpisodeArtifacts> {
        let mut pipeline = self.pipeline()?;
        if let Some(path) = &args.catalog {
            pipeline = pipeline.with_catalog(Arc::new(JsonCatalog::load(path)?));
        }
        let episode = EpisodeRef {
            id: args
                .episode_id
                .clone()
                .unwrap_or_else(|| args.episode.to_string()),
            number: args.episode,
            title: None,
        };
        let job = EpisodeJob::new(args.view_url.clone(), args.series.clone(), episode);
        Ok(pipeline
            .resolve_and_download(&job, &self.config.download_dir())
            .await?)
    }

    async fn batch(&self, args: &BatchArgs, format: OutputFormat) -> Result<DrainStatus> {
        let catalog = Arc::new(JsonCatalog::load(&args.catalog)?);
        let series = catalog
            .series(&args.series)
            .ok_or_else(|| AppError::NotFound(format!("series {}", args.series)))?;
        let listing = catalog.list_episodes(&series.id).await?;
        let selected = select_episodes(&listing, &args.episodes)?;

        let session = SessionId::new(args.session.clone());
        let pipeline = self.pipeline()?.with_catalog(catalog);
        let (processor, mut events) = QueueProcessor::new(
            Arc::new(SessionStore::new()),
            Arc::new(pipeline),
            ProcessorSettings::from_config(&self.config),
        );
        processor
            .store()
            .select_series(&session, series.clone(), listing)
            .await;
        let ids = selected.into_iter().map(|episode| episode.id).collect();
        let receipt = processor.enqueue_batch(&session, ids).await;
        info!(series = %series.name, queued = receipt.accepted, "batch queued");

        if receipt.start_drain {
            while let Some(event) = events.recv().await {
                if event.session() != &session {
                    continue;
                }
                emit_event(&event, format)?;
                if matches!(event, QueueEvent::BatchComplete { .. }) {
                    break;
                }
            }
        }

        processor
            .drain_status(&session)
            .await
            .ok_or_else(|| AppError::NotFound(format!("session {session}")))
    }

    async fn search(&self, args: &SearchArgs) -> Result<Vec<SeriesHit>> {
        let catalog = JsonCatalog::load(&args.catalog)?.with_search_limit(args.limit);
        Ok(catalog.list_results(&args.query).await?)
    }

    async fn episodes(&self, args: &EpisodesArgs) -> Result<Vec<EpisodeRef>> {
        let catalog = JsonCatalog::load(&args.catalog)?;
        Ok(catalog.list_episodes(&args.series).await?)
    }

    fn health_check(&self) -> Vec<HealthEntry> {
        let mut entries = vec![HealthEntry::ok(
            "config",
            format!("{}", self.config_path.display()),
        )];
        entries.push(check_directory(
            "download_dir",
            &self.config.download_dir(),
        ));
        entries.push(check_directory("profiles_dir", &self.config.profiles_dir()));
        entries.push(match MediaFetcher::new(&self.config.fetcher) {
            Ok(fetcher) => check_ffmpeg(
                fetcher.ffmpeg_binary(),
                self.config.fetcher.reconnect.max_retries.is_some(),
            ),
            Err(err) => HealthEntry::error("ffmpeg", err.to_string()),
        });
        entries.push(match &self.config.chromium.executable_path {
            Some(path) if Path::new(path).exists() => HealthEntry::ok("chromium", path.clone()),
            Some(path) => HealthEntry::error("chromium", format!("{path} missing")),
            None => HealthEntry::warn("chromium", "not configured, detected at launch"),
        });
        entries
    }
}

fn check_directory(name: &str, path: &Path) -> HealthEntry {
    match std::fs::metadata(path) {
        Ok(meta) if meta.is_dir() => HealthEntry::ok(name, format!("{}", path.display())),
        Ok(_) => HealthEntry::error(name, format!("{} is not a directory", path.display())),
        Err(_) => HealthEntry::warn(name, format!("{} will be created", path.display())),
    }
}

/// First ffmpeg release that accepts `-reconnect_max_retries`.
const RETRY_CAP_MIN_FFMPEG: (u32, u32) = (7, 1);

fn check_ffmpeg(program: &Path, retry_cap_configured: bool) -> HealthEntry {
    let output = Command::new(program)
        .arg("-version")
        .stdin(Stdio::null())
        .stderr(Stdio::null())
        .output();
    let output = match output {
        Ok(output) => output,
        Err(err) => return HealthEntry::error("ffmpeg", format!("{}: {err}", program.display())),
    };
    if !output.status.success() {
        return HealthEntry::warn(
            "ffmpeg",
            format!("{} exited with {}", program.display(), output.status),
        );
    }
    let banner = String::from_utf8_lossy(&output.stdout);
    ffmpeg_entry(program, ffmpeg_version(&banner), retry_cap_configured)
}

fn ffmpeg_entry(
    program: &Path,
    version: Option<(u32, u32)>,
    retry_cap_configured: bool,
) -> HealthEntry {
    let label = match version {
        Some((major, minor)) => format!("{} {major}.{minor}", program.display()),
        None => format!("{} (unknown version)", program.display()),
    };
    match version {
        Some(found) if retry_cap_configured && found < RETRY_CAP_MIN_FFMPEG => HealthEntry::error(
            "ffmpeg",
            format!(
                "{label} rejects -reconnect_max_retries; unset fetcher.reconnect.max_retries or upgrade to {}.{}",
                RETRY_CAP_MIN_FFMPEG.0, RETRY_CAP_MIN_FFMPEG.1
            ),
        ),
        None if retry_cap_configured => HealthEntry::warn(
            "ffmpeg",
            format!("{label}; fetcher.reconnect.max_retries may be unsupported"),
        ),
        _ => HealthEntry::ok("ffmpeg", label),
    }
}

/// Parses `major.minor` from the first line of `ffmpeg -version`, e.g.
/// `ffmpeg version 6.1.1-3ubuntu5` or `ffmpeg version n7.1`.
fn ffmpeg_version(banner: &str) -> Option<(u32, u32)> {
    let token = banner
        .lines()
        .next()?
        .split_whitespace()
        .skip_while(|word| *word != "version")
        .nth(1)?;
    // Git snapshots report `N-<revision>` instead of a release number.
    if token.starts_with("N-") {
        return None;
    }
    let token = token.trim_start_matches(|c: char| !c.is_ascii_digit());
    let mut parts = token.split(|c: char| !c.is_ascii_digit());
    let major = parts.next()?.parse().ok()?;
    let minor = parts.next().and_then(|part| part.parse().ok()).unwrap_or(0);
    Some((major, minor))
}

fn emit_event(event: &QueueEvent, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Text => println!("{}", event.status_text()),
        OutputFormat::Json => println!("{}", serde_json::to_string(event)?),
    }
    Ok(())
}

fn render<T>(value: &T, format: OutputFormat) -> Result<()>
where
    T: Serialize + DisplayFallback,
{
    match format {
        OutputFormat::Text => {
            println!("{}", value.display());
            Ok(())
        }
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value)?;
            println!("{}", json);
            Ok(())
        }
    }
}

trait DisplayFallback {
    fn display(&self) -> String;
}

#[derive(Debug, Serialize)]
pub struct ResolveReport {
    pub manifest: ManifestSummary,
    pub metrics: BrowserMetrics,
}

impl DisplayFallback for ResolveReport {
    fn display(&self) -> String {
        let cookies = if self.manifest.cookie_names.is_empty() {
            "-".to_string()
        } else {
            self.manifest.cookie_names.join(", ")
        };
        [
            format!("manifest:   {}", self.manifest.manifest_url),
            format!("referer:    {}", self.manifest.referer),
            format!("user agent: {}", self.manifest.user_agent),
            format!("cookies:    {cookies}"),
            format!("captured:   {}", self.manifest.captured_at.to_rfc3339()),
            format!(
                "capture rate: {:.0}% of {} session(s)",
                self.metrics.capture_rate(),
                self.metrics.sessions_opened
            ),
        ]
        .join("\n")
    }
}

impl DisplayFallback for EpisodeArtifacts {
    fn display(&self) -> String {
        let mut lines = vec![format!(
            "video:    {} ({} bytes)",
            self.video_path.display(),
            self.size_bytes
        )];
        match &self.subtitle_path {
            Some(path) => lines.push(format!("subtitle: {}", path.display())),
            None => lines.push("subtitle: -".to_string()),
        }
        lines.join("\n")
    }
}

impl DisplayFallback for DrainStatus {
    fn display(&self) -> String {
        let mut lines = vec![format!(
            "phase: {}  pending: {}",
            self.phase,
            self.pending.len()
        )];
        for record in &self.outcomes {
            let label = record
                .episode_number
                .map(|number| format!("ep-{number}"))
                .unwrap_or_else(|| record.episode_id.clone());
            match &record.outcome {
                ItemOutcome::Succeeded { artifacts } => {
                    lines.push(format!("[OK]    {label} {}", artifacts.video_path.display()))
                }
                ItemOutcome::Failed { cause } => {
                    lines.push(format!("[ERROR] {label} {cause}"))
                }
            }
        }
        lines.join("\n")
    }
}

impl DisplayFallback for Vec<SeriesHit> {
    fn display(&self) -> String {
        if self.is_empty() {
            return "no results".to_string();
        }
        self.iter()
            .enumerate()
            .map(|(index, hit)| format!("{}. {} ({})", index + 1, hit.name, hit.id))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl DisplayFallback for Vec<EpisodeRef> {
    fn display(&self) -> String {
        self.iter()
            .map(|episode| match &episode.title {
                Some(title) => format!("ep-{} [{}] {title}", episode.number, episode.id),
                None => format!("ep-{} [{}]", episode.number, episode.id),
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl DisplayFallback for Vec<HealthEntry> {
    fn display(&self) -> String {
        self.iter()
            .map(HealthEntry::display)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[derive(Debug, Serialize)]
pub struct HealthEntry {
    pub name: String,
    pub status: CheckStatus,
    pub detail: String,
}

#[derive(Debug, Serialize)]
pub enum CheckStatus {
    #[serde(rename = "ok")]
    Ok,
    #[serde(rename = "warn")]
    Warn,
    #[serde(rename = "error")]
    Error,
}

impl fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            CheckStatus::Ok => "OK",
            CheckStatus::Warn => "WARN",
            CheckStatus::Error => "ERROR",
        };
        write!(f, "{}", label)
    }
}

impl HealthEntry {
    fn ok(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: CheckStatus::Ok,
            detail: detail.into(),
        }
    }

    fn warn(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: CheckStatus::Warn,
            detail: detail.into(),
        }
    }

    fn error(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: CheckStatus::Error,
            detail: detail.into(),
        }
    }
}

impl DisplayFallback for HealthEntry {
    fn display(&self) -> String {
        format!(
            "[{status}] {name}: {detail}",
            status = self.status,
            name = self.name,
            detail = self.detail
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn test_cli(temp: &TempDir, command: Commands) -> Cli {
        let config = temp.path().join("hlsgrab.toml");
        fs::copy("../configs/hlsgrab.toml", &config).unwrap();
        Cli {
            config,
            download_dir: Some(temp.path().join("downloads")),
            format: OutputFormat::Json,
            verbose: false,
            command,
        }
    }

    fn write_catalog(temp: &TempDir) -> PathBuf {
        let path = temp.path().join("catalog.json");
        fs::write(
            &path,
            r#"{"series": [
                {"id": "show-1", "name": "Show", "episodes": [
                    {"id": "e2", "number": 2},
                    {"id": "e1", "number": 1, "title": "Pilot"}
                ]},
                {"id": "other-2", "name": "Another Show"}
            ]}"#,
        )
        .unwrap();
        path
    }

    #[test]
    fn cli_parses_batch_episode_list() {
        let cli = Cli::try_parse_from([
            "hlsgrabctl",
            "--format",
            "json",
            "batch",
            "--catalog",
            "catalog.json",
            "--series",
            "show-1",
            "--episodes",
            "1,3,5",
        ])
        .unwrap();
        match cli.command {
            Commands::Batch(args) => {
                assert_eq!(args.episodes, vec![1, 3, 5]);
                assert_eq!(args.session, "cli");
            }
            other => panic!("unexpected command: {other:?}"),
        }
        assert!(matches!(cli.format, OutputFormat::Json));
    }

    #[test]
    fn download_dir_flag_overrides_config() {
        let temp = TempDir::new().unwrap();
        let cli = test_cli(&temp, Commands::Check);
        let context = AppContext::new(&cli).unwrap();
        assert_eq!(context.config.download_dir(), temp.path().join("downloads"));
    }

    #[test]
    fn health_check_reports_each_dependency() {
        let temp = TempDir::new().unwrap();
        let cli = test_cli(&temp, Commands::Check);
        let context = AppContext::new(&cli).unwrap();
        let report = context.health_check();
        let names: Vec<&str> = report.iter().map(|entry| entry.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["config", "download_dir", "profiles_dir", "ffmpeg", "chromium"]
        );
        assert!(matches!(report[1].status, CheckStatus::Warn));
    }

    #[tokio::test]
    async fn search_and_episodes_read_the_catalog() {
        let temp = TempDir::new().unwrap();
        let catalog = write_catalog(&temp);
        let cli = test_cli(&temp, Commands::Check);
        let context = AppContext::new(&cli).unwrap();

        let hits = context
            .search(&SearchArgs {
                catalog: catalog.clone(),
                query: "show".into(),
                limit: 5,
            })
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits.display(), "1. Show (show-1)\n2. Another Show (other-2)");

        let episodes = context
            .episodes(&EpisodesArgs {
                catalog,
                series: "show-1".into(),
            })
            .await
            .unwrap();
        assert_eq!(episodes.display(), "ep-1 [e1] Pilot\nep-2 [e2]");
    }

    #[test]
    fn ffmpeg_banner_versions_are_parsed() {
        assert_eq!(
            ffmpeg_version("ffmpeg version 6.1.1-3ubuntu5 Copyright (c) 2000-2023"),
            Some((6, 1))
        );
        assert_eq!(ffmpeg_version("ffmpeg version n7.1 Copyright"), Some((7, 1)));
        assert_eq!(ffmpeg_version("ffmpeg version 4.4.2-0ubuntu0.22.04.1"), Some((4, 4)));
        assert_eq!(ffmpeg_version("ffmpeg version N-113000-gabc"), None);
        assert_eq!(ffmpeg_version(""), None);
    }

    #[test]
    fn retry_cap_on_old_ffmpeg_is_an_error() {
        let program = Path::new("ffmpeg");
        let old = ffmpeg_entry(program, Some((6, 1)), true);
        assert!(matches!(old.status, CheckStatus::Error));
        assert!(old.detail.contains("max_retries"));
        assert!(matches!(
            ffmpeg_entry(program, Some((6, 1)), false).status,
            CheckStatus::Ok
        ));
        assert!(matches!(
            ffmpeg_entry(program, Some((7, 1)), true).status,
            CheckStatus::Ok
        ));
        assert!(matches!(
            ffmpeg_entry(program, None, true).status,
            CheckStatus::Warn
        ));
    }

    #[test]
    fn health_entries_render_as_lines() {
        let report = vec![
            HealthEntry::ok("config", "configs/hlsgrab.toml"),
            HealthEntry::error("ffmpeg", "not found"),
        ];
        assert_eq!(
            report.display(),
            "[OK] config: configs/hlsgrab.toml\n[ERROR] ffmpeg: not found"
        );
    }
}
