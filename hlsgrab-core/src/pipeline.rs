use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::browser::{BrowserError, BrowserLauncher, ManifestResolver, ResolverSettings};
use crate::catalog::{CatalogError, EpisodeCatalog, EpisodeRef};
use crate::config::HlsgrabConfig;
use crate::fetcher::{FetchError, MediaFetcher};
use crate::naming::EpisodeFileNames;
use crate::subtitles::SubtitleSelector;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("manifest resolution failed: {0}")]
    Resolution(#[from] BrowserError),
    #[error("download failed: {0}")]
    Fetch(#[from] FetchError),
    #[error("catalog error: {0}")]
    Catalog(#[from] CatalogError),
    #[error("episode {episode_id} is not listed for {series}")]
    UnknownEpisode { series: String, episode_id: String },
    #[error("no series selected")]
    NoSeriesSelected,
}

impl PipelineError {
    /// One-line cause suitable for status messages.
    pub fn short_cause(&self) -> String {
        match self {
            PipelineError::Resolution(BrowserError::ResolutionTimeout(window)) => {
                format!("no stream manifest found within {}s", window.as_secs())
            }
            PipelineError::Resolution(BrowserError::Navigation { reason, .. }) => {
                format!("episode page failed to load: {reason}")
            }
            PipelineError::Resolution(err) => format!("browser error: {err}"),
            PipelineError::Fetch(FetchError::NoPlayableStream(_)) => "no playable stream".into(),
            PipelineError::Fetch(FetchError::ProcessFailed { status, .. }) => match status {
                Some(code) => format!("ffmpeg exited with status {code}"),
                None => "ffmpeg was terminated".into(),
            },
            other => other.to_string(),
        }
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;

/// One episode to fetch: the page to drive and the names used for output files.
#[derive(Debug, Clone, Serialize)]
pub struct EpisodeJob {
    pub view_url: String,
    pub series_name: String,
    pub episode: EpisodeRef,
}

impl EpisodeJob {
    pub fn new(
        view_url: impl Into<String>,
        series_name: impl Into<String>,
        episode: EpisodeRef,
    ) -> Self {
        Self {
            view_url: view_url.into(),
            series_name: series_name.into(),
            episode,
        }
    }

    pub fn file_names(&self, destination_dir: &Path) -> EpisodeFileNames {
        EpisodeFileNames::new(
            destination_dir,
            &self.series_name,
            &self.episode.number.to_string(),
        )
    }
}

/// Expands `{series}` and `{episode}` in a watch-page URL template.
pub fn watch_url(template: &str, series_id: &str, episode_id: &str) -> String {
    template
        .replace("{series}", series_id)
        .replace("{episode}", episode_id)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EpisodeArtifacts {
    pub video_path: PathBuf,
    pub size_bytes: u64,
    pub subtitle_path: Option<PathBuf>,
}

#[async_trait]
pub trait EpisodePipeline: Send + Sync {
    async fn run(&self, job: EpisodeJob, destination_dir: &Path)
        -> PipelineResult<EpisodeArtifacts>;
}

pub struct DownloadPipeline {
    resolver: Arc<ManifestResolver>,
    fetcher: Arc<MediaFetcher>,
    selector: SubtitleSelector,
    catalog: Option<Arc<dyn EpisodeCatalog>>,
    default_subtitle_extension: String,
}

impl DownloadPipeline {
    pub fn new(
        resolver: Arc<ManifestResolver>,
        fetcher: Arc<MediaFetcher>,
        selector: SubtitleSelector,
    ) -> Self {
        Self {
            resolver,
            fetcher,
            selector,
            catalog: None,
            default_subtitle_extension: "vtt".into(),
        }
    }

    pub fn from_config(config: Arc<HlsgrabConfig>) -> PipelineResult<Self> {
        let settings = ResolverSettings::from_config(&config.capture);
        let launcher = BrowserLauncher::from_config(Arc::clone(&config))?;
        let resolver = ManifestResolver::new(Arc::new(launcher), settings);
        let fetcher = MediaFetcher::new(&config.fetcher)?;
        let selector = SubtitleSelector::from_config(&config.subtitles);
        Ok(Self::new(Arc::new(resolver), Arc::new(fetcher), selector)
            .with_subtitle_extension(&config.subtitles.default_extension))
    }

    pub fn with_catalog(mut self, catalog: Arc<dyn EpisodeCatalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    pub fn with_subtitle_extension(mut self, extension: &str) -> Self {
        self.default_subtitle_extension = extension.to_string();
        self
    }

    pub fn resolver(&self) -> &ManifestResolver {
        &self.resolver
    }

    pub fn fetcher(&self) -> &MediaFetcher {
        &self.fetcher
    }

    /// Resolves the manifest behind `job.view_url`, remuxes it into
    /// `<destination_dir>/<series>/<series> ep-<n>.mp4` and saves the preferred subtitle
    /// next to it. Subtitle problems never fail the episode.
    pub async fn resolve_and_download(
        &self,
        job: &EpisodeJob,
        destination_dir: &Path,
    ) -> PipelineResult<EpisodeArtifacts> {
        let names = job.file_names(destination_dir);
        let manifest = self.resolver.resolve(&job.view_url).await?;
        let referer = manifest.referer.clone();
        let user_agent = manifest.user_agent.clone();

        let media = self.fetcher.fetch(manifest, &names.video_path()).await?;
        let subtitle_path = self
            .download_subtitle(job, &names, &referer, &user_agent)
            .await;

        info!(
            series = %job.series_name,
            episode = job.episode.number,
            path = %media.path.display(),
            subtitle = subtitle_path.is_some(),
            "episode complete"
        );
        Ok(EpisodeArtifacts {
            video_path: media.path,
            size_bytes: media.size_bytes,
            subtitle_path,
        })
    }

    async fn download_subtitle(
        &self,
        job: &EpisodeJob,
        names: &EpisodeFileNames,
        referer: &str,
        user_agent: &str,
    ) -> Option<PathBuf> {
        let catalog = self.catalog.as_ref()?;
        let tracks = match catalog.list_subtitle_tracks(&job.episode.id).await {
            Ok(tracks) => tracks,
            Err(err) => {
                warn!(episode = %job.episode.id, error = %err, "subtitle listing failed");
                return None;
            }
        };
        let Some(track) = self.selector.select(&tracks) else {
            debug!(
                episode = %job.episode.id,
                tracks = tracks.len(),
                priority = ?self.selector.priority(),
                "no preferred subtitle track"
            );
            return None;
        };
        let extension = track
            .extension()
            .unwrap_or_else(|| self.default_subtitle_extension.clone());
        let destination = names.subtitle_path(&track.language(), &extension);
        match self
            .fetcher
            .fetch_subtitle(track, &destination, referer, user_agent)
            .await
        {
            Ok(path) => Some(path),
            Err(err) => {
                warn!(episode = %job.episode.id, error = %err, "subtitle download failed");
                None
            }
        }
    }
}

#[async_trait]
impl EpisodePipeline for DownloadPipeline {
    async fn run(
        &self,
        job: EpisodeJob,
        destination_dir: &Path,
    ) -> PipelineResult<EpisodeArtifacts> {
        self.resolve_and_download(&job, destination_dir).await
    }
}
