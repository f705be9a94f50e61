pub mod browser;
pub mod catalog;
pub mod config;
pub mod error;
pub mod fetcher;
pub mod naming;
pub mod pipeline;
pub mod session;
pub mod subtitles;

pub use browser::{
    BrowserError, BrowserLauncher, BrowserMetrics, BrowserResult, ManifestDescriptor,
    ManifestResolver, ResolverSettings,
};
pub use catalog::{CatalogError, EpisodeCatalog, EpisodeRef, JsonCatalog, SeriesHit};
pub use config::{load_hlsgrab_config, HlsgrabConfig, DOWNLOAD_DIR_ENV};
pub use error::{ConfigError, Result};
pub use fetcher::{FetchError, FetchResult, FetchedMedia, MediaFetcher};
pub use naming::{sanitize_component, EpisodeFileNames};
pub use pipeline::{
    watch_url, DownloadPipeline, EpisodeArtifacts, EpisodeJob, EpisodePipeline, PipelineError,
    PipelineResult,
};
pub use session::{
    DrainStatus, ItemOutcome, ProcessorSettings, QueueEvent, QueueProcessor, SessionId,
    SessionPhase, SessionStore,
};
pub use subtitles::{SubtitleSelector, SubtitleTrack};
