use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::subtitles::SubtitleTrack;

pub const DEFAULT_SEARCH_LIMIT: usize = 5;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("failed to read catalog {path}: {source}")]
    Io {
        source: std::io::Error,
        path: PathBuf,
    },
    #[error("failed to parse catalog {path}: {source}")]
    Parse {
        source: serde_json::Error,
        path: PathBuf,
    },
    #[error("unknown series {0}")]
    UnknownSeries(String),
    #[error("unknown episode {0}")]
    UnknownEpisode(String),
}

pub type CatalogResult<T> = Result<T, CatalogError>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeriesHit {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpisodeRef {
    pub id: String,
    pub number: u32,
    #[serde(default)]
    pub title: Option<String>,
}

/// Source of series, episode and subtitle listings.
#[async_trait]
pub trait EpisodeCatalog: Send + Sync {
    async fn list_results(&self, query: &str) -> CatalogResult<Vec<SeriesHit>>;
    async fn list_episodes(&self, series_id: &str) -> CatalogResult<Vec<EpisodeRef>>;
    async fn list_subtitle_tracks(&self, episode_id: &str) -> CatalogResult<Vec<SubtitleTrack>>;
}

#[derive(Debug, Clone, Deserialize)]
struct CatalogDocument {
    #[serde(default)]
    series: Vec<CatalogSeries>,
}

#[derive(Debug, Clone, Deserialize)]
struct CatalogSeries {
    id: String,
    name: String,
    #[serde(default)]
    episodes: Vec<CatalogEpisode>,
}

#[derive(Debug, Clone, Deserialize)]
struct CatalogEpisode {
    id: String,
    number: u32,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    subtitles: Vec<SubtitleTrack>,
}

impl CatalogEpisode {
    fn reference(&self) -> EpisodeRef {
        EpisodeRef {
            id: self.id.clone(),
            number: self.number,
            title: self.title.clone(),
        }
    }
}

/// Catalog backed by a JSON listing of series, episodes and subtitle tracks.
#[derive(Debug, Clone)]
pub struct JsonCatalog {
    series: Vec<CatalogSeries>,
    search_limit: usize,
}

impl JsonCatalog {
    pub fn load<P: AsRef<Path>>(path: P) -> CatalogResult<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| CatalogError::Io {
            source,
            path: path.to_path_buf(),
        })?;
        Self::from_json(&contents).map_err(|source| CatalogError::Parse {
            source,
            path: path.to_path_buf(),
        })
    }

    pub fn from_json(contents: &str) -> Result<Self, serde_json::Error> {
        let document: CatalogDocument = serde_json::from_str(contents)?;
        Ok(Self {
            series: document.series,
            search_limit: DEFAULT_SEARCH_LIMIT,
        })
    }

    pub fn with_search_limit(mut self, limit: usize) -> Self {
        self.search_limit = limit;
        self
    }

    pub fn series(&self, series_id: &str) -> Option<SeriesHit> {
        self.series
            .iter()
            .find(|series| series.id == series_id)
            .map(|series| SeriesHit {
                id: series.id.clone(),
                name: series.name.clone(),
            })
    }

    fn find_episode(&self, episode_id: &str) -> Option<&CatalogEpisode> {
        self.series
            .iter()
            .flat_map(|series| series.episodes.iter())
            .find(|episode| episode.id == episode_id)
    }
}

#[async_trait]
impl EpisodeCatalog for JsonCatalog {
    async fn list_results(&self, query: &str) -> CatalogResult<Vec<SeriesHit>> {
        let needle = query.trim().to_lowercase();
        Ok(self
            .series
            .iter()
            .filter(|series| series.name.to_lowercase().contains(&needle))
            .take(self.search_limit)
            .map(|series| SeriesHit {
                id: series.id.clone(),
                name: series.name.clone(),
            })
            .collect())
    }

    async fn list_episodes(&self, series_id: &str) -> CatalogResult<Vec<EpisodeRef>> {
        let series = self
            .series
            .iter()
            .find(|series| series.id == series_id)
            .ok_or_else(|| CatalogError::UnknownSeries(series_id.to_string()))?;
        let mut episodes: Vec<EpisodeRef> =
            series.episodes.iter().map(CatalogEpisode::reference).collect();
        episodes.sort_by_key(|episode| episode.number);
        Ok(episodes)
    }

    async fn list_subtitle_tracks(&self, episode_id: &str) -> CatalogResult<Vec<SubtitleTrack>> {
        self.find_episode(episode_id)
            .map(|episode| episode.subtitles.clone())
            .ok_or_else(|| CatalogError::UnknownEpisode(episode_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIXTURE: &str = r#"{
        "series": [
            {"id": "frieren-18542", "name": "Frieren: Beyond Journey's End", "episodes": [
                {"id": "107257", "number": 2, "title": "It Didn't Have to Be Magic"},
                {"id": "107256", "number": 1, "subtitles": [
                    {"url": "https://cdn.example/subs/eng-2.vtt", "label": "English"}
                ]}
            ]},
            {"id": "one-piece-100", "name": "One Piece"},
            {"id": "piece-2", "name": "Piece of Cake"}
        ]
    }"#;

    #[tokio::test]
    async fn search_is_case_insensitive_and_limited() {
        let catalog = JsonCatalog::from_json(FIXTURE).unwrap();
        let hits = catalog.list_results("PIECE").await.unwrap();
        assert_eq!(hits.len(), 2);
        let limited = catalog.with_search_limit(1).list_results("piece").await.unwrap();
        assert_eq!(limited[0].id, "one-piece-100");
        assert_eq!(limited.len(), 1);
    }

    #[tokio::test]
    async fn episodes_are_ordered_by_number() {
        let catalog = JsonCatalog::from_json(FIXTURE).unwrap();
        let episodes = catalog.list_episodes("frieren-18542").await.unwrap();
        let numbers: Vec<u32> = episodes.iter().map(|episode| episode.number).collect();
        assert_eq!(numbers, vec![1, 2]);
        assert!(matches!(
            catalog.list_episodes("missing").await,
            Err(CatalogError::UnknownSeries(_))
        ));
    }

    #[tokio::test]
    async fn subtitle_tracks_default_to_empty() {
        let catalog = JsonCatalog::from_json(FIXTURE).unwrap();
        assert_eq!(catalog.list_subtitle_tracks("107256").await.unwrap().len(), 1);
        assert!(catalog.list_subtitle_tracks("107257").await.unwrap().is_empty());
    }

    #[test]
    fn load_reports_path_on_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.json");
        std::fs::write(&path, "{ not json").unwrap();
        let err = JsonCatalog::load(&path).unwrap_err();
        assert!(err.to_string().contains("catalog.json"));
    }
}
