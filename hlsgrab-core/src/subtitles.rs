use serde::{Deserialize, Serialize};
use url::Url;

use crate::config::SubtitleSection;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubtitleTrack {
    pub url: String,
    #[serde(default)]
    pub label: String,
}

impl SubtitleTrack {
    pub fn new(url: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            label: label.into(),
        }
    }

    /// Last path segment of the track URL, without query or fragment.
    pub fn basename(&self) -> String {
        let path = match Url::parse(&self.url) {
            Ok(parsed) => parsed.path().to_string(),
            Err(_) => self
                .url
                .split(['?', '#'])
                .next()
                .unwrap_or_default()
                .to_string(),
        };
        path.rsplit('/').next().unwrap_or_default().to_string()
    }

    /// Language tag used in output file names: first word of the label.
    pub fn language(&self) -> String {
        self.label
            .split_whitespace()
            .next()
            .unwrap_or("subtitle")
            .to_string()
    }

    pub fn extension(&self) -> Option<String> {
        let basename = self.basename();
        basename
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_string())
            .filter(|ext| !ext.is_empty())
    }
}

/// Picks a subtitle track by basename, walking a fixed priority list of file names.
#[derive(Debug, Clone)]
pub struct SubtitleSelector {
    priority: Vec<String>,
}

impl SubtitleSelector {
    pub fn new<I, S>(priority: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            priority: priority
                .into_iter()
                .map(|pattern| pattern.into().to_lowercase())
                .filter(|pattern| !pattern.is_empty())
                .collect(),
        }
    }

    pub fn from_config(config: &SubtitleSection) -> Self {
        Self::new(config.priority.iter().cloned())
    }

    pub fn priority(&self) -> &[String] {
        &self.priority
    }

    pub fn select<'a>(&self, tracks: &'a [SubtitleTrack]) -> Option<&'a SubtitleTrack> {
        self.priority.iter().find_map(|pattern| {
            tracks
                .iter()
                .find(|track| track.basename().to_lowercase() == *pattern)
        })
    }
}

impl Default for SubtitleSelector {
    fn default() -> Self {
        Self::from_config(&SubtitleSection::default())
    }
}
