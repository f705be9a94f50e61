use std::path::{Path, PathBuf};

const FALLBACK_COMPONENT: &str = "untitled";

/// Reduces `raw` to a single safe path component: ASCII/Unicode alphanumerics, spaces,
/// `_` and `-` survive, everything else is dropped. Never empty.
pub fn sanitize_component(raw: &str) -> String {
    let kept: String = raw
        .chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, ' ' | '_' | '-'))
        .collect();
    let collapsed = kept.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        FALLBACK_COMPONENT.to_string()
    } else {
        collapsed
    }
}

/// Destination layout for one episode of one series.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EpisodeFileNames {
    pub directory: PathBuf,
    pub stem: String,
}

impl EpisodeFileNames {
    pub fn new(root: &Path, series_name: &str, episode_number: &str) -> Self {
        let series = sanitize_component(series_name);
        let number = sanitize_component(episode_number);
        let directory = root.join(&series);
        let stem = format!("{series} ep-{number}");
        Self { directory, stem }
    }

    pub fn video_path(&self) -> PathBuf {
        self.directory.join(format!("{}.mp4", self.stem))
    }

    pub fn subtitle_path(&self, language: &str, extension: &str) -> PathBuf {
        let language = sanitize_component(language);
        let extension: String = extension
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_lowercase();
        let extension = if extension.is_empty() {
            "vtt".to_string()
        } else {
            extension
        };
        self.directory
            .join(format!("{}_{language}.{extension}", self.stem))
    }
}
