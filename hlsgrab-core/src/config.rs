use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::error::{ConfigError, Result};

pub const DOWNLOAD_DIR_ENV: &str = "HLSGRAB_DOWNLOAD_DIR";

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct HlsgrabConfig {
    pub paths: PathsSection,
    pub chromium: ChromiumSection,
    pub user_agents: UserAgentSection,
    pub capture: CaptureSection,
    pub site: SiteSection,
    pub fetcher: FetcherSection,
    #[serde(default)]
    pub subtitles: SubtitleSection,
}

impl HlsgrabConfig {
    pub fn download_dir(&self) -> PathBuf {
        PathBuf::from(&self.paths.download_dir)
    }

    pub fn profiles_dir(&self) -> PathBuf {
        PathBuf::from(&self.paths.profiles_dir)
    }

    /// Replaces `paths.download_dir` with `HLSGRAB_DOWNLOAD_DIR` when it is set.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(dir) = std::env::var(DOWNLOAD_DIR_ENV) {
            let dir = dir.trim();
            if !dir.is_empty() {
                self.paths.download_dir = dir.to_string();
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.capture.manifest_patterns.iter().all(|p| p.trim().is_empty()) {
            return Err(ConfigError::Invalid {
                field: "capture.manifest_patterns",
                reason: "at least one non-empty pattern is required".into(),
            });
        }
        if self.capture.capture_timeout_seconds == 0 {
            return Err(ConfigError::Invalid {
                field: "capture.capture_timeout_seconds",
                reason: "must be greater than zero".into(),
            });
        }
        if !self.site.watch_url_template.contains("{episode}") {
            return Err(ConfigError::Invalid {
                field: "site.watch_url_template",
                reason: "missing {episode} placeholder".into(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PathsSection {
    pub download_dir: String,
    pub profiles_dir: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChromiumSection {
    pub executable_path: Option<String>,
    pub headless: bool,
    pub sandbox: bool,
    pub disable_gpu: bool,
    pub mute_audio: bool,
    pub request_timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UserAgentSection {
    pub pool: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CaptureSection {
    pub manifest_patterns: Vec<String>,
    pub navigation_timeout_seconds: u64,
    pub capture_timeout_seconds: u64,
    #[serde(default)]
    pub reload_before_wait: bool,
    #[serde(default)]
    pub play_selectors: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SiteSection {
    pub watch_url_template: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FetcherSection {
    pub ffmpeg_binary: String,
    pub loglevel: String,
    pub io_timeout_seconds: u64,
    /// Lets subtitle tracks point at local files. Off unless configured.
    #[serde(default)]
    pub allow_file_urls: bool,
    pub reconnect: ReconnectSection,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReconnectSection {
    pub enabled: bool,
    #[serde(default)]
    pub max_retries: Option<u32>,
    pub delay_max_seconds: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubtitleSection {
    pub priority: Vec<String>,
    pub default_extension: String,
}

impl Default for SubtitleSection {
    fn default() -> Self {
        Self {
            priority: vec![
                "eng-2.vtt".into(),
                "en.vtt".into(),
                "eng.vtt".into(),
                "english.vtt".into(),
            ],
            default_extension: "vtt".into(),
        }
    }
}

pub fn load_hlsgrab_config<P: AsRef<Path>>(path: P) -> Result<HlsgrabConfig> {
    let mut config: HlsgrabConfig = load_toml(path)?;
    config.apply_env_overrides();
    config.validate()?;
    Ok(config)
}

fn load_toml<T, P>(path: P) -> Result<T>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        source,
        path: path.to_path_buf(),
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        source,
        path: path.to_path_buf(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn fixture() -> HlsgrabConfig {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../configs/hlsgrab.toml");
        load_toml(&path).unwrap()
    }

    #[test]
    fn load_fixture_config() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../configs/hlsgrab.toml");
        let config: HlsgrabConfig = load_toml(&path).expect("config should parse");
        config.validate().unwrap();
        assert!(config.user_agents.pool.len() >= 2);
        assert_eq!(config.capture.manifest_patterns, vec![".m3u8".to_string()]);
        assert_eq!(config.fetcher.ffmpeg_binary, "ffmpeg");
        assert_eq!(config.subtitles.priority[0], "eng-2.vtt");
        assert_eq!(config.fetcher.reconnect.max_retries, None);
    }

    #[test]
    fn download_dir_env_overrides_config() {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut config = fixture();

        std::env::set_var(DOWNLOAD_DIR_ENV, "  /srv/episodes  ");
        config.apply_env_overrides();
        assert_eq!(config.download_dir(), PathBuf::from("/srv/episodes"));

        std::env::set_var(DOWNLOAD_DIR_ENV, "   ");
        let mut untouched = fixture();
        untouched.apply_env_overrides();
        assert_eq!(untouched.download_dir(), PathBuf::from("./downloads"));

        std::env::remove_var(DOWNLOAD_DIR_ENV);
        let mut unset = fixture();
        unset.apply_env_overrides();
        assert_eq!(unset.download_dir(), PathBuf::from("./downloads"));
    }

    #[test]
    fn missing_file_reports_path() {
        let err = load_hlsgrab_config("/nonexistent/hlsgrab.toml").unwrap_err();
        match err {
            ConfigError::Io { path, .. } => {
                assert_eq!(path, PathBuf::from("/nonexistent/hlsgrab.toml"))
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn template_without_episode_placeholder_is_rejected() {
        let mut config = fixture();
        config.site.watch_url_template = "https://example.com/watch".into();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid {
                field: "site.watch_url_template",
                ..
            })
        ));
    }
}
