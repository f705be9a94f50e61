use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::ReconnectSection;

use super::error::FetchError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub enabled: bool,
    pub max_retries: Option<u32>,
    pub delay_max: Duration,
}

impl ReconnectPolicy {
    pub fn ffmpeg_args(&self) -> Vec<String> {
        if !self.enabled {
            return Vec::new();
        }
        let mut args: Vec<String> = vec![
            "-reconnect".into(),
            "1".into(),
            "-reconnect_streamed".into(),
            "1".into(),
            "-reconnect_on_network_error".into(),
            "1".into(),
            "-reconnect_delay_max".into(),
            self.delay_max.as_secs().to_string(),
        ];
        // Only ffmpeg 7.1 and later know this option; older builds reject it.
        if let Some(retries) = self.max_retries {
            args.push("-reconnect_max_retries".into());
            args.push(retries.to_string());
        }
        args
    }
}

impl TryFrom<ReconnectSection> for ReconnectPolicy {
    type Error = FetchError;

    fn try_from(value: ReconnectSection) -> Result<Self, Self::Error> {
        if value.enabled && value.delay_max_seconds == 0 {
            return Err(FetchError::Configuration(
                "reconnect.delay_max_seconds must be greater than zero".into(),
            ));
        }
        Ok(Self {
            enabled: value.enabled,
            max_retries: value.max_retries,
            delay_max: Duration::from_secs(u64::from(value.delay_max_seconds)),
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FetchedMedia {
    pub path: PathBuf,
    pub size_bytes: u64,
    pub completed_at: DateTime<Utc>,
}
