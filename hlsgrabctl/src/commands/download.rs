use std::path::PathBuf;

use clap::Args;
use hlsgrab_core::EpisodeRef;

use crate::{AppError, Result};

/// Capture the stream manifest behind an episode page without downloading it.
#[derive(Args, Debug, Clone)]
pub struct ResolveArgs {
    /// Episode watch page
    pub view_url: String,
}

/// Download a single episode (and its subtitle when a catalog is given).
#[derive(Args, Debug, Clone)]
pub struct DownloadArgs {
    /// Episode watch page
    pub view_url: String,
    /// Series display name used for the output directory and file names
    #[arg(long)]
    pub series: String,
    /// Episode number used in the file name
    #[arg(long)]
    pub episode: u32,
    /// Catalog episode id, used to look up subtitle tracks
    #[arg(long)]
    pub episode_id: Option<String>,
    /// JSON catalog providing subtitle tracks
    #[arg(long)]
    pub catalog: Option<PathBuf>,
}

/// Queue episodes of a series and download them one after another.
#[derive(Args, Debug, Clone)]
pub struct BatchArgs {
    #[arg(long)]
    pub catalog: PathBuf,
    /// Series id as listed by `search`
    #[arg(long)]
    pub series: String,
    /// Episode numbers to fetch; all episodes when omitted
    #[arg(long, value_delimiter = ',')]
    pub episodes: Vec<u32>,
    /// Session key the queue is kept under
    #[arg(long, default_value = "cli")]
    pub session: String,
}

/// Picks `numbers` out of `available`, keeping the requested order. Empty selects all.
pub fn select_episodes(available: &[EpisodeRef], numbers: &[u32]) -> Result<Vec<EpisodeRef>> {
    if numbers.is_empty() {
        return Ok(available.to_vec());
    }
    numbers
        .iter()
        .map(|number| {
            available
                .iter()
                .find(|episode| episode.number == *number)
                .cloned()
                .ok_or_else(|| AppError::NotFound(format!("episode {number}")))
        })
        .collect()
}
