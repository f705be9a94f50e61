use std::path::PathBuf;

use clap::Args;

/// Search a catalog file for series by name.
#[derive(Args, Debug, Clone)]
pub struct SearchArgs {
    /// JSON catalog listing series, episodes and subtitle tracks
    #[arg(long)]
    pub catalog: PathBuf,
    /// Case-insensitive part of the series name
    pub query: String,
    /// Maximum number of hits
    #[arg(long, default_value_t = hlsgrab_core::catalog::DEFAULT_SEARCH_LIMIT)]
    pub limit: usize,
}

/// List the episodes of one series.
#[derive(Args, Debug, Clone)]
pub struct EpisodesArgs {
    #[arg(long)]
    pub catalog: PathBuf,
    /// Series id as listed by `search`
    pub series: String,
}
