pub mod catalog;
pub mod download;

pub use catalog::{EpisodesArgs, SearchArgs};
pub use download::{select_episodes, BatchArgs, DownloadArgs, ResolveArgs};
