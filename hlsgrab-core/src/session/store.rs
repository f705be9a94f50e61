use std::collections::{HashMap, VecDeque};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::catalog::{EpisodeRef, SeriesHit};
use crate::pipeline::EpisodeArtifacts;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    Idle,
    Draining,
}

impl SessionPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionPhase::Idle => "idle",
            SessionPhase::Draining => "draining",
        }
    }
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ItemOutcome {
    Succeeded { artifacts: EpisodeArtifacts },
    Failed { cause: String },
}

impl ItemOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ItemOutcome::Succeeded { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemRecord {
    pub episode_id: String,
    pub episode_number: Option<u32>,
    pub outcome: ItemOutcome,
    pub finished_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct SessionState {
    series: Option<SeriesHit>,
    episodes: HashMap<String, EpisodeRef>,
    pending: VecDeque<String>,
    draining: bool,
    outcomes: Vec<ItemRecord>,
}

impl SessionState {
    pub fn phase(&self) -> SessionPhase {
        if self.draining {
            SessionPhase::Draining
        } else {
            SessionPhase::Idle
        }
    }

    pub fn series(&self) -> Option<&SeriesHit> {
        self.series.as_ref()
    }
}

/// Result of appending to a session queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnqueueReceipt {
    pub accepted: usize,
    pub pending: usize,
    /// Set for exactly one caller per idle-to-draining transition.
    pub start_drain: bool,
}

/// The next queued episode with everything needed to build its job.
#[derive(Debug, Clone)]
pub struct NextItem {
    pub episode_id: String,
    pub series: Option<SeriesHit>,
    pub episode: Option<EpisodeRef>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DrainStatus {
    pub phase: SessionPhase,
    pub series: Option<SeriesHit>,
    pub pending: Vec<String>,
    pub outcomes: Vec<ItemRecord>,
}

/// Per-session queues. Every read-modify-write happens under one lock acquisition.
#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: Mutex<HashMap<SessionId, SessionState>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the active series and its episode listing. Pending items stay queued.
    pub async fn select_series(
        &self,
        session: &SessionId,
        series: SeriesHit,
        episodes: Vec<EpisodeRef>,
    ) {
        let mut sessions = self.sessions.lock().await;
        let state = sessions.entry(session.clone()).or_default();
        state.series = Some(series);
        state.episodes = episodes
            .into_iter()
            .map(|episode| (episode.id.clone(), episode))
            .collect();
    }

    /// Appends to the session queue. The caller that moves the session from idle to
    /// draining also clears the outcomes of the previous drain.
    pub async fn enqueue<I>(&self, session: &SessionId, episode_ids: I) -> EnqueueReceipt
    where
        I: IntoIterator<Item = String>,
    {
        let mut sessions = self.sessions.lock().await;
        let state = sessions.entry(session.clone()).or_default();
        let before = state.pending.len();
        state.pending.extend(episode_ids);
        let accepted = state.pending.len() - before;
        let start_drain = !state.draining && !state.pending.is_empty();
        if start_drain {
            state.draining = true;
            state.outcomes.clear();
        }
        EnqueueReceipt {
            accepted,
            pending: state.pending.len(),
            start_drain,
        }
    }

    /// Pops the next item. On an empty queue the session goes back to idle in the same
    /// critical section and `None` is returned.
    pub async fn next(&self, session: &SessionId) -> Option<NextItem> {
        let mut sessions = self.sessions.lock().await;
        let state = sessions.get_mut(session)?;
        match state.pending.pop_front() {
            Some(episode_id) => Some(NextItem {
                episode: state.episodes.get(&episode_id).cloned(),
                series: state.series.clone(),
                episode_id,
            }),
            None => {
                state.draining = false;
                None
            }
        }
    }

    pub async fn record_outcome(&self, session: &SessionId, record: ItemRecord) {
        let mut sessions = self.sessions.lock().await;
        sessions
            .entry(session.clone())
            .or_default()
            .outcomes
            .push(record);
    }

    pub async fn drain_status(&self, session: &SessionId) -> Option<DrainStatus> {
        let sessions = self.sessions.lock().await;
        sessions.get(session).map(|state| DrainStatus {
            phase: state.phase(),
            series: state.series.clone(),
            pending: state.pending.iter().cloned().collect(),
            outcomes: state.outcomes.clone(),
        })
    }

    pub async fn sessions(&self) -> Vec<SessionId> {
        let sessions = self.sessions.lock().await;
        let mut ids: Vec<SessionId> = sessions.keys().cloned().collect();
        ids.sort();
        ids
    }
}
