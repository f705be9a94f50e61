use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, info, warn};

use crate::config::HlsgrabConfig;
use crate::pipeline::{watch_url, EpisodeArtifacts, EpisodeJob, EpisodePipeline, PipelineError};

use super::store::{
    DrainStatus, EnqueueReceipt, ItemOutcome, ItemRecord, NextItem, SessionId, SessionStore,
};

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum QueueEvent {
    ItemStarted {
        session: SessionId,
        series: String,
        episode: String,
    },
    ItemSucceeded {
        session: SessionId,
        series: String,
        episode: String,
        artifacts: EpisodeArtifacts,
    },
    ItemFailed {
        session: SessionId,
        series: String,
        episode: String,
        cause: String,
    },
    BatchComplete {
        session: SessionId,
        succeeded: usize,
        failed: usize,
    },
}

impl QueueEvent {
    pub fn session(&self) -> &SessionId {
        match self {
            QueueEvent::ItemStarted { session, .. }
            | QueueEvent::ItemSucceeded { session, .. }
            | QueueEvent::ItemFailed { session, .. }
            | QueueEvent::BatchComplete { session, .. } => session,
        }
    }

    pub fn status_text(&self) -> String {
        match self {
            QueueEvent::ItemStarted {
                series, episode, ..
            } => format!("⏳ Downloading {series} {episode}…"),
            QueueEvent::ItemSucceeded {
                series, episode, ..
            } => format!("✅ Downloaded {series} {episode}"),
            QueueEvent::ItemFailed {
                series,
                episode,
                cause,
                ..
            } => format!("❌ Failed downloading {series} {episode}: {cause}"),
            QueueEvent::BatchComplete { failed: 0, .. } => "✅ All downloads complete!".into(),
            QueueEvent::BatchComplete {
                succeeded, failed, ..
            } => format!("✅ All downloads complete! ({succeeded} ok, {failed} failed)"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProcessorSettings {
    pub download_dir: PathBuf,
    pub watch_url_template: String,
}

impl ProcessorSettings {
    pub fn from_config(config: &HlsgrabConfig) -> Self {
        Self {
            download_dir: config.download_dir(),
            watch_url_template: config.site.watch_url_template.clone(),
        }
    }
}

/// Drains session queues one item at a time, reporting progress on an event channel.
pub struct QueueProcessor {
    store: Arc<SessionStore>,
    pipeline: Arc<dyn EpisodePipeline>,
    settings: ProcessorSettings,
    events: UnboundedSender<QueueEvent>,
}

impl QueueProcessor {
    pub fn new(
        store: Arc<SessionStore>,
        pipeline: Arc<dyn EpisodePipeline>,
        settings: ProcessorSettings,
    ) -> (Arc<Self>, UnboundedReceiver<QueueEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        let processor = Arc::new(Self {
            store,
            pipeline,
            settings,
            events,
        });
        (processor, receiver)
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    /// Appends `episode_ids` to the session queue and returns immediately. A drain task is
    /// spawned only when the session was idle.
    pub async fn enqueue_batch(
        self: &Arc<Self>,
        session: &SessionId,
        episode_ids: Vec<String>,
    ) -> EnqueueReceipt {
        let receipt = self.store.enqueue(session, episode_ids).await;
        debug!(
            session = %session,
            accepted = receipt.accepted,
            pending = receipt.pending,
            start_drain = receipt.start_drain,
            "batch enqueued"
        );
        if receipt.start_drain {
            let processor = Arc::clone(self);
            let session = session.clone();
            tokio::spawn(async move { processor.drain(session).await });
        }
        receipt
    }

    pub async fn drain_status(&self, session: &SessionId) -> Option<DrainStatus> {
        self.store.drain_status(session).await
    }

    async fn drain(self: Arc<Self>, session: SessionId) {
        info!(session = %session, "drain started");
        let mut succeeded = 0usize;
        let mut failed = 0usize;

        while let Some(item) = self.store.next(&session).await {
            let series = item
                .series
                .as_ref()
                .map(|series| series.name.clone())
                .unwrap_or_default();
            let episode = episode_label(&item);
            self.emit(QueueEvent::ItemStarted {
                session: session.clone(),
                series: series.clone(),
                episode: episode.clone(),
            });

            let outcome = self.run_item(&item).await;
            let event = match &outcome {
                ItemOutcome::Succeeded { artifacts } => {
                    succeeded += 1;
                    QueueEvent::ItemSucceeded {
                        session: session.clone(),
                        series,
                        episode,
                        artifacts: artifacts.clone(),
                    }
                }
                ItemOutcome::Failed { cause } => {
                    failed += 1;
                    warn!(session = %session, episode = %item.episode_id, cause = %cause, "episode failed");
                    QueueEvent::ItemFailed {
                        session: session.clone(),
                        series,
                        episode,
                        cause: cause.clone(),
                    }
                }
            };
            self.store
                .record_outcome(
                    &session,
                    ItemRecord {
                        episode_id: item.episode_id.clone(),
                        episode_number: item.episode.as_ref().map(|episode| episode.number),
                        outcome,
                        finished_at: Utc::now(),
                    },
                )
                .await;
            self.emit(event);
        }

        info!(session = %session, succeeded, failed, "drain finished");
        self.emit(QueueEvent::BatchComplete {
            session,
            succeeded,
            failed,
        });
    }

    async fn run_item(&self, item: &NextItem) -> ItemOutcome {
        let job = match self.build_job(item) {
            Ok(job) => job,
            Err(err) => {
                return ItemOutcome::Failed {
                    cause: err.short_cause(),
                }
            }
        };
        let pipeline = Arc::clone(&self.pipeline);
        let destination = self.settings.download_dir.clone();
        // A panicking pipeline must not leave the session stuck in the draining phase.
        let handle = tokio::spawn(async move { pipeline.run(job, &destination).await });
        match handle.await {
            Ok(Ok(artifacts)) => ItemOutcome::Succeeded { artifacts },
            Ok(Err(err)) => ItemOutcome::Failed {
                cause: err.short_cause(),
            },
            Err(err) => ItemOutcome::Failed {
                cause: format!("pipeline task aborted: {err}"),
            },
        }
    }

    fn build_job(&self, item: &NextItem) -> Result<EpisodeJob, PipelineError> {
        let series = item.series.as_ref().ok_or(PipelineError::NoSeriesSelected)?;
        let episode = item
            .episode
            .clone()
            .ok_or_else(|| PipelineError::UnknownEpisode {
                series: series.name.clone(),
                episode_id: item.episode_id.clone(),
            })?;
        let view_url = watch_url(&self.settings.watch_url_template, &series.id, &episode.id);
        Ok(EpisodeJob::new(view_url, series.name.clone(), episode))
    }

    fn emit(&self, event: QueueEvent) {
        if self.events.send(event).is_err() {
            debug!("queue event receiver dropped");
        }
    }
}

fn episode_label(item: &NextItem) -> String {
    match &item.episode {
        Some(episode) => format!("ep-{}", episode.number),
        None => format!("episode {}", item.episode_id),
    }
}
