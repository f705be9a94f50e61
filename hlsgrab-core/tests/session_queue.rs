use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::Mutex;
use tokio::time::timeout;

use hlsgrab_core::fetcher::FetchError;
use hlsgrab_core::session::{
    ItemOutcome, ProcessorSettings, QueueEvent, QueueProcessor, SessionId, SessionPhase,
    SessionStore,
};
use hlsgrab_core::{EpisodeArtifacts, EpisodeJob, EpisodePipeline, EpisodeRef, PipelineError, SeriesHit};

struct MockPipeline {
    failing: HashSet<u32>,
    delay: Duration,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    runs: Mutex<Vec<(String, String)>>,
}

impl MockPipeline {
    fn new(failing: &[u32], delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            failing: failing.iter().copied().collect(),
            delay,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            runs: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl EpisodePipeline for MockPipeline {
    async fn run(
        &self,
        job: EpisodeJob,
        destination_dir: &Path,
    ) -> Result<EpisodeArtifacts, PipelineError> {
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.runs
            .lock()
            .await
            .push((job.view_url.clone(), job.series_name.clone()));
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.failing.contains(&job.episode.number) {
            return Err(PipelineError::Fetch(FetchError::NoPlayableStream(
                "empty playlist".into(),
            )));
        }
        Ok(EpisodeArtifacts {
            video_path: job.file_names(destination_dir).video_path(),
            size_bytes: 1,
            subtitle_path: None,
        })
    }
}

fn settings() -> ProcessorSettings {
    ProcessorSettings {
        download_dir: "/downloads".into(),
        watch_url_template: "https://site.example/watch/{series}?ep={episode}".into(),
    }
}

fn episodes(count: u32) -> Vec<EpisodeRef> {
    (1..=count)
        .map(|number| EpisodeRef {
            id: format!("e{number}"),
            number,
            title: None,
        })
        .collect()
}

async fn select_show(store: &SessionStore, session: &SessionId, count: u32) {
    store
        .select_series(
            session,
            SeriesHit {
                id: "show-1".into(),
                name: "Show".into(),
            },
            episodes(count),
        )
        .await;
}

async fn collect_until_complete(events: &mut UnboundedReceiver<QueueEvent>) -> Vec<QueueEvent> {
    let mut collected = Vec::new();
    loop {
        let event = timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("drain did not finish")
            .expect("event channel closed");
        let done = matches!(event, QueueEvent::BatchComplete { .. });
        collected.push(event);
        if done {
            return collected;
        }
    }
}

#[tokio::test]
async fn failing_item_does_not_stop_the_batch() {
    let store = Arc::new(SessionStore::new());
    let session = SessionId::from("chat-7");
    select_show(&store, &session, 5).await;
    let pipeline = MockPipeline::new(&[3], Duration::from_millis(1));
    let (processor, mut events) =
        QueueProcessor::new(Arc::clone(&store), pipeline.clone(), settings());

    let ids: Vec<String> = (1..=5).map(|number| format!("e{number}")).collect();
    let receipt = processor.enqueue_batch(&session, ids.clone()).await;
    assert!(receipt.start_drain);
    assert_eq!(receipt.accepted, 5);

    let events = collect_until_complete(&mut events).await;
    let texts: Vec<String> = events.iter().map(QueueEvent::status_text).collect();
    assert_eq!(texts.len(), 11);
    assert_eq!(texts[0], "⏳ Downloading Show ep-1…");
    assert_eq!(texts[5], "❌ Failed downloading Show ep-3: no playable stream");
    assert!(matches!(
        events.last(),
        Some(QueueEvent::BatchComplete {
            succeeded: 4,
            failed: 1,
            ..
        })
    ));

    let status = processor.drain_status(&session).await.unwrap();
    assert_eq!(status.phase, SessionPhase::Idle);
    assert!(status.pending.is_empty());
    let recorded: Vec<&str> = status
        .outcomes
        .iter()
        .map(|record| record.episode_id.as_str())
        .collect();
    assert_eq!(recorded, ids.iter().map(String::as_str).collect::<Vec<_>>());
    assert!(!status.outcomes[2].outcome.is_success());
    assert!(status
        .outcomes
        .iter()
        .enumerate()
        .all(|(index, record)| index == 2 || record.outcome.is_success()));

    let runs = pipeline.runs.lock().await;
    assert_eq!(runs[0].0, "https://site.example/watch/show-1?ep=e1");
    assert_eq!(runs[0].1, "Show");
}

#[tokio::test]
async fn unknown_episode_is_reported_and_skipped() {
    let store = Arc::new(SessionStore::new());
    let session = SessionId::from("chat-8");
    select_show(&store, &session, 1).await;
    let pipeline = MockPipeline::new(&[], Duration::ZERO);
    let (processor, mut events) = QueueProcessor::new(store, pipeline.clone(), settings());

    processor
        .enqueue_batch(&session, vec!["ghost".into(), "e1".into()])
        .await;
    let events = collect_until_complete(&mut events).await;

    match &events[1] {
        QueueEvent::ItemFailed { episode, cause, .. } => {
            assert_eq!(episode, "episode ghost");
            assert!(cause.contains("not listed"));
        }
        other => panic!("unexpected event: {other:?}"),
    }
    assert!(matches!(events[3], QueueEvent::ItemSucceeded { .. }));
    assert_eq!(pipeline.runs.lock().await.len(), 1);
}

#[tokio::test]
async fn queue_without_series_fails_each_item() {
    let store = Arc::new(SessionStore::new());
    let session = SessionId::from("chat-9");
    let pipeline = MockPipeline::new(&[], Duration::ZERO);
    let (processor, mut events) = QueueProcessor::new(Arc::clone(&store), pipeline, settings());

    processor.enqueue_batch(&session, vec!["e1".into()]).await;
    collect_until_complete(&mut events).await;

    let status = store.drain_status(&session).await.unwrap();
    match &status.outcomes[0].outcome {
        ItemOutcome::Failed { cause } => assert_eq!(cause, "no series selected"),
        other => panic!("unexpected outcome: {other:?}"),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_enqueues_never_overlap_pipeline_runs() {
    let store = Arc::new(SessionStore::new());
    let session = SessionId::from("chat-busy");
    select_show(&store, &session, 24).await;
    let pipeline = MockPipeline::new(&[], Duration::from_millis(2));
    let (processor, mut events) =
        QueueProcessor::new(Arc::clone(&store), pipeline.clone(), settings());

    let mut callers = Vec::new();
    for batch in 0..8u32 {
        let processor = Arc::clone(&processor);
        let session = session.clone();
        callers.push(tokio::spawn(async move {
            let ids = (1..=3)
                .map(|offset| format!("e{}", batch * 3 + offset))
                .collect::<Vec<_>>();
            processor.enqueue_batch(&session, ids).await
        }));
    }
    for caller in callers {
        caller.await.unwrap();
    }

    let mut finished = 0;
    while finished < 24 {
        let event = timeout(Duration::from_secs(10), events.recv())
            .await
            .expect("items did not finish")
            .expect("event channel closed");
        if matches!(
            event,
            QueueEvent::ItemSucceeded { .. } | QueueEvent::ItemFailed { .. }
        ) {
            finished += 1;
        }
    }

    assert_eq!(pipeline.max_in_flight.load(Ordering::SeqCst), 1);
    assert_eq!(pipeline.runs.lock().await.len(), 24);
}

#[tokio::test]
async fn drain_status_reports_only_the_latest_batch() {
    let store = Arc::new(SessionStore::new());
    let session = SessionId::from("chat-repeat");
    select_show(&store, &session, 4).await;
    let pipeline = MockPipeline::new(&[4], Duration::ZERO);
    let (processor, mut events) = QueueProcessor::new(Arc::clone(&store), pipeline, settings());

    processor
        .enqueue_batch(&session, vec!["e1".into(), "e2".into()])
        .await;
    collect_until_complete(&mut events).await;
    processor
        .enqueue_batch(&session, vec!["e3".into(), "e4".into()])
        .await;
    let second = collect_until_complete(&mut events).await;

    let (succeeded, failed) = match second.last() {
        Some(QueueEvent::BatchComplete {
            succeeded, failed, ..
        }) => (*succeeded, *failed),
        other => panic!("unexpected event: {other:?}"),
    };
    let status = store.drain_status(&session).await.unwrap();
    assert_eq!(status.outcomes.len(), succeeded + failed);
    let recorded: Vec<&str> = status
        .outcomes
        .iter()
        .map(|record| record.episode_id.as_str())
        .collect();
    assert_eq!(recorded, vec!["e3", "e4"]);
    assert!(!status.outcomes[1].outcome.is_success());
}

#[tokio::test]
async fn sessions_drain_independently() {
    let store = Arc::new(SessionStore::new());
    let first = SessionId::from("a");
    let second = SessionId::from("b");
    select_show(&store, &first, 2).await;
    select_show(&store, &second, 2).await;
    let pipeline = MockPipeline::new(&[], Duration::from_millis(1));
    let (processor, mut events) = QueueProcessor::new(Arc::clone(&store), pipeline, settings());

    processor
        .enqueue_batch(&first, vec!["e1".into(), "e2".into()])
        .await;
    processor.enqueue_batch(&second, vec!["e1".into()]).await;

    let mut completed = HashSet::new();
    while completed.len() < 2 {
        let event = timeout(Duration::from_secs(5), events.recv())
            .await
            .unwrap()
            .unwrap();
        if let QueueEvent::BatchComplete { session, .. } = event {
            completed.insert(session);
        }
    }
    assert_eq!(store.drain_status(&first).await.unwrap().outcomes.len(), 2);
    assert_eq!(store.drain_status(&second).await.unwrap().outcomes.len(), 1);
}
