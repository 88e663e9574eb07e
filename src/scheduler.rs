//! Periodic ingestion with overlap prevention.
//!
//! At most one ingestion run is active at a time. A scheduled tick that
//! finds a run in progress is skipped; a manual trigger that finds one
//! returns [`TriggerOutcome::Coalesced`] instead of queueing a second run.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{watch, Mutex as AsyncMutex, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::config::IngestionConfig;
use crate::error::{AppError, Result};
use crate::ingest::{IngestReport, IngestionPipeline};

#[derive(Debug)]
pub enum TriggerOutcome {
    Completed(IngestReport),
    /// Another run was already active; no new run was started.
    Coalesced,
}

#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    pub running: bool,
    pub run_in_progress: bool,
    pub next_run_at: Option<DateTime<Utc>>,
    pub last_finished_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub last_report: Option<IngestReport>,
}

#[derive(Debug, Default)]
struct RunState {
    next_run_at: Option<DateTime<Utc>>,
    last_finished_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
    last_report: Option<IngestReport>,
}

pub struct Scheduler {
    pipeline: Arc<IngestionPipeline>,
    interval: Duration,
    run_on_start: bool,
    trigger_timeout: Duration,
    run_lock: Arc<AsyncMutex<()>>,
    state: Arc<Mutex<RunState>>,
    shutdown_tx: watch::Sender<bool>,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(pipeline: Arc<IngestionPipeline>, settings: &IngestionConfig) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            pipeline,
            interval: settings.interval(),
            run_on_start: settings.run_on_start,
            trigger_timeout: settings.manual_trigger_timeout(),
            run_lock: Arc::new(AsyncMutex::new(())),
            state: Arc::new(Mutex::new(RunState::default())),
            shutdown_tx,
            timer: Mutex::new(None),
        }
    }

    /// Overrides the configured interval. Must be non-zero.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_trigger_timeout(mut self, timeout: Duration) -> Self {
        self.trigger_timeout = timeout;
        self
    }

    /// Spawns the timer loop. Returns false if it was already started.
    pub fn start(&self) -> bool {
        let mut timer = self.timer.lock().unwrap_or_else(|e| e.into_inner());
        if timer.is_some() {
            return false;
        }

        let pipeline = self.pipeline.clone();
        let run_lock = self.run_lock.clone();
        let state = self.state.clone();
        let interval = self.interval;
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        let delay = if self.run_on_start {
            Duration::ZERO
        } else {
            interval
        };
        let first = Instant::now() + delay;
        set_next_run(&state, Some(Utc::now() + to_chrono(delay)));

        *timer = Some(tokio::spawn(async move {
            tracing::info!("Ingestion scheduler started (interval: {:?})", interval);
            let mut ticker = interval_at(first, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    _ = ticker.tick() => {
                        set_next_run(&state, Some(Utc::now() + to_chrono(interval)));
                        match run_lock.clone().try_lock_owned() {
                            Ok(guard) => {
                                let _ = run_exclusive(&pipeline, &state, guard).await;
                            }
                            Err(_) => {
                                tracing::info!("Skipping scheduled ingestion, a run is already in progress");
                            }
                        }
                    }
                }
            }

            set_next_run(&state, None);
            tracing::info!("Ingestion scheduler stopped");
        }));
        true
    }

    /// Stops the timer and waits for any in-flight run to finish.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);

        let handle = self
            .timer
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::error!("Scheduler task failed: {}", e);
            }
        }

        let _drained = self.run_lock.lock().await;
    }

    /// Runs ingestion now and waits for it, up to the trigger timeout.
    ///
    /// On timeout the run keeps going in the background and its report
    /// shows up in [`Scheduler::status`] once done.
    pub async fn trigger(&self) -> Result<TriggerOutcome> {
        let guard = match self.run_lock.clone().try_lock_owned() {
            Ok(guard) => guard,
            Err(_) => {
                tracing::info!("Manual ingestion coalesced into the active run");
                return Ok(TriggerOutcome::Coalesced);
            }
        };

        let pipeline = self.pipeline.clone();
        let state = self.state.clone();
        let handle = tokio::spawn(async move { run_exclusive(&pipeline, &state, guard).await });

        match tokio::time::timeout(self.trigger_timeout, handle).await {
            Ok(Ok(result)) => result.map(TriggerOutcome::Completed),
            Ok(Err(e)) => Err(AppError::Other(anyhow::anyhow!("ingestion task failed: {}", e))),
            Err(_) => {
                tracing::warn!(
                    "Manual ingestion still running after {:?}",
                    self.trigger_timeout
                );
                Err(AppError::Timeout(self.trigger_timeout))
            }
        }
    }

    pub fn status(&self) -> SchedulerStatus {
        let running = self
            .timer
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .is_some_and(|handle| !handle.is_finished());
        let run_in_progress = self.run_lock.try_lock().is_err();
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());

        SchedulerStatus {
            running,
            run_in_progress,
            next_run_at: state.next_run_at,
            last_finished_at: state.last_finished_at,
            last_error: state.last_error.clone(),
            last_report: state.last_report.clone(),
        }
    }
}

async fn run_exclusive(
    pipeline: &IngestionPipeline,
    state: &Mutex<RunState>,
    _guard: OwnedMutexGuard<()>,
) -> Result<IngestReport> {
    let result = pipeline.run().await;

    let mut state = state.lock().unwrap_or_else(|e| e.into_inner());
    state.last_finished_at = Some(Utc::now());
    match &result {
        Ok(report) => {
            state.last_error = None;
            state.last_report = Some(report.clone());
        }
        Err(e) => {
            tracing::error!("Ingestion run failed: {}", e);
            state.last_error = Some(e.to_string());
        }
    }
    result
}

fn set_next_run(state: &Mutex<RunState>, at: Option<DateTime<Utc>>) {
    state.lock().unwrap_or_else(|e| e.into_inner()).next_run_at = at;
}

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::zero())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SourceConfig;
    use crate::db::Repository;
    use crate::embedding::{HashingEmbedder, VectorCodec};
    use crate::feed::{FeedSource, RawItem};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Semaphore;

    /// Blocks every fetch until a permit is released.
    struct GatedSource {
        gate: Arc<Semaphore>,
        fetches: AtomicUsize,
    }

    impl GatedSource {
        fn new(gate: Arc<Semaphore>) -> Arc<Self> {
            Arc::new(Self {
                gate,
                fetches: AtomicUsize::new(0),
            })
        }

        fn fetches(&self) -> usize {
            self.fetches.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl FeedSource for GatedSource {
        async fn fetch_source(&self, source: &SourceConfig) -> Result<Vec<RawItem>> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            let _permit = self
                .gate
                .acquire()
                .await
                .map_err(|e| AppError::Other(e.into()))?;
            Ok(vec![RawItem {
                title: format!("{} headline", source.name),
                link: format!("https://news.example/{}/1", source.name),
                summary: "Markets rallied on strong earnings".to_string(),
                published_at: Some(Utc::now()),
                source_name: source.name.clone(),
                category: None,
            }])
        }
    }

    async fn scheduler(gate: Arc<Semaphore>, settings: IngestionConfig) -> Scheduler {
        scheduler_over(GatedSource::new(gate), settings).await
    }

    async fn scheduler_over(source: Arc<GatedSource>, settings: IngestionConfig) -> Scheduler {
        let repo = Arc::new(Repository::open_in_memory().await.unwrap());
        let codec = Arc::new(VectorCodec::new(
            Arc::new(HashingEmbedder::new().unwrap()),
            Duration::from_secs(5),
            100,
        ));
        let pipeline = IngestionPipeline::new(
            repo,
            codec,
            source,
            vec![SourceConfig::new("wire", "https://news.example/feed")],
            settings.clone(),
        );
        Scheduler::new(Arc::new(pipeline), &settings)
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    #[tokio::test]
    async fn trigger_waits_for_the_run() {
        let scheduler = scheduler(Arc::new(Semaphore::new(10)), IngestionConfig::default()).await;

        match scheduler.trigger().await.unwrap() {
            TriggerOutcome::Completed(report) => {
                assert_eq!(report.new_articles, 1);
                assert_eq!(report.embedded, 1);
            }
            TriggerOutcome::Coalesced => panic!("nothing else was running"),
        }

        let status = scheduler.status();
        assert!(!status.running);
        assert!(!status.run_in_progress);
        assert_eq!(status.last_report.map(|r| r.total_articles), Some(1));
    }

    #[tokio::test]
    async fn concurrent_trigger_is_coalesced() {
        let gate = Arc::new(Semaphore::new(0));
        let scheduler = Arc::new(scheduler(gate.clone(), IngestionConfig::default()).await);

        let first = tokio::spawn({
            let scheduler = scheduler.clone();
            async move { scheduler.trigger().await }
        });
        wait_until(|| scheduler.status().run_in_progress).await;

        assert!(matches!(
            scheduler.trigger().await.unwrap(),
            TriggerOutcome::Coalesced
        ));

        gate.add_permits(10);
        let outcome = first.await.unwrap().unwrap();
        assert!(matches!(outcome, TriggerOutcome::Completed(_)));
    }

    #[tokio::test]
    async fn slow_trigger_times_out_and_run_finishes_later() {
        let gate = Arc::new(Semaphore::new(0));
        let scheduler = scheduler(gate.clone(), IngestionConfig::default())
            .await
            .with_trigger_timeout(Duration::from_millis(50));

        let err = scheduler.trigger().await.unwrap_err();
        assert!(matches!(err, AppError::Timeout(_)));
        assert!(scheduler.status().run_in_progress);

        gate.add_permits(10);
        wait_until(|| {
            let status = scheduler.status();
            status.last_report.is_some() && !status.run_in_progress
        })
        .await;
    }

    #[tokio::test]
    async fn start_runs_immediately_and_shutdown_drains() {
        let gate = Arc::new(Semaphore::new(10));
        let settings = IngestionConfig {
            interval_minutes: 60,
            run_on_start: true,
            ..IngestionConfig::default()
        };
        let scheduler = scheduler(gate, settings).await;

        assert!(scheduler.start());
        assert!(!scheduler.start());
        wait_until(|| scheduler.status().last_report.is_some()).await;

        let status = scheduler.status();
        assert!(status.running);
        assert!(status.next_run_at.is_some_and(|at| at > Utc::now()));

        scheduler.shutdown().await;
        let status = scheduler.status();
        assert!(!status.running);
        assert!(status.next_run_at.is_none());
    }

    #[tokio::test]
    async fn delayed_start_does_not_run_until_interval() {
        let settings = IngestionConfig {
            interval_minutes: 60,
            run_on_start: false,
            ..IngestionConfig::default()
        };
        let scheduler = scheduler(Arc::new(Semaphore::new(10)), settings).await;

        scheduler.start();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(scheduler.status().last_report.is_none());

        scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn scheduled_ticks_are_skipped_while_a_run_is_active() {
        let gate = Arc::new(Semaphore::new(0));
        let source = GatedSource::new(gate.clone());
        let settings = IngestionConfig {
            run_on_start: false,
            ..IngestionConfig::default()
        };
        let scheduler = Arc::new(
            scheduler_over(source.clone(), settings)
                .await
                .with_interval(Duration::from_millis(20)),
        );

        let manual = tokio::spawn({
            let scheduler = scheduler.clone();
            async move { scheduler.trigger().await }
        });
        wait_until(|| scheduler.status().run_in_progress).await;

        assert!(scheduler.start());
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(source.fetches(), 1);
        assert!(scheduler.status().run_in_progress);

        let stopping = tokio::spawn({
            let scheduler = scheduler.clone();
            async move { scheduler.shutdown().await }
        });
        wait_until(|| scheduler.status().next_run_at.is_none()).await;

        gate.add_permits(10);
        let outcome = manual.await.unwrap().unwrap();
        assert!(matches!(outcome, TriggerOutcome::Completed(_)));
        stopping.await.unwrap();

        assert_eq!(source.fetches(), 1);
        assert!(!scheduler.status().running);
    }
}
