//! Periodic and on-demand sweeps with at most one sweep in flight.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::Serialize;
use tokio::sync::{watch, RwLock};
use tokio::time::MissedTickBehavior;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{debug, error, info};

use crate::notify::{FailureNotifier, Notification};
use crate::pipeline::{IngestPipeline, SweepReport};

/// Single-flight latch shared by the timer, cron jobs and manual triggers.
#[derive(Debug, Default)]
pub struct SweepGate {
    running: AtomicBool,
}

impl SweepGate {
    pub fn try_acquire(self: &Arc<Self>) -> Option<SweepPermit> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()?;
        Some(SweepPermit { gate: self.clone() })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

/// Releases the gate on drop, including when the sweep task panics.
#[derive(Debug)]
pub struct SweepPermit {
    gate: Arc<SweepGate>,
}

impl Drop for SweepPermit {
    fn drop(&mut self) {
        self.gate.running.store(false, Ordering::Release);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerOutcome {
    Started,
    AlreadyRunning,
    ShuttingDown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerState {
    Idle,
    Running,
    CancelRequested,
    Stopped,
}

struct Inner {
    pipeline: IngestPipeline,
    gate: Arc<SweepGate>,
    notifier: Arc<dyn FailureNotifier>,
    last_report: RwLock<Option<SweepReport>>,
    state: watch::Sender<SchedulerState>,
    cancel: watch::Sender<bool>,
    interval: Duration,
}

#[derive(Clone)]
pub struct IngestScheduler {
    inner: Arc<Inner>,
}

impl IngestScheduler {
    pub fn new(pipeline: IngestPipeline, notifier: Arc<dyn FailureNotifier>, interval: Duration) -> Self {
        let (state, _) = watch::channel(SchedulerState::Idle);
        let (cancel, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                pipeline,
                gate: Arc::new(SweepGate::default()),
                notifier,
                last_report: RwLock::new(None),
                state,
                cancel,
                interval,
            }),
        }
    }

    pub fn state(&self) -> SchedulerState {
        *self.inner.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SchedulerState> {
        self.inner.state.subscribe()
    }

    pub async fn last_report(&self) -> Option<SweepReport> {
        self.inner.last_report.read().await.clone()
    }

    pub fn is_sweeping(&self) -> bool {
        self.inner.gate.is_running()
    }

    /// Starts a sweep in the background unless one is already running or
    /// shutdown has been requested.
    pub fn request_sweep(&self) -> TriggerOutcome {
        if *self.inner.cancel.borrow() {
            debug!("sweep requested after shutdown");
            return TriggerOutcome::ShuttingDown;
        }
        let Some(permit) = self.inner.gate.try_acquire() else {
            debug!("sweep requested while one is in flight");
            return TriggerOutcome::AlreadyRunning;
        };
        let this = self.clone();
        tokio::spawn(async move {
            this.sweep_with(permit).await;
        });
        TriggerOutcome::Started
    }

    /// Runs a sweep inline. `None` when another sweep holds the gate or the
    /// sweep failed as a whole.
    pub async fn sweep_now(&self) -> Option<SweepReport> {
        let permit = self.inner.gate.try_acquire()?;
        self.sweep_with(permit).await
    }

    /// The pipeline runs on its own task so a panic inside it surfaces as a
    /// failed sweep instead of unwinding the caller.
    async fn sweep_with(&self, permit: SweepPermit) -> Option<SweepReport> {
        self.inner.state.send_if_modified(|state| {
            if *state == SchedulerState::Idle {
                *state = SchedulerState::Running;
                return true;
            }
            false
        });

        let this = self.clone();
        let result = match tokio::spawn(async move { this.inner.pipeline.run_sweep().await }).await {
            Ok(result) => result,
            Err(err) => Err(anyhow!("sweep task aborted: {err}")),
        };

        self.inner.state.send_if_modified(|state| {
            if *state == SchedulerState::Running {
                *state = SchedulerState::Idle;
                return true;
            }
            false
        });

        match result {
            Ok(report) => {
                *self.inner.last_report.write().await = Some(report.clone());
                Some(report)
            }
            Err(err) => {
                drop(permit);
                let message = format!("{err:#}");
                error!(error = %message, "sweep failed");
                self.inner.notifier.notify(&Notification::server_error(message)).await;
                None
            }
        }
    }

    /// Sweeps on every interval tick until [`IngestScheduler::shutdown`]. A
    /// sweep in flight when shutdown is requested runs to completion.
    pub async fn run(&self) {
        let mut cancel = self.inner.cancel.subscribe();
        let mut ticker = tokio::time::interval(self.inner.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(interval_secs = self.inner.interval.as_secs(), "ingest loop started");

        loop {
            if *cancel.borrow_and_update() {
                break;
            }
            tokio::select! {
                biased;
                changed = cancel.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    if self.sweep_now().await.is_none() && self.is_sweeping() {
                        debug!("tick skipped; sweep already running");
                    }
                }
            }
        }

        self.inner.state.send_replace(SchedulerState::Stopped);
        info!("ingest loop stopped");
    }

    pub fn shutdown(&self) {
        self.inner.state.send_if_modified(|state| {
            if *state == SchedulerState::Stopped {
                return false;
            }
            *state = SchedulerState::CancelRequested;
            true
        });
        self.inner.cancel.send_replace(true);
    }

    /// Cron-driven triggers alongside the interval loop.
    pub async fn maybe_build_cron(&self, cron: Option<&str>) -> Result<Option<JobScheduler>> {
        let Some(cron) = cron else {
            return Ok(None);
        };

        let sched = JobScheduler::new().await.context("creating scheduler")?;
        let this = self.clone();
        let job = Job::new_async(cron, move |_uuid, _l| {
            let this = this.clone();
            Box::pin(async move {
                let outcome = this.request_sweep();
                info!(?outcome, "cron sweep trigger");
            })
        })
        .with_context(|| format!("creating scheduler job for cron {cron}"))?;
        sched.add(job).await.context("adding scheduler job")?;
        Ok(Some(sched))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{api_match, entity, RecordingNotifier};
    use async_trait::async_trait;
    use lstats_adapters::{Canonicalizer, FeedError, FeedFixture, FixtureMatchFeed, MatchFeed, MatchRef};
    use lstats_core::TrackedEntity;
    use lstats_storage::MemoryMatchStore;
    use serde_json::Value;
    use tokio::sync::Notify;
    use tokio::time::Instant;

    fn alpha_feed() -> FixtureMatchFeed {
        FixtureMatchFeed::new(FeedFixture {
            histories: [("alpha".to_string(), vec!["NA1_2".to_string(), "NA1_1".to_string()])].into(),
            matches: [
                ("NA1_2".to_string(), api_match(2)),
                ("NA1_1".to_string(), api_match(1)),
            ]
            .into(),
            ..Default::default()
        })
    }

    fn scheduler_with_feed(
        store: Arc<MemoryMatchStore>,
        feed: Arc<dyn MatchFeed>,
        notifier: Arc<dyn FailureNotifier>,
        interval: Duration,
    ) -> IngestScheduler {
        let pipeline = IngestPipeline::new(store, feed, Arc::new(Canonicalizer::default()));
        IngestScheduler::new(pipeline, notifier, interval)
    }

    fn scheduler(store: Arc<MemoryMatchStore>, notifier: Arc<dyn FailureNotifier>, interval: Duration) -> IngestScheduler {
        scheduler_with_feed(store, Arc::new(alpha_feed()), notifier, interval)
    }

    /// Records when each sweep reads history; the first read can be slowed
    /// down to make that sweep overrun the interval.
    struct PacedFeed {
        inner: FixtureMatchFeed,
        first_read_delay: Duration,
        reads: std::sync::Mutex<Vec<Instant>>,
    }

    impl PacedFeed {
        fn new(first_read_delay: Duration) -> Self {
            Self {
                inner: alpha_feed(),
                first_read_delay,
                reads: std::sync::Mutex::new(Vec::new()),
            }
        }

        fn read_offsets_secs(&self, origin: Instant) -> Vec<u64> {
            self.reads
                .lock()
                .unwrap()
                .iter()
                .map(|at| at.duration_since(origin).as_secs())
                .collect()
        }
    }

    #[async_trait]
    impl MatchFeed for PacedFeed {
        fn feed_id(&self) -> &'static str {
            "paced"
        }

        async fn history_page(
            &self,
            entity: &TrackedEntity,
            start: usize,
            count: usize,
        ) -> Result<Vec<MatchRef>, FeedError> {
            let first = {
                let mut reads = self.reads.lock().unwrap();
                reads.push(Instant::now());
                reads.len() == 1
            };
            if first {
                tokio::time::sleep(self.first_read_delay).await;
            }
            self.inner.history_page(entity, start, count).await
        }

        async fn load_match(&self, match_ref: &MatchRef) -> Result<Value, FeedError> {
            self.inner.load_match(match_ref).await
        }
    }

    struct PanickingFeed;

    #[async_trait]
    impl MatchFeed for PanickingFeed {
        fn feed_id(&self) -> &'static str {
            "panicking"
        }

        async fn history_page(&self, _: &TrackedEntity, _: usize, _: usize) -> Result<Vec<MatchRef>, FeedError> {
            panic!("history page blew up");
        }

        async fn load_match(&self, match_ref: &MatchRef) -> Result<Value, FeedError> {
            Err(FeedError::NotFound(match_ref.key.clone()))
        }
    }

    /// Holds every notification open until released.
    #[derive(Default)]
    struct BlockingNotifier {
        entered: Notify,
        release: Notify,
    }

    #[async_trait]
    impl FailureNotifier for BlockingNotifier {
        async fn notify(&self, _: &Notification) {
            self.entered.notify_one();
            self.release.notified().await;
        }
    }

    async fn wait_for_report(scheduler: &IngestScheduler) -> SweepReport {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if let Some(report) = scheduler.last_report().await {
                    return report;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("sweep finished")
    }

    #[test]
    fn permit_releases_the_gate_on_drop() {
        let gate = Arc::new(SweepGate::default());
        let permit = gate.try_acquire().unwrap();
        assert!(gate.try_acquire().is_none());
        drop(permit);
        assert!(!gate.is_running());
        assert!(gate.try_acquire().is_some());
    }

    #[tokio::test]
    async fn overlapping_triggers_run_one_sweep() {
        let store = Arc::new(MemoryMatchStore::with_entities([entity(1, "alpha", None)]));
        let scheduler = scheduler(store.clone(), Arc::new(RecordingNotifier::default()), Duration::from_secs(3600));

        assert_eq!(scheduler.request_sweep(), TriggerOutcome::Started);
        assert_eq!(scheduler.request_sweep(), TriggerOutcome::AlreadyRunning);
        assert!(scheduler.sweep_now().await.is_none());

        let report = wait_for_report(&scheduler).await;
        assert_eq!(report.stored(), 2);
        assert_eq!(store.len().await, 2);
    }

    #[tokio::test]
    async fn sweep_failure_is_reported_and_the_next_sweep_runs() {
        let store = Arc::new(MemoryMatchStore::with_entities([entity(1, "alpha", None)]));
        let notifier = Arc::new(RecordingNotifier::default());
        let scheduler = scheduler(store.clone(), notifier.clone(), Duration::from_secs(3600));

        store.set_unavailable(true).await;
        assert!(scheduler.sweep_now().await.is_none());
        {
            let seen = notifier.seen.lock().await;
            assert_eq!(seen.len(), 1);
            assert_eq!(seen[0].title, "Server Error");
            assert!(seen[0].body.contains("listing tracked entities"));
        }

        store.set_unavailable(false).await;
        let report = scheduler.sweep_now().await.unwrap();
        assert_eq!(report.stored(), 2);
        assert_eq!(scheduler.state(), SchedulerState::Idle);
    }

    #[tokio::test]
    async fn shutdown_stops_the_loop() {
        let store = Arc::new(MemoryMatchStore::with_entities([entity(1, "alpha", None)]));
        let scheduler = scheduler(store, Arc::new(RecordingNotifier::default()), Duration::from_secs(3600));

        let handle = tokio::spawn({
            let scheduler = scheduler.clone();
            async move { scheduler.run().await }
        });
        wait_for_report(&scheduler).await;

        scheduler.shutdown();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("loop exits")
            .unwrap();
        assert_eq!(scheduler.state(), SchedulerState::Stopped);
    }

    #[tokio::test]
    async fn triggers_are_refused_after_shutdown() {
        let store = Arc::new(MemoryMatchStore::with_entities([entity(1, "alpha", None)]));
        let scheduler = scheduler(store.clone(), Arc::new(RecordingNotifier::default()), Duration::from_secs(3600));

        scheduler.shutdown();
        assert_eq!(scheduler.request_sweep(), TriggerOutcome::ShuttingDown);
        assert!(!scheduler.is_sweeping());
        assert_eq!(store.len().await, 0);
    }

    #[tokio::test]
    async fn slow_alert_does_not_hold_the_gate() {
        let store = Arc::new(MemoryMatchStore::with_entities([entity(1, "alpha", None)]));
        let notifier = Arc::new(BlockingNotifier::default());
        let scheduler = scheduler(store.clone(), notifier.clone(), Duration::from_secs(3600));

        store.set_unavailable(true).await;
        assert_eq!(scheduler.request_sweep(), TriggerOutcome::Started);
        notifier.entered.notified().await;
        assert!(!scheduler.is_sweeping());

        store.set_unavailable(false).await;
        let report = scheduler.sweep_now().await.expect("gate is free while alerting");
        assert_eq!(report.stored(), 2);
        notifier.release.notify_one();
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_sweep_is_reported_and_the_loop_keeps_ticking() {
        let store = Arc::new(MemoryMatchStore::with_entities([entity(1, "alpha", None)]));
        let notifier = Arc::new(RecordingNotifier::default());
        let scheduler = scheduler_with_feed(store, Arc::new(PanickingFeed), notifier.clone(), Duration::from_secs(10));

        let handle = tokio::spawn({
            let scheduler = scheduler.clone();
            async move { scheduler.run().await }
        });
        tokio::time::sleep(Duration::from_secs(25)).await;

        {
            let seen = notifier.seen.lock().await;
            assert_eq!(seen.len(), 3);
            assert!(seen[0].body.contains("panicked"));
        }
        assert!(!handle.is_finished());
        assert!(!scheduler.is_sweeping());
        assert_eq!(scheduler.state(), SchedulerState::Idle);

        scheduler.shutdown();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn sweeps_run_once_per_interval() {
        let store = Arc::new(MemoryMatchStore::with_entities([entity(1, "alpha", None)]));
        let feed = Arc::new(PacedFeed::new(Duration::ZERO));
        let scheduler = scheduler_with_feed(
            store,
            feed.clone(),
            Arc::new(RecordingNotifier::default()),
            Duration::from_secs(10),
        );
        let origin = Instant::now();

        let handle = tokio::spawn({
            let scheduler = scheduler.clone();
            async move { scheduler.run().await }
        });
        tokio::time::sleep(Duration::from_secs(25)).await;
        assert_eq!(feed.read_offsets_secs(origin), vec![0, 10, 20]);

        scheduler.shutdown();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn overrunning_sweep_delays_the_next_tick_without_a_burst() {
        let store = Arc::new(MemoryMatchStore::with_entities([entity(1, "alpha", None)]));
        let feed = Arc::new(PacedFeed::new(Duration::from_secs(25)));
        let scheduler = scheduler_with_feed(
            store,
            feed.clone(),
            Arc::new(RecordingNotifier::default()),
            Duration::from_secs(10),
        );
        let origin = Instant::now();

        let handle = tokio::spawn({
            let scheduler = scheduler.clone();
            async move { scheduler.run().await }
        });
        tokio::time::sleep(Duration::from_secs(40)).await;
        // Ticks missed during the 25s sweep collapse into one at 25s.
        assert_eq!(feed.read_offsets_secs(origin), vec![0, 25, 35]);

        scheduler.shutdown();
        handle.await.unwrap();
    }
}
