// src/pipeline/scheduler.rs

//! Poll scheduling.
//!
//! Invokes the pipeline on a fixed wall-clock interval with a state
//! machine of Idle → Running → {Succeeded, Failed} → Idle. Only one run
//! is ever active: a tick that fires while a run is in flight is
//! skipped, not queued. Successful runs hand the new listings to the
//! dispatcher; failed runs are retried on the next tick with no manual
//! intervention.

use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use crate::models::RunStatus;
use crate::pipeline::run::{Pipeline, RunOutcome};
use crate::services::Dispatcher;

/// Scheduler lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Running,
    Succeeded,
    Failed,
}

/// Periodic pipeline driver.
pub struct PollScheduler {
    pipeline: Pipeline,
    dispatcher: Dispatcher,
    interval: Duration,
    state: SchedulerState,
    runs: usize,
}

impl PollScheduler {
    pub fn new(pipeline: Pipeline, dispatcher: Dispatcher, interval_mins: u64) -> Self {
        Self {
            pipeline,
            dispatcher,
            interval: Duration::from_secs(interval_mins * 60),
            state: SchedulerState::Idle,
            runs: 0,
        }
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    /// Run the polling loop until the shutdown signal fires.
    ///
    /// The first tick fires immediately; subsequent ticks follow the
    /// configured interval. Because the run is awaited inside the loop,
    /// overlapping ticks collapse into skipped ones.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        log::info!(
            "Scheduler started: polling every {} minutes",
            self.interval.as_secs() / 60
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick(&mut shutdown).await;
                    if *shutdown.borrow() {
                        break;
                    }
                }
                _ = shutdown.changed() => break,
            }
        }

        log::info!("Scheduler stopped after {} runs", self.runs);
    }

    /// One scheduled invocation: run the pipeline, record the outcome,
    /// dispatch new listings on success.
    pub async fn tick(&mut self, shutdown: &mut watch::Receiver<bool>) -> RunStatus {
        self.state = SchedulerState::Running;
        self.runs += 1;
        log::info!("=== Run #{} starting ===", self.runs);

        let outcome = self.pipeline.execute(shutdown).await;
        let status = outcome.report.status;

        match status {
            RunStatus::Success => {
                self.state = SchedulerState::Succeeded;
                self.dispatch(&outcome).await;
            }
            _ => {
                self.state = SchedulerState::Failed;
            }
        }

        log::info!(
            "=== Run #{} {}: {} found, {} new, {} updated ===",
            self.runs,
            status.as_str(),
            outcome.report.listings_found,
            outcome.report.new_count,
            outcome.report.updated_count
        );

        self.state = SchedulerState::Idle;
        status
    }

    async fn dispatch(&self, outcome: &RunOutcome) {
        let new = &outcome.reconciliation.new;
        if new.is_empty() || !self.dispatcher.has_handlers() {
            return;
        }

        log::info!("Dispatching {} new listings", new.len());
        let result = self.dispatcher.dispatch_new(new).await;
        if result.failures > 0 {
            log::warn!(
                "Dispatch finished with {} of {} listings failing",
                result.failures,
                result.dispatched
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    use async_trait::async_trait;

    use crate::error::{AppError, Result};
    use crate::models::Config;
    use crate::services::Materializer;
    use crate::storage::{ListingStore, MemoryStore};

    struct StaticMarkup(&'static str);

    #[async_trait]
    impl Materializer for StaticMarkup {
        async fn materialize(
            &self,
            _feed_url: &str,
            _known_links: &HashSet<String>,
            _shutdown: &mut watch::Receiver<bool>,
        ) -> Result<String> {
            Ok(self.0.to_string())
        }
    }

    struct BrokenFeed;

    #[async_trait]
    impl Materializer for BrokenFeed {
        async fn materialize(
            &self,
            feed_url: &str,
            _known_links: &HashSet<String>,
            _shutdown: &mut watch::Receiver<bool>,
        ) -> Result<String> {
            Err(AppError::fetch(feed_url, "boom"))
        }
    }

    fn scheduler_with(materializer: Arc<dyn Materializer>) -> PollScheduler {
        let config = Arc::new(Config::default());
        let store = Arc::new(MemoryStore::new()) as Arc<dyn ListingStore>;
        let pipeline = Pipeline::new(Arc::clone(&config), materializer, store);
        let dispatcher = Dispatcher::new(&config);
        PollScheduler::new(pipeline, dispatcher, 5)
    }

    #[tokio::test]
    async fn test_tick_returns_to_idle_on_success() {
        let html = r#"<li><a href="/iad/immobilien/x?adId=1">W</a></li>"#;
        let mut scheduler = scheduler_with(Arc::new(StaticMarkup(html)));
        let (_tx, mut shutdown) = watch::channel(false);

        assert_eq!(scheduler.state(), SchedulerState::Idle);
        let status = scheduler.tick(&mut shutdown).await;
        assert_eq!(status, RunStatus::Success);
        assert_eq!(scheduler.state(), SchedulerState::Idle);
    }

    #[tokio::test]
    async fn test_tick_records_failure_and_recovers() {
        let mut scheduler = scheduler_with(Arc::new(BrokenFeed));
        let (_tx, mut shutdown) = watch::channel(false);

        let status = scheduler.tick(&mut shutdown).await;
        assert_eq!(status, RunStatus::Failed);
        // Back to idle: the next tick retries from a clean baseline.
        assert_eq!(scheduler.state(), SchedulerState::Idle);
    }

    #[tokio::test]
    async fn test_run_exits_on_shutdown() {
        let mut scheduler = scheduler_with(Arc::new(BrokenFeed));
        let (tx, shutdown) = watch::channel(false);

        let driver = async move {
            scheduler.run(shutdown).await;
        };
        // Let the immediate first tick happen, then signal shutdown.
        let signal = async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            tx.send(true).unwrap();
        };

        tokio::time::timeout(Duration::from_secs(2), async move {
            tokio::join!(driver, signal);
        })
        .await
        .expect("scheduler should stop promptly");
    }
}
