//! Scheduler (C10)
//!
//! Maintains a small set of named periodic tasks — `health_probe_tick`,
//! `feed_refresh_tick`, `backup_prune`, `query_log_rotate_check` — each
//! driven by its own `tokio::time::interval` and submitted through
//! [`crate::agents::BackgroundWorker`] so every run is named, observable,
//! and cancelled on shutdown like any other background task. Overlap is
//! handled with a per-task `AtomicBool` guard: a tick is skipped, never
//! queued, when the previous run of that task hasn't finished.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;

use crate::agents::BackgroundWorker;

pub const HEALTH_PROBE_TICK: &str = "health_probe_tick";
pub const FEED_REFRESH_TICK: &str = "feed_refresh_tick";
pub const BACKUP_PRUNE: &str = "backup_prune";
pub const QUERY_LOG_ROTATE_CHECK: &str = "query_log_rotate_check";

/// Owns one `AtomicBool` overlap guard per named task, plus the driver
/// loops that tick on their configured interval.
pub struct Scheduler {
    worker: BackgroundWorker,
    guards: DashMap<String, Arc<AtomicBool>>,
    skipped_ticks: DashMap<String, u64>,
    failure_counts: DashMap<String, u64>,
}

impl Scheduler {
    pub fn new(worker: BackgroundWorker) -> Self {
        Self {
            worker,
            guards: DashMap::new(),
            skipped_ticks: DashMap::new(),
            failure_counts: DashMap::new(),
        }
    }

    /// Register a named periodic task. `body` is invoked once per tick
    /// unless the previous invocation of the same name hasn't returned
    /// yet, in which case the tick is skipped and counted.
    pub fn schedule<F, Fut>(&self, name: impl Into<String>, interval: Duration, body: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let name = name.into();
        let guard = self.guards.entry(name.clone()).or_insert_with(|| Arc::new(AtomicBool::new(false))).clone();
        self.skipped_ticks.entry(name.clone()).or_insert(0);
        self.failure_counts.entry(name.clone()).or_insert(0);

        let worker = self.worker.clone();
        let body = Arc::new(body);
        let skipped = self.skipped_ticks.clone();
        let failures = self.failure_counts.clone();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                ticker.tick().await;

                if guard.swap(true, Ordering::SeqCst) {
                    tracing::debug!(task = %name, "skipping tick, previous run still in flight");
                    *skipped.entry(name.clone()).or_insert(0) += 1;
                    continue;
                }

                let guard_for_task = guard.clone();
                let body = body.clone();
                let failures_for_task = failures.clone();
                let task_name = name.clone();

                worker
                    .submit(name.clone(), move || async move {
                        let result = body().await;
                        if let Err(e) = &result {
                            tracing::warn!(task = %task_name, error = %e, "scheduled task failed");
                            *failures_for_task.entry(task_name.clone()).or_insert(0) += 1;
                        }
                        guard_for_task.store(false, Ordering::SeqCst);
                        result
                    })
                    .await;
            }
        });
    }

    pub fn skipped_ticks(&self, name: &str) -> u64 {
        self.skipped_ticks.get(name).map(|v| *v).unwrap_or(0)
    }

    pub fn failure_count(&self, name: &str) -> u64 {
        self.failure_counts.get(name).map(|v| *v).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use acton_reactive::prelude::ActonApp;
    use std::sync::atomic::AtomicU32;

    #[tokio::test]
    async fn test_overlap_is_skipped_not_queued() {
        let mut runtime = ActonApp::launch();
        let worker = BackgroundWorker::spawn(&mut runtime).await.unwrap();
        let scheduler = Scheduler::new(worker);

        let concurrent = Arc::new(AtomicU32::new(0));
        let max_concurrent = Arc::new(AtomicU32::new(0));

        let concurrent_for_task = concurrent.clone();
        let max_for_task = max_concurrent.clone();
        scheduler.schedule("slow_task", Duration::from_millis(10), move || {
            let concurrent = concurrent_for_task.clone();
            let max_concurrent = max_for_task.clone();
            async move {
                let now = concurrent.fetch_add(1, Ordering::SeqCst) + 1;
                max_concurrent.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(50)).await;
                concurrent.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            }
        });

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(max_concurrent.load(Ordering::SeqCst), 1);
        assert!(scheduler.skipped_ticks("slow_task") >= 1);
    }

    #[tokio::test]
    async fn test_failure_is_counted_and_does_not_stop_scheduler() {
        let mut runtime = ActonApp::launch();
        let worker = BackgroundWorker::spawn(&mut runtime).await.unwrap();
        let scheduler = Scheduler::new(worker);

        scheduler.schedule("failing_task", Duration::from_millis(10), || async { anyhow::bail!("boom") });

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(scheduler.failure_count("failing_task") >= 1);
    }
}
