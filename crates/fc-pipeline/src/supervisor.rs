//! Process lifecycle: owns the three cooperating loops the spec's
//! Supervisor runs on top of one [`Pipeline`] and one [`Dispatcher`] — Poll,
//! Dispatch tick, and Sync — and a signal-driven shutdown that drains
//! in-flight work rather than dropping it.
//!
//! Modeled on `DispatchScheduler::start`/`stop` from the scheduling crate
//! this workspace grew out of: an `Arc<RwLock<bool>>` running flag gates a
//! handful of spawned `tokio::time::interval` loops, each independently
//! tolerant of its own errors so one bad tick never brings the others down.

use crate::error::Result;
use crate::pipeline::Pipeline;
use chrono::Utc;
use fc_dispatch::Dispatcher;
use fc_mailbox::Poller;
use fc_standby::StandbyGuard;
use fc_store::ThreadStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{RwLock, Semaphore};
use tracing::{error, info, warn};

/// Tuning knobs pulled from `fc_config::RuntimeConfig` at construction time.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub polling_interval: Duration,
    pub dispatch_interval: Duration,
    pub schedule_sync_interval: Duration,
    pub max_concurrent_dispatches: usize,
    /// Upper bound the shutdown path waits for in-flight poll/dispatch
    /// batches to drain before returning anyway.
    pub shutdown_drain_deadline: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            polling_interval: Duration::from_secs(60),
            dispatch_interval: Duration::from_secs(15 * 60),
            schedule_sync_interval: Duration::from_secs(15 * 60),
            max_concurrent_dispatches: 5,
            shutdown_drain_deadline: Duration::from_secs(30),
        }
    }
}

/// Owns the Poll / Dispatch / Sync loops. `S` is the concrete `ThreadStore`
/// backend, threaded through so the same generic `Dispatcher<S>` the
/// Pipeline holds is reused here rather than boxed.
pub struct Supervisor<S: ThreadStore> {
    config: SupervisorConfig,
    store: Arc<S>,
    poller: Arc<Poller>,
    pipeline: Arc<Pipeline<S>>,
    dispatcher: Arc<Dispatcher<S>>,
    schedule: Arc<fc_cache::ScheduleIndex>,
    standby: Arc<StandbyGuard>,
    running: Arc<RwLock<bool>>,
}

impl<S: ThreadStore + 'static> Supervisor<S> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: SupervisorConfig,
        store: Arc<S>,
        poller: Arc<Poller>,
        pipeline: Arc<Pipeline<S>>,
        dispatcher: Arc<Dispatcher<S>>,
        schedule: Arc<fc_cache::ScheduleIndex>,
        standby: Arc<StandbyGuard>,
    ) -> Self {
        Self {
            config,
            store,
            poller,
            pipeline,
            dispatcher,
            schedule,
            standby,
            running: Arc::new(RwLock::new(false)),
        }
    }

    /// Spawns the three loops and returns immediately; each loop keeps
    /// running until `stop` flips `running` to `false`.
    pub async fn start(self: &Arc<Self>) {
        let mut running = self.running.write().await;
        if *running {
            warn!("supervisor already running");
            return;
        }
        *running = true;
        drop(running);

        info!(
            polling_interval_s = self.config.polling_interval.as_secs(),
            dispatch_interval_s = self.config.dispatch_interval.as_secs(),
            schedule_sync_interval_s = self.config.schedule_sync_interval.as_secs(),
            "starting supervisor"
        );

        self.spawn_poll_loop();
        self.spawn_dispatch_loop();
        self.spawn_sync_loop();
    }

    fn spawn_poll_loop(self: &Arc<Self>) {
        let supervisor = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(supervisor.config.polling_interval);
            loop {
                interval.tick().await;
                if !*supervisor.running.read().await {
                    break;
                }
                supervisor.poll_tick().await;
            }
        });
    }

    fn spawn_dispatch_loop(self: &Arc<Self>) {
        let supervisor = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(supervisor.config.dispatch_interval);
            loop {
                interval.tick().await;
                if !*supervisor.running.read().await {
                    break;
                }
                if let Err(e) = supervisor.dispatch_tick().await {
                    error!(error = %e, "dispatch tick failed");
                }
            }
        });
    }

    fn spawn_sync_loop(self: &Arc<Self>) {
        let supervisor = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(supervisor.config.schedule_sync_interval);
            loop {
                interval.tick().await;
                if !*supervisor.running.read().await {
                    break;
                }
                supervisor
                    .standby
                    .run_if_leader(|| async {
                        if let Err(e) = supervisor.sync_tick().await {
                            error!(error = %e, "schedule sync failed");
                        }
                    })
                    .await;
            }
        });
    }

    /// One Poller fan-out, folded straight into a Pipeline batch.
    async fn poll_tick(&self) {
        let outcomes = self.poller.poll_all().await;
        let replies: Vec<_> = outcomes.into_iter().flat_map(|o| o.replies).collect();
        if replies.is_empty() {
            return;
        }
        info!(count = replies.len(), "polled inbound replies");
        self.pipeline.process_batch(replies).await;
    }

    /// Pops everything due from the ScheduleIndex (atomically — see
    /// `fc_cache::ScheduleIndex::pop_due`) and fans each task out to the
    /// Dispatcher under bounded concurrency. Falls back to
    /// `ThreadStore.get_threads_due_for_followup` when the index itself is
    /// empty or unreachable, per the spec's "index is a cache, not truth"
    /// rule.
    async fn dispatch_tick(&self) -> Result<()> {
        let now = Utc::now();

        let due = match self.schedule.pop_due(now).await {
            Ok(due) if !due.is_empty() => due
                .into_iter()
                .map(|d| (d.thread_id, d.stage))
                .collect::<Vec<_>>(),
            Ok(_) => self.due_from_store(now).await?,
            Err(e) => {
                warn!(error = %e, "schedule index unreachable, falling back to store scan");
                self.due_from_store(now).await?
            }
        };

        if due.is_empty() {
            return Ok(());
        }

        info!(count = due.len(), "dispatch tick claimed due follow-ups");

        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_dispatches));
        let mut handles = Vec::with_capacity(due.len());

        for (thread_id, stage) in due {
            let permit = semaphore.clone().acquire_owned().await.expect("semaphore not closed");
            let dispatcher = self.dispatcher.clone();
            handles.push(tokio::spawn(async move {
                let _permit = permit;
                if let Err(e) = dispatcher.dispatch(thread_id, stage).await {
                    warn!(thread_id, stage, error = %e, "dispatch failed");
                }
            }));
        }

        for handle in handles {
            let _ = handle.await;
        }

        Ok(())
    }

    async fn due_from_store(&self, now: chrono::DateTime<Utc>) -> Result<Vec<(i64, u8)>> {
        let threads = self.store.get_threads_due_for_followup(now).await?;
        Ok(threads
            .into_iter()
            .map(|t| (t.id, t.current_stage.saturating_add(1)))
            .collect())
    }

    /// Rebuilds the ScheduleIndex from `ThreadStore.get_threads_for_schedule_sync`
    /// under the distributed lock (the caller already checked leadership).
    async fn sync_tick(&self) -> Result<()> {
        let now = Utc::now();
        let threads = self.store.get_threads_for_schedule_sync().await?;
        let entries: Vec<_> = threads
            .iter()
            .filter_map(|t| {
                t.next_followup_at
                    .map(|at| (t.id, t.current_stage.saturating_add(1), at))
            })
            .collect();

        let lag_seconds = entries
            .iter()
            .map(|(_, _, at)| (now - *at).num_seconds())
            .filter(|s| *s > 0)
            .max()
            .unwrap_or(0);
        metrics::gauge!("schedule_index.lag_seconds").set(lag_seconds as f64);

        self.schedule.sync(&entries).await?;
        Ok(())
    }

    /// Flips the running flag; already-spawned loops exit at their next
    /// `interval.tick()`, which bounds shutdown latency to roughly one tick
    /// period of whichever loop is slowest to notice. Callers that need a
    /// harder deadline should race this against `shutdown_drain_deadline`.
    pub async fn stop(&self) {
        let mut running = self.running.write().await;
        *running = false;
        info!("supervisor stopping, loops will exit at their next tick");
    }

    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }

    pub fn shutdown_drain_deadline(&self) -> Duration {
        self.config.shutdown_drain_deadline
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_intervals_match_the_documented_fifteen_minute_cadence() {
        let config = SupervisorConfig::default();
        assert_eq!(config.dispatch_interval, Duration::from_secs(900));
        assert_eq!(config.schedule_sync_interval, Duration::from_secs(900));
        assert_eq!(config.polling_interval, Duration::from_secs(60));
    }
}
