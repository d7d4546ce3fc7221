//! Subscription job scheduler for feedrelay.
//!
//! One live recurring job per subscription, keyed by
//! `(destination, subscription index)`. Every schedule change is a
//! cancel-then-install pair - a timer is never mutated in place, which
//! is what keeps a stale timer from surviving an edit and firing
//! duplicates.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use chrono_tz::Tz;
use tokio::sync::{watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cron::CronExpression;
use crate::store::SubscriptionStore;
use crate::{RelayError, Result};

/// Stable key for a subscription's recurring job.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobKey {
    /// Destination the subscription delivers to.
    pub destination: String,
    /// Subscription index within the destination's list.
    pub index: usize,
}

impl JobKey {
    /// Create a job key.
    pub fn new(destination: impl Into<String>, index: usize) -> Self {
        Self {
            destination: destination.into(),
            index,
        }
    }
}

impl fmt::Display for JobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.destination, self.index)
    }
}

/// What a fired job executes. Implemented by the delivery tick runner;
/// tests substitute counters.
#[async_trait]
pub trait JobRunner: Send + Sync {
    /// Run one tick for the given job.
    async fn run(&self, key: &JobKey);
}

/// A live job: its cancellation signal, timer task, and the busy mutex
/// serializing its ticks.
struct JobHandle {
    cancel: watch::Sender<bool>,
    task: JoinHandle<()>,
    busy: Arc<AsyncMutex<()>>,
}

impl JobHandle {
    /// Stop the timer. A tick already in flight is left to finish.
    fn cancel(self) {
        let _ = self.cancel.send(true);
        self.task.abort();
    }
}

/// Scheduler owning the live recurring jobs.
///
/// Explicitly constructed and passed to the command layer - never a
/// process-wide singleton.
pub struct Scheduler {
    timezone: Tz,
    jobs: Mutex<HashMap<JobKey, JobHandle>>,
}

impl Scheduler {
    /// Create a scheduler evaluating cron expressions in `timezone`.
    pub fn new(timezone: Tz) -> Self {
        Self {
            timezone,
            jobs: Mutex::new(HashMap::new()),
        }
    }

    /// Create a scheduler from an IANA timezone name.
    pub fn with_timezone(timezone: &str) -> Result<Self> {
        let tz: Tz = timezone
            .parse()
            .map_err(|_| RelayError::Config(format!("invalid timezone: {timezone}")))?;
        Ok(Self::new(tz))
    }

    /// Install a recurring job for `key`.
    ///
    /// An existing job under the same key is cancelled first and its
    /// timer released; the replacement only then becomes live. The
    /// per-job busy mutex carries over, so an in-flight tick of the old
    /// job still excludes the new job's first tick.
    ///
    /// Must be called from within a tokio runtime.
    pub fn install(&self, key: JobKey, cron: CronExpression, runner: Arc<dyn JobRunner>) {
        let mut jobs = self.jobs.lock().unwrap();

        let busy = match jobs.remove(&key) {
            Some(old) => {
                info!(job = %key, "replacing existing job");
                let busy = Arc::clone(&old.busy);
                old.cancel();
                busy
            }
            None => Arc::new(AsyncMutex::new(())),
        };

        let (cancel_tx, cancel_rx) = watch::channel(false);
        let task = tokio::spawn(run_timer(
            key.clone(),
            cron,
            self.timezone,
            runner,
            Arc::clone(&busy),
            cancel_rx,
        ));

        jobs.insert(
            key,
            JobHandle {
                cancel: cancel_tx,
                task,
                busy,
            },
        );
    }

    /// Cancel the job for `key`. Idempotent: an unknown key is a no-op.
    pub fn cancel(&self, key: &JobKey) {
        if let Some(handle) = self.jobs.lock().unwrap().remove(key) {
            info!(job = %key, "job cancelled");
            handle.cancel();
        }
    }

    /// Cancel every live job (shutdown path).
    pub fn cancel_all(&self) {
        let mut jobs = self.jobs.lock().unwrap();
        for (key, handle) in jobs.drain() {
            debug!(job = %key, "job cancelled at shutdown");
            handle.cancel();
        }
    }

    /// Whether a job is installed for `key`.
    pub fn has_job(&self, key: &JobKey) -> bool {
        self.jobs.lock().unwrap().contains_key(key)
    }

    /// Number of live jobs.
    pub fn job_count(&self) -> usize {
        self.jobs.lock().unwrap().len()
    }

    /// Re-install one job per persisted subscription.
    ///
    /// Called at startup so schedules survive a restart. A stored cron
    /// expression that no longer parses means the state record is
    /// inconsistent; polling must not start.
    pub async fn restore_all(
        &self,
        store: &SubscriptionStore,
        runner: Arc<dyn JobRunner>,
    ) -> Result<usize> {
        let jobs = store.all_jobs().await;
        let count = jobs.len();

        for (destination, index, cron) in jobs {
            let key = JobKey::new(destination, index);
            let cron = CronExpression::parse(&cron).map_err(|e| {
                RelayError::Storage(format!("stored cron for {key} is invalid: {e}"))
            })?;
            self.install(key, cron, Arc::clone(&runner));
        }

        info!(jobs = count, "schedules restored");
        Ok(count)
    }
}

/// Timer loop for one job.
///
/// Fire times are walked along the cron sequence itself; each sleep is
/// bounded by the nominal interval, so wall-clock reads cannot skew
/// the cadence. Every fire runs the tick in its own task - a slow
/// fetch never delays this timer or any other job.
async fn run_timer(
    key: JobKey,
    cron: CronExpression,
    timezone: Tz,
    runner: Arc<dyn JobRunner>,
    busy: Arc<AsyncMutex<()>>,
    mut cancel_rx: watch::Receiver<bool>,
) {
    let mut cursor = Utc::now().with_timezone(&timezone);

    loop {
        let Some(next) = cron.next_after(cursor) else {
            warn!(job = %key, cron = %cron, "schedule has no future fire times");
            return;
        };
        let until_next = next.signed_duration_since(Utc::now().with_timezone(&timezone));
        let nominal = next.signed_duration_since(cursor);
        let wait = until_next.min(nominal).to_std().unwrap_or_default();
        cursor = next;

        tokio::select! {
            _ = cancel_rx.changed() => {
                debug!(job = %key, "timer stopped");
                return;
            }
            _ = tokio::time::sleep(wait) => {
                match Arc::clone(&busy).try_lock_owned() {
                    Ok(guard) => {
                        let runner = Arc::clone(&runner);
                        let key = key.clone();
                        tokio::spawn(async move {
                            runner.run(&key).await;
                            drop(guard);
                        });
                    }
                    Err(_) => {
                        warn!(job = %key, "previous tick still in flight, skipping this tick");
                    }
                }
            }
        }
    }
}
