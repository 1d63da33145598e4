//! Periodic background backups.
//!
//! The scheduler owns a single tokio task. Between runs it sleeps in short
//! ticks while watching a [`CancellationToken`], so a stop request is seen
//! within one tick. Failed runs (errors or panics) are logged and retried
//! after a fixed backoff; they never end the loop.

use crate::error::Result;
use futures::FutureExt;
use gymvault_config::BackupConfig;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// How often, and how patiently, the scheduler runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleTiming {
    /// Time between two scheduled backups.
    pub interval: Duration,
    /// Granularity of the wait between backups.
    pub tick: Duration,
    /// Wait before retrying after a failed backup.
    pub backoff: Duration,
    /// How long a stop waits for the task before giving up on it.
    pub stop_timeout: Duration,
}
impl ScheduleTiming {
    pub fn every(interval: Duration) -> Self {
        Self {
            interval,
            tick: Duration::from_secs(1),
            backoff: Duration::from_secs(60),
            stop_timeout: Duration::from_secs(5),
        }
    }
}
impl From<&BackupConfig> for ScheduleTiming {
    fn from(config: &BackupConfig) -> Self {
        Self::every(config.interval())
    }
}

enum State {
    Stopped,
    Running { token: CancellationToken, handle: JoinHandle<()> },
    StopRequested,
}

/// Start/stop control over one background backup task.
///
/// Starting while a task is alive does nothing. A task that has finished or
/// crashed is replaced by a fresh one on the next start. Dropping the
/// scheduler cancels the task.
pub struct Scheduler {
    timing: ScheduleTiming,
    state: Mutex<State>,
}

impl Scheduler {
    pub fn new(timing: ScheduleTiming) -> Self {
        Self { timing, state: Mutex::new(State::Stopped) }
    }

    pub fn timing(&self) -> ScheduleTiming {
        self.timing
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether a background task is currently alive.
    pub fn is_running(&self) -> bool {
        matches!(&*self.state(), State::Running { handle, .. } if !handle.is_finished())
    }

    /// Spawn the background task, calling `job` once per interval.
    ///
    /// Returns `false` when a task was already running (or stopping) and
    /// nothing was spawned. Must be called from within a tokio runtime.
    pub fn start<F, Fut>(&self, job: F) -> bool
    where
        F: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let mut state = self.state();
        match &*state {
            State::Running { handle, .. } if !handle.is_finished() => return false,
            State::StopRequested => return false,
            _ => {},
        }
        let token = CancellationToken::new();
        let handle = tokio::spawn(run(job, token.clone(), self.timing));
        *state = State::Running { token, handle };
        true
    }

    /// Cancel the background task and wait for it, at most `stop_timeout`.
    ///
    /// Returns `false` if there was nothing to stop. Only the wait between
    /// runs is cancelled: a run in progress is never interrupted. If it does
    /// not finish in time the task is detached, left to complete that run on
    /// its own, and the scheduler is considered stopped regardless.
    pub async fn stop(&self) -> bool {
        let (token, handle) = {
            let mut state = self.state();
            match std::mem::replace(&mut *state, State::StopRequested) {
                State::Running { token, handle } => (token, handle),
                other => {
                    *state = other;
                    return false;
                },
            }
        };
        token.cancel();
        // On timeout the handle is dropped, which detaches the task.
        match tokio::time::timeout(self.timing.stop_timeout, handle).await {
            Ok(Ok(())) => {},
            Ok(Err(e)) => tracing::warn!(error = %e, "Scheduled backup task ended abnormally"),
            Err(_) => tracing::warn!(
                timeout = ?self.timing.stop_timeout,
                "Scheduled backup still running; leaving it to finish in the background"
            ),
        }
        *self.state() = State::Stopped;
        true
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        if let State::Running { token, .. } = &*self.state() {
            token.cancel();
        }
    }
}

async fn run<F, Fut>(job: F, token: CancellationToken, timing: ScheduleTiming)
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<()>>,
{
    tracing::info!(interval = ?timing.interval, "Scheduled backups started");
    let mut wait = timing.interval;
    while sleep_unless_cancelled(&token, wait, timing.tick).await {
        wait = match AssertUnwindSafe(job()).catch_unwind().await {
            Ok(Ok(())) => timing.interval,
            Ok(Err(e)) => {
                tracing::warn!(error = ?e, backoff = ?timing.backoff, "Scheduled backup failed");
                timing.backoff
            },
            Err(panic) => {
                tracing::error!(panic = panic_message(&*panic), backoff = ?timing.backoff, "Scheduled backup panicked");
                timing.backoff
            },
        };
    }
    tracing::info!("Scheduled backups stopped");
}

/// Sleep for `total` in steps of at most `tick`.
///
/// Returns `false` as soon as `token` is cancelled.
async fn sleep_unless_cancelled(token: &CancellationToken, total: Duration, tick: Duration) -> bool {
    let deadline = Instant::now() + total;
    loop {
        let now = Instant::now();
        if now >= deadline {
            return !token.is_cancelled();
        }
        tokio::select! {
            biased;
            _ = token.cancelled() => return false,
            _ = tokio::time::sleep(tick.min(deadline - now)) => {},
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn timing() -> ScheduleTiming {
        ScheduleTiming {
            interval: Duration::from_secs(10),
            tick: Duration::from_secs(1),
            backoff: Duration::from_secs(3),
            stop_timeout: Duration::from_secs(5),
        }
    }

    fn counting(counter: &Arc<AtomicUsize>) -> impl Fn() -> futures::future::Ready<Result<()>> + Send + 'static {
        let counter = counter.clone();
        move || {
            counter.fetch_add(1, Ordering::SeqCst);
            futures::future::ready(Ok(()))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_runs_once_per_interval() {
        let counter = Arc::new(AtomicUsize::new(0));
        let scheduler = Scheduler::new(timing());
        assert!(scheduler.start(counting(&counter)));

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);
        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 3);

        assert!(scheduler.stop().await);
        assert!(!scheduler.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_is_idempotent() {
        let counter = Arc::new(AtomicUsize::new(0));
        let scheduler = Scheduler::new(timing());
        assert!(scheduler.start(counting(&counter)));
        assert!(!scheduler.start(counting(&counter)));
        assert!(scheduler.is_running());

        tokio::time::sleep(Duration::from_secs(11)).await;
        // Only one task: one run, not two.
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        assert!(scheduler.stop().await);
        assert!(!scheduler.stop().await);
        // Restartable after a stop.
        assert!(scheduler.start(counting(&counter)));
        assert!(scheduler.stop().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_back_off_and_continue() {
        let calls = Arc::new(AtomicUsize::new(0));
        let scheduler = Scheduler::new(timing());
        let job_calls = calls.clone();
        scheduler.start(move || {
            let n = job_calls.fetch_add(1, Ordering::SeqCst);
            async move {
                match n {
                    0 => Err(ErrorKind::Snapshot.into()),
                    1 => panic!("boom"),
                    _ => Ok(()),
                }
            }
        });

        // First run at 10s fails, retried at 13s (panics), retried at 16s.
        tokio::time::sleep(Duration::from_millis(16_500)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(scheduler.is_running());
        // Back on the normal interval after a success.
        tokio::time::sleep(Duration::from_secs(9)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 4);

        assert!(scheduler.stop().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_does_not_wait_forever_for_slow_job() {
        let started_runs = Arc::new(AtomicUsize::new(0));
        let finished_runs = Arc::new(AtomicUsize::new(0));
        let scheduler = Scheduler::new(ScheduleTiming { interval: Duration::from_secs(1), ..timing() });
        let (started, finished) = (started_runs.clone(), finished_runs.clone());
        scheduler.start(move || {
            started.fetch_add(1, Ordering::SeqCst);
            let finished = finished.clone();
            async move {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                finished.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(started_runs.load(Ordering::SeqCst), 1);

        let stopping = Instant::now();
        assert!(scheduler.stop().await);
        assert!(stopping.elapsed() >= Duration::from_secs(5));
        assert!(stopping.elapsed() < Duration::from_secs(3600));
        assert!(!scheduler.is_running());

        // The run in progress is left to complete, and no further run starts.
        tokio::time::sleep(Duration::from_secs(3600)).await;
        assert_eq!(finished_runs.load(Ordering::SeqCst), 1);
        assert_eq!(started_runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_panic_message() {
        assert_eq!(panic_message(&"static"), "static");
        assert_eq!(panic_message(&String::from("owned")), "owned");
        assert_eq!(panic_message(&42_u8), "unknown panic");
    }
}
