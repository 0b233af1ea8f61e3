//! Timer scheduling behind a trait so the channel never owns ambient timers.
//!
//! - `TokioScheduler`: real timers on the tokio runtime
//! - `ManualScheduler`: virtual clock advanced explicitly, for deterministic tests

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::AbortHandle;

/// Shortest period accepted for repeating tasks
const MIN_PERIOD: Duration = Duration::from_millis(1);

/// One-shot task
pub type OnceTask = Box<dyn FnOnce() + Send + 'static>;

/// Task run on every tick of a repeating timer
pub type RepeatingTask = Box<dyn FnMut() + Send + 'static>;

/// Cancellation handle for a scheduled task
#[derive(Debug, Clone)]
pub struct TimerHandle {
    cancelled: Arc<AtomicBool>,
    abort: Option<AbortHandle>,
}

impl TimerHandle {
    fn new(cancelled: Arc<AtomicBool>, abort: Option<AbortHandle>) -> Self {
        Self { cancelled, abort }
    }

    /// Cancel the task. Safe to call more than once.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
        if let Some(ref abort) = self.abort {
            abort.abort();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// Schedules delayed and periodic work.
///
/// Implementations must not run a task synchronously from inside
/// `schedule_once` / `schedule_repeating`.
pub trait Scheduler: Send + Sync {
    /// Run `task` once after `delay`
    fn schedule_once(&self, delay: Duration, task: OnceTask) -> TimerHandle;

    /// Run `task` every `period`, first after one full period
    fn schedule_repeating(&self, period: Duration, task: RepeatingTask) -> TimerHandle;
}

/// Scheduler backed by `tokio::time`
#[derive(Debug, Clone)]
pub struct TokioScheduler {
    runtime: Handle,
}

impl TokioScheduler {
    /// Bind to the current tokio runtime.
    ///
    /// Panics when called outside a runtime, like `tokio::spawn`.
    pub fn new() -> Self {
        Self::with_handle(Handle::current())
    }

    pub fn with_handle(runtime: Handle) -> Self {
        Self { runtime }
    }
}

impl Default for TokioScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler for TokioScheduler {
    fn schedule_once(&self, delay: Duration, task: OnceTask) -> TimerHandle {
        let cancelled = Arc::new(AtomicBool::new(false));
        let flag = cancelled.clone();

        let join = self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            if !flag.load(Ordering::Acquire) {
                task();
            }
        });

        TimerHandle::new(cancelled, Some(join.abort_handle()))
    }

    fn schedule_repeating(&self, period: Duration, mut task: RepeatingTask) -> TimerHandle {
        // `interval_at` panics on a zero period
        let period = period.max(MIN_PERIOD);
        let cancelled = Arc::new(AtomicBool::new(false));
        let flag = cancelled.clone();

        let join = self.runtime.spawn(async move {
            let start = tokio::time::Instant::now() + period;
            let mut ticker = tokio::time::interval_at(start, period);
            loop {
                ticker.tick().await;
                if flag.load(Ordering::Acquire) {
                    break;
                }
                task();
            }
        });

        TimerHandle::new(cancelled, Some(join.abort_handle()))
    }
}

enum ManualTask {
    Once(OnceTask),
    Repeating(RepeatingTask, Duration),
}

struct ManualTimer {
    id: u64,
    due: Duration,
    cancelled: Arc<AtomicBool>,
    task: ManualTask,
}

#[derive(Default)]
struct ManualState {
    now: Duration,
    next_id: u64,
    timers: Vec<ManualTimer>,
}

/// Virtual-time scheduler. Nothing runs until `advance` is called; due tasks
/// run in due-time order on the caller's thread.
#[derive(Default)]
pub struct ManualScheduler {
    state: Mutex<ManualState>,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Virtual time elapsed since creation
    pub fn now(&self) -> Duration {
        self.lock().now
    }

    /// Number of live (not cancelled) timers
    pub fn pending(&self) -> usize {
        let mut state = self.lock();
        state.timers.retain(|t| !t.cancelled.load(Ordering::Acquire));
        state.timers.len()
    }

    /// Delays until each live one-shot timer fires, soonest first
    pub fn pending_once_delays(&self) -> Vec<Duration> {
        let mut state = self.lock();
        state.timers.retain(|t| !t.cancelled.load(Ordering::Acquire));
        let now = state.now;
        let mut delays: Vec<_> = state
            .timers
            .iter()
            .filter(|t| matches!(t.task, ManualTask::Once(_)))
            .map(|t| t.due - now)
            .collect();
        delays.sort();
        delays
    }

    /// Advance virtual time, running every task that becomes due
    pub fn advance(&self, by: Duration) {
        let target = self.lock().now + by;

        loop {
            let timer = {
                let mut state = self.lock();
                state.timers.retain(|t| !t.cancelled.load(Ordering::Acquire));

                let next = state
                    .timers
                    .iter()
                    .enumerate()
                    .filter(|(_, t)| t.due <= target)
                    .min_by_key(|(_, t)| (t.due, t.id))
                    .map(|(i, _)| i);

                match next {
                    Some(index) => {
                        let timer = state.timers.swap_remove(index);
                        state.now = timer.due;
                        timer
                    }
                    None => {
                        state.now = target;
                        return;
                    }
                }
            };

            // Run outside the lock; tasks may schedule or cancel timers
            match timer.task {
                ManualTask::Once(task) => task(),
                ManualTask::Repeating(mut task, period) => {
                    task();
                    if !timer.cancelled.load(Ordering::Acquire) {
                        let mut state = self.lock();
                        let id = state.next_id;
                        state.next_id += 1;
                        state.timers.push(ManualTimer {
                            id,
                            due: timer.due + period,
                            cancelled: timer.cancelled,
                            task: ManualTask::Repeating(task, period),
                        });
                    }
                }
            }
        }
    }

    /// Advance exactly to the next live timer and run it. Returns false when
    /// nothing is scheduled.
    pub fn run_next(&self) -> bool {
        let next_due = {
            let mut state = self.lock();
            state.timers.retain(|t| !t.cancelled.load(Ordering::Acquire));
            let now = state.now;
            state.timers.iter().map(|t| t.due).min().map(|due| due - now)
        };

        match next_due {
            Some(delay) => {
                self.advance(delay);
                true
            }
            None => false,
        }
    }

    fn push(&self, delay: Duration, task: ManualTask) -> TimerHandle {
        let cancelled = Arc::new(AtomicBool::new(false));
        let mut state = self.lock();
        let id = state.next_id;
        state.next_id += 1;
        let due = state.now + delay;
        state.timers.push(ManualTimer {
            id,
            due,
            cancelled: cancelled.clone(),
            task,
        });
        TimerHandle::new(cancelled, None)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ManualState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Scheduler for ManualScheduler {
    fn schedule_once(&self, delay: Duration, task: OnceTask) -> TimerHandle {
        self.push(delay, ManualTask::Once(task))
    }

    fn schedule_repeating(&self, period: Duration, task: RepeatingTask) -> TimerHandle {
        let period = period.max(MIN_PERIOD);
        self.push(period, ManualTask::Repeating(task, period))
    }
}
