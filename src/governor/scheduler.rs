//! Priority admission queue in front of the token bucket and breaker.
//!
//! Callers either take a token on the fast path or park in a heap ordered by
//! `(priority, enqueue instant, arrival sequence)`. A single background drain
//! task, started lazily and exiting once the heap is empty, hands out slots to
//! parked callers as tokens become available and the breaker is closed.
//!
//! All state sits behind one `std::sync::Mutex` that is never held across an
//! `.await`, so the scheduler is sound on a multi-threaded runtime.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant};
use tracing::{debug, error, warn};

use crate::error::{GovernorError, Result};
use crate::governor::breaker::CircuitBreaker;
use crate::governor::bucket::TokenBucket;

/// Tokens taken per admitted call.
const SLOT_COST: f64 = 1.0;

/// Upper bound on a single drain sleep, so a breaker reset or clock drift is
/// noticed within a second.
const MAX_DRAIN_SLEEP: Duration = Duration::from_secs(1);

/// Sleep when there is nothing to wait for but the queue is still occupied.
const IDLE_SLEEP: Duration = Duration::from_millis(100);

/// Sleep after an internal drain error.
const ERROR_SLEEP: Duration = Duration::from_secs(1);

/// A parked caller.
#[derive(Debug)]
struct QueueItem {
    priority: i32,
    enqueued_at: Instant,
    /// Breaks ties between callers that read the same clock value.
    seq: u64,
    waker: oneshot::Sender<()>,
}

impl QueueItem {
    fn key(&self) -> (i32, Instant, u64) {
        (self.priority, self.enqueued_at, self.seq)
    }

    /// The caller gave up waiting (timeout or cancellation).
    fn is_stale(&self) -> bool {
        self.waker.is_closed()
    }
}

impl PartialEq for QueueItem {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for QueueItem {}

impl PartialOrd for QueueItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueueItem {
    // BinaryHeap is a max-heap; reverse so the smallest key is on top.
    fn cmp(&self, other: &Self) -> Ordering {
        other.key().cmp(&self.key())
    }
}

#[derive(Debug)]
struct SchedulerState {
    queue: BinaryHeap<QueueItem>,
    bucket: TokenBucket,
    breaker: CircuitBreaker,
    drain: Option<JoinHandle<()>>,
    next_seq: u64,
}

impl SchedulerState {
    /// Drop entries whose callers have gone away.
    fn prune_stale(&mut self) -> usize {
        let before = self.queue.len();
        self.queue.retain(|item| !item.is_stale());
        before - self.queue.len()
    }

    fn drain_running(&self) -> bool {
        self.drain.as_ref().is_some_and(|handle| !handle.is_finished())
    }

    /// Hand an already consumed token to the head of the queue.
    ///
    /// The caller may have gone away since the last prune; its token goes back
    /// into the bucket.
    fn grant_head(&mut self) -> bool {
        let Some(item) = self.queue.pop() else {
            self.bucket.refund(SLOT_COST);
            return false;
        };
        let priority = item.priority;
        let waited = item.enqueued_at.elapsed();
        if item.waker.send(()).is_ok() {
            debug!(priority, waited_ms = waited.as_millis() as u64, "slot granted from queue");
            true
        } else {
            self.bucket.refund(SLOT_COST);
            debug!(priority, "caller left before its grant, token refunded");
            false
        }
    }
}

/// Point-in-time view of the scheduler.
#[derive(Debug, Clone, PartialEq)]
pub struct SchedulerSnapshot {
    pub tokens_available: f64,
    pub breaker_open: bool,
    pub cooldown_remaining: Duration,
    pub queued: usize,
}

enum DrainStep {
    /// Queue empty, drain task exits.
    Done,
    /// One caller admitted; look again without sleeping.
    Granted,
    /// Nothing admissible yet.
    Wait(Duration),
}

/// Serializes access to a bucket and breaker behind a priority queue.
#[derive(Debug)]
pub struct PriorityScheduler {
    state: Arc<Mutex<SchedulerState>>,
}

impl PriorityScheduler {
    pub fn new(bucket: TokenBucket, breaker: CircuitBreaker) -> Self {
        Self {
            state: Arc::new(Mutex::new(SchedulerState {
                queue: BinaryHeap::new(),
                bucket,
                breaker,
                drain: None,
                next_seq: 0,
            })),
        }
    }

    /// Suspend until the caller is admitted. Lower `priority` goes first.
    ///
    /// Dropping the returned future (e.g. under `tokio::time::timeout`) leaves
    /// a stale entry that the drain loop discards without spending a token.
    pub async fn wait_for_slot(&self, priority: i32) {
        loop {
            let granted = {
                let mut state = self.lock();
                state.prune_stale();

                if state.queue.is_empty()
                    && !state.breaker.is_open()
                    && state.bucket.try_consume(SLOT_COST)
                {
                    debug!(priority, "slot granted without queuing");
                    return;
                }

                let (waker, granted) = oneshot::channel();
                let seq = state.next_seq;
                state.next_seq += 1;
                state.queue.push(QueueItem {
                    priority,
                    enqueued_at: Instant::now(),
                    seq,
                    waker,
                });
                debug!(
                    priority,
                    queued = state.queue.len(),
                    "caller parked in admission queue"
                );

                if !state.drain_running() {
                    state.drain = Some(tokio::spawn(drain_queue(Arc::clone(&self.state))));
                }
                granted
            };

            match granted.await {
                Ok(()) => return,
                // Drain task went away without resolving us (runtime shutdown
                // or a panic); take another turn through admission.
                Err(_) => warn!(priority, "admission handle dropped, re-entering queue"),
            }
        }
    }

    /// Callers currently parked, not counting ones that already gave up.
    pub fn queued(&self) -> usize {
        let mut state = self.lock();
        state.prune_stale();
        state.queue.len()
    }

    pub fn trip_breaker(&self, wait: Option<Duration>) {
        self.lock().breaker.trip(wait);
    }

    pub fn reset_breaker(&self) {
        self.lock().breaker.reset();
    }

    pub fn snapshot(&self) -> SchedulerSnapshot {
        let mut state = self.lock();
        state.prune_stale();
        SchedulerSnapshot {
            tokens_available: state.bucket.available(),
            breaker_open: state.breaker.is_open(),
            cooldown_remaining: state.breaker.time_remaining(),
            queued: state.queue.len(),
        }
    }

    #[cfg(test)]
    fn drain_running(&self) -> bool {
        self.lock().drain_running()
    }

    // Callers must never fail admission, so a poisoned lock is recovered here;
    // the drain loop reports it instead (see drain_step).
    fn lock(&self) -> MutexGuard<'_, SchedulerState> {
        self.state.lock().unwrap_or_else(|poisoned| {
            warn!("scheduler lock was poisoned, recovering");
            self.state.clear_poison();
            poisoned.into_inner()
        })
    }
}

/// Background loop admitting parked callers.
async fn drain_queue(state: Arc<Mutex<SchedulerState>>) {
    loop {
        let sleep_for = match drain_step(&state) {
            Ok(DrainStep::Done) => return,
            Ok(DrainStep::Granted) => continue,
            Ok(DrainStep::Wait(wait)) if wait > Duration::ZERO => wait.min(MAX_DRAIN_SLEEP),
            Ok(DrainStep::Wait(_)) => IDLE_SLEEP,
            Err(e) => {
                // Dying here would strand every parked caller.
                error!(error = %e, "scheduler drain loop error");
                state.clear_poison();
                ERROR_SLEEP
            }
        };
        tokio::time::sleep(sleep_for).await;
    }
}

fn drain_step(state: &Mutex<SchedulerState>) -> Result<DrainStep> {
    let mut state = state
        .lock()
        .map_err(|e| GovernorError::Internal(format!("scheduler lock poisoned: {}", e)))?;

    let pruned = state.prune_stale();
    if pruned > 0 {
        debug!(pruned, "dropped cancelled callers from admission queue");
    }

    if state.queue.is_empty() {
        state.drain = None;
        return Ok(DrainStep::Done);
    }

    if state.breaker.is_open() {
        return Ok(DrainStep::Wait(state.breaker.time_remaining()));
    }

    if state.bucket.try_consume(SLOT_COST) {
        state.grant_head();
        return Ok(DrainStep::Granted);
    }

    Ok(DrainStep::Wait(state.bucket.wait_time(SLOT_COST)))
}
