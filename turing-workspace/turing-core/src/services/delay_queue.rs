// turing-core/src/services/delay_queue.rs
//! Priority queue with a minimum hold time.
//!
//! Every event waits `delay` after `put` before it can be dequeued. Among the
//! events that are ready, moderation kinds come out first (Ban and Unban,
//! then Censor, then Message) and FIFO order holds within a level. The hold gives a ban or
//! deletion that arrives shortly after a message the chance to be applied
//! before that message's commit unit is even spawned.
//!
//! The wait is computed from stored ready-times, so a pending `get()` can be
//! dropped (or raced against a cancellation token) at any time without losing
//! an item.

use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;

use crate::events::EventEnvelope;

pub const DEFAULT_QUEUE_DELAY: Duration = Duration::from_millis(4000);

struct Waiting {
    ready_at: Instant,
    seq: u64,
    event: EventEnvelope,
}

struct Ready {
    priority: u8,
    seq: u64,
    event: EventEnvelope,
}

impl PartialEq for Ready {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}

impl Eq for Ready {}

impl Ord for Ready {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| self.seq.cmp(&other.seq))
    }
}

impl PartialOrd for Ready {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Default)]
struct State {
    /// Sorted by `ready_at`: the delay is constant and the clock monotonic.
    waiting: VecDeque<Waiting>,
    /// Min-heap on (priority, sequence).
    ready: BinaryHeap<Reverse<Ready>>,
    next_seq: u64,
}

impl State {
    fn promote(&mut self, now: Instant) {
        while self.waiting.front().is_some_and(|w| w.ready_at <= now) {
            let Some(w) = self.waiting.pop_front() else {
                break;
            };
            self.ready.push(Reverse(Ready {
                priority: w.event.kind().priority(),
                seq: w.seq,
                event: w.event,
            }));
        }
    }

    fn pop_ready(&mut self, now: Instant) -> Option<EventEnvelope> {
        self.promote(now);
        self.ready.pop().map(|Reverse(r)| r.event)
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.waiting.front().map(|w| w.ready_at)
    }
}

pub struct DelayQueue {
    delay: Duration,
    state: Mutex<State>,
    notify: Notify,
}

impl Default for DelayQueue {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_DELAY)
    }
}

impl DelayQueue {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            state: Mutex::new(State::default()),
            notify: Notify::new(),
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Enqueue immediately. Never blocks on consumers, never fails.
    pub fn put(&self, event: EventEnvelope) {
        self.put_at(event, Instant::now());
    }

    fn put_at(&self, event: EventEnvelope, now: Instant) {
        {
            let mut state = self.lock();
            let seq = state.next_seq;
            state.next_seq += 1;
            state.waiting.push_back(Waiting {
                ready_at: now + self.delay,
                seq,
                event,
            });
        }
        self.notify.notify_one();
    }

    /// Non-suspending variant of [`DelayQueue::get`].
    pub fn try_get(&self) -> Option<EventEnvelope> {
        self.lock().pop_ready(Instant::now())
    }

    /// Wait for the highest-priority ready event.
    ///
    /// Cancel-safe: an item is only removed in the same poll that returns it.
    pub async fn get(&self) -> EventEnvelope {
        loop {
            let notified = self.notify.notified();
            let deadline = {
                let mut state = self.lock();
                if let Some(event) = state.pop_ready(Instant::now()) {
                    return event;
                }
                state.next_deadline()
            };
            match deadline {
                Some(at) => {
                    tokio::select! {
                        _ = time::sleep_until(at) => {}
                        _ = notified => {}
                    }
                }
                None => notified.await,
            }
        }
    }

    /// [`DelayQueue::get`] that gives up with `None` once `token` fires.
    pub async fn get_or_cancel(&self, token: &CancellationToken) -> Option<EventEnvelope> {
        tokio::select! {
            biased;
            _ = token.cancelled() => None,
            event = self.get() => Some(event),
        }
    }

    /// Events held (waiting or ready).
    pub fn len(&self) -> usize {
        let state = self.lock();
        state.waiting.len() + state.ready.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove everything regardless of readiness. Used at shutdown.
    pub fn drain(&self) -> Vec<EventEnvelope> {
        let mut state = self.lock();
        let mut out: Vec<EventEnvelope> = Vec::with_capacity(state.waiting.len() + state.ready.len());
        while let Some(Reverse(r)) = state.ready.pop() {
            out.push(r.event);
        }
        out.extend(state.waiting.drain(..).map(|w| w.event));
        out
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
