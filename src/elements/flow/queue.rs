//! Bounded buffering stage spliced between a splitter branch and an output
//! port.
//!
//! Every connected port gets its own [`BranchQueue`], so a slow consumer only
//! ever backs up its own branch. What happens when the queue is full depends
//! on the [`LeakyMode`].

use crate::buffer::Buffer;
use crate::event::Event;
use crate::sync::lock;
use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// A bounded FIFO of buffers and serialized events.
///
/// Cloning yields another handle to the same queue.
///
/// # Example
///
/// ```rust,ignore
/// use tributary::elements::{BranchQueue, LeakyMode};
///
/// // Keep at most 200 buffers, dropping the oldest when full
/// let queue = BranchQueue::new(200).leaky(LeakyMode::Downstream);
/// ```
#[derive(Clone)]
pub struct BranchQueue {
    name: String,
    inner: Arc<QueueInner>,
    leaky: LeakyMode,
}

struct QueueInner {
    state: Mutex<QueueState>,
    not_empty: Condvar,
    not_full: Condvar,
}

struct QueueState {
    items: VecDeque<QueueItem>,
    max_buffers: usize,
    buffered: usize,
    total_pushed: u64,
    total_popped: u64,
    total_dropped: u64,
    flushing: bool,
}

/// Leaky mode determines what happens when the queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LeakyMode {
    /// Block the pushing thread until space is available.
    None,
    /// Drop new buffers when full.
    Upstream,
    /// Drop the oldest buffer when full.
    #[default]
    Downstream,
}

/// An entry in a branch queue.
#[derive(Debug, Clone, PartialEq)]
pub enum QueueItem {
    /// Media data.
    Buffer(Buffer),
    /// A serialized downstream event.
    Event(Event),
}

/// Result of pushing into a branch queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// The item was queued.
    Queued,
    /// The item was discarded by the leaky policy.
    Dropped,
    /// The queue is flushing; nothing was queued.
    Flushing,
}

impl BranchQueue {
    /// Create a queue holding at most `max_buffers` buffers.
    ///
    /// Events do not count against the limit.
    pub fn new(max_buffers: usize) -> Self {
        Self {
            name: format!("queue-{max_buffers}"),
            inner: Arc::new(QueueInner {
                state: Mutex::new(QueueState {
                    items: VecDeque::with_capacity(max_buffers.min(1024)),
                    max_buffers: max_buffers.max(1),
                    buffered: 0,
                    total_pushed: 0,
                    total_popped: 0,
                    total_dropped: 0,
                    flushing: false,
                }),
                not_empty: Condvar::new(),
                not_full: Condvar::new(),
            }),
            leaky: LeakyMode::default(),
        }
    }

    /// Set the leaky mode.
    pub fn leaky(mut self, mode: LeakyMode) -> Self {
        self.leaky = mode;
        self
    }

    /// Set a custom name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Get the queue name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the leaky mode.
    pub fn leaky_mode(&self) -> LeakyMode {
        self.leaky
    }

    /// Number of queued items, buffers and events.
    pub fn len(&self) -> usize {
        lock(&self.inner.state).items.len()
    }

    /// Check if the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get statistics about the queue.
    pub fn stats(&self) -> QueueStats {
        let state = lock(&self.inner.state);
        QueueStats {
            current_items: state.items.len(),
            current_buffers: state.buffered,
            total_pushed: state.total_pushed,
            total_popped: state.total_popped,
            total_dropped: state.total_dropped,
        }
    }

    /// Discard everything queued.
    pub fn flush(&self) {
        let mut state = lock(&self.inner.state);
        state.items.clear();
        state.buffered = 0;
        self.inner.not_full.notify_all();
    }

    /// Set flushing mode. While flushing, pushes are refused and blocked
    /// callers return.
    pub fn set_flushing(&self, flushing: bool) {
        let mut state = lock(&self.inner.state);
        state.flushing = flushing;
        if flushing {
            state.items.clear();
            state.buffered = 0;
            self.inner.not_empty.notify_all();
            self.inner.not_full.notify_all();
        }
    }

    /// Whether the queue is flushing.
    pub fn is_flushing(&self) -> bool {
        lock(&self.inner.state).flushing
    }

    /// Push a buffer, applying the leaky policy when full.
    pub fn push_buffer(&self, buffer: Buffer) -> PushOutcome {
        let mut state = lock(&self.inner.state);

        while state.buffered >= state.max_buffers && !state.flushing {
            match self.leaky {
                LeakyMode::None => {
                    state = self
                        .inner
                        .not_full
                        .wait(state)
                        .unwrap_or_else(PoisonError::into_inner);
                }
                LeakyMode::Upstream => {
                    state.total_dropped += 1;
                    return PushOutcome::Dropped;
                }
                LeakyMode::Downstream => {
                    if let Some(pos) = state
                        .items
                        .iter()
                        .position(|item| matches!(item, QueueItem::Buffer(_)))
                    {
                        state.items.remove(pos);
                        state.buffered -= 1;
                        state.total_dropped += 1;
                    }
                    break;
                }
            }
        }

        if state.flushing {
            return PushOutcome::Flushing;
        }

        state.items.push_back(QueueItem::Buffer(buffer));
        state.buffered += 1;
        state.total_pushed += 1;
        self.inner.not_empty.notify_one();
        PushOutcome::Queued
    }

    /// Push an event.
    ///
    /// `FlushStart` and `FlushStop` take effect immediately instead of being
    /// queued; everything else is serialized with the buffers.
    pub fn push_event(&self, event: Event) -> PushOutcome {
        match event {
            Event::FlushStart => {
                self.set_flushing(true);
                PushOutcome::Flushing
            }
            Event::FlushStop => {
                self.set_flushing(false);
                PushOutcome::Queued
            }
            event => {
                let mut state = lock(&self.inner.state);
                if state.flushing {
                    return PushOutcome::Flushing;
                }
                state.items.push_back(QueueItem::Event(event));
                self.inner.not_empty.notify_one();
                PushOutcome::Queued
            }
        }
    }

    /// Take the next item without waiting.
    pub fn try_pop(&self) -> Option<QueueItem> {
        let mut state = lock(&self.inner.state);
        self.take_locked(&mut state)
    }

    /// Take the next item, waiting up to `timeout` in total (forever if
    /// `None`).
    ///
    /// Returns `None` on timeout or when the queue starts flushing.
    pub fn pop_timeout(&self, timeout: Option<Duration>) -> Option<QueueItem> {
        let deadline = timeout.and_then(|t| Instant::now().checked_add(t));
        let mut state = lock(&self.inner.state);

        while state.items.is_empty() && !state.flushing {
            state = match deadline {
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return None;
                    }
                    self.inner
                        .not_empty
                        .wait_timeout(state, remaining)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
                None => self
                    .inner
                    .not_empty
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner),
            };
        }

        self.take_locked(&mut state)
    }

    fn take_locked(&self, state: &mut QueueState) -> Option<QueueItem> {
        let item = state.items.pop_front()?;
        if matches!(item, QueueItem::Buffer(_)) {
            state.buffered -= 1;
            state.total_popped += 1;
            self.inner.not_full.notify_one();
        }
        Some(item)
    }
}

impl std::fmt::Debug for BranchQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BranchQueue")
            .field("name", &self.name)
            .field("leaky", &self.leaky)
            .field("stats", &self.stats())
            .finish()
    }
}

/// Statistics about queue operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueStats {
    /// Items (buffers and events) currently queued.
    pub current_items: usize,
    /// Buffers currently queued.
    pub current_buffers: usize,
    /// Total buffers pushed.
    pub total_pushed: u64,
    /// Total buffers popped.
    pub total_popped: u64,
    /// Total buffers dropped by the leaky policy.
    pub total_dropped: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn buffer(seq: u64) -> Buffer {
        Buffer::new(vec![0u8; 16], seq)
    }

    fn sequence(item: Option<QueueItem>) -> u64 {
        match item {
            Some(QueueItem::Buffer(buf)) => buf.sequence(),
            other => panic!("expected a buffer, got {other:?}"),
        }
    }

    #[test]
    fn test_queue_push_pop_preserves_order() {
        let queue = BranchQueue::new(10);
        queue.push_event(Event::Eos);
        queue.push_buffer(buffer(0));
        queue.push_buffer(buffer(1));

        assert_eq!(queue.len(), 3);
        assert_eq!(queue.try_pop(), Some(QueueItem::Event(Event::Eos)));
        assert_eq!(sequence(queue.try_pop()), 0);
        assert_eq!(sequence(queue.pop_timeout(Some(Duration::from_millis(100)))), 1);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_queue_leaky_upstream() {
        let queue = BranchQueue::new(2).leaky(LeakyMode::Upstream);

        assert_eq!(queue.push_buffer(buffer(0)), PushOutcome::Queued);
        assert_eq!(queue.push_buffer(buffer(1)), PushOutcome::Queued);
        assert_eq!(queue.push_buffer(buffer(2)), PushOutcome::Dropped);

        assert_eq!(queue.stats().total_dropped, 1);
        assert_eq!(sequence(queue.try_pop()), 0);
    }

    #[test]
    fn test_queue_leaky_downstream_drops_oldest_buffer_only() {
        let queue = BranchQueue::new(2).leaky(LeakyMode::Downstream);

        queue.push_event(Event::Eos);
        queue.push_buffer(buffer(0));
        queue.push_buffer(buffer(1));
        queue.push_buffer(buffer(2));

        assert_eq!(queue.stats().current_buffers, 2);
        assert_eq!(queue.stats().total_dropped, 1);
        assert_eq!(queue.try_pop(), Some(QueueItem::Event(Event::Eos)));
        assert_eq!(sequence(queue.try_pop()), 1);
    }

    #[test]
    fn test_queue_flushing_refuses_and_wakes() {
        let queue = BranchQueue::new(4);
        queue.push_buffer(buffer(0));

        assert_eq!(queue.push_event(Event::FlushStart), PushOutcome::Flushing);
        assert!(queue.is_empty());
        assert_eq!(queue.push_buffer(buffer(1)), PushOutcome::Flushing);
        assert_eq!(queue.pop_timeout(None), None);

        queue.push_event(Event::FlushStop);
        assert_eq!(queue.push_buffer(buffer(2)), PushOutcome::Queued);
    }

    #[test]
    fn test_pop_timeout_bounds_total_wait() {
        let queue = BranchQueue::new(4);

        let started = Instant::now();
        assert_eq!(queue.pop_timeout(Some(Duration::from_millis(50))), None);
        assert!(started.elapsed() >= Duration::from_millis(50));

        // Items taken by another consumer wake the waiter without feeding it.
        let started = Instant::now();
        thread::scope(|s| {
            let waiter = s.spawn(|| queue.pop_timeout(Some(Duration::from_millis(100))));
            while !waiter.is_finished() && started.elapsed() < Duration::from_secs(3) {
                queue.push_buffer(buffer(0));
                queue.try_pop();
                thread::sleep(Duration::from_millis(5));
            }
            waiter.join().unwrap();
        });
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_queue_blocking_push_resumes_after_pop() {
        let queue = BranchQueue::new(1).leaky(LeakyMode::None);
        queue.push_buffer(buffer(0));

        let producer = {
            let queue = queue.clone();
            thread::spawn(move || queue.push_buffer(buffer(1)))
        };

        assert_eq!(sequence(queue.pop_timeout(None)), 0);
        assert_eq!(producer.join().unwrap(), PushOutcome::Queued);
        assert_eq!(sequence(queue.pop_timeout(None)), 1);
    }
}
