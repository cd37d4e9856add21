//! Splitter: replicates one stream to many branches.
//!
//! A [`Splitter`] never converts anything. Buffers pushed into it are cloned
//! (the payload is shared) into every attached branch queue, and downstream
//! events are forwarded the same way. The caps event sets the splitter's
//! *active caps*, which is what output ports are matched against.
//!
//! Every splitter also owns a primary drain: a consumer that is always
//! attached and only counts what passes through, so the stream keeps flowing
//! while no output port is connected yet.

use super::queue::{BranchQueue, PushOutcome};
use crate::buffer::Buffer;
use crate::element::{ProbeInfo, ProbeMask, ProbeReturn, ProbeTable};
use crate::event::Event;
use crate::format::FormatCaps;
use crate::sync::{lock, read, write};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tracing::trace;

/// Identity of a splitter inside a node's splitter table. Never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SplitterId(pub(crate) u32);

impl fmt::Display for SplitterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "splitter-{}", self.0)
    }
}

/// Identity of a branch within one splitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BranchId(u64);

impl fmt::Display for BranchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "src_{}", self.0)
    }
}

/// One output of a splitter: the branch's queue plus the probes on the
/// branch's source side.
pub struct SplitterBranch {
    id: BranchId,
    queue: BranchQueue,
    probes: ProbeTable,
}

impl SplitterBranch {
    /// Branch identity.
    pub fn id(&self) -> BranchId {
        self.id
    }

    /// Queue fed by this branch.
    pub fn queue(&self) -> &BranchQueue {
        &self.queue
    }

    /// Probes on the branch's source side.
    pub fn probes(&self) -> &ProbeTable {
        &self.probes
    }
}

impl fmt::Debug for SplitterBranch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SplitterBranch")
            .field("id", &self.id)
            .field("queue", &self.queue.name())
            .finish()
    }
}

/// Fan-out point for one stream.
///
/// # Example
///
/// ```rust
/// use tributary::buffer::Buffer;
/// use tributary::elements::{BranchQueue, Splitter};
///
/// let splitter = Splitter::new("tee");
/// let a = splitter.attach_branch(BranchQueue::new(8));
/// let b = splitter.attach_branch(BranchQueue::new(8));
///
/// splitter.push_buffer(Buffer::new(vec![1u8, 2, 3], 0));
///
/// assert_eq!(a.queue().len(), 1);
/// assert_eq!(b.queue().len(), 1);
/// assert_eq!(splitter.stats().drained_buffers, 1);
/// ```
pub struct Splitter {
    name: String,
    active_caps: RwLock<Option<FormatCaps>>,
    branches: RwLock<BTreeMap<BranchId, Arc<SplitterBranch>>>,
    sticky: Mutex<Vec<Event>>,
    next_branch: AtomicU64,
    drained_buffers: AtomicU64,
    drained_bytes: AtomicU64,
    upstream_forwarded: AtomicU64,
}

impl Splitter {
    /// Create a splitter with no active caps and no branches.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            active_caps: RwLock::new(None),
            branches: RwLock::new(BTreeMap::new()),
            sticky: Mutex::new(Vec::new()),
            // src_0 is the primary drain
            next_branch: AtomicU64::new(1),
            drained_buffers: AtomicU64::new(0),
            drained_bytes: AtomicU64::new(0),
            upstream_forwarded: AtomicU64::new(0),
        }
    }

    /// Get the splitter name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Format currently flowing through the splitter.
    pub fn active_caps(&self) -> Option<FormatCaps> {
        read(&self.active_caps).clone()
    }

    /// Whether the active caps intersect `caps`. A splitter that has not seen
    /// a caps event yet matches nothing.
    pub fn is_compatible(&self, caps: &FormatCaps) -> bool {
        read(&self.active_caps)
            .as_ref()
            .is_some_and(|active| active.can_intersect(caps))
    }

    /// Replicate a buffer into the drain and every branch.
    pub fn push_buffer(&self, buffer: Buffer) {
        self.drained_buffers.fetch_add(1, Ordering::Relaxed);
        self.drained_bytes
            .fetch_add(buffer.len() as u64, Ordering::Relaxed);

        for branch in self.snapshot() {
            if branch.queue.push_buffer(buffer.clone()) == PushOutcome::Dropped {
                trace!(splitter = %self.name, branch = %branch.id, "branch full, buffer dropped");
            }
        }
    }

    /// Forward a downstream event to every branch.
    ///
    /// A caps event replaces the active caps first. Stream-start, caps and
    /// segment events are remembered and replayed into branches attached
    /// later.
    pub fn push_event(&self, event: Event) {
        // Held across forwarding: a branch attached meanwhile gets this
        // event exactly once, replayed or forwarded.
        let mut sticky = lock(&self.sticky);
        if let Event::Caps(caps) = &event {
            *write(&self.active_caps) = Some(caps.clone());
        }
        remember(&mut sticky, &event);

        for branch in self.snapshot() {
            branch.queue.push_event(event.clone());
        }
    }

    /// Attach a new branch feeding `queue`.
    ///
    /// Sticky events seen so far are queued before any buffer.
    pub fn attach_branch(&self, queue: BranchQueue) -> Arc<SplitterBranch> {
        let id = BranchId(self.next_branch.fetch_add(1, Ordering::Relaxed));
        let sticky = lock(&self.sticky);
        for event in sticky.iter() {
            queue.push_event(event.clone());
        }

        let branch = Arc::new(SplitterBranch {
            id,
            queue,
            probes: ProbeTable::new(),
        });
        write(&self.branches).insert(id, Arc::clone(&branch));
        drop(sticky);
        trace!(splitter = %self.name, branch = %id, "branch attached");
        branch
    }

    /// Detach a branch. Its queue is set flushing and its probes removed.
    pub fn detach_branch(&self, id: BranchId) -> Option<Arc<SplitterBranch>> {
        let branch = write(&self.branches).remove(&id)?;
        branch.probes.clear();
        branch.queue.set_flushing(true);
        trace!(splitter = %self.name, branch = %id, "branch detached");
        Some(branch)
    }

    /// Look up an attached branch.
    pub fn branch(&self, id: BranchId) -> Option<Arc<SplitterBranch>> {
        read(&self.branches).get(&id).cloned()
    }

    /// Number of attached branches, not counting the drain.
    pub fn branch_count(&self) -> usize {
        read(&self.branches).len()
    }

    /// Offer an upstream event arriving on a branch.
    ///
    /// The branch's probes see it first. Returns `true` if the event passed
    /// and was forwarded towards the producer.
    pub fn send_upstream(&self, id: BranchId, event: &Event) -> bool {
        let Some(branch) = self.branch(id) else {
            return false;
        };
        if branch
            .probes
            .dispatch(ProbeMask::EVENT_UPSTREAM, &ProbeInfo::Event(event))
            == ProbeReturn::Drop
        {
            trace!(splitter = %self.name, branch = %id, event = event.name(), "upstream event dropped");
            return false;
        }
        self.upstream_forwarded.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// Get statistics about the splitter.
    pub fn stats(&self) -> SplitterStats {
        SplitterStats {
            branches: self.branch_count(),
            drained_buffers: self.drained_buffers.load(Ordering::Relaxed),
            drained_bytes: self.drained_bytes.load(Ordering::Relaxed),
            upstream_forwarded: self.upstream_forwarded.load(Ordering::Relaxed),
        }
    }

    fn snapshot(&self) -> Vec<Arc<SplitterBranch>> {
        read(&self.branches).values().cloned().collect()
    }

}

/// Keep the latest stream-start, caps and segment, in that order.
fn remember(sticky: &mut Vec<Event>, event: &Event) {
    let sticky_slot = |e: &Event| match e {
        Event::StreamStart(_) => Some(0),
        Event::Caps(_) => Some(1),
        Event::Segment(_) => Some(2),
        _ => None,
    };

    if let Some(slot) = sticky_slot(event) {
        sticky.retain(|e| sticky_slot(e) != Some(slot));
        sticky.push(event.clone());
        sticky.sort_by_key(sticky_slot);
    }
}

impl fmt::Debug for Splitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Splitter")
            .field("name", &self.name)
            .field("active_caps", &self.active_caps())
            .field("branches", &self.branch_count())
            .finish()
    }
}

/// Statistics about a splitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SplitterStats {
    /// Attached branches, not counting the drain.
    pub branches: usize,
    /// Buffers consumed by the primary drain.
    pub drained_buffers: u64,
    /// Bytes consumed by the primary drain.
    pub drained_bytes: u64,
    /// Upstream events that passed the branch probes.
    pub upstream_forwarded: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::elements::flow::queue::QueueItem;
    use crate::event::SegmentEvent;
    use crate::format::VideoCodec;

    #[test]
    fn test_splitter_replicates_without_copying() {
        let splitter = Splitter::new("tee");
        let a = splitter.attach_branch(BranchQueue::new(4));
        let b = splitter.attach_branch(BranchQueue::new(4));

        splitter.push_buffer(Buffer::new(vec![9u8; 64], 3));

        let (Some(QueueItem::Buffer(x)), Some(QueueItem::Buffer(y))) =
            (a.queue().try_pop(), b.queue().try_pop())
        else {
            panic!("both branches should hold the buffer");
        };
        assert_eq!(x.data().as_ptr(), y.data().as_ptr());
        assert_eq!(splitter.stats().drained_bytes, 64);
    }

    #[test]
    fn test_caps_event_sets_active_caps() {
        let splitter = Splitter::new("tee");
        assert!(splitter.active_caps().is_none());
        assert!(!splitter.is_compatible(&FormatCaps::Any));

        splitter.push_event(Event::Caps(VideoCodec::Vp8.into()));

        assert_eq!(splitter.active_caps(), Some(VideoCodec::Vp8.into()));
        assert!(splitter.is_compatible(&VideoCodec::Vp8.into()));
        assert!(!splitter.is_compatible(&VideoCodec::H264.into()));
    }

    #[test]
    fn test_late_branch_receives_sticky_events_in_order() {
        let splitter = Splitter::new("tee");
        splitter.push_event(Event::Segment(SegmentEvent::default()));
        splitter.push_event(Event::Caps(FormatCaps::raw_video()));
        splitter.push_event(Event::Caps(FormatCaps::i420()));
        splitter.push_event(Event::Eos);

        let branch = splitter.attach_branch(BranchQueue::new(4));

        assert_eq!(branch.queue().try_pop(), Some(QueueItem::Event(Event::Caps(FormatCaps::i420()))));
        assert_eq!(
            branch.queue().try_pop(),
            Some(QueueItem::Event(Event::Segment(SegmentEvent::default())))
        );
        assert_eq!(branch.queue().try_pop(), None);
    }

    #[test]
    fn test_branch_attached_during_caps_change_sees_latest_caps() {
        for round in 0..2000 {
            let splitter = Splitter::new("tee");
            splitter.push_event(Event::Caps(FormatCaps::raw_video()));

            let branch = std::thread::scope(|s| {
                s.spawn(|| splitter.push_event(Event::Caps(FormatCaps::i420())));
                splitter.attach_branch(BranchQueue::new(4))
            });

            let mut last_caps = None;
            while let Some(item) = branch.queue().try_pop() {
                if let QueueItem::Event(Event::Caps(caps)) = item {
                    last_caps = Some(caps);
                }
            }
            assert_eq!(last_caps, splitter.active_caps(), "round {round}");
            assert_eq!(last_caps, Some(FormatCaps::i420()), "round {round}");
        }
    }

    #[test]
    fn test_detach_branch_flushes_queue() {
        let splitter = Splitter::new("tee");
        let branch = splitter.attach_branch(BranchQueue::new(4));
        splitter.push_buffer(Buffer::new(vec![0u8; 8], 0));

        let detached = splitter.detach_branch(branch.id()).unwrap();

        assert!(detached.queue().is_flushing());
        assert!(detached.queue().is_empty());
        assert_eq!(splitter.branch_count(), 0);
        assert!(splitter.detach_branch(branch.id()).is_none());

        splitter.push_buffer(Buffer::new(vec![0u8; 8], 1));
        assert!(detached.queue().is_empty());
    }

    #[test]
    fn test_branch_probe_drops_upstream_event() {
        let splitter = Splitter::new("tee");
        let branch = splitter.attach_branch(BranchQueue::new(4));
        branch.probes().add(ProbeMask::EVENT_UPSTREAM, |info| match info {
            ProbeInfo::Event(Event::Reconfigure) => ProbeReturn::Drop,
            _ => ProbeReturn::Ok,
        });

        assert!(!splitter.send_upstream(branch.id(), &Event::Reconfigure));
        assert!(splitter.send_upstream(branch.id(), &Event::Custom("force-key-unit".into())));
        assert_eq!(splitter.stats().upstream_forwarded, 1);
    }
}
