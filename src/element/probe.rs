//! Interception points on pads.
//!
//! A [`ProbeTable`] is an explicit dispatch table of callbacks, each
//! registered with a [`ProbeMask`] selecting which data it sees. Callbacks run
//! inline on whatever thread pushes the data, so they must be short and must
//! not block.
//!
//! The distribution node uses probes for three things:
//!
//! - watching the sink for the segment event that marks the start of data flow
//! - swallowing `Reconfigure` events on output ports and scheduling a reconnect
//! - reading the bitrate estimate on an encoder's input
//!
//! # Example
//!
//! ```rust
//! use tributary::element::{ProbeInfo, ProbeMask, ProbeReturn, ProbeTable};
//! use tributary::event::Event;
//!
//! let probes = ProbeTable::new();
//! probes.add(ProbeMask::EVENT_UPSTREAM, |info| match info {
//!     ProbeInfo::Event(Event::Reconfigure) => ProbeReturn::Drop,
//!     _ => ProbeReturn::Ok,
//! });
//!
//! assert_eq!(
//!     probes.dispatch(ProbeMask::EVENT_UPSTREAM, &ProbeInfo::Event(&Event::Reconfigure)),
//!     ProbeReturn::Drop
//! );
//! ```

use crate::buffer::Buffer;
use crate::event::Event;
use crate::sync::{read, write};
use smallvec::SmallVec;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

/// Handle returned by [`ProbeTable::add`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProbeId(u64);

impl fmt::Display for ProbeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "probe-{}", self.0)
    }
}

/// Selects which data a probe is called for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ProbeMask(u8);

impl ProbeMask {
    /// Buffers flowing downstream.
    pub const BUFFER: Self = Self(1 << 0);
    /// Events flowing downstream.
    pub const EVENT_DOWNSTREAM: Self = Self(1 << 1);
    /// Events flowing upstream.
    pub const EVENT_UPSTREAM: Self = Self(1 << 2);
    /// Everything.
    pub const ALL: Self = Self(0b111);

    /// Whether any bit of `other` is set in `self`.
    pub const fn intersects(self, other: Self) -> bool {
        (self.0 & other.0) != 0
    }

    /// Union of masks.
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }
}

/// What a probe is looking at.
#[derive(Debug, Clone, Copy)]
pub enum ProbeInfo<'a> {
    /// A buffer on its way downstream.
    Buffer(&'a Buffer),
    /// An event, in the direction given to [`ProbeTable::dispatch`].
    Event(&'a Event),
}

/// Verdict of a probe callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProbeReturn {
    /// Let the data through.
    #[default]
    Ok,
    /// Swallow the data; remaining probes are not called.
    Drop,
    /// Let the data through and unregister this probe.
    Remove,
}

type ProbeFn = Arc<dyn Fn(&ProbeInfo<'_>) -> ProbeReturn + Send + Sync>;

struct ProbeEntry {
    id: ProbeId,
    mask: ProbeMask,
    callback: ProbeFn,
}

/// Ordered set of probe callbacks attached to one pad.
pub struct ProbeTable {
    next_id: AtomicU64,
    entries: RwLock<SmallVec<[ProbeEntry; 2]>>,
}

impl ProbeTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            entries: RwLock::new(SmallVec::new()),
        }
    }

    /// Register a callback. Probes run in registration order.
    pub fn add<F>(&self, mask: ProbeMask, callback: F) -> ProbeId
    where
        F: Fn(&ProbeInfo<'_>) -> ProbeReturn + Send + Sync + 'static,
    {
        let id = ProbeId(self.next_id.fetch_add(1, Ordering::Relaxed));
        write(&self.entries).push(ProbeEntry {
            id,
            mask,
            callback: Arc::new(callback),
        });
        id
    }

    /// Unregister a callback. Returns `false` if it was already gone.
    pub fn remove(&self, id: ProbeId) -> bool {
        let mut entries = write(&self.entries);
        let before = entries.len();
        entries.retain(|entry| entry.id != id);
        entries.len() != before
    }

    /// Whether a probe with this id is registered.
    pub fn contains(&self, id: ProbeId) -> bool {
        read(&self.entries).iter().any(|entry| entry.id == id)
    }

    /// Number of registered probes.
    pub fn len(&self) -> usize {
        read(&self.entries).len()
    }

    /// Whether no probe is registered.
    pub fn is_empty(&self) -> bool {
        read(&self.entries).is_empty()
    }

    /// Run every probe whose mask matches `kind`.
    ///
    /// Callbacks are invoked without the table lock held, so a callback may
    /// add or remove probes on the same table.
    pub fn dispatch(&self, kind: ProbeMask, info: &ProbeInfo<'_>) -> ProbeReturn {
        let matching: SmallVec<[(ProbeId, ProbeFn); 2]> = read(&self.entries)
            .iter()
            .filter(|entry| entry.mask.intersects(kind))
            .map(|entry| (entry.id, Arc::clone(&entry.callback)))
            .collect();

        for (id, callback) in matching {
            match callback(info) {
                ProbeReturn::Ok => {}
                ProbeReturn::Remove => {
                    self.remove(id);
                }
                ProbeReturn::Drop => return ProbeReturn::Drop,
            }
        }
        ProbeReturn::Ok
    }

    /// Unregister everything.
    pub fn clear(&self) {
        write(&self.entries).clear();
    }
}

impl Default for ProbeTable {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ProbeTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProbeTable")
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_mask_filters_callbacks() {
        let probes = ProbeTable::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        probes.add(ProbeMask::BUFFER, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            ProbeReturn::Ok
        });

        let buffer = Buffer::new(vec![0u8; 4], 0);
        probes.dispatch(ProbeMask::BUFFER, &ProbeInfo::Buffer(&buffer));
        probes.dispatch(ProbeMask::EVENT_DOWNSTREAM, &ProbeInfo::Event(&Event::Eos));

        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_drop_short_circuits() {
        let probes = ProbeTable::new();
        let later = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&later);
        probes.add(ProbeMask::EVENT_UPSTREAM, |_| ProbeReturn::Drop);
        probes.add(ProbeMask::EVENT_UPSTREAM, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            ProbeReturn::Ok
        });

        let verdict = probes.dispatch(
            ProbeMask::EVENT_UPSTREAM,
            &ProbeInfo::Event(&Event::Reconfigure),
        );
        assert_eq!(verdict, ProbeReturn::Drop);
        assert_eq!(later.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_remove_verdict_unregisters() {
        let probes = ProbeTable::new();
        let id = probes.add(ProbeMask::ALL, |_| ProbeReturn::Remove);
        assert!(probes.contains(id));

        probes.dispatch(ProbeMask::EVENT_DOWNSTREAM, &ProbeInfo::Event(&Event::Eos));

        assert!(!probes.contains(id));
        assert!(probes.is_empty());
    }

    #[test]
    fn test_remove_twice_is_harmless() {
        let probes = ProbeTable::new();
        let id = probes.add(ProbeMask::BUFFER, |_| ProbeReturn::Ok);
        assert!(probes.remove(id));
        assert!(!probes.remove(id));
    }
}
