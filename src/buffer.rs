//! Media buffers.
//!
//! A [`Buffer`] is the unit of data that flows from the node's sink through a
//! splitter into every branch. Cloning is cheap: the payload is a
//! reference-counted [`Bytes`], so replicating a buffer to N branches never
//! copies media data.

use bytes::Bytes;

/// Per-buffer flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct BufferFlags(u32);

impl BufferFlags {
    /// No special flags.
    pub const NONE: Self = Self(0);
    /// Buffer can be decoded on its own (keyframe).
    pub const SYNC_POINT: Self = Self(1 << 0);
    /// Data before this buffer was lost.
    pub const DISCONT: Self = Self(1 << 1);
    /// Last buffer of the stream.
    pub const EOS: Self = Self(1 << 2);

    /// Create empty flags.
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Check if contains a flag.
    pub const fn contains(self, other: Self) -> bool {
        (self.0 & other.0) == other.0
    }

    /// Union of flags.
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }
}

/// A unit of media data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Buffer {
    data: Bytes,
    sequence: u64,
    pts: Option<u64>,
    flags: BufferFlags,
}

impl Buffer {
    /// Create a buffer with the given payload and sequence number.
    pub fn new(data: impl Into<Bytes>, sequence: u64) -> Self {
        Self {
            data: data.into(),
            sequence,
            pts: None,
            flags: BufferFlags::NONE,
        }
    }

    /// Set the presentation timestamp in nanoseconds.
    pub fn with_pts(mut self, pts: u64) -> Self {
        self.pts = Some(pts);
        self
    }

    /// Set buffer flags.
    pub fn with_flags(mut self, flags: BufferFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Payload bytes.
    #[inline]
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    /// Payload length in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the payload is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Sequence number assigned by the producer.
    #[inline]
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Presentation timestamp, if any.
    #[inline]
    pub fn pts(&self) -> Option<u64> {
        self.pts
    }

    /// Buffer flags.
    #[inline]
    pub fn flags(&self) -> BufferFlags {
        self.flags
    }
}
