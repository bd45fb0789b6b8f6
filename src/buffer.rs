//! Triple-segmented read buffer.
//!
//! One contiguous allocation carries three logical segments:
//!
//! ```text
//! ┌─────────────────┬─────────────────┬─────────┐
//! │ external input  │ internal input  │ output  │
//! └─────────────────┴─────────────────┴─────────┘
//! 0                 E                 E+I       len
//! ```
//!
//! - **output** is filled by socket reads,
//! - **internal** accumulates committed bytes until a frame boundary is
//!   found,
//! - **external** holds complete frames presented to the user handler.
//!
//! Bytes flow output → internal → external without being copied between
//! stages; only [`consume_external`](TripleBuffer::consume_external)
//! physically moves memory. A *current* range inside the external segment
//! marks the frame most recently presented to the handler; it survives
//! consumption because consuming shifts the range along with the data.

use std::fmt;
use std::ops::Range;

/// The session's read buffer, partitioned into external, internal and
/// output segments.
pub struct TripleBuffer {
    /// Backing storage. `0..external` is the external segment,
    /// `external..external + internal` the internal segment, the rest is
    /// output.
    storage: Vec<u8>,
    external: usize,
    internal: usize,
    /// The frame currently presented to the handler, as a range inside
    /// `0..external`.
    current: Range<usize>,
}

impl TripleBuffer {
    /// Create an empty buffer.
    pub fn new() -> Self {
        Self {
            storage: Vec::new(),
            external: 0,
            internal: 0,
            current: 0..0,
        }
    }

    /// Total length of the backing storage.
    #[inline]
    pub fn len(&self) -> usize {
        self.storage.len()
    }

    /// Check whether the storage is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.storage.is_empty()
    }

    /// Length of the external segment.
    #[inline]
    pub fn external_len(&self) -> usize {
        self.external
    }

    /// Length of the internal segment.
    #[inline]
    pub fn internal_len(&self) -> usize {
        self.internal
    }

    /// Length of the output segment.
    #[inline]
    pub fn output_len(&self) -> usize {
        self.storage.len() - self.external - self.internal
    }

    /// The external segment: complete frames available to the handler.
    #[inline]
    pub fn external_slice(&self) -> &[u8] {
        &self.storage[..self.external]
    }

    /// The internal segment: committed bytes not yet framed.
    #[inline]
    pub fn internal_slice(&self) -> &[u8] {
        &self.storage[self.external..self.external + self.internal]
    }

    /// Ensure the output segment is exactly `n` bytes and return it as a
    /// writable slice. Any previous output content is discarded.
    pub fn prepare_output(&mut self, n: usize) -> &mut [u8] {
        let used = self.external + self.internal;
        self.storage.resize(used + n, 0);
        &mut self.storage[used..]
    }

    /// Move at most `n` bytes from the start of output into the internal
    /// segment.
    pub fn commit_to_internal(&mut self, n: usize) {
        self.internal += n.min(self.output_len());
    }

    /// Move the whole internal segment into the external segment.
    pub fn commit_whole_internal(&mut self) {
        self.external += self.internal;
        self.internal = 0;
    }

    /// Move at most `n` bytes from the start of internal into the
    /// external segment.
    pub fn commit_to_external(&mut self, n: usize) {
        let n = n.min(self.internal);
        self.external += n;
        self.internal -= n;
    }

    /// Drop the first `n` bytes of the external segment, shifting the
    /// rest of the buffer down. The current range shifts with the data.
    pub fn consume_external(&mut self, n: usize) {
        let n = n.min(self.external);
        if n == 0 {
            return;
        }
        self.storage.drain(..n);
        self.external -= n;
        self.current = self.current.start.saturating_sub(n)..self.current.end.saturating_sub(n);
    }

    /// Drop the entire external segment.
    pub fn consume_whole_external(&mut self) {
        self.consume_external(self.external);
    }

    /// Mark the present end of the external segment as the start of the
    /// next frame. Used at the top of each read tick, and to hide
    /// protocol bytes that were committed but must not re-appear in a
    /// delivered frame.
    pub fn mark_current(&mut self) {
        self.current = self.external..self.external;
    }

    /// Extend the current range to cover the bytes committed to external
    /// since the last mark: the newly completed frame.
    pub fn advance_current(&mut self) {
        self.current = self.current.end..self.external;
    }

    /// The current frame as a slice.
    #[inline]
    pub fn current_slice(&self) -> &[u8] {
        &self.storage[self.current.clone()]
    }

    #[inline]
    pub(crate) fn current_range(&self) -> Range<usize> {
        self.current.clone()
    }
}

impl Default for TripleBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TripleBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TripleBuffer")
            .field("external", &self.external)
            .field("internal", &self.internal)
            .field("output", &self.output_len())
            .field("current", &self.current)
            .finish()
    }
}

/// Cursor over the frame currently presented to a `read` handler.
///
/// The cursor narrows a view without consuming: [`advance`](Self::advance)
/// moves the read position forward within the frame, [`whole`](Self::whole)
/// recovers the full frame regardless of advances, and
/// [`consume`](Self::consume) actually drops bytes from the front of the
/// session's external segment. After a `consume` the cursor still points
/// at the same logical bytes.
pub struct FrameCursor<'a> {
    buf: &'a mut TripleBuffer,
    /// Read offset within the current range.
    offset: usize,
}

impl<'a> FrameCursor<'a> {
    pub(crate) fn new(buf: &'a mut TripleBuffer) -> Self {
        Self { buf, offset: 0 }
    }

    /// The unread remainder of the frame.
    #[inline]
    pub fn data(&self) -> &[u8] {
        &self.buf.current_slice()[self.offset..]
    }

    /// Length of the unread remainder.
    #[inline]
    pub fn len(&self) -> usize {
        self.buf.current_range().len() - self.offset
    }

    /// Check whether the remainder is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The whole frame, ignoring any advances.
    #[inline]
    pub fn whole(&self) -> &[u8] {
        self.buf.current_slice()
    }

    /// Advance the read position by `n` bytes, clamped to the frame end.
    /// This narrows the cursor's view; nothing is removed from the
    /// session buffer.
    pub fn advance(&mut self, n: usize) -> &mut Self {
        self.offset = (self.offset + n).min(self.buf.current_range().len());
        self
    }

    /// Drop `n` bytes from the front of the session's external segment.
    ///
    /// This removes data for real (unlike [`advance`](Self::advance)); the
    /// cursor is fixed up so the unread remainder keeps addressing the
    /// same bytes.
    pub fn consume(&mut self, n: usize) -> &mut Self {
        let abs = self.buf.current_range().start + self.offset;
        self.buf.consume_external(n);
        self.offset = abs.saturating_sub(n).saturating_sub(self.buf.current_range().start);
        self
    }
}

impl std::ops::AddAssign<usize> for FrameCursor<'_> {
    /// `cursor += n` advances the read position, like
    /// [`advance`](FrameCursor::advance).
    fn add_assign(&mut self, n: usize) {
        self.advance(n);
    }
}

impl fmt::Debug for FrameCursor<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameCursor")
            .field("len", &self.len())
            .field("whole_len", &self.whole().len())
            .finish()
    }
}
