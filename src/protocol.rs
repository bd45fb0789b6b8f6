//! Wire framing selection.
//!
//! A session reads its peer through one of thirteen framings, selected at
//! runtime through [`Session::set_protocol`](crate::session::Session::set_protocol).
//! The framing decides where one frame ends and the next begins:
//!
//! - `None` — no reading at all; the session idles until reconfigured.
//! - `Any` — whatever one socket read returns is one frame.
//! - `Fixed` — exactly `read_buffer_size` bytes per frame.
//! - `Delim*` — frame ends at a delimiter byte sequence.
//! - `Prefix*` — an unsigned length prefix (1/2/4/8 bytes or varint)
//!   declares the frame body length.
//!
//! [`Options`] is an independent bit set modifying how the framing
//! interacts with the session buffer and how prefixes are decoded.

use std::fmt;

/// Wire framing for session reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    /// Do not read; the session sits in `Connected` until reconfigured.
    None,
    /// Deliver whatever a single socket read produces.
    Any,
    /// Deliver exactly `read_buffer_size` bytes per frame.
    Fixed,
    /// Frame ends at the session's configured delimiter.
    Delim,
    /// Frame ends at `\0`.
    DelimZero,
    /// Frame ends at `\r`.
    DelimCr,
    /// Frame ends at `\n`.
    DelimLf,
    /// Frame ends at `\r\n`.
    DelimCrlf,
    /// 1-byte unsigned length prefix.
    Prefix8,
    /// 2-byte unsigned length prefix.
    Prefix16,
    /// 4-byte unsigned length prefix.
    Prefix32,
    /// 8-byte unsigned length prefix.
    Prefix64,
    /// Base-128 varint length prefix, at most 9 bytes.
    ///
    /// The accumulator is big-endian by default (first byte carries the
    /// most significant 7-bit group). Set [`Options::USE_LITTLE_ENDIAN`]
    /// for the ProtoBuf-compatible order.
    PrefixVar,
}

impl Protocol {
    /// Width in bytes of a fixed-size length prefix, if this framing has one.
    #[inline]
    pub(crate) fn prefix_width(self) -> Option<usize> {
        match self {
            Protocol::Prefix8 => Some(1),
            Protocol::Prefix16 => Some(2),
            Protocol::Prefix32 => Some(4),
            Protocol::Prefix64 => Some(8),
            _ => None,
        }
    }

    /// Built-in delimiter bytes for the `Delim*` shorthands.
    #[inline]
    pub(crate) fn builtin_delimiter(self) -> Option<&'static [u8]> {
        match self {
            Protocol::DelimZero => Some(b"\0"),
            Protocol::DelimCr => Some(b"\r"),
            Protocol::DelimLf => Some(b"\n"),
            Protocol::DelimCrlf => Some(b"\r\n"),
            _ => None,
        }
    }
}

/// Bit set of framing options.
///
/// Combine with `|`:
///
/// ```
/// use framewire::protocol::Options;
///
/// let opts = Options::USE_LITTLE_ENDIAN | Options::IGNORE_PROTOCOL_BYTES;
/// assert!(opts.contains(Options::USE_LITTLE_ENDIAN));
/// assert!(!opts.contains(Options::INCLUDE_PREFIX_IN_PAYLOAD));
/// ```
#[derive(Clone, Copy, Default, PartialEq, Eq)]
pub struct Options(u32);

impl Options {
    /// Empty option set.
    pub const NONE: Options = Options(0);

    /// Do not consume the external segment at the start of a read tick.
    ///
    /// Delivered frames accumulate in the external segment, so a handler
    /// can keep earlier frames addressable while parsing later ones.
    pub const DO_NOT_CONSUME_BUFFER: Options = Options(1);

    /// Exclude protocol bytes (delimiter or length prefix) from the
    /// delivered frame. The bytes are still consumed from the wire.
    /// Supported by the `Delim*` and `Prefix*` framings.
    pub const IGNORE_PROTOCOL_BYTES: Options = Options(1 << 1);

    /// Decode length prefixes little-endian (for `PrefixVar`, the
    /// ProtoBuf group order). Supported by the `Prefix*` framings.
    pub const USE_LITTLE_ENDIAN: Options = Options(1 << 2);

    /// The declared length counts the prefix bytes themselves. Supported
    /// by the fixed-width `Prefix*` framings; rejected for `PrefixVar`.
    pub const INCLUDE_PREFIX_IN_PAYLOAD: Options = Options(1 << 3);

    /// Check whether all bits of `other` are set in `self`.
    #[inline]
    pub fn contains(self, other: Options) -> bool {
        self.0 & other.0 == other.0
    }

    /// Check whether no bits are set.
    #[inline]
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Raw bit representation.
    #[inline]
    pub fn bits(self) -> u32 {
        self.0
    }

    /// Reconstruct from raw bits. Unknown bits are kept but ignored.
    #[inline]
    pub fn from_bits(bits: u32) -> Options {
        Options(bits)
    }
}

impl std::ops::BitOr for Options {
    type Output = Options;

    #[inline]
    fn bitor(self, rhs: Options) -> Options {
        Options(self.0 | rhs.0)
    }
}

impl std::ops::BitOrAssign for Options {
    #[inline]
    fn bitor_assign(&mut self, rhs: Options) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for Options {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut set = f.debug_set();
        if self.contains(Options::DO_NOT_CONSUME_BUFFER) {
            set.entry(&"do_not_consume_buffer");
        }
        if self.contains(Options::IGNORE_PROTOCOL_BYTES) {
            set.entry(&"ignore_protocol_bytes");
        }
        if self.contains(Options::USE_LITTLE_ENDIAN) {
            set.entry(&"use_little_endian");
        }
        if self.contains(Options::INCLUDE_PREFIX_IN_PAYLOAD) {
            set.entry(&"include_prefix_in_payload");
        }
        set.finish()
    }
}
