//! Framer: drives socket reads and cuts the byte stream into frames.
//!
//! One framer task per session. Each tick snapshots the session's
//! framing configuration (a handler may have changed it during the
//! previous callback), consumes the previously delivered frame unless
//! [`Options::DO_NOT_CONSUME_BUFFER`] is set, and then runs the
//! algorithm for the configured protocol until one frame is complete.
//! The frame is presented to the handler through a [`FrameCursor`] and
//! the tick repeats.
//!
//! Framing violations (oversized declared lengths, over-long prefixes,
//! under-declared included prefixes) are routed to the session's error
//! path and close the connection.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::buffer::{FrameCursor, TripleBuffer};
use crate::error::{Error, Result};
use crate::protocol::{Options, Protocol};
use crate::session::{Config, Session, Status};

/// A varint length prefix spans at most 9 bytes: 8 payload groups plus
/// the terminating byte.
const VARINT_MAX_BYTES: usize = 9;

/// Upper bound on a single speculative socket read.
const READ_CHUNK_LIMIT: usize = 65536;

/// Read driver for one session.
pub(crate) struct Framer<R> {
    rd: R,
    buf: TripleBuffer,
}

impl<R: AsyncRead + Unpin> Framer<R> {
    pub(crate) fn new(rd: R) -> Self {
        Self {
            rd,
            buf: TripleBuffer::new(),
        }
    }

    /// Read loop. Exits when the session closes or a transport/framing
    /// error is routed to the session.
    pub(crate) async fn run(mut self, session: Arc<Session>) {
        loop {
            match self.tick(&session).await {
                Ok(true) => {}
                Ok(false) => return,
                Err(err) => {
                    session.fail(err);
                    return;
                }
            }
        }
    }

    /// One read tick: frame boundary bookkeeping, then the protocol
    /// algorithm. Returns `Ok(false)` when the session is shutting down.
    async fn tick(&mut self, session: &Arc<Session>) -> Result<bool> {
        if session.status() >= Status::Closing {
            return Ok(false);
        }
        session.enter_reading();

        let cfg = session.config_snapshot();
        if !cfg.options.contains(Options::DO_NOT_CONSUME_BUFFER) {
            self.buf.consume_whole_external();
        }
        self.buf.mark_current();

        match cfg.protocol {
            Protocol::None => {
                session.leave_reading();
                self.park(session).await
            }
            Protocol::Any => self.read_any(session, &cfg).await,
            Protocol::Fixed => self.read_sized(session, cfg.read_buffer_size).await,
            Protocol::Delim => {
                let delim = cfg.delimiter.clone();
                self.read_delim(session, &delim, &cfg).await
            }
            Protocol::DelimZero | Protocol::DelimCr | Protocol::DelimLf | Protocol::DelimCrlf => {
                let delim = cfg
                    .protocol
                    .builtin_delimiter()
                    .expect("builtin delimiter");
                self.read_delim(session, delim, &cfg).await
            }
            Protocol::Prefix8 | Protocol::Prefix16 | Protocol::Prefix32 | Protocol::Prefix64 => {
                self.read_prefix(session, cfg.protocol.prefix_width(), &cfg).await
            }
            Protocol::PrefixVar => self.read_prefix(session, None, &cfg).await,
        }
    }

    /// Idle on [`Protocol::None`] until the configuration changes or the
    /// session closes.
    async fn park(&mut self, session: &Arc<Session>) -> Result<bool> {
        loop {
            if session.status() >= Status::Closing {
                return Ok(false);
            }
            if session.protocol() != Protocol::None {
                return Ok(true);
            }
            tokio::select! {
                biased;
                _ = session.wait_status(Status::Closing) => return Ok(false),
                _ = session.wait_config_change() => {}
            }
        }
    }

    /// Best-effort framing: one socket read (or the bytes already
    /// buffered) is one frame.
    async fn read_any(&mut self, session: &Arc<Session>, cfg: &Config) -> Result<bool> {
        let cap = chunk_cap(cfg);
        if self.buf.internal_len() > 0 {
            self.buf.commit_to_external(cap);
            self.deliver(session);
            return Ok(true);
        }
        match self.read_some(session, cap).await? {
            None => Ok(false),
            Some(n) => {
                self.buf.commit_to_internal(n);
                self.buf.commit_whole_internal();
                self.deliver(session);
                Ok(true)
            }
        }
    }

    /// Deliver exactly `n` bytes as one frame, reading only the missing
    /// part from the socket.
    async fn read_sized(&mut self, session: &Arc<Session>, n: usize) -> Result<bool> {
        if !self.ensure_internal(session, n).await? {
            return Ok(false);
        }
        self.buf.commit_to_external(n);
        self.deliver(session);
        Ok(true)
    }

    /// Delimiter framing. An empty delimiter degrades to `Any`.
    async fn read_delim(
        &mut self,
        session: &Arc<Session>,
        delim: &[u8],
        cfg: &Config,
    ) -> Result<bool> {
        if delim.is_empty() {
            return self.read_any(session, cfg).await;
        }
        let ignore = cfg.options.contains(Options::IGNORE_PROTOCOL_BYTES);
        let cap = chunk_cap(cfg);
        let mut scan_from = 0usize;

        loop {
            let found = {
                let internal = self.buf.internal_slice();
                let start = scan_from.min(internal.len());
                find_delimiter(&internal[start..], delim).map(|p| start + p)
            };
            if let Some(pos) = found {
                // Frame runs up to the delimiter; with ignore set the
                // delimiter bytes stay out of the presented slice and
                // are committed (already presented) after delivery.
                let keep = if ignore { pos } else { pos + delim.len() };
                self.buf.commit_to_external(keep);
                self.deliver(session);
                if ignore {
                    self.buf.commit_to_external(delim.len());
                }
                return Ok(true);
            }

            // Re-scan only the tail that could still complete a match.
            scan_from = self.buf.internal_len().saturating_sub(delim.len() - 1);
            match self.read_some(session, cap).await? {
                None => return Ok(false),
                Some(n) => self.buf.commit_to_internal(n),
            }
        }
    }

    /// Length-prefixed framing; `width` is the fixed prefix size in
    /// bytes, or `None` for varint.
    async fn read_prefix(
        &mut self,
        session: &Arc<Session>,
        width: Option<usize>,
        cfg: &Config,
    ) -> Result<bool> {
        let var = width.is_none();
        if var && cfg.options.contains(Options::INCLUDE_PREFIX_IN_PAYLOAD) {
            // Undefined combination; reject rather than guess.
            return Err(Error::ProtocolNotSupported);
        }
        let little = cfg.options.contains(Options::USE_LITTLE_ENDIAN);

        // Accumulate the complete prefix in the internal segment.
        let len = loop {
            let (complete, need) = {
                let internal = self.buf.internal_slice();
                match width {
                    Some(w) if internal.len() >= w => (Some(w), 0),
                    Some(w) => (None, w - internal.len()),
                    None => match scan_varint(internal)? {
                        Some(l) => (Some(l), 0),
                        None => (None, 1),
                    },
                }
            };
            if let Some(len) = complete {
                break len;
            }
            if !self.read_more(session, need).await? {
                return Ok(false);
            }
        };

        let declared = decode_prefix(&self.buf.internal_slice()[..len], var, little);

        let mut body = declared;
        if cfg.options.contains(Options::INCLUDE_PREFIX_IN_PAYLOAD) {
            if body < len as u64 {
                return Err(Error::BadMessage);
            }
            body -= len as u64;
        }
        if body > cfg.read_buffer_size as u64 {
            return Err(Error::MessageSize {
                declared: body,
                limit: cfg.read_buffer_size,
            });
        }

        // The prefix joins the external segment; hide it from the frame
        // when protocol bytes are ignored.
        self.buf.commit_to_external(len);
        if cfg.options.contains(Options::IGNORE_PROTOCOL_BYTES) {
            self.buf.mark_current();
        }

        self.read_sized(session, body as usize).await
    }

    /// Make sure at least `n` bytes sit in the internal segment.
    async fn ensure_internal(&mut self, session: &Arc<Session>, n: usize) -> Result<bool> {
        while self.buf.internal_len() < n {
            let need = n - self.buf.internal_len();
            if !self.read_more(session, need).await? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Read exactly `need` bytes from the socket into the internal
    /// segment. Returns `Ok(false)` when the session started closing.
    async fn read_more(&mut self, session: &Session, need: usize) -> Result<bool> {
        let slice = self.buf.prepare_output(need);
        tokio::select! {
            biased;
            _ = session.wait_status(Status::Closing) => return Ok(false),
            r = self.rd.read_exact(slice) => { r?; }
        }
        self.buf.commit_to_internal(need);
        Ok(true)
    }

    /// One best-effort read of up to `cap` bytes into the output
    /// segment. Returns `Ok(None)` when the session started closing.
    async fn read_some(&mut self, session: &Session, cap: usize) -> Result<Option<usize>> {
        let slice = self.buf.prepare_output(cap);
        tokio::select! {
            biased;
            _ = session.wait_status(Status::Closing) => Ok(None),
            r = self.rd.read(slice) => match r {
                Ok(0) => Err(Error::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "connection closed by peer",
                ))),
                Ok(n) => Ok(Some(n)),
                Err(e) => Err(e.into()),
            },
        }
    }

    /// Present the newly committed external bytes as one frame.
    fn deliver(&mut self, session: &Arc<Session>) {
        self.buf.advance_current();
        let handler = session.handler_adapter();
        let mut cursor = FrameCursor::new(&mut self.buf);
        handler.read(session, &mut cursor);
    }
}

fn chunk_cap(cfg: &Config) -> usize {
    cfg.read_buffer_size.min(READ_CHUNK_LIMIT).max(1)
}

/// First occurrence of `needle` in `haystack`.
fn find_delimiter(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || needle.len() > haystack.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Locate the end of a varint at the start of `internal`.
///
/// Returns the prefix length when the terminating byte (continuation bit
/// clear) is present, `None` when more bytes are needed, and
/// [`Error::ValueTooLarge`] when the continuation bit is still set on
/// the ninth byte.
fn scan_varint(internal: &[u8]) -> Result<Option<usize>> {
    for (i, b) in internal.iter().take(VARINT_MAX_BYTES).enumerate() {
        if b & 0x80 == 0 {
            return Ok(Some(i + 1));
        }
    }
    if internal.len() >= VARINT_MAX_BYTES {
        Err(Error::ValueTooLarge)
    } else {
        Ok(None)
    }
}

/// Decode a length prefix.
///
/// Fixed-width prefixes are plain unsigned integers. Varints contribute
/// the low 7 bits of each byte; the accumulator order is big-endian
/// (first byte is the most significant group) unless `little_endian`,
/// which matches the ProtoBuf varint layout.
fn decode_prefix(header: &[u8], var: bool, little_endian: bool) -> u64 {
    let mut size: u64 = 0;
    if little_endian {
        if var {
            for (i, b) in header.iter().enumerate() {
                size |= u64::from(b & 0x7f) << (7 * i);
            }
        } else {
            for (i, b) in header.iter().enumerate() {
                size |= u64::from(*b) << (8 * i);
            }
        }
    } else if var {
        for b in header {
            size = (size << 7) | u64::from(b & 0x7f);
        }
    } else {
        for b in header {
            size = (size << 8) | u64::from(*b);
        }
    }
    size
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_fixed_big_endian() {
        assert_eq!(decode_prefix(&[0x05], false, false), 5);
        assert_eq!(decode_prefix(&[0x01, 0x00], false, false), 256);
        assert_eq!(decode_prefix(&[0x00, 0x00, 0x01, 0x02], false, false), 258);
        assert_eq!(
            decode_prefix(&[0xff; 8], false, false),
            u64::MAX
        );
    }

    #[test]
    fn test_decode_fixed_little_endian() {
        assert_eq!(decode_prefix(&[0x05, 0x00, 0x00, 0x00], false, true), 5);
        assert_eq!(decode_prefix(&[0x00, 0x01], false, true), 256);
    }

    #[test]
    fn test_decode_varint_little_endian_is_protobuf() {
        // 0x82 0x01: (0x82 & 0x7f) + 0x01 << 7 = 2 + 128 = 130.
        assert_eq!(decode_prefix(&[0x82, 0x01], true, true), 130);
        assert_eq!(decode_prefix(&[0x00], true, true), 0);
        assert_eq!(decode_prefix(&[0x7f], true, true), 127);
        assert_eq!(decode_prefix(&[0x80, 0x01], true, true), 128);
    }

    #[test]
    fn test_decode_varint_big_endian_default() {
        // First byte is the most significant group: 0x82 0x01 = 2·128 + 1.
        assert_eq!(decode_prefix(&[0x82, 0x01], true, false), 257);
        assert_eq!(decode_prefix(&[0x81, 0x00], true, false), 128);
    }

    #[test]
    fn test_scan_varint_complete() {
        assert_eq!(scan_varint(&[0x05]).unwrap(), Some(1));
        assert_eq!(scan_varint(&[0x82, 0x01]).unwrap(), Some(2));
        assert_eq!(scan_varint(&[0x80, 0x80, 0x00]).unwrap(), Some(3));
    }

    #[test]
    fn test_scan_varint_incomplete() {
        assert_eq!(scan_varint(&[]).unwrap(), None);
        assert_eq!(scan_varint(&[0x80]).unwrap(), None);
        assert_eq!(scan_varint(&[0x80; 8]).unwrap(), None);
    }

    #[test]
    fn test_scan_varint_nine_bytes_terminated() {
        let mut bytes = [0x80u8; 9];
        bytes[8] = 0x01;
        assert_eq!(scan_varint(&bytes).unwrap(), Some(9));
    }

    #[test]
    fn test_scan_varint_continuation_on_ninth_byte() {
        let bytes = [0x80u8; 9];
        assert!(matches!(scan_varint(&bytes), Err(Error::ValueTooLarge)));
    }

    #[test]
    fn test_find_delimiter() {
        assert_eq!(find_delimiter(b"hello\r\nworld", b"\r\n"), Some(5));
        assert_eq!(find_delimiter(b"hello", b"\r\n"), None);
        assert_eq!(find_delimiter(b"\nabc", b"\n"), Some(0));
        assert_eq!(find_delimiter(b"ab", b"abc"), None);
        assert_eq!(find_delimiter(b"abc", b""), None);
    }

    #[test]
    fn test_chunk_cap_bounds() {
        let mut cfg = Config::default();
        cfg.read_buffer_size = 1 << 20;
        assert_eq!(chunk_cap(&cfg), READ_CHUNK_LIMIT);
        cfg.read_buffer_size = 128;
        assert_eq!(chunk_cap(&cfg), 128);
        cfg.read_buffer_size = 0;
        assert_eq!(chunk_cap(&cfg), 1);
    }
}
