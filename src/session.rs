//! Per-connection session: status lattice, configuration, write path.
//!
//! A [`Session`] exists from the moment a socket is handed to it until
//! the socket is closed and pending I/O has settled. It owns the triple
//! read buffer (through its framer task) and the write queue; user code
//! and the service registry share the session itself through `Arc`.
//!
//! Status moves through a five-state lattice:
//!
//! ```text
//! Connecting → Connected ⇄ Reading → Closing → Closed
//!                  └───────────┴─── (immediate) ──▶ Closed
//! ```
//!
//! Entering `Closed` is single-shot (a compare-exchange decides the
//! winner), so the `close` callback fires exactly once no matter how
//! close calls and I/O failures race.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, Weak};

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Notify;

use crate::attrs::AttributeSet;
use crate::error::Error;
use crate::framer::Framer;
use crate::handler::{CatchHandler, Handler};
use crate::persist::PersistentBuffer;
use crate::protocol::{Options, Protocol};
use crate::queue::WriteQueue;
use crate::service::Service;
use crate::writer;

/// Session ids are assigned from a process-wide counter, starting at 1.
static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Lifecycle status of a session. Totally ordered:
/// `Connecting < Connected < Reading < Closing < Closed`.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Status {
    Connecting = 0,
    Connected = 1,
    Reading = 2,
    Closing = 3,
    Closed = 4,
}

impl Status {
    fn from_u8(v: u8) -> Status {
        match v {
            0 => Status::Connecting,
            1 => Status::Connected,
            2 => Status::Reading,
            3 => Status::Closing,
            _ => Status::Closed,
        }
    }
}

/// Framing configuration, snapshotted by the framer at the top of every
/// read tick.
#[derive(Debug, Clone)]
pub(crate) struct Config {
    pub protocol: Protocol,
    pub options: Options,
    pub read_buffer_size: usize,
    pub delimiter: Vec<u8>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            protocol: Protocol::Any,
            options: Options::NONE,
            read_buffer_size: 65536,
            delimiter: Vec::new(),
        }
    }
}

/// A framed connection.
pub struct Session {
    id: u64,
    service: Arc<Service>,
    peer: SocketAddr,
    weak_self: Weak<Session>,
    handler: Mutex<CatchHandler>,
    config: Mutex<Config>,
    status: AtomicU8,
    /// Handler-owned resume point for multi-step protocols.
    resume: AtomicU32,
    queue: WriteQueue,
    attrs: AttributeSet,
    /// Wakes the writer task: new buffers enqueued, or close requested.
    write_wake: Notify,
    /// Wakes a framer parked on [`Protocol::None`].
    config_wake: Notify,
    /// Broadcast on entering `Closing` or `Closed`.
    close_notify: Notify,
    /// Serialises handler callbacks across the framer and writer tasks.
    /// Reentrant: a callback may close the session (which fires `close`)
    /// without deadlocking on itself.
    callback_gate: parking_lot::ReentrantMutex<()>,
}

impl Session {
    pub(crate) fn new(
        service: Arc<Service>,
        peer: SocketAddr,
        handler: Arc<dyn Handler>,
        attrs: AttributeSet,
    ) -> Arc<Session> {
        Arc::new_cyclic(|weak_self| Session {
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            service,
            peer,
            weak_self: weak_self.clone(),
            handler: Mutex::new(CatchHandler::new(handler)),
            config: Mutex::new(Config::default()),
            status: AtomicU8::new(Status::Connecting as u8),
            resume: AtomicU32::new(0),
            queue: WriteQueue::new(),
            attrs,
            write_wake: Notify::new(),
            config_wake: Notify::new(),
            close_notify: Notify::new(),
            callback_gate: parking_lot::ReentrantMutex::new(()),
        })
    }

    /// Spawn the framer and writer tasks over the session's socket halves.
    pub(crate) fn start<R, W>(self: &Arc<Self>, rd: R, wr: W)
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        tokio::spawn(Framer::new(rd).run(self.clone()));
        tokio::spawn(writer::write_loop(self.clone(), wr));
    }

    /// The session's immutable id.
    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The owning service.
    #[inline]
    pub fn service(&self) -> &Arc<Service> {
        &self.service
    }

    /// Remote endpoint of the connection.
    #[inline]
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// The session's attribute map.
    #[inline]
    pub fn attrs(&self) -> &AttributeSet {
        &self.attrs
    }

    /// Current lifecycle status.
    pub fn status(&self) -> Status {
        Status::from_u8(self.status.load(Ordering::Acquire))
    }

    // ---- configuration -------------------------------------------------

    /// Current wire protocol.
    pub fn protocol(&self) -> Protocol {
        self.lock_config().protocol
    }

    /// Current protocol options.
    pub fn options(&self) -> Options {
        self.lock_config().options
    }

    /// Current read buffer size: the frame size for [`Protocol::Fixed`]
    /// and the upper bound on prefixed lengths.
    pub fn read_buffer_size(&self) -> usize {
        self.lock_config().read_buffer_size
    }

    /// Current delimiter for [`Protocol::Delim`].
    pub fn delimiter(&self) -> Vec<u8> {
        self.lock_config().delimiter.clone()
    }

    /// Select the wire protocol, resetting options to none.
    pub fn set_protocol(&self, protocol: Protocol) {
        self.set_protocol_with_options(protocol, Options::NONE);
    }

    /// Select the wire protocol and its options.
    pub fn set_protocol_with_options(&self, protocol: Protocol, options: Options) {
        {
            let mut config = self.lock_config();
            config.protocol = protocol;
            config.options = options;
        }
        self.config_wake.notify_one();
    }

    /// Select protocol, read buffer size and options in one step.
    pub fn configure(&self, protocol: Protocol, read_buffer_size: usize, options: Options) {
        {
            let mut config = self.lock_config();
            config.protocol = protocol;
            config.read_buffer_size = read_buffer_size;
            config.options = options;
        }
        self.config_wake.notify_one();
    }

    /// Set the read buffer size. Takes effect at the next read tick.
    pub fn set_read_buffer_size(&self, size: usize) {
        self.lock_config().read_buffer_size = size;
        self.config_wake.notify_one();
    }

    /// Set the delimiter used by [`Protocol::Delim`].
    pub fn set_delimiter(&self, delimiter: impl Into<Vec<u8>>) {
        self.lock_config().delimiter = delimiter.into();
        self.config_wake.notify_one();
    }

    /// Set a single-byte delimiter.
    pub fn set_delimiter_byte(&self, byte: u8) {
        self.set_delimiter(vec![byte]);
    }

    pub(crate) fn config_snapshot(&self) -> Config {
        self.lock_config().clone()
    }

    fn lock_config(&self) -> std::sync::MutexGuard<'_, Config> {
        self.config.lock().unwrap_or_else(|p| p.into_inner())
    }

    // ---- handler -------------------------------------------------------

    /// The current handler.
    pub fn handler(&self) -> Arc<dyn Handler> {
        self.lock_handler().inner()
    }

    /// Install a new handler, returning the previous one. Takes effect on
    /// the next callback; safe to call from inside a callback.
    pub fn set_handler(&self, handler: Arc<dyn Handler>) -> Arc<dyn Handler> {
        let mut slot = self.lock_handler();
        let previous = slot.inner();
        *slot = CatchHandler::new(handler);
        previous
    }

    /// Re-install the owning service's default handler, returning the
    /// previous one.
    pub fn use_service_handler(&self) -> Arc<dyn Handler> {
        self.set_handler(self.service.handler())
    }

    pub(crate) fn handler_adapter(&self) -> CatchHandler {
        self.lock_handler().clone()
    }

    pub(crate) fn callback_gate(&self) -> &parking_lot::ReentrantMutex<()> {
        &self.callback_gate
    }

    fn lock_handler(&self) -> std::sync::MutexGuard<'_, CatchHandler> {
        self.handler.lock().unwrap_or_else(|p| p.into_inner())
    }

    // ---- resume point --------------------------------------------------

    /// The handler-owned resume point. Zero for a fresh session.
    ///
    /// A handler driving a multi-step protocol (several reconfigurations
    /// and frames per logical exchange) matches on this value to pick up
    /// where the previous `read` callback left off.
    pub fn resume_point(&self) -> u32 {
        self.resume.load(Ordering::Acquire)
    }

    /// Set the resume point for the next `read` callback.
    pub fn set_resume_point(&self, point: u32) {
        self.resume.store(point, Ordering::Release);
    }

    // ---- write path ----------------------------------------------------

    /// Queue one buffer for writing. May be called from any thread; the
    /// actual socket write happens on the session's writer task. Writes
    /// submitted after close are dropped.
    pub fn write(&self, buf: impl Into<PersistentBuffer>) {
        self.write_list([buf.into()]);
    }

    /// Queue several buffers as one group. The group is staged under a
    /// single lock hold, so no other writer can interleave within it.
    pub fn write_list<I>(&self, bufs: I)
    where
        I: IntoIterator<Item = PersistentBuffer>,
    {
        if self.status() >= Status::Closing {
            tracing::trace!(session = self.id, "write rejected: session closing");
            return;
        }
        self.queue.enqueue_list(bufs);
        self.write_wake.notify_one();
    }

    pub(crate) fn queue(&self) -> &WriteQueue {
        &self.queue
    }

    // ---- lifecycle -----------------------------------------------------

    /// Close the session.
    ///
    /// `immediate` tears the connection down right away: pending reads
    /// are cancelled and queued writes discarded. A graceful close stops
    /// reading, flushes the write queue, then closes.
    ///
    /// Either way the session ends in `Closed` and the `close` callback
    /// fires exactly once.
    pub fn close(&self, immediate: bool) {
        if immediate {
            self.close_immediate();
        } else {
            self.close_graceful();
        }
    }

    fn close_immediate(&self) {
        loop {
            let current = self.status.load(Ordering::Acquire);
            if current == Status::Closed as u8 {
                return;
            }
            if self
                .status
                .compare_exchange(
                    current,
                    Status::Closed as u8,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_ok()
            {
                self.queue.discard();
                self.wake_all();
                self.fire_close();
                return;
            }
        }
    }

    fn close_graceful(&self) {
        loop {
            let current = self.status.load(Ordering::Acquire);
            match Status::from_u8(current) {
                Status::Connected | Status::Reading => {
                    if self
                        .status
                        .compare_exchange(
                            current,
                            Status::Closing as u8,
                            Ordering::AcqRel,
                            Ordering::Acquire,
                        )
                        .is_ok()
                    {
                        // The framer observes Closing and stops reading;
                        // the writer drains the queue and finalizes.
                        self.wake_all();
                        return;
                    }
                }
                Status::Connecting => {
                    self.close_immediate();
                    return;
                }
                Status::Closing | Status::Closed => return,
            }
        }
    }

    /// Complete a graceful close once the write queue has drained.
    pub(crate) fn finalize_graceful_close(&self) {
        if self
            .status
            .compare_exchange(
                Status::Closing as u8,
                Status::Closed as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
        {
            self.wake_all();
            self.fire_close();
        }
    }

    /// Route a transport or framer error: `error` callback, then
    /// immediate close.
    pub(crate) fn fail(&self, err: Error) {
        if self.status() == Status::Closed {
            return;
        }
        if let Some(session) = self.weak_self.upgrade() {
            self.handler_adapter().error(&session, &err);
        }
        self.close_immediate();
    }

    fn fire_close(&self) {
        self.service.registry().remove(self.id);
        if let Some(session) = self.weak_self.upgrade() {
            self.handler_adapter().close(&session);
        }
    }

    fn wake_all(&self) {
        self.close_notify.notify_waiters();
        self.write_wake.notify_one();
        self.config_wake.notify_one();
    }

    pub(crate) fn mark_connected(&self) {
        self.status
            .store(Status::Connected as u8, Ordering::Release);
    }

    /// `Connected → Reading`, a no-op in any other state.
    pub(crate) fn enter_reading(&self) {
        let _ = self.status.compare_exchange(
            Status::Connected as u8,
            Status::Reading as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    /// `Reading → Connected`, a no-op in any other state. Used when the
    /// protocol drops to [`Protocol::None`].
    pub(crate) fn leave_reading(&self) {
        let _ = self.status.compare_exchange(
            Status::Reading as u8,
            Status::Connected as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    /// Wait until the status reaches at least `threshold`.
    pub(crate) async fn wait_status(&self, threshold: Status) {
        loop {
            if self.status() >= threshold {
                return;
            }
            let notified = self.close_notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.status() >= threshold {
                return;
            }
            notified.await;
        }
    }

    /// Wait for a configuration change (possibly a stale permit; callers
    /// re-check the configuration in a loop).
    pub(crate) async fn wait_config_change(&self) {
        self.config_wake.notified().await;
    }

    /// Wait for new write work or a close request.
    pub(crate) async fn wait_write_wake(&self) {
        self.write_wake.notified().await;
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("status", &self.status())
            .finish()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        // Last-resort cleanup if a session is abandoned without close().
        self.queue.discard();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_total_order() {
        assert!(Status::Connecting < Status::Connected);
        assert!(Status::Connected < Status::Reading);
        assert!(Status::Reading < Status::Closing);
        assert!(Status::Closing < Status::Closed);
    }

    #[test]
    fn test_status_from_u8_roundtrip() {
        for status in [
            Status::Connecting,
            Status::Connected,
            Status::Reading,
            Status::Closing,
            Status::Closed,
        ] {
            assert_eq!(Status::from_u8(status as u8), status);
        }
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.protocol, Protocol::Any);
        assert!(config.options.is_empty());
        assert_eq!(config.read_buffer_size, 65536);
        assert!(config.delimiter.is_empty());
    }
}
