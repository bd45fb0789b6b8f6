//! Handler trait and the panic-catching adapter.
//!
//! A [`Handler`] receives every event of a session's life: connection,
//! frames, completed write batches, failures, and the final close. All
//! callbacks are invoked from the session's own tasks, one at a time, so
//! handler code can be written as if it were single-threaded per session.
//! Handlers must not block; long work belongs on a separate task.
//!
//! User code failures never escape into the engine: every callback runs
//! inside [`CatchHandler`], which routes panics to
//! [`except`](Handler::except) and, if `except` itself panics, delivers
//! [`Error::HandlerPanic`] through [`error`](Handler::error).

use std::net::SocketAddr;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use crate::buffer::FrameCursor;
use crate::error::Error;
use crate::persist::PersistentBuffer;
use crate::session::Session;

/// A caught panic from a handler callback.
pub struct Panic {
    payload: Box<dyn std::any::Any + Send>,
    callback: &'static str,
}

impl Panic {
    /// The panic message, when the payload is a string.
    pub fn message(&self) -> &str {
        if let Some(s) = self.payload.downcast_ref::<&'static str>() {
            s
        } else if let Some(s) = self.payload.downcast_ref::<String>() {
            s
        } else {
            "<non-string panic payload>"
        }
    }

    /// Name of the callback that panicked.
    pub fn callback(&self) -> &'static str {
        self.callback
    }

    /// The raw panic payload.
    pub fn payload(&self) -> &(dyn std::any::Any + Send) {
        self.payload.as_ref()
    }
}

impl std::fmt::Debug for Panic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Panic")
            .field("callback", &self.callback)
            .field("message", &self.message())
            .finish()
    }
}

/// Per-session event callbacks.
///
/// Every method has a default implementation, so a handler implements
/// only what it cares about. The defaults follow the engine's policy:
/// a panic reaching the default [`except`](Handler::except) closes the
/// session immediately.
pub trait Handler: Send + Sync + 'static {
    /// The session's socket is connected (or was accepted). Typically
    /// used to pick the protocol and options.
    fn connect(&self, session: &Arc<Session>, peer: SocketAddr) {
        let _ = (session, peer);
    }

    /// One complete frame is ready. `buf` is a cursor over the frame;
    /// see [`FrameCursor`] for the advance/whole/consume contract.
    fn read(&self, session: &Arc<Session>, buf: &mut FrameCursor<'_>) {
        let _ = (session, buf);
    }

    /// An asynchronous write batch was flushed to the socket. `batch` is
    /// the list of persistent buffers just written, in order.
    fn write(&self, session: &Arc<Session>, batch: &[PersistentBuffer]) {
        let _ = (session, batch);
    }

    /// A callback of this handler panicked. Overriding this swallows the
    /// failure; the default policy closes the session immediately.
    fn except(&self, session: &Arc<Session>, panic: &Panic) {
        tracing::error!(
            session = session.id(),
            callback = panic.callback(),
            message = panic.message(),
            "handler panicked; closing session"
        );
        session.close(true);
    }

    /// A socket or framer error occurred. The engine closes the session
    /// immediately after this returns.
    fn error(&self, session: &Arc<Session>, err: &Error) {
        let _ = (session, err);
    }

    /// The session reached `Closed`. Fires exactly once per session.
    fn close(&self, session: &Arc<Session>) {
        let _ = session;
    }
}

/// A handler that ignores every event.
#[derive(Debug, Default)]
pub struct NullHandler;

impl Handler for NullHandler {}

/// Panic-catching wrapper around a user handler.
///
/// The single catch-point for user-code failures: panics from any
/// callback are routed to `except`; a panic from `except` becomes
/// [`Error::HandlerPanic`] delivered through `error`; a panic from
/// `error` is logged and dropped.
#[derive(Clone)]
pub(crate) struct CatchHandler {
    inner: Arc<dyn Handler>,
}

impl CatchHandler {
    pub(crate) fn new(inner: Arc<dyn Handler>) -> Self {
        Self { inner }
    }

    /// The wrapped user handler.
    pub(crate) fn inner(&self) -> Arc<dyn Handler> {
        self.inner.clone()
    }

    pub(crate) fn connect(&self, session: &Arc<Session>, peer: SocketAddr) {
        let _serial = session.callback_gate().lock();
        self.guard("connect", session, || self.inner.connect(session, peer));
    }

    pub(crate) fn read(&self, session: &Arc<Session>, buf: &mut FrameCursor<'_>) {
        let _serial = session.callback_gate().lock();
        let inner = &self.inner;
        let result = catch_unwind(AssertUnwindSafe(|| inner.read(session, buf)));
        if let Err(payload) = result {
            self.dispatch_panic("read", session, payload);
        }
    }

    pub(crate) fn write(&self, session: &Arc<Session>, batch: &[PersistentBuffer]) {
        let _serial = session.callback_gate().lock();
        self.guard("write", session, || self.inner.write(session, batch));
    }

    pub(crate) fn error(&self, session: &Arc<Session>, err: &Error) {
        let _serial = session.callback_gate().lock();
        let result = catch_unwind(AssertUnwindSafe(|| self.inner.error(session, err)));
        if result.is_err() {
            let synthetic = Error::HandlerPanic("error");
            let retry = catch_unwind(AssertUnwindSafe(|| self.inner.error(session, &synthetic)));
            if retry.is_err() {
                tracing::error!(session = session.id(), "error handler panicked twice");
            }
        }
    }

    pub(crate) fn close(&self, session: &Arc<Session>) {
        let _serial = session.callback_gate().lock();
        self.guard("close", session, || self.inner.close(session));
    }

    fn guard(&self, callback: &'static str, session: &Arc<Session>, f: impl FnOnce()) {
        if let Err(payload) = catch_unwind(AssertUnwindSafe(f)) {
            self.dispatch_panic(callback, session, payload);
        }
    }

    fn dispatch_panic(
        &self,
        callback: &'static str,
        session: &Arc<Session>,
        payload: Box<dyn std::any::Any + Send>,
    ) {
        let panic = Panic { payload, callback };
        let result = catch_unwind(AssertUnwindSafe(|| self.inner.except(session, &panic)));
        if result.is_err() {
            // `except` panicked as well: deliver a synthetic error and
            // close through the engine's error path.
            self.error(session, &Error::HandlerPanic("except"));
            session.close(true);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_panic_message_from_str() {
        let payload = catch_unwind(|| panic!("boom")).unwrap_err();
        let panic = Panic {
            payload,
            callback: "read",
        };
        assert_eq!(panic.message(), "boom");
        assert_eq!(panic.callback(), "read");
    }

    #[test]
    fn test_panic_message_from_string() {
        let payload = catch_unwind(|| panic!("code {}", 7)).unwrap_err();
        let panic = Panic {
            payload,
            callback: "connect",
        };
        assert_eq!(panic.message(), "code 7");
    }

    #[test]
    fn test_panic_message_fallback() {
        let payload = catch_unwind(|| std::panic::panic_any(42u32)).unwrap_err();
        let panic = Panic {
            payload,
            callback: "write",
        };
        assert_eq!(panic.message(), "<non-string panic payload>");
    }
}
