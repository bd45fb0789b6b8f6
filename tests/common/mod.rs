//! Shared test harness: a handler that records every session event into
//! a channel the test can await.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use framewire::{Error, FrameCursor, Handler, Panic, PersistentBuffer, Session};

/// One observed handler callback.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Connect,
    Read(Vec<u8>),
    Write(usize),
    Except(String),
    Error(String),
    Close,
}

type SetupFn = dyn Fn(&Arc<Session>) + Send + Sync;
type ReadFn = dyn Fn(&Arc<Session>, &mut FrameCursor<'_>) + Send + Sync;

/// Handler that records events and optionally runs per-event logic.
pub struct Recorder {
    tx: mpsc::UnboundedSender<Event>,
    setup: Option<Box<SetupFn>>,
    on_read: Option<Box<ReadFn>>,
    swallow_panics: bool,
}

impl Recorder {
    pub fn new() -> (Arc<Recorder>, mpsc::UnboundedReceiver<Event>) {
        Recorder::builder().build()
    }

    pub fn builder() -> RecorderBuilder {
        RecorderBuilder {
            setup: None,
            on_read: None,
            swallow_panics: false,
        }
    }
}

pub struct RecorderBuilder {
    setup: Option<Box<SetupFn>>,
    on_read: Option<Box<ReadFn>>,
    swallow_panics: bool,
}

impl RecorderBuilder {
    /// Run `f` from the `connect` callback (protocol selection etc.).
    pub fn on_connect(mut self, f: impl Fn(&Arc<Session>) + Send + Sync + 'static) -> Self {
        self.setup = Some(Box::new(f));
        self
    }

    /// Run `f` from the `read` callback, after the event is recorded.
    pub fn on_read(
        mut self,
        f: impl Fn(&Arc<Session>, &mut FrameCursor<'_>) + Send + Sync + 'static,
    ) -> Self {
        self.on_read = Some(Box::new(f));
        self
    }

    /// Keep the session alive when a callback panics (the default
    /// recorder policy closes it, like the engine default).
    pub fn swallow_panics(mut self) -> Self {
        self.swallow_panics = true;
        self
    }

    pub fn build(self) -> (Arc<Recorder>, mpsc::UnboundedReceiver<Event>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Arc::new(Recorder {
                tx,
                setup: self.setup,
                on_read: self.on_read,
                swallow_panics: self.swallow_panics,
            }),
            rx,
        )
    }
}

impl Handler for Recorder {
    fn connect(&self, session: &Arc<Session>, _peer: SocketAddr) {
        let _ = self.tx.send(Event::Connect);
        if let Some(setup) = &self.setup {
            setup(session);
        }
    }

    fn read(&self, session: &Arc<Session>, buf: &mut FrameCursor<'_>) {
        let _ = self.tx.send(Event::Read(buf.data().to_vec()));
        if let Some(on_read) = &self.on_read {
            on_read(session, buf);
        }
    }

    fn write(&self, _session: &Arc<Session>, batch: &[PersistentBuffer]) {
        let _ = self.tx.send(Event::Write(batch.len()));
    }

    fn except(&self, session: &Arc<Session>, panic: &Panic) {
        let _ = self.tx.send(Event::Except(panic.message().to_string()));
        if !self.swallow_panics {
            session.close(true);
        }
    }

    fn error(&self, _session: &Arc<Session>, err: &Error) {
        let _ = self.tx.send(Event::Error(err.to_string()));
    }

    fn close(&self, _session: &Arc<Session>) {
        let _ = self.tx.send(Event::Close);
    }
}

/// Await the next event, failing the test after five seconds.
pub async fn next_event(rx: &mut mpsc::UnboundedReceiver<Event>) -> Event {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for session event")
        .expect("recorder dropped")
}

/// Await the next `Read` event, skipping `Connect` and `Write`.
pub async fn next_read(rx: &mut mpsc::UnboundedReceiver<Event>) -> Vec<u8> {
    loop {
        match next_event(rx).await {
            Event::Read(data) => return data,
            Event::Connect | Event::Write(_) => {}
            other => panic!("expected Read, got {:?}", other),
        }
    }
}

/// Assert that no event arrives within `dur`.
pub async fn expect_silence(rx: &mut mpsc::UnboundedReceiver<Event>, dur: Duration) {
    match tokio::time::timeout(dur, rx.recv()).await {
        Err(_) => {}
        Ok(event) => panic!("expected silence, got {:?}", event),
    }
}
