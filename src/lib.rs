//! # framewire
//!
//! Asynchronous stream-networking framework for building TCP clients and
//! servers from framed sessions.
//!
//! Each connection gets a [`Session`] that performs framed reading
//! against a configurable wire protocol, queued non-blocking writing
//! with caller-owned payload storage, and delivery of events to a user
//! [`Handler`]. Protocol implementations — echo servers, line-oriented
//! protocols, length-prefixed RPC, proxies — are written as handlers
//! that reconfigure the session's framing on the fly.
//!
//! ## Architecture
//!
//! ```text
//! socket ──► framer ──► triple buffer ──► Handler::read(frame)
//!                                              │
//! socket ◄── writer ◄── write queue ◄── Session::write(buffers)
//! ```
//!
//! - **Read path**: the framer fills the triple buffer's output segment
//!   from the socket, commits bytes inward until the configured framing
//!   ([`Protocol`]) finds a frame boundary, then presents the frame to
//!   the handler without copying.
//! - **Write path**: [`PersistentBuffer`]s — byte views tied to the
//!   storage that keeps them alive — are staged on a queue and flushed
//!   in marked batches with scatter/gather writes.
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use framewire::{Acceptor, FrameCursor, Handler, Protocol, Session, persist};
//!
//! struct Echo;
//!
//! impl Handler for Echo {
//!     fn connect(&self, session: &Arc<Session>, _peer: std::net::SocketAddr) {
//!         session.set_protocol(Protocol::DelimLf);
//!     }
//!
//!     fn read(&self, session: &Arc<Session>, buf: &mut FrameCursor<'_>) {
//!         session.write(persist::copied(buf.data()));
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> framewire::Result<()> {
//!     let server = Acceptor::new(Arc::new(Echo));
//!     let addr = server.bind("127.0.0.1:0".parse().unwrap()).await?;
//!     println!("echoing on {addr}");
//!     std::future::pending::<()>().await;
//!     Ok(())
//! }
//! ```

pub mod any;
pub mod attrs;
pub mod buffer;
pub mod error;
pub mod handler;
pub mod persist;
pub mod protocol;
pub mod queue;
pub mod registry;
pub mod service;
pub mod session;

mod framer;
mod writer;

pub use any::Any;
pub use attrs::AttributeSet;
pub use buffer::{FrameCursor, TripleBuffer};
pub use error::{Error, Result};
pub use handler::{Handler, NullHandler, Panic};
pub use persist::PersistentBuffer;
pub use protocol::{Options, Protocol};
pub use registry::SessionRegistry;
pub use service::{Acceptor, Connector, Service};
pub use session::{Session, Status};
