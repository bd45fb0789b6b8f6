//! Line-oriented server: newline framing, per-session counters.
//!
//! Connect with netcat and type lines:
//!
//! ```text
//! cargo run --example line_server
//! nc 127.0.0.1 7878
//! ```
//!
//! Each line comes back numbered; `quit` closes the connection
//! gracefully.

use std::net::SocketAddr;
use std::sync::Arc;

use framewire::{Acceptor, Any, FrameCursor, Handler, Options, Protocol, Session};

struct LineServer;

impl Handler for LineServer {
    fn connect(&self, session: &Arc<Session>, peer: SocketAddr) {
        println!("session {} from {}", session.id(), peer);
        session.set_protocol_with_options(Protocol::DelimLf, Options::IGNORE_PROTOCOL_BYTES);
    }

    fn read(&self, session: &Arc<Session>, buf: &mut FrameCursor<'_>) {
        let line = String::from_utf8_lossy(buf.data()).trim_end_matches('\r').to_string();
        if line == "quit" {
            session.write(&b"bye\n"[..]);
            session.close(false);
            return;
        }

        // Per-session line counter kept in the attribute map.
        let mut seq = 0u64;
        session.attrs().compute("seq", |slot| {
            seq = slot.take().and_then(|v| v.get::<u64>()).unwrap_or(0) + 1;
            *slot = Some(Any::new(seq));
        });

        session.write(format!("{seq:>4}: {line}\n"));
    }

    fn close(&self, session: &Arc<Session>) {
        println!("session {} closed", session.id());
    }
}

#[tokio::main]
async fn main() -> framewire::Result<()> {
    tracing_subscriber::fmt::init();

    let server = Acceptor::new(Arc::new(LineServer));
    let addr = server.bind("127.0.0.1:7878".parse().unwrap()).await?;
    println!("line server on {addr} (nc {} {})", addr.ip(), addr.port());

    std::future::pending::<()>().await;
    Ok(())
}
