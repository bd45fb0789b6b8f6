//! Length-prefixed echo server and client on one loopback socket.
//!
//! This demo shows:
//! - Binding an acceptor and dialing it with a connector
//! - Selecting a length-prefixed framing from the `connect` callback
//! - Echoing frames back through the persistent-buffer write path
//!
//! Run with:
//!
//! ```text
//! cargo run --example echo
//! ```

use std::net::SocketAddr;
use std::sync::Arc;

use framewire::{persist, Acceptor, Connector, FrameCursor, Handler, Options, Protocol, Session};

/// Server side: echo every frame back to its sender.
struct EchoServer;

impl Handler for EchoServer {
    fn connect(&self, session: &Arc<Session>, peer: SocketAddr) {
        println!("[server] session {} connected from {}", session.id(), peer);
        session.configure(
            Protocol::Prefix32,
            65536,
            Options::USE_LITTLE_ENDIAN | Options::IGNORE_PROTOCOL_BYTES,
        );
    }

    fn read(&self, session: &Arc<Session>, buf: &mut FrameCursor<'_>) {
        println!(
            "[server] session {} frame: {:?}",
            session.id(),
            String::from_utf8_lossy(buf.data())
        );
        let mut reply = (buf.data().len() as u32).to_le_bytes().to_vec();
        reply.extend_from_slice(buf.data());
        session.write(reply);
    }

    fn close(&self, session: &Arc<Session>) {
        println!("[server] session {} closed", session.id());
    }
}

/// Client side: print echoed frames.
struct EchoClient {
    done: tokio::sync::mpsc::UnboundedSender<Vec<u8>>,
}

impl Handler for EchoClient {
    fn connect(&self, session: &Arc<Session>, _peer: SocketAddr) {
        session.configure(
            Protocol::Prefix32,
            65536,
            Options::USE_LITTLE_ENDIAN | Options::IGNORE_PROTOCOL_BYTES,
        );
    }

    fn read(&self, _session: &Arc<Session>, buf: &mut FrameCursor<'_>) {
        let _ = self.done.send(buf.data().to_vec());
    }
}

#[tokio::main]
async fn main() -> framewire::Result<()> {
    tracing_subscriber::fmt::init();

    let server = Acceptor::new(Arc::new(EchoServer));
    let addr = server.bind("127.0.0.1:0".parse().unwrap()).await?;
    println!("[server] listening on {addr}");

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let client = Connector::new(addr, Arc::new(EchoClient { done: tx }));
    let session = client.connect().await?;

    for message in ["hello", "framed", "world"] {
        let mut wire = (message.len() as u32).to_le_bytes().to_vec();
        wire.extend_from_slice(message.as_bytes());
        session.write(persist::from_owner(wire));

        let echoed = rx.recv().await.expect("echo reply");
        println!("[client] echoed: {:?}", String::from_utf8_lossy(&echoed));
        assert_eq!(echoed, message.as_bytes());
    }

    session.close(false);
    Ok(())
}
