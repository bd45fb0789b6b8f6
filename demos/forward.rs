//! TCP forwarder: pipes every accepted connection to an upstream.
//!
//! Demonstrates linking two sessions through the attribute map: the
//! inbound session parks (`Protocol::None`) while the upstream leg is
//! dialed with a seeded back-reference, then both sides relay frames to
//! each other and propagate close.
//!
//! ```text
//! cargo run --example line_server          # upstream on 7878
//! cargo run --example forward              # forwarder on 7979
//! nc 127.0.0.1 7979
//! ```

use std::net::SocketAddr;
use std::sync::{Arc, Weak};

use framewire::{
    persist, Acceptor, Any, AttributeSet, FrameCursor, Handler, Protocol, Session,
};

/// Key under which each session stores a weak handle to its peer leg.
const PEER: &str = "peer";

struct Forwarder {
    upstream: SocketAddr,
}

impl Forwarder {
    fn peer_of(session: &Arc<Session>) -> Option<Arc<Session>> {
        session
            .attrs()
            .get_as::<Weak<Session>>(PEER)
            .and_then(|weak| weak.upgrade())
    }
}

impl Handler for Forwarder {
    fn connect(&self, session: &Arc<Session>, peer: SocketAddr) {
        if session.attrs().contains(PEER) {
            // Upstream leg: link back to the inbound session and start
            // both directions.
            match Self::peer_of(session) {
                Some(inbound) => {
                    inbound
                        .attrs()
                        .set(PEER, Any::new(Arc::downgrade(session)));
                    session.set_protocol(Protocol::Any);
                    inbound.set_protocol(Protocol::Any);
                    println!("pipe {} <-> {}", inbound.id(), session.id());
                }
                None => session.close(true),
            }
            return;
        }

        // Inbound leg: hold reads until the upstream connects.
        println!("session {} from {}", session.id(), peer);
        session.set_protocol(Protocol::None);

        let upstream = self.upstream;
        let session = session.clone();
        tokio::spawn(async move {
            let attrs = AttributeSet::seeded([(PEER, Any::new(Arc::downgrade(&session)))]);
            if session
                .service()
                .connect_seeded(upstream, attrs)
                .await
                .is_err()
            {
                session.close(true);
            }
        });
    }

    fn read(&self, session: &Arc<Session>, buf: &mut FrameCursor<'_>) {
        match Self::peer_of(session) {
            Some(peer) => peer.write(persist::copied(buf.data())),
            None => session.close(true),
        }
    }

    fn close(&self, session: &Arc<Session>) {
        if let Some(peer) = Self::peer_of(session) {
            peer.close(false);
        }
    }
}

#[tokio::main]
async fn main() -> framewire::Result<()> {
    tracing_subscriber::fmt::init();

    let upstream: SocketAddr = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "127.0.0.1:7878".into())
        .parse()
        .expect("upstream address");

    let acceptor = Acceptor::new(Arc::new(Forwarder { upstream }));
    let addr = acceptor.bind("127.0.0.1:7979".parse().unwrap()).await?;
    println!("forwarding {addr} -> {upstream}");

    std::future::pending::<()>().await;
    Ok(())
}
