//! Session lifecycle: close semantics, ordering, panic containment.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};

use common::{expect_silence, next_event, next_read, Event, Recorder};
use framewire::{
    persist, Acceptor, Connector, Error, FrameCursor, Handler, NullHandler, Options, Panic,
    Protocol, Session, Status,
};

async fn raw_server() -> (tokio::net::TcpListener, std::net::SocketAddr) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    (listener, addr)
}

#[tokio::test]
async fn close_callback_fires_exactly_once_under_races() {
    let (listener, addr) = raw_server().await;
    let _hold = listener;

    let (client, mut client_rx) = Recorder::new();
    let connector = Connector::new(addr, client);
    let session = connector.connect().await.unwrap();

    // Hammer close from several tasks, mixing graceful and immediate.
    let mut joins = Vec::new();
    for i in 0..8 {
        let session = session.clone();
        joins.push(tokio::spawn(async move {
            session.close(i % 2 == 0);
        }));
    }
    for j in joins {
        j.await.unwrap();
    }
    assert_eq!(session.status(), Status::Closed);

    assert_eq!(next_event(&mut client_rx).await, Event::Connect);
    assert_eq!(next_event(&mut client_rx).await, Event::Close);
    expect_silence(&mut client_rx, Duration::from_millis(200)).await;
}

#[tokio::test]
async fn graceful_close_flushes_pending_writes() {
    let (listener, addr) = raw_server().await;

    let (client, mut client_rx) = Recorder::new();
    let connector = Connector::new(addr, client);
    let session = connector.connect().await.unwrap();

    let (mut peer, _) = listener.accept().await.unwrap();

    // Queue a megabyte, then close gracefully right away.
    let chunk = vec![0xA5u8; 4096];
    for _ in 0..256 {
        session.write(persist::copied(&chunk));
    }
    session.close(false);

    // Every queued byte arrives before the FIN.
    let mut received = Vec::new();
    peer.read_to_end(&mut received).await.unwrap();
    assert_eq!(received.len(), 256 * 4096);
    assert!(received.iter().all(|&b| b == 0xA5));

    // The session settles in Closed with a single close callback.
    loop {
        match next_event(&mut client_rx).await {
            Event::Close => break,
            Event::Connect | Event::Write(_) => {}
            other => panic!("unexpected event {:?}", other),
        }
    }
    assert_eq!(session.status(), Status::Closed);
}

#[tokio::test]
async fn writes_after_close_are_dropped() {
    let (listener, addr) = raw_server().await;
    let _hold = listener;

    let (client, mut client_rx) = Recorder::new();
    let connector = Connector::new(addr, client);
    let session = connector.connect().await.unwrap();

    session.close(true);
    assert_eq!(next_event(&mut client_rx).await, Event::Connect);
    assert_eq!(next_event(&mut client_rx).await, Event::Close);

    session.write(&b"too late"[..]);
    expect_silence(&mut client_rx, Duration::from_millis(200)).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn write_ordering_under_contention() {
    let (listener, addr) = raw_server().await;

    let connector = Connector::new(addr, Arc::new(NullHandler));
    let session = connector.connect().await.unwrap();

    let (mut peer, _) = listener.accept().await.unwrap();

    const ROUNDS: usize = 200;
    let a = session.clone();
    let b = session.clone();
    let ta = tokio::spawn(async move {
        for _ in 0..ROUNDS {
            a.write_list([
                (&b"<<<"[..]).into(),
                (&b"AAA"[..]).into(),
                (&b">>>"[..]).into(),
            ]);
            tokio::task::yield_now().await;
        }
    });
    let tb = tokio::spawn(async move {
        for _ in 0..ROUNDS {
            b.write_list([
                (&b"((("[..]).into(),
                (&b"BBB"[..]).into(),
                (&b")))"[..]).into(),
            ]);
            tokio::task::yield_now().await;
        }
    });
    ta.await.unwrap();
    tb.await.unwrap();

    let total = ROUNDS * 2 * 9;
    let mut received = vec![0u8; total];
    peer.read_exact(&mut received).await.unwrap();

    // Every 9-byte group is intact: one submission never interleaves
    // with another.
    let mut a_count = 0;
    let mut b_count = 0;
    for group in received.chunks(9) {
        match group {
            b"<<<AAA>>>" => a_count += 1,
            b"(((BBB)))" => b_count += 1,
            other => panic!("interleaved group: {:?}", other),
        }
    }
    assert_eq!(a_count, ROUNDS);
    assert_eq!(b_count, ROUNDS);
}

#[tokio::test]
async fn write_callback_reports_flushed_batch() {
    let (listener, addr) = raw_server().await;
    let _hold = listener;

    let (client, mut client_rx) = Recorder::new();
    let connector = Connector::new(addr, client);
    let session = connector.connect().await.unwrap();

    session.write_list([(&b"a"[..]).into(), (&b"b"[..]).into(), (&b"c"[..]).into()]);

    assert_eq!(next_event(&mut client_rx).await, Event::Connect);
    assert_eq!(next_event(&mut client_rx).await, Event::Write(3));
}

#[tokio::test]
async fn peer_disconnect_reports_error_then_close() {
    let (listener, addr) = raw_server().await;

    let (client, mut client_rx) = Recorder::new();
    let connector = Connector::new(addr, client);
    let _session = connector.connect().await.unwrap();

    let (peer, _) = listener.accept().await.unwrap();
    drop(peer);

    assert_eq!(next_event(&mut client_rx).await, Event::Connect);
    match next_event(&mut client_rx).await {
        Event::Error(msg) => assert!(msg.contains("I/O error"), "unexpected: {msg}"),
        other => panic!("expected Error, got {:?}", other),
    }
    assert_eq!(next_event(&mut client_rx).await, Event::Close);
}

#[tokio::test]
async fn protocol_none_parks_until_reconfigured() {
    let (listener, addr) = raw_server().await;

    let (client, mut client_rx) = Recorder::builder()
        .on_connect(|session| {
            session.set_protocol(Protocol::None);
        })
        .build();
    let connector = Connector::new(addr, client);
    let session = connector.connect().await.unwrap();

    let (mut peer, _) = listener.accept().await.unwrap();
    peer.write_all(b"waiting data").await.unwrap();

    // Parked: no frame is delivered and the session reports Connected.
    assert_eq!(next_event(&mut client_rx).await, Event::Connect);
    expect_silence(&mut client_rx, Duration::from_millis(200)).await;
    assert_eq!(session.status(), Status::Connected);

    // Reconfiguring resumes reading.
    session.set_protocol(Protocol::Any);
    assert_eq!(next_read(&mut client_rx).await, b"waiting data");
    assert_eq!(session.status(), Status::Reading);
}

#[tokio::test]
async fn read_panic_routes_to_except_and_closes() {
    let (server, mut server_rx) = Recorder::builder()
        .on_read(|_session: &Arc<Session>, _buf| {
            panic!("boom");
        })
        .build();
    let acceptor = Acceptor::new(server);
    let addr = acceptor.bind("127.0.0.1:0".parse().unwrap()).await.unwrap();

    let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
    stream.write_all(b"trigger").await.unwrap();

    assert_eq!(next_event(&mut server_rx).await, Event::Connect);
    assert_eq!(next_event(&mut server_rx).await, Event::Read(b"trigger".to_vec()));
    assert_eq!(next_event(&mut server_rx).await, Event::Except("boom".into()));
    assert_eq!(next_event(&mut server_rx).await, Event::Close);
}

#[tokio::test]
async fn swallowed_panic_keeps_session_alive() {
    let panics = Arc::new(AtomicUsize::new(0));
    let counter = panics.clone();
    let (server, mut server_rx) = Recorder::builder()
        .on_read(move |_session: &Arc<Session>, buf| {
            if buf.data() == b"bad" {
                counter.fetch_add(1, Ordering::SeqCst);
                panic!("transient");
            }
        })
        .swallow_panics()
        .build();
    let acceptor = Acceptor::new(server);
    let addr = acceptor.bind("127.0.0.1:0".parse().unwrap()).await.unwrap();

    let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
    stream.write_all(b"bad").await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    stream.write_all(b"good").await.unwrap();

    assert_eq!(next_event(&mut server_rx).await, Event::Connect);
    assert_eq!(next_event(&mut server_rx).await, Event::Read(b"bad".to_vec()));
    assert_eq!(next_event(&mut server_rx).await, Event::Except("transient".into()));
    // The session survived and keeps delivering frames.
    assert_eq!(next_event(&mut server_rx).await, Event::Read(b"good".to_vec()));
    assert_eq!(panics.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn panicking_except_delivers_synthetic_error() {
    struct Hostile {
        events: tokio::sync::mpsc::UnboundedSender<String>,
    }

    impl Handler for Hostile {
        fn read(&self, _session: &Arc<Session>, _buf: &mut FrameCursor<'_>) {
            panic!("in read");
        }

        fn except(&self, _session: &Arc<Session>, _panic: &Panic) {
            panic!("in except");
        }

        fn error(&self, _session: &Arc<Session>, err: &Error) {
            let _ = self.events.send(err.to_string());
        }

        fn close(&self, _session: &Arc<Session>) {
            let _ = self.events.send("close".into());
        }
    }

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let acceptor = Acceptor::new(Arc::new(Hostile { events: tx }));
    let addr = acceptor.bind("127.0.0.1:0".parse().unwrap()).await.unwrap();

    let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
    stream.write_all(b"x").await.unwrap();

    let first = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first, "Unexpected panic from except handler");
    let second = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(second, "close");
}

#[tokio::test]
async fn handler_swap_takes_effect_next_callback() {
    let (second, mut second_rx) = Recorder::new();
    let second: Arc<dyn Handler> = second;

    let swap_to = Arc::new(std::sync::Mutex::new(Some(second)));
    let swapper = swap_to.clone();

    let (server, mut server_rx) = Recorder::builder()
        .on_read(move |session: &Arc<Session>, _buf| {
            if let Some(next) = swapper.lock().unwrap().take() {
                let _previous = session.set_handler(next);
            }
        })
        .build();

    let acceptor = Acceptor::new(server);
    let addr = acceptor.bind("127.0.0.1:0".parse().unwrap()).await.unwrap();

    let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
    stream.write_all(b"one").await.unwrap();

    assert_eq!(next_event(&mut server_rx).await, Event::Connect);
    assert_eq!(next_event(&mut server_rx).await, Event::Read(b"one".to_vec()));

    tokio::time::sleep(Duration::from_millis(50)).await;
    stream.write_all(b"two").await.unwrap();

    // The swapped-in handler receives the next frame.
    assert_eq!(next_read(&mut second_rx).await, b"two");
    expect_silence(&mut server_rx, Duration::from_millis(200)).await;
}

#[tokio::test]
async fn attribute_seeding_before_connect_callback() {
    use framewire::{Any, AttributeSet, Service};

    let acceptor = Acceptor::new(Arc::new(NullHandler));
    let addr = acceptor.bind("127.0.0.1:0".parse().unwrap()).await.unwrap();

    let (tx, rx) = std::sync::mpsc::channel::<Option<u64>>();
    struct SeedCheck(std::sync::mpsc::Sender<Option<u64>>);
    impl Handler for SeedCheck {
        fn connect(&self, session: &Arc<Session>, _peer: std::net::SocketAddr) {
            let _ = self.0.send(session.attrs().get_as::<u64>("upstream"));
        }
    }

    let service = Service::new(Arc::new(SeedCheck(tx)));
    let attrs = AttributeSet::seeded([("upstream", Any::new(17u64))]);
    let _session = service
        .connect_seeded(addr, attrs)
        .await
        .unwrap();

    assert_eq!(rx.recv().unwrap(), Some(17));
}

#[tokio::test]
async fn session_accessors() {
    let (listener, addr) = raw_server().await;
    let _hold = listener;

    let connector = Connector::new(addr, Arc::new(NullHandler));
    let session = connector.connect().await.unwrap();

    assert!(session.id() > 0);
    assert_eq!(session.peer_addr(), addr);
    assert_eq!(session.protocol(), Protocol::Any);
    assert!(session.options().is_empty());
    assert_eq!(session.read_buffer_size(), 65536);
    assert!(session.delimiter().is_empty());

    session.set_delimiter_byte(b'|');
    assert_eq!(session.delimiter(), b"|");

    session.configure(
        Protocol::Prefix16,
        1024,
        Options::USE_LITTLE_ENDIAN,
    );
    assert_eq!(session.protocol(), Protocol::Prefix16);
    assert_eq!(session.read_buffer_size(), 1024);
    assert!(session.options().contains(Options::USE_LITTLE_ENDIAN));

    // Selecting a protocol alone resets the options.
    session.set_protocol(Protocol::Fixed);
    assert!(session.options().is_empty());

    session.close(true);
}
