//! Service glue: acceptors and connectors that produce sessions.
//!
//! A [`Service`] owns the default handler and the session registry.
//! [`Acceptor`] listens on an address and turns every accepted socket
//! into a session; [`Connector`] dials out. Both stop at handing the
//! connected socket to a new session — framing and lifecycle live in
//! [`Session`](crate::session::Session).
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use framewire::{Acceptor, Connector, Handler};
//!
//! let server = Acceptor::new(Arc::new(EchoHandler));
//! let addr = server.bind("127.0.0.1:0".parse()?).await?;
//!
//! let client = Connector::new(addr, Arc::new(ClientHandler));
//! let session = client.connect().await?;
//! session.write("hello");
//! ```

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::task::JoinHandle;

use crate::attrs::AttributeSet;
use crate::error::Result;
use crate::handler::Handler;
use crate::registry::SessionRegistry;
use crate::session::Session;

/// One-shot connect notification used by [`Service::connect_with`].
type ConnectCallback = Box<dyn FnOnce(&Arc<Session>) + Send>;

/// Shared state behind acceptors and connectors: the default handler and
/// the registry of live sessions.
pub struct Service {
    handler: Arc<dyn Handler>,
    registry: SessionRegistry,
}

impl Service {
    /// Create a service with the given default handler.
    pub fn new(handler: Arc<dyn Handler>) -> Arc<Service> {
        Arc::new(Service {
            handler,
            registry: SessionRegistry::new(),
        })
    }

    /// The service's default handler.
    pub fn handler(&self) -> Arc<dyn Handler> {
        self.handler.clone()
    }

    /// Registry of this service's live sessions.
    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Connect to `addr` with the service's default handler.
    pub async fn connect(self: &Arc<Self>, addr: SocketAddr) -> Result<Arc<Session>> {
        self.connect_with_handler(addr, self.handler(), AttributeSet::new())
            .await
    }

    /// Connect to `addr`, seeding the session's attribute map before the
    /// connect callback fires.
    pub async fn connect_seeded(
        self: &Arc<Self>,
        addr: SocketAddr,
        attrs: AttributeSet,
    ) -> Result<Arc<Session>> {
        self.connect_with_handler(addr, self.handler(), attrs).await
    }

    /// Connect to `addr` with a per-session handler and seed attributes.
    pub async fn connect_with_handler(
        self: &Arc<Self>,
        addr: SocketAddr,
        handler: Arc<dyn Handler>,
        attrs: AttributeSet,
    ) -> Result<Arc<Session>> {
        let stream = TcpStream::connect(addr).await?;
        Ok(self.adopt_stream(stream, handler, attrs, None))
    }

    /// Connect to `addr`; on success the closure is invoked with the new
    /// session *instead of* the handler's `connect` callback.
    pub async fn connect_with<F>(self: &Arc<Self>, addr: SocketAddr, on_connect: F) -> Result<Arc<Session>>
    where
        F: FnOnce(&Arc<Session>) + Send + 'static,
    {
        let stream = TcpStream::connect(addr).await?;
        Ok(self.adopt_stream(
            stream,
            self.handler(),
            AttributeSet::new(),
            Some(Box::new(on_connect)),
        ))
    }

    fn adopt_stream(
        self: &Arc<Self>,
        stream: TcpStream,
        handler: Arc<dyn Handler>,
        attrs: AttributeSet,
        notify: Option<ConnectCallback>,
    ) -> Arc<Session> {
        let peer = stream
            .peer_addr()
            .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], 0)));
        let (rd, wr) = stream.into_split();
        self.adopt_io(rd, wr, peer, handler, attrs, notify)
    }

    /// Build a session around an already-connected byte stream and start
    /// its I/O tasks. The connect callback fires before the first read
    /// is scheduled.
    pub(crate) fn adopt_io<R, W>(
        self: &Arc<Self>,
        rd: R,
        wr: W,
        peer: SocketAddr,
        handler: Arc<dyn Handler>,
        attrs: AttributeSet,
        notify: Option<ConnectCallback>,
    ) -> Arc<Session>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let session = Session::new(self.clone(), peer, handler, attrs);
        self.registry.insert(&session);
        session.mark_connected();
        match notify {
            None => session.handler_adapter().connect(&session, peer),
            Some(callback) => callback(&session),
        }
        session.start(rd, wr);
        session
    }
}

impl std::fmt::Debug for Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Service")
            .field("sessions", &self.registry.len())
            .finish()
    }
}

/// Listens on an address and produces a session per accepted connection.
pub struct Acceptor {
    service: Arc<Service>,
    state: Mutex<Option<ListenState>>,
}

struct ListenState {
    local: SocketAddr,
    task: JoinHandle<()>,
}

impl Acceptor {
    /// Create an acceptor with its own service around `handler`.
    pub fn new(handler: Arc<dyn Handler>) -> Arc<Acceptor> {
        Self::with_service(Service::new(handler))
    }

    /// Create an acceptor over an existing service.
    pub fn with_service(service: Arc<Service>) -> Arc<Acceptor> {
        Arc::new(Acceptor {
            service,
            state: Mutex::new(None),
        })
    }

    /// The acceptor's service.
    pub fn service(&self) -> &Arc<Service> {
        &self.service
    }

    /// Bind and start accepting. Returns the bound local address (useful
    /// with port 0).
    pub async fn bind(self: &Arc<Self>, addr: SocketAddr) -> Result<SocketAddr> {
        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };
        socket.set_reuseaddr(true)?;
        socket.bind(addr)?;
        let listener = socket.listen(1024)?;
        let local = listener.local_addr()?;

        let service = self.service.clone();
        let task = tokio::spawn(accept_loop(service, listener));
        if let Some(old) = self
            .state
            .lock()
            .unwrap()
            .replace(ListenState { local, task })
        {
            old.task.abort();
        }
        Ok(local)
    }

    /// Stop accepting. Existing sessions are unaffected.
    pub fn unbind(&self) {
        if let Some(state) = self.state.lock().unwrap().take() {
            state.task.abort();
        }
    }

    /// The bound address, if listening.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.state.lock().unwrap().as_ref().map(|s| s.local)
    }
}

impl Drop for Acceptor {
    fn drop(&mut self) {
        self.unbind();
    }
}

async fn accept_loop(service: Arc<Service>, listener: TcpListener) {
    loop {
        match listener.accept().await {
            Ok((stream, _peer)) => {
                let handler = service.handler();
                service.adopt_stream(stream, handler, AttributeSet::new(), None);
            }
            Err(e) => {
                // Transient accept failures (per-connection resets, fd
                // pressure) should not kill the listener.
                tracing::warn!("accept failed: {}", e);
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            }
        }
    }
}

/// Dials a fixed remote address, producing one session per connect.
pub struct Connector {
    service: Arc<Service>,
    remote: SocketAddr,
}

impl Connector {
    /// Create a connector with its own service around `handler`.
    pub fn new(remote: SocketAddr, handler: Arc<dyn Handler>) -> Arc<Connector> {
        Arc::new(Connector {
            service: Service::new(handler),
            remote,
        })
    }

    /// Create a connector over an existing service.
    pub fn with_service(remote: SocketAddr, service: Arc<Service>) -> Arc<Connector> {
        Arc::new(Connector { service, remote })
    }

    /// The remote address this connector dials.
    pub fn remote(&self) -> SocketAddr {
        self.remote
    }

    /// The connector's service.
    pub fn service(&self) -> &Arc<Service> {
        &self.service
    }

    /// Connect with the service's default handler.
    pub async fn connect(&self) -> Result<Arc<Session>> {
        self.service.connect(self.remote).await
    }

    /// Connect with a per-session handler.
    pub async fn connect_with_handler(&self, handler: Arc<dyn Handler>) -> Result<Arc<Session>> {
        self.service
            .connect_with_handler(self.remote, handler, AttributeSet::new())
            .await
    }
}

impl std::fmt::Debug for Acceptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Acceptor")
            .field("local", &self.local_addr())
            .finish()
    }
}

impl std::fmt::Debug for Connector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connector")
            .field("remote", &self.remote)
            .finish()
    }
}
