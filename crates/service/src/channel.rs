use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, Notify};

use crate::clock::{SharedClock, SharedRandom, SystemClock, ThreadRandom};
use crate::connection::{ConnectionDefaults, ConnectionHandle, Direction};
use crate::error::TChannelError;
use crate::events::ChannelEvent;
use crate::op_table::Table;
use crate::registry::PeerRegistry;
use crate::EndpointHandler;

/// Construction options for a [`Channel`].
///
/// Everything callers (and, in the binary, the TOML config) can tune is
/// here, including the injectable [`crate::clock::Clock`] and
/// [`crate::clock::Random`] used by tests to drive the timeout sweep
/// deterministically.
pub struct ChannelOptions {
    pub host_port: String,
    pub process_name: String,
    pub listen_addr: SocketAddr,
    pub req_timeout_default: Duration,
    pub server_timeout_default: Duration,
    pub timeout_check_interval: Duration,
    pub timeout_fuzz: Duration,
    pub clock: SharedClock,
    pub random: SharedRandom,
}

impl ChannelOptions {
    pub fn new(host_port: impl Into<String>, listen_addr: SocketAddr) -> Self {
        Self {
            host_port: host_port.into(),
            process_name: format!("tchannel-server[{}]", std::process::id()),
            listen_addr,
            req_timeout_default: Duration::from_millis(5000),
            server_timeout_default: Duration::from_millis(5000),
            timeout_check_interval: Duration::from_millis(1000),
            timeout_fuzz: Duration::from_millis(100),
            clock: Arc::new(SystemClock),
            random: Arc::new(ThreadRandom),
        }
    }
}

pub(crate) struct ChannelInner {
    defaults: Arc<ConnectionDefaults>,
    listen_addr: SocketAddr,
    endpoints: parking_lot::RwLock<Table<Bytes, Arc<dyn EndpointHandler>>>,
    peers: PeerRegistry<ConnectionHandle>,
    all_connections: Mutex<Vec<ConnectionHandle>>,
    events_tx: broadcast::Sender<ChannelEvent>,
    destroyed: AtomicBool,
    listening: AtomicBool,
    accept_shutdown: Notify,
    listener_closed: Notify,
    self_weak: Weak<ChannelInner>,
}

impl ChannelInner {
    pub(crate) fn get_endpoint_handler(&self, name: &Bytes) -> Option<Arc<dyn EndpointHandler>> {
        let handler = self.endpoints.read().get(name).cloned();
        match &handler {
            Some(_) => self.emit(ChannelEvent::Endpoint { name: name.clone() }),
            None => self.emit(ChannelEvent::EndpointMissing { name: name.clone() }),
        }
        handler
    }

    /// Adopts an inbound connection under its identified `host_port`.
    /// Refuses (returning `false`, adopting nothing) a peer announcing this
    /// channel's own identity -- the same self-peering refusal
    /// `Connection::spawn` applies to the transport address, generalized to
    /// the identity learned later, at identify time.
    pub(crate) fn adopt_inbound(&self, host_port: &str, conn: ConnectionHandle) -> bool {
        if host_port == self.defaults.self_host_port {
            return false;
        }
        self.peers.set(host_port, conn, false);
        true
    }

    pub(crate) fn remove_peer(&self, host_port: &str, conn: &ConnectionHandle) {
        self.peers.remove(host_port, conn);
    }

    pub(crate) fn emit(&self, event: ChannelEvent) {
        let _ = self.events_tx.send(event);
    }
}

/// The multiplexed RPC endpoint: listens, dials peers on demand, and routes
/// inbound calls to registered handlers.
///
/// Cheaply cloneable; every clone refers to the same underlying channel.
#[derive(Clone)]
pub struct Channel(Arc<ChannelInner>);

impl Channel {
    pub fn new(options: ChannelOptions) -> Self {
        let defaults = Arc::new(ConnectionDefaults {
            self_host_port: options.host_port,
            process_name: options.process_name,
            req_timeout_default: options.req_timeout_default,
            server_timeout_default: options.server_timeout_default,
            timeout_check_interval: options.timeout_check_interval,
            timeout_fuzz: options.timeout_fuzz,
            clock: options.clock,
            random: options.random,
        });

        let (events_tx, _) = broadcast::channel(256);

        let inner = Arc::new_cyclic(|weak| ChannelInner {
            defaults,
            listen_addr: options.listen_addr,
            endpoints: parking_lot::RwLock::new(Table::with_capacity(8)),
            peers: PeerRegistry::new(),
            all_connections: Mutex::new(Vec::new()),
            events_tx,
            destroyed: AtomicBool::new(false),
            listening: AtomicBool::new(false),
            accept_shutdown: Notify::new(),
            listener_closed: Notify::new(),
            self_weak: weak.clone(),
        });

        Channel(inner)
    }

    pub fn host_port(&self) -> &str {
        &self.0.defaults.self_host_port
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChannelEvent> {
        self.0.events_tx.subscribe()
    }

    /// Registers (or overwrites) the handler for `name`.
    pub fn register(&self, name: impl Into<Bytes>, handler: Arc<dyn EndpointHandler>) {
        self.0.endpoints.write().insert(name.into(), handler);
    }

    /// Binds the listen address and starts accepting inbound connections.
    pub async fn listen(&self) -> Result<(), TChannelError> {
        let listener = TcpListener::bind(self.0.listen_addr)
            .await
            .map_err(TChannelError::from)?;

        self.0.listening.store(true, Ordering::Release);
        self.0.emit(ChannelEvent::Listening {
            host_port: self.0.defaults.self_host_port.clone(),
        });

        let inner = self.0.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    accepted = listener.accept() => {
                        match accepted {
                            Ok((socket, addr)) => {
                                if let Ok(handle) = ConnectionHandle::spawn(
                                    socket,
                                    Direction::Inbound,
                                    addr,
                                    inner.defaults.clone(),
                                    inner.self_weak.clone(),
                                ) {
                                    inner.all_connections.lock().push(handle);
                                }
                            }
                            Err(err) => {
                                log::warn!("accept failed: {err}");
                            }
                        }
                    }
                    _ = inner.accept_shutdown.notified() => break,
                }
            }
            inner.listener_closed.notify_one();
        });

        Ok(())
    }

    async fn get_or_connect(&self, host_port: &str) -> Result<ConnectionHandle, TChannelError> {
        if let Some(conn) = self.0.peers.get(host_port) {
            return Ok(conn);
        }

        if host_port == self.0.defaults.self_host_port {
            return Err(TChannelError::InvalidArg(
                "refusing to connect to self".into(),
            ));
        }

        let addr: SocketAddr = host_port
            .parse()
            .map_err(|_| TChannelError::InvalidArg(format!("invalid host:port `{host_port}`")))?;

        let socket = TcpStream::connect(addr).await.map_err(TChannelError::from)?;
        let handle = ConnectionHandle::spawn(
            socket,
            Direction::Outbound,
            addr,
            self.0.defaults.clone(),
            self.0.self_weak.clone(),
        )?;

        self.0.peers.set(host_port, handle.clone(), true);
        self.0.all_connections.lock().push(handle.clone());
        Ok(handle)
    }

    /// Adopts an existing or newly-dialed connection as the preferred peer
    /// for `host_port`. Refuses a `host_port` equal to this channel's own.
    pub async fn add_peer(&self, host_port: &str) -> Result<ConnectionHandle, TChannelError> {
        self.get_or_connect(host_port).await
    }

    /// Sends `arg1`/`arg2`/`arg3` to `host_port`, dialing a new connection if
    /// none exists yet. `timeout` overrides `req_timeout_default` for this
    /// call only.
    pub async fn send(
        &self,
        host_port: &str,
        arg1: Bytes,
        arg2: Bytes,
        arg3: Bytes,
        timeout: Option<Duration>,
    ) -> Result<(Bytes, Bytes), TChannelError> {
        if self.0.destroyed.load(Ordering::Acquire) {
            return Err(TChannelError::Destroyed);
        }
        if host_port.is_empty() {
            return Err(TChannelError::InvalidArg("host is required".into()));
        }

        let conn = self.get_or_connect(host_port).await?;
        conn.send(arg1, arg2, arg3, timeout).await
    }

    /// Shuts the channel down: every pending outbound operation on every
    /// connection fails with `Shutdown`, every connection and the listener
    /// (if started) are closed. Idempotent -- a second call is a no-op.
    pub async fn quit(&self) {
        if self.0.destroyed.swap(true, Ordering::AcqRel) {
            return;
        }

        let conns = { self.0.all_connections.lock().clone() };
        for conn in &conns {
            conn.reset_all(TChannelError::Shutdown);
        }
        for conn in &conns {
            conn.closed_notified().await;
        }

        if self.0.listening.swap(false, Ordering::AcqRel) {
            self.0.accept_shutdown.notify_one();
            self.0.listener_closed.notified().await;
        }
    }
}
