use std::net::SocketAddr;
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use bytes::Bytes;
use codec::{ErrorCode, Frame, FrameCodec, FrameId};
use futures::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Notify};
use tokio::time::Instant;
use tokio_util::codec::Framed;

use crate::channel::ChannelInner;
use crate::clock::{SharedClock, SharedRandom};
use crate::error::TChannelError;
use crate::events::ChannelEvent;
use crate::handler::FrameIdAllocator;
use crate::op_table::{InboundOp, InboundTable, OutboundOp, OutboundTable};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Inbound,
    Outbound,
}

/// Fixed per-channel settings a connection needs but does not own.
pub(crate) struct ConnectionDefaults {
    pub self_host_port: String,
    pub process_name: String,
    pub req_timeout_default: Duration,
    pub server_timeout_default: Duration,
    pub timeout_check_interval: Duration,
    pub timeout_fuzz: Duration,
    pub clock: SharedClock,
    pub random: SharedRandom,
}

pub(crate) struct ConnectionInner {
    direction: Direction,
    remote_addr: SocketAddr,
    remote_name: RwLock<Option<String>>,
    out_ops: Mutex<OutboundTable>,
    in_ops: Mutex<InboundTable>,
    out_pending: AtomicUsize,
    in_pending: AtomicUsize,
    last_timeout_time: Mutex<Option<Instant>>,
    closing: AtomicBool,
    write_tx: mpsc::UnboundedSender<Frame>,
    close_requested: Notify,
    /// Set just before `closed.notify_waiters()` fires, so a caller that
    /// starts waiting *after* the connection's task has already exited does
    /// not hang forever on a permit `Notify::notify_waiters` never stores.
    task_done: AtomicBool,
    closed: Notify,
    ids: FrameIdAllocator,
    defaults: Arc<ConnectionDefaults>,
    channel: Weak<ChannelInner>,
}

/// A handle to one multiplexed TCP connection.
///
/// Cloning is cheap (an `Arc` bump); equality is by identity, which is what
/// the peer registry needs to remove "this exact connection" without relying
/// on any wire-visible property.
#[derive(Clone)]
pub struct ConnectionHandle(Arc<ConnectionInner>);

impl PartialEq for ConnectionHandle {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl ConnectionHandle {
    pub(crate) fn spawn(
        socket: TcpStream,
        direction: Direction,
        remote_addr: SocketAddr,
        defaults: Arc<ConnectionDefaults>,
        channel: Weak<ChannelInner>,
    ) -> Result<Self, TChannelError> {
        if remote_addr.to_string() == defaults.self_host_port {
            return Err(TChannelError::InvalidArg(
                "refusing to connect to self".into(),
            ));
        }

        socket.set_nodelay(true).ok();

        let (write_tx, write_rx) = mpsc::unbounded_channel();
        let inner = Arc::new(ConnectionInner {
            direction,
            remote_addr,
            remote_name: RwLock::new(None),
            out_ops: Mutex::new(OutboundTable::with_capacity(8)),
            in_ops: Mutex::new(InboundTable::with_capacity(8)),
            out_pending: AtomicUsize::new(0),
            in_pending: AtomicUsize::new(0),
            last_timeout_time: Mutex::new(None),
            closing: AtomicBool::new(false),
            write_tx,
            close_requested: Notify::new(),
            task_done: AtomicBool::new(false),
            closed: Notify::new(),
            ids: FrameIdAllocator::default(),
            defaults,
            channel,
        });

        let handle = ConnectionHandle(inner);
        let run_handle = handle.clone();
        tokio::spawn(async move { run_handle.run(socket, write_rx).await });

        Ok(handle)
    }

    pub fn direction(&self) -> Direction {
        self.0.direction
    }

    pub fn remote_name(&self) -> Option<String> {
        self.0.remote_name.read().clone()
    }

    pub fn out_pending(&self) -> usize {
        self.0.out_pending.load(Ordering::Relaxed)
    }

    pub fn in_pending(&self) -> usize {
        self.0.in_pending.load(Ordering::Relaxed)
    }

    pub(crate) async fn closed_notified(&self) {
        if self.0.task_done.load(Ordering::Acquire) {
            return;
        }
        // Register the waiter before re-checking the flag, matching the
        // `Notify` crate's documented pattern for closing this race: a
        // `notify_waiters()` that lands between the load above and here
        // would otherwise be missed.
        let notified = self.0.closed.notified();
        if self.0.task_done.load(Ordering::Acquire) {
            return;
        }
        notified.await;
    }

    /// Sends a call and awaits its response, completing on success, peer
    /// error, local timeout, or connection reset -- exactly one of these,
    /// exactly once.
    pub async fn send(
        &self,
        arg1: Bytes,
        arg2: Bytes,
        arg3: Bytes,
        timeout: Option<Duration>,
    ) -> Result<(Bytes, Bytes), TChannelError> {
        if self.0.closing.load(Ordering::Acquire) {
            return Err(TChannelError::SocketClosed);
        }

        let (tx, rx) = oneshot::channel();
        let timeout = timeout.unwrap_or(self.0.defaults.req_timeout_default);

        // Allocation and insertion happen under one lock acquisition so a
        // concurrent `send` can never be handed the same id.
        let id = {
            let mut out = self.0.out_ops.lock();
            let id = self.0.ids.alloc(&out)?;
            out.insert(
                id,
                OutboundOp {
                    start: self.0.defaults.clock.now(),
                    timeout,
                    respond: tx,
                },
            );
            id
        };
        self.0.out_pending.fetch_add(1, Ordering::Relaxed);

        let frame = Frame::CallRequest {
            id,
            arg1,
            arg2,
            arg3,
        };
        if self.0.write_tx.send(frame).is_err() {
            self.complete_out_op(id, Err(TChannelError::SocketClosed));
        }

        rx.await.unwrap_or(Err(TChannelError::SocketClosed))
    }

    fn complete_out_op(&self, id: FrameId, result: Result<(Bytes, Bytes), TChannelError>) {
        let op = self.0.out_ops.lock().remove(&id);
        match op {
            Some(op) => {
                self.0.out_pending.fetch_sub(1, Ordering::Relaxed);
                let _ = op.respond.send(result);
            }
            None => {
                log::warn!(
                    "completion for unknown outbound op {id}; likely a late response after timeout"
                );
            }
        }
    }

    fn run_in_op(&self, id: FrameId, name: Bytes, arg2: Bytes, arg3: Bytes) {
        {
            let mut inb = self.0.in_ops.lock();
            inb.insert(
                id,
                InboundOp {
                    start: self.0.defaults.clock.now(),
                },
            );
        }
        self.0.in_pending.fetch_add(1, Ordering::Relaxed);

        let handler = self
            .0
            .channel
            .upgrade()
            .and_then(|channel| channel.get_endpoint_handler(&name));

        let this = self.clone();
        tokio::spawn(async move {
            let result: Result<(Bytes, Bytes), (ErrorCode, String)> = match handler {
                Some(handler) => match handler.call(arg2, arg3).await {
                    Ok(ok) => Ok(ok),
                    Err(msg) => Err((ErrorCode::Unexpected, msg)),
                },
                None => Err((ErrorCode::NoSuchEndpoint, "no such endpoint".into())),
            };

            let mut inb = this.0.in_ops.lock();
            if inb.remove(&id).is_none() {
                log::warn!("dropping response for expired inbound op {id}");
                return;
            }
            drop(inb);
            this.0.in_pending.fetch_sub(1, Ordering::Relaxed);

            let frame = Frame::CallResponse { id, result };
            let _ = this.0.write_tx.send(frame);
        });
    }

    /// Dispatches one decoded frame. Returns `ControlFlow::Break` when the
    /// frame leaves the connection unfit to continue (an inbound peer
    /// identifying itself as this channel's own hostPort) -- the caller must
    /// reset and tear the connection down rather than proceed.
    fn on_frame(&self, frame: Frame) -> ControlFlow<()> {
        *self.0.last_timeout_time.lock() = None;

        match frame {
            Frame::InitRequest {
                id,
                host_port,
                process_name: _,
            } => {
                let Some(channel) = self.0.channel.upgrade() else {
                    return ControlFlow::Continue(());
                };
                if !channel.adopt_inbound(&host_port, self.clone()) {
                    log::warn!("peer identified as our own hostPort {host_port}; resetting");
                    return ControlFlow::Break(());
                }
                *self.0.remote_name.write() = Some(host_port.clone());
                let _ = self.0.write_tx.send(Frame::InitResponse {
                    id,
                    host_port: self.0.defaults.self_host_port.clone(),
                    process_name: self.0.defaults.process_name.clone(),
                });
                channel.emit(ChannelEvent::Identified { host_port });
            }
            Frame::InitResponse {
                host_port,
                process_name: _,
                ..
            } => {
                *self.0.remote_name.write() = Some(host_port.clone());
                if let Some(channel) = self.0.channel.upgrade() {
                    channel.emit(ChannelEvent::Identified { host_port });
                }
            }
            Frame::CallRequest {
                id,
                arg1,
                arg2,
                arg3,
            } => {
                self.run_in_op(id, arg1, arg2, arg3);
            }
            Frame::CallResponse { id, result } => {
                self.complete_out_op(
                    id,
                    result.map_err(|(code, message)| error_from_wire(code, message)),
                );
            }
            Frame::Error { id, code, message } => {
                self.complete_out_op(id, Err(error_from_wire(code, message)));
            }
        }

        ControlFlow::Continue(())
    }

    fn sweep(&self) -> ControlFlow<()> {
        if self.0.closing.load(Ordering::Acquire) {
            return ControlFlow::Break(());
        }

        if self.0.last_timeout_time.lock().is_some() {
            log::warn!("no frame since last timeout sweep; destroying connection");
            return ControlFlow::Break(());
        }

        let now = self.0.defaults.clock.now();
        let mut any_timed_out = false;

        {
            let mut out = self.0.out_ops.lock();
            let expired: Vec<FrameId> = out
                .keys()
                .copied()
                .filter(|id| {
                    let op = out.get(id).expect("key came from this table");
                    now.saturating_duration_since(op.start) > op.timeout
                })
                .collect();
            for id in expired {
                if let Some(op) = out.remove(&id) {
                    self.0.out_pending.fetch_sub(1, Ordering::Relaxed);
                    let _ = op.respond.send(Err(TChannelError::Timeout));
                    any_timed_out = true;
                }
            }
        }

        {
            let mut inb = self.0.in_ops.lock();
            let expired: Vec<FrameId> = inb
                .keys()
                .copied()
                .filter(|id| {
                    let op = inb.get(id).expect("key came from this table");
                    now.saturating_duration_since(op.start) > self.0.defaults.server_timeout_default
                })
                .collect();
            for id in expired {
                if inb.remove(&id).is_some() {
                    self.0.in_pending.fetch_sub(1, Ordering::Relaxed);
                }
            }
        }

        if any_timed_out {
            *self.0.last_timeout_time.lock() = Some(now);
        }

        ControlFlow::Continue(())
    }

    /// Drains both operation tables, failing every pending outbound op with
    /// `err`, then removes this connection from the registry and notifies
    /// the channel. Idempotent: a connection is only reset once.
    pub(crate) fn reset_all(&self, err: TChannelError) {
        if self.0.closing.swap(true, Ordering::AcqRel) {
            return;
        }

        let drained: Vec<OutboundOp> = self.0.out_ops.lock().drain().map(|(_, v)| v).collect();
        self.0.in_ops.lock().drain().for_each(|_| {});
        self.0.out_pending.store(0, Ordering::Relaxed);
        self.0.in_pending.store(0, Ordering::Relaxed);

        for op in drained {
            let _ = op.respond.send(Err(err.clone()));
        }

        self.0.close_requested.notify_one();

        if let Some(channel) = self.0.channel.upgrade() {
            let host_port = self.0.remote_name.read().clone();
            if let Some(host_port) = host_port.as_deref() {
                channel.remove_peer(host_port, self);
            }
            channel.emit(ChannelEvent::SocketClose {
                host_port,
                error: Some(Arc::new(err)),
            });
        }
    }

    async fn run(self, socket: TcpStream, mut write_rx: mpsc::UnboundedReceiver<Frame>) {
        let mut framed = Framed::new(socket, FrameCodec);

        if self.0.direction == Direction::Outbound {
            let _ = self.0.write_tx.send(Frame::InitRequest {
                id: 0,
                host_port: self.0.defaults.self_host_port.clone(),
                process_name: self.0.defaults.process_name.clone(),
            });
        }

        let mut next_sweep = self.next_sweep_deadline();

        loop {
            tokio::select! {
                frame = framed.next() => {
                    match frame {
                        Some(Ok(frame)) => {
                            if self.on_frame(frame).is_break() {
                                self.reset_all(TChannelError::InvalidArg(
                                    "peer identified as our own hostPort".into(),
                                ));
                                break;
                            }
                        }
                        Some(Err(err)) => {
                            self.reset_all(TChannelError::from(err));
                            break;
                        }
                        None => {
                            self.reset_all(TChannelError::SocketClosed);
                            break;
                        }
                    }
                }
                maybe_frame = write_rx.recv() => {
                    match maybe_frame {
                        Some(frame) => {
                            if let Err(err) = framed.send(frame).await {
                                self.reset_all(TChannelError::from(err));
                                break;
                            }
                        }
                        None => break,
                    }
                }
                _ = tokio::time::sleep_until(next_sweep) => {
                    if self.sweep().is_break() {
                        self.reset_all(TChannelError::Timeout);
                        break;
                    }
                    next_sweep = self.next_sweep_deadline();
                }
                _ = self.0.close_requested.notified() => {
                    break;
                }
            }
        }

        self.0.task_done.store(true, Ordering::Release);
        self.0.closed.notify_waiters();
    }

    fn next_sweep_deadline(&self) -> Instant {
        let jitter_ms = self.0.defaults.random.jitter_millis(self.0.defaults.timeout_fuzz);
        let delay = crate::clock::apply_jitter(self.0.defaults.timeout_check_interval, jitter_ms);
        self.0.defaults.clock.now() + delay
    }
}

fn error_from_wire(code: ErrorCode, message: String) -> TChannelError {
    match code {
        ErrorCode::NoSuchEndpoint => TChannelError::NoSuchEndpoint,
        ErrorCode::Timeout => TChannelError::Timeout,
        ErrorCode::BadRequest => TChannelError::InvalidArg(message),
        ErrorCode::Unexpected => TChannelError::SocketError(message),
    }
}
