//! IPC client for talking to a server endpoint.
//!
//! Provides:
//! - Connection setup with bounded retries
//! - One session per `send`, resolving exactly one pending result
//! - A write lane and a read lane shared by all sessions on the socket
//!
//! No request id goes on the wire. Replies are matched to requests purely by
//! order: sessions claim the read lane in the order they finished writing, so
//! the n-th reply read belongs to the n-th rpc written.

use std::fmt;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::task::Poll;
use std::time::Duration;

use tokio::net::UnixStream;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::runtime::{Builder, Handle, Runtime};
use tokio::sync::{Mutex as AsyncMutex, Notify};

use crate::config::IpcConfig;
use crate::error::{IpcError, Result};
use crate::id::IdGenerator;
use crate::ipc::codec;
use crate::ipc::message::{Message, Mode};
use crate::ipc::pending::{Pending, Promise, promise};
use crate::ipc::registry::{HandlerRegistry, Session};
use crate::logging::Logger;

fn aborted<M>() -> Result<M> {
    Err(IpcError::ConnectionAborted)
}

fn not_connected() -> bool {
    false
}

/// Where a client session is in its single call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ClientState {
    Created = 0,
    WritingHeader = 1,
    WritingPayload = 2,
    ReadingHeader = 3,
    ReadingPayload = 4,
    Fulfilled = 5,
    Deregistered = 6,
}

impl From<u8> for ClientState {
    fn from(raw: u8) -> Self {
        match raw {
            1 => ClientState::WritingHeader,
            2 => ClientState::WritingPayload,
            3 => ClientState::ReadingHeader,
            4 => ClientState::ReadingPayload,
            5 => ClientState::Fulfilled,
            6 => ClientState::Deregistered,
            _ => ClientState::Created,
        }
    }
}

impl fmt::Display for ClientState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// The two ordering lanes over one connected socket.
///
/// `tokio::sync::Mutex` queues waiters in FIFO order, so each lane runs one
/// operation at a time in submission order.
#[derive(Debug)]
struct Lanes {
    writer: AsyncMutex<OwnedWriteHalf>,
    reader: AsyncMutex<OwnedReadHalf>,
}

impl Lanes {
    fn new(stream: UnixStream) -> Self {
        let (reader, writer) = stream.into_split();
        Self {
            writer: AsyncMutex::new(writer),
            reader: AsyncMutex::new(reader),
        }
    }
}

/// State shared by an endpoint and every session it issues.
#[derive(Clone)]
struct ClientShared {
    registry: Arc<HandlerRegistry<ClientSession>>,
    connected: Arc<AtomicBool>,
    logger: Logger,
}

/// One outstanding call.
#[derive(Debug)]
pub struct ClientSession {
    id: u64,
    state: AtomicU8,
    shutdown: Notify,
}

impl ClientSession {
    fn new(id: u64) -> Self {
        Self {
            id,
            state: AtomicU8::new(ClientState::Created as u8),
            shutdown: Notify::new(),
        }
    }

    pub fn state(&self) -> ClientState {
        ClientState::from(self.state.load(Ordering::Acquire))
    }

    fn transition(&self, next: ClientState, logger: &Logger) {
        let previous = ClientState::from(self.state.swap(next as u8, Ordering::AcqRel));
        logger.trace(format_args!("request {}: {} -> {}", self.id, previous, next));
    }

    /// Perform the call and resolve `promise` exactly once, then deregister.
    async fn run<M: Message>(
        self: Arc<Self>,
        request: M,
        lanes: Option<Arc<Lanes>>,
        promise: Promise<Result<M>>,
        shared: ClientShared,
    ) {
        let logger = &shared.logger;
        let registration = shared.registry.deregistration(self.id);

        let outcome = match (request.mode(), lanes) {
            (Mode::Unknown, _) => Err(IpcError::BadMessage),
            (_, None) => Err(IpcError::ConnectionAborted),
            (_, Some(lanes)) => {
                tokio::select! {
                    _ = self.shutdown.notified() => Err(IpcError::ConnectionAborted),
                    result = self.exchange(&lanes, &request, logger) => result.map_err(IpcError::into_session_error),
                }
            }
        };

        match &outcome {
            Err(IpcError::BrokenPipe) => {
                shared.connected.store(false, Ordering::SeqCst);
                logger.warn(format_args!("request {}: broken pipe, marking disconnected", self.id));
            }
            Err(e) => logger.debug(format_args!("request {} failed: {}", self.id, e)),
            Ok(_) => {}
        }

        self.transition(ClientState::Fulfilled, logger);
        promise.fulfill(outcome);
        drop(registration);
        self.transition(ClientState::Deregistered, logger);
    }

    async fn exchange<M: Message>(&self, lanes: &Lanes, request: &M, logger: &Logger) -> Result<M> {
        let mut writer = lanes.writer.lock().await;
        self.transition(ClientState::WritingHeader, logger);
        codec::write_header(&mut *writer, request).await?;
        self.transition(ClientState::WritingPayload, logger);
        codec::write_payload(&mut *writer, request).await?;

        if request.mode() == Mode::FireAndForget {
            return Ok(M::new(&[], Mode::FireAndForget));
        }

        // Queue on the read lane before releasing the write lane, so reads
        // are claimed in the same order the requests were written.
        let read_turn = lanes.reader.lock();
        tokio::pin!(read_turn);
        let queued = futures::poll!(read_turn.as_mut());
        drop(writer);
        let mut reader = match queued {
            Poll::Ready(guard) => guard,
            Poll::Pending => read_turn.await,
        };

        let mut reply = M::empty();
        self.transition(ClientState::ReadingHeader, logger);
        codec::read_header(&mut *reader, &mut reply).await?;
        self.transition(ClientState::ReadingPayload, logger);
        codec::read_payload(&mut *reader, &mut reply).await?;
        Ok(reply)
    }
}

impl Session for ClientSession {
    fn id(&self) -> u64 {
        self.id
    }

    fn stop(&self) {
        self.shutdown.notify_one();
    }
}

/// Opens the socket, retrying with a fixed delay.
struct Connector {
    socket_path: PathBuf,
    attempts: u32,
    retry_delay: Duration,
    lanes: Arc<Mutex<Option<Arc<Lanes>>>>,
    gate: Arc<AsyncMutex<()>>,
    shared: ClientShared,
}

impl Connector {
    async fn establish(self) -> bool {
        let _gate = self.gate.lock().await;
        let logger = &self.shared.logger;

        if self.shared.connected.load(Ordering::SeqCst) {
            return true;
        }

        for attempt in 1..=self.attempts {
            match UnixStream::connect(&self.socket_path).await {
                Ok(stream) => {
                    let lanes = Arc::new(Lanes::new(stream));
                    *self.lanes.lock().unwrap_or_else(PoisonError::into_inner) = Some(lanes);
                    self.shared.connected.store(true, Ordering::SeqCst);
                    logger.info(format_args!("connected to {}", self.socket_path.display()));
                    return true;
                }
                Err(e) => {
                    logger.warn(format_args!(
                        "connect attempt {}/{} to {} failed: {}",
                        attempt,
                        self.attempts,
                        self.socket_path.display(),
                        e
                    ));
                    if attempt < self.attempts {
                        tokio::time::sleep(self.retry_delay).await;
                    }
                }
            }
        }

        logger.error(format_args!(
            "giving up on {} after {} attempts",
            self.socket_path.display(),
            self.attempts
        ));
        false
    }
}

/// Client side of a local IPC channel.
///
/// Owns its reactor and worker threads. Every `send` becomes a session that
/// shares this endpoint's socket and ordering lanes. Must be dropped outside
/// of any async context, since dropping joins the worker threads.
pub struct ClientEndpoint<M: Message> {
    config: IpcConfig,
    socket_path: PathBuf,
    runtime: Option<Runtime>,
    handle: Handle,
    lanes: Arc<Mutex<Option<Arc<Lanes>>>>,
    connect_gate: Arc<AsyncMutex<()>>,
    request_ids: IdGenerator,
    shared: ClientShared,
    _message: PhantomData<fn() -> M>,
}

impl<M: Message> ClientEndpoint<M> {
    /// Client for the server at `<socket_prefix>/<socket_file>`. Does not connect.
    pub fn new(config: IpcConfig, socket_file: &str) -> Result<Self> {
        if config.worker_threads == 0 {
            return Err(IpcError::Config("worker-threads must be > 0".into()));
        }

        let runtime = Builder::new_multi_thread()
            .worker_threads(config.worker_threads)
            .thread_name("ipclane-client")
            .enable_all()
            .build()?;
        let handle = runtime.handle().clone();

        Ok(Self {
            socket_path: config.socket_path(socket_file),
            config,
            runtime: Some(runtime),
            handle,
            lanes: Arc::new(Mutex::new(None)),
            connect_gate: Arc::new(AsyncMutex::new(())),
            request_ids: IdGenerator::new(),
            shared: ClientShared {
                registry: Arc::new(HandlerRegistry::new()),
                connected: Arc::new(AtomicBool::new(false)),
                logger: Logger::client(),
            },
            _message: PhantomData,
        })
    }

    /// Replace the logging capability handed to sessions.
    pub fn with_logger(mut self, logger: Logger) -> Self {
        self.shared.logger = logger;
        self
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Connect if not already connected.
    ///
    /// Resolves true immediately when connected; otherwise tries up to
    /// `connect-attempts` times, `retry-delay-ms` apart, and resolves false
    /// once they are exhausted.
    pub fn connect(&self) -> Pending<bool> {
        if self.connected() {
            return Pending::ready(true, not_connected);
        }

        let (promise, pending) = promise(not_connected);
        let connector = Connector {
            socket_path: self.socket_path.clone(),
            attempts: self.config.connect_attempts.max(1),
            retry_delay: self.config.retry_delay(),
            lanes: Arc::clone(&self.lanes),
            gate: Arc::clone(&self.connect_gate),
            shared: self.shared.clone(),
        };
        self.handle.spawn(async move {
            promise.fulfill(connector.establish().await);
        });
        pending
    }

    /// Blocking form of `connect`. Must not be called from an async context.
    pub fn connect_blocking(&self) -> bool {
        self.connect().wait()
    }

    /// Issue one call over the shared socket.
    ///
    /// Rpc resolves with the server's reply. FireAndForget resolves with an
    /// empty `FireAndForget` message once the request is written. Unknown mode
    /// resolves with `BadMessage` without touching the socket.
    pub fn send(&self, message: M) -> Pending<Result<M>> {
        let (promise, pending) = promise(aborted::<M>);
        let session = Arc::new(ClientSession::new(self.request_ids.next_id()));
        self.shared.registry.register(Arc::clone(&session));

        let lanes = self.lanes.lock().unwrap_or_else(PoisonError::into_inner).clone();
        self.handle
            .spawn(session.run(message, lanes, promise, self.shared.clone()));
        pending
    }

    /// Abandon every outstanding call and close the socket.
    ///
    /// Each pending result resolves with an error.
    pub fn disconnect(&self) {
        self.shared.connected.store(false, Ordering::SeqCst);
        let lanes = self.lanes.lock().unwrap_or_else(PoisonError::into_inner).take();
        self.shared.registry.stop_all();
        // Sessions still unwinding hold their own reference; the socket
        // closes when the last one lets go.
        drop(lanes);
        self.shared
            .logger
            .info(format_args!("disconnected from {}", self.socket_path.display()));
    }

    pub fn connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    /// Calls issued but not yet resolved.
    pub fn pending_requests(&self) -> usize {
        self.shared.registry.count()
    }
}

impl<M: Message> Drop for ClientEndpoint<M> {
    fn drop(&mut self) {
        self.disconnect();
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_timeout(self.config.shutdown_timeout());
        }
    }
}
