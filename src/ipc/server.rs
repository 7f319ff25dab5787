//! IPC Server - Unix socket endpoint and per-connection sessions
//!
//! Provides:
//! - Unix stream socket listener with an accept loop
//! - One session per accepted connection: read, dispatch, reply, repeat
//! - Connection accounting and coordinated shutdown through the registry

use std::fmt;
use std::fs;
use std::io;
use std::ops::ControlFlow;
use std::os::unix::net::UnixListener as StdUnixListener;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{UnixListener, UnixStream};
use tokio::runtime::{Builder, Runtime};
use tokio::sync::{Notify, watch};

use crate::config::IpcConfig;
use crate::error::{IpcError, Result};
use crate::id::IdGenerator;
use crate::ipc::codec;
use crate::ipc::message::{Message, Mode};
use crate::ipc::registry::{HandlerRegistry, Session};
use crate::logging::Logger;

/// Application callback invoked once per received request.
///
/// Runs synchronously on a reactor worker, so it should not block for long.
pub trait RequestHandler<M: Message>: Send + Sync + 'static {
    fn handle(&self, request: M) -> M;
}

impl<M, F> RequestHandler<M> for F
where
    M: Message,
    F: Fn(M) -> M + Send + Sync + 'static,
{
    fn handle(&self, request: M) -> M {
        self(request)
    }
}

/// Handler that replies with the request unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct EchoHandler;

impl<M: Message> RequestHandler<M> for EchoHandler {
    fn handle(&self, request: M) -> M {
        request
    }
}

/// Where a server session is in its read, dispatch, write cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ServerState {
    Idle = 0,
    ReadingHeader = 1,
    ReadingPayload = 2,
    Dispatching = 3,
    WritingHeader = 4,
    WritingPayload = 5,
    Closed = 6,
}

impl From<u8> for ServerState {
    fn from(raw: u8) -> Self {
        match raw {
            1 => ServerState::ReadingHeader,
            2 => ServerState::ReadingPayload,
            3 => ServerState::Dispatching,
            4 => ServerState::WritingHeader,
            5 => ServerState::WritingPayload,
            6 => ServerState::Closed,
            _ => ServerState::Idle,
        }
    }
}

impl fmt::Display for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Everything a server session needs besides its socket.
struct Dispatch<M: Message> {
    handler: Arc<dyn RequestHandler<M>>,
    registry: Arc<HandlerRegistry<ServerSession>>,
    logger: Logger,
}

impl<M: Message> Clone for Dispatch<M> {
    fn clone(&self) -> Self {
        Self {
            handler: Arc::clone(&self.handler),
            registry: Arc::clone(&self.registry),
            logger: self.logger.clone(),
        }
    }
}

/// One accepted connection.
///
/// The spawned task owns an `Arc` to the session, so the session outlives
/// its last pending I/O even after it has been deregistered.
#[derive(Debug)]
pub struct ServerSession {
    id: u64,
    state: AtomicU8,
    shutdown: Notify,
}

impl ServerSession {
    fn new(id: u64) -> Self {
        Self {
            id,
            state: AtomicU8::new(ServerState::Idle as u8),
            shutdown: Notify::new(),
        }
    }

    pub fn state(&self) -> ServerState {
        ServerState::from(self.state.load(Ordering::Acquire))
    }

    fn transition(&self, next: ServerState, logger: &Logger) {
        let previous = ServerState::from(self.state.swap(next as u8, Ordering::AcqRel));
        logger.trace(format_args!("connection {}: {} -> {}", self.id, previous, next));
    }

    /// Drive the connection until the peer leaves, an error occurs, or the
    /// session is stopped; then deregister and close the socket.
    async fn run<M, S>(self: Arc<Self>, mut stream: S, dispatch: Dispatch<M>)
    where
        M: Message,
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let logger = &dispatch.logger;
        let registration = dispatch.registry.deregistration(self.id);
        tokio::select! {
            _ = self.shutdown.notified() => {
                logger.debug(format_args!("connection {} stopped", self.id));
            }
            result = self.serve(&mut stream, dispatch.handler.as_ref(), logger) => {
                match result {
                    Err(IpcError::Io(ref e)) if IpcError::is_broken_pipe(e) => {
                        logger.debug(format_args!("connection {} closed by peer", self.id));
                    }
                    Err(e) => {
                        logger.warn(format_args!("connection {} failed: {}", self.id, e));
                    }
                    Ok(()) => {}
                }
            }
        }

        self.transition(ServerState::Closed, logger);
        drop(registration);
        drop(stream);
    }

    async fn serve<M, S>(&self, stream: &mut S, handler: &dyn RequestHandler<M>, logger: &Logger) -> Result<()>
    where
        M: Message,
        S: AsyncRead + AsyncWrite + Unpin,
    {
        loop {
            let mut request = M::empty();

            self.transition(ServerState::ReadingHeader, logger);
            read_header_reissuing(stream, &mut request).await?;

            self.transition(ServerState::ReadingPayload, logger);
            read_payload_reissuing(stream, &mut request).await?;

            self.transition(ServerState::Dispatching, logger);
            match request.mode() {
                Mode::Rpc => {
                    let reply = handler.handle(request);
                    self.transition(ServerState::WritingHeader, logger);
                    codec::write_header(stream, &reply).await?;
                    self.transition(ServerState::WritingPayload, logger);
                    codec::write_payload(stream, &reply).await?;
                }
                Mode::FireAndForget => {
                    let _ = handler.handle(request);
                }
                Mode::Unknown => {
                    logger.warn(format_args!(
                        "connection {}: dropping message with unknown mode ({} bytes)",
                        self.id,
                        request.payload_length()
                    ));
                }
            }
        }
    }
}

impl Session for ServerSession {
    fn id(&self) -> u64 {
        self.id
    }

    fn stop(&self) {
        self.shutdown.notify_one();
    }
}

/// ReadingHeader, reissued while the read fails transiently.
async fn read_header_reissuing<M, R>(reader: &mut R, message: &mut M) -> Result<()>
where
    M: Message,
    R: AsyncRead + Unpin,
{
    loop {
        match codec::read_header(reader, message).await {
            Err(IpcError::Io(ref e)) if IpcError::is_transient(e) => continue,
            other => return other,
        }
    }
}

/// ReadingPayload, reissued while the read fails transiently.
async fn read_payload_reissuing<M, R>(reader: &mut R, message: &mut M) -> Result<()>
where
    M: Message,
    R: AsyncRead + Unpin,
{
    loop {
        match codec::read_payload(reader, message).await {
            Err(IpcError::Io(ref e)) if IpcError::is_transient(e) => continue,
            other => return other,
        }
    }
}

/// Listener closed underneath the accept loop; nothing more will arrive.
fn acceptor_closed(err: &io::Error) -> bool {
    matches!(
        err.raw_os_error(),
        Some(libc::EBADF) | Some(libc::EINVAL) | Some(libc::ENOTSOCK)
    )
}

/// Log a failed accept and decide whether the loop keeps going.
fn on_accept_error(err: &io::Error, logger: &Logger) -> ControlFlow<()> {
    if acceptor_closed(err) {
        logger.error(format_args!("listener closed: {}", err));
        ControlFlow::Break(())
    } else {
        logger.warn(format_args!("accept error: {}", err));
        ControlFlow::Continue(())
    }
}

async fn accept_loop<M: Message>(
    listener: UnixListener,
    dispatch: Dispatch<M>,
    connection_ids: Arc<IdGenerator>,
    mut shutdown: watch::Receiver<bool>,
) {
    let logger = dispatch.logger.clone();
    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                logger.debug(format_args!("accept loop shutting down"));
                break;
            }
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, _addr)) => {
                        let session = Arc::new(ServerSession::new(connection_ids.next_id()));
                        dispatch.registry.register(Arc::clone(&session));
                        logger.debug(format_args!("accepted connection {}", session.id));
                        tokio::spawn(session.run::<M, UnixStream>(stream, dispatch.clone()));
                    }
                    Err(e) => {
                        if on_accept_error(&e, &logger).is_break() {
                            break;
                        }
                    }
                }
            }
        }
    }
}

/// Server side of a local IPC channel.
///
/// Owns the listening socket, the reactor and its worker threads, and the
/// registry of live connections. Must be stopped or dropped outside of any
/// async context, since shutting down joins the worker threads.
pub struct ServerEndpoint<M: Message> {
    config: IpcConfig,
    socket_path: PathBuf,
    listener: StdUnixListener,
    handler: Arc<dyn RequestHandler<M>>,
    registry: Arc<HandlerRegistry<ServerSession>>,
    connection_ids: Arc<IdGenerator>,
    logger: Logger,
    runtime: Option<Runtime>,
    shutdown_tx: Option<watch::Sender<bool>>,
}

impl<M: Message> ServerEndpoint<M> {
    /// Bind `<socket_prefix>/<socket_file>`, replacing any stale socket file.
    pub fn bind<H>(config: IpcConfig, socket_file: &str, handler: H) -> Result<Self>
    where
        H: RequestHandler<M>,
    {
        let socket_path = config.socket_path(socket_file);

        if socket_path.exists() {
            fs::remove_file(&socket_path)?;
        }

        if let Some(parent) = socket_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let listener = StdUnixListener::bind(&socket_path)?;
        listener.set_nonblocking(true)?;

        let logger = Logger::server();
        logger.info(format_args!("listening on {}", socket_path.display()));

        Ok(Self {
            config,
            socket_path,
            listener,
            handler: Arc::new(handler),
            registry: Arc::new(HandlerRegistry::new()),
            connection_ids: Arc::new(IdGenerator::new()),
            logger,
            runtime: None,
            shutdown_tx: None,
        })
    }

    /// Replace the logging capability handed to sessions.
    pub fn with_logger(mut self, logger: Logger) -> Self {
        self.logger = logger;
        self
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Start `workers` reactor threads and begin accepting connections.
    pub fn run(&mut self, workers: usize) -> Result<()> {
        if self.runtime.is_some() {
            self.logger.warn(format_args!("server already running"));
            return Ok(());
        }
        if workers == 0 {
            return Err(IpcError::Config("worker count must be > 0".into()));
        }

        let runtime = Builder::new_multi_thread()
            .worker_threads(workers)
            .thread_name("ipclane-server")
            .enable_all()
            .build()?;

        let listener = {
            let _guard = runtime.enter();
            UnixListener::from_std(self.listener.try_clone()?)?
        };

        let dispatch = Dispatch {
            handler: Arc::clone(&self.handler),
            registry: Arc::clone(&self.registry),
            logger: self.logger.clone(),
        };
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        runtime.spawn(accept_loop(
            listener,
            dispatch,
            Arc::clone(&self.connection_ids),
            shutdown_rx,
        ));

        self.logger.info(format_args!("server running with {} workers", workers));
        self.runtime = Some(runtime);
        self.shutdown_tx = Some(shutdown_tx);
        Ok(())
    }

    /// Stop accepting, close every live session, and join the workers.
    pub fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(true);
        }

        self.registry.stop_all();

        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_timeout(self.config.shutdown_timeout());
            self.logger.info(format_args!("server stopped"));
        }

        // Connections accepted while the loop was winding down never ran
        self.registry.stop_all();
    }

    pub fn is_running(&self) -> bool {
        self.runtime.is_some()
    }

    /// Live connection count.
    pub fn connections(&self) -> usize {
        self.registry.count()
    }
}

impl<M: Message> Drop for ServerEndpoint<M> {
    fn drop(&mut self) {
        self.stop();
        if self.socket_path.exists() {
            if let Err(e) = fs::remove_file(&self.socket_path) {
                self.logger.warn(format_args!(
                    "failed to remove {}: {}",
                    self.socket_path.display(),
                    e
                ));
            }
        }
    }
}
