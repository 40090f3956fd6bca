//! Frame server façade.
//!
//! Owns the frame buffer and the lifecycle of the accept loop:
//! `Stopped → Starting → Listening → Stopping → Stopped`.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::net::TcpListener;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::buffer::FrameBuffer;
use crate::error::StreamError;
use crate::handler::ConnectionHandler;
use crate::listener::{self, ListenerContext};
use crate::{MJPEG_BOUNDARY, REQUEST_TIMEOUT, WRITE_TIMEOUT};

/// What each request receives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamMode {
    /// One JPEG per request, then the connection closes.
    SingleFrame,
    /// A `multipart/x-mixed-replace` stream of every new frame.
    Continuous,
}

/// How accepted connections are scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionPolicy {
    /// Serve one connection to completion before accepting the next.
    ///
    /// Limits a continuous stream to a single viewer at a time.
    Sequential,
    /// Serve every connection on its own task.
    #[default]
    Concurrent,
}

/// Lifecycle state of a [`FrameServer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ServerState {
    #[default]
    Stopped,
    Starting,
    Listening,
    Stopping,
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind (`0.0.0.0` = all interfaces).
    pub bind_address: IpAddr,
    pub policy: ConnectionPolicy,
    /// Multipart boundary token.
    pub boundary: String,
    /// Time a client has to send its request head.
    pub request_timeout: Duration,
    /// Time allowed for writing one response part.
    pub write_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            policy: ConnectionPolicy::default(),
            boundary: MJPEG_BOUNDARY.to_string(),
            request_timeout: REQUEST_TIMEOUT,
            write_timeout: WRITE_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Status {
    state: ServerState,
    local_addr: Option<SocketAddr>,
    mode: Option<StreamMode>,
}

struct Running {
    local_addr: SocketAddr,
    cancel: CancellationToken,
    tracker: TaskTracker,
    accept_task: JoinHandle<()>,
}

/// HTTP server streaming the most recent frame to every client.
///
/// Share it behind an `Arc`; all methods take `&self`.
pub struct FrameServer {
    config: ServerConfig,
    frames: Arc<FrameBuffer>,
    status: watch::Sender<Status>,
    running: Mutex<Option<Running>>,
}

impl FrameServer {
    pub fn new(config: ServerConfig) -> Self {
        let (status, _) = watch::channel(Status::default());
        Self {
            config,
            frames: Arc::new(FrameBuffer::new()),
            status,
            running: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// The buffer frames are served from.
    pub fn frames(&self) -> &Arc<FrameBuffer> {
        &self.frames
    }

    pub fn state(&self) -> ServerState {
        self.status.borrow().state
    }

    pub fn is_listening(&self) -> bool {
        self.state() == ServerState::Listening
    }

    /// Address of the bound listener while running.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.status.borrow().local_addr
    }

    /// Bound port while running, 0 otherwise.
    pub fn port(&self) -> u16 {
        self.local_addr().map(|a| a.port()).unwrap_or(0)
    }

    /// Mode of the current run.
    pub fn mode(&self) -> Option<StreamMode> {
        self.status.borrow().mode
    }

    /// Starts listening on `port` (0 = OS-assigned).
    ///
    /// Does nothing and returns the bound address if already running. The
    /// frame buffer is emptied before the listener is spawned, so frames
    /// pushed while stopped are never served. On error the server stays
    /// stopped.
    ///
    /// Port 0 is handed to the OS in the bind itself and the real port is
    /// read back from the listener, so no other process can take the port
    /// between choosing and binding it.
    pub async fn start(&self, port: u16, mode: StreamMode) -> Result<SocketAddr, StreamError> {
        let mut running = self.running.lock().await;
        if let Some(run) = running.as_ref() {
            debug!(local_addr = %run.local_addr, "frame server already running");
            return Ok(run.local_addr);
        }

        self.set_status(ServerState::Starting, None, None);

        let addr = SocketAddr::new(self.config.bind_address, port);
        let bound = match TcpListener::bind(addr).await {
            Ok(listener) => listener.local_addr().map(|local| (listener, local)),
            Err(e) => Err(e),
        };
        let (listener, local_addr) = match bound {
            Ok(bound) => bound,
            Err(source) => {
                self.set_status(ServerState::Stopped, None, None);
                warn!(%addr, "frame server failed to bind: {source}");
                return Err(StreamError::Bind { addr, source });
            }
        };

        self.frames.clear();

        let cancel = CancellationToken::new();
        let tracker = TaskTracker::new();
        let ctx = ListenerContext {
            frames: Arc::clone(&self.frames),
            handler: Arc::new(ConnectionHandler::new(mode, &self.config, cancel.clone())),
            policy: self.config.policy,
            cancel: cancel.clone(),
            tracker: tracker.clone(),
        };
        let accept_task = tokio::spawn(listener::accept_loop(listener, ctx));

        *running = Some(Running {
            local_addr,
            cancel,
            tracker,
            accept_task,
        });
        self.set_status(ServerState::Listening, Some(local_addr), Some(mode));

        info!(%local_addr, ?mode, policy = ?self.config.policy, "frame server started");
        Ok(local_addr)
    }

    /// Replaces the current frame. `None` empties the buffer.
    ///
    /// Callable from any thread at any time; while stopped the frame is
    /// discarded by the next [`start`](Self::start).
    pub fn update_frame(&self, frame: Option<Bytes>) {
        self.frames.update(frame);
    }

    /// Stops the server and waits for its connections to finish.
    ///
    /// Empties the buffer so waiting handlers wake up, then cancels the
    /// accept loop, which closes the listening socket. Once this returns no
    /// new connection will be served. Does nothing if already stopped.
    pub async fn stop(&self) {
        let mut running = self.running.lock().await;
        let Some(run) = running.take() else {
            return;
        };

        self.set_status(ServerState::Stopping, Some(run.local_addr), self.mode());

        self.frames.clear();
        run.cancel.cancel();

        if let Err(e) = run.accept_task.await {
            warn!("frame server accept loop ended abnormally: {e}");
        }
        run.tracker.close();
        run.tracker.wait().await;

        self.set_status(ServerState::Stopped, None, None);
        info!(local_addr = %run.local_addr, "frame server stopped");
    }

    fn set_status(&self, state: ServerState, local_addr: Option<SocketAddr>, mode: Option<StreamMode>) {
        self.status.send_replace(Status {
            state,
            local_addr,
            mode,
        });
    }
}

impl Default for FrameServer {
    fn default() -> Self {
        Self::new(ServerConfig::default())
    }
}

impl Drop for FrameServer {
    fn drop(&mut self) {
        if let Some(run) = self.running.get_mut().take() {
            run.cancel.cancel();
        }
    }
}
