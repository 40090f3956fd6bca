//! Tick-driven bridge between a frame producer and a frame server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use framecast_server::{FrameServer, StreamMode};
use tokio::sync::{Mutex, broadcast};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::error::ControllerError;
use crate::producer::FrameProducer;

const EVENT_CAPACITY: usize = 16;

/// Controller configuration.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Port to bind on `start_server` (0 = auto-assign).
    pub server_port: u16,
    pub mode: StreamMode,
    /// Interval between two producer polls while streaming.
    pub tick_interval: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            server_port: 0,
            mode: StreamMode::Continuous,
            tick_interval: Duration::from_millis(16),
        }
    }
}

/// Lifecycle notifications emitted by the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamingEvent {
    Started { addr: SocketAddr },
    Stopped,
}

/// Starts and stops a [`FrameServer`] and feeds it frames from a producer.
///
/// While streaming, a background task calls the equivalent of
/// [`tick`](Self::tick) every `tick_interval`.
pub struct StreamingController {
    server: Arc<FrameServer>,
    inner: Arc<Mutex<ControllerInner>>,
    events: broadcast::Sender<StreamingEvent>,
    shutdown: CancellationToken,
}

struct ControllerInner {
    producer: Box<dyn FrameProducer>,
    port: u16,
    mode: StreamMode,
    tick_interval: Duration,
    ticker: Option<CancellationToken>,
}

impl StreamingController {
    pub fn new(
        server: Arc<FrameServer>,
        producer: impl FrameProducer,
        config: ControllerConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            server,
            inner: Arc::new(Mutex::new(ControllerInner {
                producer: Box::new(producer),
                port: config.server_port,
                mode: config.mode,
                tick_interval: config.tick_interval,
                ticker: None,
            })),
            events,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn server(&self) -> &Arc<FrameServer> {
        &self.server
    }

    /// Subscribes to start/stop notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<StreamingEvent> {
        self.events.subscribe()
    }

    /// Bound port while listening, otherwise the configured one.
    pub async fn server_port(&self) -> u16 {
        if self.server.is_listening() {
            return self.server.port();
        }
        self.inner.lock().await.port
    }

    /// Changes the port used by the next `start_server`.
    pub async fn set_server_port(&self, port: u16) -> Result<(), ControllerError> {
        let mut inner = self.inner.lock().await;
        if self.server.is_listening() {
            warn!(
                port,
                current = self.server.port(),
                "cannot change port while the server is listening"
            );
            return Err(ControllerError::PortLocked);
        }
        inner.port = port;
        Ok(())
    }

    /// Starts the producer and the server, then begins streaming.
    ///
    /// Returns the current address without side effects if the server is
    /// already listening.
    pub async fn start_server(&self) -> Result<SocketAddr, ControllerError> {
        let mut inner = self.inner.lock().await;
        if let Some(addr) = self.server.local_addr() {
            return Ok(addr);
        }

        if !inner.producer.start() {
            warn!("frame producer failed to start");
        }

        let addr = match self.server.start(inner.port, inner.mode).await {
            Ok(addr) => addr,
            Err(e) => {
                inner.producer.stop();
                return Err(e.into());
            }
        };

        self.start_streaming_locked(&mut inner);
        drop(inner);

        info!(%addr, "streaming server started");
        let _ = self.events.send(StreamingEvent::Started { addr });
        Ok(addr)
    }

    /// Resumes pushing frames. Returns `false` if the server is not
    /// listening or streaming is already active.
    pub async fn start_streaming(&self) -> bool {
        let mut inner = self.inner.lock().await;
        self.start_streaming_locked(&mut inner)
    }

    /// Stops pushing frames; the server keeps listening.
    pub async fn pause_streaming(&self) {
        let mut inner = self.inner.lock().await;
        if let Some(ticker) = inner.ticker.take() {
            ticker.cancel();
            info!("streaming paused");
        }
    }

    pub async fn is_streaming(&self) -> bool {
        self.inner.lock().await.ticker.is_some()
    }

    /// Pushes one frame if streaming and the producer has a new one ready.
    ///
    /// Returns `true` if a frame was pushed.
    pub async fn tick(&self) -> bool {
        let mut inner = self.inner.lock().await;
        if inner.ticker.is_none() {
            return false;
        }
        push_frame(&self.server, &mut inner)
    }

    /// Stops streaming, the server and the producer. Idempotent.
    pub async fn stop_server(&self) {
        let mut inner = self.inner.lock().await;
        if let Some(ticker) = inner.ticker.take() {
            ticker.cancel();
        }

        let was_listening = self.server.is_listening();
        self.server.stop().await;
        if !was_listening {
            return;
        }

        inner.producer.stop();
        drop(inner);

        info!("streaming server stopped");
        let _ = self.events.send(StreamingEvent::Stopped);
    }

    fn start_streaming_locked(&self, inner: &mut ControllerInner) -> bool {
        if !self.server.is_listening() || inner.ticker.is_some() {
            return false;
        }

        let cancel = self.shutdown.child_token();
        inner.ticker = Some(cancel.clone());

        let period = inner.tick_interval;
        let state = Arc::clone(&self.inner);
        let server = Arc::clone(&self.server);
        tokio::spawn(async move {
            streaming_loop(state, server, period, cancel).await;
        });

        debug!(?period, "streaming started");
        true
    }
}

impl Drop for StreamingController {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn streaming_loop(
    inner: Arc<Mutex<ControllerInner>>,
    server: Arc<FrameServer>,
    period: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // Skip the first immediate tick.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let mut guard = inner.lock().await;
                // Paused while waiting for the lock.
                if cancel.is_cancelled() {
                    break;
                }
                push_frame(&server, &mut guard);
            }
        }
    }

    debug!("streaming loop finished");
}

fn push_frame(server: &FrameServer, inner: &mut ControllerInner) -> bool {
    let producer = &mut inner.producer;
    if !producer.is_playing() || !producer.has_new_frame() {
        return false;
    }

    match producer.encode_jpeg() {
        Some(jpeg) => {
            trace!(len = jpeg.len(), "pushing frame");
            server.update_frame(Some(jpeg));
            true
        }
        None => {
            debug!("producer returned no frame");
            false
        }
    }
}
