//! Accept loop for a running frame server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::buffer::{FrameBuffer, FrameWatcher};
use crate::handler::{ConnectionHandler, Served};
use crate::server::ConnectionPolicy;

/// Pause after a failed `accept` so a persistent error (e.g. fd exhaustion)
/// does not spin.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(50);

/// Everything the accept loop needs for one server run.
pub(crate) struct ListenerContext {
    pub frames: Arc<FrameBuffer>,
    pub handler: Arc<ConnectionHandler>,
    pub policy: ConnectionPolicy,
    pub cancel: CancellationToken,
    pub tracker: TaskTracker,
}

/// Accepts connections until cancelled.
///
/// The listener is dropped, and the socket closed, when the loop returns.
pub(crate) async fn accept_loop(listener: TcpListener, ctx: ListenerContext) {
    loop {
        let (stream, peer_addr) = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => break,
            result = listener.accept() => match result {
                Ok(accepted) => accepted,
                Err(e) => {
                    error!("accept error: {e}");
                    tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                    continue;
                }
            }
        };

        info!(%peer_addr, "frame client connected");
        let watcher = ctx.frames.subscribe();

        match ctx.policy {
            ConnectionPolicy::Sequential => {
                serve_connection(&ctx.handler, stream, peer_addr, watcher).await;
            }
            ConnectionPolicy::Concurrent => {
                let handler = Arc::clone(&ctx.handler);
                ctx.tracker.spawn(async move {
                    serve_connection(&handler, stream, peer_addr, watcher).await;
                });
            }
        }
    }

    drop(listener);
    info!("stopped listening");
}

/// Serves one connection and logs how it ended. Never fails.
async fn serve_connection(
    handler: &ConnectionHandler,
    stream: TcpStream,
    peer_addr: SocketAddr,
    watcher: FrameWatcher,
) {
    let _ = stream.set_nodelay(true);
    match handler.serve(stream, watcher).await {
        Ok(Served::Stream { frames }) => info!(%peer_addr, frames, "frame stream finished"),
        Ok(served) => debug!(%peer_addr, ?served, "frame request finished"),
        Err(e) if e.is_disconnect() => debug!(%peer_addr, "frame client disconnected: {e}"),
        Err(e) => warn!(%peer_addr, "frame connection error: {e}"),
    }
}
