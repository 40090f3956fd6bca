//! MJPEG-over-HTTP frame server.
//!
//! A producer pushes JPEG-encoded frames into a [`FrameServer`]; every HTTP
//! client connected to the server receives either the current frame as a
//! single `image/jpeg` response or a continuous `multipart/x-mixed-replace`
//! stream in which each part supersedes the previous one.
//!
//! Only the most recent frame is kept. Slow clients skip frames instead of
//! queueing them.
//!
//! # Wire format
//!
//! See the [`http`] module for the response layout.

pub mod buffer;
pub mod client;
pub mod error;
pub mod handler;
pub mod http;
mod listener;
pub mod server;

pub use buffer::{Change, Frame, FrameBuffer, FrameWatcher};
pub use client::MjpegReader;
pub use error::StreamError;
pub use server::{ConnectionPolicy, FrameServer, ServerConfig, ServerState, StreamMode};

use std::time::Duration;

/// Multipart boundary token used when none is configured.
pub const MJPEG_BOUNDARY: &str = "unity_gpvudk";

/// Upper bound for an HTTP request or response head (request line + headers).
pub const MAX_HEAD_SIZE: usize = 8 * 1024;

/// Largest frame an [`MjpegReader`] accepts unless configured otherwise.
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Time a client has to send its request head after connecting.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Time allowed for writing one response part before the client is dropped.
pub const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Time a reader allows for connecting, and again for the response head.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
