//! Streaming controller for the framecast frame server.
//!
//! Pulls encoded frames from a [`FrameProducer`] at a fixed tick rate and
//! pushes them into a [`FrameServer`](framecast_server::FrameServer).

mod controller;
mod error;
mod producer;

pub use controller::{ControllerConfig, StreamingController, StreamingEvent};
pub use error::ControllerError;
pub use producer::FrameProducer;
