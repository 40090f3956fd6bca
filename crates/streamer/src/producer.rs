use bytes::Bytes;

/// Source of JPEG-encoded frames.
///
/// The controller polls `is_playing` and `has_new_frame` on every tick and
/// calls `encode_jpeg` only when both hold.
pub trait FrameProducer: Send + 'static {
    /// Called by `start_server` before the server binds. Returning `false`
    /// is logged; the server still starts.
    fn start(&mut self) -> bool {
        true
    }

    /// Called by `stop_server` after the server has stopped.
    fn stop(&mut self) {}

    fn is_playing(&self) -> bool;

    fn has_new_frame(&self) -> bool;

    /// Encodes the current frame. `None` skips this tick.
    fn encode_jpeg(&mut self) -> Option<Bytes>;
}
