use framecast_server::StreamError;

/// Errors returned by the [`StreamingController`](crate::StreamingController).
#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    #[error(transparent)]
    Server(#[from] StreamError),

    #[error("cannot change the port while the server is listening")]
    PortLocked,
}
