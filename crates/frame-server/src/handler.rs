//! Per-connection request handling.
//!
//! A handler reads one request head, waits for a frame, and then answers
//! according to the server's [`StreamMode`]: one JPEG and close, or a
//! multipart stream that runs until the buffer is cleared, the server stops,
//! or a write fails. Nothing is written if the server stops first.

use std::future::Future;
use std::time::Duration;

use chrono::Utc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::MAX_HEAD_SIZE;
use crate::buffer::{Change, Frame, FrameWatcher};
use crate::error::StreamError;
use crate::http::{self, RequestHead};
use crate::server::{ServerConfig, StreamMode};

/// How a served connection ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Served {
    /// The client closed the connection before sending a request.
    NoRequest,
    /// A single frame (or its headers, for `HEAD`) was written.
    SingleFrame,
    /// A multipart stream ended after writing `frames` parts.
    Stream { frames: u64 },
    /// The server stopped before the response was written.
    Stopped,
}

/// What ended a wait for the next frame.
enum Wait {
    Frame(Frame),
    Ended,
}

/// Result of a write raced against server shutdown.
#[derive(Debug, PartialEq, Eq)]
enum Written {
    Done,
    Stopped,
}

/// Serves frame requests for one server run.
#[derive(Debug, Clone)]
pub struct ConnectionHandler {
    mode: StreamMode,
    boundary: String,
    request_timeout: Duration,
    write_timeout: Duration,
    cancel: CancellationToken,
}

impl ConnectionHandler {
    pub fn new(mode: StreamMode, config: &ServerConfig, cancel: CancellationToken) -> Self {
        Self {
            mode,
            boundary: config.boundary.clone(),
            request_timeout: config.request_timeout,
            write_timeout: config.write_timeout,
            cancel,
        }
    }

    pub fn mode(&self) -> StreamMode {
        self.mode
    }

    /// Serves a single connection to completion.
    ///
    /// `watcher` must have been subscribed to the server's frame buffer; a
    /// fresh watcher sends the current frame first.
    pub async fn serve<S>(&self, stream: S, mut watcher: FrameWatcher) -> Result<Served, StreamError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let (reader, writer) = tokio::io::split(stream);
        let mut reader = BufReader::new(reader);
        let mut writer = BufWriter::new(writer);

        let head = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Ok(Served::Stopped),
            result = tokio::time::timeout(
                self.request_timeout,
                http::read_head(&mut reader, MAX_HEAD_SIZE),
            ) => match result {
                Ok(Ok(Some(lines))) => lines,
                Ok(Ok(None)) => return Ok(Served::NoRequest),
                Ok(Err(e)) => return Err(e),
                Err(_) => return Err(StreamError::Timeout),
            }
        };

        let request = match RequestHead::parse(&head) {
            Ok(request) => request,
            Err(e) => {
                let _ = self
                    .write_timed(&mut writer, http::error_response(400, "Bad Request").as_bytes())
                    .await;
                return Err(e);
            }
        };

        let head_only = match request.method.as_str() {
            "GET" => false,
            "HEAD" => true,
            other => {
                let _ = self
                    .write_timed(
                        &mut writer,
                        http::error_response(405, "Method Not Allowed").as_bytes(),
                    )
                    .await;
                return Err(StreamError::Protocol(format!("unsupported method {other}")));
            }
        };

        debug!(
            method = %request.method,
            target = %request.target,
            mode = ?self.mode,
            "frame request"
        );

        let served = match self.mode {
            StreamMode::SingleFrame => {
                self.send_single_frame(&mut reader, &mut writer, &mut watcher, head_only)
                    .await?
            }
            StreamMode::Continuous => {
                self.send_stream(&mut reader, &mut writer, &mut watcher, head_only)
                    .await?
            }
        };

        let _ = self.timed(writer.shutdown()).await;
        Ok(served)
    }

    async fn send_single_frame<R, W>(
        &self,
        reader: &mut R,
        writer: &mut W,
        watcher: &mut FrameWatcher,
        head_only: bool,
    ) -> Result<Served, StreamError>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut read_open = true;
        let frame = match self.wait_frame(reader, watcher, &mut read_open).await? {
            Wait::Frame(frame) => frame,
            Wait::Ended => return Ok(Served::Stopped),
        };

        let head = http::single_frame_head(frame.data.len(), Utc::now());
        if self.write_timed(writer, head.as_bytes()).await? == Written::Stopped {
            return Ok(Served::Stopped);
        }
        if !head_only && self.write_timed(writer, &frame.data).await? == Written::Stopped {
            return Ok(Served::Stopped);
        }
        Ok(Served::SingleFrame)
    }

    async fn send_stream<R, W>(
        &self,
        reader: &mut R,
        writer: &mut W,
        watcher: &mut FrameWatcher,
        head_only: bool,
    ) -> Result<Served, StreamError>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut read_open = true;
        let mut next = match self.wait_frame(reader, watcher, &mut read_open).await? {
            Wait::Frame(frame) => Some(frame),
            Wait::Ended => return Ok(Served::Stopped),
        };

        let head = http::multipart_head(&self.boundary, Utc::now());
        if self.write_timed(writer, head.as_bytes()).await? == Written::Stopped {
            return Ok(Served::Stopped);
        }
        if head_only {
            return Ok(Served::Stream { frames: 0 });
        }

        let mut frames = 0u64;
        loop {
            let frame = match next.take() {
                Some(frame) => frame,
                None => match self.wait_frame(reader, watcher, &mut read_open).await? {
                    Wait::Frame(frame) => frame,
                    Wait::Ended => {
                        debug!(frames, "stream ended by server");
                        break;
                    }
                },
            };
            if self.write_part(writer, &frame).await? == Written::Stopped {
                debug!(frames, "stream cancelled during a write");
                break;
            }
            frames += 1;
        }

        Ok(Served::Stream { frames })
    }

    /// Waits for a frame the client has not seen yet.
    ///
    /// Also drains the read side while it is open so a reset connection is
    /// noticed without waiting for the next frame. EOF only means the client
    /// half-closed; it may still be reading, so `read_open` is cleared and
    /// the wait goes on.
    async fn wait_frame<R>(
        &self,
        reader: &mut R,
        watcher: &mut FrameWatcher,
        read_open: &mut bool,
    ) -> Result<Wait, StreamError>
    where
        R: AsyncRead + Unpin,
    {
        let mut scratch = [0u8; 256];
        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Ok(Wait::Ended),
                change = watcher.next_change() => {
                    return Ok(match change {
                        Change::Frame(frame) => Wait::Frame(frame),
                        Change::Cleared | Change::Closed => Wait::Ended,
                    });
                }
                read = reader.read(&mut scratch), if *read_open => match read {
                    Ok(0) => {
                        debug!("client closed its write side");
                        *read_open = false;
                    }
                    // Anything a client sends after its request is ignored.
                    Ok(_) => {}
                    Err(e) => return Err(StreamError::ConnectionLost(e)),
                }
            }
        }
    }

    async fn write_part<W>(&self, writer: &mut W, frame: &Frame) -> Result<Written, StreamError>
    where
        W: AsyncWrite + Unpin,
    {
        let header = http::part_header(&self.boundary, frame.data.len());
        self.timed(async {
            writer.write_all(header.as_bytes()).await?;
            writer.write_all(&frame.data).await?;
            writer.write_all(b"\r\n").await?;
            writer.flush().await
        })
        .await
    }

    async fn write_timed<W>(&self, writer: &mut W, bytes: &[u8]) -> Result<Written, StreamError>
    where
        W: AsyncWrite + Unpin,
    {
        self.timed(async {
            writer.write_all(bytes).await?;
            writer.flush().await
        })
        .await
    }

    /// Bounds a write by the write timeout and abandons it when the server
    /// stops, so a viewer that stopped reading cannot hold up `stop()`.
    async fn timed<F>(&self, write: F) -> Result<Written, StreamError>
    where
        F: Future<Output = std::io::Result<()>>,
    {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Ok(Written::Stopped),
            result = tokio::time::timeout(self.write_timeout, write) => match result {
                Ok(Ok(())) => Ok(Written::Done),
                Ok(Err(e)) => Err(StreamError::ConnectionLost(e)),
                Err(_) => Err(StreamError::Timeout),
            }
        }
    }
}
