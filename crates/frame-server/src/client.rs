//! MJPEG reader (viewer side).
//!
//! Connects to a frame server, or any IP camera that serves MJPEG over HTTP,
//! and yields the JPEG frames one at a time. Handles both continuous
//! `multipart/x-mixed-replace` streams and single `image/jpeg` responses.

use std::net::SocketAddr;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::{debug, info};

use crate::error::StreamError;
use crate::http::{self, JPEG_CONTENT_TYPE, MULTIPART_CONTENT_TYPE};
use crate::{CONNECT_TIMEOUT, MAX_FRAME_SIZE, MAX_HEAD_SIZE};

#[derive(Debug)]
enum Body {
    Multipart { boundary: String },
    Single { length: Option<usize>, done: bool },
}

/// Reads JPEG frames from an MJPEG HTTP response.
#[derive(Debug)]
pub struct MjpegReader<S = TcpStream> {
    reader: BufReader<S>,
    body: Body,
    read_timeout: Option<Duration>,
    max_frame_size: usize,
}

impl MjpegReader<TcpStream> {
    /// Sends `GET <path>` to `addr` and reads the response head.
    pub async fn connect(addr: SocketAddr, path: &str) -> Result<Self, StreamError> {
        let mut stream = match tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(addr)).await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => return Err(StreamError::Timeout),
        };

        let request = format!(
            "GET {path} HTTP/1.1\r\nHost: {addr}\r\nAccept: {MULTIPART_CONTENT_TYPE}, {JPEG_CONTENT_TYPE}\r\nConnection: close\r\n\r\n"
        );
        stream
            .write_all(request.as_bytes())
            .await
            .map_err(StreamError::ConnectionLost)?;

        let reader = tokio::time::timeout(CONNECT_TIMEOUT, Self::from_response(stream))
            .await
            .map_err(|_| StreamError::Timeout)??;
        info!(%addr, path, "connected to MJPEG source");
        Ok(reader)
    }
}

impl<S: AsyncRead + Unpin> MjpegReader<S> {
    /// Reads and validates a response head from an already-requested stream.
    pub async fn from_response(stream: S) -> Result<Self, StreamError> {
        let mut reader = BufReader::new(stream);
        let lines = http::read_head(&mut reader, MAX_HEAD_SIZE)
            .await?
            .ok_or_else(|| {
                StreamError::ConnectionLost(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "connection closed before a response",
                ))
            })?;

        let (status_line, header_lines) = lines
            .split_first()
            .ok_or_else(|| StreamError::Protocol("empty response head".into()))?;
        let status = parse_status(status_line)?;
        if status != 200 {
            return Err(StreamError::Protocol(format!(
                "unexpected status: {status_line}"
            )));
        }

        let headers = http::parse_headers(header_lines)?;
        let content_type = http::header_value(&headers, "content-type")
            .ok_or_else(|| StreamError::ProtocolMismatch("missing Content-Type".into()))?;

        let body = if has_media_type(content_type, MULTIPART_CONTENT_TYPE) {
            let boundary = http::boundary_param(content_type).ok_or_else(|| {
                StreamError::Protocol(format!("multipart without boundary: {content_type}"))
            })?;
            Body::Multipart {
                boundary: boundary.trim_start_matches("--").to_string(),
            }
        } else if has_media_type(content_type, JPEG_CONTENT_TYPE) {
            let length = http::header_value(&headers, "content-length")
                .map(parse_length)
                .transpose()?;
            Body::Single {
                length,
                done: false,
            }
        } else {
            return Err(StreamError::ProtocolMismatch(content_type.to_string()));
        };

        debug!(?body, "MJPEG response accepted");
        Ok(Self {
            reader,
            body,
            read_timeout: None,
            max_frame_size: MAX_FRAME_SIZE,
        })
    }

    /// Fails [`next_frame`](Self::next_frame) with [`StreamError::Timeout`]
    /// when no frame completes within `timeout`. `None` waits forever.
    pub fn set_read_timeout(&mut self, timeout: Option<Duration>) {
        self.read_timeout = timeout;
    }

    /// Frames larger than `limit` bytes fail with [`StreamError::Protocol`]
    /// before anything is allocated for them.
    pub fn set_max_frame_size(&mut self, limit: usize) {
        self.max_frame_size = limit;
    }

    /// Returns `true` for a continuous multipart stream.
    pub fn is_multipart(&self) -> bool {
        matches!(self.body, Body::Multipart { .. })
    }

    /// Reads the next frame. `None` means the stream ended cleanly.
    pub async fn next_frame(&mut self) -> Result<Option<Bytes>, StreamError> {
        match self.read_timeout {
            Some(limit) => match tokio::time::timeout(limit, self.read_frame()).await {
                Ok(result) => result,
                Err(_) => Err(StreamError::Timeout),
            },
            None => self.read_frame().await,
        }
    }

    async fn read_frame(&mut self) -> Result<Option<Bytes>, StreamError> {
        match &mut self.body {
            Body::Multipart { boundary } => {
                read_part(&mut self.reader, boundary, self.max_frame_size).await
            }
            Body::Single { length, done } => {
                if *done {
                    return Ok(None);
                }
                *done = true;
                let data = match *length {
                    Some(len) => {
                        read_exact_bytes(&mut self.reader, len, self.max_frame_size).await?
                    }
                    None => {
                        let mut data = Vec::new();
                        (&mut self.reader)
                            .take((self.max_frame_size as u64).saturating_add(1))
                            .read_to_end(&mut data)
                            .await
                            .map_err(StreamError::ConnectionLost)?;
                        if data.len() > self.max_frame_size {
                            return Err(too_large(self.max_frame_size));
                        }
                        data
                    }
                };
                Ok(Some(Bytes::from(data)))
            }
        }
    }
}

/// Reads one multipart part: boundary line, part headers, payload, CRLF.
async fn read_part<R: AsyncRead + Unpin>(
    reader: &mut BufReader<R>,
    boundary: &str,
    max_frame_size: usize,
) -> Result<Option<Bytes>, StreamError> {
    // Tolerate stray blank lines between parts.
    let marker = loop {
        match http::read_line(reader, MAX_HEAD_SIZE).await? {
            None => return Ok(None),
            Some(line) if line.trim().is_empty() => continue,
            Some(line) => break line,
        }
    };

    let marker = marker.trim();
    if marker == format!("--{boundary}--") {
        return Ok(None);
    }
    if marker != format!("--{boundary}") {
        return Err(StreamError::Protocol(format!(
            "expected boundary --{boundary}, got {marker:?}"
        )));
    }

    let header_lines = http::read_head(reader, MAX_HEAD_SIZE).await?.ok_or_else(|| {
        StreamError::ConnectionLost(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "stream ended after boundary",
        ))
    })?;
    let headers = http::parse_headers(&header_lines)?;
    let content_type = http::header_value(&headers, "content-type");
    if let Some(content_type) = content_type.filter(|t| !has_media_type(t, JPEG_CONTENT_TYPE)) {
        return Err(StreamError::ProtocolMismatch(content_type.to_string()));
    }
    let length = http::header_value(&headers, "content-length")
        .ok_or_else(|| StreamError::Protocol("part without Content-Length".into()))
        .and_then(parse_length)?;

    let data = read_exact_bytes(reader, length, max_frame_size).await?;

    let mut crlf = [0u8; 2];
    match reader.read_exact(&mut crlf).await {
        Ok(_) if &crlf == b"\r\n" => {}
        Ok(_) => {
            return Err(StreamError::Protocol(
                "missing CRLF after part payload".into(),
            ));
        }
        // A stream cut right after the payload still delivered a full frame.
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {}
        Err(e) => return Err(StreamError::ConnectionLost(e)),
    }

    Ok(Some(Bytes::from(data)))
}

async fn read_exact_bytes<R: AsyncRead + Unpin>(
    reader: &mut R,
    len: usize,
    limit: usize,
) -> Result<Vec<u8>, StreamError> {
    if len > limit {
        return Err(too_large(limit));
    }
    let mut data = vec![0u8; len];
    reader
        .read_exact(&mut data)
        .await
        .map_err(StreamError::ConnectionLost)?;
    Ok(data)
}

fn parse_status(line: &str) -> Result<u16, StreamError> {
    let mut parts = line.split_whitespace();
    match (parts.next(), parts.next()) {
        (Some(version), Some(code)) if version.starts_with("HTTP/") => code
            .parse()
            .map_err(|_| StreamError::Protocol(format!("malformed status line: {line:?}"))),
        _ => Err(StreamError::Protocol(format!(
            "malformed status line: {line:?}"
        ))),
    }
}

fn too_large(limit: usize) -> StreamError {
    StreamError::Protocol(format!("frame exceeds {limit} bytes"))
}

fn parse_length(value: &str) -> Result<usize, StreamError> {
    value
        .trim()
        .parse()
        .map_err(|_| StreamError::Protocol(format!("invalid Content-Length: {value:?}")))
}

fn has_media_type(content_type: &str, expected: &str) -> bool {
    content_type
        .split(';')
        .next()
        .is_some_and(|media| media.trim().eq_ignore_ascii_case(expected))
}
