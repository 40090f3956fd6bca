//! Minimal HTTP/1.1 framing for frame requests and MJPEG responses.
//!
//! # Wire format
//!
//! ```text
//! SINGLE FRAME:
//!   HTTP/1.1 200 OK
//!   Content-Type: image/jpeg
//!   Content-Length: N
//!   Date: <RFC 1123>
//!   Last-Modified: <RFC 1123>
//!   <N bytes JPEG>                      (connection closes)
//!
//! CONTINUOUS:
//!   HTTP/1.1 200 OK
//!   Content-Type: multipart/x-mixed-replace; boundary=B
//!
//!   then, per frame:
//!   --B\r\n
//!   Content-Type: image/jpeg\r\n
//!   Content-Length: N\r\n
//!   \r\n
//!   <N bytes JPEG>\r\n
//! ```

use chrono::{DateTime, Utc};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

use crate::error::StreamError;

/// Content type of a single frame.
pub const JPEG_CONTENT_TYPE: &str = "image/jpeg";

/// Content type prefix of a continuous stream.
pub const MULTIPART_CONTENT_TYPE: &str = "multipart/x-mixed-replace";

/// A parsed request line plus headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHead {
    pub method: String,
    pub target: String,
    pub version: String,
    pub headers: Vec<(String, String)>,
}

impl RequestHead {
    /// Parses the lines returned by [`read_head`].
    pub fn parse(lines: &[String]) -> Result<Self, StreamError> {
        let (request_line, header_lines) = lines
            .split_first()
            .ok_or_else(|| StreamError::Protocol("empty request".into()))?;

        let mut parts = request_line.split_whitespace();
        let (Some(method), Some(target), Some(version), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(StreamError::Protocol(format!(
                "malformed request line: {request_line:?}"
            )));
        };

        if !version.starts_with("HTTP/") {
            return Err(StreamError::Protocol(format!(
                "unsupported protocol version: {version}"
            )));
        }

        Ok(Self {
            method: method.to_string(),
            target: target.to_string(),
            version: version.to_string(),
            headers: parse_headers(header_lines)?,
        })
    }

    /// Returns the first header value with the given name (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        header_value(&self.headers, name)
    }
}

/// Splits `Name: value` lines into pairs.
pub fn parse_headers(lines: &[String]) -> Result<Vec<(String, String)>, StreamError> {
    lines
        .iter()
        .map(|line| {
            line.split_once(':')
                .map(|(name, value)| (name.trim().to_string(), value.trim().to_string()))
                .ok_or_else(|| StreamError::Protocol(format!("malformed header: {line:?}")))
        })
        .collect()
}

/// Case-insensitive header lookup.
pub fn header_value<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

/// Reads one line and strips its terminator (`\r\n` or bare `\n`).
///
/// Returns `None` if the stream ends before any byte is read.
pub async fn read_line<R: AsyncBufRead + Unpin>(
    reader: &mut R,
    limit: usize,
) -> Result<Option<String>, StreamError> {
    Ok(read_counted_line(reader, limit).await?.map(|(line, _)| line))
}

/// Reads a head section: lines up to and excluding the first empty line.
///
/// Returns `None` if the stream ends before any byte is read. The whole
/// section, terminators included, may not exceed `limit` bytes.
pub async fn read_head<R: AsyncBufRead + Unpin>(
    reader: &mut R,
    limit: usize,
) -> Result<Option<Vec<String>>, StreamError> {
    let mut lines = Vec::new();
    let mut consumed = 0usize;

    loop {
        if consumed >= limit {
            return Err(StreamError::Protocol(format!("head exceeds {limit} bytes")));
        }
        match read_counted_line(reader, limit - consumed).await? {
            None if consumed == 0 => return Ok(None),
            None => return Err(truncated("stream ended inside head")),
            Some((line, n)) => {
                consumed += n;
                if line.is_empty() {
                    return Ok(Some(lines));
                }
                lines.push(line);
            }
        }
    }
}

async fn read_counted_line<R: AsyncBufRead + Unpin>(
    reader: &mut R,
    limit: usize,
) -> Result<Option<(String, usize)>, StreamError> {
    let mut raw = Vec::new();
    let n = (&mut *reader)
        .take(limit as u64)
        .read_until(b'\n', &mut raw)
        .await?;

    if n == 0 {
        return Ok(None);
    }
    if raw.last() != Some(&b'\n') {
        if n >= limit {
            return Err(StreamError::Protocol(format!("line exceeds {limit} bytes")));
        }
        return Err(truncated("stream ended inside a line"));
    }

    let text = String::from_utf8_lossy(&raw);
    Ok(Some((text.trim_end_matches(['\r', '\n']).to_string(), n)))
}

fn truncated(msg: &'static str) -> StreamError {
    StreamError::ConnectionLost(std::io::Error::new(
        std::io::ErrorKind::UnexpectedEof,
        msg,
    ))
}

/// Formats a timestamp as an HTTP date (RFC 1123, always GMT).
pub fn http_date(at: DateTime<Utc>) -> String {
    at.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// Response head for a single JPEG frame of `len` bytes.
pub fn single_frame_head(len: usize, now: DateTime<Utc>) -> String {
    let date = http_date(now);
    format!(
        "HTTP/1.1 200 OK\r\n\
         Content-Type: {JPEG_CONTENT_TYPE}\r\n\
         Content-Length: {len}\r\n\
         Date: {date}\r\n\
         Last-Modified: {date}\r\n\
         Cache-Control: no-cache\r\n\
         Connection: close\r\n\
         \r\n"
    )
}

/// Response head opening a continuous multipart stream.
pub fn multipart_head(boundary: &str, now: DateTime<Utc>) -> String {
    format!(
        "HTTP/1.1 200 OK\r\n\
         Content-Type: {MULTIPART_CONTENT_TYPE}; boundary={boundary}\r\n\
         Date: {date}\r\n\
         Cache-Control: no-cache\r\n\
         Connection: close\r\n\
         \r\n",
        date = http_date(now)
    )
}

/// Boundary line and headers preceding one frame of `len` bytes.
pub fn part_header(boundary: &str, len: usize) -> String {
    format!("--{boundary}\r\nContent-Type: {JPEG_CONTENT_TYPE}\r\nContent-Length: {len}\r\n\r\n")
}

/// Complete bodiless error response.
pub fn error_response(status: u16, reason: &str) -> String {
    format!("HTTP/1.1 {status} {reason}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n")
}

/// Extracts the `boundary` parameter from a multipart content type.
pub fn boundary_param(content_type: &str) -> Option<&str> {
    content_type
        .split(';')
        .skip(1)
        .filter_map(|param| param.trim().split_once('='))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("boundary"))
        .map(|(_, value)| value.trim().trim_matches('"'))
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use tokio::io::BufReader;

    use super::*;

    fn lines(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn http_date_is_rfc1123() {
        let at = Utc.with_ymd_and_hms(1994, 11, 6, 8, 49, 37).unwrap();
        assert_eq!(http_date(at), "Sun, 06 Nov 1994 08:49:37 GMT");
    }

    #[test]
    fn part_header_layout() {
        assert_eq!(
            part_header("unity_gpvudk", 1234),
            "--unity_gpvudk\r\nContent-Type: image/jpeg\r\nContent-Length: 1234\r\n\r\n"
        );
    }

    #[test]
    fn single_frame_head_has_length_and_dates() {
        let at = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let head = single_frame_head(42, at);
        assert!(head.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(head.contains("Content-Type: image/jpeg\r\n"));
        assert!(head.contains("Content-Length: 42\r\n"));
        assert!(head.contains("Date: Tue, 02 Jan 2024 03:04:05 GMT\r\n"));
        assert!(head.contains("Last-Modified: Tue, 02 Jan 2024 03:04:05 GMT\r\n"));
        assert!(head.ends_with("\r\n\r\n"));
    }

    #[test]
    fn multipart_head_names_boundary() {
        let head = multipart_head("unity_gpvudk", Utc::now());
        assert!(
            head.contains("Content-Type: multipart/x-mixed-replace; boundary=unity_gpvudk\r\n")
        );
        assert!(!head.contains("Content-Length"));
    }

    #[test]
    fn parse_request() {
        let head = RequestHead::parse(&lines(&[
            "GET /video HTTP/1.1",
            "Host: localhost:8080",
            "User-Agent: test",
        ]))
        .unwrap();
        assert_eq!(head.method, "GET");
        assert_eq!(head.target, "/video");
        assert_eq!(head.version, "HTTP/1.1");
        assert_eq!(head.header("host"), Some("localhost:8080"));
        assert_eq!(head.header("accept"), None);
    }

    #[test]
    fn parse_request_rejects_garbage() {
        assert!(RequestHead::parse(&lines(&["garbage"])).is_err());
        assert!(RequestHead::parse(&lines(&["GET / FTP/1.0"])).is_err());
        assert!(RequestHead::parse(&lines(&["GET / HTTP/1.1 extra"])).is_err());
        assert!(RequestHead::parse(&lines(&["GET / HTTP/1.1", "no colon"])).is_err());
        assert!(RequestHead::parse(&[]).is_err());
    }

    #[test]
    fn boundary_param_variants() {
        assert_eq!(
            boundary_param("multipart/x-mixed-replace; boundary=unity_gpvudk"),
            Some("unity_gpvudk")
        );
        assert_eq!(
            boundary_param("multipart/x-mixed-replace;boundary=\"frame\""),
            Some("frame")
        );
        assert_eq!(boundary_param("multipart/x-mixed-replace"), None);
        assert_eq!(boundary_param("multipart/x-mixed-replace; boundary="), None);
    }

    #[tokio::test]
    async fn read_head_stops_at_blank_line() {
        let raw = b"GET / HTTP/1.1\r\nHost: a\r\n\r\nbody";
        let mut reader = BufReader::new(&raw[..]);
        let head = read_head(&mut reader, 1024).await.unwrap().unwrap();
        assert_eq!(head, lines(&["GET / HTTP/1.1", "Host: a"]));

        let mut rest = String::new();
        reader.read_to_string(&mut rest).await.unwrap();
        assert_eq!(rest, "body");
    }

    #[tokio::test]
    async fn read_head_accepts_bare_newlines() {
        let raw = b"GET / HTTP/1.0\nHost: a\n\n";
        let mut reader = BufReader::new(&raw[..]);
        let head = read_head(&mut reader, 1024).await.unwrap().unwrap();
        assert_eq!(head.len(), 2);
    }

    #[tokio::test]
    async fn read_line_strips_terminator() {
        let mut reader = BufReader::new(&b"--unity_gpvudk\r\nrest"[..]);
        let line = read_line(&mut reader, 64).await.unwrap();
        assert_eq!(line.as_deref(), Some("--unity_gpvudk"));
    }

    #[tokio::test]
    async fn read_head_none_on_immediate_eof() {
        let mut reader = BufReader::new(&b""[..]);
        assert!(read_head(&mut reader, 1024).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn read_head_truncated_is_connection_lost() {
        let mut reader = BufReader::new(&b"GET / HTTP/1.1\r\nHost"[..]);
        let err = read_head(&mut reader, 1024).await.unwrap_err();
        assert!(err.is_disconnect());
    }

    #[tokio::test]
    async fn read_head_enforces_limit() {
        let raw = format!("GET /{} HTTP/1.1\r\n\r\n", "a".repeat(100));
        let mut reader = BufReader::new(raw.as_bytes());
        let err = read_head(&mut reader, 32).await.unwrap_err();
        assert!(matches!(err, StreamError::Protocol(_)));
    }
}
