//! Request heads and connections handed to protocol handlers
//!
//! Only the request line and headers are parsed; bodies stay on the
//! connection for the handler to read.

use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::time::Duration;

use http::header::{HeaderName, HeaderValue, CONTENT_LENGTH, HOST};
use http::{HeaderMap, Method, StatusCode, Version};

use crate::error::RequestError;

const READ_CHUNK: usize = 1024;

/// Parsed request line and headers
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    /// Request target exactly as sent
    pub target: String,
    pub version: Version,
    pub headers: HeaderMap,
}

impl HttpRequest {
    /// Value of a header as text, if present and valid UTF-8
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }

    pub fn host(&self) -> Option<&str> {
        self.headers.get(HOST).and_then(|value| value.to_str().ok())
    }

    pub fn content_length(&self) -> Option<usize> {
        self.headers
            .get(CONTENT_LENGTH)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse().ok())
    }
}

/// Parse a complete request head (request line plus header lines)
pub fn parse_request_head(head: &[u8]) -> Result<HttpRequest, RequestError> {
    let text = std::str::from_utf8(head)
        .map_err(|_| RequestError::Malformed("request head is not UTF-8".to_string()))?;
    let mut lines = text
        .split('\n')
        .map(|line| line.strip_suffix('\r').unwrap_or(line));

    let request_line = lines
        .next()
        .filter(|line| !line.is_empty())
        .ok_or_else(|| RequestError::Malformed("empty request line".to_string()))?;

    let mut parts = request_line.split(' ');
    let (method, target, version) = match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(method), Some(target), Some(version), None) if !target.is_empty() => {
            (method, target, version)
        }
        _ => {
            return Err(RequestError::Malformed(format!(
                "bad request line {:?}",
                request_line
            )))
        }
    };

    let method = Method::from_bytes(method.as_bytes())
        .map_err(|_| RequestError::Malformed(format!("bad method {:?}", method)))?;
    let version = match version {
        "HTTP/1.1" => Version::HTTP_11,
        "HTTP/1.0" => Version::HTTP_10,
        other => {
            return Err(RequestError::Malformed(format!(
                "unsupported version {:?}",
                other
            )))
        }
    };

    let mut headers = HeaderMap::new();
    for line in lines {
        if line.is_empty() {
            break;
        }
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| RequestError::Malformed(format!("bad header line {:?}", line)))?;
        let name = HeaderName::from_bytes(name.trim().as_bytes())
            .map_err(|_| RequestError::Malformed(format!("bad header name {:?}", name)))?;
        let value = HeaderValue::from_str(value.trim())
            .map_err(|_| RequestError::Malformed(format!("bad value for header {}", name)))?;
        headers.append(name, value);
    }

    Ok(HttpRequest {
        method,
        target: target.to_string(),
        version,
        headers,
    })
}

/// Position just past the first blank line, CRLF or bare LF
fn head_end(buffer: &[u8]) -> Option<usize> {
    let crlf = buffer
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .map(|pos| pos + 4);
    let lf = buffer
        .windows(2)
        .position(|w| w == b"\n\n")
        .map(|pos| pos + 2);
    match (crlf, lf) {
        (Some(crlf), Some(lf)) => Some(crlf.min(lf)),
        (crlf, lf) => crlf.or(lf),
    }
}

/// Read and parse a request head from `stream`
///
/// Returns the request and any bytes read past the head.
pub fn read_request_head<R: Read>(
    stream: &mut R,
    max_header_bytes: usize,
) -> Result<(HttpRequest, Vec<u8>), RequestError> {
    let mut buffer = Vec::with_capacity(READ_CHUNK);
    let mut chunk = [0u8; READ_CHUNK];

    loop {
        if let Some(end) = head_end(&buffer) {
            if end > max_header_bytes {
                return Err(RequestError::HeaderTooLarge {
                    limit: max_header_bytes,
                });
            }
            let request = parse_request_head(&buffer[..end])?;
            let leftover = buffer.split_off(end);
            return Ok((request, leftover));
        }
        if buffer.len() > max_header_bytes {
            return Err(RequestError::HeaderTooLarge {
                limit: max_header_bytes,
            });
        }

        let read = match stream.read(&mut chunk) {
            Ok(read) => read,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(RequestError::Io(e)),
        };
        if read == 0 {
            if buffer.is_empty() {
                return Err(RequestError::Io(io::ErrorKind::UnexpectedEof.into()));
            }
            return Err(RequestError::Malformed("connection closed inside request head".to_string()));
        }
        buffer.extend_from_slice(&chunk[..read]);
    }
}

/// An accepted client connection
///
/// Reads first return any body bytes that arrived with the request head.
/// Dropping the connection closes it.
#[derive(Debug)]
pub struct Connection {
    stream: TcpStream,
    peer: SocketAddr,
    local: SocketAddr,
    pending: Vec<u8>,
    max_body_bytes: usize,
}

impl Connection {
    pub(crate) fn new(
        stream: TcpStream,
        peer: SocketAddr,
        pending: Vec<u8>,
        max_body_bytes: usize,
    ) -> io::Result<Self> {
        let local = stream.local_addr()?;
        Ok(Self {
            stream,
            peer,
            local,
            pending,
            max_body_bytes,
        })
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Local address the client connected to
    pub fn local_addr(&self) -> SocketAddr {
        self.local
    }

    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        self.stream.set_read_timeout(timeout)
    }

    /// Read the body announced by `Content-Length`; empty when absent
    ///
    /// A length above the configured body limit is refused with
    /// [`io::ErrorKind::InvalidData`] before anything is read.
    pub fn read_body(&mut self, request: &HttpRequest) -> io::Result<Vec<u8>> {
        let length = request.content_length().unwrap_or(0);
        if length > self.max_body_bytes {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "Content-Length {} exceeds the {} byte body limit",
                    length, self.max_body_bytes
                ),
            ));
        }

        let mut body = Vec::new();
        Read::by_ref(self).take(length as u64).read_to_end(&mut body)?;
        if body.len() < length {
            return Err(io::ErrorKind::UnexpectedEof.into());
        }
        Ok(body)
    }

    /// Write a complete response and flush it
    pub fn send_response(&mut self, status: StatusCode, content_type: &str, body: &[u8]) -> io::Result<()> {
        let head = format!(
            "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
            status.as_u16(),
            status.canonical_reason().unwrap_or(""),
            content_type,
            body.len()
        );
        self.stream.write_all(head.as_bytes())?;
        self.stream.write_all(body)?;
        self.stream.flush()
    }

    /// Write a body-less status response
    pub fn send_status(&mut self, status: StatusCode) -> io::Result<()> {
        write_status(&mut self.stream, status)
    }

    /// Point the client at the numeric address it connected to
    pub(crate) fn send_literal_redirect(&mut self) -> io::Result<()> {
        let reply = format!(
            "HTTP/1.1 307 Temporary Redirect\r\nLocation: http://{}\r\n\r\n",
            self.local
        );
        self.stream.write_all(reply.as_bytes())?;
        self.stream.flush()
    }
}

impl Read for Connection {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if !self.pending.is_empty() {
            let count = buf.len().min(self.pending.len());
            buf[..count].copy_from_slice(&self.pending[..count]);
            self.pending.drain(..count);
            return Ok(count);
        }
        self.stream.read(buf)
    }
}

impl Write for Connection {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stream.flush()
    }
}

pub(crate) fn write_status<W: Write>(out: &mut W, status: StatusCode) -> io::Result<()> {
    let reply = format!(
        "HTTP/1.1 {} {}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        status.as_u16(),
        status.canonical_reason().unwrap_or("")
    );
    out.write_all(reply.as_bytes())?;
    out.flush()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rstest::rstest;
    use std::io::Cursor;

    #[test]
    fn test_parse_notify_request() {
        let head = b"NOTIFY /event HTTP/1.1\r\nHOST: 192.168.1.10:1400\r\nNT: upnp:event\r\nSEQ: 0\r\n\r\n";
        let request = parse_request_head(head).unwrap();

        assert_eq!(request.method.as_str(), "NOTIFY");
        assert_eq!(request.target, "/event");
        assert_eq!(request.version, Version::HTTP_11);
        assert_eq!(request.host(), Some("192.168.1.10:1400"));
        assert_eq!(request.header("nt"), Some("upnp:event"));
    }

    #[test]
    fn test_parse_tolerates_bare_newlines() {
        let request = parse_request_head(b"GET / HTTP/1.0\nHost: 10.0.0.1\n\n").unwrap();
        assert_eq!(request.version, Version::HTTP_10);
        assert_eq!(request.host(), Some("10.0.0.1"));
    }

    #[rstest]
    #[case::empty(b"\r\n\r\n".as_slice())]
    #[case::missing_version(b"GET /\r\n\r\n".as_slice())]
    #[case::bad_version(b"GET / SPDY/3\r\n\r\n".as_slice())]
    #[case::bad_header(b"GET / HTTP/1.1\r\nno-colon-here\r\n\r\n".as_slice())]
    #[case::bad_method(b"G(T / HTTP/1.1\r\n\r\n".as_slice())]
    fn test_malformed_heads(#[case] head: &[u8]) {
        assert!(matches!(
            parse_request_head(head),
            Err(RequestError::Malformed(_))
        ));
    }

    #[test]
    fn test_read_head_keeps_body_bytes() {
        let raw = b"POST /ctl HTTP/1.1\r\nHost: 127.0.0.1\r\nContent-Length: 5\r\n\r\nhello".to_vec();
        let (request, leftover) = read_request_head(&mut Cursor::new(raw), 8192).unwrap();

        assert_eq!(request.content_length(), Some(5));
        assert_eq!(leftover, b"hello");
    }

    #[test]
    fn test_read_head_enforces_limit() {
        let mut raw = b"GET / HTTP/1.1\r\n".to_vec();
        raw.extend(std::iter::repeat(b'x').take(600));
        let result = read_request_head(&mut Cursor::new(raw), 256);
        assert!(matches!(
            result,
            Err(RequestError::HeaderTooLarge { limit: 256 })
        ));
    }

    #[test]
    fn test_read_head_detects_truncation() {
        let raw = b"GET / HTTP/1.1\r\nHost: x".to_vec();
        assert!(matches!(
            read_request_head(&mut Cursor::new(raw), 8192),
            Err(RequestError::Malformed(_))
        ));

        assert!(matches!(
            read_request_head(&mut Cursor::new(Vec::new()), 8192),
            Err(RequestError::Io(_))
        ));
    }

    #[test]
    fn test_bare_lf_head_ends_at_first_blank_line() {
        let raw = b"POST /ctl HTTP/1.1\nHost: 10.0.0.1\nContent-Length: 6\n\nab\r\n\r\n".to_vec();
        let (request, leftover) = read_request_head(&mut Cursor::new(raw), 8192).unwrap();

        assert_eq!(request.headers.len(), 2);
        assert_eq!(leftover, b"ab\r\n\r\n");
    }

    fn connected_pair(max_body_bytes: usize, pending: &[u8]) -> (Connection, TcpStream) {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (accepted, peer) = listener.accept().unwrap();
        accepted
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        let connection = Connection::new(accepted, peer, pending.to_vec(), max_body_bytes).unwrap();
        (connection, client)
    }

    #[test]
    fn test_read_body_joins_pending_and_stream_bytes() {
        let request = parse_request_head(b"POST / HTTP/1.1\r\nContent-Length: 10\r\n\r\n").unwrap();
        let (mut connection, mut client) = connected_pair(64, b"hello");
        client.write_all(b"world").unwrap();

        assert_eq!(connection.read_body(&request).unwrap(), b"helloworld");
    }

    #[rstest]
    #[case::over_limit("17")]
    #[case::huge("900000000000000")]
    fn test_read_body_refuses_oversized_length(#[case] length: &str) {
        let head = format!("POST / HTTP/1.1\r\nContent-Length: {}\r\n\r\n", length);
        let request = parse_request_head(head.as_bytes()).unwrap();
        let (mut connection, _client) = connected_pair(16, b"");

        let error = connection.read_body(&request).unwrap_err();
        assert_eq!(error.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_read_body_reports_short_body() {
        let request = parse_request_head(b"POST / HTTP/1.1\r\nContent-Length: 8\r\n\r\n").unwrap();
        let (mut connection, client) = connected_pair(64, b"abc");
        drop(client);

        let error = connection.read_body(&request).unwrap_err();
        assert_eq!(error.kind(), io::ErrorKind::UnexpectedEof);
    }

    proptest! {
        #[test]
        fn prop_head_parsing_never_panics(bytes in prop::collection::vec(any::<u8>(), 0..512)) {
            let _ = parse_request_head(&bytes);
            let _ = read_request_head(&mut Cursor::new(bytes), 256);
        }
    }

    #[test]
    fn test_status_line_format() {
        let mut out = Vec::new();
        write_status(&mut out, StatusCode::NOT_FOUND).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
        );
    }
}
