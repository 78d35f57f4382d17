//! Raw request framing estimate.
//!
//! By the time a request reaches the middleware stack the head has already
//! been parsed off the socket, so its wire size is rebuilt from the parsed
//! parts:
//!
//! ```text
//! <METHOD> <TARGET> <PROTOCOL>\r\n
//! <name>: <value>\r\n        (once per header, wire order)
//! \r\n
//! ```
//!
//! Chunked transfer-encoding overhead and content codings are not part of
//! the estimate. HTTP/2 requests are measured as if they had been sent in
//! HTTP/1 text form.

use axum::http::{request::Parts, Version};

const CRLF: u64 = 2;
const HEADER_SEPARATOR: u64 = 2; // ": "

/// Byte length of a request head rebuilt from its parts.
pub fn estimate_request_head<'a, I>(method: &str, target: &str, protocol: &str, headers: I) -> u64
where
    I: IntoIterator<Item = (&'a [u8], &'a [u8])>,
{
    let request_line = method.len() as u64 + 1 + target.len() as u64 + 1 + protocol.len() as u64 + CRLF;

    let header_lines: u64 = headers
        .into_iter()
        .map(|(name, value)| name.len() as u64 + HEADER_SEPARATOR + value.len() as u64 + CRLF)
        .sum();

    request_line + header_lines + CRLF
}

/// Estimate for a parsed `http` request head.
pub fn estimate_parts(parts: &Parts) -> u64 {
    let target = parts.uri.to_string();
    estimate_request_head(
        parts.method.as_str(),
        &target,
        protocol_name(parts.version),
        parts
            .headers
            .iter()
            .map(|(name, value)| (name.as_str().as_bytes(), value.as_bytes())),
    )
}

/// Protocol token as it appears on the request line.
pub fn protocol_name(version: Version) -> &'static str {
    match version {
        Version::HTTP_09 => "HTTP/0.9",
        Version::HTTP_10 => "HTTP/1.0",
        Version::HTTP_2 => "HTTP/2.0",
        Version::HTTP_3 => "HTTP/3.0",
        _ => "HTTP/1.1",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    #[test]
    fn request_line_only() {
        let len = estimate_request_head("GET", "/foo", "HTTP/1.1", std::iter::empty());
        assert_eq!(len, "GET /foo HTTP/1.1\r\n\r\n".len() as u64);
    }

    #[test]
    fn headers_in_wire_form() {
        let headers: [(&[u8], &[u8]); 2] = [(b"Host", b"127.0.0.1:12345"), (b"Accept", b"*/*")];
        let len = estimate_request_head("GET", "/foo", "HTTP/1.1", headers);

        let wire = "GET /foo HTTP/1.1\r\nHost: 127.0.0.1:12345\r\nAccept: */*\r\n\r\n";
        assert_eq!(len, wire.len() as u64);
    }

    #[test]
    fn parts_match_wire_text() {
        let (parts, _) = Request::builder()
            .method("POST")
            .uri("/upload?name=a%20b")
            .version(Version::HTTP_10)
            .header("Host", "example.com")
            .header("Content-Length", "5")
            .header("X-Tag", "one")
            .header("X-Tag", "two")
            .body(())
            .unwrap()
            .into_parts();

        let wire = "POST /upload?name=a%20b HTTP/1.0\r\n\
                    host: example.com\r\n\
                    content-length: 5\r\n\
                    x-tag: one\r\n\
                    x-tag: two\r\n\
                    \r\n";
        assert_eq!(estimate_parts(&parts), wire.len() as u64);
    }

    #[test]
    fn empty_header_value() {
        let headers: [(&[u8], &[u8]); 1] = [(b"X-Empty", b"")];
        let len = estimate_request_head("GET", "/", "HTTP/1.1", headers);
        assert_eq!(len, "GET / HTTP/1.1\r\nX-Empty: \r\n\r\n".len() as u64);
    }

    #[test]
    fn protocol_names() {
        assert_eq!(protocol_name(Version::HTTP_11), "HTTP/1.1");
        assert_eq!(protocol_name(Version::HTTP_10), "HTTP/1.0");
        assert_eq!(protocol_name(Version::HTTP_2), "HTTP/2.0");
    }
}
