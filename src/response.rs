//! The canonical response written back into a request environment.

use bytes::Bytes;
use http::header::{HeaderName, HeaderValue};
use http::{HeaderMap, StatusCode};
use http_body_util::Full;

use crate::engine::EngineResponse;

/// The response to a request, as captured by the transport engine.
///
/// The status is kept as a raw integer: an engine reports `0` when no response was
/// received, and failed requests still get whatever the engine captured.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Response {
    status: u16,
    reason: String,
    headers: HeaderMap,
    body: Bytes,
}

impl Response {
    /// Create a response from its parts.
    pub fn new(status: u16, reason: impl Into<String>, headers: HeaderMap, body: Bytes) -> Self {
        Self {
            status,
            reason: reason.into(),
            headers,
            body,
        }
    }

    /// Build the response from what the engine reported, parsing its raw response head.
    pub fn from_engine(response: &EngineResponse) -> Self {
        let (reason, headers) = parse_headers(&response.headers);
        Self {
            status: response.status,
            reason,
            headers,
            body: response.body.clone(),
        }
    }

    /// The status code, or `0` when no response was received.
    pub fn status(&self) -> u16 {
        self.status
    }

    /// The reason phrase from the status line.
    pub fn reason(&self) -> &str {
        &self.reason
    }

    /// The response headers.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// The response body.
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Convert into an [`http::Response`], if the status is a valid HTTP status code.
    pub fn into_http(self) -> Option<http::Response<Full<Bytes>>> {
        let status = StatusCode::from_u16(self.status).ok()?;
        let mut response = http::Response::new(Full::new(self.body));
        *response.status_mut() = status;
        *response.headers_mut() = self.headers;
        Some(response)
    }
}

/// Parse a raw response head into a reason phrase and headers.
///
/// The head may hold several header blocks, e.g. an interim `100 Continue` or the
/// responses of followed redirects; only the last block that starts with an `HTTP/`
/// status line is used. Within it, every `Name: value` line is appended in order, so
/// repeated names keep all their values. Lines starting with whitespace continue the
/// previous value. Lines which are not valid headers are skipped.
///
/// Header values are kept as bytes: values which are not UTF-8 are preserved exactly.
pub fn parse_headers(raw: &[u8]) -> (String, HeaderMap) {
    let mut reason = String::new();
    let mut headers = HeaderMap::new();
    let mut current: Option<(HeaderName, Vec<u8>)> = None;

    for line in raw.split(|byte| *byte == b'\n') {
        let line = line.strip_suffix(b"\r").unwrap_or(line);

        if line.starts_with(b"HTTP/") {
            reason = status_line_reason(line);
            headers.clear();
            current = None;
            continue;
        }

        if line.starts_with(b" ") || line.starts_with(b"\t") {
            if let Some((_, value)) = current.as_mut() {
                value.push(b' ');
                value.extend_from_slice(trim(line));
            }
            continue;
        }

        flush(&mut headers, current.take());

        if line.is_empty() {
            continue;
        }

        let Some(colon) = line.iter().position(|byte| *byte == b':') else {
            tracing::trace!(line = %String::from_utf8_lossy(line), "skipping malformed header line");
            continue;
        };
        let (name, value) = (&line[..colon], &line[colon + 1..]);

        match HeaderName::from_bytes(trim(name)) {
            Ok(name) => current = Some((name, trim(value).to_vec())),
            Err(_) => {
                tracing::trace!(line = %String::from_utf8_lossy(line), "skipping invalid header name")
            }
        }
    }

    flush(&mut headers, current);
    (reason, headers)
}

fn flush(headers: &mut HeaderMap, header: Option<(HeaderName, Vec<u8>)>) {
    let Some((name, value)) = header else {
        return;
    };
    match HeaderValue::from_bytes(&value) {
        Ok(value) => {
            headers.append(name, value);
        }
        Err(_) => tracing::trace!(%name, "skipping invalid header value"),
    }
}

fn trim(bytes: &[u8]) -> &[u8] {
    let start = bytes
        .iter()
        .position(|byte| !byte.is_ascii_whitespace())
        .unwrap_or(bytes.len());
    let end = bytes
        .iter()
        .rposition(|byte| !byte.is_ascii_whitespace())
        .map_or(start, |end| end + 1);
    &bytes[start..end]
}

/// The reason phrase is display text only, so it is decoded leniently.
fn status_line_reason(line: &[u8]) -> String {
    let mut parts = line.splitn(3, |byte| *byte == b' ');
    let _version = parts.next();
    let _status = parts.next();
    String::from_utf8_lossy(trim(parts.next().unwrap_or_default())).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ReturnCode;

    #[test]
    fn parses_status_line_and_headers() {
        let (reason, headers) =
            parse_headers(b"HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nX-Empty:\r\n\r\n");
        assert_eq!(reason, "OK");
        assert_eq!(headers.get("content-type").unwrap(), "text/plain");
        assert_eq!(headers.get("x-empty").unwrap(), "");
    }

    #[test]
    fn keeps_duplicate_headers_in_order() {
        let (_, headers) = parse_headers(
            b"HTTP/1.1 200 OK\r\nSet-Cookie: a=1\r\nset-cookie: b=2\r\nVia: x\r\n\r\n",
        );
        let cookies: Vec<_> = headers.get_all("set-cookie").iter().collect();
        assert_eq!(cookies, vec!["a=1", "b=2"]);
        assert_eq!(headers.len(), 3);
    }

    #[test]
    fn uses_the_last_header_block() {
        let raw = b"HTTP/1.1 100 Continue\r\n\r\nHTTP/1.1 301 Moved Permanently\r\nLocation: /b\r\n\r\nHTTP/1.1 404 Not Found\r\nX-Final: yes\r\n\r\n";
        let (reason, headers) = parse_headers(raw);
        assert_eq!(reason, "Not Found");
        assert!(headers.get("location").is_none());
        assert_eq!(headers.get("x-final").unwrap(), "yes");
    }

    #[test]
    fn joins_folded_lines_and_skips_garbage() {
        let raw = b"HTTP/1.0 200 Fine Thanks\nX-Long: one\n  two\nnot a header\nbad name: x\n\n";
        let (reason, headers) = parse_headers(raw);
        assert_eq!(reason, "Fine Thanks");
        assert_eq!(headers.get("x-long").unwrap(), "one two");
        assert_eq!(headers.len(), 1);
    }

    #[test]
    fn keeps_latin1_values_byte_for_byte() {
        let raw = b"HTTP/1.1 200 OK\r\nContent-Disposition: attachment; filename=caf\xe9.txt\r\nX-Ok: plain\r\n\r\n";
        let (reason, headers) = parse_headers(raw);
        assert_eq!(reason, "OK");
        assert_eq!(
            headers.get("content-disposition").unwrap().as_bytes(),
            b"attachment; filename=caf\xe9.txt"
        );
        assert_eq!(headers.get("x-ok").unwrap(), "plain");
        assert_eq!(headers.len(), 2);
    }

    #[test]
    fn empty_blob() {
        let (reason, headers) = parse_headers(b"");
        assert!(reason.is_empty());
        assert!(headers.is_empty());
    }

    #[test]
    fn from_engine_copies_status_and_body() {
        let engine = EngineResponse {
            status: 404,
            headers: "HTTP/1.1 404 Not Found\r\nContent-Length: 4\r\n\r\n".into(),
            body: Bytes::from_static(b"nope"),
            return_code: ReturnCode::Ok,
            return_message: "No error".into(),
            mock: false,
        };
        let response = Response::from_engine(&engine);
        assert_eq!(response.status(), 404);
        assert_eq!(response.reason(), "Not Found");
        assert_eq!(response.body(), "nope");
        assert_eq!(response.headers().get("content-length").unwrap(), "4");

        let http = response.into_http().unwrap();
        assert_eq!(http.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn zero_status_has_no_http_form() {
        assert!(Response::default().into_http().is_none());
    }
}
