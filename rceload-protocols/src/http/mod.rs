//! HTTP/1.1 request framing and response parsing
//!
//! Supports GET and POST against a fixed URL. Requests carry the wire
//! message as an `application/octet-stream` body; responses are parsed with
//! httparse and support `Content-Length`, chunked transfer encoding and
//! read-until-close bodies.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    /// Health-check variant, no body
    Get,
    /// Event delivery, wire message as body
    Post,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
        }
    }
}

impl std::str::FromStr for HttpMethod {
    type Err = HttpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "get" => Ok(HttpMethod::Get),
            "post" => Ok(HttpMethod::Post),
            _ => Err(HttpError::Url(format!("Unsupported HTTP method: {s}"))),
        }
    }
}

/// HTTP layer errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HttpError {
    /// URL could not be parsed
    Url(String),
    /// Malformed response
    Parse(String),
    /// Response received with a non-2xx status
    Status(u16),
}

impl fmt::Display for HttpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HttpError::Url(msg) => write!(f, "Invalid URL: {msg}"),
            HttpError::Parse(msg) => write!(f, "HTTP parse error: {msg}"),
            HttpError::Status(code) => write!(f, "Unexpected HTTP status {code}"),
        }
    }
}

impl std::error::Error for HttpError {}

/// A fixed `http://` endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpTarget {
    pub host: String,
    pub port: u16,
    /// Path including the query string, always starting with '/'
    pub path_and_query: String,
}

impl HttpTarget {
    /// Parse `http://host[:port][/path][?query]`
    pub fn parse(url: &str) -> Result<Self, HttpError> {
        let rest = url
            .strip_prefix("http://")
            .ok_or_else(|| HttpError::Url(format!("only http:// URLs are supported: {url}")))?;

        let (authority, path_and_query) = match rest.find(|c: char| c == '/' || c == '?') {
            Some(idx) if rest.as_bytes()[idx] == b'/' => (&rest[..idx], rest[idx..].to_string()),
            Some(idx) => (&rest[..idx], format!("/{}", &rest[idx..])),
            None => (rest, "/".to_string()),
        };

        if authority.is_empty() {
            return Err(HttpError::Url(format!("missing host: {url}")));
        }

        let (host, port) = match authority.rsplit_once(':') {
            Some((host, port)) => {
                let port = port
                    .parse::<u16>()
                    .map_err(|_| HttpError::Url(format!("invalid port '{port}' in {url}")))?;
                (host.to_string(), port)
            }
            None => (authority.to_string(), 80),
        };

        Ok(Self { host, port, path_and_query })
    }

    /// `host:port` string suitable for socket address resolution
    pub fn authority(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Value of a query parameter, if present
    pub fn query_param(&self, name: &str) -> Option<&str> {
        query_param(&self.path_and_query, name)
    }
}

/// Value of the query parameter `name` in a request target like `/path?a=1&b=2`
///
/// A key without `=` has an empty value. Values are returned undecoded.
pub fn query_param<'a>(path_and_query: &'a str, name: &str) -> Option<&'a str> {
    let (_, query) = path_and_query.split_once('?')?;
    query.split('&').find_map(|pair| {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        (key == name).then_some(value)
    })
}

impl fmt::Display for HttpTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "http://{}:{}{}", self.host, self.port, self.path_and_query)
    }
}

/// Build an HTTP/1.1 request with an optional body
pub fn build_request(method: HttpMethod, target: &HttpTarget, body: Option<&[u8]>) -> Vec<u8> {
    let mut request = format!(
        "{} {} HTTP/1.1\r\n\
         Host: {}\r\n\
         Connection: keep-alive\r\n",
        method.as_str(),
        target.path_and_query,
        target.host
    );

    if let Some(body_data) = body {
        request.push_str(&format!("Content-Length: {}\r\n", body_data.len()));
        request.push_str("Content-Type: application/octet-stream\r\n");
        request.push_str("\r\n");

        let mut bytes = request.into_bytes();
        bytes.extend_from_slice(body_data);
        bytes
    } else {
        request.push_str("\r\n");
        request.into_bytes()
    }
}

/// A complete parsed response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
    /// False when the server asked to close the connection
    pub keep_alive: bool,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// `Err(HttpError::Status)` unless the status is 2xx
    pub fn error_for_status(&self) -> Result<(), HttpError> {
        if self.is_success() {
            Ok(())
        } else {
            Err(HttpError::Status(self.status))
        }
    }

    /// Whether the body contains `marker` as a literal substring
    pub fn contains_marker(&self, marker: &str) -> bool {
        let needle = marker.as_bytes();
        if needle.is_empty() {
            return true;
        }
        self.body.windows(needle.len()).any(|w| w == needle)
    }
}

fn find_header<'a>(headers: &[httparse::Header<'a>], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|h| h.name.eq_ignore_ascii_case(name))
        .and_then(|h| std::str::from_utf8(h.value).ok())
        .map(str::trim)
}

enum BodyFraming {
    Length(usize),
    Chunked,
    UntilClose,
}

/// Parse a response from the start of `data`
///
/// `eof` tells the parser the peer has closed the connection, which
/// completes read-until-close bodies. Returns `Ok(None)` when more data is
/// needed, otherwise the response and the number of bytes consumed.
pub fn parse_response(data: &[u8], eof: bool) -> Result<Option<(HttpResponse, usize)>, HttpError> {
    if data.is_empty() {
        return Ok(None);
    }

    let mut headers = [httparse::EMPTY_HEADER; 64];
    let mut response = httparse::Response::new(&mut headers);

    let headers_len = match response.parse(data) {
        Ok(httparse::Status::Complete(len)) => len,
        Ok(httparse::Status::Partial) => {
            if eof {
                return Err(HttpError::Parse("connection closed mid-headers".to_string()));
            }
            return Ok(None);
        }
        Err(e) => return Err(HttpError::Parse(e.to_string())),
    };

    let status = response.code.unwrap_or(0);
    if !(100..600).contains(&status) {
        return Err(HttpError::Parse(format!("Invalid HTTP status code: {status}")));
    }

    let header = |name: &str| find_header(&*response.headers, name);

    let keep_alive = !matches!(header("connection"), Some(v) if v.eq_ignore_ascii_case("close"))
        && response.version == Some(1);

    let framing = if header("transfer-encoding")
        .is_some_and(|v| v.to_ascii_lowercase().contains("chunked"))
    {
        BodyFraming::Chunked
    } else if let Some(len) = header("content-length") {
        let len = len
            .parse::<usize>()
            .map_err(|_| HttpError::Parse(format!("bad Content-Length: {len}")))?;
        BodyFraming::Length(len)
    } else if status == 204 || status == 304 || (100..200).contains(&status) {
        BodyFraming::Length(0)
    } else {
        BodyFraming::UntilClose
    };

    let body_data = &data[headers_len..];
    let (body, body_consumed) = match framing {
        BodyFraming::Length(len) => {
            if body_data.len() < len {
                return Ok(None);
            }
            (body_data[..len].to_vec(), len)
        }
        BodyFraming::Chunked => match decode_chunked(body_data)? {
            Some(decoded) => decoded,
            None => return Ok(None),
        },
        BodyFraming::UntilClose => {
            if !eof {
                return Ok(None);
            }
            (body_data.to_vec(), body_data.len())
        }
    };

    let keep_alive = keep_alive && !matches!(framing, BodyFraming::UntilClose);
    Ok(Some((HttpResponse { status, body, keep_alive }, headers_len + body_consumed)))
}

/// Decode a chunked body, returning the body and bytes consumed
fn decode_chunked(data: &[u8]) -> Result<Option<(Vec<u8>, usize)>, HttpError> {
    let mut body = Vec::new();
    let mut pos = 0;

    loop {
        let line_end = match find_crlf(&data[pos..]) {
            Some(idx) => pos + idx,
            None => return Ok(None),
        };
        let size_line = std::str::from_utf8(&data[pos..line_end])
            .map_err(|_| HttpError::Parse("non-UTF8 chunk size".to_string()))?;
        let size_str = size_line.split(';').next().unwrap_or("").trim();
        let size = usize::from_str_radix(size_str, 16)
            .map_err(|_| HttpError::Parse(format!("bad chunk size: {size_str}")))?;
        pos = line_end + 2;

        if size == 0 {
            // Skip trailers up to the terminating empty line
            loop {
                let end = match find_crlf(&data[pos..]) {
                    Some(idx) => pos + idx,
                    None => return Ok(None),
                };
                let empty = end == pos;
                pos = end + 2;
                if empty {
                    return Ok(Some((body, pos)));
                }
            }
        }

        let end = pos
            .checked_add(size)
            .and_then(|n| n.checked_add(2))
            .ok_or_else(|| HttpError::Parse(format!("chunk size too large: {size_str}")))?;
        if data.len() < end {
            return Ok(None);
        }
        body.extend_from_slice(&data[pos..pos + size]);
        pos = end;
    }
}

fn find_crlf(data: &[u8]) -> Option<usize> {
    data.windows(2).position(|w| w == b"\r\n")
}
