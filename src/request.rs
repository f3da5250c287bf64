//! What the middleware is allowed to know about an incoming request.
//!
//! Two shapes, picked by what the transport can tell us:
//!
//! - [`BasicRequest`]: just the peer. Anything that accepts connections has
//!   this much.
//! - [`HttpRequest`]: the peer plus the HTTP request line and headers.
//!
//! [`Request`] is the tagged union of the two and [`Request::as_http`] is the
//! capability test. Middleware that needs HTTP details asks for them and
//! degrades gracefully when they are not there.

use std::fmt;
use std::net::SocketAddr;

use http::header::{HOST, USER_AGENT};
use http::{HeaderMap, HeaderName, HeaderValue, Method, Uri};

const X_FORWARDED_FOR: &str = "x-forwarded-for";

// ── Request ───────────────────────────────────────────────────────────────────

/// An inbound request as seen by middleware.
#[derive(Clone, Debug)]
pub enum Request {
    Basic(BasicRequest),
    Http(HttpRequest),
}

impl Request {
    /// Peer host. Always available, though it may be unknown.
    pub fn remote_host(&self) -> Option<&str> {
        match self {
            Self::Basic(req) => req.remote_host(),
            Self::Http(req) => req.remote_host(),
        }
    }

    /// The HTTP capability set, if the transport provided one.
    pub fn as_http(&self) -> Option<&HttpRequest> {
        match self {
            Self::Basic(_) => None,
            Self::Http(req) => Some(req),
        }
    }
}

impl From<BasicRequest> for Request {
    fn from(req: BasicRequest) -> Self { Self::Basic(req) }
}

impl From<HttpRequest> for Request {
    fn from(req: HttpRequest) -> Self { Self::Http(req) }
}

// ── BasicRequest ──────────────────────────────────────────────────────────────

/// A request about which only the peer is known.
#[derive(Clone, Debug, Default)]
pub struct BasicRequest {
    remote_host: Option<String>,
}

impl BasicRequest {
    pub fn new(remote_host: Option<String>) -> Self {
        Self { remote_host }
    }

    pub fn remote_host(&self) -> Option<&str> { self.remote_host.as_deref() }
}

// ── HttpRequest ───────────────────────────────────────────────────────────────

/// A request with its HTTP request line and the headers middleware reads.
///
/// Only `User-Agent` and `X-Forwarded-For` are kept; the rest of the header
/// map stays with the request that goes on to the handler.
///
/// Build one by hand with [`HttpRequest::builder`], or from a live hyper
/// request with [`HttpRequest::from_parts`].
#[derive(Clone, Debug)]
pub struct HttpRequest {
    remote_host: Option<String>,
    method: Method,
    uri: Uri,
    url: Option<RequestUrl>,
    user_agent: Option<HeaderValue>,
    x_forwarded_for: Option<HeaderValue>,
}

impl HttpRequest {
    /// Starts a hand-built request. The URL is derived from `uri` when it is
    /// absolute; otherwise set it with [`HttpRequestBuilder::url`] or a
    /// `Host` header.
    pub fn builder(method: Method, uri: Uri) -> HttpRequestBuilder {
        HttpRequestBuilder {
            remote_host: None,
            method,
            uri,
            url: None,
            headers: HeaderMap::new(),
        }
    }

    /// Captures what middleware needs from a live request.
    ///
    /// The remote host is the peer IP: no reverse DNS lookup is done on the
    /// request path.
    pub fn from_parts(parts: &http::request::Parts, remote_addr: SocketAddr) -> Self {
        Self {
            remote_host: Some(remote_addr.ip().to_string()),
            method: parts.method.clone(),
            uri: parts.uri.clone(),
            url: RequestUrl::reconstruct(&parts.uri, &parts.headers),
            user_agent: parts.headers.get(USER_AGENT).cloned(),
            x_forwarded_for: parts.headers.get(X_FORWARDED_FOR).cloned(),
        }
    }

    pub fn remote_host(&self) -> Option<&str> { self.remote_host.as_deref() }
    pub fn method(&self) -> &str { self.method.as_str() }

    /// Path part of the request target, without the query string.
    pub fn request_uri(&self) -> &str { self.uri.path() }

    /// Raw query string, without the leading `?`.
    pub fn query_string(&self) -> Option<&str> { self.uri.query() }

    /// The URL the client used, if it can be reconstructed.
    pub fn request_url(&self) -> Option<&RequestUrl> { self.url.as_ref() }

    /// Case-insensitive lookup of a captured header (`User-Agent` or
    /// `X-Forwarded-For`); any other name yields `None`. Values that are not
    /// visible ASCII are reported as missing.
    pub fn header(&self, name: &str) -> Option<&str> {
        let value = if name.eq_ignore_ascii_case(USER_AGENT.as_str()) {
            self.user_agent.as_ref()
        } else if name.eq_ignore_ascii_case(X_FORWARDED_FOR) {
            self.x_forwarded_for.as_ref()
        } else {
            None
        };
        value.and_then(|v| v.to_str().ok())
    }

    pub fn user_agent(&self) -> Option<&str> {
        self.user_agent.as_ref().and_then(|v| v.to_str().ok())
    }

    pub fn x_forwarded_for(&self) -> Option<&str> {
        self.x_forwarded_for.as_ref().and_then(|v| v.to_str().ok())
    }
}

/// Fluent builder for [`HttpRequest`]. Obtain via [`HttpRequest::builder`].
pub struct HttpRequestBuilder {
    remote_host: Option<String>,
    method: Method,
    uri: Uri,
    url: Option<RequestUrl>,
    headers: HeaderMap,
}

impl HttpRequestBuilder {
    pub fn remote_host(mut self, host: impl Into<String>) -> Self {
        self.remote_host = Some(host.into());
        self
    }

    /// Appends a header. Invalid names or values are skipped, just as a
    /// server would never have delivered them.
    pub fn header(mut self, name: &str, value: &str) -> Self {
        if let (Ok(name), Ok(value)) =
            (HeaderName::from_bytes(name.as_bytes()), HeaderValue::from_str(value))
        {
            self.headers.append(name, value);
        }
        self
    }

    pub fn url(mut self, url: RequestUrl) -> Self {
        self.url = Some(url);
        self
    }

    pub fn build(self) -> HttpRequest {
        let url = self.url.or_else(|| RequestUrl::reconstruct(&self.uri, &self.headers));
        HttpRequest {
            remote_host: self.remote_host,
            method: self.method,
            uri: self.uri,
            url,
            user_agent: self.headers.get(USER_AGENT).cloned(),
            x_forwarded_for: self.headers.get(X_FORWARDED_FOR).cloned(),
        }
    }
}

// ── RequestUrl ────────────────────────────────────────────────────────────────

/// The URL a client used to reach the server: scheme, host, port and path.
///
/// Never includes the query string. Renders via [`Display`](fmt::Display),
/// dropping the port when it is the scheme's default:
///
/// ```rust
/// use reqmdc::RequestUrl;
///
/// let url = RequestUrl::new("http", "localhost", Some(80), "/foobar");
/// assert_eq!(url.to_string(), "http://localhost/foobar");
///
/// let url = RequestUrl::new("https", "example.com", Some(8443), "/a");
/// assert_eq!(url.to_string(), "https://example.com:8443/a");
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestUrl {
    scheme: String,
    host: String,
    port: Option<u16>,
    path: String,
}

impl RequestUrl {
    pub fn new(
        scheme: impl Into<String>,
        host: impl Into<String>,
        port: Option<u16>,
        path: impl Into<String>,
    ) -> Self {
        Self { scheme: scheme.into(), host: host.into(), port, path: path.into() }
    }

    pub fn scheme(&self) -> &str { &self.scheme }
    pub fn host(&self) -> &str { &self.host }
    pub fn port(&self) -> Option<u16> { self.port }
    pub fn path(&self) -> &str { &self.path }

    /// Rebuilds the URL from the request target and headers.
    ///
    /// Host and port come from the URI authority (absolute-form targets and
    /// HTTP/2 `:authority`), falling back to the `Host` header. Without
    /// either there is nothing to rebuild and `None` is returned. So is an
    /// authority-form target (`CONNECT host:port`), which names a tunnel
    /// endpoint rather than a resource.
    pub fn reconstruct(uri: &Uri, headers: &HeaderMap) -> Option<Self> {
        let scheme = uri.scheme_str().unwrap_or("http");
        let path = uri.path();
        if path.is_empty() {
            return None;
        }

        if let Some(host) = uri.host().filter(|h| !h.is_empty()) {
            return Some(Self::new(scheme, host, uri.port_u16(), path));
        }

        let host_header = headers.get(HOST)?.to_str().ok()?;
        // Parse through `Authority` so `[::1]:8080` splits correctly.
        let authority: http::uri::Authority = host_header.parse().ok()?;
        if authority.host().is_empty() {
            return None;
        }
        Some(Self::new(scheme, authority.host(), authority.port_u16(), path))
    }

    fn default_port(&self) -> Option<u16> {
        match self.scheme.as_str() {
            "http" => Some(80),
            "https" => Some(443),
            _ => None,
        }
    }
}

impl fmt::Display for RequestUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.scheme, self.host)?;
        if let Some(port) = self.port.filter(|p| Some(*p) != self.default_port()) {
            write!(f, ":{port}")?;
        }
        f.write_str(&self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parts(uri: &str, host: Option<&str>) -> http::request::Parts {
        let mut builder = http::Request::builder().method("POST").uri(uri);
        if let Some(host) = host {
            builder = builder.header("host", host);
        }
        builder.body(()).unwrap().into_parts().0
    }

    #[test]
    fn basic_request_has_no_http_capability() {
        let req = Request::from(BasicRequest::new(Some("192.0.2.0".into())));
        assert_eq!(req.remote_host(), Some("192.0.2.0"));
        assert!(req.as_http().is_none());
    }

    #[test]
    fn from_parts_reads_request_line_and_peer() {
        let parts = parts("/items?page=2", Some("api.example.com:8080"));
        let req = HttpRequest::from_parts(&parts, "203.0.113.7:54321".parse().unwrap());

        assert_eq!(req.remote_host(), Some("203.0.113.7"));
        assert_eq!(req.method(), "POST");
        assert_eq!(req.request_uri(), "/items");
        assert_eq!(req.query_string(), Some("page=2"));
        assert_eq!(
            req.request_url().map(ToString::to_string).as_deref(),
            Some("http://api.example.com:8080/items"),
        );
    }

    #[test]
    fn url_prefers_absolute_target_over_host_header() {
        let parts = parts("https://origin.example/x?y=1", Some("ignored.example"));
        let url = RequestUrl::reconstruct(&parts.uri, &parts.headers).unwrap();
        assert_eq!(url.to_string(), "https://origin.example/x");
    }

    #[test]
    fn url_is_absent_without_any_host() {
        let parts = parts("/no-host", None);
        assert_eq!(RequestUrl::reconstruct(&parts.uri, &parts.headers), None);
    }

    #[test]
    fn ipv6_host_header_keeps_brackets() {
        let parts = parts("/", Some("[::1]:3000"));
        let url = RequestUrl::reconstruct(&parts.uri, &parts.headers).unwrap();
        assert_eq!(url.to_string(), "http://[::1]:3000/");
    }

    #[test]
    fn header_lookup_is_case_insensitive() {
        let req = HttpRequest::builder(Method::GET, Uri::from_static("/"))
            .header("User-Agent", "sample-ua")
            .header("X-Forwarded-For", "198.51.100.0")
            .build();
        assert_eq!(req.header("user-agent"), Some("sample-ua"));
        assert_eq!(req.user_agent(), Some("sample-ua"));
        assert_eq!(req.x_forwarded_for(), Some("198.51.100.0"));
        assert_eq!(req.header("referer"), None);
    }

    #[test]
    fn non_ascii_header_value_reads_as_missing() {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_bytes(b"caf\xe9").unwrap());
        let parts = {
            let mut parts = parts("/", None);
            parts.headers = headers;
            parts
        };
        let req = HttpRequest::from_parts(&parts, "192.0.2.1:1".parse().unwrap());
        assert_eq!(req.user_agent(), None);
        assert_eq!(req.header("User-Agent"), None);
    }

    #[test]
    fn authority_form_target_has_no_url() {
        let parts = http::Request::builder()
            .method(Method::CONNECT)
            .uri("example.com:443")
            .body(())
            .unwrap()
            .into_parts()
            .0;
        assert_eq!(parts.uri.path(), "");
        assert_eq!(RequestUrl::reconstruct(&parts.uri, &parts.headers), None);

        let req = HttpRequest::from_parts(&parts, "192.0.2.1:1".parse().unwrap());
        assert!(req.request_url().is_none());
        assert_eq!(req.method(), "CONNECT");
    }

    #[test]
    fn from_parts_keeps_only_the_headers_middleware_reads() {
        let mut parts = parts("/", Some("localhost"));
        parts.headers.insert(USER_AGENT, HeaderValue::from_static("sample-ua"));
        parts.headers.insert("x-forwarded-for", HeaderValue::from_static("198.51.100.0"));
        parts.headers.insert("cookie", HeaderValue::from_static("session=secret"));

        let req = HttpRequest::from_parts(&parts, "192.0.2.1:1".parse().unwrap());

        assert_eq!(req.header("USER-AGENT"), Some("sample-ua"));
        assert_eq!(req.header("X-Forwarded-For"), Some("198.51.100.0"));
        assert_eq!(req.header("cookie"), None);
        assert_eq!(req.header("host"), None);
        assert!(!format!("{req:?}").contains("secret"));
    }
}
