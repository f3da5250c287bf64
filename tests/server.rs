//! End-to-end: real TCP connections through the server, filter and handler.

use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use reqmdc::{IncomingRequest, MdcInsertingFilter, Response, Server, mdc};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Replies with the logging context as the handler sees it.
async fn echo_mdc(req: IncomingRequest) -> Response {
    if req.uri().path() == "/panic" {
        panic!("handler blew up");
    }
    tokio::task::yield_now().await;
    tracing::info!("echoing logging context");
    Response::text(mdc::snapshot().to_string())
}

struct TestServer {
    addr: SocketAddr,
    stop: oneshot::Sender<()>,
    handle: JoinHandle<Result<(), reqmdc::Error>>,
}

impl TestServer {
    fn start(filter: MdcInsertingFilter) -> Self {
        let _ = tracing_subscriber::fmt()
            .with_test_writer()
            .with_max_level(tracing::Level::DEBUG)
            .try_init();

        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let (stop, stopped) = oneshot::channel::<()>();

        let handle = tokio::spawn(
            Server::from_listener(listener)
                .filter(filter)
                .serve_with_shutdown(echo_mdc, async move {
                    let _ = stopped.await;
                }),
        );

        Self { addr, stop, handle }
    }

    async fn shutdown(self) {
        self.stop.send(()).unwrap();
        self.handle.await.unwrap().unwrap();
    }
}

/// Sends one HTTP/1.1 request and returns the response body, or `None` if the
/// connection was dropped without a response.
async fn get(addr: SocketAddr, target: &str, extra_headers: &[(&str, &str)]) -> Option<String> {
    let mut stream = TcpStream::connect(addr).await.unwrap();

    let mut head = format!("GET {target} HTTP/1.1\r\nhost: localhost\r\nconnection: close\r\n");
    for (name, value) in extra_headers {
        head.push_str(&format!("{name}: {value}\r\n"));
    }
    head.push_str("\r\n");
    stream.write_all(head.as_bytes()).await.unwrap();

    let mut raw = Vec::new();
    if stream.read_to_end(&mut raw).await.is_err() || raw.is_empty() {
        return None;
    }
    let raw = String::from_utf8(raw).unwrap();
    let (status_and_headers, body) = raw.split_once("\r\n\r\n")?;
    assert!(status_and_headers.starts_with("HTTP/1.1 200"), "{status_and_headers}");
    Some(body.to_owned())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn handler_sees_all_request_attributes() {
    let server = TestServer::start(MdcInsertingFilter::new());

    let body = get(
        server.addr,
        "/foobar?baz=qux",
        &[("User-Agent", "sample-ua"), ("X-Forwarded-For", "198.51.100.0")],
    )
    .await
    .unwrap();

    assert_eq!(
        body,
        "req_remoteHost=127.0.0.1 \
         req_userAgent=sample-ua \
         req_requestURI=/foobar \
         req_queryString=\"baz=qux\" \
         req_requestURL=http://localhost/foobar \
         req_method=GET \
         req_xForwardedFor=198.51.100.0",
    );

    server.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn attributes_do_not_leak_between_requests() {
    let server = TestServer::start(MdcInsertingFilter::new());

    let first = get(server.addr, "/a?x=1", &[("User-Agent", "first-ua")]).await.unwrap();
    assert!(first.contains("req_userAgent=first-ua"));

    for _ in 0..8 {
        let next = get(server.addr, "/b", &[]).await.unwrap();
        assert!(!next.contains("userAgent"), "{next}");
        assert!(!next.contains("queryString"), "{next}");
        assert!(next.contains("req_requestURI=/b"), "{next}");
    }

    server.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn server_survives_a_panicking_handler() {
    let server = TestServer::start(MdcInsertingFilter::new());

    assert_eq!(get(server.addr, "/panic?secret=1", &[("User-Agent", "crasher")]).await, None);

    let after = get(server.addr, "/ok", &[]).await.unwrap();
    assert!(!after.contains("crasher"), "{after}");
    assert!(!after.contains("secret"), "{after}");
    assert!(after.contains("req_requestURI=/ok"), "{after}");

    server.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn custom_prefix_is_used_for_every_key() {
    let server = TestServer::start(MdcInsertingFilter::with_prefix("http."));

    let body = get(server.addr, "/p", &[]).await.unwrap();
    assert!(body.contains("http.method=GET"), "{body}");
    assert!(!body.contains("req_"), "{body}");

    server.shutdown().await;
}

/// Collects formatted log output in memory.
#[derive(Clone, Default)]
struct LogBuffer(Arc<Mutex<Vec<u8>>>);

impl io::Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl LogBuffer {
    fn lines(&self) -> Vec<String> {
        String::from_utf8(self.0.lock().unwrap().clone())
            .unwrap()
            .lines()
            .map(str::to_owned)
            .collect()
    }
}

// Current-thread runtime: every server task runs on this thread, so the
// thread-default subscriber sees all of them.
#[tokio::test]
async fn handler_log_lines_carry_request_attributes() {
    let logs = LogBuffer::default();
    let writer = logs.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_ansi(false)
        .with_max_level(tracing::Level::DEBUG)
        .with_writer(move || writer.clone())
        .finish();
    let _default = tracing::subscriber::set_default(subscriber);

    let server = TestServer::start(MdcInsertingFilter::new());
    get(server.addr, "/traced?a=b", &[("User-Agent", "Mozilla/5.0 (X11; Linux)")]).await.unwrap();
    server.shutdown().await;

    let lines = logs.lines();
    let handler_line = lines
        .iter()
        .find(|l| l.contains("echoing logging context"))
        .unwrap_or_else(|| panic!("no handler event in {lines:#?}"));
    assert!(handler_line.contains("request{"), "{handler_line}");
    assert!(handler_line.contains("req_requestURI=/traced"), "{handler_line}");
    assert!(handler_line.contains(r#"req_queryString="a=b""#), "{handler_line}");
    assert!(handler_line.contains(r#"req_userAgent="Mozilla/5.0 (X11; Linux)""#), "{handler_line}");

    let shutdown_line = lines.iter().find(|l| l.contains("stopped")).unwrap();
    assert!(!shutdown_line.contains("req_"), "{shutdown_line}");
}
