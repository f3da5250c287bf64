//! HTTP server, request dispatch and graceful shutdown.
//!
//! Every request goes through the same three steps:
//!
//! 1. The hyper request parts and the peer address become a
//!    [`Request::Http`](crate::Request::Http) for middleware.
//! 2. The [`MdcInsertingFilter`] puts the request attributes into the logging
//!    context.
//! 3. The handler runs inside that context and inside a `request` tracing
//!    span that records the attributes; when it finishes, the filter removes
//!    them again.
//!
//! # Graceful shutdown
//!
//! On **SIGTERM** or **Ctrl-C** the server stops accepting new connections,
//! lets every in-flight connection run to completion, then returns from
//! [`Server::serve`]. Use [`Server::serve_with_shutdown`] to drive shutdown
//! from your own future instead.

use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use tokio::net::TcpListener;
use tracing::{Instrument, debug, error, info, info_span};

use crate::error::Error;
use crate::handler::{BoxedHandler, Handler};
use crate::mdc;
use crate::middleware::mdc::MdcInsertingFilter;
use crate::request::{HttpRequest, Request};

/// Where the server gets its listening socket from.
enum Bind {
    Addr(SocketAddr),
    Listener(std::net::TcpListener),
}

/// State shared by every connection task.
struct Shared {
    filter: MdcInsertingFilter,
    handler: BoxedHandler,
}

/// The HTTP server.
pub struct Server {
    bind: Bind,
    filter: MdcInsertingFilter,
}

impl Server {
    /// Configures the server to bind to `addr` when [`serve`](Server::serve)
    /// is called.
    ///
    /// # Panics
    ///
    /// Panics if `addr` is not a valid `host:port` string.
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// use reqmdc::Server;
    /// let server = Server::bind("0.0.0.0:3000");
    /// ```
    pub fn bind(addr: &str) -> Self {
        let addr: SocketAddr = addr.parse().expect("invalid socket address");
        Self { bind: Bind::Addr(addr), filter: MdcInsertingFilter::default() }
    }

    /// Serves on an already-bound listener, e.g. one bound to port 0.
    pub fn from_listener(listener: std::net::TcpListener) -> Self {
        Self { bind: Bind::Listener(listener), filter: MdcInsertingFilter::default() }
    }

    /// Replaces the default (`"req_"`-prefixed) logging-context filter.
    pub fn filter(mut self, filter: MdcInsertingFilter) -> Self {
        self.filter = filter;
        self
    }

    /// Starts accepting connections and dispatching them to `handler`.
    ///
    /// Returns only after a full graceful shutdown (SIGTERM or Ctrl-C,
    /// followed by all in-flight requests completing).
    pub async fn serve(self, handler: impl Handler) -> Result<(), Error> {
        self.serve_with_shutdown(handler, shutdown_signal()).await
    }

    /// Like [`serve`](Server::serve), but shuts down when `signal` resolves.
    pub async fn serve_with_shutdown(
        self,
        handler: impl Handler,
        signal: impl Future<Output = ()>,
    ) -> Result<(), Error> {
        let listener = match self.bind {
            Bind::Addr(addr) => TcpListener::bind(addr).await?,
            Bind::Listener(listener) => {
                listener.set_nonblocking(true)?;
                TcpListener::from_std(listener)?
            }
        };
        let local_addr = listener.local_addr()?;

        let shared = Arc::new(Shared {
            filter: self.filter,
            handler: handler.into_boxed_handler(),
        });

        info!(addr = %local_addr, prefix = %shared.filter.prefix(), "listening");

        let mut tasks = tokio::task::JoinSet::new();
        tokio::pin!(signal);

        loop {
            tokio::select! {
                // Check shutdown first so a signal stops accepting immediately,
                // even if more connections are queued.
                biased;

                () = &mut signal => {
                    info!(in_flight = tasks.len(), "shutdown signal received, draining connections");
                    break;
                }

                res = listener.accept() => {
                    let (stream, remote_addr) = match res {
                        Ok(v) => v,
                        Err(e) => {
                            error!("accept error: {e}");
                            continue;
                        }
                    };

                    let shared = Arc::clone(&shared);
                    let io = TokioIo::new(stream);

                    tasks.spawn(async move {
                        // Called once per request on the connection.
                        let svc = service_fn(move |req| {
                            let shared = Arc::clone(&shared);
                            async move { dispatch(shared, req, remote_addr).await }
                        });

                        // HTTP/1.1 and HTTP/2, whatever the client negotiates.
                        if let Err(e) = ConnBuilder::new(TokioExecutor::new())
                            .serve_connection(io, svc)
                            .await
                        {
                            error!(peer = %remote_addr, "connection error: {e}");
                        }
                    });
                }

                // Reap finished connection tasks so the JoinSet does not grow
                // without bound on long-running servers.
                Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
            }
        }

        while tasks.join_next().await.is_some() {}

        info!("stopped");
        Ok(())
    }
}

// ── Request dispatch ──────────────────────────────────────────────────────────

/// Runs one request through the filter and the handler.
///
/// Infallible: handler failures are already responses, so hyper never sees
/// an error.
async fn dispatch(
    shared: Arc<Shared>,
    req: hyper::Request<Incoming>,
    remote_addr: SocketAddr,
) -> Result<http::Response<Full<Bytes>>, Infallible> {
    let (parts, body) = req.into_parts();
    let attributes = Request::Http(HttpRequest::from_parts(&parts, remote_addr));
    let req = hyper::Request::from_parts(parts, body);

    let handler = Arc::clone(&shared.handler);
    let response = shared
        .filter
        .process_async(attributes, async move {
            // Every event the handler emits is recorded inside this span, so
            // the request attributes show up on each log line.
            let span = info_span!("request", mdc = %mdc::snapshot());
            async move {
                debug!("dispatching request");
                handler.call(req).await
            }
            .instrument(span)
            .await
        })
        .await;

    Ok(response.into_inner())
}

// ── Shutdown signal ───────────────────────────────────────────────────────────

/// Resolves on the first SIGTERM or SIGINT (Ctrl-C only on Windows).
///
/// If a handler cannot be installed that signal source is ignored rather
/// than bringing the server down.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let sigterm = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c   => {}
        () = sigterm  => {}
    }
}
