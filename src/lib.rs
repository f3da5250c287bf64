//! # reqmdc
//!
//! Request attributes in every log line, and never in the wrong one.
//!
//! While a request is being handled, reqmdc keeps seven of its attributes in
//! an ambient logging context (an MDC, "mapped diagnostic context"): peer
//! host, user agent, path, query string, full URL, method and
//! `X-Forwarded-For`. Any log call on the request's path can read them with
//! [`mdc::snapshot`]. When handling finishes, successfully or not, they are
//! removed, so a worker thread or task that moves on to other work carries
//! nothing over.
//!
//! The pieces:
//!
//! - [`mdc`]: the ambient, task- or thread-scoped key/value store
//! - [`MdcInsertingFilter`]: the middleware that fills and empties it
//! - [`Request`]: what the middleware may read: [`BasicRequest`] (peer only)
//!   or [`HttpRequest`] (peer plus request line and headers)
//! - [`Server`]: a hyper server that runs every request through the filter
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use reqmdc::{IncomingRequest, MdcInsertingFilter, Response, Server, mdc};
//!
//! #[tokio::main]
//! async fn main() {
//!     Server::bind("0.0.0.0:3000")
//!         .filter(MdcInsertingFilter::with_prefix("http."))
//!         .serve(hello)
//!         .await
//!         .unwrap();
//! }
//!
//! async fn hello(_req: IncomingRequest) -> Response {
//!     // Logged inside the server's `request{mdc=http.remoteHost=… http.method=GET …}` span.
//!     tracing::info!(method = ?mdc::get("http.method"), "saying hello");
//!     Response::text("hello")
//! }
//! ```
//!
//! ## Without the server
//!
//! The filter works on its own around any synchronous or async call:
//!
//! ```rust
//! use http::{Method, Uri};
//! use reqmdc::{HttpRequest, MdcInsertingFilter, Request, mdc};
//!
//! let req = Request::from(
//!     HttpRequest::builder(Method::GET, Uri::from_static("/foobar?baz=qux"))
//!         .remote_host("192.0.2.0")
//!         .build(),
//! );
//!
//! let line = MdcInsertingFilter::new().process(&req, || mdc::snapshot().to_string());
//! assert_eq!(line, r#"req_remoteHost=192.0.2.0 req_requestURI=/foobar req_queryString="baz=qux" req_method=GET"#);
//! assert!(mdc::snapshot().is_empty());
//! ```

mod error;
mod handler;
mod request;
mod response;
mod server;

pub mod mdc;
pub mod middleware;

pub use error::Error;
pub use handler::{Handler, IncomingRequest};
pub use middleware::mdc::{MdcGuard, MdcInsertingFilter};
pub use request::{BasicRequest, HttpRequest, HttpRequestBuilder, Request, RequestUrl};
pub use response::{IntoResponse, Response, ResponseBuilder};
pub use server::Server;
