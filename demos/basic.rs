//! Minimal reqmdc example: request attributes in every log line.
//!
//! Run with:
//!   cargo run --example basic
//!
//! Try:
//!   curl 'http://localhost:3000/users/42?fields=name'
//!   curl -H 'X-Forwarded-For: 198.51.100.0' http://localhost:3000/users/7
//!
//! Each request logs its attributes from inside the handler; the next request
//! on the same worker never sees the previous one's.

use reqmdc::{IncomingRequest, MdcInsertingFilter, Response, Server, mdc};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    Server::bind("0.0.0.0:3000")
        .filter(MdcInsertingFilter::with_prefix("req_"))
        .serve(get_user)
        .await
        .expect("server error");
}

// GET /users/:id
//
// The handler never touches the request attributes itself; they reach the log
// line through the server's per-request span.
async fn get_user(req: IncomingRequest) -> Response {
    let id = req.uri().path().rsplit('/').next().unwrap_or("unknown").to_owned();
    lookup(&id).await;
    Response::text(format!("user {id}\n"))
}

async fn lookup(id: &str) {
    tokio::task::yield_now().await;
    tracing::info!(user_id = id, "user looked up");
    tracing::debug!(forwarded = mdc::get("req_xForwardedFor").is_some(), "proxy check");
}
