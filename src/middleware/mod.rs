//! Middleware layer.
//!
//! Middleware wraps the handler call and is the right place for cross-cutting
//! concerns. The server runs every request through an
//! [`MdcInsertingFilter`](mdc::MdcInsertingFilter), so log calls made while
//! handling a request carry the request's attributes.
//!
//! Built-in middleware:
//! - `middleware::mdc`: request attributes in the logging context

pub mod mdc;
