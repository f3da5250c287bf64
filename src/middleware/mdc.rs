//! Copies request attributes into the logging context for the duration of a
//! request.
//!
//! On entry the filter reads seven attributes from the [`Request`] and puts
//! the non-empty ones into the [`mdc`](crate::mdc) under `prefix + suffix`.
//! It then runs the rest of the pipeline. On the way out, however the
//! pipeline finished (value, `Err`, panic, or a dropped future), all seven
//! keys are removed again.
//!
//! | Suffix | Source | Needs HTTP |
//! |---|---|---|
//! | `remoteHost` | peer address | no |
//! | `userAgent` | `User-Agent` header | yes |
//! | `requestURI` | request path | yes |
//! | `queryString` | query string | yes |
//! | `requestURL` | reconstructed URL | yes |
//! | `method` | request method | yes |
//! | `xForwardedFor` | `X-Forwarded-For` header | yes |
//!
//! ```rust
//! use reqmdc::{BasicRequest, MdcInsertingFilter, Request, mdc};
//!
//! let filter = MdcInsertingFilter::new();
//! let req = Request::from(BasicRequest::new(Some("192.0.2.0".into())));
//!
//! let host = filter.process(&req, || mdc::get("req_remoteHost"));
//! assert_eq!(host.as_deref(), Some("192.0.2.0"));
//! assert_eq!(mdc::get("req_remoteHost"), None);
//! ```

use std::future::Future;

use tracing::trace;

use crate::mdc;
use crate::request::Request;

/// Key suffixes, appended to the filter's prefix.
pub mod fields {
    pub const REMOTE_HOST: &str = "remoteHost";
    pub const USER_AGENT: &str = "userAgent";
    pub const REQUEST_URI: &str = "requestURI";
    pub const QUERY_STRING: &str = "queryString";
    pub const REQUEST_URL: &str = "requestURL";
    pub const METHOD: &str = "method";
    pub const X_FORWARDED_FOR: &str = "xForwardedFor";

    /// Every suffix, in extraction order.
    pub const FIELDS: [&str; 7] = [
        REMOTE_HOST,
        USER_AGENT,
        REQUEST_URI,
        QUERY_STRING,
        REQUEST_URL,
        METHOD,
        X_FORWARDED_FOR,
    ];
}

pub const DEFAULT_PREFIX: &str = "req_";

// ── MdcInsertingFilter ────────────────────────────────────────────────────────

/// Middleware that exposes request attributes to every log call made while
/// the request is handled.
///
/// Configure it once at startup. [`set_prefix`](Self::set_prefix) takes
/// `&mut self`, so once the filter is shared with a running server it can no
/// longer change underneath in-flight requests.
#[derive(Clone, Debug)]
pub struct MdcInsertingFilter {
    prefix: String,
}

impl MdcInsertingFilter {
    /// A filter using the default `"req_"` prefix.
    pub fn new() -> Self {
        Self { prefix: DEFAULT_PREFIX.to_owned() }
    }

    /// A filter using `prefix`. Any string is accepted; an empty prefix
    /// leaves the bare suffixes as keys.
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self { prefix: prefix.into() }
    }

    pub fn prefix(&self) -> &str { &self.prefix }

    /// Changes the prefix for requests processed from now on.
    pub fn set_prefix(&mut self, prefix: impl Into<String>) {
        self.prefix = prefix.into();
    }

    /// The seven context keys this filter manages, in extraction order.
    pub fn keys(&self) -> [String; 7] {
        fields::FIELDS.map(|suffix| self.key(suffix))
    }

    fn key(&self, suffix: &str) -> String {
        format!("{}{suffix}", self.prefix)
    }

    /// Runs `next` with the request's attributes in the logging context.
    ///
    /// `next` is called exactly once and whatever it returns, `Err` included,
    /// is handed back untouched. The keys are removed before this returns, and
    /// also while unwinding if `next` panics.
    pub fn process<R>(&self, req: &Request, next: impl FnOnce() -> R) -> R {
        let _guard = self.insert_into_mdc(req);
        next()
    }

    /// Async counterpart of [`process`](Self::process).
    ///
    /// `next` runs inside its own [`mdc::scope`], so the entries follow it
    /// across `.await` points and worker threads. Dropping the returned future
    /// before completion also removes the keys.
    pub async fn process_async<F: Future>(&self, req: Request, next: F) -> F::Output {
        mdc::scope(async move {
            let _guard = self.insert_into_mdc(&req);
            next.await
        })
        .await
    }

    /// Puts the request's non-empty attributes into the active context.
    ///
    /// The returned guard removes all seven keys when dropped, whether or not
    /// each one was inserted.
    #[must_use = "the entries are removed as soon as the guard is dropped"]
    pub fn insert_into_mdc(&self, req: &Request) -> MdcGuard {
        put_if_present(self.key(fields::REMOTE_HOST), req.remote_host());

        if let Some(http) = req.as_http() {
            put_if_present(self.key(fields::USER_AGENT), http.user_agent());
            put_if_present(self.key(fields::REQUEST_URI), Some(http.request_uri()));
            put_if_present(self.key(fields::QUERY_STRING), http.query_string());
            if let Some(url) = http.request_url() {
                put_if_present(self.key(fields::REQUEST_URL), Some(url.to_string().as_str()));
            }
            put_if_present(self.key(fields::METHOD), Some(http.method()));
            put_if_present(self.key(fields::X_FORWARDED_FOR), http.x_forwarded_for());
        }

        trace!(prefix = %self.prefix, http = req.as_http().is_some(), "request attributes added to mdc");
        MdcGuard { keys: Some(self.keys()) }
    }
}

impl Default for MdcInsertingFilter {
    fn default() -> Self { Self::new() }
}

fn put_if_present(key: String, value: Option<&str>) {
    if let Some(value) = value.filter(|v| !v.is_empty()) {
        mdc::put(key, value);
    }
}

// ── MdcGuard ──────────────────────────────────────────────────────────────────

/// Removes a filter's keys from the logging context when dropped.
///
/// Holds the keys computed at insertion time, so a later prefix change cannot
/// redirect the cleanup.
#[derive(Debug)]
pub struct MdcGuard {
    keys: Option<[String; 7]>,
}

impl MdcGuard {
    /// Removes the keys now instead of at scope exit.
    pub fn clear(mut self) {
        self.remove_all();
    }

    fn remove_all(&mut self) {
        if let Some(keys) = self.keys.take() {
            for key in &keys {
                mdc::remove(key);
            }
            trace!("request attributes removed from mdc");
        }
    }
}

impl Drop for MdcGuard {
    fn drop(&mut self) {
        self.remove_all();
    }
}
