//! Ambient logging context (MDC, "mapped diagnostic context").
//!
//! A small ordered string map that any code running on behalf of a request can
//! read without the values being passed down explicitly. Log statements pull
//! from it with [`snapshot`]:
//!
//! ```rust
//! reqmdc::mdc::put("req_method", "GET");
//! tracing::info!(mdc = %reqmdc::mdc::snapshot(), "handling request");
//! reqmdc::mdc::remove("req_method");
//! ```
//!
//! # Two scopes
//!
//! Plain thread-locals do not work for async code: a tokio worker may poll a
//! future on thread A, park it at an `.await`, and resume it on thread B. So
//! the store has two layers:
//!
//! | Scope | Entered by | Lives as long as |
//! |---|---|---|
//! | **task** | [`scope`] | the wrapped future, on whichever thread polls it |
//! | **thread** | nothing (always there) | the OS thread |
//!
//! Every operation targets the innermost task scope if one is active, and the
//! current thread's map otherwise. Entering a task scope copies the entries
//! visible at that moment, so outer values are still readable inside.

use std::cell::RefCell;
use std::fmt;
use std::future::Future;

tokio::task_local! {
    static TASK_MDC: RefCell<Mdc>;
}

thread_local! {
    static THREAD_MDC: RefCell<Mdc> = RefCell::new(Mdc::new());
}

// ── Mdc ───────────────────────────────────────────────────────────────────────

/// An owned copy of a logging context.
///
/// Entries keep the position of their first insertion; replacing a value does
/// not move it. Contexts hold a handful of entries, so a `Vec` with linear
/// lookup beats hashing here.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Mdc {
    entries: Vec<(String, String)>,
}

impl Mdc {
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.iter().any(|(k, _)| k == key)
    }

    pub fn len(&self) -> usize { self.entries.len() }
    pub fn is_empty(&self) -> bool { self.entries.is_empty() }

    /// Iterates entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    fn put(&mut self, key: String, value: String) {
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, v)) => *v = value,
            None => self.entries.push((key, value)),
        }
    }

    fn remove(&mut self, key: &str) {
        self.entries.retain(|(k, _)| k != key);
    }
}

/// Renders logfmt: `key=value` pairs separated by single spaces, in insertion
/// order.
///
/// Values that are empty or contain whitespace, `=` or `"` are double-quoted,
/// with `"` and `\` backslash-escaped:
///
/// ```rust
/// reqmdc::mdc::put("req_userAgent", "Mozilla/5.0 (X11; Linux) x=y");
/// reqmdc::mdc::put("req_method", "GET");
/// assert_eq!(
///     reqmdc::mdc::snapshot().to_string(),
///     r#"req_userAgent="Mozilla/5.0 (X11; Linux) x=y" req_method=GET"#,
/// );
/// ```
impl fmt::Display for Mdc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (k, v)) in self.entries.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{k}=")?;
            write_value(f, v)?;
        }
        Ok(())
    }
}

fn needs_quotes(value: &str) -> bool {
    value.is_empty() || value.chars().any(|c| c.is_whitespace() || c == '=' || c == '"')
}

fn write_value(f: &mut fmt::Formatter<'_>, value: &str) -> fmt::Result {
    if !needs_quotes(value) {
        return f.write_str(value);
    }
    f.write_str("\"")?;
    for c in value.chars() {
        match c {
            '"' => f.write_str("\\\"")?,
            '\\' => f.write_str("\\\\")?,
            '\n' => f.write_str("\\n")?,
            _ => write!(f, "{c}")?,
        }
    }
    f.write_str("\"")
}

// ── Ambient operations ────────────────────────────────────────────────────────

/// Runs `op` against the active store: the task scope if entered, the
/// thread's map otherwise.
fn with_current<R>(op: impl FnOnce(&mut Mdc) -> R) -> R {
    if in_task_scope() {
        TASK_MDC.with(|cell| op(&mut cell.borrow_mut()))
    } else {
        THREAD_MDC.with(|cell| op(&mut cell.borrow_mut()))
    }
}

/// Inserts `value` under `key`, replacing any existing value.
pub fn put(key: impl Into<String>, value: impl Into<String>) {
    let (key, value) = (key.into(), value.into());
    with_current(move |mdc| mdc.put(key, value));
}

/// Removes `key`. Removing an absent key does nothing.
pub fn remove(key: &str) {
    with_current(|mdc| mdc.remove(key));
}

/// Returns a copy of the value stored under `key`.
pub fn get(key: &str) -> Option<String> {
    with_current(|mdc| mdc.get(key).map(str::to_owned))
}

/// Returns an owned copy of the whole active context.
pub fn snapshot() -> Mdc {
    with_current(|mdc| mdc.clone())
}

/// Removes every entry from the active context.
pub fn clear() {
    with_current(|mdc| mdc.entries.clear());
}

/// `true` while running inside a future wrapped by [`scope`].
pub fn in_task_scope() -> bool {
    TASK_MDC.try_with(|_| ()).is_ok()
}

/// Runs `fut` with its own task-scoped context.
///
/// The new context starts as a copy of the one visible to the caller. Changes
/// made inside never leak out: when `fut` completes (or is dropped) the scope
/// and everything in it is gone.
pub async fn scope<F: Future>(fut: F) -> F::Output {
    TASK_MDC.scope(RefCell::new(snapshot()), fut).await
}
