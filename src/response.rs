//! Response sinks.
//!
//! Handlers do not return a response value; they write into a
//! [`ResponseWriter`], the same way the host server's writer works: set
//! headers, commit a status once, stream body bytes. Wrapping layers can slip
//! their own [`Sink`] between a handler and the real one (see
//! [`Capture`](crate::Capture)) without the handler noticing.
//!
//! The writer is a shared handle. The timeout middleware gives a clone to a
//! spawned task, and that task may keep writing after the request has already
//! been answered. The lock inside [`Recorder`] only keeps memory sound; it does
//! not order those late writes against the timeout response.

use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::{Bytes, BytesMut};
use http::header::{CONTENT_TYPE, X_CONTENT_TYPE_OPTIONS};
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use http_body_util::Full;
use tracing::debug;

// ── Sink ──────────────────────────────────────────────────────────────────────

/// The write side of one HTTP response.
///
/// Semantics follow the host server's response writer:
/// - the first [`write_header`](Sink::write_header) wins; later calls are no-ops,
/// - a body write before any status commits `200 OK`,
/// - header changes after the status is committed have no effect.
pub trait Sink: Send + Sync {
    fn set_header(&self, name: HeaderName, value: HeaderValue);
    fn write_header(&self, status: StatusCode);
    fn write(&self, buf: &[u8]) -> io::Result<usize>;
    /// The committed status, if any.
    fn status(&self) -> Option<StatusCode>;
}

// ── ResponseWriter ────────────────────────────────────────────────────────────

/// Cloneable handle to a [`Sink`]. This is what handlers receive.
#[derive(Clone)]
pub struct ResponseWriter(Arc<dyn Sink>);

impl ResponseWriter {
    pub fn new(sink: impl Sink + 'static) -> Self {
        Self(Arc::new(sink))
    }

    pub fn set_header(&self, name: HeaderName, value: HeaderValue) {
        self.0.set_header(name, value);
    }

    pub fn write_header(&self, status: StatusCode) {
        self.0.write_header(status);
    }

    pub fn write(&self, buf: &[u8]) -> io::Result<usize> {
        self.0.write(buf)
    }

    /// Writes the whole buffer, retrying short writes.
    pub fn write_all(&self, mut buf: &[u8]) -> io::Result<()> {
        while !buf.is_empty() {
            match self.0.write(buf)? {
                0 => return Err(io::ErrorKind::WriteZero.into()),
                n => buf = &buf[n..],
            }
        }
        Ok(())
    }

    pub fn status(&self) -> Option<StatusCode> {
        self.0.status()
    }

    /// Whether a status line has been committed. Once it has, error layers
    /// can no longer replace the response, only log.
    pub fn is_committed(&self) -> bool {
        self.0.status().is_some()
    }
}

impl<S: Sink + 'static> From<Arc<S>> for ResponseWriter {
    fn from(sink: Arc<S>) -> Self {
        Self(sink)
    }
}

/// Writes a plain-text error the way the host server's default error pages do.
pub(crate) fn text_error(w: &ResponseWriter, status: StatusCode, message: &str) -> io::Result<()> {
    w.set_header(CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"));
    w.set_header(X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff"));
    w.write_header(status);
    w.write_all(format!("{message}\n").as_bytes())
}

// ── Recorder ──────────────────────────────────────────────────────────────────

/// In-memory sink. The router dispatches every request into one and hands the
/// result to hyper once the handler chain returns.
pub struct Recorder {
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    status: Option<StatusCode>,
    headers: HeaderMap,
    body: BytesMut,
    sealed: bool,
}

impl Recorder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self { state: Mutex::new(State::default()) })
    }

    pub fn writer(self: &Arc<Self>) -> ResponseWriter {
        ResponseWriter::from(Arc::clone(self))
    }

    /// Seals the recorder and takes what was written so far.
    ///
    /// Nothing written at all yields an empty `200 OK`. Writes arriving after
    /// this point fail with [`io::ErrorKind::BrokenPipe`].
    pub fn finish(&self) -> http::Response<Full<Bytes>> {
        let mut state = self.lock();
        state.sealed = true;

        let status = state.status.unwrap_or(StatusCode::OK);
        let headers = std::mem::take(&mut state.headers);
        let body = std::mem::take(&mut state.body).freeze();

        let mut res = http::Response::new(Full::new(body));
        *res.status_mut() = status;
        *res.headers_mut() = headers;
        res
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Sink for Recorder {
    fn set_header(&self, name: HeaderName, value: HeaderValue) {
        let mut state = self.lock();
        if state.sealed || state.status.is_some() {
            debug!(header = %name, "header set after status was committed, ignored");
            return;
        }
        state.headers.insert(name, value);
    }

    fn write_header(&self, status: StatusCode) {
        let mut state = self.lock();
        if state.sealed {
            debug!(status = status.as_u16(), "status written after response was sent, ignored");
            return;
        }
        match state.status {
            Some(current) => debug!(
                current = current.as_u16(),
                ignored = status.as_u16(),
                "superfluous write_header call"
            ),
            None => state.status = Some(status),
        }
    }

    fn write(&self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.lock();
        if state.sealed {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "response already sent"));
        }
        state.status.get_or_insert(StatusCode::OK);
        state.body.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn status(&self) -> Option<StatusCode> {
        self.lock().status
    }
}
