//! Response capture boundary.
//!
//! A [`Capture`] sits between a handler and its [`ResponseWriter`] and notes
//! the first sign of failure: a committed status of `400` or above, or a
//! failed body write. Everything is forwarded untouched, so the handler's
//! response is exactly what it would have been without the capture.

use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use http::{HeaderName, HeaderValue, StatusCode};

use crate::error::Error;
use crate::response::{ResponseWriter, Sink};

pub struct Capture {
    inner: ResponseWriter,
    observed: Mutex<Option<Error>>,
}

impl Capture {
    pub fn new(inner: ResponseWriter) -> Arc<Self> {
        Arc::new(Self { inner, observed: Mutex::new(None) })
    }

    /// A writer that routes through this capture.
    pub fn writer(self: &Arc<Self>) -> ResponseWriter {
        ResponseWriter::from(Arc::clone(self))
    }

    pub fn error_observed(&self) -> bool {
        self.lock().is_some()
    }

    /// Takes the first recorded error, leaving the capture clean.
    pub fn take_error(&self) -> Option<Error> {
        self.lock().take()
    }

    fn record(&self, err: Error) {
        let mut observed = self.lock();
        if observed.is_none() {
            *observed = Some(err);
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<Error>> {
        self.observed.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Sink for Capture {
    fn set_header(&self, name: HeaderName, value: HeaderValue) {
        self.inner.set_header(name, value);
    }

    fn write_header(&self, status: StatusCode) {
        if status.as_u16() >= 400 {
            self.record(Error::Status(status));
        }
        self.inner.write_header(status);
    }

    fn write(&self, buf: &[u8]) -> io::Result<usize> {
        self.inner.write(buf).inspect_err(|e| {
            // io::Error is not Clone; the caller keeps the original.
            self.record(Error::Write(io::Error::new(e.kind(), e.to_string())));
        })
    }

    fn status(&self) -> Option<StatusCode> {
        self.inner.status()
    }
}
