//! Logging setup and the injectable [`Logger`].
//!
//! All events go through `tracing`. Middleware that logs takes a [`Logger`],
//! which is either the ambient dispatcher (the default) or a specific
//! [`Dispatch`] the caller wants those events routed to.

use tracing::Dispatch;
use tracing_subscriber::EnvFilter;

use crate::error::Error;

/// Where a component's log events go.
#[derive(Clone, Debug, Default)]
pub struct Logger(Option<Dispatch>);

impl Logger {
    pub fn new(dispatch: Dispatch) -> Self {
        Self(Some(dispatch))
    }

    /// Runs `f` with this logger's dispatcher as the default.
    pub fn scope<R>(&self, f: impl FnOnce() -> R) -> R {
        match &self.0 {
            Some(dispatch) => tracing::dispatcher::with_default(dispatch, f),
            None => f(),
        }
    }
}

impl From<Dispatch> for Logger {
    fn from(dispatch: Dispatch) -> Self {
        Self::new(dispatch)
    }
}

/// Installs a global fmt subscriber filtered by `RUST_LOG` (default `info`).
///
/// Meant for binaries; fails if a global subscriber is already set.
pub fn init() -> Result<(), Error> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .map_err(Error::Other)
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::io;
    use std::sync::{Arc, Mutex};

    use super::Logger;

    /// A logger whose formatted output lands in a shared buffer.
    pub(crate) fn capturing_logger() -> (Logger, Arc<Mutex<Vec<u8>>>) {
        let buf = Arc::new(Mutex::new(Vec::new()));
        let writer = Arc::clone(&buf);
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .with_writer(move || SharedBuf(Arc::clone(&writer)))
            .finish();
        (Logger::new(tracing::Dispatch::new(subscriber)), buf)
    }

    pub(crate) fn contents(buf: &Arc<Mutex<Vec<u8>>>) -> String {
        String::from_utf8_lossy(&buf.lock().unwrap()).into_owned()
    }

    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl io::Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }
}
