//! Request deadlines.
//!
//! Each request runs its inner handler on a task of its own and races that
//! task against the deadline. Exactly one side wins:
//!
//! ```text
//!             ┌── handler task finishes first ──► completed: propagate its outcome
//! running ────┤
//!             └── deadline passes first ────────► timed out: write the timeout
//!                                                  error, abandon the task
//! ```
//!
//! # Not cancel-safe
//!
//! An abandoned task is detached, not aborted. It runs to completion and may
//! keep writing into the response writer after the timeout error went out; those
//! writes either land behind the timeout body or fail once the server has taken
//! the response. The request's cancellation token is cancelled when the race is
//! decided, so handlers that poll [`Request::cancelled`] can stop early.
//!
//! A panic in the handler task is caught on that task. While the race is still
//! open it is re-raised in the caller; once the task has been abandoned it is
//! logged through the middleware's [`Logger`] instead.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use futures_util::FutureExt;
use http::StatusCode;
use tokio::task::JoinError;
use tracing::{debug, error, warn};

use crate::capture::Capture;
use crate::error::Error;
use crate::handler::{BoxFuture, BoxedHandler, ErasedHandler, HandlerResult};
use crate::logging::Logger;
use crate::middleware::recovery::normalize;
use crate::middleware::Middleware;
use crate::request::Request;
use crate::responder::{default_responder, SharedResponder};
use crate::response::ResponseWriter;

/// Status written when a deadline expires.
#[cfg(not(feature = "gateway-timeout"))]
pub const TIMEOUT_STATUS: StatusCode = StatusCode::REQUEST_TIMEOUT;

/// Status written when a deadline expires.
#[cfg(feature = "gateway-timeout")]
pub const TIMEOUT_STATUS: StatusCode = StatusCode::GATEWAY_TIMEOUT;

// Who got to the handler task's outcome first.
const RUNNING: u8 = 0;
const FINISHED: u8 = 1;
const ABANDONED: u8 = 2;

/// What the handler task hands back: its result, or the payload it panicked with.
type Outcome = std::thread::Result<HandlerResult>;

/// Bounds the inner handler to `duration`.
///
/// On completion the handler's own error wins; otherwise an error status or a
/// failed write observed on the way out is returned as the error. A zero
/// duration is an already-expired deadline.
pub fn timeout(duration: Duration, logger: Logger) -> Middleware {
    timeout_with(duration, logger, default_responder())
}

/// Like [`timeout`], writing the timeout error through `responder`.
pub fn timeout_with(duration: Duration, logger: Logger, responder: SharedResponder) -> Middleware {
    Middleware::new(move |next| {
        Arc::new(Deadline {
            next,
            duration,
            logger: logger.clone(),
            responder: Arc::clone(&responder),
        })
    })
}

struct Deadline {
    next: BoxedHandler,
    duration: Duration,
    logger: Logger,
    responder: SharedResponder,
}

impl ErasedHandler for Deadline {
    fn call(&self, mut req: Request, w: ResponseWriter) -> BoxFuture {
        let next = Arc::clone(&self.next);
        let duration = self.duration;
        let logger = self.logger.clone();
        let responder = Arc::clone(&self.responder);

        Box::pin(async move {
            let token = req.cancellation().child_token();
            req.set_cancellation(token.clone());
            let _cancel_on_drop = token.clone().drop_guard();

            let method = req.method().clone();
            let path = req.path().to_owned();

            let capture = Capture::new(w.clone());
            let captured = capture.writer();
            let state = Arc::new(AtomicU8::new(RUNNING));

            let mut task = {
                let state = Arc::clone(&state);
                let logger = logger.clone();
                tokio::spawn(async move {
                    let outcome = AssertUnwindSafe(async move { next.call(req, captured).await })
                        .catch_unwind()
                        .await;
                    if state.swap(FINISHED, Ordering::AcqRel) == ABANDONED {
                        log_abandoned(outcome, &logger);
                        return None;
                    }
                    Some(outcome)
                })
            };

            let raced = if duration.is_zero() {
                None
            } else {
                tokio::select! {
                    biased;
                    () = tokio::time::sleep(duration) => None,
                    joined = &mut task => Some(joined),
                }
            };
            token.cancel();

            if let Some(joined) = raced {
                return completed(joined, &capture);
            }

            // The task may have finished right as the deadline passed. Its
            // outcome then is ours to log, since it will not log it itself.
            if state.swap(ABANDONED, Ordering::AcqRel) == FINISHED {
                if let Ok(Some(outcome)) = task.await {
                    log_abandoned(outcome, &logger);
                }
            }
            logger.scope(|| warn!(method = %method, path = %path, timeout = ?duration, "request timed out, abandoning handler"));
            responder.error(&w, TIMEOUT_STATUS, &Error::Timeout.to_string())
        })
    }
}

fn completed(joined: Result<Option<Outcome>, JoinError>, capture: &Capture) -> HandlerResult {
    let outcome = match joined {
        Ok(Some(outcome)) => outcome,
        // Only an abandoned task comes back empty.
        Ok(None) => return Err(Error::Timeout),
        Err(join_err) => match join_err.try_into_panic() {
            Ok(payload) => std::panic::resume_unwind(payload),
            Err(join_err) => return Err(Error::other(join_err.to_string())),
        },
    };
    match outcome {
        Ok(Err(err)) => Err(err),
        Ok(Ok(())) => capture.take_error().map_or(Ok(()), Err),
        // Surface the handler's panic here, where an outer recovery layer can see it.
        Err(payload) => std::panic::resume_unwind(payload),
    }
}

fn log_abandoned(outcome: Outcome, logger: &Logger) {
    match outcome {
        Ok(res) => logger.scope(|| debug!(error = ?res.err(), "abandoned handler finished")),
        Err(payload) => {
            let err = normalize(payload);
            logger.scope(|| error!(error = %err, "abandoned handler panicked"));
        }
    }
}

#[cfg(test)]
mod tests {
    use std::panic::AssertUnwindSafe;
    use std::sync::atomic::AtomicBool;
    use std::sync::Mutex;
    use std::time::Instant;

    use bytes::Bytes;
    use futures_util::FutureExt;
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::handler::Handler;
    use crate::json;
    use crate::logging::test_support::{capturing_logger, contents};
    use crate::middleware::{chain, recovery};
    use crate::response::test_support::body_of;
    use crate::response::Recorder;

    fn request() -> Request {
        Request::new(http::Request::get("/slow").body(Bytes::new()).unwrap())
    }

    fn bounded(handler: impl Handler, duration: Duration) -> BoxedHandler {
        chain(handler.into_boxed_handler(), &[timeout(duration, Logger::default())])
    }

    async fn sleeps_100ms(_req: Request, w: ResponseWriter) -> Result<(), Error> {
        tokio::time::sleep(Duration::from_millis(100)).await;
        json::write(&w, StatusCode::OK, &serde_json::json!({ "slept": 100 }))
    }

    async fn sleeps_10ms(_req: Request, w: ResponseWriter) -> Result<(), Error> {
        tokio::time::sleep(Duration::from_millis(10)).await;
        json::write(&w, StatusCode::OK, &serde_json::json!({ "slept": 10 }))
    }

    async fn not_found(_req: Request, w: ResponseWriter) -> Result<(), Error> {
        json::not_found(&w, Some("no such todo"))
    }

    async fn fails(_req: Request, _w: ResponseWriter) -> Result<(), Error> {
        Err(Error::other("lookup failed"))
    }

    async fn panics(_req: Request, _w: ResponseWriter) -> Result<(), Error> {
        panic!("handler exploded");
    }

    #[tokio::test]
    async fn slow_handler_times_out_at_the_deadline() {
        let handler = bounded(sleeps_100ms, Duration::from_millis(50));
        let rec = Recorder::new();

        let start = Instant::now();
        handler.call(request(), rec.writer()).await.unwrap();
        let elapsed = start.elapsed();

        let res = rec.finish();
        assert_eq!(res.status(), TIMEOUT_STATUS);
        assert_eq!(body_of(&res), r#"{"error":"request timed out"}"#);
        assert!(elapsed >= Duration::from_millis(50), "returned early: {elapsed:?}");
        assert!(elapsed < Duration::from_millis(90), "waited for the handler: {elapsed:?}");
    }

    #[tokio::test]
    async fn fast_handler_answers_itself() {
        let handler = bounded(sleeps_10ms, Duration::from_millis(100));
        let rec = Recorder::new();
        handler.call(request(), rec.writer()).await.unwrap();

        let res = rec.finish();
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(body_of(&res), r#"{"slept":10}"#);
    }

    #[tokio::test]
    async fn zero_duration_always_times_out() {
        async fn instant(_req: Request, w: ResponseWriter) -> Result<(), Error> {
            json::write(&w, StatusCode::OK, &serde_json::json!({}))
        }

        let handler = bounded(instant, Duration::ZERO);
        let rec = Recorder::new();
        handler.call(request(), rec.writer()).await.unwrap();
        assert_eq!(rec.finish().status(), TIMEOUT_STATUS);
    }

    #[tokio::test]
    async fn handler_errors_propagate() {
        let handler = bounded(fails, Duration::from_millis(100));
        let err = handler.call(request(), Recorder::new().writer()).await.unwrap_err();
        assert_eq!(err.to_string(), "lookup failed");
    }

    #[tokio::test]
    async fn captured_error_status_propagates() {
        let handler = bounded(not_found, Duration::from_millis(100));
        let rec = Recorder::new();
        let err = handler.call(request(), rec.writer()).await.unwrap_err();

        assert!(matches!(err, Error::Status(s) if s == StatusCode::NOT_FOUND));
        assert_eq!(rec.finish().status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn panics_resurface_in_the_caller() {
        let handler = bounded(panics, Duration::from_millis(100));
        let outcome = AssertUnwindSafe(handler.call(request(), Recorder::new().writer()))
            .catch_unwind()
            .await;
        assert!(outcome.is_err());

        let handler = chain(
            panics.into_boxed_handler(),
            &[recovery(Logger::default()), timeout(Duration::from_millis(100), Logger::default())],
        );
        let rec = Recorder::new();
        handler.call(request(), rec.writer()).await.unwrap();

        let res = rec.finish();
        assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body_of(&res).contains("handler exploded"));
    }

    #[tokio::test]
    async fn abandoned_handler_runs_on_and_sees_cancellation() {
        let finished = Arc::new(AtomicBool::new(false));
        let saw_cancel = Arc::new(AtomicBool::new(false));

        let handler = {
            let finished = Arc::clone(&finished);
            let saw_cancel = Arc::clone(&saw_cancel);
            move |req: Request, _w: ResponseWriter| {
                let finished = Arc::clone(&finished);
                let saw_cancel = Arc::clone(&saw_cancel);
                async move {
                    req.cancelled().await;
                    saw_cancel.store(true, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    finished.store(true, Ordering::SeqCst);
                    Ok::<(), Error>(())
                }
            }
        };

        let handler = bounded(handler, Duration::from_millis(10));
        let rec = Recorder::new();
        handler.call(request(), rec.writer()).await.unwrap();
        assert_eq!(rec.finish().status(), TIMEOUT_STATUS);
        assert!(!finished.load(Ordering::SeqCst));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(saw_cancel.load(Ordering::SeqCst));
        assert!(finished.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn completion_cancels_the_handler_token_only() {
        let seen: Arc<Mutex<Option<CancellationToken>>> = Arc::default();
        let handler = {
            let seen = Arc::clone(&seen);
            move |req: Request, w: ResponseWriter| {
                *seen.lock().unwrap() = Some(req.cancellation().clone());
                w.write_header(StatusCode::OK);
                async { Ok::<(), Error>(()) }
            }
        };

        let req = request();
        let caller = req.cancellation().clone();
        bounded(handler, Duration::from_millis(100))
            .call(req, Recorder::new().writer())
            .await
            .unwrap();

        let token = seen.lock().unwrap().take().unwrap();
        assert!(token.is_cancelled());
        assert!(!caller.is_cancelled());
    }

    #[tokio::test]
    async fn late_panic_in_abandoned_handler_is_logged() {
        async fn panics_late(_req: Request, _w: ResponseWriter) -> Result<(), Error> {
            tokio::time::sleep(Duration::from_millis(30)).await;
            panic!("gave up long ago");
        }

        let (logger, buf) = capturing_logger();
        let handler = chain(panics_late.into_boxed_handler(), &[timeout(Duration::from_millis(10), logger)]);
        let rec = Recorder::new();
        handler.call(request(), rec.writer()).await.unwrap();
        assert_eq!(rec.finish().status(), TIMEOUT_STATUS);

        tokio::time::sleep(Duration::from_millis(100)).await;
        let out = contents(&buf);
        assert!(out.contains("abandoned handler panicked"));
        assert!(out.contains("gave up long ago"));
    }

    #[tokio::test]
    async fn responder_shapes_the_timeout_body() {
        let responder: SharedResponder = Arc::new(crate::responder::TextResponder);
        let handler = chain(
            sleeps_100ms.into_boxed_handler(),
            &[timeout_with(Duration::from_millis(10), Logger::default(), responder)],
        );
        let rec = Recorder::new();
        handler.call(request(), rec.writer()).await.unwrap();

        let res = rec.finish();
        assert_eq!(res.status(), TIMEOUT_STATUS);
        assert_eq!(body_of(&res), "request timed out\n");
    }
}
