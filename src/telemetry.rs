//! Telemetry for admission decisions.
//!
//! Enforcement emits one [`AdmissionEvent`] per request. Events flow through sinks,
//! which are plain `tower::Service<AdmissionEvent>` implementations so they compose
//! with standard tower combinators.
//!
//! ```rust
//! use tollgate::telemetry::{AdmissionEvent, MemorySink};
//! use tower::Service;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let mut sink = MemorySink::with_capacity(16);
//! let _ = sink.call(AdmissionEvent::Admitted { scope: "api".into(), remaining: 59 }).await;
//! assert_eq!(sink.len(), 1);
//! # }
//! ```

use std::convert::Infallible;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};
use std::time::Duration;
use tower::Service;

/// Outcome of one enforced request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdmissionEvent {
    /// The request was admitted and forwarded.
    Admitted {
        scope: String,
        /// Admissions left in the window afterwards.
        remaining: u32,
    },
    /// Rejected by the sliding window.
    RateLimited { scope: String, limit: u32, retry_after: Duration },
    /// Rejected by the quota bucket.
    QuotaExceeded { scope: String, limit: u64, used: u64 },
    /// The scope could not be derived or the request was invalid.
    Misconfigured { reason: String },
}

impl fmt::Display for AdmissionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdmissionEvent::Admitted { scope, remaining } => {
                write!(f, "Admitted({}, remaining={})", scope, remaining)
            }
            AdmissionEvent::RateLimited { scope, limit, retry_after } => {
                write!(f, "RateLimited({}, limit={}, retry_after={:?})", scope, limit, retry_after)
            }
            AdmissionEvent::QuotaExceeded { scope, limit, used } => {
                write!(f, "QuotaExceeded({}, used={}/{})", scope, used, limit)
            }
            AdmissionEvent::Misconfigured { reason } => write!(f, "Misconfigured({})", reason),
        }
    }
}

impl From<&crate::error::AdmissionError> for AdmissionEvent {
    fn from(error: &crate::error::AdmissionError) -> Self {
        use crate::error::AdmissionError;
        match error {
            AdmissionError::RateLimitExceeded { retry_after, limit, scope } => {
                AdmissionEvent::RateLimited {
                    scope: scope.clone(),
                    limit: *limit,
                    retry_after: *retry_after,
                }
            }
            AdmissionError::QuotaExceeded { quota_type, limit, used, .. } => {
                AdmissionEvent::QuotaExceeded { scope: quota_type.clone(), limit: *limit, used: *used }
            }
            AdmissionError::Config(err) => AdmissionEvent::Misconfigured { reason: err.to_string() },
        }
    }
}

/// A telemetry sink that consumes admission events.
pub trait TelemetrySink:
    Service<AdmissionEvent, Response = (), Error = Self::SinkError> + Clone + Send + 'static
{
    /// The error type for this sink.
    type SinkError: std::error::Error + Send + 'static;
}

/// Best-effort emit helper that honors `poll_ready` and swallows errors.
///
/// Telemetry never fails a request: if a sink is not ready or errors, the event is
/// dropped.
pub async fn emit_best_effort<S>(sink: S, event: AdmissionEvent)
where
    S: Service<AdmissionEvent, Response = ()> + Send + Clone + 'static,
    S::Error: std::error::Error + Send + 'static,
    S::Future: Send + 'static,
{
    use tower::ServiceExt;

    if let Ok(mut ready_sink) = sink.ready_oneshot().await {
        let _ = ready_sink.call(event).await;
    }
}

type SinkFuture = Pin<Box<dyn Future<Output = Result<(), Infallible>> + Send>>;

/// A no-op telemetry sink that discards all events.
#[derive(Clone, Debug, Default)]
pub struct NullSink;

impl Service<AdmissionEvent> for NullSink {
    type Response = ();
    type Error = Infallible;
    type Future = SinkFuture;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, _event: AdmissionEvent) -> Self::Future {
        Box::pin(async { Ok(()) })
    }
}

impl TelemetrySink for NullSink {
    type SinkError = Infallible;
}

/// A telemetry sink that logs events using the `tracing` crate.
#[derive(Clone, Debug, Default)]
pub struct LogSink;

impl Service<AdmissionEvent> for LogSink {
    type Response = ();
    type Error = Infallible;
    type Future = SinkFuture;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, event: AdmissionEvent) -> Self::Future {
        match &event {
            AdmissionEvent::Admitted { .. } => {
                tracing::debug!(target: "tollgate::telemetry", event = %event, "admission_event")
            }
            _ => tracing::info!(target: "tollgate::telemetry", event = %event, "admission_event"),
        }
        Box::pin(async { Ok(()) })
    }
}

impl TelemetrySink for LogSink {
    type SinkError = Infallible;
}

/// A telemetry sink that stores events in memory, evicting the oldest past `capacity`.
#[derive(Clone, Debug)]
pub struct MemorySink {
    events: Arc<Mutex<Vec<AdmissionEvent>>>,
    capacity: usize,
    evicted: Arc<AtomicU64>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::with_capacity(10_000)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            events: Arc::new(Mutex::new(Vec::new())),
            capacity: capacity.max(1),
            evicted: Arc::new(AtomicU64::new(0)),
        }
    }

    fn guard(&self) -> std::sync::MutexGuard<'_, Vec<AdmissionEvent>> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn events(&self) -> Vec<AdmissionEvent> {
        self.guard().clone()
    }

    pub fn clear(&self) {
        self.guard().clear();
    }

    pub fn len(&self) -> usize {
        self.guard().len()
    }

    pub fn is_empty(&self) -> bool {
        self.guard().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Events dropped to stay within capacity.
    pub fn evicted(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new()
    }
}

impl Service<AdmissionEvent> for MemorySink {
    type Response = ();
    type Error = Infallible;
    type Future = SinkFuture;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, event: AdmissionEvent) -> Self::Future {
        let mut guard = self.guard();
        if guard.len() >= self.capacity {
            guard.remove(0);
            self.evicted.fetch_add(1, Ordering::Relaxed);
        }
        guard.push(event);
        Box::pin(async { Ok(()) })
    }
}

impl TelemetrySink for MemorySink {
    type SinkError = Infallible;
}
