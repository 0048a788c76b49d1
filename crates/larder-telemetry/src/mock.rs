use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use larder_core::{ErrorEvent, PerformanceEvent, TransportError};
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::collector::Collector;

/// Pre-programmed collector outcomes for deterministic tests.
#[derive(Clone)]
pub enum MockResponse {
    Ok,
    Fail(TransportError),
    /// Wait a duration, then resolve the inner response.
    Delay(Duration, Box<MockResponse>),
    /// Block until the gate is opened, then resolve the inner response.
    Gate(Arc<Notify>, Box<MockResponse>),
}

impl MockResponse {
    /// Collector answered with this HTTP status.
    pub fn status(status: u16) -> Self {
        Self::Fail(TransportError::Status {
            status,
            body: String::new(),
        })
    }

    pub fn delayed(delay: Duration, inner: MockResponse) -> Self {
        Self::Delay(delay, Box::new(inner))
    }

    pub fn gated(gate: Arc<Notify>, inner: MockResponse) -> Self {
        Self::Gate(gate, Box::new(inner))
    }
}

/// Collector that answers from a script and records every batch it is sent.
///
/// Responses are consumed in call order across both queues; once the script
/// runs out, every call gets the fallback.
pub struct MockCollector {
    script: Mutex<VecDeque<MockResponse>>,
    fallback: MockResponse,
    error_batches: Mutex<Vec<Vec<ErrorEvent>>>,
    metric_batches: Mutex<Vec<Vec<PerformanceEvent>>>,
    call_count: AtomicUsize,
    called: Notify,
}

impl MockCollector {
    pub fn new(script: Vec<MockResponse>) -> Self {
        Self::with_fallback(script, MockResponse::Ok)
    }

    pub fn with_fallback(script: Vec<MockResponse>, fallback: MockResponse) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback,
            error_batches: Mutex::new(Vec::new()),
            metric_batches: Mutex::new(Vec::new()),
            call_count: AtomicUsize::new(0),
            called: Notify::new(),
        }
    }

    /// Always succeeds.
    pub fn accepting() -> Self {
        Self::new(Vec::new())
    }

    /// Always fails with the given status.
    pub fn rejecting(status: u16) -> Self {
        Self::with_fallback(Vec::new(), MockResponse::status(status))
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    pub fn error_batches(&self) -> Vec<Vec<ErrorEvent>> {
        self.error_batches.lock().clone()
    }

    pub fn metric_batches(&self) -> Vec<Vec<PerformanceEvent>> {
        self.metric_batches.lock().clone()
    }

    /// Resolve once at least `n` sends have started.
    pub async fn wait_for_calls(&self, n: usize) {
        loop {
            let notified = self.called.notified();
            if self.call_count() >= n {
                return;
            }
            notified.await;
        }
    }

    fn next_response(&self) -> MockResponse {
        self.script
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone())
    }

    fn mark_called(&self) {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        self.called.notify_waiters();
    }
}

#[async_trait]
impl Collector for MockCollector {
    async fn send_errors(&self, batch: &[ErrorEvent]) -> Result<(), TransportError> {
        self.error_batches.lock().push(batch.to_vec());
        let response = self.next_response();
        self.mark_called();
        resolve_response(response).await
    }

    async fn send_metrics(&self, batch: &[PerformanceEvent]) -> Result<(), TransportError> {
        self.metric_batches.lock().push(batch.to_vec());
        let response = self.next_response();
        self.mark_called();
        resolve_response(response).await
    }
}

/// Unrolls nested delays and gates iteratively to avoid recursive async.
async fn resolve_response(response: MockResponse) -> Result<(), TransportError> {
    let mut current = response;
    loop {
        match current {
            MockResponse::Ok => return Ok(()),
            MockResponse::Fail(e) => return Err(e),
            MockResponse::Delay(duration, inner) => {
                tokio::time::sleep(duration).await;
                current = *inner;
            }
            MockResponse::Gate(gate, inner) => {
                gate.notified().await;
                current = *inner;
            }
        }
    }
}
