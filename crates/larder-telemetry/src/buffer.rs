//! The telemetry buffer: capture now, deliver when the collector is reachable.
//!
//! Each queue flushes with the same protocol:
//!
//! 1. Detach the queue contents into a batch, leaving the live queue empty.
//! 2. Send the batch to the collector in one request.
//! 3. On success, drop the batch.
//! 4. On failure, put the batch back in front of anything captured while the
//!    send was in flight, and log a warning.
//!
//! Because the live queue is emptied before the send is awaited, events
//! captured during a send land in a fresh queue generation and are neither
//! part of nor lost by that send.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use larder_core::{
    ErrorEvent, ErrorReport, HostEnvironment, HostSignal, PerformanceEvent, QueueKind,
    QueueSizes, SessionId, TransportError, UserIdPolicy,
};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::collector::Collector;
use crate::queue::EventQueue;

/// Tuning for a [`TelemetryBuffer`].
#[derive(Clone, Debug)]
pub struct BufferConfig {
    /// Periodic flush interval while online.
    pub flush_interval: Duration,
    /// Per-queue bound; the oldest events are dropped beyond it.
    /// `None` allows unbounded growth.
    pub max_queue_len: Option<usize>,
    /// Echo every captured event to the local log.
    pub dev_mode: bool,
    pub user_id_policy: UserIdPolicy,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            flush_interval: Duration::from_secs(30),
            max_queue_len: Some(1000),
            dev_mode: false,
            user_id_policy: UserIdPolicy::RetainOnLogout,
        }
    }
}

/// Outcome of an explicit [`TelemetryBuffer::flush`]. `Ok` holds the number
/// of events delivered (0 when the queue was empty).
#[derive(Debug)]
pub struct FlushReport {
    pub errors: Result<usize, TransportError>,
    pub metrics: Result<usize, TransportError>,
}

impl FlushReport {
    pub fn is_success(&self) -> bool {
        self.errors.is_ok() && self.metrics.is_ok()
    }

    pub fn delivered(&self) -> usize {
        self.errors.as_ref().copied().unwrap_or(0) + self.metrics.as_ref().copied().unwrap_or(0)
    }
}

/// Lifetime counters for one queue.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub captured: u64,
    pub delivered: u64,
    pub failed_flushes: u64,
    pub dropped: u64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferStats {
    pub errors: QueueStats,
    pub metrics: QueueStats,
}

#[derive(Default)]
struct QueueCounters {
    captured: AtomicU64,
    delivered: AtomicU64,
    failed_flushes: AtomicU64,
    dropped: AtomicU64,
}

impl QueueCounters {
    fn snapshot(&self) -> QueueStats {
        QueueStats {
            captured: self.captured.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            failed_flushes: self.failed_flushes.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

#[derive(Clone, Copy, Debug)]
enum FlushTarget {
    Only(QueueKind),
    Both,
}

struct BufferInner {
    config: BufferConfig,
    collector: Arc<dyn Collector>,
    host: Arc<dyn HostEnvironment>,
    session_id: SessionId,
    user_id: RwLock<Option<String>>,
    online: AtomicBool,
    errors: EventQueue<ErrorEvent>,
    metrics: EventQueue<PerformanceEvent>,
    error_counters: QueueCounters,
    metric_counters: QueueCounters,
    in_flight: TaskTracker,
}

/// Handle to the process's telemetry buffer. Clones share the same queues
/// and session.
#[derive(Clone)]
pub struct TelemetryBuffer {
    inner: Arc<BufferInner>,
}

impl TelemetryBuffer {
    pub fn new(
        config: BufferConfig,
        collector: Arc<dyn Collector>,
        host: Arc<dyn HostEnvironment>,
    ) -> Self {
        let session_id = SessionId::generate();
        let online = host.is_online();
        info!(session_id = %session_id, online, "telemetry buffer created");
        Self {
            inner: Arc::new(BufferInner {
                errors: EventQueue::new(config.max_queue_len),
                metrics: EventQueue::new(config.max_queue_len),
                config,
                collector,
                host,
                session_id,
                user_id: RwLock::new(None),
                online: AtomicBool::new(online),
                error_counters: QueueCounters::default(),
                metric_counters: QueueCounters::default(),
                in_flight: TaskTracker::new(),
            }),
        }
    }

    pub fn session_id(&self) -> &SessionId {
        &self.inner.session_id
    }

    pub fn config(&self) -> &BufferConfig {
        &self.inner.config
    }

    pub fn is_online(&self) -> bool {
        self.inner.online.load(Ordering::SeqCst)
    }

    pub fn user_id(&self) -> Option<String> {
        self.inner.user_id.read().clone()
    }

    /// Stamp events captured from now on. Already queued events keep theirs.
    pub fn set_user_id(&self, user_id: impl Into<String>) {
        *self.inner.user_id.write() = Some(user_id.into());
    }

    pub fn clear_user_id(&self) {
        *self.inner.user_id.write() = None;
    }

    /// Apply the configured [`UserIdPolicy`] for a logout.
    pub fn on_logout(&self) {
        match self.inner.config.user_id_policy {
            UserIdPolicy::ClearOnLogout => self.clear_user_id(),
            UserIdPolicy::RetainOnLogout => {}
        }
    }

    /// Record an error. Never fails; delivery problems are logged.
    pub fn capture_error(&self, error: impl Into<ErrorReport>, context: Option<serde_json::Value>) {
        let report = error.into();
        let event = ErrorEvent {
            message: report.message,
            stack: report.stack,
            url: self.inner.host.current_url(),
            client_info: self.inner.host.client_info(),
            captured_at_ms: Utc::now().timestamp_millis(),
            user_id: self.user_id(),
            session_id: self.inner.session_id.clone(),
            context,
        };

        if self.inner.config.dev_mode {
            info!(
                target: "larder_telemetry::capture",
                session_id = %event.session_id,
                url = %event.url,
                stack = ?event.stack,
                context = ?event.context,
                "captured error: {}",
                event.message
            );
        }

        let dropped = self.inner.errors.push(event);
        self.record_capture(QueueKind::Errors, dropped);
        if self.is_online() {
            self.spawn_flush(FlushTarget::Only(QueueKind::Errors));
        }
    }

    /// Record a performance measurement. Never fails.
    pub fn capture_performance(&self, metric_name: impl Into<String>, value: f64) {
        let event = PerformanceEvent {
            metric_name: metric_name.into(),
            value,
            url: self.inner.host.current_url(),
            captured_at_ms: Utc::now().timestamp_millis(),
            user_id: self.user_id(),
            session_id: self.inner.session_id.clone(),
        };

        if self.inner.config.dev_mode {
            info!(
                target: "larder_telemetry::capture",
                session_id = %event.session_id,
                metric = %event.metric_name,
                value = event.value,
                "captured metric"
            );
        }

        let dropped = self.inner.metrics.push(event);
        self.record_capture(QueueKind::Metrics, dropped);
        if self.is_online() {
            self.spawn_flush(FlushTarget::Only(QueueKind::Metrics));
        }
    }

    /// React to a host notification.
    pub fn handle_signal(&self, signal: &HostSignal) {
        match signal {
            HostSignal::ConnectivityRestored => {
                self.inner.online.store(true, Ordering::SeqCst);
                info!(session_id = %self.inner.session_id, "connectivity restored, flushing");
                self.spawn_flush(FlushTarget::Both);
            }
            HostSignal::ConnectivityLost => {
                self.inner.online.store(false, Ordering::SeqCst);
                info!(session_id = %self.inner.session_id, "connectivity lost, holding telemetry");
            }
            HostSignal::UncaughtError { message, stack } => {
                let report = ErrorReport {
                    message: message.clone(),
                    stack: stack.clone(),
                };
                self.capture_error(report, Some(serde_json::json!({"type": "unhandled_error"})));
            }
            HostSignal::UnhandledRejection { reason } => {
                self.capture_error(
                    reason.as_str(),
                    Some(serde_json::json!({"type": "unhandled_rejection"})),
                );
            }
        }
    }

    /// Periodic tick: flush both queues if we believe we are online.
    pub fn on_tick(&self) {
        if self.is_online() {
            self.spawn_flush(FlushTarget::Both);
        } else {
            debug!(session_id = %self.inner.session_id, "offline, skipping periodic flush");
        }
    }

    /// Attempt both queues and report once both have been tried.
    pub async fn flush(&self) -> FlushReport {
        let (errors, metrics) = tokio::join!(self.flush_errors(), self.flush_metrics());
        FlushReport { errors, metrics }
    }

    pub async fn flush_errors(&self) -> Result<usize, TransportError> {
        let batch = self.inner.errors.detach();
        if batch.is_empty() {
            return Ok(0);
        }
        let result = self.inner.collector.send_errors(&batch).await;
        self.settle_batch(QueueKind::Errors, &self.inner.errors, batch, result)
    }

    pub async fn flush_metrics(&self) -> Result<usize, TransportError> {
        let batch = self.inner.metrics.detach();
        if batch.is_empty() {
            return Ok(0);
        }
        let result = self.inner.collector.send_metrics(&batch).await;
        self.settle_batch(QueueKind::Metrics, &self.inner.metrics, batch, result)
    }

    /// Wait for every flush spawned so far by captures, signals or ticks.
    pub async fn settle(&self) {
        let tracker = &self.inner.in_flight;
        tracker.close();
        tracker.wait().await;
        tracker.reopen();
    }

    pub fn queue_sizes(&self) -> QueueSizes {
        QueueSizes {
            errors: self.inner.errors.len(),
            metrics: self.inner.metrics.len(),
        }
    }

    pub fn stats(&self) -> BufferStats {
        BufferStats {
            errors: self.inner.error_counters.snapshot(),
            metrics: self.inner.metric_counters.snapshot(),
        }
    }

    fn counters(&self, kind: QueueKind) -> &QueueCounters {
        match kind {
            QueueKind::Errors => &self.inner.error_counters,
            QueueKind::Metrics => &self.inner.metric_counters,
        }
    }

    fn record_capture(&self, kind: QueueKind, dropped: usize) {
        let counters = self.counters(kind);
        counters.captured.fetch_add(1, Ordering::Relaxed);
        self.record_dropped(kind, dropped);
    }

    fn record_dropped(&self, kind: QueueKind, dropped: usize) {
        if dropped == 0 {
            return;
        }
        self.counters(kind)
            .dropped
            .fetch_add(dropped as u64, Ordering::Relaxed);
        debug!(
            session_id = %self.inner.session_id,
            queue = %kind,
            dropped,
            "queue bound reached, dropped oldest events"
        );
    }

    fn settle_batch<T>(
        &self,
        kind: QueueKind,
        queue: &EventQueue<T>,
        batch: Vec<T>,
        result: Result<(), TransportError>,
    ) -> Result<usize, TransportError> {
        let count = batch.len();
        let counters = self.counters(kind);
        match result {
            Ok(()) => {
                counters.delivered.fetch_add(count as u64, Ordering::Relaxed);
                debug!(
                    session_id = %self.inner.session_id,
                    queue = %kind,
                    count,
                    "telemetry batch delivered"
                );
                Ok(count)
            }
            Err(e) => {
                counters.failed_flushes.fetch_add(1, Ordering::Relaxed);
                let dropped = queue.restore(batch);
                self.record_dropped(kind, dropped);
                warn!(
                    session_id = %self.inner.session_id,
                    queue = %kind,
                    count,
                    error_kind = e.error_kind(),
                    error = %e,
                    "telemetry flush failed, batch re-queued"
                );
                Err(e)
            }
        }
    }

    fn spawn_flush(&self, target: FlushTarget) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            debug!(session_id = %self.inner.session_id, "no async runtime, flush deferred");
            return;
        };
        let buffer = self.clone();
        self.inner.in_flight.spawn_on(
            async move {
                // Failures are already logged and re-queued by settle_batch.
                match target {
                    FlushTarget::Only(QueueKind::Errors) => {
                        let _ = buffer.flush_errors().await;
                    }
                    FlushTarget::Only(QueueKind::Metrics) => {
                        let _ = buffer.flush_metrics().await;
                    }
                    FlushTarget::Both => {
                        let _ = buffer.flush().await;
                    }
                }
            },
            &runtime,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::{DiagnosticQuery, SqliteDiagnosticLayer, SqliteDiagnosticSink};
    use crate::mock::{MockCollector, MockResponse};
    use larder_core::StaticHost;
    use tokio::sync::Notify;
    use tracing_subscriber::layer::SubscriberExt;

    fn buffer_with(mock: Arc<MockCollector>, online: bool) -> TelemetryBuffer {
        buffer_with_config(mock, online, BufferConfig::default())
    }

    fn buffer_with_config(
        mock: Arc<MockCollector>,
        online: bool,
        config: BufferConfig,
    ) -> TelemetryBuffer {
        let host = Arc::new(StaticHost::new("app://planner").with_online(online));
        TelemetryBuffer::new(config, mock, host)
    }

    #[tokio::test]
    async fn offline_captures_are_counted_exactly() {
        let mock = Arc::new(MockCollector::accepting());
        let buffer = buffer_with(mock.clone(), false);

        for i in 0..4 {
            buffer.capture_error(format!("error {i}"), None);
        }
        for i in 0..7 {
            buffer.capture_performance("render_ms", i as f64);
        }

        assert_eq!(buffer.queue_sizes(), QueueSizes { errors: 4, metrics: 7 });
        buffer.settle().await;
        assert_eq!(mock.call_count(), 0);
    }

    #[tokio::test]
    async fn captured_event_is_stamped() {
        let mock = Arc::new(MockCollector::accepting());
        let buffer = buffer_with(mock.clone(), false);

        buffer.capture_error(
            ErrorReport::new("save failed").with_stack("at save_recipe"),
            Some(serde_json::json!({"recipe": 12})),
        );
        buffer.flush().await;

        let batch = &mock.error_batches()[0];
        let event = &batch[0];
        assert_eq!(event.message, "save failed");
        assert_eq!(event.stack.as_deref(), Some("at save_recipe"));
        assert_eq!(event.url, "app://planner");
        assert!(event.client_info.starts_with("larder/"));
        assert_eq!(&event.session_id, buffer.session_id());
        assert_eq!(event.context, Some(serde_json::json!({"recipe": 12})));
        assert!(event.captured_at_ms > 0);
    }

    #[tokio::test]
    async fn successful_flush_empties_queues() {
        let mock = Arc::new(MockCollector::accepting());
        let buffer = buffer_with(mock.clone(), false);
        for _ in 0..5 {
            buffer.capture_error("boom", None);
        }
        buffer.capture_performance("ttfb_ms", 40.0);

        let report = buffer.flush().await;
        assert!(report.is_success());
        assert_eq!(report.delivered(), 6);
        assert_eq!(buffer.queue_sizes(), QueueSizes::default());
        assert_eq!(mock.error_batches()[0].len(), 5);
    }

    #[tokio::test]
    async fn empty_queues_are_not_sent() {
        let mock = Arc::new(MockCollector::accepting());
        let buffer = buffer_with(mock.clone(), true);
        let report = buffer.flush().await;
        assert_eq!(report.delivered(), 0);
        assert_eq!(mock.call_count(), 0);
    }

    #[tokio::test]
    async fn failed_flush_keeps_batch_and_later_captures() {
        let gate = Arc::new(Notify::new());
        let mock = Arc::new(MockCollector::new(vec![MockResponse::gated(
            gate.clone(),
            MockResponse::status(503),
        )]));
        let buffer = buffer_with(mock.clone(), false);
        buffer.capture_error("first", None);
        buffer.capture_error("second", None);

        let flushing = {
            let buffer = buffer.clone();
            tokio::spawn(async move { buffer.flush_errors().await })
        };
        mock.wait_for_calls(1).await;
        buffer.capture_error("third", None);
        assert_eq!(buffer.queue_sizes().errors, 1);

        gate.notify_one();
        assert!(flushing.await.unwrap().is_err());

        assert_eq!(buffer.queue_sizes().errors, 3);
        buffer.flush_errors().await.unwrap();
        let retried: Vec<String> = mock.error_batches()[1]
            .iter()
            .map(|e| e.message.clone())
            .collect();
        assert_eq!(retried, vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn captures_during_send_are_not_in_the_batch() {
        let gate = Arc::new(Notify::new());
        let mock = Arc::new(MockCollector::new(vec![MockResponse::gated(
            gate.clone(),
            MockResponse::Ok,
        )]));
        let buffer = buffer_with(mock.clone(), false);
        buffer.capture_performance("a", 1.0);
        buffer.capture_performance("b", 2.0);

        let flushing = {
            let buffer = buffer.clone();
            tokio::spawn(async move { buffer.flush_metrics().await })
        };
        mock.wait_for_calls(1).await;
        buffer.capture_performance("c", 3.0);
        gate.notify_one();

        assert_eq!(flushing.await.unwrap().unwrap(), 2);
        let sent: Vec<String> = mock.metric_batches()[0]
            .iter()
            .map(|e| e.metric_name.clone())
            .collect();
        assert_eq!(sent, vec!["a", "b"]);
        assert_eq!(buffer.queue_sizes().metrics, 1);
    }

    #[tokio::test]
    async fn user_id_only_stamps_later_events() {
        let mock = Arc::new(MockCollector::accepting());
        let buffer = buffer_with(mock.clone(), false);

        buffer.capture_error("before", None);
        buffer.set_user_id("user_42");
        buffer.capture_error("after", None);
        buffer.flush().await;

        let batch = &mock.error_batches()[0];
        assert_eq!(batch[0].user_id, None);
        assert_eq!(batch[1].user_id.as_deref(), Some("user_42"));
    }

    #[tokio::test]
    async fn logout_retains_user_id_by_default() {
        let mock = Arc::new(MockCollector::accepting());
        let buffer = buffer_with(mock.clone(), false);
        buffer.set_user_id("user_1");
        buffer.on_logout();
        buffer.capture_performance("after_logout", 1.0);
        buffer.flush().await;

        assert_eq!(buffer.user_id().as_deref(), Some("user_1"));
        assert_eq!(mock.metric_batches()[0][0].user_id.as_deref(), Some("user_1"));
    }

    #[tokio::test]
    async fn logout_clears_user_id_when_configured() {
        let mock = Arc::new(MockCollector::accepting());
        let config = BufferConfig {
            user_id_policy: UserIdPolicy::ClearOnLogout,
            ..Default::default()
        };
        let buffer = buffer_with_config(mock.clone(), false, config);
        buffer.set_user_id("user_1");
        buffer.on_logout();
        buffer.capture_performance("after_logout", 1.0);
        buffer.flush().await;

        assert_eq!(buffer.user_id(), None);
        assert_eq!(mock.metric_batches()[0][0].user_id, None);
    }

    #[tokio::test]
    async fn clear_user_id_is_explicit() {
        let mock = Arc::new(MockCollector::accepting());
        let buffer = buffer_with(mock, false);
        buffer.set_user_id("user_1");
        buffer.clear_user_id();
        assert_eq!(buffer.user_id(), None);
    }

    #[tokio::test]
    async fn going_online_flushes_offline_backlog() {
        let mock = Arc::new(MockCollector::accepting());
        let buffer = buffer_with(mock.clone(), false);
        for _ in 0..3 {
            buffer.capture_error("offline failure", None);
        }
        assert_eq!(buffer.queue_sizes().errors, 3);

        buffer.handle_signal(&HostSignal::ConnectivityRestored);
        buffer.settle().await;

        assert!(buffer.is_online());
        assert_eq!(buffer.queue_sizes().errors, 0);
        assert_eq!(mock.error_batches()[0].len(), 3);
    }

    #[tokio::test]
    async fn going_offline_stops_opportunistic_flush() {
        let mock = Arc::new(MockCollector::accepting());
        let buffer = buffer_with(mock.clone(), true);
        buffer.handle_signal(&HostSignal::ConnectivityLost);
        buffer.capture_error("while offline", None);
        buffer.settle().await;

        assert!(!buffer.is_online());
        assert_eq!(mock.call_count(), 0);
        assert_eq!(buffer.queue_sizes().errors, 1);
    }

    #[tokio::test]
    async fn capture_while_online_flushes_immediately() {
        let mock = Arc::new(MockCollector::accepting());
        let buffer = buffer_with(mock.clone(), true);
        buffer.capture_error("online failure", None);
        buffer.settle().await;

        assert_eq!(mock.error_batches().len(), 1);
        assert_eq!(buffer.queue_sizes().errors, 0);
        assert_eq!(buffer.stats().errors.delivered, 1);
    }

    #[tokio::test]
    async fn rejected_metric_stays_queued_and_is_logged() {
        let sink = Arc::new(SqliteDiagnosticSink::in_memory().unwrap());
        let subscriber =
            tracing_subscriber::registry().with(SqliteDiagnosticLayer::new(sink.clone()));
        let _guard = tracing::subscriber::set_default(subscriber);

        let mock = Arc::new(MockCollector::rejecting(500));
        let buffer = buffer_with(mock.clone(), true);
        buffer.capture_performance("page_load_ms", 950.0);
        buffer.settle().await;

        assert_eq!(mock.call_count(), 1);
        assert_eq!(buffer.queue_sizes().metrics, 1);

        let report = buffer.flush().await;
        assert_eq!(report.metrics.unwrap_err().status(), Some(500));
        assert_eq!(buffer.queue_sizes().metrics, 1);
        assert_eq!(buffer.stats().metrics.failed_flushes, 2);

        let session_id = buffer.session_id().to_string();
        let failures = sink.flush_failures(Some(&session_id), 10).unwrap();
        assert_eq!(failures.len(), 2);
        assert!(failures.iter().all(|f| f.queue == QueueKind::Metrics));
        assert_eq!(failures[0].batch_len, 1);
        assert!(failures[0].error.as_deref().unwrap().contains("500"));

        let logged = sink
            .query(&DiagnosticQuery {
                target: Some("larder_telemetry::buffer".into()),
                queue: Some(QueueKind::Metrics),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(logged[0].message, "telemetry flush failed, batch re-queued");
    }

    #[tokio::test]
    async fn queues_flush_independently() {
        let mock = Arc::new(MockCollector::new(vec![MockResponse::status(502)]));
        let buffer = buffer_with(mock.clone(), false);
        buffer.capture_error("e", None);
        buffer.capture_performance("m", 1.0);

        // Errors are sent first within the join, so they take the scripted 502.
        let report = buffer.flush().await;
        assert!(report.errors.is_err());
        assert_eq!(report.metrics.unwrap(), 1);
        assert_eq!(buffer.queue_sizes(), QueueSizes { errors: 1, metrics: 0 });
    }

    #[tokio::test]
    async fn queue_bound_drops_oldest() {
        let mock = Arc::new(MockCollector::accepting());
        let config = BufferConfig {
            max_queue_len: Some(2),
            ..Default::default()
        };
        let buffer = buffer_with_config(mock.clone(), false, config);
        for name in ["one", "two", "three"] {
            buffer.capture_error(name, None);
        }

        assert_eq!(buffer.queue_sizes().errors, 2);
        assert_eq!(buffer.stats().errors.dropped, 1);
        assert_eq!(buffer.stats().errors.captured, 3);

        buffer.flush().await;
        let sent: Vec<String> = mock.error_batches()[0]
            .iter()
            .map(|e| e.message.clone())
            .collect();
        assert_eq!(sent, vec!["two", "three"]);
    }

    #[tokio::test]
    async fn unbounded_queue_keeps_everything() {
        let mock = Arc::new(MockCollector::accepting());
        let config = BufferConfig {
            max_queue_len: None,
            ..Default::default()
        };
        let buffer = buffer_with_config(mock, false, config);
        for _ in 0..2500 {
            buffer.capture_performance("tick", 1.0);
        }
        assert_eq!(buffer.queue_sizes().metrics, 2500);
        assert_eq!(buffer.stats().metrics.dropped, 0);
    }

    #[tokio::test]
    async fn unhandled_signals_are_captured_with_context() {
        let mock = Arc::new(MockCollector::accepting());
        let buffer = buffer_with(mock.clone(), false);

        buffer.handle_signal(&HostSignal::UncaughtError {
            message: "index out of bounds".into(),
            stack: Some("at src/planner.rs:10:5".into()),
        });
        buffer.handle_signal(&HostSignal::UnhandledRejection {
            reason: "meal_sync: timeout".into(),
        });
        buffer.flush().await;

        let batch = &mock.error_batches()[0];
        assert_eq!(batch[0].message, "index out of bounds");
        assert_eq!(batch[0].stack.as_deref(), Some("at src/planner.rs:10:5"));
        assert_eq!(batch[0].context.as_ref().unwrap()["type"], "unhandled_error");
        assert_eq!(batch[1].message, "meal_sync: timeout");
        assert_eq!(batch[1].context.as_ref().unwrap()["type"], "unhandled_rejection");
    }

    #[tokio::test]
    async fn tick_flushes_only_while_online() {
        let mock = Arc::new(MockCollector::accepting());
        let buffer = buffer_with(mock.clone(), false);
        buffer.capture_error("queued", None);

        buffer.on_tick();
        buffer.settle().await;
        assert_eq!(mock.call_count(), 0);

        buffer.inner.online.store(true, Ordering::SeqCst);
        buffer.on_tick();
        buffer.settle().await;
        assert_eq!(mock.call_count(), 1);
        assert_eq!(buffer.queue_sizes().errors, 0);
    }

    #[test]
    fn capture_without_runtime_only_queues() {
        let mock = Arc::new(MockCollector::accepting());
        let buffer = buffer_with(mock.clone(), true);
        buffer.capture_error("no runtime", None);
        assert_eq!(buffer.queue_sizes().errors, 1);
        assert_eq!(mock.call_count(), 0);
    }

    #[tokio::test]
    async fn dev_mode_does_not_change_queueing() {
        let mock = Arc::new(MockCollector::accepting());
        let config = BufferConfig {
            dev_mode: true,
            ..Default::default()
        };
        let buffer = buffer_with_config(mock, false, config);
        buffer.capture_error("dev", None);
        buffer.capture_performance("dev_metric", 2.0);
        assert_eq!(buffer.queue_sizes(), QueueSizes { errors: 1, metrics: 1 });
    }
}
