use larder_core::HostSignals;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::buffer::{FlushReport, TelemetryBuffer};

/// Live registration of a buffer with the host: a signal listener and the
/// periodic flush ticker. Dropping it stops both.
pub struct Subscription {
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl Subscription {
    pub fn is_active(&self) -> bool {
        !self.cancel.is_cancelled()
    }

    /// Stop listening and wait for the listener and ticker to exit.
    pub async fn unsubscribe(mut self) {
        self.cancel.cancel();
        for task in self.tasks.drain(..) {
            let _ = task.await;
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl TelemetryBuffer {
    /// Register with the host's signals and start the periodic flush.
    ///
    /// Must be called from within a tokio runtime.
    pub fn subscribe(&self, signals: &HostSignals) -> Subscription {
        let cancel = CancellationToken::new();

        let listener = {
            let buffer = self.clone();
            let cancel = cancel.clone();
            let mut rx = signals.subscribe();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        received = rx.recv() => match received {
                            Ok(signal) => buffer.handle_signal(&signal),
                            Err(RecvError::Lagged(skipped)) => {
                                warn!(
                                    session_id = %buffer.session_id(),
                                    skipped,
                                    "host signal listener lagged"
                                );
                            }
                            Err(RecvError::Closed) => break,
                        },
                    }
                }
                debug!(session_id = %buffer.session_id(), "host signal listener stopped");
            })
        };

        let ticker = {
            let buffer = self.clone();
            let cancel = cancel.clone();
            let period = self.config().flush_interval;
            tokio::spawn(async move {
                let mut interval = tokio::time::interval_at(Instant::now() + period, period);
                interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = interval.tick() => buffer.on_tick(),
                    }
                }
            })
        };

        info!(
            session_id = %self.session_id(),
            flush_interval_secs = self.config().flush_interval.as_secs(),
            "telemetry subscribed to host signals"
        );

        Subscription {
            cancel,
            tasks: vec![listener, ticker],
        }
    }

    /// Unsubscribe, let in-flight flushes finish, then make one last attempt
    /// at both queues regardless of connectivity.
    pub async fn shutdown(&self, subscription: Subscription) -> FlushReport {
        subscription.unsubscribe().await;
        self.settle().await;
        let report = self.flush().await;
        let remaining = self.queue_sizes();
        if report.is_success() {
            info!(
                session_id = %self.session_id(),
                delivered = report.delivered(),
                "telemetry shut down"
            );
        } else {
            warn!(
                session_id = %self.session_id(),
                errors_left = remaining.errors,
                metrics_left = remaining.metrics,
                "telemetry shut down with undelivered events"
            );
        }
        report
    }
}
