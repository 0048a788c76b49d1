use std::time::Duration;

use async_trait::async_trait;
use larder_core::{ErrorEvent, PerformanceEvent, TransportError};
use serde::Serialize;

/// Remote endpoint that accepts batched telemetry.
#[async_trait]
pub trait Collector: Send + Sync {
    async fn send_errors(&self, batch: &[ErrorEvent]) -> Result<(), TransportError>;
    async fn send_metrics(&self, batch: &[PerformanceEvent]) -> Result<(), TransportError>;
}

/// Endpoints and transport limits for [`HttpCollector`].
#[derive(Clone, Debug)]
pub struct HttpCollectorConfig {
    pub errors_url: String,
    pub metrics_url: String,
    /// Applied per request. The buffer itself never times out a send.
    pub timeout: Option<Duration>,
}

/// POSTs `{"errors": [...]}` and `{"metrics": [...]}` as JSON.
pub struct HttpCollector {
    client: reqwest::Client,
    config: HttpCollectorConfig,
}

#[derive(Serialize)]
struct ErrorsBody<'a> {
    errors: &'a [ErrorEvent],
}

#[derive(Serialize)]
struct MetricsBody<'a> {
    metrics: &'a [PerformanceEvent],
}

impl HttpCollector {
    pub fn new(config: HttpCollectorConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    async fn post<B: Serialize + ?Sized>(&self, url: &str, body: &B) -> Result<(), TransportError> {
        let mut request = self.client.post(url).json(body);
        if let Some(timeout) = self.config.timeout {
            request = request.timeout(timeout);
        }

        let resp = request.send().await.map_err(classify)?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(TransportError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Collector for HttpCollector {
    async fn send_errors(&self, batch: &[ErrorEvent]) -> Result<(), TransportError> {
        self.post(&self.config.errors_url, &ErrorsBody { errors: batch })
            .await
    }

    async fn send_metrics(&self, batch: &[PerformanceEvent]) -> Result<(), TransportError> {
        self.post(&self.config.metrics_url, &MetricsBody { metrics: batch })
            .await
    }
}

fn classify(e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout(e.to_string())
    } else if e.is_builder() {
        TransportError::Encode(e.to_string())
    } else {
        TransportError::Network(e.to_string())
    }
}
