/// Failure to deliver a telemetry batch to the collector.
///
/// Every variant is recoverable: the batch goes back onto its queue and is
/// retried on the next flush trigger.
#[derive(Clone, Debug, thiserror::Error)]
pub enum TransportError {
    #[error("collector rejected batch with status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("network error: {0}")]
    Network(String),
    #[error("timeout: {0}")]
    Timeout(String),
    #[error("failed to encode batch: {0}")]
    Encode(String),
}

impl TransportError {
    /// Short classification string for logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Status { .. } => "status",
            Self::Network(_) => "network",
            Self::Timeout(_) => "timeout",
            Self::Encode(_) => "encode",
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_kind_strings() {
        assert_eq!(
            TransportError::Status { status: 500, body: String::new() }.error_kind(),
            "status"
        );
        assert_eq!(TransportError::Network("refused".into()).error_kind(), "network");
        assert_eq!(TransportError::Timeout("5s".into()).error_kind(), "timeout");
    }

    #[test]
    fn status_only_for_status_variant() {
        let err = TransportError::Status { status: 503, body: "down".into() };
        assert_eq!(err.status(), Some(503));
        assert_eq!(TransportError::Network("x".into()).status(), None);
    }

    #[test]
    fn display_includes_status_and_body() {
        let err = TransportError::Status { status: 500, body: "oops".into() };
        assert_eq!(err.to_string(), "collector rejected batch with status 500: oops");
    }
}
