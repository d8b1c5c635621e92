use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadKind {
    Logs,
    Rum,
    Replay,
}

impl fmt::Display for PayloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PayloadKind::Logs => "logs",
            PayloadKind::Rum => "rum",
            PayloadKind::Replay => "replay",
        })
    }
}

/// Failures detected inside the engine. None of them reach the caller of
/// `add`/`flush`: they terminate at the point of detection and are handed to
/// the self-monitoring collaborator.
#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Discarded a {kind} message of {size} bytes (limit: {limit} bytes)")]
    OversizedMessage {
        kind: PayloadKind,
        size: usize,
        limit: usize,
    },
    #[error("Failed to send {kind} payload to {endpoint}: {reason}")]
    SendFailure {
        kind: PayloadKind,
        endpoint: String,
        reason: String,
    },
    #[error("Failed to serialize {kind} message: {source}")]
    Serialization {
        kind: PayloadKind,
        #[source]
        source: serde_json::Error,
    },
    #[error("Failed to encode replay segment: {0}")]
    SegmentEncoding(String),
}

impl TelemetryError {
    pub fn kind(&self) -> PayloadKind {
        match self {
            TelemetryError::OversizedMessage { kind, .. }
            | TelemetryError::SendFailure { kind, .. }
            | TelemetryError::Serialization { kind, .. } => *kind,
            TelemetryError::SegmentEncoding(_) => PayloadKind::Replay,
        }
    }

    pub fn is_send_failure(&self) -> bool {
        matches!(self, TelemetryError::SendFailure { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let error = TelemetryError::OversizedMessage {
            kind: PayloadKind::Logs,
            size: 300,
            limit: 256,
        };
        assert_eq!(
            error.to_string(),
            "Discarded a logs message of 300 bytes (limit: 256 bytes)"
        );
        assert_eq!(error.kind(), PayloadKind::Logs);

        let error = TelemetryError::SegmentEncoding("broken pipe".to_string());
        assert_eq!(error.kind(), PayloadKind::Replay);
        assert!(!error.is_send_failure());
    }
}
