//! Error types for roundtable.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RoundtableError {
    // Configuration errors
    #[error("Failed to parse configuration: {message}")]
    ConfigParse { message: String },

    #[error("Invalid configuration value for {key}: {message}")]
    ConfigInvalidValue { key: String, message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    // Streaming session errors
    #[error("Streaming connection failed: {message}")]
    Connect { message: String },

    #[error("Streaming transport error: {message}")]
    Transport { message: String },

    #[error("Streaming client is not connected")]
    NotConnected,

    #[error("Connection/upload timed out after {secs}s")]
    ConnectTimeout { secs: u64 },

    // Summary generation errors
    #[error("Generation request failed: {message}")]
    Generation { message: String },

    #[error("Malformed generation response: {message}")]
    MalformedResponse { message: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // Audio errors
    #[error("Audio format mismatch: expected {expected}, got {actual}")]
    AudioFormat { expected: String, actual: String },

    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),

    // Orchestration errors
    #[error("Unknown speaker: {id}")]
    UnknownSpeaker { id: String },

    #[error("Orchestrator is not running")]
    OrchestratorStopped,

    // General I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Generic error for cases not covered above
    #[error("{0}")]
    Other(String),
}

// Type alias for convenience
pub type Result<T> = std::result::Result<T, RoundtableError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_config_invalid_value_display() {
        let error = RoundtableError::ConfigInvalidValue {
            key: "orchestration.lru_fraction".to_string(),
            message: "must be in (0, 1]".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Invalid configuration value for orchestration.lru_fraction: must be in (0, 1]"
        );
    }

    #[test]
    fn test_connect_display() {
        let error = RoundtableError::Connect {
            message: "handshake refused".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Streaming connection failed: handshake refused"
        );
    }

    #[test]
    fn test_connect_timeout_display() {
        let error = RoundtableError::ConnectTimeout { secs: 120 };
        assert_eq!(error.to_string(), "Connection/upload timed out after 120s");
    }

    #[test]
    fn test_not_connected_display() {
        assert_eq!(
            RoundtableError::NotConnected.to_string(),
            "Streaming client is not connected"
        );
    }

    #[test]
    fn test_malformed_response_display() {
        let error = RoundtableError::MalformedResponse {
            message: "missing newFragmentSummary".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Malformed generation response: missing newFragmentSummary"
        );
    }

    #[test]
    fn test_unknown_speaker_display() {
        let error = RoundtableError::UnknownSpeaker {
            id: "trotsky".to_string(),
        };
        assert_eq!(error.to_string(), "Unknown speaker: trotsky");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_error = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let error: RoundtableError = io_error.into();
        assert!(matches!(error, RoundtableError::Io(_)));
        assert!(error.to_string().starts_with("I/O error:"));
    }

    #[test]
    fn test_json_error_conversion() {
        let json_error = serde_json::from_str::<serde_json::Value>("{not json")
            .err()
            .map(RoundtableError::from);
        assert!(matches!(json_error, Some(RoundtableError::Json(_))));
    }

    #[test]
    fn test_toml_error_conversion() {
        let toml_error = toml::from_str::<toml::Value>("= nope")
            .err()
            .map(RoundtableError::from);
        assert!(matches!(toml_error, Some(RoundtableError::Config(_))));
    }

    #[test]
    fn test_other_display() {
        let error = RoundtableError::Other("custom".to_string());
        assert_eq!(error.to_string(), "custom");
    }

    #[test]
    fn test_result_alias() {
        fn returns_err() -> Result<()> {
            Err(RoundtableError::OrchestratorStopped)
        }
        assert!(returns_err().is_err());
    }
}
