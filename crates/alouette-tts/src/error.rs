//! Error types for the Alouette synthesis pipeline.

/// Result type alias for pipeline operations
pub type AlouetteResult<T> = Result<T, AlouetteError>;

/// Main error type for Alouette synthesis operations
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum AlouetteError {
    /// Speech synthesis failed
    #[error("Speech synthesis failed: {message}")]
    SynthesisError {
        /// Error message describing the failure
        message: String,
    },

    /// Request or batch validation failed
    #[error("Validation failed: {message}")]
    ValidationError {
        /// Error message describing the invalid input
        message: String,
    },

    /// Operation exceeded its deadline
    #[error("Operation timed out: {message}")]
    TimeoutError {
        /// Error message describing the timeout
        message: String,
    },

    /// Network or connection error
    #[error("Network error: {message}")]
    NetworkError {
        /// Error message describing the network issue
        message: String,
    },

    /// Memory allocation or pressure error
    #[error("Memory allocation error: {message}")]
    MemoryError {
        /// Error message describing the memory issue
        message: String,
    },

    /// Requested voice is unknown to the backend
    #[error("Voice '{voice_id}' not found")]
    VoiceNotFound {
        /// The voice ID that was not found
        voice_id: String,
    },

    /// The backend is not usable on the current platform
    #[error("Platform engine unavailable: {message}")]
    PlatformUnsupported {
        /// Error message describing the platform issue
        message: String,
    },

    /// Backend rejected the credentials
    #[error("Authentication failed: {message}")]
    AuthenticationError {
        /// Error message describing the authentication failure
        message: String,
    },

    /// Synthesis configuration the backend cannot honor
    #[error("Unsupported synthesis configuration: {message}")]
    UnsupportedConfig {
        /// Error message describing the configuration issue
        message: String,
    },

    /// Voice discovery failed
    #[error("Voice discovery failed: {message}")]
    DiscoveryError {
        /// Error message describing the discovery failure
        message: String,
    },

    /// File I/O error
    #[error("File I/O error: {message}")]
    FileError {
        /// Error message describing the file operation failure
        message: String,
    },

    /// Operation was cancelled cooperatively
    #[error("Operation cancelled: {message}")]
    Cancelled {
        /// Error message describing what was cancelled
        message: String,
    },
}

impl AlouetteError {
    /// Create a new synthesis error
    #[must_use]
    pub fn synthesis<S: Into<String>>(message: S) -> Self {
        Self::SynthesisError {
            message: message.into(),
        }
    }

    /// Create a new validation error
    #[must_use]
    pub fn validation<S: Into<String>>(message: S) -> Self {
        Self::ValidationError {
            message: message.into(),
        }
    }

    /// Create a new timeout error
    #[must_use]
    pub fn timeout<S: Into<String>>(message: S) -> Self {
        Self::TimeoutError {
            message: message.into(),
        }
    }

    /// Create a new network error
    #[must_use]
    pub fn network<S: Into<String>>(message: S) -> Self {
        Self::NetworkError {
            message: message.into(),
        }
    }

    /// Create a new memory error
    #[must_use]
    pub fn memory<S: Into<String>>(message: S) -> Self {
        Self::MemoryError {
            message: message.into(),
        }
    }

    /// Create a new voice not found error
    #[must_use]
    pub fn voice_not_found<S: Into<String>>(voice_id: S) -> Self {
        Self::VoiceNotFound {
            voice_id: voice_id.into(),
        }
    }

    /// Create a new platform unsupported error
    #[must_use]
    pub fn platform_unsupported<S: Into<String>>(message: S) -> Self {
        Self::PlatformUnsupported {
            message: message.into(),
        }
    }

    /// Create a new authentication error
    #[must_use]
    pub fn authentication<S: Into<String>>(message: S) -> Self {
        Self::AuthenticationError {
            message: message.into(),
        }
    }

    /// Create a new unsupported configuration error
    #[must_use]
    pub fn unsupported_config<S: Into<String>>(message: S) -> Self {
        Self::UnsupportedConfig {
            message: message.into(),
        }
    }

    /// Create a new voice discovery error
    #[must_use]
    pub fn discovery<S: Into<String>>(message: S) -> Self {
        Self::DiscoveryError {
            message: message.into(),
        }
    }

    /// Create a new file error
    #[must_use]
    pub fn file<S: Into<String>>(message: S) -> Self {
        Self::FileError {
            message: message.into(),
        }
    }

    /// Create a new cancellation error
    #[must_use]
    pub fn cancelled<S: Into<String>>(message: S) -> Self {
        Self::Cancelled {
            message: message.into(),
        }
    }

    /// Check if this error is worth retrying against the same backend
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::NetworkError { .. } | Self::TimeoutError { .. } | Self::MemoryError { .. }
        )
    }

    /// Check if this error should trigger the voice fallback chain
    #[must_use]
    pub const fn triggers_voice_fallback(&self) -> bool {
        matches!(self, Self::VoiceNotFound { .. })
    }

    /// Check if an alternate backend could plausibly recover from this error
    #[must_use]
    pub const fn triggers_platform_fallback(&self) -> bool {
        matches!(self, Self::PlatformUnsupported { .. }) || self.is_retryable()
    }

    /// Check if this error terminates recovery immediately
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::ValidationError { .. }
                | Self::AuthenticationError { .. }
                | Self::UnsupportedConfig { .. }
                | Self::Cancelled { .. }
        )
    }

    /// Get the error category for logging/metrics
    #[must_use]
    pub const fn category(&self) -> &'static str {
        match self {
            Self::SynthesisError { .. } => "synthesis",
            Self::ValidationError { .. } => "validation",
            Self::TimeoutError { .. } => "timeout",
            Self::NetworkError { .. } => "network",
            Self::MemoryError { .. } => "memory",
            Self::VoiceNotFound { .. } => "voice",
            Self::PlatformUnsupported { .. } => "platform",
            Self::AuthenticationError { .. } => "authentication",
            Self::UnsupportedConfig { .. } => "configuration",
            Self::DiscoveryError { .. } => "discovery",
            Self::FileError { .. } => "file",
            Self::Cancelled { .. } => "cancelled",
        }
    }
}

// Convert from common error types
impl From<std::io::Error> for AlouetteError {
    fn from(err: std::io::Error) -> Self {
        Self::file(err.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for AlouetteError {
    fn from(err: tokio::time::error::Elapsed) -> Self {
        Self::timeout(format!("attempt deadline exceeded: {err}"))
    }
}

impl From<serde_json::Error> for AlouetteError {
    fn from(err: serde_json::Error) -> Self {
        Self::file(format!("JSON serialization error: {err}"))
    }
}

impl From<anyhow::Error> for AlouetteError {
    fn from(err: anyhow::Error) -> Self {
        Self::synthesis(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = AlouetteError::synthesis("Test synthesis error");
        assert_eq!(err.category(), "synthesis");
        assert!(!err.is_retryable());
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_error_display() {
        let err = AlouetteError::voice_not_found("fr_denise");
        assert_eq!(err.to_string(), "Voice 'fr_denise' not found");

        let err = AlouetteError::timeout("synthesize");
        assert_eq!(err.to_string(), "Operation timed out: synthesize");
    }

    #[test]
    fn test_error_categories() {
        assert_eq!(AlouetteError::synthesis("t").category(), "synthesis");
        assert_eq!(AlouetteError::validation("t").category(), "validation");
        assert_eq!(AlouetteError::timeout("t").category(), "timeout");
        assert_eq!(AlouetteError::network("t").category(), "network");
        assert_eq!(AlouetteError::memory("t").category(), "memory");
        assert_eq!(AlouetteError::voice_not_found("t").category(), "voice");
        assert_eq!(AlouetteError::platform_unsupported("t").category(), "platform");
        assert_eq!(AlouetteError::authentication("t").category(), "authentication");
        assert_eq!(AlouetteError::unsupported_config("t").category(), "configuration");
        assert_eq!(AlouetteError::discovery("t").category(), "discovery");
        assert_eq!(AlouetteError::file("t").category(), "file");
        assert_eq!(AlouetteError::cancelled("t").category(), "cancelled");
    }

    #[test]
    fn test_retryable_errors() {
        assert!(AlouetteError::network("t").is_retryable());
        assert!(AlouetteError::timeout("t").is_retryable());
        assert!(AlouetteError::memory("t").is_retryable());
        assert!(!AlouetteError::synthesis("t").is_retryable());
        assert!(!AlouetteError::voice_not_found("t").is_retryable());
        assert!(!AlouetteError::authentication("t").is_retryable());
    }

    #[test]
    fn test_fatal_errors() {
        assert!(AlouetteError::validation("t").is_fatal());
        assert!(AlouetteError::authentication("t").is_fatal());
        assert!(AlouetteError::unsupported_config("t").is_fatal());
        assert!(AlouetteError::cancelled("t").is_fatal());
        assert!(!AlouetteError::network("t").is_fatal());
        assert!(!AlouetteError::voice_not_found("t").is_fatal());
    }

    #[test]
    fn test_fallback_triggers() {
        assert!(AlouetteError::voice_not_found("v").triggers_voice_fallback());
        assert!(!AlouetteError::network("t").triggers_voice_fallback());

        assert!(AlouetteError::platform_unsupported("t").triggers_platform_fallback());
        assert!(AlouetteError::network("t").triggers_platform_fallback());
        assert!(AlouetteError::timeout("t").triggers_platform_fallback());
        assert!(!AlouetteError::authentication("t").triggers_platform_fallback());
        assert!(!AlouetteError::voice_not_found("t").triggers_platform_fallback());
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "File not found");
        let err = AlouetteError::from(io_err);
        assert!(matches!(err, AlouetteError::FileError { .. }));
    }

    #[test]
    fn test_from_anyhow_error() {
        let err = AlouetteError::from(anyhow::anyhow!("engine exploded"));
        assert!(matches!(err, AlouetteError::SynthesisError { .. }));
        assert!(err.to_string().contains("engine exploded"));
    }

    #[tokio::test]
    async fn test_from_elapsed() {
        let elapsed = tokio::time::timeout(
            std::time::Duration::from_millis(1),
            tokio::time::sleep(std::time::Duration::from_secs(5)),
        )
        .await
        .unwrap_err();
        let err = AlouetteError::from(elapsed);
        assert!(err.is_retryable());
        assert_eq!(err.category(), "timeout");
    }

    #[test]
    fn test_error_equality() {
        let err1 = AlouetteError::synthesis("test message");
        let err2 = AlouetteError::synthesis("test message");
        let err3 = AlouetteError::synthesis("different message");

        assert_eq!(err1, err2);
        assert_ne!(err1, err3);
    }

    #[test]
    fn test_error_clone() {
        let err1 = AlouetteError::voice_not_found("test_voice");
        let err2 = err1.clone();
        assert_eq!(err1, err2);
    }
}
