//! Batch requests, per-request results, and batch configuration.

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::backend::{AudioData, SynthesisOptions};
use crate::error::{AlouetteError, AlouetteResult};

/// One text-to-speech request inside a batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynthesisRequest {
    /// Caller-assigned identifier, unique within the batch
    pub id: String,
    /// Text to synthesize
    pub text: String,
    /// Requested voice identifier
    pub voice_id: String,
    /// BCP 47 language tag, used when a fallback voice must be chosen
    pub language: String,
    /// Prosody and format options
    pub options: SynthesisOptions,
    /// Where to write the audio. `None` keeps it in memory.
    pub output_path: Option<PathBuf>,
}

impl SynthesisRequest {
    /// Create a request with default options and no output file
    pub fn new<S: Into<String>>(id: S, text: S, voice_id: S, language: S) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            voice_id: voice_id.into(),
            language: language.into(),
            options: SynthesisOptions::default(),
            output_path: None,
        }
    }

    /// Create a request with a generated unique ID
    pub fn with_generated_id<S: Into<String>>(text: S, voice_id: S, language: S) -> Self {
        Self::new(
            uuid::Uuid::new_v4().to_string(),
            text.into(),
            voice_id.into(),
            language.into(),
        )
    }

    /// Set synthesis options
    #[must_use]
    pub fn with_options(mut self, options: SynthesisOptions) -> Self {
        self.options = options;
        self
    }

    /// Treat the text as SSML markup
    #[must_use]
    pub fn with_ssml(mut self, ssml: bool) -> Self {
        self.options.ssml = ssml;
        self
    }

    /// Write the synthesized audio to `path`
    #[must_use]
    pub fn with_output_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.output_path = Some(path.into());
        self
    }

    /// Validate request fields
    ///
    /// # Errors
    ///
    /// Returns `ValidationError` if any field is empty, the text exceeds
    /// the length ceiling, or the options are out of range.
    pub fn validate(&self) -> AlouetteResult<()> {
        if self.id.is_empty() {
            return Err(AlouetteError::validation("Request ID cannot be empty"));
        }
        if self.text.trim().is_empty() {
            return Err(AlouetteError::validation(format!(
                "Request '{}' has empty text",
                self.id
            )));
        }
        if self.text.len() > crate::MAX_TEXT_LENGTH {
            return Err(AlouetteError::validation(format!(
                "Request '{}' text length {} exceeds maximum {}",
                self.id,
                self.text.len(),
                crate::MAX_TEXT_LENGTH
            )));
        }
        if self.voice_id.is_empty() {
            return Err(AlouetteError::validation(format!(
                "Request '{}' has no voice ID",
                self.id
            )));
        }
        if self.language.is_empty() {
            return Err(AlouetteError::validation(format!(
                "Request '{}' has no language",
                self.id
            )));
        }
        self.options.validate()
    }
}

/// Configuration for one batch run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Maximum simultaneous synthesis calls
    pub max_concurrency: usize,
    /// Deadline for one request end to end, covering every retry and
    /// fallback attempt
    pub request_timeout: Duration,
    /// Audio bytes the batch may hold before the tracker is reset
    /// between chunks
    pub max_memory_bytes: usize,
    /// Dispatch shorter texts first
    pub sort_by_priority: bool,
    /// Dispatch requests sharing synthesis options back to back
    pub group_by_options: bool,
    /// Whether failed requests get a second pass after the main run
    pub enable_retry_pass: bool,
    /// Pause before the retry pass starts
    pub retry_pass_delay: Duration,
    /// Retry budget per request during the retry pass
    pub retry_pass_max_retries: u32,
    /// Abort the batch once this many requests have failed.
    /// `None` disables short-circuiting.
    pub short_circuit_threshold: Option<usize>,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_concurrency: crate::DEFAULT_MAX_CONCURRENCY,
            request_timeout: Duration::from_secs(300),
            max_memory_bytes: 512 * 1024 * 1024,
            sort_by_priority: false,
            group_by_options: false,
            enable_retry_pass: true,
            retry_pass_delay: Duration::from_secs(2),
            retry_pass_max_retries: 1,
            short_circuit_threshold: None,
        }
    }
}

impl BatchConfig {
    /// Create a config with defaults
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the concurrency ceiling
    #[must_use]
    pub const fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency;
        self
    }

    /// Set the end-to-end deadline for one request
    #[must_use]
    pub const fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the audio byte ceiling tracked across chunks
    #[must_use]
    pub const fn with_max_memory_bytes(mut self, bytes: usize) -> Self {
        self.max_memory_bytes = bytes;
        self
    }

    /// Dispatch shorter texts first
    #[must_use]
    pub const fn with_sort_by_priority(mut self, enabled: bool) -> Self {
        self.sort_by_priority = enabled;
        self
    }

    /// Group requests by synthesis options before dispatch
    #[must_use]
    pub const fn with_group_by_options(mut self, enabled: bool) -> Self {
        self.group_by_options = enabled;
        self
    }

    /// Enable or disable the retry pass
    #[must_use]
    pub const fn with_retry_pass(mut self, enabled: bool) -> Self {
        self.enable_retry_pass = enabled;
        self
    }

    /// Set the delay before the retry pass
    #[must_use]
    pub const fn with_retry_pass_delay(mut self, delay: Duration) -> Self {
        self.retry_pass_delay = delay;
        self
    }

    /// Set the retry budget used during the retry pass
    #[must_use]
    pub const fn with_retry_pass_max_retries(mut self, retries: u32) -> Self {
        self.retry_pass_max_retries = retries;
        self
    }

    /// Abort the batch after `failures` failed requests
    #[must_use]
    pub const fn with_short_circuit_threshold(mut self, failures: usize) -> Self {
        self.short_circuit_threshold = Some(failures);
        self
    }

    /// Number of requests dispatched per chunk
    #[must_use]
    pub const fn chunk_size(&self) -> usize {
        self.max_concurrency * crate::CHUNK_SIZE_FACTOR
    }

    /// Validate configuration parameters
    ///
    /// # Errors
    ///
    /// Returns `ValidationError` if the concurrency, timeout, memory
    /// ceiling, or threshold is zero.
    pub fn validate(&self) -> AlouetteResult<()> {
        if self.max_concurrency == 0 {
            return Err(AlouetteError::validation(
                "max_concurrency must be at least 1",
            ));
        }
        if self.request_timeout.is_zero() {
            return Err(AlouetteError::validation(
                "request_timeout must be non-zero",
            ));
        }
        if self.max_memory_bytes == 0 {
            return Err(AlouetteError::validation(
                "max_memory_bytes must be at least 1",
            ));
        }
        if self.short_circuit_threshold == Some(0) {
            return Err(AlouetteError::validation(
                "short_circuit_threshold must be at least 1",
            ));
        }
        Ok(())
    }
}

/// Outcome of one request after recovery ran its course
#[derive(Debug, Clone)]
pub struct SynthesisResult {
    /// ID of the request this result belongs to
    pub request_id: String,
    /// Synthesized audio, present on success
    pub audio: Option<AudioData>,
    /// File the audio was written to, when the request asked for one
    pub output_path: Option<PathBuf>,
    /// Voice that actually produced the audio, after any fallback
    pub used_voice: Option<String>,
    /// Whether a fallback voice was substituted for the requested one
    pub voice_substituted: bool,
    /// Backend that actually produced the audio, after any fallback
    pub backend: Option<String>,
    /// Whether the audio came from the cache without a backend call
    pub from_cache: bool,
    /// Synthesis attempts consumed, 0 for a pure cache hit
    pub attempts: u32,
    /// Wall time spent on this request
    pub elapsed: Duration,
    /// When the outcome was recorded
    pub timestamp: DateTime<Utc>,
    /// Final error, present on failure
    pub error: Option<AlouetteError>,
}

impl SynthesisResult {
    /// Whether this request produced audio
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// Category of the final error, if any
    #[must_use]
    pub fn error_category(&self) -> Option<&'static str> {
        self.error.as_ref().map(AlouetteError::category)
    }

    /// Build a failure result carrying the final error
    #[must_use]
    pub fn failure(request_id: String, error: AlouetteError, attempts: u32, elapsed: Duration) -> Self {
        Self {
            request_id,
            audio: None,
            output_path: None,
            used_voice: None,
            voice_substituted: false,
            backend: None,
            from_cache: false,
            attempts,
            elapsed,
            timestamp: Utc::now(),
            error: Some(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn request() -> SynthesisRequest {
        SynthesisRequest::new("r1", "Bonjour tout le monde", "fr_denise", "fr-FR")
    }

    #[test]
    fn test_generated_ids_are_unique() {
        let a = SynthesisRequest::with_generated_id("text", "fr_denise", "fr-FR");
        let b = SynthesisRequest::with_generated_id("text", "fr_denise", "fr-FR");
        assert_ne!(a.id, b.id);
        assert!(a.validate().is_ok());
    }

    #[test]
    fn test_request_validation_ok() {
        assert!(request().validate().is_ok());
    }

    #[test]
    fn test_request_validation_rejects_empty_fields() {
        let mut r = request();
        r.id = String::new();
        assert!(r.validate().is_err());

        let mut r = request();
        r.text = "   ".to_string();
        assert!(r.validate().is_err());

        let mut r = request();
        r.voice_id = String::new();
        assert!(r.validate().is_err());

        let mut r = request();
        r.language = String::new();
        assert!(r.validate().is_err());
    }

    #[test]
    fn test_request_validation_rejects_oversized_text() {
        let mut r = request();
        r.text = "a".repeat(crate::MAX_TEXT_LENGTH + 1);
        let err = r.validate().unwrap_err();
        assert_eq!(err.category(), "validation");
    }

    #[test]
    fn test_request_validation_checks_options() {
        let r = request().with_options(SynthesisOptions::new().with_rate(9.0));
        assert!(r.validate().is_err());
    }

    #[test]
    fn test_batch_config_defaults() {
        let config = BatchConfig::default();
        assert_eq!(config.max_concurrency, crate::DEFAULT_MAX_CONCURRENCY);
        assert!(config.enable_retry_pass);
        assert!(!config.sort_by_priority);
        assert!(!config.group_by_options);
        assert_eq!(config.chunk_size(), crate::DEFAULT_MAX_CONCURRENCY * 2);
        assert!(config.validate().is_ok());
    }

    #[rstest]
    #[case(0, false)]
    #[case(1, true)]
    #[case(4, true)]
    #[case(64, true)]
    fn test_batch_config_concurrency_bounds(#[case] max_concurrency: usize, #[case] ok: bool) {
        let config = BatchConfig::new().with_max_concurrency(max_concurrency);
        assert_eq!(config.validate().is_ok(), ok);
    }

    #[test]
    fn test_batch_config_validation() {
        assert!(BatchConfig::new()
            .with_short_circuit_threshold(0)
            .validate()
            .is_err());
        assert!(BatchConfig::new()
            .with_request_timeout(Duration::ZERO)
            .validate()
            .is_err());
        assert!(BatchConfig::new()
            .with_max_memory_bytes(0)
            .validate()
            .is_err());
        assert!(BatchConfig::new()
            .with_short_circuit_threshold(5)
            .validate()
            .is_ok());
    }

    #[test]
    fn test_ssml_flag_reaches_options() {
        let r = request().with_ssml(true);
        assert!(r.options.ssml);
        assert_ne!(
            r.options.fingerprint(),
            SynthesisOptions::default().fingerprint()
        );
    }

    #[test]
    fn test_result_helpers() {
        let failed = SynthesisResult::failure(
            "r1".to_string(),
            AlouetteError::network("connection reset"),
            3,
            Duration::from_millis(40),
        );
        assert!(!failed.is_success());
        assert_eq!(failed.error_category(), Some("network"));
        assert_eq!(failed.attempts, 3);
    }
}
