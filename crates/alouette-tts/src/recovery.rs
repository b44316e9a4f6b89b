//! Retry, backoff, and fallback coordination for synthesis calls.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::backend::{AudioData, BackendRegistry, SynthesisBackend};
use crate::cache::CacheStore;
use crate::cancel::CancellationToken;
use crate::error::{AlouetteError, AlouetteResult};
use crate::request::SynthesisRequest;
use crate::voice::Voice;

/// Retry and backoff policy applied to each synthesis call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryPolicy {
    /// Retries after the first attempt, so `max_retries + 1` attempts total
    pub max_retries: u32,
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Ceiling for the computed delay
    pub max_delay: Duration,
    /// Exponential growth factor between retries
    pub backoff_multiplier: f64,
    /// Random spread applied to each delay, as a fraction (0.25 = ±25%)
    pub jitter: f64,
    /// Deadline for a single attempt
    pub attempt_timeout: Duration,
    /// Substitute a voice from the backend catalog when the requested
    /// one is missing
    pub enable_voice_fallback: bool,
    /// Switch to a universal backend when a native one stays broken
    pub enable_platform_fallback: bool,
}

impl Default for RecoveryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
            backoff_multiplier: 2.0,
            jitter: 0.25,
            attempt_timeout: Duration::from_secs(30),
            enable_voice_fallback: true,
            enable_platform_fallback: true,
        }
    }
}

impl RecoveryPolicy {
    /// Create a policy with defaults
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the retry budget
    #[must_use]
    pub const fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set the delay before the first retry
    #[must_use]
    pub const fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    /// Set the delay ceiling
    #[must_use]
    pub const fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Set the exponential growth factor
    #[must_use]
    pub const fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Set the jitter fraction
    #[must_use]
    pub const fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter;
        self
    }

    /// Set the per-attempt deadline
    #[must_use]
    pub const fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    /// Enable or disable voice substitution
    #[must_use]
    pub const fn with_voice_fallback(mut self, enabled: bool) -> Self {
        self.enable_voice_fallback = enabled;
        self
    }

    /// Enable or disable the backend tier switch
    #[must_use]
    pub const fn with_platform_fallback(mut self, enabled: bool) -> Self {
        self.enable_platform_fallback = enabled;
        self
    }

    /// Validate policy parameters
    ///
    /// # Errors
    ///
    /// Returns `ValidationError` if delays are inverted, the multiplier
    /// is below 1.0, the jitter is outside 0.0..=1.0, or the attempt
    /// timeout is zero.
    pub fn validate(&self) -> AlouetteResult<()> {
        if self.base_delay > self.max_delay {
            return Err(AlouetteError::validation(
                "base_delay cannot exceed max_delay",
            ));
        }
        if self.backoff_multiplier < 1.0 {
            return Err(AlouetteError::validation(
                "backoff_multiplier must be at least 1.0",
            ));
        }
        if !(0.0..=1.0).contains(&self.jitter) {
            return Err(AlouetteError::validation(
                "jitter must be between 0.0 and 1.0",
            ));
        }
        if self.attempt_timeout.is_zero() {
            return Err(AlouetteError::validation("attempt_timeout must be non-zero"));
        }
        Ok(())
    }

    /// Deterministic delay before retry number `retry` (0-based),
    /// before jitter: `base * multiplier^retry`, capped at `max_delay`.
    #[must_use]
    pub fn delay_for_attempt(&self, retry: u32) -> Duration {
        let base = self.base_delay.as_secs_f64();
        let factor = self.backoff_multiplier.powf(f64::from(retry));
        let capped = (base * factor).min(self.max_delay.as_secs_f64());
        if capped.is_finite() && capped >= 0.0 {
            Duration::from_secs_f64(capped)
        } else {
            self.max_delay
        }
    }

    /// Apply the configured random spread to a delay
    fn jittered(&self, delay: Duration) -> Duration {
        if self.jitter <= 0.0 {
            return delay;
        }
        let spread = rand::thread_rng().gen_range(-self.jitter..=self.jitter);
        let secs = delay.as_secs_f64() * (1.0 + spread);
        if secs.is_finite() && secs > 0.0 {
            Duration::from_secs_f64(secs)
        } else {
            Duration::ZERO
        }
    }
}

/// Audio produced for one request, with the substitutions recovery made
#[derive(Debug, Clone)]
pub struct RecoveredAudio {
    /// The synthesized audio
    pub audio: AudioData,
    /// Voice that produced the audio, after any voice fallback
    pub used_voice: String,
    /// Backend that produced the audio. `None` for a cache hit.
    pub backend: Option<String>,
    /// Whether the audio came from the cache
    pub from_cache: bool,
}

/// Runs synthesis calls under a retry policy and falls back across
/// voices and backends when a call cannot succeed as requested.
///
/// Recovery is layered. A single call is retried with exponential
/// backoff while it fails with retryable errors. An unknown voice
/// triggers one substitution from the backend's own catalog. A native
/// backend that stays broken is swapped for a universal one, and if
/// the swap fails too the primary backend's error is reported.
#[derive(Clone)]
pub struct RecoveryCoordinator {
    policy: RecoveryPolicy,
    registry: BackendRegistry,
    cache: Arc<CacheStore>,
}

impl RecoveryCoordinator {
    /// Create a coordinator
    ///
    /// # Errors
    ///
    /// Returns `ValidationError` if the policy is invalid.
    pub fn new(
        policy: RecoveryPolicy,
        registry: BackendRegistry,
        cache: Arc<CacheStore>,
    ) -> AlouetteResult<Self> {
        policy.validate()?;
        Ok(Self {
            policy,
            registry,
            cache,
        })
    }

    /// The active retry policy
    #[must_use]
    pub const fn policy(&self) -> &RecoveryPolicy {
        &self.policy
    }

    /// Copy of this coordinator with a different retry budget
    #[must_use]
    pub fn with_max_retries(&self, max_retries: u32) -> Self {
        let mut copy = self.clone();
        copy.policy.max_retries = max_retries;
        copy
    }

    /// Run `operation` under the retry policy.
    ///
    /// Each attempt runs under the per-attempt deadline. Retryable
    /// failures back off exponentially with jitter; any other error
    /// returns immediately. Cancellation is honored between attempts,
    /// never mid-attempt.
    ///
    /// Returns the final result together with the number of attempts
    /// that actually ran.
    pub async fn execute_with_recovery<T, F, Fut>(
        &self,
        context: &str,
        cancel: &CancellationToken,
        mut operation: F,
    ) -> (AlouetteResult<T>, u32)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = AlouetteResult<T>>,
    {
        let mut attempts = 0u32;
        let mut last_error: Option<AlouetteError> = None;

        while attempts <= self.policy.max_retries {
            if let Err(e) = cancel.check() {
                return (Err(e), attempts);
            }
            if attempts > 0 {
                let delay = self.policy.jittered(self.policy.delay_for_attempt(attempts - 1));
                debug!(context, attempt = attempts, ?delay, "backing off before retry");
                tokio::time::sleep(delay).await;
                if let Err(e) = cancel.check() {
                    return (Err(e), attempts);
                }
            }
            attempts += 1;

            let outcome = match tokio::time::timeout(self.policy.attempt_timeout, operation()).await
            {
                Ok(result) => result,
                Err(_) => Err(AlouetteError::timeout(format!(
                    "{context}: attempt exceeded {:?}",
                    self.policy.attempt_timeout
                ))),
            };

            match outcome {
                Ok(value) => return (Ok(value), attempts),
                Err(err) if err.is_retryable() => {
                    warn!(context, attempt = attempts, error = %err, "attempt failed");
                    last_error = Some(err);
                }
                Err(err) => return (Err(err), attempts),
            }
        }

        let err = last_error
            .unwrap_or_else(|| AlouetteError::synthesis(format!("{context}: no attempts ran")));
        (Err(err), attempts)
    }

    /// Pick a replacement voice for `language` from a backend's catalog.
    ///
    /// The catalog is read through the voice cache. Selection prefers,
    /// in order: a default voice with the exact language tag, any voice
    /// matching the primary language subtag, any default voice, and
    /// finally the first voice. Returns `None` for an empty catalog.
    ///
    /// # Errors
    ///
    /// Returns the backend's error when the catalog cannot be listed.
    pub async fn find_fallback_voice(
        &self,
        backend: &Arc<dyn SynthesisBackend>,
        language: &str,
    ) -> AlouetteResult<Option<Voice>> {
        let voices = self.cached_voices(backend).await?;
        Ok(Self::select_fallback(&voices, language))
    }

    async fn cached_voices(&self, backend: &Arc<dyn SynthesisBackend>) -> AlouetteResult<Vec<Voice>> {
        if let Some(voices) = self.cache.get_voices(backend.name()) {
            return Ok(voices);
        }
        let voices = backend.list_voices().await?;
        self.cache.put_voices(backend.name(), voices.clone());
        Ok(voices)
    }

    fn select_fallback(voices: &[Voice], language: &str) -> Option<Voice> {
        voices
            .iter()
            .find(|v| v.is_default && v.language.eq_ignore_ascii_case(language))
            .or_else(|| voices.iter().find(|v| v.supports_language(language)))
            .or_else(|| voices.iter().find(|v| v.is_default))
            .or_else(|| voices.first())
            .cloned()
    }

    /// Synthesize one request with every recovery layer applied.
    ///
    /// Checks the audio cache first. On a miss, runs the request on the
    /// preferred backend with retries and voice fallback, then swaps to
    /// a universal backend when a native one stays unusable. Successful
    /// audio is written back to the cache.
    ///
    /// Returns the result together with the total attempts consumed,
    /// which is zero for a cache hit.
    pub async fn synthesize_with_recovery(
        &self,
        request: &SynthesisRequest,
        cancel: &CancellationToken,
    ) -> (AlouetteResult<RecoveredAudio>, u32) {
        let mut attempts = 0u32;
        let result = self.synthesize_inner(request, cancel, &mut attempts).await;
        (result, attempts)
    }

    async fn synthesize_inner(
        &self,
        request: &SynthesisRequest,
        cancel: &CancellationToken,
        attempts: &mut u32,
    ) -> AlouetteResult<RecoveredAudio> {
        cancel.check()?;

        let key = CacheStore::audio_key(&request.text, &request.voice_id, &request.options);
        if let Some(audio) = self.cache.get_audio(&key) {
            debug!(request = %request.id, "audio cache hit");
            return Ok(RecoveredAudio {
                audio,
                used_voice: request.voice_id.clone(),
                backend: None,
                from_cache: true,
            });
        }

        let Some(primary) = self.registry.primary() else {
            return Err(AlouetteError::platform_unsupported(
                "No synthesis backend is available",
            ));
        };

        match self.synthesize_on_backend(&primary, request, cancel, attempts).await {
            Ok((audio, used_voice)) => {
                self.cache.put_audio(&key, audio.clone());
                Ok(RecoveredAudio {
                    audio,
                    used_voice,
                    backend: Some(primary.name().to_string()),
                    from_cache: false,
                })
            }
            Err(err)
                if self.policy.enable_platform_fallback
                    && err.triggers_platform_fallback()
                    && primary.tier().has_fallback_tier() =>
            {
                let Some(alternate) = self.registry.fallback_for(primary.tier()) else {
                    return Err(err);
                };
                warn!(
                    request = %request.id,
                    from = primary.name(),
                    to = alternate.name(),
                    error = %err,
                    "switching to fallback backend"
                );
                match self
                    .synthesize_on_backend(&alternate, request, cancel, attempts)
                    .await
                {
                    Ok((audio, used_voice)) => {
                        self.cache.put_audio(&key, audio.clone());
                        Ok(RecoveredAudio {
                            audio,
                            used_voice,
                            backend: Some(alternate.name().to_string()),
                            from_cache: false,
                        })
                    }
                    Err(alternate_err) => {
                        warn!(
                            request = %request.id,
                            backend = alternate.name(),
                            error = %alternate_err,
                            "fallback backend failed, reporting primary error"
                        );
                        Err(err)
                    }
                }
            }
            Err(err) => Err(err),
        }
    }

    /// Requested voice with retries, then one voice substitution.
    async fn synthesize_on_backend(
        &self,
        backend: &Arc<dyn SynthesisBackend>,
        request: &SynthesisRequest,
        cancel: &CancellationToken,
        attempts: &mut u32,
    ) -> AlouetteResult<(AudioData, String)> {
        let context = format!("request {} on {}", request.id, backend.name());

        let (result, used) = self
            .execute_with_recovery(&context, cancel, || {
                backend.synthesize(&request.text, &request.voice_id, &request.options)
            })
            .await;
        *attempts += used;

        let err = match result {
            Ok(audio) => return Ok((audio, request.voice_id.clone())),
            Err(err) => err,
        };
        if !self.policy.enable_voice_fallback || !err.triggers_voice_fallback() {
            return Err(err);
        }

        let fallback = match self.find_fallback_voice(backend, &request.language).await {
            Ok(Some(voice)) if voice.id != request.voice_id => voice,
            Ok(_) => return Err(err),
            Err(discovery_err) => {
                warn!(
                    request = %request.id,
                    backend = backend.name(),
                    error = %discovery_err,
                    "voice discovery failed during fallback"
                );
                return Err(err);
            }
        };

        warn!(
            request = %request.id,
            requested = %request.voice_id,
            fallback = %fallback.id,
            "voice not found, substituting"
        );
        let (result, used) = self
            .execute_with_recovery(&context, cancel, || {
                backend.synthesize(&request.text, &fallback.id, &request.options)
            })
            .await;
        *attempts += used;
        result.map(|audio| (audio, fallback.id.clone()))
    }
}

impl std::fmt::Debug for RecoveryCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecoveryCoordinator")
            .field("policy", &self.policy)
            .field("registry", &self.registry)
            .finish()
    }
}
