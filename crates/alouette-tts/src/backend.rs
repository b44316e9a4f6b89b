//! Synthesis backend contract and audio output types.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{AlouetteError, AlouetteResult};
use crate::voice::{BackendTier, Voice};

/// Supported audio output formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    /// WAV format (uncompressed PCM)
    Wav,
    /// MP3 format (lossy compression)
    Mp3,
    /// OGG Vorbis format (lossy compression)
    Ogg,
}

impl AudioFormat {
    /// Get file extension for this format
    #[must_use]
    pub const fn extension(&self) -> &'static str {
        match self {
            Self::Wav => "wav",
            Self::Mp3 => "mp3",
            Self::Ogg => "ogg",
        }
    }

    /// Get MIME type for this format
    #[must_use]
    pub const fn mime_type(&self) -> &'static str {
        match self {
            Self::Wav => "audio/wav",
            Self::Mp3 => "audio/mpeg",
            Self::Ogg => "audio/ogg",
        }
    }

    /// Determine format from a file extension
    #[must_use]
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "wav" => Some(Self::Wav),
            "mp3" => Some(Self::Mp3),
            "ogg" => Some(Self::Ogg),
            _ => None,
        }
    }
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self::Wav
    }
}

/// Prosody and output options for a synthesis call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynthesisOptions {
    /// Speaking rate multiplier (0.1 to 3.0, 1.0 = normal)
    pub rate: f32,
    /// Pitch multiplier (0.5 to 2.0, 1.0 = normal)
    pub pitch: f32,
    /// Volume level (0.0 to 1.0)
    pub volume: f32,
    /// Requested output format
    pub format: AudioFormat,
    /// Whether the text is SSML markup rather than plain text
    pub ssml: bool,
}

impl Default for SynthesisOptions {
    fn default() -> Self {
        Self {
            rate: 1.0,
            pitch: 1.0,
            volume: 1.0,
            format: AudioFormat::Wav,
            ssml: false,
        }
    }
}

impl SynthesisOptions {
    /// Create options with default prosody
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set speaking rate
    #[must_use]
    pub const fn with_rate(mut self, rate: f32) -> Self {
        self.rate = rate;
        self
    }

    /// Set pitch
    #[must_use]
    pub const fn with_pitch(mut self, pitch: f32) -> Self {
        self.pitch = pitch;
        self
    }

    /// Set volume
    #[must_use]
    pub const fn with_volume(mut self, volume: f32) -> Self {
        self.volume = volume;
        self
    }

    /// Set output format
    #[must_use]
    pub const fn with_format(mut self, format: AudioFormat) -> Self {
        self.format = format;
        self
    }

    /// Treat the input text as SSML markup
    #[must_use]
    pub const fn with_ssml(mut self, ssml: bool) -> Self {
        self.ssml = ssml;
        self
    }

    /// Validate option ranges
    ///
    /// # Errors
    ///
    /// Returns `ValidationError` if any option is outside its allowed range.
    pub fn validate(&self) -> AlouetteResult<()> {
        if !(0.1..=3.0).contains(&self.rate) {
            return Err(AlouetteError::validation(format!(
                "Rate must be between 0.1 and 3.0, got {}",
                self.rate
            )));
        }
        if !(0.5..=2.0).contains(&self.pitch) {
            return Err(AlouetteError::validation(format!(
                "Pitch must be between 0.5 and 2.0, got {}",
                self.pitch
            )));
        }
        if !(0.0..=1.0).contains(&self.volume) {
            return Err(AlouetteError::validation(format!(
                "Volume must be between 0.0 and 1.0, got {}",
                self.volume
            )));
        }
        Ok(())
    }

    /// Stable fingerprint of the prosody settings, used in cache keys
    #[must_use]
    pub fn fingerprint(&self) -> String {
        format!(
            "r{:.2}_p{:.2}_v{:.2}_{}{}",
            self.rate,
            self.pitch,
            self.volume,
            self.format.extension(),
            if self.ssml { "_ssml" } else { "" }
        )
    }
}

/// Synthesized audio returned by a backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioData {
    /// Encoded audio bytes
    pub bytes: Vec<u8>,
    /// Encoding of `bytes`
    pub format: AudioFormat,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Playback duration reported by the backend
    pub duration: Duration,
}

impl AudioData {
    /// Create new audio data
    #[must_use]
    pub const fn new(
        bytes: Vec<u8>,
        format: AudioFormat,
        sample_rate: u32,
        duration: Duration,
    ) -> Self {
        Self {
            bytes,
            format,
            sample_rate,
            duration,
        }
    }

    /// Check if the audio payload is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Size of the encoded payload in bytes
    #[must_use]
    pub fn size_bytes(&self) -> usize {
        self.bytes.len()
    }

    /// Write the audio payload to a file, creating parent directories
    /// as needed.
    ///
    /// # Errors
    ///
    /// Returns `FileError` if the directory cannot be created or the
    /// file cannot be written.
    pub async fn save_to_file(&self, path: &Path) -> AlouetteResult<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    AlouetteError::file(format!(
                        "Failed to create directory {}: {e}",
                        parent.display()
                    ))
                })?;
            }
        }
        tokio::fs::write(path, &self.bytes).await.map_err(|e| {
            AlouetteError::file(format!("Failed to write {}: {e}", path.display()))
        })?;
        tracing::debug!(
            path = %path.display(),
            bytes = self.bytes.len(),
            "saved audio file"
        );
        Ok(())
    }
}

/// Contract implemented by every synthesis engine.
///
/// Backends must be cheap to share; the pipeline holds them behind
/// `Arc` and calls them from many tasks at once.
#[async_trait]
pub trait SynthesisBackend: Send + Sync {
    /// Short backend name for logs and reports
    fn name(&self) -> &str;

    /// Capability tier of this backend
    fn tier(&self) -> BackendTier;

    /// Whether this backend is usable on the current platform
    fn is_available(&self) -> bool;

    /// Enumerate the voices this backend offers
    async fn list_voices(&self) -> AlouetteResult<Vec<Voice>>;

    /// Synthesize `text` with the given voice and options
    async fn synthesize(
        &self,
        text: &str,
        voice_id: &str,
        options: &SynthesisOptions,
    ) -> AlouetteResult<AudioData>;
}

/// Registry of configured backends, ordered by preference.
#[derive(Clone, Default)]
pub struct BackendRegistry {
    backends: Vec<Arc<dyn SynthesisBackend>>,
}

impl BackendRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a backend. Earlier registrations take precedence.
    pub fn register(&mut self, backend: Arc<dyn SynthesisBackend>) {
        tracing::debug!(backend = backend.name(), tier = %backend.tier(), "registered backend");
        self.backends.push(backend);
    }

    /// Look up a backend by name
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn SynthesisBackend>> {
        self.backends.iter().find(|b| b.name() == name).cloned()
    }

    /// The preferred backend: first registered one that is available
    #[must_use]
    pub fn primary(&self) -> Option<Arc<dyn SynthesisBackend>> {
        self.backends.iter().find(|b| b.is_available()).cloned()
    }

    /// Find an available backend in the fallback tier of `tier`.
    ///
    /// Returns `None` when `tier` has no fallback tier or no available
    /// backend exists there.
    #[must_use]
    pub fn fallback_for(&self, tier: BackendTier) -> Option<Arc<dyn SynthesisBackend>> {
        let target = tier.fallback_tier()?;
        self.backends
            .iter()
            .find(|b| b.tier() == target && b.is_available())
            .cloned()
    }

    /// Number of registered backends
    #[must_use]
    pub fn len(&self) -> usize {
        self.backends.len()
    }

    /// Check if no backends are registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }
}

impl std::fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.backends.iter().map(|b| b.name()).collect();
        f.debug_struct("BackendRegistry")
            .field("backends", &names)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::voice::Gender;

    struct StaticBackend {
        name: &'static str,
        tier: BackendTier,
        available: bool,
    }

    #[async_trait]
    impl SynthesisBackend for StaticBackend {
        fn name(&self) -> &str {
            self.name
        }

        fn tier(&self) -> BackendTier {
            self.tier
        }

        fn is_available(&self) -> bool {
            self.available
        }

        async fn list_voices(&self) -> AlouetteResult<Vec<Voice>> {
            Ok(vec![Voice::new("v1", "Test", "en-US", Gender::Neutral)])
        }

        async fn synthesize(
            &self,
            _text: &str,
            _voice_id: &str,
            _options: &SynthesisOptions,
        ) -> AlouetteResult<AudioData> {
            Ok(AudioData::new(
                vec![0u8; 16],
                AudioFormat::Wav,
                22_050,
                Duration::from_millis(100),
            ))
        }
    }

    #[test]
    fn test_audio_format() {
        assert_eq!(AudioFormat::Wav.extension(), "wav");
        assert_eq!(AudioFormat::Mp3.mime_type(), "audio/mpeg");
        assert_eq!(AudioFormat::from_extension("OGG"), Some(AudioFormat::Ogg));
        assert_eq!(AudioFormat::from_extension("txt"), None);
        assert_eq!(AudioFormat::default(), AudioFormat::Wav);
    }

    #[test]
    fn test_options_validation() {
        assert!(SynthesisOptions::default().validate().is_ok());
        assert!(SynthesisOptions::new().with_rate(0.05).validate().is_err());
        assert!(SynthesisOptions::new().with_rate(3.5).validate().is_err());
        assert!(SynthesisOptions::new().with_pitch(0.2).validate().is_err());
        assert!(SynthesisOptions::new().with_volume(1.5).validate().is_err());
        assert!(SynthesisOptions::new()
            .with_rate(2.0)
            .with_pitch(1.5)
            .with_volume(0.5)
            .validate()
            .is_ok());
    }

    #[test]
    fn test_options_fingerprint() {
        let a = SynthesisOptions::default();
        let b = SynthesisOptions::default();
        assert_eq!(a.fingerprint(), b.fingerprint());

        let c = SynthesisOptions::new().with_rate(1.5);
        assert_ne!(a.fingerprint(), c.fingerprint());

        let d = SynthesisOptions::new().with_format(AudioFormat::Mp3);
        assert_ne!(a.fingerprint(), d.fingerprint());

        let e = SynthesisOptions::new().with_ssml(true);
        assert_ne!(a.fingerprint(), e.fingerprint());
    }

    #[test]
    fn test_audio_data() {
        let audio = AudioData::new(
            vec![1, 2, 3],
            AudioFormat::Wav,
            22_050,
            Duration::from_secs(1),
        );
        assert!(!audio.is_empty());
        assert_eq!(audio.size_bytes(), 3);
    }

    #[test]
    fn test_backend_contract_blocking() {
        let backend = StaticBackend {
            name: "universal",
            tier: BackendTier::Universal,
            available: true,
        };
        let voices = tokio_test::block_on(backend.list_voices()).unwrap();
        assert_eq!(voices.len(), 1);
        let audio =
            tokio_test::block_on(backend.synthesize("hi", "v1", &SynthesisOptions::default()))
                .unwrap();
        assert!(!audio.is_empty());
    }

    #[tokio::test]
    async fn test_save_to_file_creates_parents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/out/audio.wav");
        let audio = AudioData::new(
            vec![9u8; 64],
            AudioFormat::Wav,
            22_050,
            Duration::from_millis(10),
        );
        audio.save_to_file(&path).await.unwrap();
        let written = tokio::fs::read(&path).await.unwrap();
        assert_eq!(written.len(), 64);
    }

    #[test]
    fn test_registry_primary_skips_unavailable() {
        let mut registry = BackendRegistry::new();
        registry.register(Arc::new(StaticBackend {
            name: "native",
            tier: BackendTier::Native,
            available: false,
        }));
        registry.register(Arc::new(StaticBackend {
            name: "universal",
            tier: BackendTier::Universal,
            available: true,
        }));

        let primary = registry.primary().unwrap();
        assert_eq!(primary.name(), "universal");
    }

    #[test]
    fn test_registry_fallback_for_tier() {
        let mut registry = BackendRegistry::new();
        registry.register(Arc::new(StaticBackend {
            name: "native",
            tier: BackendTier::Native,
            available: true,
        }));
        registry.register(Arc::new(StaticBackend {
            name: "universal",
            tier: BackendTier::Universal,
            available: true,
        }));

        let fallback = registry.fallback_for(BackendTier::Native).unwrap();
        assert_eq!(fallback.name(), "universal");
        assert!(registry.fallback_for(BackendTier::Universal).is_none());
    }

    #[test]
    fn test_registry_get_by_name() {
        let mut registry = BackendRegistry::new();
        assert!(registry.is_empty());
        registry.register(Arc::new(StaticBackend {
            name: "universal",
            tier: BackendTier::Universal,
            available: true,
        }));
        assert_eq!(registry.len(), 1);
        assert!(registry.get("universal").is_some());
        assert!(registry.get("missing").is_none());
    }
}
