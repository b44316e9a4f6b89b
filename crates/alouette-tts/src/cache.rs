//! TTL and size bounded cache for voices, audio, and configuration.

use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::backend::{AudioData, SynthesisOptions};
use crate::error::{AlouetteError, AlouetteResult};
use crate::voice::Voice;

/// Configuration for the cache store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Time-to-live for cached voice lists
    pub voice_ttl: Duration,
    /// Time-to-live for cached audio payloads
    pub audio_ttl: Duration,
    /// Time-to-live for cached configuration blobs
    pub config_ttl: Duration,
    /// Maximum number of entries across all kinds
    pub max_entries: usize,
    /// Maximum total payload size across all kinds, in bytes
    pub max_total_bytes: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            voice_ttl: Duration::from_secs(30 * 60),
            audio_ttl: Duration::from_secs(15 * 60),
            config_ttl: Duration::from_secs(60 * 60),
            max_entries: 256,
            max_total_bytes: 64 * 1024 * 1024,
        }
    }
}

impl CacheConfig {
    /// Create a config with default limits
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the voice list TTL
    #[must_use]
    pub const fn with_voice_ttl(mut self, ttl: Duration) -> Self {
        self.voice_ttl = ttl;
        self
    }

    /// Set the audio payload TTL
    #[must_use]
    pub const fn with_audio_ttl(mut self, ttl: Duration) -> Self {
        self.audio_ttl = ttl;
        self
    }

    /// Set the configuration blob TTL
    #[must_use]
    pub const fn with_config_ttl(mut self, ttl: Duration) -> Self {
        self.config_ttl = ttl;
        self
    }

    /// Set the entry count ceiling
    #[must_use]
    pub const fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries;
        self
    }

    /// Set the total byte ceiling
    #[must_use]
    pub const fn with_max_total_bytes(mut self, max_total_bytes: usize) -> Self {
        self.max_total_bytes = max_total_bytes;
        self
    }

    /// Validate configuration parameters
    ///
    /// # Errors
    ///
    /// Returns `ValidationError` if any limit is zero.
    pub fn validate(&self) -> AlouetteResult<()> {
        if self.max_entries == 0 {
            return Err(AlouetteError::validation("max_entries must be at least 1"));
        }
        if self.max_total_bytes == 0 {
            return Err(AlouetteError::validation(
                "max_total_bytes must be at least 1",
            ));
        }
        if self.voice_ttl.is_zero() || self.audio_ttl.is_zero() || self.config_ttl.is_zero() {
            return Err(AlouetteError::validation("TTLs must be non-zero"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct CacheEntry<T> {
    value: T,
    created_at: Instant,
    size_bytes: usize,
}

impl<T> CacheEntry<T> {
    fn new(value: T, size_bytes: usize) -> Self {
        Self {
            value,
            created_at: Instant::now(),
            size_bytes,
        }
    }

    fn is_expired(&self, ttl: Duration) -> bool {
        self.created_at.elapsed() >= ttl
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CacheKind {
    Audio,
    Voices,
    Configs,
}

#[derive(Default)]
struct CacheState {
    voices: HashMap<String, CacheEntry<Vec<Voice>>>,
    audio: HashMap<String, CacheEntry<AudioData>>,
    configs: HashMap<String, CacheEntry<serde_json::Value>>,
    total_bytes: usize,
}

impl CacheState {
    fn entry_count(&self) -> usize {
        self.voices.len() + self.audio.len() + self.configs.len()
    }

    /// Next eviction victim. While any audio entry exists the oldest
    /// audio entry is taken; voice lists go next, configs last.
    fn oldest(&self) -> Option<(CacheKind, String)> {
        Self::oldest_in(&self.audio)
            .map(|key| (CacheKind::Audio, key))
            .or_else(|| Self::oldest_in(&self.voices).map(|key| (CacheKind::Voices, key)))
            .or_else(|| Self::oldest_in(&self.configs).map(|key| (CacheKind::Configs, key)))
    }

    fn oldest_in<T>(entries: &HashMap<String, CacheEntry<T>>) -> Option<String> {
        entries
            .iter()
            .min_by_key(|(_, entry)| entry.created_at)
            .map(|(key, _)| key.clone())
    }

    fn remove(&mut self, kind: CacheKind, key: &str) -> usize {
        let removed = match kind {
            CacheKind::Audio => self.audio.remove(key).map(|e| e.size_bytes),
            CacheKind::Voices => self.voices.remove(key).map(|e| e.size_bytes),
            CacheKind::Configs => self.configs.remove(key).map(|e| e.size_bytes),
        };
        let freed = removed.unwrap_or(0);
        self.total_bytes = self.total_bytes.saturating_sub(freed);
        freed
    }
}

/// Cache activity and occupancy counters
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheStats {
    /// Number of reads served from the cache
    pub hits: u64,
    /// Number of reads that found nothing or an expired entry
    pub misses: u64,
    /// Cached voice list entries
    pub voice_entries: usize,
    /// Cached audio entries
    pub audio_entries: usize,
    /// Cached configuration entries
    pub config_entries: usize,
    /// Total payload bytes currently held
    pub total_bytes: usize,
}

impl CacheStats {
    /// Hit rate over all reads, 0.0 when no reads happened
    #[must_use]
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            #[allow(clippy::cast_precision_loss)]
            {
                self.hits as f64 / total as f64
            }
        }
    }
}

/// Cache occupancy health report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheHealth {
    /// False when any advisory fired
    pub healthy: bool,
    /// Human-readable warnings about occupancy
    pub advisories: Vec<String>,
}

/// Thread-safe cache for voice lists, synthesized audio, and
/// configuration blobs.
///
/// Expiry is lazy: entries past their TTL are dropped when read. Writes
/// evict oldest-first, draining audio entries before voice lists and
/// config blobs, until both the entry count and total byte ceilings
/// hold, so a payload larger than the byte ceiling cannot stay
/// resident.
pub struct CacheStore {
    state: Mutex<CacheState>,
    config: CacheConfig,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl CacheStore {
    /// Create a cache store with the given configuration
    ///
    /// # Errors
    ///
    /// Returns `ValidationError` if the configuration is invalid.
    pub fn new(config: CacheConfig) -> AlouetteResult<Self> {
        config.validate()?;
        Ok(Self {
            state: Mutex::new(CacheState::default()),
            config,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        })
    }

    /// Create a cache store with default limits
    #[must_use]
    pub fn with_defaults() -> Self {
        Self {
            state: Mutex::new(CacheState::default()),
            config: CacheConfig::default(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Cache key for an audio payload, derived from the text, voice,
    /// and prosody fingerprint.
    #[must_use]
    pub fn audio_key(text: &str, voice_id: &str, options: &SynthesisOptions) -> String {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        text.hash(&mut hasher);
        format!("{voice_id}:{}:{:016x}", options.fingerprint(), hasher.finish())
    }

    /// Get the cached voice list for a backend
    pub fn get_voices(&self, backend: &str) -> Option<Vec<Voice>> {
        let mut state = self.state.lock();
        match state.voices.get(backend) {
            Some(entry) if !entry.is_expired(self.config.voice_ttl) => {
                let value = entry.value.clone();
                drop(state);
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(value)
            }
            Some(_) => {
                state.remove(CacheKind::Voices, backend);
                drop(state);
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            None => {
                drop(state);
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Cache a backend's voice list
    pub fn put_voices(&self, backend: &str, voices: Vec<Voice>) {
        let size = serde_json::to_vec(&voices).map_or(0, |v| v.len());
        let mut state = self.state.lock();
        if let Some(old) = state.voices.insert(backend.to_string(), CacheEntry::new(voices, size))
        {
            state.total_bytes = state.total_bytes.saturating_sub(old.size_bytes);
        }
        state.total_bytes += size;
        self.evict_locked(&mut state);
    }

    /// Drop the cached voice list for one backend
    pub fn invalidate_voices(&self, backend: &str) {
        let mut state = self.state.lock();
        state.remove(CacheKind::Voices, backend);
    }

    /// Get a cached audio payload
    pub fn get_audio(&self, key: &str) -> Option<AudioData> {
        let mut state = self.state.lock();
        match state.audio.get(key) {
            Some(entry) if !entry.is_expired(self.config.audio_ttl) => {
                let value = entry.value.clone();
                drop(state);
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(value)
            }
            Some(_) => {
                state.remove(CacheKind::Audio, key);
                drop(state);
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            None => {
                drop(state);
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Cache an audio payload
    pub fn put_audio(&self, key: &str, audio: AudioData) {
        let size = audio.size_bytes();
        let mut state = self.state.lock();
        if let Some(old) = state.audio.insert(key.to_string(), CacheEntry::new(audio, size)) {
            state.total_bytes = state.total_bytes.saturating_sub(old.size_bytes);
        }
        state.total_bytes += size;
        self.evict_locked(&mut state);
    }

    /// Get a cached configuration blob, deserialized into `T`
    pub fn get_config<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let mut state = self.state.lock();
        match state.configs.get(key) {
            Some(entry) if !entry.is_expired(self.config.config_ttl) => {
                let value = entry.value.clone();
                drop(state);
                match serde_json::from_value(value) {
                    Ok(typed) => {
                        self.hits.fetch_add(1, Ordering::Relaxed);
                        Some(typed)
                    }
                    Err(e) => {
                        tracing::warn!(key, error = %e, "cached config failed to deserialize");
                        self.misses.fetch_add(1, Ordering::Relaxed);
                        None
                    }
                }
            }
            Some(_) => {
                state.remove(CacheKind::Configs, key);
                drop(state);
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            None => {
                drop(state);
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Cache a configuration blob
    ///
    /// # Errors
    ///
    /// Returns `FileError` if the value fails to serialize.
    pub fn put_config<T: Serialize>(&self, key: &str, value: &T) -> AlouetteResult<()> {
        let json = serde_json::to_value(value)?;
        let size = serde_json::to_vec(&json).map_or(0, |v| v.len());
        let mut state = self.state.lock();
        if let Some(old) = state.configs.insert(key.to_string(), CacheEntry::new(json, size)) {
            state.total_bytes = state.total_bytes.saturating_sub(old.size_bytes);
        }
        state.total_bytes += size;
        self.evict_locked(&mut state);
        Ok(())
    }

    /// Drop all cached voice lists
    pub fn clear_voices(&self) {
        let mut state = self.state.lock();
        let freed: usize = state.voices.values().map(|e| e.size_bytes).sum();
        state.voices.clear();
        state.total_bytes = state.total_bytes.saturating_sub(freed);
    }

    /// Drop all cached audio payloads
    pub fn clear_audio(&self) {
        let mut state = self.state.lock();
        let freed: usize = state.audio.values().map(|e| e.size_bytes).sum();
        state.audio.clear();
        state.total_bytes = state.total_bytes.saturating_sub(freed);
    }

    /// Drop all cached configuration blobs
    pub fn clear_configs(&self) {
        let mut state = self.state.lock();
        let freed: usize = state.configs.values().map(|e| e.size_bytes).sum();
        state.configs.clear();
        state.total_bytes = state.total_bytes.saturating_sub(freed);
    }

    /// Drop everything
    pub fn clear(&self) {
        let mut state = self.state.lock();
        *state = CacheState::default();
    }

    /// Snapshot of activity counters and occupancy
    pub fn stats(&self) -> CacheStats {
        let state = self.state.lock();
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            voice_entries: state.voices.len(),
            audio_entries: state.audio.len(),
            config_entries: state.configs.len(),
            total_bytes: state.total_bytes,
        }
    }

    /// Occupancy health report. Fires an advisory when entry count or
    /// total bytes pass 90% of their ceiling.
    pub fn health(&self) -> CacheHealth {
        let stats = self.stats();
        let mut advisories = Vec::new();

        let entries = stats.voice_entries + stats.audio_entries + stats.config_entries;
        if entries * 10 >= self.config.max_entries * 9 {
            advisories.push(format!(
                "cache entry count {entries} is at or above 90% of the {} ceiling",
                self.config.max_entries
            ));
        }
        if stats.total_bytes * 10 >= self.config.max_total_bytes * 9 {
            advisories.push(format!(
                "cache size {} bytes is at or above 90% of the {} byte ceiling",
                stats.total_bytes, self.config.max_total_bytes
            ));
        }

        CacheHealth {
            healthy: advisories.is_empty(),
            advisories,
        }
    }

    fn evict_locked(&self, state: &mut CacheState) {
        while state.entry_count() > self.config.max_entries
            || state.total_bytes > self.config.max_total_bytes
        {
            let Some((kind, key)) = state.oldest() else {
                break;
            };
            let freed = state.remove(kind, &key);
            tracing::debug!(?kind, key, freed, "evicted cache entry");
        }
    }
}

impl std::fmt::Debug for CacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let stats = self.stats();
        f.debug_struct("CacheStore")
            .field("config", &self.config)
            .field("stats", &stats)
            .finish()
    }
}
