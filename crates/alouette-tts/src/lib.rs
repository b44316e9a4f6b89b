//! # Alouette TTS
//!
//! Resilient batch text-to-speech pipeline with caching, bounded
//! concurrency, and layered error recovery.
//!
//! ## Features
//!
//! - Batch synthesis with chunked dispatch and live progress reporting
//! - FIFO concurrency gate bounding simultaneous backend calls
//! - Retry with exponential backoff and jitter, voice and backend fallback
//! - TTL and size bounded caching of voices, audio, and configuration
//! - Aggregated batch reports with failure classification and follow-ups
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use alouette_tts::{
//!     AlouetteResult, AudioData, AudioFormat, BackendRegistry, BackendTier, BatchConfig,
//!     BatchScheduler, CacheStore, Gender, RecoveryCoordinator, RecoveryPolicy,
//!     ResultAggregator, SynthesisBackend, SynthesisOptions, SynthesisRequest, Voice,
//! };
//!
//! struct DemoBackend;
//!
//! #[async_trait::async_trait]
//! impl SynthesisBackend for DemoBackend {
//!     fn name(&self) -> &str {
//!         "demo"
//!     }
//!
//!     fn tier(&self) -> BackendTier {
//!         BackendTier::Universal
//!     }
//!
//!     fn is_available(&self) -> bool {
//!         true
//!     }
//!
//!     async fn list_voices(&self) -> AlouetteResult<Vec<Voice>> {
//!         Ok(vec![
//!             Voice::new("demo_en", "Demo", "en-US", Gender::Neutral).as_default(),
//!         ])
//!     }
//!
//!     async fn synthesize(
//!         &self,
//!         text: &str,
//!         _voice_id: &str,
//!         _options: &SynthesisOptions,
//!     ) -> AlouetteResult<AudioData> {
//!         Ok(AudioData::new(
//!             text.as_bytes().to_vec(),
//!             AudioFormat::Wav,
//!             22_050,
//!             Duration::from_millis(200),
//!         ))
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut registry = BackendRegistry::new();
//!     registry.register(Arc::new(DemoBackend));
//!
//!     let coordinator = RecoveryCoordinator::new(
//!         RecoveryPolicy::default(),
//!         registry,
//!         Arc::new(CacheStore::with_defaults()),
//!     )?;
//!     let scheduler = BatchScheduler::new(coordinator, BatchConfig::default())?;
//!
//!     let requests = vec![
//!         SynthesisRequest::new("greeting", "Hello from Alouette", "demo_en", "en-US"),
//!     ];
//!     let output = scheduler.run_batch(requests).await?;
//!     let report = ResultAggregator::new().aggregate(&output);
//!     println!("{}", report.to_json()?);
//!
//!     Ok(())
//! }
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod backend;
pub mod cache;
pub mod cancel;
pub mod error;
pub mod gate;
pub mod recovery;
pub mod report;
pub mod request;
pub mod scheduler;
pub mod voice;

// Re-export main types for convenience
pub use backend::{AudioData, AudioFormat, BackendRegistry, SynthesisBackend, SynthesisOptions};
pub use cache::{CacheConfig, CacheHealth, CacheStats, CacheStore};
pub use cancel::CancellationToken;
pub use error::{AlouetteError, AlouetteResult};
pub use gate::{ConcurrencyGate, GateStats, SlotPermit};
pub use recovery::{RecoveredAudio, RecoveryCoordinator, RecoveryPolicy};
pub use report::{BackendUsage, BatchReport, ErrorGroup, ResultAggregator, TimingSummary};
pub use request::{BatchConfig, SynthesisRequest, SynthesisResult};
pub use scheduler::{BatchOutput, BatchPhase, BatchScheduler, BatchStatus, ProgressSnapshot};
pub use voice::{BackendTier, Gender, Voice};

/// Version information for the alouette-tts crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default maximum number of simultaneous synthesis calls
pub const DEFAULT_MAX_CONCURRENCY: usize = 4;

/// Maximum text length per request (to prevent memory issues)
pub const MAX_TEXT_LENGTH: usize = 10_000;

/// Chunk size as a multiple of the concurrency ceiling
pub const CHUNK_SIZE_FACTOR: usize = 2;

/// Interval between progress heartbeats during a batch
pub const PROGRESS_INTERVAL: std::time::Duration = std::time::Duration::from_millis(250);
