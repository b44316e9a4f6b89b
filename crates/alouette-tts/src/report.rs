//! Aggregation of batch outcomes into a summarized report.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::backend::AudioData;
use crate::error::AlouetteResult;
use crate::request::SynthesisResult;
use crate::scheduler::{BatchOutput, BatchStatus};

/// Wall-time summary over the per-request results
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimingSummary {
    /// Duration of the whole batch run
    pub batch_elapsed: Duration,
    /// Mean per-request wall time
    pub average_request: Duration,
    /// Fastest request
    pub min_request: Duration,
    /// Slowest request
    pub max_request: Duration,
    /// Spread of per-request wall time around the mean
    pub stddev_request: Duration,
    /// Dispatched requests per second of batch time
    pub requests_per_second: f64,
}

impl Default for TimingSummary {
    fn default() -> Self {
        Self {
            batch_elapsed: Duration::ZERO,
            average_request: Duration::ZERO,
            min_request: Duration::ZERO,
            max_request: Duration::ZERO,
            stddev_request: Duration::ZERO,
            requests_per_second: 0.0,
        }
    }
}

/// Failures sharing one category and message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorGroup {
    /// Error category, as reported by the error itself
    pub category: String,
    /// The shared error message
    pub message: String,
    /// Number of requests that failed this way
    pub count: usize,
    /// Affected request IDs, in submission order
    pub request_ids: Vec<String>,
}

/// Successful requests attributed to one backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendUsage {
    /// Backend name, or "cache" for cache hits
    pub backend: String,
    /// Successes produced by this backend
    pub succeeded: usize,
}

/// Summarized outcome of a batch run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchReport {
    /// How the run ended
    pub status: BatchStatus,
    /// When this report was generated
    pub generated_at: DateTime<Utc>,
    /// Dispatched plus skipped requests
    pub total_requests: usize,
    /// Requests that actually ran
    pub dispatched: usize,
    /// Requests that produced audio
    pub succeeded: usize,
    /// Requests that ended in an error
    pub failed: usize,
    /// Requests never dispatched
    pub skipped: usize,
    /// Successes served from the cache
    pub cache_hits: usize,
    /// Successes that needed a substitute voice
    pub voice_substitutions: usize,
    /// Synthesis attempts across all requests
    pub total_attempts: u32,
    /// Attempts beyond the first, across all requests
    pub retries: u32,
    /// succeeded / dispatched, 1.0 for an empty run
    pub success_rate: f64,
    /// cache_hits / dispatched
    pub cache_hit_rate: f64,
    /// Bytes of audio produced across all successes
    pub total_audio_bytes: usize,
    /// Mean audio size over the successes that produced audio
    pub average_audio_bytes: usize,
    /// Wall-time summary
    pub timing: TimingSummary,
    /// Successes per backend, busiest first
    pub backend_usage: Vec<BackendUsage>,
    /// Failure groups, largest first
    pub error_groups: Vec<ErrorGroup>,
    /// Actionable follow-ups derived from the failure pattern
    pub recommendations: Vec<String>,
}

impl BatchReport {
    /// Serialize the report as pretty-printed JSON
    ///
    /// # Errors
    ///
    /// Returns `FileError` if serialization fails.
    pub fn to_json(&self) -> AlouetteResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Whether every dispatched request succeeded and none were skipped
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failed == 0 && self.skipped == 0
    }
}

/// Turns a [`BatchOutput`] into a [`BatchReport`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ResultAggregator;

impl ResultAggregator {
    /// Create an aggregator
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Summarize a finished batch
    #[must_use]
    pub fn aggregate(&self, output: &BatchOutput) -> BatchReport {
        let dispatched = output.results.len();
        let skipped = output.skipped.len();
        let succeeded = output.succeeded();
        let failed = output.failed();
        let cache_hits = output
            .results
            .iter()
            .filter(|r| r.is_success() && r.from_cache)
            .count();
        let voice_substitutions = output
            .results
            .iter()
            .filter(|r| r.is_success() && r.voice_substituted)
            .count();
        let total_attempts: u32 = output.results.iter().map(|r| r.attempts).sum();
        let retries: u32 = output
            .results
            .iter()
            .map(|r| r.attempts.saturating_sub(1))
            .sum();

        #[allow(clippy::cast_precision_loss)]
        let success_rate = if dispatched == 0 {
            1.0
        } else {
            succeeded as f64 / dispatched as f64
        };
        #[allow(clippy::cast_precision_loss)]
        let cache_hit_rate = if dispatched == 0 {
            0.0
        } else {
            cache_hits as f64 / dispatched as f64
        };

        let audio_sizes: Vec<usize> = output
            .results
            .iter()
            .filter_map(|r| r.audio.as_ref().map(AudioData::size_bytes))
            .collect();
        let total_audio_bytes: usize = audio_sizes.iter().sum();
        let average_audio_bytes = if audio_sizes.is_empty() {
            0
        } else {
            total_audio_bytes / audio_sizes.len()
        };

        let timing = Self::summarize_timing(output);
        let error_groups = Self::group_errors(&output.results);
        let recommendations =
            Self::recommend(output.status, dispatched, skipped, &timing, &error_groups);

        BatchReport {
            status: output.status,
            generated_at: Utc::now(),
            total_requests: dispatched + skipped,
            dispatched,
            succeeded,
            failed,
            skipped,
            cache_hits,
            voice_substitutions,
            total_attempts,
            retries,
            success_rate,
            cache_hit_rate,
            total_audio_bytes,
            average_audio_bytes,
            timing,
            backend_usage: Self::backend_usage(&output.results),
            error_groups,
            recommendations,
        }
    }

    fn summarize_timing(output: &BatchOutput) -> TimingSummary {
        if output.results.is_empty() {
            return TimingSummary {
                batch_elapsed: output.elapsed,
                ..TimingSummary::default()
            };
        }
        let mut min = Duration::MAX;
        let mut max = Duration::ZERO;
        let mut sum = Duration::ZERO;
        for result in &output.results {
            min = min.min(result.elapsed);
            max = max.max(result.elapsed);
            sum += result.elapsed;
        }
        let count = output.results.len();
        let average = sum / u32::try_from(count).unwrap_or(u32::MAX).max(1);

        #[allow(clippy::cast_precision_loss)]
        let mean_secs = sum.as_secs_f64() / count as f64;
        #[allow(clippy::cast_precision_loss)]
        let variance = output
            .results
            .iter()
            .map(|r| {
                let diff = r.elapsed.as_secs_f64() - mean_secs;
                diff * diff
            })
            .sum::<f64>()
            / count as f64;

        let elapsed_secs = output.elapsed.as_secs_f64();
        #[allow(clippy::cast_precision_loss)]
        let requests_per_second = if elapsed_secs > 0.0 {
            count as f64 / elapsed_secs
        } else {
            0.0
        };

        TimingSummary {
            batch_elapsed: output.elapsed,
            average_request: average,
            min_request: min,
            max_request: max,
            stddev_request: Duration::from_secs_f64(variance.sqrt()),
            requests_per_second,
        }
    }

    fn backend_usage(results: &[SynthesisResult]) -> Vec<BackendUsage> {
        let mut counts: BTreeMap<String, usize> = BTreeMap::new();
        for result in results.iter().filter(|r| r.is_success()) {
            let name = if result.from_cache {
                "cache".to_string()
            } else {
                result
                    .backend
                    .clone()
                    .unwrap_or_else(|| "unknown".to_string())
            };
            *counts.entry(name).or_insert(0) += 1;
        }
        let mut usage: Vec<BackendUsage> = counts
            .into_iter()
            .map(|(backend, succeeded)| BackendUsage { backend, succeeded })
            .collect();
        usage.sort_by(|a, b| b.succeeded.cmp(&a.succeeded).then(a.backend.cmp(&b.backend)));
        usage
    }

    fn group_errors(results: &[SynthesisResult]) -> Vec<ErrorGroup> {
        let mut groups: BTreeMap<(String, String), Vec<String>> = BTreeMap::new();
        for result in results {
            if let Some(error) = &result.error {
                groups
                    .entry((error.category().to_string(), error.to_string()))
                    .or_default()
                    .push(result.request_id.clone());
            }
        }
        let mut out: Vec<ErrorGroup> = groups
            .into_iter()
            .map(|((category, message), request_ids)| ErrorGroup {
                category,
                message,
                count: request_ids.len(),
                request_ids,
            })
            .collect();
        out.sort_by(|a, b| {
            b.count
                .cmp(&a.count)
                .then(a.category.cmp(&b.category))
                .then(a.message.cmp(&b.message))
        });
        out
    }

    fn recommend(
        status: BatchStatus,
        dispatched: usize,
        skipped: usize,
        timing: &TimingSummary,
        error_groups: &[ErrorGroup],
    ) -> Vec<String> {
        let mut recommendations = Vec::new();
        let count_of = |category: &str| -> usize {
            error_groups
                .iter()
                .filter(|g| g.category == category)
                .map(|g| g.count)
                .sum()
        };

        if count_of("timeout") > 0 {
            recommendations.push(
                "Requests timed out; raise attempt_timeout or lower max_concurrency".to_string(),
            );
        }
        if count_of("network") > 0 {
            recommendations.push(
                "Network errors occurred; verify connectivity to the synthesis service"
                    .to_string(),
            );
        }
        if count_of("memory") > 0 {
            recommendations.push(
                "Memory errors occurred; lower max_concurrency to reduce simultaneous synthesis"
                    .to_string(),
            );
        }
        if count_of("voice") > 0 {
            recommendations.push(
                "Voices were not found with no usable fallback; refresh the voice catalog or fix the requested voice IDs"
                    .to_string(),
            );
        }
        if count_of("platform") > 0 {
            recommendations.push(
                "A platform engine was unavailable; check the native engine installation or register a universal backend"
                    .to_string(),
            );
        }
        if count_of("authentication") > 0 {
            recommendations
                .push("Authentication failed; check credentials before retrying".to_string());
        }
        if count_of("file") > 0 {
            recommendations.push(
                "Audio files could not be written; check output directory permissions and disk space"
                    .to_string(),
            );
        }
        if count_of("synthesis") > 0 {
            recommendations
                .push("Backend synthesis errors occurred; inspect backend logs".to_string());
        }
        if count_of("discovery") > 0 {
            recommendations.push(
                "Voice discovery failed; verify the backend can enumerate voices".to_string(),
            );
        }
        if dispatched > 0 && timing.requests_per_second < 1.0 {
            recommendations.push(
                "Throughput fell below one request per second; raise max_concurrency".to_string(),
            );
        }

        match status {
            BatchStatus::ShortCircuited => recommendations.push(format!(
                "The batch stopped at the failure threshold; fix the dominant error and rerun the {skipped} skipped requests"
            )),
            BatchStatus::Cancelled if skipped > 0 => recommendations.push(format!(
                "The batch was cancelled; rerun the {skipped} skipped requests to finish"
            )),
            _ => {}
        }

        recommendations
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{AudioData, AudioFormat};
    use crate::error::AlouetteError;

    fn success(id: &str, backend: &str, from_cache: bool, attempts: u32) -> SynthesisResult {
        SynthesisResult {
            request_id: id.to_string(),
            audio: Some(AudioData::new(
                vec![0u8; 8],
                AudioFormat::Wav,
                22_050,
                Duration::from_millis(100),
            )),
            output_path: None,
            used_voice: Some("en_us_amy".to_string()),
            voice_substituted: false,
            backend: if from_cache {
                None
            } else {
                Some(backend.to_string())
            },
            from_cache,
            attempts,
            elapsed: Duration::from_millis(10),
            timestamp: chrono::Utc::now(),
            error: None,
        }
    }

    fn failure(id: &str, error: AlouetteError, attempts: u32) -> SynthesisResult {
        SynthesisResult::failure(id.to_string(), error, attempts, Duration::from_millis(30))
    }

    fn output(results: Vec<SynthesisResult>, skipped: Vec<String>, status: BatchStatus) -> BatchOutput {
        BatchOutput {
            results,
            skipped,
            status,
            elapsed: Duration::from_millis(500),
        }
    }

    #[test]
    fn test_aggregate_counts() {
        let out = output(
            vec![
                success("a", "universal", false, 1),
                success("b", "universal", true, 0),
                failure("c", AlouetteError::network("down"), 4),
            ],
            vec!["d".to_string()],
            BatchStatus::Cancelled,
        );
        let report = ResultAggregator::new().aggregate(&out);

        assert_eq!(report.total_requests, 4);
        assert_eq!(report.dispatched, 3);
        assert_eq!(report.succeeded, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.cache_hits, 1);
        assert_eq!(report.total_attempts, 5);
        assert_eq!(report.retries, 3);
        assert!((report.success_rate - 2.0 / 3.0).abs() < 1e-9);
        assert!((report.cache_hit_rate - 1.0 / 3.0).abs() < 1e-9);
        assert!(!report.is_clean());
    }

    #[test]
    fn test_empty_output() {
        let out = output(Vec::new(), Vec::new(), BatchStatus::Completed);
        let report = ResultAggregator::new().aggregate(&out);
        assert_eq!(report.dispatched, 0);
        assert!((report.success_rate - 1.0).abs() < f64::EPSILON);
        assert_eq!(report.timing.average_request, Duration::ZERO);
        assert_eq!(report.total_audio_bytes, 0);
        assert_eq!(report.average_audio_bytes, 0);
        assert!(report.recommendations.is_empty());
        assert!(report.is_clean());
    }

    #[test]
    fn test_error_groups_ordered_by_size() {
        let out = output(
            vec![
                failure("a", AlouetteError::network("down"), 1),
                failure("b", AlouetteError::network("down"), 1),
                failure("c", AlouetteError::voice_not_found("ghost"), 1),
            ],
            Vec::new(),
            BatchStatus::Completed,
        );
        let report = ResultAggregator::new().aggregate(&out);

        assert_eq!(report.error_groups.len(), 2);
        assert_eq!(report.error_groups[0].category, "network");
        assert_eq!(report.error_groups[0].count, 2);
        assert_eq!(report.error_groups[0].request_ids, vec!["a", "b"]);
        assert_eq!(report.error_groups[1].category, "voice");
    }

    #[test]
    fn test_backend_usage_labels_cache() {
        let out = output(
            vec![
                success("a", "native", false, 1),
                success("b", "universal", false, 1),
                success("c", "universal", false, 1),
                success("d", "", true, 0),
            ],
            Vec::new(),
            BatchStatus::Completed,
        );
        let report = ResultAggregator::new().aggregate(&out);

        assert_eq!(report.backend_usage.len(), 3);
        assert_eq!(report.backend_usage[0].backend, "universal");
        assert_eq!(report.backend_usage[0].succeeded, 2);
        let names: Vec<&str> = report
            .backend_usage
            .iter()
            .map(|u| u.backend.as_str())
            .collect();
        assert!(names.contains(&"cache"));
        assert!(names.contains(&"native"));
    }

    #[test]
    fn test_recommendations_match_failure_pattern() {
        let out = output(
            vec![
                failure("a", AlouetteError::timeout("slow"), 4),
                failure("b", AlouetteError::authentication("bad key"), 1),
            ],
            Vec::new(),
            BatchStatus::Completed,
        );
        let report = ResultAggregator::new().aggregate(&out);

        assert!(report
            .recommendations
            .iter()
            .any(|r| r.contains("attempt_timeout")));
        assert!(report
            .recommendations
            .iter()
            .any(|r| r.contains("credentials")));
        assert!(!report.recommendations.iter().any(|r| r.contains("Network")));
    }

    #[test]
    fn test_short_circuit_recommendation() {
        let out = output(
            vec![failure("a", AlouetteError::synthesis("boom"), 1)],
            vec!["b".to_string(), "c".to_string()],
            BatchStatus::ShortCircuited,
        );
        let report = ResultAggregator::new().aggregate(&out);
        assert!(report
            .recommendations
            .iter()
            .any(|r| r.contains("failure threshold") && r.contains('2')));
    }

    #[test]
    fn test_timing_summary() {
        let mut fast = success("a", "universal", false, 1);
        fast.elapsed = Duration::from_millis(10);
        let mut slow = success("b", "universal", false, 1);
        slow.elapsed = Duration::from_millis(30);
        let out = output(vec![fast, slow], Vec::new(), BatchStatus::Completed);
        let report = ResultAggregator::new().aggregate(&out);

        assert_eq!(report.timing.min_request, Duration::from_millis(10));
        assert_eq!(report.timing.max_request, Duration::from_millis(30));
        assert_eq!(report.timing.average_request, Duration::from_millis(20));
        assert_eq!(report.timing.batch_elapsed, Duration::from_millis(500));
        // 10 ms and 30 ms around a 20 ms mean
        assert_eq!(report.timing.stddev_request, Duration::from_millis(10));
        // 2 requests over half a second
        assert!((report.timing.requests_per_second - 4.0).abs() < 1e-9);
    }

    #[test]
    fn test_audio_byte_totals() {
        let out = output(
            vec![
                success("a", "universal", false, 1),
                success("b", "universal", false, 1),
                failure("c", AlouetteError::network("down"), 1),
            ],
            Vec::new(),
            BatchStatus::Completed,
        );
        let report = ResultAggregator::new().aggregate(&out);

        // The success helper produces 8 bytes of audio per request.
        assert_eq!(report.total_audio_bytes, 16);
        assert_eq!(report.average_audio_bytes, 8);
    }

    #[test]
    fn test_low_throughput_recommendation() {
        let out = BatchOutput {
            results: vec![
                success("a", "universal", false, 1),
                success("b", "universal", false, 1),
            ],
            skipped: Vec::new(),
            status: BatchStatus::Completed,
            elapsed: Duration::from_secs(3),
        };
        let report = ResultAggregator::new().aggregate(&out);

        assert!((report.timing.requests_per_second - 2.0 / 3.0).abs() < 1e-9);
        assert!(report
            .recommendations
            .iter()
            .any(|r| r.contains("below one request per second")));
    }

    #[test]
    fn test_report_json_round_trip() {
        let out = output(
            vec![
                success("a", "universal", false, 1),
                failure("b", AlouetteError::network("down"), 2),
            ],
            Vec::new(),
            BatchStatus::Completed,
        );
        let report = ResultAggregator::new().aggregate(&out);
        let json = report.to_json().unwrap();
        let parsed: BatchReport = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, report);
    }
}
