//! Batch scheduling: chunked dispatch, progress, and the retry pass.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::cancel::CancellationToken;
use crate::error::{AlouetteError, AlouetteResult};
use crate::gate::{ConcurrencyGate, GateStats};
use crate::recovery::RecoveryCoordinator;
use crate::request::{BatchConfig, SynthesisRequest, SynthesisResult};

/// Lifecycle phase of the scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchPhase {
    /// No batch has run yet, or the scheduler is between batches
    Idle,
    /// Main dispatch pass is running
    Running,
    /// Failed requests are being re-attempted
    RetryPass,
    /// Last batch ran to completion
    Completed,
    /// Last batch was cancelled
    Cancelled,
    /// Last batch stopped at the failure threshold
    ShortCircuited,
}

impl std::fmt::Display for BatchPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Running => write!(f, "running"),
            Self::RetryPass => write!(f, "retry_pass"),
            Self::Completed => write!(f, "completed"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::ShortCircuited => write!(f, "short_circuited"),
        }
    }
}

/// How a batch run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    /// Every request was dispatched and the retry pass finished
    Completed,
    /// The batch stopped early on a cancellation request
    Cancelled,
    /// The batch stopped early after too many failures
    ShortCircuited,
}

/// Point-in-time view of batch progress
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    /// Requests in the batch
    pub total: usize,
    /// Requests with a recorded outcome
    pub completed: usize,
    /// Requests that produced audio
    pub succeeded: usize,
    /// Requests that ended in an error
    pub failed: usize,
    /// Successes served from the cache
    pub from_cache: usize,
    /// Current scheduler phase
    pub phase: BatchPhase,
    /// Time since the batch started
    pub elapsed: Duration,
    /// Extrapolated time to finish, `None` before the first outcome
    pub estimated_remaining: Option<Duration>,
    /// Request whose outcome was recorded most recently
    pub current_request_id: Option<String>,
}

impl Default for ProgressSnapshot {
    fn default() -> Self {
        Self {
            total: 0,
            completed: 0,
            succeeded: 0,
            failed: 0,
            from_cache: 0,
            phase: BatchPhase::Idle,
            elapsed: Duration::ZERO,
            estimated_remaining: None,
            current_request_id: None,
        }
    }
}

impl ProgressSnapshot {
    /// Completion percentage in 0.0..=100.0
    #[must_use]
    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            100.0
        } else {
            #[allow(clippy::cast_precision_loss)]
            {
                self.completed as f64 / self.total as f64 * 100.0
            }
        }
    }
}

/// Everything a finished batch run produced
#[derive(Debug, Clone)]
pub struct BatchOutput {
    /// Per-request outcomes for every dispatched request, in
    /// submission order
    pub results: Vec<SynthesisResult>,
    /// IDs of requests never dispatched because the batch stopped
    /// early, in dispatch order
    pub skipped: Vec<String>,
    /// How the run ended
    pub status: BatchStatus,
    /// Wall time of the whole run
    pub elapsed: Duration,
}

impl BatchOutput {
    /// Count of successful requests
    #[must_use]
    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|r| r.is_success()).count()
    }

    /// Count of failed requests
    #[must_use]
    pub fn failed(&self) -> usize {
        self.results.len() - self.succeeded()
    }
}

#[derive(Default)]
struct BatchCounters {
    completed: AtomicUsize,
    succeeded: AtomicUsize,
    failed: AtomicUsize,
    from_cache: AtomicUsize,
    audio_bytes: AtomicUsize,
    current_request: parking_lot::Mutex<Option<String>>,
}

impl BatchCounters {
    fn record(&self, result: &SynthesisResult) {
        self.completed.fetch_add(1, Ordering::Relaxed);
        if result.is_success() {
            self.succeeded.fetch_add(1, Ordering::Relaxed);
            if result.from_cache {
                self.from_cache.fetch_add(1, Ordering::Relaxed);
            }
            if let Some(audio) = &result.audio {
                self.audio_bytes
                    .fetch_add(audio.size_bytes(), Ordering::Relaxed);
            }
        } else {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }
        *self.current_request.lock() = Some(result.request_id.clone());
    }

    fn store_from(&self, results: &HashMap<String, SynthesisResult>) {
        let succeeded = results.values().filter(|r| r.is_success()).count();
        let from_cache = results
            .values()
            .filter(|r| r.is_success() && r.from_cache)
            .count();
        self.succeeded.store(succeeded, Ordering::Relaxed);
        self.failed.store(results.len() - succeeded, Ordering::Relaxed);
        self.from_cache.store(from_cache, Ordering::Relaxed);
    }

    fn snapshot(&self, total: usize, phase: BatchPhase, started: Instant) -> ProgressSnapshot {
        let completed = self.completed.load(Ordering::Relaxed);
        let elapsed = started.elapsed();
        let estimated_remaining = if completed == 0 {
            None
        } else {
            #[allow(clippy::cast_precision_loss)]
            let per_request = elapsed.as_secs_f64() / completed as f64;
            #[allow(clippy::cast_precision_loss)]
            Some(Duration::from_secs_f64(
                per_request * total.saturating_sub(completed) as f64,
            ))
        };
        ProgressSnapshot {
            total,
            completed,
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            from_cache: self.from_cache.load(Ordering::Relaxed),
            phase,
            elapsed,
            estimated_remaining,
            current_request_id: self.current_request.lock().clone(),
        }
    }
}

/// Aborts the heartbeat task when dropped, so a batch future that is
/// dropped mid-run takes its ticker down with it.
struct HeartbeatGuard(tokio::task::JoinHandle<()>);

impl Drop for HeartbeatGuard {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Dispatches batches of synthesis requests.
///
/// Requests go out in chunks of twice the concurrency ceiling; inside a
/// chunk the gate bounds simultaneous backend calls, and the scheduler
/// drains the chunk before starting the next one. Progress is published
/// on a watch channel at a fixed cadence. After the main pass, failed
/// requests whose error was not fatal get one more pass with a reduced
/// retry budget.
pub struct BatchScheduler {
    coordinator: RecoveryCoordinator,
    gate: ConcurrencyGate,
    config: BatchConfig,
    cancel: CancellationToken,
    phase: Arc<RwLock<BatchPhase>>,
    progress_tx: Arc<watch::Sender<ProgressSnapshot>>,
    run_lock: tokio::sync::Mutex<()>,
}

impl BatchScheduler {
    /// Create a scheduler
    ///
    /// # Errors
    ///
    /// Returns `ValidationError` if the batch configuration is invalid.
    pub fn new(coordinator: RecoveryCoordinator, config: BatchConfig) -> AlouetteResult<Self> {
        config.validate()?;
        let gate = ConcurrencyGate::new(config.max_concurrency)?;
        let (progress_tx, _) = watch::channel(ProgressSnapshot::default());
        Ok(Self {
            coordinator,
            gate,
            config,
            cancel: CancellationToken::new(),
            phase: Arc::new(RwLock::new(BatchPhase::Idle)),
            progress_tx: Arc::new(progress_tx),
            run_lock: tokio::sync::Mutex::new(()),
        })
    }

    /// The batch configuration in effect
    #[must_use]
    pub const fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// Current scheduler phase
    #[must_use]
    pub fn phase(&self) -> BatchPhase {
        *self.phase.read()
    }

    /// Occupancy of the concurrency gate
    #[must_use]
    pub fn gate_stats(&self) -> GateStats {
        self.gate.stats()
    }

    /// Subscribe to progress updates for the current and future batches
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ProgressSnapshot> {
        self.progress_tx.subscribe()
    }

    /// Token that cancels the batch currently running
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Request cancellation of the running batch. In-flight synthesis
    /// calls finish their current attempt; nothing new is dispatched.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Rough wall-time estimate for a batch, for planning and timeouts
    #[must_use]
    pub fn estimate_batch_duration(&self, requests: &[SynthesisRequest]) -> Duration {
        let total_cost: f64 = requests
            .iter()
            .map(|r| {
                #[allow(clippy::cast_precision_loss)]
                let words = r.text.split_whitespace().count() as f64;
                0.1 + words * 0.04
            })
            .sum();
        #[allow(clippy::cast_precision_loss)]
        let lanes = self.config.max_concurrency.max(1) as f64;
        Duration::from_secs_f64(total_cost / lanes)
    }

    /// Run a batch to completion.
    ///
    /// The whole batch is validated before anything is dispatched; a
    /// single invalid request rejects the batch. Cancellation and the
    /// failure threshold stop dispatch between chunks and produce a
    /// partial output rather than an error. An empty batch completes
    /// immediately.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError` when another batch is already running,
    /// any request is invalid, or two requests share an ID.
    pub async fn run_batch(
        &self,
        requests: Vec<SynthesisRequest>,
    ) -> AlouetteResult<BatchOutput> {
        let _run = self
            .run_lock
            .try_lock()
            .map_err(|_| AlouetteError::validation("A batch is already running"))?;

        Self::validate_batch(&requests)?;
        self.cancel.reset();

        let started = Instant::now();
        let total = requests.len();
        if total == 0 {
            debug!("empty batch, nothing to dispatch");
            self.set_phase(BatchPhase::Completed);
            self.publish(ProgressSnapshot {
                phase: BatchPhase::Completed,
                elapsed: started.elapsed(),
                ..ProgressSnapshot::default()
            });
            return Ok(BatchOutput {
                results: Vec::new(),
                skipped: Vec::new(),
                status: BatchStatus::Completed,
                elapsed: started.elapsed(),
            });
        }

        info!(total, max_concurrency = self.config.max_concurrency, "starting batch");
        self.set_phase(BatchPhase::Running);
        let counters = Arc::new(BatchCounters::default());
        self.publish(counters.snapshot(total, BatchPhase::Running, started));
        let ticker = self.spawn_heartbeat(Arc::clone(&counters), total, started);

        let order = self.plan_order(&requests);
        let mut outcomes: HashMap<String, SynthesisResult> = HashMap::with_capacity(total);
        let mut short_circuited = false;
        let mut dispatched = 0usize;

        for chunk_indices in order.chunks(self.config.chunk_size()) {
            if self.cancel.is_cancelled() {
                break;
            }
            if let Some(threshold) = self.config.short_circuit_threshold {
                if counters.failed.load(Ordering::Relaxed) >= threshold {
                    warn!(threshold, "failure threshold crossed, stopping batch");
                    short_circuited = true;
                    break;
                }
            }

            let chunk: Vec<SynthesisRequest> = chunk_indices
                .iter()
                .map(|&i| requests[i].clone())
                .collect();
            self.dispatch_chunk(&chunk, &self.coordinator, &counters, &mut outcomes, |counters, result| {
                counters.record(result);
            })
            .await;
            dispatched += chunk.len();

            let held = counters.audio_bytes.load(Ordering::Relaxed);
            if held > self.config.max_memory_bytes {
                warn!(
                    held_bytes = held,
                    ceiling = self.config.max_memory_bytes,
                    "batch audio crossed the memory ceiling, resetting tracker"
                );
                counters.audio_bytes.store(0, Ordering::Relaxed);
            }
        }

        let skipped: Vec<String> = order[dispatched..]
            .iter()
            .map(|&i| requests[i].id.clone())
            .collect();

        if !self.cancel.is_cancelled() && !short_circuited && self.config.enable_retry_pass {
            self.run_retry_pass(&requests, &mut outcomes, &counters, total, started)
                .await;
        }

        drop(ticker);
        let status = if self.cancel.is_cancelled() {
            BatchStatus::Cancelled
        } else if short_circuited {
            BatchStatus::ShortCircuited
        } else {
            BatchStatus::Completed
        };
        let final_phase = match status {
            BatchStatus::Completed => BatchPhase::Completed,
            BatchStatus::Cancelled => BatchPhase::Cancelled,
            BatchStatus::ShortCircuited => BatchPhase::ShortCircuited,
        };
        self.set_phase(final_phase);
        self.publish(counters.snapshot(total, final_phase, started));

        // Results come back in submission order regardless of the order
        // tasks finished in.
        let results: Vec<SynthesisResult> = requests
            .iter()
            .filter_map(|r| outcomes.remove(&r.id))
            .collect();

        let output = BatchOutput {
            results,
            skipped,
            status,
            elapsed: started.elapsed(),
        };
        info!(
            status = %final_phase,
            succeeded = output.succeeded(),
            failed = output.failed(),
            skipped = output.skipped.len(),
            elapsed_ms = output.elapsed.as_millis(),
            "batch finished"
        );
        Ok(output)
    }

    /// Spawn one chunk into a join set and drain it, recording outcomes.
    async fn dispatch_chunk<F>(
        &self,
        chunk: &[SynthesisRequest],
        coordinator: &RecoveryCoordinator,
        counters: &Arc<BatchCounters>,
        outcomes: &mut HashMap<String, SynthesisResult>,
        mut on_result: F,
    ) where
        F: FnMut(&BatchCounters, &SynthesisResult),
    {
        let mut set: JoinSet<SynthesisResult> = JoinSet::new();
        let mut task_requests: HashMap<tokio::task::Id, String> =
            HashMap::with_capacity(chunk.len());

        let request_timeout = self.config.request_timeout;
        for request in chunk {
            let request_id = request.id.clone();
            let gate = self.gate.clone();
            let coordinator = coordinator.clone();
            let cancel = self.cancel.clone();
            let request = request.clone();
            let handle = set.spawn(async move {
                Self::process_request(gate, coordinator, cancel, request, request_timeout).await
            });
            task_requests.insert(handle.id(), request_id);
        }

        while let Some(joined) = set.join_next_with_id().await {
            let result = match joined {
                Ok((id, result)) => {
                    task_requests.remove(&id);
                    result
                }
                Err(join_err) => {
                    let request_id = task_requests
                        .remove(&join_err.id())
                        .unwrap_or_else(|| "unknown".to_string());
                    error!(request = %request_id, error = %join_err, "synthesis task aborted");
                    SynthesisResult::failure(
                        request_id,
                        AlouetteError::synthesis("synthesis task aborted unexpectedly"),
                        0,
                        Duration::ZERO,
                    )
                }
            };
            on_result(counters, &result);
            outcomes.insert(result.request_id.clone(), result);
        }
    }

    /// One request end to end: slot, recovery under the request
    /// deadline, optional file write.
    async fn process_request(
        gate: ConcurrencyGate,
        coordinator: RecoveryCoordinator,
        cancel: CancellationToken,
        request: SynthesisRequest,
        request_timeout: Duration,
    ) -> SynthesisResult {
        let started = Instant::now();
        let permit = match gate.acquire().await {
            Ok(permit) => permit,
            Err(err) => {
                return SynthesisResult::failure(request.id, err, 0, started.elapsed());
            }
        };
        if let Err(err) = cancel.check() {
            drop(permit);
            return SynthesisResult::failure(request.id, err, 0, started.elapsed());
        }

        let outcome = tokio::time::timeout(
            request_timeout,
            coordinator.synthesize_with_recovery(&request, &cancel),
        )
        .await;
        drop(permit);
        let (result, attempts) = match outcome {
            Ok(pair) => pair,
            Err(_) => {
                warn!(request = %request.id, timeout = ?request_timeout, "request deadline elapsed");
                return SynthesisResult::failure(
                    request.id,
                    AlouetteError::timeout(format!(
                        "Request exceeded the {request_timeout:?} deadline"
                    )),
                    0,
                    started.elapsed(),
                );
            }
        };

        let recovered = match result {
            Ok(recovered) => recovered,
            Err(err) => {
                return SynthesisResult::failure(request.id, err, attempts, started.elapsed());
            }
        };

        if let Some(path) = &request.output_path {
            if let Err(err) = recovered.audio.save_to_file(path).await {
                warn!(request = %request.id, error = %err, "audio produced but not saved");
                return SynthesisResult::failure(request.id, err, attempts, started.elapsed());
            }
        }

        let voice_substituted = recovered.used_voice != request.voice_id;
        SynthesisResult {
            request_id: request.id,
            audio: Some(recovered.audio),
            output_path: request.output_path,
            used_voice: Some(recovered.used_voice),
            voice_substituted,
            backend: recovered.backend,
            from_cache: recovered.from_cache,
            attempts,
            elapsed: started.elapsed(),
            timestamp: chrono::Utc::now(),
            error: None,
        }
    }

    /// Re-run every failed request whose error was not fatal, then
    /// merge the new outcomes over the old ones.
    async fn run_retry_pass(
        &self,
        requests: &[SynthesisRequest],
        outcomes: &mut HashMap<String, SynthesisResult>,
        counters: &Arc<BatchCounters>,
        total: usize,
        started: Instant,
    ) {
        let retry_ids: HashSet<String> = outcomes
            .values()
            .filter(|r| r.error.as_ref().is_some_and(|error| !error.is_fatal()))
            .map(|r| r.request_id.clone())
            .collect();
        if retry_ids.is_empty() {
            return;
        }

        info!(
            count = retry_ids.len(),
            delay_ms = self.config.retry_pass_delay.as_millis(),
            "scheduling retry pass"
        );
        if !self.cancellable_sleep(self.config.retry_pass_delay).await {
            return;
        }

        self.set_phase(BatchPhase::RetryPass);
        self.publish(counters.snapshot(total, BatchPhase::RetryPass, started));
        let retry_coordinator = self
            .coordinator
            .with_max_retries(self.config.retry_pass_max_retries);

        let candidates: Vec<SynthesisRequest> = requests
            .iter()
            .filter(|r| retry_ids.contains(&r.id))
            .cloned()
            .collect();

        for chunk in candidates.chunks(self.config.chunk_size()) {
            if self.cancel.is_cancelled() {
                break;
            }
            let mut fresh: HashMap<String, SynthesisResult> = HashMap::new();
            self.dispatch_chunk(chunk, &retry_coordinator, counters, &mut fresh, |_, _| {})
                .await;
            for (id, mut result) in fresh {
                if let Some(previous) = outcomes.get(&id) {
                    result.attempts += previous.attempts;
                    result.elapsed += previous.elapsed;
                }
                outcomes.insert(id, result);
            }
            counters.store_from(outcomes);
        }
    }

    /// Sleep that wakes early on cancellation. Returns false when the
    /// sleep was cut short.
    async fn cancellable_sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if self.cancel.is_cancelled() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            let slice = (deadline - now).min(Duration::from_millis(50));
            tokio::time::sleep(slice).await;
        }
    }

    /// Dispatch order as indices into the request list. Shorter texts
    /// go first when `sort_by_priority` is set; requests sharing
    /// synthesis options are then brought together, keeping groups in
    /// first-seen order, so a backend sees uniform settings back to
    /// back.
    fn plan_order(&self, requests: &[SynthesisRequest]) -> Vec<usize> {
        let mut order: Vec<usize> = (0..requests.len()).collect();
        if self.config.sort_by_priority {
            order.sort_by_key(|&i| requests[i].text.len());
        }
        if self.config.group_by_options {
            let mut groups: Vec<(String, Vec<usize>)> = Vec::new();
            for index in order {
                let key = requests[index].options.fingerprint();
                if let Some((_, members)) = groups.iter_mut().find(|(k, _)| *k == key) {
                    members.push(index);
                } else {
                    groups.push((key, vec![index]));
                }
            }
            order = groups
                .into_iter()
                .flat_map(|(_, members)| members)
                .collect();
        }
        order
    }

    fn validate_batch(requests: &[SynthesisRequest]) -> AlouetteResult<()> {
        let mut seen: HashSet<&str> = HashSet::with_capacity(requests.len());
        for request in requests {
            request.validate()?;
            if !seen.insert(request.id.as_str()) {
                return Err(AlouetteError::validation(format!(
                    "Duplicate request ID '{}'",
                    request.id
                )));
            }
        }
        Ok(())
    }

    fn spawn_heartbeat(
        &self,
        counters: Arc<BatchCounters>,
        total: usize,
        started: Instant,
    ) -> HeartbeatGuard {
        let tx = Arc::clone(&self.progress_tx);
        let phase = Arc::clone(&self.phase);
        HeartbeatGuard(tokio::spawn(async move {
            let mut interval = tokio::time::interval(crate::PROGRESS_INTERVAL);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                let current = *phase.read();
                tx.send_replace(counters.snapshot(total, current, started));
            }
        }))
    }

    fn set_phase(&self, phase: BatchPhase) {
        let mut current = self.phase.write();
        if *current != phase {
            debug!(from = %current, to = %phase, "scheduler phase change");
            *current = phase;
        }
    }

    fn publish(&self, snapshot: ProgressSnapshot) {
        self.progress_tx.send_replace(snapshot);
    }
}

impl std::fmt::Debug for BatchScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchScheduler")
            .field("config", &self.config)
            .field("phase", &self.phase())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{AudioFormat, BackendRegistry, SynthesisOptions};
    use crate::cache::CacheStore;
    use crate::recovery::RecoveryPolicy;

    fn scheduler(config: BatchConfig) -> BatchScheduler {
        let coordinator = RecoveryCoordinator::new(
            RecoveryPolicy::default(),
            BackendRegistry::new(),
            Arc::new(CacheStore::with_defaults()),
        )
        .unwrap();
        BatchScheduler::new(coordinator, config).unwrap()
    }

    fn request(id: &str) -> SynthesisRequest {
        SynthesisRequest::new(id, "some words to speak", "en_us_amy", "en-US")
    }

    #[test]
    fn test_new_validates_config() {
        let coordinator = RecoveryCoordinator::new(
            RecoveryPolicy::default(),
            BackendRegistry::new(),
            Arc::new(CacheStore::with_defaults()),
        )
        .unwrap();
        assert!(
            BatchScheduler::new(coordinator, BatchConfig::new().with_max_concurrency(0)).is_err()
        );
    }

    #[test]
    fn test_initial_state() {
        let scheduler = scheduler(BatchConfig::default());
        assert_eq!(scheduler.phase(), BatchPhase::Idle);
        let rx = scheduler.subscribe();
        assert_eq!(rx.borrow().phase, BatchPhase::Idle);
        assert_eq!(rx.borrow().total, 0);
        assert_eq!(scheduler.gate_stats().available, 4);
    }

    #[tokio::test]
    async fn test_empty_batch_completes() {
        let scheduler = scheduler(BatchConfig::default());
        let output = scheduler.run_batch(Vec::new()).await.unwrap();
        assert_eq!(output.status, BatchStatus::Completed);
        assert!(output.results.is_empty());
        assert!(output.skipped.is_empty());
        assert_eq!(scheduler.phase(), BatchPhase::Completed);
    }

    #[tokio::test]
    async fn test_duplicate_ids_rejected() {
        let scheduler = scheduler(BatchConfig::default());
        let err = scheduler
            .run_batch(vec![request("same"), request("same")])
            .await
            .unwrap_err();
        assert_eq!(err.category(), "validation");
        assert!(err.to_string().contains("Duplicate"));
    }

    #[tokio::test]
    async fn test_invalid_request_rejects_batch() {
        let scheduler = scheduler(BatchConfig::default());
        let mut bad = request("bad");
        bad.text = String::new();
        let err = scheduler
            .run_batch(vec![request("good"), bad])
            .await
            .unwrap_err();
        assert_eq!(err.category(), "validation");
    }

    #[test]
    fn test_progress_percent() {
        let snapshot = ProgressSnapshot {
            total: 8,
            completed: 2,
            ..ProgressSnapshot::default()
        };
        assert!((snapshot.percent() - 25.0).abs() < f64::EPSILON);
        assert!((ProgressSnapshot::default().percent() - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_snapshot_estimates_remaining_time() {
        let counters = BatchCounters::default();
        let started = Instant::now();
        let before = counters.snapshot(4, BatchPhase::Running, started);
        assert!(before.estimated_remaining.is_none());
        assert!(before.current_request_id.is_none());

        counters.record(&SynthesisResult::failure(
            "r1".to_string(),
            AlouetteError::network("down"),
            1,
            Duration::from_millis(5),
        ));
        let after = counters.snapshot(4, BatchPhase::Running, started);
        assert_eq!(after.completed, 1);
        assert!(after.estimated_remaining.is_some());
        assert_eq!(after.current_request_id.as_deref(), Some("r1"));
    }

    #[test]
    fn test_plan_order_sorts_shortest_first() {
        let sorted = scheduler(BatchConfig::new().with_sort_by_priority(true));
        let mut long = request("long");
        long.text = "a fairly long sentence that takes a while".to_string();
        let mut tiny = request("tiny");
        tiny.text = "hi".to_string();
        let mut mid = request("mid");
        mid.text = "medium words".to_string();
        let requests = [long, tiny, mid];

        assert_eq!(sorted.plan_order(&requests), vec![1, 2, 0]);
        let unsorted = scheduler(BatchConfig::default());
        assert_eq!(unsorted.plan_order(&requests), vec![0, 1, 2]);
    }

    #[test]
    fn test_plan_order_groups_matching_options() {
        let scheduler = scheduler(BatchConfig::new().with_group_by_options(true));
        let wav_a = request("wav_a");
        let mp3 = request("mp3")
            .with_options(SynthesisOptions::new().with_format(AudioFormat::Mp3));
        let wav_b = request("wav_b");

        assert_eq!(scheduler.plan_order(&[wav_a, mp3, wav_b]), vec![0, 2, 1]);
    }

    #[test]
    fn test_estimate_scales_with_input() {
        let scheduler = scheduler(BatchConfig::default());
        let small = scheduler.estimate_batch_duration(&[request("a")]);
        let many: Vec<SynthesisRequest> =
            (0..40).map(|i| request(&format!("r{i}"))).collect();
        let large = scheduler.estimate_batch_duration(&many);
        assert!(large > small);
        assert_eq!(
            scheduler.estimate_batch_duration(&[]),
            Duration::ZERO
        );
    }

    #[test]
    fn test_batch_phase_display() {
        assert_eq!(BatchPhase::RetryPass.to_string(), "retry_pass");
        assert_eq!(BatchPhase::ShortCircuited.to_string(), "short_circuited");
    }
}
