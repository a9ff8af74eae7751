//! Batch scheduler — turns pending chunks into gateway calls.
//!
//! Chunks are walked in fixed windows of `batch_size`.  Inside a window,
//! sub-batches are cut by the character budget and sent to the gateway one
//! after another until the window is drained:
//!
//! ```text
//!            ┌──────────── success: persist, advance ───────────┐
//!            ▼                                                  │
//!   clamp(pending, ceiling) ──► synthesize(sub-batch) ──────────┤
//!            ▲                        │                         │
//!            │        retriable: release memory, ceiling /= 2   │
//!            └────────────────────────┘                         │
//!                                     │ ceiling == 0 ──► window abandoned
//!                                     │ other error  ──► window abandoned
//!                                     │ device assert ─► run aborted
//! ```
//!
//! The ceiling never grows back inside a window; every window starts again
//! at `batch_size`.

use std::{
    collections::BTreeMap,
    time::{Duration, Instant},
};

use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};

use crate::{
    audio::Artifact,
    gateway::{FailureClass, GatewayError, SamplingConfig, SynthesisGateway, SynthesisRequest},
    segment::Chunk,
    store::ChunkStore,
};

/// Default number of chunks per window.
pub const DEFAULT_BATCH_SIZE: usize = 8;

/// Default character budget per sub-batch.
pub const DEFAULT_MAX_BATCH_CHARS: usize = 6000;

// ─────────────────────────────────────────────────────────────────────────────
// Batch limits and the character-budget clamp
// ─────────────────────────────────────────────────────────────────────────────

/// Count and size bounds for one gateway call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchLimits {
    /// Window size and initial sub-batch size.
    pub batch_size: usize,
    /// Total characters per sub-batch; 0 disables the budget.
    pub max_batch_chars: usize,
}

impl Default for BatchLimits {
    fn default() -> Self {
        Self { batch_size: DEFAULT_BATCH_SIZE, max_batch_chars: DEFAULT_MAX_BATCH_CHARS }
    }
}

impl BatchLimits {
    pub fn budget_enabled(&self) -> bool {
        self.max_batch_chars > 0
    }

    /// Length of the sub-batch to cut from the front of `pending` when at
    /// most `requested` items are allowed.
    ///
    /// The first item is always admitted, however long, so an oversized
    /// chunk cannot stall the run.  Returns 0 only when `requested` or
    /// `pending` is empty.
    pub fn clamp(&self, pending: &[PendingChunk<'_>], requested: usize) -> usize {
        let requested = requested.min(pending.len());
        if requested == 0 || !self.budget_enabled() {
            return requested;
        }
        let mut total = 0;
        let mut count = 0;
        for item in &pending[..requested] {
            if count > 0 && total + item.chars > self.max_batch_chars {
                break;
            }
            total += item.chars;
            count += 1;
        }
        count
    }
}

/// A chunk waiting for synthesis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingChunk<'a> {
    pub index: usize,
    pub text: &'a str,
    pub chars: usize,
}

impl<'a> From<&'a Chunk> for PendingChunk<'a> {
    fn from(chunk: &'a Chunk) -> Self {
        Self { index: chunk.index, text: &chunk.text, chars: chunk.char_len() }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Halving backoff
// ─────────────────────────────────────────────────────────────────────────────

/// Result of driving one sub-batch through [`Backoff::run`].
#[derive(Debug)]
pub enum BackoffOutcome<T> {
    /// The call succeeded with a sub-batch of `size` items.
    Done { value: T, size: usize },
    /// Retriable failures shrank the ceiling to zero.
    Exhausted(GatewayError),
    /// A failure that retrying cannot fix.
    Failed { error: GatewayError, size: usize },
}

/// Shrinking size ceiling for one window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    ceiling: usize,
}

impl Backoff {
    pub fn new(ceiling: usize) -> Self {
        Self { ceiling }
    }

    pub fn ceiling(&self) -> usize {
        self.ceiling
    }

    /// Call `attempt` with `fit(ceiling)` items until it succeeds or fails
    /// for good.  Each retriable failure releases device memory and halves
    /// the ceiling; the halved ceiling is kept for later sub-batches.
    pub fn run<G, T>(
        &mut self,
        gateway: &mut G,
        fit: impl Fn(usize) -> usize,
        mut attempt: impl FnMut(&mut G, usize) -> Result<T, GatewayError>,
    ) -> BackoffOutcome<T>
    where
        G: SynthesisGateway + ?Sized,
    {
        loop {
            let size = fit(self.ceiling);
            if size == 0 {
                return BackoffOutcome::Exhausted(GatewayError::Other(
                    "batch size reduced to zero".to_string(),
                ));
            }
            match attempt(gateway, size) {
                Ok(value) => return BackoffOutcome::Done { value, size },
                Err(e) if e.is_retriable() => {
                    match e.class() {
                        FailureClass::RetriableResource => {
                            warn!("Out of memory: reducing batch size and retrying...")
                        }
                        _ => warn!("Batch padding error: reducing batch size and retrying..."),
                    }
                    gateway.release_memory();
                    self.ceiling = size / 2;
                    if self.ceiling == 0 {
                        return BackoffOutcome::Exhausted(e);
                    }
                }
                Err(error) => return BackoffOutcome::Failed { error, size },
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Reports
// ─────────────────────────────────────────────────────────────────────────────

/// Wall-clock time of one successful gateway call, including persistence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchTiming {
    pub indices: Vec<usize>,
    pub duration: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureKind {
    /// A non-retriable backend error.
    Contained,
    /// A non-retriable error on a lone chunk that is over the character
    /// budget by itself.
    ItemTooLarge { index: usize, chars: usize },
    /// Retriable errors persisted down to single-chunk batches.
    BackoffExhausted,
    /// Audio came back but could not be written.
    Persist,
}

/// A window abandoned part-way.  `indices` were left without artifacts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowFailure {
    pub indices: Vec<usize>,
    pub kind: FailureKind,
    pub message: String,
}

/// The fault that stopped the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Abort {
    /// First chunk of the sub-batch that triggered it.
    pub index: usize,
    pub error: GatewayError,
}

#[derive(Debug)]
enum WindowOutcome {
    Drained,
    Contained(WindowFailure),
    Aborted(Abort),
}

/// Everything one scheduling pass produced.
#[derive(Debug, Default)]
pub struct ScheduleReport {
    /// Cached and newly synthesized artifacts, keyed by chunk index.
    pub artifacts: BTreeMap<usize, Artifact>,
    pub cached: Vec<usize>,
    pub generated: Vec<usize>,
    pub batches: Vec<BatchTiming>,
    pub failures: Vec<WindowFailure>,
    pub aborted: Option<Abort>,
    /// Rate of the most recent artifact loaded or synthesized.
    pub sample_rate: Option<u32>,
}

impl ScheduleReport {
    pub fn gateway_calls(&self) -> usize {
        self.batches.len()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// BatchScheduler
// ─────────────────────────────────────────────────────────────────────────────

pub struct BatchScheduler<'a> {
    pub limits: BatchLimits,
    pub speaker: &'a str,
    pub sampling: &'a SamplingConfig,
}

impl<'a> BatchScheduler<'a> {
    pub fn new(limits: BatchLimits, speaker: &'a str, sampling: &'a SamplingConfig) -> Self {
        Self { limits, speaker, sampling }
    }

    /// Synthesize every chunk in `chunks` that the store does not already hold.
    pub fn run<G>(&self, gateway: &mut G, store: &ChunkStore, chunks: &[Chunk]) -> ScheduleReport
    where
        G: SynthesisGateway + ?Sized,
    {
        let mut report = ScheduleReport::default();
        let window_size = self.limits.batch_size.max(1);

        for window in chunks.chunks(window_size) {
            let pending = self.collect_pending(store, window, &mut report);
            if pending.is_empty() {
                debug!(
                    "Window starting at chunk {} has nothing pending",
                    window.first().map_or(0, |c| c.index)
                );
                continue;
            }

            match self.drain_window(gateway, store, &pending, &mut report) {
                WindowOutcome::Drained => {}
                WindowOutcome::Contained(failure) => report.failures.push(failure),
                WindowOutcome::Aborted(abort) => {
                    error!(
                        "Device-side assert detected at chunk {}. Aborting generation to avoid invalid output.",
                        abort.index
                    );
                    report.aborted = Some(abort);
                    break;
                }
            }
        }

        report
    }

    /// Load cached artifacts for `window` and return the chunks still to do.
    fn collect_pending<'c>(
        &self,
        store: &ChunkStore,
        window: &'c [Chunk],
        report: &mut ScheduleReport,
    ) -> Vec<PendingChunk<'c>> {
        let mut pending = Vec::with_capacity(window.len());
        for chunk in window {
            if let Some(artifact) = store.lookup(chunk.index) {
                report.sample_rate = Some(artifact.sample_rate);
                report.artifacts.insert(chunk.index, artifact);
                report.cached.push(chunk.index);
                continue;
            }
            if chunk.text.trim().is_empty() {
                continue;
            }
            pending.push(PendingChunk::from(chunk));
        }
        pending
    }

    fn request<'r>(&'r self, batch: &[PendingChunk<'r>]) -> SynthesisRequest<'r> {
        let texts = batch.iter().map(|p| p.text).collect();
        SynthesisRequest::new(texts, self.speaker, self.sampling)
    }

    fn drain_window<G>(
        &self,
        gateway: &mut G,
        store: &ChunkStore,
        window: &[PendingChunk<'_>],
        report: &mut ScheduleReport,
    ) -> WindowOutcome
    where
        G: SynthesisGateway + ?Sized,
    {
        let mut pending = window;
        let mut backoff = Backoff::new(self.limits.batch_size);

        while !pending.is_empty() {
            let remaining = pending.len();
            let outcome = backoff.run(
                gateway,
                |ceiling| self.limits.clamp(pending, ceiling),
                |gw, size| {
                    let batch = &pending[..size];
                    info!("Generating batch of {} chunks (remaining: {})...", size, remaining);
                    let started = Instant::now();
                    let output = gw.synthesize(&self.request(batch))?;
                    if output.audio.len() != size {
                        return Err(GatewayError::Other(format!(
                            "gateway returned {} buffers for {} texts",
                            output.audio.len(),
                            size
                        )));
                    }
                    Ok((output, started))
                },
            );

            match outcome {
                BackoffOutcome::Done { value: (output, started), size } => {
                    let batch = &pending[..size];
                    report.sample_rate = Some(output.sample_rate);
                    for (chunk, samples) in batch.iter().zip(output.audio) {
                        let artifact = Artifact::new(samples, output.sample_rate);
                        if let Err(e) = store.save(chunk.index, &artifact) {
                            error!("Cannot save chunk {}: {:#}", chunk.index, e);
                            let failed = chunk.index;
                            return WindowOutcome::Contained(WindowFailure {
                                indices: pending
                                    .iter()
                                    .map(|p| p.index)
                                    .filter(|&i| i >= failed)
                                    .collect(),
                                kind: FailureKind::Persist,
                                message: format!("{:#}", e),
                            });
                        }
                        report.artifacts.insert(chunk.index, artifact);
                        report.generated.push(chunk.index);
                    }

                    let duration = started.elapsed();
                    info!("Batch completed in {:.2}s", duration.as_secs_f64());
                    report.batches.push(BatchTiming {
                        indices: batch.iter().map(|p| p.index).collect(),
                        duration,
                    });
                    pending = &pending[size..];
                }
                BackoffOutcome::Exhausted(e) => {
                    error!(
                        "Batch size exhausted at chunk {}: {}. Skipping rest of window.",
                        pending[0].index, e
                    );
                    return WindowOutcome::Contained(self.failure(
                        pending,
                        FailureKind::BackoffExhausted,
                        &e,
                    ));
                }
                BackoffOutcome::Failed { error, size } => {
                    if error.class() == FailureClass::GlobalFatal {
                        return WindowOutcome::Aborted(Abort { index: pending[0].index, error });
                    }
                    error!("Error processing batch starting at chunk {}: {}", pending[0].index, error);
                    let first = pending[0];
                    let kind = if size == 1
                        && self.limits.budget_enabled()
                        && first.chars > self.limits.max_batch_chars
                    {
                        FailureKind::ItemTooLarge { index: first.index, chars: first.chars }
                    } else {
                        FailureKind::Contained
                    };
                    return WindowOutcome::Contained(self.failure(pending, kind, &error));
                }
            }
        }

        WindowOutcome::Drained
    }

    fn failure(
        &self,
        pending: &[PendingChunk<'_>],
        kind: FailureKind,
        error: &GatewayError,
    ) -> WindowFailure {
        WindowFailure {
            indices: pending.iter().map(|p| p.index).collect(),
            kind,
            message: error.to_string(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
