//! Synthesis gateway — the narrow contract to the speech engine.
//!
//! The scheduler only ever sees [`SynthesisGateway`].  Backends translate
//! their own failures into [`GatewayError`] once, here at the boundary, so
//! the retry logic never inspects error strings.
//!
//! | Variant        | Class               | Scheduler reaction               |
//! |----------------|---------------------|----------------------------------|
//! | `OutOfMemory`  | retriable (resource)| release memory, halve, retry     |
//! | `BatchShape`   | retriable (shape)   | release memory, halve, retry     |
//! | `DeviceAssert` | global fatal        | abort run, skip assembly         |
//! | `Other`        | contained           | abandon window, continue         |

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ─────────────────────────────────────────────────────────────────────────────
// Sampling configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Generation settings forwarded with every call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    pub sampling_enabled: bool,
    pub top_p: f32,
    /// 0 disables top-k.
    pub top_k: u32,
    pub temperature: f32,
    pub repetition_penalty: f32,
    pub max_output_tokens: u32,
    /// Always `false` for bulk narration.
    pub streaming: bool,
    /// Reseed the backend before every call for reproducible output.
    pub seed: Option<u64>,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            sampling_enabled: true,
            top_p: 0.7,
            top_k: 0,
            temperature: 0.4,
            repetition_penalty: 1.1,
            max_output_tokens: 2048,
            streaming: false,
            seed: None,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Request / response
// ─────────────────────────────────────────────────────────────────────────────

/// One batched call: texts in narration order and one speaker label each.
#[derive(Debug, Clone, Serialize)]
pub struct SynthesisRequest<'a> {
    pub texts: Vec<&'a str>,
    pub speakers: Vec<&'a str>,
    pub sampling: &'a SamplingConfig,
}

impl<'a> SynthesisRequest<'a> {
    /// Batch `texts` under a single repeated speaker.
    pub fn new(texts: Vec<&'a str>, speaker: &'a str, sampling: &'a SamplingConfig) -> Self {
        let speakers = vec![speaker; texts.len()];
        Self { texts, speakers, sampling }
    }

    pub fn len(&self) -> usize {
        self.texts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.texts.is_empty()
    }
}

/// One audio buffer per request text, in the same order, at one shared rate.
#[derive(Debug, Clone, PartialEq)]
pub struct SynthesisOutput {
    pub audio: Vec<Vec<f32>>,
    pub sample_rate: u32,
}

// ─────────────────────────────────────────────────────────────────────────────
// Errors
// ─────────────────────────────────────────────────────────────────────────────

/// How the scheduler must react to a failed call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    RetriableResource,
    RetriableShape,
    GlobalFatal,
    Contained,
}

/// A failed gateway call.  Calls are all-or-nothing: no audio accompanies an error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    #[error("out of memory: {0}")]
    OutOfMemory(String),

    #[error("batch padding error: {0}")]
    BatchShape(String),

    #[error("device-side assert: {0}")]
    DeviceAssert(String),

    #[error("{0}")]
    Other(String),
}

impl GatewayError {
    pub fn class(&self) -> FailureClass {
        match self {
            Self::OutOfMemory(_) => FailureClass::RetriableResource,
            Self::BatchShape(_) => FailureClass::RetriableShape,
            Self::DeviceAssert(_) => FailureClass::GlobalFatal,
            Self::Other(_) => FailureClass::Contained,
        }
    }

    pub fn is_retriable(&self) -> bool {
        matches!(
            self.class(),
            FailureClass::RetriableResource | FailureClass::RetriableShape
        )
    }

    /// Translate an untyped backend message into the taxonomy.
    ///
    /// A device-side assert wins over everything else: once the device has
    /// asserted, an "out of memory" in the same message is not worth retrying.
    pub fn classify(message: impl Into<String>) -> Self {
        let message = message.into();
        let lower = message.to_lowercase();
        if lower.contains("device-side assert") {
            Self::DeviceAssert(message)
        } else if lower.contains("out of memory") {
            Self::OutOfMemory(message)
        } else if lower.contains("flattened indices") || lower.contains("internal assert") {
            Self::BatchShape(message)
        } else {
            Self::Other(message)
        }
    }

    /// Build from an explicit class tag, as reported by a worker.
    pub fn from_class(class: FailureClass, message: impl Into<String>) -> Self {
        let message = message.into();
        match class {
            FailureClass::RetriableResource => Self::OutOfMemory(message),
            FailureClass::RetriableShape => Self::BatchShape(message),
            FailureClass::GlobalFatal => Self::DeviceAssert(message),
            FailureClass::Contained => Self::Other(message),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Gateway trait
// ─────────────────────────────────────────────────────────────────────────────

/// Common interface for speech backends driven by the scheduler.
pub trait SynthesisGateway {
    /// Synthesize every text in `request`.  Blocks until done.
    fn synthesize(&mut self, request: &SynthesisRequest<'_>)
        -> Result<SynthesisOutput, GatewayError>;

    /// Drop cached device memory before a retry.  Default: nothing to release.
    fn release_memory(&mut self) {}

    /// Speakers the backend accepts, if it can tell.
    fn speakers(&mut self) -> Option<Vec<String>> {
        None
    }
}

impl<G: SynthesisGateway + ?Sized> SynthesisGateway for Box<G> {
    fn synthesize(
        &mut self,
        request: &SynthesisRequest<'_>,
    ) -> Result<SynthesisOutput, GatewayError> {
        (**self).synthesize(request)
    }

    fn release_memory(&mut self) {
        (**self).release_memory()
    }

    fn speakers(&mut self) -> Option<Vec<String>> {
        (**self).speakers()
    }
}

/// Pick the configured voice from the backend's list, ignoring case.
///
/// Falls back to the first listed speaker when there is no match.  When the
/// backend cannot list speakers, the configured voice is used as is.
pub fn resolve_speaker(requested: &str, available: Option<&[String]>) -> String {
    let Some(available) = available.filter(|a| !a.is_empty()) else {
        return requested.to_string();
    };
    if let Some(found) = available.iter().find(|s| s.eq_ignore_ascii_case(requested)) {
        return found.clone();
    }
    log::warn!(
        "Voice '{}' not in supported speakers {:?}. Using '{}'.",
        requested,
        available,
        available[0]
    );
    available[0].clone()
}

// ─────────────────────────────────────────────────────────────────────────────
// Scripted gateway for tests
// ─────────────────────────────────────────────────────────────────────────────


// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
