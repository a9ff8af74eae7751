//! # narrator
//!
//! Bulk narration of long documents — papers, books, notes — through an
//! external speech-generation engine.  The engine only has to turn a batch
//! of texts into audio; everything that makes a multi-hour job practical
//! lives here:
//!
//! - Markdown cleanup and chunking into model-sized pieces
//! - batching under a count limit and a character budget
//! - halving the batch on out-of-memory and padding errors instead of failing
//! - a per-chunk WAV cache, so an interrupted run resumes where it stopped
//! - ordered assembly into one `full_audiobook.wav`
//!
//! ## Quick start
//!
//! ```no_run
//! use narrator::{CommandGateway, Narrator, RunConfig};
//!
//! let worker = CommandGateway::spawn("python3", &["tts_worker.py"]).unwrap();
//! let mut narrator = Narrator::new(worker, RunConfig::default());
//!
//! let text = std::fs::read_to_string("paper.md").unwrap();
//! let report = narrator.run(&text).unwrap();
//! println!("{:?}", report.outcome);
//! ```
//!
//! Any backend can be plugged in by implementing [`SynthesisGateway`].
//!
//! ## Pipeline
//! 1. **Cleanup** — front matter, headers, emphasis, links, images, citations, URLs.
//! 2. **Chunking** — paragraphs packed up to 800 chars; long paragraphs split on sentences.
//! 3. **Range** — optional `[start, end)` / max-chunk window, document indices kept.
//! 4. **Cache** — chunks with an existing `part_NNN.wav` are loaded, not synthesized.
//! 5. **Scheduling** — windows of `batch_size`, clamped by `max_batch_chars`, halved on retriable errors.
//! 6. **Assembly** — artifacts concatenated in index order, skipped after a device-side assert.

pub mod assemble;
pub mod audio;
pub mod config;
pub mod gateway;
pub mod pipeline;
pub mod preprocess;
pub mod scheduler;
pub mod segment;
pub mod stats;
pub mod store;

// Long-lived speech worker driven over JSON lines.
pub mod worker;

// ─── Re-exports for convenience ─────────────────────────────────────────────

pub use audio::{Artifact, DEFAULT_SAMPLE_RATE};
pub use config::RunConfig;
pub use gateway::{FailureClass, GatewayError, SamplingConfig, SynthesisGateway};
pub use pipeline::{Narrator, RunOutcome, RunReport};
pub use segment::{segment, Chunk};
pub use store::ChunkStore;
pub use worker::CommandGateway;
