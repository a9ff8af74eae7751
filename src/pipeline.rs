//! End-to-end narration run.
//!
//! ```text
//! raw text ─► MarkdownCleaner ─► split_text ─► ChunkRange::select
//!                                                   │
//!                 ChunkStore (cache) ◄──────► BatchScheduler ◄──► SynthesisGateway
//!                                                   │
//!                                      RunOutcome ◄─┴─► assemble ─► full_audiobook.wav
//! ```

use std::{ops::Range, path::PathBuf};

use anyhow::{bail, Context, Result};
use log::{info, warn};

use crate::{
    assemble::assemble,
    audio::DEFAULT_SAMPLE_RATE,
    config::RunConfig,
    gateway::{resolve_speaker, GatewayError, SynthesisGateway},
    preprocess::MarkdownCleaner,
    scheduler::{BatchScheduler, ScheduleReport},
    segment::Document,
    store::ChunkStore,
};

/// How a run ended.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// Every chunk in range has an artifact and the narration was written.
    Completed { final_path: PathBuf },
    /// Some windows failed.  `final_path` is set when the available
    /// artifacts were still assembled.
    PartiallyCompleted { final_path: Option<PathBuf>, missing: Vec<usize> },
    /// A device-side assert stopped the run; nothing was assembled.
    Aborted { completed: Vec<usize>, error: GatewayError },
}

impl RunOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }
}

#[derive(Debug)]
pub struct RunReport {
    pub outcome: RunOutcome,
    /// Chunks in the whole document.
    pub total_chunks: usize,
    /// Indices this run was responsible for.
    pub range: Range<usize>,
    /// Speaker actually sent to the gateway.
    pub speaker: String,
    pub schedule: ScheduleReport,
}

/// Owns a gateway and runs documents through it.
pub struct Narrator<G> {
    gateway: G,
    config: RunConfig,
    cleaner: MarkdownCleaner,
}

impl<G: SynthesisGateway> Narrator<G> {
    pub fn new(gateway: G, config: RunConfig) -> Self {
        Self { gateway, config, cleaner: MarkdownCleaner::new() }
    }

    pub fn with_cleaner(mut self, cleaner: MarkdownCleaner) -> Self {
        self.cleaner = cleaner;
        self
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn gateway(&self) -> &G {
        &self.gateway
    }

    pub fn into_gateway(self) -> G {
        self.gateway
    }

    /// Narrate `raw` into the configured output directory.
    ///
    /// Chunks that already have a `part_NNN.wav` are loaded instead of
    /// synthesized, so an interrupted run can simply be repeated.
    pub fn run(&mut self, raw: &str) -> Result<RunReport> {
        let config = &self.config;
        config.validate()?;

        let document = Document::new(raw, &self.cleaner);
        let chunks = document.chunks(config.segment.max_chunk_chars);
        if chunks.is_empty() {
            bail!("Input contains no narratable text");
        }
        info!("Split text into {} chunks", chunks.len());

        let range = config.range.resolve(chunks.len());
        if range.is_empty() {
            bail!(
                "Chunk range {:?} selects nothing from {} chunks",
                config.range,
                chunks.len()
            );
        }
        if !config.range.is_full(chunks.len()) {
            info!(
                "Processing chunks {}..{} ({} of {})",
                range.start,
                range.end,
                range.len(),
                chunks.len()
            );
        }

        let store = ChunkStore::open(&config.output_dir)?;
        let available = self.gateway.speakers();
        let speaker = resolve_speaker(&config.voice, available.as_deref());

        let scheduler = BatchScheduler::new(config.batch.clone(), &speaker, &config.sampling);
        let schedule = scheduler.run(&mut self.gateway, &store, config.range.select(&chunks));
        info!(
            "{} chunks cached, {} generated in {} batches",
            schedule.cached.len(),
            schedule.generated.len(),
            schedule.gateway_calls()
        );

        let outcome = if let Some(abort) = &schedule.aborted {
            warn!("Skipping final audio assembly due to fatal error.");
            RunOutcome::Aborted {
                completed: schedule.artifacts.keys().copied().collect(),
                error: abort.error.clone(),
            }
        } else {
            let missing: Vec<usize> =
                range.clone().filter(|i| !schedule.artifacts.contains_key(i)).collect();
            let final_path = if missing.is_empty() || config.assemble_partial {
                Self::write_final(&store, &schedule)?
            } else {
                None
            };

            match (missing.is_empty(), final_path) {
                (true, Some(final_path)) => RunOutcome::Completed { final_path },
                (_, final_path) => {
                    warn!("{} chunks have no audio: {:?}", missing.len(), missing);
                    RunOutcome::PartiallyCompleted { final_path, missing }
                }
            }
        };
        info!("Done.");

        Ok(RunReport { outcome, total_chunks: chunks.len(), range, speaker, schedule })
    }

    fn write_final(store: &ChunkStore, schedule: &ScheduleReport) -> Result<Option<PathBuf>> {
        if schedule.artifacts.is_empty() {
            warn!("No audio was generated; nothing to assemble.");
            return Ok(None);
        }
        let rate = schedule.sample_rate.unwrap_or(DEFAULT_SAMPLE_RATE);
        info!("Concatenating {} audio segments...", schedule.artifacts.len());
        let narration = assemble(&schedule.artifacts, rate).context("Final assembly failed")?;
        let path = store.save_final(&narration)?;
        info!(
            "Saved {} ({:.1}s of audio)",
            path.display(),
            narration.duration_secs()
        );
        Ok(Some(path))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::{
        path::Path,
        sync::Mutex,
        thread::{self, ThreadId},
    };

    use once_cell::sync::Lazy;

    use super::*;
    use crate::{
        audio::Artifact,
        gateway::{testing::ScriptedGateway, FailureClass},
        segment::ChunkRange,
        store::FINAL_FILE_NAME,
    };

    fn config(dir: &Path, max_chunk_chars: usize, batch_size: usize) -> RunConfig {
        let mut c = RunConfig { output_dir: dir.to_path_buf(), ..RunConfig::default() };
        c.segment.max_chunk_chars = max_chunk_chars;
        c.batch.batch_size = batch_size;
        c.batch.max_batch_chars = 0;
        c
    }

    /// Records log messages per test thread so parallel tests don't mix.
    struct CaptureLog;

    static CAPTURED: Lazy<Mutex<Vec<(ThreadId, String)>>> = Lazy::new(|| Mutex::new(Vec::new()));
    static CAPTURE_LOG: CaptureLog = CaptureLog;

    impl log::Log for CaptureLog {
        fn enabled(&self, _: &log::Metadata) -> bool {
            true
        }

        fn log(&self, record: &log::Record) {
            CAPTURED.lock().unwrap().push((thread::current().id(), record.args().to_string()));
        }

        fn flush(&self) {}
    }

    fn capture_logs() {
        if log::set_logger(&CAPTURE_LOG).is_ok() {
            log::set_max_level(log::LevelFilter::Info);
        }
    }

    fn logged_here() -> Vec<String> {
        let me = thread::current().id();
        CAPTURED
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _)| *id == me)
            .map(|(_, msg)| msg.clone())
            .collect()
    }

    /// Six short paragraphs, one chunk each at `max_chunk_chars = 10`.
    const SIX: &str = "Alpha.\n\nBravo.\n\nCharlie.\n\nDelta.\n\nEcho.\n\nFoxtrot.";

    #[test]
    fn test_two_paragraph_document_one_call() {
        let dir = tempfile::tempdir().unwrap();
        let p1 = "a".repeat(499) + ".";
        let p2 = (0..12).map(|_| "b".repeat(99) + ".").collect::<Vec<_>>().join(" ");
        let doc = format!("{}\n\n{}", p1, p2);

        let mut narrator = Narrator::new(ScriptedGateway::new(), config(dir.path(), 800, 8));
        let report = narrator.run(&doc).unwrap();

        assert!(report.total_chunks >= 3);
        assert_eq!(narrator.gateway().calls.len(), 1);
        assert_eq!(narrator.gateway().calls[0][0], p1);
        let final_path = match &report.outcome {
            RunOutcome::Completed { final_path } => final_path.clone(),
            other => panic!("expected completed run, got {:?}", other),
        };
        assert_eq!(final_path, dir.path().join(FINAL_FILE_NAME));

        let expected: usize = narrator.gateway().calls[0]
            .iter()
            .map(|t| ScriptedGateway::audio_for(t).len())
            .sum();
        let narration = Artifact::read_wav(&final_path).unwrap();
        assert_eq!(narration.samples.len(), expected);
        assert_eq!(narration.sample_rate, 24_000);
    }

    #[test]
    fn test_second_run_is_fully_cached() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path(), 10, 2);

        let mut first = Narrator::new(ScriptedGateway::new(), cfg.clone());
        let r1 = first.run(SIX).unwrap();
        assert!(r1.outcome.is_completed());
        assert_eq!(r1.schedule.generated.len(), 6);
        let parts: Vec<Vec<u8>> =
            (0..6).map(|i| std::fs::read(dir.path().join(format!("part_{:03}.wav", i))).unwrap()).collect();

        let mut second = Narrator::new(ScriptedGateway::new(), cfg);
        let r2 = second.run(SIX).unwrap();
        assert!(r2.outcome.is_completed());
        assert!(second.gateway().calls.is_empty());
        assert_eq!(r2.schedule.cached, (0..6).collect::<Vec<_>>());
        assert_eq!(parts.len(), 6);
        for (i, before) in parts.iter().enumerate() {
            let after = std::fs::read(dir.path().join(format!("part_{:03}.wav", i))).unwrap();
            assert_eq!(&after, before, "part {} changed", i);
        }
    }

    #[test]
    fn test_cached_rerun_writes_identical_final() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path(), 10, 4);
        let final_path = dir.path().join(FINAL_FILE_NAME);

        Narrator::new(ScriptedGateway::new(), cfg.clone()).run(SIX).unwrap();
        let first = std::fs::read(&final_path).unwrap();

        for _ in 0..2 {
            let mut narrator = Narrator::new(ScriptedGateway::new(), cfg.clone());
            narrator.run(SIX).unwrap();
            assert!(narrator.gateway().calls.is_empty());
            assert_eq!(std::fs::read(&final_path).unwrap(), first);
        }

        // the narration is exactly the parts, in order
        let narration = Artifact::read_wav(&final_path).unwrap();
        let parts: Vec<f32> = (0..6)
            .flat_map(|i| ChunkStore::open(dir.path()).unwrap().load(i).unwrap().samples)
            .collect();
        assert_eq!(narration.samples, parts);
    }

    #[test]
    fn test_device_assert_skips_assembly() {
        let dir = tempfile::tempdir().unwrap();
        let doc = "Alpha.\n\nBravo.\n\nDEVICE_ASSERT\n\nDelta.\n\nEcho.\n\nFoxtrot.";

        let mut narrator = Narrator::new(ScriptedGateway::new(), config(dir.path(), 10, 2));
        let report = narrator.run(doc).unwrap();

        match &report.outcome {
            RunOutcome::Aborted { completed, error } => {
                assert_eq!(completed, &vec![0, 1]);
                assert_eq!(error.class(), FailureClass::GlobalFatal);
            }
            other => panic!("expected abort, got {:?}", other),
        }
        assert_eq!(narrator.gateway().calls.len(), 2);
        assert!(!dir.path().join(FINAL_FILE_NAME).exists());
        assert!(dir.path().join("part_000.wav").exists());
        assert!(dir.path().join("part_001.wav").exists());
        assert!(!dir.path().join("part_004.wav").exists());
    }

    #[test]
    fn test_done_is_logged_after_abort() {
        capture_logs();
        let dir = tempfile::tempdir().unwrap();
        let doc = "Alpha.\n\nDEVICE_ASSERT";

        let report = Narrator::new(ScriptedGateway::new(), config(dir.path(), 10, 1))
            .run(doc)
            .unwrap();
        assert!(matches!(report.outcome, RunOutcome::Aborted { .. }));
        let lines = logged_here();
        assert_eq!(lines.last().map(String::as_str), Some("Done."));
    }

    #[test]
    fn test_contained_failure_assembles_partial() {
        let dir = tempfile::tempdir().unwrap();
        let doc = "Alpha.\n\nBravo.\n\nBOOM.\n\nDelta.\n\nEcho.\n\nFoxtrot.";

        let mut narrator = Narrator::new(ScriptedGateway::new(), config(dir.path(), 10, 2));
        let report = narrator.run(doc).unwrap();

        match report.outcome {
            RunOutcome::PartiallyCompleted { final_path, missing } => {
                assert_eq!(missing, vec![2, 3]);
                assert!(final_path.unwrap().exists());
            }
            other => panic!("expected partial run, got {:?}", other),
        }
    }

    #[test]
    fn test_partial_assembly_can_be_disabled() {
        let dir = tempfile::tempdir().unwrap();
        let doc = "Alpha.\n\nBravo.\n\nBOOM.\n\nDelta.";
        let mut cfg = config(dir.path(), 10, 2);
        cfg.assemble_partial = false;

        let report = Narrator::new(ScriptedGateway::new(), cfg).run(doc).unwrap();
        assert_eq!(
            report.outcome,
            RunOutcome::PartiallyCompleted { final_path: None, missing: vec![2, 3] }
        );
        assert!(!dir.path().join(FINAL_FILE_NAME).exists());
    }

    #[test]
    fn test_rerun_after_partial_fills_gaps() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path(), 10, 2);
        let broken = "Alpha.\n\nBravo.\n\nBOOM.\n\nDelta.";
        let fixed = "Alpha.\n\nBravo.\n\nCharlie.\n\nDelta.";

        Narrator::new(ScriptedGateway::new(), cfg.clone()).run(broken).unwrap();
        let mut narrator = Narrator::new(ScriptedGateway::new(), cfg);
        let report = narrator.run(fixed).unwrap();
        assert!(report.outcome.is_completed());
        assert_eq!(narrator.gateway().calls, vec![vec!["Charlie.".to_string(), "Delta.".to_string()]]);
    }

    #[test]
    fn test_range_uses_document_indices() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(dir.path(), 10, 8);
        cfg.range = ChunkRange { start: 2, end: None, max_chunks: Some(2) };

        let mut narrator = Narrator::new(ScriptedGateway::new(), cfg);
        let report = narrator.run(SIX).unwrap();
        assert_eq!(report.range, 2..4);
        assert_eq!(report.total_chunks, 6);
        assert!(report.outcome.is_completed());
        assert_eq!(narrator.gateway().calls, vec![vec!["Charlie.".to_string(), "Delta.".to_string()]]);
        assert!(dir.path().join("part_002.wav").exists());
        assert!(dir.path().join("part_003.wav").exists());
        assert!(!dir.path().join("part_000.wav").exists());
    }

    #[test]
    fn test_voice_resolved_against_backend() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(dir.path(), 800, 8);
        cfg.voice = "serena".to_string();
        let gw = ScriptedGateway {
            speaker_list: Some(vec!["Ryan".to_string(), "Serena".to_string()]),
            ..ScriptedGateway::new()
        };

        let mut narrator = Narrator::new(gw, cfg);
        let report = narrator.run("Hello there.").unwrap();
        assert_eq!(report.speaker, "Serena");
        assert_eq!(narrator.gateway().speakers_seen, vec![vec!["Serena".to_string()]]);
    }

    #[test]
    fn test_empty_input_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut narrator = Narrator::new(ScriptedGateway::new(), config(dir.path(), 800, 8));
        assert!(narrator.run("---\ntitle: x\n---\n\n   ").is_err());
        assert!(narrator.gateway().calls.is_empty());
    }

    #[test]
    fn test_mixed_rates_fail_assembly() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path(), 10, 8);
        let store = ChunkStore::open(dir.path()).unwrap();
        store.save(0, &Artifact::new(vec![0.0; 4], 16_000)).unwrap();

        let err = Narrator::new(ScriptedGateway::new(), cfg).run(SIX).unwrap_err();
        assert!(format!("{:#}", err).contains("16000 Hz"));
    }
}
