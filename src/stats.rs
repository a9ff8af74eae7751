//! Offline run summary — reads `run.log` and the output directory.
//!
//! Works on the log lines written by the `narrate` binary:
//!
//! ```text
//! 2026-10-16T09:14:02Z - INFO - Generating batch of 8 chunks (remaining: 8)...
//! 2026-10-16T09:14:31Z - INFO - Batch completed in 28.41s
//! 2026-10-16T09:20:55Z - INFO - Done.
//! ```

use std::{fmt, path::{Path, PathBuf}};

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::store::{count_parts, FINAL_FILE_NAME};

/// Log file written next to the audio by the CLI.
pub const LOG_FILE_NAME: &str = "run.log";

static RE_TIMESTAMP: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^(\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}Z) - ").unwrap());
static RE_BATCH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"Batch completed in ([0-9]+\.[0-9]+)s").unwrap());

/// avg / p50 / min / max of batch durations in seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BatchSummary {
    pub count: usize,
    pub avg: f64,
    pub p50: f64,
    pub min: f64,
    pub max: f64,
}

impl BatchSummary {
    /// `None` for an empty slice.  The median of an even count is the mean
    /// of the two middle values.
    pub fn from_durations(durations: &[f64]) -> Option<Self> {
        if durations.is_empty() {
            return None;
        }
        let mut sorted = durations.to_vec();
        sorted.sort_by(f64::total_cmp);
        let n = sorted.len();
        let p50 = if n % 2 == 1 {
            sorted[n / 2]
        } else {
            (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
        };
        Some(Self {
            count: n,
            avg: sorted.iter().sum::<f64>() / n as f64,
            p50,
            min: sorted[0],
            max: sorted[n - 1],
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunStats {
    pub log_path: PathBuf,
    pub log_exists: bool,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub batches: Option<BatchSummary>,
    pub parts: usize,
    /// Size of the assembled narration, if it exists.
    pub final_size_bytes: Option<u64>,
    pub done: bool,
}

impl RunStats {
    pub fn wall(&self) -> Option<Duration> {
        Some(self.end? - self.start?)
    }

    pub fn batch_count(&self) -> usize {
        self.batches.map_or(0, |b| b.count)
    }

    pub fn final_size_mb(&self) -> Option<f64> {
        self.final_size_bytes.map(|b| b as f64 / (1024.0 * 1024.0))
    }
}

/// Summarize the run whose artifacts live in `output_dir`.  A missing log is
/// not an error; the log-derived fields are simply empty.
pub fn summarize(output_dir: &Path) -> Result<RunStats> {
    let log_path = output_dir.join(LOG_FILE_NAME);
    let log_exists = log_path.is_file();
    let text = if log_exists {
        let bytes = std::fs::read(&log_path)
            .with_context(|| format!("Cannot read {}", log_path.display()))?;
        String::from_utf8_lossy(&bytes).into_owned()
    } else {
        String::new()
    };

    let stamps: Vec<DateTime<Utc>> = RE_TIMESTAMP
        .captures_iter(&text)
        .filter_map(|c| DateTime::parse_from_rfc3339(&c[1]).ok())
        .map(|t| t.with_timezone(&Utc))
        .collect();
    let start = stamps.first().copied();
    let end = if stamps.len() >= 2 { stamps.last().copied() } else { None };

    let durations: Vec<f64> = RE_BATCH
        .captures_iter(&text)
        .filter_map(|c| c[1].parse().ok())
        .collect();

    let parts = if output_dir.is_dir() { count_parts(output_dir)? } else { 0 };
    let final_path = output_dir.join(FINAL_FILE_NAME);
    let final_size_bytes = std::fs::metadata(&final_path).ok().map(|m| m.len());

    Ok(RunStats {
        log_path,
        log_exists,
        start,
        end,
        batches: BatchSummary::from_durations(&durations),
        parts,
        final_size_bytes,
        done: text.contains(" - INFO - Done."),
    })
}

fn format_wall(d: Duration) -> String {
    let secs = d.num_seconds();
    format!("{}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}

impl fmt::Display for RunStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let yes_no = |b: bool| if b { "yes" } else { "no" };
        writeln!(
            f,
            "Log      : {} ({})",
            self.log_path.display(),
            if self.log_exists { "exists" } else { "missing" }
        )?;
        if let Some(start) = self.start {
            writeln!(f, "Start    : {}", start.format("%Y-%m-%d %H:%M:%S"))?;
        }
        if let Some(end) = self.end {
            writeln!(f, "End      : {}", end.format("%Y-%m-%d %H:%M:%S"))?;
        }
        if let Some(wall) = self.wall() {
            writeln!(f, "Wall     : {}", format_wall(wall))?;
        }
        writeln!(f, "Parts    : {}", self.parts)?;
        match self.final_size_mb() {
            Some(mb) => writeln!(f, "Full wav : yes ({:.1} MB)", mb)?,
            None => writeln!(f, "Full wav : no")?,
        }
        writeln!(f, "Done     : {}", yes_no(self.done))?;
        write!(f, "Batches  : {}", self.batch_count())?;
        if let Some(b) = self.batches {
            write!(
                f,
                "\nBatch s  : avg={:.2} p50={:.2} min={:.2} max={:.2}",
                b.avg, b.p50, b.min, b.max
            )?;
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
