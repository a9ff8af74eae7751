//! Per-chunk artifact store on the filesystem.
//!
//! Layout of the output directory:
//!
//! ```text
//! output_audio/
//! ├── part_000.wav          # one file per chunk index
//! ├── part_001.wav
//! ├── …
//! └── full_audiobook.wav    # assembled narration
//! ```
//!
//! The presence of `part_NNN.wav` is the only resume signal; there is no
//! manifest.  Runs against the same directory must not overlap.

use std::{
    fs,
    ops::Range,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use log::warn;

use crate::audio::Artifact;

/// File name of the assembled narration.
pub const FINAL_FILE_NAME: &str = "full_audiobook.wav";

/// Name of the per-chunk file for `index` (`7` → `part_007.wav`).
pub fn part_file_name(index: usize) -> String {
    format!("part_{:03}.wav", index)
}

#[derive(Debug, Clone)]
pub struct ChunkStore {
    dir: PathBuf,
}

impl ChunkStore {
    /// Open (and create if needed) the store rooted at `dir`.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("Cannot create output directory: {}", dir.display()))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn part_path(&self, index: usize) -> PathBuf {
        self.dir.join(part_file_name(index))
    }

    pub fn final_path(&self) -> PathBuf {
        self.dir.join(FINAL_FILE_NAME)
    }

    pub fn exists(&self, index: usize) -> bool {
        self.part_path(index).is_file()
    }

    pub fn load(&self, index: usize) -> Result<Artifact> {
        Artifact::read_wav(&self.part_path(index))
            .with_context(|| format!("Cannot load artifact for chunk {}", index))
    }

    /// Cached artifact for `index`, if present and readable.
    ///
    /// A corrupt file is reported and treated as absent so the chunk is
    /// synthesized again.
    pub fn lookup(&self, index: usize) -> Option<Artifact> {
        if !self.exists(index) {
            return None;
        }
        match self.load(index) {
            Ok(artifact) => Some(artifact),
            Err(e) => {
                warn!("Ignoring unreadable {}: {:#}", part_file_name(index), e);
                None
            }
        }
    }

    /// Persist the artifact for `index`.
    ///
    /// Written to a temporary file first and renamed, so an interrupted
    /// write never leaves a file that looks complete.
    pub fn save(&self, index: usize, artifact: &Artifact) -> Result<()> {
        write_atomically(artifact, &self.part_path(index))
    }

    pub fn save_final(&self, artifact: &Artifact) -> Result<PathBuf> {
        let path = self.final_path();
        write_atomically(artifact, &path)?;
        Ok(path)
    }

    /// Indices in `range` that have no artifact yet.
    pub fn missing(&self, range: Range<usize>) -> Vec<usize> {
        range.filter(|&i| !self.exists(i)).collect()
    }

    /// Number of `part_*.wav` files in the directory.
    pub fn part_count(&self) -> Result<usize> {
        count_parts(&self.dir)
    }
}

fn write_atomically(artifact: &Artifact, path: &Path) -> Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    artifact.write_wav(&tmp)?;
    fs::rename(&tmp, path)
        .with_context(|| format!("Cannot move {} into place", path.display()))?;
    Ok(())
}

/// Count `part_*.wav` files in `dir`.
pub fn count_parts(dir: &Path) -> Result<usize> {
    let entries =
        fs::read_dir(dir).with_context(|| format!("Cannot list {}", dir.display()))?;
    let mut count = 0;
    for entry in entries {
        let name = entry?.file_name();
        let name = name.to_string_lossy();
        if name.starts_with("part_") && name.ends_with(".wav") {
            count += 1;
        }
    }
    Ok(count)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
