//! Subprocess synthesis gateway.
//!
//! Drives a long-lived speech worker (any program that loads the model once
//! and serves requests) over newline-delimited JSON on stdin/stdout.  One
//! request line in, one reply line out:
//!
//! ```text
//! → {"op":"speakers"}
//! ← {"ok":true,"speakers":["Ryan","Serena"]}
//!
//! → {"op":"synthesize","texts":[…],"speakers":[…],"sampling":{…},"out_dir":"/tmp/.tmpX/batch-Y"}
//! ← {"ok":true,"files":["/tmp/.tmpX/batch-Y/0.wav", …]}
//! ← {"ok":false,"error":"CUDA out of memory. Tried to allocate …","kind":"retriable_resource"}
//!
//! → {"op":"release_memory"}
//! ← {"ok":true}
//! ```
//!
//! The worker writes one mono WAV per text into `out_dir`; they are read
//! back here and the directory is removed.  `kind` is optional: untagged
//! errors go through [`GatewayError::classify`].  Stdout lines that are not
//! a JSON object with an `ok` field are logged at debug level and skipped;
//! the worker's own logging still belongs on stderr.

use std::{
    io::{BufRead, BufReader, Write},
    path::{Path, PathBuf},
    process::{Child, ChildStdin, ChildStdout, Command, Stdio},
};

use anyhow::{Context, Result};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use tempfile::TempDir;

use crate::{
    audio::Artifact,
    gateway::{FailureClass, GatewayError, SynthesisGateway, SynthesisOutput, SynthesisRequest},
};

// ─────────────────────────────────────────────────────────────────────────────
// Wire format
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum WorkerRequest<'a> {
    Speakers,
    Synthesize {
        #[serde(flatten)]
        request: &'a SynthesisRequest<'a>,
        out_dir: &'a Path,
    },
    ReleaseMemory,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct WorkerReply {
    ok: bool,
    error: Option<String>,
    kind: Option<FailureClass>,
    files: Vec<PathBuf>,
    speakers: Option<Vec<String>>,
}

impl WorkerReply {
    fn into_error(self) -> GatewayError {
        let message = self.error.unwrap_or_else(|| "worker reported failure".to_string());
        match self.kind {
            Some(class) => GatewayError::from_class(class, message),
            None => GatewayError::classify(message),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// CommandGateway
// ─────────────────────────────────────────────────────────────────────────────

pub struct CommandGateway {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
    scratch: TempDir,
}

impl CommandGateway {
    /// Start `program` with `args`.  The worker's stderr is inherited.
    pub fn spawn<S: AsRef<str>>(program: &str, args: &[S]) -> Result<Self> {
        let mut child = Command::new(program)
            .args(args.iter().map(AsRef::as_ref))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .with_context(|| format!("Cannot start synthesis worker '{}'", program))?;

        let stdin = child.stdin.take().context("Worker stdin not captured")?;
        let stdout = child.stdout.take().context("Worker stdout not captured")?;
        let scratch = tempfile::Builder::new()
            .prefix("narrate-")
            .tempdir()
            .context("Cannot create scratch directory for worker output")?;

        debug!("Started worker '{}' (pid {})", program, child.id());
        Ok(Self { child, stdin, stdout: BufReader::new(stdout), scratch })
    }

    fn exchange(&mut self, request: &WorkerRequest<'_>) -> Result<WorkerReply, GatewayError> {
        let line = serde_json::to_string(request)
            .map_err(|e| GatewayError::Other(format!("cannot encode worker request: {}", e)))?;
        writeln!(self.stdin, "{}", line)
            .and_then(|_| self.stdin.flush())
            .map_err(|e| GatewayError::Other(format!("worker is not accepting requests: {}", e)))?;

        // Lines that are not a reply object (banners, stray prints) are skipped
        // so the next reply still pairs with this request.
        let mut line = String::new();
        loop {
            line.clear();
            let n = self
                .stdout
                .read_line(&mut line)
                .map_err(|e| GatewayError::Other(format!("cannot read worker reply: {}", e)))?;
            if n == 0 {
                return Err(GatewayError::Other("worker exited before replying".to_string()));
            }
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            match serde_json::from_str::<serde_json::Value>(trimmed) {
                Ok(value) if value.get("ok").is_some() => {
                    return serde_json::from_value(value).map_err(|e| {
                        GatewayError::Other(format!("malformed worker reply: {}", e))
                    });
                }
                _ => debug!("Ignoring worker output: {}", trimmed),
            }
        }
    }

    fn read_outputs(files: &[PathBuf]) -> Result<SynthesisOutput, GatewayError> {
        let mut audio = Vec::with_capacity(files.len());
        let mut sample_rate = None;
        for path in files {
            let artifact = Artifact::read_wav(path)
                .map_err(|e| GatewayError::Other(format!("{:#}", e)))?;
            match sample_rate {
                None => sample_rate = Some(artifact.sample_rate),
                Some(rate) if rate != artifact.sample_rate => {
                    return Err(GatewayError::Other(format!(
                        "worker returned mixed sample rates ({} and {} Hz)",
                        rate, artifact.sample_rate
                    )));
                }
                Some(_) => {}
            }
            audio.push(artifact.samples);
        }
        let sample_rate = sample_rate
            .ok_or_else(|| GatewayError::Other("worker returned no audio".to_string()))?;
        Ok(SynthesisOutput { audio, sample_rate })
    }
}

impl SynthesisGateway for CommandGateway {
    fn synthesize(
        &mut self,
        request: &SynthesisRequest<'_>,
    ) -> Result<SynthesisOutput, GatewayError> {
        let batch_dir = tempfile::Builder::new()
            .prefix("batch-")
            .tempdir_in(self.scratch.path())
            .map_err(|e| GatewayError::Other(format!("cannot create batch directory: {}", e)))?;

        let reply = self.exchange(&WorkerRequest::Synthesize {
            request,
            out_dir: batch_dir.path(),
        })?;
        if !reply.ok {
            return Err(reply.into_error());
        }
        Self::read_outputs(&reply.files)
    }

    fn release_memory(&mut self) {
        match self.exchange(&WorkerRequest::ReleaseMemory) {
            Ok(reply) if reply.ok => {}
            Ok(reply) => warn!("Worker could not release memory: {}", reply.into_error()),
            Err(e) => warn!("Worker could not release memory: {}", e),
        }
    }

    fn speakers(&mut self) -> Option<Vec<String>> {
        match self.exchange(&WorkerRequest::Speakers) {
            Ok(reply) if reply.ok => reply.speakers,
            Ok(reply) => {
                warn!("Worker cannot list speakers: {}", reply.into_error());
                None
            }
            Err(e) => {
                warn!("Worker cannot list speakers: {}", e);
                None
            }
        }
    }
}

impl Drop for CommandGateway {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
