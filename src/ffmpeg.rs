use anyhow::{bail, Context, Result};
use std::collections::VecDeque;
use std::ffi::OsString;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread::JoinHandle;

use crate::error::{PipelineError, Stage};

const STDERR_TAIL_LINES: usize = 20;

/// One requested transcoder operation.
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    pub stage: Stage,
    pub label: String,
    pub args: Vec<OsString>,
    pub output: PathBuf,
}

impl Invocation {
    pub fn new(stage: Stage, label: impl Into<String>, output: PathBuf) -> Self {
        let mut inv = Self {
            stage,
            label: label.into(),
            args: Vec::new(),
            output,
        };
        inv.args(["-hide_banner", "-nostdin", "-loglevel", "error", "-y"]);
        inv
    }

    pub fn arg(&mut self, a: impl Into<OsString>) -> &mut Self {
        self.args.push(a.into());
        self
    }

    pub fn args<I, S>(&mut self, items: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(items.into_iter().map(Into::into));
        self
    }

    pub fn args_lossy(&self) -> Vec<String> {
        self.args
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    pub fn command_line(&self, program: &Path) -> String {
        let mut parts = vec![program.display().to_string()];
        parts.extend(self.args_lossy().into_iter().map(|a| {
            if a.is_empty() || a.contains(' ') || a.contains(';') || a.contains('[') {
                format!("\"{}\"", a)
            } else {
                a
            }
        }));
        parts.join(" ")
    }
}

/// The seam between the pipeline and the external transcoder.
pub trait Transcoder {
    fn run(&mut self, inv: &Invocation) -> Result<(), PipelineError>;
}

/// Runs invocations as blocking `ffmpeg` subprocesses.
pub struct FfmpegRunner {
    program: PathBuf,
}

impl FfmpegRunner {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Transcoder for FfmpegRunner {
    fn run(&mut self, inv: &Invocation) -> Result<(), PipelineError> {
        let mut child = Command::new(&self.program)
            .args(&inv.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| PipelineError::Spawn {
                stage: inv.stage,
                label: inv.label.clone(),
                program: self.program.clone(),
                source,
            })?;

        let stderr_handle = child.stderr.take().map(spawn_stderr_collector);
        let status = child.wait().map_err(|source| PipelineError::Spawn {
            stage: inv.stage,
            label: inv.label.clone(),
            program: self.program.clone(),
            source,
        })?;
        let stderr_tail = stderr_handle
            .and_then(|h| h.join().ok())
            .unwrap_or_default();

        if !status.success() {
            return Err(PipelineError::ExternalToolFailure {
                stage: inv.stage,
                label: inv.label.clone(),
                status: status.to_string(),
                stderr_tail,
            });
        }
        Ok(())
    }
}

pub fn ensure_ffmpeg_available(program: &Path) -> Result<()> {
    let out = Command::new(program)
        .arg("-version")
        .stdin(Stdio::null())
        .output()
        .with_context(|| format!("failed to run {} -version", program.display()))?;
    if !out.status.success() {
        bail!(
            "{} exists but returned non-zero on -version",
            program.display()
        );
    }
    Ok(())
}

fn spawn_stderr_collector(stderr: impl Read + Send + 'static) -> JoinHandle<Vec<String>> {
    std::thread::spawn(move || {
        let mut lines = VecDeque::new();
        let mut reader = BufReader::new(stderr);
        let mut line = String::new();

        loop {
            line.clear();
            let read = reader.read_line(&mut line).unwrap_or(0);
            if read == 0 {
                break;
            }
            let cleaned = line.trim().to_string();
            if cleaned.is_empty() {
                continue;
            }
            lines.push_back(cleaned);
            if lines.len() > STDERR_TAIL_LINES {
                lines.pop_front();
            }
        }

        lines.into_iter().collect::<Vec<_>>()
    })
}
