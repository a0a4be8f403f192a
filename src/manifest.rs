use anyhow::{Context, Result};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::error::PipelineError;

/// One line of an ffmpeg concat-demuxer list. Names are resolved relative to
/// the list file's own directory.
pub fn manifest_line(name: &str) -> Result<String, PipelineError> {
    if name.contains('\'') || name.contains('\n') || name.contains('\r') {
        return Err(PipelineError::UnquotableName(name.to_string()));
    }
    Ok(format!("file '{}'", name))
}

/// Incrementally written concat list for one tile. Lines are appended as the
/// segments are extracted, so the file order is the extraction order.
pub struct ManifestWriter {
    path: PathBuf,
    out: BufWriter<File>,
    lines: usize,
}

impl ManifestWriter {
    pub fn create(path: &Path) -> Result<Self> {
        let f = File::create(path).with_context(|| format!("create manifest {}", path.display()))?;
        Ok(Self {
            path: path.to_path_buf(),
            out: BufWriter::new(f),
            lines: 0,
        })
    }

    pub fn append(&mut self, line: &str) -> Result<()> {
        writeln!(self.out, "{}", line)
            .with_context(|| format!("write manifest {}", self.path.display()))?;
        self.lines += 1;
        Ok(())
    }

    pub fn finish(mut self) -> Result<usize> {
        self.out
            .flush()
            .with_context(|| format!("flush manifest {}", self.path.display()))?;
        Ok(self.lines)
    }
}

/// Read a concat list back into its ordered file names.
pub fn read_names(path: &Path) -> Result<Vec<String>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("read manifest {}", path.display()))?;
    Ok(parse_names(&text))
}

pub fn parse_names(text: &str) -> Vec<String> {
    text.lines()
        .filter_map(|line| {
            line.trim()
                .strip_prefix("file '")
                .and_then(|rest| rest.strip_suffix('\''))
                .map(str::to_string)
        })
        .collect()
}

/// Concat precondition: the list is non-empty and every file it names exists
/// next to it.
pub fn check_segments_present(tile: usize, path: &Path) -> Result<()> {
    let names = read_names(path)?;
    if names.is_empty() {
        return Err(PipelineError::EmptyTile { tile }.into());
    }
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    for name in names {
        if !dir.join(&name).is_file() {
            return Err(PipelineError::MissingSegment {
                tile,
                manifest: path.to_path_buf(),
                name,
            }
            .into());
        }
    }
    Ok(())
}
