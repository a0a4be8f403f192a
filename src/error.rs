use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::config::TILE_COUNT;

/// Which pipeline stage an invocation belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Extract,
    Concat,
    RowStack,
    FrameStack,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Extract => "extract",
            Stage::Concat => "concat",
            Stage::RowStack => "hstack",
            Stage::FrameStack => "vstack",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("quality log entry {position}: {reason}")]
    MalformedLogEntry { position: usize, reason: String },

    #[error("was running stage {stage} ({label}): ffmpeg exited with {status}{}", format_tail(.stderr_tail))]
    ExternalToolFailure {
        stage: Stage,
        label: String,
        status: String,
        stderr_tail: Vec<String>,
    },

    #[error("was running stage {stage} ({label}): failed to launch {}", .program.display())]
    Spawn {
        stage: Stage,
        label: String,
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("tile {tile} of {} has no logged segments to concatenate", TILE_COUNT)]
    EmptyTile { tile: usize },

    #[error("tile {tile}: manifest {manifest:?} references missing segment {name}")]
    MissingSegment {
        tile: usize,
        manifest: PathBuf,
        name: String,
    },

    #[error("segment name {0:?} cannot appear in a concat manifest")]
    UnquotableName(String),
}

fn format_tail(lines: &[String]) -> String {
    if lines.is_empty() {
        String::new()
    } else {
        format!("\n  {}", lines.join("\n  "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_failure_names_the_stage_and_keeps_stderr() {
        let err = PipelineError::ExternalToolFailure {
            stage: Stage::Concat,
            label: "tile 3".to_string(),
            status: "exit status: 1".to_string(),
            stderr_tail: vec!["3_concat.txt: No such file or directory".to_string()],
        };
        let text = err.to_string();
        assert!(text.starts_with("was running stage concat (tile 3)"), "{text}");
        assert!(text.contains("No such file or directory"), "{text}");
    }

    #[test]
    fn malformed_entry_reports_position() {
        let err = PipelineError::MalformedLogEntry {
            position: 4,
            reason: "tileIndex 8 is outside 0..8".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "quality log entry 4: tileIndex 8 is outside 0..8"
        );
    }
}
