use anyhow::{Context, Result};
use std::path::Path;

use crate::config::PipelineConfig;
use crate::ffmpeg::{Invocation, Transcoder};
use crate::manifest::{self, ManifestWriter};
use crate::plan::PipelinePlan;
use crate::progress::ProgressHandle;

#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    pub show_commands: bool,
}

/// Execute a reconstruction plan, strictly in order: extraction (writing each
/// tile's concat list as it goes), per-tile concat, the two rows, then the
/// final frame. The first failure aborts the run.
pub fn execute(
    cfg: &PipelineConfig,
    plan: &PipelinePlan,
    transcoder: &mut dyn Transcoder,
    progress: &ProgressHandle,
    opts: RunOptions,
) -> Result<()> {
    std::fs::create_dir_all(&cfg.output_dir)
        .with_context(|| format!("create output dir {}", cfg.output_dir.display()))?;
    remove_stale_output(&cfg.final_video, progress)?;

    let program = cfg.ffmpeg.as_path();
    let total_segments = plan.segment_count();
    let mut done_segments = 0usize;

    for tile in &plan.tiles {
        progress.set_stage(format!("extract tile {}", tile.tile));
        let mut writer = ManifestWriter::create(&tile.manifest_path)?;
        for job in &tile.segments {
            writer.append(&job.manifest_line)?;
            done_segments += 1;
            progress.set_operation_status(
                "extract",
                format!("{} ({}/{})", job.file_name, done_segments, total_segments),
            );
            run_step(transcoder, &job.invocation, program, progress, opts)?;
        }
        writer.finish()?;
    }
    progress.clear_operation("extract");

    for (tile, inv) in plan.concat.iter().enumerate() {
        progress.set_stage(format!("concat tile {}", tile));
        manifest::check_segments_present(tile, &cfg.manifest_path(tile))
            .context("was running stage concat")?;
        run_step(transcoder, inv, program, progress, opts)?;
    }

    for inv in &plan.rows {
        progress.set_stage(format!("hstack {}", inv.label));
        run_step(transcoder, inv, program, progress, opts)?;
    }

    progress.set_stage("vstack frame");
    if let Err(err) = run_step(transcoder, &plan.frame, program, progress, opts) {
        discard_partial_output(&cfg.final_video, progress);
        return Err(err);
    }
    Ok(())
}

fn run_step(
    transcoder: &mut dyn Transcoder,
    inv: &Invocation,
    program: &Path,
    progress: &ProgressHandle,
    opts: RunOptions,
) -> Result<()> {
    if opts.show_commands {
        progress.log(format!("running: {}", inv.command_line(program)));
    }
    transcoder.run(inv)?;
    progress.inc_steps(1);
    Ok(())
}

fn remove_stale_output(path: &Path, progress: &ProgressHandle) -> Result<()> {
    if path.is_file() {
        std::fs::remove_file(path)
            .with_context(|| format!("remove previous output {}", path.display()))?;
        progress.warn(format!(
            "removed final video left by an earlier run: {}",
            path.display()
        ));
    }
    Ok(())
}

/// A failed frame stack may have written part of the final video already.
fn discard_partial_output(path: &Path, progress: &ProgressHandle) {
    if !path.exists() {
        return;
    }
    if let Err(err) = std::fs::remove_file(path) {
        progress.warn(format!(
            "could not remove partial final video {}: {}",
            path.display(),
            err
        ));
    }
}
