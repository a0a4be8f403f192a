mod config;
mod error;
mod ffmpeg;
mod manifest;
mod pipeline;
mod plan;
mod progress;
mod quality_log;
mod trace;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use config::{PipelineConfig, QualityFolders};
use progress::{
    format_duration, ProgressConfig, ProgressMode, ProgressReporter, ReconstructSummary,
    TraceSummary,
};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "tile360",
    version,
    about = "Tiled 360° video tools: rebuild the equirectangular frame from a quality log, generate camera traces"
)]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Stitch logged per-tile segments back into one equirectangular video
    Reconstruct {
        /// Folder holding one subfolder per quality tier
        #[arg(long, default_value = "tiles")]
        tile_dir: PathBuf,

        /// Where segments, concat lists, tile and row videos are written
        #[arg(long, default_value = "segments")]
        output_dir: PathBuf,

        /// Quality log (JSON array or one object per line)
        #[arg(long, default_value = "quality_log.json")]
        log_file: PathBuf,

        /// Path of the reconstructed video
        #[arg(long, default_value = "final_output.mp4")]
        final_video: PathBuf,

        /// Subfolder of --tile-dir for the "low" tier
        #[arg(long, default_value = "144p")]
        low_dir: String,

        /// Subfolder of --tile-dir for the "mid" tier
        #[arg(long, default_value = "360p")]
        mid_dir: String,

        /// Subfolder of --tile-dir for the "high" tier
        #[arg(long, default_value = "480p")]
        high_dir: String,

        /// ffmpeg binary to run
        #[arg(long, default_value = "ffmpeg")]
        ffmpeg: PathBuf,

        /// Print the planned ffmpeg commands and exit without running them.
        #[arg(long, default_value_t = false)]
        dry_run: bool,

        /// Log every ffmpeg command line before running it.
        #[arg(long, default_value_t = false)]
        show_commands: bool,

        /// Progress display mode: auto (TTY-aware), rich, plain, quiet.
        #[arg(long, value_enum, default_value_t = ProgressMode::Auto)]
        progress: ProgressMode,
    },

    /// Generate a random camera trace as CSV
    Trace {
        #[arg(long, default_value = "camera_trace.csv")]
        output: PathBuf,

        /// Trace length in seconds (inclusive)
        #[arg(long, default_value_t = 30.0)]
        duration: f64,

        /// Seconds between samples
        #[arg(long, default_value_t = 0.2)]
        interval: f64,

        /// Seed for a reproducible trace
        #[arg(long)]
        seed: Option<u64>,

        /// Add the index of the closest tile direction as a "quadrant" column
        #[arg(long, default_value_t = false)]
        quadrant: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.cmd {
        Commands::Reconstruct {
            tile_dir,
            output_dir,
            log_file,
            final_video,
            low_dir,
            mid_dir,
            high_dir,
            ffmpeg,
            dry_run,
            show_commands,
            progress,
        } => {
            let cfg = PipelineConfig {
                tile_dir,
                output_dir,
                log_file,
                final_video,
                quality_folders: QualityFolders {
                    low: low_dir,
                    mid: mid_dir,
                    high: high_dir,
                },
                ffmpeg,
                ..PipelineConfig::default()
            };
            if dry_run {
                print_plan(&cfg)?;
            } else {
                let summary = reconstruct(&cfg, ProgressConfig::new(progress), show_commands)?;
                print_reconstruct_summary(&summary);
            }
        }

        Commands::Trace {
            output,
            duration,
            interval,
            seed,
            quadrant,
        } => {
            let params = trace::TraceParams {
                duration_secs: duration,
                interval_secs: interval,
                with_quadrant: quadrant,
            };
            let samples = trace::write_trace_file(&output, &params, seed)?;
            print_trace_summary(&TraceSummary {
                output,
                samples,
                duration_secs: duration,
                interval_secs: interval,
                seed,
            });
        }
    }

    Ok(())
}

fn reconstruct(
    cfg: &PipelineConfig,
    progress_cfg: ProgressConfig,
    show_commands: bool,
) -> Result<ReconstructSummary> {
    // The log is validated before anything is spawned, including `ffmpeg -version`.
    let log = quality_log::load(&cfg.log_file)?;
    let plan = plan::plan(cfg, &log)?;

    ffmpeg::ensure_ffmpeg_available(&cfg.ffmpeg)
        .with_context(|| format!("{} not found or not runnable", cfg.ffmpeg.display()))?;

    let reporter = ProgressReporter::new(
        "reconstruct",
        plan.invocation_count() as u64,
        progress_cfg,
    );
    let handle = reporter.handle();
    handle.log(format!(
        "plan: entries={} segments={} tiles_with_segments={} invocations={}",
        log.len(),
        plan.segment_count(),
        plan.tiles.iter().filter(|t| !t.segments.is_empty()).count(),
        plan.invocation_count()
    ));

    let mut runner = ffmpeg::FfmpegRunner::new(&cfg.ffmpeg);
    pipeline::execute(
        cfg,
        &plan,
        &mut runner,
        &handle,
        pipeline::RunOptions { show_commands },
    )?;

    let outcome = reporter.finish(format!("reconstruction complete: {}", cfg.final_video.display()));
    Ok(ReconstructSummary {
        final_video: cfg.final_video.clone(),
        output_dir: cfg.output_dir.clone(),
        segment_count: plan.segment_count(),
        tiles_with_segments: plan.tiles.iter().filter(|t| !t.segments.is_empty()).count(),
        steps_done: outcome.done_steps,
        steps_planned: outcome.total_steps,
        elapsed: outcome.elapsed,
        warning_count: outcome.warning_count,
        warnings: outcome.warnings,
    })
}

fn print_plan(cfg: &PipelineConfig) -> Result<()> {
    let log = quality_log::load(&cfg.log_file)?;
    let plan = plan::plan(cfg, &log)?;
    for tile in &plan.tiles {
        println!("# tile {} -> {}", tile.tile, tile.manifest_path.display());
        for job in &tile.segments {
            println!("#   {}", job.manifest_line);
        }
    }
    for inv in plan.invocations() {
        println!("{}", inv.command_line(&cfg.ffmpeg));
    }
    Ok(())
}

fn print_reconstruct_summary(summary: &ReconstructSummary) {
    println!(
        "Reconstruct summary: final={} output_dir={} duration={} segments={} tiles={} steps={}/{} warnings={}",
        summary.final_video.display(),
        summary.output_dir.display(),
        format_duration(summary.elapsed),
        summary.segment_count,
        summary.tiles_with_segments,
        summary.steps_done,
        summary.steps_planned,
        summary.warning_count,
    );
    for warning in &summary.warnings {
        println!("  warning: {}", warning);
    }
}

fn print_trace_summary(summary: &TraceSummary) {
    println!(
        "Trace summary: output={} samples={} duration={}s interval={}s seed={}",
        summary.output.display(),
        summary.samples,
        summary.duration_secs,
        summary.interval_secs,
        summary
            .seed
            .map(|s| s.to_string())
            .unwrap_or_else(|| "-".to_string()),
    );
}
