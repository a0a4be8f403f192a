use std::path::{Path, PathBuf};

use crate::config::{self, PipelineConfig, TILE_COUNT};
use crate::error::{PipelineError, Stage};
use crate::ffmpeg::Invocation;
use crate::manifest;
use crate::quality_log::{self, QualityLogEntry};

#[derive(Debug, Clone)]
pub struct SegmentJob {
    pub file_name: String,
    pub manifest_line: String,
    pub invocation: Invocation,
}

#[derive(Debug, Clone)]
pub struct TilePlan {
    pub tile: usize,
    pub manifest_path: PathBuf,
    pub segments: Vec<SegmentJob>,
}

/// Every transcoder call of a reconstruction run, in execution order.
#[derive(Debug, Clone)]
pub struct PipelinePlan {
    pub tiles: Vec<TilePlan>,
    pub concat: Vec<Invocation>,
    pub rows: [Invocation; 2],
    pub frame: Invocation,
}

impl PipelinePlan {
    pub fn segment_count(&self) -> usize {
        self.tiles.iter().map(|t| t.segments.len()).sum()
    }

    pub fn invocation_count(&self) -> usize {
        self.segment_count() + self.concat.len() + self.rows.len() + 1
    }

    pub fn invocations(&self) -> impl Iterator<Item = &Invocation> {
        self.tiles
            .iter()
            .flat_map(|t| t.segments.iter().map(|s| &s.invocation))
            .chain(self.concat.iter())
            .chain(self.rows.iter())
            .chain(std::iter::once(&self.frame))
    }
}

pub fn plan(cfg: &PipelineConfig, log: &[QualityLogEntry]) -> Result<PipelinePlan, PipelineError> {
    let grouped = quality_log::group_by_tile(log);

    let mut tiles = Vec::with_capacity(TILE_COUNT);
    for (tile, segments) in grouped.iter().enumerate() {
        tiles.push(plan_tile(cfg, tile, segments)?);
    }

    let concat = (0..TILE_COUNT).map(|tile| concat_invocation(cfg, tile)).collect();

    let top = cfg.row_video_path(config::TOP_ROW_FILE);
    let bottom = cfg.row_video_path(config::BOTTOM_ROW_FILE);
    let rows = [
        hstack_invocation("top row", &row_inputs(cfg, &cfg.top_row), top.clone()),
        hstack_invocation("bottom row", &row_inputs(cfg, &cfg.bottom_row), bottom.clone()),
    ];
    let frame = vstack_invocation(&top, &bottom, cfg.final_video.clone());

    Ok(PipelinePlan {
        tiles,
        concat,
        rows,
        frame,
    })
}

pub fn plan_tile(
    cfg: &PipelineConfig,
    tile: usize,
    segments: &[QualityLogEntry],
) -> Result<TilePlan, PipelineError> {
    let mut jobs = Vec::with_capacity(segments.len());
    for (idx, entry) in segments.iter().enumerate() {
        let file_name = config::segment_file_name(tile, idx);
        let manifest_line = manifest::manifest_line(&file_name)?;
        let invocation = extract_invocation(cfg, tile, entry, cfg.output_dir.join(&file_name));
        jobs.push(SegmentJob {
            file_name,
            manifest_line,
            invocation,
        });
    }
    Ok(TilePlan {
        tile,
        manifest_path: cfg.manifest_path(tile),
        segments: jobs,
    })
}

/// Cut `[time, time + duration)` out of the tile's source at the logged
/// quality, normalised to the common tile size and frame rate.
pub fn extract_invocation(
    cfg: &PipelineConfig,
    tile: usize,
    entry: &QualityLogEntry,
    output: PathBuf,
) -> Invocation {
    let src = cfg.source_path(tile, entry.quality);
    let label = output
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| format!("tile {}", tile));

    let mut inv = Invocation::new(Stage::Extract, label, output.clone());
    inv.arg("-ss")
        .arg(entry.time.to_string())
        .arg("-t")
        .arg(entry.duration.to_string())
        .arg("-i")
        .arg(src)
        .arg("-vf")
        .arg(format!(
            "scale={}:{},fps={}",
            config::TILE_WIDTH,
            config::TILE_HEIGHT,
            config::SEGMENT_FPS
        ))
        .arg("-c:v")
        .arg(&cfg.encode.codec)
        .arg("-preset")
        .arg(&cfg.encode.preset)
        .arg("-crf")
        .arg(cfg.encode.crf.to_string())
        .arg(output);
    inv
}

pub fn concat_invocation(cfg: &PipelineConfig, tile: usize) -> Invocation {
    let output = cfg.tile_video_path(tile);
    let mut inv = Invocation::new(Stage::Concat, format!("tile {}", tile), output.clone());
    inv.args(["-f", "concat", "-safe", "0", "-i"])
        .arg(cfg.manifest_path(tile))
        .args(["-c", "copy"])
        .arg(output);
    inv
}

pub fn row_inputs(cfg: &PipelineConfig, order: &[usize]) -> Vec<PathBuf> {
    order.iter().map(|&tile| cfg.tile_video_path(tile)).collect()
}

pub fn hstack_invocation(label: &str, inputs: &[PathBuf], output: PathBuf) -> Invocation {
    stack_invocation(
        Stage::RowStack,
        label,
        "hstack",
        inputs,
        (config::TILE_WIDTH, config::TILE_HEIGHT),
        output,
    )
}

pub fn vstack_invocation(top: &Path, bottom: &Path, output: PathBuf) -> Invocation {
    stack_invocation(
        Stage::FrameStack,
        "frame",
        "vstack",
        &[top.to_path_buf(), bottom.to_path_buf()],
        (config::ROW_WIDTH, config::ROW_HEIGHT),
        output,
    )
}

fn stack_invocation(
    stage: Stage,
    label: &str,
    stack: &str,
    inputs: &[PathBuf],
    size: (u32, u32),
    output: PathBuf,
) -> Invocation {
    let mut inv = Invocation::new(stage, label, output.clone());
    for input in inputs {
        inv.arg("-i").arg(input);
    }
    inv.arg("-filter_complex")
        .arg(stack_filter(stack, inputs.len(), size))
        .arg(output);
    inv
}

/// Scale every input to `size`, then join them in input order with one
/// `hstack`/`vstack` filter.
pub fn stack_filter(stack: &str, inputs: usize, (w, h): (u32, u32)) -> String {
    let scaled = (0..inputs)
        .map(|i| format!("[{}:v]scale={}:{}[v{}]", i, w, h, i))
        .collect::<Vec<_>>()
        .join(";");
    let labels = (0..inputs).map(|i| format!("[v{}]", i)).collect::<String>();
    format!("{};{}{}=inputs={}", scaled, labels, stack, inputs)
}
