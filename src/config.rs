use std::path::PathBuf;

use crate::quality_log::Quality;

pub const TILE_COUNT: usize = 8;
pub const ROW_LEN: usize = 4;

/// Row orderings for the capture rig. They correct a tile/index mismatch in
/// the recorded dataset and are not the natural index order.
pub const TOP_ROW: [usize; ROW_LEN] = [3, 2, 0, 1];
pub const BOTTOM_ROW: [usize; ROW_LEN] = [7, 6, 4, 5];

pub const TILE_WIDTH: u32 = 720;
pub const TILE_HEIGHT: u32 = 480;
pub const ROW_WIDTH: u32 = 1920;
pub const ROW_HEIGHT: u32 = 480;
pub const SEGMENT_FPS: u32 = 30;

pub const TOP_ROW_FILE: &str = "top_row.mp4";
pub const BOTTOM_ROW_FILE: &str = "bot_row.mp4";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodeSettings {
    pub codec: String,
    pub preset: String,
    pub crf: u32,
}

impl Default for EncodeSettings {
    fn default() -> Self {
        Self {
            codec: "libx264".to_string(),
            preset: "veryfast".to_string(),
            crf: 23,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QualityFolders {
    pub low: String,
    pub mid: String,
    pub high: String,
}

impl Default for QualityFolders {
    fn default() -> Self {
        Self {
            low: "144p".to_string(),
            mid: "360p".to_string(),
            high: "480p".to_string(),
        }
    }
}

impl QualityFolders {
    pub fn folder(&self, quality: Quality) -> &str {
        match quality {
            Quality::Low => &self.low,
            Quality::Mid => &self.mid,
            Quality::High => &self.high,
        }
    }
}

/// Everything a reconstruction run needs. Built once from the command line
/// and handed read-only to every stage.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub tile_dir: PathBuf,
    pub output_dir: PathBuf,
    pub log_file: PathBuf,
    pub final_video: PathBuf,
    pub quality_folders: QualityFolders,
    pub top_row: [usize; ROW_LEN],
    pub bottom_row: [usize; ROW_LEN],
    pub encode: EncodeSettings,
    pub ffmpeg: PathBuf,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            tile_dir: PathBuf::from("tiles"),
            output_dir: PathBuf::from("segments"),
            log_file: PathBuf::from("quality_log.json"),
            final_video: PathBuf::from("final_output.mp4"),
            quality_folders: QualityFolders::default(),
            top_row: TOP_ROW,
            bottom_row: BOTTOM_ROW,
            encode: EncodeSettings::default(),
            ffmpeg: PathBuf::from("ffmpeg"),
        }
    }
}

impl PipelineConfig {
    pub fn source_path(&self, tile: usize, quality: Quality) -> PathBuf {
        self.tile_dir
            .join(self.quality_folders.folder(quality))
            .join(format!("{}.mp4", tile))
    }

    pub fn manifest_path(&self, tile: usize) -> PathBuf {
        self.output_dir.join(format!("{}_concat.txt", tile))
    }

    pub fn tile_video_path(&self, tile: usize) -> PathBuf {
        self.output_dir.join(format!("{}_final.mp4", tile))
    }

    pub fn row_video_path(&self, name: &str) -> PathBuf {
        self.output_dir.join(name)
    }
}

/// Segment file name, relative to the output directory.
pub fn segment_file_name(tile: usize, idx: usize) -> String {
    format!("{}_part{}.mp4", tile, idx)
}
