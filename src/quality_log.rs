use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::path::Path;

use crate::config::TILE_COUNT;
use crate::error::PipelineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quality {
    Low,
    Mid,
    High,
}

impl Quality {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "low" => Some(Quality::Low),
            "mid" => Some(Quality::Mid),
            "high" => Some(Quality::High),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct QualityLogEntry {
    pub tile_index: usize,
    pub quality: Quality,
    pub time: f64,
    pub duration: f64,
}

#[derive(Debug, Deserialize)]
struct RawEntry {
    #[serde(rename = "tileIndex", deserialize_with = "whole_number")]
    tile_index: i64,
    quality: String,
    #[serde(deserialize_with = "number_or_string")]
    time: f64,
    #[serde(deserialize_with = "number_or_string")]
    duration: f64,
}

// Some players log times through toFixed(), which yields strings.
fn number_or_string<'de, D>(de: D) -> std::result::Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumOrStr {
        Num(f64),
        Str(String),
    }

    match NumOrStr::deserialize(de)? {
        NumOrStr::Num(n) => Ok(n),
        NumOrStr::Str(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| serde::de::Error::custom(format!("{:?} is not a number", s))),
    }
}

// JavaScript numbers can arrive as 3.0; only whole values are tile indices.
fn whole_number<'de, D>(de: D) -> std::result::Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum IntOrFloat {
        Int(i64),
        Float(f64),
    }

    match IntOrFloat::deserialize(de)? {
        IntOrFloat::Int(n) => Ok(n),
        IntOrFloat::Float(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => Ok(f as i64),
        IntOrFloat::Float(f) => Err(serde::de::Error::custom(format!(
            "{} is not a whole number",
            f
        ))),
    }
}

/// Load the quality log and validate every entry before any work starts.
///
/// Accepts a JSON array of entries or a stream of entry objects (one per
/// line). Unknown fields are ignored.
pub fn load(path: &Path) -> Result<Vec<QualityLogEntry>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("read quality log {}", path.display()))?;
    let entries = parse(&text).with_context(|| format!("invalid quality log {}", path.display()))?;
    Ok(entries)
}

pub fn parse(text: &str) -> Result<Vec<QualityLogEntry>> {
    let mut values = Vec::new();
    for value in serde_json::Deserializer::from_str(text).into_iter::<Value>() {
        match value.context("malformed JSON")? {
            Value::Array(items) => values.extend(items),
            other => values.push(other),
        }
    }

    let mut out = Vec::with_capacity(values.len());
    for (position, value) in values.into_iter().enumerate() {
        out.push(validate_entry(position, value)?);
    }
    Ok(out)
}

fn validate_entry(position: usize, value: Value) -> Result<QualityLogEntry, PipelineError> {
    let malformed = |reason: String| PipelineError::MalformedLogEntry { position, reason };

    let raw: RawEntry = serde_json::from_value(value).map_err(|e| malformed(e.to_string()))?;

    if raw.tile_index < 0 || raw.tile_index as u64 >= TILE_COUNT as u64 {
        return Err(malformed(format!(
            "tileIndex {} is outside 0..{}",
            raw.tile_index, TILE_COUNT
        )));
    }
    let quality = Quality::parse(&raw.quality).ok_or_else(|| {
        malformed(format!(
            "unknown quality {:?} (expected low, mid or high)",
            raw.quality
        ))
    })?;
    if !raw.time.is_finite() || raw.time < 0.0 {
        return Err(malformed(format!("time {} must be >= 0", raw.time)));
    }
    if !raw.duration.is_finite() || raw.duration <= 0.0 {
        return Err(malformed(format!("duration {} must be > 0", raw.duration)));
    }

    Ok(QualityLogEntry {
        tile_index: raw.tile_index as usize,
        quality,
        time: raw.time,
        duration: raw.duration,
    })
}

/// Split the log into one ordered segment list per tile, keeping log order.
pub fn group_by_tile(entries: &[QualityLogEntry]) -> [Vec<QualityLogEntry>; TILE_COUNT] {
    let mut tiles: [Vec<QualityLogEntry>; TILE_COUNT] = Default::default();
    for entry in entries {
        tiles[entry.tile_index].push(entry.clone());
    }
    tiles
}
