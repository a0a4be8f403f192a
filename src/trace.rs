use anyhow::{bail, Context, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::f64::consts::{PI, TAU};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::config::TILE_COUNT;

/// Unnormalised centre direction of each tile, indexed by tile.
const TILE_DIRECTIONS: [[f64; 3]; TILE_COUNT] = [
    [-1.0, 1.0, -1.0],
    [-1.0, 1.0, 1.0],
    [1.0, 1.0, -1.0],
    [1.0, 1.0, 1.0],
    [-1.0, -1.0, -1.0],
    [-1.0, -1.0, 1.0],
    [1.0, -1.0, -1.0],
    [1.0, -1.0, 1.0],
];

#[derive(Debug, Clone, Copy)]
pub struct TraceParams {
    pub duration_secs: f64,
    pub interval_secs: f64,
    pub with_quadrant: bool,
}

impl Default for TraceParams {
    fn default() -> Self {
        Self {
            duration_secs: 30.0,
            interval_secs: 0.2,
            with_quadrant: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TraceSample {
    pub time: f64,
    pub dir: [f64; 3],
    pub quadrant: usize,
}

/// Azimuth uniform in [0, 2π), polar angle uniform in [0, π]. This is not
/// area-uniform: samples cluster towards the poles.
pub fn random_direction<R: Rng + ?Sized>(rng: &mut R) -> [f64; 3] {
    let theta = rng.gen_range(0.0..TAU);
    let phi = rng.gen_range(0.0..=PI);
    [phi.sin() * theta.cos(), phi.sin() * theta.sin(), phi.cos()]
}

/// Tile whose centre direction has the largest dot product with `dir`.
/// Ties resolve to the lower index.
pub fn quadrant_of(dir: [f64; 3]) -> usize {
    let norm = 3f64.sqrt();
    let mut best = 0;
    let mut best_dot = f64::NEG_INFINITY;
    for (idx, d) in TILE_DIRECTIONS.iter().enumerate() {
        let dot = (dir[0] * d[0] + dir[1] * d[1] + dir[2] * d[2]) / norm;
        if dot > best_dot {
            best_dot = dot;
            best = idx;
        }
    }
    best
}

/// Upper bound on trace length; longer traces are almost certainly a typo.
pub const MAX_SAMPLES: usize = 10_000_000;

pub fn sample_count(params: &TraceParams) -> Result<usize> {
    if !(params.interval_secs.is_finite() && params.interval_secs > 0.0) {
        bail!("interval must be a positive number of seconds");
    }
    if !(params.duration_secs.is_finite() && params.duration_secs >= 0.0) {
        bail!("duration must be a non-negative number of seconds");
    }
    // Tolerance keeps 30 / 0.2 from landing just under 150.
    let steps = (params.duration_secs / params.interval_secs + 1e-9).floor();
    if !(steps < MAX_SAMPLES as f64) {
        bail!(
            "{}s at {}s intervals needs more than {} samples",
            params.duration_secs,
            params.interval_secs,
            MAX_SAMPLES
        );
    }
    Ok(steps as usize + 1)
}

/// Lazily draw the samples of a trace, one direction per tick.
pub fn generate<'a, R: Rng + ?Sized>(
    params: &TraceParams,
    rng: &'a mut R,
) -> Result<impl Iterator<Item = TraceSample> + 'a> {
    let n = sample_count(params)?;
    let interval = params.interval_secs;
    Ok((0..n).map(move |i| {
        let dir = random_direction(rng);
        TraceSample {
            time: i as f64 * interval,
            dir,
            quadrant: quadrant_of(dir),
        }
    }))
}

/// Write the CSV header and one row per sample, returning the row count.
///
/// Time is rounded to 2 decimals and coordinates to 4, printed in shortest
/// form: whole values come out as `0` or `1` rather than `0.0` or `1.0`.
pub fn write_csv<W, I>(out: &mut W, samples: I, with_quadrant: bool) -> Result<usize>
where
    W: Write,
    I: IntoIterator<Item = TraceSample>,
{
    if with_quadrant {
        writeln!(out, "time,x,y,z,quadrant")?;
    } else {
        writeln!(out, "time,x,y,z")?;
    }
    let mut rows = 0;
    for s in samples {
        write!(
            out,
            "{},{},{},{}",
            round_to(s.time, 2),
            round_to(s.dir[0], 4),
            round_to(s.dir[1], 4),
            round_to(s.dir[2], 4)
        )?;
        if with_quadrant {
            write!(out, ",{}", s.quadrant)?;
        }
        writeln!(out)?;
        rows += 1;
    }
    Ok(rows)
}

/// Generate a trace and write it to `path`. Returns the number of samples.
pub fn write_trace_file(path: &Path, params: &TraceParams, seed: Option<u64>) -> Result<usize> {
    match seed {
        Some(seed) => stream_to_file(path, params, &mut StdRng::seed_from_u64(seed)),
        None => stream_to_file(path, params, &mut rand::thread_rng()),
    }
}

fn stream_to_file<R: Rng + ?Sized>(path: &Path, params: &TraceParams, rng: &mut R) -> Result<usize> {
    // Parameters are checked before the file is created.
    let samples = generate(params, rng)?;

    let f = File::create(path).with_context(|| format!("create {}", path.display()))?;
    let mut out = BufWriter::new(f);
    let rows = write_csv(&mut out, samples, params.with_quadrant)
        .with_context(|| format!("write {}", path.display()))?;
    out.flush()
        .with_context(|| format!("write {}", path.display()))?;
    Ok(rows)
}

fn round_to(v: f64, decimals: i32) -> f64 {
    let scale = 10f64.powi(decimals);
    let r = (v * scale).round() / scale;
    // Avoid printing "-0".
    if r == 0.0 {
        0.0
    } else {
        r
    }
}
