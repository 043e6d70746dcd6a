//! Per-pixel sigma-clipped mean combine used to build calibration masters.
//!
//! Rejection uses the per-pixel median and median-absolute-deviation rather
//! than a Gaussian-sigma estimate, so a handful of cosmic-ray hits can't
//! skew the accepted range the way a plain mean/stddev clip would.

use rayon::prelude::*;

/// Scales the MAD so it estimates a Gaussian population's standard
/// deviation, matching the `mad_std` convention the combine thresholds are
/// tuned against.
const MAD_TO_SIGMA: f32 = 1.4826;

fn median(sorted: &[f32]) -> f32 {
    let n = sorted.len();
    if n == 0 {
        return 0.0;
    }
    if n % 2 == 1 {
        sorted[n / 2]
    } else {
        (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
    }
}

fn median_absolute_deviation(sorted: &[f32], center: f32) -> f32 {
    let mut deviations: Vec<f32> = sorted.iter().map(|v| (v - center).abs()).collect();
    deviations.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    median(&deviations) * MAD_TO_SIGMA
}

/// Iteratively rejects samples outside `[median - low*mad, median + high*mad]`
/// until the survivor set stabilizes or `max_iter` rounds have run, then
/// returns the surviving samples and how many were rejected.
pub fn sigma_clip(samples: &[f32], sigma_low: f64, sigma_high: f64, max_iter: usize) -> (Vec<f32>, usize) {
    let mut survivors: Vec<f32> = samples.to_vec();
    let mut remaining_iter = max_iter;
    loop {
        if survivors.is_empty() {
            break;
        }
        let mut sorted = survivors.clone();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let center = median(&sorted);
        let mad = median_absolute_deviation(&sorted, center);
        if mad == 0.0 {
            break;
        }
        let low = center - sigma_low as f32 * mad;
        let high = center + sigma_high as f32 * mad;
        let next: Vec<f32> = survivors.iter().copied().filter(|&v| v >= low && v <= high).collect();
        if next.len() == survivors.len() {
            break;
        }
        survivors = next;
        if remaining_iter == 0 {
            break;
        }
        remaining_iter -= 1;
    }
    let rejected = samples.len() - survivors.len();
    (survivors, rejected)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReduceOp {
    Mean,
    Median,
    Sum,
}

fn reduce(op: ReduceOp, samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    match op {
        ReduceOp::Mean => samples.iter().sum::<f32>() / samples.len() as f32,
        ReduceOp::Sum => samples.iter().sum::<f32>(),
        ReduceOp::Median => {
            let mut sorted = samples.to_vec();
            sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
            median(&sorted)
        }
    }
}

/// Combines `frames` (each the same `width * height` length, optionally
/// pre-scaled per-frame by the caller) into one array using `op`, with
/// optional sigma-clip rejection. Pixel-parallel over rows via rayon, per
/// the pipeline's pixel-parallel reduction model.
pub fn combine(frames: &[Vec<f32>], width: usize, height: usize, op: ReduceOp, sigma_clip_enabled: bool, sigma_low: f64, sigma_high: f64) -> (Vec<f32>, usize) {
    const MAX_SIGMA_CLIP_ITER: usize = 10;
    let npix = width * height;
    let rejected_total = std::sync::atomic::AtomicUsize::new(0);

    let mut output = vec![0.0f32; npix];
    output.par_iter_mut().enumerate().for_each(|(i, out)| {
        let samples: Vec<f32> = frames.iter().map(|f| f[i]).collect();
        let (survivors, rejected) = if sigma_clip_enabled {
            sigma_clip(&samples, sigma_low, sigma_high, MAX_SIGMA_CLIP_ITER)
        } else {
            (samples, 0)
        };
        rejected_total.fetch_add(rejected, std::sync::atomic::Ordering::Relaxed);
        *out = reduce(op, &survivors);
    });

    (output, rejected_total.load(std::sync::atomic::Ordering::Relaxed))
}

/// Combines full-frame pixel arrays, switching to row-stripe chunks when the
/// combined in-memory footprint would exceed `memory_budget` bytes. Partial
/// reductions are merged with the same operator, per frame (mean/sum
/// partials are bitwise-equal to the unchunked combine; median is not
/// guaranteed to be, since each stripe clips independently).
pub fn combine_with_budget(
    frames: &[Vec<f32>],
    width: usize,
    height: usize,
    op: ReduceOp,
    sigma_clip_enabled: bool,
    sigma_low: f64,
    sigma_high: f64,
    memory_budget: u64,
) -> (Vec<f32>, usize) {
    const OVERHEAD_FACTOR: u64 = 3;
    const BYTES_PER_SAMPLE: u64 = 4;

    let frame_count = frames.len() as u64;
    let row_bytes = frame_count * width as u64 * BYTES_PER_SAMPLE * OVERHEAD_FACTOR;
    if row_bytes == 0 || height as u64 * row_bytes <= memory_budget {
        return combine(frames, width, height, op, sigma_clip_enabled, sigma_low, sigma_high);
    }

    let rows_per_chunk = ((memory_budget / row_bytes).max(1)) as usize;
    let mut output = Vec::with_capacity(width * height);
    let mut rejected_total = 0;
    let mut row = 0;
    while row < height {
        let chunk_rows = rows_per_chunk.min(height - row);
        let start = row * width;
        let end = (row + chunk_rows) * width;
        let chunk_frames: Vec<Vec<f32>> = frames.iter().map(|f| f[start..end].to_vec()).collect();
        let (chunk_out, rejected) =
            combine(&chunk_frames, width, chunk_rows, op, sigma_clip_enabled, sigma_low, sigma_high);
        output.extend(chunk_out);
        rejected_total += rejected;
        row += chunk_rows;
    }
    (output, rejected_total)
}
