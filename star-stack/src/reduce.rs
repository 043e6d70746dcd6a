//! Row-stripe chunked reduction over frame sequences, built on
//! [`star_calib::combine`] (the unchunked per-pixel sigma-clip reducer).
//!
//! Chunking is owned here rather than delegated to
//! [`star_calib::combine_with_budget`] so a cancellation check can run at
//! every chunk boundary, and so each chunk's bookkeeping (`ChunkPartial`) is
//! available to merge and then discard, mirroring `integration.py`'s
//! practice of stamping `CHUNK_ID`/`CHUNK_SIZE` on a partial result and
//! stripping them once chunks are merged into the final frame.

use crate::error::{Error, Result};
use star_calib::ReduceOp;
use star_types::Frame;

/// Applies a per-frame multiplicative scale (such as exposure or flux
/// normalization) before combining. `scales[i]` multiplies `frames[i]`.
pub fn scale_frames(frames: &[Frame], scales: &[f64]) -> Vec<Frame> {
    frames
        .iter()
        .zip(scales.iter())
        .map(|(frame, &scale)| {
            let data = frame.data.iter().map(|&v| v * scale as f32).collect();
            Frame::new(frame.kind, frame.width, frame.height, data, frame.metadata.clone())
        })
        .collect()
}

fn check_shapes(frames: &[Frame]) -> Result<(usize, usize)> {
    let first = frames.first().ok_or(Error::EmptySequence)?;
    let (width, height) = (first.width, first.height);
    for (index, frame) in frames.iter().enumerate() {
        if frame.width != width || frame.height != height {
            return Err(Error::ShapeMismatch {
                index,
                expected: (width, height),
                found: (frame.width, frame.height),
            });
        }
    }
    Ok((width, height))
}

/// One row stripe's reduction result, before being merged into the final
/// frame. Never surfaces outside this module: `CHUNK_ID`/`CHUNK_SIZE` are
/// bookkeeping for the merge, not provenance worth keeping.
struct ChunkPartial {
    chunk_id: usize,
    chunk_size: usize,
    data: Vec<f32>,
    rejected: usize,
}

const OVERHEAD_FACTOR: u64 = 3;
const BYTES_PER_SAMPLE: u64 = 4;

fn rows_per_chunk(frame_count: usize, width: usize, memory_budget: u64) -> usize {
    let row_bytes = frame_count as u64 * width as u64 * BYTES_PER_SAMPLE * OVERHEAD_FACTOR;
    if row_bytes == 0 {
        return usize::MAX;
    }
    ((memory_budget / row_bytes).max(1)) as usize
}

/// Combines `frames` into one image, in row-stripe chunks sized to
/// `memory_budget` (or to `chunk_rows_override`, if given — the
/// `--force-chunked`/`--chunk-size` path, which picks a stripe height
/// directly instead of deriving one from the memory budget). `cancel`, if
/// given, is polled between chunks. Returns
/// `(pixels, width, height, rejected_total, chunk_count)`.
pub fn combine_frames(
    frames: &[Frame],
    op: ReduceOp,
    sigma_clip_enabled: bool,
    sigma_low: f64,
    sigma_high: f64,
    memory_budget: u64,
    chunk_rows_override: Option<usize>,
    cancel: Option<&dyn Fn() -> bool>,
) -> Result<(Vec<f32>, usize, usize, usize, usize)> {
    let (width, height) = check_shapes(frames)?;
    let planes: Vec<&[f32]> = frames.iter().map(|f| f.data.as_slice()).collect();

    let one_row_bytes = frames.len() as u64 * width as u64 * BYTES_PER_SAMPLE;
    if chunk_rows_override.is_none() && one_row_bytes > memory_budget {
        return Err(Error::MemoryBudgetExceeded { needed: one_row_bytes, budget: memory_budget });
    }

    let stripe_rows = chunk_rows_override
        .unwrap_or_else(|| rows_per_chunk(frames.len(), width, memory_budget))
        .max(1)
        .min(height.max(1));

    let mut chunks = Vec::new();
    let mut row = 0;
    let mut chunk_id = 0;
    while row < height {
        if cancel.map(|f| f()).unwrap_or(false) {
            return Err(Error::Cancelled { stage: "reducing" });
        }
        let chunk_rows = stripe_rows.min(height - row);
        let start = row * width;
        let end = (row + chunk_rows) * width;
        let chunk_planes: Vec<Vec<f32>> = planes.iter().map(|p| p[start..end].to_vec()).collect();
        let (data, rejected) =
            star_calib::combine(&chunk_planes, width, chunk_rows, op, sigma_clip_enabled, sigma_low, sigma_high);
        chunks.push(ChunkPartial { chunk_id, chunk_size: chunk_rows, data, rejected });
        row += chunk_rows;
        chunk_id += 1;
    }

    let chunk_count = chunks.len().max(1);
    let rejected_total = chunks.iter().map(|c| c.rejected).sum();
    let merged: Vec<f32> = chunks.into_iter().flat_map(|c| {
        let _ = (c.chunk_id, c.chunk_size); // bookkeeping only, not retained past the merge
        c.data
    }).collect();

    Ok((merged, width, height, rejected_total, chunk_count))
}
