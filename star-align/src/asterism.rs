//! Asterism-based alignment: match bright-source triangles between a frame
//! and the reference, fit a similarity transform, and resample.

use crate::detect::Source;
use crate::error::{Error, Result};
use star_types::Frame;

/// Rotation + isotropic scale + translation, source -> reference pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimilarityTransform {
    pub scale: f64,
    pub rotation_rad: f64,
    pub tx: f64,
    pub ty: f64,
}

impl SimilarityTransform {
    pub fn apply(&self, x: f64, y: f64) -> (f64, f64) {
        let (sin, cos) = self.rotation_rad.sin_cos();
        let sx = self.scale * (cos * x - sin * y) + self.tx;
        let sy = self.scale * (sin * x + cos * y) + self.ty;
        (sx, sy)
    }

    pub fn invert(&self) -> SimilarityTransform {
        let (sin, cos) = self.rotation_rad.sin_cos();
        let inv_scale = 1.0 / self.scale;
        // Inverse of R(theta)*s is R(-theta)/s; translation folds through.
        let itx = -inv_scale * (cos * self.tx + sin * self.ty);
        let ity = -inv_scale * (-sin * self.tx + cos * self.ty);
        SimilarityTransform { scale: inv_scale, rotation_rad: -self.rotation_rad, tx: itx, ty: ity }
    }
}

#[derive(Debug, Clone, Copy)]
struct Triangle {
    vertices: (usize, usize, usize),
    /// Side-length ratios, normalized and sorted, used as the matching invariant.
    ratios: (f64, f64),
}

fn dist(a: (f64, f64), b: (f64, f64)) -> f64 {
    ((a.0 - b.0).powi(2) + (a.1 - b.1).powi(2)).sqrt()
}

fn build_triangles(points: &[(f64, f64)]) -> Vec<Triangle> {
    let n = points.len();
    let mut triangles = Vec::new();
    for i in 0..n {
        for j in (i + 1)..n {
            for k in (j + 1)..n {
                let mut sides = [
                    dist(points[i], points[j]),
                    dist(points[j], points[k]),
                    dist(points[i], points[k]),
                ];
                sides.sort_by(|a, b| a.partial_cmp(b).unwrap());
                if sides[2] < 1e-6 {
                    continue;
                }
                triangles.push(Triangle {
                    vertices: (i, j, k),
                    ratios: (sides[0] / sides[2], sides[1] / sides[2]),
                });
            }
        }
    }
    triangles
}

const RATIO_TOLERANCE: f64 = 0.01;

/// Finds point correspondences between `source` and `reference` by voting
/// on triangle-ratio matches, then returns a least-squares similarity
/// transform mapping source pixels onto reference pixels.
pub fn find_transform(source: &[Source], reference: &[Source], index: usize) -> Result<SimilarityTransform> {
    let source_points: Vec<(f64, f64)> = source.iter().map(|s| (s.x, s.y)).collect();
    let reference_points: Vec<(f64, f64)> = reference.iter().map(|s| (s.x, s.y)).collect();

    if source_points.len() < 3 || reference_points.len() < 3 {
        return Err(Error::NoMatchableFeatures { index });
    }

    let source_triangles = build_triangles(&source_points);
    let reference_triangles = build_triangles(&reference_points);

    let mut votes = std::collections::HashMap::<(usize, usize), usize>::new();
    for st in &source_triangles {
        for rt in &reference_triangles {
            if (st.ratios.0 - rt.ratios.0).abs() < RATIO_TOLERANCE
                && (st.ratios.1 - rt.ratios.1).abs() < RATIO_TOLERANCE
            {
                let s_verts = [st.vertices.0, st.vertices.1, st.vertices.2];
                let r_verts = [rt.vertices.0, rt.vertices.1, rt.vertices.2];
                for &s in &s_verts {
                    for &r in &r_verts {
                        *votes.entry((s, r)).or_insert(0) += 1;
                    }
                }
            }
        }
    }

    if votes.is_empty() {
        return Err(Error::NoMatchableFeatures { index });
    }

    let mut ranked: Vec<((usize, usize), usize)> = votes.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1));

    let mut used_source = std::collections::HashSet::new();
    let mut used_reference = std::collections::HashSet::new();
    let mut correspondences = Vec::new();
    for ((s, r), _votes) in ranked {
        if used_source.contains(&s) || used_reference.contains(&r) {
            continue;
        }
        used_source.insert(s);
        used_reference.insert(r);
        correspondences.push((source_points[s], reference_points[r]));
        if correspondences.len() >= 12 {
            break;
        }
    }

    if correspondences.len() < 3 {
        return Err(Error::NoMatchableFeatures { index });
    }

    Ok(fit_similarity(&correspondences))
}

/// Least-squares similarity transform (rotation + isotropic scale +
/// translation, no reflection) mapping `pairs` source points onto their
/// matched reference points.
fn fit_similarity(pairs: &[((f64, f64), (f64, f64))]) -> SimilarityTransform {
    let n = pairs.len() as f64;
    let (mean_sx, mean_sy) = pairs.iter().fold((0.0, 0.0), |(ax, ay), ((sx, sy), _)| (ax + sx, ay + sy));
    let (mean_sx, mean_sy) = (mean_sx / n, mean_sy / n);
    let (mean_dx, mean_dy) = pairs.iter().fold((0.0, 0.0), |(ax, ay), (_, (dx, dy))| (ax + dx, ay + dy));
    let (mean_dx, mean_dy) = (mean_dx / n, mean_dy / n);

    let mut a = 0.0;
    let mut b = 0.0;
    let mut d = 0.0;
    for ((sx, sy), (dx, dy)) in pairs {
        let xs = sx - mean_sx;
        let ys = sy - mean_sy;
        let xd = dx - mean_dx;
        let yd = dy - mean_dy;
        a += xs * xd + ys * yd;
        b += xs * yd - ys * xd;
        d += xs * xs + ys * ys;
    }
    let d = d.max(1e-12);
    let scos = a / d;
    let ssin = b / d;
    let scale = (scos * scos + ssin * ssin).sqrt().max(1e-6);
    let rotation_rad = ssin.atan2(scos);

    let tx = mean_dx - (scos * mean_sx - ssin * mean_sy);
    let ty = mean_dy - (ssin * mean_sx + scos * mean_sy);

    SimilarityTransform { scale, rotation_rad, tx, ty }
}

fn bilinear_sample(data: &[f32], width: usize, height: usize, x: f64, y: f64) -> Option<f32> {
    if x < 0.0 || y < 0.0 {
        return None;
    }
    let x0 = x.floor() as usize;
    let y0 = y.floor() as usize;
    if x0 + 1 >= width || y0 + 1 >= height {
        return None;
    }
    let fx = (x - x0 as f64) as f32;
    let fy = (y - y0 as f64) as f32;
    let v00 = data[y0 * width + x0];
    let v10 = data[y0 * width + x0 + 1];
    let v01 = data[(y0 + 1) * width + x0];
    let v11 = data[(y0 + 1) * width + x0 + 1];
    let top = v00 * (1.0 - fx) + v10 * fx;
    let bottom = v01 * (1.0 - fx) + v11 * fx;
    Some(top * (1.0 - fy) + bottom * fy)
}

/// Resamples `frame` onto a `target_width x target_height` grid using the
/// inverse of `transform` (reference pixel -> source pixel).
pub fn apply_transform(frame: &Frame, transform: &SimilarityTransform, target_width: usize, target_height: usize) -> Frame {
    let inverse = transform.invert();
    let fill = frame.min_finite();
    let mut out = vec![0.0f32; target_width * target_height];
    for y in 0..target_height {
        for x in 0..target_width {
            let (sx, sy) = inverse.apply(x as f64, y as f64);
            out[y * target_width + x] = bilinear_sample(&frame.data, frame.width, frame.height, sx, sy).unwrap_or(fill);
        }
    }
    Frame::new(frame.kind, target_width, target_height, out, frame.metadata.clone())
}
