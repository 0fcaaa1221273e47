//! Star-pattern matching via triangle asterisms.
//!
//! Triangles built from the brightest sources of each frame are compared
//! through their scale/rotation-invariant side ratios. Matching triangles
//! vote for vertex correspondences, and the voted control points feed an
//! affine least-squares fit with bounded outlier-rejection refinement.

use std::collections::HashMap;

use tracing::debug;

use crate::consts::{MAX_MATCH_ITERATIONS, MAX_PATTERN_STARS, MIN_CONTROL_POINTS};
use crate::error::{MeridianError, Result};
use crate::quality::detect::DetectedSource;

use super::transform::AffineTransform;

/// Maximum Euclidean distance between triangle invariants for a match.
const INVARIANT_TOLERANCE: f64 = 0.01;

/// Residual (pixels) below which a control point counts as an inlier.
const INLIER_TOLERANCE: f64 = 2.0;

/// Thinnest admissible triangle: shortest/longest side ratio.
const MIN_SIDE_RATIO: f64 = 0.1;

/// A source-to-reference transform with the control points behind it.
#[derive(Clone, Copy, Debug)]
pub(crate) struct StarMatch {
    pub transform: AffineTransform,
    pub control_points: usize,
}

/// Triangle with canonically ordered vertices: `verts[0]` opposite the
/// longest side, `verts[2]` opposite the shortest. Matching triangles
/// then pair vertices positionally.
struct Asterism {
    invariant: [f64; 2],
    verts: [usize; 3],
}

fn build_asterisms(stars: &[(f64, f64)]) -> Vec<Asterism> {
    let n = stars.len();
    let mut asterisms = Vec::new();

    for i in 0..n {
        for j in i + 1..n {
            for k in j + 1..n {
                let side_ij = dist(stars[i], stars[j]);
                let side_jk = dist(stars[j], stars[k]);
                let side_ik = dist(stars[i], stars[k]);

                // (vertex, opposite side length)
                let mut labeled = [(k, side_ij), (i, side_jk), (j, side_ik)];
                labeled.sort_by(|a, b| b.1.total_cmp(&a.1));
                let longest = labeled[0].1;
                let middle = labeled[1].1;
                let shortest = labeled[2].1;
                if longest <= 0.0 || shortest / longest < MIN_SIDE_RATIO {
                    continue;
                }
                // Near-collinear triples carry no orientation information.
                if (shortest + middle - longest) / longest < 0.01 {
                    continue;
                }
                asterisms.push(Asterism {
                    invariant: [labeled[1].1 / longest, labeled[2].1 / longest],
                    verts: [labeled[0].0, labeled[1].0, labeled[2].0],
                });
            }
        }
    }
    asterisms
}

fn dist(a: (f64, f64), b: (f64, f64)) -> f64 {
    let dx = a.0 - b.0;
    let dy = a.1 - b.1;
    (dx * dx + dy * dy).sqrt()
}

/// Find the affine transform mapping source star positions onto reference
/// positions. Fails with `InsufficientMatches` when no transform survives
/// the bounded refinement budget.
pub(crate) fn match_stars(
    source: &[DetectedSource],
    reference: &[DetectedSource],
) -> Result<StarMatch> {
    let src: Vec<(f64, f64)> = source
        .iter()
        .take(MAX_PATTERN_STARS)
        .map(|s| (s.x, s.y))
        .collect();
    let refs: Vec<(f64, f64)> = reference
        .iter()
        .take(MAX_PATTERN_STARS)
        .map(|s| (s.x, s.y))
        .collect();

    if src.len() < MIN_CONTROL_POINTS || refs.len() < MIN_CONTROL_POINTS {
        return Err(MeridianError::InsufficientMatches { iterations: 0 });
    }

    let src_triangles = build_asterisms(&src);
    let ref_triangles = build_asterisms(&refs);

    // Matching triangles vote for their positional vertex pairs.
    let mut votes: HashMap<(usize, usize), usize> = HashMap::new();
    for st in &src_triangles {
        for rt in &ref_triangles {
            let d0 = st.invariant[0] - rt.invariant[0];
            let d1 = st.invariant[1] - rt.invariant[1];
            if (d0 * d0 + d1 * d1).sqrt() > INVARIANT_TOLERANCE {
                continue;
            }
            for v in 0..3 {
                *votes.entry((st.verts[v], rt.verts[v])).or_insert(0) += 1;
            }
        }
    }

    // Greedy one-to-one assignment, strongest votes first; order is pinned
    // by the pair indices so the result is deterministic.
    let mut ranked: Vec<((usize, usize), usize)> = votes.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));

    let mut used_src = vec![false; src.len()];
    let mut used_ref = vec![false; refs.len()];
    let mut pairs: Vec<((f64, f64), (f64, f64))> = Vec::new();
    for ((si, ri), count) in ranked {
        if count < 2 || used_src[si] || used_ref[ri] {
            continue;
        }
        used_src[si] = true;
        used_ref[ri] = true;
        pairs.push((src[si], refs[ri]));
    }

    if pairs.len() < MIN_CONTROL_POINTS {
        return Err(MeridianError::InsufficientMatches { iterations: 0 });
    }
    debug!(candidates = pairs.len(), "voted control points");

    // Refine: fit, drop outliers, refit, within a bounded iteration budget.
    for iteration in 1..=MAX_MATCH_ITERATIONS {
        let transform = AffineTransform::fit(&pairs)
            .ok_or(MeridianError::InsufficientMatches { iterations: iteration })?;

        let inliers: Vec<((f64, f64), (f64, f64))> = pairs
            .iter()
            .copied()
            .filter(|&((sx, sy), (rx, ry))| {
                let (px, py) = transform.apply(sx, sy);
                dist((px, py), (rx, ry)) <= INLIER_TOLERANCE
            })
            .collect();

        if inliers.len() < MIN_CONTROL_POINTS {
            return Err(MeridianError::InsufficientMatches { iterations: iteration });
        }
        if inliers.len() == pairs.len() {
            return Ok(StarMatch {
                transform,
                control_points: pairs.len(),
            });
        }
        pairs = inliers;
    }

    Err(MeridianError::InsufficientMatches {
        iterations: MAX_MATCH_ITERATIONS,
    })
}
