//! Affine transforms and frame resampling.

use ndarray::Array2;

use crate::consts::EPSILON;

/// 2D affine transform: `x' = a*x + b*y + tx`, `y' = c*x + d*y + ty`.
#[derive(Clone, Copy, Debug)]
pub struct AffineTransform {
    pub a: f64,
    pub b: f64,
    pub tx: f64,
    pub c: f64,
    pub d: f64,
    pub ty: f64,
}

impl AffineTransform {
    pub fn identity() -> Self {
        Self {
            a: 1.0,
            b: 0.0,
            tx: 0.0,
            c: 0.0,
            d: 1.0,
            ty: 0.0,
        }
    }

    pub fn apply(&self, x: f64, y: f64) -> (f64, f64) {
        (
            self.a * x + self.b * y + self.tx,
            self.c * x + self.d * y + self.ty,
        )
    }

    pub fn invert(&self) -> Option<Self> {
        let det = self.a * self.d - self.b * self.c;
        if det.abs() < EPSILON {
            return None;
        }
        let a = self.d / det;
        let b = -self.b / det;
        let c = -self.c / det;
        let d = self.a / det;
        Some(Self {
            a,
            b,
            c,
            d,
            tx: -(a * self.tx + b * self.ty),
            ty: -(c * self.tx + d * self.ty),
        })
    }

    /// Least-squares fit mapping each `from` point onto its `to` point.
    /// Needs at least three non-collinear pairs.
    pub fn fit(pairs: &[((f64, f64), (f64, f64))]) -> Option<Self> {
        if pairs.len() < 3 {
            return None;
        }

        // Normal equations; both output rows share the same 3x3 system.
        let mut m = [[0.0f64; 3]; 3];
        let mut rhs_x = [0.0f64; 3];
        let mut rhs_y = [0.0f64; 3];
        for &((x, y), (xp, yp)) in pairs {
            let basis = [x, y, 1.0];
            for i in 0..3 {
                for j in 0..3 {
                    m[i][j] += basis[i] * basis[j];
                }
                rhs_x[i] += xp * basis[i];
                rhs_y[i] += yp * basis[i];
            }
        }

        let [a, b, tx] = solve3(m, rhs_x)?;
        let [c, d, ty] = solve3(m, rhs_y)?;
        Some(Self { a, b, tx, c, d, ty })
    }
}

/// Gaussian elimination with partial pivoting for a 3x3 system.
fn solve3(mut m: [[f64; 3]; 3], mut rhs: [f64; 3]) -> Option<[f64; 3]> {
    for col in 0..3 {
        let pivot = (col..3).max_by(|&a, &b| m[a][col].abs().total_cmp(&m[b][col].abs()))?;
        if m[pivot][col].abs() < EPSILON {
            return None;
        }
        m.swap(col, pivot);
        rhs.swap(col, pivot);

        for row in col + 1..3 {
            let factor = m[row][col] / m[col][col];
            for k in col..3 {
                m[row][k] -= factor * m[col][k];
            }
            rhs[row] -= factor * rhs[col];
        }
    }

    let mut out = [0.0f64; 3];
    for row in (0..3).rev() {
        let mut sum = rhs[row];
        for k in row + 1..3 {
            sum -= m[row][k] * out[k];
        }
        out[row] = sum / m[row][row];
    }
    Some(out)
}

/// Resample `source` onto a grid of `shape` through `transform`
/// (source coordinates -> output coordinates). Pixels mapping outside the
/// source are zero.
pub fn warp_into(
    source: &Array2<f64>,
    transform: &AffineTransform,
    shape: (usize, usize),
) -> Option<Array2<f64>> {
    let inverse = transform.invert()?;
    let (h, w) = shape;
    let mut out = Array2::<f64>::zeros((h, w));
    for row in 0..h {
        for col in 0..w {
            let (sx, sy) = inverse.apply(col as f64, row as f64);
            out[[row, col]] = bilinear_sample(source, sx, sy);
        }
    }
    Some(out)
}

/// Bilinear interpolation at fractional coordinates; zero outside.
pub fn bilinear_sample(data: &Array2<f64>, x: f64, y: f64) -> f64 {
    let (h, w) = data.dim();
    if x < 0.0 || y < 0.0 {
        return 0.0;
    }
    let x0 = x.floor() as usize;
    let y0 = y.floor() as usize;
    if x0 + 1 >= w || y0 + 1 >= h {
        return 0.0;
    }
    let fx = x - x0 as f64;
    let fy = y - y0 as f64;

    let v00 = data[[y0, x0]];
    let v01 = data[[y0, x0 + 1]];
    let v10 = data[[y0 + 1, x0]];
    let v11 = data[[y0 + 1, x0 + 1]];

    v00 * (1.0 - fx) * (1.0 - fy)
        + v01 * fx * (1.0 - fy)
        + v10 * (1.0 - fx) * fy
        + v11 * fx * fy
}
