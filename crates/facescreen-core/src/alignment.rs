//! Least-squares 4-DOF similarity transform between point sets.
//!
//! Used by the shape predictor to carry feature offsets from the mean shape
//! into the frame of the current shape estimate.

use crate::types::Point;

/// Similarity transform:
/// ```text
/// | a  -b  tx |
/// | b   a  ty |
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimilarityTransform {
    pub a: f32,
    pub b: f32,
    pub tx: f32,
    pub ty: f32,
}

impl SimilarityTransform {
    pub const IDENTITY: Self = Self {
        a: 1.0,
        b: 0.0,
        tx: 0.0,
        ty: 0.0,
    };

    /// Apply only the rotation/scale part (for offsets).
    pub fn apply_linear(&self, p: Point) -> Point {
        Point::new(self.a * p.x - self.b * p.y, self.b * p.x + self.a * p.y)
    }
}

/// Estimate the similarity transform mapping `src` onto `dst`.
///
/// Returns `None` if the point sets differ in length, have fewer than two
/// points, or are degenerate (all source points coincide).
pub fn estimate_similarity(src: &[Point], dst: &[Point]) -> Option<SimilarityTransform> {
    if src.len() != dst.len() || src.len() < 2 {
        return None;
    }

    // Overdetermined system A * [a, b, tx, ty]^T = B, one row pair per point:
    //   sx * a - sy * b + tx = dx
    //   sy * a + sx * b + ty = dy
    let mut ata = [0.0f64; 16];
    let mut atb = [0.0f64; 4];

    for (s, d) in src.iter().zip(dst) {
        let (sx, sy) = (s.x as f64, s.y as f64);
        let r1 = [sx, -sy, 1.0, 0.0];
        let r2 = [sy, sx, 0.0, 1.0];

        for j in 0..4 {
            for k in 0..4 {
                ata[j * 4 + k] += r1[j] * r1[k] + r2[j] * r2[k];
            }
            atb[j] += r1[j] * d.x as f64 + r2[j] * d.y as f64;
        }
    }

    let x = solve_4x4(&ata, &atb)?;
    let t = SimilarityTransform {
        a: x[0] as f32,
        b: x[1] as f32,
        tx: x[2] as f32,
        ty: x[3] as f32,
    };

    if [t.a, t.b, t.tx, t.ty].iter().all(|v| v.is_finite()) {
        Some(t)
    } else {
        None
    }
}

/// Gaussian elimination with partial pivoting. `None` for a singular system.
#[allow(clippy::needless_range_loop)]
fn solve_4x4(ata: &[f64; 16], atb: &[f64; 4]) -> Option<[f64; 4]> {
    let mut m = [[0.0f64; 5]; 4];
    for i in 0..4 {
        for j in 0..4 {
            m[i][j] = ata[i * 4 + j];
        }
        m[i][4] = atb[i];
    }

    for col in 0..4 {
        let mut max_row = col;
        let mut max_val = m[col][col].abs();
        for row in (col + 1)..4 {
            if m[row][col].abs() > max_val {
                max_val = m[row][col].abs();
                max_row = row;
            }
        }
        m.swap(col, max_row);

        let pivot = m[col][col];
        if pivot.abs() < 1e-12 {
            return None;
        }

        for row in (col + 1)..4 {
            let factor = m[row][col] / pivot;
            for j in col..5 {
                m[row][j] -= factor * m[col][j];
            }
        }
    }

    let mut x = [0.0f64; 4];
    for i in (0..4).rev() {
        x[i] = m[i][4];
        for j in (i + 1)..4 {
            x[i] -= m[i][j] * x[j];
        }
        x[i] /= m[i][i];
    }

    Some(x)
}
