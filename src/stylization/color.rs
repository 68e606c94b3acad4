//! Colour preservation by correlation alignment (CORAL)
//!
//! The source image's pixels are whitened with its own channel covariance and
//! re-coloured with the target's, so the source keeps its structure but takes
//! on the target's colour statistics.

// Fixed 3x3 matrices and channel arrays are indexed with loop bounds of 3.
#![allow(clippy::indexing_slicing)]

use crate::error::{Result, SegifyError};
use ndarray::{s, Array4, ArrayView4};

type Mat3 = [[f64; 3]; 3];

const STD_FLOOR: f64 = 1e-5;
const JACOBI_SWEEPS: usize = 64;

struct ChannelStats {
    mean: [f64; 3],
    stdev: [f64; 3],
    /// Normalised channel values, row-major per channel
    normalized: [Vec<f64>; 3],
    /// `normalized * normalized^T + I`
    covariance: Mat3,
}

impl ChannelStats {
    fn of(image: ArrayView4<'_, f32>) -> Self {
        let channels: [Vec<f64>; 3] = std::array::from_fn(|c| {
            image
                .slice(s![0, c, .., ..])
                .iter()
                .map(|&v| f64::from(v))
                .collect()
        });

        let n = channels[0].len();
        let dof = if n > 1 { (n - 1) as f64 } else { 1.0 };
        let mean: [f64; 3] = std::array::from_fn(|c| channels[c].iter().sum::<f64>() / n as f64);
        let stdev: [f64; 3] = std::array::from_fn(|c| {
            let var = channels[c]
                .iter()
                .map(|v| (v - mean[c]).powi(2))
                .sum::<f64>()
                / dof;
            var.sqrt().max(STD_FLOOR)
        });
        let normalized: [Vec<f64>; 3] = std::array::from_fn(|c| {
            channels[c].iter().map(|v| (v - mean[c]) / stdev[c]).collect()
        });

        let mut covariance = identity();
        for (i, row) in covariance.iter_mut().enumerate() {
            for (j, cell) in row.iter_mut().enumerate() {
                *cell += normalized[i]
                    .iter()
                    .zip(&normalized[j])
                    .map(|(a, b)| a * b)
                    .sum::<f64>();
            }
        }

        Self {
            mean,
            stdev,
            normalized,
            covariance,
        }
    }
}

/// Re-colour `source` with the colour statistics of `target`
///
/// Both tensors are `1x3xHxW`; sizes may differ. The result has the shape of
/// `source` and per-channel means equal to the target's.
///
/// # Errors
/// - Either tensor is not a single three-channel image
pub fn coral(source: ArrayView4<'_, f32>, target: ArrayView4<'_, f32>) -> Result<Array4<f32>> {
    check_rgb_tensor("source", &source)?;
    check_rgb_tensor("target", &target)?;

    let src = ChannelStats::of(source);
    let tgt = ChannelStats::of(target);
    let transfer = mat_mul(
        &matrix_function(tgt.covariance, f64::sqrt),
        &matrix_function(src.covariance, |l| 1.0 / l.sqrt()),
    );

    let (_, _, height, width) = source.dim();
    let out = Array4::from_shape_fn((1, 3, height, width), |(_, c, y, x)| {
        let k = y * width + x;
        let mixed: f64 = (0..3).map(|j| transfer[c][j] * src.normalized[j][k]).sum();
        (mixed * tgt.stdev[c] + tgt.mean[c]) as f32
    });
    Ok(out)
}

fn check_rgb_tensor(name: &str, tensor: &ArrayView4<'_, f32>) -> Result<()> {
    let (batch, channels, height, width) = tensor.dim();
    if batch != 1 || channels != 3 || height * width == 0 {
        return Err(SegifyError::processing(format!(
            "Colour transfer {name} must be a non-empty 1x3xHxW tensor, got {:?}",
            tensor.shape()
        )));
    }
    Ok(())
}

fn identity() -> Mat3 {
    [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]]
}

fn mat_mul(a: &Mat3, b: &Mat3) -> Mat3 {
    let mut out = [[0.0; 3]; 3];
    for (i, row) in out.iter_mut().enumerate() {
        for (j, cell) in row.iter_mut().enumerate() {
            *cell = (0..3).map(|k| a[i][k] * b[k][j]).sum();
        }
    }
    out
}

/// `V f(Λ) V^T` for a symmetric positive definite matrix
fn matrix_function(m: Mat3, f: impl Fn(f64) -> f64) -> Mat3 {
    let (values, vectors) = symmetric_eigen(m);
    let mut out = [[0.0; 3]; 3];
    for (i, row) in out.iter_mut().enumerate() {
        for (j, cell) in row.iter_mut().enumerate() {
            *cell = (0..3)
                .map(|k| vectors[i][k] * f(values[k].max(STD_FLOOR)) * vectors[j][k])
                .sum();
        }
    }
    out
}

/// Cyclic Jacobi eigen-decomposition; eigenvectors are the columns of the
/// returned matrix
fn symmetric_eigen(mut a: Mat3) -> ([f64; 3], Mat3) {
    let mut v = identity();
    for _ in 0..JACOBI_SWEEPS {
        let off_diagonal = a[0][1].powi(2) + a[0][2].powi(2) + a[1][2].powi(2);
        if off_diagonal < 1e-24 {
            break;
        }
        for (p, q) in [(0, 1), (0, 2), (1, 2)] {
            if a[p][q] == 0.0 {
                continue;
            }
            let theta = (a[q][q] - a[p][p]) / (2.0 * a[p][q]);
            let t = theta.signum() / (theta.abs() + (theta * theta + 1.0).sqrt());
            let c = 1.0 / (t * t + 1.0).sqrt();
            let s = t * c;

            for row in &mut a {
                let (kp, kq) = (row[p], row[q]);
                row[p] = c * kp - s * kq;
                row[q] = s * kp + c * kq;
            }
            for k in 0..3 {
                let (pk, qk) = (a[p][k], a[q][k]);
                a[p][k] = c * pk - s * qk;
                a[q][k] = s * pk + c * qk;
            }
            for row in &mut v {
                let (kp, kq) = (row[p], row[q]);
                row[p] = c * kp - s * kq;
                row[q] = s * kp + c * kq;
            }
        }
    }
    ([a[0][0], a[1][1], a[2][2]], v)
}
