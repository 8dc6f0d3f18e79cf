//! Loss fitting and the amplifier set-point model.

use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::OctalError;
use crate::table::MeasurementTable;
use crate::utils::round_to;

/// Least-squares straight line through `(x, y)`. Returns `(slope, intercept)`.
pub fn linear_fit(x: &[f64], y: &[f64]) -> Result<(f64, f64), OctalError> {
    if x.len() != y.len() {
        return Err(OctalError::Analysis(format!(
            "x has {} points, y has {}",
            x.len(),
            y.len()
        )));
    }
    if x.len() < 2 {
        return Err(OctalError::Analysis("A line fit needs at least 2 points".into()));
    }

    let xs = Array1::from_vec(x.to_vec());
    let ys = Array1::from_vec(y.to_vec());
    let x_mean = xs.mean().unwrap_or(0.0);
    let y_mean = ys.mean().unwrap_or(0.0);
    let dx = &xs - x_mean;
    let dy = &ys - y_mean;

    let sxx = dx.dot(&dx);
    if sxx == 0.0 {
        return Err(OctalError::Analysis("All x values are equal".into()));
    }
    let slope = dx.dot(&dy) / sxx;
    Ok((slope, y_mean - slope * x_mean))
}

/// Loss [dB] between a source at `source_dbm` and a detected power in watts.
///
/// Non-positive powers give `NaN`.
pub fn power_to_loss_db(source_dbm: f64, power_w: f64) -> f64 {
    if power_w > 0.0 {
        source_dbm - 10.0 * (power_w * 1e3).log10()
    } else {
        f64::NAN
    }
}

/// Propagation and insertion loss per wavelength from cut-back measurements.
///
/// `losses` holds one column per structure length, each with `channels`
/// consecutive entries (so `losses.len() == lengths.len() * channels`) and
/// one value per wavelength. For every wavelength and channel the loss is
/// fitted against length: the slope is the loss per `unit` of length, the
/// intercept the insertion loss. Both are rounded to 5 decimals.
pub fn iloss_coeffs(
    lengths: &[f64],
    wavelengths: &[f64],
    losses: &[Vec<f64>],
    channels: usize,
    unit: &str,
) -> Result<MeasurementTable, OctalError> {
    let channels = channels.max(1);
    if losses.len() != lengths.len() * channels {
        return Err(OctalError::Analysis(format!(
            "Expected {} loss columns ({} lengths x {} channels), got {}",
            lengths.len() * channels,
            lengths.len(),
            channels,
            losses.len()
        )));
    }
    if let Some(col) = losses.iter().find(|c| c.len() != wavelengths.len()) {
        return Err(OctalError::Analysis(format!(
            "Loss column has {} points, expected {}",
            col.len(),
            wavelengths.len()
        )));
    }

    let mut table = MeasurementTable::new();
    table.add_column("Wavelength", wavelengths.to_vec());

    for ch in 0..channels {
        let mut slopes = Vec::with_capacity(wavelengths.len());
        let mut intercepts = Vec::with_capacity(wavelengths.len());
        for w in 0..wavelengths.len() {
            let y: Vec<f64> = (0..lengths.len())
                .map(|l| losses[l * channels + ch][w])
                .collect();
            let (slope, intercept) = linear_fit(lengths, &y)?;
            slopes.push(round_to(slope, 5));
            intercepts.push(round_to(intercept, 5));
        }
        table.add_column(format!("CH{ch} - loss [dB/{unit}]"), slopes);
        table.add_column(format!("CH{ch} - insertion loss [dB]"), intercepts);
    }

    Ok(table)
}

/// Ordinary least squares in two variables with an intercept:
/// `target = intercept + coefficients[0] * x1 + coefficients[1] * x2`.
///
/// Fitted on (set point, wavelength, loss) data from amplifier sweeps to
/// predict the set point that gives a wanted loss at a wavelength.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LinearModel {
    pub coefficients: [f64; 2],
    pub intercept: f64,
}

impl LinearModel {
    pub fn fit(targets: &[f64], x1: &[f64], x2: &[f64]) -> Result<Self, OctalError> {
        let n = targets.len();
        if x1.len() != n || x2.len() != n {
            return Err(OctalError::Analysis(format!(
                "Mismatched sample counts: {} targets, {} x1, {} x2",
                n,
                x1.len(),
                x2.len()
            )));
        }
        if n < 3 {
            return Err(OctalError::Analysis("A two-variable fit needs at least 3 samples".into()));
        }

        let mut design = Array2::<f64>::ones((n, 3));
        for i in 0..n {
            design[[i, 1]] = x1[i];
            design[[i, 2]] = x2[i];
        }
        let y = Array1::from_vec(targets.to_vec());
        let a = design.t().dot(&design);
        let b = design.t().dot(&y);
        let beta = solve3(&a, &b)?;

        Ok(Self {
            coefficients: [beta[1], beta[2]],
            intercept: beta[0],
        })
    }

    pub fn predict(&self, x1: f64, x2: f64) -> f64 {
        self.intercept + self.coefficients[0] * x1 + self.coefficients[1] * x2
    }

    pub fn save_json(&self, path: &Path) -> Result<(), OctalError> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)
            .map_err(|e| OctalError::io(e, format!("Writing {}", path.display())))
    }

    pub fn load_json(path: &Path) -> Result<Self, OctalError> {
        let json = std::fs::read_to_string(path)
            .map_err(|e| OctalError::io(e, format!("Reading {}", path.display())))?;
        Ok(serde_json::from_str(&json)?)
    }
}

/// Gaussian elimination with partial pivoting on the 3x3 normal equations.
fn solve3(a: &Array2<f64>, b: &Array1<f64>) -> Result<[f64; 3], OctalError> {
    let mut m = [[0.0; 4]; 3];
    for r in 0..3 {
        for c in 0..3 {
            m[r][c] = a[[r, c]];
        }
        m[r][3] = b[r];
    }

    let scale = a.iter().fold(0.0f64, |acc, v| acc.max(v.abs())).max(1.0);
    for col in 0..3 {
        let pivot = (col..3)
            .max_by(|&i, &j| m[i][col].abs().total_cmp(&m[j][col].abs()))
            .unwrap_or(col);
        if m[pivot][col].abs() < 1e-12 * scale {
            return Err(OctalError::Analysis(
                "Singular system: the independent variables are collinear".into(),
            ));
        }
        m.swap(col, pivot);
        for r in 0..3 {
            if r != col {
                let factor = m[r][col] / m[col][col];
                for c in col..4 {
                    m[r][c] -= factor * m[col][c];
                }
            }
        }
    }

    Ok([m[0][3] / m[0][0], m[1][3] / m[1][1], m[2][3] / m[2][2]])
}
