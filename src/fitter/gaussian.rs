use find_peaks::PeakFinder;
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use crate::error::CorrectionError;

#[derive(Default, Clone, Debug, Serialize, Deserialize)]
pub struct Value {
    pub value: f64,
    pub uncertainty: f64,
}

/// Fitted parameters of one Gaussian peak.
#[derive(Default, Clone, Debug, Serialize, Deserialize)]
pub struct GaussianParams {
    pub amplitude: Value,
    pub mean: Value,
    pub sigma: Value,
    pub fwhm: Value,
    pub area: Value,
}

impl GaussianParams {
    pub fn new(amplitude: Value, mean: Value, sigma: Value) -> Result<Self, CorrectionError> {
        if sigma.value <= 0.0 {
            return Err(CorrectionError::DegenerateInput(format!(
                "fitted peak at {} has non-positive sigma",
                mean.value
            )));
        }
        let area = Self::calculate_area(amplitude.value, sigma.value);
        if area < 0.0 {
            return Err(CorrectionError::DegenerateInput(format!(
                "fitted peak at {} has negative area",
                mean.value
            )));
        }

        let fwhm = Self::calculate_fwhm(sigma.value);
        let fwhm_uncertainty = Self::fwhm_uncertainty(sigma.uncertainty);
        let area_uncertainty = Self::area_uncertainty(&amplitude, &sigma);

        Ok(GaussianParams {
            amplitude,
            mean,
            sigma,
            fwhm: Value {
                value: fwhm,
                uncertainty: fwhm_uncertainty,
            },
            area: Value {
                value: area,
                uncertainty: area_uncertainty,
            },
        })
    }

    fn calculate_fwhm(sigma: f64) -> f64 {
        2.0 * (2.0 * f64::ln(2.0)).sqrt() * sigma
    }

    fn fwhm_uncertainty(sigma_uncertainty: f64) -> f64 {
        2.0 * (2.0 * f64::ln(2.0)).sqrt() * sigma_uncertainty
    }

    fn calculate_area(amplitude: f64, sigma: f64) -> f64 {
        amplitude * sigma * (2.0 * std::f64::consts::PI).sqrt()
    }

    fn area_uncertainty(amplitude: &Value, sigma: &Value) -> f64 {
        let two_pi_sqrt = (2.0 * std::f64::consts::PI).sqrt();
        ((sigma.value * two_pi_sqrt * amplitude.uncertainty).powi(2)
            + (amplitude.value * two_pi_sqrt * sigma.uncertainty).powi(2))
        .sqrt()
    }
}

/// Peak-search knobs for auto-seeding, applied to raw bin counts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PeakDetectionSettings {
    pub min_height: f64,
    pub min_prominence: f64,
    pub min_distance: usize,
    /// Half-width of the stage-1 window placed around each detected peak,
    /// in x units.
    pub seed_half_width: f64,
}

impl Default for PeakDetectionSettings {
    fn default() -> Self {
        Self {
            min_height: 20.0,
            min_prominence: 1.0,
            min_distance: 5,
            seed_half_width: 10.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeakFitReport {
    pub peaks: Vec<GaussianParams>,
    pub chi_squared: f64,
    pub dof: usize,
    pub reduced_chi_squared: f64,
}

/// Two-stage multi-Gaussian fit of a 1-D spectrum.
///
/// Stage 1 fits each window on its own to get stable seeds; stage 2 refits
/// the sum of all peaks jointly over the span of the windows. Windows come
/// from the operator or from a peak search over the counts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MultiGaussFitter {
    /// Fit windows `(lo, hi)` in x units; empty means auto-detect.
    pub ranges: Vec<(f64, f64)>,
    pub detection: PeakDetectionSettings,
    pub max_iterations: usize,
    pub tolerance: f64,
}

impl Default for MultiGaussFitter {
    fn default() -> Self {
        Self {
            ranges: Vec::new(),
            detection: PeakDetectionSettings::default(),
            max_iterations: 200,
            tolerance: 1e-10,
        }
    }
}

impl MultiGaussFitter {
    /// Fits `y(x)` sampled at bin centers. Peaks are reported in ascending
    /// mean order.
    pub fn fit(&self, x: &[f64], y: &[f64]) -> Result<PeakFitReport, CorrectionError> {
        let ranges = if self.ranges.is_empty() {
            self.auto_ranges(x, y)?
        } else {
            let mut ranges = self.ranges.clone();
            ranges.sort_by(|a, b| a.0.total_cmp(&b.0));
            ranges
        };

        // Stage 1: independent single-peak fits seed the joint fit.
        let mut seeds = Vec::with_capacity(ranges.len());
        for &(lo, hi) in &ranges {
            let (wx, wy) = slice_window(x, y, lo, hi);
            let seed = moment_seed(&wx, &wy)?;
            let fitted = self.gauss_newton(&wx, &wy, &[seed])?;
            seeds.push(fitted.params[0]);
        }

        // Stage 2: joint fit over the union of the windows.
        let lo = ranges.iter().map(|r| r.0).fold(f64::INFINITY, f64::min);
        let hi = ranges.iter().map(|r| r.1).fold(f64::NEG_INFINITY, f64::max);
        let (wx, wy) = slice_window(x, y, lo, hi);
        let joint = self.gauss_newton(&wx, &wy, &seeds)?;

        let mut indexed: Vec<usize> = (0..joint.params.len()).collect();
        indexed.sort_by(|&a, &b| joint.params[a][1].total_cmp(&joint.params[b][1]));

        let mut peaks = Vec::with_capacity(indexed.len());
        for &k in &indexed {
            let [a, mu, sigma] = joint.params[k];
            let [da, dmu, dsigma] = joint.uncertainties[k];
            peaks.push(GaussianParams::new(
                Value {
                    value: a,
                    uncertainty: da,
                },
                Value {
                    value: mu,
                    uncertainty: dmu,
                },
                Value {
                    value: sigma,
                    uncertainty: dsigma,
                },
            )?);
        }

        let reduced = if joint.dof > 0 {
            joint.chi_squared / joint.dof as f64
        } else {
            f64::NAN
        };
        Ok(PeakFitReport {
            peaks,
            chi_squared: joint.chi_squared,
            dof: joint.dof,
            reduced_chi_squared: reduced,
        })
    }

    /// Builds stage-1 windows from a peak search over the counts.
    fn auto_ranges(&self, x: &[f64], y: &[f64]) -> Result<Vec<(f64, f64)>, CorrectionError> {
        let mut peak_finder = PeakFinder::new(y);
        peak_finder.with_min_height(self.detection.min_height);
        peak_finder.with_min_prominence(self.detection.min_prominence);
        peak_finder.with_min_distance(self.detection.min_distance);
        let peaks = peak_finder.find_peaks();

        if peaks.is_empty() {
            return Err(CorrectionError::InsufficientData { needed: 1, got: 0 });
        }

        let mut ranges: Vec<(f64, f64)> = peaks
            .iter()
            .map(|peak| {
                let center = x[peak.middle_position()];
                (
                    center - self.detection.seed_half_width,
                    center + self.detection.seed_half_width,
                )
            })
            .collect();
        ranges.sort_by(|a, b| a.0.total_cmp(&b.0));
        log::info!("Peak search found {} candidate peaks", ranges.len());
        Ok(ranges)
    }

    /// Damped Gauss-Newton on the sum-of-Gaussians model. Parameters per
    /// peak are `[amplitude, mean, sigma]`.
    fn gauss_newton(
        &self,
        x: &[f64],
        y: &[f64],
        seeds: &[[f64; 3]],
    ) -> Result<GaussNewtonResult, CorrectionError> {
        let n = x.len();
        let n_params = 3 * seeds.len();
        if n < n_params + 1 {
            return Err(CorrectionError::InsufficientData {
                needed: n_params + 1,
                got: n,
            });
        }

        let mut params: Vec<[f64; 3]> = seeds.to_vec();
        let mut ssr = sum_squared_residuals(x, y, &params);

        for _ in 0..self.max_iterations {
            let jac = jacobian(x, &params);
            let residuals = residual_vector(x, y, &params);

            let svd = jac.svd(true, true);
            let delta = svd.solve(&residuals, 1e-12).map_err(|e| {
                CorrectionError::DegenerateInput(format!("peak fit step failed: {e}"))
            })?;

            // Backtrack when the full step overshoots.
            let mut improved = false;
            let mut scale = 1.0;
            for _ in 0..10 {
                let trial = apply_step(&params, &delta, scale);
                let trial_ssr = sum_squared_residuals(x, y, &trial);
                if trial_ssr <= ssr {
                    let converged = (ssr - trial_ssr).abs() <= self.tolerance * (ssr + 1e-30);
                    params = trial;
                    ssr = trial_ssr;
                    improved = true;
                    if converged {
                        return Ok(finish(x, params, ssr));
                    }
                    break;
                }
                scale *= 0.5;
            }
            if !improved {
                break;
            }
        }
        log::warn!(
            "Peak fit stopped before reaching tolerance ({} iterations, ssr {ssr:.3e})",
            self.max_iterations
        );
        Ok(finish(x, params, ssr))
    }
}

fn finish(x: &[f64], params: Vec<[f64; 3]>, ssr: f64) -> GaussNewtonResult {
    let dof = x.len() - 3 * params.len();

    // Parameter uncertainties from the final normal matrix.
    let jac = jacobian(x, &params);
    let jtj = jac.transpose() * &jac;
    let variance = if dof > 0 { ssr / dof as f64 } else { 0.0 };
    let uncertainties = match jtj.try_inverse() {
        Some(cov) => (0..params.len())
            .map(|k| {
                [
                    (cov[(3 * k, 3 * k)] * variance).max(0.0).sqrt(),
                    (cov[(3 * k + 1, 3 * k + 1)] * variance).max(0.0).sqrt(),
                    (cov[(3 * k + 2, 3 * k + 2)] * variance).max(0.0).sqrt(),
                ]
            })
            .collect(),
        None => {
            log::warn!("Peak fit normal matrix is singular, uncertainties unset");
            vec![[0.0; 3]; params.len()]
        }
    };

    GaussNewtonResult {
        params,
        uncertainties,
        chi_squared: ssr,
        dof,
    }
}

struct GaussNewtonResult {
    params: Vec<[f64; 3]>,
    uncertainties: Vec<[f64; 3]>,
    chi_squared: f64,
    dof: usize,
}

fn gauss(x: f64, a: f64, mu: f64, sigma: f64) -> f64 {
    let z = (x - mu) / sigma;
    a * (-0.5 * z * z).exp()
}

fn model(x: f64, params: &[[f64; 3]]) -> f64 {
    params
        .iter()
        .map(|&[a, mu, sigma]| gauss(x, a, mu, sigma))
        .sum()
}

fn sum_squared_residuals(x: &[f64], y: &[f64], params: &[[f64; 3]]) -> f64 {
    x.iter()
        .zip(y.iter())
        .map(|(&xi, &yi)| {
            let r = yi - model(xi, params);
            r * r
        })
        .sum()
}

fn residual_vector(x: &[f64], y: &[f64], params: &[[f64; 3]]) -> DVector<f64> {
    DVector::from_iterator(
        x.len(),
        x.iter()
            .zip(y.iter())
            .map(|(&xi, &yi)| yi - model(xi, params)),
    )
}

fn jacobian(x: &[f64], params: &[[f64; 3]]) -> DMatrix<f64> {
    let mut jac = DMatrix::zeros(x.len(), 3 * params.len());
    for (row, &xi) in x.iter().enumerate() {
        for (k, &[a, mu, sigma]) in params.iter().enumerate() {
            let g = gauss(xi, 1.0, mu, sigma);
            let d = (xi - mu) / (sigma * sigma);
            jac[(row, 3 * k)] = g;
            jac[(row, 3 * k + 1)] = a * g * d;
            jac[(row, 3 * k + 2)] = a * g * d * (xi - mu) / sigma;
        }
    }
    jac
}

fn apply_step(params: &[[f64; 3]], delta: &DVector<f64>, scale: f64) -> Vec<[f64; 3]> {
    params
        .iter()
        .enumerate()
        .map(|(k, &[a, mu, sigma])| {
            let a = a + scale * delta[3 * k];
            let mu = mu + scale * delta[3 * k + 1];
            let sigma = (sigma + scale * delta[3 * k + 2]).abs().max(1e-12);
            [a, mu, sigma]
        })
        .collect()
}

fn slice_window(x: &[f64], y: &[f64], lo: f64, hi: f64) -> (Vec<f64>, Vec<f64>) {
    let mut wx = Vec::new();
    let mut wy = Vec::new();
    for (&xi, &yi) in x.iter().zip(y.iter()) {
        if xi >= lo && xi <= hi {
            wx.push(xi);
            wy.push(yi);
        }
    }
    (wx, wy)
}

/// Amplitude, mean, and sigma seeds from the windowed count moments.
fn moment_seed(x: &[f64], y: &[f64]) -> Result<[f64; 3], CorrectionError> {
    if x.len() < 4 {
        return Err(CorrectionError::InsufficientData {
            needed: 4,
            got: x.len(),
        });
    }
    let total: f64 = y.iter().sum();
    if total <= 0.0 {
        return Err(CorrectionError::DegenerateInput(
            "fit window has no counts".to_string(),
        ));
    }
    let mean: f64 = x.iter().zip(y.iter()).map(|(&xi, &yi)| xi * yi).sum::<f64>() / total;
    let var: f64 = x
        .iter()
        .zip(y.iter())
        .map(|(&xi, &yi)| yi * (xi - mean).powi(2))
        .sum::<f64>()
        / total;
    let sigma = var.sqrt().max(1e-6);
    let amplitude = y.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    Ok([amplitude, mean, sigma])
}
