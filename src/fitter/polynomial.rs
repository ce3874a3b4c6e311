use compute::predict::PolynomialRegressor;
use serde::{Deserialize, Serialize};

use crate::error::CorrectionError;

/// One region's aberration curve, `position = P(angle)`, with the
/// focal-plane center `P(0)` the corrector pulls events toward.
///
/// Coefficients are stored in ascending powers of angle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionModel {
    pub region_index: usize,
    pub name: String,
    pub degree: usize,
    pub coefficients: Vec<f64>,
    pub center: f64,
}

impl RegionModel {
    /// Least-squares fit of `position = P(angle)` at the given degree.
    pub fn fit(
        region_index: usize,
        name: &str,
        degree: usize,
        angles: &[f64],
        positions: &[f64],
    ) -> Result<Self, CorrectionError> {
        if angles.len() < degree + 1 {
            return Err(CorrectionError::UnderdeterminedFit {
                region: region_index,
                needed: degree + 1,
                got: angles.len(),
            });
        }

        let mut distinct = angles.to_vec();
        distinct.sort_by(f64::total_cmp);
        distinct.dedup();
        if distinct.len() < degree + 1 {
            return Err(CorrectionError::DegenerateInput(format!(
                "region {region_index} has only {} distinct angle values, a degree {degree} fit needs {}",
                distinct.len(),
                degree + 1
            )));
        }

        let mut regressor = PolynomialRegressor::new(degree);
        regressor.fit(angles, positions);
        let coefficients = regressor.coef.clone();
        if coefficients.iter().any(|c| !c.is_finite()) {
            return Err(CorrectionError::DegenerateInput(format!(
                "region {region_index} fit produced non-finite coefficients"
            )));
        }

        let mut model = Self {
            region_index,
            name: name.to_string(),
            degree,
            coefficients,
            center: 0.0,
        };
        model.center = model.eval(0.0);
        Ok(model)
    }

    /// Evaluates `P(angle)` by ascending powers.
    pub fn eval(&self, angle: f64) -> f64 {
        self.coefficients
            .iter()
            .enumerate()
            .fold(0.0, |acc, (j, c)| acc + c * angle.powi(j as i32))
    }
}
