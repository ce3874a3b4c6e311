use std::fs::File;
use std::io::{BufReader, Write};

use log::info;
use serde::{Deserialize, Serialize};

use crate::cutter::region::Region;
use crate::error::CorrectionError;
use crate::events::EventStore;

/// Straight-line tilt of the angle spectrum across the focal plane,
/// `angle ~ intercept + slope * position`.
///
/// The line is fit only over gated events inside the operator's tilt region,
/// then subtracted from every event's angle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TiltModel {
    pub intercept: f64,
    pub slope: f64,
}

impl TiltModel {
    /// Fits the tilt line over gated events inside `tilt_region`.
    pub fn fit(store: &EventStore, tilt_region: &Region) -> Result<Self, CorrectionError> {
        let positions = store.positions();
        let angles = store.angles();
        let gates = store.gates();
        let inside = tilt_region.contains_slice(positions, angles);

        let mut x_data = Vec::new();
        let mut y_data = Vec::new();
        for i in 0..store.len() {
            if gates[i] && inside[i] {
                x_data.push(positions[i]);
                y_data.push(angles[i]);
            }
        }

        let model = Self::least_squares(&x_data, &y_data)?;
        info!(
            "Tilt fit: slope: {}, intercept: {} ({} events in region '{}')",
            model.slope,
            model.intercept,
            x_data.len(),
            tilt_region.name
        );
        Ok(model)
    }

    /// Closed-form least squares of angle on position.
    pub fn least_squares(x_data: &[f64], y_data: &[f64]) -> Result<Self, CorrectionError> {
        if x_data.len() < 2 {
            return Err(CorrectionError::InsufficientData {
                needed: 2,
                got: x_data.len(),
            });
        }

        let n = x_data.len() as f64;
        let sum_x: f64 = x_data.iter().sum();
        let sum_y: f64 = y_data.iter().sum();
        let sum_xy: f64 = x_data.iter().zip(y_data.iter()).map(|(x, y)| x * y).sum();
        let sum_x_squared: f64 = x_data.iter().map(|x| x.powi(2)).sum();

        let denominator = n * sum_x_squared - sum_x.powi(2);
        if denominator == 0.0 {
            return Err(CorrectionError::DegenerateInput(
                "tilt sample positions are all identical, the line slope is undefined".to_string(),
            ));
        }

        let slope = (n * sum_xy - sum_x * sum_y) / denominator;
        let intercept = (sum_y - slope * sum_x) / n;
        if !slope.is_finite() || !intercept.is_finite() {
            return Err(CorrectionError::DegenerateInput(
                "tilt fit produced non-finite coefficients".to_string(),
            ));
        }

        Ok(Self { intercept, slope })
    }

    pub fn eval(&self, position: f64) -> f64 {
        self.intercept + self.slope * position
    }

    /// Subtracts the tilt line from every event's angle, gated or not.
    /// NaN positions or angles stay NaN in the working copy.
    pub fn detilt(&self, store: &EventStore) -> Result<EventStore, CorrectionError> {
        let detilted = store
            .positions()
            .iter()
            .zip(store.angles().iter())
            .map(|(&x, &theta)| theta - self.eval(x))
            .collect();
        store.with_angles(detilted)
    }

    pub fn save_to_json(&self, path: &str) -> Result<(), CorrectionError> {
        let serialized = serde_json::to_string(self)?;
        let mut file = File::create(path)?;
        file.write_all(serialized.as_bytes())?;
        Ok(())
    }

    pub fn load_from_json(path: &str) -> Result<Self, CorrectionError> {
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        Ok(serde_json::from_reader(reader)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wide_region() -> Region {
        Region::new(
            "tilt",
            vec![[-300.0, -5.0], [300.0, -5.0], [300.0, 5.0], [-300.0, 5.0]],
            "Xavg",
            "Theta",
        )
        .unwrap()
    }

    #[test]
    fn test_exact_coefficient_recovery() {
        let positions: Vec<f64> = (0..50).map(|i| -250.0 + 10.0 * i as f64).collect();
        let angles: Vec<f64> = positions.iter().map(|&x| 1.5 + 0.01 * x).collect();
        let gates = vec![true; positions.len()];
        let store = EventStore::new(positions, angles, gates).unwrap();

        let model = TiltModel::fit(&store, &wide_region()).unwrap();
        assert!((model.slope - 0.01).abs() < 1e-9);
        assert!((model.intercept - 1.5).abs() < 1e-9);
    }

    #[test]
    fn test_sample_restricted_to_gate_and_region() {
        // Two ungated and one out-of-region outlier must not move the fit.
        let positions = vec![-100.0, 0.0, 100.0, 200.0, -50.0, 50.0];
        let angles = vec![-1.0, 0.0, 1.0, 40.0, 30.0, 30.0];
        let gates = vec![true, true, true, true, false, false];
        let store = EventStore::new(positions, angles, gates).unwrap();

        let model = TiltModel::fit(&store, &wide_region()).unwrap();
        assert!((model.slope - 0.01).abs() < 1e-9);
        assert!(model.intercept.abs() < 1e-9);
    }

    #[test]
    fn test_insufficient_data() {
        let store = EventStore::new(vec![1.0], vec![0.1], vec![true]).unwrap();
        match TiltModel::fit(&store, &wide_region()) {
            Err(CorrectionError::InsufficientData { needed: 2, got: 1 }) => {}
            other => panic!("expected InsufficientData, got {other:?}"),
        }
    }

    #[test]
    fn test_identical_positions_are_degenerate() {
        let store = EventStore::new(
            vec![5.0, 5.0, 5.0],
            vec![0.1, 0.2, 0.3],
            vec![true, true, true],
        )
        .unwrap();
        match TiltModel::fit(&store, &wide_region()) {
            Err(CorrectionError::DegenerateInput(_)) => {}
            other => panic!("expected DegenerateInput, got {other:?}"),
        }
    }

    #[test]
    fn test_detilt_applies_to_ungated_events() {
        let store = EventStore::new(
            vec![-100.0, 0.0, 100.0, 250.0],
            vec![-1.0, 0.0, 1.0, 2.5],
            vec![true, true, true, false],
        )
        .unwrap();
        let model = TiltModel::fit(&store, &wide_region()).unwrap();
        let detilted = model.detilt(&store).unwrap();

        for (i, &theta) in detilted.angles().iter().enumerate() {
            assert!(theta.abs() < 1e-9, "event {i} not flattened: {theta}");
        }
        assert_eq!(detilted.gates(), store.gates());
    }

    #[test]
    fn test_detilt_carries_nan() {
        let model = TiltModel {
            intercept: 0.0,
            slope: 0.01,
        };
        let store = EventStore::new(
            vec![10.0, f64::NAN],
            vec![f64::NAN, 0.3],
            vec![true, true],
        )
        .unwrap();
        let detilted = model.detilt(&store).unwrap();
        assert!(detilted.angles()[0].is_nan());
        assert!(detilted.angles()[1].is_nan());
    }
}
