use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::CorrectionError;
use crate::events::EventStore;
use crate::fitter::polynomial::RegionModel;

/// How many region curves share in one event's correction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlendPolicy {
    /// Every fitted curve contributes, weighted by inverse distance.
    GlobalBlend,
    /// Only the `k` curves whose predictions land closest to the event.
    Nearest { k: usize },
}

impl Default for BlendPolicy {
    fn default() -> Self {
        Self::GlobalBlend
    }
}

impl std::fmt::Display for BlendPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::GlobalBlend => write!(f, "global blend"),
            Self::Nearest { k } => write!(f, "nearest {k}"),
        }
    }
}

/// Outcome of correcting a single event.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Correction {
    /// Corrected focal-plane position.
    Corrected(f64),
    /// Event had a NaN position or angle and was left alone.
    Skipped,
}

impl Correction {
    pub fn value(&self) -> Option<f64> {
        match self {
            Self::Corrected(value) => Some(*value),
            Self::Skipped => None,
        }
    }
}

/// Blends the per-region aberration curves into a position correction.
///
/// Each region model predicts where an event with the observed angle would
/// sit if it belonged to that region's track. The displacement of that
/// prediction from the region's reference center is the aberration the
/// curve has sampled, and curves whose predictions land near the observed
/// position know the most about it, so the blend weights each displacement
/// by inverse distance.
pub struct Corrector {
    models: Vec<RegionModel>,
    policy: BlendPolicy,
}

impl Corrector {
    pub fn new(models: Vec<RegionModel>, policy: BlendPolicy) -> Result<Self, CorrectionError> {
        if models.is_empty() {
            return Err(CorrectionError::InsufficientData { needed: 1, got: 0 });
        }
        if let BlendPolicy::Nearest { k } = policy {
            if k == 0 {
                return Err(CorrectionError::Config(
                    "nearest blend requires k >= 1".to_string(),
                ));
            }
        }
        Ok(Self { models, policy })
    }

    pub fn models(&self) -> &[RegionModel] {
        &self.models
    }

    pub fn policy(&self) -> BlendPolicy {
        self.policy
    }

    /// Blended aberration displacement at the given focal-plane point.
    ///
    /// An event lying exactly on a curve takes that curve's displacement
    /// alone, the lowest region index winning if several curves pass
    /// through the point.
    pub fn interpolate(&self, position: f64, angle: f64) -> f64 {
        // (inverse distance, displacement) per curve, in region order.
        let mut terms: Vec<(f64, f64)> = Vec::with_capacity(self.models.len());
        for model in &self.models {
            let predicted = model.eval(angle);
            let distance = (predicted - position).abs();
            if distance == 0.0 {
                return predicted - model.center;
            }
            terms.push((1.0 / distance, predicted - model.center));
        }

        if let BlendPolicy::Nearest { k } = self.policy {
            if k < terms.len() {
                // Stable sort keeps the lower region index ahead on ties.
                terms.sort_by(|a, b| b.0.total_cmp(&a.0));
                terms.truncate(k);
            }
        }

        let total: f64 = terms.iter().map(|(inv, _)| inv).sum();
        terms
            .iter()
            .map(|(inv, displacement)| inv / total * displacement)
            .sum()
    }

    /// Corrects one event, subtracting the blended displacement.
    pub fn correct(&self, position: f64, angle: f64) -> Correction {
        if position.is_nan() || angle.is_nan() {
            return Correction::Skipped;
        }
        Correction::Corrected(position - self.interpolate(position, angle))
    }

    /// Corrects every event in the store, gated or not.
    pub fn correct_store(&self, store: &EventStore) -> Vec<Correction> {
        store
            .positions()
            .par_iter()
            .zip(store.angles().par_iter())
            .map(|(&position, &angle)| self.correct(position, angle))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventStore;

    fn model(region_index: usize, coefficients: Vec<f64>) -> RegionModel {
        let center = coefficients.first().copied().unwrap_or(0.0);
        RegionModel {
            region_index,
            name: format!("region_{region_index}"),
            degree: coefficients.len().saturating_sub(1),
            coefficients,
            center,
        }
    }

    #[test]
    fn empty_model_list_is_rejected() {
        match Corrector::new(Vec::new(), BlendPolicy::GlobalBlend) {
            Err(CorrectionError::InsufficientData { needed: 1, got: 0 }) => {}
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn nearest_zero_is_rejected() {
        let corrector = Corrector::new(vec![model(0, vec![0.0, 1.0])], BlendPolicy::Nearest { k: 0 });
        assert!(matches!(corrector, Err(CorrectionError::Config(_))));
    }

    #[test]
    fn exact_hit_takes_that_curve_alone() {
        // Curve 0 passes exactly through the event, curve 1 carries a large
        // displacement that must not leak in.
        let corrector = Corrector::new(
            vec![model(0, vec![0.0, 1.0]), model(1, vec![50.0, 10.0])],
            BlendPolicy::GlobalBlend,
        )
        .unwrap();
        let displacement = corrector.interpolate(2.0, 2.0);
        assert!((displacement - 2.0).abs() < 1e-12);
        match corrector.correct(2.0, 2.0) {
            Correction::Corrected(value) => assert!(value.abs() < 1e-12),
            Correction::Skipped => panic!("event should not be skipped"),
        }
    }

    #[test]
    fn exact_tie_keeps_lowest_region_index() {
        // Both curves pass through (angle 2, position 2) but with different
        // centers, so the winner is observable.
        let corrector = Corrector::new(
            vec![model(0, vec![0.0, 1.0]), model(1, vec![-2.0, 2.0])],
            BlendPolicy::GlobalBlend,
        )
        .unwrap();
        let displacement = corrector.interpolate(2.0, 2.0);
        assert!((displacement - 2.0).abs() < 1e-12);
    }

    #[test]
    fn equidistant_curves_average_their_displacements() {
        // At angle 1 the curves predict +5 and -5, both distance 5 from the
        // event at position 0, with displacements 1 and 3.
        let corrector = Corrector::new(
            vec![model(0, vec![4.0, 1.0]), model(1, vec![-8.0, 3.0])],
            BlendPolicy::GlobalBlend,
        )
        .unwrap();
        let displacement = corrector.interpolate(0.0, 1.0);
        assert!((displacement - 2.0).abs() < 1e-12);
    }

    #[test]
    fn closer_curve_dominates_the_blend() {
        // Distances 1 and 9 give weights 0.9 and 0.1.
        let corrector = Corrector::new(
            vec![model(0, vec![0.0, 1.0]), model(1, vec![8.0, 3.0])],
            BlendPolicy::GlobalBlend,
        )
        .unwrap();
        // angle 1: predictions 1 and 11, event at 2, displacements 1 and 3.
        let displacement = corrector.interpolate(2.0, 1.0);
        let expected = 0.9 * 1.0 + 0.1 * 3.0;
        assert!((displacement - expected).abs() < 1e-12);
    }

    #[test]
    fn nearest_one_uses_only_the_closest_curve() {
        let corrector = Corrector::new(
            vec![model(0, vec![0.0, 1.0]), model(1, vec![8.0, 2.0])],
            BlendPolicy::Nearest { k: 1 },
        )
        .unwrap();
        let displacement = corrector.interpolate(2.0, 1.0);
        assert!((displacement - 1.0).abs() < 1e-12);
    }

    #[test]
    fn nearest_tie_keeps_lowest_region_index() {
        // Equidistant curves with displacements 1 and 3; k = 1 must keep
        // region 0.
        let corrector = Corrector::new(
            vec![model(0, vec![4.0, 1.0]), model(1, vec![-8.0, 3.0])],
            BlendPolicy::Nearest { k: 1 },
        )
        .unwrap();
        let displacement = corrector.interpolate(0.0, 1.0);
        assert!((displacement - 1.0).abs() < 1e-12);
    }

    #[test]
    fn nearest_with_k_beyond_model_count_matches_global() {
        let models = vec![model(0, vec![0.0, 1.0]), model(1, vec![8.0, 2.0])];
        let global = Corrector::new(models.clone(), BlendPolicy::GlobalBlend).unwrap();
        let nearest = Corrector::new(models, BlendPolicy::Nearest { k: 5 }).unwrap();
        let a = global.interpolate(2.0, 1.0);
        let b = nearest.interpolate(2.0, 1.0);
        assert!((a - b).abs() < 1e-12);
    }

    #[test]
    fn nan_events_are_skipped_not_failed() {
        let corrector =
            Corrector::new(vec![model(0, vec![0.0, 1.0])], BlendPolicy::GlobalBlend).unwrap();
        assert_eq!(corrector.correct(f64::NAN, 1.0), Correction::Skipped);
        assert_eq!(corrector.correct(1.0, f64::NAN), Correction::Skipped);
    }

    #[test]
    fn store_pass_corrects_every_event_regardless_of_gate() {
        let corrector =
            Corrector::new(vec![model(0, vec![4.0, 1.0])], BlendPolicy::GlobalBlend).unwrap();
        let store = EventStore::new(
            vec![0.0, 0.0, f64::NAN],
            vec![1.0, 1.0, 1.0],
            vec![true, false, true],
        )
        .unwrap();
        let corrections = corrector.correct_store(&store);
        assert_eq!(corrections.len(), 3);
        // Displacement at angle 1 is 1, so both finite events move to -1.
        for correction in &corrections[..2] {
            match correction {
                Correction::Corrected(value) => assert!((value + 1.0).abs() < 1e-12),
                Correction::Skipped => panic!("finite event skipped"),
            }
        }
        assert_eq!(corrections[2], Correction::Skipped);
    }
}
