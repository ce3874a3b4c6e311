use log::info;
use serde::{Deserialize, Serialize};

use crate::corrector::{BlendPolicy, Correction, Corrector};
use crate::cutter::region::Region;
use crate::error::CorrectionError;
use crate::events::EventStore;
use crate::fitter::linear::TiltModel;
use crate::fitter::polynomial::RegionModel;
use crate::fitter::regional::fit_regions;

/// Where a run currently stands. Stages advance one way and never repeat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Stage {
    Ingested,
    Detilted,
    RegionsDefined,
    Fitted,
    Corrected,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stage::Ingested => write!(f, "Ingested"),
            Stage::Detilted => write!(f, "Detilted"),
            Stage::RegionsDefined => write!(f, "RegionsDefined"),
            Stage::Fitted => write!(f, "Fitted"),
            Stage::Corrected => write!(f, "Corrected"),
        }
    }
}

/// Everything the correction pass produced, aligned with the event store.
#[derive(Debug, Clone)]
pub struct CorrectionReport {
    pub tilt: Option<TiltModel>,
    pub models: Vec<RegionModel>,
    pub policy: BlendPolicy,
    pub corrections: Vec<Correction>,
    pub corrected: usize,
    pub skipped: usize,
}

impl CorrectionReport {
    pub fn total(&self) -> usize {
        self.corrections.len()
    }

    /// Corrected positions aligned with the store, NaN where skipped.
    pub fn positions_or_nan(&self) -> Vec<f64> {
        self.corrections
            .iter()
            .map(|c| c.value().unwrap_or(f64::NAN))
            .collect()
    }
}

/// Drives one correction run from raw events to corrected positions.
///
/// The stages are strictly ordered: de-tilt, define regions, fit, correct.
/// Each operation checks the current [`Stage`] and fails with
/// [`CorrectionError::InvalidState`] when called out of order; a failed
/// operation leaves the stage where it was. `detilt_with` is the one
/// sanctioned shortcut, applying a previously saved tilt model instead of
/// refitting one.
///
/// Corrections are not idempotent. Region membership and curve distances
/// are evaluated against the coordinates the events currently have, so
/// pushing already-corrected positions through a second pass moves them
/// again. The stage machine makes a second `correct` on the same pipeline
/// impossible; a new run needs a new pipeline.
pub struct Pipeline {
    raw: EventStore,
    detilted: Option<EventStore>,
    stage: Stage,
    tilt: Option<TiltModel>,
    regions: Vec<Region>,
    models: Vec<RegionModel>,
    report: Option<CorrectionReport>,
}

impl Pipeline {
    pub fn new(store: EventStore) -> Self {
        Self {
            raw: store,
            detilted: None,
            stage: Stage::Ingested,
            tilt: None,
            regions: Vec::new(),
            models: Vec::new(),
            report: None,
        }
    }

    fn require(&self, expected: Stage) -> Result<(), CorrectionError> {
        if self.stage == expected {
            Ok(())
        } else {
            Err(CorrectionError::InvalidState {
                expected,
                actual: self.stage,
            })
        }
    }

    /// Fits the tilt line over the gated events inside `tilt_region` and
    /// removes it from every event's angle.
    pub fn detilt(&mut self, tilt_region: &Region) -> Result<&TiltModel, CorrectionError> {
        self.require(Stage::Ingested)?;
        let model = TiltModel::fit(&self.raw, tilt_region)?;
        self.apply_tilt(model)
    }

    /// Applies a previously saved tilt model without refitting.
    pub fn detilt_with(&mut self, model: TiltModel) -> Result<&TiltModel, CorrectionError> {
        self.require(Stage::Ingested)?;
        self.apply_tilt(model)
    }

    fn apply_tilt(&mut self, model: TiltModel) -> Result<&TiltModel, CorrectionError> {
        let detilted = model.detilt(&self.raw)?;
        self.detilted = Some(detilted);
        self.stage = Stage::Detilted;
        Ok(self.tilt.insert(model))
    }

    /// Registers the aberration regions the fit stage will use. Region
    /// membership is evaluated in de-tilted coordinates.
    pub fn define_regions(&mut self, regions: Vec<Region>) -> Result<(), CorrectionError> {
        self.require(Stage::Detilted)?;
        if regions.is_empty() {
            return Err(CorrectionError::InsufficientData { needed: 1, got: 0 });
        }
        for region in &regions {
            region.validate()?;
        }
        info!("Defined {} aberration regions", regions.len());
        self.regions = regions;
        self.stage = Stage::RegionsDefined;
        Ok(())
    }

    /// Fits one polynomial of the given degree per region.
    pub fn fit(&mut self, degree: usize) -> Result<&[RegionModel], CorrectionError> {
        self.require(Stage::RegionsDefined)?;
        let store = self.detilted.as_ref().unwrap_or(&self.raw);
        let models = fit_regions(store, &self.regions, degree)?;
        self.models = models;
        self.stage = Stage::Fitted;
        Ok(&self.models)
    }

    /// Runs the correction pass over every event and fills the report.
    pub fn correct(&mut self, policy: BlendPolicy) -> Result<&CorrectionReport, CorrectionError> {
        self.require(Stage::Fitted)?;
        let corrector = Corrector::new(self.models.clone(), policy)?;
        let store = self.detilted.as_ref().unwrap_or(&self.raw);
        let corrections = corrector.correct_store(store);
        let corrected = corrections
            .iter()
            .filter(|c| matches!(c, Correction::Corrected(_)))
            .count();
        let skipped = corrections.len() - corrected;
        info!("Corrected {corrected} events, skipped {skipped} with NaN coordinates");
        let report = CorrectionReport {
            tilt: self.tilt.clone(),
            models: self.models.clone(),
            policy,
            corrections,
            corrected,
            skipped,
        };
        self.stage = Stage::Corrected;
        Ok(self.report.insert(report))
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn raw_events(&self) -> &EventStore {
        &self.raw
    }

    /// The store the next stage will operate on: de-tilted once available.
    pub fn events(&self) -> &EventStore {
        self.detilted.as_ref().unwrap_or(&self.raw)
    }

    pub fn tilt_model(&self) -> Option<&TiltModel> {
        self.tilt.as_ref()
    }

    pub fn regions(&self) -> &[Region] {
        &self.regions
    }

    pub fn region_models(&self) -> &[RegionModel] {
        &self.models
    }

    pub fn report(&self) -> Option<&CorrectionReport> {
        self.report.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn box_region(name: &str, x_lo: f64, x_hi: f64, y_lo: f64, y_hi: f64) -> Region {
        Region::new(
            name,
            vec![[x_lo, y_lo], [x_hi, y_lo], [x_hi, y_hi], [x_lo, y_hi]],
            "Xavg",
            "Theta",
        )
        .unwrap()
    }

    fn small_store() -> EventStore {
        EventStore::new(
            vec![-10.0, 0.0, 10.0, 20.0],
            vec![-0.1, 0.0, 0.1, 0.2],
            vec![true, true, true, true],
        )
        .unwrap()
    }

    #[test]
    fn stages_reject_out_of_order_calls() {
        let mut pipeline = Pipeline::new(small_store());

        match pipeline.define_regions(vec![box_region("r", -1.0, 1.0, -1.0, 1.0)]) {
            Err(CorrectionError::InvalidState { expected, actual }) => {
                assert_eq!(expected, Stage::Detilted);
                assert_eq!(actual, Stage::Ingested);
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert!(matches!(
            pipeline.fit(2),
            Err(CorrectionError::InvalidState {
                expected: Stage::RegionsDefined,
                actual: Stage::Ingested,
            })
        ));
        assert!(matches!(
            pipeline.correct(BlendPolicy::GlobalBlend),
            Err(CorrectionError::InvalidState {
                expected: Stage::Fitted,
                actual: Stage::Ingested,
            })
        ));
        assert_eq!(pipeline.stage(), Stage::Ingested);
    }

    #[test]
    fn stages_cannot_repeat() {
        let mut pipeline = Pipeline::new(small_store());
        let tilt = box_region("tilt", -20.0, 30.0, -1.0, 1.0);
        pipeline.detilt(&tilt).unwrap();
        assert!(matches!(
            pipeline.detilt(&tilt),
            Err(CorrectionError::InvalidState {
                expected: Stage::Ingested,
                actual: Stage::Detilted,
            })
        ));
        assert!(matches!(
            pipeline.detilt_with(TiltModel {
                intercept: 0.0,
                slope: 0.0,
            }),
            Err(CorrectionError::InvalidState { .. })
        ));
    }

    #[test]
    fn failed_detilt_leaves_stage_unchanged() {
        let mut pipeline = Pipeline::new(small_store());
        // Region holding a single event: not enough for a line.
        let narrow = box_region("narrow", -0.5, 0.5, -1.0, 1.0);
        match pipeline.detilt(&narrow) {
            Err(CorrectionError::InsufficientData { needed: 2, got: 1 }) => {}
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(pipeline.stage(), Stage::Ingested);
        assert!(pipeline.tilt_model().is_none());

        // The pipeline is still usable with a better region.
        let wide = box_region("wide", -20.0, 30.0, -1.0, 1.0);
        pipeline.detilt(&wide).unwrap();
        assert_eq!(pipeline.stage(), Stage::Detilted);
    }

    #[test]
    fn empty_region_set_is_rejected() {
        let mut pipeline = Pipeline::new(small_store());
        pipeline
            .detilt(&box_region("tilt", -20.0, 30.0, -1.0, 1.0))
            .unwrap();
        match pipeline.define_regions(Vec::new()) {
            Err(CorrectionError::InsufficientData { needed: 1, got: 0 }) => {}
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(pipeline.stage(), Stage::Detilted);
    }

    #[test]
    fn detilt_with_applies_saved_model_without_fitting() {
        // Two identical positions would make a fresh fit degenerate, but a
        // saved model applies fine.
        let store = EventStore::new(
            vec![50.0, 50.0],
            vec![2.1, 2.2],
            vec![true, true],
        )
        .unwrap();
        let mut pipeline = Pipeline::new(store);
        let saved = TiltModel {
            intercept: 1.5,
            slope: 0.01,
        };
        pipeline.detilt_with(saved.clone()).unwrap();
        assert_eq!(pipeline.stage(), Stage::Detilted);
        assert_eq!(pipeline.tilt_model(), Some(&saved));
        // angle' = angle - (1.5 + 0.01 * 50) = angle - 2.0
        let angles = pipeline.events().angles();
        assert!((angles[0] - 0.1).abs() < 1e-12);
        assert!((angles[1] - 0.2).abs() < 1e-12);
    }

    // 1000 synthetic events on two quadratic tracks. Pairing each angle
    // offset with its negative keeps the tilt fit unbiased, so the run
    // recovers the 0.01 slope and collapses each track onto its center.
    #[test]
    fn full_run_recovers_tilt_and_centers_tracks() {
        let mut positions = Vec::with_capacity(1000);
        let mut angles = Vec::with_capacity(1000);
        for p in 0..500 {
            let delta = -2.0 + 4.0 * p as f64 / 499.0;
            let (c, q) = if p % 2 == 0 { (-100.0, 1.5) } else { (150.0, 0.8) };
            let x = c + q * delta * delta;
            positions.push(x);
            positions.push(x);
            angles.push(0.01 * x + delta);
            angles.push(0.01 * x - delta);
        }
        let store = EventStore::new(positions, angles, vec![true; 1000]).unwrap();

        let mut pipeline = Pipeline::new(store);
        let tilt_region = box_region("tilt", -320.0, 320.0, -10.0, 10.0);
        let tilt = pipeline.detilt(&tilt_region).unwrap().clone();
        assert!((tilt.slope - 0.01).abs() <= 1e-4);
        assert!(tilt.intercept.abs() <= 1e-4);

        pipeline
            .define_regions(vec![
                box_region("track_a", -110.0, -90.0, -3.0, 3.0),
                box_region("track_b", 140.0, 165.0, -3.0, 3.0),
            ])
            .unwrap();
        let models = pipeline.fit(2).unwrap();
        assert_eq!(models.len(), 2);
        assert!((models[0].center + 100.0).abs() < 1e-6);
        assert!((models[1].center - 150.0).abs() < 1e-6);

        let report = pipeline.correct(BlendPolicy::GlobalBlend).unwrap();
        assert_eq!(report.total(), 1000);
        assert_eq!(report.corrected, 1000);
        assert_eq!(report.skipped, 0);

        // Every event collapses onto its track center.
        let raw = pipeline.raw_events().positions();
        let report = pipeline.report().unwrap();
        for (i, correction) in report.corrections.iter().enumerate() {
            let value = correction.value().unwrap();
            let center = if raw[i] < 0.0 { -100.0 } else { 150.0 };
            assert!(
                (value - center).abs() < 1e-4,
                "event {i}: corrected {value} far from {center}"
            );
        }
        assert_eq!(pipeline.stage(), Stage::Corrected);

        // And the machine is spent.
        assert!(matches!(
            pipeline.correct(BlendPolicy::GlobalBlend),
            Err(CorrectionError::InvalidState { .. })
        ));
    }

    // Pins the behavior documented on `Pipeline`: feeding corrected
    // positions back through the same curves moves them again.
    #[test]
    fn correction_is_not_idempotent() {
        let models = vec![
            RegionModel {
                region_index: 0,
                name: "a".to_string(),
                degree: 1,
                coefficients: vec![0.0, 1.0],
                center: 0.0,
            },
            RegionModel {
                region_index: 1,
                name: "b".to_string(),
                degree: 1,
                coefficients: vec![8.0, 2.0],
                center: 8.0,
            },
        ];
        let corrector = Corrector::new(models, BlendPolicy::GlobalBlend).unwrap();
        let once = match corrector.correct(2.0, 1.0) {
            Correction::Corrected(value) => value,
            Correction::Skipped => panic!("finite event skipped"),
        };
        let twice = match corrector.correct(once, 1.0) {
            Correction::Corrected(value) => value,
            Correction::Skipped => panic!("finite event skipped"),
        };
        assert!((once - twice).abs() > 1e-3);
    }
}
