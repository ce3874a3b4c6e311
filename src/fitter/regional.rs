use std::fs::File;
use std::io::{BufReader, Write};

use log::info;

use crate::cutter::region::Region;
use crate::error::CorrectionError;
use crate::events::EventStore;
use crate::fitter::polynomial::RegionModel;

/// Fits one aberration curve per region at a uniform degree.
///
/// Regions are taken in index order over the detilted store; only gated
/// events inside a region enter its fit. Regions may overlap, so one event
/// can feed several fits. Any region that fails aborts the whole set.
pub fn fit_regions(
    store: &EventStore,
    regions: &[Region],
    degree: usize,
) -> Result<Vec<RegionModel>, CorrectionError> {
    let positions = store.positions();
    let angles = store.angles();
    let gates = store.gates();

    let mut models = Vec::with_capacity(regions.len());
    for (i, region) in regions.iter().enumerate() {
        let inside = region.contains_slice(positions, angles);

        let mut theta_set = Vec::new();
        let mut x_set = Vec::new();
        for j in 0..store.len() {
            if gates[j] && inside[j] {
                theta_set.push(angles[j]);
                x_set.push(positions[j]);
            }
        }

        let model = RegionModel::fit(i, &region.name, degree, &theta_set, &x_set)?;
        info!(
            "Region {i} ('{}'): {} events, center {:.3}, coefficients {:?}",
            region.name,
            theta_set.len(),
            model.center,
            model.coefficients
        );
        models.push(model);
    }
    Ok(models)
}

pub fn save_models_to_json(models: &[RegionModel], path: &str) -> Result<(), CorrectionError> {
    let serialized = serde_json::to_string(models)?;
    let mut file = File::create(path)?;
    file.write_all(serialized.as_bytes())?;
    Ok(())
}

pub fn load_models_from_json(path: &str) -> Result<Vec<RegionModel>, CorrectionError> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    Ok(serde_json::from_reader(reader)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn band(name: &str, x_lo: f64, x_hi: f64) -> Region {
        Region::new(
            name,
            vec![[x_lo, -3.0], [x_hi, -3.0], [x_hi, 3.0], [x_lo, 3.0]],
            "Xavg",
            "Theta",
        )
        .unwrap()
    }

    fn two_track_store() -> EventStore {
        // Track A around x = -100, track B around x = 150, both quadratic
        // in angle. One ungated off-curve stray sits inside track A's band.
        let mut positions = Vec::new();
        let mut angles = Vec::new();
        let mut gates = Vec::new();
        for i in 0..21 {
            let t = -2.0 + 0.2 * i as f64;
            positions.push(-100.0 + 4.0 * t + 1.5 * t * t);
            angles.push(t);
            gates.push(true);
        }
        for i in 0..21 {
            let t = -2.0 + 0.2 * i as f64;
            positions.push(150.0 - 2.0 * t + 0.8 * t * t);
            angles.push(t);
            gates.push(true);
        }
        positions.push(-90.0);
        angles.push(0.0);
        gates.push(false);
        EventStore::new(positions, angles, gates).unwrap()
    }

    #[test]
    fn test_per_region_recovery() {
        let store = two_track_store();
        let regions = vec![band("trackA", -130.0, -70.0), band("trackB", 120.0, 180.0)];

        let models = fit_regions(&store, &regions, 2).unwrap();
        assert_eq!(models.len(), 2);

        assert!((models[0].coefficients[0] + 100.0).abs() < 1e-6);
        assert!((models[0].coefficients[1] - 4.0).abs() < 1e-6);
        assert!((models[0].coefficients[2] - 1.5).abs() < 1e-6);
        assert!((models[0].center + 100.0).abs() < 1e-6);

        assert!((models[1].coefficients[0] - 150.0).abs() < 1e-6);
        assert!((models[1].coefficients[1] + 2.0).abs() < 1e-6);
        assert!((models[1].coefficients[2] - 0.8).abs() < 1e-6);
        assert_eq!(models[1].region_index, 1);
    }

    #[test]
    fn test_failing_region_aborts_with_index() {
        let store = two_track_store();
        // Second band misses both tracks entirely.
        let regions = vec![band("trackA", -130.0, -70.0), band("empty", 300.0, 320.0)];

        match fit_regions(&store, &regions, 2) {
            Err(CorrectionError::UnderdeterminedFit { region: 1, .. }) => {}
            other => panic!("expected UnderdeterminedFit for region 1, got {other:?}"),
        }
    }

    #[test]
    fn test_ungated_events_excluded() {
        // The ungated stray at (-90, 0) would pull track A's constant term
        // if it leaked into the sample.
        let store = two_track_store();
        let regions = vec![band("trackA", -130.0, -70.0)];
        let models = fit_regions(&store, &regions, 2).unwrap();
        assert!((models[0].coefficients[0] + 100.0).abs() < 1e-6);
    }

    #[test]
    fn test_models_json_round_trip() {
        let store = two_track_store();
        let regions = vec![band("trackA", -130.0, -70.0)];
        let models = fit_regions(&store, &regions, 2).unwrap();

        let dir = std::env::temp_dir().join("aberrix_models_test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("models.json");
        let path = path.to_str().unwrap();

        save_models_to_json(&models, path).unwrap();
        let back = load_models_from_json(path).unwrap();
        assert_eq!(back, models);
        std::fs::remove_file(path).unwrap();
    }
}
