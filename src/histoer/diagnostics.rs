use std::fs::File;
use std::io::Write;

use log::info;
use serde::{Deserialize, Serialize};

use super::histogram1d::Histogram;
use super::histogram2d::{Histogram2D, Histogram2DExport};
use crate::corrector::Correction;
use crate::error::CorrectionError;
use crate::events::EventStore;

/// The standard spectra for one correction run: focal plane vs angle before
/// de-tilting, after de-tilting, and after correction, plus the 1-D position
/// spectra the peak fits run over.
pub struct Diagnostics {
    pub raw_position: Histogram,
    pub corrected_position: Histogram,
    pub raw_plane: Histogram2D,
    pub detilted_plane: Histogram2D,
    pub corrected_plane: Histogram2D,
}

/// Serializable form of the full diagnostic set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosticsExport {
    pub raw_position: Histogram,
    pub corrected_position: Histogram,
    pub raw_plane: Histogram2DExport,
    pub detilted_plane: Histogram2DExport,
    pub corrected_plane: Histogram2DExport,
}

impl Diagnostics {
    pub fn new(
        position_bins: usize,
        position_range: (f64, f64),
        angle_bins: usize,
        angle_range: (f64, f64),
    ) -> Self {
        let plane = (position_range, angle_range);
        Self {
            raw_position: Histogram::new("Xavg", position_bins, position_range),
            corrected_position: Histogram::new("XavgCorr", position_bins, position_range),
            raw_plane: Histogram2D::new("Theta v Xavg", (position_bins, angle_bins), plane),
            detilted_plane: Histogram2D::new(
                "ThetaDetilt v Xavg",
                (position_bins, angle_bins),
                plane,
            ),
            corrected_plane: Histogram2D::new(
                "ThetaDetilt v XavgCorr",
                (position_bins, angle_bins),
                plane,
            ),
        }
    }

    pub fn fill_raw(&mut self, store: &EventStore) {
        for (&x, &theta) in store.positions().iter().zip(store.angles().iter()) {
            self.raw_position.fill(x);
            self.raw_plane.fill(x, theta);
        }
    }

    pub fn fill_detilted(&mut self, store: &EventStore) {
        for (&x, &theta) in store.positions().iter().zip(store.angles().iter()) {
            self.detilted_plane.fill(x, theta);
        }
    }

    /// Fills the corrected spectra; skipped events are left out entirely.
    pub fn fill_corrected(&mut self, detilted: &EventStore, corrections: &[Correction]) {
        for (correction, &theta) in corrections.iter().zip(detilted.angles().iter()) {
            if let Some(value) = correction.value() {
                self.corrected_position.fill(value);
                self.corrected_plane.fill(value, theta);
            }
        }
    }

    pub fn log_summary(&self) {
        let (count, mean, stdev) = self
            .corrected_position
            .get_statistics(self.corrected_position.range.0, self.corrected_position.range.1);
        info!(
            "Spectra: {} raw events, {} corrected (mean {mean:.3}, stdev {stdev:.3})",
            self.raw_position.total(),
            count
        );
    }

    pub fn export(&self) -> DiagnosticsExport {
        DiagnosticsExport {
            raw_position: self.raw_position.clone(),
            corrected_position: self.corrected_position.clone(),
            raw_plane: self.raw_plane.export(),
            detilted_plane: self.detilted_plane.export(),
            corrected_plane: self.corrected_plane.export(),
        }
    }

    pub fn save_to_json(&self, path: &str) -> Result<(), CorrectionError> {
        let serialized = serde_json::to_string(&self.export())?;
        let mut file = File::create(path)?;
        file.write_all(serialized.as_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fills_track_each_stage() {
        let store = EventStore::new(
            vec![-50.0, 0.0, 50.0],
            vec![-0.5, 0.0, 0.5],
            vec![true, true, true],
        )
        .unwrap();
        let detilted = store.with_angles(vec![-0.4, 0.1, 0.6]).unwrap();
        let corrections = vec![
            Correction::Corrected(-45.0),
            Correction::Skipped,
            Correction::Corrected(55.0),
        ];

        let mut diagnostics = Diagnostics::new(20, (-100.0, 100.0), 10, (-1.0, 1.0));
        diagnostics.fill_raw(&store);
        diagnostics.fill_detilted(&detilted);
        diagnostics.fill_corrected(&detilted, &corrections);

        assert_eq!(diagnostics.raw_position.total(), 3);
        assert_eq!(diagnostics.raw_plane.total(), 3);
        assert_eq!(diagnostics.detilted_plane.total(), 3);
        // The skipped event appears nowhere in the corrected spectra.
        assert_eq!(diagnostics.corrected_position.total(), 2);
        assert_eq!(diagnostics.corrected_plane.total(), 2);
    }

    #[test]
    fn test_export_round_trips_through_json() {
        let store = EventStore::new(vec![1.0, 2.0], vec![0.1, 0.2], vec![true, true]).unwrap();
        let mut diagnostics = Diagnostics::new(10, (0.0, 10.0), 10, (-1.0, 1.0));
        diagnostics.fill_raw(&store);

        let path = std::env::temp_dir().join("aberrix_diagnostics_test.json");
        let path = path.to_string_lossy();
        diagnostics.save_to_json(&path).unwrap();

        let contents = std::fs::read_to_string(path.as_ref()).unwrap();
        let export: DiagnosticsExport = serde_json::from_str(&contents).unwrap();
        assert_eq!(export.raw_position.total(), 2);
        assert_eq!(export.raw_plane.name, "Theta v Xavg");
        std::fs::remove_file(path.as_ref()).unwrap();
    }
}
