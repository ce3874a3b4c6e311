use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::corrector::BlendPolicy;
use crate::cutter::gates::{Gate, Gates, WindowGate};
use crate::cutter::region::Region;
use crate::error::CorrectionError;
use crate::fitter::gaussian::MultiGaussFitter;
use crate::kinematics::KineParameters;

/// Column names in the input Parquet files.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ColumnConfig {
    pub x1: String,
    pub x2: String,
    pub position: String,
    pub angle: String,
}

impl Default for ColumnConfig {
    fn default() -> Self {
        Self {
            x1: "X1".to_string(),
            x2: "X2".to_string(),
            position: "Xavg".to_string(),
            angle: "Theta".to_string(),
        }
    }
}

/// Binning for the diagnostic spectra and the peak-fit input.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpectrumConfig {
    pub position_bins: usize,
    pub position_range: (f64, f64),
    pub angle_bins: usize,
    pub angle_range: (f64, f64),
}

impl Default for SpectrumConfig {
    fn default() -> Self {
        // 0.5 mm bins across the full focal plane.
        Self {
            position_bins: 1200,
            position_range: (-300.0, 300.0),
            angle_bins: 200,
            angle_range: (-2.0, 2.0),
        }
    }
}

/// One gate in the config: window expressions inline, shapes by file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateConfig {
    Window { name: String, expression: String },
    Shape { file: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    pub input_files: Vec<PathBuf>,
    #[serde(default)]
    pub columns: ColumnConfig,
    /// When present, the position is derived from the two wire columns with
    /// kinematic weights instead of read from the position column.
    #[serde(default)]
    pub kinematics: Option<KineParameters>,
    #[serde(default)]
    pub gates: Vec<GateConfig>,
    #[serde(default)]
    pub tilt_region_file: Option<String>,
    /// Applies a saved tilt model instead of refitting one.
    #[serde(default)]
    pub tilt_model_file: Option<String>,
    pub region_files: Vec<String>,
    #[serde(default = "default_degree")]
    pub degree: usize,
    #[serde(default)]
    pub blend: BlendPolicy,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default)]
    pub spectrum: SpectrumConfig,
    #[serde(default)]
    pub peaks: Option<MultiGaussFitter>,
}

fn default_degree() -> usize {
    2
}

fn default_output_dir() -> PathBuf {
    PathBuf::from(".")
}

impl RunConfig {
    pub fn load_from_yaml(path: &str) -> Result<Self, CorrectionError> {
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        let config: Self = serde_yaml::from_reader(reader)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), CorrectionError> {
        if self.input_files.is_empty() {
            return Err(CorrectionError::Config(
                "no input files listed".to_string(),
            ));
        }
        if self.region_files.is_empty() {
            return Err(CorrectionError::Config(
                "no aberration region files listed".to_string(),
            ));
        }
        if self.tilt_region_file.is_none() && self.tilt_model_file.is_none() {
            return Err(CorrectionError::Config(
                "either tilt_region_file or tilt_model_file is required".to_string(),
            ));
        }
        if self.spectrum.position_bins == 0 || self.spectrum.angle_bins == 0 {
            return Err(CorrectionError::Config(
                "spectrum binning must be non-zero".to_string(),
            ));
        }
        if self.spectrum.position_range.1 <= self.spectrum.position_range.0
            || self.spectrum.angle_range.1 <= self.spectrum.angle_range.0
        {
            return Err(CorrectionError::Config(
                "spectrum ranges must be increasing".to_string(),
            ));
        }
        if let BlendPolicy::Nearest { k } = self.blend {
            if k == 0 {
                return Err(CorrectionError::Config(
                    "nearest blend requires k >= 1".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Assembles the gate set, loading shape gates from their files.
    pub fn build_gates(&self) -> Result<Gates, CorrectionError> {
        let mut gates = Vec::with_capacity(self.gates.len());
        for gate in &self.gates {
            match gate {
                GateConfig::Window { name, expression } => {
                    let window = WindowGate::new(name, expression);
                    window.parse_conditions()?;
                    gates.push(Gate::Window(window));
                }
                GateConfig::Shape { file } => {
                    let region = Region::load_from_json(file)?;
                    gates.push(Gate::Shape(region));
                }
            }
        }
        Ok(Gates::new(gates))
    }

    /// Loads the aberration regions in file order, which fixes the region
    /// indices for the rest of the run.
    pub fn load_regions(&self) -> Result<Vec<Region>, CorrectionError> {
        let mut regions = Vec::with_capacity(self.region_files.len());
        for file in &self.region_files {
            regions.push(Region::load_from_json(file)?);
        }
        Ok(regions)
    }
}
