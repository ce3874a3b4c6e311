use crate::pipeline::Stage;
use polars::error::PolarsError;
use std::error::Error;
use std::fmt::Display;

#[derive(Debug)]
pub enum CorrectionError {
    InsufficientData { needed: usize, got: usize },
    UnderdeterminedFit { region: usize, needed: usize, got: usize },
    DegenerateInput(String),
    InvalidRegion { name: String, reason: String },
    InvalidState { expected: Stage, actual: Stage },
    Config(String),
    DataFrame(PolarsError),
    File(std::io::Error),
    Json(serde_json::Error),
    Yaml(serde_yaml::Error),
}

impl From<std::io::Error> for CorrectionError {
    fn from(err: std::io::Error) -> CorrectionError {
        CorrectionError::File(err)
    }
}

impl From<PolarsError> for CorrectionError {
    fn from(err: PolarsError) -> CorrectionError {
        CorrectionError::DataFrame(err)
    }
}

impl From<serde_json::Error> for CorrectionError {
    fn from(err: serde_json::Error) -> CorrectionError {
        CorrectionError::Json(err)
    }
}

impl From<serde_yaml::Error> for CorrectionError {
    fn from(err: serde_yaml::Error) -> CorrectionError {
        CorrectionError::Yaml(err)
    }
}

impl Display for CorrectionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CorrectionError::InsufficientData { needed, got } => write!(
                f,
                "Not enough events to fit: needed {needed}, found {got}"
            ),
            CorrectionError::UnderdeterminedFit { region, needed, got } => write!(
                f,
                "Region {region} is underdetermined: a fit of this order needs {needed} events, found {got}"
            ),
            CorrectionError::DegenerateInput(x) => {
                write!(f, "Fit input is degenerate: {x}")
            }
            CorrectionError::InvalidRegion { name, reason } => {
                write!(f, "Region '{name}' is invalid: {reason}")
            }
            CorrectionError::InvalidState { expected, actual } => write!(
                f,
                "Pipeline stage out of order: expected {expected}, pipeline is at {actual}"
            ),
            CorrectionError::Config(x) => write!(f, "Run configuration error: {x}"),
            CorrectionError::DataFrame(x) => write!(f, "Run had an error using polars: {x}"),
            CorrectionError::File(x) => write!(f, "Run had a file I/O error: {x}"),
            CorrectionError::Json(x) => write!(f, "Run had a JSON error: {x}"),
            CorrectionError::Yaml(x) => write!(f, "Run had a YAML error: {x}"),
        }
    }
}

impl Error for CorrectionError {}
