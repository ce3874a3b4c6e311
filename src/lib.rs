#![warn(clippy::all, rust_2018_idioms)]

pub mod config;
pub mod corrector;
pub mod cutter;
pub mod error;
pub mod events;
pub mod fitter;
pub mod histoer;
pub mod ingest;
pub mod kinematics;
pub mod pipeline;

pub use corrector::{BlendPolicy, Correction, Corrector};
pub use error::CorrectionError;
pub use events::EventStore;
pub use pipeline::{CorrectionReport, Pipeline, Stage};
