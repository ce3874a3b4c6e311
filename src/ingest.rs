use std::fs::File;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use log::info;
use polars::prelude::*;

use crate::config::RunConfig;
use crate::error::CorrectionError;
use crate::events::EventStore;
use crate::pipeline::CorrectionReport;

/// Collects every input file into one frame. With a kinematics block the
/// position column is rebuilt from the two wire columns with the kinematic
/// weights, replacing whatever the file carried.
pub fn load_frame(config: &RunConfig) -> Result<DataFrame, CorrectionError> {
    let files = config
        .input_files
        .iter()
        .map(|p| PlRefPath::try_from_path(p))
        .collect::<PolarsResult<_>>()?;
    info!("Scanning {} Parquet file(s)", config.input_files.len());
    let args = ScanArgsParquet::default();
    let mut lf = LazyFrame::scan_parquet_files(files, args)?;

    if let Some(kinematics) = &config.kinematics {
        let (w1, w2) = kinematics.weights()?;
        info!(
            "Deriving {} = {w1:.4} * {} + {w2:.4} * {}",
            config.columns.position, config.columns.x1, config.columns.x2
        );
        lf = lf.with_columns([(col(config.columns.x1.as_str()) * lit(w1)
            + col(config.columns.x2.as_str()) * lit(w2))
        .alias(config.columns.position.as_str())]);
    }

    Ok(lf.collect()?)
}

/// Applies the configured gates and pulls the event columns out of the frame.
pub fn build_store(config: &RunConfig, df: &DataFrame) -> Result<EventStore, CorrectionError> {
    let gates = config.build_gates()?;
    let mask = if gates.is_empty() {
        None
    } else {
        Some(gates.mask(df)?)
    };

    let store = EventStore::from_dataframe(
        df,
        &config.columns.position,
        &config.columns.angle,
        mask.as_ref(),
    )?;
    info!(
        "{} events ingested, {} pass the gates",
        store.len(),
        store.gated_count()
    );
    Ok(store)
}

/// Writes the input frame back out with the run products appended:
/// `ThetaDetilt`, `XCorr` (NaN where skipped), and `GateFlag`.
pub fn write_corrected(
    df: &DataFrame,
    detilted: &EventStore,
    report: &CorrectionReport,
    path: &Path,
) -> Result<(), CorrectionError> {
    let mut out = df.clone();
    let detilt = Float64Chunked::from_slice("ThetaDetilt".into(), detilted.angles());
    let corrected = Float64Chunked::from_vec("XCorr".into(), report.positions_or_nan());
    let gate = BooleanChunked::from_slice("GateFlag".into(), detilted.gates());
    out.with_column(detilt)?;
    out.with_column(corrected)?;
    out.with_column(gate)?;

    let file = File::create(path)?;
    ParquetWriter::new(file).set_parallel(true).finish(&mut out)?;
    info!("Wrote corrected frame to {}", path.display());
    Ok(())
}
