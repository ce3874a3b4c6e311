use std::fs::File;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use indicatif::ProgressBar;
use log::{error, info, warn};

use aberrix::config::RunConfig;
use aberrix::cutter::region::Region;
use aberrix::error::CorrectionError;
use aberrix::fitter::linear::TiltModel;
use aberrix::fitter::regional;
use aberrix::histoer::diagnostics::Diagnostics;
use aberrix::ingest;
use aberrix::pipeline::{Pipeline, Stage};

#[derive(Parser, Debug, Clone)]
#[command(
    author,
    version,
    about = "Aberration correction for split-pole focal-plane spectra",
    long_about = None
)]
struct Args {
    /// Run configuration (YAML)
    config: PathBuf,

    /// Override the configured output directory
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Skip the peak characterization stage
    #[arg(long)]
    skip_peaks: bool,

    /// More log output (-v debug, -vv trace); RUST_LOG still wins
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() {
    let args = Args::parse();
    let level = match args.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    if let Err(e) = run(&args) {
        error!("Run failed: {e}");
        std::process::exit(1);
    }
}

fn run(args: &Args) -> Result<(), CorrectionError> {
    let mut config = RunConfig::load_from_yaml(&args.config.to_string_lossy())?;
    if let Some(dir) = &args.output_dir {
        config.output_dir = dir.clone();
    }
    std::fs::create_dir_all(&config.output_dir)?;

    let spinner = ProgressBar::new_spinner();
    spinner.set_message("Collecting input frame");
    spinner.enable_steady_tick(Duration::from_millis(120));
    let df = ingest::load_frame(&config)?;
    spinner.finish_and_clear();

    let store = ingest::build_store(&config, &df)?;

    let mut diagnostics = Diagnostics::new(
        config.spectrum.position_bins,
        config.spectrum.position_range,
        config.spectrum.angle_bins,
        config.spectrum.angle_range,
    );
    diagnostics.fill_raw(&store);

    let mut pipeline = Pipeline::new(store);

    // A saved tilt model wins over a fresh fit.
    if let Some(path) = &config.tilt_model_file {
        let model = TiltModel::load_from_json(path)?;
        info!(
            "Applying saved tilt model from {path}: angle' = angle - ({:.6} + {:.6} * position)",
            model.intercept, model.slope
        );
        pipeline.detilt_with(model)?;
    } else if let Some(path) = &config.tilt_region_file {
        let tilt_region = Region::load_from_json(path)?;
        let model = pipeline.detilt(&tilt_region)?;
        info!(
            "Fitted tilt over '{}': slope {:.6}, intercept {:.6}",
            tilt_region.name, model.slope, model.intercept
        );
    } else {
        return Err(CorrectionError::Config(
            "either tilt_region_file or tilt_model_file is required".to_string(),
        ));
    }
    diagnostics.fill_detilted(pipeline.events());

    let regions = config.load_regions()?;
    pipeline.define_regions(regions)?;
    pipeline.fit(config.degree)?;

    let spinner = ProgressBar::new_spinner();
    spinner.set_message("Correcting events");
    spinner.enable_steady_tick(Duration::from_millis(120));
    pipeline.correct(config.blend)?;
    spinner.finish_and_clear();

    let detilted = pipeline.events();
    let Some(report) = pipeline.report() else {
        return Err(CorrectionError::InvalidState {
            expected: Stage::Corrected,
            actual: pipeline.stage(),
        });
    };
    diagnostics.fill_corrected(detilted, &report.corrections);
    diagnostics.log_summary();

    ingest::write_corrected(
        &df,
        detilted,
        report,
        &config.output_dir.join("corrected.parquet"),
    )?;
    if let Some(tilt) = pipeline.tilt_model() {
        tilt.save_to_json(&config.output_dir.join("tilt_model.json").to_string_lossy())?;
    }
    regional::save_models_to_json(
        pipeline.region_models(),
        &config.output_dir.join("region_models.json").to_string_lossy(),
    )?;
    diagnostics.save_to_json(&config.output_dir.join("histograms.json").to_string_lossy())?;

    if args.skip_peaks {
        info!("Skipping peak characterization");
        return Ok(());
    }
    let Some(fitter) = &config.peaks else {
        return Ok(());
    };

    // A bad peak fit should not sink an otherwise finished run.
    let spectrum = &diagnostics.corrected_position;
    let x = spectrum.get_bin_centers_between(spectrum.range.0, spectrum.range.1);
    let y = spectrum.get_bin_counts_between(spectrum.range.0, spectrum.range.1);
    match fitter.fit(&x, &y) {
        Ok(peak_report) => {
            for peak in &peak_report.peaks {
                info!(
                    "Peak at {:.3} +/- {:.3}: fwhm {:.3}, area {:.1}",
                    peak.mean.value, peak.mean.uncertainty, peak.fwhm.value, peak.area.value
                );
            }
            info!(
                "Peak fit: {} peaks, reduced chi-square {:.3}",
                peak_report.peaks.len(),
                peak_report.reduced_chi_squared
            );
            let serialized = serde_json::to_string(&peak_report)?;
            let mut file = File::create(config.output_dir.join("peaks.json"))?;
            file.write_all(serialized.as_bytes())?;
        }
        Err(e) => warn!("Peak characterization failed: {e}"),
    }

    Ok(())
}
