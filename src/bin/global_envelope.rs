use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use tracing_subscriber::EnvFilter;

use global_envelope::deviation::{deviation_test, DeviationConfig, DeviationMeasure};
use global_envelope::ops::{simulation_source_fields, SimulationSource};
use global_envelope::output::{
    band_rows, create_timestamped_output_dir, write_band_csv, write_summary_json,
};
use global_envelope::{build_envelope, crop_fields, CurveSetFields, EnvelopeConfig, Method};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum InputFormat {
    /// Object with `r`, `obs`, `sim_m` and optionally `theo`, `is_residual`.
    CurveSet,
    /// Simulation result with `r`, `obs`, `theo` and `sim_curves`.
    Source,
}

#[derive(Debug, Parser)]
#[command(name = "global-envelope")]
#[command(about = "Global envelope and deviation tests for simulated curves")]
struct Cli {
    /// Curve data (JSON)
    #[arg(long)]
    input: PathBuf,

    #[arg(long, value_enum, default_value_t = InputFormat::CurveSet)]
    format: InputFormat,

    /// Test configuration (JSON); flags below override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// rank, studentized (st) or directional_quantile (qdir)
    #[arg(long)]
    method: Option<String>,

    #[arg(long)]
    alpha: Option<f64>,

    /// two.sided, less or greater
    #[arg(long)]
    alternative: Option<String>,

    /// conservative, midrank or liberal
    #[arg(long)]
    ties: Option<String>,

    #[arg(long)]
    r_min: Option<f64>,

    #[arg(long)]
    r_max: Option<f64>,

    /// Also run the studentized maximum deviation test
    #[arg(long, default_value_t = false)]
    deviation: bool,

    /// Output base directory; each run gets a timestamped subdirectory
    #[arg(long, default_value = "output-global-envelope")]
    output: PathBuf,
}

/// Raw input fields; distances outside `--r-min`/`--r-max` may still hold
/// `null` values.
fn load_fields(cli: &Cli) -> Result<CurveSetFields> {
    let raw = fs::read_to_string(&cli.input)
        .with_context(|| format!("failed to read {}", cli.input.display()))?;
    let fields = match cli.format {
        InputFormat::CurveSet => CurveSetFields::from_json_str(&raw)?,
        InputFormat::Source => {
            let source: SimulationSource = serde_json::from_str(&raw)
                .with_context(|| format!("failed to parse {}", cli.input.display()))?;
            simulation_source_fields(&source)?
        }
    };
    Ok(fields)
}

fn load_config(cli: &Cli) -> Result<EnvelopeConfig> {
    let mut config = match &cli.config {
        Some(path) => {
            let raw = fs::read_to_string(path)
                .with_context(|| format!("failed to read config {}", path.display()))?;
            serde_json::from_str(&raw)
                .with_context(|| format!("failed to parse config {}", path.display()))?
        }
        None => EnvelopeConfig::default(),
    };

    if let Some(name) = &cli.method {
        config.method = Method::from_name(name)?;
    }
    if let Some(v) = cli.alpha {
        config.alpha = v;
    }
    if let Some(v) = &cli.alternative {
        config.alternative = v.parse()?;
    }
    if let Some(v) = &cli.ties {
        config.ties = v.parse()?;
    }
    if cli.r_min.is_some() {
        config.r_min = cli.r_min;
    }
    if cli.r_max.is_some() {
        config.r_max = cli.r_max;
    }

    config.validate()?;
    Ok(config)
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;
    let fields = load_fields(&cli)?;
    let curve_set = crop_fields(&fields, config.r_min, config.r_max)
        .with_context(|| format!("invalid curve data in {}", cli.input.display()))?;

    let result = build_envelope(&curve_set, &config).context("global envelope test failed")?;

    let output_dir = create_timestamped_output_dir(&cli.output)
        .with_context(|| format!("failed to create output under {}", cli.output.display()))?;
    let band_path = output_dir.join("band.csv");
    let summary_path = output_dir.join("summary.json");
    write_band_csv(&band_path, &band_rows(&result))?;
    write_summary_json(&summary_path, &result)?;

    println!(
        "Method: {} | alternative: {} | alpha: {}",
        result.method, result.alternative, result.alpha
    );
    println!(
        "p-value: {:.4} (conservative {:.4}, midrank {:.4}, liberal {:.4})",
        result.p_value.value,
        result.p_value.conservative,
        result.p_value.mid_rank,
        result.p_value.liberal
    );
    if result.observed_outside {
        println!("Observed curve leaves the envelope at r = {:?}", result.outside_r());
    } else {
        println!("Observed curve stays inside the envelope");
    }

    if cli.deviation {
        let deviation_config = DeviationConfig {
            measure: DeviationMeasure::Max,
            alternative: config.alternative,
            reference: config.reference,
            ties: config.ties,
            ..DeviationConfig::default()
        };
        let deviation = deviation_test(&curve_set, &deviation_config)
            .context("deviation test failed")?;
        let deviation_path = output_dir.join("deviation.json");
        write_summary_json(&deviation_path, &deviation)?;
        println!(
            "Deviation test (max, {} scaling): p-value {:.4}",
            deviation.scaling.name(),
            deviation.p_value.value
        );
        println!("Deviation: {}", deviation_path.display());
    }

    println!("Run directory: {}", output_dir.display());
    println!("Band CSV: {}", band_path.display());
    println!("Summary: {}", summary_path.display());
    Ok(())
}
