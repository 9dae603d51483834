//! lls: deskew, crop and deconvolve lattice light-sheet data from the
//! command line.
//!
//! Parameters come from up to three places, merged in this order (later
//! wins, nested `crop`/`deconvolution` objects are merged key by key):
//!
//! 1. `--yaml-config FILE`
//! 2. `--json-config FILE`
//! 3. command-line flags
//!
//! # Usage
//!
//! ```text
//! lls [OPTIONS] [INPUT_IMAGE]
//! ```

#![allow(clippy::print_stdout, clippy::print_stderr)]

use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{CommandFactory, Parser, ValueEnum};
use lls_core::{Backends, LatticeData, LatticeParams, ValidationError};
use serde_json::{Map, Value, json};

/// Deskew, crop and deconvolve lattice light-sheet volumes.
#[derive(Parser, Debug)]
#[command(name = "lls", version)]
struct Cli {
    /// Image to process (.tif/.tiff hyperstack or .npy array).
    input_image: Option<PathBuf>,

    /// Axis along which the raw data is sheared.
    #[arg(long, value_enum)]
    skew: Option<Skew>,

    /// Light-sheet angle in degrees.
    #[arg(long)]
    angle: Option<f64>,

    /// X, Y and Z pixel sizes in microns.
    #[arg(long, num_args = 3, value_names = ["X", "Y", "Z"])]
    pixel_sizes: Option<Vec<f64>>,

    /// ImageJ ROI file (or directory of them) to crop to; repeatable.
    #[arg(long = "roi", help_heading = "Cropping")]
    rois: Vec<PathBuf>,

    /// Index of a ROI to process; repeatable. Defaults to all.
    #[arg(long = "roi-index", help_heading = "Cropping")]
    roi_indices: Vec<usize>,

    /// First Z slice to keep.
    #[arg(long, help_heading = "Cropping")]
    z_start: Option<usize>,

    /// One past the last Z slice to keep.
    #[arg(long, help_heading = "Cropping")]
    z_end: Option<usize>,

    /// Enable deconvolution.
    #[arg(long, help_heading = "Deconvolution")]
    deconvolution: bool,

    /// Deconvolution backend.
    #[arg(long, value_enum, help_heading = "Deconvolution")]
    decon_processing: Option<DeconProcessing>,

    /// PSF image, one per channel; repeatable.
    #[arg(long, help_heading = "Deconvolution")]
    psf: Vec<PathBuf>,

    /// Richardson-Lucy iterations.
    #[arg(long, help_heading = "Deconvolution")]
    psf_num_iter: Option<u32>,

    /// Background to subtract: a number, `auto` or `second_last`.
    #[arg(long, help_heading = "Deconvolution")]
    background: Option<String>,

    /// First timepoint to process.
    #[arg(long, help_heading = "Output")]
    time_start: Option<usize>,

    /// One past the last timepoint to process.
    #[arg(long, help_heading = "Output")]
    time_end: Option<usize>,

    /// First channel to process.
    #[arg(long, help_heading = "Output")]
    channel_start: Option<usize>,

    /// One past the last channel to process.
    #[arg(long, help_heading = "Output")]
    channel_end: Option<usize>,

    /// Output directory. Defaults to the input image's directory.
    #[arg(long, help_heading = "Output")]
    save_dir: Option<PathBuf>,

    /// Output file name prefix. Defaults to the input image's name.
    #[arg(long, help_heading = "Output")]
    save_name: Option<String>,

    /// Output format.
    #[arg(long, value_enum, help_heading = "Output")]
    save_type: Option<SaveType>,

    /// Workflow definition (YAML or JSON) to feed the deskewed data into.
    #[arg(long)]
    workflow: Option<PathBuf>,

    /// JSON file to read parameters from.
    #[arg(long)]
    json_config: Option<PathBuf>,

    /// YAML file to read parameters from.
    #[arg(long)]
    yaml_config: Option<PathBuf>,
}

/// Skew axis selection.
#[derive(Clone, Copy, Debug, ValueEnum)]
enum Skew {
    /// Sheared along X.
    X,
    /// Sheared along Y.
    Y,
}

/// Deconvolution backend selection.
#[derive(Clone, Copy, Debug, ValueEnum)]
enum DeconProcessing {
    /// GPU Richardson-Lucy.
    #[value(name = "cuda_gpu")]
    CudaGpu,
    /// CPU Richardson-Lucy.
    Cpu,
}

/// Output format selection.
#[derive(Clone, Copy, Debug, ValueEnum)]
enum SaveType {
    /// One TIFF per slice.
    Tiff,
    /// BigDataViewer HDF5 + XML.
    H5,
}

fn path_value(path: &Path) -> Value {
    Value::String(path.to_string_lossy().into_owned())
}

fn path_list(paths: &[PathBuf]) -> Value {
    Value::Array(paths.iter().map(|p| path_value(p)).collect())
}

fn optional_range(start: Option<usize>, end: Option<usize>) -> Option<Value> {
    (start.is_some() || end.is_some()).then(|| json!([start, end]))
}

/// Only the parameters that were actually given on the command line.
fn cli_overrides(cli: &Cli) -> Value {
    let mut params = Map::new();
    if let Some(input) = &cli.input_image {
        params.insert("input_image".into(), path_value(input));
    }
    if let Some(skew) = cli.skew {
        let name = match skew {
            Skew::X => "X",
            Skew::Y => "Y",
        };
        params.insert("skew".into(), json!(name));
    }
    if let Some(angle) = cli.angle {
        params.insert("angle".into(), json!(angle));
    }
    if let Some(sizes) = &cli.pixel_sizes {
        params.insert("physical_pixel_sizes".into(), json!(sizes));
    }

    let mut crop = Map::new();
    if !cli.rois.is_empty() {
        crop.insert("roi_list".into(), path_list(&cli.rois));
    }
    if !cli.roi_indices.is_empty() {
        crop.insert("roi_subset".into(), json!(cli.roi_indices));
    }
    if let Some(z_range) = optional_range(cli.z_start, cli.z_end) {
        crop.insert("z_range".into(), z_range);
    }
    if !crop.is_empty() {
        params.insert("crop".into(), Value::Object(crop));
    }

    let mut decon = Map::new();
    if let Some(processing) = cli.decon_processing {
        let name = match processing {
            DeconProcessing::CudaGpu => "cuda_gpu",
            DeconProcessing::Cpu => "cpu",
        };
        decon.insert("decon_processing".into(), json!(name));
    }
    if !cli.psf.is_empty() {
        decon.insert("psf".into(), path_list(&cli.psf));
    }
    if let Some(iterations) = cli.psf_num_iter {
        decon.insert("psf_num_iter".into(), json!(iterations));
    }
    if let Some(background) = &cli.background {
        let value = background
            .parse::<f64>()
            .map_or_else(|_| json!(background), |v| json!(v));
        decon.insert("background".into(), value);
    }
    if cli.deconvolution || !decon.is_empty() {
        params.insert("deconvolution".into(), Value::Object(decon));
    }

    if let Some(range) = optional_range(cli.time_start, cli.time_end) {
        params.insert("time_range".into(), range);
    }
    if let Some(range) = optional_range(cli.channel_start, cli.channel_end) {
        params.insert("channel_range".into(), range);
    }
    if let Some(dir) = &cli.save_dir {
        params.insert("save_dir".into(), path_value(dir));
    }
    if let Some(name) = &cli.save_name {
        params.insert("save_name".into(), json!(name));
    }
    if let Some(save_type) = cli.save_type {
        let name = match save_type {
            SaveType::Tiff => "tiff",
            SaveType::H5 => "h5",
        };
        params.insert("save_type".into(), json!(name));
    }
    if let Some(workflow) = &cli.workflow {
        params.insert("workflow".into(), path_value(workflow));
    }
    Value::Object(params)
}

/// Merge `overlay` into `base`; objects merge key by key, anything else is
/// replaced.
fn merge(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(existing) => merge(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

fn read_config(path: &Path, yaml: bool) -> Result<Value, String> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| format!("Error reading {}: {e}", path.display()))?;
    let value = if yaml {
        serde_yaml::from_str(&text).map_err(|e| e.to_string())
    } else {
        serde_json::from_str(&text).map_err(|e| e.to_string())
    };
    value.map_err(|e| format!("Error parsing {}: {e}", path.display()))
}

/// Merge the YAML file, the JSON file and the flags into one parameter set.
fn params_from_cli(cli: &Cli) -> Result<LatticeParams, String> {
    let mut merged = Value::Object(Map::new());
    if let Some(path) = &cli.yaml_config {
        merge(&mut merged, read_config(path, true)?);
    }
    if let Some(path) = &cli.json_config {
        merge(&mut merged, read_config(path, false)?);
    }
    merge(&mut merged, cli_overrides(cli));
    log::debug!("Merged parameters: {merged}");
    serde_json::from_value(merged).map_err(|e| format!("Invalid parameters: {e}"))
}

/// Render validation errors as a two-column table.
fn validation_table(error: &ValidationError) -> String {
    let width = error
        .errors()
        .iter()
        .map(|e| e.field.len())
        .chain(std::iter::once("Parameter".len()))
        .max()
        .unwrap_or_default();
    let mut table = String::from("Validation Errors\n");
    // writing to a String cannot fail
    let _ = writeln!(table, "{:<width$}  Error", "Parameter");
    let _ = writeln!(table, "{}  -----", "-".repeat(width));
    for entry in error.errors() {
        let _ = writeln!(table, "{:<width$}  {}", entry.field, entry.message);
    }
    table
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("lls_core=info,lls=info"),
    )
    .init();

    if std::env::args_os().len() <= 1 {
        let _ = Cli::command().print_help();
        return ExitCode::SUCCESS;
    }
    let cli = Cli::parse();

    let params = match params_from_cli(&cli) {
        Ok(params) => params,
        Err(msg) => {
            eprintln!("{msg}");
            return ExitCode::FAILURE;
        }
    };

    let lattice = match LatticeData::new(params) {
        Ok(lattice) => lattice,
        Err(e) => {
            eprint!("{}", validation_table(&e));
            return ExitCode::FAILURE;
        }
    };

    match lattice.save(&Backends::default()) {
        Ok(paths) => {
            for path in paths {
                println!("{}", path.display());
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Processing failed: {e}");
            ExitCode::FAILURE
        }
    }
}
