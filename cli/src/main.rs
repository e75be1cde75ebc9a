//! The `strata` binary: settings in, STL in, G-code out.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use log::info;

use strata::core::{Config, ConfigError, Mesh, MeshError, Settings};
use strata::pipeline;
use strata::plan::gcode;

/// Slice a triangle mesh into G-code for a filament printer.
#[derive(Parser, Debug)]
#[command(name = "strata")]
#[command(version)]
#[command(about = "Slices binary STL models into G-code", long_about = None)]
struct Cli {
    /// Input STL file; a single dash reads standard input.
    #[arg(value_name = "FILE")]
    input: String,

    /// Output path (default: stdout).
    #[arg(short = 'o', long = "output", value_name = "FILE")]
    output: Option<PathBuf>,

    /// Load a configuration file.
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Set any configuration key.
    #[arg(short = 'S', long = "set", value_name = "KEY=VALUE")]
    set: Vec<String>,

    /// Write a gnuplot preview script to stdout instead of G-code.
    #[arg(short = 'p', long = "preview")]
    preview: bool,

    /// Layer height in millimeters.
    #[arg(short = 'l', value_name = "MM")]
    layer_height: Option<f64>,

    /// Extrusion width in millimeters.
    #[arg(short = 'w', value_name = "MM")]
    extrusion_width: Option<f64>,

    /// Stitching tolerance in millimeters.
    #[arg(short = 't', value_name = "MM")]
    tolerance: Option<f64>,

    /// Lattice scale constant.
    #[arg(short = 's', value_name = "N")]
    scale_constant: Option<f64>,

    /// Sparse infill density, 0 to 1.
    #[arg(short = 'd', value_name = "RATIO")]
    infill_density: Option<f64>,

    /// Number of shells.
    #[arg(short = 'n', value_name = "N")]
    shells: Option<usize>,

    /// Roof thickness in millimeters.
    #[arg(short = 'r', value_name = "MM")]
    roof_thickness: Option<f64>,

    /// Floor thickness in millimeters.
    #[arg(short = 'f', value_name = "MM")]
    floor_thickness: Option<f64>,

    /// Brim width in millimeters.
    #[arg(short = 'b', value_name = "MM")]
    brim_width: Option<f64>,

    /// Outline simplification coarseness in millimeters.
    #[arg(short = 'C', value_name = "MM")]
    coarseness: Option<f64>,

    /// Translate the model in x.
    #[arg(short = 'x', value_name = "MM", allow_hyphen_values = true)]
    x_translate: Option<f64>,

    /// Translate the model in y.
    #[arg(short = 'y', value_name = "MM", allow_hyphen_values = true)]
    y_translate: Option<f64>,

    /// Chop everything below this height off the model.
    #[arg(short = 'z', value_name = "MM")]
    z_chop: Option<f64>,
}

fn build_settings(cli: &Cli) -> Result<Settings, ConfigError> {
    let mut settings = Settings::default();
    if let Some(path) = &cli.config {
        settings.apply_file(path)?;
    }
    for pair in &cli.set {
        settings.apply_override(pair)?;
    }

    macro_rules! flag {
        ($field:ident) => {
            if let Some(v) = cli.$field {
                settings.$field = v;
            }
        };
    }
    flag!(layer_height);
    flag!(extrusion_width);
    flag!(tolerance);
    flag!(scale_constant);
    flag!(infill_density);
    flag!(shells);
    flag!(roof_thickness);
    flag!(floor_thickness);
    flag!(brim_width);
    flag!(coarseness);
    flag!(x_translate);
    flag!(y_translate);
    flag!(z_chop);
    Ok(settings)
}

fn run(cli: &Cli) -> Result<(), Error> {
    let settings = build_settings(cli)?;
    let cfg = Config::new(settings)?;

    let mesh = Mesh::from_stl(&cli.input)?;
    let sliced = pipeline::slice_object(mesh, &cfg);
    let plans = pipeline::plan_object(&sliced, &cfg);

    if cli.preview {
        let stdout = io::stdout();
        let mut w = BufWriter::new(stdout.lock());
        gcode::write_preview(&mut w, &plans)?;
        w.flush()?;
        return Ok(());
    }

    match &cli.output {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("cannot create {}", path.display()))
                .map_err(Error::Io)?;
            let mut w = BufWriter::new(file);
            let totals = gcode::write_gcode(&mut w, &cfg, &plans)?;
            w.flush()?;
            info!(
                "wrote {}: {:.0} mm of material, {:.1} g",
                path.display(),
                totals.material_len,
                totals.material_mass
            );
        }
        None => {
            let stdout = io::stdout();
            let mut w = BufWriter::new(stdout.lock());
            gcode::write_gcode(&mut w, &cfg, &plans)?;
            w.flush()?;
        }
    }
    Ok(())
}

/// User errors exit 1; I/O and input-file errors exit 2.
enum Error {
    Config(ConfigError),
    Mesh(MeshError),
    Io(anyhow::Error),
}

impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Error {
        match e {
            ConfigError::Io(io) => Error::Io(anyhow::Error::new(io).context("reading config")),
            other => Error::Config(other),
        }
    }
}

impl From<MeshError> for Error {
    fn from(e: MeshError) -> Error {
        Error::Mesh(e)
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Error {
        Error::Io(anyhow::Error::new(e))
    }
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();
    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(Error::Config(e)) => {
            eprintln!("strata: {}", e);
            if matches!(e, ConfigError::UnknownKey { .. }) {
                eprintln!("known settings: {}", strata::core::config::KNOWN_KEYS.join(", "));
            }
            ExitCode::from(1)
        }
        Err(Error::Mesh(e)) => {
            eprintln!("strata: {}", e);
            ExitCode::from(2)
        }
        Err(Error::Io(e)) => {
            eprintln!("strata: {:#}", e);
            ExitCode::from(2)
        }
    }
}
