//! Pull external model data from known data stores (HPSS, HTTP(S) mirrors)
//! or from user-supplied locations on disk.
//!
//! Known stores and naming conventions come from the `--config` file. When
//! pulling from disk, `--input_file_path` names the directory (it may contain
//! templates) and file names follow `--file_templates` or, by default, the
//! `hpss` naming convention in the config file.

use std::env;
use std::path::{Path, PathBuf};

use clap::{CommandFactory, FromArgMatches, Parser};
use env_logger::Env;
use log::{debug, error, info};

use extrn_retrieve::{
    AnlOrFcst, DataLocations, Error, ExternalModel, FileType, PLACEHOLDERS, Retrieval, RetrievalRequest,
    Retriever, TransportOptions, parse_cycle_date,
};

#[derive(Debug, Parser)]
#[command(name = "retrieve_data", version, about = "Retrieve external model data for a forecast cycle")]
struct Cli {
    /// Whether analysis or forecast files should be gathered.
    #[arg(long = "anl_or_fcst", value_parser = ["anl", "fcst"])]
    anl_or_fcst: String,

    /// Data locations file with paths and naming conventions for known data stores.
    #[arg(long)]
    config: PathBuf,

    /// Cycle date of the data to be retrieved, YYYYMMDDHH.
    #[arg(long = "cycle_date")]
    cycle_date: String,

    /// Data stores in priority order; the first is tried first (e.g. hpss aws disk).
    #[arg(long = "data_stores", num_args = 1.., required = true)]
    data_stores: Vec<String>,

    /// External model label (case-sensitive).
    #[arg(
        long = "external_model",
        value_parser = ["FV3GFS", "GDAS", "GEFS", "GSMGFS", "HRRR", "NAM", "RAP", "RAPx", "HRRRx"]
    )]
    external_model: String,

    /// Forecast hours: one value, [start stop], [start stop increment], or an explicit list.
    #[arg(long = "fcst_hrs", num_args = 1.., required = true)]
    fcst_hrs: Vec<u32>,

    /// Output directory; may contain templates such as mem{mem:03d}.
    #[arg(long = "output_path")]
    output_path: String,

    /// Print debug messages.
    #[arg(long)]
    debug: bool,

    /// File name templates for files retrieved from disk.
    #[arg(long = "file_templates", num_args = 1..)]
    file_templates: Vec<String>,

    /// External model file format.
    #[arg(long = "file_type", value_parser = ["grib2", "nemsio", "netcdf"])]
    file_type: Option<String>,

    /// Path to data stored on disk; may contain templates.
    #[arg(long = "input_file_path")]
    input_file_path: Option<String>,

    /// Ensemble members, given like --fcst_hrs.
    #[arg(long, num_args = 1..)]
    members: Vec<u32>,

    /// Name of the summary file written to the output directory.
    #[arg(long = "summary_file")]
    summary_file: Option<String>,
}

fn init_logging(debug: bool) {
    let level = if debug { "debug" } else { "warn" };
    env_logger::Builder::from_env(Env::new().filter_or("RETRIEVE_DATA_LOG", level))
        .format_timestamp_millis()
        .init();
    debug!("Logging level set to DEBUG");
}

fn print_args(cli: &Cli) {
    let rule = "-".repeat(80);
    println!("Running retrieve_data with args:\n{rule}\n{rule}");
    let rows: [(&str, String); 12] = [
        ("anl_or_fcst", cli.anl_or_fcst.clone()),
        ("cycle_date", cli.cycle_date.clone()),
        ("data_stores", format!("{:?}", cli.data_stores)),
        ("external_model", cli.external_model.clone()),
        ("fcst_hrs", format!("{:?}", cli.fcst_hrs)),
        ("output_path", cli.output_path.clone()),
        ("debug", cli.debug.to_string()),
        ("file_templates", format!("{:?}", cli.file_templates)),
        ("file_type", format!("{:?}", cli.file_type)),
        ("input_file_path", format!("{:?}", cli.input_file_path)),
        ("members", format!("{:?}", cli.members)),
        ("summary_file", format!("{:?}", cli.summary_file)),
    ];
    for (name, value) in rows {
        println!("{name:>15}: {value}");
    }
    println!("{rule}\n{rule}");
}

fn absolute(path: &str) -> Result<String, Error> {
    if Path::new(path).is_absolute() {
        return Ok(path.to_string());
    }
    Ok(env::current_dir()?.join(path).display().to_string())
}

fn run(cli: Cli) -> Result<Retrieval, Error> {
    let locations = DataLocations::from_path(&cli.config)?;

    let mut request = RetrievalRequest::new(
        cli.external_model.parse::<ExternalModel>()?,
        cli.anl_or_fcst.parse::<AnlOrFcst>()?,
        parse_cycle_date(&cli.cycle_date)?,
        &cli.fcst_hrs,
        absolute(&cli.output_path)?,
    )?
    .data_stores(&cli.data_stores)
    .members(&cli.members)?
    .file_templates(cli.file_templates);

    if let Some(ft) = cli.file_type.as_deref() {
        request = request.file_type(ft.parse::<FileType>()?);
    }
    if let Some(p) = cli.input_file_path {
        request = request.input_file_path(p);
    }
    if let Some(s) = cli.summary_file {
        request = request.summary_file(s);
    }
    request.validate()?;

    let retriever = Retriever::with_system_transport(locations, TransportOptions::default())?;
    retriever.retrieve(&request)
}

fn main() {
    let command = Cli::command().after_help(format!(
        "Paths, urls and file names may use these templates:\n  {}",
        PLACEHOLDERS.join(", ")
    ));
    let cli = match Cli::from_arg_matches(&command.get_matches()) {
        Ok(cli) => cli,
        Err(e) => e.exit(),
    };

    init_logging(cli.debug);
    print_args(&cli);

    match run(cli) {
        Ok(retrieval) => {
            info!("Retrieved data from {}", retrieval.data_store);
            for staged in &retrieval.staged {
                info!("{}: {}", staged.dir.display(), staged.files.join(" "));
            }
        }
        Err(e) => {
            error!("{e}");
            std::process::exit(e.exit_code());
        }
    }
}
