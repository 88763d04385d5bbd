use super::{DEFAULT_DPI, DEFAULT_SAMPLING_RATE, MAX_DPI, VERSION};
use clap::{App, Arg};
use std::path::PathBuf;

/// Takes the CLI arguments that control the batch plotting of a folder.
pub fn parse_cli() -> (PathBuf, String, u32, Option<String>, bool) {
    let default_dpi = DEFAULT_DPI.to_string();
    let arg_folder = Arg::with_name("folder")
        .help("folder with the bwm-ng csv files")
        .short("f")
        .long("folder")
        .takes_value(true)
        .default_value(".");
    let arg_rate = Arg::with_name("sampling_rate")
        .help("the bwm-ng sampling rate, only used as axis label")
        .short("r")
        .long("rate")
        .takes_value(true)
        .default_value(DEFAULT_SAMPLING_RATE);
    let arg_dpi = Arg::with_name("dpi")
        .help("resolution of the png files")
        .short("d")
        .long("dpi")
        .takes_value(true)
        .default_value(&default_dpi)
        .validator(|v| validate_bounded(&v, MAX_DPI as u64));
    let arg_watermark = Arg::with_name("watermark")
        .help("text drawn in the bottom right corner")
        .short("w")
        .long("watermark")
        .takes_value(true);
    let arg_verbose = Arg::with_name("verbose")
        .help("print verbose information")
        .short("v")
        .long("verbose")
        .takes_value(false)
        .required(false);
    let cli_args = App::new("netplot")
        .version(VERSION.unwrap_or("unknown"))
        .about("cli app to plot the outbound network traffic of all csv files in a folder")
        .arg(arg_folder)
        .arg(arg_rate)
        .arg(arg_dpi)
        .arg(arg_watermark)
        .arg(arg_verbose)
        .get_matches();
    let folder = PathBuf::from(cli_args.value_of("folder").unwrap_or("."));
    let sampling_rate = String::from(
        cli_args
            .value_of("sampling_rate")
            .unwrap_or(DEFAULT_SAMPLING_RATE),
    );
    let dpi = cli_args
        .value_of("dpi")
        .and_then(|d| d.parse::<u32>().ok())
        .unwrap_or(DEFAULT_DPI);
    let watermark = cli_args.value_of("watermark").map(String::from);
    let verbose = cli_args.is_present("verbose");
    (folder, sampling_rate, dpi, watermark, verbose)
}

/// integer in 1..=max
pub fn validate_bounded(v: &str, max: u64) -> Result<(), String> {
    match v.parse::<u64>() {
        Ok(n) if n > 0 && n <= max => Ok(()),
        _ => Err(format!("expected an integer between 1 and {}, got '{}'", max, v)),
    }
}
