use super::plot::validate_bounded;
use super::web::AppContext;
use super::VERSION;
use clap::{App, Arg};
use std::path::PathBuf;

/// keeps the byte limit inside a 32 bit usize
pub const MAX_UPLOAD_MB: usize = 4095;

/// Takes the CLI arguments of the web server: bind address and storage folders.
pub fn parse_cli() -> (String, AppContext, bool) {
    let arg_address = Arg::with_name("host")
        .help("address to listen on")
        .short("a")
        .long("address")
        .takes_value(true)
        .default_value("localhost");
    let arg_port = Arg::with_name("port")
        .help("port to listen on")
        .short("p")
        .long("port")
        .takes_value(true)
        .default_value("12345")
        .validator(|p| {
            p.parse::<u16>()
                .map(|_| ())
                .map_err(|e| format!("invalid port '{}': {}", p, e))
        });
    let arg_upload_dir = Arg::with_name("upload_dir")
        .help("where the uploaded csv files are stored")
        .long("upload-dir")
        .takes_value(true)
        .default_value("uploads");
    let arg_plot_dir = Arg::with_name("plot_dir")
        .help("where the rendered png files are stored")
        .long("plot-dir")
        .takes_value(true)
        .default_value("plots");
    let arg_max_upload = Arg::with_name("max_upload_mb")
        .help("largest accepted upload, in MiB")
        .long("max-upload-mb")
        .takes_value(true)
        .default_value("64")
        .validator(|v| validate_bounded(&v, MAX_UPLOAD_MB as u64));
    let arg_watermark = Arg::with_name("watermark")
        .help("text drawn in the bottom right corner of every plot")
        .short("w")
        .long("watermark")
        .takes_value(true);
    let arg_verbose = Arg::with_name("verbose")
        .help("print verbose information")
        .short("v")
        .long("verbose")
        .takes_value(false)
        .required(false);
    let cli_args = App::new("netplot_web")
        .version(VERSION.unwrap_or("unknown"))
        .about("web gui to upload bwm-ng csv files and download their plots")
        .arg(arg_address)
        .arg(arg_port)
        .arg(arg_upload_dir)
        .arg(arg_plot_dir)
        .arg(arg_max_upload)
        .arg(arg_watermark)
        .arg(arg_verbose)
        .get_matches();
    let bind = format!(
        "{}:{}",
        cli_args.value_of("host").unwrap_or("localhost"),
        cli_args.value_of("port").unwrap_or("12345")
    );
    let max_upload_mb = cli_args
        .value_of("max_upload_mb")
        .and_then(|m| m.parse::<usize>().ok())
        .unwrap_or(64);
    let ctx = AppContext {
        upload_dir: PathBuf::from(cli_args.value_of("upload_dir").unwrap_or("uploads")),
        plot_dir: PathBuf::from(cli_args.value_of("plot_dir").unwrap_or("plots")),
        max_upload_bytes: upload_limit(max_upload_mb),
        watermark: cli_args.value_of("watermark").map(String::from),
    };
    (bind, ctx, cli_args.is_present("verbose"))
}

/// MiB to bytes, saturating
pub fn upload_limit(mb: usize) -> usize {
    mb.checked_mul(1024 * 1024).unwrap_or(usize::MAX)
}
