use netplot::batch::plot_folder;
use netplot::plot::parse_cli;
use netplot::{init_logging, ChartOptions};
use tracing::info;

fn main() -> anyhow::Result<()> {
    let (folder, sampling_rate, dpi, watermark, verbose) = parse_cli();
    init_logging(verbose);
    info!(
        "plot csv files in {} with {} sampling at {} dpi",
        folder.display(),
        sampling_rate,
        dpi
    );
    // the source is set per file
    let opts = ChartOptions::new(&sampling_rate, "", dpi).with_watermark(watermark);
    let report = plot_folder(&folder, &opts)?;
    println!("{}", report);
    if report.failed() > 0 {
        anyhow::bail!("{} csv file(s) could not be plotted", report.failed());
    }
    Ok(())
}
