use plotters::prelude::*;
use plotters::style::text_anchor::{HPos, Pos, VPos};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;
pub mod batch;
pub mod error;
pub mod plot;
pub mod serve;
pub mod web;

pub use error::{NetplotError, Result};

pub const VERSION: Option<&str> = option_env!("CARGO_PKG_VERSION");

pub const FIELD_SEPARATOR: char = ';';
pub const DEFAULT_SAMPLING_RATE: &str = "10ms";
pub const DEFAULT_DPI: u32 = 100;
/// 7680 x 5760 pixels at the default figure size
pub const MAX_DPI: u32 = 1200;
pub const MAX_PIXELS: u64 = 64 * 1024 * 1024;
/// matplotlib default figure size, in inches
pub const DEFAULT_FIGSIZE: (f64, f64) = (6.4, 4.8);

const LABEL_PT: f64 = 10.;
const TITLE_PT: f64 = 12.;
const WATERMARK_PT: f64 = 10.;
const LINE_PT: f64 = 1.5;

const KIB: f64 = 1024.;
const MIB: f64 = KIB * KIB;
const GIB: f64 = KIB * KIB * KIB;

/// Fixed layout of a bwm-ng csv row, one variant per field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Column {
    Timestamp = 0,
    InterfaceName = 1,
    BytesOutRate = 2,
    BytesInRate = 3,
    BytesTotalRate = 4,
    BytesIn = 5,
    BytesOut = 6,
    PacketsOutRate = 7,
    PacketsInRate = 8,
    PacketsTotalRate = 9,
    PacketsIn = 10,
    PacketsOut = 11,
    ErrorsOutRate = 12,
    ErrorsInRate = 13,
    ErrorsIn = 14,
    ErrorsOut = 15,
}

impl Column {
    pub const COUNT: usize = 16;

    pub const fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            Column::Timestamp => "timestamp",
            Column::InterfaceName => "interface name",
            Column::BytesOutRate => "bytes out/s",
            Column::BytesInRate => "bytes in/s",
            Column::BytesTotalRate => "bytes total/s",
            Column::BytesIn => "bytes in",
            Column::BytesOut => "bytes out",
            Column::PacketsOutRate => "packets out/s",
            Column::PacketsInRate => "packets in/s",
            Column::PacketsTotalRate => "packets total/s",
            Column::PacketsIn => "packets in",
            Column::PacketsOut => "packets out",
            Column::ErrorsOutRate => "errors out/s",
            Column::ErrorsInRate => "errors in/s",
            Column::ErrorsIn => "errors in",
            Column::ErrorsOut => "errors out",
        }
    }
}

/// Y axis label for throughput, bps/Kbps/Mbps/Gbps.
/// The values are bytes per second; the bit units are kept as the traffic monitor users know them.
pub fn format_bps(y: f64) -> String {
    scale_with_unit(y, ["bps", "Kbps", "Mbps", "Gbps"])
}

/// Y axis label for volume, b/Kb/Mb/Gb.
pub fn format_bits(y: f64) -> String {
    scale_with_unit(y, ["b", "Kb", "Mb", "Gb"])
}

fn scale_with_unit(y: f64, units: [&str; 4]) -> String {
    let (unit, divisor) = if y < KIB {
        (units[0], 1.)
    } else if y < MIB {
        (units[1], KIB)
    } else if y < GIB {
        (units[2], MIB)
    } else {
        (units[3], GIB)
    };
    format!("{} {}", unit, with_separators(y / divisor))
}

/// two decimals and a comma every three digits of the integer part
fn with_separators(v: f64) -> String {
    let s = format!("{:.2}", v.abs());
    let (int, frac) = s.split_once('.').unwrap_or((s.as_str(), "00"));
    let mut grouped = String::with_capacity(int.len() + int.len() / 3);
    for (i, c) in int.chars().enumerate() {
        if i > 0 && (int.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }
    let sign = if v < 0. && s != "0.00" { "-" } else { "" };
    format!("{}{}.{}", sign, grouped, frac)
}

/// Rendering parameters for the two panel chart.
#[derive(Debug, Clone)]
pub struct ChartOptions {
    /// free text, only used in the x axis description
    pub sampling_rate: String,
    /// only used in the title
    pub source: String,
    pub dpi: u32,
    /// width and height in inches
    pub figsize: (f64, f64),
    pub watermark: Option<String>,
}

impl ChartOptions {
    pub fn new(sampling_rate: &str, source: &str, dpi: u32) -> ChartOptions {
        ChartOptions {
            sampling_rate: sampling_rate.to_string(),
            source: source.to_string(),
            dpi,
            figsize: DEFAULT_FIGSIZE,
            watermark: None,
        }
    }

    pub fn with_watermark(mut self, watermark: Option<String>) -> ChartOptions {
        self.watermark = watermark;
        self
    }

    pub fn pixel_size(&self) -> (u32, u32) {
        let dpi = self.dpi as f64;
        (
            (self.figsize.0 * dpi).round().max(1.) as u32,
            (self.figsize.1 * dpi).round().max(1.) as u32,
        )
    }

    fn font_px(&self, points: f64) -> f64 {
        points * self.dpi as f64 / 72.
    }
}

/// The outbound rate and cumulative volume, one entry per csv row, in file order
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesPair {
    pub rate: Vec<f64>,
    pub volume: Vec<u64>,
}

impl SeriesPair {
    pub fn new(capacity: usize) -> SeriesPair {
        SeriesPair {
            rate: Vec::with_capacity(capacity),
            volume: Vec::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.rate.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rate.is_empty()
    }

    /// Reads `;` separated rows without header.
    /// Stops at the first row that is too short or has a non numeric target field,
    /// nothing is returned in that case.
    /// Empty lines are only accepted at the end of the input.
    pub fn from_reader<R: BufRead>(reader: R) -> Result<SeriesPair> {
        let mut series = SeriesPair::new(1024);
        let mut blank: Option<usize> = None;
        for (i, l) in reader.lines().enumerate() {
            let line = l?;
            let line = line.trim_end_matches('\r');
            if line.trim().is_empty() {
                blank = blank.or(Some(i + 1));
                continue;
            }
            if let Some(b) = blank {
                return Err(NetplotError::Parse {
                    line: b,
                    reason: "empty row".to_string(),
                });
            }
            let fields: Vec<&str> = line.split(FIELD_SEPARATOR).collect();
            if fields.len() <= Column::BytesOut.index() {
                return Err(NetplotError::Parse {
                    line: i + 1,
                    reason: format!(
                        "expected at least {} fields, found {}",
                        Column::BytesOut.index() + 1,
                        fields.len()
                    ),
                });
            }
            let rate: f64 = parse_field(&fields, Column::BytesOutRate, i + 1)?;
            if !rate.is_finite() {
                return Err(NetplotError::Parse {
                    line: i + 1,
                    reason: format!("field '{}' is not finite", Column::BytesOutRate.name()),
                });
            }
            let volume: u64 = parse_field(&fields, Column::BytesOut, i + 1)?;
            series.rate.push(rate);
            series.volume.push(volume);
        }
        debug!("parsed {} rows", series.len());
        Ok(series)
    }

    pub fn from_csv(fin: &Path) -> Result<SeriesPair> {
        let file = File::open(fin)?;
        SeriesPair::from_reader(BufReader::new(file))
    }

    /// Plots the rate (top) and volume (bottom) to a png at fout, overwriting it.
    pub fn plot_png(&self, fout: &Path, opts: &ChartOptions) -> Result<()> {
        if opts.dpi == 0 || opts.dpi > MAX_DPI {
            return Err(NetplotError::Render(format!(
                "dpi must be between 1 and {}, got {}",
                MAX_DPI, opts.dpi
            )));
        }
        let (width, height) = opts.pixel_size();
        if width as u64 * height as u64 > MAX_PIXELS {
            return Err(NetplotError::Render(format!(
                "{}x{} pixels is larger than the {} pixels limit",
                width, height, MAX_PIXELS
            )));
        }
        match self.draw_png(fout, opts) {
            Ok(()) => {
                info!("plotted {} samples to {}", self.len(), fout.display());
                Ok(())
            }
            Err(e) => {
                // the bitmap backend flushes what it has on drop
                let _ = std::fs::remove_file(fout);
                Err(NetplotError::Render(e.to_string()))
            }
        }
    }

    fn draw_png(
        &self,
        fout: &Path,
        opts: &ChartOptions,
    ) -> std::result::Result<(), Box<dyn std::error::Error>> {
        let (width, height) = opts.pixel_size();
        let label_px = opts.font_px(LABEL_PT);
        let title_px = opts.font_px(TITLE_PT);
        let stroke = opts.font_px(LINE_PT).round().max(1.) as u32;
        let margin = (label_px / 2.).round() as i32;
        let x_area = (label_px * 3.).round() as i32;
        let x_desc = format!("{} sampling", opts.sampling_rate);
        let xmax = self.len().saturating_sub(1).max(1);

        let root = BitMapBackend::new(fout, (width, height)).into_drawing_area();
        root.fill(&WHITE)?;
        let panels = root.split_evenly((2, 1));

        let (ymin, ymax) = value_range(&self.rate);
        let mut top = ChartBuilder::on(&panels[0])
            .caption(
                format!("Network out usage during \"{}\"", opts.source),
                ("sans-serif", title_px),
            )
            .margin(margin)
            .x_label_area_size(x_area)
            .y_label_area_size(label_area_width(ymin, ymax, format_bps, label_px))
            .build_cartesian_2d(0..xmax, ymin..ymax)?;
        top.configure_mesh()
            .light_line_style(&TRANSPARENT)
            .label_style(("sans-serif", label_px))
            .x_desc(x_desc.clone())
            .y_label_formatter(&|y: &f64| format_bps(*y))
            .draw()?;
        top.draw_series(LineSeries::new(
            self.rate.iter().enumerate().map(|(i, r)| (i, *r)),
            GREEN.stroke_width(stroke),
        ))?;

        let volume: Vec<f64> = self.volume.iter().map(|v| *v as f64).collect();
        let (ymin, ymax) = value_range(&volume);
        let mut bottom = ChartBuilder::on(&panels[1])
            .margin(margin)
            .x_label_area_size(x_area)
            .y_label_area_size(label_area_width(ymin, ymax, format_bits, label_px))
            .build_cartesian_2d(0..xmax, ymin..ymax)?;
        bottom
            .configure_mesh()
            .light_line_style(&TRANSPARENT)
            .label_style(("sans-serif", label_px))
            .x_desc(x_desc)
            .y_label_formatter(&|y: &f64| format_bits(*y))
            .draw()?;
        bottom.draw_series(LineSeries::new(
            volume.iter().enumerate().map(|(i, v)| (i, *v)),
            BLUE.stroke_width(stroke),
        ))?;

        if let Some(text) = &opts.watermark {
            let gray = RGBColor(128, 128, 128).mix(0.5);
            let style = ("sans-serif", opts.font_px(WATERMARK_PT))
                .into_font()
                .color(&gray)
                .pos(Pos::new(HPos::Right, VPos::Bottom));
            let corner = (
                (width as f64 * 0.97) as i32,
                (height as f64 * 0.99) as i32,
            );
            root.draw_text(text, &style, corner)?;
        }

        root.present()?;
        Ok(())
    }
}

/// Y range padded by 5% of the span, never below zero for non negative data.
/// Empty or flat series still get a drawable range.
pub fn value_range(values: &[f64]) -> (f64, f64) {
    let (min, max) = match min_and_max(values) {
        Some(mm) => mm,
        None => return (0., 1.),
    };
    let span = max - min;
    let pad = if span > 0. {
        span / 20.
    } else {
        max.abs().max(1.) / 20.
    };
    let ymin = if min >= 0. { (min - pad).max(0.) } else { min - pad };
    (ymin, max + pad)
}

/// pixel width of the y label area from the widest formatted bound
fn label_area_width(ymin: f64, ymax: f64, fmt: fn(f64) -> String, label_px: f64) -> i32 {
    let chars = fmt(ymin).len().max(fmt(ymax).len()) as f64;
    (chars * label_px * 0.6 + label_px).round() as i32
}

pub fn min_and_max<T: std::cmp::PartialOrd + Copy>(s: &[T]) -> Option<(T, T)> {
    let mut self_iter = s.iter();
    let (mut min, mut max) = match self_iter.next() {
        Some(v) => (*v, *v),
        None => return None,
    };
    for es in self_iter {
        if *es > max {
            max = *es
        }
        if *es < min {
            min = *es
        }
    }
    Some((min, max))
}

/// file name without extension, used as chart title
pub fn source_name(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// RUST_LOG wins over the verbose flag when set.
pub fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn parse_field<T: std::str::FromStr>(fields: &[&str], col: Column, line: usize) -> Result<T> {
    let raw = fields[col.index()].trim();
    raw.parse().map_err(|_| NetplotError::Parse {
        line,
        reason: format!("field '{}' is not a valid number: '{}'", col.name(), raw),
    })
}
