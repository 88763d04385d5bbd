use super::{source_name, ChartOptions, NetplotError, Result, SeriesPair};
use std::path::{Path, PathBuf};
use tracing::{error, info};

/// Outcome of a folder run, one entry per csv file in name order
#[derive(Debug)]
pub struct BatchReport {
    pub results: Vec<(PathBuf, Result<PathBuf>)>,
}

impl BatchReport {
    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|(_, r)| r.is_ok()).count()
    }

    pub fn failed(&self) -> usize {
        self.results.len() - self.succeeded()
    }

    pub fn failures(&self) -> impl Iterator<Item = (&PathBuf, &NetplotError)> {
        self.results
            .iter()
            .filter_map(|(p, r)| r.as_ref().err().map(|e| (p, e)))
    }
}

impl std::fmt::Display for BatchReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} csv file(s): {} plotted, {} failed",
            self.results.len(),
            self.succeeded(),
            self.failed()
        )?;
        for (p, e) in self.failures() {
            write!(f, "\n  {}: {}", p.display(), e)?;
        }
        Ok(())
    }
}

/// csv files directly inside folder, sorted by name
pub fn list_csv(folder: &Path) -> Result<Vec<PathBuf>> {
    let mut csvs = Vec::new();
    for entry in std::fs::read_dir(folder)? {
        let path = entry?.path();
        if path.is_file() && has_csv_extension(&path) {
            csvs.push(path);
        }
    }
    csvs.sort();
    Ok(csvs)
}

pub fn has_csv_extension(path: &Path) -> bool {
    path.extension()
        .map(|e| e.eq_ignore_ascii_case("csv"))
        .unwrap_or(false)
}

/// Parses and plots a single csv, writes the png next to it.
pub fn plot_csv(csvin: &Path, opts: &ChartOptions) -> Result<PathBuf> {
    let pngout = csvin.with_extension("png");
    info!("processing {}", csvin.display());
    let series = SeriesPair::from_csv(csvin)?;
    let opts = ChartOptions {
        source: source_name(csvin),
        ..opts.clone()
    };
    series.plot_png(&pngout, &opts)?;
    Ok(pngout)
}

/// Plots every csv of the folder; a failing file does not stop the others.
/// The source in opts is replaced by each file name.
pub fn plot_folder(folder: &Path, opts: &ChartOptions) -> Result<BatchReport> {
    let csvs = list_csv(folder)?;
    let mut results = Vec::with_capacity(csvs.len());
    for csvin in csvs {
        let res = plot_csv(&csvin, opts);
        if let Err(e) = &res {
            error!("could not plot {}: {}", csvin.display(), e);
        }
        results.push((csvin, res));
    }
    Ok(BatchReport { results })
}
