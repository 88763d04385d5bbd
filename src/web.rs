use super::batch::has_csv_extension;
use super::{
    source_name, ChartOptions, NetplotError, Result, SeriesPair, DEFAULT_DPI,
    DEFAULT_SAMPLING_RATE, MAX_DPI,
};
use axum::body::{Body, Bytes};
use axum::extract::{DefaultBodyLimit, Multipart, Path as UrlPath, State};
use axum::http::header;
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum::routing::get;
use axum::Router;
use chrono::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tera::{Context, Tera};
use tokio_util::io::ReaderStream;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

/// microseconds keep two uploads of the same file apart
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S%6f";

const UPLOAD_TEMPLATE: &str = include_str!("../templates/upload.html");
const DOWNLOAD_TEMPLATE: &str = include_str!("../templates/download.html");

/// Storage folders and rendering settings shared, read only, by all requests.
#[derive(Debug, Clone)]
pub struct AppContext {
    pub upload_dir: PathBuf,
    pub plot_dir: PathBuf,
    pub max_upload_bytes: usize,
    pub watermark: Option<String>,
}

impl AppContext {
    pub fn new(upload_dir: impl Into<PathBuf>, plot_dir: impl Into<PathBuf>) -> AppContext {
        AppContext {
            upload_dir: upload_dir.into(),
            plot_dir: plot_dir.into(),
            max_upload_bytes: 64 * 1024 * 1024,
            watermark: None,
        }
    }

    pub async fn prepare_dirs(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.upload_dir).await?;
        tokio::fs::create_dir_all(&self.plot_dir).await?;
        Ok(())
    }
}

/// One stored upload waiting to be plotted.
#[derive(Debug, Clone)]
pub struct UploadJob {
    pub csv_path: PathBuf,
    pub sampling_rate: String,
    pub dpi: u32,
    pub png_name: String,
}

impl UploadJob {
    pub fn new(csv_path: PathBuf, sampling_rate: String, dpi: u32, at: DateTime<Local>) -> UploadJob {
        let png_name = artifact_name(&source_name(&csv_path), at);
        UploadJob {
            csv_path,
            sampling_rate,
            dpi,
            png_name,
        }
    }

    /// Writes the upload into its own `<upload_dir>/<timestamp>/` folder and names the png after
    /// the same timestamp, so no other job reads that csv or writes that png.
    pub async fn store(
        ctx: &AppContext,
        csv_name: &str,
        data: &[u8],
        sampling_rate: String,
        dpi: u32,
    ) -> Result<UploadJob> {
        let (job_dir, at) = reserve_job_dir(&ctx.upload_dir, Local::now()).await?;
        let csv_path = job_dir.join(csv_name);
        tokio::fs::write(&csv_path, data).await?;
        info!("stored {} ({} bytes)", csv_path.display(), data.len());
        Ok(UploadJob::new(csv_path, sampling_rate, dpi, at))
    }

    /// Blocking: parses the stored csv and writes the png into the plot folder.
    pub fn render(&self, ctx: &AppContext) -> Result<PathBuf> {
        let series = SeriesPair::from_csv(&self.csv_path)?;
        let opts = ChartOptions::new(&self.sampling_rate, &source_name(&self.csv_path), self.dpi)
            .with_watermark(ctx.watermark.clone());
        let pngout = ctx.plot_dir.join(&self.png_name);
        series.plot_png(&pngout, &opts)?;
        Ok(pngout)
    }
}

/// Creates the folder for the first free timestamp from `at` on, one microsecond at a time.
pub async fn reserve_job_dir(
    upload_dir: &Path,
    mut at: DateTime<Local>,
) -> Result<(PathBuf, DateTime<Local>)> {
    loop {
        let dir = upload_dir.join(at.format(TIMESTAMP_FORMAT).to_string());
        match tokio::fs::create_dir(&dir).await {
            Ok(()) => return Ok((dir, at)),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                debug!("{} is taken", dir.display());
                at = at + chrono::Duration::microseconds(1);
            }
            Err(e) => return Err(e.into()),
        }
    }
}

pub fn artifact_name(stem: &str, at: DateTime<Local>) -> String {
    format!("{}_{}.png", at.format(TIMESTAMP_FORMAT), stem)
}

/// Last component of a client provided file name, either separator style.
pub fn upload_file_name(raw: &str) -> Option<String> {
    let name = raw.rsplit(|c: char| c == '/' || c == '\\').next()?.trim();
    if name.is_empty() || name == "." || name == ".." {
        None
    } else {
        Some(name.to_string())
    }
}

fn is_plain_file_name(name: &str) -> bool {
    upload_file_name(name).as_deref() == Some(name)
}

pub fn parse_dpi(raw: Option<&str>) -> Result<u32> {
    match raw.map(str::trim) {
        None | Some("") => Ok(DEFAULT_DPI),
        Some(d) => match d.parse::<u32>() {
            Ok(dpi) if dpi > 0 && dpi <= MAX_DPI => Ok(dpi),
            _ => Err(NetplotError::Validation(format!(
                "dpi must be an integer between 1 and {}, got '{}'",
                MAX_DPI, d
            ))),
        },
    }
}

fn render_page(template: &str, context: &Context) -> Result<Html<String>> {
    Tera::one_off(template, context, true)
        .map(Html)
        .map_err(|e| NetplotError::Template(e.to_string()))
}

pub fn router(ctx: AppContext) -> Router {
    let body_limit = ctx.max_upload_bytes;
    Router::new()
        .route("/", get(index))
        .route("/upload", get(upload_form).post(do_upload))
        .route("/download/:png_file", get(download))
        .route("/direct-download/:png_file", get(direct_download))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(Arc::new(ctx))
}

async fn index() -> Redirect {
    Redirect::to("/upload")
}

async fn upload_form() -> Result<Html<String>> {
    let mut context = Context::new();
    context.insert("sampling_rate", DEFAULT_SAMPLING_RATE);
    context.insert("dpi", &DEFAULT_DPI);
    context.insert("max_dpi", &MAX_DPI);
    render_page(UPLOAD_TEMPLATE, &context)
}

#[derive(Default)]
struct UploadForm {
    file_name: Option<String>,
    data: Option<Bytes>,
    sampling_rate: Option<String>,
    dpi: Option<String>,
}

async fn read_form(mut multipart: Multipart) -> Result<UploadForm> {
    let mut form = UploadForm::default();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| NetplotError::Validation(e.body_text()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "csv-upload" => {
                form.file_name = field.file_name().map(String::from);
                form.data = Some(
                    field
                        .bytes()
                        .await
                        .map_err(|e| NetplotError::Validation(e.body_text()))?,
                );
            }
            "sampling-rate" | "dpi" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| NetplotError::Validation(e.body_text()))?;
                if name == "dpi" {
                    form.dpi = Some(text);
                } else {
                    form.sampling_rate = Some(text);
                }
            }
            _ => {}
        }
    }
    Ok(form)
}

async fn do_upload(State(ctx): State<Arc<AppContext>>, multipart: Multipart) -> Result<Response> {
    let form = read_form(multipart).await?;
    let csv_name = match form.file_name.as_deref().and_then(upload_file_name) {
        Some(n) if has_csv_extension(Path::new(&n)) => n,
        other => {
            warn!("rejected upload {:?}, not a csv file", other);
            return Ok(Redirect::to("/upload").into_response());
        }
    };
    let data = form.data.unwrap_or_default();
    let sampling_rate = form
        .sampling_rate
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| DEFAULT_SAMPLING_RATE.to_string());
    let dpi = parse_dpi(form.dpi.as_deref())?;

    let job = UploadJob::store(&ctx, &csv_name, &data, sampling_rate, dpi).await?;
    let png_name = job.png_name.clone();
    let render_ctx = ctx.clone();
    tokio::task::spawn_blocking(move || job.render(&render_ctx))
        .await
        .map_err(|e| NetplotError::Render(format!("render task failed: {}", e)))??;

    Ok(Redirect::to(&format!("/download/{}", urlencoding::encode(&png_name))).into_response())
}

async fn download(UrlPath(png_file): UrlPath<String>) -> Result<Html<String>> {
    let mut context = Context::new();
    context.insert("link", &urlencoding::encode(&png_file).into_owned());
    context.insert("png_file", &png_file);
    render_page(DOWNLOAD_TEMPLATE, &context)
}

async fn direct_download(
    State(ctx): State<Arc<AppContext>>,
    UrlPath(png_file): UrlPath<String>,
) -> Result<Response> {
    if !is_plain_file_name(&png_file) {
        return Err(NetplotError::NotFound(png_file));
    }
    let file = match tokio::fs::File::open(ctx.plot_dir.join(&png_file)).await {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(NetplotError::NotFound(png_file))
        }
        Err(e) => return Err(e.into()),
    };
    let meta = file.metadata().await?;
    if !meta.is_file() {
        return Err(NetplotError::NotFound(png_file));
    }
    let ascii_name: String = png_file
        .chars()
        .map(|c| if (c.is_ascii_graphic() && c != '"') || c == ' ' { c } else { '_' })
        .collect();
    let disposition = format!(
        "attachment; filename=\"{}\"; filename*=UTF-8''{}",
        ascii_name,
        urlencoding::encode(&png_file)
    );
    Ok((
        [
            (header::CONTENT_TYPE, "image/png".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
            (header::CONTENT_LENGTH, meta.len().to_string()),
        ],
        Body::from_stream(ReaderStream::new(file)),
    )
        .into_response())
}
