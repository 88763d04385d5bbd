use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::response::Response;
use http_body_util::BodyExt;
use netplot::web::{router, AppContext};
use netplot::{ChartOptions, SeriesPair};
use std::fs;
use tempfile::{tempdir, TempDir};
use tower::ServiceExt;

const BOUNDARY: &str = "netplot-test-boundary";

fn bwm_csv() -> String {
    [
        "1700000000;eth0;500;1000;2000;512;4096;3;4;7;10;20;0;0;0;0",
        "1700000005;eth0;1500;2000;3500;1024;8192;3;4;7;10;20;0;0;0;0",
    ]
    .join("\n")
}

async fn context() -> (TempDir, AppContext) {
    let dir = tempdir().unwrap();
    let ctx = AppContext::new(dir.path().join("uploads"), dir.path().join("plots"));
    ctx.prepare_dirs().await.unwrap();
    (dir, ctx)
}

fn upload_request(file_name: &str, csv: &str, rate: &str, dpi: &str) -> Request<Body> {
    let body = format!(
        "--{b}\r\n\
         Content-Disposition: form-data; name=\"csv-upload\"; filename=\"{f}\"\r\n\
         Content-Type: text/csv\r\n\r\n\
         {csv}\r\n\
         --{b}\r\n\
         Content-Disposition: form-data; name=\"sampling-rate\"\r\n\r\n\
         {rate}\r\n\
         --{b}\r\n\
         Content-Disposition: form-data; name=\"dpi\"\r\n\r\n\
         {dpi}\r\n\
         --{b}--\r\n",
        b = BOUNDARY,
        f = file_name,
        csv = csv,
        rate = rate,
        dpi = dpi
    );
    Request::builder()
        .method("POST")
        .uri("/upload")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(Body::from(body))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn location(resp: &Response) -> String {
    resp.headers()[header::LOCATION].to_str().unwrap().to_string()
}

async fn body_bytes(resp: Response) -> Vec<u8> {
    resp.into_body().collect().await.unwrap().to_bytes().to_vec()
}

fn plot_count(ctx: &AppContext) -> usize {
    fs::read_dir(&ctx.plot_dir).unwrap().count()
}

#[tokio::test]
async fn root_redirects_to_the_form() {
    let (_dir, ctx) = context().await;
    let resp = router(ctx).oneshot(get("/")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&resp), "/upload");
}

#[tokio::test]
async fn form_has_the_expected_fields() {
    let (_dir, ctx) = context().await;
    let resp = router(ctx).oneshot(get("/upload")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let html = String::from_utf8(body_bytes(resp).await).unwrap();
    for field in ["csv-upload", "sampling-rate", "dpi"] {
        assert!(html.contains(&format!("name=\"{}\"", field)));
    }
}

#[tokio::test]
async fn upload_render_and_download() {
    let (_dir, ctx) = context().await;
    let app = router(ctx.clone());

    let resp = app
        .clone()
        .oneshot(upload_request("data.csv", &bwm_csv(), "5s", "72"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::SEE_OTHER);
    let target = location(&resp);
    assert!(target.starts_with("/download/"));
    assert!(target.ends_with("_data.png"));
    let png_name = target.trim_start_matches("/download/").to_string();

    let (stamp, _) = png_name.split_once('_').unwrap();
    assert!(ctx.upload_dir.join(stamp).join("data.csv").exists());
    assert!(ctx.plot_dir.join(&png_name).exists());

    let resp = app.clone().oneshot(get(&target)).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let html = String::from_utf8(body_bytes(resp).await).unwrap();
    assert!(html.contains(&format!("/direct-download/{}", png_name)));

    let resp = app
        .oneshot(get(&format!("/direct-download/{}", png_name)))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers()[header::CONTENT_TYPE], "image/png");
    let disposition = resp.headers()[header::CONTENT_DISPOSITION]
        .to_str()
        .unwrap()
        .to_string();
    assert!(disposition.starts_with("attachment;"));
    assert!(disposition.contains(&format!("filename=\"{}\"", png_name)));
    let png = body_bytes(resp).await;
    assert_eq!(&png[..4], b"\x89PNG");
}

#[tokio::test]
async fn same_file_uploaded_twice_gets_two_artifacts() {
    let (_dir, ctx) = context().await;
    let app = router(ctx.clone());
    let first = app
        .clone()
        .oneshot(upload_request("data.csv", &bwm_csv(), "5s", "30"))
        .await
        .unwrap();
    let second = app
        .oneshot(upload_request("data.csv", &bwm_csv(), "5s", "30"))
        .await
        .unwrap();
    assert_ne!(location(&first), location(&second));
    assert_eq!(plot_count(&ctx), 2);
}

fn bwm_csv_scaled(factor: u64) -> String {
    (1..=20u64)
        .map(|i| {
            format!(
                "1700000000;eth0;{};1;1;1;{};0;0;0;0;0;0;0;0;0",
                i * factor,
                i * i * factor * 1024
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_same_name_uploads_render_their_own_data() {
    let (dir, ctx) = context().await;
    let app = router(ctx.clone());
    for round in 0..5 {
        let csv_a = bwm_csv_scaled(1);
        let csv_b = bwm_csv_scaled(1000);
        let a = tokio::spawn(
            app.clone()
                .oneshot(upload_request("data.csv", &csv_a, "5s", "30")),
        );
        let b = tokio::spawn(
            app.clone()
                .oneshot(upload_request("data.csv", &csv_b, "5s", "30")),
        );
        let (a, b) = (a.await.unwrap().unwrap(), b.await.unwrap().unwrap());
        assert_eq!(a.status(), StatusCode::SEE_OTHER);
        assert_eq!(b.status(), StatusCode::SEE_OTHER);
        assert_ne!(location(&a), location(&b));

        for (resp, csv) in [(&a, &csv_a), (&b, &csv_b)] {
            let png_name = location(resp).trim_start_matches("/download/").to_string();
            let expected = dir.path().join(format!("expected_{}.png", round));
            SeriesPair::from_reader(csv.as_bytes())
                .unwrap()
                .plot_png(&expected, &ChartOptions::new("5s", "data", 30))
                .unwrap();
            assert_eq!(
                fs::read(ctx.plot_dir.join(&png_name)).unwrap(),
                fs::read(&expected).unwrap()
            );
        }
    }
}

#[tokio::test]
async fn uppercase_extension_is_accepted() {
    let (_dir, ctx) = context().await;
    let resp = router(ctx.clone())
        .oneshot(upload_request("RUN.CSV", &bwm_csv(), "1s", "30"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::SEE_OTHER);
    assert!(location(&resp).ends_with("_RUN.png"));
}

#[tokio::test]
async fn wrong_extension_goes_back_to_the_form() {
    let (_dir, ctx) = context().await;
    let resp = router(ctx.clone())
        .oneshot(upload_request("data.txt", &bwm_csv(), "5s", "72"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&resp), "/upload");
    assert_eq!(plot_count(&ctx), 0);
    assert!(!ctx.upload_dir.join("data.txt").exists());
}

#[tokio::test]
async fn malformed_csv_is_unprocessable_and_writes_no_plot() {
    let (_dir, ctx) = context().await;
    let resp = router(ctx.clone())
        .oneshot(upload_request("bad.csv", "1;eth0;2;3;4", "5s", "72"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(plot_count(&ctx), 0);
}

#[tokio::test]
async fn bad_dpi_is_a_bad_request() {
    let (_dir, ctx) = context().await;
    let resp = router(ctx.clone())
        .oneshot(upload_request("data.csv", &bwm_csv(), "5s", "sharp"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert_eq!(plot_count(&ctx), 0);
}

#[tokio::test]
async fn oversized_dpi_is_a_bad_request() {
    let (_dir, ctx) = context().await;
    let resp = router(ctx.clone())
        .oneshot(upload_request("data.csv", &bwm_csv(), "5s", "10000"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert_eq!(plot_count(&ctx), 0);
}

#[tokio::test]
async fn download_page_escapes_the_name() {
    let (_dir, ctx) = context().await;
    let resp = router(ctx)
        .oneshot(get("/download/%3Cb%3Ex.png"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let html = String::from_utf8(body_bytes(resp).await).unwrap();
    assert!(html.contains("&lt;b&gt;x.png"));
    assert!(!html.contains("<b>x.png"));
    assert!(html.contains("/direct-download/%3Cb%3Ex.png"));
}

#[tokio::test]
async fn unknown_or_escaping_artifacts_are_not_found() {
    let (dir, ctx) = context().await;
    fs::write(dir.path().join("secret.png"), b"not yours").unwrap();
    let app = router(ctx);
    let resp = app
        .clone()
        .oneshot(get("/direct-download/nothing.png"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    let resp = app
        .oneshot(get("/direct-download/..%2Fsecret.png"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn large_artifacts_are_streamed_in_chunks() {
    let (_dir, ctx) = context().await;
    let data: Vec<u8> = (0..1024 * 1024u32).map(|i| (i % 251) as u8).collect();
    fs::write(ctx.plot_dir.join("big.png"), &data).unwrap();
    let resp = router(ctx)
        .oneshot(get("/direct-download/big.png"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        resp.headers()[header::CONTENT_LENGTH].to_str().unwrap(),
        data.len().to_string()
    );
    let mut body = resp.into_body();
    let mut frames = 0;
    let mut received = Vec::new();
    while let Some(frame) = body.frame().await {
        if let Ok(chunk) = frame.unwrap().into_data() {
            received.extend_from_slice(&chunk);
            frames += 1;
        }
    }
    assert!(frames > 1);
    assert_eq!(received, data);
}
