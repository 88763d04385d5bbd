#[cfg(not(unix))]
use std::future;

use netplot::serve::parse_cli;
use netplot::init_logging;
use netplot::web::router;
use tokio::{net::TcpListener, signal};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let (bind, ctx, verbose) = parse_cli();
    init_logging(verbose);
    ctx.prepare_dirs().await?;
    info!(
        "uploads in {}, plots in {}",
        ctx.upload_dir.display(),
        ctx.plot_dir.display()
    );

    let listener = TcpListener::bind(&bind).await?;
    info!("netplot is running on http://{}", bind);
    axum::serve(listener, router(ctx))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutting down");
}
