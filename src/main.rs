use acquigraph::config::{ColumnMap, Preset};
use acquigraph::data::RecordTable;
use acquigraph::server::{router, AppState};
use acquigraph::RenderOptions;
use anyhow::{Context, Result};
use clap::Parser;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "acquigraph")]
#[command(about = "Serve an interactive dashboard over a CSV of acquisitions", long_about = None)]
struct Args {
    /// Input CSV file
    #[arg(short, long, env = "ACQUIGRAPH_DATA", default_value = "data.csv")]
    data: PathBuf,

    /// Built-in column layout
    #[arg(long, env = "ACQUIGRAPH_SCHEMA", value_enum, default_value_t = Preset::default())]
    schema: Preset,

    /// TOML column mapping, overrides --schema
    #[arg(long, env = "ACQUIGRAPH_COLUMNS")]
    columns: Option<PathBuf>,

    /// Port for web server
    #[arg(short, long, env = "PORT", default_value_t = 5000)]
    port: u16,

    #[arg(long, default_value = "0.0.0.0")]
    host: IpAddr,

    /// Chart width in pixels
    #[arg(long, default_value_t = 800)]
    width: u32,

    /// Chart height in pixels
    #[arg(long, default_value_t = 600)]
    height: u32,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("acquigraph=info,tower_http=info")),
        )
        .init();

    let args = Args::parse();

    let columns = match &args.columns {
        Some(path) => ColumnMap::from_file(path)?,
        None => ColumnMap::preset(args.schema),
    };

    let table = RecordTable::from_path(&args.data, &columns)
        .with_context(|| format!("Failed to load {}", args.data.display()))?;

    let render = RenderOptions {
        width: args.width,
        height: args.height,
        ..RenderOptions::default()
    };
    let state = Arc::new(AppState::new(Arc::new(table), render));
    let app = router(state);

    let addr = SocketAddr::new(args.host, args.port);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!(%addr, "dashboard listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    // Without a handler the server runs until killed
    if tokio::signal::ctrl_c().await.is_err() {
        std::future::pending::<()>().await;
    }
}
