use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use lanboard::board::Board;
use lanboard::common::{AppPaths, BindScope, ConfigOverrides, ConfigStore};
use lanboard::server::{create_router, runtime, AppState};
use lanboard::store::ContentStore;

#[derive(Parser)]
#[command(name = "lanboard")]
#[command(about = "Shared message board with file drops for your LAN")]
#[command(version)]
struct Cli {
    /// Data directory holding config, history, and uploads
    #[arg(long, value_name = "DIR")]
    home: Option<PathBuf>,

    /// Listen port, overriding the config file
    #[arg(long)]
    port: Option<u16>,

    /// Bind to loopback only or to all interfaces
    #[arg(long, value_enum)]
    bind: Option<BindScope>,

    /// Print the access key and exit
    #[arg(long)]
    print_key: bool,
}

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("Error: {err:#}");
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("lanboard=info".parse()?),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let paths = AppPaths::resolve(cli.home);
    paths.ensure_ready()?;

    let config = Arc::new(ConfigStore::load(paths.config_path())?);
    config.apply_overrides(&ConfigOverrides {
        port: cli.port,
        bind: cli.bind,
    });

    if cli.print_key {
        println!("{}", config.current().access_key);
        return Ok(());
    }

    let settings = config.current();
    let store = Arc::new(ContentStore::open(paths.uploads_dir()).await?);
    let board = Arc::new(Board::open(paths.history_path(), settings.history_limit).await?);

    let state = AppState::new(config, store, board);
    let app = create_router(&state);
    runtime::serve(state, app).await
}
