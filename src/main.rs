use std::net::SocketAddr;
use std::process::ExitCode;

use clap::Parser;
use env_logger::Env;
use log::{error, info};

use osmintile::cli::Cli;
use osmintile::http::{router, AppState};
use osmintile::store::writer::import_dump;
use osmintile::store::SpatialStore;

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    let store = match SpatialStore::open(&cli.database) {
        Ok(store) => store,
        Err(err) => {
            error!("failed to open spatial store: {err}");
            return ExitCode::FAILURE;
        }
    };

    if let Some(osm_file) = &cli.osm_file {
        info!("importing {}", osm_file.display());
        if let Err(err) = import_dump(&store, osm_file) {
            error!("import failed: {err}");
            return ExitCode::FAILURE;
        }
    }

    let state = AppState {
        store,
        public_url: cli.public_url.clone(),
    };
    let app = router(state, &cli.static_dir);

    let addr = SocketAddr::from(([0, 0, 0, 0], 8080));
    info!("listening on {addr}");

    match axum::Server::bind(&addr).serve(app.into_make_service()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("server error: {err}");
            ExitCode::FAILURE
        }
    }
}
