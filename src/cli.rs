//! CLI surface (spec.md §6): `clap`-derived flags controlling the public
//! URL advertised in the style JSON, the store location, and an optional
//! dump to import before the server binds.

use clap::Parser;

#[derive(Debug, Parser)]
#[command(name = "osmintile", about = "OSM indoor data ingestion and tile server")]
pub struct Cli {
    /// Public URL advertised to clients in the Mapbox style JSON.
    #[arg(long, default_value = "http://localhost:8080")]
    pub public_url: String,

    /// Spatial database path, or ":memory:" for an ephemeral store.
    #[arg(long, default_value = ":memory:")]
    pub database: String,

    /// OSM dump to import before the server starts accepting traffic.
    #[arg(long)]
    pub osm_file: Option<std::path::PathBuf>,

    /// Directory containing the static web assets served at `/`.
    #[arg(long, default_value = "static")]
    pub static_dir: String,
}
