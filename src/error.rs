//! Error taxonomy shared by every layer of the ingestion and tile pipeline.

use thiserror::Error;

/// The element kind a failing pass/statement was operating on, for import
/// diagnostics ("the pass and the object kind that failed").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementKind {
    Node,
    Way,
    Relation,
}

impl std::fmt::Display for ElementKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ElementKind::Node => "node",
            ElementKind::Way => "way",
            ElementKind::Relation => "relation",
        };
        f.write_str(name)
    }
}

/// The filter pass a failure occurred in, for import diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pass {
    Relations,
    Ways,
    Nodes,
    Insertion,
}

impl std::fmt::Display for Pass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Pass::Relations => "relation pass",
            Pass::Ways => "way pass",
            Pass::Nodes => "node pass",
            Pass::Insertion => "insertion pass",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum OsmIntileError {
    #[error("unsupported dump format for {path:?}: expected .osm, .osm.bz2 or .osm.pbf")]
    UnsupportedFormat { path: String },

    #[error("no spatial extension could be loaded for the sqlite connection")]
    SpatialExtensionMissing,

    #[error("failed to read osm dump {path:?}: {source}")]
    DumpIoError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse osm element: {message}")]
    ParseError { message: String },

    #[error("store error on {kind}: {source}")]
    StoreError {
        kind: ElementKind,
        #[source]
        source: rusqlite::Error,
    },

    #[error("import failed during {pass}: {source}")]
    ImportFailed {
        pass: Pass,
        #[source]
        source: Box<OsmIntileError>,
    },

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("geometry error: {0}")]
    GeometryError(String),

    #[error("geometry of kind {expected} expected, got {actual}")]
    GeometryKindMismatch { expected: String, actual: String },

    #[error("failed to encode mvt tile: {0}")]
    TileEncodeError(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("tile unavailable: {0}")]
    TileUnavailable(String),
}

pub type Result<T> = std::result::Result<T, OsmIntileError>;

impl OsmIntileError {
    /// Wraps any error that occurred while serving a tile as `TileUnavailable`,
    /// the boundary between the core's error taxonomy and the HTTP shell.
    pub fn into_tile_unavailable(self) -> OsmIntileError {
        match self {
            err @ OsmIntileError::TileUnavailable(_) => err,
            err @ OsmIntileError::BadRequest(_) => err,
            other => OsmIntileError::TileUnavailable(other.to_string()),
        }
    }
}
