//! Mapbox Vector Tile wire encoding, built on the `mvt` crate's
//! `Tile`/`Layer`/`Feature`/`GeomEncoder`, the same purpose-built Vector
//! Tile encoder depended on for this exact job in
//! `examples/other_examples/manifests/Ben1152000-openmander-core/Cargo.toml`
//! (`mvt = { version = "0.10" }`), generalizing the original Go's
//! `orb/encoding/mvt` usage in `maptilesservice.go`.

use geo::Winding;
use geo_types::{LineString, MultiPolygon};
use geojson::JsonObject;
use mvt::{Feature, GeomEncoder, GeomType, Tile as MvtTile, Transform};

use crate::error::{OsmIntileError, Result};

pub struct LayerFeature {
    pub geometry: MultiPolygon<f64>,
    pub properties: JsonObject,
}

/// Builds a single-layer tile. Each feature's geometry is re-wound
/// (exterior rings clockwise, interior rings counter-clockwise, in the
/// tile's Y-down pixel space) before handing it to `GeomEncoder`, since
/// neither the Sutherland-Hodgman clip nor `geo::Simplify` guarantee the
/// source WKB's ring orientation survives.
pub fn build_tile(layer_name: &str, extent: u32, features: &[LayerFeature]) -> Result<Vec<u8>> {
    let mut tile = MvtTile::new(extent);
    let mut layer = tile.create_layer(layer_name);

    for feature in features {
        let geom_data = encode_polygon_geometry(&feature.geometry).map_err(wrap)?;
        let mut mvt_feature = layer.into_feature(geom_data);
        for (key, value) in &feature.properties {
            add_tag(&mut mvt_feature, key, value).map_err(wrap)?;
        }
        layer = mvt_feature.into_layer();
    }

    tile.add_layer(layer).map_err(wrap)?;
    tile.to_bytes().map_err(wrap)
}

fn wrap(error: mvt::Error) -> OsmIntileError {
    OsmIntileError::TileEncodeError(error.to_string())
}

fn encode_polygon_geometry(multi: &MultiPolygon<f64>) -> std::result::Result<mvt::GeomData, mvt::Error> {
    let mut encoder = GeomEncoder::new(GeomType::Polygon, Transform::new());
    for polygon in multi {
        encode_ring(&mut encoder, polygon.exterior(), true)?;
        for interior in polygon.interiors() {
            encode_ring(&mut encoder, interior, false)?;
        }
    }
    encoder.encode()
}

/// Normalises `ring`'s winding order to what MVT requires for `exterior`
/// (clockwise for exteriors, counter-clockwise for holes) and feeds its
/// points to `encoder`, dropping the duplicated closing point since
/// `GeomEncoder::complete` supplies the implicit closing edge.
fn encode_ring(
    encoder: &mut GeomEncoder,
    ring: &LineString<f64>,
    exterior: bool,
) -> std::result::Result<(), mvt::Error> {
    let mut oriented = ring.clone();
    if exterior {
        oriented.make_cw_winding();
    } else {
        oriented.make_ccw_winding();
    }

    let coords: Vec<_> = oriented.coords().copied().collect();
    if coords.len() < 4 {
        return Ok(());
    }
    for c in &coords[..coords.len() - 1] {
        encoder.point(c.x, c.y)?;
    }
    encoder.complete()?;
    Ok(())
}

fn add_tag(feature: &mut Feature, key: &str, value: &serde_json::Value) -> std::result::Result<(), mvt::Error> {
    match value {
        serde_json::Value::String(s) => feature.add_tag_string(key, s),
        serde_json::Value::Bool(b) => feature.add_tag_bool(key, *b),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                feature.add_tag_sint(key, i)
            } else {
                feature.add_tag_double(key, n.as_f64().unwrap_or_default())
            }
        }
        serde_json::Value::Null => Ok(()),
        other => feature.add_tag_string(key, &other.to_string()),
    }
}
