//! Component F — Tile Assembler: `GetTile(level, z, x, y, acceptGzip)`.
//!
//! Projects the Feature Query's WGS84 polygons into a single Mapbox
//! Vector Tile layer named `osm-indoor-buildings`, clipped, simplified and
//! optionally gzip-wrapped the way `maptilesservice.go`'s `cleanLayers`
//! pipeline does it (`Clip` -> `Simplify(DouglasPeucker)` -> `RemoveEmpty`).

pub mod encode;

use std::f64::consts::PI;
use std::sync::{Arc, Mutex};

use geo::Simplify;
use geo_types::{Coord, LineString, MultiPolygon, Point, Polygon, Rect};
use rusqlite::Connection;

use crate::error::Result;
use crate::store::query;

/// Tile-local coordinate extent; matches `mvt.MapboxGLDefaultExtentBound`.
const TILE_EXTENT: f64 = 4096.0;
const SIMPLIFY_TOLERANCE: f64 = 1.0;
const MIN_AREA: f64 = 1.0;
const MIN_PERIMETER: f64 = 2.0;

/// Slippy-map tile coordinate.
#[derive(Debug, Clone, Copy)]
pub struct TileCoord {
    pub z: u32,
    pub x: u32,
    pub y: u32,
}

/// Assembles the MVT payload for one tile, querying the store, reprojecting
/// into tile-local pixel space, clipping/simplifying/pruning, and finally
/// encoding (optionally gzipped).
pub fn get_tile(
    conn: &Arc<Mutex<Connection>>,
    level: i64,
    tile: TileCoord,
    accept_gzip: bool,
) -> Result<Vec<u8>> {
    let bound = tile_geographic_bound(tile, 1);
    let collection = query::get_base_features(conn, level, &bound)?;

    let mut features = Vec::with_capacity(collection.features.len());
    for feature in collection.features {
        let Some(geometry) = feature.geometry else {
            continue;
        };
        let geom: geo_types::Geometry<f64> = (&geometry)
            .try_into()
            .map_err(|e: geojson::Error| crate::error::OsmIntileError::GeometryError(e.to_string()))?;

        let projected = project_to_tile(&geom, tile);
        let Some(clipped) = clip_to_extent(&projected) else {
            continue;
        };
        let simplified = clipped.simplify(&SIMPLIFY_TOLERANCE);
        if is_empty(&simplified) {
            continue;
        }

        features.push(encode::LayerFeature {
            geometry: simplified,
            properties: feature.properties.unwrap_or_default(),
        });
    }

    let tile_bytes = encode::build_tile("osm-indoor-buildings", TILE_EXTENT as u32, &features)?;

    if accept_gzip {
        gzip(&tile_bytes)
    } else {
        Ok(tile_bytes)
    }
}

/// `tile.Bound(1)`: the tile's WGS84 bound, buffered by `buffer` tile
/// widths/heights on every side so features crossing the tile edge clip
/// cleanly.
fn tile_geographic_bound(tile: TileCoord, buffer: i64) -> Rect<f64> {
    let n = 2f64.powi(tile.z as i32);

    let lon_at = |x: f64| x / n * 360.0 - 180.0;
    let lat_at = |y: f64| {
        let y_frac = PI * (1.0 - 2.0 * y / n);
        y_frac.sinh().atan().to_degrees()
    };

    let min_lon = lon_at(tile.x as f64);
    let max_lon = lon_at(tile.x as f64 + 1.0);
    let max_lat = lat_at(tile.y as f64);
    let min_lat = lat_at(tile.y as f64 + 1.0);

    let lon_width = max_lon - min_lon;
    let lat_height = max_lat - min_lat;
    let buffer = buffer as f64;

    Rect::new(
        Point::new(min_lon - lon_width * buffer, min_lat - lat_height * buffer),
        Point::new(max_lon + lon_width * buffer, max_lat + lat_height * buffer),
    )
}

/// Web Mercator projection, normalised to `[0, 1)`; the same formula as the
/// teacher's `utils::convert_to_tile`, generalised to take an explicit tile
/// so callers can rescale into that tile's pixel space.
fn lonlat_to_tile_fraction(lon: f64, lat: f64) -> (f64, f64) {
    let (lat_rad, lon_rad) = (lat.to_radians(), lon.to_radians());
    let x = lon_rad + PI;
    let y = PI - ((PI / 4.0) + (lat_rad / 2.0)).tan().ln();
    let rescale = |v: f64| v / (2.0 * PI);
    (rescale(x), rescale(y))
}

fn project_point(lon: f64, lat: f64, tile: TileCoord) -> Coord<f64> {
    let n = 2f64.powi(tile.z as i32);
    let (fx, fy) = lonlat_to_tile_fraction(lon, lat);
    Coord {
        x: (fx * n - tile.x as f64) * TILE_EXTENT,
        y: (fy * n - tile.y as f64) * TILE_EXTENT,
    }
}

fn project_to_tile(geom: &geo_types::Geometry<f64>, tile: TileCoord) -> MultiPolygon<f64> {
    let project_ring = |ring: &LineString<f64>| -> LineString<f64> {
        LineString::new(
            ring.coords()
                .map(|c| project_point(c.x, c.y, tile))
                .collect(),
        )
    };
    let project_polygon = |polygon: &Polygon<f64>| -> Polygon<f64> {
        Polygon::new(
            project_ring(polygon.exterior()),
            polygon.interiors().iter().map(project_ring).collect(),
        )
    };

    match geom {
        geo_types::Geometry::Polygon(p) => MultiPolygon::new(vec![project_polygon(p)]),
        geo_types::Geometry::MultiPolygon(mp) => {
            MultiPolygon::new(mp.iter().map(project_polygon).collect())
        }
        _ => MultiPolygon::new(vec![]),
    }
}

/// Sutherland-Hodgman clip of every ring against the `[0, extent]` square;
/// rings that collapse to nothing are dropped, polygons left with no
/// exterior are dropped entirely.
fn clip_to_extent(multi: &MultiPolygon<f64>) -> Option<MultiPolygon<f64>> {
    let clipped: Vec<Polygon<f64>> = multi
        .iter()
        .filter_map(|polygon| {
            let exterior = clip_ring(polygon.exterior(), TILE_EXTENT)?;
            let interiors: Vec<LineString<f64>> = polygon
                .interiors()
                .iter()
                .filter_map(|ring| clip_ring(ring, TILE_EXTENT))
                .collect();
            Some(Polygon::new(exterior, interiors))
        })
        .collect();

    if clipped.is_empty() {
        None
    } else {
        Some(MultiPolygon::new(clipped))
    }
}

fn clip_ring(ring: &LineString<f64>, extent: f64) -> Option<LineString<f64>> {
    let edges: [(Coord<f64>, Coord<f64>); 4] = [
        (Coord { x: 0.0, y: 0.0 }, Coord { x: extent, y: 0.0 }),
        (Coord { x: extent, y: 0.0 }, Coord { x: extent, y: extent }),
        (Coord { x: extent, y: extent }, Coord { x: 0.0, y: extent }),
        (Coord { x: 0.0, y: extent }, Coord { x: 0.0, y: 0.0 }),
    ];

    let mut points: Vec<Coord<f64>> = ring.coords().copied().collect();
    for (edge_start, edge_end) in edges {
        if points.is_empty() {
            return None;
        }
        points = clip_against_edge(&points, edge_start, edge_end);
    }

    if points.len() < 4 {
        return None;
    }
    if points.first() != points.last() {
        points.push(points[0]);
    }
    Some(LineString::new(points))
}

fn clip_against_edge(points: &[Coord<f64>], edge_start: Coord<f64>, edge_end: Coord<f64>) -> Vec<Coord<f64>> {
    let inside = |p: Coord<f64>| {
        (edge_end.x - edge_start.x) * (p.y - edge_start.y)
            - (edge_end.y - edge_start.y) * (p.x - edge_start.x)
            >= 0.0
    };
    let intersect = |a: Coord<f64>, b: Coord<f64>| -> Coord<f64> {
        let edge_dx = edge_end.x - edge_start.x;
        let edge_dy = edge_end.y - edge_start.y;
        let ab_dx = b.x - a.x;
        let ab_dy = b.y - a.y;
        let denom = edge_dx * ab_dy - edge_dy * ab_dx;
        if denom.abs() < f64::EPSILON {
            return b;
        }
        let t = (edge_dx * (a.y - edge_start.y) - edge_dy * (a.x - edge_start.x)) / denom;
        Coord {
            x: a.x + t * ab_dx,
            y: a.y + t * ab_dy,
        }
    };

    let mut output = Vec::with_capacity(points.len());
    for i in 0..points.len() {
        let current = points[i];
        let previous = points[(i + points.len() - 1) % points.len()];
        let current_in = inside(current);
        let previous_in = inside(previous);

        if current_in {
            if !previous_in {
                output.push(intersect(previous, current));
            }
            output.push(current);
        } else if previous_in {
            output.push(intersect(previous, current));
        }
    }
    output
}

/// `RemoveEmpty(1.0, 2.0)`: drop polygons whose unsigned area is below the
/// area threshold and whose exterior perimeter is below the length
/// threshold.
fn is_empty(multi: &MultiPolygon<f64>) -> bool {
    use geo::{Area, EuclideanLength};
    multi.0.iter().all(|polygon| {
        polygon.unsigned_area() < MIN_AREA && polygon.exterior().euclidean_length() < MIN_PERIMETER
    })
}

fn gzip(bytes: &[u8]) -> Result<Vec<u8>> {
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(bytes)
        .map_err(|e| crate::error::OsmIntileError::TileEncodeError(e.to_string()))?;
    encoder
        .finish()
        .map_err(|e| crate::error::OsmIntileError::TileEncodeError(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::writer::import_dump;
    use crate::store::SpatialStore;
    use std::io::Write as _;

    #[test]
    fn z0_tile_covers_the_whole_world() {
        let bound = tile_geographic_bound(TileCoord { z: 0, x: 0, y: 0 }, 0);
        assert!(bound.min().x <= -179.0);
        assert!(bound.max().x >= 179.0);
        assert!(bound.max().y >= 80.0);
        assert!(bound.min().y <= -80.0);
    }

    #[test]
    fn buffered_bound_is_wider_than_unbuffered() {
        let tile = TileCoord { z: 10, x: 512, y: 512 };
        let plain = tile_geographic_bound(tile, 0);
        let buffered = tile_geographic_bound(tile, 1);
        assert!(buffered.width() > plain.width());
        assert!(buffered.height() > plain.height());
    }

    #[test]
    fn get_tile_round_trips_a_single_indoor_room() {
        let xml = r#"<osm>
            <node id="1" lat="0.0001" lon="0.0001"/>
            <node id="2" lat="0.0002" lon="0.0001"/>
            <node id="3" lat="0.0002" lon="0.0002"/>
            <way id="5">
                <nd ref="1"/><nd ref="2"/><nd ref="3"/><nd ref="1"/>
                <tag k="indoor" v="room"/>
                <tag k="level" v="0"/>
            </way>
        </osm>"#;
        let mut file = tempfile::NamedTempFile::with_suffix(".osm").unwrap();
        file.write_all(xml.as_bytes()).unwrap();
        let path = file.into_temp_path();

        let store = SpatialStore::open(":memory:").unwrap();
        import_dump(&store, path.as_ref()).unwrap();

        let conn = store.connection();
        let tile = TileCoord { z: 20, x: 524288, y: 524288 };

        let plain = get_tile(&conn, 0, tile, false).unwrap();
        let gzipped = get_tile(&conn, 0, tile, true).unwrap();

        assert!(!plain.is_empty());
        assert_ne!(plain, gzipped);
    }
}
