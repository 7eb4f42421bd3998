//! Component G — Style/Bounds Accessors.
//!
//! `GetMapBounds`/`GetMapCenter` feed the style-template renderer with the
//! store's overall extent and centroid, computed from every stored node.

use std::sync::{Arc, Mutex};

use geo_types::{Point, Rect};
use geozero::{wkb, ToGeo};
use rusqlite::Connection;

use crate::error::{OsmIntileError, Result};

/// `Extent(Collect(node.geom))`, decoded from WKB. An empty store yields a
/// degenerate bound collapsed to the origin.
pub fn get_map_bounds(conn: &Arc<Mutex<Connection>>) -> Result<Rect<f64>> {
    let conn = conn.lock().expect("store mutex poisoned");

    let wkb_bytes: Option<Vec<u8>> = conn.query_row(
        "SELECT AsBinary(Extent(geom)) FROM node",
        [],
        |row| row.get(0),
    )?;

    let Some(wkb_bytes) = wkb_bytes else {
        return Ok(Rect::new(Point::new(0.0, 0.0), Point::new(0.0, 0.0)));
    };

    let geometry: geo_types::Geometry<f64> = wkb::Wkb(wkb_bytes)
        .to_geo()
        .map_err(|e| OsmIntileError::GeometryError(e.to_string()))?;

    geometry_bounding_rect(&geometry)
}

/// `Centroid(Collect(node.geom))`, cast to a point; a non-point result is
/// `GeometryKindMismatch`.
pub fn get_map_center(conn: &Arc<Mutex<Connection>>) -> Result<Point<f64>> {
    let conn = conn.lock().expect("store mutex poisoned");

    let wkb_bytes: Option<Vec<u8>> = conn.query_row(
        "SELECT AsBinary(Centroid(Collect(geom))) FROM node",
        [],
        |row| row.get(0),
    )?;

    let Some(wkb_bytes) = wkb_bytes else {
        return Ok(Point::new(0.0, 0.0));
    };

    let geometry: geo_types::Geometry<f64> = wkb::Wkb(wkb_bytes)
        .to_geo()
        .map_err(|e| OsmIntileError::GeometryError(e.to_string()))?;

    match geometry {
        geo_types::Geometry::Point(p) => Ok(p),
        other => Err(OsmIntileError::GeometryKindMismatch {
            expected: "Point".to_string(),
            actual: geometry_kind_name(&other).to_string(),
        }),
    }
}

fn geometry_bounding_rect(geometry: &geo_types::Geometry<f64>) -> Result<Rect<f64>> {
    use geo::BoundingRect;
    geometry
        .bounding_rect()
        .ok_or_else(|| OsmIntileError::GeometryError("empty extent geometry".to_string()))
}

fn geometry_kind_name(geometry: &geo_types::Geometry<f64>) -> &'static str {
    match geometry {
        geo_types::Geometry::Point(_) => "Point",
        geo_types::Geometry::Line(_) => "Line",
        geo_types::Geometry::LineString(_) => "LineString",
        geo_types::Geometry::Polygon(_) => "Polygon",
        geo_types::Geometry::MultiPoint(_) => "MultiPoint",
        geo_types::Geometry::MultiLineString(_) => "MultiLineString",
        geo_types::Geometry::MultiPolygon(_) => "MultiPolygon",
        geo_types::Geometry::GeometryCollection(_) => "GeometryCollection",
        geo_types::Geometry::Rect(_) => "Rect",
        geo_types::Geometry::Triangle(_) => "Triangle",
    }
}
