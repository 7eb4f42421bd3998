//! Component E — Feature Query: indoor base polygons in a bound.
//!
//! Returns closed ways and closed-way multipolygon relations tagged
//! `indoor=*` at the requested level, as a [`geojson::FeatureCollection`].
//! See spec.md §4.E for the exact predicate/ordering semantics this SQL
//! implements.

use std::sync::{Arc, Mutex};

use geo_types::Rect;
use geojson::{Feature, FeatureCollection, Geometry as GeoJsonGeometry, JsonObject, JsonValue};
use geozero::{wkb, CoordDimensions, ToGeo, ToWkb};
use rusqlite::Connection;

use crate::error::{OsmIntileError, Result};

/// Both branches of the UNION select the same three columns so the row
/// mapping stays uniform regardless of which branch produced the row.
const BASE_FEATURES_SQL: &str = r#"
WITH closed_ways AS (
    SELECT w.way_id
    FROM way w
    WHERE EXISTS (SELECT 1 FROM way_tag t WHERE t.way_id = w.way_id AND t.key = 'indoor')
      AND EXISTS (
          SELECT 1 FROM way_tag t
          WHERE t.way_id = w.way_id AND t.key = 'level' AND t.value LIKE :level_pattern
      )
      AND (SELECT wn.node_id FROM way_node wn WHERE wn.way_id = w.way_id ORDER BY wn.sequence_id ASC LIMIT 1)
          = (SELECT wn.node_id FROM way_node wn WHERE wn.way_id = w.way_id ORDER BY wn.sequence_id DESC LIMIT 1)
      AND EXISTS (
          SELECT 1 FROM way_node wn2
          JOIN node n2 ON n2.node_id = wn2.node_id
          WHERE wn2.way_id = w.way_id AND ST_Intersects(n2.geom, ST_GeomFromWKB(:bound, 4326))
      )
),
way_polygons AS (
    SELECT way_id, BuildArea(MakeLine(geom)) AS geom
    FROM (
        SELECT wn.way_id AS way_id, n.geom AS geom
        FROM way_node wn
        JOIN node n ON n.node_id = wn.node_id
        WHERE wn.way_id IN (SELECT way_id FROM closed_ways)
        ORDER BY wn.way_id, wn.sequence_id
    )
    GROUP BY way_id
),
way_props AS (
    SELECT way_id,
           MAX(CASE WHEN key = 'indoor' THEN value END) AS indoor,
           MAX(CASE WHEN key = 'room' THEN value END) AS room
    FROM way_tag
    WHERE way_id IN (SELECT way_id FROM closed_ways)
    GROUP BY way_id
),
mp_relations AS (
    SELECT r.relation_id
    FROM relation r
    WHERE EXISTS (
              SELECT 1 FROM relation_tag t
              WHERE t.relation_id = r.relation_id AND t.key = 'type' AND t.value = 'multipolygon'
          )
      AND EXISTS (SELECT 1 FROM relation_tag t WHERE t.relation_id = r.relation_id AND t.key = 'indoor')
      AND EXISTS (
              SELECT 1 FROM relation_tag t
              WHERE t.relation_id = r.relation_id AND t.key = 'level' AND t.value LIKE :level_pattern
          )
      AND NOT EXISTS (
              SELECT 1 FROM relation_member rm
              WHERE rm.relation_id = r.relation_id AND rm.member_kind = 'way'
                AND (SELECT wn.node_id FROM way_node wn WHERE wn.way_id = rm.member_id ORDER BY wn.sequence_id ASC LIMIT 1)
                    IS NOT (SELECT wn.node_id FROM way_node wn WHERE wn.way_id = rm.member_id ORDER BY wn.sequence_id DESC LIMIT 1)
          )
      AND EXISTS (
              SELECT 1 FROM relation_member rm2
              JOIN way_node wn2 ON wn2.way_id = rm2.member_id
              JOIN node n2 ON n2.node_id = wn2.node_id
              WHERE rm2.relation_id = r.relation_id AND rm2.member_kind = 'way'
                AND ST_Intersects(n2.geom, ST_GeomFromWKB(:bound, 4326))
          )
),
member_lines AS (
    SELECT relation_id, member_id, rm_sequence_id, role, MakeLine(geom) AS line_geom
    FROM (
        SELECT rm.relation_id AS relation_id,
               rm.member_id AS member_id,
               rm.sequence_id AS rm_sequence_id,
               rm.role AS role,
               n.geom AS geom
        FROM relation_member rm
        JOIN way_node wn ON wn.way_id = rm.member_id
        JOIN node n ON n.node_id = wn.node_id
        WHERE rm.relation_id IN (SELECT relation_id FROM mp_relations) AND rm.member_kind = 'way'
        ORDER BY rm.relation_id, rm.member_id, wn.sequence_id
    )
    GROUP BY relation_id, member_id, rm_sequence_id, role
),
relation_polygons AS (
    SELECT relation_id, Polygonize(Collect(line_geom)) AS geom
    FROM (
        SELECT relation_id, line_geom
        FROM member_lines
        ORDER BY relation_id, (role = 'outer') DESC, rm_sequence_id ASC
    )
    GROUP BY relation_id
),
relation_props AS (
    SELECT relation_id,
           MAX(CASE WHEN key = 'indoor' THEN value END) AS indoor,
           MAX(CASE WHEN key = 'room' THEN value END) AS room
    FROM relation_tag
    WHERE relation_id IN (SELECT relation_id FROM mp_relations)
    GROUP BY relation_id
)
SELECT AsBinary(wp_geom.geom) AS wkb, wp.indoor AS indoor, wp.room AS room
FROM way_polygons wp_geom
JOIN way_props wp ON wp.way_id = wp_geom.way_id
WHERE wp_geom.geom IS NOT NULL

UNION ALL

SELECT AsBinary(rp_geom.geom) AS wkb, rp.indoor AS indoor, rp.room AS room
FROM relation_polygons rp_geom
JOIN relation_props rp ON rp.relation_id = rp_geom.relation_id
WHERE rp_geom.geom IS NOT NULL
"#;

/// Runs the Feature Query for `level` restricted to `bound`, the rectangle
/// passed as a WKB polygon bound to both UNION branches via the same named
/// parameter.
pub fn get_base_features(
    conn: &Arc<Mutex<Connection>>,
    level: i64,
    bound: &Rect<f64>,
) -> Result<FeatureCollection> {
    let conn = conn.lock().expect("store mutex poisoned");

    let level_pattern = format!("%{level}%");
    let bound_wkb = bound_to_wkb(bound)?;

    let mut stmt = conn.prepare_cached(BASE_FEATURES_SQL)?;
    let mut rows = stmt.query(rusqlite::named_params! {
        ":level_pattern": level_pattern,
        ":bound": bound_wkb,
    })?;

    let mut features = Vec::new();
    while let Some(row) = rows.next()? {
        let wkb_bytes: Vec<u8> = row.get("wkb")?;
        let indoor: Option<String> = row.get("indoor")?;
        let room: Option<String> = row.get("room")?;

        let geometry = wkb_to_geojson_geometry(&wkb_bytes)?;

        let mut properties = JsonObject::new();
        if let Some(indoor) = indoor {
            properties.insert("indoor".to_string(), JsonValue::from(indoor));
        }
        if let Some(room) = room {
            properties.insert("room".to_string(), JsonValue::from(room));
        }

        features.push(Feature {
            bbox: None,
            geometry: Some(geometry),
            id: None,
            properties: Some(properties),
            foreign_members: None,
        });
    }

    Ok(FeatureCollection {
        bbox: None,
        features,
        foreign_members: None,
    })
}

/// Serializes `bound`'s rectangular hull as a WKB polygon, the form the
/// bound is passed into the query twice (once per UNION branch) as.
fn bound_to_wkb(bound: &Rect<f64>) -> Result<Vec<u8>> {
    let polygon = geo_types::Polygon::new(
        geo_types::LineString::from(vec![
            (bound.min().x, bound.min().y),
            (bound.max().x, bound.min().y),
            (bound.max().x, bound.max().y),
            (bound.min().x, bound.max().y),
            (bound.min().x, bound.min().y),
        ]),
        vec![],
    );
    geo_types::Geometry::Polygon(polygon)
        .to_wkb(CoordDimensions::xy())
        .map_err(|e| OsmIntileError::GeometryError(e.to_string()))
}

fn wkb_to_geojson_geometry(bytes: &[u8]) -> Result<GeoJsonGeometry> {
    let geom: geo_types::Geometry<f64> = wkb::Wkb(bytes.to_vec())
        .to_geo()
        .map_err(|e| OsmIntileError::GeometryError(e.to_string()))?;
    Ok(GeoJsonGeometry::new(geojson::Value::from(&geom)))
}
