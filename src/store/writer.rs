//! Component C — Store Writer, plus the Filter Engine's Pass 4
//! (Insertion): the scanner is reopened once more and elements are written
//! to the store iff their `FeatureId` is in the closure computed by
//! [`crate::filter::FilterEngine`].

use std::path::Path;

use log::{info, warn};
use rusqlite::{Statement, Transaction};

use crate::error::{ElementKind as ErrKind, OsmIntileError, Pass, Result};
use crate::filter::FilterEngine;
use crate::osm::reader;
use crate::osm::{Node, OsmObject, Relation, Way};
use crate::store::SpatialStore;

/// Counters surfaced after an import; the importer logs these but does not
/// fail on dangling references (per spec.md §4.B Pass 4).
#[derive(Debug, Default, Clone, Copy)]
pub struct ImportStats {
    pub count_written: usize,
    pub count_missing: usize,
}

/// Runs the full four-pass import (closure computation + insertion) as a
/// single atomic transaction against `store`.
pub fn import_dump(store: &SpatialStore, path: &Path) -> Result<ImportStats> {
    let mut included = FilterEngine::new()
        .compute_closure(path)
        .map_err(|e| wrap(Pass::Insertion, e))?;

    let conn_handle = store.connection();
    let mut conn = conn_handle.lock().expect("store mutex poisoned");
    let tx = conn.transaction()?;

    let stats = {
        let mut writer = StoreWriter::prepare(&tx).map_err(|e| wrap(Pass::Insertion, e))?;
        let scanner = reader::open(path).map_err(|e| wrap(Pass::Insertion, e))?;

        let mut count_written = 0usize;
        for object in scanner {
            let object = object.map_err(|e| wrap(Pass::Insertion, e))?;
            let feature_id = object.feature_id();
            if included.remove(&feature_id) {
                writer
                    .import_object(&object)
                    .map_err(|e| wrap(Pass::Insertion, e))?;
                count_written += 1;
            }
        }

        ImportStats {
            count_written,
            count_missing: included.len(),
        }
    };

    tx.commit()?;

    info!(
        "import finished: {} elements written, {} dangling references",
        stats.count_written, stats.count_missing
    );
    if stats.count_missing > 0 {
        warn!(
            "{} referenced elements were never seen in the dump",
            stats.count_missing
        );
    }

    Ok(stats)
}

fn wrap(pass: Pass, source: OsmIntileError) -> OsmIntileError {
    match source {
        err @ OsmIntileError::ImportFailed { .. } => err,
        other => OsmIntileError::ImportFailed {
            pass,
            source: Box::new(other),
        },
    }
}

/// Owns the eight prepared insert-or-replace statements for exactly one
/// `Import` transaction, mirroring the original Go
/// `sqliteosmobjectimporter`'s `prepareStatements`/`importObject` split.
pub struct StoreWriter<'tx> {
    insert_node: Statement<'tx>,
    insert_node_tag: Statement<'tx>,
    insert_way: Statement<'tx>,
    insert_way_tag: Statement<'tx>,
    insert_way_node: Statement<'tx>,
    insert_relation: Statement<'tx>,
    insert_relation_tag: Statement<'tx>,
    insert_relation_member: Statement<'tx>,
}

impl<'tx> StoreWriter<'tx> {
    pub fn prepare(tx: &'tx Transaction<'tx>) -> Result<Self> {
        Ok(Self {
            insert_node: tx.prepare(
                "INSERT OR REPLACE INTO node (node_id, geom) \
                 VALUES (?1, SetSRID(MakePoint(?2, ?3), 4326))",
            )?,
            insert_node_tag: tx.prepare(
                "INSERT OR REPLACE INTO node_tag (node_id, key, value) VALUES (?1, ?2, ?3)",
            )?,
            insert_way: tx.prepare("INSERT OR REPLACE INTO way (way_id) VALUES (?1)")?,
            insert_way_tag: tx.prepare(
                "INSERT OR REPLACE INTO way_tag (way_id, key, value) VALUES (?1, ?2, ?3)",
            )?,
            insert_way_node: tx.prepare(
                "INSERT OR REPLACE INTO way_node (way_id, node_id, sequence_id) \
                 VALUES (?1, ?2, ?3)",
            )?,
            insert_relation: tx
                .prepare("INSERT OR REPLACE INTO relation (relation_id) VALUES (?1)")?,
            insert_relation_tag: tx.prepare(
                "INSERT OR REPLACE INTO relation_tag (relation_id, key, value) \
                 VALUES (?1, ?2, ?3)",
            )?,
            insert_relation_member: tx.prepare(
                "INSERT OR REPLACE INTO relation_member \
                 (relation_id, member_kind, member_id, sequence_id, role) \
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?,
        })
    }

    pub fn import_object(&mut self, object: &OsmObject) -> Result<()> {
        match object {
            OsmObject::Node(node) => self.import_node(node),
            OsmObject::Way(way) => self.import_way(way),
            OsmObject::Relation(relation) => self.import_relation(relation),
        }
    }

    fn import_node(&mut self, node: &Node) -> Result<()> {
        self.insert_node
            .execute((node.id, node.lon, node.lat))
            .map_err(|e| store_err(ErrKind::Node, e))?;
        for (key, value) in &node.tags {
            self.insert_node_tag
                .execute((node.id, key, value))
                .map_err(|e| store_err(ErrKind::Node, e))?;
        }
        Ok(())
    }

    fn import_way(&mut self, way: &Way) -> Result<()> {
        self.insert_way
            .execute((way.id,))
            .map_err(|e| store_err(ErrKind::Way, e))?;
        for (key, value) in &way.tags {
            self.insert_way_tag
                .execute((way.id, key, value))
                .map_err(|e| store_err(ErrKind::Way, e))?;
        }
        for (sequence_id, node_id) in way.nodes.iter().enumerate() {
            self.insert_way_node
                .execute((way.id, node_id, sequence_id as i64))
                .map_err(|e| store_err(ErrKind::Way, e))?;
        }
        Ok(())
    }

    fn import_relation(&mut self, relation: &Relation) -> Result<()> {
        self.insert_relation
            .execute((relation.id,))
            .map_err(|e| store_err(ErrKind::Relation, e))?;
        for (key, value) in &relation.tags {
            self.insert_relation_tag
                .execute((relation.id, key, value))
                .map_err(|e| store_err(ErrKind::Relation, e))?;
        }
        for (sequence_id, member) in relation.members.iter().enumerate() {
            self.insert_relation_member
                .execute((
                    relation.id,
                    member.kind.as_str(),
                    member.id,
                    sequence_id as i64,
                    &member.role,
                ))
                .map_err(|e| store_err(ErrKind::Relation, e))?;
        }
        Ok(())
    }
}

fn store_err(kind: ErrKind, source: rusqlite::Error) -> OsmIntileError {
    OsmIntileError::StoreError { kind, source }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_dump(xml: &str) -> tempfile::TempPath {
        let mut file = tempfile::NamedTempFile::with_suffix(".osm").unwrap();
        file.write_all(xml.as_bytes()).unwrap();
        file.into_temp_path()
    }

    #[test]
    fn import_writes_closed_room_way_and_its_nodes() {
        let xml = r#"<osm>
            <node id="1" lat="52.000" lon="13.000"/>
            <node id="2" lat="52.001" lon="13.000"/>
            <node id="3" lat="52.001" lon="13.001"/>
            <way id="42">
                <nd ref="1"/><nd ref="2"/><nd ref="3"/><nd ref="1"/>
                <tag k="indoor" v="room"/>
                <tag k="level" v="1"/>
            </way>
        </osm>"#;
        let path = write_dump(xml);
        let store = SpatialStore::open(":memory:").unwrap();

        let stats = import_dump(&store, path.as_ref()).unwrap();

        assert_eq!(stats.count_missing, 0);
        assert_eq!(stats.count_written, 4); // 3 nodes + 1 way

        let conn = store.connection();
        let conn = conn.lock().unwrap();
        let way_count: i64 = conn
            .query_row("SELECT count(*) FROM way WHERE way_id = 42", [], |r| {
                r.get(0)
            })
            .unwrap();
        assert_eq!(way_count, 1);

        let node_count: i64 = conn
            .query_row("SELECT count(*) FROM way_node WHERE way_id = 42", [], |r| {
                r.get(0)
            })
            .unwrap();
        assert_eq!(node_count, 4);
    }

    #[test]
    fn reimport_is_insert_or_replace() {
        let xml = r#"<osm>
            <node id="1" lat="52.0" lon="13.0"/>
            <node id="2" lat="52.0" lon="13.0"><tag k="amenity" v="cafe"/></node>
        </osm>"#;
        let path = write_dump(xml);
        let store = SpatialStore::open(":memory:").unwrap();

        import_dump(&store, path.as_ref()).unwrap();
        import_dump(&store, path.as_ref()).unwrap();

        let conn = store.connection();
        let conn = conn.lock().unwrap();
        let count: i64 = conn
            .query_row("SELECT count(*) FROM node", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 1); // only node 2 satisfies a node predicate
    }
}
