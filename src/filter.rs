//! Component B — Filter Engine.
//!
//! Computes the transitive closure of "interesting" elements over three
//! ordered passes (relations, ways, nodes), each reopening the dump
//! reader so the full stream is re-read — see spec.md §4.B for the
//! rationale (relations can reference ways/nodes appearing earlier in the
//! file, the dual of what a single forward pass needs).

use std::collections::HashSet;
use std::path::Path;

use log::info;

use crate::error::{OsmIntileError, Pass, Result};
use crate::osm::reader;
use crate::osm::{ElementKind, FeatureId, MemberKind, Node, OsmObject, Relation, Way};

const RELATION_ANY_KEYS: &[&str] = &["amenity", "shop", "railway", "highway", "building:levels"];
const WAY_ANY_KEYS: &[&str] = RELATION_ANY_KEYS;
const NODE_ANY_KEYS: &[&str] = &["amenity", "shop", "railway", "highway", "door", "entrance"];
const BUILDINGPART_VALUES: &[&str] = &["room", "verticalpassage", "corridor"];

fn has_any_key(object: &impl TagLookup, keys: &[&str]) -> bool {
    keys.iter().any(|k| object.tag(k).is_some())
}

trait TagLookup {
    fn tag(&self, key: &str) -> Option<&str>;
}

impl TagLookup for Relation {
    fn tag(&self, key: &str) -> Option<&str> {
        Relation::tag(self, key)
    }
}

impl TagLookup for Way {
    fn tag(&self, key: &str) -> Option<&str> {
        Way::tag(self, key)
    }
}

/// The `indoor`/`buildingpart` predicate shared by the relation and way
/// passes, plus each kind's own any-of-keys predicate.
fn indoor_or_buildingpart(object: &impl TagLookup) -> bool {
    if let Some(indoor) = object.tag("indoor") {
        if indoor != "yes" {
            return true;
        }
    }
    if let Some(part) = object.tag("buildingpart") {
        if BUILDINGPART_VALUES.contains(&part) {
            return true;
        }
    }
    false
}

fn relation_is_included(relation: &Relation) -> bool {
    indoor_or_buildingpart(relation) || has_any_key(relation, RELATION_ANY_KEYS)
}

fn way_is_included(way: &Way) -> bool {
    indoor_or_buildingpart(way) || has_any_key(way, WAY_ANY_KEYS)
}

fn node_is_included(node: &Node) -> bool {
    NODE_ANY_KEYS.iter().any(|k| node.tag(k).is_some())
}

/// Owns the shared closure set `I` for exactly one `Import` invocation —
/// single-writer, no shared ownership (see spec.md §9).
pub struct FilterEngine {
    included: HashSet<FeatureId>,
}

impl FilterEngine {
    pub fn new() -> Self {
        Self {
            included: HashSet::new(),
        }
    }

    /// Runs passes 1–3 over `path`, reopening the scanner for each, and
    /// returns the final included set ready for the insertion pass.
    pub fn compute_closure(mut self, path: &Path) -> Result<HashSet<FeatureId>> {
        self.run_relation_pass(path)
            .map_err(|e| wrap(Pass::Relations, e))?;
        self.run_way_pass(path).map_err(|e| wrap(Pass::Ways, e))?;
        self.run_node_pass(path).map_err(|e| wrap(Pass::Nodes, e))?;
        Ok(self.included)
    }

    fn run_relation_pass(&mut self, path: &Path) -> Result<()> {
        let scanner = reader::open(path)?;
        let mut count = 0usize;
        for object in scanner {
            let OsmObject::Relation(relation) = object? else {
                continue;
            };
            let already_included = self
                .included
                .contains(&FeatureId(ElementKind::Relation, relation.id));
            if already_included || relation_is_included(&relation) {
                self.included
                    .insert(FeatureId(ElementKind::Relation, relation.id));
                for member in &relation.members {
                    self.included.insert(FeatureId(
                        member_element_kind(member.kind),
                        member.id,
                    ));
                }
                count += 1;
            }
        }
        info!("relation pass: {count} relations included");
        Ok(())
    }

    fn run_way_pass(&mut self, path: &Path) -> Result<()> {
        let scanner = reader::open(path)?;
        let mut count = 0usize;
        for object in scanner {
            let OsmObject::Way(way) = object? else {
                continue;
            };
            let already_included = self.included.contains(&FeatureId(ElementKind::Way, way.id));
            if already_included || way_is_included(&way) {
                self.included.insert(FeatureId(ElementKind::Way, way.id));
                for node_id in &way.nodes {
                    self.included.insert(FeatureId(ElementKind::Node, *node_id));
                }
                count += 1;
            }
        }
        info!("way pass: {count} ways included");
        Ok(())
    }

    fn run_node_pass(&mut self, path: &Path) -> Result<()> {
        let scanner = reader::open(path)?;
        let mut count = 0usize;
        for object in scanner {
            let OsmObject::Node(node) = object? else {
                continue;
            };
            let already_included = self
                .included
                .contains(&FeatureId(ElementKind::Node, node.id));
            if already_included || node_is_included(&node) {
                self.included.insert(FeatureId(ElementKind::Node, node.id));
                count += 1;
            }
        }
        info!("node pass: {count} nodes included");
        Ok(())
    }
}

impl Default for FilterEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn member_element_kind(kind: MemberKind) -> ElementKind {
    match kind {
        MemberKind::Node => ElementKind::Node,
        MemberKind::Way => ElementKind::Way,
        MemberKind::Relation => ElementKind::Relation,
    }
}

fn wrap(pass: Pass, source: OsmIntileError) -> OsmIntileError {
    OsmIntileError::ImportFailed {
        pass,
        source: Box::new(source),
    }
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
    fn relation_with_amenity_pulls_in_members() {
        let xml = r#"<osm>
            <node id="1" lat="52.0" lon="13.0"/>
            <node id="2" lat="52.001" lon="13.001"/>
            <way id="10"><nd ref="1"/><nd ref="2"/></way>
            <relation id="100">
                <member type="way" ref="10" role="outer"/>
                <tag k="amenity" v="cafe"/>
            </relation>
        </osm>"#;
        let path = write_dump(xml);

        let closure = FilterEngine::new().compute_closure(&path).unwrap();

        assert!(closure.contains(&FeatureId(ElementKind::Relation, 100)));
        assert!(closure.contains(&FeatureId(ElementKind::Way, 10)));
        assert!(closure.contains(&FeatureId(ElementKind::Node, 1)));
        assert!(closure.contains(&FeatureId(ElementKind::Node, 2)));
    }

    #[test]
    fn plain_node_without_predicate_keys_is_excluded() {
        let xml = r#"<osm>
            <node id="1" lat="52.0" lon="13.0"><tag k="name" v="irrelevant"/></node>
        </osm>"#;
        let path = write_dump(xml);

        let closure = FilterEngine::new().compute_closure(&path).unwrap();

        assert!(!closure.contains(&FeatureId(ElementKind::Node, 1)));
    }

    #[test]
    fn indoor_room_way_is_included_without_other_tags() {
        let xml = r#"<osm>
            <node id="1" lat="52.0" lon="13.0"/>
            <node id="2" lat="52.001" lon="13.0"/>
            <way id="5">
                <nd ref="1"/><nd ref="2"/>
                <tag k="indoor" v="room"/>
            </way>
        </osm>"#;
        let path = write_dump(xml);

        let closure = FilterEngine::new().compute_closure(&path).unwrap();

        assert!(closure.contains(&FeatureId(ElementKind::Way, 5)));
        assert!(closure.contains(&FeatureId(ElementKind::Node, 1)));
    }

    #[test]
    fn indoor_yes_alone_does_not_satisfy_the_indoor_predicate() {
        let way = Way {
            id: 1,
            nodes: vec![],
            tags: [("indoor".to_string(), "yes".to_string())].into(),
        };
        assert!(!way_is_included(&way));
    }
}
