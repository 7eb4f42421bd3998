//! The transient OSM element model used while a dump is being ingested.
//!
//! Mirrors the teacher's plain serde structs (`Node`, `Way`, `Tag` in the
//! original `osm-tiles` crate) but generalizes them with a `Relation`
//! variant and collapses the three element kinds behind one
//! [`OsmObject`] so the rest of the pipeline can pattern-match instead of
//! requiring separate code paths per format.

pub mod reader;

use std::collections::HashMap;

/// Unordered string-to-string tag bag, keyed the way OSM tags naturally are.
pub type TagMap = HashMap<String, String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ElementKind {
    Node,
    Way,
    Relation,
}

/// Uniquely identifies an OSM element across kinds, whether encountered as
/// a raw element in the dump or as a member reference from a way/relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FeatureId(pub ElementKind, pub i64);

#[derive(Debug, Clone)]
pub struct Node {
    pub id: i64,
    pub lon: f64,
    pub lat: f64,
    pub tags: TagMap,
}

#[derive(Debug, Clone)]
pub struct Way {
    pub id: i64,
    pub nodes: Vec<i64>,
    pub tags: TagMap,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberKind {
    Node,
    Way,
    Relation,
}

impl MemberKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemberKind::Node => "node",
            MemberKind::Way => "way",
            MemberKind::Relation => "relation",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Member {
    pub kind: MemberKind,
    pub id: i64,
    pub role: String,
}

#[derive(Debug, Clone)]
pub struct Relation {
    pub id: i64,
    pub members: Vec<Member>,
    pub tags: TagMap,
}

/// A single parsed dump element, dispatched on by the store writer's
/// `import_object` the same way the original Go importer type-switches on
/// `osm.Object`.
#[derive(Debug, Clone)]
pub enum OsmObject {
    Node(Node),
    Way(Way),
    Relation(Relation),
}

impl OsmObject {
    pub fn kind(&self) -> ElementKind {
        match self {
            OsmObject::Node(_) => ElementKind::Node,
            OsmObject::Way(_) => ElementKind::Way,
            OsmObject::Relation(_) => ElementKind::Relation,
        }
    }

    pub fn feature_id(&self) -> FeatureId {
        let id = match self {
            OsmObject::Node(n) => n.id,
            OsmObject::Way(w) => w.id,
            OsmObject::Relation(r) => r.id,
        };
        FeatureId(self.kind(), id)
    }
}

impl Node {
    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }
}

impl Way {
    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }

    /// Geometric closure per §4.E: first node id equals last node id.
    pub fn is_closed(&self) -> bool {
        matches!((self.nodes.first(), self.nodes.last()), (Some(a), Some(b)) if a == b)
            && self.nodes.len() > 1
    }
}

impl Relation {
    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }

    pub fn is_multipolygon(&self) -> bool {
        self.tag("type") == Some("multipolygon")
    }
}
