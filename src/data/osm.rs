use std::collections::HashMap;

pub type OsmId = i64;

/// Free-form OSM key/value tags.
pub type Tags = HashMap<String, String>;

/// A position in the target coordinate system, in that system's units.
#[derive(rkyv::Archive, rkyv::Deserialize, rkyv::Serialize, Debug, Clone, Copy, PartialEq)]
#[archive(check_bytes)]
pub struct PlanarCoords {
    pub x: f64,
    pub y: f64,
}

impl PlanarCoords {
    pub fn new(x: f64, y: f64) -> Self {
        PlanarCoords { x, y }
    }

    pub fn distance(&self, other: &PlanarCoords) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }
}

#[derive(rkyv::Archive, rkyv::Deserialize, rkyv::Serialize, Debug, Clone, PartialEq)]
#[archive(check_bytes)]
pub struct Node {
    pub id: OsmId,
    pub lat: f64,
    pub lon: f64,
    pub tags: Tags,
    /// Filled in once by the projection pass.
    pub projected: Option<PlanarCoords>,
}

impl Node {
    pub fn new(id: OsmId, lat: f64, lon: f64) -> Self {
        Node {
            id,
            lat,
            lon,
            tags: Tags::new(),
            projected: None,
        }
    }
}

#[derive(rkyv::Archive, rkyv::Deserialize, rkyv::Serialize, Debug, Clone, PartialEq)]
#[archive(check_bytes)]
pub struct Way {
    pub id: OsmId,
    pub node_ids: Vec<OsmId>,
    pub tags: Tags,
}

impl Way {
    pub fn new(id: OsmId) -> Self {
        Way {
            id,
            node_ids: Vec::new(),
            tags: Tags::new(),
        }
    }
}

#[derive(rkyv::Archive, rkyv::Deserialize, rkyv::Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[archive(check_bytes)]
pub enum MemberType {
    Node,
    Way,
    Relation,
}

impl MemberType {
    pub fn from_osm(value: &str) -> Option<MemberType> {
        match value {
            "node" => Some(MemberType::Node),
            "way" => Some(MemberType::Way),
            "relation" => Some(MemberType::Relation),
            _ => None,
        }
    }
}

#[derive(rkyv::Archive, rkyv::Deserialize, rkyv::Serialize, Debug, Clone, PartialEq)]
#[archive(check_bytes)]
pub struct Member {
    pub member_type: MemberType,
    pub reference: OsmId,
    pub role: String,
}

/// Kept for statistics only, relations are not turned into geometry.
#[derive(rkyv::Archive, rkyv::Deserialize, rkyv::Serialize, Debug, Clone, PartialEq)]
#[archive(check_bytes)]
pub struct Relation {
    pub id: OsmId,
    pub members: Vec<Member>,
    pub tags: Tags,
}

impl Relation {
    pub fn new(id: OsmId) -> Self {
        Relation {
            id,
            members: Vec::new(),
            tags: Tags::new(),
        }
    }
}
