use std::collections::HashMap;

use self::osm::{Node, OsmId, Relation, Way};

pub mod osm;
pub mod style;

/// Map data as defined in the .osm file. Nodes are keyed by id so ways can look up their
/// coordinates, ways and relations keep document order.

#[derive(rkyv::Archive, rkyv::Deserialize, rkyv::Serialize, Debug, Default, Clone, PartialEq)]
#[archive(check_bytes)]
pub struct OsmMapData {
    pub nodes: HashMap<OsmId, Node>,
    pub ways: Vec<Way>,
    pub relations: Vec<Relation>,
}
