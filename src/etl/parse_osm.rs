use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::str::{self, FromStr};
use std::time::UNIX_EPOCH;

use log::{debug, info, warn};
use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;
use serde::{Deserialize, Serialize};
use xz::bufread::XzDecoder;

use crate::UserConfig;
use crate::data::OsmMapData;
use crate::data::osm::{Member, MemberType, Node, OsmId, Relation, Tags, Way};
use crate::errors::{Error, Result};
use crate::etl::Etl;

pub const ETL_NAME: &str = "parse_osm";
pub const OUTPUT_FILE_NAME: &str = "osm_elements.rkyv";
pub const SOURCE_FILE_NAME: &str = "osm_source.json";

/// Identifies the input file a cache was built from.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
struct SourceFingerprint {
    path: String,
    size: u64,
    modified_secs: u64,
    modified_nanos: u32,
}

impl SourceFingerprint {
    fn of(path: &Path) -> Result<SourceFingerprint> {
        let canonical = fs::canonicalize(path)?;
        let metadata = fs::metadata(&canonical)?;
        let modified = metadata.modified()?
            .duration_since(UNIX_EPOCH)
            .map_err(|err| Error::from(format!("Bad modification time on {}: {}", path.display(), err)))?;
        Ok(SourceFingerprint {
            path: canonical.display().to_string(),
            size: metadata.len(),
            modified_secs: modified.as_secs(),
            modified_nanos: modified.subsec_nanos(),
        })
    }

    /// `None` when the file is missing or unreadable, which counts as a stale cache.
    fn read(dir: &Path) -> Option<SourceFingerprint> {
        let file = fs::File::open(dir.join(SOURCE_FILE_NAME)).ok()?;
        serde_json::from_reader(BufReader::new(file)).ok()
    }

    fn write(&self, dir: &Path) -> Result<()> {
        let file = fs::File::create(dir.join(SOURCE_FILE_NAME))?;
        serde_json::to_writer(file, self)?;
        Ok(())
    }
}

enum ParserState {
    Top,
    Node(Node),
    Way(Way),
    Relation(Relation),
}

impl ParserState {
    fn tags_mut(&mut self) -> Option<&mut Tags> {
        match self {
            ParserState::Top => None,
            ParserState::Node(node) => Some(&mut node.tags),
            ParserState::Way(way) => Some(&mut way.tags),
            ParserState::Relation(relation) => Some(&mut relation.tags),
        }
    }
}

fn attribute(el: &BytesStart, name: &str) -> Result<Option<String>> {
    match el.try_get_attribute(name)? {
        Some(attribute) => Ok(Some(attribute.unescape_value()?.into_owned())),
        None => Ok(None),
    }
}

/// Missing or unparsable values are reported as `None`, the element is then dropped.
fn number<T: FromStr>(el: &BytesStart, name: &str) -> Result<Option<T>> {
    Ok(attribute(el, name)?.and_then(|value| value.parse().ok()))
}

fn element_name(el: &BytesStart) -> String {
    String::from_utf8_lossy(el.name().as_ref()).into_owned()
}

fn parse_node(el: &BytesStart) -> Result<Option<Node>> {
    let (Some(id), Some(lat), Some(lon)) = (number(el, "id")?, number(el, "lat")?, number(el, "lon")?) else {
        warn!(element = element_name(el).as_str(); "Skipping node without valid id, lat and lon");
        return Ok(None);
    };
    Ok(Some(Node::new(id, lat, lon)))
}

fn parse_way(el: &BytesStart) -> Result<Option<Way>> {
    let Some(id) = number(el, "id")? else {
        warn!(element = element_name(el).as_str(); "Skipping way without valid id");
        return Ok(None);
    };
    Ok(Some(Way::new(id)))
}

fn parse_relation(el: &BytesStart) -> Result<Option<Relation>> {
    let Some(id) = number(el, "id")? else {
        warn!(element = element_name(el).as_str(); "Skipping relation without valid id");
        return Ok(None);
    };
    Ok(Some(Relation::new(id)))
}

fn parse_member(el: &BytesStart) -> Result<Option<Member>> {
    let member_type = attribute(el, "type")?.and_then(|value| MemberType::from_osm(&value));
    let (Some(member_type), Some(reference)) = (member_type, number::<OsmId>(el, "ref")?) else {
        return Ok(None);
    };
    Ok(Some(Member {
        member_type,
        reference,
        role: attribute(el, "role")?.unwrap_or_default(),
    }))
}

/// Handles elements that may appear inside `<node>`, `<way>` or `<relation>`.
fn parse_child(state: &mut ParserState, el: &BytesStart) -> Result<()> {
    match el.name().as_ref() {
        b"tag" => {
            if let (Some(tags), Some(key), Some(value)) = (state.tags_mut(), attribute(el, "k")?, attribute(el, "v")?) {
                tags.insert(key, value);
            }
        },
        b"nd" => {
            if let (ParserState::Way(way), Some(node_id)) = (&mut *state, number::<OsmId>(el, "ref")?) {
                way.node_ids.push(node_id);
            }
        },
        b"member" => {
            if let (ParserState::Relation(relation), Some(member)) = (&mut *state, parse_member(el)?) {
                relation.members.push(member);
            }
        },
        _ => (),
    }
    Ok(())
}

fn finish(state: ParserState, data: &mut OsmMapData) {
    match state {
        ParserState::Top => (),
        ParserState::Node(node) => {
            data.nodes.insert(node.id, node);
        },
        ParserState::Way(way) => data.ways.push(way),
        ParserState::Relation(relation) => data.relations.push(relation),
    }
}

/// Reads an OSM XML document into memory.
pub fn read_osm<R: BufRead>(source: R) -> Result<OsmMapData> {
    let mut reader = Reader::from_reader(source);
    reader.trim_text(true);

    let mut buf = Vec::new();
    let mut data = OsmMapData::default();
    let mut state = ParserState::Top;

    loop {
        match reader.read_event_into(&mut buf) {
            Err(e) => {
                return Err(Error::parse(format!("Malformed OSM XML at byte {}: {}", reader.buffer_position(), e)));
            },
            Ok(Event::Eof) => break,
            Ok(Event::Start(e)) => {
                let opened = match e.name().as_ref() {
                    b"node" => parse_node(&e)?.map(ParserState::Node),
                    b"way" => parse_way(&e)?.map(ParserState::Way),
                    b"relation" => parse_relation(&e)?.map(ParserState::Relation),
                    _ => {
                        parse_child(&mut state, &e)?;
                        None
                    },
                };
                if let Some(opened) = opened {
                    finish(std::mem::replace(&mut state, opened), &mut data);
                }
            },
            Ok(Event::Empty(e)) => {
                match e.name().as_ref() {
                    b"node" => finish(parse_node(&e)?.map_or(ParserState::Top, ParserState::Node), &mut data),
                    b"way" => finish(parse_way(&e)?.map_or(ParserState::Top, ParserState::Way), &mut data),
                    b"relation" => finish(parse_relation(&e)?.map_or(ParserState::Top, ParserState::Relation), &mut data),
                    _ => parse_child(&mut state, &e)?,
                }
            },
            Ok(Event::End(e)) => {
                if matches!(e.name().as_ref(), b"node" | b"way" | b"relation") {
                    finish(std::mem::replace(&mut state, ParserState::Top), &mut data);
                }
            },
            // Declarations, comments and whitespace carry no map data.
            Ok(_) => (),
        }
        buf.clear();
    }
    finish(state, &mut data);
    Ok(data)
}

pub struct ParseOsmEtl<'a> {
    config: &'a UserConfig,
}

impl ParseOsmEtl<'_> {
    pub fn output_path(dir: &Path) -> PathBuf {
        dir.join(OUTPUT_FILE_NAME)
    }

    fn input_path(&self) -> &Path {
        Path::new(&self.config.data_path)
    }

    fn create_osm_reader(&self) -> Result<Box<dyn BufRead>> {
        let path = self.input_path();
        let file_reader = BufReader::new(fs::File::open(path)?);
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("pbf") => Err(Error::parse(format!("{} is OSM PBF, only OSM XML is supported", path.display()))),
            Some("xz") => Ok(Box::new(BufReader::new(XzDecoder::new(file_reader)))),
            _ => Ok(Box::new(file_reader)),
        }
    }

    pub fn new(config: &UserConfig) -> ParseOsmEtl<'_> {
        ParseOsmEtl {
            config
        }
    }
}

impl Etl for ParseOsmEtl<'_> {
    type Input = Box<dyn BufRead>;
    type Output = OsmMapData;

    fn etl_name(&self) -> &str {
        ETL_NAME
    }

    /// The cache is reused only if it was built from this exact file: same canonical path,
    /// size and modification time.
    fn is_cached(&self, dir: &Path) -> Result<bool> {
        if !self.config.use_cache || !Self::output_path(dir).exists() {
            return Ok(false);
        }
        let Some(cached) = SourceFingerprint::read(dir) else {
            return Ok(false);
        };
        let current = SourceFingerprint::of(self.input_path())?;
        if cached != current {
            debug!(
                etl_name = ETL_NAME,
                cached_path = cached.path.as_str(),
                input_path = current.path.as_str();
                "Cache built from another version of the input"
            );
            return Ok(false);
        }
        Ok(true)
    }

    fn clean(&self, dir: &Path) -> Result<()> {
        for path in [Self::output_path(dir), dir.join(SOURCE_FILE_NAME)] {
            if path.exists() {
                fs::remove_file(path)?;
            }
        }
        Ok(())
    }

    fn extract(&mut self, _dir: &Path) -> Result<Self::Input> {
        self.create_osm_reader()
    }

    fn transform(&mut self, input: Self::Input) -> Result<Self::Output> {
        let data = read_osm(input)?;
        info!(
            etl_name = ETL_NAME,
            nodes = data.nodes.len(),
            ways = data.ways.len(),
            relations = data.relations.len();
            "Parsed OSM data"
        );
        Ok(data)
    }

    fn load(&mut self, dir: &Path, output: Self::Output) -> Result<()> {
        let source = SourceFingerprint::of(self.input_path())?;
        self.clean(dir)?;

        let bytes = rkyv::to_bytes::<_, 256>(&output)
            .map_err(|err| Error::from(format!("Could not serialize OSM cache: {:?}", err)))?;
        let mut output_file = fs::File::create(Self::output_path(dir))?;
        output_file.write_all(&bytes)?;
        // fingerprint last: a half-written cache has none
        source.write(dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;

    const SAMPLE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<osm version="0.6" generator="test">
  <bounds minlat="51.5" minlon="-0.1" maxlat="51.6" maxlon="0.0"/>
  <node id="1" visible="true" version="3" lat="51.5001" lon="-0.0999"/>
  <node id="2" lat="51.5002" lon="-0.0998" user="someone" uid="42">
    <tag k="amenity" v="cafe"/>
    <tag k="name" v="Tea &amp; Cake"/>
  </node>
  <node id="3" lat="51.5003" lon="-0.0997"/>
  <node id="4" lat="bogus" lon="-0.0996"/>
  <way id="10" version="1">
    <nd ref="1"/>
    <nd ref="2"/>
    <nd ref="3"/>
    <tag k="highway" v="residential"/>
  </way>
  <way id="11">
    <nd ref="3"/>
    <nd ref="1"/>
  </way>
  <relation id="100">
    <member type="way" ref="10" role="outer"/>
    <member type="node" ref="2" role=""/>
    <member type="area" ref="5" role="odd"/>
    <tag k="type" v="multipolygon"/>
  </relation>
</osm>
"#;

    #[test]
    fn reads_nodes_ways_and_relations() {
        let data = read_osm(SAMPLE.as_bytes()).unwrap();

        assert_eq!(data.nodes.len(), 3);
        assert_eq!(data.ways.len(), 2);
        assert_eq!(data.relations.len(), 1);

        let cafe = &data.nodes[&2];
        assert_eq!(cafe.lat, 51.5002);
        assert_eq!(cafe.lon, -0.0998);
        assert_eq!(cafe.tags.get("amenity").map(String::as_str), Some("cafe"));
        assert_eq!(cafe.tags.get("name").map(String::as_str), Some("Tea & Cake"));
        assert!(cafe.projected.is_none());
        assert!(data.nodes[&1].tags.is_empty());

        assert_eq!(data.ways[0].id, 10);
        assert_eq!(data.ways[0].node_ids, vec![1, 2, 3]);
        assert_eq!(data.ways[0].tags.get("highway").map(String::as_str), Some("residential"));
        assert_eq!(data.ways[1].node_ids, vec![3, 1]);
        assert!(data.ways[1].tags.is_empty());

        let relation = &data.relations[0];
        assert_eq!(relation.members.len(), 2);
        assert_eq!(relation.members[0], Member { member_type: MemberType::Way, reference: 10, role: "outer".to_string() });
        assert_eq!(relation.members[1].member_type, MemberType::Node);
        assert_eq!(relation.tags.get("type").map(String::as_str), Some("multipolygon"));
    }

    #[test]
    fn tags_outside_elements_are_ignored() {
        let xml = r#"<osm><tag k="stray" v="x"/><node id="7" lat="1" lon="2"/></osm>"#;
        let data = read_osm(xml.as_bytes()).unwrap();
        assert_eq!(data.nodes.len(), 1);
        assert!(data.nodes[&7].tags.is_empty());
    }

    #[test]
    fn malformed_xml_is_a_parse_error() {
        let xml = r#"<osm><node id="1" lat="1" lon="2"></way></osm>"#;
        let err = read_osm(xml.as_bytes()).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Parse);
    }

    #[test]
    fn cache_round_trip() {
        let dir = std::env::temp_dir().join(format!("osm_to_dxf_parse_{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let input = dir.join("sample.osm");
        fs::write(&input, SAMPLE).unwrap();

        let config = UserConfig {
            data_path: input.display().to_string(),
            ..UserConfig::default()
        };
        let mut etl = ParseOsmEtl::new(&config);
        etl.clean(&dir).unwrap();
        assert!(!etl.is_cached(&dir).unwrap());

        etl.process(&dir).unwrap();
        assert!(etl.is_cached(&dir).unwrap());

        let cached = crate::etl::draw_dxf::read_cache(&dir).unwrap();
        assert_eq!(cached, read_osm(SAMPLE.as_bytes()).unwrap());

        etl.clean(&dir).unwrap();
        assert!(!ParseOsmEtl::output_path(&dir).exists());
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn same_named_inputs_do_not_share_a_cache() {
        let root = std::env::temp_dir().join(format!("osm_to_dxf_same_name_{}", std::process::id()));
        let cache_dir = root.join("cache");
        fs::create_dir_all(root.join("a")).unwrap();
        fs::create_dir_all(root.join("b")).unwrap();
        fs::create_dir_all(&cache_dir).unwrap();

        let newer = root.join("a").join("map.osm");
        let older = root.join("b").join("map.osm");
        fs::write(&older, r#"<osm><node id="2" lat="2" lon="2"/></osm>"#).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(20));
        fs::write(&newer, r#"<osm><node id="1" lat="1" lon="1"/></osm>"#).unwrap();

        let config_a = UserConfig { data_path: newer.display().to_string(), ..UserConfig::default() };
        let config_b = UserConfig { data_path: older.display().to_string(), ..UserConfig::default() };

        ParseOsmEtl::new(&config_a).process(&cache_dir).unwrap();
        assert!(ParseOsmEtl::new(&config_a).is_cached(&cache_dir).unwrap());
        // the cache is newer than b/map.osm but was built from a/map.osm
        assert!(!ParseOsmEtl::new(&config_b).is_cached(&cache_dir).unwrap());

        ParseOsmEtl::new(&config_b).process(&cache_dir).unwrap();
        let cached = crate::etl::draw_dxf::read_cache(&cache_dir).unwrap();
        assert!(cached.nodes.contains_key(&2));
        assert!(!cached.nodes.contains_key(&1));

        fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn edited_input_invalidates_cache() {
        let dir = std::env::temp_dir().join(format!("osm_to_dxf_edited_{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let input = dir.join("map.osm");
        fs::write(&input, r#"<osm><node id="1" lat="1" lon="1"/></osm>"#).unwrap();
        let config = UserConfig { data_path: input.display().to_string(), ..UserConfig::default() };

        ParseOsmEtl::new(&config).process(&dir).unwrap();
        assert!(ParseOsmEtl::new(&config).is_cached(&dir).unwrap());

        fs::write(&input, r#"<osm><node id="1" lat="1" lon="1"/><node id="3" lat="3" lon="3"/></osm>"#).unwrap();
        assert!(!ParseOsmEtl::new(&config).is_cached(&dir).unwrap());

        ParseOsmEtl::new(&config).process(&dir).unwrap();
        assert!(ParseOsmEtl::new(&config).is_cached(&dir).unwrap());
        assert_eq!(crate::etl::draw_dxf::read_cache(&dir).unwrap().nodes.len(), 2);

        // a cache without its fingerprint is never trusted
        fs::remove_file(dir.join(SOURCE_FILE_NAME)).unwrap();
        assert!(!ParseOsmEtl::new(&config).is_cached(&dir).unwrap());

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn xz_input_is_decompressed() {
        let dir = std::env::temp_dir().join(format!("osm_to_dxf_xz_{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let input = dir.join("sample.osm.xz");
        let mut encoder = xz::write::XzEncoder::new(fs::File::create(&input).unwrap(), 6);
        encoder.write_all(SAMPLE.as_bytes()).unwrap();
        encoder.finish().unwrap();

        let config = UserConfig {
            data_path: input.display().to_string(),
            ..UserConfig::default()
        };
        let mut etl = ParseOsmEtl::new(&config);
        etl.reprocess(&dir).unwrap();

        let cached = crate::etl::draw_dxf::read_cache(&dir).unwrap();
        assert_eq!(cached, read_osm(SAMPLE.as_bytes()).unwrap());
        assert_eq!(cached.nodes[&2].tags.get("name").map(String::as_str), Some("Tea & Cake"));
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn pbf_input_is_rejected() {
        let dir = std::env::temp_dir().join(format!("osm_to_dxf_pbf_{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let input = dir.join("map.osm.pbf");
        fs::write(&input, b"\x00\x00").unwrap();

        let config = UserConfig {
            data_path: input.display().to_string(),
            ..UserConfig::default()
        };
        let err = ParseOsmEtl::new(&config).extract(&dir).err().unwrap();
        assert_eq!(err.kind, ErrorKind::Parse);
        fs::remove_dir_all(&dir).unwrap();
    }
}
