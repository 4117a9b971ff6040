use super::osm::Tags;

/// AutoCAD Color Index values used by the layer table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AciColor {
    Red = 1,
    Yellow = 2,
    Green = 3,
    Cyan = 4,
    Blue = 5,
    Magenta = 6,
    White = 7,
    Gray = 8,
}

impl AciColor {
    pub fn code(self) -> i16 {
        self as i16
    }
}

/// Styling of one DXF layer. Line weights are in hundredths of a millimetre.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayerStyle {
    pub layer_name: &'static str,
    pub color: AciColor,
    pub line_weight: i16,
}

const fn style(layer_name: &'static str, color: AciColor, line_weight: i16) -> LayerStyle {
    LayerStyle { layer_name, color, line_weight }
}

/// Value used in a key table for "any other value of this key".
const DEFAULT_VALUE: &str = "default";

pub const FALLBACK_STYLE: LayerStyle = style("OSM_OTHER", AciColor::White, 10);

struct KeyTable {
    key: &'static str,
    entries: &'static [(&'static str, LayerStyle)],
}

impl KeyTable {
    fn lookup(&self, value: &str) -> Option<LayerStyle> {
        self.find(value).or_else(|| self.find(DEFAULT_VALUE))
    }

    fn find(&self, value: &str) -> Option<LayerStyle> {
        self.entries.iter()
            .find(|(entry_value, _)| *entry_value == value)
            .map(|(_, style)| *style)
    }
}

// Keys are checked in this order, the first key present on a feature that yields a
// style wins.
const LAYER_TABLE: [KeyTable; 6] = [
    KeyTable {
        key: "highway",
        entries: &[
            ("motorway", style("HIGHWAY_MOTORWAY", AciColor::Red, 100)),
            ("trunk", style("HIGHWAY_TRUNK", AciColor::Red, 80)),
            ("primary", style("HIGHWAY_PRIMARY", AciColor::Yellow, 60)),
            ("secondary", style("HIGHWAY_SECONDARY", AciColor::Cyan, 40)),
            ("tertiary", style("HIGHWAY_TERTIARY", AciColor::Green, 30)),
            ("residential", style("HIGHWAY_RESIDENTIAL", AciColor::White, 20)),
            ("service", style("HIGHWAY_SERVICE", AciColor::Gray, 10)),
            ("footway", style("HIGHWAY_FOOTWAY", AciColor::Magenta, 5)),
            ("cycleway", style("HIGHWAY_CYCLEWAY", AciColor::Blue, 5)),
            ("path", style("HIGHWAY_PATH", AciColor::Green, 5)),
        ],
    },
    KeyTable {
        key: "building",
        entries: &[
            (DEFAULT_VALUE, style("BUILDING", AciColor::Gray, 25)),
        ],
    },
    KeyTable {
        key: "waterway",
        entries: &[
            ("river", style("WATERWAY_RIVER", AciColor::Blue, 50)),
            ("stream", style("WATERWAY_STREAM", AciColor::Blue, 20)),
            ("canal", style("WATERWAY_CANAL", AciColor::Blue, 30)),
            ("drain", style("WATERWAY_DRAIN", AciColor::Cyan, 10)),
        ],
    },
    KeyTable {
        key: "natural",
        entries: &[
            ("water", style("NATURAL_WATER", AciColor::Blue, 25)),
            ("coastline", style("NATURAL_COASTLINE", AciColor::Blue, 50)),
            ("tree", style("NATURAL_TREE", AciColor::Green, 5)),
            ("forest", style("NATURAL_FOREST", AciColor::Green, 25)),
        ],
    },
    KeyTable {
        key: "amenity",
        entries: &[
            (DEFAULT_VALUE, style("AMENITY", AciColor::Magenta, 15)),
        ],
    },
    KeyTable {
        key: "landuse",
        entries: &[
            (DEFAULT_VALUE, style("LANDUSE", AciColor::Yellow, 15)),
        ],
    },
];

/// Nodes carrying one of these keys are drawn as point markers.
const POINT_FEATURE_KEYS: [&str; 4] = ["amenity", "shop", "tourism", "highway"];

const FOOTPATH_HIGHWAYS: [&str; 6] = ["footway", "path", "cycleway", "steps", "pedestrian", "bridleway"];

/// Maps OSM tags to DXF layers with styling.
pub struct LayerMapper {
    use_colors: bool,
}

impl LayerMapper {
    pub fn new(use_colors: bool) -> Self {
        LayerMapper { use_colors }
    }

    pub fn classify(&self, tags: &Tags) -> LayerStyle {
        let style = LAYER_TABLE.iter()
            .find_map(|table| tags.get(table.key).and_then(|value| table.lookup(value)))
            .unwrap_or(FALLBACK_STYLE);

        if self.use_colors {
            style
        } else {
            LayerStyle { color: AciColor::White, ..style }
        }
    }
}

pub fn is_point_feature(tags: &Tags) -> bool {
    POINT_FEATURE_KEYS.iter().any(|key| tags.contains_key(*key))
}

/// Ways drawn as closed rings rather than open lines.
pub fn is_area(tags: &Tags) -> bool {
    tags.get("area").is_some_and(|value| value == "yes")
        || tags.contains_key("building")
        || tags.contains_key("landuse")
}

pub fn is_footpath(tags: &Tags) -> bool {
    tags.get("highway")
        .is_some_and(|value| FOOTPATH_HIGHWAYS.contains(&value.as_str()))
}
