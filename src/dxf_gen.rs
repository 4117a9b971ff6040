use std::collections::{HashMap, HashSet};
use std::path::Path;

use log::{debug, info, warn};

use crate::data::OsmMapData;
use crate::data::osm::{Node, OsmId, PlanarCoords, Way};
use crate::data::style::{is_area, is_footpath, is_point_feature, LayerMapper, LayerStyle};
use crate::dxf::DxfDocument;
use crate::errors::Result;
use crate::projection::Project;

/// Radius of the circle drawn for point features, in target units.
pub const MARKER_RADIUS: f64 = 5.0;

/// Ring endpoints closer than this are considered already closed.
pub const CLOSURE_EPSILON: f64 = 1e-9;

/// Remembers which layers were declared to a document so each is created once. The first
/// style registered under a name wins.
#[derive(Debug, Default)]
pub struct LayerRegistry {
    created: HashSet<&'static str>,
}

impl LayerRegistry {
    pub fn new() -> Self {
        LayerRegistry::default()
    }

    /// Returns true if the layer was created by this call.
    pub fn ensure_layer(&mut self, doc: &mut DxfDocument, style: &LayerStyle) -> bool {
        if !self.created.insert(style.layer_name) {
            return false;
        }
        doc.create_layer(style.layer_name, style.color, style.line_weight);
        true
    }

    pub fn len(&self) -> usize {
        self.created.len()
    }

    pub fn is_empty(&self) -> bool {
        self.created.is_empty()
    }
}

/// Which optional feature groups end up in the drawing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureFilter {
    pub include_footpaths: bool,
}

impl Default for FeatureFilter {
    fn default() -> Self {
        FeatureFilter {
            include_footpaths: true,
        }
    }
}

impl FeatureFilter {
    fn accepts(&self, way: &Way) -> bool {
        self.include_footpaths || !is_footpath(&way.tags)
    }
}

/// Turns projected OSM nodes and ways into DXF circles and polylines on classified layers.
pub struct DxfGenerator<P: Project> {
    doc: DxfDocument,
    layer_mapper: LayerMapper,
    projector: P,
    layers: LayerRegistry,
    filter: FeatureFilter,
    markers: usize,
    polylines: usize,
}

impl<P: Project> DxfGenerator<P> {
    pub fn new(projector: P, use_colors: bool, filter: FeatureFilter) -> Self {
        DxfGenerator {
            doc: DxfDocument::new(),
            layer_mapper: LayerMapper::new(use_colors),
            projector,
            layers: LayerRegistry::new(),
            filter,
            markers: 0,
            polylines: 0,
        }
    }

    /// Runs both passes in the order geometry depends on.
    pub fn convert(&mut self, data: &mut OsmMapData) -> Result<()> {
        self.process_nodes(&mut data.nodes)?;
        self.process_ways(&data.ways, &data.nodes);
        if self.layers.is_empty() {
            warn!(nodes = data.nodes.len(), ways = data.ways.len(); "No drawable features found");
        }
        Ok(())
    }

    /// Projects every node, then draws a marker for each point feature. Fails on the first
    /// coordinate that cannot be projected, before anything is drawn.
    pub fn process_nodes(&mut self, nodes: &mut HashMap<OsmId, Node>) -> Result<()> {
        info!(nodes = nodes.len(); "Processing nodes");

        for node in nodes.values_mut() {
            if node.projected.is_none() {
                node.projected = Some(self.projector.project(node.lon, node.lat)?);
            }
        }

        let mut ids: Vec<OsmId> = nodes.iter()
            .filter(|(_, node)| is_point_feature(&node.tags))
            .map(|(id, _)| *id)
            .collect();
        ids.sort_unstable();

        for id in ids {
            let Some(node) = nodes.get(&id) else { continue };
            let Some(center) = node.projected else { continue };
            let style = self.layer_mapper.classify(&node.tags);
            self.layers.ensure_layer(&mut self.doc, &style);
            self.doc.add_circle(center, MARKER_RADIUS, style.layer_name);
            self.markers += 1;
        }
        Ok(())
    }

    /// Draws every tagged way as an open polyline or a closed ring. Ways that resolve to
    /// fewer than two projected nodes are skipped.
    pub fn process_ways(&mut self, ways: &[Way], nodes: &HashMap<OsmId, Node>) {
        info!(ways = ways.len(); "Processing ways");

        for way in ways {
            if way.tags.is_empty() || !self.filter.accepts(way) {
                continue;
            }

            let mut coordinates = resolve_coordinates(way, nodes);
            if coordinates.len() < 2 {
                debug!(way_id = way.id, resolved = coordinates.len(); "Skipping way without enough nodes");
                continue;
            }

            let style = self.layer_mapper.classify(&way.tags);
            self.layers.ensure_layer(&mut self.doc, &style);

            let closed = is_area(&way.tags);
            if closed {
                close_ring(&mut coordinates);
            }
            self.doc.add_polyline(coordinates, closed, style.layer_name);
            self.polylines += 1;
        }
    }

    pub fn save(&self, path: &Path) -> Result<u64> {
        let size = self.doc.save(path)?;
        let path_str = path.display().to_string();
        info!(
            path = path_str.as_str(),
            bytes = size,
            layers = self.doc.layers().len(),
            entities = self.doc.entities().len();
            "DXF file saved"
        );
        Ok(size)
    }

    pub fn layer_count(&self) -> usize {
        self.layers.len()
    }

    pub fn marker_count(&self) -> usize {
        self.markers
    }

    pub fn polyline_count(&self) -> usize {
        self.polylines
    }

    #[cfg(test)]
    pub fn document(&self) -> &DxfDocument {
        &self.doc
    }
}

/// Projected coordinates of the way's nodes in order, leaving out unknown ids.
fn resolve_coordinates(way: &Way, nodes: &HashMap<OsmId, Node>) -> Vec<PlanarCoords> {
    way.node_ids.iter()
        .filter_map(|id| nodes.get(id))
        .filter_map(|node| node.projected)
        .collect()
}

fn close_ring(coordinates: &mut Vec<PlanarCoords>) {
    if let (Some(first), Some(last)) = (coordinates.first(), coordinates.last()) {
        if first.distance(last) > CLOSURE_EPSILON {
            let first = *first;
            coordinates.push(first);
        }
    }
}
