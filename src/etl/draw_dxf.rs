use std::fs;
use std::path::{Path, PathBuf};

use log::info;
use rkyv::AlignedVec;

use crate::UserConfig;
use crate::data::OsmMapData;
use crate::dxf_gen::DxfGenerator;
use crate::errors::{Error, Result};
use crate::etl::parse_osm::ParseOsmEtl;
use crate::projection::Projection;

use super::Etl;

pub const ETL_NAME: &str = "draw_dxf";

/// Figures reported once a conversion has been written.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ConversionStats {
    pub nodes: usize,
    pub ways: usize,
    pub relations: usize,
    pub layers: usize,
    pub markers: usize,
    pub polylines: usize,
    pub output_bytes: u64,
}

pub struct Output {
    generator: DxfGenerator<Projection>,
    stats: ConversionStats,
}

/// Loads the OSM data cached by `parse_osm`.
pub fn read_cache(dir: &Path) -> Result<OsmMapData> {
    let raw = fs::read(ParseOsmEtl::output_path(dir))?;
    let mut bytes = AlignedVec::with_capacity(raw.len());
    bytes.extend_from_slice(&raw);

    rkyv::from_bytes::<OsmMapData>(&bytes)
        .map_err(|err| Error::parse(format!("Corrupt OSM cache, rerun without cache: {:?}", err)))
}

pub struct DrawDxfEtl<'a> {
    config: &'a UserConfig,
    projection: Projection,
    stats: Option<ConversionStats>,
}

impl DrawDxfEtl<'_> {
    pub fn new(config: &UserConfig) -> Result<DrawDxfEtl<'_>> {
        let projection = Projection::from_code(&config.projection)?;
        Ok(DrawDxfEtl {
            config,
            projection,
            stats: None,
        })
    }

    fn output_path(&self) -> PathBuf {
        self.config.output_path()
    }

    /// Set once the DXF file has been written.
    pub fn stats(&self) -> Option<ConversionStats> {
        self.stats
    }
}

impl Etl for DrawDxfEtl<'_> {
    type Input = OsmMapData;
    type Output = Output;

    fn etl_name(&self) -> &str {
        ETL_NAME
    }

    // Output depends on projection and plan, which are not part of the cache key.
    fn is_cached(&self, _dir: &Path) -> Result<bool> {
        Ok(false)
    }

    fn clean(&self, _dir: &Path) -> Result<()> {
        let path = self.output_path();
        if path.exists() {
            fs::remove_file(path)?;
        }
        Ok(())
    }

    fn extract(&mut self, dir: &Path) -> Result<Self::Input> {
        read_cache(dir)
    }

    fn transform(&mut self, mut input: Self::Input) -> Result<Self::Output> {
        info!(
            etl_name = ETL_NAME,
            projection = self.projection.epsg(),
            use_colors = self.config.effective_use_colors();
            "Generating DXF"
        );
        let mut generator = DxfGenerator::new(
            self.projection,
            self.config.effective_use_colors(),
            self.config.feature_filter(),
        );
        generator.convert(&mut input)?;

        let stats = ConversionStats {
            nodes: input.nodes.len(),
            ways: input.ways.len(),
            relations: input.relations.len(),
            layers: generator.layer_count(),
            markers: generator.marker_count(),
            polylines: generator.polyline_count(),
            output_bytes: 0,
        };
        Ok(Output { generator, stats })
    }

    fn load(&mut self, _dir: &Path, output: Self::Output) -> Result<()> {
        let output_bytes = output.generator.save(&self.output_path())?;
        self.stats = Some(ConversionStats { output_bytes, ..output.stats });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PlanType;
    use crate::data::style::AciColor;
    use crate::dxf::Entity;
    use crate::errors::ErrorKind;

    const SAMPLE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<osm version="0.6">
  <node id="1" lat="51.5000" lon="-0.1000"/>
  <node id="2" lat="51.5000" lon="-0.0990"/>
  <node id="3" lat="51.5010" lon="-0.0990">
    <tag k="amenity" v="pub"/>
  </node>
  <way id="10">
    <nd ref="1"/><nd ref="2"/><nd ref="3"/>
    <tag k="building" v="yes"/>
  </way>
  <way id="11">
    <nd ref="1"/><nd ref="3"/>
    <tag k="highway" v="footway"/>
  </way>
  <way id="12">
    <nd ref="2"/><nd ref="404"/>
    <tag k="highway" v="primary"/>
  </way>
  <relation id="20">
    <member type="way" ref="10" role="outer"/>
  </relation>
</osm>
"#;

    fn workspace(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("osm_to_dxf_{}_{}", name, std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn run(dir: &Path, config: &UserConfig) -> ConversionStats {
        ParseOsmEtl::new(config).process(dir).unwrap();
        let mut etl = DrawDxfEtl::new(config).unwrap();
        etl.process(dir).unwrap();
        etl.stats().unwrap()
    }

    #[test]
    fn converts_cached_osm_to_dxf() {
        let dir = workspace("draw");
        let input = dir.join("sample.osm");
        fs::write(&input, SAMPLE).unwrap();
        let config = UserConfig {
            data_path: input.display().to_string(),
            use_cache: false,
            ..UserConfig::default()
        };

        let stats = run(&dir, &config);
        assert_eq!(stats.nodes, 3);
        assert_eq!(stats.ways, 3);
        assert_eq!(stats.relations, 1);
        assert_eq!(stats.markers, 1);
        assert_eq!(stats.polylines, 2);
        // AMENITY, BUILDING, HIGHWAY_FOOTWAY
        assert_eq!(stats.layers, 3);

        let output = dir.join("sample.dxf");
        assert_eq!(fs::metadata(&output).unwrap().len(), stats.output_bytes);
        let text = fs::read_to_string(&output).unwrap();
        assert!(text.contains("BUILDING"));
        assert!(text.contains("LWPOLYLINE"));
        assert!(text.contains("CIRCLE"));
        assert!(!text.contains("HIGHWAY_PRIMARY"));

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn key_plan_is_monochrome_without_footpaths() {
        let dir = workspace("key_plan");
        let input = dir.join("sample.osm");
        fs::write(&input, SAMPLE).unwrap();
        let config = UserConfig {
            data_path: input.display().to_string(),
            plan: Some(PlanType::KeyPlan),
            projection: "EPSG:32630".to_string(),
            ..UserConfig::default()
        };

        ParseOsmEtl::new(&config).process(&dir).unwrap();
        let mut etl = DrawDxfEtl::new(&config).unwrap();
        let data = etl.extract(&dir).unwrap();
        let output = etl.transform(data).unwrap();

        let doc = output.generator.document();
        assert!(doc.layers().iter().all(|layer| layer.color == AciColor::White));
        assert!(doc.entities().iter().all(|entity| entity.layer() != "HIGHWAY_FOOTWAY"));
        assert_eq!(output.stats.polylines, 1);
        match doc.entities().iter().find(|entity| entity.layer() == "BUILDING") {
            Some(Entity::Polyline { points, closed, .. }) => {
                assert!(closed);
                assert_eq!(points.len(), 4);
                // UTM eastings are around the false easting, not degrees
                assert!(points[0].x > 100_000.0);
            },
            other => panic!("unexpected entity {:?}", other),
        }

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn unsupported_projection_fails_early() {
        let config = UserConfig {
            projection: "EPSG:27700".to_string(),
            ..UserConfig::default()
        };
        let err = DrawDxfEtl::new(&config).err().unwrap();
        assert_eq!(err.kind, ErrorKind::Projection);
    }

    #[test]
    fn corrupt_cache_is_reported() {
        let dir = workspace("corrupt");
        fs::write(ParseOsmEtl::output_path(&dir), b"definitely not rkyv").unwrap();
        let err = read_cache(&dir).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Parse);
        fs::remove_dir_all(&dir).unwrap();
    }
}
