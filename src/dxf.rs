//! ASCII DXF (AutoCAD 2000, `AC1015`) document: a layer table plus `CIRCLE` and
//! `LWPOLYLINE` entities in model space.
//!
//! The file carries the structure an R2000 reader expects: the symbol tables (including
//! `LTYPE` and `BLOCK_RECORD`), the `*Model_Space` and `*Paper_Space` blocks, and a root
//! dictionary in `OBJECTS`. Every record has a handle and an owner (group 330).

use std::fmt::Display;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use crate::data::osm::PlanarCoords;
use crate::data::style::AciColor;
use crate::errors::{Error, Result};

const ACAD_VERSION: &str = "AC1015";
const CODE_PAGE: &str = "ANSI_1252";
// $INSUNITS 6 = metres
const INSERT_UNITS: i16 = 6;
const DEFAULT_LAYER: &str = "0";
const CONTINUOUS: &str = "Continuous";
const MODEL_SPACE: &str = "*Model_Space";
const PAPER_SPACE: &str = "*Paper_Space";
// Owner of tables and the root dictionary.
const NO_OWNER: &str = "0";
// Group 370 values, hundredths of a millimetre.
const LINEWEIGHT_DEFAULT: i16 = -3;
const VALID_LINEWEIGHTS: [i16; 24] = [
    0, 5, 9, 13, 15, 18, 20, 25, 30, 35, 40, 50, 53, 60, 70, 80, 90, 100, 106, 120, 140, 158, 200, 211,
];

/// Nearest lineweight AutoCAD accepts for group 370. Ties go to the thinner weight.
/// `-1` (ByLayer), `-2` (ByBlock) and `-3` (Default) pass through.
pub fn standard_lineweight(weight: i16) -> i16 {
    if (-3..=-1).contains(&weight) {
        return weight;
    }
    if weight < 0 {
        return LINEWEIGHT_DEFAULT;
    }
    VALID_LINEWEIGHTS
        .iter()
        .copied()
        .min_by_key(|valid| (i32::from(*valid) - i32::from(weight)).abs())
        .unwrap_or(LINEWEIGHT_DEFAULT)
}

#[derive(Debug, Clone, PartialEq)]
pub struct Layer {
    pub name: String,
    pub color: AciColor,
    pub line_weight: i16,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Entity {
    Circle {
        center: PlanarCoords,
        radius: f64,
        layer: String,
    },
    Polyline {
        points: Vec<PlanarCoords>,
        closed: bool,
        layer: String,
    },
}

impl Entity {
    #[cfg(test)]
    pub fn layer(&self) -> &str {
        match self {
            Entity::Circle { layer, .. } => layer,
            Entity::Polyline { layer, .. } => layer,
        }
    }
}

#[derive(Debug, Default)]
pub struct DxfDocument {
    layers: Vec<Layer>,
    entities: Vec<Entity>,
}

impl DxfDocument {
    pub fn new() -> Self {
        DxfDocument::default()
    }

    /// Appends a layer table entry. Callers are responsible for not declaring a name twice.
    pub fn create_layer(&mut self, name: &str, color: AciColor, line_weight: i16) {
        self.layers.push(Layer {
            name: name.to_string(),
            color,
            line_weight,
        });
    }

    pub fn add_circle(&mut self, center: PlanarCoords, radius: f64, layer: &str) {
        self.entities.push(Entity::Circle {
            center,
            radius,
            layer: layer.to_string(),
        });
    }

    pub fn add_polyline(&mut self, points: Vec<PlanarCoords>, closed: bool, layer: &str) {
        self.entities.push(Entity::Polyline {
            points,
            closed,
            layer: layer.to_string(),
        });
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    pub fn entities(&self) -> &[Entity] {
        &self.entities
    }

    /// Writes the document to `path` and returns the size of the written file in bytes.
    pub fn save(&self, path: &Path) -> Result<u64> {
        let write_error = |err: io::Error| {
            Error::write(format!("Could not write {}: {}", path.display(), err))
        };

        let file = File::create(path).map_err(write_error)?;
        let mut out = BufWriter::new(file);
        self.write_to(&mut out).map_err(write_error)?;
        out.flush().map_err(write_error)?;

        let size = out.get_ref().metadata().map_err(write_error)?.len();
        Ok(size)
    }

    pub fn write_to<W: Write>(&self, mut out: W) -> io::Result<()> {
        // $HANDSEED must exceed every handle, so the body is rendered before the header.
        let mut body = DxfWriter::new(Vec::new());
        body.write_body(self)?;

        let mut header = DxfWriter::new(&mut out);
        header.section("HEADER")?;
        header.pair(9, "$ACADVER")?;
        header.pair(1, ACAD_VERSION)?;
        header.pair(9, "$DWGCODEPAGE")?;
        header.pair(3, CODE_PAGE)?;
        header.pair(9, "$HANDSEED")?;
        header.pair(5, format!("{:X}", body.next_handle))?;
        header.pair(9, "$INSUNITS")?;
        header.pair(70, INSERT_UNITS)?;
        header.end_section()?;

        out.write_all(&body.out)
    }
}

/// Handles of the two block records every drawing owns.
struct BlockRecords {
    model_space: String,
    paper_space: String,
}

struct DxfWriter<W: Write> {
    out: W,
    next_handle: usize,
}

impl<W: Write> DxfWriter<W> {
    fn new(out: W) -> Self {
        DxfWriter { out, next_handle: 1 }
    }

    fn pair(&mut self, code: u16, value: impl Display) -> io::Result<()> {
        write!(self.out, "{:>3}\n{}\n", code, value)
    }

    fn handle(&mut self) -> String {
        let handle = format!("{:X}", self.next_handle);
        self.next_handle += 1;
        handle
    }

    fn section(&mut self, name: &str) -> io::Result<()> {
        self.pair(0, "SECTION")?;
        self.pair(2, name)
    }

    fn end_section(&mut self) -> io::Result<()> {
        self.pair(0, "ENDSEC")
    }

    fn point(&mut self, coords: &PlanarCoords) -> io::Result<()> {
        self.pair(10, coords.x)?;
        self.pair(20, coords.y)
    }

    fn write_body(&mut self, doc: &DxfDocument) -> io::Result<()> {
        self.section("CLASSES")?;
        self.end_section()?;

        self.section("TABLES")?;
        let block_records = self.tables(doc)?;
        self.end_section()?;

        self.section("BLOCKS")?;
        self.block(&block_records.model_space, MODEL_SPACE, false)?;
        self.block(&block_records.paper_space, PAPER_SPACE, true)?;
        self.end_section()?;

        self.section("ENTITIES")?;
        for entity in &doc.entities {
            self.entity(entity, &block_records.model_space)?;
        }
        self.end_section()?;

        self.section("OBJECTS")?;
        self.objects()?;
        self.end_section()?;

        self.pair(0, "EOF")
    }

    /// Opens a symbol table and returns its handle, the owner of its records.
    fn table(&mut self, name: &str, entries: usize) -> io::Result<String> {
        let handle = self.handle();
        self.pair(0, "TABLE")?;
        self.pair(2, name)?;
        self.pair(5, &handle)?;
        self.pair(330, NO_OWNER)?;
        self.pair(100, "AcDbSymbolTable")?;
        self.pair(70, entries)?;
        Ok(handle)
    }

    fn end_table(&mut self) -> io::Result<()> {
        self.pair(0, "ENDTAB")
    }

    /// Common head of a symbol table record, returns the record's handle.
    fn record(&mut self, kind: &str, owner: &str, subclass: &str, name: &str) -> io::Result<String> {
        let handle = self.handle();
        self.pair(0, kind)?;
        self.pair(5, &handle)?;
        self.pair(330, owner)?;
        self.pair(100, "AcDbSymbolTableRecord")?;
        self.pair(100, subclass)?;
        self.pair(2, name)?;
        self.pair(70, 0)?;
        Ok(handle)
    }

    fn tables(&mut self, doc: &DxfDocument) -> io::Result<BlockRecords> {
        self.table("VPORT", 0)?;
        self.end_table()?;

        let ltype = self.table("LTYPE", 3)?;
        for name in ["ByBlock", "ByLayer", CONTINUOUS] {
            self.linetype(&ltype, name)?;
        }
        self.end_table()?;

        let layer_table = self.table("LAYER", doc.layers.len() + 1)?;
        self.layer(&layer_table, DEFAULT_LAYER, AciColor::White, LINEWEIGHT_DEFAULT)?;
        for layer in &doc.layers {
            self.layer(&layer_table, &layer.name, layer.color, layer.line_weight)?;
        }
        self.end_table()?;

        let style = self.table("STYLE", 1)?;
        self.record("STYLE", &style, "AcDbTextStyleTableRecord", "Standard")?;
        self.pair(40, 0.0)?;
        self.pair(41, 1.0)?;
        self.pair(50, 0.0)?;
        self.pair(71, 0)?;
        self.pair(42, 2.5)?;
        self.pair(3, "txt")?;
        self.pair(4, "")?;
        self.end_table()?;

        for empty in ["VIEW", "UCS"] {
            self.table(empty, 0)?;
            self.end_table()?;
        }

        let appid = self.table("APPID", 1)?;
        self.record("APPID", &appid, "AcDbRegAppTableRecord", "ACAD")?;
        self.end_table()?;

        self.dimstyle_table()?;

        let block_record = self.table("BLOCK_RECORD", 2)?;
        let model_space = self.record("BLOCK_RECORD", &block_record, "AcDbBlockTableRecord", MODEL_SPACE)?;
        let paper_space = self.record("BLOCK_RECORD", &block_record, "AcDbBlockTableRecord", PAPER_SPACE)?;
        self.end_table()?;

        Ok(BlockRecords { model_space, paper_space })
    }

    fn linetype(&mut self, owner: &str, name: &str) -> io::Result<()> {
        self.record("LTYPE", owner, "AcDbLinetypeTableRecord", name)?;
        self.pair(3, if name == CONTINUOUS { "Solid line" } else { "" })?;
        self.pair(72, 65)?;
        self.pair(73, 0)?;
        self.pair(40, 0.0)
    }

    fn layer(&mut self, owner: &str, name: &str, color: AciColor, line_weight: i16) -> io::Result<()> {
        self.record("LAYER", owner, "AcDbLayerTableRecord", name)?;
        self.pair(62, color.code())?;
        self.pair(6, CONTINUOUS)?;
        self.pair(370, standard_lineweight(line_weight))
    }

    // DIMSTYLE records use group 105 for their handle.
    fn dimstyle_table(&mut self) -> io::Result<()> {
        let table = self.table("DIMSTYLE", 1)?;
        self.pair(100, "AcDbDimStyleTable")?;
        self.pair(71, 0)?;

        let handle = self.handle();
        self.pair(0, "DIMSTYLE")?;
        self.pair(105, handle)?;
        self.pair(330, &table)?;
        self.pair(100, "AcDbSymbolTableRecord")?;
        self.pair(100, "AcDbDimStyleTableRecord")?;
        self.pair(2, "Standard")?;
        self.pair(70, 0)?;
        self.end_table()
    }

    fn block(&mut self, block_record: &str, name: &str, paper_space: bool) -> io::Result<()> {
        let handle = self.handle();
        self.pair(0, "BLOCK")?;
        self.pair(5, handle)?;
        self.pair(330, block_record)?;
        self.pair(100, "AcDbEntity")?;
        if paper_space {
            self.pair(67, 1)?;
        }
        self.pair(8, DEFAULT_LAYER)?;
        self.pair(100, "AcDbBlockBegin")?;
        self.pair(2, name)?;
        self.pair(70, 0)?;
        self.point(&PlanarCoords::new(0.0, 0.0))?;
        self.pair(30, 0.0)?;
        self.pair(3, name)?;
        self.pair(1, "")?;

        let handle = self.handle();
        self.pair(0, "ENDBLK")?;
        self.pair(5, handle)?;
        self.pair(330, block_record)?;
        self.pair(100, "AcDbEntity")?;
        if paper_space {
            self.pair(67, 1)?;
        }
        self.pair(8, DEFAULT_LAYER)?;
        self.pair(100, "AcDbBlockEnd")
    }

    fn entity_head(&mut self, kind: &str, owner: &str, layer: &str, subclass: &str) -> io::Result<()> {
        let handle = self.handle();
        self.pair(0, kind)?;
        self.pair(5, handle)?;
        self.pair(330, owner)?;
        self.pair(100, "AcDbEntity")?;
        self.pair(8, layer)?;
        self.pair(100, subclass)
    }

    fn entity(&mut self, entity: &Entity, owner: &str) -> io::Result<()> {
        match entity {
            Entity::Circle { center, radius, layer } => {
                self.entity_head("CIRCLE", owner, layer, "AcDbCircle")?;
                self.point(center)?;
                self.pair(30, 0.0)?;
                self.pair(40, radius)
            },
            Entity::Polyline { points, closed, layer } => {
                self.entity_head("LWPOLYLINE", owner, layer, "AcDbPolyline")?;
                self.pair(90, points.len())?;
                self.pair(70, if *closed { 1 } else { 0 })?;
                for point in points {
                    self.point(point)?;
                }
                Ok(())
            },
        }
    }

    /// Root dictionary with the empty `ACAD_GROUP` dictionary.
    fn objects(&mut self) -> io::Result<()> {
        let root = self.handle();
        let groups = self.handle();

        self.pair(0, "DICTIONARY")?;
        self.pair(5, &root)?;
        self.pair(330, NO_OWNER)?;
        self.pair(100, "AcDbDictionary")?;
        self.pair(281, 1)?;
        self.pair(3, "ACAD_GROUP")?;
        self.pair(350, &groups)?;

        self.pair(0, "DICTIONARY")?;
        self.pair(5, &groups)?;
        self.pair(330, &root)?;
        self.pair(100, "AcDbDictionary")?;
        self.pair(281, 1)
    }
}
