//!
//! # Oas21 Layout Data Model
//!
//! The in-memory tree shared by the GDSII and OASIS readers and writers:
//! [Library] at the root, [Cell] definitions below it, and geometric
//! primitives, labels, and cell [Reference]s at the leaves.
//!

use std::collections::{HashMap, HashSet};

use num_derive::FromPrimitive;
use serde::{Deserialize, Serialize};

use crate::geometry::Vec2;

/// Property name reserved for GDSII `PROPATTR`/`PROPVALUE` pairs.
/// Properties under this name carry exactly two values:
/// the unsigned attribute number and the attribute byte-string.
pub const GDS_PROPERTY_NAME: &str = "S_GDS_PROPERTY";

/// # Property Name
/// Either a resolved string or an OASIS `PROPNAME` table reference-number
/// awaiting resolution at the `END` record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PropName {
    Name(String),
    RefNum(u64),
}

/// # Property Value
/// One entry in a property's ordered value list.
/// `StringRef` is an unresolved OASIS `PROPSTRING` table reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PropertyValue {
    Real(f64),
    UnsignedInteger(u64),
    Integer(i64),
    Bytes(Vec<u8>),
    StringRef(u64),
}

/// # Property
/// A named, ordered list of values.
/// GDSII attaches these to elements as `(attr, value)` pairs under
/// [GDS_PROPERTY_NAME]; OASIS attaches arbitrary named value-lists to
/// nearly anything, including its name-table entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Property {
    pub name: PropName,
    pub values: Vec<PropertyValue>,
}

/// Append a GDSII-style property, stored under [GDS_PROPERTY_NAME]
/// as an (attribute, bytes) value pair.
pub fn set_gds_property(properties: &mut Vec<Property>, attr: u16, value: &[u8]) {
    properties.push(Property {
        name: PropName::Name(GDS_PROPERTY_NAME.to_string()),
        values: vec![
            PropertyValue::UnsignedInteger(attr as u64),
            PropertyValue::Bytes(value.to_vec()),
        ],
    });
}

/// Extract the GDSII-representable `(attr, value)` property pairs from `properties`.
/// Properties under any other name have no GDSII encoding and are skipped.
pub fn gds_properties(properties: &[Property]) -> Vec<(u16, &[u8])> {
    let mut pairs = Vec::new();
    for prop in properties {
        if let PropName::Name(ref name) = prop.name {
            if name == GDS_PROPERTY_NAME && prop.values.len() == 2 {
                if let (PropertyValue::UnsignedInteger(attr), PropertyValue::Bytes(bytes)) =
                    (&prop.values[0], &prop.values[1])
                {
                    pairs.push((*attr as u16, bytes.as_slice()));
                }
            }
        }
    }
    pairs
}

/// # Repetition
/// A regular or irregular multi-placement pattern shared by all element types.
/// The origin instance is always implied; [Repetition::get_size] counts it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub enum Repetition {
    #[default]
    None,
    /// Axis-aligned grid with per-axis spacing
    Rectangular { columns: u64, rows: u64, spacing: Vec2 },
    /// Grid spanned by two arbitrary vectors
    Regular { columns: u64, rows: u64, v1: Vec2, v2: Vec2 },
    /// Arbitrary displacements, excluding the implied origin instance
    Explicit { offsets: Vec<Vec2> },
}
impl Repetition {
    /// Total number of placements, including the origin instance.
    pub fn get_size(&self) -> u64 {
        match self {
            Repetition::None => 1,
            Repetition::Rectangular { columns, rows, .. }
            | Repetition::Regular { columns, rows, .. } => columns * rows,
            Repetition::Explicit { offsets } => offsets.len() as u64 + 1,
        }
    }
    /// All placement offsets relative to the element's own position,
    /// the implied `(0, 0)` origin instance first.
    pub fn offsets(&self) -> Vec<Vec2> {
        match self {
            Repetition::None => vec![Vec2::zero()],
            Repetition::Rectangular {
                columns,
                rows,
                spacing,
            } => {
                let mut offs = Vec::with_capacity((columns * rows) as usize);
                for j in 0..*rows {
                    for i in 0..*columns {
                        offs.push(Vec2::new(spacing.x * i as f64, spacing.y * j as f64));
                    }
                }
                offs
            }
            Repetition::Regular {
                columns,
                rows,
                v1,
                v2,
            } => {
                let mut offs = Vec::with_capacity((columns * rows) as usize);
                for j in 0..*rows {
                    for i in 0..*columns {
                        offs.push(*v1 * i as f64 + *v2 * j as f64);
                    }
                }
                offs
            }
            Repetition::Explicit { offsets } => {
                let mut offs = Vec::with_capacity(offsets.len() + 1);
                offs.push(Vec2::zero());
                offs.extend_from_slice(offsets);
                offs
            }
        }
    }
}

/// # Polygon
/// A closed point sequence on a single (layer, datatype).
/// The closing duplicate vertex is *not* stored;
/// GDSII I/O adds and removes it at the format boundary.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Polygon {
    pub points: Vec<Vec2>,
    pub layer: u32,
    pub datatype: u32,
    pub repetition: Repetition,
    pub properties: Vec<Property>,
}
impl Polygon {
    /// Create an axis-aligned rectangle spanning `corner1` to `corner2`.
    pub fn rectangle(corner1: Vec2, corner2: Vec2, layer: u32, datatype: u32) -> Polygon {
        Polygon {
            points: vec![
                corner1,
                Vec2::new(corner2.x, corner1.y),
                corner2,
                Vec2::new(corner1.x, corner2.y),
            ],
            layer,
            datatype,
            ..Default::default()
        }
    }
}

/// # Path End-Type
/// How a path's ends are capped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum EndType {
    #[default]
    Flush,
    Round,
    HalfWidth,
    /// Explicit per-end extensions, stored in `end_extensions`
    Extended,
}

/// # Path Element
/// One of a path's parallel strands, carrying its own layer pair,
/// per-spine-point half-width-and-offset profile, and end treatment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PathElement {
    pub layer: u32,
    pub datatype: u32,
    /// Per-spine-point `(half_width, center_offset)` pairs
    pub half_width_and_offset: Vec<Vec2>,
    pub end_type: EndType,
    /// Begin / end extensions, used when `end_type` is [EndType::Extended]
    pub end_extensions: Vec2,
}

/// # Flex Path
/// A piecewise-linear path spine with one or more parallel [PathElement]s.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FlexPath {
    pub spine: Vec<Vec2>,
    pub elements: Vec<PathElement>,
    /// Emit as a native format path record; tessellate to polygons otherwise
    pub gdsii_path: bool,
    /// GDSII `WIDTH` sign convention: `false` marks the width absolute
    pub scale_width: bool,
    /// Curve-approximation tolerance, in user units
    pub tolerance: f64,
    pub repetition: Repetition,
    pub properties: Vec<Property>,
}
impl FlexPath {
    /// Append `points` to the path spine.
    /// When `relative`, each point is taken relative to the current spine end.
    /// Element width profiles are extended by replicating their last entry.
    pub fn segment(&mut self, points: &[Vec2], relative: bool) {
        let offset = if relative {
            self.spine.last().copied().unwrap_or_default()
        } else {
            Vec2::zero()
        };
        for point in points {
            self.spine.push(offset + *point);
        }
        for element in self.elements.iter_mut() {
            let last = element
                .half_width_and_offset
                .last()
                .copied()
                .unwrap_or_default();
            for _ in 0..points.len() {
                element.half_width_and_offset.push(last);
            }
        }
    }
}

/// # Robust Path
/// The robust sibling of [FlexPath]: same spine-and-elements shape,
/// kept separate so cells preserve which construction produced them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RobustPath {
    pub spine: Vec<Vec2>,
    pub elements: Vec<PathElement>,
    pub gdsii_path: bool,
    pub scale_width: bool,
    pub tolerance: f64,
    pub repetition: Repetition,
    pub properties: Vec<Property>,
}

/// # Reference Target
/// What a [Reference] points at.
/// `Cell` and `RawCell` are resolved indices into the owning [Library]'s arrays;
/// `Name` and `RefNum` await the end-of-parse fix-up pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RefTarget {
    Cell(usize),
    RawCell(usize),
    Name(String),
    RefNum(u64),
}

/// # Reference (Cell Instance)
/// An instantiation of one cell inside another,
/// optionally arrayed through its [Repetition].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reference {
    pub target: RefTarget,
    pub origin: Vec2,
    pub magnification: f64,
    /// Rotation in radians, counter-clockwise
    pub rotation: f64,
    pub x_reflection: bool,
    pub repetition: Repetition,
    pub properties: Vec<Property>,
}
impl Reference {
    pub fn new(target: RefTarget) -> Reference {
        Reference {
            target,
            origin: Vec2::zero(),
            magnification: 1.0,
            rotation: 0.0,
            x_reflection: false,
            repetition: Repetition::None,
            properties: Vec::new(),
        }
    }
}

/// # Label Anchor
/// Nine-way text anchoring, with values matching the low nibble
/// of the GDSII `PRESENTATION` record.
#[derive(
    FromPrimitive, Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize,
)]
pub enum Anchor {
    NW = 0,
    N = 1,
    NE = 2,
    W = 4,
    #[default]
    O = 5,
    E = 6,
    SW = 8,
    S = 9,
    SE = 10,
}

/// # Label Text
/// Either literal text or an OASIS `TEXTSTRING` table reference-number
/// awaiting resolution at the `END` record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TextSource {
    Literal(String),
    RefNum(u64),
}

/// # Text Label
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Label {
    pub text: TextSource,
    pub layer: u32,
    pub texttype: u32,
    pub origin: Vec2,
    pub anchor: Anchor,
    /// Rotation in radians, counter-clockwise
    pub rotation: f64,
    pub magnification: f64,
    pub x_reflection: bool,
    pub repetition: Repetition,
    pub properties: Vec<Property>,
}
impl Label {
    pub fn new(text: impl Into<String>) -> Label {
        Label {
            text: TextSource::Literal(text.into()),
            layer: 0,
            texttype: 0,
            origin: Vec2::zero(),
            anchor: Anchor::O,
            rotation: 0.0,
            magnification: 1.0,
            x_reflection: false,
            repetition: Repetition::None,
            properties: Vec::new(),
        }
    }
}

/// # Cell Definition
/// A named container of geometry, labels, and references to other cells,
/// forming one node of the layout hierarchy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Cell {
    pub name: String,
    pub polygons: Vec<Polygon>,
    pub flexpaths: Vec<FlexPath>,
    pub robustpaths: Vec<RobustPath>,
    pub references: Vec<Reference>,
    pub labels: Vec<Label>,
    pub properties: Vec<Property>,
}
impl Cell {
    /// Create a new and empty [Cell]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
    /// Collect the library-array indices of cells and raw cells this cell
    /// directly instantiates. Unresolved name targets are looked up in `by_name`.
    pub fn get_dependencies(
        &self,
        by_name: &HashMap<&str, usize>,
        cells: &mut HashSet<usize>,
        rawcells: &mut HashSet<usize>,
    ) {
        for reference in self.references.iter() {
            match reference.target {
                RefTarget::Cell(idx) => {
                    cells.insert(idx);
                }
                RefTarget::RawCell(idx) => {
                    rawcells.insert(idx);
                }
                RefTarget::Name(ref name) => {
                    if let Some(idx) = by_name.get(name.as_str()) {
                        cells.insert(*idx);
                    }
                }
                RefTarget::RefNum(_) => (),
            }
        }
    }
}

/// # Raw Cell
/// An opaque, pre-encoded GDSII cell blob, re-emitted verbatim by the
/// GDSII writer. OASIS cannot represent these.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawCell {
    pub name: String,
    pub bytes: Vec<u8>,
}

/// # Library
///
/// The root of the layout tree, corresponding one-to-one with a `.gds`
/// or `.oas` file on disk. A library owns its [Cell] definitions and its
/// two length-units: `unit` is the size of a user unit in meters, and
/// `precision` the size of a database unit in meters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Library {
    pub name: String,
    /// Meters per user unit
    pub unit: f64,
    /// Meters per database unit
    pub precision: f64,
    pub cells: Vec<Cell>,
    pub rawcells: Vec<RawCell>,
    pub properties: Vec<Property>,
}
impl Library {
    /// Create a new and empty [Library]
    pub fn new(name: impl Into<String>, unit: f64, precision: f64) -> Self {
        Self {
            name: name.into(),
            unit,
            precision,
            cells: Vec::new(),
            rawcells: Vec::new(),
            properties: Vec::new(),
        }
    }
    /// Check the library units satisfy `0 < precision <= unit`.
    pub(crate) fn check_units(&self) -> crate::OasResult<()> {
        if self.precision > 0.0 && self.unit >= self.precision {
            Ok(())
        } else {
            Err(crate::OasError::InvalidUnits {
                unit: self.unit,
                precision: self.precision,
            })
        }
    }
    /// Find the index of the cell named `name`, if any.
    pub fn cell_index(&self, name: &str) -> Option<usize> {
        self.cells.iter().position(|cell| cell.name == name)
    }
    /// Map from cell name to index in [Library::cells].
    pub(crate) fn cell_map(&self) -> HashMap<&str, usize> {
        self.cells
            .iter()
            .enumerate()
            .map(|(idx, cell)| (cell.name.as_str(), idx))
            .collect()
    }
    /// Compute the top-level cells and raw cells:
    /// those not instantiated by any other cell in the library.
    /// Returns their indices into [Library::cells] and [Library::rawcells].
    pub fn top_level(&self) -> (Vec<usize>, Vec<usize>) {
        let by_name = self.cell_map();
        let mut cell_deps = HashSet::new();
        let mut rawcell_deps = HashSet::new();
        for cell in self.cells.iter() {
            cell.get_dependencies(&by_name, &mut cell_deps, &mut rawcell_deps);
        }
        let top_cells = (0..self.cells.len())
            .filter(|idx| !cell_deps.contains(idx))
            .collect();
        let top_rawcells = (0..self.rawcells.len())
            .filter(|idx| !rawcell_deps.contains(idx))
            .collect();
        (top_cells, top_rawcells)
    }
}
impl Default for Library {
    /// Default library: micron user units on a nanometer grid.
    fn default() -> Self {
        Self::new("", 1e-6, 1e-9)
    }
}
