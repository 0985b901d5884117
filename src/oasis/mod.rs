//!
//! # OASIS Format Support
//!
//! Record and data-type identifiers, and the modal-variable state the
//! format's decoder and encoder carry between records.
//!

use num_derive::FromPrimitive;

use crate::data::{PropName, PropertyValue, RefTarget, Repetition, TextSource};
use crate::geometry::Vec2;

pub mod codec;
pub mod read;
pub mod write;

/// The mandatory file magic, ending in the `START` record byte
pub const OASIS_MAGIC: &[u8; 14] = b"%SEMI-OASIS\r\n\x01";
/// The sole supported format version
pub const OASIS_VERSION: &[u8; 3] = b"1.0";

///
/// # Oasis Record Types
///
/// In the numeric order assigned by the OASIS specification,
/// for automatic [FromPrimitive](num_traits::FromPrimitive) conversions.
///
#[derive(FromPrimitive, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OasisRecordType {
    Pad = 0,
    Start,
    End,
    CellnameImplicit,
    Cellname,
    TextstringImplicit,
    Textstring,
    PropnameImplicit,
    Propname,
    PropstringImplicit,
    Propstring,
    LayernameData,
    LayernameText,
    CellRefNum,
    Cell,
    XyAbsolute,
    XyRelative,
    Placement,
    PlacementTransform,
    Text,
    Rectangle,
    Polygon,
    Path,
    TrapezoidAb,
    TrapezoidA,
    TrapezoidB,
    Ctrapezoid,
    Circle,
    Property,
    LastProperty,
    XnameImplicit,
    Xname,
    Xelement,
    Xgeometry,
    Cblock,
}

///
/// # Oasis Property-Value Data Types
///
/// The leading tag of each property value, selecting one of the
/// eight real encodings, an integer, a string, or a string-table reference.
///
#[derive(FromPrimitive, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OasisDataType {
    RealPositiveInteger = 0,
    RealNegativeInteger,
    RealPositiveReciprocal,
    RealNegativeReciprocal,
    RealPositiveRatio,
    RealNegativeRatio,
    RealFloat,
    RealDouble,
    UnsignedInteger,
    SignedInteger,
    AString,
    BString,
    NString,
    ReferenceA,
    ReferenceB,
    ReferenceN,
}

/// # Oasis Modal State
///
/// The decoder state the format carries across records.
/// Each element record's info-byte selects which of these to overwrite
/// before the element is constructed from the post-update values;
/// unset bits reuse whatever an earlier record left behind.
#[derive(Debug, Clone)]
pub struct ModalState {
    /// Positions are absolute; `XYRELATIVE` makes them accumulate instead
    pub absolute_pos: bool,
    pub layer: u32,
    pub datatype: u32,
    pub textlayer: u32,
    pub texttype: u32,
    pub placement_pos: Vec2,
    pub text_pos: Vec2,
    pub geom_pos: Vec2,
    pub geom_dim: Vec2,
    pub repetition: Repetition,
    pub text_string: Option<TextSource>,
    pub placement_cell: Option<RefTarget>,
    pub polygon_points: Vec<Vec2>,
    pub path_points: Vec<Vec2>,
    pub path_halfwidth: f64,
    pub path_extensions: Vec2,
    pub ctrapezoid_type: u8,
    pub circle_radius: f64,
    /// Last property name, and whether it is still an unresolved reference
    pub property_name: Option<PropName>,
    pub property_values: Option<Vec<PropertyValue>>,
}
impl Default for ModalState {
    fn default() -> Self {
        Self {
            absolute_pos: true,
            layer: 0,
            datatype: 0,
            textlayer: 0,
            texttype: 0,
            placement_pos: Vec2::zero(),
            text_pos: Vec2::zero(),
            geom_pos: Vec2::zero(),
            geom_dim: Vec2::zero(),
            repetition: Repetition::None,
            text_string: None,
            placement_cell: None,
            polygon_points: Vec::new(),
            path_points: Vec::new(),
            path_halfwidth: 0.0,
            path_extensions: Vec2::zero(),
            ctrapezoid_type: 0,
            circle_radius: 0.0,
            property_name: None,
            property_values: None,
        }
    }
}
impl ModalState {
    /// Re-establish the state every `CELL` / `CELL_REF_NUM` record guarantees:
    /// absolute positioning with all position registers back at the origin.
    pub fn reset_cell(&mut self) {
        self.absolute_pos = true;
        self.placement_pos = Vec2::zero();
        self.text_pos = Vec2::zero();
        self.geom_pos = Vec2::zero();
    }
    /// Combine a freshly-read displacement with a position register,
    /// replacing or accumulating per the absolute/relative mode.
    pub fn update_pos(absolute: bool, register: &mut f64, value: f64) {
        if absolute {
            *register = value;
        } else {
            *register += value;
        }
    }
}
