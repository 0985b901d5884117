//!
//! # OASIS Reading
//!
//! A single-pass modal parser over the record stream, followed by the
//! `END`-record fix-up pass that resolves forward references into the
//! cell, text-string, property-name, and property-string tables.
//!

use std::collections::HashMap;
use std::f64::consts::PI;
use std::fs::File;
use std::io::{BufReader, Read, Seek};
use std::path::Path;

use num_traits::FromPrimitive;

use super::codec::OasisReader;
use super::{ModalState, OasisDataType, OasisRecordType, OASIS_MAGIC, OASIS_VERSION};
use crate::data::{
    Cell, EndType, FlexPath, Label, Library, PathElement, Polygon, PropName, Property,
    PropertyValue, RefTarget, Reference, TextSource,
};
use crate::geometry::{self, Vec2};
use crate::{OasError, OasResult};

/// One entry of a name table: its byte string plus any properties
/// attached by `PROPERTY` records following its defining record.
#[derive(Debug, Default)]
struct NameEntry {
    bytes: Vec<u8>,
    properties: Vec<Property>,
}

/// Where the next `PROPERTY` record attaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PropTarget {
    Library,
    Cell,
    Polygon,
    FlexPath,
    Reference,
    Label,
    CellName(usize),
    TextString(usize),
    PropName(usize),
    PropString(usize),
}

/// Store `bytes` at table slot `index`, growing the table with empty
/// entries as needed.
fn set_table_entry(table: &mut Vec<NameEntry>, index: u64, bytes: Vec<u8>) -> usize {
    let index = index as usize;
    while table.len() <= index {
        table.push(NameEntry::default());
    }
    table[index] = NameEntry {
        bytes,
        properties: Vec::new(),
    };
    index
}

struct OasParser<R: Read + Seek> {
    s: OasisReader<R>,
    library: Library,
    /// Conversion factor from database units into user units
    factor: f64,
    tolerance: f64,
    modal: ModalState,
    target: PropTarget,
    cell_names: Vec<NameEntry>,
    text_strings: Vec<NameEntry>,
    prop_names: Vec<NameEntry>,
    prop_strings: Vec<NameEntry>,
    /// Stashed `CELL_REF_NUM` numbers, parallel to `library.cells`
    cell_ref_nums: Vec<Option<u64>>,
}

impl<R: Read + Seek> OasParser<R> {
    fn run(&mut self) -> OasResult<()> {
        while let Some(byte) = self.s.read_record_byte()? {
            let record = match OasisRecordType::from_u8(byte) {
                Some(record) => record,
                None => {
                    log::error!("Unknown OASIS record type 0x{:02X}", byte);
                    return Err(OasError::InvalidRecordType(byte));
                }
            };
            match record {
                OasisRecordType::Pad => (),
                OasisRecordType::Start => {
                    log::warn!("Unexpected START record out of position in file");
                }
                OasisRecordType::End => {
                    self.resolve();
                    self.s.seek_end()?;
                    return Ok(());
                }
                OasisRecordType::CellnameImplicit => {
                    let bytes = self.s.read_string()?;
                    self.cell_names.push(NameEntry {
                        bytes,
                        properties: Vec::new(),
                    });
                    self.target = PropTarget::CellName(self.cell_names.len() - 1);
                }
                OasisRecordType::Cellname => {
                    let bytes = self.s.read_string()?;
                    let num = self.s.read_unsigned()?;
                    let idx = set_table_entry(&mut self.cell_names, num, bytes);
                    self.target = PropTarget::CellName(idx);
                }
                OasisRecordType::TextstringImplicit => {
                    let bytes = self.s.read_string()?;
                    self.text_strings.push(NameEntry {
                        bytes,
                        properties: Vec::new(),
                    });
                    self.target = PropTarget::TextString(self.text_strings.len() - 1);
                }
                OasisRecordType::Textstring => {
                    let bytes = self.s.read_string()?;
                    let num = self.s.read_unsigned()?;
                    let idx = set_table_entry(&mut self.text_strings, num, bytes);
                    self.target = PropTarget::TextString(idx);
                }
                OasisRecordType::PropnameImplicit => {
                    let bytes = self.s.read_string()?;
                    self.prop_names.push(NameEntry {
                        bytes,
                        properties: Vec::new(),
                    });
                    self.target = PropTarget::PropName(self.prop_names.len() - 1);
                }
                OasisRecordType::Propname => {
                    let bytes = self.s.read_string()?;
                    let num = self.s.read_unsigned()?;
                    let idx = set_table_entry(&mut self.prop_names, num, bytes);
                    self.target = PropTarget::PropName(idx);
                }
                OasisRecordType::PropstringImplicit => {
                    let bytes = self.s.read_string()?;
                    self.prop_strings.push(NameEntry {
                        bytes,
                        properties: Vec::new(),
                    });
                    self.target = PropTarget::PropString(self.prop_strings.len() - 1);
                }
                OasisRecordType::Propstring => {
                    let bytes = self.s.read_string()?;
                    let num = self.s.read_unsigned()?;
                    let idx = set_table_entry(&mut self.prop_strings, num, bytes);
                    self.target = PropTarget::PropString(idx);
                }
                OasisRecordType::LayernameData | OasisRecordType::LayernameText => {
                    // Unused record: consume its name and two layer intervals
                    self.s.read_string()?;
                    for _ in 0..2 {
                        let interval = self.s.read_unsigned()?;
                        if interval > 0 {
                            if interval == 4 {
                                self.s.read_unsigned()?;
                            }
                            self.s.read_unsigned()?;
                        }
                    }
                }
                OasisRecordType::CellRefNum | OasisRecordType::Cell => {
                    let mut cell = Cell::default();
                    let ref_num = if record == OasisRecordType::CellRefNum {
                        Some(self.s.read_unsigned()?)
                    } else {
                        cell.name = self.read_text()?;
                        None
                    };
                    self.library.cells.push(cell);
                    self.cell_ref_nums.push(ref_num);
                    self.target = PropTarget::Cell;
                    self.modal.reset_cell();
                }
                OasisRecordType::XyAbsolute => self.modal.absolute_pos = true,
                OasisRecordType::XyRelative => self.modal.absolute_pos = false,
                OasisRecordType::Placement => self.placement(false)?,
                OasisRecordType::PlacementTransform => self.placement(true)?,
                OasisRecordType::Text => self.text()?,
                OasisRecordType::Rectangle => self.rectangle()?,
                OasisRecordType::Polygon => self.polygon()?,
                OasisRecordType::Path => self.path()?,
                OasisRecordType::TrapezoidAb => self.trapezoid(true, true)?,
                OasisRecordType::TrapezoidA => self.trapezoid(true, false)?,
                OasisRecordType::TrapezoidB => self.trapezoid(false, true)?,
                OasisRecordType::Ctrapezoid => self.ctrapezoid()?,
                OasisRecordType::Circle => self.circle()?,
                OasisRecordType::Property => self.property(false)?,
                OasisRecordType::LastProperty => self.property(true)?,
                OasisRecordType::XnameImplicit => {
                    self.s.read_unsigned()?;
                    self.s.read_string()?;
                    log::warn!("Record type XNAME ignored");
                }
                OasisRecordType::Xname => {
                    self.s.read_unsigned()?;
                    self.s.read_string()?;
                    self.s.read_unsigned()?;
                    log::warn!("Record type XNAME ignored");
                }
                OasisRecordType::Xelement => {
                    self.s.read_unsigned()?;
                    self.s.read_string()?;
                    log::warn!("Record type XELEMENT ignored");
                }
                OasisRecordType::Xgeometry => self.xgeometry()?,
                OasisRecordType::Cblock => {
                    let compression = self.s.read_unsigned()?;
                    if compression != 0 {
                        log::warn!("CBLOCK compression method {} not supported", compression);
                        self.s.read_unsigned()?;
                        let compressed = self.s.read_unsigned()?;
                        self.s.skip(compressed)?;
                    } else {
                        self.s.inflate_cblock()?;
                    }
                }
            }
        }
        log::error!("OASIS input ended without an END record");
        Err(OasError::Decode)
    }

    /// Read a length-prefixed string as UTF-8 text
    fn read_text(&mut self) -> OasResult<String> {
        Ok(String::from_utf8_lossy(&self.s.read_string()?).into_owned())
    }
    /// Read a coordinate displacement and fold it into a modal position register
    fn read_pos(&mut self, register: fn(&mut ModalState) -> &mut f64) -> OasResult<()> {
        let value = self.factor * self.s.read_integer()? as f64;
        let absolute = self.modal.absolute_pos;
        ModalState::update_pos(absolute, register(&mut self.modal), value);
        Ok(())
    }
    /// Append `prop` to whatever the current property target is
    fn push_property(&mut self, prop: Property) {
        let missing = |what: &str| log::warn!("PROPERTY record without a preceding {}", what);
        match self.target {
            PropTarget::Library => self.library.properties.push(prop),
            PropTarget::Cell => match self.library.cells.last_mut() {
                Some(cell) => cell.properties.push(prop),
                None => missing("cell"),
            },
            PropTarget::Polygon => {
                match self
                    .library
                    .cells
                    .last_mut()
                    .and_then(|cell| cell.polygons.last_mut())
                {
                    Some(polygon) => polygon.properties.push(prop),
                    None => missing("polygon"),
                }
            }
            PropTarget::FlexPath => {
                match self
                    .library
                    .cells
                    .last_mut()
                    .and_then(|cell| cell.flexpaths.last_mut())
                {
                    Some(path) => path.properties.push(prop),
                    None => missing("path"),
                }
            }
            PropTarget::Reference => {
                match self
                    .library
                    .cells
                    .last_mut()
                    .and_then(|cell| cell.references.last_mut())
                {
                    Some(reference) => reference.properties.push(prop),
                    None => missing("placement"),
                }
            }
            PropTarget::Label => {
                match self
                    .library
                    .cells
                    .last_mut()
                    .and_then(|cell| cell.labels.last_mut())
                {
                    Some(label) => label.properties.push(prop),
                    None => missing("text"),
                }
            }
            PropTarget::CellName(idx) => self.cell_names[idx].properties.push(prop),
            PropTarget::TextString(idx) => self.text_strings[idx].properties.push(prop),
            PropTarget::PropName(idx) => self.prop_names[idx].properties.push(prop),
            PropTarget::PropString(idx) => self.prop_strings[idx].properties.push(prop),
        }
    }
    /// Append a freshly-parsed element to the open cell, and aim
    /// subsequent properties at it
    fn append_polygon(&mut self, polygon: Polygon) {
        match self.library.cells.last_mut() {
            Some(cell) => {
                cell.polygons.push(polygon);
                self.target = PropTarget::Polygon;
            }
            None => log::warn!("Geometry record outside any cell; discarded"),
        }
    }

    fn placement(&mut self, transform: bool) -> OasResult<()> {
        let info = self.s.read_u8()?;
        let target = if info & 0x80 != 0 {
            // Explicit cell identifier
            let target = if info & 0x40 != 0 {
                RefTarget::RefNum(self.s.read_unsigned()?)
            } else {
                RefTarget::Name(self.read_text()?)
            };
            self.modal.placement_cell = Some(target.clone());
            target
        } else {
            match self.modal.placement_cell.clone() {
                Some(target) => target,
                None => {
                    log::warn!("PLACEMENT reuses an unset modal cell");
                    RefTarget::Name(String::new())
                }
            }
        };
        let mut reference = Reference::new(target);
        if !transform {
            reference.rotation = match info & 0x06 {
                0x02 => 0.5 * PI,
                0x04 => PI,
                0x06 => 1.5 * PI,
                _ => 0.0,
            };
        } else {
            if info & 0x04 != 0 {
                reference.magnification = self.s.read_real()?;
            }
            if info & 0x02 != 0 {
                reference.rotation = self.s.read_real()? * (PI / 180.0);
            }
        }
        reference.x_reflection = info & 0x01 != 0;
        if info & 0x20 != 0 {
            self.read_pos(|m| &mut m.placement_pos.x)?;
        }
        if info & 0x10 != 0 {
            self.read_pos(|m| &mut m.placement_pos.y)?;
        }
        reference.origin = self.modal.placement_pos;
        if info & 0x08 != 0 {
            self.s
                .read_repetition(self.factor, &mut self.modal.repetition)?;
            reference.repetition = self.modal.repetition.clone();
        }
        match self.library.cells.last_mut() {
            Some(cell) => {
                cell.references.push(reference);
                self.target = PropTarget::Reference;
            }
            None => log::warn!("PLACEMENT record outside any cell; discarded"),
        }
        Ok(())
    }

    fn text(&mut self) -> OasResult<()> {
        let info = self.s.read_u8()?;
        let text = if info & 0x40 != 0 {
            // Explicit text
            let text = if info & 0x20 != 0 {
                TextSource::RefNum(self.s.read_unsigned()?)
            } else {
                TextSource::Literal(self.read_text()?)
            };
            self.modal.text_string = Some(text.clone());
            text
        } else {
            match self.modal.text_string.clone() {
                Some(text) => text,
                None => {
                    log::warn!("TEXT reuses an unset modal string");
                    TextSource::Literal(String::new())
                }
            }
        };
        let mut label = Label::new("");
        label.text = text;
        label.anchor = crate::data::Anchor::SW;
        if info & 0x01 != 0 {
            self.modal.textlayer = self.s.read_unsigned()? as u32;
        }
        label.layer = self.modal.textlayer;
        if info & 0x02 != 0 {
            self.modal.texttype = self.s.read_unsigned()? as u32;
        }
        label.texttype = self.modal.texttype;
        if info & 0x10 != 0 {
            self.read_pos(|m| &mut m.text_pos.x)?;
        }
        if info & 0x08 != 0 {
            self.read_pos(|m| &mut m.text_pos.y)?;
        }
        label.origin = self.modal.text_pos;
        if info & 0x04 != 0 {
            self.s
                .read_repetition(self.factor, &mut self.modal.repetition)?;
            label.repetition = self.modal.repetition.clone();
        }
        match self.library.cells.last_mut() {
            Some(cell) => {
                cell.labels.push(label);
                self.target = PropTarget::Label;
            }
            None => log::warn!("TEXT record outside any cell; discarded"),
        }
        Ok(())
    }

    fn rectangle(&mut self) -> OasResult<()> {
        let info = self.s.read_u8()?;
        if info & 0x01 != 0 {
            self.modal.layer = self.s.read_unsigned()? as u32;
        }
        if info & 0x02 != 0 {
            self.modal.datatype = self.s.read_unsigned()? as u32;
        }
        if info & 0x40 != 0 {
            self.modal.geom_dim.x = self.factor * self.s.read_unsigned()? as f64;
        }
        if info & 0x20 != 0 {
            self.modal.geom_dim.y = self.factor * self.s.read_unsigned()? as f64;
        }
        if info & 0x10 != 0 {
            self.read_pos(|m| &mut m.geom_pos.x)?;
        }
        if info & 0x08 != 0 {
            self.read_pos(|m| &mut m.geom_pos.y)?;
        }
        let corner1 = self.modal.geom_pos;
        let corner2 = corner1
            + Vec2::new(
                self.modal.geom_dim.x,
                // A set square-bit reuses the width as the height
                if info & 0x80 != 0 {
                    self.modal.geom_dim.x
                } else {
                    self.modal.geom_dim.y
                },
            );
        let mut polygon =
            Polygon::rectangle(corner1, corner2, self.modal.layer, self.modal.datatype);
        if info & 0x04 != 0 {
            self.s
                .read_repetition(self.factor, &mut self.modal.repetition)?;
            polygon.repetition = self.modal.repetition.clone();
        }
        self.append_polygon(polygon);
        Ok(())
    }

    fn polygon(&mut self) -> OasResult<()> {
        let info = self.s.read_u8()?;
        let mut polygon = Polygon::default();
        if info & 0x01 != 0 {
            self.modal.layer = self.s.read_unsigned()? as u32;
        }
        polygon.layer = self.modal.layer;
        if info & 0x02 != 0 {
            self.modal.datatype = self.s.read_unsigned()? as u32;
        }
        polygon.datatype = self.modal.datatype;
        if info & 0x20 != 0 {
            self.modal.polygon_points.clear();
            self.s
                .read_point_list(self.factor, true, &mut self.modal.polygon_points)?;
        }
        // The point list is relative to an implied origin vertex
        polygon.points.reserve(1 + self.modal.polygon_points.len());
        polygon.points.push(Vec2::zero());
        polygon.points.extend_from_slice(&self.modal.polygon_points);
        if info & 0x10 != 0 {
            self.read_pos(|m| &mut m.geom_pos.x)?;
        }
        if info & 0x08 != 0 {
            self.read_pos(|m| &mut m.geom_pos.y)?;
        }
        for point in polygon.points.iter_mut() {
            *point += self.modal.geom_pos;
        }
        if info & 0x04 != 0 {
            self.s
                .read_repetition(self.factor, &mut self.modal.repetition)?;
            polygon.repetition = self.modal.repetition.clone();
        }
        self.append_polygon(polygon);
        Ok(())
    }

    fn path(&mut self) -> OasResult<()> {
        let info = self.s.read_u8()?;
        let mut element = PathElement::default();
        let mut path = FlexPath {
            gdsii_path: true,
            scale_width: true,
            tolerance: self.tolerance,
            ..Default::default()
        };
        if info & 0x01 != 0 {
            self.modal.layer = self.s.read_unsigned()? as u32;
        }
        element.layer = self.modal.layer;
        if info & 0x02 != 0 {
            self.modal.datatype = self.s.read_unsigned()? as u32;
        }
        element.datatype = self.modal.datatype;
        if info & 0x40 != 0 {
            self.modal.path_halfwidth = self.factor * self.s.read_unsigned()? as f64;
        }
        element
            .half_width_and_offset
            .push(Vec2::new(self.modal.path_halfwidth, 0.0));
        if info & 0x80 != 0 {
            let scheme = self.s.read_u8()?;
            match scheme & 0x03 {
                0x01 => self.modal.path_extensions.x = 0.0,
                0x02 => self.modal.path_extensions.x = self.modal.path_halfwidth,
                0x03 => self.modal.path_extensions.x = self.factor * self.s.read_integer()? as f64,
                _ => (),
            }
            match scheme & 0x0C {
                0x04 => self.modal.path_extensions.y = 0.0,
                0x08 => self.modal.path_extensions.y = self.modal.path_halfwidth,
                0x0C => self.modal.path_extensions.y = self.factor * self.s.read_integer()? as f64,
                _ => (),
            }
        }
        if self.modal.path_extensions.x == 0.0 && self.modal.path_extensions.y == 0.0 {
            element.end_type = EndType::Flush;
        } else if self.modal.path_extensions.x == self.modal.path_halfwidth
            && self.modal.path_extensions.y == self.modal.path_halfwidth
        {
            element.end_type = EndType::HalfWidth;
        } else {
            element.end_type = EndType::Extended;
            element.end_extensions = self.modal.path_extensions;
        }
        path.elements.push(element);
        if info & 0x20 != 0 {
            self.modal.path_points.clear();
            self.s
                .read_point_list(self.factor, false, &mut self.modal.path_points)?;
        }
        if info & 0x10 != 0 {
            self.read_pos(|m| &mut m.geom_pos.x)?;
        }
        if info & 0x08 != 0 {
            self.read_pos(|m| &mut m.geom_pos.y)?;
        }
        path.spine.push(self.modal.geom_pos);
        path.segment(&self.modal.path_points, true);
        if info & 0x04 != 0 {
            self.s
                .read_repetition(self.factor, &mut self.modal.repetition)?;
            path.repetition = self.modal.repetition.clone();
        }
        match self.library.cells.last_mut() {
            Some(cell) => {
                cell.flexpaths.push(path);
                self.target = PropTarget::FlexPath;
            }
            None => log::warn!("PATH record outside any cell; discarded"),
        }
        Ok(())
    }

    fn trapezoid(&mut self, has_a: bool, has_b: bool) -> OasResult<()> {
        let info = self.s.read_u8()?;
        let mut polygon = Polygon::default();
        if info & 0x01 != 0 {
            self.modal.layer = self.s.read_unsigned()? as u32;
        }
        polygon.layer = self.modal.layer;
        if info & 0x02 != 0 {
            self.modal.datatype = self.s.read_unsigned()? as u32;
        }
        polygon.datatype = self.modal.datatype;
        if info & 0x40 != 0 {
            self.modal.geom_dim.x = self.factor * self.s.read_unsigned()? as f64;
        }
        if info & 0x20 != 0 {
            self.modal.geom_dim.y = self.factor * self.s.read_unsigned()? as f64;
        }
        let delta_a = if has_a {
            self.factor * self.s.read_1delta()? as f64
        } else {
            0.0
        };
        let delta_b = if has_b {
            self.factor * self.s.read_1delta()? as f64
        } else {
            0.0
        };
        if info & 0x10 != 0 {
            self.read_pos(|m| &mut m.geom_pos.x)?;
        }
        if info & 0x08 != 0 {
            self.read_pos(|m| &mut m.geom_pos.y)?;
        }
        let pos = self.modal.geom_pos;
        let dim = self.modal.geom_dim;
        polygon.points = if info & 0x80 != 0 {
            // Vertically-oriented trapezoid
            vec![
                pos,
                pos + Vec2::new(dim.x, -delta_a),
                pos + dim + Vec2::new(0.0, -delta_b),
                pos + Vec2::new(0.0, dim.y),
            ]
        } else {
            vec![
                pos + Vec2::new(0.0, dim.y),
                pos + Vec2::new(-delta_a, 0.0),
                pos + Vec2::new(dim.x - delta_b, 0.0),
                pos + dim,
            ]
        };
        if info & 0x04 != 0 {
            self.s
                .read_repetition(self.factor, &mut self.modal.repetition)?;
            polygon.repetition = self.modal.repetition.clone();
        }
        self.append_polygon(polygon);
        Ok(())
    }

    fn ctrapezoid(&mut self) -> OasResult<()> {
        let info = self.s.read_u8()?;
        let mut polygon = Polygon::default();
        if info & 0x01 != 0 {
            self.modal.layer = self.s.read_unsigned()? as u32;
        }
        polygon.layer = self.modal.layer;
        if info & 0x02 != 0 {
            self.modal.datatype = self.s.read_unsigned()? as u32;
        }
        polygon.datatype = self.modal.datatype;
        if info & 0x80 != 0 {
            self.modal.ctrapezoid_type = self.s.read_u8()?;
        }
        if info & 0x40 != 0 {
            self.modal.geom_dim.x = self.factor * self.s.read_unsigned()? as f64;
        }
        if info & 0x20 != 0 {
            self.modal.geom_dim.y = self.factor * self.s.read_unsigned()? as f64;
        }
        if info & 0x10 != 0 {
            self.read_pos(|m| &mut m.geom_pos.x)?;
        }
        if info & 0x08 != 0 {
            self.read_pos(|m| &mut m.geom_pos.y)?;
        }
        let pos = self.modal.geom_pos;
        let dim = self.modal.geom_dim;
        let ttype = self.modal.ctrapezoid_type;
        // Types 16..=23 are triangles; all others start from the full box
        let mut v = if (16..24).contains(&ttype) {
            vec![pos, pos, pos]
        } else {
            vec![
                pos,
                pos + Vec2::new(dim.x, 0.0),
                pos + dim,
                pos + Vec2::new(0.0, dim.y),
            ]
        };
        let w = dim.x;
        let h = dim.y;
        match ttype {
            0 => v[2].x -= h,
            1 => v[1].x -= h,
            2 => v[3].x += h,
            3 => v[0].x += h,
            4 => {
                v[2].x -= h;
                v[3].x += h;
            }
            5 => {
                v[0].x += h;
                v[1].x -= h;
            }
            6 => {
                v[1].x -= h;
                v[3].x += h;
            }
            7 => {
                v[0].x += h;
                v[2].x -= h;
            }
            8 => v[2].y -= w,
            9 => v[3].y -= w,
            10 => v[1].y += w,
            11 => v[0].y += w,
            12 => {
                v[1].x += w;
                v[2].x -= w;
            }
            13 => {
                v[0].x += w;
                v[3].x -= w;
            }
            14 => {
                v[1].x += w;
                v[3].x -= w;
            }
            15 => {
                v[0].x += w;
                v[2].x -= w;
            }
            16 => {
                v[1].x += w;
                v[2].y += w;
            }
            17 => {
                v[1] += Vec2::new(w, w);
                v[2].y += w;
            }
            18 => {
                v[1].x += w;
                v[2] += Vec2::new(w, w);
            }
            19 => {
                v[0].x += w;
                v[1] += Vec2::new(w, w);
                v[2].y += w;
            }
            20 => {
                v[1].x += 2.0 * h;
                v[2] += Vec2::new(h, h);
            }
            21 => {
                v[0].x += h;
                v[1] += Vec2::new(2.0 * h, h);
                v[2].y += h;
            }
            22 => {
                v[1] += Vec2::new(w, w);
                v[2].y += 2.0 * w;
            }
            23 => {
                v[0].x += w;
                v[1] += Vec2::new(w, 2.0 * w);
                v[2].y += w;
            }
            24 => (),
            // Type 25 is absent from the public OASIS 1.0 tables:
            // a box whose height is forced equal to its width
            25 => {
                v[2].y = pos.y + w;
                v[3].y = pos.y + w;
            }
            _ => log::warn!("CTRAPEZOID type {} not recognized", ttype),
        }
        polygon.points = v;
        if info & 0x04 != 0 {
            self.s
                .read_repetition(self.factor, &mut self.modal.repetition)?;
            polygon.repetition = self.modal.repetition.clone();
        }
        self.append_polygon(polygon);
        Ok(())
    }

    fn circle(&mut self) -> OasResult<()> {
        let info = self.s.read_u8()?;
        if info & 0x01 != 0 {
            self.modal.layer = self.s.read_unsigned()? as u32;
        }
        if info & 0x02 != 0 {
            self.modal.datatype = self.s.read_unsigned()? as u32;
        }
        if info & 0x20 != 0 {
            self.modal.circle_radius = self.factor * self.s.read_unsigned()? as f64;
        }
        if info & 0x10 != 0 {
            self.read_pos(|m| &mut m.geom_pos.x)?;
        }
        if info & 0x08 != 0 {
            self.read_pos(|m| &mut m.geom_pos.y)?;
        }
        let mut polygon = geometry::ellipse(
            self.modal.geom_pos,
            self.modal.circle_radius,
            self.modal.circle_radius,
            0.0,
            0.0,
            0.0,
            0.0,
            self.tolerance,
            self.modal.layer,
            self.modal.datatype,
        );
        if info & 0x04 != 0 {
            self.s
                .read_repetition(self.factor, &mut self.modal.repetition)?;
            polygon.repetition = self.modal.repetition.clone();
        }
        self.append_polygon(polygon);
        Ok(())
    }

    fn property(&mut self, last: bool) -> OasResult<()> {
        let info = if last { 0x08 } else { self.s.read_u8()? };
        let name = if info & 0x04 != 0 {
            // Explicit name
            let name = if info & 0x02 != 0 {
                PropName::RefNum(self.s.read_unsigned()?)
            } else {
                PropName::Name(self.read_text()?)
            };
            self.modal.property_name = Some(name.clone());
            name
        } else {
            match self.modal.property_name.clone() {
                Some(name) => name,
                None => {
                    log::warn!("PROPERTY reuses an unset modal name");
                    PropName::Name(String::new())
                }
            }
        };
        let values = if info & 0x08 != 0 {
            // Reuse the modal value list
            match self.modal.property_values.clone() {
                Some(values) => values,
                None => {
                    log::warn!("PROPERTY reuses an unset modal value list");
                    Vec::new()
                }
            }
        } else {
            let mut count = (info >> 4) as u64;
            if count == 15 {
                count = self.s.read_unsigned()?;
            }
            let mut values = Vec::with_capacity(count as usize);
            for _ in 0..count {
                let tag = self.s.read_u8()?;
                let dtype = match OasisDataType::from_u8(tag) {
                    Some(dtype) => dtype,
                    None => {
                        log::error!("Invalid property value type {}", tag);
                        return Err(OasError::InvalidDataType(tag));
                    }
                };
                values.push(match dtype {
                    OasisDataType::RealPositiveInteger
                    | OasisDataType::RealNegativeInteger
                    | OasisDataType::RealPositiveReciprocal
                    | OasisDataType::RealNegativeReciprocal
                    | OasisDataType::RealPositiveRatio
                    | OasisDataType::RealNegativeRatio
                    | OasisDataType::RealFloat
                    | OasisDataType::RealDouble => {
                        PropertyValue::Real(self.s.read_real_by_type(dtype)?)
                    }
                    OasisDataType::UnsignedInteger => {
                        PropertyValue::UnsignedInteger(self.s.read_unsigned()?)
                    }
                    OasisDataType::SignedInteger => PropertyValue::Integer(self.s.read_integer()?),
                    OasisDataType::AString | OasisDataType::BString | OasisDataType::NString => {
                        PropertyValue::Bytes(self.s.read_string()?)
                    }
                    OasisDataType::ReferenceA
                    | OasisDataType::ReferenceB
                    | OasisDataType::ReferenceN => {
                        PropertyValue::StringRef(self.s.read_unsigned()?)
                    }
                });
            }
            self.modal.property_values = Some(values.clone());
            values
        };
        self.push_property(Property { name, values });
        Ok(())
    }

    fn xgeometry(&mut self) -> OasResult<()> {
        let info = self.s.read_u8()?;
        self.s.read_unsigned()?;
        if info & 0x01 != 0 {
            self.modal.layer = self.s.read_unsigned()? as u32;
        }
        if info & 0x02 != 0 {
            self.modal.datatype = self.s.read_unsigned()? as u32;
        }
        self.s.read_string()?;
        if info & 0x10 != 0 {
            self.read_pos(|m| &mut m.geom_pos.x)?;
        }
        if info & 0x08 != 0 {
            self.read_pos(|m| &mut m.geom_pos.y)?;
        }
        if info & 0x04 != 0 {
            self.s
                .read_repetition(self.factor, &mut self.modal.repetition)?;
        }
        log::warn!("Record type XGEOMETRY ignored");
        Ok(())
    }

    /// The `END`-record fix-up pass: resolve every forward reference
    /// recorded during parsing against the accumulated name tables.
    fn resolve(&mut self) {
        // Cells defined by reference-number receive their table name,
        // with the table entry's properties moved in front of their own
        for (idx, ref_num) in self.cell_ref_nums.iter().enumerate() {
            let num = match ref_num {
                Some(num) => *num,
                None => continue,
            };
            let cell = &mut self.library.cells[idx];
            match self.cell_names.get_mut(num as usize) {
                Some(entry) => {
                    cell.name = String::from_utf8_lossy(&entry.bytes).into_owned();
                    if !entry.properties.is_empty() {
                        let mut properties = std::mem::take(&mut entry.properties);
                        properties.append(&mut cell.properties);
                        cell.properties = properties;
                    }
                }
                None => log::warn!("Cell name number {} not found in CELLNAME table", num),
            }
        }
        // Labels holding a text-string number receive its table text,
        // plus a copy of the table entry's properties
        for cell in self.library.cells.iter_mut() {
            for label in cell.labels.iter_mut() {
                if let TextSource::RefNum(num) = label.text {
                    match self.text_strings.get(num as usize) {
                        Some(entry) => {
                            label.text = TextSource::Literal(
                                String::from_utf8_lossy(&entry.bytes).into_owned(),
                            );
                            if !entry.properties.is_empty() {
                                let mut properties = entry.properties.clone();
                                properties.append(&mut label.properties);
                                label.properties = properties;
                            }
                        }
                        None => {
                            log::warn!("Text string number {} not found in TEXTSTRING table", num)
                        }
                    }
                }
            }
        }
        // References: by-number through the cell-name table, by-name directly
        let map: HashMap<String, usize> = self
            .library
            .cells
            .iter()
            .enumerate()
            .map(|(idx, cell)| (cell.name.clone(), idx))
            .collect();
        for cell in self.library.cells.iter_mut() {
            for reference in cell.references.iter_mut() {
                let name = match &reference.target {
                    RefTarget::RefNum(num) => match self.cell_names.get(*num as usize) {
                        Some(entry) => String::from_utf8_lossy(&entry.bytes).into_owned(),
                        None => {
                            log::warn!("Cell name number {} not found in CELLNAME table", num);
                            continue;
                        }
                    },
                    RefTarget::Name(name) => name.clone(),
                    RefTarget::Cell(_) | RefTarget::RawCell(_) => continue,
                };
                match map.get(&name) {
                    Some(idx) => reference.target = RefTarget::Cell(*idx),
                    None => {
                        log::warn!("Unresolved reference to cell {:?}", name);
                        reference.target = RefTarget::Name(name);
                    }
                }
            }
        }
        // Property names and string values held as table numbers
        let prop_names = std::mem::take(&mut self.prop_names);
        let prop_strings = std::mem::take(&mut self.prop_strings);
        let resolve_list = |properties: &mut Vec<Property>| {
            for prop in properties.iter_mut() {
                if let PropName::RefNum(num) = prop.name {
                    match prop_names.get(num as usize) {
                        Some(entry) => {
                            prop.name = PropName::Name(
                                String::from_utf8_lossy(&entry.bytes).into_owned(),
                            );
                        }
                        None => {
                            log::warn!("Property name number {} not found in PROPNAME table", num)
                        }
                    }
                }
                for value in prop.values.iter_mut() {
                    if let PropertyValue::StringRef(num) = value {
                        match prop_strings.get(*num as usize) {
                            Some(entry) => *value = PropertyValue::Bytes(entry.bytes.clone()),
                            None => log::warn!(
                                "Property string number {} not found in PROPSTRING table",
                                num
                            ),
                        }
                    }
                }
            }
        };
        resolve_list(&mut self.library.properties);
        for cell in self.library.cells.iter_mut() {
            resolve_list(&mut cell.properties);
            for polygon in cell.polygons.iter_mut() {
                resolve_list(&mut polygon.properties);
            }
            for path in cell.flexpaths.iter_mut() {
                resolve_list(&mut path.properties);
            }
            for path in cell.robustpaths.iter_mut() {
                resolve_list(&mut path.properties);
            }
            for reference in cell.references.iter_mut() {
                resolve_list(&mut reference.properties);
            }
            for label in cell.labels.iter_mut() {
                resolve_list(&mut label.properties);
            }
        }
    }
}

/// Read an OASIS library from the file at path `fname`.
///
/// A positive `unit` rescales the library into that user unit (in meters);
/// zero or negative keeps the conventional micron user unit.
/// `tolerance` bounds the error of circle approximations created
/// during parsing.
pub fn read_oas(fname: impl AsRef<Path>, unit: f64, tolerance: f64) -> OasResult<Library> {
    let file = BufReader::new(File::open(fname)?);
    read_oas_stream(file, unit, tolerance)
}

/// [read_oas], from an already-open source
pub fn read_oas_stream<R: Read + Seek>(
    source: R,
    unit: f64,
    tolerance: f64,
) -> OasResult<Library> {
    let mut s = OasisReader::new(source);
    let mut magic = [0u8; 14];
    s.read(&mut magic)?;
    if &magic != OASIS_MAGIC {
        log::error!("Invalid OASIS header found");
        return Err(OasError::InvalidHeader);
    }
    let version = s.read_string()?;
    if version != OASIS_VERSION {
        log::warn!(
            "Unsupported OASIS file version {:?}",
            String::from_utf8_lossy(&version)
        );
    }
    // The START record's global real counts grid steps per micron
    let mut library = Library::new("LIB", 1e-6, 1e-9);
    let mut factor = 1.0 / s.read_real()?;
    library.precision = 1e-6 * factor;
    if unit > 0.0 {
        library.unit = unit;
        factor *= 1e-6 / unit;
    } else {
        library.unit = 1e-6;
    }
    let offset_table_flag = s.read_unsigned()?;
    if offset_table_flag == 0 {
        // An inline offset table follows immediately; discard it
        for _ in 0..12 {
            s.read_unsigned()?;
        }
    }
    let mut parser = OasParser {
        s,
        library,
        factor,
        tolerance,
        modal: ModalState::default(),
        target: PropTarget::Library,
        cell_names: Vec::new(),
        text_strings: Vec::new(),
        prop_names: Vec::new(),
        prop_strings: Vec::new(),
        cell_ref_nums: Vec::new(),
    };
    parser.run()?;
    Ok(parser.library)
}

/// Probe the OASIS file at `fname` for its database precision
/// (meters per database unit), without parsing anything else.
pub fn oas_precision(fname: impl AsRef<Path>) -> OasResult<f64> {
    let file = BufReader::new(File::open(fname)?);
    let mut s = OasisReader::new(file);
    let mut magic = [0u8; 14];
    s.read(&mut magic)?;
    if &magic != OASIS_MAGIC {
        log::error!("Invalid OASIS header found");
        return Err(OasError::InvalidHeader);
    }
    let version = s.read_string()?;
    if version != OASIS_VERSION {
        log::warn!(
            "Unsupported OASIS file version {:?}",
            String::from_utf8_lossy(&version)
        );
    }
    Ok(1e-6 / s.read_real()?)
}
