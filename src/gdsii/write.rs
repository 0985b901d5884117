//!
//! # GDSII Byte-Encoding and Writing
//!

use std::convert::TryFrom;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use byteorder::{BigEndian, WriteBytesExt};
use chrono::{Local, NaiveDateTime};

use super::{gds_dates, GdsDataType, GdsFloat64, GdsRecord, GdsRecordType};
use crate::data::{
    gds_properties, Cell, EndType, Label, Library, PathElement, Polygon, Property, RefTarget,
    Reference, Repetition,
};
use crate::geometry::{self, Vec2};
use crate::{OasError, OasResult};

impl Library {
    /// Write this library in GDSII stream format to the file at `fname`.
    ///
    /// Polygons with more than `max_points` vertices are subdivided before
    /// encoding. `timestamp` fills the modification and access times of the
    /// library and every cell; when absent, the current local time is used.
    pub fn write_gds(
        &self,
        fname: impl AsRef<Path>,
        max_points: u64,
        timestamp: Option<NaiveDateTime>,
    ) -> OasResult<()> {
        let mut file = BufWriter::new(File::create(fname)?);
        let mut writer = GdsWriter::new(&mut file);
        writer.write_lib(self, max_points, timestamp)?;
        drop(writer);
        file.flush()?;
        Ok(())
    }
}

/// Gds Writing Helper
pub struct GdsWriter<'wr> {
    /// Write Destination
    dest: Box<dyn Write + 'wr>,
}
impl<'wr> GdsWriter<'wr> {
    /// Create a new [GdsWriter] to destination `dest`
    pub fn new(dest: impl Write + 'wr) -> Self {
        Self {
            dest: Box::new(dest),
        }
    }
    /// Write [Library] `lib` to our destination
    pub fn write_lib(
        &mut self,
        lib: &Library,
        max_points: u64,
        timestamp: Option<NaiveDateTime>,
    ) -> OasResult<()> {
        lib.check_units()?;
        let timestamp = timestamp.unwrap_or_else(|| Local::now().naive_local());
        let dates = gds_dates(&timestamp);
        let scaling = lib.unit / lib.precision;

        self.write_record(&GdsRecord::Header { version: 600 })?;
        self.write_record(&GdsRecord::BgnLib {
            dates: dates.clone(),
        })?;
        self.write_record(&GdsRecord::LibName(lib.name.clone()))?;
        self.write_record(&GdsRecord::Units(lib.precision / lib.unit, lib.precision))?;
        for cell in lib.cells.iter() {
            self.write_cell(cell, lib, scaling, max_points, &dates)?;
        }
        // Raw cells re-emit their pre-encoded record streams verbatim
        for rawcell in lib.rawcells.iter() {
            self.dest.write_all(&rawcell.bytes)?;
        }
        self.write_record(&GdsRecord::EndLib)?;
        Ok(())
    }
    /// Write the `BGNSTR..ENDSTR` stream of a single [Cell]
    fn write_cell(
        &mut self,
        cell: &Cell,
        lib: &Library,
        scaling: f64,
        max_points: u64,
        dates: &[i16],
    ) -> OasResult<()> {
        self.write_record(&GdsRecord::BgnStruct {
            dates: dates.to_vec(),
        })?;
        self.write_record(&GdsRecord::StructName(cell.name.clone()))?;
        for polygon in cell.polygons.iter() {
            self.write_polygon(polygon, scaling, max_points)?;
        }
        for path in cell.flexpaths.iter() {
            self.write_path_elements(
                &path.spine,
                &path.elements,
                path.gdsii_path,
                path.scale_width,
                path.tolerance,
                &path.repetition,
                &path.properties,
                scaling,
                max_points,
            )?;
        }
        for path in cell.robustpaths.iter() {
            self.write_path_elements(
                &path.spine,
                &path.elements,
                path.gdsii_path,
                path.scale_width,
                path.tolerance,
                &path.repetition,
                &path.properties,
                scaling,
                max_points,
            )?;
        }
        for reference in cell.references.iter() {
            self.write_reference(reference, lib, scaling)?;
        }
        for label in cell.labels.iter() {
            self.write_label(label, scaling)?;
        }
        self.write_record(&GdsRecord::EndStruct)?;
        Ok(())
    }
    /// Write a polygon as one or more `BOUNDARY` elements,
    /// expanding its repetition and subdividing above `max_points`.
    fn write_polygon(
        &mut self,
        polygon: &Polygon,
        scaling: f64,
        max_points: u64,
    ) -> OasResult<()> {
        let pieces = geometry::fracture(&polygon.points, max_points);
        for offset in polygon.repetition.offsets() {
            for piece in pieces.iter() {
                if piece.len() < 3 {
                    continue;
                }
                self.write_record(&GdsRecord::Boundary)?;
                self.write_record(&GdsRecord::Layer(polygon.layer as i16))?;
                self.write_record(&GdsRecord::DataType(polygon.datatype as i16))?;
                // GDSII closes polygons explicitly; repeat the first vertex
                let mut xy = Vec::with_capacity(2 * (piece.len() + 1));
                for point in piece.iter().chain(piece.first()) {
                    xy.push(scale_coord(point.x + offset.x, scaling));
                    xy.push(scale_coord(point.y + offset.y, scaling));
                }
                self.write_record(&GdsRecord::Xy(xy))?;
                self.write_properties(&polygon.properties)?;
                self.write_record(&GdsRecord::EndElement)?;
            }
        }
        Ok(())
    }
    /// Write a path's elements, either as native `PATH` records or,
    /// when `gdsii_path` is off, tessellated into boundaries.
    #[allow(clippy::too_many_arguments)]
    fn write_path_elements(
        &mut self,
        spine: &[Vec2],
        elements: &[PathElement],
        gdsii_path: bool,
        scale_width: bool,
        tolerance: f64,
        repetition: &Repetition,
        properties: &[Property],
        scaling: f64,
        max_points: u64,
    ) -> OasResult<()> {
        for element in elements.iter() {
            if !gdsii_path {
                if let Some(mut polygon) = geometry::path_to_polygon(spine, element, tolerance) {
                    polygon.repetition = repetition.clone();
                    polygon.properties = properties.to_vec();
                    self.write_polygon(&polygon, scaling, max_points)?;
                }
                continue;
            }
            let half_width = element
                .half_width_and_offset
                .first()
                .copied()
                .unwrap_or_default()
                .x;
            let mut width = scale_coord(2.0 * half_width, scaling);
            if !scale_width {
                width = -width;
            }
            for offset in repetition.offsets() {
                self.write_record(&GdsRecord::Path)?;
                self.write_record(&GdsRecord::Layer(element.layer as i16))?;
                self.write_record(&GdsRecord::DataType(element.datatype as i16))?;
                self.write_record(&GdsRecord::PathType(match element.end_type {
                    EndType::Flush => 0,
                    EndType::Round => 1,
                    EndType::HalfWidth => 2,
                    EndType::Extended => 4,
                }))?;
                self.write_record(&GdsRecord::Width(width))?;
                if element.end_type == EndType::Extended {
                    self.write_record(&GdsRecord::BeginExtn(scale_coord(
                        element.end_extensions.x,
                        scaling,
                    )))?;
                    self.write_record(&GdsRecord::EndExtn(scale_coord(
                        element.end_extensions.y,
                        scaling,
                    )))?;
                }
                let mut xy = Vec::with_capacity(2 * spine.len());
                for point in spine.iter() {
                    xy.push(scale_coord(point.x + offset.x, scaling));
                    xy.push(scale_coord(point.y + offset.y, scaling));
                }
                self.write_record(&GdsRecord::Xy(xy))?;
                self.write_properties(properties)?;
                self.write_record(&GdsRecord::EndElement)?;
            }
        }
        Ok(())
    }
    /// Write a reference as an `SREF`, an `AREF` when its repetition maps onto
    /// a GDSII array, or one `SREF` per offset for explicit repetitions.
    fn write_reference(
        &mut self,
        reference: &Reference,
        lib: &Library,
        scaling: f64,
    ) -> OasResult<()> {
        let name = match &reference.target {
            RefTarget::Cell(idx) => match lib.cells.get(*idx) {
                Some(cell) => cell.name.clone(),
                None => {
                    log::warn!("Reference to out-of-range cell index {}; skipped", idx);
                    return Ok(());
                }
            },
            RefTarget::RawCell(idx) => match lib.rawcells.get(*idx) {
                Some(rawcell) => rawcell.name.clone(),
                None => {
                    log::warn!("Reference to out-of-range raw cell index {}; skipped", idx);
                    return Ok(());
                }
            },
            RefTarget::Name(name) => name.clone(),
            RefTarget::RefNum(num) => {
                log::warn!("Reference by unresolved number {}; skipped", num);
                return Ok(());
            }
        };
        match &reference.repetition {
            Repetition::Rectangular {
                columns,
                rows,
                spacing,
            } => self.write_array_reference(
                reference,
                &name,
                *columns,
                *rows,
                Vec2::new(spacing.x, 0.0),
                Vec2::new(0.0, spacing.y),
                scaling,
            ),
            Repetition::Regular {
                columns,
                rows,
                v1,
                v2,
            } => self.write_array_reference(reference, &name, *columns, *rows, *v1, *v2, scaling),
            Repetition::None | Repetition::Explicit { .. } => {
                for offset in reference.repetition.offsets() {
                    self.write_record(&GdsRecord::StructRef)?;
                    self.write_record(&GdsRecord::StructRefName(name.clone()))?;
                    self.write_strans(
                        reference.x_reflection,
                        reference.magnification,
                        reference.rotation,
                    )?;
                    self.write_record(&GdsRecord::Xy(vec![
                        scale_coord(reference.origin.x + offset.x, scaling),
                        scale_coord(reference.origin.y + offset.y, scaling),
                    ]))?;
                    self.write_properties(&reference.properties)?;
                    self.write_record(&GdsRecord::EndElement)?;
                }
                Ok(())
            }
        }
    }
    /// Write an `AREF` whose lattice is spanned by `v1` and `v2`
    #[allow(clippy::too_many_arguments)]
    fn write_array_reference(
        &mut self,
        reference: &Reference,
        name: &str,
        columns: u64,
        rows: u64,
        v1: Vec2,
        v2: Vec2,
        scaling: f64,
    ) -> OasResult<()> {
        self.write_record(&GdsRecord::ArrayRef)?;
        self.write_record(&GdsRecord::StructRefName(name.to_string()))?;
        self.write_strans(
            reference.x_reflection,
            reference.magnification,
            reference.rotation,
        )?;
        self.write_record(&GdsRecord::ColRow {
            cols: columns as i16,
            rows: rows as i16,
        })?;
        let origin = reference.origin;
        let corner1 = origin + v1 * columns as f64;
        let corner2 = origin + v2 * rows as f64;
        self.write_record(&GdsRecord::Xy(vec![
            scale_coord(origin.x, scaling),
            scale_coord(origin.y, scaling),
            scale_coord(corner1.x, scaling),
            scale_coord(corner1.y, scaling),
            scale_coord(corner2.x, scaling),
            scale_coord(corner2.y, scaling),
        ]))?;
        self.write_properties(&reference.properties)?;
        self.write_record(&GdsRecord::EndElement)?;
        Ok(())
    }
    /// Write a label as a `TEXT` element, expanding its repetition
    fn write_label(&mut self, label: &Label, scaling: f64) -> OasResult<()> {
        let text = match &label.text {
            crate::data::TextSource::Literal(text) => text.clone(),
            crate::data::TextSource::RefNum(num) => {
                log::warn!("Label text by unresolved number {}; skipped", num);
                return Ok(());
            }
        };
        for offset in label.repetition.offsets() {
            self.write_record(&GdsRecord::Text)?;
            self.write_record(&GdsRecord::Layer(label.layer as i16))?;
            self.write_record(&GdsRecord::TextType(label.texttype as i16))?;
            self.write_record(&GdsRecord::Presentation(0, label.anchor as u8))?;
            self.write_strans(label.x_reflection, label.magnification, label.rotation)?;
            self.write_record(&GdsRecord::Xy(vec![
                scale_coord(label.origin.x + offset.x, scaling),
                scale_coord(label.origin.y + offset.y, scaling),
            ]))?;
            self.write_record(&GdsRecord::String(text.clone()))?;
            self.write_properties(&label.properties)?;
            self.write_record(&GdsRecord::EndElement)?;
        }
        Ok(())
    }
    /// Write the `STRANS`/`MAG`/`ANGLE` group, omitted entirely for the
    /// identity transform
    fn write_strans(&mut self, reflected: bool, magnification: f64, rotation: f64) -> OasResult<()> {
        if !reflected && magnification == 1.0 && rotation == 0.0 {
            return Ok(());
        }
        self.write_record(&GdsRecord::Strans((reflected as u8) << 7, 0))?;
        if magnification != 1.0 {
            self.write_record(&GdsRecord::Mag(magnification))?;
        }
        if rotation != 0.0 {
            self.write_record(&GdsRecord::Angle(rotation.to_degrees()))?;
        }
        Ok(())
    }
    /// Write the GDSII-representable `(PROPATTR, PROPVALUE)` pairs of `properties`
    fn write_properties(&mut self, properties: &[Property]) -> OasResult<()> {
        for (attr, value) in gds_properties(properties) {
            self.write_record(&GdsRecord::PropAttr(attr as i16))?;
            self.write_record(&GdsRecord::PropValue(
                String::from_utf8_lossy(value).into_owned(),
            ))?;
        }
        Ok(())
    }
    /// Encode `record` into bytes and write onto `dest`
    fn write_record(&mut self, record: &GdsRecord) -> OasResult<()> {
        // This is split in two parts - header and data - largely to ease handling the variety of datatypes
        self.write_record_header(record)?;
        self.write_record_content(record)?;
        Ok(())
    }
    fn write_record_header(&mut self, record: &GdsRecord) -> OasResult<()> {
        // A quick closure for GDS's "even-lengths-only allowed" strings
        let gds_strlen = |s: &str| -> usize { s.len() + s.len() % 2 };
        // First grab the header info: RecordType, DataType, and length
        use GdsDataType::{BitArray, NoData, Str, F64, I16, I32};
        let (rtype, dtype, len) = match record {
            // Library-Level Records
            GdsRecord::Header { .. } => (GdsRecordType::Header, I16, 2),
            GdsRecord::BgnLib { .. } => (GdsRecordType::BgnLib, I16, 24),
            GdsRecord::LibName(s) => (GdsRecordType::LibName, Str, gds_strlen(s)),
            GdsRecord::Units(_, _) => (GdsRecordType::Units, F64, 16),
            GdsRecord::EndLib => (GdsRecordType::EndLib, NoData, 0),

            // Structure (Cell) Level Records
            GdsRecord::BgnStruct { .. } => (GdsRecordType::BgnStruct, I16, 24),
            GdsRecord::StructName(s) => (GdsRecordType::StructName, Str, gds_strlen(s)),
            GdsRecord::StructRefName(s) => (GdsRecordType::StructRefName, Str, gds_strlen(s)),
            GdsRecord::EndStruct => (GdsRecordType::EndStruct, NoData, 0),

            // Element-Level Records
            GdsRecord::Boundary => (GdsRecordType::Boundary, NoData, 0),
            GdsRecord::Path => (GdsRecordType::Path, NoData, 0),
            GdsRecord::StructRef => (GdsRecordType::StructRef, NoData, 0),
            GdsRecord::ArrayRef => (GdsRecordType::ArrayRef, NoData, 0),
            GdsRecord::Text => (GdsRecordType::Text, NoData, 0),
            GdsRecord::Layer(_) => (GdsRecordType::Layer, I16, 2),
            GdsRecord::DataType(_) => (GdsRecordType::DataType, I16, 2),
            GdsRecord::Width(_) => (GdsRecordType::Width, I32, 4),
            GdsRecord::Xy(d) => (GdsRecordType::Xy, I32, 4 * d.len()),
            GdsRecord::EndElement => (GdsRecordType::EndElement, NoData, 0),

            // More (less well-categorized here) record-types
            GdsRecord::ColRow { .. } => (GdsRecordType::ColRow, I16, 4),
            GdsRecord::TextType(_) => (GdsRecordType::TextType, I16, 2),
            GdsRecord::Presentation(_, _) => (GdsRecordType::Presentation, BitArray, 2),
            GdsRecord::String(s) => (GdsRecordType::String, Str, gds_strlen(s)),
            GdsRecord::Strans(_, _) => (GdsRecordType::Strans, BitArray, 2),
            GdsRecord::Mag(_) => (GdsRecordType::Mag, F64, 8),
            GdsRecord::Angle(_) => (GdsRecordType::Angle, F64, 8),
            GdsRecord::PathType(_) => (GdsRecordType::PathType, I16, 2),
            GdsRecord::PropAttr(_) => (GdsRecordType::PropAttr, I16, 2),
            GdsRecord::PropValue(s) => (GdsRecordType::PropValue, Str, gds_strlen(s)),
            GdsRecord::Box => (GdsRecordType::Box, NoData, 0),
            GdsRecord::BoxType(_) => (GdsRecordType::BoxType, I16, 2),
            GdsRecord::BeginExtn(_) => (GdsRecordType::BeginExtn, I32, 4),
            GdsRecord::EndExtn(_) => (GdsRecordType::EndExtn, I32, 4),
        };
        // Send those header-bytes to the writer.
        // Include the four header bytes in total-length.
        match u16::try_from(len + 4) {
            Ok(val) => self.dest.write_u16::<BigEndian>(val)?,
            Err(_) => return Err(OasError::RecordLen(len)),
        };
        self.dest.write_u8(rtype as u8)?;
        self.dest.write_u8(dtype as u8)?;
        Ok(())
    }
    fn write_record_content(&mut self, record: &GdsRecord) -> OasResult<()> {
        // Now write the data portion
        // This section is generally organized by DataType
        match record {
            // NoData
            GdsRecord::EndLib
            | GdsRecord::EndStruct
            | GdsRecord::Boundary
            | GdsRecord::Path
            | GdsRecord::StructRef
            | GdsRecord::ArrayRef
            | GdsRecord::Text
            | GdsRecord::EndElement
            | GdsRecord::Box => (),

            // BitArrays
            GdsRecord::Presentation(d0, d1) | GdsRecord::Strans(d0, d1) => {
                self.dest.write_u8(*d0)?;
                self.dest.write_u8(*d1)?;
            }
            // Single I16s
            GdsRecord::Header { version: d }
            | GdsRecord::Layer(d)
            | GdsRecord::DataType(d)
            | GdsRecord::TextType(d)
            | GdsRecord::PathType(d)
            | GdsRecord::PropAttr(d)
            | GdsRecord::BoxType(d) => self.dest.write_i16::<BigEndian>(*d)?,

            // Single I32s
            GdsRecord::Width(d) | GdsRecord::BeginExtn(d) | GdsRecord::EndExtn(d) => {
                self.dest.write_i32::<BigEndian>(*d)?
            }
            // Single F64s
            GdsRecord::Mag(d) | GdsRecord::Angle(d) => {
                self.dest.write_u64::<BigEndian>(GdsFloat64::encode(*d))?
            }
            // "Structs"
            GdsRecord::Units(d0, d1) => {
                self.dest.write_u64::<BigEndian>(GdsFloat64::encode(*d0))?;
                self.dest.write_u64::<BigEndian>(GdsFloat64::encode(*d1))?;
            }
            GdsRecord::ColRow { cols, rows } => {
                self.dest.write_i16::<BigEndian>(*cols)?;
                self.dest.write_i16::<BigEndian>(*rows)?;
            }
            // Vectors
            GdsRecord::BgnLib { dates: d } | GdsRecord::BgnStruct { dates: d } => {
                for val in d.iter() {
                    self.dest.write_i16::<BigEndian>(*val)?;
                }
            }
            GdsRecord::Xy(d) => {
                for val in d.iter() {
                    self.dest.write_i32::<BigEndian>(*val)?;
                }
            }
            // Strings
            GdsRecord::LibName(s)
            | GdsRecord::StructName(s)
            | GdsRecord::StructRefName(s)
            | GdsRecord::String(s)
            | GdsRecord::PropValue(s) => {
                self.dest.write_all(s.as_bytes())?;
                if s.len() % 2 != 0 {
                    // Pad odd-length strings with a zero-valued byte
                    self.dest.write_u8(0x00)?;
                }
            }
        };
        Ok(())
    }
}

/// Convert a user-unit coordinate to database units
fn scale_coord(value: f64, scaling: f64) -> i32 {
    (value * scaling).round() as i32
}
