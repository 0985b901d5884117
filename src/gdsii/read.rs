//!
//! # GDSII Reading & Scanning
//!

use std::collections::HashMap;
use std::f64::consts::PI;
use std::fs::File;
use std::io::{Cursor, Read, Seek, SeekFrom};
use std::path::Path;

use byteorder::{BigEndian, ReadBytesExt};
use memmap::Mmap;
use num_traits::FromPrimitive;

use super::{GdsDataType, GdsFloat64, GdsRecord, GdsRecordHeader, GdsRecordType};
use crate::data::{
    set_gds_property, Anchor, Cell, EndType, FlexPath, Label, Library, PathElement, Polygon,
    RawCell, RefTarget, Reference, Repetition, TextSource,
};
use crate::geometry::Vec2;
use crate::{OasError, OasResult};

/// # GdsReader
/// Helper for parsing and scanning GDSII data coming from files and similar sources.
pub struct GdsReader<R: Read + Seek> {
    /// Source being read
    file: R,
}
impl GdsReader<Cursor<Mmap>> {
    /// Create a [GdsReader], opening and memory-mapping the [File] at path `fname`
    pub fn open(fname: impl AsRef<Path>) -> OasResult<Self> {
        let file = File::open(fname)?;
        // This is our one line of `unsafe`, for loading memory-mapped data.
        let mmap = unsafe { Mmap::map(&file)? };
        Ok(Self::new(Cursor::new(mmap)))
    }
}
impl<R: Read + Seek> GdsReader<R> {
    /// Create a [GdsReader] of `file`
    pub fn new(file: R) -> Self {
        GdsReader { file }
    }
    /// Read the next record-header from our file.
    /// Returns `None` at a clean end-of-file.
    fn read_header(&mut self) -> OasResult<Option<GdsRecordHeader>> {
        loop {
            // Read the 16-bit record-size. (In bytes, including the four header bytes.)
            let len = match self.file.read_u16::<BigEndian>() {
                Err(ref e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
                Err(e) => return Err(OasError::Boxed(Box::new(e))),
                Ok(num) if num < 4 => return Err(OasError::RecordLen(num.into())),
                Ok(num) if num % 2 != 0 => return Err(OasError::RecordLen(num.into())),
                Ok(num) => num,
            };
            let len = len - 4; // Strip out the four header-bytes
            let rtype_u8 = self.file.read_u8()?;
            let dtype_u8 = self.file.read_u8()?;
            let rtype = match GdsRecordType::from_u8(rtype_u8) {
                Some(rtype) => rtype,
                None => {
                    log::warn!("Unknown GDSII record type 0x{:02X} skipped", rtype_u8);
                    self.skip(len)?;
                    continue;
                }
            };
            let dtype =
                GdsDataType::from_u8(dtype_u8).ok_or(OasError::InvalidDataType(dtype_u8))?;
            return Ok(Some(GdsRecordHeader { rtype, dtype, len }));
        }
    }
    /// Skip over `len` bytes of record content
    fn skip(&mut self, len: u16) -> OasResult<()> {
        self.file.seek(SeekFrom::Current(len.into()))?;
        Ok(())
    }
    /// Read the next binary-encoded [GdsRecord], skipping (and logging) records
    /// without a model counterpart. Returns `None` at end-of-file.
    pub fn next_record(&mut self) -> OasResult<Option<GdsRecord>> {
        use GdsDataType::{BitArray, NoData, Str, F64, I16, I32};
        loop {
            let header = match self.read_header()? {
                Some(header) => header,
                None => return Ok(None),
            };
            let GdsRecordHeader { rtype, dtype, len } = header;
            let record = match (rtype, dtype, len) {
                // Library-Level Records
                (GdsRecordType::Header, I16, 2) => GdsRecord::Header {
                    version: self.read_i16(len)?[0],
                },
                (GdsRecordType::BgnLib, I16, 24) => GdsRecord::BgnLib {
                    dates: self.read_i16(len)?,
                },
                (GdsRecordType::LibName, Str, _) => GdsRecord::LibName(self.read_str(len)?),
                (GdsRecordType::Units, F64, 16) => {
                    let v = self.read_f64(len)?;
                    GdsRecord::Units(v[0], v[1])
                }
                (GdsRecordType::EndLib, NoData, 0) => GdsRecord::EndLib,

                // Structure (Cell) Level Records
                (GdsRecordType::BgnStruct, I16, 24) => GdsRecord::BgnStruct {
                    dates: self.read_i16(len)?,
                },
                (GdsRecordType::StructName, Str, _) => GdsRecord::StructName(self.read_str(len)?),
                (GdsRecordType::StructRefName, Str, _) => {
                    GdsRecord::StructRefName(self.read_str(len)?)
                }
                (GdsRecordType::EndStruct, NoData, 0) => GdsRecord::EndStruct,

                // Element-Level Records
                (GdsRecordType::Boundary, NoData, 0) => GdsRecord::Boundary,
                (GdsRecordType::Path, NoData, 0) => GdsRecord::Path,
                (GdsRecordType::StructRef, NoData, 0) => GdsRecord::StructRef,
                (GdsRecordType::ArrayRef, NoData, 0) => GdsRecord::ArrayRef,
                (GdsRecordType::Text, NoData, 0) => GdsRecord::Text,
                (GdsRecordType::Layer, I16, 2) => GdsRecord::Layer(self.read_i16(len)?[0]),
                (GdsRecordType::DataType, I16, 2) => GdsRecord::DataType(self.read_i16(len)?[0]),
                (GdsRecordType::Width, I32, 4) => GdsRecord::Width(self.read_i32(len)?[0]),
                (GdsRecordType::Xy, I32, _) => GdsRecord::Xy(self.read_i32(len)?),
                (GdsRecordType::EndElement, NoData, 0) => GdsRecord::EndElement,

                // More (less well-categorized here) record-types
                (GdsRecordType::ColRow, I16, 4) => {
                    let d = self.read_i16(len)?;
                    GdsRecord::ColRow {
                        cols: d[0],
                        rows: d[1],
                    }
                }
                (GdsRecordType::TextType, I16, 2) => GdsRecord::TextType(self.read_i16(len)?[0]),
                (GdsRecordType::Presentation, BitArray, 2) => {
                    let bytes = self.read_body(len)?;
                    GdsRecord::Presentation(bytes[0], bytes[1])
                }
                (GdsRecordType::String, Str, _) => GdsRecord::String(self.read_str(len)?),
                (GdsRecordType::Strans, BitArray, 2) => {
                    let bytes = self.read_body(len)?;
                    GdsRecord::Strans(bytes[0], bytes[1])
                }
                (GdsRecordType::Mag, F64, 8) => GdsRecord::Mag(self.read_f64(len)?[0]),
                (GdsRecordType::Angle, F64, 8) => GdsRecord::Angle(self.read_f64(len)?[0]),
                (GdsRecordType::PathType, I16, 2) => GdsRecord::PathType(self.read_i16(len)?[0]),
                (GdsRecordType::PropAttr, I16, 2) => GdsRecord::PropAttr(self.read_i16(len)?[0]),
                (GdsRecordType::PropValue, Str, _) => GdsRecord::PropValue(self.read_str(len)?),
                (GdsRecordType::Box, NoData, 0) => GdsRecord::Box,
                (GdsRecordType::BoxType, I16, 2) => GdsRecord::BoxType(self.read_i16(len)?[0]),
                (GdsRecordType::BeginExtn, I32, 4) => GdsRecord::BeginExtn(self.read_i32(len)?[0]),
                (GdsRecordType::EndExtn, I32, 4) => GdsRecord::EndExtn(self.read_i32(len)?[0]),

                // Spec-valid records with no counterpart in the layout model:
                // log, consume the payload to keep alignment, and continue.
                (rtype, _, len) => {
                    log::warn!("GDSII record type {:?} is not supported; skipped", rtype);
                    self.skip(len)?;
                    continue;
                }
            };
            return Ok(Some(record));
        }
    }
    /// Pull a whole `len`-byte record body into memory
    fn read_body(&mut self, len: u16) -> OasResult<Vec<u8>> {
        let mut body = vec![0u8; len.into()];
        self.file.read_exact(&mut body)?;
        Ok(body)
    }
    /// Record body as text, without the even-length padding NUL
    fn read_str(&mut self, len: u16) -> OasResult<String> {
        let mut body = self.read_body(len)?;
        if body.last() == Some(&0) {
            body.pop();
        }
        Ok(String::from_utf8_lossy(&body).into_owned())
    }
    /// Record body as big-endian 16-bit words
    fn read_i16(&mut self, len: u16) -> OasResult<Vec<i16>> {
        Ok(self
            .read_body(len)?
            .chunks_exact(2)
            .map(|word| i16::from_be_bytes([word[0], word[1]]))
            .collect())
    }
    /// Record body as big-endian 32-bit words
    fn read_i32(&mut self, len: u16) -> OasResult<Vec<i32>> {
        Ok(self
            .read_body(len)?
            .chunks_exact(4)
            .map(|word| i32::from_be_bytes([word[0], word[1], word[2], word[3]]))
            .collect())
    }
    /// Record body as GDSII eight-byte reals
    fn read_f64(&mut self, len: u16) -> OasResult<Vec<f64>> {
        Ok(self
            .read_body(len)?
            .chunks_exact(8)
            .map(|raw| {
                let mut word = [0u8; 8];
                word.copy_from_slice(raw);
                GdsFloat64::decode(u64::from_be_bytes(word))
            })
            .collect())
    }
}

/// The at-most-one element a GDSII parse holds open between its opening
/// record and `ENDEL`.
enum OpenElem {
    None,
    Polygon(Polygon),
    Path(FlexPath),
    Ref(Reference),
    Label(Label),
}
impl OpenElem {
    fn take(&mut self) -> OpenElem {
        std::mem::replace(self, OpenElem::None)
    }
    /// The open element's property list, for `PROPVALUE` attachment
    fn properties(&mut self) -> Option<&mut Vec<crate::data::Property>> {
        match self {
            OpenElem::Polygon(e) => Some(&mut e.properties),
            OpenElem::Path(e) => Some(&mut e.properties),
            OpenElem::Ref(e) => Some(&mut e.properties),
            OpenElem::Label(e) => Some(&mut e.properties),
            OpenElem::None => None,
        }
    }
}

/// Scale-and-pair a flat GDSII coordinate list into points
fn scale_points(xy: &[i32], factor: f64) -> Vec<Vec2> {
    xy.chunks_exact(2)
        .map(|pair| Vec2::new(factor * pair[0] as f64, factor * pair[1] as f64))
        .collect()
}

/// Read a GDSII library from the file at path `fname`.
///
/// A positive `unit` rescales the library into that user unit (in meters);
/// zero or negative keeps the file's native user unit. `tolerance` seeds the
/// curve tolerance of paths created during parsing.
pub fn read_gds(fname: impl AsRef<Path>, unit: f64, tolerance: f64) -> OasResult<Library> {
    let mut rdr = GdsReader::open(fname)?;
    let mut library = Library::new("", 1e-6, 1e-9);
    let mut cell: Option<Cell> = None;
    let mut elem = OpenElem::None;

    // Conversion factor from database units into user units
    let mut factor = 1.0;
    // Staged path width, halved into the element at its first XY record
    let mut width = 0.0;
    // Staged PROPATTR key
    let mut key: u16 = 0;

    while let Some(record) = rdr.next_record()? {
        match record {
            GdsRecord::Header { .. } | GdsRecord::BgnLib { .. } => (),
            GdsRecord::LibName(name) => library.name = name,
            GdsRecord::Units(db_in_user, db_in_meters) => {
                if unit > 0.0 {
                    factor = db_in_meters / unit;
                    library.unit = unit;
                } else {
                    factor = db_in_user;
                    library.unit = db_in_meters / db_in_user;
                }
                library.precision = db_in_meters;
            }
            GdsRecord::EndLib => {
                // Resolve named references against the cells actually present
                let map: HashMap<String, usize> = library
                    .cells
                    .iter()
                    .enumerate()
                    .map(|(idx, cell)| (cell.name.clone(), idx))
                    .collect();
                for cell in library.cells.iter_mut() {
                    for reference in cell.references.iter_mut() {
                        if let RefTarget::Name(name) = &reference.target {
                            match map.get(name) {
                                Some(idx) => reference.target = RefTarget::Cell(*idx),
                                None => log::warn!("Unresolved reference to cell {:?}", name),
                            }
                        }
                    }
                }
                return Ok(library);
            }
            GdsRecord::BgnStruct { .. } => cell = Some(Cell::default()),
            GdsRecord::StructName(name) => {
                if let Some(cell) = cell.as_mut() {
                    cell.name = name;
                }
            }
            GdsRecord::EndStruct => {
                if let Some(cell) = cell.take() {
                    library.cells.push(cell);
                }
            }
            GdsRecord::Boundary | GdsRecord::Box => elem = OpenElem::Polygon(Polygon::default()),
            GdsRecord::Path => {
                elem = OpenElem::Path(FlexPath {
                    elements: vec![PathElement::default()],
                    gdsii_path: true,
                    tolerance,
                    ..Default::default()
                })
            }
            GdsRecord::StructRef | GdsRecord::ArrayRef => {
                elem = OpenElem::Ref(Reference::new(RefTarget::Name(String::new())))
            }
            GdsRecord::Text => elem = OpenElem::Label(Label::new("")),
            GdsRecord::Layer(d) => match &mut elem {
                OpenElem::Polygon(polygon) => polygon.layer = d as u32,
                OpenElem::Path(path) => path.elements[0].layer = d as u32,
                OpenElem::Label(label) => label.layer = d as u32,
                _ => (),
            },
            GdsRecord::DataType(d) | GdsRecord::BoxType(d) => match &mut elem {
                OpenElem::Polygon(polygon) => polygon.datatype = d as u32,
                OpenElem::Path(path) => path.elements[0].datatype = d as u32,
                _ => (),
            },
            GdsRecord::TextType(d) => {
                if let OpenElem::Label(label) = &mut elem {
                    label.texttype = d as u32;
                }
            }
            GdsRecord::Width(d) => {
                // A negative width is absolute, immune to magnification
                width = factor * d.unsigned_abs() as f64;
                if let OpenElem::Path(path) = &mut elem {
                    path.scale_width = d >= 0;
                }
            }
            GdsRecord::Xy(xy) => match &mut elem {
                OpenElem::Polygon(polygon) => {
                    polygon.points.extend(scale_points(&xy, factor));
                }
                OpenElem::Path(path) => {
                    if path.spine.is_empty() && xy.len() >= 2 {
                        path.spine
                            .push(Vec2::new(factor * xy[0] as f64, factor * xy[1] as f64));
                        path.elements[0]
                            .half_width_and_offset
                            .push(Vec2::new(width / 2.0, 0.0));
                        path.segment(&scale_points(&xy[2..], factor), false);
                    } else {
                        path.segment(&scale_points(&xy, factor), false);
                    }
                }
                OpenElem::Ref(reference) => {
                    let points = scale_points(&xy, factor);
                    if points.is_empty() {
                        continue;
                    }
                    let origin = points[0];
                    reference.origin = origin;
                    // An AREF's remaining two points span its lattice
                    if points.len() >= 3 {
                        if let Repetition::Rectangular { columns, rows, .. } = reference.repetition
                        {
                            reference.repetition =
                                if reference.rotation == 0.0 && !reference.x_reflection {
                                    Repetition::Rectangular {
                                        columns,
                                        rows,
                                        spacing: Vec2::new(
                                            (points[1].x - origin.x) / columns as f64,
                                            (points[2].y - origin.y) / rows as f64,
                                        ),
                                    }
                                } else {
                                    Repetition::Regular {
                                        columns,
                                        rows,
                                        v1: (points[1] - origin) * (1.0 / columns as f64),
                                        v2: (points[2] - origin) * (1.0 / rows as f64),
                                    }
                                };
                        }
                    }
                }
                OpenElem::Label(label) => {
                    if let Some(origin) = scale_points(&xy, factor).first() {
                        label.origin = *origin;
                    }
                }
                OpenElem::None => log::warn!("XY record outside any element; ignored"),
            },
            GdsRecord::EndElement => match elem.take() {
                OpenElem::Polygon(mut polygon) => {
                    // Polygons are closed in GDSII (first and last points are the same)
                    polygon.points.pop();
                    if let Some(cell) = cell.as_mut() {
                        cell.polygons.push(polygon);
                    }
                }
                OpenElem::Path(path) => {
                    if let Some(cell) = cell.as_mut() {
                        cell.flexpaths.push(path);
                    }
                }
                OpenElem::Ref(reference) => {
                    if let Some(cell) = cell.as_mut() {
                        cell.references.push(reference);
                    }
                }
                OpenElem::Label(label) => {
                    if let Some(cell) = cell.as_mut() {
                        cell.labels.push(label);
                    }
                }
                OpenElem::None => (),
            },
            GdsRecord::StructRefName(name) => {
                if let OpenElem::Ref(reference) = &mut elem {
                    reference.target = RefTarget::Name(name);
                }
            }
            GdsRecord::ColRow { cols, rows } => {
                if let OpenElem::Ref(reference) = &mut elem {
                    reference.repetition = Repetition::Rectangular {
                        columns: cols as u64,
                        rows: rows as u64,
                        spacing: Vec2::zero(),
                    };
                }
            }
            GdsRecord::Presentation(_, d1) => {
                if let OpenElem::Label(label) = &mut elem {
                    match Anchor::from_u8(d1 & 0x0F) {
                        Some(anchor) => label.anchor = anchor,
                        None => log::warn!("Invalid PRESENTATION anchor {}; ignored", d1 & 0x0F),
                    }
                }
            }
            GdsRecord::String(s) => {
                if let OpenElem::Label(label) = &mut elem {
                    label.text = TextSource::Literal(s);
                }
            }
            GdsRecord::Strans(d0, d1) => {
                let reflected = d0 & 0x80 != 0;
                match &mut elem {
                    OpenElem::Ref(reference) => reference.x_reflection = reflected,
                    OpenElem::Label(label) => label.x_reflection = reflected,
                    _ => (),
                }
                if d1 & 0x06 != 0 {
                    log::warn!("Absolute magnification and rotation of references is not supported");
                }
            }
            GdsRecord::Mag(d) => match &mut elem {
                OpenElem::Ref(reference) => reference.magnification = d,
                OpenElem::Label(label) => label.magnification = d,
                _ => (),
            },
            GdsRecord::Angle(d) => match &mut elem {
                OpenElem::Ref(reference) => reference.rotation = d * (PI / 180.0),
                OpenElem::Label(label) => label.rotation = d * (PI / 180.0),
                _ => (),
            },
            GdsRecord::PathType(d) => {
                if let OpenElem::Path(path) = &mut elem {
                    path.elements[0].end_type = match d {
                        0 => EndType::Flush,
                        1 => EndType::Round,
                        2 => EndType::HalfWidth,
                        _ => EndType::Extended,
                    };
                }
            }
            GdsRecord::PropAttr(d) => key = d as u16,
            GdsRecord::PropValue(s) => {
                if let Some(properties) = elem.properties() {
                    set_gds_property(properties, key, s.as_bytes());
                }
            }
            GdsRecord::BeginExtn(d) => {
                if let OpenElem::Path(path) = &mut elem {
                    path.elements[0].end_extensions.x = factor * d as f64;
                }
            }
            GdsRecord::EndExtn(d) => {
                if let OpenElem::Path(path) = &mut elem {
                    path.elements[0].end_extensions.y = factor * d as f64;
                }
            }
        }
    }
    log::error!("GDSII input ended without an ENDLIB record");
    Err(OasError::Decode)
}

/// # GdsStructScan
/// Typically generated by first-pass file scanning.
/// Stores a struct name and byte-offsets in its source file.
#[derive(Debug, Default)]
struct GdsStructScan {
    /// Struct name
    name: String,
    /// Starting byte offset, at beginning of `BGNSTR`
    start: u64,
    /// Ending byte offset, at end of `ENDSTR`
    end: u64,
}

/// Scan `rdr` for struct definitions, without decoding their contents.
fn scan_structs<R: Read + Seek>(rdr: &mut GdsReader<R>) -> OasResult<Vec<GdsStructScan>> {
    let mut scans = Vec::new();
    loop {
        let header = match rdr.read_header()? {
            Some(header) => header,
            None => break,
        };
        match header.rtype {
            GdsRecordType::EndLib => break,
            GdsRecordType::BgnStruct => {
                let mut scan = GdsStructScan {
                    // Back up over the four header bytes already consumed
                    start: rdr.file.stream_position()? - 4,
                    ..Default::default()
                };
                rdr.skip(header.len)?;
                // Next up: the struct's name
                match rdr.read_header()? {
                    Some(h) if h.rtype == GdsRecordType::StructName => {
                        scan.name = rdr.read_str(h.len)?;
                    }
                    _ => return Err(OasError::Decode),
                }
                // Skip over everything else until EndStruct
                loop {
                    match rdr.read_header()? {
                        Some(h) if h.rtype == GdsRecordType::EndStruct => {
                            scan.end = rdr.file.stream_position()?;
                            break;
                        }
                        // Hitting end-of-library mid-struct means a truncated file
                        Some(h) if h.rtype == GdsRecordType::EndLib => {
                            return Err(OasError::Decode)
                        }
                        Some(h) => rdr.skip(h.len)?,
                        None => return Err(OasError::Decode),
                    }
                }
                scans.push(scan);
            }
            _ => rdr.skip(header.len)?,
        }
    }
    Ok(scans)
}

/// Import the structs of the GDSII file at `fname` as [RawCell]s:
/// opaque byte-blobs re-emitted verbatim on the next GDSII write,
/// without ever decoding their contents.
pub fn read_rawcells(fname: impl AsRef<Path>) -> OasResult<Vec<RawCell>> {
    let mut rdr = GdsReader::open(fname)?;
    let scans = scan_structs(&mut rdr)?;
    let mut rawcells = Vec::with_capacity(scans.len());
    for scan in scans {
        rdr.file.seek(SeekFrom::Start(scan.start))?;
        let mut bytes = vec![0u8; (scan.end - scan.start) as usize];
        rdr.file.read_exact(&mut bytes)?;
        rawcells.push(RawCell {
            name: scan.name,
            bytes,
        });
    }
    Ok(rawcells)
}

/// Probe the GDSII file at `fname` for its `(unit, precision)` pair,
/// without parsing anything else.
pub fn gds_units(fname: impl AsRef<Path>) -> OasResult<(f64, f64)> {
    let mut rdr = GdsReader::open(fname)?;
    loop {
        match rdr.read_header()? {
            Some(header) if header.rtype == GdsRecordType::Units => {
                let reals = rdr.read_f64(header.len)?;
                if reals.len() < 2 {
                    return Err(OasError::RecordLen(header.len.into()));
                }
                // The first real is the database unit in user units,
                // the second in meters
                return Ok((reals[1] / reals[0], reals[1]));
            }
            Some(header) => rdr.skip(header.len)?,
            None => {
                log::error!("GDSII file missing units definition");
                return Err(OasError::Decode);
            }
        }
    }
}
