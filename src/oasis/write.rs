//!
//! # OASIS Writing
//!
//! Serializes a [Library] as cell bodies (optionally `CBLOCK`-compressed),
//! followed by the end-of-file name and string tables, the `END` record,
//! and the deferred table-offset block.
//!

use std::collections::HashMap;
use std::f64::consts::FRAC_PI_2;
use std::fs::File;
use std::io::{BufWriter, Seek, Write};
use std::path::Path;

use derive_builder::Builder;

use super::codec::{scale_coord, OasisWriter};
use super::{OasisDataType, OasisRecordType, OASIS_MAGIC, OASIS_VERSION};
use crate::data::{
    Label, Library, PathElement, Polygon, PropName, Property, PropertyValue, RefTarget, Reference,
    TextSource,
};
use crate::geometry::{self, Vec2};
use crate::OasResult;

/// # Oasis Writer Configuration
#[derive(Clone, Debug, Default, Builder)]
#[builder(pattern = "owned", setter(into))]
pub struct OasisConfig {
    /// DEFLATE effort for `CBLOCK`-compressed cell bodies.
    /// Zero writes cells uncompressed, with no `CBLOCK` records at all.
    #[builder(default)]
    pub compression_level: u8,
}

/// Name and string registries accumulated while cell bodies are written,
/// then flushed as the end-of-file tables.
#[derive(Default)]
struct OasState {
    scaling: f64,
    cell_name_ids: HashMap<String, u64>,
    text_strings: Vec<String>,
    text_string_ids: HashMap<String, u64>,
    prop_names: Vec<String>,
    prop_name_ids: HashMap<String, u64>,
    prop_strings: Vec<Vec<u8>>,
    prop_string_ids: HashMap<Vec<u8>, u64>,
}
impl OasState {
    fn text_string_id(&mut self, text: &str) -> u64 {
        match self.text_string_ids.get(text) {
            Some(id) => *id,
            None => {
                let id = self.text_strings.len() as u64;
                self.text_strings.push(text.to_string());
                self.text_string_ids.insert(text.to_string(), id);
                id
            }
        }
    }
    fn prop_name_id(&mut self, name: &str) -> u64 {
        match self.prop_name_ids.get(name) {
            Some(id) => *id,
            None => {
                let id = self.prop_names.len() as u64;
                self.prop_names.push(name.to_string());
                self.prop_name_ids.insert(name.to_string(), id);
                id
            }
        }
    }
    fn prop_string_id(&mut self, bytes: &[u8]) -> u64 {
        match self.prop_string_ids.get(bytes) {
            Some(id) => *id,
            None => {
                let id = self.prop_strings.len() as u64;
                self.prop_strings.push(bytes.to_vec());
                self.prop_string_ids.insert(bytes.to_vec(), id);
                id
            }
        }
    }
}

impl Library {
    /// Write this library in OASIS format to the file at `fname`.
    pub fn write_oas(&self, fname: impl AsRef<Path>, config: &OasisConfig) -> OasResult<()> {
        let mut file = BufWriter::new(File::create(fname)?);
        write_oas_stream(self, &mut file, config)?;
        file.flush()?;
        Ok(())
    }
}

/// [Library::write_oas], onto an already-open destination
pub fn write_oas_stream<W: Write + Seek>(
    lib: &Library,
    dest: W,
    config: &OasisConfig,
) -> OasResult<()> {
    lib.check_units()?;
    let mut out = OasisWriter::new(dest);
    out.write(OASIS_MAGIC)?;
    out.write_string(OASIS_VERSION)?;
    // The global real counts grid steps per micron
    out.write_real(1e-6 / lib.precision)?;
    // Table offsets are deferred into the END record
    out.write_u8(1)?;

    let mut state = OasState {
        scaling: lib.unit / lib.precision,
        ..Default::default()
    };
    for (idx, cell) in lib.cells.iter().enumerate() {
        state.cell_name_ids.insert(cell.name.clone(), idx as u64);
    }

    properties_to_oas(&mut out, &lib.properties, &mut state)?;

    let use_cblock = config.compression_level > 0;
    for (idx, cell) in lib.cells.iter().enumerate() {
        out.write_record(OasisRecordType::CellRefNum)?;
        out.write_unsigned(idx as u64)?;
        if use_cblock {
            out.begin_cblock();
        }
        for polygon in cell.polygons.iter() {
            polygon_to_oas(&mut out, polygon, &mut state)?;
        }
        for path in cell.flexpaths.iter() {
            path_to_oas(
                &mut out,
                &path.spine,
                &path.elements,
                path.gdsii_path,
                path.tolerance,
                &path.repetition,
                &path.properties,
                &mut state,
            )?;
        }
        for path in cell.robustpaths.iter() {
            path_to_oas(
                &mut out,
                &path.spine,
                &path.elements,
                path.gdsii_path,
                path.tolerance,
                &path.repetition,
                &path.properties,
                &mut state,
            )?;
        }
        for reference in cell.references.iter() {
            reference_to_oas(&mut out, reference, lib, &mut state)?;
        }
        for label in cell.labels.iter() {
            label_to_oas(&mut out, label, &mut state)?;
        }
        if use_cblock {
            out.end_cblock(u32::from(config.compression_level.min(9)))?;
        }
    }

    // Name tables, with the offset of each recorded for the END block
    let cell_name_offset = if lib.cells.is_empty() {
        0
    } else {
        out.position()?
    };
    for cell in lib.cells.iter() {
        out.write_record(OasisRecordType::CellnameImplicit)?;
        out.write_string(cell.name.as_bytes())?;
        properties_to_oas(&mut out, &cell.properties, &mut state)?;
    }

    let text_string_offset = if state.text_strings.is_empty() {
        0
    } else {
        out.position()?
    };
    for (idx, text) in state.text_strings.iter().enumerate() {
        out.write_record(OasisRecordType::Textstring)?;
        out.write_string(text.as_bytes())?;
        out.write_unsigned(idx as u64)?;
    }

    let prop_name_offset = if state.prop_names.is_empty() {
        0
    } else {
        out.position()?
    };
    for (idx, name) in state.prop_names.iter().enumerate() {
        out.write_record(OasisRecordType::Propname)?;
        out.write_string(name.as_bytes())?;
        out.write_unsigned(idx as u64)?;
    }

    let prop_string_offset = if state.prop_strings.is_empty() {
        0
    } else {
        out.position()?
    };
    for bytes in state.prop_strings.iter() {
        out.write_record(OasisRecordType::PropstringImplicit)?;
        out.write_string(bytes)?;
    }

    out.write_record(OasisRecordType::End)?;

    // END header (1) + table-offsets + b-string length (2) + padding +
    // validation (1) = 256 bytes
    let mut pad_len = 252 + out.position()?;

    out.write_u8(1)?;
    out.write_unsigned(cell_name_offset)?;
    out.write_u8(1)?;
    out.write_unsigned(text_string_offset)?;
    out.write_u8(1)?;
    out.write_unsigned(prop_name_offset)?;
    out.write_u8(1)?;
    out.write_unsigned(prop_string_offset)?;
    out.write_u8(1)?;
    out.write_u8(0)?; // LAYERNAME table: always empty
    out.write_u8(1)?;
    out.write_u8(0)?; // XNAME table: always empty

    pad_len -= out.position()?;
    out.write_unsigned(pad_len)?;
    for _ in 0..pad_len {
        out.write_u8(0)?;
    }
    // No validation signature
    out.write_u8(0)?;
    Ok(())
}

/// Write `properties` as a run of `PROPERTY` records, registering names
/// and string values in their tables.
fn properties_to_oas<W: Write + Seek>(
    out: &mut OasisWriter<W>,
    properties: &[Property],
    state: &mut OasState,
) -> OasResult<()> {
    for prop in properties.iter() {
        // Explicit name by reference-number
        let mut info: u8 = 0x06;
        let count = prop.values.len();
        if count >= 15 {
            info |= 0xF0;
        } else {
            info |= (count as u8) << 4;
        }
        out.write_record(OasisRecordType::Property)?;
        out.write_u8(info)?;
        let name_id = match &prop.name {
            PropName::Name(name) => state.prop_name_id(name),
            PropName::RefNum(num) => {
                log::warn!("Property name still unresolved; written as number {}", num);
                *num
            }
        };
        out.write_unsigned(name_id)?;
        if count >= 15 {
            out.write_unsigned(count as u64)?;
        }
        for value in prop.values.iter() {
            match value {
                PropertyValue::Real(v) => out.write_real(*v)?,
                PropertyValue::UnsignedInteger(v) => {
                    out.write_u8(OasisDataType::UnsignedInteger as u8)?;
                    out.write_unsigned(*v)?;
                }
                PropertyValue::Integer(v) => {
                    out.write_u8(OasisDataType::SignedInteger as u8)?;
                    out.write_integer(*v)?;
                }
                PropertyValue::Bytes(bytes) => {
                    let id = state.prop_string_id(bytes);
                    out.write_u8(OasisDataType::ReferenceB as u8)?;
                    out.write_unsigned(id)?;
                }
                PropertyValue::StringRef(num) => {
                    log::warn!("Property value still unresolved; written as number {}", num);
                    out.write_u8(OasisDataType::ReferenceB as u8)?;
                    out.write_unsigned(*num)?;
                }
            }
        }
    }
    Ok(())
}

/// Write one polygon as a `POLYGON` record with its point list relative
/// to the first vertex.
fn polygon_to_oas<W: Write + Seek>(
    out: &mut OasisWriter<W>,
    polygon: &Polygon,
    state: &mut OasState,
) -> OasResult<()> {
    if polygon.points.len() < 3 {
        log::warn!("Degenerate polygon with {} vertices; skipped", polygon.points.len());
        return Ok(());
    }
    let mut info: u8 = 0x3B;
    let has_repetition = polygon.repetition.get_size() > 1;
    if has_repetition {
        info |= 0x04;
    }
    out.write_record(OasisRecordType::Polygon)?;
    out.write_u8(info)?;
    out.write_unsigned(polygon.layer as u64)?;
    out.write_unsigned(polygon.datatype as u64)?;
    out.write_point_list(&polygon.points, state.scaling, true)?;
    out.write_integer(scale_coord(polygon.points[0].x, state.scaling))?;
    out.write_integer(scale_coord(polygon.points[0].y, state.scaling))?;
    if has_repetition {
        out.write_repetition(&polygon.repetition, state.scaling)?;
    }
    properties_to_oas(out, &polygon.properties, state)
}

/// Write a path's elements, either as native `PATH` records or,
/// when `gdsii_path` is off, tessellated into `POLYGON`s.
#[allow(clippy::too_many_arguments)]
fn path_to_oas<W: Write + Seek>(
    out: &mut OasisWriter<W>,
    spine: &[Vec2],
    elements: &[PathElement],
    gdsii_path: bool,
    tolerance: f64,
    repetition: &crate::data::Repetition,
    properties: &[Property],
    state: &mut OasState,
) -> OasResult<()> {
    for element in elements.iter() {
        if gdsii_path {
            path_element_to_oas(out, spine, element, repetition, properties, state)?;
        } else if let Some(mut polygon) = geometry::path_to_polygon(spine, element, tolerance) {
            polygon.repetition = repetition.clone();
            polygon.properties = properties.to_vec();
            polygon_to_oas(out, &polygon, state)?;
        }
    }
    Ok(())
}

fn path_element_to_oas<W: Write + Seek>(
    out: &mut OasisWriter<W>,
    spine: &[Vec2],
    element: &PathElement,
    repetition: &crate::data::Repetition,
    properties: &[Property],
    state: &mut OasState,
) -> OasResult<()> {
    use crate::data::EndType;
    if spine.len() < 2 {
        log::warn!("Degenerate path with {} spine points; skipped", spine.len());
        return Ok(());
    }
    let mut info: u8 = 0xFB;
    let has_repetition = repetition.get_size() > 1;
    if has_repetition {
        info |= 0x04;
    }
    out.write_record(OasisRecordType::Path)?;
    out.write_u8(info)?;
    out.write_unsigned(element.layer as u64)?;
    out.write_unsigned(element.datatype as u64)?;
    let half_width = element
        .half_width_and_offset
        .first()
        .copied()
        .unwrap_or_default()
        .x;
    out.write_unsigned(scale_coord(half_width, state.scaling) as u64)?;
    // Extension scheme: begin in bits 0-1, end in bits 2-3
    match element.end_type {
        EndType::Flush => out.write_u8(0x05)?,
        EndType::HalfWidth | EndType::Round => {
            if element.end_type == EndType::Round {
                log::warn!("Round path ends have no OASIS form; written as half-width");
            }
            out.write_u8(0x0A)?;
        }
        EndType::Extended => {
            out.write_u8(0x0F)?;
            out.write_integer(scale_coord(element.end_extensions.x, state.scaling))?;
            out.write_integer(scale_coord(element.end_extensions.y, state.scaling))?;
        }
    }
    out.write_point_list(spine, state.scaling, false)?;
    out.write_integer(scale_coord(spine[0].x, state.scaling))?;
    out.write_integer(scale_coord(spine[0].y, state.scaling))?;
    if has_repetition {
        out.write_repetition(repetition, state.scaling)?;
    }
    properties_to_oas(out, properties, state)
}

/// The multiple of π/2 that `rotation` represents, if any
fn multiple_of_pi_over_2(rotation: f64) -> Option<i64> {
    let m = rotation / FRAC_PI_2;
    let rounded = m.round();
    if (m - rounded).abs() < 1e-12 {
        Some(rounded as i64)
    } else {
        None
    }
}

/// Write one reference as a `PLACEMENT` (compact, for axis-aligned
/// unmagnified transforms) or `PLACEMENT_TRANSFORM` record.
fn reference_to_oas<W: Write + Seek>(
    out: &mut OasisWriter<W>,
    reference: &Reference,
    lib: &Library,
    state: &mut OasState,
) -> OasResult<()> {
    let name = match &reference.target {
        RefTarget::RawCell(_) => {
            log::warn!("Reference to a raw cell cannot be used in an OASIS file");
            return Ok(());
        }
        RefTarget::Cell(idx) => match lib.cells.get(*idx) {
            Some(cell) => cell.name.as_str(),
            None => {
                log::warn!("Reference to out-of-range cell index {}; skipped", idx);
                return Ok(());
            }
        },
        RefTarget::Name(name) => name.as_str(),
        RefTarget::RefNum(num) => {
            log::warn!("Reference by unresolved number {}; skipped", num);
            return Ok(());
        }
    };
    let id = match state.cell_name_ids.get(name) {
        Some(id) => *id,
        None => {
            log::warn!("Reference to cell {:?} absent from the library; skipped", name);
            return Ok(());
        }
    };
    // Explicit cell by reference-number, x and y both present
    let mut info: u8 = 0xF0;
    let has_repetition = reference.repetition.get_size() > 1;
    if has_repetition {
        info |= 0x08;
    }
    if reference.x_reflection {
        info |= 0x01;
    }
    match multiple_of_pi_over_2(reference.rotation) {
        Some(m) if reference.magnification == 1.0 => {
            info |= ((m.rem_euclid(4)) as u8 & 0x03) << 1;
            out.write_record(OasisRecordType::Placement)?;
            out.write_u8(info)?;
            out.write_unsigned(id)?;
        }
        _ => {
            if reference.magnification != 1.0 {
                info |= 0x04;
            }
            if reference.rotation != 0.0 {
                info |= 0x02;
            }
            out.write_record(OasisRecordType::PlacementTransform)?;
            out.write_u8(info)?;
            out.write_unsigned(id)?;
            if reference.magnification != 1.0 {
                out.write_real(reference.magnification)?;
            }
            if reference.rotation != 0.0 {
                out.write_real(reference.rotation.to_degrees())?;
            }
        }
    }
    out.write_integer(scale_coord(reference.origin.x, state.scaling))?;
    out.write_integer(scale_coord(reference.origin.y, state.scaling))?;
    if has_repetition {
        out.write_repetition(&reference.repetition, state.scaling)?;
    }
    properties_to_oas(out, &reference.properties, state)
}

/// Write one label as a `TEXT` record, its string registered in the
/// text-string table.
fn label_to_oas<W: Write + Seek>(
    out: &mut OasisWriter<W>,
    label: &Label,
    state: &mut OasState,
) -> OasResult<()> {
    let text = match &label.text {
        TextSource::Literal(text) => text,
        TextSource::RefNum(num) => {
            log::warn!("Label text by unresolved number {}; skipped", num);
            return Ok(());
        }
    };
    // Explicit text by reference-number, layer, type, x, and y all present
    let mut info: u8 = 0x7B;
    let has_repetition = label.repetition.get_size() > 1;
    if has_repetition {
        info |= 0x04;
    }
    out.write_record(OasisRecordType::Text)?;
    out.write_u8(info)?;
    let id = state.text_string_id(text);
    out.write_unsigned(id)?;
    out.write_unsigned(label.layer as u64)?;
    out.write_unsigned(label.texttype as u64)?;
    out.write_integer(scale_coord(label.origin.x, state.scaling))?;
    out.write_integer(scale_coord(label.origin.y, state.scaling))?;
    if has_repetition {
        out.write_repetition(&label.repetition, state.scaling)?;
    }
    properties_to_oas(out, &label.properties, state)
}
