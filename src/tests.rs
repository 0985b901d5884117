use std::io::Cursor;

use chrono::NaiveDate;

use crate::data::*;
use crate::gdsii::read::GdsReader;
use crate::gdsii::GdsRecord;
use crate::geometry::Vec2;
use crate::oasis::codec::OasisWriter;
use crate::oasis::read::read_oas_stream;
use crate::oasis::write::{write_oas_stream, OasisConfig};
use crate::oasis::{OasisRecordType, OASIS_MAGIC, OASIS_VERSION};
use crate::{gds_units, oas_precision, read_gds, read_oas, read_rawcells, OasResult};

/// Specified creation date for test cases
fn test_timestamp() -> chrono::NaiveDateTime {
    NaiveDate::from_ymd_opt(1970, 1, 1)
        .unwrap()
        .and_hms_opt(0, 0, 1)
        .unwrap()
}

fn assert_close(a: f64, b: f64) {
    assert!((a - b).abs() <= 1e-9, "{} differs from {}", a, b);
}
fn assert_points_close(a: &[Vec2], b: &[Vec2]) {
    assert_eq!(a.len(), b.len(), "{:?} differs from {:?}", a, b);
    for (pa, pb) in a.iter().zip(b.iter()) {
        assert_close(pa.x, pb.x);
        assert_close(pa.y, pb.y);
    }
}

/// A library exercising every element type, in micron user units
fn sample_library() -> Library {
    let mut lib = Library::new("SAMPLE", 1e-6, 1e-9);

    let mut target = Cell::new("UNIT");
    target
        .polygons
        .push(Polygon::rectangle(Vec2::zero(), Vec2::new(1.0, 2.0), 1, 0));
    lib.cells.push(target);

    let mut top = Cell::new("TOP");
    let mut polygon = Polygon {
        points: vec![
            Vec2::new(0.0, 0.0),
            Vec2::new(4.0, 0.0),
            Vec2::new(4.0, 1.0),
            Vec2::new(2.0, 3.0),
        ],
        layer: 2,
        datatype: 5,
        ..Default::default()
    };
    set_gds_property(&mut polygon.properties, 12, b"marked");
    top.polygons.push(polygon);

    top.flexpaths.push(FlexPath {
        spine: vec![Vec2::new(0.0, 0.0), Vec2::new(5.0, 0.0), Vec2::new(5.0, 5.0)],
        elements: vec![PathElement {
            layer: 3,
            datatype: 0,
            half_width_and_offset: vec![Vec2::new(0.5, 0.0); 3],
            end_type: EndType::Flush,
            end_extensions: Vec2::zero(),
        }],
        gdsii_path: true,
        scale_width: true,
        tolerance: 1e-2,
        ..Default::default()
    });

    let mut label = Label::new("marker");
    label.layer = 10;
    label.texttype = 1;
    label.origin = Vec2::new(2.0, 2.0);
    label.anchor = Anchor::SW;
    top.labels.push(label);

    let mut sref = Reference::new(RefTarget::Name("UNIT".to_string()));
    sref.origin = Vec2::new(10.0, 0.0);
    sref.magnification = 2.0;
    sref.rotation = std::f64::consts::FRAC_PI_2;
    top.references.push(sref);

    let mut aref = Reference::new(RefTarget::Name("UNIT".to_string()));
    aref.origin = Vec2::new(0.0, 10.0);
    aref.repetition = Repetition::Rectangular {
        columns: 3,
        rows: 2,
        spacing: Vec2::new(2.0, 3.0),
    };
    top.references.push(aref);

    lib.cells.push(top);
    lib
}

#[test]
fn repetition_size_and_offsets() {
    assert_eq!(Repetition::None.get_size(), 1);
    let rect = Repetition::Rectangular {
        columns: 3,
        rows: 2,
        spacing: Vec2::new(1.0, 1.0),
    };
    assert_eq!(rect.get_size(), 6);
    assert_eq!(rect.offsets().len(), 6);
    assert_eq!(rect.offsets()[0], Vec2::zero());
    let explicit = Repetition::Explicit {
        offsets: vec![Vec2::new(1.0, 0.0)],
    };
    // The origin instance counts
    assert_eq!(explicit.get_size(), 2);
    assert_eq!(explicit.offsets().len(), 2);
}

#[test]
fn top_level_cells() {
    let lib = sample_library();
    // Resolve the references by writing and reading; or directly by name
    let (top_cells, top_rawcells) = lib.top_level();
    assert_eq!(top_cells, vec![lib.cell_index("TOP").unwrap()]);
    assert!(top_rawcells.is_empty());
}

/// Scenario: a one-rectangle cell produces the canonical record stream
#[test]
fn gds_write_record_stream() -> OasResult<()> {
    let mut lib = Library::new("TEST", 1e-6, 1e-9);
    let mut cell = Cell::new("A");
    cell.polygons
        .push(Polygon::rectangle(Vec2::zero(), Vec2::new(1.0, 2.0), 1, 0));
    lib.cells.push(cell);

    let dir = tempfile::tempdir()?;
    let path = dir.path().join("test.gds");
    lib.write_gds(&path, 199, Some(test_timestamp()))?;

    let mut rdr = GdsReader::open(&path)?;
    let mut records = Vec::new();
    while let Some(record) = rdr.next_record()? {
        records.push(record);
    }
    let expected = [
        GdsRecord::BgnStruct {
            dates: crate::gdsii::gds_dates(&test_timestamp()),
        },
        GdsRecord::StructName("A".to_string()),
        GdsRecord::Boundary,
        GdsRecord::Layer(1),
        GdsRecord::DataType(0),
        // Five points: the closing vertex is appended on write
        GdsRecord::Xy(vec![0, 0, 1000, 0, 1000, 2000, 0, 2000, 0, 0]),
        GdsRecord::EndElement,
        GdsRecord::EndStruct,
    ];
    let start = records
        .iter()
        .position(|r| matches!(r, GdsRecord::BgnStruct { .. }))
        .unwrap();
    assert_eq!(&records[start..start + expected.len()], &expected);
    assert_eq!(records.last(), Some(&GdsRecord::EndLib));
    Ok(())
}

/// Scenario: a square placement emits the compact PLACEMENT record,
/// with the rotation quadrant packed into the info byte
#[test]
fn oas_compact_placement() -> OasResult<()> {
    let mut lib = Library::new("L", 1e-6, 1e-9);
    let mut parent = Cell::new("P");
    let mut reference = Reference::new(RefTarget::Name("C".to_string()));
    reference.origin = Vec2::new(3.0, 4.0);
    reference.rotation = std::f64::consts::FRAC_PI_2;
    parent.references.push(reference);
    lib.cells.push(parent);
    lib.cells.push(Cell::new("C"));

    let mut cursor = Cursor::new(Vec::new());
    write_oas_stream(&lib, &mut cursor, &OasisConfig::default())?;
    let bytes = cursor.into_inner();
    // PLACEMENT (not PLACEMENT_TRANSFORM), explicit refnum + x + y,
    // quadrant 1 in bits 1-2, pointing at cell id 1
    let needle = [OasisRecordType::Placement as u8, 0xF2, 0x01];
    assert!(
        bytes.windows(needle.len()).any(|w| w == needle),
        "compact PLACEMENT record not found"
    );
    assert!(!bytes.contains(&(OasisRecordType::PlacementTransform as u8)));
    Ok(())
}

/// Scenario: SREF to an existing cell resolves at ENDLIB
#[test]
fn gds_reference_resolution() -> OasResult<()> {
    let mut lib = Library::new("L", 1e-6, 1e-9);
    lib.cells.push(Cell::new("X"));
    let mut parent = Cell::new("P");
    parent
        .references
        .push(Reference::new(RefTarget::Name("X".to_string())));
    lib.cells.push(parent);

    let dir = tempfile::tempdir()?;
    let path = dir.path().join("refs.gds");
    lib.write_gds(&path, 199, Some(test_timestamp()))?;
    let read = read_gds(&path, 0.0, 1e-2)?;
    let parent = &read.cells[read.cell_index("P").unwrap()];
    match parent.references[0].target {
        RefTarget::Cell(idx) => assert_eq!(read.cells[idx].name, "X"),
        ref other => panic!("reference left unresolved: {:?}", other),
    }
    Ok(())
}

/// Scenario: CELL_REF_NUM plus an end-of-file CELLNAME binding
#[test]
fn oas_cellname_by_number() -> OasResult<()> {
    let mut w = OasisWriter::new(Cursor::new(Vec::new()));
    w.write(OASIS_MAGIC)?;
    w.write_string(OASIS_VERSION)?;
    w.write_real(1000.0)?;
    w.write_u8(1)?;
    w.write_record(OasisRecordType::CellRefNum)?;
    w.write_unsigned(0)?;
    w.write_record(OasisRecordType::Cellname)?;
    w.write_string(b"A")?;
    w.write_unsigned(0)?;
    w.write_record(OasisRecordType::End)?;

    let mut cursor = w.into_inner();
    cursor.set_position(0);
    let lib = read_oas_stream(cursor, 0.0, 1e-2)?;
    assert_eq!(lib.cells.len(), 1);
    assert_eq!(lib.cells[0].name, "A");
    assert_eq!(lib.name, "LIB");
    Ok(())
}

/// Scenario: rectangles inside a CBLOCK share modal layer and datatype
#[test]
fn oas_cblock_modal_rectangles() -> OasResult<()> {
    let mut w = OasisWriter::new(Cursor::new(Vec::new()));
    w.write(OASIS_MAGIC)?;
    w.write_string(OASIS_VERSION)?;
    w.write_real(1000.0)?;
    w.write_u8(1)?;
    w.write_record(OasisRecordType::CellRefNum)?;
    w.write_unsigned(0)?;
    w.begin_cblock();
    // First rectangle sets every modal field
    w.write_record(OasisRecordType::Rectangle)?;
    w.write_u8(0x7B)?;
    w.write_unsigned(3)?; // layer
    w.write_unsigned(1)?; // datatype
    w.write_unsigned(10)?; // width
    w.write_unsigned(20)?; // height
    w.write_integer(100)?; // x
    w.write_integer(200)?; // y
    // Second reuses everything
    w.write_record(OasisRecordType::Rectangle)?;
    w.write_u8(0x00)?;
    // Third moves in x only
    w.write_record(OasisRecordType::Rectangle)?;
    w.write_u8(0x10)?;
    w.write_integer(300)?;
    w.end_cblock(6)?;
    w.write_record(OasisRecordType::Cellname)?;
    w.write_string(b"A")?;
    w.write_unsigned(0)?;
    w.write_record(OasisRecordType::End)?;

    let mut cursor = w.into_inner();
    cursor.set_position(0);
    let lib = read_oas_stream(cursor, 0.0, 1e-2)?;
    let cell = &lib.cells[0];
    assert_eq!(cell.polygons.len(), 3);
    for polygon in cell.polygons.iter() {
        assert_eq!((polygon.layer, polygon.datatype), (3, 1));
    }
    // Positions: (0.1, 0.2) twice, then x replaced by 0.3
    assert_points_close(
        &cell.polygons[0].points,
        &[
            Vec2::new(0.1, 0.2),
            Vec2::new(0.11, 0.2),
            Vec2::new(0.11, 0.22),
            Vec2::new(0.1, 0.22),
        ],
    );
    assert_points_close(&cell.polygons[1].points, &cell.polygons[0].points);
    assert_close(cell.polygons[2].points[0].x, 0.3);
    assert_close(cell.polygons[2].points[0].y, 0.2);
    Ok(())
}

/// Modal state: positions reset at CELL, other registers persist across cells
#[test]
fn oas_modal_reset_across_cells() -> OasResult<()> {
    let mut w = OasisWriter::new(Cursor::new(Vec::new()));
    w.write(OASIS_MAGIC)?;
    w.write_string(OASIS_VERSION)?;
    w.write_real(1000.0)?;
    w.write_u8(1)?;
    w.write_record(OasisRecordType::CellRefNum)?;
    w.write_unsigned(0)?;
    w.write_record(OasisRecordType::Rectangle)?;
    w.write_u8(0x7B)?;
    w.write_unsigned(3)?;
    w.write_unsigned(1)?;
    w.write_unsigned(10)?;
    w.write_unsigned(20)?;
    w.write_integer(100)?;
    w.write_integer(200)?;
    w.write_record(OasisRecordType::CellRefNum)?;
    w.write_unsigned(1)?;
    // Width and height only: layer and datatype carry over from the
    // previous cell, the position registers do not
    w.write_record(OasisRecordType::Rectangle)?;
    w.write_u8(0x60)?;
    w.write_unsigned(30)?;
    w.write_unsigned(40)?;
    w.write_record(OasisRecordType::Cellname)?;
    w.write_string(b"A")?;
    w.write_unsigned(0)?;
    w.write_record(OasisRecordType::Cellname)?;
    w.write_string(b"B")?;
    w.write_unsigned(1)?;
    w.write_record(OasisRecordType::End)?;

    let mut cursor = w.into_inner();
    cursor.set_position(0);
    let lib = read_oas_stream(cursor, 0.0, 1e-2)?;
    let polygon = &lib.cells[1].polygons[0];
    assert_eq!((polygon.layer, polygon.datatype), (3, 1));
    assert_points_close(
        &polygon.points,
        &[
            Vec2::zero(),
            Vec2::new(0.03, 0.0),
            Vec2::new(0.03, 0.04),
            Vec2::new(0.0, 0.04),
        ],
    );
    Ok(())
}

#[test]
fn gds_roundtrip() -> OasResult<()> {
    let lib = sample_library();
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("sample.gds");
    lib.write_gds(&path, 199, Some(test_timestamp()))?;
    let read = read_gds(&path, 0.0, 1e-2)?;

    assert_eq!(read.name, "SAMPLE");
    assert_close(read.unit, 1e-6);
    assert_close(read.precision, 1e-9);
    assert_eq!(read.cells.len(), 2);

    let top = &read.cells[read.cell_index("TOP").unwrap()];
    let orig = &lib.cells[lib.cell_index("TOP").unwrap()];

    assert_eq!(top.polygons.len(), 1);
    assert_eq!(top.polygons[0].layer, 2);
    assert_eq!(top.polygons[0].datatype, 5);
    assert_points_close(&top.polygons[0].points, &orig.polygons[0].points);
    assert_eq!(top.polygons[0].properties, orig.polygons[0].properties);

    assert_eq!(top.flexpaths.len(), 1);
    let path_read = &top.flexpaths[0];
    assert!(path_read.gdsii_path);
    assert!(path_read.scale_width);
    assert_points_close(&path_read.spine, &orig.flexpaths[0].spine);
    assert_eq!(path_read.elements[0].end_type, EndType::Flush);
    assert_close(path_read.elements[0].half_width_and_offset[0].x, 0.5);

    assert_eq!(top.labels.len(), 1);
    assert_eq!(top.labels[0].text, TextSource::Literal("marker".to_string()));
    assert_eq!(top.labels[0].anchor, Anchor::SW);
    assert_eq!((top.labels[0].layer, top.labels[0].texttype), (10, 1));

    assert_eq!(top.references.len(), 2);
    let sref = &top.references[0];
    match sref.target {
        RefTarget::Cell(idx) => assert_eq!(read.cells[idx].name, "UNIT"),
        ref other => panic!("unresolved reference: {:?}", other),
    }
    assert_close(sref.magnification, 2.0);
    assert_close(sref.rotation, std::f64::consts::FRAC_PI_2);
    let aref = &top.references[1];
    match &aref.repetition {
        Repetition::Rectangular {
            columns,
            rows,
            spacing,
        } => {
            assert_eq!((*columns, *rows), (3, 2));
            assert_close(spacing.x, 2.0);
            assert_close(spacing.y, 3.0);
        }
        other => panic!("array lost its repetition: {:?}", other),
    }
    Ok(())
}

#[test]
fn oas_roundtrip() -> OasResult<()> {
    let mut lib = sample_library();
    // Attach properties at every level
    lib.properties.push(Property {
        name: PropName::Name("COMMENT".to_string()),
        values: vec![
            PropertyValue::Real(2.5),
            PropertyValue::UnsignedInteger(7),
            PropertyValue::Integer(-3),
            PropertyValue::Bytes(b"abc".to_vec()),
        ],
    });
    let top_idx = lib.cell_index("TOP").unwrap();
    lib.cells[top_idx].properties.push(Property {
        name: PropName::Name("OWNER".to_string()),
        values: vec![PropertyValue::Bytes(b"tests".to_vec())],
    });

    let dir = tempfile::tempdir()?;
    let path = dir.path().join("sample.oas");
    lib.write_oas(&path, &OasisConfig::default())?;
    let read = read_oas(&path, 0.0, 1e-2)?;

    // OASIS does not carry a library name
    assert_eq!(read.name, "LIB");
    assert_close(read.precision, 1e-9);
    assert_eq!(read.cells.len(), 2);
    assert_eq!(read.properties, lib.properties);

    let top = &read.cells[read.cell_index("TOP").unwrap()];
    let orig = &lib.cells[top_idx];
    assert_eq!(top.properties, orig.properties);

    assert_eq!(top.polygons.len(), 1);
    assert_eq!((top.polygons[0].layer, top.polygons[0].datatype), (2, 5));
    assert_points_close(&top.polygons[0].points, &orig.polygons[0].points);
    assert_eq!(top.polygons[0].properties, orig.polygons[0].properties);

    assert_eq!(top.flexpaths.len(), 1);
    assert_points_close(&top.flexpaths[0].spine, &orig.flexpaths[0].spine);
    assert_eq!(top.flexpaths[0].elements[0].end_type, EndType::Flush);
    assert_close(top.flexpaths[0].elements[0].half_width_and_offset[0].x, 0.5);

    assert_eq!(top.labels.len(), 1);
    assert_eq!(top.labels[0].text, TextSource::Literal("marker".to_string()));
    assert_eq!((top.labels[0].layer, top.labels[0].texttype), (10, 1));

    let sref = &top.references[0];
    match sref.target {
        RefTarget::Cell(idx) => assert_eq!(read.cells[idx].name, "UNIT"),
        ref other => panic!("unresolved reference: {:?}", other),
    }
    assert_close(sref.magnification, 2.0);
    assert_close(sref.rotation, std::f64::consts::FRAC_PI_2);
    match &top.references[1].repetition {
        Repetition::Rectangular {
            columns,
            rows,
            spacing,
        } => {
            assert_eq!((*columns, *rows), (3, 2));
            assert_close(spacing.x, 2.0);
            assert_close(spacing.y, 3.0);
        }
        other => panic!("array lost its repetition: {:?}", other),
    }
    Ok(())
}

/// Scenario: compressed and uncompressed output decode identically
#[test]
fn oas_cblock_equivalence() -> OasResult<()> {
    let lib = sample_library();
    let dir = tempfile::tempdir()?;
    let plain = dir.path().join("plain.oas");
    let packed = dir.path().join("packed.oas");
    lib.write_oas(&plain, &OasisConfig::default())?;
    lib.write_oas(
        &packed,
        &OasisConfig {
            compression_level: 9,
        },
    )?;
    let lib_plain = read_oas(&plain, 0.0, 1e-2)?;
    let lib_packed = read_oas(&packed, 0.0, 1e-2)?;
    assert_eq!(lib_plain, lib_packed);
    // And the compressed file is the smaller one
    assert!(std::fs::metadata(&packed)?.len() < std::fs::metadata(&plain)?.len() + 256);
    Ok(())
}

/// The END record block pads the file to offset-of-END + 256 bytes,
/// closing with the null validation byte
#[test]
fn oas_end_record_padding() -> OasResult<()> {
    let lib = sample_library();
    let mut cursor = Cursor::new(Vec::new());
    write_oas_stream(&lib, &mut cursor, &OasisConfig::default())?;
    let bytes = cursor.into_inner();
    assert!(bytes.len() > 256);
    assert_eq!(bytes[bytes.len() - 256], OasisRecordType::End as u8);
    assert_eq!(bytes.last(), Some(&0u8));
    Ok(())
}

#[test]
fn rawcell_passthrough() -> OasResult<()> {
    let lib = sample_library();
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("source.gds");
    lib.write_gds(&path, 199, Some(test_timestamp()))?;

    let rawcells = read_rawcells(&path)?;
    assert_eq!(rawcells.len(), 2);
    assert_eq!(rawcells[0].name, "UNIT");
    assert_eq!(rawcells[1].name, "TOP");

    // Re-emit the raw bytes under a fresh library and decode them again
    let mut relay = Library::new("RELAY", 1e-6, 1e-9);
    relay.rawcells = rawcells;
    let relay_path = dir.path().join("relay.gds");
    relay.write_gds(&relay_path, 199, Some(test_timestamp()))?;
    let read = read_gds(&relay_path, 0.0, 1e-2)?;
    assert_eq!(read.cells.len(), 2);
    assert!(read.cell_index("UNIT").is_some());
    assert!(read.cell_index("TOP").is_some());
    Ok(())
}

#[test]
fn unit_probes() -> OasResult<()> {
    let lib = sample_library();
    let dir = tempfile::tempdir()?;
    let gds = dir.path().join("probe.gds");
    let oas = dir.path().join("probe.oas");
    lib.write_gds(&gds, 199, Some(test_timestamp()))?;
    lib.write_oas(&oas, &OasisConfig::default())?;

    let (unit, precision) = gds_units(&gds)?;
    assert_close(unit, 1e-6);
    assert_close(precision, 1e-9);
    let precision = oas_precision(&oas)?;
    assert_close(precision, 1e-9);
    Ok(())
}

#[test]
fn invalid_oasis_magic_rejected() {
    let cursor = Cursor::new(b"%SEMI-NOASIS\r\n\x01 bogus".to_vec());
    assert!(read_oas_stream(cursor, 0.0, 1e-2).is_err());
}

#[test]
fn explicit_repetition_roundtrip() -> OasResult<()> {
    let mut lib = Library::new("L", 1e-6, 1e-9);
    let mut cell = Cell::new("A");
    let mut polygon = Polygon::rectangle(Vec2::zero(), Vec2::new(1.0, 1.0), 4, 4);
    polygon.repetition = Repetition::Explicit {
        offsets: vec![Vec2::new(3.0, 0.0), Vec2::new(3.0, 5.0)],
    };
    cell.polygons.push(polygon);
    lib.cells.push(cell);

    let dir = tempfile::tempdir()?;
    let path = dir.path().join("rep.oas");
    lib.write_oas(&path, &OasisConfig::default())?;
    let read = read_oas(&path, 0.0, 1e-2)?;
    match &read.cells[0].polygons[0].repetition {
        Repetition::Explicit { offsets } => {
            assert_points_close(offsets, &[Vec2::new(3.0, 0.0), Vec2::new(3.0, 5.0)]);
        }
        other => panic!("explicit repetition lost: {:?}", other),
    }
    Ok(())
}

/// Trapezoid and circle records decode to polygons
#[test]
fn oas_trapezoid_and_circle() -> OasResult<()> {
    let mut w = OasisWriter::new(Cursor::new(Vec::new()));
    w.write(OASIS_MAGIC)?;
    w.write_string(OASIS_VERSION)?;
    w.write_real(1000.0)?;
    w.write_u8(1)?;
    w.write_record(OasisRecordType::CellRefNum)?;
    w.write_unsigned(0)?;
    // TRAPEZOID_A, horizontally oriented, delta-a = 5
    w.write_record(OasisRecordType::TrapezoidA)?;
    w.write_u8(0x7B)?;
    w.write_unsigned(1)?; // layer
    w.write_unsigned(0)?; // datatype
    w.write_unsigned(100)?; // width
    w.write_unsigned(50)?; // height
    w.write_integer(5)?; // delta-a
    w.write_integer(0)?; // x
    w.write_integer(0)?; // y
    // CIRCLE, radius 30
    w.write_record(OasisRecordType::Circle)?;
    w.write_u8(0x3B)?;
    w.write_unsigned(2)?; // layer
    w.write_unsigned(0)?; // datatype
    w.write_unsigned(30)?; // radius
    w.write_integer(0)?; // x
    w.write_integer(0)?; // y
    w.write_record(OasisRecordType::Cellname)?;
    w.write_string(b"A")?;
    w.write_unsigned(0)?;
    w.write_record(OasisRecordType::End)?;

    let mut cursor = w.into_inner();
    cursor.set_position(0);
    let lib = read_oas_stream(cursor, 0.0, 1e-2)?;
    let cell = &lib.cells[0];
    assert_eq!(cell.polygons.len(), 2);
    let trapezoid = &cell.polygons[0];
    assert_eq!(trapezoid.points.len(), 4);
    assert_points_close(
        &trapezoid.points,
        &[
            Vec2::new(0.0, 0.05),
            Vec2::new(-0.005, 0.0),
            Vec2::new(0.1, 0.0),
            Vec2::new(0.1, 0.05),
        ],
    );
    let circle = &cell.polygons[1];
    assert_eq!(circle.layer, 2);
    assert!(circle.points.len() >= 3);
    for point in circle.points.iter() {
        assert_close(point.length(), 0.03);
    }
    Ok(())
}

/// GDSII reader skips unsupported records while keeping alignment
#[test]
fn gds_skips_unknown_records() -> OasResult<()> {
    let lib = sample_library();
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("noisy.gds");
    lib.write_gds(&path, 199, Some(test_timestamp()))?;
    let mut bytes = std::fs::read(&path)?;
    // Splice an unsupported NODE element in front of the first cell:
    // NODE, LAYER 1, NODETYPE 0, XY, ENDEL
    let node = [
        0x00, 0x04, 0x15, 0x00, // NODE
        0x00, 0x06, 0x0D, 0x02, 0x00, 0x01, // LAYER 1
        0x00, 0x06, 0x2A, 0x02, 0x00, 0x00, // NODETYPE 0
        0x00, 0x0C, 0x10, 0x03, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, // XY
        0x00, 0x04, 0x11, 0x00, // ENDEL
    ];
    let bgnstr = bytes
        .windows(4)
        .position(|w| w == [0x00, 0x1C, 0x05, 0x02])
        .unwrap();
    let tail = bytes.split_off(bgnstr);
    bytes.extend_from_slice(&node);
    bytes.extend_from_slice(&tail);
    std::fs::write(&path, &bytes)?;

    let read = read_gds(&path, 0.0, 1e-2)?;
    assert_eq!(read.cells.len(), 2);
    Ok(())
}

/// Serde serialization of the tree stays symmetric
#[test]
fn serde_roundtrip() {
    let lib = sample_library();
    let json = serde_json::to_string(&lib).unwrap();
    let back: Library = serde_json::from_str(&json).unwrap();
    assert_eq!(lib, back);
}
