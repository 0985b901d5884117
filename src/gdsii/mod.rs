//!
//! # GDSII Format Support
//!
//! Record definitions shared by the [read](crate::gdsii::read) and
//! [write](crate::gdsii::write) halves, plus GDSII's home-grown
//! eight-byte floating-point codec.
//!

use chrono::{Datelike, NaiveDateTime, Timelike};
use num_derive::FromPrimitive;
use serde::{Deserialize, Serialize};

pub mod read;
pub mod write;

///
/// # Gds Record Types
///
/// In the numeric-order specified by GDSII, for automatic [FromPrimitive](num_traits::FromPrimitive) conversions.
///
#[derive(FromPrimitive, Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
pub enum GdsRecordType {
    Header = 0x00,
    BgnLib,
    LibName,
    Units,
    EndLib,
    BgnStruct,
    StructName, // STRNAME
    EndStruct,
    Boundary,
    Path,
    StructRef,
    ArrayRef,
    Text,
    Layer,
    DataType,
    Width,
    Xy,
    EndElement,
    StructRefName, // SNAME
    ColRow,
    TextNode, // "Not currently used"
    Node,
    TextType,
    Presentation,
    Spacing, // "Discontinued"
    String,
    Strans,
    Mag,
    Angle,
    Uinteger, // "No longer used"
    Ustring,  // "No longer used"
    RefLibs,
    Fonts,
    PathType,
    Generations,
    AttrTable,
    StypTable, // "Unreleased Feature"
    StrType,   // "Unreleased Feature"
    ElemFlags,
    ElemKey,  // "Unreleased Feature"
    LinkType, // "Unreleased Feature"
    LinkKeys, // "Unreleased Feature"
    Nodetype,
    PropAttr,
    PropValue,
    Box,
    BoxType,
    Plex,
    BeginExtn, // "Only occurs in CustomPlus"
    EndExtn,   // "Only occurs in CustomPlus"
    TapeNum,
    TapeCode,
    StrClass, // "Only for Calma internal use"
    Reserved, // "Reserved for future use"
    Format,
    Mask,
    EndMasks,
    LibDirSize,
    SrfName,
    LibSecur,
}
impl GdsRecordType {
    /// Boolean indication of valid record types.
    /// Many are either deprecated or provisioned without ever being implemented;
    /// all from this list are deemed invalid.
    pub fn valid(&self) -> bool {
        match self {
            Self::TextNode | // "Not currently used"
            Self::Spacing | // "Discontinued"
            Self::Uinteger | // "No longer used"
            Self::Ustring |  // "No longer used"
            Self::StypTable | // "Unreleased Feature"
            Self::StrType |   // "Unreleased Feature"
            Self::ElemKey |   // "Unreleased Feature"
            Self::LinkType |  // "Unreleased Feature"
            Self::LinkKeys |  // "Unreleased Feature"
            Self::StrClass | // "Only for Calma internal use"
            Self::Reserved   // "Reserved for future use"
              => false,
            _ => true,
        }
    }
}

/// # Gds DataType Enumeration
///
/// In order as decoded from 16-bit integers in binary data
#[derive(FromPrimitive, Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
pub enum GdsDataType {
    NoData = 0,
    BitArray = 1,
    I16 = 2,
    I32 = 3,
    F32 = 4,
    F64 = 5,
    Str = 6,
}

///
/// # Gds Record Enumeration
///
/// The subset of GDSII records the layout model maps onto,
/// kept in relatively "raw" form other than assuring correct data-types
/// and converting one-entry arrays into scalars.
/// Records outside this subset are consumed and logged by the reader
/// without being represented.
///
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum GdsRecord {
    Header { version: i16 },
    BgnLib { dates: Vec<i16> },
    LibName(String),
    Units(f64, f64),
    EndLib,
    BgnStruct { dates: Vec<i16> },
    StructName(String),    // STRNAME
    StructRefName(String), // SNAME
    EndStruct,
    Boundary,
    Path,
    StructRef,
    ArrayRef,
    Text,
    Layer(i16),
    DataType(i16),
    Width(i32),
    Xy(Vec<i32>),
    EndElement,
    ColRow { cols: i16, rows: i16 },
    TextType(i16),
    Presentation(u8, u8),
    String(String),
    Strans(u8, u8),
    Mag(f64),
    Angle(f64),
    PathType(i16),
    PropAttr(i16),
    PropValue(String),
    Box,
    BoxType(i16),
    BeginExtn(i32),
    EndExtn(i32),
}

/// # Gds Record Header
/// Decoded contents of a record's four header bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GdsRecordHeader {
    pub rtype: GdsRecordType,
    pub dtype: GdsDataType,
    pub len: u16,
}

/// # GDSII's Home-Grown Floating-Point Format
///
/// Incredibly, GDSII is old enough to have its own float-format,
/// like most computers did before IEEE754:
/// excess-64 base-16, one sign bit, seven exponent bits, 56 fraction bits
/// with the radix point left of the fraction.
///
/// The [GdsFloat64] struct is not used as a data-store, but largely a namespace
/// for the `encode` and `decode` operations to and from IEEE754 double-precision format.
///
pub struct GdsFloat64;
impl GdsFloat64 {
    /// Decode eight GDSII-float-encoded bytes (as `u64`) to `f64`
    pub fn decode(val: u64) -> f64 {
        if val == 0 {
            return 0.0;
        }
        let neg = (val & 0x8000_0000_0000_0000) != 0; // Sign bit
        let exp = ((val >> 56) & 0x7F) as i32 - 64; // Exponent 7b
        // Create the initially integer-valued mantissa, and normalize it to (1/16, 1)
        let mantissa = (val & 0x00FF_FFFF_FFFF_FFFF) as f64 / 2f64.powi(56);
        let val = mantissa * 16f64.powi(exp);
        if neg {
            -val
        } else {
            val
        }
    }
    /// Encode `f64` to eight bytes, this time represented as `u64`.
    /// The fraction is normalized so that its top nibble is nonzero
    /// whenever the value is.
    pub fn encode(mut val: f64) -> u64 {
        if val == 0.0 || !val.is_finite() {
            if !val.is_finite() {
                log::error!("Non-finite value cannot be encoded as a GDSII real");
            }
            return 0;
        };
        let mut top: u8 = 0;
        if val < 0.0 {
            top = 0x80;
            val = -val;
        }
        let fexp: f64 = 0.25 * val.log2();
        let mut exponent = fexp.ceil() as i32;
        if fexp == fexp.ceil() {
            exponent += 1;
        }
        let mantissa: u64 = (val * 16_f64.powi(14 - exponent)).round() as u64;
        top += (64 + exponent) as u8;
        ((top as u64) << 56) | (mantissa & 0x00FF_FFFF_FFFF_FFFF)
    }
}

/// Encode a timestamp in GDSII's twelve-i16 `BGNLIB`/`BGNSTR` format,
/// with modification and access times both set to `ts`.
pub fn gds_dates(ts: &NaiveDateTime) -> Vec<i16> {
    let stamp = [
        ts.year() as i16,
        ts.month() as i16,
        ts.day() as i16,
        ts.hour() as i16,
        ts.minute() as i16,
        ts.second() as i16,
    ];
    let mut dates = Vec::with_capacity(12);
    dates.extend_from_slice(&stamp);
    dates.extend_from_slice(&stamp);
    dates
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn float64_known_values() {
        // 1.0 = 0x4110_0000_0000_0000 in excess-64 base-16
        assert_eq!(GdsFloat64::encode(1.0), 0x4110_0000_0000_0000);
        assert_eq!(GdsFloat64::decode(0x4110_0000_0000_0000), 1.0);
        assert_eq!(GdsFloat64::encode(0.0), 0);
        assert_eq!(GdsFloat64::decode(0), 0.0);
        // 1e-9, the usual GDSII database unit
        let enc = GdsFloat64::encode(1e-9);
        assert!((GdsFloat64::decode(enc) - 1e-9).abs() < 1e-24);
    }

    #[test]
    fn float64_roundtrip() {
        // Magnitudes across the format's representable range (just under 16^63)
        let mut vals = vec![0.0];
        let mut mag = 2f64.powi(-256);
        while mag <= 2f64.powi(240) {
            vals.push(mag);
            vals.push(-mag);
            vals.push(mag * 1.2345678987654321);
            mag *= 2f64.powi(16);
        }
        for val in vals {
            let rt = GdsFloat64::decode(GdsFloat64::encode(val));
            let err = (rt - val).abs();
            assert!(
                err <= val.abs() * 2f64.powi(-52),
                "round-trip failure for {}: got {}",
                val,
                rt
            );
        }
    }
}
