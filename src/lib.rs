//!
//! # Oas21 Integrated Circuit Layout Library Reader & Writer
//!
//! GDSII is the IC industry's de facto standard for storing and sharing layout data,
//! and OASIS is its denser, modally-compressed successor.
//! Oas21 is a library for reading and creating both, similar to and largely inspired by
//! libraries such as [gdstk](https://github.com/heitzmann/gdstk) and its predecessor
//! [gdspy](https://github.com/heitzmann/gdspy).
//! Reading and generating format data are primary goals;
//! offering ease-of-use functionality for elaborate manipulations of layout data is not.
//! (Although these manipulations can be performed on Oas21's data structures).
//!
//! Layout data is represented as a short tree:
//!
//! * The root is a [Library], which primarily consists of a set of [Cell]s,
//!   and secondarily of its spatial units and metadata.
//!   Each [Library] is a universe unto itself: it has no mechanism for comprehending
//!   layout cells or data defined outside itself.
//!   On-disk each [Library] is typically paired one-to-one with a `.gds` or `.oas` file.
//! * Cells consist of geometric primitives ([Polygon]s, [FlexPath]s, [RobustPath]s),
//!   text annotations ([Label]s), and instances of other cells ([Reference]s),
//!   optionally arrayed through a [Repetition].
//! * Coordinates are stored as 64-bit floats in the library's user unit.
//!   Conversion to and from each format's integer database-grid happens at the
//!   format boundary, scaled by `unit / precision`.
//!
//! Both formats are record-oriented and binary.
//! GDSII records are decoded to and from the [gdsii::GdsRecord] enumeration;
//! OASIS records are parsed in place, against the modal-variable state the format requires.
//! Neither representation's raw bytes are ever stored, only generated and consumed
//! on their way into and out of [Read](std::io::Read) and [Write](std::io::Write)
//! objects (typically [File](std::fs::File)s).
//!
//! ## Alternate Serialization
//!
//! Each element in Oas21's [Library] tree is [serde]-serializable.
//! Oas21 includes dependencies for serializing and de-serializing to and from
//! [JSON](serde_json) and [YAML](serde_yaml) formats.
//! Note these text-based representations will generally be substantially larger
//! than binary GDSII or OASIS data.
//!
//! ## Usage
//!
//! Loading a [Library] from disk:
//!
//! ```skip
//! let lib = oas21::read_gds("sample.gds", 0.0, 1e-2)?;
//! let lib = oas21::read_oas("sample.oas", 0.0, 1e-2)?;
//! ```
//!
//! Creating a new and empty [Library], and adding a [Cell] definition:
//!
//! ```
//! use oas21::{Library, Cell};
//! let mut lib = Library::new("mylib", 1e-6, 1e-9);
//! lib.cells.push(Cell::new("mycell"));
//! ```
//!
//! Saving a [Library] to disk:
//!
//! ```skip
//! lib.write_gds("mylib.gds", 199, None)?;
//! lib.write_oas("mylib.oas", &Default::default())?;
//! ```
//!
//! Converting a [Library] to JSON or YAML:
//!
//! ```
//! let lib = oas21::Library::new("mylib", 1e-6, 1e-9);
//! let json = serde_json::to_string(&lib);
//! let yaml = serde_yaml::to_string(&lib);
//! ```
//!

use std::error::Error;
use std::fmt;

pub mod data;
pub mod gdsii;
pub mod geometry;
pub mod oasis;

pub use data::{
    Anchor, Cell, EndType, FlexPath, Label, Library, PathElement, Polygon, PropName, Property,
    PropertyValue, RawCell, RefTarget, Reference, Repetition, RobustPath, TextSource,
};
pub use gdsii::read::{gds_units, read_gds, read_rawcells};
pub use geometry::{ellipse, Vec2};
pub use oasis::read::{oas_precision, read_oas};
pub use oasis::write::{OasisConfig, OasisConfigBuilder};

/// # OasResult Type-Alias
pub type OasResult<T> = Result<T, OasError>;

/// # Oas21 Error Enumeration
/// Most errors are tied in some sense to parsing and decoding.
/// Once a valid [Library] is created in memory, it can generally be streamed to bytes.
/// Recoverable format violations do not land here; they are logged through the
/// [log] facade and parsing continues with the offending record skipped.
#[derive(Debug)]
pub enum OasError {
    /// Invalid record length
    RecordLen(usize),
    /// Invalid record type
    InvalidRecordType(u8),
    /// Invalid data type
    InvalidDataType(u8),
    /// Invalid or missing file magic / header
    InvalidHeader,
    /// Library units which violate `0 < precision <= unit`
    InvalidUnits { unit: f64, precision: f64 },
    /// Other decoding errors
    Decode,
    /// Other encoding errors
    Encode,
    /// Boxed (External) Errors
    Boxed(Box<dyn Error>),
    /// Other errors
    Str(String),
}
impl fmt::Display for OasError {
    /// Display an [OasError].
    /// This functionally delegates to the (derived) [std::fmt::Debug] implementation.
    /// Maybe more info than wanted in some cases. But certainly enough.
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}
impl std::error::Error for OasError {}
impl From<std::io::Error> for OasError {
    fn from(e: std::io::Error) -> Self {
        Self::Boxed(Box::new(e))
    }
}
impl From<std::str::Utf8Error> for OasError {
    fn from(e: std::str::Utf8Error) -> Self {
        Self::Boxed(Box::new(e))
    }
}
impl From<String> for OasError {
    fn from(e: String) -> Self {
        OasError::Str(e)
    }
}
impl From<&str> for OasError {
    fn from(e: &str) -> Self {
        OasError::Str(e.to_string())
    }
}

#[cfg(test)]
mod tests;
