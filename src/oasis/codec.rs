//!
//! # OASIS Primitive Codec & Byte Streams
//!
//! The integer, real, delta, point-list, and repetition encodings shared by
//! the OASIS [read](crate::oasis::read) and [write](crate::oasis::write)
//! halves, wrapped around a pair of dual-mode byte streams:
//! the reader switches to an in-memory buffer while a `CBLOCK` is inflated,
//! and the writer stages cell bodies in memory while one is being built.
//!

use std::io::{Cursor, Read, Seek, SeekFrom, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use num_traits::FromPrimitive;

use super::{OasisDataType, OasisRecordType};
use crate::data::Repetition;
use crate::geometry::Vec2;
use crate::{OasError, OasResult};

/// Map a 2-delta direction (the low two bits) onto a unit step
fn delta2_direction(dir: u64) -> (i64, i64) {
    match dir & 0x03 {
        0 => (1, 0),
        1 => (0, 1),
        2 => (-1, 0),
        _ => (0, -1),
    }
}

/// Map a 3-delta / g-delta octant (the low three bits) onto a unit step
fn delta3_direction(dir: u64) -> (i64, i64) {
    match dir & 0x07 {
        0 => (1, 0),
        1 => (0, 1),
        2 => (-1, 0),
        3 => (0, -1),
        4 => (1, 1),
        5 => (-1, 1),
        6 => (-1, -1),
        _ => (1, -1),
    }
}

/// # Oasis Reading Stream
///
/// Reads either directly from `file`, or from the in-memory inflation of the
/// most recent `CBLOCK` until that buffer is exhausted.
pub struct OasisReader<R: Read + Seek> {
    file: R,
    inflated: Option<Cursor<Vec<u8>>>,
}
impl<R: Read + Seek> OasisReader<R> {
    pub fn new(file: R) -> Self {
        Self {
            file,
            inflated: None,
        }
    }
    /// Fill `buf`, draining any active `CBLOCK` buffer before
    /// falling back to the file.
    pub fn read(&mut self, buf: &mut [u8]) -> OasResult<()> {
        if let Some(cursor) = self.inflated.as_mut() {
            let num = cursor.read(buf)?;
            if num < buf.len() {
                self.inflated = None;
                self.file.read_exact(&mut buf[num..])?;
            }
            return Ok(());
        }
        self.file.read_exact(buf)?;
        Ok(())
    }
    pub fn read_u8(&mut self) -> OasResult<u8> {
        let mut byte = [0u8; 1];
        self.read(&mut byte)?;
        Ok(byte[0])
    }
    /// Read a record identifier, or `None` at a clean end-of-file
    pub fn read_record_byte(&mut self) -> OasResult<Option<u8>> {
        match self.read_u8() {
            Ok(byte) => Ok(Some(byte)),
            Err(OasError::Boxed(e)) => {
                if let Some(ioe) = e.downcast_ref::<std::io::Error>() {
                    if ioe.kind() == std::io::ErrorKind::UnexpectedEof {
                        return Ok(None);
                    }
                }
                Err(OasError::Boxed(e))
            }
            Err(e) => Err(e),
        }
    }
    /// 7-bit little-endian varint, continuation bit in the MSB
    pub fn read_unsigned(&mut self) -> OasResult<u64> {
        let mut result: u64 = 0;
        let mut shift = 0u32;
        loop {
            let byte = self.read_u8()?;
            if shift >= 64 {
                log::error!("Unsigned integer overflows 64 bits");
                return Err(OasError::Decode);
            }
            result |= ((byte & 0x7F) as u64) << shift;
            if byte & 0x80 == 0 {
                return Ok(result);
            }
            shift += 7;
        }
    }
    /// Signed varint: the low bit is the sign, remaining bits the magnitude.
    /// Also the encoding of 1-deltas.
    pub fn read_integer(&mut self) -> OasResult<i64> {
        let value = self.read_unsigned()?;
        if value & 0x01 != 0 {
            Ok(-((value >> 1) as i64))
        } else {
            Ok((value >> 1) as i64)
        }
    }
    /// Read a standalone real: a type tag followed by its payload
    pub fn read_real(&mut self) -> OasResult<f64> {
        let tag = self.read_unsigned()?;
        match OasisDataType::from_u64(tag) {
            Some(dtype) if tag <= OasisDataType::RealDouble as u64 => self.read_real_by_type(dtype),
            _ => {
                log::error!("Invalid real type tag {}", tag);
                Err(OasError::Decode)
            }
        }
    }
    /// Read the payload of a real whose type tag has already been consumed
    pub fn read_real_by_type(&mut self, dtype: OasisDataType) -> OasResult<f64> {
        Ok(match dtype {
            OasisDataType::RealPositiveInteger => self.read_unsigned()? as f64,
            OasisDataType::RealNegativeInteger => -(self.read_unsigned()? as f64),
            OasisDataType::RealPositiveReciprocal => 1.0 / self.read_unsigned()? as f64,
            OasisDataType::RealNegativeReciprocal => -1.0 / self.read_unsigned()? as f64,
            OasisDataType::RealPositiveRatio => {
                let num = self.read_unsigned()? as f64;
                num / self.read_unsigned()? as f64
            }
            OasisDataType::RealNegativeRatio => {
                let num = self.read_unsigned()? as f64;
                -num / self.read_unsigned()? as f64
            }
            OasisDataType::RealFloat => {
                let mut bytes = [0u8; 4];
                self.read(&mut bytes)?;
                bytes.as_ref().read_f32::<LittleEndian>()? as f64
            }
            OasisDataType::RealDouble => {
                let mut bytes = [0u8; 8];
                self.read(&mut bytes)?;
                bytes.as_ref().read_f64::<LittleEndian>()?
            }
            _ => {
                log::error!("Data type {:?} is not a real encoding", dtype);
                return Err(OasError::Decode);
            }
        })
    }
    /// Length-prefixed byte string
    pub fn read_string(&mut self) -> OasResult<Vec<u8>> {
        let len = self.read_unsigned()?;
        let mut bytes = vec![0u8; len as usize];
        self.read(&mut bytes)?;
        Ok(bytes)
    }
    /// One-dimensional delta: a signed varint
    pub fn read_1delta(&mut self) -> OasResult<i64> {
        self.read_integer()
    }
    /// Two-bit-direction delta
    pub fn read_2delta(&mut self) -> OasResult<(i64, i64)> {
        let value = self.read_unsigned()?;
        let (dx, dy) = delta2_direction(value);
        let magnitude = (value >> 2) as i64;
        Ok((dx * magnitude, dy * magnitude))
    }
    /// Three-bit-direction (octant) delta
    pub fn read_3delta(&mut self) -> OasResult<(i64, i64)> {
        let value = self.read_unsigned()?;
        let (dx, dy) = delta3_direction(value);
        let magnitude = (value >> 3) as i64;
        Ok((dx * magnitude, dy * magnitude))
    }
    /// General delta: either a 3-delta (bit 0 clear) or an explicit
    /// signed (x, y) pair (bit 0 set)
    pub fn read_gdelta(&mut self) -> OasResult<(i64, i64)> {
        let value = self.read_unsigned()?;
        if value & 0x01 == 0 {
            let (dx, dy) = delta3_direction(value >> 1);
            let magnitude = (value >> 4) as i64;
            Ok((dx * magnitude, dy * magnitude))
        } else {
            let x = if value & 0x02 != 0 {
                -((value >> 2) as i64)
            } else {
                (value >> 2) as i64
            };
            let y = self.read_integer()?;
            Ok((x, y))
        }
    }
    /// Read a point list into `result`, scaled by `factor`, as positions
    /// relative to an implied `(0, 0)` origin vertex (which is *not* stored).
    /// For `closed` lists of the Manhattan types, the implied final vertex
    /// is computed and appended.
    ///
    /// Point-list types, as they appear on the wire:
    /// 0/1 Manhattan 1-deltas (horizontal/vertical first), 2 two-bit-direction
    /// deltas, 3 octangular deltas, 4 general deltas, 5 double
    /// (delta-of-delta) general deltas.
    pub fn read_point_list(
        &mut self,
        factor: f64,
        closed: bool,
        result: &mut Vec<Vec2>,
    ) -> OasResult<()> {
        let ptype = self.read_unsigned()?;
        let count = self.read_unsigned()?;
        result.reserve(count as usize + 1);
        let mut cur = Vec2::zero();
        match ptype {
            0 | 1 => {
                let mut horizontal = ptype == 0;
                for _ in 0..count {
                    let length = factor * self.read_1delta()? as f64;
                    if horizontal {
                        cur.x += length;
                    } else {
                        cur.y += length;
                    }
                    horizontal = !horizontal;
                    result.push(cur);
                }
                if closed {
                    // One further vertex is implied by the closure
                    if horizontal {
                        result.push(Vec2::new(0.0, cur.y));
                    } else {
                        result.push(Vec2::new(cur.x, 0.0));
                    }
                }
            }
            2 => {
                for _ in 0..count {
                    let (dx, dy) = self.read_2delta()?;
                    cur += Vec2::new(factor * dx as f64, factor * dy as f64);
                    result.push(cur);
                }
            }
            3 => {
                for _ in 0..count {
                    let (dx, dy) = self.read_3delta()?;
                    cur += Vec2::new(factor * dx as f64, factor * dy as f64);
                    result.push(cur);
                }
            }
            4 => {
                for _ in 0..count {
                    let (dx, dy) = self.read_gdelta()?;
                    cur += Vec2::new(factor * dx as f64, factor * dy as f64);
                    result.push(cur);
                }
            }
            5 => {
                let mut delta = Vec2::zero();
                for _ in 0..count {
                    let (dx, dy) = self.read_gdelta()?;
                    delta += Vec2::new(factor * dx as f64, factor * dy as f64);
                    cur += delta;
                    result.push(cur);
                }
            }
            _ => {
                log::error!("Invalid point list type {}", ptype);
                return Err(OasError::Decode);
            }
        }
        Ok(())
    }
    /// Read a repetition into the modal register.
    /// Type 0 reuses the modal value, so `modal` is left untouched.
    pub fn read_repetition(&mut self, factor: f64, modal: &mut Repetition) -> OasResult<()> {
        let rtype = self.read_unsigned()?;
        match rtype {
            0 => (),
            1 => {
                let columns = self.read_unsigned()? + 2;
                let rows = self.read_unsigned()? + 2;
                let x = factor * self.read_unsigned()? as f64;
                let y = factor * self.read_unsigned()? as f64;
                *modal = Repetition::Rectangular {
                    columns,
                    rows,
                    spacing: Vec2::new(x, y),
                };
            }
            2 => {
                let columns = self.read_unsigned()? + 2;
                let x = factor * self.read_unsigned()? as f64;
                *modal = Repetition::Rectangular {
                    columns,
                    rows: 1,
                    spacing: Vec2::new(x, 0.0),
                };
            }
            3 => {
                let rows = self.read_unsigned()? + 2;
                let y = factor * self.read_unsigned()? as f64;
                *modal = Repetition::Rectangular {
                    columns: 1,
                    rows,
                    spacing: Vec2::new(0.0, y),
                };
            }
            4 | 5 => {
                let count = self.read_unsigned()? + 1;
                let grid = if rtype == 5 { self.read_unsigned()? } else { 1 };
                let mut offsets = Vec::with_capacity(count as usize);
                let mut x = 0.0;
                for _ in 0..count {
                    x += factor * (grid * self.read_unsigned()?) as f64;
                    offsets.push(Vec2::new(x, 0.0));
                }
                *modal = Repetition::Explicit { offsets };
            }
            6 | 7 => {
                let count = self.read_unsigned()? + 1;
                let grid = if rtype == 7 { self.read_unsigned()? } else { 1 };
                let mut offsets = Vec::with_capacity(count as usize);
                let mut y = 0.0;
                for _ in 0..count {
                    y += factor * (grid * self.read_unsigned()?) as f64;
                    offsets.push(Vec2::new(0.0, y));
                }
                *modal = Repetition::Explicit { offsets };
            }
            8 => {
                let columns = self.read_unsigned()? + 2;
                let rows = self.read_unsigned()? + 2;
                let (x1, y1) = self.read_gdelta()?;
                let (x2, y2) = self.read_gdelta()?;
                *modal = Repetition::Regular {
                    columns,
                    rows,
                    v1: Vec2::new(factor * x1 as f64, factor * y1 as f64),
                    v2: Vec2::new(factor * x2 as f64, factor * y2 as f64),
                };
            }
            9 => {
                let count = self.read_unsigned()? + 2;
                let (x, y) = self.read_gdelta()?;
                let step = Vec2::new(factor * x as f64, factor * y as f64);
                // Single-axis grids share this type; a purely vertical step
                // encodes the row axis, anything else the column axis
                *modal = if x == 0 && y != 0 {
                    Repetition::Regular {
                        columns: 1,
                        rows: count,
                        v1: Vec2::zero(),
                        v2: step,
                    }
                } else {
                    Repetition::Regular {
                        columns: count,
                        rows: 1,
                        v1: step,
                        v2: Vec2::zero(),
                    }
                };
            }
            10 | 11 => {
                let count = self.read_unsigned()? + 1;
                let grid = if rtype == 11 {
                    self.read_unsigned()? as i64
                } else {
                    1
                };
                let mut offsets = Vec::with_capacity(count as usize);
                let mut cur = Vec2::zero();
                for _ in 0..count {
                    let (dx, dy) = self.read_gdelta()?;
                    cur += Vec2::new(factor * (grid * dx) as f64, factor * (grid * dy) as f64);
                    offsets.push(cur);
                }
                *modal = Repetition::Explicit { offsets };
            }
            _ => {
                log::error!("Invalid repetition type {}", rtype);
                return Err(OasError::Decode);
            }
        }
        Ok(())
    }
    /// Inflate a `CBLOCK` payload; subsequent reads drain the inflated
    /// buffer before returning to the file.
    pub fn inflate_cblock(&mut self) -> OasResult<()> {
        let uncompressed_size = self.read_unsigned()?;
        let compressed_size = self.read_unsigned()?;
        let mut compressed = vec![0u8; compressed_size as usize];
        self.read(&mut compressed)?;
        let mut data = Vec::with_capacity(uncompressed_size as usize);
        let mut decoder = DeflateDecoder::new(&compressed[..]);
        if let Err(e) = decoder.read_to_end(&mut data) {
            log::error!("Unable to decompress CBLOCK: {}", e);
        }
        if data.len() as u64 != uncompressed_size {
            log::warn!(
                "CBLOCK inflated to {} bytes, expected {}",
                data.len(),
                uncompressed_size
            );
        }
        self.inflated = Some(Cursor::new(data));
        Ok(())
    }
    /// Skip `len` bytes of the underlying file
    pub fn skip(&mut self, len: u64) -> OasResult<()> {
        self.file.seek(SeekFrom::Current(len as i64))?;
        Ok(())
    }
    /// Seek the underlying file to its end, discarding any inflated buffer
    pub fn seek_end(&mut self) -> OasResult<()> {
        self.inflated = None;
        self.file.seek(SeekFrom::End(0))?;
        Ok(())
    }
}

/// # Oasis Writing Stream
///
/// Writes either directly to `file`, or into an in-memory staging buffer
/// while a cell body destined for a `CBLOCK` is being assembled.
pub struct OasisWriter<W: Write + Seek> {
    file: W,
    staging: Option<Vec<u8>>,
}
impl<W: Write + Seek> OasisWriter<W> {
    pub fn new(file: W) -> Self {
        Self {
            file,
            staging: None,
        }
    }
    /// Current position in the output file.
    /// Only meaningful outside a `CBLOCK` staging region.
    pub fn position(&mut self) -> OasResult<u64> {
        Ok(self.file.stream_position()?)
    }
    pub fn write(&mut self, bytes: &[u8]) -> OasResult<()> {
        match self.staging.as_mut() {
            Some(buffer) => buffer.extend_from_slice(bytes),
            None => self.file.write_all(bytes)?,
        }
        Ok(())
    }
    pub fn write_u8(&mut self, byte: u8) -> OasResult<()> {
        self.write(&[byte])
    }
    pub fn write_record(&mut self, record: OasisRecordType) -> OasResult<()> {
        self.write_u8(record as u8)
    }
    /// 7-bit little-endian varint, continuation bit in the MSB
    pub fn write_unsigned(&mut self, mut value: u64) -> OasResult<()> {
        loop {
            let mut byte = (value & 0x7F) as u8;
            value >>= 7;
            if value != 0 {
                byte |= 0x80;
            }
            self.write_u8(byte)?;
            if value == 0 {
                return Ok(());
            }
        }
    }
    /// Signed varint: low bit sign, remaining bits magnitude
    pub fn write_integer(&mut self, value: i64) -> OasResult<()> {
        if value < 0 {
            self.write_unsigned(((-value as u64) << 1) | 0x01)
        } else {
            self.write_unsigned((value as u64) << 1)
        }
    }
    /// Write a real with its type tag: an integer subtype where exact,
    /// an IEEE double otherwise
    pub fn write_real(&mut self, value: f64) -> OasResult<()> {
        if value.trunc() == value && value.abs() < 9.0e15 {
            if value >= 0.0 {
                self.write_unsigned(OasisDataType::RealPositiveInteger as u64)?;
                self.write_unsigned(value as u64)
            } else {
                self.write_unsigned(OasisDataType::RealNegativeInteger as u64)?;
                self.write_unsigned(-value as u64)
            }
        } else {
            self.write_unsigned(OasisDataType::RealDouble as u64)?;
            let mut bytes = [0u8; 8];
            bytes.as_mut().write_f64::<LittleEndian>(value)?;
            self.write(&bytes)
        }
    }
    /// Length-prefixed byte string
    pub fn write_string(&mut self, bytes: &[u8]) -> OasResult<()> {
        self.write_unsigned(bytes.len() as u64)?;
        self.write(bytes)
    }
    /// General delta, always in the explicit two-varint form
    pub fn write_gdelta(&mut self, x: i64, y: i64) -> OasResult<()> {
        let first = if x < 0 {
            (((-x) as u64) << 2) | 0x03
        } else {
            ((x as u64) << 2) | 0x01
        };
        self.write_unsigned(first)?;
        self.write_integer(y)
    }
    /// Write `points` as a point list of deltas from its first vertex,
    /// choosing a Manhattan type where the geometry allows and general
    /// deltas otherwise.
    pub fn write_point_list(
        &mut self,
        points: &[Vec2],
        scaling: f64,
        closed: bool,
    ) -> OasResult<()> {
        let verts: Vec<(i64, i64)> = points
            .iter()
            .map(|p| (scale_coord(p.x, scaling), scale_coord(p.y, scaling)))
            .collect();
        let deltas: Vec<(i64, i64)> = verts
            .windows(2)
            .map(|pair| (pair[1].0 - pair[0].0, pair[1].1 - pair[0].1))
            .collect();
        if let Some((ptype, count)) = manhattan_type(&verts, &deltas, closed) {
            self.write_unsigned(ptype)?;
            self.write_unsigned(count)?;
            for delta in &deltas[..count as usize] {
                self.write_integer(if delta.1 == 0 { delta.0 } else { delta.1 })?;
            }
        } else {
            self.write_unsigned(4)?;
            self.write_unsigned(deltas.len() as u64)?;
            for delta in &deltas {
                self.write_gdelta(delta.0, delta.1)?;
            }
        }
        Ok(())
    }
    /// Write a repetition, preceded by its type
    pub fn write_repetition(&mut self, repetition: &Repetition, scaling: f64) -> OasResult<()> {
        match repetition {
            Repetition::None => Ok(()),
            Repetition::Rectangular {
                columns,
                rows,
                spacing,
            } => {
                // The grid types carry unsigned spacings; fall back to
                // vector form for anything negative
                if spacing.x < 0.0 || spacing.y < 0.0 {
                    return self.write_repetition(
                        &Repetition::Regular {
                            columns: (*columns).max(2),
                            rows: (*rows).max(2),
                            v1: Vec2::new(spacing.x, 0.0),
                            v2: Vec2::new(0.0, spacing.y),
                        },
                        scaling,
                    );
                }
                if *columns > 1 && *rows > 1 {
                    self.write_unsigned(1)?;
                    self.write_unsigned(columns - 2)?;
                    self.write_unsigned(rows - 2)?;
                    self.write_unsigned(scale_coord(spacing.x, scaling) as u64)?;
                    self.write_unsigned(scale_coord(spacing.y, scaling) as u64)
                } else if *columns > 1 {
                    self.write_unsigned(2)?;
                    self.write_unsigned(columns - 2)?;
                    self.write_unsigned(scale_coord(spacing.x, scaling) as u64)
                } else {
                    self.write_unsigned(3)?;
                    self.write_unsigned(rows.saturating_sub(2))?;
                    self.write_unsigned(scale_coord(spacing.y, scaling) as u64)
                }
            }
            Repetition::Regular {
                columns,
                rows,
                v1,
                v2,
            } => {
                if *columns > 1 && *rows > 1 {
                    self.write_unsigned(8)?;
                    self.write_unsigned(columns - 2)?;
                    self.write_unsigned(rows - 2)?;
                    self.write_gdelta(scale_coord(v1.x, scaling), scale_coord(v1.y, scaling))?;
                    self.write_gdelta(scale_coord(v2.x, scaling), scale_coord(v2.y, scaling))
                } else if *columns > 1 {
                    // Type 9 carries no axis marker; the reader recovers it
                    // from the step orientation
                    self.write_unsigned(9)?;
                    self.write_unsigned(columns - 2)?;
                    self.write_gdelta(scale_coord(v1.x, scaling), scale_coord(v1.y, scaling))
                } else {
                    self.write_unsigned(9)?;
                    self.write_unsigned(rows.saturating_sub(2))?;
                    self.write_gdelta(scale_coord(v2.x, scaling), scale_coord(v2.y, scaling))
                }
            }
            Repetition::Explicit { offsets } => {
                if offsets.is_empty() {
                    log::warn!("Explicit repetition without offsets; not written");
                    return Ok(());
                }
                self.write_unsigned(10)?;
                // The count excludes the implied origin instance
                self.write_unsigned(offsets.len() as u64 - 1)?;
                let mut prev = Vec2::zero();
                for offset in offsets.iter() {
                    self.write_gdelta(
                        scale_coord(offset.x - prev.x, scaling),
                        scale_coord(offset.y - prev.y, scaling),
                    )?;
                    prev = *offset;
                }
                Ok(())
            }
        }
    }
    /// Recover the underlying destination
    pub fn into_inner(self) -> W {
        self.file
    }
    /// Begin staging output in memory, for an eventual `CBLOCK`
    pub fn begin_cblock(&mut self) {
        self.staging = Some(Vec::new());
    }
    /// Deflate the staged bytes and emit them as a `CBLOCK` record,
    /// returning subsequent writes to the file.
    pub fn end_cblock(&mut self, level: u32) -> OasResult<()> {
        let data = match self.staging.take() {
            Some(data) => data,
            None => return Ok(()),
        };
        let mut encoder = DeflateEncoder::new(Vec::new(), Compression::new(level));
        encoder.write_all(&data)?;
        let compressed = encoder.finish()?;
        self.write_record(OasisRecordType::Cblock)?;
        self.write_unsigned(0)?; // compression type: DEFLATE
        self.write_unsigned(data.len() as u64)?;
        self.write_unsigned(compressed.len() as u64)?;
        self.write(&compressed)
    }
}

/// Convert a user-unit coordinate to database units
pub(crate) fn scale_coord(value: f64, scaling: f64) -> i64 {
    (value * scaling).round() as i64
}

/// Decide whether `verts` (via its `deltas`) can be stored as a Manhattan
/// point list, returning `(type, delta_count)` when it can.
fn manhattan_type(verts: &[(i64, i64)], deltas: &[(i64, i64)], closed: bool) -> Option<(u64, u64)> {
    // Axis of a delta: horizontal, vertical, or disqualifying
    let axis = |delta: &(i64, i64)| -> Option<bool> {
        if delta.1 == 0 && delta.0 != 0 {
            Some(true)
        } else if delta.0 == 0 && delta.1 != 0 {
            Some(false)
        } else {
            None
        }
    };
    let count = if closed {
        // The final vertex is implied; its two closing edges are not stored
        if verts.len() < 4 || verts.len() % 2 != 0 {
            return None;
        }
        verts.len() - 2
    } else {
        deltas.len()
    };
    if count == 0 {
        return None;
    }
    let first = axis(&deltas[0])?;
    let mut expect = first;
    for delta in &deltas[..count] {
        if axis(delta)? != expect {
            return None;
        }
        expect = !expect;
    }
    if closed {
        // Simulate the implied vertex the reader will reconstruct and
        // require it to land on the actual final vertex
        let origin = verts[0];
        let cur = (verts[count].0 - origin.0, verts[count].1 - origin.1);
        let implied = if expect { (0, cur.1) } else { (cur.0, 0) };
        let last = verts.len() - 1;
        let actual = (verts[last].0 - origin.0, verts[last].1 - origin.1);
        if implied != actual {
            return None;
        }
    }
    Some((if first { 0 } else { 1 }, count as u64))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip_stream() -> OasisWriter<Cursor<Vec<u8>>> {
        OasisWriter::new(Cursor::new(Vec::new()))
    }
    fn reader_of(writer: OasisWriter<Cursor<Vec<u8>>>) -> OasisReader<Cursor<Vec<u8>>> {
        let mut cursor = writer.file;
        cursor.set_position(0);
        OasisReader::new(cursor)
    }

    #[test]
    fn unsigned_roundtrip() {
        let mut w = roundtrip_stream();
        let values = [0u64, 1, 127, 128, 300, 16383, 16384, u64::MAX];
        for v in values {
            w.write_unsigned(v).unwrap();
        }
        let mut r = reader_of(w);
        for v in values {
            assert_eq!(r.read_unsigned().unwrap(), v);
        }
    }

    #[test]
    fn unsigned_known_bytes() {
        let mut w = roundtrip_stream();
        w.write_unsigned(128).unwrap();
        assert_eq!(w.file.get_ref().as_slice(), &[0x80, 0x01]);
    }

    #[test]
    fn integer_roundtrip() {
        let mut w = roundtrip_stream();
        let values = [0i64, 1, -1, 63, -64, 1 << 40, -(1 << 40)];
        for v in values {
            w.write_integer(v).unwrap();
        }
        let mut r = reader_of(w);
        for v in values {
            assert_eq!(r.read_integer().unwrap(), v);
        }
    }

    #[test]
    fn real_roundtrip() {
        let mut w = roundtrip_stream();
        let values = [0.0, 1.0, -2.0, 0.5, -0.125, 3.14159265358979, 1e-9];
        for v in values {
            w.write_real(v).unwrap();
        }
        let mut r = reader_of(w);
        for v in values {
            assert_eq!(r.read_real().unwrap(), v);
        }
    }

    #[test]
    fn real_reciprocal_and_ratio() {
        // Hand-encode subtypes the writer never produces
        let mut w = roundtrip_stream();
        w.write_unsigned(2).unwrap(); // 1/4
        w.write_unsigned(4).unwrap();
        w.write_unsigned(5).unwrap(); // -3/8
        w.write_unsigned(3).unwrap();
        w.write_unsigned(8).unwrap();
        let mut r = reader_of(w);
        assert_eq!(r.read_real().unwrap(), 0.25);
        assert_eq!(r.read_real().unwrap(), -0.375);
    }

    #[test]
    fn gdelta_roundtrip() {
        let mut w = roundtrip_stream();
        let values = [(0i64, 0i64), (5, 0), (-5, 3), (12345, -6789), (0, -1)];
        for (x, y) in values {
            w.write_gdelta(x, y).unwrap();
        }
        let mut r = reader_of(w);
        for (x, y) in values {
            assert_eq!(r.read_gdelta().unwrap(), (x, y));
        }
    }

    #[test]
    fn two_and_three_delta_directions() {
        let mut w = roundtrip_stream();
        // 2-delta: west, magnitude 7 -> (7 << 2) | 2
        w.write_unsigned((7 << 2) | 2).unwrap();
        // 3-delta: northeast, magnitude 3 -> (3 << 3) | 4
        w.write_unsigned((3 << 3) | 4).unwrap();
        let mut r = reader_of(w);
        assert_eq!(r.read_2delta().unwrap(), (-7, 0));
        assert_eq!(r.read_3delta().unwrap(), (3, 3));
    }

    #[test]
    fn point_list_manhattan_closed() {
        // A rectangle: strictly alternating Manhattan edges
        let points = [
            Vec2::new(0.0, 0.0),
            Vec2::new(4.0, 0.0),
            Vec2::new(4.0, 3.0),
            Vec2::new(0.0, 3.0),
        ];
        let mut w = roundtrip_stream();
        w.write_point_list(&points, 1.0, true).unwrap();
        let mut r = reader_of(w);
        let mut result = Vec::new();
        r.read_point_list(1.0, true, &mut result).unwrap();
        // Relative to the first vertex; the origin itself is implied
        assert_eq!(result.len(), 3);
        assert_eq!(result[0], Vec2::new(4.0, 0.0));
        assert_eq!(result[1], Vec2::new(4.0, 3.0));
        assert_eq!(result[2], Vec2::new(0.0, 3.0));
    }

    #[test]
    fn point_list_general_open() {
        let points = [
            Vec2::new(1.0, 1.0),
            Vec2::new(4.0, 5.0),
            Vec2::new(-2.0, 3.0),
        ];
        let mut w = roundtrip_stream();
        w.write_point_list(&points, 1.0, false).unwrap();
        let mut r = reader_of(w);
        let mut result = Vec::new();
        r.read_point_list(1.0, false, &mut result).unwrap();
        assert_eq!(result.len(), 2);
        assert_eq!(result[0], Vec2::new(3.0, 4.0));
        assert_eq!(result[1], Vec2::new(-3.0, 2.0));
    }

    #[test]
    fn repetition_roundtrip() {
        let reps = [
            Repetition::Rectangular {
                columns: 3,
                rows: 2,
                spacing: Vec2::new(10.0, 20.0),
            },
            Repetition::Regular {
                columns: 2,
                rows: 4,
                v1: Vec2::new(1.0, 2.0),
                v2: Vec2::new(-3.0, 4.0),
            },
            // Single-axis grids: one per axis, both through type 9
            Repetition::Regular {
                columns: 4,
                rows: 1,
                v1: Vec2::new(2.0, 1.0),
                v2: Vec2::zero(),
            },
            Repetition::Regular {
                columns: 1,
                rows: 3,
                v1: Vec2::zero(),
                v2: Vec2::new(0.0, 7.0),
            },
            Repetition::Explicit {
                offsets: vec![Vec2::new(5.0, 5.0), Vec2::new(7.0, -1.0)],
            },
        ];
        let mut w = roundtrip_stream();
        for rep in reps.iter() {
            w.write_repetition(rep, 1.0).unwrap();
        }
        let mut r = reader_of(w);
        for rep in reps.iter() {
            let mut modal = Repetition::None;
            r.read_repetition(1.0, &mut modal).unwrap();
            assert_eq!(&modal, rep);
        }
    }

    #[test]
    fn cblock_staging() {
        let mut w = roundtrip_stream();
        w.write_u8(0xAA).unwrap();
        w.begin_cblock();
        for _ in 0..100 {
            w.write(b"repetitive payload ").unwrap();
        }
        w.end_cblock(6).unwrap();
        let mut r = reader_of(w);
        assert_eq!(r.read_u8().unwrap(), 0xAA);
        assert_eq!(r.read_u8().unwrap(), OasisRecordType::Cblock as u8);
        assert_eq!(r.read_unsigned().unwrap(), 0);
        r.inflate_cblock().unwrap();
        let mut inflated = vec![0u8; 19 * 100];
        r.read(&mut inflated).unwrap();
        assert!(inflated.starts_with(b"repetitive payload "));
    }
}
