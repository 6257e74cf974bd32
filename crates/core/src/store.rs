//! Positional, fixed-width record encoding for the non-volatile store.
//!
//! ## Layout
//!
//! ```text
//!   0        1                       1+len(dev0)             ...
//!   +--------+-----------------------+-----------------------+----
//!   | layout | device 0 record       | device 1 record       | ...
//!   | version| (registration order)  |                       |
//!   +--------+-----------------------+-----------------------+----
//! ```
//!
//! Integers and floats are little-endian. Strings occupy a fixed number of
//! bytes, NUL padded, and keep at most `width - 1` bytes of text so a
//! terminator always fits. Records carry no field tags: changing a field order
//! or width requires bumping [`LAYOUT_VERSION`].

use crate::error::StoreError;
use crate::hal::NonVolatileStore;

/// Bump whenever any device record changes shape.
pub const LAYOUT_VERSION: u8 = 1;

/// Size of the header in front of the first device record.
pub const HEADER_LEN: usize = 1;

/// Capacity of the emulated EEPROM on an ESP8266 station.
pub const DEFAULT_CAPACITY: usize = 512;

// ---------------------------------------------------------------------------
// Record trait
// ---------------------------------------------------------------------------

/// A configuration struct with a fixed binary shape.
pub trait Record: Sized {
    /// Exact number of bytes `encode` produces.
    const LEN: usize;

    fn encode(&self, w: &mut RecordWriter);
    fn decode(r: &mut RecordReader<'_>) -> Self;
}

pub struct RecordWriter {
    buf: Vec<u8>,
}

impl RecordWriter {
    pub fn with_capacity(len: usize) -> Self {
        Self {
            buf: Vec::with_capacity(len),
        }
    }

    pub fn u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub fn u16(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn f32(&mut self, v: f32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    /// Fixed-width string, truncated on a char boundary to `width - 1` bytes.
    pub fn str(&mut self, s: &str, width: usize) {
        let mut end = s.len().min(width.saturating_sub(1));
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        self.buf.extend_from_slice(&s.as_bytes()[..end]);
        self.buf.resize(self.buf.len() + (width - end), 0);
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

/// Reads past the end yield zeroes; callers size buffers from `Record::LEN`.
pub struct RecordReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> RecordReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take<const N: usize>(&mut self) -> [u8; N] {
        let mut out = [0u8; N];
        for (i, b) in out.iter_mut().enumerate() {
            *b = self.buf.get(self.pos + i).copied().unwrap_or(0);
        }
        self.pos += N;
        out
    }

    pub fn u8(&mut self) -> u8 {
        self.take::<1>()[0]
    }

    pub fn u16(&mut self) -> u16 {
        u16::from_le_bytes(self.take())
    }

    pub fn f32(&mut self) -> f32 {
        f32::from_le_bytes(self.take())
    }

    /// Text up to the first NUL. Invalid UTF-8 (fresh flash is 0xFF) reads as
    /// lossy text rather than failing.
    pub fn str(&mut self, width: usize) -> String {
        let start = self.pos.min(self.buf.len());
        let end = (self.pos + width).min(self.buf.len());
        self.pos += width;
        let field = &self.buf[start..end];
        let text = field.split(|b| *b == 0).next().unwrap_or_default();
        String::from_utf8_lossy(text).into_owned()
    }
}

pub fn encode<R: Record>(record: &R) -> Vec<u8> {
    let mut w = RecordWriter::with_capacity(R::LEN);
    record.encode(&mut w);
    let bytes = w.into_bytes();
    debug_assert_eq!(bytes.len(), R::LEN, "record encoded to wrong length");
    bytes
}

pub fn decode<R: Record>(bytes: &[u8]) -> R {
    R::decode(&mut RecordReader::new(bytes))
}

// ---------------------------------------------------------------------------
// Store helpers
// ---------------------------------------------------------------------------

fn check_bounds(store: &dyn NonVolatileStore, offset: usize, len: usize) -> Result<(), StoreError> {
    if offset + len > store.capacity() {
        return Err(StoreError::OutOfBounds {
            offset,
            len,
            capacity: store.capacity(),
        });
    }
    Ok(())
}

/// Write `record` at `offset`; returns the offset following it.
pub fn write_record<R: Record>(
    store: &mut dyn NonVolatileStore,
    offset: usize,
    record: &R,
) -> Result<usize, StoreError> {
    check_bounds(store, offset, R::LEN)?;
    store.write(offset, &encode(record))?;
    Ok(offset + R::LEN)
}

/// Read a record at `offset`; returns it with the offset following it.
pub fn read_record<R: Record>(
    store: &dyn NonVolatileStore,
    offset: usize,
) -> Result<(R, usize), StoreError> {
    check_bounds(store, offset, R::LEN)?;
    let mut buf = vec![0u8; R::LEN];
    store.read(offset, &mut buf)?;
    Ok((decode(&buf), offset + R::LEN))
}

pub fn write_header(store: &mut dyn NonVolatileStore) -> Result<usize, StoreError> {
    check_bounds(store, 0, HEADER_LEN)?;
    store.write(0, &[LAYOUT_VERSION])?;
    Ok(HEADER_LEN)
}

/// True when the store was last written with the current layout.
pub fn header_matches(store: &dyn NonVolatileStore) -> Result<bool, StoreError> {
    check_bounds(store, 0, HEADER_LEN)?;
    let mut buf = [0u8; HEADER_LEN];
    store.read(0, &mut buf)?;
    Ok(buf[0] == LAYOUT_VERSION)
}

// ===========================================================================
// Tests
// ===========================================================================
