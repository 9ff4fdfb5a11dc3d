//! Little-endian wire codec shared by the server and its clients
//!
//! A [`Buffer`] is an append-only byte sequence with a read cursor. Values are
//! written in call order and must be read back in the same order with the
//! same kinds; there are no field names or optional fields on the wire.
//!
//! ```text
//! frame    = i32 length | payload        (length excludes itself)
//! payload  = i32 opcode | fields...
//! string   = i32 byte length | UTF-8 bytes (no terminator)
//! vec3     = f32 x | f32 y | f32 z
//! quat     = f32 x | f32 y | f32 z | f32 w
//! bool     = u8 (0 = false, anything else = true)
//! ```

use crate::math::{Quat, Vec3};
use thiserror::Error;

/// Size of every length prefix and integer field on the wire
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Errors produced while encoding or decoding a [`Buffer`]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    /// A read asked for more bytes than remain unread.
    #[error("read of {requested} bytes exceeds {available} unread bytes")]
    OverRead { requested: usize, available: usize },

    /// A string or byte-range length prefix was negative.
    #[error("negative length prefix {0}")]
    NegativeLength(i32),

    /// String bytes were not valid UTF-8.
    #[error("string field is not valid UTF-8")]
    InvalidUtf8,

    /// `write_length` was called a second time on the same buffer.
    #[error("length prefix already written")]
    LengthAlreadyWritten,

    /// The opcode does not belong to the expected enumeration.
    #[error("unknown opcode {0}")]
    UnknownOpcode(i32),
}

/// Byte buffer with a sequential read cursor
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Buffer {
    bytes: Vec<u8>,
    read_pos: usize,
    length_written: bool,
}

impl Buffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts an outbound message: the opcode is the first field.
    pub fn with_opcode(opcode: i32) -> Self {
        let mut buffer = Self::new();
        buffer.write_i32(opcode);
        buffer
    }

    /// Wraps received bytes for reading from the start.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            read_pos: 0,
            length_written: false,
        }
    }

    /// Total number of bytes held, read or not.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Bytes remaining after the read cursor.
    pub fn unread_len(&self) -> usize {
        self.bytes.len() - self.read_pos
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    /// Appends raw bytes received from a transport.
    pub fn extend_from_slice(&mut self, data: &[u8]) {
        self.bytes.extend_from_slice(data);
    }

    /// Clears the buffer, or with `retain_unread` drops only the consumed
    /// prefix so a partial frame survives until more bytes arrive.
    pub fn reset(&mut self, retain_unread: bool) {
        if retain_unread {
            self.bytes.drain(..self.read_pos);
        } else {
            self.bytes.clear();
            self.length_written = false;
        }
        self.read_pos = 0;
    }

    /// Prepends the current total length, turning the payload into a frame.
    pub fn write_length(&mut self) -> Result<(), WireError> {
        if self.length_written {
            return Err(WireError::LengthAlreadyWritten);
        }
        let length = self.bytes.len() as i32;
        self.bytes.splice(0..0, length.to_le_bytes());
        self.length_written = true;
        Ok(())
    }

    pub fn write_i32(&mut self, value: i32) {
        self.bytes.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_f32(&mut self, value: f32) {
        self.bytes.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_bool(&mut self, value: bool) {
        self.bytes.push(u8::from(value));
    }

    pub fn write_str(&mut self, value: &str) {
        self.write_i32(value.len() as i32);
        self.bytes.extend_from_slice(value.as_bytes());
    }

    pub fn write_vec3(&mut self, value: Vec3) {
        self.write_f32(value.x);
        self.write_f32(value.y);
        self.write_f32(value.z);
    }

    pub fn write_quat(&mut self, value: Quat) {
        self.write_f32(value.x);
        self.write_f32(value.y);
        self.write_f32(value.z);
        self.write_f32(value.w);
    }

    pub fn write_bytes(&mut self, value: &[u8]) {
        self.bytes.extend_from_slice(value);
    }

    /// Reads the next `count` bytes and advances the cursor.
    pub fn read_bytes(&mut self, count: usize) -> Result<&[u8], WireError> {
        let available = self.unread_len();
        if count > available {
            return Err(WireError::OverRead {
                requested: count,
                available,
            });
        }
        let start = self.read_pos;
        self.read_pos += count;
        Ok(&self.bytes[start..self.read_pos])
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N], WireError> {
        let mut array = [0u8; N];
        array.copy_from_slice(self.read_bytes(N)?);
        Ok(array)
    }

    /// Reads an `i32` without moving the cursor.
    pub fn peek_i32(&self) -> Result<i32, WireError> {
        let available = self.unread_len();
        if available < LENGTH_PREFIX_SIZE {
            return Err(WireError::OverRead {
                requested: LENGTH_PREFIX_SIZE,
                available,
            });
        }
        let mut array = [0u8; LENGTH_PREFIX_SIZE];
        array.copy_from_slice(&self.bytes[self.read_pos..self.read_pos + LENGTH_PREFIX_SIZE]);
        Ok(i32::from_le_bytes(array))
    }

    pub fn read_i32(&mut self) -> Result<i32, WireError> {
        self.read_array().map(i32::from_le_bytes)
    }

    pub fn read_f32(&mut self) -> Result<f32, WireError> {
        self.read_array().map(f32::from_le_bytes)
    }

    pub fn read_bool(&mut self) -> Result<bool, WireError> {
        self.read_array::<1>().map(|[b]| b != 0)
    }

    pub fn read_string(&mut self) -> Result<String, WireError> {
        let length = self.read_i32()?;
        let length = usize::try_from(length).map_err(|_| WireError::NegativeLength(length))?;
        let bytes = self.read_bytes(length)?;
        std::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|_| WireError::InvalidUtf8)
    }

    pub fn read_vec3(&mut self) -> Result<Vec3, WireError> {
        Ok(Vec3::new(self.read_f32()?, self.read_f32()?, self.read_f32()?))
    }

    pub fn read_quat(&mut self) -> Result<Quat, WireError> {
        Ok(Quat::new(
            self.read_f32()?,
            self.read_f32()?,
            self.read_f32()?,
            self.read_f32()?,
        ))
    }
}
