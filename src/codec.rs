// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.

//! Byte-level writer and reader for serialized sketch images.
//!
//! The serialized format is little-endian throughout, so only the `_le`
//! accessors exist here.

use std::io;
use std::io::Cursor;
use std::io::Read;

/// A simple wrapper around a `Vec<u8>` that provides methods for writing
/// the field types the sketch format uses.
pub(crate) struct SketchBytes {
    bytes: Vec<u8>,
}

impl SketchBytes {
    /// Constructs an empty `SketchBytes` with at least the specified capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            bytes: Vec::with_capacity(capacity),
        }
    }

    /// Consumes the `SketchBytes` and returns the underlying `Vec<u8>`.
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    /// Writes the given byte slice to the `SketchBytes`.
    pub fn write(&mut self, buf: &[u8]) {
        self.bytes.extend_from_slice(buf);
    }

    /// Writes a single byte to the `SketchBytes`.
    pub fn write_u8(&mut self, n: u8) {
        self.bytes.push(n);
    }

    /// Writes a 24-bit unsigned integer in little-endian byte order.
    ///
    /// The value must fit in 24 bits.
    pub fn write_u24_le(&mut self, n: u32) {
        debug_assert!(n < (1 << 24));
        self.write(&n.to_le_bytes()[..3]);
    }

    /// Writes a 32-bit unsigned integer in little-endian byte order.
    pub fn write_u32_le(&mut self, n: u32) {
        self.write(&n.to_le_bytes());
    }

    /// Writes a 64-bit float in little-endian byte order.
    pub fn write_f64_le(&mut self, n: f64) {
        self.write(&n.to_le_bytes());
    }
}

/// Cursor-style reader over a serialized sketch image.
pub(crate) struct SketchSlice<'a> {
    slice: Cursor<&'a [u8]>,
}

impl SketchSlice<'_> {
    pub fn new(slice: &[u8]) -> SketchSlice<'_> {
        SketchSlice {
            slice: Cursor::new(slice),
        }
    }

    pub fn read_exact(&mut self, buf: &mut [u8]) -> io::Result<()> {
        self.slice.read_exact(buf)
    }

    pub fn read_u8(&mut self) -> io::Result<u8> {
        let mut buf = [0u8; 1];
        self.read_exact(&mut buf)?;
        Ok(buf[0])
    }

    pub fn read_u24_le(&mut self) -> io::Result<u32> {
        let mut buf = [0u8; 4];
        self.read_exact(&mut buf[..3])?;
        Ok(u32::from_le_bytes(buf))
    }

    pub fn read_u32_le(&mut self) -> io::Result<u32> {
        let mut buf = [0u8; 4];
        self.read_exact(&mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    pub fn read_f64_le(&mut self) -> io::Result<f64> {
        let mut buf = [0u8; 8];
        self.read_exact(&mut buf)?;
        Ok(f64::from_le_bytes(buf))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let mut bytes = SketchBytes::with_capacity(32);
        bytes.write_u8(7);
        bytes.write_u24_le(0x1F_FFFF);
        bytes.write_u32_le(0xDEAD_BEEF);
        bytes.write_f64_le(1.5);
        let out = bytes.into_bytes();
        assert_eq!(out.len(), 1 + 3 + 4 + 8);

        let mut slice = SketchSlice::new(&out);
        assert_eq!(slice.read_u8().unwrap(), 7);
        assert_eq!(slice.read_u24_le().unwrap(), 0x1F_FFFF);
        assert_eq!(slice.read_u32_le().unwrap(), 0xDEAD_BEEF);
        assert_eq!(slice.read_f64_le().unwrap(), 1.5);
    }

    #[test]
    fn test_read_past_end() {
        let mut slice = SketchSlice::new(&[1, 2]);
        assert_eq!(slice.read_u8().unwrap(), 1);
        assert!(slice.read_u32_le().is_err());
    }
}
