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

//! Indexed byte access over a sketch image.
//!
//! A [`WritableMem`] is the storage behind a direct sketch: either an owned
//! heap allocation, a borrowed writable region, or a borrowed read-only
//! region. All multi-byte accessors are little-endian regardless of host.
//!
//! Reads past capacity are crate bugs (constructors validate capacity up
//! front) and panic via slice indexing. Writes through a read-only backend
//! surface [`ErrorKind::ReadOnlyViolation`](crate::error::ErrorKind).

use byteorder::ByteOrder;
use byteorder::LittleEndian;

use crate::error::Error;

#[derive(Debug)]
enum MemInner<'a> {
    Owned(Vec<u8>),
    Writable(&'a mut [u8]),
    ReadOnly(&'a [u8]),
}

/// Byte region backing a sketch image.
#[derive(Debug)]
pub(crate) struct WritableMem<'a> {
    inner: MemInner<'a>,
}

impl WritableMem<'_> {
    /// Allocate a zeroed heap region of the given capacity.
    pub fn owned(capacity: usize) -> WritableMem<'static> {
        WritableMem {
            inner: MemInner::Owned(vec![0u8; capacity]),
        }
    }

    /// Borrow an externally owned writable region.
    pub fn writable(region: &mut [u8]) -> WritableMem<'_> {
        WritableMem {
            inner: MemInner::Writable(region),
        }
    }

    /// Borrow an externally owned read-only region.
    ///
    /// Every `put_*` through this backend fails with a read-only violation.
    pub fn read_only(region: &[u8]) -> WritableMem<'_> {
        WritableMem {
            inner: MemInner::ReadOnly(region),
        }
    }

    pub fn capacity(&self) -> usize {
        self.bytes().len()
    }

    pub fn is_read_only(&self) -> bool {
        matches!(self.inner, MemInner::ReadOnly(_))
    }

    pub fn bytes(&self) -> &[u8] {
        match &self.inner {
            MemInner::Owned(v) => v.as_slice(),
            MemInner::Writable(s) => s,
            MemInner::ReadOnly(s) => s,
        }
    }

    fn bytes_mut(&mut self) -> Result<&mut [u8], Error> {
        match &mut self.inner {
            MemInner::Owned(v) => Ok(v.as_mut_slice()),
            MemInner::Writable(s) => Ok(s),
            MemInner::ReadOnly(_) => Err(Error::read_only("write")),
        }
    }

    pub fn slice(&self, offset: usize, len: usize) -> &[u8] {
        &self.bytes()[offset..offset + len]
    }

    pub fn get_u8(&self, offset: usize) -> u8 {
        self.bytes()[offset]
    }

    pub fn get_u16(&self, offset: usize) -> u16 {
        LittleEndian::read_u16(&self.bytes()[offset..offset + 2])
    }

    pub fn get_u24(&self, offset: usize) -> u32 {
        LittleEndian::read_u24(&self.bytes()[offset..offset + 3])
    }

    pub fn get_u32(&self, offset: usize) -> u32 {
        LittleEndian::read_u32(&self.bytes()[offset..offset + 4])
    }

    pub fn get_f64(&self, offset: usize) -> f64 {
        LittleEndian::read_f64(&self.bytes()[offset..offset + 8])
    }

    pub fn put_u8(&mut self, offset: usize, v: u8) -> Result<(), Error> {
        self.bytes_mut()?[offset] = v;
        Ok(())
    }

    pub fn put_u16(&mut self, offset: usize, v: u16) -> Result<(), Error> {
        LittleEndian::write_u16(&mut self.bytes_mut()?[offset..offset + 2], v);
        Ok(())
    }

    pub fn put_u24(&mut self, offset: usize, v: u32) -> Result<(), Error> {
        debug_assert!(v < (1 << 24));
        LittleEndian::write_u24(&mut self.bytes_mut()?[offset..offset + 3], v);
        Ok(())
    }

    pub fn put_u32(&mut self, offset: usize, v: u32) -> Result<(), Error> {
        LittleEndian::write_u32(&mut self.bytes_mut()?[offset..offset + 4], v);
        Ok(())
    }

    pub fn put_f64(&mut self, offset: usize, v: f64) -> Result<(), Error> {
        LittleEndian::write_f64(&mut self.bytes_mut()?[offset..offset + 8], v);
        Ok(())
    }

    /// Zero `len` bytes starting at `offset`.
    pub fn clear(&mut self, offset: usize, len: usize) -> Result<(), Error> {
        self.bytes_mut()?[offset..offset + len].fill(0);
        Ok(())
    }

    /// Bulk copy a slice into the region at `offset`.
    pub fn put_slice(&mut self, offset: usize, src: &[u8]) -> Result<(), Error> {
        self.bytes_mut()?[offset..offset + src.len()].copy_from_slice(src);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_owned_round_trip() {
        let mut mem = WritableMem::owned(64);
        assert_eq!(mem.capacity(), 64);
        assert!(!mem.is_read_only());

        mem.put_u8(0, 0xAB).unwrap();
        mem.put_u24(1, 0x12_3456).unwrap();
        mem.put_u32(4, 0xDEAD_BEEF).unwrap();
        mem.put_f64(8, -2.5).unwrap();

        assert_eq!(mem.get_u8(0), 0xAB);
        assert_eq!(mem.get_u24(1), 0x12_3456);
        assert_eq!(mem.get_u32(4), 0xDEAD_BEEF);
        assert_eq!(mem.get_f64(8), -2.5);
    }

    #[test]
    fn test_little_endian_layout() {
        let mut mem = WritableMem::owned(8);
        mem.put_u32(0, 0x0403_0201).unwrap();
        assert_eq!(mem.slice(0, 4), &[1, 2, 3, 4]);
    }

    #[test]
    fn test_borrowed_writable() {
        let mut backing = [0u8; 16];
        {
            let mut mem = WritableMem::writable(&mut backing);
            mem.put_u32(4, 77).unwrap();
        }
        assert_eq!(backing[4], 77);
    }

    #[test]
    fn test_read_only_rejects_writes() {
        let backing = [1u8, 2, 3, 4];
        let mut mem = WritableMem::read_only(&backing);
        assert!(mem.is_read_only());
        assert_eq!(mem.get_u8(2), 3);

        let err = mem.put_u8(0, 9).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ReadOnlyViolation);
        let err = mem.clear(0, 4).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ReadOnlyViolation);
    }

    #[test]
    fn test_clear_and_put_slice() {
        let mut mem = WritableMem::owned(8);
        mem.put_slice(2, &[9, 9, 9]).unwrap();
        assert_eq!(mem.slice(0, 8), &[0, 0, 9, 9, 9, 0, 0, 0]);
        mem.clear(3, 2).unwrap();
        assert_eq!(mem.slice(0, 8), &[0, 0, 9, 0, 0, 0, 0, 0]);
    }
}
