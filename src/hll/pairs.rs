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

//! Uniform traversal over (slot, value) pairs.
//!
//! Every representation (coupon tables and the three register encodings)
//! can be walked as a sequence of pairs, either every slot (zeros included)
//! or valid (nonzero) slots only. Iterators are single-pass and never
//! mutate the underlying data. Merging, re-encoding, and diagnostic dumps
//! are all written against this protocol.
//!
//! For coupon sources the slot is the coupon's full 26-bit address, so
//! `pack_coupon(slot, value)` reconstructs the original coupon losslessly.

use crate::hll::array4::Array4;
use crate::hll::array6::Array6;
use crate::hll::array8::Array8;
use crate::hll::get_slot;
use crate::hll::get_value;

enum PairSource<'a> {
    Coupons(&'a [u32]),
    Dense8(&'a Array8),
    Dense6(&'a Array6),
    Dense4(&'a Array4),
}

impl PairSource<'_> {
    fn len(&self) -> usize {
        match self {
            PairSource::Coupons(slots) => slots.len(),
            PairSource::Dense8(arr) => arr.num_registers(),
            PairSource::Dense6(arr) => arr.num_registers(),
            PairSource::Dense4(arr) => arr.num_registers(),
        }
    }

    fn pair(&self, index: usize) -> (u32, u8) {
        match self {
            PairSource::Coupons(slots) => {
                let coupon = slots[index];
                (get_slot(coupon), get_value(coupon))
            }
            PairSource::Dense8(arr) => (index as u32, arr.get(index as u32)),
            PairSource::Dense6(arr) => (index as u32, arr.get(index as u32)),
            PairSource::Dense4(arr) => (index as u32, arr.get(index as u32)),
        }
    }
}

/// Single-pass iterator over (slot, value) pairs of one representation.
pub(crate) struct Pairs<'a> {
    src: PairSource<'a>,
    index: usize,
    valid_only: bool,
}

impl<'a> Pairs<'a> {
    /// Valid (nonzero) coupons of a list or set table.
    pub fn over_coupons(slots: &'a [u32]) -> Self {
        Self {
            src: PairSource::Coupons(slots),
            index: 0,
            valid_only: true,
        }
    }

    pub fn over_array8(arr: &'a Array8, valid_only: bool) -> Self {
        Self {
            src: PairSource::Dense8(arr),
            index: 0,
            valid_only,
        }
    }

    pub fn over_array6(arr: &'a Array6, valid_only: bool) -> Self {
        Self {
            src: PairSource::Dense6(arr),
            index: 0,
            valid_only,
        }
    }

    /// Pairs of a 4-bit array carry the *true* register values; sentinel
    /// slots are resolved through the auxiliary table.
    pub fn over_array4(arr: &'a Array4, valid_only: bool) -> Self {
        Self {
            src: PairSource::Dense4(arr),
            index: 0,
            valid_only,
        }
    }
}

impl Iterator for Pairs<'_> {
    type Item = (u32, u8);

    fn next(&mut self) -> Option<(u32, u8)> {
        while self.index < self.src.len() {
            let (slot, value) = self.src.pair(self.index);
            self.index += 1;
            if !self.valid_only || value != 0 {
                return Some((slot, value));
            }
        }
        None
    }
}
