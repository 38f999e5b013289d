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

//! Open-addressed hash set of coupons.
//!
//! The probe starts at the avalanche mix of the coupon truncated to the
//! table size and advances linearly. Both the mixer and the stride are part
//! of the serialized-format contract because updatable images carry the
//! table verbatim and are re-probed after a re-wrap.

use crate::hll::COUPON_EMPTY;
use crate::hll::RESIZE_DENOM;
use crate::hll::RESIZE_NUMER;
use crate::hll::avalanche32;
use crate::hll::container::Container;
use crate::hll::container::CouponUpdate;

pub(crate) const LG_INIT_SET_SIZE: usize = 4;

/// Hash set for coupon storage with linear-probe collision handling
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct CouponSet {
    pub(crate) container: Container,
}

impl Default for CouponSet {
    fn default() -> Self {
        Self::new()
    }
}

impl CouponSet {
    pub fn new() -> Self {
        Self::with_lg(LG_INIT_SET_SIZE)
    }

    /// Create an empty set with a specific table size (for deserialization).
    pub fn with_lg(lg_size: usize) -> Self {
        Self {
            container: Container::new(lg_size),
        }
    }

    pub fn len(&self) -> usize {
        self.container.len
    }

    pub fn is_empty(&self) -> bool {
        self.container.is_empty()
    }

    pub fn lg_size(&self) -> usize {
        self.container.lg_size
    }

    /// Offer a coupon to the set, growing the table when the load factor
    /// passes 3/4.
    pub fn update(&mut self, coupon: u32) -> CouponUpdate {
        debug_assert_ne!(coupon, COUPON_EMPTY);

        let mask = (1usize << self.container.lg_size) - 1;
        let mut probe = (avalanche32(coupon) as usize) & mask;
        let starting_position = probe;

        loop {
            let value = &mut self.container.coupons[probe];
            if *value == COUPON_EMPTY {
                *value = coupon;
                self.container.len += 1;
                break;
            }
            if *value == coupon {
                return CouponUpdate::Duplicate;
            }

            probe = (probe + 1) & mask;
            if probe == starting_position {
                panic!("CouponSet full; no empty slots");
            }
        }

        if self.container.len * RESIZE_DENOM > RESIZE_NUMER << self.container.lg_size {
            self.grow(self.container.lg_size + 1);
        }
        CouponUpdate::Inserted
    }

    /// Internally grow the set container by a power of two, copying all
    /// the existing values to the new container.
    fn grow(&mut self, lg_size: usize) {
        debug_assert!(lg_size > self.container.lg_size);

        let mut new_set = CouponSet::with_lg(lg_size);
        for coupon in self.container.iter_valid() {
            new_set.update(coupon);
        }

        self.container = new_set.container;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_duplicate() {
        let mut set = CouponSet::new();
        assert_eq!(set.update(123), CouponUpdate::Inserted);
        assert_eq!(set.update(456), CouponUpdate::Inserted);
        assert_eq!(set.update(123), CouponUpdate::Duplicate);
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_grows_past_load_factor() {
        let mut set = CouponSet::new();
        assert_eq!(set.lg_size(), LG_INIT_SET_SIZE);

        // 16 slots resize above 12 entries
        for c in 1..=12u32 {
            set.update(c);
        }
        assert_eq!(set.lg_size(), LG_INIT_SET_SIZE);
        set.update(13);
        assert_eq!(set.lg_size(), LG_INIT_SET_SIZE + 1);
        assert_eq!(set.len(), 13);

        // All coupons survived the rehash
        for c in 1..=13u32 {
            assert_eq!(set.update(c), CouponUpdate::Duplicate);
        }
    }

    #[test]
    fn test_same_stream_same_layout() {
        // Two sets fed the same coupon stream place every key identically,
        // which is what keeps heap and direct images bit-identical.
        let coupons: Vec<u32> = (1..=20u32).map(|c| c.wrapping_mul(0x9E37_79B9)).collect();

        let mut a = CouponSet::new();
        let mut b = CouponSet::new();
        for &c in &coupons {
            a.update(c);
            b.update(c);
        }

        assert_eq!(a.container.coupons, b.container.coupons);
    }
}
