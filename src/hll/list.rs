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

//! Unsorted list of up to eight unique coupons.
//!
//! Sequential storage with a linear duplicate scan. The ninth distinct
//! coupon overflows the list and the sketch promotes to set mode.

use crate::hll::COUPON_EMPTY;
use crate::hll::container::Container;
use crate::hll::container::CouponUpdate;

pub(crate) const LG_INIT_LIST_SIZE: usize = 3;

/// List for sequential coupon storage with duplicate detection
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct CouponList {
    pub(crate) container: Container,
}

impl Default for CouponList {
    fn default() -> Self {
        Self::new()
    }
}

impl CouponList {
    pub fn new() -> Self {
        Self {
            container: Container::new(LG_INIT_LIST_SIZE),
        }
    }

    /// Create list from existing coupons (for deserialization)
    pub fn from_coupons(coupons: Box<[u32]>, len: usize) -> Self {
        Self {
            container: Container::from_coupons(LG_INIT_LIST_SIZE, coupons, len),
        }
    }

    pub fn len(&self) -> usize {
        self.container.len
    }

    pub fn is_empty(&self) -> bool {
        self.container.is_empty()
    }

    /// Offer a coupon to the list.
    ///
    /// Returns [`CouponUpdate::Full`] when the list holds eight distinct
    /// coupons and this one is new; the caller promotes to set mode and
    /// retries the insert there.
    pub fn update(&mut self, coupon: u32) -> CouponUpdate {
        debug_assert_ne!(coupon, COUPON_EMPTY);

        for value in self.container.coupons.iter_mut() {
            if *value == COUPON_EMPTY {
                *value = coupon;
                self.container.len += 1;
                return CouponUpdate::Inserted;
            }
            if *value == coupon {
                return CouponUpdate::Duplicate;
            }
        }
        CouponUpdate::Full
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_duplicate() {
        let mut list = CouponList::new();
        assert_eq!(list.update(100), CouponUpdate::Inserted);
        assert_eq!(list.update(200), CouponUpdate::Inserted);
        assert_eq!(list.update(100), CouponUpdate::Duplicate);
        assert_eq!(list.len(), 2);
    }

    #[test]
    fn test_overflow_reports_full() {
        let mut list = CouponList::new();
        for c in 1..=8u32 {
            assert_eq!(list.update(c), CouponUpdate::Inserted);
        }
        assert_eq!(list.len(), 8);
        // A duplicate is still recognized when full
        assert_eq!(list.update(8), CouponUpdate::Duplicate);
        // A ninth distinct coupon does not fit
        assert_eq!(list.update(9), CouponUpdate::Full);
        assert_eq!(list.len(), 8);
    }
}
