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

//! The owned HyperLogLog sketch and its mode state machine.

use std::fmt;
use std::hash::Hash;

use crate::common::NumStdDev;
use crate::common::canonical_double;
use crate::error::Error;
use crate::hll::CurMode;
use crate::hll::HllType;
use crate::hll::MAX_LG_K;
use crate::hll::MIN_LG_K;
use crate::hll::container::CouponUpdate;
use crate::hll::coupon;
use crate::hll::list::CouponList;
use crate::hll::mode::Mode;
use crate::hll::pack_coupon;
use crate::hll::pairs::Pairs;
use crate::hll::serialization;
use crate::hll::set::CouponSet;
use crate::hll::set_promotion_threshold;

/// A HyperLogLog sketch for cardinality estimation.
///
/// The sketch starts in list mode, promotes to set mode at nine distinct
/// coupons, and to a dense register array of the target encoding once the
/// set holds 3K/4 coupons. Promotions never reverse; [`reset`](Self::reset)
/// restarts at an empty list.
///
/// # Examples
///
/// ```
/// use hll_sketch::hll::{HllSketch, HllType};
///
/// let mut sketch = HllSketch::new(12, HllType::Hll8);
/// for i in 0..10_000 {
///     sketch.update(i);
/// }
/// let estimate = sketch.estimate();
/// assert!(estimate > 9_000.0 && estimate < 11_000.0);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct HllSketch {
    lg_config_k: u8,
    tgt_hll_type: HllType,
    mode: Mode,
}

impl HllSketch {
    /// Create an empty sketch with 2^`lg_config_k` registers and the given
    /// target register encoding.
    ///
    /// # Panics
    ///
    /// Panics if `lg_config_k` is not in the range [4, 21].
    pub fn new(lg_config_k: u8, tgt_hll_type: HllType) -> Self {
        assert!(
            (MIN_LG_K..=MAX_LG_K).contains(&lg_config_k),
            "lg_config_k must be in [4, 21], got {lg_config_k}"
        );
        Self {
            lg_config_k,
            tgt_hll_type,
            mode: Mode::List(CouponList::new()),
        }
    }

    pub(crate) fn from_mode(lg_config_k: u8, tgt_hll_type: HllType, mode: Mode) -> Self {
        Self {
            lg_config_k,
            tgt_hll_type,
            mode,
        }
    }

    pub fn lg_config_k(&self) -> u8 {
        self.lg_config_k
    }

    /// The register encoding this sketch uses once it reaches HLL mode.
    pub fn target_type(&self) -> HllType {
        self.tgt_hll_type
    }

    /// The storage mode the sketch is currently in.
    pub fn current_mode(&self) -> CurMode {
        self.mode.cur_mode()
    }

    pub fn is_empty(&self) -> bool {
        match &self.mode {
            Mode::List(list) => list.is_empty(),
            Mode::Set(set) => set.is_empty(),
            _ => false,
        }
    }

    /// Update the sketch with a hashable value.
    ///
    /// For `f32`/`f64` values, use `update_f32`/`update_f64` instead so that
    /// -0.0/0.0 and all NaN bit patterns count as one value each.
    pub fn update<T: Hash>(&mut self, value: T) {
        self.update_with_coupon(coupon(value));
    }

    /// Update the sketch with a canonicalized f64 value.
    pub fn update_f64(&mut self, value: f64) {
        self.update(canonical_double(value));
    }

    /// Update the sketch with a canonicalized f32 value.
    pub fn update_f32(&mut self, value: f32) {
        self.update_f64(value as f64);
    }

    pub(crate) fn update_with_coupon(&mut self, coupon: u32) {
        match &mut self.mode {
            Mode::List(list) => {
                if list.update(coupon) == CouponUpdate::Full {
                    // Ninth distinct coupon: move to set mode and retry
                    let mut set = CouponSet::new();
                    for c in list.container.iter_valid() {
                        set.update(c);
                    }
                    set.update(coupon);
                    self.mode = Mode::Set(set);
                    self.maybe_promote_set();
                }
            }
            Mode::Set(set) => {
                if set.update(coupon) == CouponUpdate::Inserted {
                    self.maybe_promote_set();
                }
            }
            Mode::Hll4(arr) => arr.update(coupon),
            Mode::Hll6(arr) => arr.update(coupon),
            Mode::Hll8(arr) => arr.update(coupon),
        }
    }

    /// Promote set → HLL once the coupon count reaches 3K/4. Every stored
    /// coupon is replayed into a fresh register array of the target
    /// encoding, in table-scan order.
    fn maybe_promote_set(&mut self) {
        let coupons: Vec<u32> = match &self.mode {
            Mode::Set(set) if set.len() >= set_promotion_threshold(self.lg_config_k) => {
                set.container.iter_valid().collect()
            }
            _ => return,
        };

        self.mode = Mode::new_hll(self.lg_config_k, self.tgt_hll_type);
        for c in coupons {
            self.update_with_coupon(c);
        }
    }

    /// Return the cardinality estimate.
    ///
    /// Exact in list/set mode; HIP in HLL mode while the sketch has only
    /// seen its own in-order updates, composite otherwise.
    pub fn estimate(&self) -> f64 {
        match &self.mode {
            Mode::List(list) => list.container.estimate(),
            Mode::Set(set) => set.container.estimate(),
            Mode::Hll4(arr) => arr.estimate(),
            Mode::Hll6(arr) => arr.estimate(),
            Mode::Hll8(arr) => arr.estimate(),
        }
    }

    /// The composite estimate, ignoring HIP.
    ///
    /// Unlike HIP this is a pure function of the register state, so it is
    /// identical for any permutation of the same update stream.
    pub fn composite_estimate(&self) -> f64 {
        match &self.mode {
            Mode::List(list) => list.container.estimate(),
            Mode::Set(set) => set.container.estimate(),
            Mode::Hll4(arr) => {
                arr.estimator()
                    .composite_estimate(self.lg_config_k, arr.cur_min(), arr.num_at_cur_min())
            }
            Mode::Hll6(arr) => {
                arr.estimator()
                    .composite_estimate(self.lg_config_k, 0, arr.num_zeros())
            }
            Mode::Hll8(arr) => {
                arr.estimator()
                    .composite_estimate(self.lg_config_k, 0, arr.num_zeros())
            }
        }
    }

    /// Approximate lower error bound at the given number of standard
    /// deviations. Exact (equal to the estimate) in list/set mode.
    pub fn lower_bound(&self, num_std_dev: NumStdDev) -> f64 {
        match &self.mode {
            Mode::List(list) => list.container.estimate(),
            Mode::Set(set) => set.container.estimate(),
            Mode::Hll4(arr) => arr.estimator().lower_bound(
                self.lg_config_k,
                arr.cur_min(),
                arr.num_at_cur_min(),
                num_std_dev,
            ),
            Mode::Hll6(arr) => {
                arr.estimator()
                    .lower_bound(self.lg_config_k, 0, arr.num_zeros(), num_std_dev)
            }
            Mode::Hll8(arr) => {
                arr.estimator()
                    .lower_bound(self.lg_config_k, 0, arr.num_zeros(), num_std_dev)
            }
        }
    }

    /// Approximate upper error bound at the given number of standard
    /// deviations. Exact (equal to the estimate) in list/set mode.
    pub fn upper_bound(&self, num_std_dev: NumStdDev) -> f64 {
        match &self.mode {
            Mode::List(list) => list.container.estimate(),
            Mode::Set(set) => set.container.estimate(),
            Mode::Hll4(arr) => arr.estimator().upper_bound(
                self.lg_config_k,
                arr.cur_min(),
                arr.num_at_cur_min(),
                num_std_dev,
            ),
            Mode::Hll6(arr) => {
                arr.estimator()
                    .upper_bound(self.lg_config_k, 0, arr.num_zeros(), num_std_dev)
            }
            Mode::Hll8(arr) => {
                arr.estimator()
                    .upper_bound(self.lg_config_k, 0, arr.num_zeros(), num_std_dev)
            }
        }
    }

    /// Restart as an empty list-mode sketch with the same configuration.
    pub fn reset(&mut self) {
        self.mode = Mode::List(CouponList::new());
    }

    /// An independent copy of this sketch.
    pub fn copy(&self) -> HllSketch {
        self.clone()
    }

    /// Re-encode this sketch with a different target register encoding.
    ///
    /// Register values are preserved element-wise and the estimator state
    /// is carried over, so HIP, composite estimate, and bounds are
    /// unchanged up to floating-point identity.
    pub fn copy_as(&self, tgt_hll_type: HllType) -> HllSketch {
        if tgt_hll_type == self.tgt_hll_type {
            return self.clone();
        }
        let mode = match &self.mode {
            Mode::List(list) => Mode::List(list.clone()),
            Mode::Set(set) => Mode::Set(set.clone()),
            Mode::Hll4(arr) => self.convert(Pairs::over_array4(arr, true), arr.estimator().clone(), tgt_hll_type),
            Mode::Hll6(arr) => self.convert(Pairs::over_array6(arr, true), arr.estimator().clone(), tgt_hll_type),
            Mode::Hll8(arr) => self.convert(Pairs::over_array8(arr, true), arr.estimator().clone(), tgt_hll_type),
        };
        HllSketch::from_mode(self.lg_config_k, tgt_hll_type, mode)
    }

    fn convert(
        &self,
        pairs: Pairs<'_>,
        estimator: crate::hll::estimator::HipEstimator,
        tgt_hll_type: HllType,
    ) -> Mode {
        let mut mode = Mode::new_hll(self.lg_config_k, tgt_hll_type);
        for (slot, value) in pairs {
            let coupon = pack_coupon(slot, value);
            match &mut mode {
                Mode::Hll4(arr) => arr.update(coupon),
                Mode::Hll6(arr) => arr.update(coupon),
                Mode::Hll8(arr) => arr.update(coupon),
                _ => unreachable!("new_hll only builds dense modes"),
            }
        }
        // The replay recomputed identical kxq values; carry the source HIP
        // history and ordering flag over wholesale.
        match &mut mode {
            Mode::Hll4(arr) => *arr.estimator_mut() = estimator,
            Mode::Hll6(arr) => *arr.estimator_mut() = estimator,
            Mode::Hll8(arr) => *arr.estimator_mut() = estimator,
            _ => unreachable!("new_hll only builds dense modes"),
        }
        mode
    }

    /// Serialize to the compact form: read-only, minimally sized.
    pub fn serialize(&self) -> Vec<u8> {
        serialization::serialize(self, true)
    }

    /// Serialize to the updatable form: the in-memory image layout, which
    /// can be re-wrapped for mutation by
    /// [`DirectHllSketch::wrap`](crate::hll::DirectHllSketch::wrap).
    pub fn serialize_updatable(&self) -> Vec<u8> {
        serialization::serialize(self, false)
    }

    /// Reconstruct a sketch from either serialized form.
    ///
    /// # Errors
    ///
    /// Returns an error if the image is truncated, carries the wrong family
    /// or serial version, or declares an invalid mode, type, or
    /// `lg_config_k`.
    pub fn deserialize(bytes: &[u8]) -> Result<HllSketch, Error> {
        serialization::deserialize(bytes)
    }

    pub(crate) fn mode(&self) -> &Mode {
        &self.mode
    }

    pub(crate) fn mode_mut(&mut self) -> &mut Mode {
        &mut self.mode
    }
}

impl fmt::Display for HllSketch {
    /// Diagnostic summary dump.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "### HLL sketch summary:")?;
        writeln!(f, "  lg_config_k   : {}", self.lg_config_k)?;
        writeln!(f, "  tgt_hll_type  : {:?}", self.tgt_hll_type)?;
        writeln!(f, "  current_mode  : {:?}", self.current_mode())?;
        writeln!(f, "  empty         : {}", self.is_empty())?;
        writeln!(f, "  estimate      : {:.3}", self.estimate())?;
        writeln!(
            f,
            "  bounds (2 sd) : [{:.3}, {:.3}]",
            self.lower_bound(NumStdDev::Two),
            self.upper_bound(NumStdDev::Two)
        )?;
        match &self.mode {
            Mode::List(list) => writeln!(f, "  coupons       : {}", list.len()),
            Mode::Set(set) => writeln!(f, "  coupons       : {}", set.len()),
            Mode::Hll4(arr) => {
                writeln!(f, "  cur_min       : {}", arr.cur_min())?;
                writeln!(f, "  at_cur_min    : {}", arr.num_at_cur_min())?;
                writeln!(
                    f,
                    "  aux exceptions: {}",
                    arr.aux().map_or(0, |a| a.count())
                )
            }
            Mode::Hll6(arr) => writeln!(f, "  zero registers: {}", arr.num_zeros()),
            Mode::Hll8(arr) => writeln!(f, "  zero registers: {}", arr.num_zeros()),
        }
    }
}
