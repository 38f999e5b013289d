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

//! HIP (Historical Inverse Probability) estimator for HyperLogLog.
//!
//! The HIP estimator maintains an accumulator that tracks the historical
//! sequence of register updates. It is more accurate than the composite
//! estimator but is path-dependent, so it only remains valid while the
//! sketch sees its own in-order update stream.

use std::f64::consts::LN_2;

use crate::common::NumStdDev;

/// HIP estimator with KxQ registers for cardinality estimation.
///
/// This struct encapsulates all estimation-related state and logic shared by
/// the three register encodings and the direct sketch.
///
/// Two regimes:
/// - **In-order**: the HIP accumulator is the estimate.
/// - **Out-of-order** (after a merge or heapify of an out-of-order image):
///   the composite estimator (raw HLL + small-range correction) takes over.
#[derive(Debug, Clone)]
pub(crate) struct HipEstimator {
    /// HIP estimator accumulator
    hip_accum: f64,
    /// KxQ register for values < 32 (larger inverse powers)
    kxq0: f64,
    /// KxQ register for values >= 32 (tiny inverse powers)
    kxq1: f64,
    /// Out-of-order flag: when true, HIP updates are skipped
    out_of_order: bool,
}

impl PartialEq for HipEstimator {
    fn eq(&self, other: &Self) -> bool {
        // Serialization round trips must preserve these bit-exactly
        self.hip_accum == other.hip_accum
            && self.kxq0 == other.kxq0
            && self.kxq1 == other.kxq1
            && self.out_of_order == other.out_of_order
    }
}

impl HipEstimator {
    /// Create a new estimator for a sketch with 2^lg_config_k registers.
    pub fn new(lg_config_k: u8) -> Self {
        let k = 1u64 << lg_config_k;
        Self {
            hip_accum: 0.0,
            kxq0: k as f64, // all registers start at 0, contributing 1/2^0 each
            kxq1: 0.0,
            out_of_order: false,
        }
    }

    /// Reassemble an estimator from serialized scalars.
    pub fn from_parts(hip_accum: f64, kxq0: f64, kxq1: f64, out_of_order: bool) -> Self {
        Self {
            hip_accum,
            kxq0,
            kxq1,
            out_of_order,
        }
    }

    /// Update the estimator when a register changes from old_value to new_value.
    ///
    /// Must be called BEFORE the register itself is rewritten.
    ///
    /// The KxQ registers are split for exactness: every partial sum of
    /// inverse powers of two stays below 53 significant bits per bucket, so
    /// kxq arithmetic is exact and independent of update order.
    pub fn update(&mut self, lg_config_k: u8, old_value: u8, new_value: u8) {
        let k = (1u64 << lg_config_k) as f64;

        // HIP first; skipped when out-of-order because the history is gone
        if !self.out_of_order {
            self.hip_accum += k / (self.kxq0 + self.kxq1);
        }

        self.update_kxq(old_value, new_value);
    }

    fn update_kxq(&mut self, old_value: u8, new_value: u8) {
        if old_value < 32 {
            self.kxq0 -= inv_pow2(old_value);
        } else {
            self.kxq1 -= inv_pow2(old_value);
        }

        if new_value < 32 {
            self.kxq0 += inv_pow2(new_value);
        } else {
            self.kxq1 += inv_pow2(new_value);
        }
    }

    /// Recompute the KxQ registers from a full register scan and mark the
    /// estimator out-of-order. Used after merges, which invalidate HIP.
    pub fn rebuild<I: IntoIterator<Item = u8>>(&mut self, values: I) {
        let mut kxq0 = 0.0;
        let mut kxq1 = 0.0;
        for v in values {
            if v < 32 {
                kxq0 += inv_pow2(v);
            } else {
                kxq1 += inv_pow2(v);
            }
        }
        self.kxq0 = kxq0;
        self.kxq1 = kxq1;
        self.set_out_of_order(true);
    }

    /// Get the current cardinality estimate.
    ///
    /// HIP while in-order, composite otherwise.
    ///
    /// # Arguments
    /// * `cur_min` - current minimum register value (0 for Hll6/Hll8)
    /// * `num_at_cur_min` - number of registers at cur_min
    pub fn estimate(&self, lg_config_k: u8, cur_min: u8, num_at_cur_min: u32) -> f64 {
        if self.out_of_order {
            self.composite_estimate(lg_config_k, cur_min, num_at_cur_min)
        } else {
            self.hip_accum
        }
    }

    /// The standard HLL estimator with small-range correction.
    ///
    /// Raw estimate: alpha(K) * K^2 / (kxq0 + kxq1). Below 2.5K with zero
    /// registers remaining, linear counting K * ln(K / zeros) is used
    /// instead. No large-range correction is needed with 64-bit hashing.
    pub fn composite_estimate(&self, lg_config_k: u8, cur_min: u8, num_at_cur_min: u32) -> f64 {
        let k = (1u64 << lg_config_k) as f64;
        let raw = alpha(lg_config_k) * k * k / (self.kxq0 + self.kxq1);

        let zeros = if cur_min == 0 { num_at_cur_min } else { 0 };
        if raw < 2.5 * k && zeros > 0 {
            k * (k / zeros as f64).ln()
        } else {
            raw
        }
    }

    /// Lower confidence bound at the given number of standard deviations.
    pub fn lower_bound(
        &self,
        lg_config_k: u8,
        cur_min: u8,
        num_at_cur_min: u32,
        num_std_dev: NumStdDev,
    ) -> f64 {
        let est = self.estimate(lg_config_k, cur_min, num_at_cur_min);
        est / (1.0 + num_std_dev.as_f64() * self.rel_err(lg_config_k))
    }

    /// Upper confidence bound at the given number of standard deviations.
    pub fn upper_bound(
        &self,
        lg_config_k: u8,
        cur_min: u8,
        num_at_cur_min: u32,
        num_std_dev: NumStdDev,
    ) -> f64 {
        let est = self.estimate(lg_config_k, cur_min, num_at_cur_min);
        let denom = 1.0 - num_std_dev.as_f64() * self.rel_err(lg_config_k);
        debug_assert!(denom > 0.0, "n*rse must stay below 1 for lg_config_k >= 4");
        est / denom
    }

    /// Relative standard error for one standard deviation.
    fn rel_err(&self, lg_config_k: u8) -> f64 {
        let k = (1u64 << lg_config_k) as f64;
        let factor = if self.out_of_order {
            // composite estimator error
            (3.0 * LN_2 - 1.0).sqrt()
        } else {
            // HIP error
            LN_2.sqrt()
        };
        factor / k.sqrt()
    }

    pub fn hip_accum(&self) -> f64 {
        self.hip_accum
    }

    pub fn kxq0(&self) -> f64 {
        self.kxq0
    }

    pub fn kxq1(&self) -> f64 {
        self.kxq1
    }

    pub fn is_out_of_order(&self) -> bool {
        self.out_of_order
    }

    /// Set the out-of-order flag.
    ///
    /// Set to true when heapifying an out-of-order image or after a merge.
    pub fn set_out_of_order(&mut self, ooo: bool) {
        self.out_of_order = ooo;
        if ooo {
            // HIP history is meaningless once updates arrive out of order
            self.hip_accum = 0.0;
        }
    }

    pub fn set_hip_accum(&mut self, value: f64) {
        self.hip_accum = value;
    }
}

/// Correction coefficient alpha(K) of the raw HLL estimator, tabulated for
/// the small register counts and computed above lg_config_k = 6.
fn alpha(lg_config_k: u8) -> f64 {
    let k = (1u64 << lg_config_k) as f64;
    match lg_config_k {
        4 => 0.673,
        5 => 0.697,
        6 => 0.709,
        _ => 0.7213 / (1.0 + 1.079 / k),
    }
}

/// Compute 1 / 2^value (inverse power of 2)
#[inline]
pub(crate) fn inv_pow2(value: u8) -> f64 {
    if value == 0 {
        1.0
    } else if value <= 63 {
        1.0 / (1u64 << value) as f64
    } else {
        f64::exp2(-(value as f64))
    }
}
