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

//! HyperLogLog union for combining multiple HLL sketches.
//!
//! The union maintains an internal "gadget" sketch that accumulates the
//! union of all input sketches. It handles inputs with:
//! - different `lg_config_k` (the coarser precision wins and the finer
//!   sketch is downsampled by folding its address bits)
//! - different modes (list, set, any register encoding)
//! - different target HLL types
//!
//! Merging is register-max and commutative in the register state. HIP is
//! not preserved across a merge: the gadget turns out-of-order and the
//! composite estimator serves the result.

use crate::hll::CurMode;
use crate::hll::HllSketch;
use crate::hll::HllType;
use crate::hll::MAX_LG_K;
use crate::hll::MIN_LG_K;
use crate::hll::array8::Array8;
use crate::hll::mode::Mode;
use crate::hll::pairs::Pairs;

/// An HLL union for combining multiple HLL sketches.
#[derive(Debug, Clone)]
pub struct HllUnion {
    /// Maximum lg_config_k this union can produce
    lg_max_k: u8,
    /// Internal sketch that accumulates the union
    gadget: HllSketch,
}

impl HllUnion {
    /// Create a new HLL union.
    ///
    /// # Arguments
    ///
    /// * `lg_max_k` - Maximum log2 of the number of registers, in [4, 21].
    ///   Inputs with larger `lg_config_k` are downsampled.
    ///
    /// # Panics
    ///
    /// Panics if `lg_max_k` is not in the range [4, 21].
    pub fn new(lg_max_k: u8) -> Self {
        assert!(
            (MIN_LG_K..=MAX_LG_K).contains(&lg_max_k),
            "lg_max_k must be in [4, 21], got {lg_max_k}"
        );

        // The gadget accumulates at 8 bits per register; the result is
        // re-encoded on request.
        let gadget = HllSketch::new(lg_max_k, HllType::Hll8);

        Self { lg_max_k, gadget }
    }

    /// Merge another sketch into the union.
    pub fn update(&mut self, sketch: &HllSketch) {
        if sketch.is_empty() {
            return;
        }

        match sketch.mode() {
            // Coupon sources replay into the gadget like ordinary updates
            Mode::List(_) | Mode::Set(_) => self.merge_coupons(sketch),
            Mode::Hll4(_) | Mode::Hll6(_) | Mode::Hll8(_) => self.merge_array(sketch),
        }
    }

    fn merge_coupons(&mut self, src: &HllSketch) {
        let coupons: Vec<u32> = match src.mode() {
            Mode::List(list) => list.container.iter_valid().collect(),
            Mode::Set(set) => set.container.iter_valid().collect(),
            _ => unreachable!("merge_coupons only sees coupon modes"),
        };
        for c in coupons {
            self.gadget.update_with_coupon(c);
        }
    }

    fn merge_array(&mut self, src: &HllSketch) {
        // The result adopts the coarser precision, capped by lg_max_k
        let src_lg_k = src.lg_config_k().min(self.lg_max_k);

        match self.gadget.current_mode() {
            CurMode::List | CurMode::Set => {
                // Promote the gadget onto a copy of the source, then replay
                // whatever coupons it had collected so far
                let mut arr = Array8::new(src_lg_k);
                fold_pairs(&mut arr, src_lg_k, array_pairs(src));
                arr.rebuild_estimator_from_registers();

                let coupons: Vec<u32> = match self.gadget.mode() {
                    Mode::List(list) => list.container.iter_valid().collect(),
                    Mode::Set(set) => set.container.iter_valid().collect(),
                    _ => unreachable!("gadget is in a coupon mode"),
                };

                let mut gadget = HllSketch::from_mode(src_lg_k, HllType::Hll8, Mode::Hll8(arr));
                for c in coupons {
                    gadget.update_with_coupon(c);
                }
                self.gadget = gadget;
            }
            CurMode::Hll => {
                let dst_lg_k = self.gadget.lg_config_k();
                if src_lg_k < dst_lg_k {
                    // The source is coarser: rebuild the gadget at the
                    // source's precision, folding both inputs down
                    let mut arr = Array8::new(src_lg_k);
                    let Mode::Hll8(dst) = self.gadget.mode() else {
                        unreachable!("the gadget always accumulates at 8 bits per register");
                    };
                    fold_pairs(&mut arr, src_lg_k, Pairs::over_array8(dst, true));
                    fold_pairs(&mut arr, src_lg_k, array_pairs(src));
                    arr.rebuild_estimator_from_registers();
                    self.gadget = HllSketch::from_mode(src_lg_k, HllType::Hll8, Mode::Hll8(arr));
                } else {
                    // Gadget precision wins; fold the source in place
                    let Mode::Hll8(dst) = self.gadget.mode_mut() else {
                        unreachable!("the gadget always accumulates at 8 bits per register");
                    };
                    fold_pairs(dst, dst_lg_k, array_pairs(src));
                    dst.rebuild_estimator_from_registers();
                }
            }
        }
    }

    /// The union result, re-encoded as the requested HLL type.
    pub fn result(&self, hll_type: HllType) -> HllSketch {
        self.gadget.copy_as(hll_type)
    }

    /// Reset the union to its initial empty state.
    pub fn reset(&mut self) {
        self.gadget = HllSketch::new(self.lg_max_k, HllType::Hll8);
    }

    pub fn is_empty(&self) -> bool {
        self.gadget.is_empty()
    }

    /// The current cardinality estimate of the union.
    pub fn estimate(&self) -> f64 {
        self.gadget.estimate()
    }

    /// The current lg_config_k of the internal gadget.
    pub fn lg_config_k(&self) -> u8 {
        self.gadget.lg_config_k()
    }

    pub fn lg_max_k(&self) -> u8 {
        self.lg_max_k
    }
}

/// Valid (slot, true value) pairs of any dense source.
fn array_pairs(src: &HllSketch) -> Pairs<'_> {
    match src.mode() {
        Mode::Hll4(arr) => Pairs::over_array4(arr, true),
        Mode::Hll6(arr) => Pairs::over_array6(arr, true),
        Mode::Hll8(arr) => Pairs::over_array8(arr, true),
        _ => unreachable!("array_pairs only sees dense modes"),
    }
}

/// Register-max fold of source pairs into a destination array, mapping
/// each source slot onto the destination by masking its address bits.
fn fold_pairs(dst: &mut Array8, dst_lg_k: u8, pairs: Pairs<'_>) {
    let mask = (1u32 << dst_lg_k) - 1;
    for (slot, value) in pairs {
        let dst_slot = (slot & mask) as usize;
        if value > dst.registers()[dst_slot] {
            dst.set_register(dst_slot, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_union_basic_list_mode() {
        let mut union = HllUnion::new(12);

        let mut sketch1 = HllSketch::new(12, HllType::Hll8);
        sketch1.update("foo");
        sketch1.update("bar");
        sketch1.update("baz");

        let mut sketch2 = HllSketch::new(12, HllType::Hll8);
        sketch2.update("bar"); // duplicate
        sketch2.update("qux");
        sketch2.update("quux");

        union.update(&sketch1);
        union.update(&sketch2);

        let result = union.result(HllType::Hll8);
        assert_eq!(result.estimate(), 5.0);
        assert!(!result.is_empty());
    }

    #[test]
    fn test_union_empty_sketch() {
        let mut union = HllUnion::new(10);
        let empty = HllSketch::new(10, HllType::Hll8);

        union.update(&empty);
        assert!(union.is_empty());
    }

    #[test]
    fn test_union_estimate_accuracy() {
        let mut union = HllUnion::new(12);

        let mut sketch1 = HllSketch::new(12, HllType::Hll8);
        for i in 0..500 {
            sketch1.update(i);
        }

        let mut sketch2 = HllSketch::new(12, HllType::Hll8);
        for i in 400..900 {
            sketch2.update(i);
        }

        union.update(&sketch1);
        union.update(&sketch2);

        let estimate = union.result(HllType::Hll8).estimate();
        assert!(
            estimate > 800.0 && estimate < 1000.0,
            "expected ~900, got {estimate}"
        );
    }

    #[test]
    fn test_union_array_to_array_same_lgk() {
        let mut union = HllUnion::new(12);

        let mut sketch1 = HllSketch::new(12, HllType::Hll8);
        for i in 0..10_000 {
            sketch1.update(i);
        }
        let mut sketch2 = HllSketch::new(12, HllType::Hll8);
        for i in 5_000..15_000 {
            sketch2.update(i);
        }
        assert_eq!(sketch1.current_mode(), CurMode::Hll);
        assert_eq!(sketch2.current_mode(), CurMode::Hll);

        union.update(&sketch1);
        union.update(&sketch2);

        let estimate = union.result(HllType::Hll8).estimate();
        assert!(
            estimate > 14_000.0 && estimate < 16_000.0,
            "expected ~15000, got {estimate}"
        );
    }

    #[test]
    fn test_union_downsampling_src_finer() {
        // A lg_k=12 source into a lg_k=10 union gets downsampled
        let mut union = HllUnion::new(10);

        let mut sketch = HllSketch::new(12, HllType::Hll8);
        for i in 0..5_000 {
            sketch.update(i);
        }
        union.update(&sketch);

        let result = union.result(HllType::Hll8);
        let estimate = result.estimate();
        assert!(
            estimate > 4_000.0 && estimate < 6_000.0,
            "expected ~5000, got {estimate}"
        );
        assert_eq!(result.lg_config_k(), 10);
    }

    #[test]
    fn test_union_gadget_downsizes_to_coarser_source() {
        let mut union = HllUnion::new(12);

        let mut sketch1 = HllSketch::new(12, HllType::Hll8);
        for i in 0..10_000 {
            sketch1.update(i);
        }
        union.update(&sketch1);
        assert_eq!(union.lg_config_k(), 12);

        let mut sketch2 = HllSketch::new(10, HllType::Hll8);
        for i in 5_000..15_000 {
            sketch2.update(i);
        }
        union.update(&sketch2);

        let result = union.result(HllType::Hll8);
        let estimate = result.estimate();
        assert!(
            estimate > 13_000.0 && estimate < 17_000.0,
            "expected ~15000, got {estimate}"
        );
        assert_eq!(result.lg_config_k(), 10, "gadget should downsize to 10");
    }

    #[test]
    fn test_union_cross_type_cross_lgk() {
        // Hll4 at lg_k=12 with Hll8 at lg_k=10 lands at lg_k=10
        let mut union = HllUnion::new(12);

        let mut a = HllSketch::new(12, HllType::Hll4);
        for i in 0..20_000 {
            a.update(i);
        }
        let mut b = HllSketch::new(10, HllType::Hll8);
        for i in 10_000..30_000 {
            b.update(i);
        }

        union.update(&a);
        union.update(&b);

        let result = union.result(HllType::Hll8);
        assert_eq!(result.lg_config_k(), 10);

        let estimate = result.estimate();
        assert!(
            estimate > 26_000.0 && estimate < 34_000.0,
            "expected ~30000, got {estimate}"
        );
    }

    #[test]
    fn test_union_register_max_holds() {
        // Union of A with itself must leave registers unchanged
        let mut a = HllSketch::new(10, HllType::Hll8);
        for i in 0..5_000 {
            a.update(i);
        }

        let mut union = HllUnion::new(10);
        union.update(&a);
        let once = union.result(HllType::Hll8);
        union.update(&a);
        let twice = union.result(HllType::Hll8);

        assert_eq!(once.composite_estimate(), twice.composite_estimate());
    }

    #[test]
    fn test_union_list_and_array_sources() {
        let mut union = HllUnion::new(12);

        let mut small = HllSketch::new(12, HllType::Hll8);
        small.update("a");
        small.update("b");
        small.update("c");
        assert_eq!(small.current_mode(), CurMode::List);

        let mut big = HllSketch::new(12, HllType::Hll8);
        for i in 0..10_000 {
            big.update(i);
        }
        assert_eq!(big.current_mode(), CurMode::Hll);

        // Order must not matter for the register state
        union.update(&small);
        union.update(&big);
        let ab = union.result(HllType::Hll8);

        let mut union2 = HllUnion::new(12);
        union2.update(&big);
        union2.update(&small);
        let ba = union2.result(HllType::Hll8);

        assert_eq!(ab.composite_estimate(), ba.composite_estimate());

        let estimate = ab.estimate();
        assert!(
            estimate > 9_500.0 && estimate < 10_500.0,
            "expected ~10003, got {estimate}"
        );
    }

    #[test]
    fn test_union_mixed_hll_types() {
        let mut union = HllUnion::new(12);

        let mut sketch1 = HllSketch::new(12, HllType::Hll4);
        for i in 0..3_000 {
            sketch1.update(i);
        }
        let mut sketch2 = HllSketch::new(12, HllType::Hll6);
        for i in 2_000..5_000 {
            sketch2.update(i);
        }
        let mut sketch3 = HllSketch::new(12, HllType::Hll8);
        for i in 4_000..7_000 {
            sketch3.update(i);
        }

        union.update(&sketch1);
        union.update(&sketch2);
        union.update(&sketch3);

        let estimate = union.result(HllType::Hll8).estimate();
        assert!(
            estimate > 6_000.0 && estimate < 8_000.0,
            "expected ~7000, got {estimate}"
        );
    }

    #[test]
    fn test_union_result_type_conversion() {
        let mut union = HllUnion::new(12);

        let mut sketch = HllSketch::new(12, HllType::Hll8);
        for i in 0..5_000 {
            sketch.update(i);
        }
        union.update(&sketch);

        for tgt in [HllType::Hll4, HllType::Hll6, HllType::Hll8] {
            let result = union.result(tgt);
            assert_eq!(result.target_type(), tgt);
            let estimate = result.estimate();
            assert!(
                estimate > 4_000.0 && estimate < 6_000.0,
                "expected ~5000 as {tgt:?}, got {estimate}"
            );
        }
    }

    #[test]
    fn test_union_reset() {
        let mut union = HllUnion::new(10);
        let mut sketch = HllSketch::new(10, HllType::Hll8);
        for i in 0..100 {
            sketch.update(i);
        }
        union.update(&sketch);
        assert!(!union.is_empty());

        union.reset();
        assert!(union.is_empty());
        assert_eq!(union.estimate(), 0.0);
        assert_eq!(union.lg_config_k(), 10);
    }

    #[test]
    #[should_panic(expected = "lg_max_k must be in [4, 21]")]
    fn test_union_invalid_lg_max_k() {
        HllUnion::new(22);
    }
}
