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

//! 8-bit register array: one byte per register, no packing.

use crate::hll::estimator::HipEstimator;
use crate::hll::get_slot;
use crate::hll::get_value;

const VAL_MASK_6: u8 = 0x3F;

/// Dense register array at one byte per slot.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Array8 {
    lg_config_k: u8,
    /// Direct byte array: bytes[slot] = value
    bytes: Box<[u8]>,
    /// Count of slots with value 0
    num_zeros: u32,
    /// HIP estimator for cardinality estimation
    estimator: HipEstimator,
}

impl Array8 {
    pub fn new(lg_config_k: u8) -> Self {
        let k = 1u32 << lg_config_k;

        Self {
            lg_config_k,
            bytes: vec![0u8; k as usize].into_boxed_slice(),
            num_zeros: k,
            estimator: HipEstimator::new(lg_config_k),
        }
    }

    /// Reassemble from deserialized parts.
    pub fn from_parts(
        lg_config_k: u8,
        bytes: Box<[u8]>,
        num_zeros: u32,
        estimator: HipEstimator,
    ) -> Self {
        debug_assert_eq!(bytes.len(), 1 << lg_config_k);
        Self {
            lg_config_k,
            bytes,
            num_zeros,
            estimator,
        }
    }

    pub fn lg_config_k(&self) -> u8 {
        self.lg_config_k
    }

    pub fn num_registers(&self) -> usize {
        self.bytes.len()
    }

    #[inline]
    pub fn get(&self, slot: u32) -> u8 {
        self.bytes[slot as usize]
    }

    /// Raw register store, bypassing the estimator. Callers must rebuild
    /// the estimator afterwards (merge paths do).
    #[inline]
    pub fn set_register(&mut self, slot: usize, value: u8) {
        self.bytes[slot] = value;
    }

    pub fn registers(&self) -> &[u8] {
        &self.bytes
    }

    /// Update with a coupon
    pub fn update(&mut self, coupon: u32) {
        let mask = (1u32 << self.lg_config_k) - 1;
        let slot = get_slot(coupon) & mask;
        let new_value = get_value(coupon) & VAL_MASK_6;

        let old_value = self.get(slot);

        if new_value > old_value {
            self.estimator
                .update(self.lg_config_k, old_value, new_value);
            self.bytes[slot as usize] = new_value;
            if old_value == 0 {
                self.num_zeros -= 1;
            }
        }
    }

    /// Recompute num_zeros and the KxQ registers from the register values.
    ///
    /// Merges mutate registers directly and invalidate HIP; this restores a
    /// consistent estimator state afterwards.
    pub fn rebuild_estimator_from_registers(&mut self) {
        self.num_zeros = self.bytes.iter().filter(|v| **v == 0).count() as u32;
        self.estimator.rebuild(self.bytes.iter().copied());
    }

    pub fn estimate(&self) -> f64 {
        self.estimator.estimate(self.lg_config_k, 0, self.num_zeros)
    }

    pub fn num_zeros(&self) -> u32 {
        self.num_zeros
    }

    pub fn estimator(&self) -> &HipEstimator {
        &self.estimator
    }

    pub fn estimator_mut(&mut self) -> &mut HipEstimator {
        &mut self.estimator
    }
}
