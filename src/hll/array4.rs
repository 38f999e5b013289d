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

//! 4-bit register array with exception handling.
//!
//! Two registers per byte; even slots use the low nibble. A per-array
//! offset `cur_min` is subtracted from true values before storing, which
//! delays exceptions for as long as possible: once every register has
//! advanced past `cur_min`, the whole array rebases one step up. Values
//! that still exceed `cur_min + 14` store the 0xF sentinel and live in the
//! auxiliary table.

use crate::hll::aux::AuxMap;
use crate::hll::estimator::HipEstimator;
use crate::hll::get_slot;
use crate::hll::get_value;

pub(crate) const AUX_TOKEN: u8 = 15;

/// Dense register array at four bits per slot plus exception table.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Array4 {
    lg_config_k: u8,
    /// Packed 4-bit values: 2 values per byte
    bytes: Box<[u8]>,
    /// Current minimum register value, subtracted before storing
    cur_min: u8,
    /// Count of registers at exactly cur_min (when 0, rebase)
    num_at_cur_min: u32,
    /// Exception table for values past the nibble ceiling
    aux_map: Option<AuxMap>,
    /// HIP estimator for cardinality estimation
    estimator: HipEstimator,
}

impl Array4 {
    pub fn new(lg_config_k: u8) -> Self {
        Self {
            lg_config_k,
            bytes: vec![0u8; data_bytes(lg_config_k)].into_boxed_slice(),
            cur_min: 0,
            num_at_cur_min: 1 << lg_config_k,
            aux_map: None,
            estimator: HipEstimator::new(lg_config_k),
        }
    }

    /// Reassemble from deserialized parts.
    pub fn from_parts(
        lg_config_k: u8,
        bytes: Box<[u8]>,
        cur_min: u8,
        num_at_cur_min: u32,
        aux_map: Option<AuxMap>,
        estimator: HipEstimator,
    ) -> Self {
        debug_assert_eq!(bytes.len(), data_bytes(lg_config_k));
        Self {
            lg_config_k,
            bytes,
            cur_min,
            num_at_cur_min,
            aux_map,
            estimator,
        }
    }

    pub fn lg_config_k(&self) -> u8 {
        self.lg_config_k
    }

    pub fn num_registers(&self) -> usize {
        1 << self.lg_config_k
    }

    pub fn cur_min(&self) -> u8 {
        self.cur_min
    }

    pub fn num_at_cur_min(&self) -> u32 {
        self.num_at_cur_min
    }

    pub fn aux(&self) -> Option<&AuxMap> {
        self.aux_map.as_ref()
    }

    pub fn registers(&self) -> &[u8] {
        &self.bytes
    }

    /// Raw 4-bit value of a slot (not adjusted for cur_min)
    #[inline]
    fn get_raw(&self, slot: u32) -> u8 {
        let byte = self.bytes[(slot >> 1) as usize];
        if slot & 1 == 0 {
            byte & 15 // low nibble for even slots
        } else {
            byte >> 4 // high nibble for odd slots
        }
    }

    /// Set raw 4-bit value in slot
    #[inline]
    fn put_raw(&mut self, slot: u32, value: u8) {
        debug_assert!(value <= AUX_TOKEN);

        let byte_idx = (slot >> 1) as usize;
        let old_byte = self.bytes[byte_idx];
        self.bytes[byte_idx] = if slot & 1 == 0 {
            (old_byte & 0xF0) | (value & 0x0F)
        } else {
            (old_byte & 0x0F) | (value << 4)
        };
    }

    /// True value of a slot (cur_min and aux table applied)
    pub fn get(&self, slot: u32) -> u8 {
        let raw = self.get_raw(slot);
        if raw < AUX_TOKEN {
            raw + self.cur_min
        } else {
            self.aux_map
                .as_ref()
                .expect("sentinel nibble without aux map")
                .get(slot)
                .expect("sentinel nibble but slot not in aux map")
        }
    }

    pub fn update(&mut self, coupon: u32) {
        let mask = (1u32 << self.lg_config_k) - 1;
        let slot = get_slot(coupon) & mask;
        let new_value = get_value(coupon);

        // Quick rejection: nothing at or below cur_min can win
        if new_value <= self.cur_min {
            return;
        }

        let raw_stored = self.get_raw(slot);
        let lower_bound = raw_stored.saturating_add(self.cur_min);

        if raw_stored < AUX_TOKEN && new_value <= lower_bound {
            return;
        }

        let old_value = if raw_stored < AUX_TOKEN {
            lower_bound
        } else {
            self.aux_map
                .as_ref()
                .expect("sentinel nibble without aux map")
                .get(slot)
                .expect("sentinel nibble but slot not in aux map")
        };

        if new_value <= old_value {
            return;
        }

        self.estimator
            .update(self.lg_config_k, old_value, new_value);

        let shifted_new = new_value - self.cur_min;

        // Four cases on the exception status of old and new
        match (raw_stored, shifted_new) {
            // Both old and new are exceptions
            (AUX_TOKEN, shifted) if shifted >= AUX_TOKEN => {
                self.aux_map
                    .as_mut()
                    .expect("sentinel nibble without aux map")
                    .replace(slot, new_value);
            }
            // Old is an exception, new is not: impossible while cur_min is fixed
            (AUX_TOKEN, _) => {
                unreachable!("stored exception exceeds cur_min + 14 but new winner does not");
            }
            // New value becomes an exception
            (_, shifted) if shifted >= AUX_TOKEN => {
                self.put_raw(slot, AUX_TOKEN);
                let lg_config_k = self.lg_config_k;
                let aux = self
                    .aux_map
                    .get_or_insert_with(|| AuxMap::new(lg_config_k));
                aux.insert(slot, new_value);
            }
            // Neither is an exception
            _ => {
                self.put_raw(slot, shifted_new);
            }
        }

        if old_value == self.cur_min {
            self.num_at_cur_min -= 1;
            while self.num_at_cur_min == 0 {
                self.shift_to_bigger_cur_min();
            }
        }
    }

    /// Rebase: increment cur_min and decrement every stored nibble.
    ///
    /// Called when no register remains at cur_min. Exceptions whose shifted
    /// value re-enters the nibble range fold back into the dense array.
    fn shift_to_bigger_cur_min(&mut self) {
        let new_cur_min = self.cur_min + 1;
        let k = 1u32 << self.lg_config_k;
        let mut num_at_new = 0;

        for slot in 0..k {
            let raw = self.get_raw(slot);
            debug_assert_ne!(raw, 0, "no register may sit at cur_min when rebasing");
            if raw < AUX_TOKEN {
                let decremented = raw - 1;
                self.put_raw(slot, decremented);
                if decremented == 0 {
                    num_at_new += 1;
                }
            }
        }

        if let Some(old_aux) = self.aux_map.take() {
            let mut new_aux = None;

            for (slot, true_value) in old_aux.iter() {
                debug_assert_eq!(self.get_raw(slot), AUX_TOKEN);

                let new_shifted = true_value - new_cur_min;
                if new_shifted < AUX_TOKEN {
                    self.put_raw(slot, new_shifted);
                } else {
                    // Still an exception
                    let lg_config_k = self.lg_config_k;
                    let aux = new_aux.get_or_insert_with(|| AuxMap::new(lg_config_k));
                    aux.insert(slot, true_value);
                }
            }
            self.aux_map = new_aux;
        }

        self.cur_min = new_cur_min;
        self.num_at_cur_min = num_at_new;
    }

    pub fn estimate(&self) -> f64 {
        self.estimator
            .estimate(self.lg_config_k, self.cur_min, self.num_at_cur_min)
    }

    pub fn estimator(&self) -> &HipEstimator {
        &self.estimator
    }

    pub fn estimator_mut(&mut self) -> &mut HipEstimator {
        &mut self.estimator
    }
}

/// Register region size for a 4-bit array: two registers per byte.
pub(crate) fn data_bytes(lg_config_k: u8) -> usize {
    1 << (lg_config_k - 1)
}
