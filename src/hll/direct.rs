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

//! Sketch operating directly over a caller-provided byte region.
//!
//! A [`DirectHllSketch`] maintains the *updatable* serialized image inside
//! the region as its working state: the same mode walk, promotions, probe
//! sequences, and estimator arithmetic as the owned sketch, expressed as
//! reads and writes at image offsets. Feeding the same update stream to an
//! owned sketch and a direct sketch therefore produces bit-identical
//! updatable images.
//!
//! The region must stay alive for the life of the sketch (the borrow
//! enforces this) and must be at least
//! [`max_updatable_serialization_bytes`] long so every stage of the
//! lifecycle fits. A read-only wrap supports queries over either serialized
//! form; any mutation through it fails with a read-only violation.

use std::hash::Hash;

use crate::common::NumStdDev;
use crate::common::canonical_double;
use crate::error::Error;
use crate::hll::CurMode;
use crate::hll::HllType;
use crate::hll::MAX_LG_K;
use crate::hll::MIN_LG_K;
use crate::hll::RESIZE_DENOM;
use crate::hll::RESIZE_NUMER;
use crate::hll::avalanche32;
use crate::hll::aux::lg_aux_arr_ints;
use crate::hll::coupon;
use crate::hll::estimator::HipEstimator;
use crate::hll::estimator::inv_pow2;
use crate::hll::get_slot;
use crate::hll::get_value;
use crate::hll::list::LG_INIT_LIST_SIZE;
use crate::hll::serialization::AUX_COUNT_BYTES;
use crate::hll::serialization::COUPON_DATA_START;
use crate::hll::serialization::CUR_MIN_BYTE;
use crate::hll::serialization::FAMILY_BYTE;
use crate::hll::serialization::FLAG_IS_EMPTY;
use crate::hll::serialization::FLAG_IS_OUT_OF_ORDER;
use crate::hll::serialization::FLAGS_BYTE;
use crate::hll::serialization::HIP_ACCUM_BYTES;
use crate::hll::serialization::HLL_DATA_START;
use crate::hll::serialization::HLL_FAMILY_ID;
use crate::hll::serialization::HLL_TYPE_BYTE;
use crate::hll::serialization::KXQ0_BYTES;
use crate::hll::serialization::KXQ1_BYTES;
use crate::hll::serialization::LG_ARR_BYTE;
use crate::hll::serialization::LG_K_BYTE;
use crate::hll::serialization::MODE_BYTE;
use crate::hll::serialization::NUM_AT_CUR_MIN_BYTES;
use crate::hll::serialization::PREAMBLE_INTS_BYTE;
use crate::hll::serialization::PREAMBLE_INTS_COUPON;
use crate::hll::serialization::PREAMBLE_INTS_HLL;
use crate::hll::serialization::SER_VER;
use crate::hll::serialization::SER_VER_BYTE;
use crate::hll::serialization::max_updatable_serialization_bytes;
use crate::hll::serialization::read_header;
use crate::hll::serialization::register_data_bytes;
use crate::hll::serialization::updatable_hll_bytes;
use crate::hll::serialization::updatable_list_bytes;
use crate::hll::serialization::updatable_set_bytes;
use crate::hll::set::LG_INIT_SET_SIZE;
use crate::hll::set_promotion_threshold;
use crate::hll::sketch::HllSketch;
use crate::mem::WritableMem;

const AUX_TOKEN: u8 = 15;
const VAL_MASK_6: u16 = 0x3F;

/// A HyperLogLog sketch living in a caller-provided byte region.
///
/// # Examples
///
/// ```
/// use hll_sketch::hll::{max_updatable_serialization_bytes, DirectHllSketch, HllType};
///
/// let mut region = vec![0u8; max_updatable_serialization_bytes(10, HllType::Hll8)];
/// let mut sketch = DirectHllSketch::new_in(10, HllType::Hll8, &mut region).unwrap();
/// for i in 0..5_000 {
///     sketch.update(i).unwrap();
/// }
/// let estimate = sketch.estimate();
/// assert!(estimate > 4_500.0 && estimate < 5_500.0);
/// ```
#[derive(Debug)]
pub struct DirectHllSketch<'a> {
    mem: WritableMem<'a>,
    lg_config_k: u8,
    tgt_hll_type: HllType,
    // Mirrors of image state; the image stays authoritative.
    cur_mode: CurMode,
    coupon_count: usize,
    lg_arr: usize,
    image_len: usize,
    compact: bool,
}

impl<'a> DirectHllSketch<'a> {
    /// Initialize an empty sketch inside a writable region.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` when `lg_config_k` is out of [4, 21];
    /// `InsufficientCapacity` when the region is smaller than
    /// [`max_updatable_serialization_bytes`].
    pub fn new_in(
        lg_config_k: u8,
        tgt_hll_type: HllType,
        region: &'a mut [u8],
    ) -> Result<DirectHllSketch<'a>, Error> {
        if !(MIN_LG_K..=MAX_LG_K).contains(&lg_config_k) {
            return Err(Error::new(
                crate::error::ErrorKind::InvalidArgument,
                format!("lg_config_k must be in [4, 21], got {lg_config_k}"),
            ));
        }
        let required = max_updatable_serialization_bytes(lg_config_k, tgt_hll_type);
        if region.len() < required {
            return Err(Error::capacity(required, region.len()));
        }

        let mut sketch = DirectHllSketch {
            mem: WritableMem::writable(region),
            lg_config_k,
            tgt_hll_type,
            cur_mode: CurMode::List,
            coupon_count: 0,
            lg_arr: 0,
            image_len: updatable_list_bytes(),
            compact: false,
        };
        sketch.write_empty_list()?;
        Ok(sketch)
    }

    /// Initialize an empty sketch over a self-allocated heap region.
    ///
    /// Behaves exactly like [`new_in`](Self::new_in) over a region of
    /// [`max_updatable_serialization_bytes`]; useful when the image should
    /// live in one relocatable allocation rather than in sketch-owned
    /// structures.
    ///
    /// # Panics
    ///
    /// Panics if `lg_config_k` is not in the range [4, 21].
    pub fn new_owned(lg_config_k: u8, tgt_hll_type: HllType) -> DirectHllSketch<'static> {
        let capacity = max_updatable_serialization_bytes(lg_config_k, tgt_hll_type);
        let mut sketch = DirectHllSketch {
            mem: WritableMem::owned(capacity),
            lg_config_k,
            tgt_hll_type,
            cur_mode: CurMode::List,
            coupon_count: 0,
            lg_arr: 0,
            image_len: updatable_list_bytes(),
            compact: false,
        };
        sketch
            .write_empty_list()
            .expect("owned regions are always writable");
        sketch
    }

    /// Re-attach to an existing *updatable* image for further mutation.
    ///
    /// # Errors
    ///
    /// `MalformedData` for a corrupt image, `ReadOnlyViolation` for a
    /// compact image (compact is the read-only form), and
    /// `InsufficientCapacity` when the region cannot host every stage of
    /// the sketch lifecycle.
    pub fn wrap(region: &'a mut [u8]) -> Result<DirectHllSketch<'a>, Error> {
        let header = read_header(region)?;
        if header.is_compact() {
            return Err(Error::read_only("wrap a compact image for mutation"));
        }
        let required = max_updatable_serialization_bytes(header.lg_config_k, header.tgt_hll_type);
        if region.len() < required {
            return Err(Error::capacity(required, region.len()));
        }

        let (cur_mode, coupon_count, lg_arr, image_len) = Self::load_updatable_state(
            region,
            header.cur_mode,
            header.lg_config_k,
            header.tgt_hll_type,
            header.lg_arr_byte,
        )?;

        Ok(DirectHllSketch {
            mem: WritableMem::writable(region),
            lg_config_k: header.lg_config_k,
            tgt_hll_type: header.tgt_hll_type,
            cur_mode,
            coupon_count,
            lg_arr,
            image_len,
            compact: false,
        })
    }

    /// Wrap a serialized image (either form) for read-only queries.
    ///
    /// Compact images must be passed exactly sized; their length is part of
    /// the format. Mutating operations fail with `ReadOnlyViolation`.
    pub fn wrap_read_only(bytes: &'a [u8]) -> Result<DirectHllSketch<'a>, Error> {
        let header = read_header(bytes)?;

        let (cur_mode, coupon_count, lg_arr, image_len) = if header.is_compact() {
            Self::load_compact_state(
                bytes,
                header.cur_mode,
                header.lg_config_k,
                header.tgt_hll_type,
                header.lg_arr_byte,
            )?
        } else {
            Self::load_updatable_state(
                bytes,
                header.cur_mode,
                header.lg_config_k,
                header.tgt_hll_type,
                header.lg_arr_byte,
            )?
        };

        Ok(DirectHllSketch {
            mem: WritableMem::read_only(bytes),
            lg_config_k: header.lg_config_k,
            tgt_hll_type: header.tgt_hll_type,
            cur_mode,
            coupon_count,
            lg_arr,
            image_len,
            compact: header.is_compact(),
        })
    }

    fn load_updatable_state(
        bytes: &[u8],
        cur_mode: CurMode,
        lg_config_k: u8,
        tgt_hll_type: HllType,
        lg_arr_byte: u8,
    ) -> Result<(CurMode, usize, usize, usize), Error> {
        match cur_mode {
            CurMode::List => {
                let image_len = updatable_list_bytes();
                if bytes.len() < image_len {
                    return Err(Error::insufficient_data("list image"));
                }
                let count = count_nonzero_words(bytes, COUPON_DATA_START, 1 << LG_INIT_LIST_SIZE);
                Ok((cur_mode, count, 0, image_len))
            }
            CurMode::Set => {
                let lg_arr = lg_arr_byte as usize;
                if !(LG_INIT_SET_SIZE..=lg_config_k as usize).contains(&lg_arr) {
                    return Err(Error::deserial(format!("set lg_arr {lg_arr} out of range")));
                }
                let image_len = updatable_set_bytes(lg_arr);
                if bytes.len() < image_len {
                    return Err(Error::insufficient_data("set image"));
                }
                let count = count_nonzero_words(bytes, COUPON_DATA_START, 1 << lg_arr);
                Ok((cur_mode, count, lg_arr, image_len))
            }
            CurMode::Hll => {
                let lg_arr = match tgt_hll_type {
                    HllType::Hll4 => {
                        let lg_arr = lg_arr_byte as usize;
                        if !(2..=(MAX_LG_K as usize + 1)).contains(&lg_arr) {
                            return Err(Error::deserial(format!(
                                "aux lg_arr {lg_arr} out of range"
                            )));
                        }
                        lg_arr
                    }
                    _ => 0,
                };
                let image_len = updatable_hll_bytes(lg_config_k, tgt_hll_type, lg_arr);
                if bytes.len() < image_len {
                    return Err(Error::insufficient_data("HLL image"));
                }
                Ok((cur_mode, 0, lg_arr, image_len))
            }
        }
    }

    fn load_compact_state(
        bytes: &[u8],
        cur_mode: CurMode,
        lg_config_k: u8,
        tgt_hll_type: HllType,
        lg_arr_byte: u8,
    ) -> Result<(CurMode, usize, usize, usize), Error> {
        match cur_mode {
            CurMode::List => {
                let count = lg_arr_byte as usize;
                let image_len = COUPON_DATA_START + 4 * count;
                if count > 1 << LG_INIT_LIST_SIZE || bytes.len() < image_len {
                    return Err(Error::insufficient_data("compact list image"));
                }
                Ok((cur_mode, count, 0, image_len))
            }
            CurMode::Set => {
                let payload = bytes.len() - COUPON_DATA_START;
                if payload % 4 != 0 {
                    return Err(Error::deserial("compact set payload not a multiple of 4"));
                }
                Ok((cur_mode, payload / 4, lg_arr_byte as usize, bytes.len()))
            }
            CurMode::Hll => {
                if bytes.len() < HLL_DATA_START {
                    return Err(Error::insufficient_data("HLL preamble"));
                }
                let reg_bytes = register_data_bytes(lg_config_k, tgt_hll_type);
                let aux_count = u32::from_le_bytes([
                    bytes[AUX_COUNT_BYTES],
                    bytes[AUX_COUNT_BYTES + 1],
                    bytes[AUX_COUNT_BYTES + 2],
                    bytes[AUX_COUNT_BYTES + 3],
                ]) as usize;
                let image_len = HLL_DATA_START + reg_bytes + 4 * aux_count;
                if bytes.len() < image_len {
                    return Err(Error::insufficient_data("compact HLL image"));
                }
                Ok((cur_mode, 0, lg_arr_byte as usize, image_len))
            }
        }
    }

    pub fn lg_config_k(&self) -> u8 {
        self.lg_config_k
    }

    pub fn target_type(&self) -> HllType {
        self.tgt_hll_type
    }

    pub fn current_mode(&self) -> CurMode {
        self.cur_mode
    }

    pub fn is_empty(&self) -> bool {
        self.cur_mode == CurMode::List && self.coupon_count == 0
    }

    /// Update the sketch with a hashable value.
    ///
    /// # Errors
    ///
    /// `ReadOnlyViolation` through a read-only wrap; `InsufficientCapacity`
    /// if the 4-bit exception table outgrows the region.
    pub fn update<T: Hash>(&mut self, value: T) -> Result<(), Error> {
        self.update_with_coupon(coupon(value))
    }

    /// Update the sketch with a canonicalized f64 value.
    pub fn update_f64(&mut self, value: f64) -> Result<(), Error> {
        self.update(canonical_double(value))
    }

    /// Update the sketch with a canonicalized f32 value.
    pub fn update_f32(&mut self, value: f32) -> Result<(), Error> {
        self.update_f64(value as f64)
    }

    fn update_with_coupon(&mut self, coupon: u32) -> Result<(), Error> {
        if self.mem.is_read_only() {
            return Err(Error::read_only("update"));
        }
        match self.cur_mode {
            CurMode::List => self.list_update(coupon),
            CurMode::Set => {
                if self.set_insert(coupon)? {
                    self.maybe_promote_set()?;
                }
                Ok(())
            }
            CurMode::Hll => self.hll_update(coupon),
        }
    }

    /// Restart as an empty list-mode sketch in the same region.
    pub fn reset(&mut self) -> Result<(), Error> {
        if self.mem.is_read_only() {
            return Err(Error::read_only("reset"));
        }
        self.cur_mode = CurMode::List;
        self.coupon_count = 0;
        self.lg_arr = 0;
        self.image_len = updatable_list_bytes();
        self.write_empty_list()
    }

    /// Heapify into an owned sketch.
    pub fn to_sketch(&self) -> Result<HllSketch, Error> {
        HllSketch::deserialize(self.image_bytes())
    }

    /// The current serialized image (updatable form unless this is a
    /// compact read-only wrap).
    pub fn image_bytes(&self) -> &[u8] {
        self.mem.slice(0, self.image_len)
    }

    /// Serialize to the compact form.
    pub fn serialize(&self) -> Result<Vec<u8>, Error> {
        Ok(self.to_sketch()?.serialize())
    }

    /// Serialize to the updatable form.
    pub fn serialize_updatable(&self) -> Result<Vec<u8>, Error> {
        if self.compact {
            return Ok(self.to_sketch()?.serialize_updatable());
        }
        Ok(self.image_bytes().to_vec())
    }

    pub fn estimate(&self) -> f64 {
        match self.cur_mode {
            CurMode::List | CurMode::Set => self.coupon_count as f64,
            CurMode::Hll => {
                let (est, cur_min, nacm) = self.preamble_estimator();
                est.estimate(self.lg_config_k, cur_min, nacm)
            }
        }
    }

    /// The composite estimate, ignoring HIP.
    pub fn composite_estimate(&self) -> f64 {
        match self.cur_mode {
            CurMode::List | CurMode::Set => self.coupon_count as f64,
            CurMode::Hll => {
                let (est, cur_min, nacm) = self.preamble_estimator();
                est.composite_estimate(self.lg_config_k, cur_min, nacm)
            }
        }
    }

    /// Approximate lower error bound; exact in list/set mode.
    pub fn lower_bound(&self, num_std_dev: NumStdDev) -> f64 {
        match self.cur_mode {
            CurMode::List | CurMode::Set => self.coupon_count as f64,
            CurMode::Hll => {
                let (est, cur_min, nacm) = self.preamble_estimator();
                est.lower_bound(self.lg_config_k, cur_min, nacm, num_std_dev)
            }
        }
    }

    /// Approximate upper error bound; exact in list/set mode.
    pub fn upper_bound(&self, num_std_dev: NumStdDev) -> f64 {
        match self.cur_mode {
            CurMode::List | CurMode::Set => self.coupon_count as f64,
            CurMode::Hll => {
                let (est, cur_min, nacm) = self.preamble_estimator();
                est.upper_bound(self.lg_config_k, cur_min, nacm, num_std_dev)
            }
        }
    }

    fn preamble_estimator(&self) -> (HipEstimator, u8, u32) {
        let est = HipEstimator::from_parts(
            self.mem.get_f64(HIP_ACCUM_BYTES),
            self.mem.get_f64(KXQ0_BYTES),
            self.mem.get_f64(KXQ1_BYTES),
            self.mem.get_u8(FLAGS_BYTE) & FLAG_IS_OUT_OF_ORDER != 0,
        );
        (
            est,
            self.mem.get_u8(CUR_MIN_BYTE),
            self.mem.get_u24(NUM_AT_CUR_MIN_BYTES),
        )
    }

    // --- list mode -------------------------------------------------------

    fn write_empty_list(&mut self) -> Result<(), Error> {
        self.mem.clear(0, updatable_list_bytes())?;
        self.mem.put_u8(PREAMBLE_INTS_BYTE, PREAMBLE_INTS_COUPON)?;
        self.mem.put_u8(SER_VER_BYTE, SER_VER)?;
        self.mem.put_u8(FAMILY_BYTE, HLL_FAMILY_ID)?;
        self.mem.put_u8(LG_K_BYTE, self.lg_config_k)?;
        self.mem.put_u8(LG_ARR_BYTE, 0)?;
        self.mem.put_u8(FLAGS_BYTE, FLAG_IS_EMPTY)?;
        self.mem.put_u8(HLL_TYPE_BYTE, self.tgt_hll_type.code())?;
        self.mem.put_u8(MODE_BYTE, CurMode::List.code())?;
        Ok(())
    }

    fn list_update(&mut self, coupon: u32) -> Result<(), Error> {
        let slots = 1usize << LG_INIT_LIST_SIZE;
        for i in 0..slots {
            let off = COUPON_DATA_START + 4 * i;
            let v = self.mem.get_u32(off);
            if v == 0 {
                self.mem.put_u32(off, coupon)?;
                self.coupon_count += 1;
                self.mem.put_u8(LG_ARR_BYTE, self.coupon_count as u8)?;
                let flags = self.mem.get_u8(FLAGS_BYTE) & !FLAG_IS_EMPTY;
                self.mem.put_u8(FLAGS_BYTE, flags)?;
                return Ok(());
            }
            if v == coupon {
                return Ok(());
            }
        }

        // Ninth distinct coupon: rebuild the region as a set and retry
        let coupons: Vec<u32> = (0..slots)
            .map(|i| self.mem.get_u32(COUPON_DATA_START + 4 * i))
            .collect();

        self.cur_mode = CurMode::Set;
        self.lg_arr = LG_INIT_SET_SIZE;
        self.coupon_count = 0;
        self.image_len = updatable_set_bytes(self.lg_arr);
        self.mem.clear(COUPON_DATA_START, 4 << self.lg_arr)?;
        self.mem.put_u8(LG_ARR_BYTE, self.lg_arr as u8)?;
        self.mem.put_u8(MODE_BYTE, CurMode::Set.code())?;

        for c in coupons {
            self.set_insert(c)?;
        }
        self.set_insert(coupon)?;
        self.maybe_promote_set()
    }

    // --- set mode --------------------------------------------------------

    /// Place a coupon without duplicate bookkeeping side effects beyond
    /// count; returns false for a duplicate.
    fn set_insert(&mut self, coupon: u32) -> Result<bool, Error> {
        let mask = (1usize << self.lg_arr) - 1;
        let mut probe = (avalanche32(coupon) as usize) & mask;
        loop {
            let off = COUPON_DATA_START + 4 * probe;
            let v = self.mem.get_u32(off);
            if v == 0 {
                self.mem.put_u32(off, coupon)?;
                self.coupon_count += 1;
                break;
            }
            if v == coupon {
                return Ok(false);
            }
            probe = (probe + 1) & mask;
        }

        if self.coupon_count * RESIZE_DENOM > RESIZE_NUMER << self.lg_arr {
            self.grow_set()?;
        }
        Ok(true)
    }

    fn grow_set(&mut self) -> Result<(), Error> {
        let coupons = self.gather_coupons(1 << self.lg_arr);
        self.lg_arr += 1;
        self.image_len = updatable_set_bytes(self.lg_arr);
        self.mem.clear(COUPON_DATA_START, 4 << self.lg_arr)?;
        self.mem.put_u8(LG_ARR_BYTE, self.lg_arr as u8)?;

        let mask = (1usize << self.lg_arr) - 1;
        for c in coupons {
            let mut probe = (avalanche32(c) as usize) & mask;
            loop {
                let off = COUPON_DATA_START + 4 * probe;
                if self.mem.get_u32(off) == 0 {
                    self.mem.put_u32(off, c)?;
                    break;
                }
                probe = (probe + 1) & mask;
            }
        }
        Ok(())
    }

    fn gather_coupons(&self, cap: usize) -> Vec<u32> {
        (0..cap)
            .map(|i| self.mem.get_u32(COUPON_DATA_START + 4 * i))
            .filter(|c| *c != 0)
            .collect()
    }

    fn maybe_promote_set(&mut self) -> Result<(), Error> {
        if self.coupon_count < set_promotion_threshold(self.lg_config_k) {
            return Ok(());
        }

        let coupons = self.gather_coupons(1 << self.lg_arr);

        // Rebuild the region as a zeroed register image, then replay
        self.cur_mode = CurMode::Hll;
        self.lg_arr = match self.tgt_hll_type {
            HllType::Hll4 => lg_aux_arr_ints(self.lg_config_k),
            _ => 0,
        };
        self.image_len = updatable_hll_bytes(self.lg_config_k, self.tgt_hll_type, self.lg_arr);
        self.coupon_count = 0;

        self.mem
            .clear(COUPON_DATA_START, self.image_len - COUPON_DATA_START)?;
        self.mem.put_u8(PREAMBLE_INTS_BYTE, PREAMBLE_INTS_HLL)?;
        self.mem.put_u8(
            LG_ARR_BYTE,
            if self.tgt_hll_type == HllType::Hll4 {
                self.lg_arr as u8
            } else {
                0
            },
        )?;
        self.mem.put_u8(MODE_BYTE, CurMode::Hll.code())?;

        let k = 1u32 << self.lg_config_k;
        self.mem.put_u8(CUR_MIN_BYTE, 0)?;
        self.mem.put_u24(NUM_AT_CUR_MIN_BYTES, k)?;
        self.mem.put_f64(HIP_ACCUM_BYTES, 0.0)?;
        self.mem.put_f64(KXQ0_BYTES, k as f64)?;
        self.mem.put_f64(KXQ1_BYTES, 0.0)?;
        self.mem.put_u32(AUX_COUNT_BYTES, 0)?;

        for c in coupons {
            self.hll_update(c)?;
        }
        Ok(())
    }

    // --- HLL mode --------------------------------------------------------

    fn hll_update(&mut self, coupon: u32) -> Result<(), Error> {
        match self.tgt_hll_type {
            HllType::Hll8 => self.hll8_update(coupon),
            HllType::Hll6 => self.hll6_update(coupon),
            HllType::Hll4 => self.hll4_update(coupon),
        }
    }

    /// Mirror of `HipEstimator::update` over the preamble scalars.
    fn bump_estimator(&mut self, old_value: u8, new_value: u8) -> Result<(), Error> {
        let k = (1u64 << self.lg_config_k) as f64;
        let mut kxq0 = self.mem.get_f64(KXQ0_BYTES);
        let mut kxq1 = self.mem.get_f64(KXQ1_BYTES);

        if self.mem.get_u8(FLAGS_BYTE) & FLAG_IS_OUT_OF_ORDER == 0 {
            let hip = self.mem.get_f64(HIP_ACCUM_BYTES);
            self.mem.put_f64(HIP_ACCUM_BYTES, hip + k / (kxq0 + kxq1))?;
        }

        if old_value < 32 {
            kxq0 -= inv_pow2(old_value);
        } else {
            kxq1 -= inv_pow2(old_value);
        }
        if new_value < 32 {
            kxq0 += inv_pow2(new_value);
        } else {
            kxq1 += inv_pow2(new_value);
        }
        self.mem.put_f64(KXQ0_BYTES, kxq0)?;
        self.mem.put_f64(KXQ1_BYTES, kxq1)?;
        Ok(())
    }

    fn decrement_num_at_cur_min(&mut self) -> Result<(), Error> {
        let nacm = self.mem.get_u24(NUM_AT_CUR_MIN_BYTES);
        self.mem.put_u24(NUM_AT_CUR_MIN_BYTES, nacm - 1)?;
        Ok(())
    }

    fn hll8_update(&mut self, coupon: u32) -> Result<(), Error> {
        let mask = (1u32 << self.lg_config_k) - 1;
        let slot = get_slot(coupon) & mask;
        let new_value = get_value(coupon) & VAL_MASK_6 as u8;

        let off = HLL_DATA_START + slot as usize;
        let old_value = self.mem.get_u8(off);
        if new_value > old_value {
            self.bump_estimator(old_value, new_value)?;
            self.mem.put_u8(off, new_value)?;
            if old_value == 0 {
                self.decrement_num_at_cur_min()?;
            }
        }
        Ok(())
    }

    fn hll6_update(&mut self, coupon: u32) -> Result<(), Error> {
        let mask = (1u32 << self.lg_config_k) - 1;
        let slot = get_slot(coupon) & mask;
        let new_value = get_value(coupon);

        let start_bit = slot * 6;
        let byte_idx = HLL_DATA_START + (start_bit >> 3) as usize;
        let shift = (start_bit & 7) as u16;

        let window = self.mem.get_u16(byte_idx);
        let old_value = ((window >> shift) & VAL_MASK_6) as u8;
        if new_value > old_value {
            self.bump_estimator(old_value, new_value)?;
            let window = (window & !(VAL_MASK_6 << shift)) | ((new_value as u16) << shift);
            self.mem.put_u16(byte_idx, window)?;
            if old_value == 0 {
                self.decrement_num_at_cur_min()?;
            }
        }
        Ok(())
    }

    // 4-bit encoding: nibble access, aux table over the region, rebasing.

    fn get_nibble(&self, slot: u32) -> u8 {
        let byte = self.mem.get_u8(HLL_DATA_START + (slot >> 1) as usize);
        if slot & 1 == 0 { byte & 15 } else { byte >> 4 }
    }

    fn put_nibble(&mut self, slot: u32, value: u8) -> Result<(), Error> {
        let off = HLL_DATA_START + (slot >> 1) as usize;
        let old_byte = self.mem.get_u8(off);
        let new_byte = if slot & 1 == 0 {
            (old_byte & 0xF0) | (value & 0x0F)
        } else {
            (old_byte & 0x0F) | (value << 4)
        };
        self.mem.put_u8(off, new_byte)?;
        Ok(())
    }

    fn aux_region_start(&self) -> usize {
        HLL_DATA_START + register_data_bytes(self.lg_config_k, HllType::Hll4)
    }

    fn aux_get(&self, slot: u32) -> Option<u8> {
        let start = self.aux_region_start();
        let mask = (1usize << self.lg_arr) - 1;
        let index_mask = (1u32 << self.lg_config_k) - 1;
        let mut probe = (avalanche32(slot) as usize) & mask;
        let origin = probe;

        loop {
            let word = self.mem.get_u32(start + 4 * probe);
            if word == 0 {
                return None;
            }
            if word & index_mask == slot {
                return Some((word >> self.lg_config_k) as u8);
            }
            probe = (probe + 1) & mask;
            if probe == origin {
                return None;
            }
        }
    }

    fn aux_insert(&mut self, slot: u32, value: u8) -> Result<(), Error> {
        let start = self.aux_region_start();
        let mask = (1usize << self.lg_arr) - 1;
        let mut probe = (avalanche32(slot) as usize) & mask;
        loop {
            let off = start + 4 * probe;
            if self.mem.get_u32(off) == 0 {
                self.mem
                    .put_u32(off, ((value as u32) << self.lg_config_k) | slot)?;
                break;
            }
            probe = (probe + 1) & mask;
        }

        let aux_count = self.mem.get_u32(AUX_COUNT_BYTES) + 1;
        self.mem.put_u32(AUX_COUNT_BYTES, aux_count)?;

        if aux_count as usize * 16 > (1usize << self.lg_arr) * 15 {
            self.grow_aux()?;
        }
        Ok(())
    }

    fn aux_replace(&mut self, slot: u32, value: u8) -> Result<(), Error> {
        let start = self.aux_region_start();
        let mask = (1usize << self.lg_arr) - 1;
        let index_mask = (1u32 << self.lg_config_k) - 1;
        let mut probe = (avalanche32(slot) as usize) & mask;
        let origin = probe;

        loop {
            let off = start + 4 * probe;
            let word = self.mem.get_u32(off);
            assert_ne!(word, 0, "replace of absent aux index {slot}");
            if word & index_mask == slot {
                self.mem
                    .put_u32(off, ((value as u32) << self.lg_config_k) | slot)?;
                return Ok(());
            }
            probe = (probe + 1) & mask;
            assert_ne!(probe, origin, "replace of absent aux index {slot}");
        }
    }

    /// Double the aux region inside the buffer.
    ///
    /// The region was sized for the set stage, which dominates the HLL
    /// stage, so there is usually slack; when there is not, the growth
    /// surfaces as an `InsufficientCapacity` error.
    fn grow_aux(&mut self) -> Result<(), Error> {
        let new_len = updatable_hll_bytes(self.lg_config_k, HllType::Hll4, self.lg_arr + 1);
        if new_len > self.mem.capacity() {
            return Err(Error::capacity(new_len, self.mem.capacity()));
        }

        let start = self.aux_region_start();
        let words: Vec<u32> = (0..1usize << self.lg_arr)
            .map(|i| self.mem.get_u32(start + 4 * i))
            .filter(|w| *w != 0)
            .collect();

        self.lg_arr += 1;
        self.image_len = new_len;
        self.mem.clear(start, 4 << self.lg_arr)?;
        self.mem.put_u8(LG_ARR_BYTE, self.lg_arr as u8)?;

        let mask = (1usize << self.lg_arr) - 1;
        let index_mask = (1u32 << self.lg_config_k) - 1;
        for word in words {
            let slot = word & index_mask;
            let mut probe = (avalanche32(slot) as usize) & mask;
            loop {
                let off = start + 4 * probe;
                if self.mem.get_u32(off) == 0 {
                    self.mem.put_u32(off, word)?;
                    break;
                }
                probe = (probe + 1) & mask;
            }
        }
        Ok(())
    }

    fn hll4_update(&mut self, coupon: u32) -> Result<(), Error> {
        let mask = (1u32 << self.lg_config_k) - 1;
        let slot = get_slot(coupon) & mask;
        let new_value = get_value(coupon);

        let cur_min = self.mem.get_u8(CUR_MIN_BYTE);
        if new_value <= cur_min {
            return Ok(());
        }

        let raw_stored = self.get_nibble(slot);
        let lower_bound = raw_stored.saturating_add(cur_min);
        if raw_stored < AUX_TOKEN && new_value <= lower_bound {
            return Ok(());
        }

        let old_value = if raw_stored < AUX_TOKEN {
            lower_bound
        } else {
            self.aux_get(slot)
                .expect("sentinel nibble but slot not in aux region")
        };

        if new_value <= old_value {
            return Ok(());
        }

        self.bump_estimator(old_value, new_value)?;

        let shifted_new = new_value - cur_min;
        match (raw_stored, shifted_new) {
            (AUX_TOKEN, shifted) if shifted >= AUX_TOKEN => {
                self.aux_replace(slot, new_value)?;
            }
            (AUX_TOKEN, _) => {
                unreachable!("stored exception exceeds cur_min + 14 but new winner does not");
            }
            (_, shifted) if shifted >= AUX_TOKEN => {
                self.put_nibble(slot, AUX_TOKEN)?;
                self.aux_insert(slot, new_value)?;
            }
            _ => {
                self.put_nibble(slot, shifted_new)?;
            }
        }

        if old_value == cur_min {
            let nacm = self.mem.get_u24(NUM_AT_CUR_MIN_BYTES) - 1;
            self.mem.put_u24(NUM_AT_CUR_MIN_BYTES, nacm)?;
            while self.mem.get_u24(NUM_AT_CUR_MIN_BYTES) == 0 {
                self.shift_to_bigger_cur_min()?;
            }
        }
        Ok(())
    }

    /// In-place rebase, mirroring the owned 4-bit array: decrement every
    /// nibble, then rebuild the aux region at its initial size, folding
    /// back entries that re-enter the nibble range.
    fn shift_to_bigger_cur_min(&mut self) -> Result<(), Error> {
        let new_cur_min = self.mem.get_u8(CUR_MIN_BYTE) + 1;
        let k = 1u32 << self.lg_config_k;
        let mut num_at_new = 0u32;

        for slot in 0..k {
            let raw = self.get_nibble(slot);
            debug_assert_ne!(raw, 0, "no register may sit at cur_min when rebasing");
            if raw < AUX_TOKEN {
                let decremented = raw - 1;
                self.put_nibble(slot, decremented)?;
                if decremented == 0 {
                    num_at_new += 1;
                }
            }
        }

        let aux_count = self.mem.get_u32(AUX_COUNT_BYTES);
        if aux_count > 0 {
            let start = self.aux_region_start();
            let index_mask = (1u32 << self.lg_config_k) - 1;
            let entries: Vec<(u32, u8)> = (0..1usize << self.lg_arr)
                .map(|i| self.mem.get_u32(start + 4 * i))
                .filter(|w| *w != 0)
                .map(|w| (w & index_mask, (w >> self.lg_config_k) as u8))
                .collect();

            self.mem.clear(start, 4 << self.lg_arr)?;
            self.lg_arr = lg_aux_arr_ints(self.lg_config_k);
            self.image_len = updatable_hll_bytes(self.lg_config_k, HllType::Hll4, self.lg_arr);
            self.mem.put_u8(LG_ARR_BYTE, self.lg_arr as u8)?;
            self.mem.put_u32(AUX_COUNT_BYTES, 0)?;

            for (slot, true_value) in entries {
                let new_shifted = true_value - new_cur_min;
                if new_shifted < AUX_TOKEN {
                    self.put_nibble(slot, new_shifted)?;
                } else {
                    self.aux_insert(slot, true_value)?;
                }
            }
        }

        self.mem.put_u8(CUR_MIN_BYTE, new_cur_min)?;
        self.mem.put_u24(NUM_AT_CUR_MIN_BYTES, num_at_new)?;
        Ok(())
    }
}

fn count_nonzero_words(bytes: &[u8], start: usize, words: usize) -> usize {
    (0..words)
        .filter(|i| {
            let off = start + 4 * i;
            bytes[off..off + 4] != [0, 0, 0, 0]
        })
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn region_for(lg_config_k: u8, tgt: HllType) -> Vec<u8> {
        vec![0u8; max_updatable_serialization_bytes(lg_config_k, tgt)]
    }

    #[test]
    fn test_too_small_region() {
        let mut region = vec![0u8; 16];
        let err = DirectHllSketch::new_in(10, HllType::Hll8, &mut region).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InsufficientCapacity);
    }

    #[test]
    fn test_invalid_lg_k() {
        let mut region = vec![0u8; 1 << 16];
        let err = DirectHllSketch::new_in(25, HllType::Hll8, &mut region).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn test_mode_walk() {
        let mut region = region_for(4, HllType::Hll8);
        let mut sketch = DirectHllSketch::new_in(4, HllType::Hll8, &mut region).unwrap();
        assert!(sketch.is_empty());

        for i in 0..9u64 {
            sketch.update(i).unwrap();
        }
        assert_eq!(sketch.current_mode(), CurMode::Set);
        assert_eq!(sketch.estimate(), 9.0);

        for i in 9..13u64 {
            sketch.update(i).unwrap();
        }
        assert_eq!(sketch.current_mode(), CurMode::Hll);
    }

    #[test]
    fn test_read_only_wrap_rejects_mutation() {
        let mut sketch = HllSketch::new(10, HllType::Hll8);
        for i in 0..100u32 {
            sketch.update(i);
        }
        let bytes = sketch.serialize();

        let mut wrapped = DirectHllSketch::wrap_read_only(&bytes).unwrap();
        assert_eq!(wrapped.estimate(), sketch.estimate());

        let err = wrapped.update(7u32).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ReadOnlyViolation);
        let err = wrapped.reset().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ReadOnlyViolation);
    }

    #[test]
    fn test_wrap_rejects_compact() {
        let sketch = HllSketch::new(10, HllType::Hll8);
        let mut bytes = sketch.serialize();
        bytes.resize(max_updatable_serialization_bytes(10, HllType::Hll8), 0);
        let err = DirectHllSketch::wrap(&mut bytes).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ReadOnlyViolation);
    }

    #[test]
    fn test_rewrap_continues_updates() {
        let mut region = region_for(10, HllType::Hll8);
        {
            let mut sketch = DirectHllSketch::new_in(10, HllType::Hll8, &mut region).unwrap();
            for i in 0..500u32 {
                sketch.update(i).unwrap();
            }
        }
        {
            let mut sketch = DirectHllSketch::wrap(&mut region).unwrap();
            for i in 500..1_000u32 {
                sketch.update(i).unwrap();
            }
            let estimate = sketch.estimate();
            assert!(
                estimate > 900.0 && estimate < 1_100.0,
                "estimate {estimate} after re-wrap"
            );
        }
    }

    #[test]
    fn test_owned_backend_matches_borrowed() {
        let mut region = region_for(6, HllType::Hll4);
        let mut borrowed = DirectHllSketch::new_in(6, HllType::Hll4, &mut region).unwrap();
        let mut owned = DirectHllSketch::new_owned(6, HllType::Hll4);

        for i in 0..2_000u32 {
            borrowed.update(i).unwrap();
            owned.update(i).unwrap();
        }
        assert_eq!(owned.image_bytes(), borrowed.image_bytes());
        assert_eq!(owned.estimate(), borrowed.estimate());
    }

    #[test]
    fn test_reset() {
        let mut region = region_for(8, HllType::Hll6);
        let mut sketch = DirectHllSketch::new_in(8, HllType::Hll6, &mut region).unwrap();
        for i in 0..1_000u32 {
            sketch.update(i).unwrap();
        }
        assert_eq!(sketch.current_mode(), CurMode::Hll);

        sketch.reset().unwrap();
        assert!(sketch.is_empty());
        assert_eq!(sketch.current_mode(), CurMode::List);
        assert_eq!(sketch.estimate(), 0.0);
    }
}
