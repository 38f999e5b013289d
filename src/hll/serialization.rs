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

//! Binary serialization of HLL sketches.
//!
//! Every image starts with a fixed 8-byte header; HLL-mode images extend it
//! to 40 bytes with the estimator scalars. All fields are little-endian.
//!
//! | byte | field |
//! |------|-------|
//! | 0    | preamble ints (2 coupon modes, 10 HLL) |
//! | 1    | serial version |
//! | 2    | family id (7) |
//! | 3    | lg_config_k |
//! | 4    | list count / set lg_arr / aux lg_arr (Hll4) / 0 |
//! | 5    | flags |
//! | 6    | target HLL type code |
//! | 7    | current mode code |
//!
//! Two forms exist. The *compact* form is read-only and minimally sized:
//! coupon modes pack only their valid coupons, sorted ascending, and the
//! 4-bit encoding packs only its occupied aux words, sorted ascending
//! (sorting makes the payload a canonical function of the stored keys, so
//! round trips re-serialize byte-identically). The *updatable* form is the
//! in-memory image layout with full tables verbatim, and can be re-wrapped
//! for mutation; heapifying it adopts the stored tables as-is.

use crate::codec::SketchBytes;
use crate::codec::SketchSlice;
use crate::error::Error;
use crate::hll::CurMode;
use crate::hll::HllType;
use crate::hll::MAX_LG_K;
use crate::hll::MIN_LG_K;
use crate::hll::array4;
use crate::hll::array4::Array4;
use crate::hll::array6;
use crate::hll::array6::Array6;
use crate::hll::array8::Array8;
use crate::hll::aux::AuxMap;
use crate::hll::aux::lg_aux_arr_ints;
use crate::hll::container::Container;
use crate::hll::estimator::HipEstimator;
use crate::hll::list::CouponList;
use crate::hll::list::LG_INIT_LIST_SIZE;
use crate::hll::mode::Mode;
use crate::hll::set::CouponSet;
use crate::hll::set::LG_INIT_SET_SIZE;
use crate::hll::sketch::HllSketch;

/// Family ID for HLL sketches
pub(crate) const HLL_FAMILY_ID: u8 = 7;

/// Current serialization version
pub(crate) const SER_VER: u8 = 1;

/// Preamble size for coupon modes (8 bytes = 2 ints)
pub(crate) const PREAMBLE_INTS_COUPON: u8 = 2;

/// Preamble size for HLL mode (40 bytes = 10 ints)
pub(crate) const PREAMBLE_INTS_HLL: u8 = 10;

// Header byte offsets
pub(crate) const PREAMBLE_INTS_BYTE: usize = 0;
pub(crate) const SER_VER_BYTE: usize = 1;
pub(crate) const FAMILY_BYTE: usize = 2;
pub(crate) const LG_K_BYTE: usize = 3;
pub(crate) const LG_ARR_BYTE: usize = 4;
pub(crate) const FLAGS_BYTE: usize = 5;
pub(crate) const HLL_TYPE_BYTE: usize = 6;
pub(crate) const MODE_BYTE: usize = 7;

/// Coupon data (list slots or set table) starts right after the header.
pub(crate) const COUPON_DATA_START: usize = 8;

// HLL preamble extension offsets
pub(crate) const CUR_MIN_BYTE: usize = 8;
pub(crate) const NUM_AT_CUR_MIN_BYTES: usize = 9; // 24-bit LE, K <= 2^21 fits
pub(crate) const HIP_ACCUM_BYTES: usize = 12;
pub(crate) const KXQ0_BYTES: usize = 20;
pub(crate) const KXQ1_BYTES: usize = 28;
pub(crate) const AUX_COUNT_BYTES: usize = 36;

/// Register data starts after the 40-byte HLL preamble; the aux region
/// (4-bit encoding only) follows the registers.
pub(crate) const HLL_DATA_START: usize = 40;

// Flags (byte 5) - bit masks
/// Flag: data is in big-endian format (we always use little-endian)
#[allow(dead_code)]
pub(crate) const FLAG_IS_BIG_ENDIAN: u8 = 1 << 0;
/// Flag: image is read-only (compact images are read-only)
pub(crate) const FLAG_IS_READ_ONLY: u8 = 1 << 1;
/// Flag: sketch is empty
pub(crate) const FLAG_IS_EMPTY: u8 = 1 << 2;
/// Flag: image is in compact format
pub(crate) const FLAG_IS_COMPACT: u8 = 1 << 3;
/// Flag: HIP history is invalid (merged or re-ordered updates)
pub(crate) const FLAG_IS_OUT_OF_ORDER: u8 = 1 << 4;

/// Bytes of register data for each encoding.
pub(crate) fn register_data_bytes(lg_config_k: u8, hll_type: HllType) -> usize {
    match hll_type {
        HllType::Hll4 => array4::data_bytes(lg_config_k),
        HllType::Hll6 => array6::data_bytes(lg_config_k),
        HllType::Hll8 => 1 << lg_config_k,
    }
}

/// Updatable image length of a list-mode sketch (full eight slots).
pub(crate) fn updatable_list_bytes() -> usize {
    COUPON_DATA_START + 4 * (1 << LG_INIT_LIST_SIZE)
}

/// Updatable image length of a set-mode sketch with the given table size.
pub(crate) fn updatable_set_bytes(lg_arr: usize) -> usize {
    COUPON_DATA_START + 4 * (1 << lg_arr)
}

/// Updatable image length of an HLL-mode sketch.
pub(crate) fn updatable_hll_bytes(lg_config_k: u8, hll_type: HllType, aux_lg: usize) -> usize {
    let aux = match hll_type {
        HllType::Hll4 => 4 << aux_lg,
        _ => 0,
    };
    HLL_DATA_START + register_data_bytes(lg_config_k, hll_type) + aux
}

/// The largest updatable image a sketch of this configuration can reach.
///
/// The set stage dominates for most configurations: promotion waits until
/// the set holds 3K/4 coupons, by which time its table has grown to K
/// four-byte slots. A region at least this large can host a
/// [`DirectHllSketch`](crate::hll::DirectHllSketch) through its whole
/// lifecycle.
///
/// # Panics
///
/// Panics if `lg_config_k` is not in the range [4, 21].
pub fn max_updatable_serialization_bytes(lg_config_k: u8, tgt_hll_type: HllType) -> usize {
    assert!(
        (MIN_LG_K..=MAX_LG_K).contains(&lg_config_k),
        "lg_config_k must be in [4, 21], got {lg_config_k}"
    );
    let k = 1usize << lg_config_k;
    let set_stage = COUPON_DATA_START + 4 * k;
    let hll_stage = updatable_hll_bytes(lg_config_k, tgt_hll_type, lg_aux_arr_ints(lg_config_k));
    set_stage.max(hll_stage)
}

struct HllParts<'a> {
    cur_min: u8,
    num_at_cur_min: u32,
    estimator: &'a HipEstimator,
    registers: &'a [u8],
    aux: Option<&'a AuxMap>,
}

pub(crate) fn serialize(sketch: &HllSketch, compact: bool) -> Vec<u8> {
    match sketch.mode() {
        Mode::List(list) => serialize_coupons(sketch, &list.container, compact),
        Mode::Set(set) => serialize_coupons(sketch, &set.container, compact),
        Mode::Hll4(arr) => serialize_hll(
            sketch,
            HllParts {
                cur_min: arr.cur_min(),
                num_at_cur_min: arr.num_at_cur_min(),
                estimator: arr.estimator(),
                registers: arr.registers(),
                aux: arr.aux(),
            },
            compact,
        ),
        Mode::Hll6(arr) => serialize_hll(
            sketch,
            HllParts {
                cur_min: 0,
                num_at_cur_min: arr.num_zeros(),
                estimator: arr.estimator(),
                registers: arr.registers(),
                aux: None,
            },
            compact,
        ),
        Mode::Hll8(arr) => serialize_hll(
            sketch,
            HllParts {
                cur_min: 0,
                num_at_cur_min: arr.num_zeros(),
                estimator: arr.estimator(),
                registers: arr.registers(),
                aux: None,
            },
            compact,
        ),
    }
}

fn base_flags(compact: bool) -> u8 {
    if compact {
        FLAG_IS_COMPACT | FLAG_IS_READ_ONLY
    } else {
        0
    }
}

fn write_header(
    bytes: &mut SketchBytes,
    preamble_ints: u8,
    lg_config_k: u8,
    lg_arr_byte: u8,
    flags: u8,
    tgt_hll_type: HllType,
    cur_mode: CurMode,
) {
    bytes.write_u8(preamble_ints);
    bytes.write_u8(SER_VER);
    bytes.write_u8(HLL_FAMILY_ID);
    bytes.write_u8(lg_config_k);
    bytes.write_u8(lg_arr_byte);
    bytes.write_u8(flags);
    bytes.write_u8(tgt_hll_type.code());
    bytes.write_u8(cur_mode.code());
}

fn serialize_coupons(sketch: &HllSketch, container: &Container, compact: bool) -> Vec<u8> {
    let cur_mode = sketch.current_mode();
    let mut flags = base_flags(compact);
    if container.is_empty() {
        flags |= FLAG_IS_EMPTY;
    }

    let lg_arr_byte = match cur_mode {
        CurMode::List => container.len as u8,
        CurMode::Set => container.lg_size as u8,
        CurMode::Hll => unreachable!("coupon serializer never sees HLL mode"),
    };

    if compact {
        let mut coupons: Vec<u32> = container.iter_valid().collect();
        coupons.sort_unstable();

        let mut bytes = SketchBytes::with_capacity(COUPON_DATA_START + 4 * coupons.len());
        write_header(
            &mut bytes,
            PREAMBLE_INTS_COUPON,
            sketch.lg_config_k(),
            lg_arr_byte,
            flags,
            sketch.target_type(),
            cur_mode,
        );
        for c in coupons {
            bytes.write_u32_le(c);
        }
        bytes.into_bytes()
    } else {
        let mut bytes =
            SketchBytes::with_capacity(COUPON_DATA_START + 4 * container.coupons.len());
        write_header(
            &mut bytes,
            PREAMBLE_INTS_COUPON,
            sketch.lg_config_k(),
            lg_arr_byte,
            flags,
            sketch.target_type(),
            cur_mode,
        );
        for c in container.coupons.iter() {
            bytes.write_u32_le(*c);
        }
        bytes.into_bytes()
    }
}

fn serialize_hll(sketch: &HllSketch, parts: HllParts<'_>, compact: bool) -> Vec<u8> {
    let lg_config_k = sketch.lg_config_k();
    let hll_type = sketch.target_type();

    let mut flags = base_flags(compact);
    if parts.estimator.is_out_of_order() {
        flags |= FLAG_IS_OUT_OF_ORDER;
    }

    let aux_lg = match hll_type {
        HllType::Hll4 => parts
            .aux
            .map_or(lg_aux_arr_ints(lg_config_k), |aux| aux.lg_size()),
        _ => 0,
    };
    let aux_count = parts.aux.map_or(0, |aux| aux.count());

    let total = if compact {
        HLL_DATA_START + parts.registers.len() + 4 * aux_count
    } else {
        updatable_hll_bytes(lg_config_k, hll_type, aux_lg)
    };

    let mut bytes = SketchBytes::with_capacity(total);
    write_header(
        &mut bytes,
        PREAMBLE_INTS_HLL,
        lg_config_k,
        if hll_type == HllType::Hll4 {
            aux_lg as u8
        } else {
            0
        },
        flags,
        hll_type,
        CurMode::Hll,
    );
    bytes.write_u8(parts.cur_min);
    bytes.write_u24_le(parts.num_at_cur_min);
    bytes.write_f64_le(parts.estimator.hip_accum());
    bytes.write_f64_le(parts.estimator.kxq0());
    bytes.write_f64_le(parts.estimator.kxq1());
    bytes.write_u32_le(aux_count as u32);
    bytes.write(parts.registers);

    if hll_type == HllType::Hll4 {
        if compact {
            if let Some(aux) = parts.aux {
                let mut words: Vec<u32> = aux.words().iter().copied().filter(|w| *w != 0).collect();
                words.sort_unstable();
                for w in words {
                    bytes.write_u32_le(w);
                }
            }
        } else {
            match parts.aux {
                Some(aux) => {
                    for w in aux.words() {
                        bytes.write_u32_le(*w);
                    }
                }
                None => {
                    for _ in 0..(1usize << aux_lg) {
                        bytes.write_u32_le(0);
                    }
                }
            }
        }
    }

    bytes.into_bytes()
}

/// Reconstruct a sketch from either serialized form.
pub(crate) fn deserialize(bytes: &[u8]) -> Result<HllSketch, Error> {
    let header = read_header(bytes)?;

    match header.cur_mode {
        CurMode::List => deserialize_list(bytes, &header),
        CurMode::Set => deserialize_set(bytes, &header),
        CurMode::Hll => deserialize_hll(bytes, &header),
    }
}

pub(crate) struct Header {
    pub lg_config_k: u8,
    pub lg_arr_byte: u8,
    pub flags: u8,
    pub tgt_hll_type: HllType,
    pub cur_mode: CurMode,
}

impl Header {
    pub fn is_empty(&self) -> bool {
        self.flags & FLAG_IS_EMPTY != 0
    }

    pub fn is_compact(&self) -> bool {
        self.flags & FLAG_IS_COMPACT != 0
    }

    pub fn is_out_of_order(&self) -> bool {
        self.flags & FLAG_IS_OUT_OF_ORDER != 0
    }
}

/// Read and validate the common 8-byte header.
pub(crate) fn read_header(bytes: &[u8]) -> Result<Header, Error> {
    if bytes.len() < COUPON_DATA_START {
        return Err(Error::insufficient_data("preamble"));
    }

    let preamble_ints = bytes[PREAMBLE_INTS_BYTE];
    let serial_version = bytes[SER_VER_BYTE];
    let family_id = bytes[FAMILY_BYTE];
    let lg_config_k = bytes[LG_K_BYTE];
    let lg_arr_byte = bytes[LG_ARR_BYTE];
    let flags = bytes[FLAGS_BYTE];
    let type_code = bytes[HLL_TYPE_BYTE];
    let mode_code = bytes[MODE_BYTE];

    if family_id != HLL_FAMILY_ID {
        return Err(Error::invalid_family(HLL_FAMILY_ID, family_id, "HLL"));
    }
    if serial_version != SER_VER {
        return Err(Error::unsupported_serial_version(SER_VER, serial_version));
    }
    if !(MIN_LG_K..=MAX_LG_K).contains(&lg_config_k) {
        return Err(Error::deserial(format!(
            "lg_config_k {lg_config_k} is out of range [{MIN_LG_K}, {MAX_LG_K}]"
        )));
    }
    let tgt_hll_type = HllType::from_code(type_code)
        .ok_or_else(|| Error::deserial(format!("invalid HLL type code {type_code}")))?;
    let cur_mode = CurMode::from_code(mode_code)
        .ok_or_else(|| Error::deserial(format!("invalid mode code {mode_code}")))?;

    let expected_preamble = match cur_mode {
        CurMode::Hll => PREAMBLE_INTS_HLL,
        _ => PREAMBLE_INTS_COUPON,
    };
    if preamble_ints != expected_preamble {
        return Err(Error::deserial(format!(
            "invalid preamble ints: expected {expected_preamble}, got {preamble_ints}"
        )));
    }

    Ok(Header {
        lg_config_k,
        lg_arr_byte,
        flags,
        tgt_hll_type,
        cur_mode,
    })
}

fn deserialize_list(bytes: &[u8], header: &Header) -> Result<HllSketch, Error> {
    if header.is_empty() {
        return Ok(HllSketch::new(header.lg_config_k, header.tgt_hll_type));
    }

    let slots = 1usize << LG_INIT_LIST_SIZE;
    let mut cursor = SketchSlice::new(&bytes[COUPON_DATA_START..]);

    let list = if header.is_compact() {
        let count = header.lg_arr_byte as usize;
        if count > slots {
            return Err(Error::deserial(format!(
                "list coupon count {count} exceeds capacity {slots}"
            )));
        }
        let mut coupons = vec![0u32; slots].into_boxed_slice();
        for slot in coupons.iter_mut().take(count) {
            *slot = cursor
                .read_u32_le()
                .map_err(|_| Error::insufficient_data("list coupons"))?;
        }
        CouponList::from_coupons(coupons, count)
    } else {
        let mut coupons = vec![0u32; slots].into_boxed_slice();
        let mut count = 0;
        for slot in coupons.iter_mut() {
            *slot = cursor
                .read_u32_le()
                .map_err(|_| Error::insufficient_data("list slots"))?;
            if *slot != 0 {
                count += 1;
            }
        }
        CouponList::from_coupons(coupons, count)
    };

    Ok(HllSketch::from_mode(
        header.lg_config_k,
        header.tgt_hll_type,
        Mode::List(list),
    ))
}

fn deserialize_set(bytes: &[u8], header: &Header) -> Result<HllSketch, Error> {
    if header.is_empty() {
        return Ok(HllSketch::new(header.lg_config_k, header.tgt_hll_type));
    }

    let lg_arr = header.lg_arr_byte as usize;
    if !(LG_INIT_SET_SIZE..=header.lg_config_k as usize).contains(&lg_arr) {
        return Err(Error::deserial(format!(
            "set lg_arr {lg_arr} is out of range [{LG_INIT_SET_SIZE}, {}]",
            header.lg_config_k
        )));
    }

    let set = if header.is_compact() {
        // A compact image's length is part of the format: the payload is
        // exactly the packed coupons.
        let payload = bytes.len() - COUPON_DATA_START;
        if payload % 4 != 0 {
            return Err(Error::deserial("compact set payload not a multiple of 4"));
        }
        let count = payload / 4;
        let mut cursor = SketchSlice::new(&bytes[COUPON_DATA_START..]);
        let mut set = CouponSet::with_lg(lg_arr);
        for _ in 0..count {
            let c = cursor
                .read_u32_le()
                .map_err(|_| Error::insufficient_data("set coupons"))?;
            if c == 0 {
                return Err(Error::deserial("empty coupon in compact set payload"));
            }
            set.update(c);
        }
        set
    } else {
        let cap = 1usize << lg_arr;
        let mut cursor = SketchSlice::new(&bytes[COUPON_DATA_START..]);
        let mut coupons = vec![0u32; cap].into_boxed_slice();
        let mut count = 0;
        for slot in coupons.iter_mut() {
            *slot = cursor
                .read_u32_le()
                .map_err(|_| Error::insufficient_data("set table"))?;
            if *slot != 0 {
                count += 1;
            }
        }
        CouponSet {
            container: Container::from_coupons(lg_arr, coupons, count),
        }
    };

    Ok(HllSketch::from_mode(
        header.lg_config_k,
        header.tgt_hll_type,
        Mode::Set(set),
    ))
}

fn deserialize_hll(bytes: &[u8], header: &Header) -> Result<HllSketch, Error> {
    if bytes.len() < HLL_DATA_START {
        return Err(Error::insufficient_data("HLL preamble"));
    }

    let lg_config_k = header.lg_config_k;
    let mut cursor = SketchSlice::new(&bytes[CUR_MIN_BYTE..HLL_DATA_START]);
    let cur_min = cursor
        .read_u8()
        .map_err(|_| Error::insufficient_data("cur_min"))?;
    let num_at_cur_min = cursor
        .read_u24_le()
        .map_err(|_| Error::insufficient_data("num_at_cur_min"))?;
    let hip_accum = cursor
        .read_f64_le()
        .map_err(|_| Error::insufficient_data("hip_accum"))?;
    let kxq0 = cursor
        .read_f64_le()
        .map_err(|_| Error::insufficient_data("kxq0"))?;
    let kxq1 = cursor
        .read_f64_le()
        .map_err(|_| Error::insufficient_data("kxq1"))?;
    let aux_count = cursor
        .read_u32_le()
        .map_err(|_| Error::insufficient_data("aux_count"))? as usize;

    let estimator = HipEstimator::from_parts(hip_accum, kxq0, kxq1, header.is_out_of_order());

    let reg_bytes = register_data_bytes(lg_config_k, header.tgt_hll_type);
    if bytes.len() < HLL_DATA_START + reg_bytes {
        return Err(Error::insufficient_data("register data"));
    }
    let registers: Box<[u8]> = bytes[HLL_DATA_START..HLL_DATA_START + reg_bytes].into();

    let num_zeros = if cur_min == 0 { num_at_cur_min } else { 0 };

    let mode = match header.tgt_hll_type {
        HllType::Hll8 => Mode::Hll8(Array8::from_parts(
            lg_config_k,
            registers,
            num_zeros,
            estimator,
        )),
        HllType::Hll6 => Mode::Hll6(Array6::from_parts(
            lg_config_k,
            registers,
            num_zeros,
            estimator,
        )),
        HllType::Hll4 => {
            let aux = read_aux(bytes, header, HLL_DATA_START + reg_bytes, aux_count)?;
            Mode::Hll4(Array4::from_parts(
                lg_config_k,
                registers,
                cur_min,
                num_at_cur_min,
                aux,
                estimator,
            ))
        }
    };

    Ok(HllSketch::from_mode(
        lg_config_k,
        header.tgt_hll_type,
        mode,
    ))
}

fn read_aux(
    bytes: &[u8],
    header: &Header,
    aux_start: usize,
    aux_count: usize,
) -> Result<Option<AuxMap>, Error> {
    let lg_config_k = header.lg_config_k;
    let aux_lg = header.lg_arr_byte as usize;
    if !(2..=(MAX_LG_K as usize + 1)).contains(&aux_lg) {
        return Err(Error::deserial(format!("aux lg_arr {aux_lg} out of range")));
    }

    if header.is_compact() {
        if aux_count == 0 {
            return Ok(None);
        }
        if bytes.len() < aux_start + 4 * aux_count {
            return Err(Error::insufficient_data("aux entries"));
        }
        let mut cursor = SketchSlice::new(&bytes[aux_start..]);
        let mut aux = AuxMap::with_lg(lg_config_k, aux_lg);
        let index_mask = (1u32 << lg_config_k) - 1;
        for _ in 0..aux_count {
            let word = cursor
                .read_u32_le()
                .map_err(|_| Error::insufficient_data("aux entries"))?;
            if word == 0 {
                return Err(Error::deserial("empty word in compact aux payload"));
            }
            aux.insert(word & index_mask, (word >> lg_config_k) as u8);
        }
        Ok(Some(aux))
    } else {
        let cap = 1usize << aux_lg;
        if bytes.len() < aux_start + 4 * cap {
            return Err(Error::insufficient_data("aux region"));
        }
        if aux_count == 0 {
            return Ok(None);
        }
        let mut cursor = SketchSlice::new(&bytes[aux_start..]);
        let mut words = vec![0u32; cap].into_boxed_slice();
        for w in words.iter_mut() {
            *w = cursor
                .read_u32_le()
                .map_err(|_| Error::insufficient_data("aux region"))?;
        }
        Ok(Some(AuxMap::from_words(lg_config_k, words, aux_count)))
    }
}
