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

use crate::hll::CurMode;
use crate::hll::HllType;
use crate::hll::array4::Array4;
use crate::hll::array6::Array6;
use crate::hll::array8::Array8;
use crate::hll::list::CouponList;
use crate::hll::set::CouponSet;

/// The representation behind a sketch. Promotion replaces the variant;
/// nothing mutates through a pointer.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Mode {
    List(CouponList),
    Set(CouponSet),
    Hll4(Array4),
    Hll6(Array6),
    Hll8(Array8),
}

impl Mode {
    pub fn cur_mode(&self) -> CurMode {
        match self {
            Mode::List(_) => CurMode::List,
            Mode::Set(_) => CurMode::Set,
            Mode::Hll4(_) | Mode::Hll6(_) | Mode::Hll8(_) => CurMode::Hll,
        }
    }

    /// A zeroed dense array in the given encoding.
    pub fn new_hll(lg_config_k: u8, tgt_hll_type: HllType) -> Mode {
        match tgt_hll_type {
            HllType::Hll4 => Mode::Hll4(Array4::new(lg_config_k)),
            HllType::Hll6 => Mode::Hll6(Array6::new(lg_config_k)),
            HllType::Hll8 => Mode::Hll8(Array8::new(lg_config_k)),
        }
    }
}
