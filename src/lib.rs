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

//! HyperLogLog cardinality sketches.
//!
//! This crate estimates the number of distinct items in a stream using
//! sub-linear space. A sketch starts as an exact coupon list, graduates to a
//! coupon hash set, and finally to a dense array of 2^`lg_config_k`
//! registers packed at 4, 6, or 8 bits each.
//!
//! Entry points:
//!
//! - [`hll::HllSketch`]: owned sketch, updated in memory.
//! - [`hll::DirectHllSketch`]: the same sketch operating in place over a
//!   caller-provided byte region.
//! - [`hll::HllUnion`]: register-max merging of sketches.
//!
//! Serialized images are little-endian and come in two forms: a minimal
//! read-only *compact* form and an *updatable* form that can be re-wrapped
//! for further mutation.

pub mod common;
pub mod error;
pub mod hll;

pub(crate) mod codec;
pub(crate) mod mem;
