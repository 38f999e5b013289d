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

//! Shared helpers used across the sketch modules.

/// The number of standard deviations used when computing confidence bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumStdDev {
    One,
    Two,
    Three,
}

impl NumStdDev {
    pub fn as_u8(self) -> u8 {
        match self {
            NumStdDev::One => 1,
            NumStdDev::Two => 2,
            NumStdDev::Three => 3,
        }
    }

    pub fn as_f64(self) -> f64 {
        self.as_u8() as f64
    }
}

/// Canonicalize a double before hashing so that all representations of the
/// same logical value hash identically: -0.0 folds into +0.0 and every NaN
/// folds into the canonical quiet NaN.
pub(crate) fn canonical_double(value: f64) -> i64 {
    let canonical = if value == 0.0 {
        0.0
    } else if value.is_nan() {
        f64::from_bits(0x7FF8_0000_0000_0000)
    } else {
        value
    };
    canonical.to_bits() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_num_std_dev() {
        assert_eq!(NumStdDev::One.as_u8(), 1);
        assert_eq!(NumStdDev::Two.as_u8(), 2);
        assert_eq!(NumStdDev::Three.as_f64(), 3.0);
    }

    #[test]
    fn test_canonical_double_zero() {
        assert_eq!(canonical_double(0.0), canonical_double(-0.0));
    }

    #[test]
    fn test_canonical_double_nan() {
        let a = canonical_double(f64::NAN);
        let b = canonical_double(f64::from_bits(0x7FF8_0000_0000_0001));
        assert_eq!(a, b);
    }

    #[test]
    fn test_canonical_double_ordinary() {
        assert_ne!(canonical_double(1.0), canonical_double(2.0));
        assert_eq!(canonical_double(3.5), canonical_double(3.5));
    }
}
