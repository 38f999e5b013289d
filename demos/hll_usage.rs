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

use hll_sketch::common::NumStdDev;
use hll_sketch::hll::DirectHllSketch;
use hll_sketch::hll::HllSketch;
use hll_sketch::hll::HllType;
use hll_sketch::hll::HllUnion;
use hll_sketch::hll::max_updatable_serialization_bytes;

fn main() {
    // lg_config_k=12 means 4096 registers, ~1.6% relative error
    let mut sketch = HllSketch::new(12, HllType::Hll4);

    println!("Created HLL sketch with lg_config_k=12 (K=4096)");
    println!("Initial estimate: {}", sketch.estimate());

    println!("\nAdding 100,000 unique integers...");
    for i in 0..100_000 {
        sketch.update(i);
    }

    let estimate = sketch.estimate();
    let actual = 100_000;
    let error = ((estimate - actual as f64) / actual as f64 * 100.0).abs();

    println!("Actual unique values: {actual}");
    println!("Estimated unique values: {estimate:.2}");
    println!("Relative error: {error:.2}%");
    println!(
        "Bounds at 2 std dev: [{:.2}, {:.2}]",
        sketch.lower_bound(NumStdDev::Two),
        sketch.upper_bound(NumStdDev::Two)
    );

    println!("\nAdding the same 100,000 values again...");
    for i in 0..100_000 {
        sketch.update(i);
    }
    println!("Estimate after duplicates: {:.2}", sketch.estimate());

    // Serialization round trip
    let compact = sketch.serialize();
    let updatable = sketch.serialize_updatable();
    println!("\nCompact size: {} bytes", compact.len());
    println!("Updatable size: {} bytes", updatable.len());

    let restored = HllSketch::deserialize(&compact).unwrap();
    println!("Estimate after deserialization: {:.2}", restored.estimate());

    // A sketch living in a caller-owned byte region
    println!("\nRunning the same stream through a direct sketch...");
    let mut region = vec![0u8; max_updatable_serialization_bytes(12, HllType::Hll4)];
    let mut direct = DirectHllSketch::new_in(12, HllType::Hll4, &mut region).unwrap();
    for i in 0..100_000 {
        direct.update(i).unwrap();
    }
    println!("Direct estimate: {:.2}", direct.estimate());
    println!(
        "Images identical: {}",
        direct.serialize_updatable().unwrap() == updatable
    );

    // Unions merge across configurations
    let mut other = HllSketch::new(10, HllType::Hll8);
    for i in 50_000..150_000 {
        other.update(i);
    }

    let mut union = HllUnion::new(12);
    union.update(&sketch);
    union.update(&other);
    let merged = union.result(HllType::Hll8);
    println!(
        "\nUnion of 0..100k and 50k..150k: {:.2} (lg_config_k={})",
        merged.estimate(),
        merged.lg_config_k()
    );

    println!("\n{sketch}");
}
