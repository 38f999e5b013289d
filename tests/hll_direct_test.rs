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
use hll_sketch::error::ErrorKind;
use hll_sketch::hll::DirectHllSketch;
use hll_sketch::hll::HllSketch;
use hll_sketch::hll::HllType;
use hll_sketch::hll::max_updatable_serialization_bytes;

fn region_for(lg_config_k: u8, tgt: HllType) -> Vec<u8> {
    vec![0u8; max_updatable_serialization_bytes(lg_config_k, tgt)]
}

/// Heap and direct sketches fed the same stream must hold bit-identical
/// updatable images at every stage of the mode walk.
#[test]
fn test_heap_and_direct_images_are_bit_identical() {
    for tgt in [HllType::Hll4, HllType::Hll6, HllType::Hll8] {
        let lg_config_k = 8;
        let mut region = region_for(lg_config_k, tgt);
        let mut direct = DirectHllSketch::new_in(lg_config_k, tgt, &mut region).unwrap();
        let mut heap = HllSketch::new(lg_config_k, tgt);

        // Checkpoints cover list, set, promotion, and deep HLL updates
        let checkpoints = [0usize, 3, 8, 9, 100, 192, 193, 2_000, 20_000];
        let mut next = 0usize;
        for &checkpoint in &checkpoints {
            for i in next..checkpoint {
                heap.update(i);
                direct.update(i).unwrap();
            }
            next = checkpoint;
            assert_eq!(
                heap.serialize_updatable(),
                direct.serialize_updatable().unwrap(),
                "images diverged at {checkpoint} updates ({tgt:?})"
            );
            assert_eq!(heap.estimate(), direct.estimate());
        }
    }
}

#[test]
fn test_direct_estimates_match_heap() {
    let lg_config_k = 11;
    let mut region = region_for(lg_config_k, HllType::Hll6);
    let mut direct = DirectHllSketch::new_in(lg_config_k, HllType::Hll6, &mut region).unwrap();
    let mut heap = HllSketch::new(lg_config_k, HllType::Hll6);

    for i in 0..50_000u64 {
        heap.update(i);
        direct.update(i).unwrap();
    }

    assert_eq!(direct.estimate(), heap.estimate());
    assert_eq!(direct.composite_estimate(), heap.composite_estimate());
    for n in [NumStdDev::One, NumStdDev::Two, NumStdDev::Three] {
        assert_eq!(direct.lower_bound(n), heap.lower_bound(n));
        assert_eq!(direct.upper_bound(n), heap.upper_bound(n));
    }
}

#[test]
fn test_heapify_from_direct_image() {
    let mut region = region_for(10, HllType::Hll8);
    let mut direct = DirectHllSketch::new_in(10, HllType::Hll8, &mut region).unwrap();
    for i in 0..10_000u64 {
        direct.update(i).unwrap();
    }

    let heapified = direct.to_sketch().unwrap();
    assert_eq!(heapified.estimate(), direct.estimate());
    assert_eq!(heapified.lg_config_k(), 10);
    assert_eq!(heapified.target_type(), HllType::Hll8);
}

#[test]
fn test_wrap_heap_updatable_image_and_continue() {
    let mut heap = HllSketch::new(10, HllType::Hll8);
    for i in 0..1_000u64 {
        heap.update(i);
    }

    // Grow the serialized image into a full-size working region
    let image = heap.serialize_updatable();
    let mut region = region_for(10, HllType::Hll8);
    region[..image.len()].copy_from_slice(&image);

    let mut direct = DirectHllSketch::wrap(&mut region).unwrap();
    for i in 1_000..2_000u64 {
        heap.update(i);
        direct.update(i).unwrap();
    }
    assert_eq!(
        heap.serialize_updatable(),
        direct.serialize_updatable().unwrap()
    );
}

#[test]
fn test_read_only_wrap_queries_both_forms() {
    let mut heap = HllSketch::new(9, HllType::Hll4);
    for i in 0..20_000u64 {
        heap.update(i);
    }

    let compact = heap.serialize();
    let view = DirectHllSketch::wrap_read_only(&compact).unwrap();
    assert_eq!(view.estimate(), heap.estimate());
    assert_eq!(view.lower_bound(NumStdDev::Two), heap.lower_bound(NumStdDev::Two));

    let updatable = heap.serialize_updatable();
    let view = DirectHllSketch::wrap_read_only(&updatable).unwrap();
    assert_eq!(view.estimate(), heap.estimate());
    assert_eq!(view.upper_bound(NumStdDev::Two), heap.upper_bound(NumStdDev::Two));
}

#[test]
fn test_read_only_wrap_rejects_all_mutation() {
    let mut heap = HllSketch::new(8, HllType::Hll8);
    heap.update("x");
    let bytes = heap.serialize_updatable();

    let mut view = DirectHllSketch::wrap_read_only(&bytes).unwrap();
    assert_eq!(view.update("y").unwrap_err().kind(), ErrorKind::ReadOnlyViolation);
    assert_eq!(view.reset().unwrap_err().kind(), ErrorKind::ReadOnlyViolation);
    // The image is untouched
    assert_eq!(view.estimate(), 1.0);
}

#[test]
fn test_capacity_validation() {
    let required = max_updatable_serialization_bytes(10, HllType::Hll8);
    let mut region = vec![0u8; required - 1];
    let err = DirectHllSketch::new_in(10, HllType::Hll8, &mut region).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InsufficientCapacity);

    let mut region = vec![0u8; required];
    assert!(DirectHllSketch::new_in(10, HllType::Hll8, &mut region).is_ok());
}

#[test]
fn test_direct_survives_serialize_deserialize_cycle() {
    let mut region = region_for(6, HllType::Hll4);
    let mut direct = DirectHllSketch::new_in(6, HllType::Hll4, &mut region).unwrap();
    for i in 0..5_000u64 {
        direct.update(i).unwrap();
    }

    let compact = direct.serialize().unwrap();
    let restored = HllSketch::deserialize(&compact).unwrap();
    assert_eq!(restored.composite_estimate(), direct.composite_estimate());
    assert_eq!(restored.serialize(), compact);
}

#[test]
fn test_sketch_not_outliving_buffer_is_enforced_by_borrow() {
    // Compile-time property; the pattern here is the supported usage:
    // the region outlives the sketch, and dropping the sketch releases it.
    let mut region = region_for(4, HllType::Hll8);
    {
        let mut sketch = DirectHllSketch::new_in(4, HllType::Hll8, &mut region).unwrap();
        sketch.update(1u64).unwrap();
    }
    // Region accessible again after the sketch is gone
    assert_eq!(region[3], 4);
}
