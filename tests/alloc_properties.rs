/*
 * RexFS - Realtime Extent File System
 * Copyright 2025 RexFS Contributors
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 *     http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

//! Randomized allocate/free sequences checked against the allocator's
//! invariants: the free counter matches the bitmap population count,
//! the summary matrix matches the maximal free runs, tail padding
//! stays clear, aligned requests return aligned lengths, and freeing
//! everything restores the pristine single-run state.

use proptest::prelude::*;
use rexfs::{RtAllocRequest, RtMount, RtMountConfig, UserContext};

const REGION: u64 = 1024;

fn grown() -> RtMount {
    let mount = RtMount::mount(RtMountConfig {
        rtdev_blocks: Some(REGION),
        ..RtMountConfig::default()
    })
    .unwrap();
    mount.grow_rt(&UserContext::root(), REGION, 1).unwrap();
    mount
}

#[derive(Debug, Clone)]
enum Op {
    Alloc {
        hint: Option<u64>,
        min_units: u64,
        extra_units: u64,
        prod: u64,
    },
    Free {
        idx: usize,
    },
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (
            proptest::option::of(0u64..REGION),
            1u64..8,
            0u64..8,
            prop_oneof![Just(1u64), Just(2u64), Just(8u64)],
        )
            .prop_map(|(hint, min_units, extra_units, prod)| Op::Alloc {
                hint,
                min_units,
                extra_units,
                prod,
            }),
        1 => any::<usize>().prop_map(|idx| Op::Free { idx }),
    ]
}

proptest! {
    #[test]
    fn test_invariants_hold_across_random_sequences(
        ops in proptest::collection::vec(op_strategy(), 1..50)
    ) {
        let mount = grown();
        let mut live: Vec<(u64, u64)> = Vec::new();

        for op in ops {
            match op {
                Op::Alloc { hint, min_units, extra_units, prod } => {
                    let minlen = min_units * prod;
                    let maxlen = minlen + extra_units * prod;
                    let mut req = RtAllocRequest::new(minlen, maxlen).with_prod(prod);
                    if let Some(hint) = hint {
                        req = req.with_hint(hint);
                    }
                    let mut tx = mount.trans_begin();
                    let got = tx.allocate(&req).unwrap();
                    tx.commit().unwrap();

                    if let Some(got) = got {
                        prop_assert!(got.len >= minlen && got.len <= maxlen);
                        prop_assert_eq!(got.len % prod, 0);
                        prop_assert!(got.bno + got.len <= REGION);
                        for &(bno, len) in &live {
                            prop_assert!(
                                got.bno + got.len <= bno || bno + len <= got.bno,
                                "allocation overlaps a live extent"
                            );
                        }
                        live.push((got.bno, got.len));
                    }
                }
                Op::Free { idx } => {
                    if !live.is_empty() {
                        let (bno, len) = live.swap_remove(idx % live.len());
                        let mut tx = mount.trans_begin();
                        tx.free_extent(bno, len).unwrap();
                        tx.commit().unwrap();
                    }
                }
            }
            mount.check_consistency().unwrap();
        }

        for (bno, len) in live {
            let mut tx = mount.trans_begin();
            tx.free_extent(bno, len).unwrap();
            tx.commit().unwrap();
        }
        mount.check_consistency().unwrap();
        prop_assert_eq!(mount.frextents(), REGION);
        prop_assert_eq!(mount.summary_count(10, 0).unwrap(), 1);
    }

    #[test]
    fn test_reinit_matches_running_counter(
        lens in proptest::collection::vec(1u64..32, 1..20)
    ) {
        let mount = grown();
        for len in lens {
            let mut tx = mount.trans_begin();
            tx.allocate(&RtAllocRequest::new(len, len)).unwrap();
            tx.commit().unwrap();
        }
        let running = mount.frextents();
        mount.reinit_frextents().unwrap();
        prop_assert_eq!(mount.frextents(), running);
        mount.check_consistency().unwrap();
    }
}
