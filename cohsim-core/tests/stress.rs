// Copyright (c) 2026 The cohsim authors. All rights reserved.

//! Randomised cross-cluster traffic checking the global invariants:
//! retirement, table cleanliness, credit conservation (all enforced by
//! `check_end_state`), single writer and write-through inclusion.

mod common;

use cohsim_core::msg::CpuOpcode;
use cohsim_core::soc::SocTop;
use cohsim_core::testing::ConfigBuilder;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use common::{build_soc, run_to_exhaustion};

const LINES: [u64; 4] = [0x0, 0x40, 0x80, 0x1000];

fn check_invariants(top: &SocTop, cluster_n: usize) {
    for addr in LINES {
        // Single writer: at most one L1 in the whole system holds the
        // line writeable, and no two L2s hold it writeable.
        let mut l1_writers = 0;
        let mut l2_writers = 0;
        for ci in 0..cluster_n {
            let cluster = &top.clusters()[ci];
            for l1 in &cluster.l1s {
                if l1.is_writeable(addr) {
                    l1_writers += 1;
                    // Inclusion: a writeable L1 line implies a writeable
                    // line at its L2.
                    assert!(
                        cluster.l2.is_writeable(addr),
                        "L1 writeable without writeable L2 for {addr:#x}"
                    );
                }
                if l1.is_readable(addr) {
                    assert!(
                        cluster.l2.is_readable(addr),
                        "L1 readable without readable L2 for {addr:#x}"
                    );
                }
            }
            if cluster.l2.is_writeable(addr) {
                l2_writers += 1;
            }
        }
        assert!(l1_writers <= 1, "{l1_writers} L1 writers for {addr:#x}");
        assert!(l2_writers <= 1, "{l2_writers} L2 writers for {addr:#x}");
    }
}

#[test]
fn random_traffic_two_clusters() {
    let cfg = ConfigBuilder::new()
        .set_dir_n(1)
        .set_cc_n(2)
        .set_cpu_n(1)
        .construct();
    let (kernel, top) = build_soc(cfg);

    let mut rng = StdRng::seed_from_u64(0xc0c0);
    let stimulus = top.programmatic_stimulus().unwrap();
    let mut issued = 0u64;
    for _ in 0..48 {
        stimulus.advance_cursor(rng.gen_range(0..64));
        let cpu = rng.gen_range(0..2);
        let opcode = if rng.gen_bool(0.5) {
            CpuOpcode::Load
        } else {
            CpuOpcode::Store
        };
        let addr = LINES[rng.gen_range(0..LINES.len())];
        stimulus.push_stimulus(cpu, opcode, addr).unwrap();
        issued += 1;
    }

    run_to_exhaustion(&kernel, &top);

    assert_eq!(top.stimulus().issue_n(), issued);
    assert_eq!(top.stimulus().retire_n(), issued);
    check_invariants(&top, 2);
}

#[test]
fn random_traffic_multi_cpu_clusters() {
    let cfg = ConfigBuilder::new()
        .set_dir_n(2)
        .set_cc_n(2)
        .set_cpu_n(2)
        .construct();
    let (kernel, top) = build_soc(cfg);

    let mut rng = StdRng::seed_from_u64(7);
    let stimulus = top.programmatic_stimulus().unwrap();
    let mut issued = 0u64;
    for _ in 0..64 {
        stimulus.advance_cursor(rng.gen_range(0..48));
        let cpu = rng.gen_range(0..4);
        let opcode = if rng.gen_bool(0.4) {
            CpuOpcode::Store
        } else {
            CpuOpcode::Load
        };
        let addr = LINES[rng.gen_range(0..LINES.len())];
        stimulus.push_stimulus(cpu, opcode, addr).unwrap();
        issued += 1;
    }

    run_to_exhaustion(&kernel, &top);

    assert_eq!(top.stimulus().retire_n(), issued);
    check_invariants(&top, 2);
}
