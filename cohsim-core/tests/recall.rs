// Copyright (c) 2026 The cohsim authors. All rights reserved.

//! Directory-initiated eviction (recall) scenarios, driven by a one-line
//! directory tag store.

mod common;

use cohsim_core::cfgs::CacheModelConfig;
use cohsim_core::msg::CpuOpcode;
use cohsim_core::testing::ConfigBuilder;

use common::{build_soc, run_to_exhaustion};

fn tiny_dir_config() -> cohsim_core::cfgs::SocConfig {
    ConfigBuilder::new()
        .set_dir_n(1)
        .set_cc_n(1)
        .set_cpu_n(1)
        .set_dir_geometry(CacheModelConfig {
            sets_n: 1,
            ways_n: 1,
            line_bytes_n: 64,
        })
        .construct()
}

#[test]
fn clean_recall_invalidates_holder() {
    let (kernel, top) = build_soc(tiny_dir_config());

    // The second load maps to the only directory way, recalling the
    // first line from its (clean) holder.
    let stimulus = top.programmatic_stimulus().unwrap();
    stimulus.advance_cursor(200);
    stimulus.push_stimulus(0, CpuOpcode::Load, 0x0).unwrap();
    stimulus.advance_cursor(400);
    stimulus.push_stimulus(0, CpuOpcode::Load, 0x1000).unwrap();

    run_to_exhaustion(&kernel, &top);

    assert_eq!(top.stimulus().retire_n(), 2);
    // The recalled line is gone everywhere.
    assert_eq!(top.l1_line_state(0, 0, 0x0), None);
    assert_eq!(top.l2_line_state(0, 0x0), None);
    assert!(top.dir_line(0, 0x0).is_none());
    // The displacing line took the way.
    assert_eq!(top.l1_line_state(0, 0, 0x1000), Some("E"));
    assert_eq!(top.dir_line_state(0, 0x1000), Some("E"));
}

#[test]
fn dirty_recall_writes_back_through_llc() {
    let (kernel, top) = build_soc(tiny_dir_config());

    // Dirty the first line so the recall must write back to memory.
    let stimulus = top.programmatic_stimulus().unwrap();
    stimulus.advance_cursor(200);
    stimulus.push_stimulus(0, CpuOpcode::Store, 0x0).unwrap();
    stimulus.advance_cursor(400);
    stimulus.push_stimulus(0, CpuOpcode::Load, 0x1000).unwrap();

    run_to_exhaustion(&kernel, &top);

    assert_eq!(top.stimulus().retire_n(), 2);
    assert_eq!(top.l1_line_state(0, 0, 0x0), None);
    assert_eq!(top.l2_line_state(0, 0x0), None);
    assert!(top.dir_line(0, 0x0).is_none());
    assert_eq!(top.l1_line_state(0, 0, 0x1000), Some("E"));
}

#[test]
fn recall_round_trip_line_returns() {
    let (kernel, top) = build_soc(tiny_dir_config());

    // 0x0 is recalled by 0x1000, then fetched again.
    let stimulus = top.programmatic_stimulus().unwrap();
    stimulus.advance_cursor(200);
    stimulus.push_stimulus(0, CpuOpcode::Store, 0x0).unwrap();
    stimulus.advance_cursor(400);
    stimulus.push_stimulus(0, CpuOpcode::Load, 0x1000).unwrap();
    stimulus.advance_cursor(400);
    stimulus.push_stimulus(0, CpuOpcode::Load, 0x0).unwrap();

    run_to_exhaustion(&kernel, &top);

    assert_eq!(top.stimulus().retire_n(), 3);
    assert_eq!(top.l1_line_state(0, 0, 0x0), Some("E"));
    assert!(top.dir_line(0, 0x1000).is_none());
    assert_eq!(top.dir_line_state(0, 0x0), Some("E"));
}
