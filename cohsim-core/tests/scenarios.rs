// Copyright (c) 2026 The cohsim authors. All rights reserved.

//! The literal protocol scenarios: queue depths 3, epoch 10, 64-byte
//! lines.

mod common;

use cohsim_core::cfgs::{StimulusConfig, StimulusType};
use cohsim_core::msg::CpuOpcode;
use cohsim_core::testing::ConfigBuilder;

use common::{build_soc, run_to_exhaustion};

#[test]
fn cfg111_simple_read() {
    let cfg = ConfigBuilder::new()
        .set_dir_n(1)
        .set_cc_n(1)
        .set_cpu_n(1)
        .construct();
    let (kernel, top) = build_soc(cfg);

    // Stimulus: single load instruction to address zero.
    let stimulus = top.programmatic_stimulus().unwrap();
    stimulus.advance_cursor(200);
    stimulus.push_stimulus(0, CpuOpcode::Load, 0x0).unwrap();

    run_to_exhaustion(&kernel, &top);

    assert_eq!(top.stimulus().issue_n(), 1);
    assert_eq!(top.stimulus().issue_n(), top.stimulus().retire_n());

    // The sole reader is granted the line exclusive.
    assert_eq!(top.l1_line_state(0, 0, 0x0), Some("E"));
    assert_eq!(top.l2_line_state(0, 0x0), Some("E"));
    let line = top.dir_line(0, 0x0).unwrap();
    assert_eq!(line.owner, Some(top.cc_id(0)));
}

#[test]
fn cfg121_shared_read() {
    let cfg = ConfigBuilder::new()
        .set_dir_n(1)
        .set_cc_n(2)
        .set_cpu_n(1)
        .construct();
    let (kernel, top) = build_soc(cfg);

    // CPU 0 loads 0x0 at t=200; CPU 1 loads 0x0 at t=400.
    let stimulus = top.programmatic_stimulus().unwrap();
    stimulus.advance_cursor(200);
    stimulus.push_stimulus(0, CpuOpcode::Load, 0x0).unwrap();
    stimulus.advance_cursor(200);
    stimulus.push_stimulus(1, CpuOpcode::Load, 0x0).unwrap();

    run_to_exhaustion(&kernel, &top);

    assert_eq!(top.stimulus().retire_n(), 2);
    assert_eq!(top.l1_line_state(0, 0, 0x0), Some("S"));
    assert_eq!(top.l1_line_state(1, 0, 0x0), Some("S"));
    assert_eq!(top.l2_line_state(0, 0x0), Some("S"));
    assert_eq!(top.l2_line_state(1, 0x0), Some("S"));

    let line = top.dir_line(0, 0x0).unwrap();
    assert_eq!(line.owner, None);
    assert!(line.sharers.contains(&top.cc_id(0)));
    assert!(line.sharers.contains(&top.cc_id(1)));
}

#[test]
fn read_then_store_upgrade() {
    let cfg = ConfigBuilder::new().construct();
    let (kernel, top) = build_soc(cfg);

    let stimulus = top.programmatic_stimulus().unwrap();
    stimulus.advance_cursor(200);
    stimulus.push_stimulus(0, CpuOpcode::Load, 0x0).unwrap();
    stimulus.advance_cursor(200);
    stimulus.push_stimulus(0, CpuOpcode::Store, 0x0).unwrap();

    run_to_exhaustion(&kernel, &top);

    assert_eq!(top.stimulus().retire_n(), 2);
    // The store promoted the exclusive line without further traffic.
    assert_eq!(top.l1_line_state(0, 0, 0x0), Some("M"));
    assert_eq!(top.l2_line_state(0, 0x0), Some("M"));
}

#[test]
fn two_writer_invalidation() {
    let cfg = ConfigBuilder::new()
        .set_dir_n(1)
        .set_cc_n(2)
        .set_cpu_n(1)
        .construct();
    let (kernel, top) = build_soc(cfg);

    // CPU 0 stores 0x0 at t=200; CPU 1 stores 0x0 at t=400.
    let stimulus = top.programmatic_stimulus().unwrap();
    stimulus.advance_cursor(200);
    stimulus.push_stimulus(0, CpuOpcode::Store, 0x0).unwrap();
    stimulus.advance_cursor(200);
    stimulus.push_stimulus(1, CpuOpcode::Store, 0x0).unwrap();

    run_to_exhaustion(&kernel, &top);

    assert_eq!(top.stimulus().retire_n(), 2);
    assert_eq!(top.l1_line_state(1, 0, 0x0), Some("M"));
    // The first writer's copy is gone.
    assert_eq!(top.l1_line_state(0, 0, 0x0), None);
    let line = top.dir_line(0, 0x0).unwrap();
    assert_eq!(line.owner, Some(top.cc_id(1)));
}

#[test]
fn bad_cpu_id_is_rejected() {
    let cfg = ConfigBuilder::new().construct();
    let (_kernel, top) = build_soc(cfg);

    let stimulus = top.programmatic_stimulus().unwrap();
    stimulus.advance_cursor(200);
    assert!(stimulus.push_stimulus(1000, CpuOpcode::Load, 0x0).is_err());
}

#[test]
fn capacity_backpressure() {
    let cfg = ConfigBuilder::new().construct();
    let (kernel, top) = build_soc(cfg);

    // Loads to distinct lines as fast as possible; the CPU to L1 queue is
    // three deep, so the issue rate follows the L1 drain rate. Queue
    // boundedness is structural: any overflow fails the run.
    let stimulus = top.programmatic_stimulus().unwrap();
    let issue_n = 12u64;
    for i in 0..issue_n {
        stimulus
            .push_stimulus(0, CpuOpcode::Load, i * 0x40)
            .unwrap();
    }

    run_to_exhaustion(&kernel, &top);

    assert_eq!(top.stimulus().issue_n(), issue_n);
    assert_eq!(top.stimulus().retire_n(), issue_n);
    let stats = top.stats().unwrap();
    assert_eq!(stats.load_miss_n(), issue_n);
}

#[test]
fn dirty_intervention_keeps_owner() {
    let cfg = ConfigBuilder::new()
        .set_dir_n(1)
        .set_cc_n(2)
        .set_cpu_n(1)
        .construct();
    let (kernel, top) = build_soc(cfg);

    // CPU 0 dirties the line, then CPU 1 reads it: the dirty cluster
    // retains ownership and forwards the data.
    let stimulus = top.programmatic_stimulus().unwrap();
    stimulus.advance_cursor(200);
    stimulus.push_stimulus(0, CpuOpcode::Store, 0x0).unwrap();
    stimulus.advance_cursor(200);
    stimulus.push_stimulus(1, CpuOpcode::Load, 0x0).unwrap();

    run_to_exhaustion(&kernel, &top);

    assert_eq!(top.stimulus().retire_n(), 2);
    assert_eq!(top.l1_line_state(0, 0, 0x0), Some("S"));
    assert_eq!(top.l1_line_state(1, 0, 0x0), Some("S"));
    assert_eq!(top.l2_line_state(0, 0x0), Some("O"));
    assert_eq!(top.l2_line_state(1, 0x0), Some("S"));

    let line = top.dir_line(0, 0x0).unwrap();
    assert_eq!(top.dir_line_state(0, 0x0), Some("O"));
    assert_eq!(line.owner, Some(top.cc_id(0)));
    assert!(line.sharers.contains(&top.cc_id(1)));
}

#[test]
fn upgrade_after_sharing_invalidates_peer() {
    let cfg = ConfigBuilder::new()
        .set_dir_n(1)
        .set_cc_n(2)
        .set_cpu_n(1)
        .construct();
    let (kernel, top) = build_soc(cfg);

    // Share the line across both clusters, then CPU 1 writes it.
    let stimulus = top.programmatic_stimulus().unwrap();
    stimulus.advance_cursor(200);
    stimulus.push_stimulus(0, CpuOpcode::Store, 0x0).unwrap();
    stimulus.advance_cursor(200);
    stimulus.push_stimulus(1, CpuOpcode::Load, 0x0).unwrap();
    stimulus.advance_cursor(200);
    stimulus.push_stimulus(1, CpuOpcode::Store, 0x0).unwrap();

    run_to_exhaustion(&kernel, &top);

    assert_eq!(top.stimulus().retire_n(), 3);
    assert_eq!(top.l1_line_state(0, 0, 0x0), None);
    assert_eq!(top.l1_line_state(1, 0, 0x0), Some("M"));
    assert_eq!(top.l2_line_state(0, 0x0), None);
    assert_eq!(top.l2_line_state(1, 0x0), Some("M"));

    let line = top.dir_line(0, 0x0).unwrap();
    assert_eq!(line.owner, Some(top.cc_id(1)));
}

#[test]
fn cluster_local_sharing() {
    let cfg = ConfigBuilder::new()
        .set_dir_n(1)
        .set_cc_n(1)
        .set_cpu_n(2)
        .construct();
    let (kernel, top) = build_soc(cfg);

    // Two CPUs under one L2: the second read is served locally and the
    // second write upgrades through CleanUnique without any peer cluster.
    let stimulus = top.programmatic_stimulus().unwrap();
    stimulus.advance_cursor(200);
    stimulus.push_stimulus(0, CpuOpcode::Load, 0x0).unwrap();
    stimulus.advance_cursor(200);
    stimulus.push_stimulus(1, CpuOpcode::Load, 0x0).unwrap();
    stimulus.advance_cursor(200);
    stimulus.push_stimulus(1, CpuOpcode::Store, 0x0).unwrap();

    run_to_exhaustion(&kernel, &top);

    assert_eq!(top.stimulus().retire_n(), 3);
    assert_eq!(top.l1_line_state(0, 0, 0x0), None);
    assert_eq!(top.l1_line_state(0, 1, 0x0), Some("M"));
    assert_eq!(top.l2_line_state(0, 0x0), Some("M"));
}

#[test]
fn trace_stimulus_drives_cpus() {
    use std::io::Write;

    let trace = "\
# time cpu opcode addr
200 0 LD 0x0
400 1 LD 0x0
600 1 ST 0x0
";
    let mut path = std::env::temp_dir();
    path.push(format!("cohsim_trace_{}.txt", std::process::id()));
    std::fs::File::create(&path)
        .unwrap()
        .write_all(trace.as_bytes())
        .unwrap();

    let cfg = ConfigBuilder::new()
        .set_dir_n(1)
        .set_cc_n(2)
        .set_cpu_n(1)
        .set_stimulus(StimulusConfig {
            stype: StimulusType::Trace,
            filename: Some(path.to_string_lossy().into_owned()),
        })
        .construct();
    let (kernel, top) = build_soc(cfg);

    run_to_exhaustion(&kernel, &top);
    std::fs::remove_file(&path).ok();

    assert_eq!(top.stimulus().issue_n(), 3);
    assert_eq!(top.stimulus().retire_n(), 3);
    assert_eq!(top.l1_line_state(1, 0, 0x0), Some("M"));
}

#[test]
fn monitor_observes_transaction_lifecycle() {
    use cohsim_core::testing::{Record, RecordingMonitor};

    let cfg = ConfigBuilder::new().construct();
    let (kernel, top) = build_soc(cfg);
    let monitor = RecordingMonitor::new();
    top.register_monitor(monitor.clone());

    let stimulus = top.programmatic_stimulus().unwrap();
    stimulus.advance_cursor(200);
    stimulus.push_stimulus(0, CpuOpcode::Load, 0x0).unwrap();

    run_to_exhaustion(&kernel, &top);

    assert_eq!(monitor.count(|r| matches!(r, Record::Start(..))), 1);
    assert_eq!(monitor.count(|r| matches!(r, Record::End(..))), 1);
    // The response strictly follows the request in virtual time.
    let records = monitor.records();
    let start_at = records.iter().find_map(|r| match r {
        Record::Start(_, _, at) => Some(*at),
        _ => None,
    });
    let end_at = records.iter().find_map(|r| match r {
        Record::End(_, _, at) => Some(*at),
        _ => None,
    });
    assert!(end_at.unwrap() > start_at.unwrap());
    assert_eq!(start_at.unwrap(), 200);
}
