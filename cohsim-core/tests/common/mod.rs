// Copyright (c) 2026 The cohsim authors. All rights reserved.

use cohsim_core::cfgs::SocConfig;
use cohsim_core::protocol::ProtocolRegistry;
use cohsim_core::soc::SocTop;
use cohsim_engine::kernel::Kernel;
use cohsim_engine::sequencer::SimSequencer;
use cohsim_track::tracker::dev_null_tracker;

/// Build an elaborated SoC over a fresh kernel.
pub fn build_soc(cfg: SocConfig) -> (Kernel, SocTop) {
    let kernel = Kernel::new(&dev_null_tracker());
    let registry = ProtocolRegistry::with_builtins();
    let mut top = SocTop::new(&kernel, &registry, cfg).expect("elaboration should succeed");
    top.attach_sinks();
    (kernel, top)
}

/// Run to exhaustion and check the end-of-simulation contract.
pub fn run_to_exhaustion(kernel: &Kernel, top: &SocTop) {
    SimSequencer::new(kernel)
        .run(top)
        .expect("simulation should run to completion");
    top.check_end_state().expect("end-of-sim state should be clean");
}
