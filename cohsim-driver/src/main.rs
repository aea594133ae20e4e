// Copyright (c) 2026 The cohsim authors. All rights reserved.

//! Drive a coherence simulation from a JSON configuration.

use std::path::PathBuf;

use clap::Parser;
use cohsim_core::cfgs::SocConfig;
use cohsim_core::protocol::ProtocolRegistry;
use cohsim_core::soc::SocTop;
use cohsim_engine::kernel::Kernel;
use cohsim_engine::sequencer::SimSequencer;
use cohsim_engine::types::SimError;
use cohsim_track::info;
use cohsim_track::tracker::{dev_null_tracker, stdout_tracker};

/// Command-line arguments.
#[derive(Parser)]
#[command(about = "Cache-coherence protocol simulator")]
struct Cli {
    /// SoC configuration (JSON).
    config: PathBuf,

    /// Enable logging to the console.
    #[arg(long, default_value = "false")]
    stdout: bool,

    /// Level of log message to display.
    #[arg(long, default_value = "Info")]
    stdout_level: log::Level,
}

fn main() -> Result<(), SimError> {
    let args = Cli::parse();

    let tracker = if args.stdout {
        stdout_tracker(args.stdout_level)
    } else {
        dev_null_tracker()
    };

    let cfg = SocConfig::from_file(&args.config)?;
    let registry = ProtocolRegistry::with_builtins();

    let kernel = Kernel::new(&tracker);
    let mut top = SocTop::new(&kernel, &registry, cfg)?;
    top.attach_sinks();

    let soc_entity = top.entity().clone();
    info!(soc_entity ; "elaboration complete");

    SimSequencer::new(&kernel).run(&top)?;
    top.check_end_state()?;

    let issue_n = top.stimulus().issue_n();
    let retire_n = top.stimulus().retire_n();
    println!(
        "pass: {} issued, {} retired, finished at t={}",
        issue_n,
        retire_n,
        kernel.time().time()
    );
    if let Some(stats) = top.stats() {
        println!(
            "loads: {} hit / {} miss; stores: {} hit / {} miss; invalidations: {}",
            stats.load_hit_n(),
            stats.load_miss_n(),
            stats.store_hit_n(),
            stats.store_miss_n(),
            stats.invalidate_n()
        );
    }

    tracker.shutdown();
    Ok(())
}
