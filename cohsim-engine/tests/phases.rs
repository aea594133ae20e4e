// Copyright (c) 2026 The cohsim authors. All rights reserved.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use cohsim_engine::kernel::Kernel;
use cohsim_engine::process::{Process, ProcessCtrl};
use cohsim_engine::sequencer::{SimSequencer, SimUnit};
use cohsim_engine::sim_error;
use cohsim_engine::test_helpers::start_test;
use cohsim_engine::types::SimResult;
use cohsim_track::entity::Entity;

struct PhaseRecorder {
    log: Rc<RefCell<Vec<&'static str>>>,
}

impl Process for PhaseRecorder {
    fn init(&mut self, pc: &mut ProcessCtrl) -> SimResult {
        self.log.borrow_mut().push("init");
        pc.wait_for(1);
        Ok(())
    }

    fn eval(&mut self, _pc: &mut ProcessCtrl) -> SimResult {
        self.log.borrow_mut().push("eval");
        Ok(())
    }

    fn fini(&mut self) {
        self.log.borrow_mut().push("fini");
    }
}

struct RecordingUnit {
    log: Rc<RefCell<Vec<&'static str>>>,
}

impl SimUnit for RecordingUnit {
    fn elab(&self) -> SimResult {
        self.log.borrow_mut().push("elab");
        Ok(())
    }

    fn drc(&self) -> SimResult {
        self.log.borrow_mut().push("drc");
        Ok(())
    }
}

fn add_process(kernel: &Kernel, name: &str, p: impl Process + 'static) {
    let entity = Arc::new(Entity::new(kernel.top(), name));
    kernel.add_process(&entity, 10, Rc::new(RefCell::new(p)));
}

#[test]
fn phases_run_in_order() {
    let kernel = start_test();
    let log = Rc::new(RefCell::new(Vec::new()));

    add_process(&kernel, "recorder", PhaseRecorder { log: log.clone() });

    let unit = RecordingUnit { log: log.clone() };
    SimSequencer::new(&kernel).run(&unit).unwrap();

    assert_eq!(*log.borrow(), vec!["elab", "drc", "init", "eval", "fini"]);
}

struct FailingUnit;

impl SimUnit for FailingUnit {
    fn drc(&self) -> SimResult {
        sim_error!("missing dependency wire")
    }
}

#[test]
fn drc_failure_stops_simulation() {
    let kernel = start_test();
    let log = Rc::new(RefCell::new(Vec::new()));
    add_process(&kernel, "recorder", PhaseRecorder { log: log.clone() });

    let result = SimSequencer::new(&kernel).run(&FailingUnit);
    assert!(result.is_err());
    // The process never ran.
    assert!(log.borrow().is_empty());
}

struct ErroringProcess {
    after: u64,
}

impl Process for ErroringProcess {
    fn init(&mut self, pc: &mut ProcessCtrl) -> SimResult {
        pc.wait_for(self.after);
        Ok(())
    }

    fn eval(&mut self, _pc: &mut ProcessCtrl) -> SimResult {
        sim_error!("protocol violation")
    }
}

#[test]
fn eval_error_terminates_run() {
    let kernel = start_test();
    add_process(&kernel, "bad", ErroringProcess { after: 7 });

    struct NullUnit;
    impl SimUnit for NullUnit {}
    let result = SimSequencer::new(&kernel).run(&NullUnit);
    assert!(result.is_err());
    assert_eq!(kernel.time().time(), 7);
}
