// Copyright (c) 2026 The cohsim authors. All rights reserved.

//! The simulation phase sequencer.
//!
//! Drives the standard phases in order: elaborate, design-rule check,
//! init, run, fini. Elaboration binds cross-references between units;
//! the design-rule check validates that every required wire is present
//! before any process runs.

use crate::kernel::Kernel;
use crate::types::SimResult;

/// A unit of the design hierarchy that participates in the elaboration and
/// design-rule-check phases.
pub trait SimUnit {
    /// Elaboration phase: bind queues, arbiters and cross-references.
    fn elab(&self) -> SimResult {
        Ok(())
    }

    /// Design-rule check: fatal if a required dependency is missing.
    fn drc(&self) -> SimResult {
        Ok(())
    }
}

/// Drives a [`SimUnit`] through the simulation phases.
pub struct SimSequencer<'k> {
    kernel: &'k Kernel,
}

impl<'k> SimSequencer<'k> {
    /// Create a sequencer over the given kernel.
    #[must_use]
    pub fn new(kernel: &'k Kernel) -> Self {
        Self { kernel }
    }

    /// Run all phases: elaborate, drc, init, run, fini.
    pub fn run(&self, unit: &dyn SimUnit) -> SimResult {
        unit.elab()?;
        unit.drc()?;
        self.kernel.init()?;
        let result = self.kernel.run();
        self.kernel.fini();
        result
    }
}
