// Copyright (c) 2026 The cohsim authors. All rights reserved.

//! Helpers for engine and component tests.

use cohsim_track::tracker::dev_null_tracker;

use crate::kernel::Kernel;

/// Create a kernel with a discarding tracker for use in tests.
#[must_use]
pub fn start_test() -> Kernel {
    Kernel::new(&dev_null_tracker())
}
