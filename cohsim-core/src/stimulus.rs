// Copyright (c) 2026 The cohsim authors. All rights reserved.

//! Stimulus streams.
//!
//! A stimulus yields a totally ordered sequence of `(time, cpu, opcode,
//! addr)` tuples, partitioned into a per-CPU [`StimulusContext`] that the
//! CPU model drains. Two variants exist: transactions pushed
//! programmatically before the simulation starts, and a text trace read
//! from a file with one whitespace-separated tuple per line:
//!
//! ```text
//! # time cpu opcode addr
//! 200 0 LD 0x0
//! 400 1 ST 0x1000
//! ```

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::io::BufRead;
use std::path::Path;
use std::rc::Rc;

use cohsim_engine::sim_error;
use cohsim_engine::types::{SimError, SimResult};

use crate::cfgs::{StimulusConfig, StimulusType};
use crate::msg::CpuOpcode;
use crate::types::Addr;

/// One stimulus command.
#[derive(Clone, Copy, Debug)]
pub struct Command {
    /// Issuing CPU.
    pub cpu_id: usize,
    /// Load or store.
    pub opcode: CpuOpcode,
    /// Target address.
    pub addr: Addr,
}

/// A command with its issue time.
#[derive(Clone, Copy, Debug)]
pub struct Frontier {
    /// Earliest tick at which the command may issue.
    pub time: u64,
    /// The command itself.
    pub cmd: Command,
}

/// Per-CPU view onto the stimulus stream, with issue/retire accounting.
#[derive(Default)]
pub struct StimulusContext {
    cs: RefCell<VecDeque<Frontier>>,
    issue_n: Cell<u64>,
    retire_n: Cell<u64>,
}

impl StimulusContext {
    /// The head command, if any.
    #[must_use]
    pub fn front(&self) -> Option<Frontier> {
        self.cs.borrow().front().copied()
    }

    /// Consume the head command.
    pub fn consume(&self) {
        self.cs.borrow_mut().pop_front();
    }

    /// True when no commands remain.
    #[must_use]
    pub fn done(&self) -> bool {
        self.cs.borrow().is_empty()
    }

    /// Record an issue.
    pub fn note_issue(&self) {
        self.issue_n.set(self.issue_n.get() + 1);
    }

    /// Record a retirement.
    pub fn note_retire(&self) {
        self.retire_n.set(self.retire_n.get() + 1);
    }

    /// Number of commands issued.
    #[must_use]
    pub fn issue_n(&self) -> u64 {
        self.issue_n.get()
    }

    /// Number of transactions retired.
    #[must_use]
    pub fn retire_n(&self) -> u64 {
        self.retire_n.get()
    }

    fn push_back(&self, f: Frontier) {
        self.cs.borrow_mut().push_back(f);
    }
}

/// Elementary realization of a transaction source. Transactions are
/// programmatically constructed and issued to the source before the start
/// of the simulation; upon exhaustion the source remains exhausted for the
/// duration of the simulation.
pub struct ProgrammaticStimulus {
    cursor: Cell<u64>,
    contexts: Vec<Rc<StimulusContext>>,
}

impl ProgrammaticStimulus {
    /// Create a stimulus for `cpu_n` CPUs.
    #[must_use]
    pub fn new(cpu_n: usize) -> Rc<Self> {
        Rc::new(Self {
            cursor: Cell::new(0),
            contexts: (0..cpu_n).map(|_| Rc::new(StimulusContext::default())).collect(),
        })
    }

    /// Advance the issue cursor by `dt` ticks.
    pub fn advance_cursor(&self, dt: u64) {
        self.cursor.set(self.cursor.get() + dt);
    }

    /// Push a command issuing at the current cursor time.
    ///
    /// Fails when `cpu_id` does not name a configured CPU.
    pub fn push_stimulus(&self, cpu_id: usize, opcode: CpuOpcode, addr: Addr) -> SimResult {
        let Some(context) = self.contexts.get(cpu_id) else {
            sim_error!(
                "stimulus: cpu id {} is invalid ({} cpus configured)",
                cpu_id,
                self.contexts.len()
            );
        };
        context.push_back(Frontier {
            time: self.cursor.get(),
            cmd: Command {
                cpu_id,
                opcode,
                addr,
            },
        });
        Ok(())
    }
}

/// Trace-file stimulus: the same tuples read from a text file.
pub struct TraceStimulus {
    contexts: Vec<Rc<StimulusContext>>,
}

impl TraceStimulus {
    /// Parse a trace from a reader.
    pub fn from_reader(cpu_n: usize, reader: impl BufRead) -> Result<Rc<Self>, SimError> {
        let contexts: Vec<Rc<StimulusContext>> =
            (0..cpu_n).map(|_| Rc::new(StimulusContext::default())).collect();
        let mut last_time = 0u64;
        for (line_no, line) in reader.lines().enumerate() {
            let line = line.map_err(|e| SimError(format!("stimulus: read failed: {e}")))?;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() != 4 {
                sim_error!("stimulus: line {}: expected 4 fields", line_no + 1);
            }
            let time: u64 = fields[0]
                .parse()
                .map_err(|_| SimError(format!("stimulus: line {}: bad time", line_no + 1)))?;
            if time < last_time {
                sim_error!("stimulus: line {}: time goes backwards", line_no + 1);
            }
            last_time = time;
            let cpu_id: usize = fields[1]
                .parse()
                .map_err(|_| SimError(format!("stimulus: line {}: bad cpu id", line_no + 1)))?;
            let Some(context) = contexts.get(cpu_id) else {
                sim_error!(
                    "stimulus: line {}: cpu id {} is invalid ({} cpus configured)",
                    line_no + 1,
                    cpu_id,
                    cpu_n
                );
            };
            let opcode = match fields[2] {
                "LD" => CpuOpcode::Load,
                "ST" => CpuOpcode::Store,
                other => {
                    sim_error!("stimulus: line {}: unknown opcode '{}'", line_no + 1, other);
                }
            };
            let addr = parse_addr(fields[3])
                .ok_or_else(|| SimError(format!("stimulus: line {}: bad addr", line_no + 1)))?;
            context.push_back(Frontier {
                time,
                cmd: Command {
                    cpu_id,
                    opcode,
                    addr,
                },
            });
        }
        Ok(Rc::new(Self { contexts }))
    }

    /// Parse a trace file.
    pub fn from_file(cpu_n: usize, path: &Path) -> Result<Rc<Self>, SimError> {
        let file = std::fs::File::open(path)
            .map_err(|e| SimError(format!("stimulus: unable to open {}: {e}", path.display())))?;
        Self::from_reader(cpu_n, std::io::BufReader::new(file))
    }
}

fn parse_addr(s: &str) -> Option<Addr> {
    if let Some(hex) = s.strip_prefix("0x") {
        Addr::from_str_radix(hex, 16).ok()
    } else {
        s.parse().ok()
    }
}

/// The stimulus variants the SoC can be driven from.
pub enum Stimulus {
    /// Commands pushed programmatically before the run.
    Programmatic(Rc<ProgrammaticStimulus>),
    /// Commands read from a trace file.
    Trace(Rc<TraceStimulus>),
}

impl Stimulus {
    /// Build the stimulus described by the configuration.
    pub fn build(config: &StimulusConfig, cpu_n: usize) -> Result<Self, SimError> {
        match config.stype {
            StimulusType::Programmatic => Ok(Self::Programmatic(ProgrammaticStimulus::new(cpu_n))),
            StimulusType::Trace => {
                let Some(filename) = &config.filename else {
                    sim_error!("stimulus: trace type requires a filename");
                };
                Ok(Self::Trace(TraceStimulus::from_file(
                    cpu_n,
                    Path::new(filename),
                )?))
            }
        }
    }

    /// The per-CPU context at `cpu_id`.
    #[must_use]
    pub fn context(&self, cpu_id: usize) -> Rc<StimulusContext> {
        match self {
            Self::Programmatic(s) => s.contexts[cpu_id].clone(),
            Self::Trace(s) => s.contexts[cpu_id].clone(),
        }
    }

    /// The programmatic stimulus, when configured.
    #[must_use]
    pub fn programmatic(&self) -> Option<Rc<ProgrammaticStimulus>> {
        match self {
            Self::Programmatic(s) => Some(s.clone()),
            Self::Trace(_) => None,
        }
    }

    fn contexts(&self) -> &[Rc<StimulusContext>] {
        match self {
            Self::Programmatic(s) => &s.contexts,
            Self::Trace(s) => &s.contexts,
        }
    }

    /// Total commands issued across all CPUs.
    #[must_use]
    pub fn issue_n(&self) -> u64 {
        self.contexts().iter().map(|c| c.issue_n()).sum()
    }

    /// Total transactions retired across all CPUs.
    #[must_use]
    pub fn retire_n(&self) -> u64 {
        self.contexts().iter().map(|c| c.retire_n()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn programmatic_orders_by_cursor() {
        let s = ProgrammaticStimulus::new(2);
        s.advance_cursor(200);
        s.push_stimulus(0, CpuOpcode::Load, 0x0).unwrap();
        s.advance_cursor(200);
        s.push_stimulus(1, CpuOpcode::Store, 0x40).unwrap();

        let c0 = &s.contexts[0];
        let f = c0.front().unwrap();
        assert_eq!(f.time, 200);
        assert_eq!(f.cmd.cpu_id, 0);

        let c1 = &s.contexts[1];
        let f = c1.front().unwrap();
        assert_eq!(f.time, 400);
        assert!(matches!(f.cmd.opcode, CpuOpcode::Store));
    }

    #[test]
    fn bad_cpu_id_is_configuration_error() {
        let s = ProgrammaticStimulus::new(1);
        s.advance_cursor(200);
        assert!(s.push_stimulus(1000, CpuOpcode::Load, 0x0).is_err());
    }

    #[test]
    fn trace_parse() {
        let text = "\
# comment line
200 0 LD 0x0
400 1 ST 0x1000
";
        let s = TraceStimulus::from_reader(2, text.as_bytes()).unwrap();
        let f = s.contexts[0].front().unwrap();
        assert_eq!(f.time, 200);
        assert_eq!(f.cmd.addr, 0x0);
        let f = s.contexts[1].front().unwrap();
        assert_eq!(f.cmd.addr, 0x1000);
        assert!(matches!(f.cmd.opcode, CpuOpcode::Store));
    }

    #[test]
    fn trace_rejects_time_regression() {
        let text = "400 0 LD 0x0\n200 0 LD 0x40\n";
        assert!(TraceStimulus::from_reader(1, text.as_bytes()).is_err());
    }

    #[test]
    fn trace_rejects_bad_cpu() {
        let text = "200 9 LD 0x0\n";
        assert!(TraceStimulus::from_reader(1, text.as_bytes()).is_err());
    }
}
