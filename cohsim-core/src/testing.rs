// Copyright (c) 2026 The cohsim authors. All rights reserved.

//! Helpers for building test configurations and observing the model.

use std::cell::RefCell;
use std::rc::Rc;

use crate::cfgs::{
    CCAgentConfig, CacheModelConfig, CpuClusterConfig, CpuConfig, DirAgentConfig,
    L1CacheAgentConfig, L2CacheAgentConfig, LLCAgentConfig, MemModelConfig, NocModelConfig,
    SocConfig, StimulusConfig, StimulusType,
};
use crate::monitor::{L1CacheEvent, Monitor};
use crate::types::{Addr, AgentId, TransactionId};

/// Builds small SoC configurations for tests: `dir_n` home nodes and
/// `cc_n` clusters of `cpu_n` CPUs each.
pub struct ConfigBuilder {
    dir_n: usize,
    cc_n: usize,
    cpu_n: usize,
    stimulus: StimulusConfig,
    cconfig: CacheModelConfig,
    dir_cconfig: CacheModelConfig,
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigBuilder {
    /// A single-directory, single-cluster, single-CPU configuration with
    /// programmatic stimulus.
    #[must_use]
    pub fn new() -> Self {
        Self {
            dir_n: 1,
            cc_n: 1,
            cpu_n: 1,
            stimulus: StimulusConfig {
                stype: StimulusType::Programmatic,
                filename: None,
            },
            cconfig: CacheModelConfig::default(),
            dir_cconfig: CacheModelConfig::default(),
        }
    }

    /// Set the number of home nodes.
    #[must_use]
    pub fn set_dir_n(mut self, n: usize) -> Self {
        self.dir_n = n;
        self
    }

    /// Set the number of clusters.
    #[must_use]
    pub fn set_cc_n(mut self, n: usize) -> Self {
        self.cc_n = n;
        self
    }

    /// Set the number of CPUs per cluster.
    #[must_use]
    pub fn set_cpu_n(mut self, n: usize) -> Self {
        self.cpu_n = n;
        self
    }

    /// Set the stimulus configuration.
    #[must_use]
    pub fn set_stimulus(mut self, stimulus: StimulusConfig) -> Self {
        self.stimulus = stimulus;
        self
    }

    /// Set the cache geometry used by all L1s and L2s.
    #[must_use]
    pub fn set_cache_geometry(mut self, cconfig: CacheModelConfig) -> Self {
        self.cconfig = cconfig;
        self
    }

    /// Set the directory tag store geometry.
    #[must_use]
    pub fn set_dir_geometry(mut self, cconfig: CacheModelConfig) -> Self {
        self.dir_cconfig = cconfig;
        self
    }

    /// Construct the configuration.
    #[must_use]
    pub fn construct(&self) -> SocConfig {
        let ccls = (0..self.cc_n)
            .map(|ci| CpuClusterConfig {
                name: format!("cl{ci}"),
                cc_config: CCAgentConfig {
                    name: format!("cc{ci}"),
                    epoch: 10,
                    l2_cc__cmd_n: 3,
                    dir_cc__rsp_n: 3,
                    cc_dt_n: 3,
                    cc_snp_n: 3,
                    l2_cc__snprsp_n: 3,
                    cc_snp_dtrsp_n: 3,
                    tt_entries_n: 16,
                    snp_tt_entries_n: 16,
                    cmd_credits_n: 1,
                },
                l2c_config: L2CacheAgentConfig {
                    name: format!("l2c{ci}"),
                    epoch: 10,
                    l1_l2__cmd_n: 3,
                    cc_l2__rsp_n: 3,
                    cc_l2__snp_n: 3,
                    tt_entries_n: 16,
                    cconfig: self.cconfig.clone(),
                },
                l1c_configs: (0..self.cpu_n)
                    .map(|i| L1CacheAgentConfig {
                        name: format!("l1c{ci}_{i}"),
                        epoch: 10,
                        cpu_l1__cmd_n: 3,
                        l2_l1__rsp_n: 3,
                        replay_n: 3,
                        tt_entries_n: 16,
                        cconfig: self.cconfig.clone(),
                    })
                    .collect(),
                cpu_configs: (0..self.cpu_n)
                    .map(|i| CpuConfig {
                        name: format!("cpu{ci}_{i}"),
                        l1_cpu__rsp_n: 3,
                        epoch: 10,
                    })
                    .collect(),
            })
            .collect();

        let dcfgs = (0..self.dir_n)
            .map(|di| DirAgentConfig {
                name: format!("dir{di}"),
                epoch: 10,
                cmd_queue_n: 3,
                rsp_queue_n: 3,
                tt_entries_n: 16,
                snp_credits_n: 1,
                cconfig: self.dir_cconfig.clone(),
                llcconfig: LLCAgentConfig {
                    name: format!("llc{di}"),
                    epoch: 10,
                    cmd_queue_n: 3,
                    rsp_queue_n: 3,
                    tt_entries_n: 16,
                },
            })
            .collect();

        SocConfig {
            name: "testsoc".to_owned(),
            protocol: "moesi".to_owned(),
            enable_verif: true,
            enable_stats: true,
            ccls,
            dcfgs,
            mcfgs: vec![MemModelConfig {
                name: "mem0".to_owned(),
                epoch: 10,
                cmd_queue_n: 3,
            }],
            noccfg: NocModelConfig {
                name: "noc".to_owned(),
                epoch: 10,
                ingress_q_n: 3,
            },
            scfg: self.stimulus.clone(),
        }
    }
}

/// A recorded monitor event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Record {
    /// An L1 cache event.
    Cache(AgentId, L1CacheEvent, Addr),
    /// A transaction started.
    Start(AgentId, TransactionId, u64),
    /// A transaction retired.
    End(AgentId, TransactionId, u64),
}

/// A monitor that records every event for later assertion.
#[derive(Default)]
pub struct RecordingMonitor {
    records: RefCell<Vec<Record>>,
}

impl RecordingMonitor {
    /// Create a shared recording monitor.
    #[must_use]
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    /// All records so far.
    #[must_use]
    pub fn records(&self) -> Vec<Record> {
        self.records.borrow().clone()
    }

    /// Records matching a predicate.
    #[must_use]
    pub fn count(&self, pred: impl Fn(&Record) -> bool) -> usize {
        self.records.borrow().iter().filter(|r| pred(r)).count()
    }
}

impl Monitor for RecordingMonitor {
    fn cache_event(&self, l1: AgentId, event: L1CacheEvent, addr: Addr) {
        self.records.borrow_mut().push(Record::Cache(l1, event, addr));
    }

    fn transaction_start(&self, cpu: AgentId, t: TransactionId, time: u64) {
        self.records.borrow_mut().push(Record::Start(cpu, t, time));
    }

    fn transaction_end(&self, cpu: AgentId, t: TransactionId, time: u64) {
        self.records.borrow_mut().push(Record::End(cpu, t, time));
    }
}
