// Copyright (c) 2026 The cohsim authors. All rights reserved.

//! Configuration records.
//!
//! One [`SocConfig`] tree describes a whole SoC. The records deserialize
//! from JSON; queue depths and epoch costs are per-agent options that all
//! default to small constants.

use std::path::Path;

use cohsim_components::cache::CacheGeometry;
use cohsim_engine::sim_error;
use cohsim_engine::types::{SimError, SimResult};
use serde::Deserialize;

fn default_epoch() -> u64 {
    10
}

fn default_queue_n() -> usize {
    3
}

fn default_tt_n() -> usize {
    16
}

fn default_credits_n() -> usize {
    1
}

fn default_sets_n() -> usize {
    64
}

fn default_ways_n() -> usize {
    4
}

fn default_line_bytes_n() -> usize {
    64
}

fn default_true() -> bool {
    true
}

/// Geometry of a cache tag store.
#[derive(Clone, Debug, Deserialize)]
pub struct CacheModelConfig {
    /// Number of sets.
    #[serde(default = "default_sets_n")]
    pub sets_n: usize,
    /// Number of ways per set.
    #[serde(default = "default_ways_n")]
    pub ways_n: usize,
    /// Line size in bytes (power of two).
    #[serde(default = "default_line_bytes_n")]
    pub line_bytes_n: usize,
}

impl Default for CacheModelConfig {
    fn default() -> Self {
        Self {
            sets_n: default_sets_n(),
            ways_n: default_ways_n(),
            line_bytes_n: default_line_bytes_n(),
        }
    }
}

impl CacheModelConfig {
    /// The geometry for the components-level cache model.
    #[must_use]
    pub fn geometry(&self) -> CacheGeometry {
        CacheGeometry {
            sets_n: self.sets_n,
            ways_n: self.ways_n,
            line_bytes_n: self.line_bytes_n,
        }
    }
}

/// A CPU.
#[derive(Clone, Debug, Deserialize)]
pub struct CpuConfig {
    /// Instance name.
    pub name: String,
    /// L1 to CPU response queue depth (CPU owned).
    #[serde(default = "default_queue_n")]
    pub l1_cpu__rsp_n: usize,
    /// Issue pacing epoch.
    #[serde(default = "default_epoch")]
    pub epoch: u64,
}

/// A private L1 cache agent.
#[derive(Clone, Debug, Deserialize)]
pub struct L1CacheAgentConfig {
    /// Instance name.
    pub name: String,
    /// Work epoch.
    #[serde(default = "default_epoch")]
    pub epoch: u64,
    /// CPU to L1 command queue depth.
    #[serde(default = "default_queue_n")]
    pub cpu_l1__cmd_n: usize,
    /// L2 to L1 response queue depth.
    #[serde(default = "default_queue_n")]
    pub l2_l1__rsp_n: usize,
    /// Replay queue depth.
    #[serde(default = "default_queue_n")]
    pub replay_n: usize,
    /// Transaction table capacity.
    #[serde(default = "default_tt_n")]
    pub tt_entries_n: usize,
    /// Cache geometry.
    #[serde(default)]
    pub cconfig: CacheModelConfig,
}

/// A per-cluster shared L2 cache agent.
#[derive(Clone, Debug, Deserialize)]
pub struct L2CacheAgentConfig {
    /// Instance name.
    pub name: String,
    /// Work epoch.
    #[serde(default = "default_epoch")]
    pub epoch: u64,
    /// Per-L1 command queue depth.
    #[serde(default = "default_queue_n")]
    pub l1_l2__cmd_n: usize,
    /// CC to L2 ACE response queue depth.
    #[serde(default = "default_queue_n")]
    pub cc_l2__rsp_n: usize,
    /// CC to L2 snoop queue depth.
    #[serde(default = "default_queue_n")]
    pub cc_l2__snp_n: usize,
    /// Transaction table capacity.
    #[serde(default = "default_tt_n")]
    pub tt_entries_n: usize,
    /// Cache geometry.
    #[serde(default)]
    pub cconfig: CacheModelConfig,
}

/// A cluster-to-NOC cache controller.
#[derive(Clone, Debug, Deserialize)]
pub struct CCAgentConfig {
    /// Instance name.
    pub name: String,
    /// Work epoch.
    #[serde(default = "default_epoch")]
    pub epoch: u64,
    /// L2 to CC ACE command queue depth.
    #[serde(default = "default_queue_n")]
    pub l2_cc__cmd_n: usize,
    /// Directory to CC response queue depth (CohCmdRsp/CohEnd).
    #[serde(default = "default_queue_n")]
    pub dir_cc__rsp_n: usize,
    /// Data-transfer ingress queue depth.
    #[serde(default = "default_queue_n")]
    pub cc_dt_n: usize,
    /// Snoop ingress queue depth (CohSnp).
    #[serde(default = "default_queue_n")]
    pub cc_snp_n: usize,
    /// L2 to CC snoop response queue depth.
    #[serde(default = "default_queue_n")]
    pub l2_cc__snprsp_n: usize,
    /// Snoop-side DtRsp ingress queue depth.
    #[serde(default = "default_queue_n")]
    pub cc_snp_dtrsp_n: usize,
    /// Request transaction table capacity.
    #[serde(default = "default_tt_n")]
    pub tt_entries_n: usize,
    /// Snoop transaction table capacity.
    #[serde(default = "default_tt_n")]
    pub snp_tt_entries_n: usize,
    /// Per-(class, destination) command credits.
    #[serde(default = "default_credits_n")]
    pub cmd_credits_n: usize,
}

/// One CPU cluster: a CC, an L2 and one (L1, CPU) pair per core.
#[derive(Clone, Debug, Deserialize)]
pub struct CpuClusterConfig {
    /// Instance name.
    pub name: String,
    /// The cluster's cache controller.
    pub cc_config: CCAgentConfig,
    /// The cluster's shared L2.
    pub l2c_config: L2CacheAgentConfig,
    /// One L1 per CPU.
    pub l1c_configs: Vec<L1CacheAgentConfig>,
    /// The CPUs.
    pub cpu_configs: Vec<CpuConfig>,
}

/// A last-level cache co-located with a directory.
#[derive(Clone, Debug, Deserialize)]
pub struct LLCAgentConfig {
    /// Instance name.
    pub name: String,
    /// Work epoch.
    #[serde(default = "default_epoch")]
    pub epoch: u64,
    /// Directory to LLC command queue depth.
    #[serde(default = "default_queue_n")]
    pub cmd_queue_n: usize,
    /// Response queue depths (MemRsp, DtRsp).
    #[serde(default = "default_queue_n")]
    pub rsp_queue_n: usize,
    /// Transaction table capacity.
    #[serde(default = "default_tt_n")]
    pub tt_entries_n: usize,
}

/// A directory agent (home node).
#[derive(Clone, Debug, Deserialize)]
pub struct DirAgentConfig {
    /// Instance name.
    pub name: String,
    /// Work epoch.
    #[serde(default = "default_epoch")]
    pub epoch: u64,
    /// Per-CC command queue depth (CohSrt/CohCmd).
    #[serde(default = "default_queue_n")]
    pub cmd_queue_n: usize,
    /// Response queue depths (CohSnpRsp, LLCRsp).
    #[serde(default = "default_queue_n")]
    pub rsp_queue_n: usize,
    /// Transaction table capacity.
    #[serde(default = "default_tt_n")]
    pub tt_entries_n: usize,
    /// Per-CC snoop credits.
    #[serde(default = "default_credits_n")]
    pub snp_credits_n: usize,
    /// Directory tag store geometry.
    #[serde(default)]
    pub cconfig: CacheModelConfig,
    /// Co-located LLC.
    pub llcconfig: LLCAgentConfig,
}

/// A main-memory controller.
#[derive(Clone, Debug, Deserialize)]
pub struct MemModelConfig {
    /// Instance name.
    pub name: String,
    /// Work epoch.
    #[serde(default = "default_epoch")]
    pub epoch: u64,
    /// Per-origin command queue depth.
    #[serde(default = "default_queue_n")]
    pub cmd_queue_n: usize,
}

/// The network-on-chip.
#[derive(Clone, Debug, Deserialize)]
pub struct NocModelConfig {
    /// Instance name.
    pub name: String,
    /// Work epoch.
    #[serde(default = "default_epoch")]
    pub epoch: u64,
    /// Per-port and per-endpoint ingress queue depth.
    #[serde(default = "default_queue_n")]
    pub ingress_q_n: usize,
}

/// Stimulus source type.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StimulusType {
    /// Read `(time, cpu, opcode, addr)` tuples from a text file.
    Trace,
    /// Commands pushed programmatically before the run.
    Programmatic,
}

/// Stimulus configuration.
#[derive(Clone, Debug, Deserialize)]
pub struct StimulusConfig {
    /// Source type.
    #[serde(rename = "type")]
    pub stype: StimulusType,
    /// Trace filename (trace type only).
    #[serde(default)]
    pub filename: Option<String>,
}

/// Top-level SoC configuration.
#[derive(Clone, Debug, Deserialize)]
pub struct SocConfig {
    /// Design name.
    pub name: String,
    /// Protocol registry key.
    pub protocol: String,
    /// Distribute registered verification monitors.
    #[serde(default = "default_true")]
    pub enable_verif: bool,
    /// Attach the counting statistics sink.
    #[serde(default = "default_true")]
    pub enable_stats: bool,
    /// CPU clusters.
    pub ccls: Vec<CpuClusterConfig>,
    /// Directory agents.
    pub dcfgs: Vec<DirAgentConfig>,
    /// Memory controllers.
    pub mcfgs: Vec<MemModelConfig>,
    /// The NOC.
    pub noccfg: NocModelConfig,
    /// The stimulus.
    pub scfg: StimulusConfig,
}

impl SocConfig {
    /// Parse a configuration from a JSON string.
    pub fn from_json(json: &str) -> Result<Self, SimError> {
        let cfg: SocConfig = serde_json::from_str(json)
            .map_err(|e| SimError(format!("configuration: parse failed: {e}")))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Parse a configuration from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self, SimError> {
        let s = std::fs::read_to_string(path)
            .map_err(|e| SimError(format!("configuration: unable to read {}: {e}", path.display())))?;
        Self::from_json(&s)
    }

    /// Cross-field validation, reported before elaboration starts.
    pub fn validate(&self) -> SimResult {
        if self.ccls.is_empty() {
            sim_error!("configuration: no CPU clusters configured");
        }
        if self.dcfgs.is_empty() {
            sim_error!("configuration: no directories configured");
        }
        if self.mcfgs.is_empty() {
            sim_error!("configuration: no memories configured");
        }
        for cluster in &self.ccls {
            if cluster.cpu_configs.is_empty() {
                sim_error!("configuration: cluster {}: no CPUs defined", cluster.name);
            }
            if cluster.l1c_configs.is_empty() {
                sim_error!("configuration: cluster {}: no L1s defined", cluster.name);
            }
            if cluster.cpu_configs.len() != cluster.l1c_configs.len() {
                sim_error!(
                    "configuration: cluster {}: CPU count does not equal L1 count",
                    cluster.name
                );
            }
        }
        if self.scfg.stype == StimulusType::Trace && self.scfg.filename.is_none() {
            sim_error!("configuration: trace stimulus requires a filename");
        }
        Ok(())
    }

    /// Total number of CPUs across all clusters.
    #[must_use]
    pub fn cpu_n(&self) -> usize {
        self.ccls.iter().map(|c| c.cpu_configs.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ConfigBuilder;

    #[test]
    fn builder_roundtrip() {
        let cfg = ConfigBuilder::new()
            .set_dir_n(1)
            .set_cc_n(2)
            .set_cpu_n(1)
            .construct();
        assert_eq!(cfg.ccls.len(), 2);
        assert_eq!(cfg.cpu_n(), 2);
        cfg.validate().unwrap();
    }

    #[test]
    fn json_parse_with_defaults() {
        let json = r#"{
            "name": "soc",
            "protocol": "moesi",
            "ccls": [{
                "name": "cl0",
                "cc_config": { "name": "cc" },
                "l2c_config": { "name": "l2c" },
                "l1c_configs": [{ "name": "l1c0" }],
                "cpu_configs": [{ "name": "cpu0" }]
            }],
            "dcfgs": [{
                "name": "dir0",
                "llcconfig": { "name": "llc0" }
            }],
            "mcfgs": [{ "name": "mem0" }],
            "noccfg": { "name": "noc" },
            "scfg": { "type": "programmatic" }
        }"#;
        let cfg = SocConfig::from_json(json).unwrap();
        assert_eq!(cfg.ccls[0].l1c_configs[0].epoch, 10);
        assert_eq!(cfg.ccls[0].l1c_configs[0].cpu_l1__cmd_n, 3);
        assert_eq!(cfg.dcfgs[0].cconfig.line_bytes_n, 64);
        assert!(cfg.enable_stats);
    }

    #[test]
    fn mismatched_cpu_l1_counts_rejected() {
        let json = r#"{
            "name": "soc",
            "protocol": "moesi",
            "ccls": [{
                "name": "cl0",
                "cc_config": { "name": "cc" },
                "l2c_config": { "name": "l2c" },
                "l1c_configs": [{ "name": "l1c0" }, { "name": "l1c1" }],
                "cpu_configs": [{ "name": "cpu0" }]
            }],
            "dcfgs": [{ "name": "dir0", "llcconfig": { "name": "llc0" } }],
            "mcfgs": [{ "name": "mem0" }],
            "noccfg": { "name": "noc" },
            "scfg": { "type": "programmatic" }
        }"#;
        assert!(SocConfig::from_json(json).is_err());
    }

    #[test]
    fn trace_without_filename_rejected() {
        let mut cfg = ConfigBuilder::new().construct();
        cfg.scfg = StimulusConfig {
            stype: StimulusType::Trace,
            filename: None,
        };
        assert!(cfg.validate().is_err());
    }
}
