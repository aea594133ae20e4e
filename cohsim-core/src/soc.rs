// Copyright (c) 2026 The cohsim authors. All rights reserved.

//! SoC top level: elaboration.
//!
//! Constructs the agents from the configuration, binds every inter-agent
//! queue (ownership rests with the consumer), wires the NOC ports and
//! endpoints, registers the credit counters and drives the design-rule
//! check. Agents live in arenas owned by this type; all cross-references
//! are [`AgentId`] handles.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;

use cohsim_components::credit::CreditCounter;
use cohsim_engine::kernel::Kernel;
use cohsim_engine::sequencer::SimUnit;
use cohsim_engine::sim_error;
use cohsim_engine::types::{SimError, SimResult};
use cohsim_track::entity::Entity;

use crate::ccntrl::CCAgent;
use crate::cfgs::SocConfig;
use crate::cpu::Cpu;
use crate::dir::{DirAgent, DirLine};
use crate::l1cache::L1CacheAgent;
use crate::l2cache::L2CacheAgent;
use crate::llc::LLCAgent;
use crate::mem::MemAgent;
use crate::monitor::{Monitor, SocStatistics};
use crate::mq::MessageQueue;
use crate::msg::{Message, MessageClass};
use crate::noc::{ClassDemux, EndpointDemux, LineDirMapper, NocEndpoint, NocModel, OriginDemux};
use crate::protocol::ProtocolRegistry;
use crate::stimulus::{ProgrammaticStimulus, Stimulus};
use crate::types::{Addr, AgentId, TransactionFactory};

/// One CPU cluster: a CC, an L2 and one (L1, CPU) pair per core.
pub struct CpuCluster {
    /// The cluster's cache controller.
    pub cc: Rc<CCAgent>,
    /// The cluster's shared L2.
    pub l2: Rc<L2CacheAgent>,
    /// The private L1s, one per CPU.
    pub l1s: Vec<Rc<L1CacheAgent>>,
    /// The CPUs.
    pub cpus: Vec<Rc<Cpu>>,
}

/// One home node: a directory and its co-located LLC.
pub struct DirNode {
    /// The directory agent.
    pub dir: Rc<DirAgent>,
    /// The last-level cache.
    pub llc: Rc<LLCAgent>,
}

/// Routes directory traffic: commands by their originating CC, snoop
/// responses to the shared queue.
struct DirDemux {
    cmd_by_cc: HashMap<AgentId, Rc<MessageQueue>>,
    snprsp_q: Rc<MessageQueue>,
}

impl EndpointDemux for DirDemux {
    fn lookup(&self, msg: &Message) -> Option<Rc<MessageQueue>> {
        match msg.cls() {
            MessageClass::CohSrt | MessageClass::CohCmd => {
                self.cmd_by_cc.get(&msg.origin).cloned()
            }
            MessageClass::CohSnpRsp => Some(self.snprsp_q.clone()),
            _ => None,
        }
    }
}

/// The elaborated SoC.
pub struct SocTop {
    kernel: Kernel,
    entity: Arc<Entity>,
    config: SocConfig,

    clusters: Vec<CpuCluster>,
    dirs: Vec<DirNode>,
    mems: Vec<Rc<MemAgent>>,
    noc: Rc<NocModel>,

    stimulus: Stimulus,
    tfactory: Rc<TransactionFactory>,
    stats: Option<Rc<SocStatistics>>,

    agent_names: RefCell<Vec<String>>,
}

impl SocTop {
    /// Elaborate the SoC described by `config`, with protocols drawn from
    /// `registry`.
    pub fn new(
        kernel: &Kernel,
        registry: &ProtocolRegistry,
        config: SocConfig,
    ) -> Result<Self, SimError> {
        config.validate()?;
        let pbuilder = registry.lookup(&config.protocol)?;
        let stimulus = Stimulus::build(&config.scfg, config.cpu_n())?;
        let tfactory = TransactionFactory::new();
        let entity = Arc::new(Entity::new(kernel.top(), config.name.as_str()));
        let agent_names = RefCell::new(Vec::new());
        let next_id = |names: &RefCell<Vec<String>>, name: String| {
            let mut names = names.borrow_mut();
            let id = AgentId(names.len());
            names.push(name);
            id
        };

        let noc = NocModel::new_and_register(kernel, &entity, &config.noccfg);

        // Clusters.
        let mut clusters = Vec::new();
        let mut cpu_index = 0usize;
        for cluster_cfg in &config.ccls {
            let cluster_entity = Arc::new(Entity::new(&entity, cluster_cfg.name.as_str()));
            let cc_id = next_id(&agent_names, cluster_cfg.cc_config.name.clone());
            let cc = CCAgent::new_and_register(
                kernel,
                &cluster_entity,
                cc_id,
                &cluster_cfg.cc_config,
                pbuilder.create_cc(),
            );
            let l1_n = cluster_cfg.l1c_configs.len();
            let l2_id = next_id(&agent_names, cluster_cfg.l2c_config.name.clone());
            let l2 = L2CacheAgent::new_and_register(
                kernel,
                &cluster_entity,
                l2_id,
                l1_n,
                &cluster_cfg.l2c_config,
                pbuilder.create_l2(),
            )?;
            let mut l1s = Vec::new();
            let mut cpus = Vec::new();
            for i in 0..l1_n {
                let l1_id = next_id(&agent_names, cluster_cfg.l1c_configs[i].name.clone());
                let l1 = L1CacheAgent::new_and_register(
                    kernel,
                    &cluster_entity,
                    l1_id,
                    i,
                    &cluster_cfg.l1c_configs[i],
                    pbuilder.create_l1(),
                )?;
                let cpu_id = next_id(&agent_names, cluster_cfg.cpu_configs[i].name.clone());
                let cpu = Cpu::new_and_register(
                    kernel,
                    &cluster_entity,
                    cpu_id,
                    &cluster_cfg.cpu_configs[i],
                    stimulus.context(cpu_index),
                    tfactory.clone(),
                );
                cpu_index += 1;
                l1s.push(l1);
                cpus.push(cpu);
            }
            clusters.push(CpuCluster { cc, l2, l1s, cpus });
        }

        // Home nodes.
        let mut dirs = Vec::new();
        for dir_cfg in &config.dcfgs {
            let node_entity = Arc::new(Entity::new(&entity, dir_cfg.name.as_str()));
            let dir_id = next_id(&agent_names, dir_cfg.name.clone());
            let dir = DirAgent::new_and_register(
                kernel,
                &node_entity,
                dir_id,
                dir_cfg,
                pbuilder.create_dir(),
                tfactory.clone(),
            )?;
            let llc_id = next_id(&agent_names, dir_cfg.llcconfig.name.clone());
            let llc =
                LLCAgent::new_and_register(kernel, &node_entity, llc_id, &dir_cfg.llcconfig);
            dirs.push(DirNode { dir, llc });
        }

        // Memories.
        let mut mems = Vec::new();
        for mem_cfg in &config.mcfgs {
            let mem_id = next_id(&agent_names, mem_cfg.name.clone());
            mems.push(MemAgent::new_and_register(kernel, &entity, mem_id, mem_cfg));
        }

        let soc = Self {
            kernel: kernel.clone(),
            entity,
            config,
            clusters,
            dirs,
            mems,
            noc,
            stimulus,
            tfactory,
            stats: None,
            agent_names,
        };
        soc.wire(kernel)?;
        Ok(soc)
    }

    /// Bind queues, NOC ports/endpoints, directory mapper and credits.
    fn wire(&self, kernel: &Kernel) -> SimResult {
        let dir_ids: Vec<AgentId> = self.dirs.iter().map(|n| n.dir.id()).collect();
        let cc_ids: Vec<AgentId> = self.clusters.iter().map(|c| c.cc.id()).collect();
        let dm = LineDirMapper::new(
            self.config.dcfgs[0].cconfig.line_bytes_n,
            dir_ids.clone(),
        );

        // Intra-cluster bindings.
        for (cluster, cluster_cfg) in self.clusters.iter().zip(&self.config.ccls) {
            let cc = &cluster.cc;
            let l2 = &cluster.l2;
            for (i, (l1, cpu)) in cluster.l1s.iter().zip(&cluster.cpus).enumerate() {
                cpu.set_cpu_l1__cmd_q(l1.cpu_l1__cmd_q());
                l1.set_l1_cpu__rsp_q(cpu.l1_cpu__rsp_q());
                l1.set_l1_l2__cmd_q(l2.l1_l2__cmd_q(i));
                l1.set_l2cache(l2.clone());
            }
            l2.set_l2_l1__rsp_qs(cluster.l1s.iter().map(|l1| l1.l2_l1__rsp_q()).collect());
            l2.set_l2_cc__cmd_q(cc.l2_cc__cmd_q());
            l2.set_l2_cc__snprsp_q(cc.l2_cc__snprsp_q());
            l2.set_l1caches(cluster.l1s.clone());
            cc.set_cc_l2__rsp_q(l2.cc_l2__rsp_q());
            cc.set_cc_l2__snp_q(l2.cc_l2__snp_q());
            cc.set_dm(dm.clone());

            // NOC attachment.
            let port = self.noc.register_port(kernel, cc.id());
            cc.set_noc_port(port);
            let demux = ClassDemux::new(vec![
                (MessageClass::CohCmdRsp, cc.dir_cc__rsp_q()),
                (MessageClass::CohEnd, cc.dir_cc__rsp_q()),
                (MessageClass::Dt, cc.cc__dt_q()),
                (MessageClass::CohSnp, cc.cc__snp_q()),
                (MessageClass::DtRsp, cc.cc__snp_dtrsp_q()),
            ]);
            let endpoint = NocEndpoint::new_and_register(
                kernel,
                cc.entity(),
                cluster_cfg.cc_config.epoch,
                self.config.noccfg.ingress_q_n,
                demux,
            );
            self.noc.register_endpoint(cc.id(), endpoint.ingress());

            // Per-(class, destination) credits.
            for dir_id in &dir_ids {
                for cls in [MessageClass::CohSrt, MessageClass::CohCmd] {
                    let name = format!("ccntr_{}_{dir_id}", cls_slug(cls));
                    cc.register_credit(
                        cls,
                        *dir_id,
                        Rc::new(CreditCounter::new(
                            kernel,
                            cc.entity(),
                            name.as_str(),
                            cluster_cfg.cc_config.cmd_credits_n,
                        )),
                    );
                }
            }
            for other_cc in &cc_ids {
                if *other_cc == cc.id() {
                    continue;
                }
                let name = format!("ccntr_dt_{other_cc}");
                cc.register_credit(
                    MessageClass::Dt,
                    *other_cc,
                    Rc::new(CreditCounter::new(
                        kernel,
                        cc.entity(),
                        name.as_str(),
                        cluster_cfg.cc_config.cmd_credits_n,
                    )),
                );
            }
        }

        // Home node bindings.
        for (node_index, (node, dir_cfg)) in
            self.dirs.iter().zip(&self.config.dcfgs).enumerate()
        {
            let dir = &node.dir;
            let llc = &node.llc;
            dir.set_dir_llc__cmd_q(llc.dir_llc__cmd_q());
            llc.set_llc_dir__rsp_q(dir.llc_rsp_q());

            let mem = &self.mems[node_index % self.mems.len()];
            llc.set_mc(mem.id());

            // Directory NOC attachment with per-CC command queues.
            let port = self.noc.register_port(kernel, dir.id());
            dir.set_noc_port(port);
            let mut cmd_by_cc = HashMap::new();
            for cc_id in &cc_ids {
                cmd_by_cc.insert(*cc_id, dir.register_cc(*cc_id));
            }
            let endpoint = NocEndpoint::new_and_register(
                kernel,
                dir.entity(),
                dir_cfg.epoch,
                self.config.noccfg.ingress_q_n,
                Box::new(DirDemux {
                    cmd_by_cc,
                    snprsp_q: dir.snprsp_q(),
                }),
            );
            self.noc.register_endpoint(dir.id(), endpoint.ingress());

            for cc_id in &cc_ids {
                let name = format!("ccntr_cohsnp_{cc_id}");
                dir.register_credit(
                    MessageClass::CohSnp,
                    *cc_id,
                    Rc::new(CreditCounter::new(
                        kernel,
                        dir.entity(),
                        name.as_str(),
                        dir_cfg.snp_credits_n,
                    )),
                );
            }

            // LLC NOC attachment.
            let port = self.noc.register_port(kernel, llc.id());
            llc.set_noc_port(port);
            let demux = ClassDemux::new(vec![
                (MessageClass::MemRsp, llc.mem_llc__rsp_q()),
                (MessageClass::DtRsp, llc.llc__dtrsp_q()),
            ]);
            let endpoint = NocEndpoint::new_and_register(
                kernel,
                llc.entity(),
                dir_cfg.llcconfig.epoch,
                self.config.noccfg.ingress_q_n,
                demux,
            );
            self.noc.register_endpoint(llc.id(), endpoint.ingress());

            for cc_id in &cc_ids {
                let name = format!("ccntr_dt_{cc_id}");
                llc.register_credit(
                    MessageClass::Dt,
                    *cc_id,
                    Rc::new(CreditCounter::new(kernel, llc.entity(), name.as_str(), 1)),
                );
            }
            let name = format!("ccntr_memcmd_{}", mem.id());
            llc.register_credit(
                MessageClass::MemCmd,
                mem.id(),
                Rc::new(CreditCounter::new(kernel, llc.entity(), name.as_str(), 1)),
            );
        }

        // Memory NOC attachment, with a per-LLC ingress queue.
        for (mem_index, mem) in self.mems.iter().enumerate() {
            let port = self.noc.register_port(kernel, mem.id());
            mem.set_noc_port(port);
            for (node_index, node) in self.dirs.iter().enumerate() {
                if node_index % self.mems.len() == mem_index {
                    mem.register_agent(node.llc.id());
                }
            }
            let endpoint = NocEndpoint::new_and_register(
                kernel,
                mem.entity(),
                self.config.mcfgs[mem_index].epoch,
                self.config.noccfg.ingress_q_n,
                OriginDemux::new(mem.rdis_mqs()),
            );
            self.noc.register_endpoint(mem.id(), endpoint.ingress());
        }
        Ok(())
    }

    /// The SoC entity.
    #[must_use]
    pub fn entity(&self) -> &Arc<Entity> {
        &self.entity
    }

    /// The configured stimulus.
    #[must_use]
    pub fn stimulus(&self) -> &Stimulus {
        &self.stimulus
    }

    /// The programmatic stimulus, when configured.
    #[must_use]
    pub fn programmatic_stimulus(&self) -> Option<Rc<ProgrammaticStimulus>> {
        self.stimulus.programmatic()
    }

    /// The shared transaction factory.
    #[must_use]
    pub fn tfactory(&self) -> Rc<TransactionFactory> {
        self.tfactory.clone()
    }

    /// The elaborated clusters.
    #[must_use]
    pub fn clusters(&self) -> &[CpuCluster] {
        &self.clusters
    }

    /// The elaborated home nodes.
    #[must_use]
    pub fn dirs(&self) -> &[DirNode] {
        &self.dirs
    }

    /// The statistics sink, when enabled.
    #[must_use]
    pub fn stats(&self) -> Option<Rc<SocStatistics>> {
        self.stats.clone()
    }

    /// Attach the statistics sink, when enabled.
    ///
    /// Called once after construction; part of the build phase.
    pub fn attach_sinks(&mut self) {
        if self.config.enable_stats {
            let stats = SocStatistics::new();
            self.distribute_monitor(stats.clone());
            self.stats = Some(stats);
        }
    }

    /// Register a verification monitor with every CPU and L1 in the
    /// design. Ignored unless verification is enabled in the
    /// configuration.
    pub fn register_monitor(&self, monitor: Rc<dyn Monitor>) {
        if self.config.enable_verif {
            self.distribute_monitor(monitor);
        }
    }

    fn distribute_monitor(&self, monitor: Rc<dyn Monitor>) {
        for cluster in &self.clusters {
            for cpu in &cluster.cpus {
                cpu.register_monitor(monitor.clone());
            }
            for l1 in &cluster.l1s {
                l1.register_monitor(monitor.clone());
            }
        }
    }

    /// The agent handle of cluster `i`'s cache controller.
    #[must_use]
    pub fn cc_id(&self, cluster: usize) -> AgentId {
        self.clusters[cluster].cc.id()
    }

    /// The registered name of an agent.
    #[must_use]
    pub fn agent_name(&self, id: AgentId) -> String {
        self.agent_names.borrow()[id.0].clone()
    }

    /// L1 line state name, for checkers.
    #[must_use]
    pub fn l1_line_state(&self, cluster: usize, cpu: usize, addr: Addr) -> Option<&'static str> {
        self.clusters[cluster].l1s[cpu].line_state(addr)
    }

    /// L2 line state name, for checkers.
    #[must_use]
    pub fn l2_line_state(&self, cluster: usize, addr: Addr) -> Option<&'static str> {
        self.clusters[cluster].l2.line_state(addr)
    }

    /// Directory line contents, for checkers.
    #[must_use]
    pub fn dir_line(&self, dir: usize, addr: Addr) -> Option<DirLine> {
        self.dirs[dir].dir.line(addr)
    }

    /// Directory line state name, for checkers.
    #[must_use]
    pub fn dir_line_state(&self, dir: usize, addr: Addr) -> Option<&'static str> {
        self.dirs[dir].dir.line_state(addr)
    }

    /// End-of-simulation assertions: every issue retired, every
    /// transaction table empty and every credit returned.
    pub fn check_end_state(&self) -> SimResult {
        if self.stimulus.issue_n() != self.stimulus.retire_n() {
            sim_error!(
                "{}: {} issued but {} retired",
                self.entity,
                self.stimulus.issue_n(),
                self.stimulus.retire_n()
            );
        }
        for cluster in &self.clusters {
            for cpu in &cluster.cpus {
                if cpu.outstanding_n() != 0 {
                    sim_error!("{}: CPU transactions outstanding at end of sim", self.entity);
                }
            }
            for l1 in &cluster.l1s {
                if l1.outstanding_n() != 0 {
                    sim_error!("{}: L1 transaction table not empty at end of sim", self.entity);
                }
            }
            if cluster.l2.outstanding_n() != 0 {
                sim_error!("{}: L2 transaction table not empty at end of sim", self.entity);
            }
            if cluster.cc.outstanding_n() != 0 {
                sim_error!("{}: CC transaction table not empty at end of sim", self.entity);
            }
            for credit in cluster.cc.credits() {
                if credit.i() != credit.capacity() {
                    sim_error!("{}: credit not conserved on {}", self.entity, credit.entity);
                }
            }
        }
        for node in &self.dirs {
            if node.dir.outstanding_n() != 0 {
                sim_error!("{}: directory transaction table not empty at end of sim", self.entity);
            }
            if node.llc.outstanding_n() != 0 {
                sim_error!("{}: LLC transaction table not empty at end of sim", self.entity);
            }
            for credit in node.dir.credits().into_iter().chain(node.llc.credits()) {
                if credit.i() != credit.capacity() {
                    sim_error!("{}: credit not conserved on {}", self.entity, credit.entity);
                }
            }
        }
        for credit in self.noc.port_credits() {
            if credit.i() != credit.capacity() {
                sim_error!("{}: credit not conserved on {}", self.entity, credit.entity);
            }
        }
        Ok(())
    }
}

impl SimUnit for SocTop {
    fn elab(&self) -> SimResult {
        for cluster in &self.clusters {
            for l1 in &cluster.l1s {
                l1.elab()?;
            }
            cluster.l2.elab()?;
            cluster.cc.elab()?;
        }
        for node in &self.dirs {
            node.dir.elab()?;
            node.llc.elab()?;
        }
        for mem in &self.mems {
            mem.elab()?;
        }
        self.noc.elab()
    }

    fn drc(&self) -> SimResult {
        for cluster in &self.clusters {
            for cpu in &cluster.cpus {
                cpu.drc()?;
            }
            for l1 in &cluster.l1s {
                l1.drc()?;
            }
            cluster.l2.drc()?;
            cluster.cc.drc()?;
        }
        for node in &self.dirs {
            node.dir.drc()?;
            node.llc.drc()?;
        }
        for mem in &self.mems {
            mem.drc()?;
        }
        Ok(())
    }
}

fn cls_slug(cls: MessageClass) -> &'static str {
    match cls {
        MessageClass::CohSrt => "cohsrt",
        MessageClass::CohCmd => "cohcmd",
        _ => "cls",
    }
}

/// The kernel this SoC was built against.
impl SocTop {
    /// The kernel handle.
    #[must_use]
    pub fn kernel(&self) -> &Kernel {
        &self.kernel
    }
}
