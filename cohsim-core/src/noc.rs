// Copyright (c) 2026 The cohsim authors. All rights reserved.

//! The network-on-chip.
//!
//! No real topology is modelled. Each attached agent owns a [`NocPort`]
//! (an ingress queue into the fabric plus a credit counter mirroring its
//! capacity) and a [`NocEndpoint`] (an ingress queue out of the fabric
//! plus a demultiplexer process that routes delivered payloads into the
//! agent's per-class queues). The NOC process arbitrates the ports,
//! strips the transport envelope and delivers the payload to the
//! destination endpoint, replenishing the source port's credit on
//! transfer.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;

use cohsim_components::arbiter::Arbiter;
use cohsim_components::arbiter::Requester;
use cohsim_components::credit::CreditCounter;
use cohsim_engine::kernel::Kernel;
use cohsim_engine::process::{Process, ProcessCtrl};
use cohsim_engine::sim_error;
use cohsim_engine::types::SimResult;
use cohsim_track::entity::Entity;
use cohsim_track::trace;

use crate::cfgs::NocModelConfig;
use crate::mq::MessageQueue;
use crate::msg::{Message, MessageClass, Payload};
use crate::types::{Addr, AgentId};

/// Maps an address to its home directory.
pub trait DirMapper {
    /// The directory agent owning `addr`.
    fn lookup(&self, addr: Addr) -> AgentId;
}

/// Interleaves line addresses across the configured directories.
pub struct LineDirMapper {
    line_bytes_n: usize,
    dirs: Vec<AgentId>,
}

impl LineDirMapper {
    /// Create a mapper over `dirs`, interleaving at `line_bytes_n`.
    #[must_use]
    pub fn new(line_bytes_n: usize, dirs: Vec<AgentId>) -> Rc<Self> {
        Rc::new(Self { line_bytes_n, dirs })
    }
}

impl DirMapper for LineDirMapper {
    fn lookup(&self, addr: Addr) -> AgentId {
        let line = addr as usize / self.line_bytes_n;
        self.dirs[line % self.dirs.len()]
    }
}

/// The agent-side port pair into the fabric: an ingress queue and the
/// credit counter mirroring its capacity.
pub struct NocPort {
    ingress: Rc<MessageQueue>,
    ingress_cc: Rc<CreditCounter>,
}

impl NocPort {
    /// The ingress queue into the fabric.
    #[must_use]
    pub fn ingress(&self) -> &Rc<MessageQueue> {
        &self.ingress
    }

    /// The port's credit counter; a message may be emitted only while a
    /// credit is held.
    #[must_use]
    pub fn ingress_cc(&self) -> &Rc<CreditCounter> {
        &self.ingress_cc
    }
}

/// The fabric: one ingress per attached agent plus a forwarding process.
pub struct NocModel {
    entity: Arc<Entity>,
    ports: RefCell<Vec<Rc<NocPort>>>,
    arb: Arbiter<MessageQueue>,
    endpoints: RefCell<HashMap<AgentId, Rc<MessageQueue>>>,
    ingress_q_n: usize,
}

impl NocModel {
    /// Construct the NOC and register its forwarding process.
    pub fn new_and_register(
        kernel: &Kernel,
        parent: &Arc<Entity>,
        config: &NocModelConfig,
    ) -> Rc<Self> {
        let entity = Arc::new(Entity::new(parent, config.name.as_str()));
        let arb = Arbiter::new(kernel, &entity, "arb");
        let noc = Rc::new(Self {
            entity,
            ports: RefCell::new(Vec::new()),
            arb,
            endpoints: RefCell::new(HashMap::new()),
            ingress_q_n: config.ingress_q_n,
        });
        let process_entity = Arc::new(Entity::new(&noc.entity, "fwd"));
        kernel.add_process(
            &process_entity,
            config.epoch,
            Rc::new(RefCell::new(FwdProcess { noc: noc.clone() })),
        );
        noc
    }

    /// Create the port for `owner` (Build-Phase only).
    pub fn register_port(&self, kernel: &Kernel, owner: AgentId) -> Rc<NocPort> {
        let name = format!("port_{owner}");
        let port_entity = Arc::new(Entity::new(&self.entity, name.as_str()));
        let ingress = MessageQueue::new(kernel, &port_entity, "ingress", self.ingress_q_n);
        let ingress_cc = Rc::new(CreditCounter::new(
            kernel,
            &port_entity,
            "ingress_cc",
            self.ingress_q_n,
        ));
        let port = Rc::new(NocPort {
            ingress: ingress.clone(),
            ingress_cc,
        });
        self.ports.borrow_mut().push(port.clone());
        self.arb.add_requester(ingress);
        port
    }

    /// Register the delivery queue for `agent` (Build-Phase only).
    pub fn register_endpoint(&self, agent: AgentId, q: Rc<MessageQueue>) {
        self.endpoints.borrow_mut().insert(agent, q);
    }

    /// Elaboration phase.
    pub fn elab(&self) -> SimResult {
        self.arb.elab()
    }

    /// All registered port credit counters, for conservation checks.
    #[must_use]
    pub fn port_credits(&self) -> Vec<Rc<CreditCounter>> {
        self.ports
            .borrow()
            .iter()
            .map(|p| p.ingress_cc.clone())
            .collect()
    }
}

struct FwdProcess {
    noc: Rc<NocModel>,
}

impl Process for FwdProcess {
    fn init(&mut self, pc: &mut ProcessCtrl) -> SimResult {
        pc.wait_on(self.noc.arb.request_arrival_event());
        Ok(())
    }

    fn eval(&mut self, pc: &mut ProcessCtrl) -> SimResult {
        let noc = &self.noc;
        let t = noc.arb.tournament();
        let Some((idx, mq)) = t.winner() else {
            pc.wait_on(noc.arb.request_arrival_event());
            return Ok(());
        };
        let mq = mq.clone();
        let msg = mq.peek().unwrap();
        if msg.cls() != MessageClass::Noc {
            sim_error!("{}: received invalid message class: {}", noc.entity, msg);
        }
        let Payload::Noc { dest, .. } = &msg.payload else {
            unreachable!()
        };
        let endpoint = match noc.endpoints.borrow().get(dest) {
            Some(q) => q.clone(),
            None => {
                sim_error!("{}: no endpoint registered for {}", noc.entity, dest);
            }
        };
        if endpoint.full() {
            pc.wait_on(endpoint.non_full_event());
            return Ok(());
        }

        let msg = mq.dequeue().unwrap();
        noc.arb.advance(idx);
        let Payload::Noc { payload, dest } = msg.payload else {
            unreachable!()
        };
        trace!(noc.entity ; "deliver {} to {}", payload, dest);
        endpoint.enqueue(*payload)?;
        // Credits on the source port are replenished on transfer.
        noc.ports.borrow()[idx].ingress_cc.credit()?;

        if noc.arb.tournament().winner().is_some() {
            pc.wait_epoch();
        } else {
            pc.wait_on(noc.arb.request_arrival_event());
        }
        Ok(())
    }
}

/// Routes a delivered payload to one of the owning agent's ingress queues.
pub trait EndpointDemux {
    /// The destination queue for `msg`, or `None` when unroutable.
    fn lookup(&self, msg: &Message) -> Option<Rc<MessageQueue>>;
}

/// Demultiplex by message class.
pub struct ClassDemux {
    routes: HashMap<MessageClass, Rc<MessageQueue>>,
}

impl ClassDemux {
    /// Build from `(class, queue)` routes.
    #[must_use]
    pub fn new(routes: Vec<(MessageClass, Rc<MessageQueue>)>) -> Box<Self> {
        Box::new(Self {
            routes: routes.into_iter().collect(),
        })
    }
}

impl EndpointDemux for ClassDemux {
    fn lookup(&self, msg: &Message) -> Option<Rc<MessageQueue>> {
        self.routes.get(&msg.cls()).cloned()
    }
}

/// Demultiplex by originating agent.
pub struct OriginDemux {
    routes: HashMap<AgentId, Rc<MessageQueue>>,
}

impl OriginDemux {
    /// Build from `(origin, queue)` routes.
    #[must_use]
    pub fn new(routes: Vec<(AgentId, Rc<MessageQueue>)>) -> Box<Self> {
        Box::new(Self {
            routes: routes.into_iter().collect(),
        })
    }
}

impl EndpointDemux for OriginDemux {
    fn lookup(&self, msg: &Message) -> Option<Rc<MessageQueue>> {
        self.routes.get(&msg.origin).cloned()
    }
}

/// An agent's receive side: the delivery queue and its demultiplexer.
pub struct NocEndpoint {
    entity: Arc<Entity>,
    ingress: Rc<MessageQueue>,
    demux: Box<dyn EndpointDemux>,
}

impl NocEndpoint {
    /// Construct the endpoint and register its demultiplexer process.
    pub fn new_and_register(
        kernel: &Kernel,
        parent: &Arc<Entity>,
        epoch: u64,
        ingress_q_n: usize,
        demux: Box<dyn EndpointDemux>,
    ) -> Rc<Self> {
        let entity = Arc::new(Entity::new(parent, "noc_ep"));
        let ingress = MessageQueue::new(kernel, &entity, "ingress", ingress_q_n);
        let endpoint = Rc::new(Self {
            entity,
            ingress,
            demux,
        });
        let process_entity = Arc::new(Entity::new(&endpoint.entity, "demux"));
        kernel.add_process(
            &process_entity,
            epoch,
            Rc::new(RefCell::new(DemuxProcess {
                endpoint: endpoint.clone(),
            })),
        );
        endpoint
    }

    /// The delivery queue to register with the NOC.
    #[must_use]
    pub fn ingress(&self) -> Rc<MessageQueue> {
        self.ingress.clone()
    }
}

struct DemuxProcess {
    endpoint: Rc<NocEndpoint>,
}

impl Process for DemuxProcess {
    fn init(&mut self, pc: &mut ProcessCtrl) -> SimResult {
        pc.wait_on(self.endpoint.ingress.non_empty_event());
        Ok(())
    }

    fn eval(&mut self, pc: &mut ProcessCtrl) -> SimResult {
        let ep = &self.endpoint;
        let Some(msg) = ep.ingress.peek() else {
            pc.wait_on(ep.ingress.non_empty_event());
            return Ok(());
        };
        let Some(target) = ep.demux.lookup(&msg) else {
            sim_error!("{}: message queue not found for {}", ep.entity, msg);
        };
        if target.full() {
            pc.wait_on(target.non_full_event());
            return Ok(());
        }
        let msg = ep.ingress.dequeue().unwrap();
        target.enqueue(msg)?;

        if ep.ingress.empty() {
            pc.wait_on(ep.ingress.non_empty_event());
        } else {
            pc.wait_epoch();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dir_mapper_interleaves_lines() {
        let d0 = AgentId(10);
        let d1 = AgentId(11);
        let mapper = LineDirMapper::new(64, vec![d0, d1]);
        assert_eq!(mapper.lookup(0x00), d0);
        assert_eq!(mapper.lookup(0x3f), d0);
        assert_eq!(mapper.lookup(0x40), d1);
        assert_eq!(mapper.lookup(0x80), d0);
    }
}
