// Swarmnet: A Routing Control Plane for Software-Defined Ad-Hoc Networks
// Copyright (C) 2024  The Swarmnet Developers
//
// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along
// with this program; if not, write to the Free Software Foundation, Inc.,
// 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301 USA.

//! # Controller core
//!
//! The single-writer heart of the control plane. [`ControlPlane`] owns the topology graph, the
//! per-switch forwarding tables, the dirty flag and the southbound fabric; [`Controller`] binds
//! it to a routing engine and feeds it events. All handlers run to completion on one thread, so
//! any packet-in observes routing state consistent with every link event processed before it.

use crate::addr::host_ip_to_mac;
use crate::engine::RoutingEngine;
use crate::error::ControllerError;
use crate::graph::NetGraph;
use crate::ofproto::{
    Action, ArpOp, ArpPacket, ConnectionUp, Dpid, EthFrame, EthPayload, Fabric, FlowMod,
    FlowModCommand, LinkChange, LinkEvent, Mac, Match, OfMessage, OutputPort, PacketIn,
    PacketKind, PacketMeta, PacketOut, PortMod, PortNo, ETH_TYPE_ARP, ETH_TYPE_IPV6,
    PORT_NO_FLOOD,
};
use crate::table::MacTable;

use log::*;
use std::collections::BTreeMap;

/// Idle timeout, in seconds, of every installed forwarding rule. Stale rules are reaped by the
/// switches themselves even if the controller forgets to purge them.
pub const ENTRY_TIMEOUT: u16 = 120;
/// Priority of installed forwarding rules.
pub const PRI_FWD: u16 = 1;

/// The state shared by the packet pipeline and the routing engines: topology graph, per-switch
/// forwarding tables, the `graph_updated` dirty flag, and the southbound fabric.
#[derive(Debug)]
pub struct ControlPlane<F: Fabric> {
    graph: NetGraph,
    routes: BTreeMap<Dpid, MacTable>,
    graph_updated: bool,
    fabric: F,
}

impl<F: Fabric> ControlPlane<F> {
    /// Create a control plane on top of the given fabric.
    pub fn new(fabric: F) -> Self {
        Self { graph: NetGraph::new(), routes: BTreeMap::new(), graph_updated: false, fabric }
    }

    /// The topology graph.
    pub fn graph(&self) -> &NetGraph {
        &self.graph
    }

    /// Mutable access to the topology graph (used by the ant-colony engine for pheromones).
    pub fn graph_mut(&mut self) -> &mut NetGraph {
        &mut self.graph
    }

    /// The forwarding table of a switch, if it is connected.
    pub fn table(&self, dpid: Dpid) -> Option<&MacTable> {
        self.routes.get(&dpid)
    }

    /// Mutable access to the forwarding table of a switch.
    pub fn table_mut(&mut self, dpid: Dpid) -> Option<&mut MacTable> {
        self.routes.get_mut(&dpid)
    }

    /// Iterate over all forwarding tables.
    pub fn tables(&self) -> impl Iterator<Item = (Dpid, &MacTable)> {
        self.routes.iter().map(|(d, t)| (*d, t))
    }

    /// Drop every entry of every forwarding table.
    pub fn flush_all_tables(&mut self) {
        for table in self.routes.values_mut() {
            table.flush();
        }
    }

    /// True if the topology changed since the last route recomputation.
    pub fn graph_updated(&self) -> bool {
        self.graph_updated
    }

    /// Read and clear the dirty flag. Engines call this at the start of a recomputation.
    pub fn take_graph_updated(&mut self) -> bool {
        let updated = self.graph_updated;
        self.graph_updated = false;
        updated
    }

    /// Create an empty forwarding table for a switch, replacing any existing one.
    pub(crate) fn insert_table(&mut self, dpid: Dpid, table: MacTable) {
        self.routes.insert(dpid, table);
    }

    /// The southbound fabric.
    pub fn fabric(&self) -> &F {
        &self.fabric
    }

    /// Mutable access to the southbound fabric.
    pub fn fabric_mut(&mut self) -> &mut F {
        &mut self.fabric
    }

    /// Broadcast a flow-table delete to every connected switch, so that stale rules expire
    /// immediately after a recomputation instead of lingering until their idle timeout.
    pub fn clear_all_flow_tables(&mut self) {
        let msg = FlowMod::delete_all();
        for dpid in self.fabric.connected_switches() {
            self.fabric.send(dpid, OfMessage::FlowMod(msg.clone()));
        }
    }

    /// Set or clear the `NO_FLOOD` bit on a port. A vanished connection or port is a no-op.
    fn set_port_flood_mode(&mut self, dpid: Dpid, port: PortNo, flood: bool) {
        let desc = match self.fabric.port(dpid, port) {
            Some(desc) => desc,
            None => return,
        };
        let msg = PortMod {
            port_no: desc.port_no,
            hw_addr: desc.hw_addr,
            config: if flood { 0 } else { PORT_NO_FLOOD },
            mask: PORT_NO_FLOOD,
        };
        self.fabric.send(dpid, OfMessage::PortMod(msg));
    }

    /// Purge all rules that sinkhole traffic into a dead port: delete by ingress port, and
    /// delete by destination for every MAC the reverse index places on that port. The local
    /// forwarding entries are dropped along with the switch-side rules.
    fn clear_rules_for_port(&mut self, dpid: Dpid, port: PortNo) {
        self.fabric.send(
            dpid,
            OfMessage::FlowMod(FlowMod::delete_matching(Match {
                in_port: Some(port),
                ..Match::default()
            })),
        );
        let macs: Vec<Mac> = match self.routes.get(&dpid) {
            Some(table) => table.macs_on_port(port).collect(),
            None => return,
        };
        for mac in macs {
            self.fabric.send(
                dpid,
                OfMessage::FlowMod(FlowMod::delete_matching(Match {
                    dl_dst: Some(mac),
                    ..Match::default()
                })),
            );
            if let Some(table) = self.routes.get_mut(&dpid) {
                table.remove(mac);
            }
        }
    }

    /// Emit the received packet out of every port except the ingress and `NO_FLOOD` ports.
    fn flood(&mut self, dpid: Dpid, meta: &PacketMeta) {
        let msg = PacketOut {
            in_port: Some(meta.iport),
            frame: meta.frame.clone(),
            actions: vec![Action::Output(OutputPort::Flood)],
        };
        self.fabric.send(dpid, OfMessage::PacketOut(msg));
    }

    /// Install a forwarding rule for this flow, then re-emit the triggering packet through the
    /// freshly installed table so it is not dropped.
    fn install_fwd_rule(&mut self, dpid: Dpid, meta: &PacketMeta, dport: PortNo) {
        let mtch = Match {
            in_port: Some(meta.iport),
            dl_src: Some(meta.smac),
            dl_dst: Some(meta.dmac),
            dl_type: Some(meta.ethertype),
        };
        let msg = FlowMod {
            command: FlowModCommand::Add,
            mtch,
            actions: vec![Action::Output(OutputPort::Port(dport))],
            idle_timeout: ENTRY_TIMEOUT,
            priority: PRI_FWD,
        };
        self.fabric.send(dpid, OfMessage::FlowMod(msg));
        let msg = PacketOut {
            in_port: Some(meta.iport),
            frame: meta.frame.clone(),
            actions: vec![Action::Output(OutputPort::Table)],
        };
        self.fabric.send(dpid, OfMessage::PacketOut(msg));
    }

    /// Forward along the computed route if one exists, flood otherwise.
    fn handle_fwd(&mut self, dpid: Dpid, meta: &PacketMeta) {
        let dport = self.routes.get(&dpid).and_then(|t| t.get(meta.dmac));
        match dport {
            Some(dport) => {
                debug!("installing rule on {} towards {} via port {}", dpid, meta.dmac, dport);
                self.install_fwd_rule(dpid, meta, dport);
            }
            None => {
                debug!("no port for {} on {}, flooding", meta.dmac, dpid);
                self.flood(dpid, meta);
            }
        }
    }

    /// Answer an ARP request on behalf of the target host, using the synthetic address scheme.
    /// The reply goes back through the ingress port only; no flow is installed. A non-request
    /// ARP falls through to the forward path.
    fn handle_arp(&mut self, dpid: Dpid, meta: &PacketMeta) {
        let req = match &meta.frame.payload {
            EthPayload::Arp(a) if a.op == ArpOp::Request => a.clone(),
            _ => {
                debug!("ARP packet is not a request, forwarding");
                self.handle_fwd(dpid, meta);
                return;
            }
        };
        let dmac = host_ip_to_mac(req.target_ip);
        let reply = ArpPacket {
            op: ArpOp::Reply,
            sender_hw: dmac,
            sender_ip: req.target_ip,
            target_hw: req.sender_hw,
            target_ip: req.sender_ip,
        };
        let frame = EthFrame {
            src: dmac,
            dst: req.sender_hw,
            ethertype: ETH_TYPE_ARP,
            payload: EthPayload::Arp(reply),
        };
        debug!("switch {} answering ARP for {} with {}", dpid, req.target_ip, dmac);
        let msg = PacketOut {
            in_port: None,
            frame,
            actions: vec![Action::Output(OutputPort::Port(meta.iport))],
        };
        self.fabric.send(dpid, OfMessage::PacketOut(msg));
    }
}

/// The controller shell: a [`ControlPlane`] bound to one routing engine. Events enter through
/// the three `handle_*` methods and run to completion; the engine hooks are dispatched at the
/// points fixed by the pipeline.
#[derive(Debug)]
pub struct Controller<F: Fabric, E: RoutingEngine<F>> {
    plane: ControlPlane<F>,
    engine: E,
}

impl<F: Fabric, E: RoutingEngine<F>> Controller<F, E> {
    /// Create a controller over the given fabric, routing with the given engine.
    pub fn new(fabric: F, engine: E) -> Self {
        Self { plane: ControlPlane::new(fabric), engine }
    }

    /// The control plane state.
    pub fn plane(&self) -> &ControlPlane<F> {
        &self.plane
    }

    /// Mutable access to the control plane state.
    pub fn plane_mut(&mut self) -> &mut ControlPlane<F> {
        &mut self.plane
    }

    /// The routing engine.
    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// A switch connected: register its node and give it an empty forwarding table.
    pub fn handle_connection_up(&mut self, event: &ConnectionUp) {
        debug!("switch {} is coming up", event.dpid);
        self.plane.graph.register_node(event.dpid);
        self.plane.routes.insert(event.dpid, MacTable::new());
        self.engine.on_connection_up(&mut self.plane, event.dpid);
    }

    /// A link appeared or vanished: update the graph, mark it dirty, and keep the flood domain
    /// and the installed rules consistent with the new topology.
    pub fn handle_link_event(&mut self, event: &LinkEvent) {
        let l = event.link;
        debug!("link event: {:?} {}:{} <-> {}:{}", event.change, l.dpid1, l.port1, l.dpid2, l.port2);
        self.plane.graph.apply_link_event(event);
        self.plane.graph_updated = true;
        match event.change {
            LinkChange::Added => {
                // inter-switch ports must never take part in a flood, or a single ARP
                // request would circulate through the backbone forever
                self.plane.set_port_flood_mode(l.dpid1, l.port1, false);
                self.plane.set_port_flood_mode(l.dpid2, l.port2, false);
            }
            LinkChange::Removed => {
                self.plane.set_port_flood_mode(l.dpid1, l.port1, true);
                self.plane.set_port_flood_mode(l.dpid2, l.port2, true);
                self.plane.clear_rules_for_port(l.dpid1, l.port1);
                self.plane.clear_rules_for_port(l.dpid2, l.port2);
            }
        }
        self.engine.on_link_event(&mut self.plane, event);
    }

    /// The packet-in pipeline: drop IPv6, classify, run the engine's pre-routing hook, learn
    /// the source MAC of directly attached hosts, then answer ARP or forward.
    pub fn handle_packet_in(&mut self, event: &PacketIn) {
        if event.frame.ethertype == ETH_TYPE_IPV6 {
            return;
        }
        let dpid = event.dpid;
        if !self.plane.routes.contains_key(&dpid) {
            warn!("{}", ControllerError::UnknownSwitch(dpid));
            return;
        }
        let (meta, kind) = match parse_packet(event) {
            Ok(parsed) => parsed,
            Err(e) => {
                debug!("dropping packet from {}: {}", dpid, e);
                return;
            }
        };
        debug!(
            "packet in from switch {} port {}: {:?} {} -> {} ({} -> {})",
            dpid, meta.iport, kind, meta.smac, meta.dmac, meta.src_ip, meta.dst_ip
        );

        if !self.engine.on_packet_in_prerouting(&mut self.plane, &meta, kind) {
            return;
        }

        // learn the mapping for directly attached hosts only; inter-switch reachability comes
        // from the routing engine, not from learning
        let unknown_src = self
            .plane
            .routes
            .get(&dpid)
            .map(|t| t.get(meta.smac).is_none())
            .unwrap_or(false);
        if unknown_src && meta.smac != Mac::BROADCAST {
            if let Some(table) = self.plane.routes.get_mut(&dpid) {
                table.set(meta.smac, meta.iport);
            }
        }

        match kind {
            PacketKind::Arp => self.plane.handle_arp(dpid, &meta),
            PacketKind::Ipv4 => self.plane.handle_fwd(dpid, &meta),
        }

        self.engine.on_packet_in_postrouting(&mut self.plane, event);
    }
}

/// Classify a punted packet and extract the metadata the pipeline works with. Anything that is
/// neither ARP nor IPv4 is refused here and dropped by the caller.
fn parse_packet(event: &PacketIn) -> Result<(PacketMeta, PacketKind), ControllerError> {
    let frame = &event.frame;
    let (kind, src_ip, dst_ip) = match &frame.payload {
        EthPayload::Arp(a) => (PacketKind::Arp, a.sender_ip, a.target_ip),
        EthPayload::Ipv4(p) => (PacketKind::Ipv4, p.src, p.dst),
        EthPayload::Other => return Err(ControllerError::UnsupportedEtherType(frame.ethertype)),
    };
    Ok((
        PacketMeta {
            iport: event.port,
            smac: frame.src,
            dmac: frame.dst,
            src_ip,
            dst_ip,
            ethertype: frame.ethertype,
            frame: frame.clone(),
        },
        kind,
    ))
}
