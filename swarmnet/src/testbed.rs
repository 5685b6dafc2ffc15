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

//! # In-process switch fabric
//!
//! An emulated fabric for tests and the churn harness: switches with port tables and
//! OpenFlow-style flow tables, host attachments, inter-switch wires, and a small data plane
//! that carries frames through the installed rules, punting to the controller on a table miss
//! exactly as a real switch would. Every message the controller emits is also kept in a
//! per-switch log so tests can assert on the exact southbound traffic.

use crate::addr::dpid_to_mac;
use crate::controller::Controller;
use crate::engine::RoutingEngine;
use crate::ofproto::{
    Action, ArpOp, ArpPacket, Dpid, EthFrame, EthPayload, Fabric, FlowModCommand, Ipv4Packet,
    Link, LinkChange, LinkEvent, Mac, Match, OfMessage, OutputPort, PacketIn, PortDesc, PortNo,
    ETH_TYPE_ARP, ETH_TYPE_IPV4, PORT_NO_FLOOD,
};

use log::*;
use std::collections::{BTreeMap, VecDeque};
use std::net::Ipv4Addr;

/// The port every host hangs off, mirroring the emulated topology where the host link is the
/// first one added to its switch.
pub const HOST_PORT: PortNo = PortNo(1);

/// Frames the data plane gives up on after this many switch traversals.
const HOP_LIMIT: usize = 1000;

/// An installed flow-table entry.
#[derive(Debug, Clone, PartialEq)]
pub struct FlowEntry {
    /// Match fields.
    pub mtch: Match,
    /// Actions applied on a match.
    pub actions: Vec<Action>,
    /// Entry priority; higher wins.
    pub priority: u16,
}

/// A host attached to a switch port.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Host {
    /// The host's hardware address.
    pub mac: Mac,
    /// The host's protocol address.
    pub ip: Ipv4Addr,
}

#[derive(Debug, Default)]
struct TestSwitch {
    ports: BTreeMap<PortNo, PortDesc>,
    flows: Vec<FlowEntry>,
    sent: Vec<OfMessage>,
}

#[derive(Debug, Clone, Copy)]
struct Wire {
    peer: (Dpid, PortNo),
    up: bool,
}

/// The emulated fabric. Implements [`Fabric`], so a
/// [`Controller`](crate::controller::Controller) can drive it directly.
#[derive(Debug, Default)]
pub struct TestFabric {
    switches: BTreeMap<Dpid, TestSwitch>,
    wires: BTreeMap<(Dpid, PortNo), Wire>,
    hosts: BTreeMap<(Dpid, PortNo), Host>,
    pending_outs: VecDeque<(Dpid, crate::ofproto::PacketOut)>,
}

impl TestFabric {
    /// Create an empty fabric.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a switch with ports `1..=ports`.
    pub fn add_switch(&mut self, dpid: Dpid, ports: u16) {
        let mut switch = TestSwitch::default();
        for p in 1..=ports {
            let hw_addr =
                Mac([0x06, 0x00, (dpid.0 >> 8) as u8, (dpid.0 & 0xff) as u8, 0x00, p as u8]);
            switch
                .ports
                .insert(PortNo(p), PortDesc { port_no: PortNo(p), hw_addr, config: 0 });
        }
        self.switches.insert(dpid, switch);
    }

    /// Add a switch with ports `1..=ports` and a host `10.0.0.<dpid>` with the matching
    /// synthetic MAC attached to port 1.
    pub fn add_switch_with_host(&mut self, dpid: Dpid, ports: u16) {
        self.add_switch(dpid, ports);
        let host = Host {
            mac: dpid_to_mac(dpid),
            ip: Ipv4Addr::new(10, 0, 0, (dpid.0 & 0xff) as u8),
        };
        self.hosts.insert((dpid, HOST_PORT), host);
    }

    /// Lay a cable between two switch ports. The wire starts out down; use
    /// [`bring_link_up`] to activate it and inform the controller.
    pub fn wire(&mut self, a: Dpid, pa: PortNo, b: Dpid, pb: PortNo) {
        self.wires.insert((a, pa), Wire { peer: (b, pb), up: false });
        self.wires.insert((b, pb), Wire { peer: (a, pa), up: false });
    }

    /// Set the carrier state of a wire. Unknown wires are ignored.
    pub fn set_wire_state(&mut self, a: Dpid, pa: PortNo, up: bool) {
        let peer = match self.wires.get_mut(&(a, pa)) {
            Some(wire) => {
                wire.up = up;
                wire.peer
            }
            None => return,
        };
        if let Some(wire) = self.wires.get_mut(&peer) {
            wire.up = up;
        }
    }

    /// The host attached to a switch port, if any.
    pub fn host_at(&self, dpid: Dpid, port: PortNo) -> Option<Host> {
        self.hosts.get(&(dpid, port)).copied()
    }

    /// The installed flow entries of a switch.
    pub fn flows(&self, dpid: Dpid) -> &[FlowEntry] {
        self.switches.get(&dpid).map(|s| s.flows.as_slice()).unwrap_or(&[])
    }

    /// Every message the controller sent to a switch, in order.
    pub fn sent(&self, dpid: Dpid) -> &[OfMessage] {
        self.switches.get(&dpid).map(|s| s.sent.as_slice()).unwrap_or(&[])
    }

    /// Forget the message logs of every switch.
    pub fn clear_sent(&mut self) {
        for switch in self.switches.values_mut() {
            switch.sent.clear();
        }
    }

    /// The highest-priority flow entry matching a frame on its ingress port.
    pub fn lookup(&self, dpid: Dpid, in_port: PortNo, frame: &EthFrame) -> Option<FlowEntry> {
        let switch = self.switches.get(&dpid)?;
        switch
            .flows
            .iter()
            .filter(|entry| frame_matches(&entry.mtch, in_port, frame))
            .max_by_key(|entry| entry.priority)
            .cloned()
    }

    fn ports(&self, dpid: Dpid) -> impl Iterator<Item = (PortNo, &PortDesc)> {
        self.switches.get(&dpid).into_iter().flat_map(|s| s.ports.iter().map(|(p, d)| (*p, d)))
    }

    fn wire_peer_if_up(&self, dpid: Dpid, port: PortNo) -> Option<(Dpid, PortNo)> {
        self.wires.get(&(dpid, port)).filter(|w| w.up).map(|w| w.peer)
    }

    fn take_packet_outs(&mut self) -> Vec<(Dpid, crate::ofproto::PacketOut)> {
        self.pending_outs.drain(..).collect()
    }
}

impl Fabric for TestFabric {
    fn send(&mut self, dpid: Dpid, msg: OfMessage) {
        let switch = match self.switches.get_mut(&dpid) {
            Some(switch) => switch,
            None => return,
        };
        switch.sent.push(msg.clone());
        match msg {
            OfMessage::FlowMod(fm) => match fm.command {
                FlowModCommand::Add => switch.flows.push(FlowEntry {
                    mtch: fm.mtch,
                    actions: fm.actions,
                    priority: fm.priority,
                }),
                FlowModCommand::Delete => {
                    switch.flows.retain(|entry| !entry_covered_by(&entry.mtch, &fm.mtch))
                }
            },
            OfMessage::PacketOut(po) => self.pending_outs.push_back((dpid, po)),
            OfMessage::PortMod(pm) => {
                if let Some(desc) = switch.ports.get_mut(&pm.port_no) {
                    desc.config = (desc.config & !pm.mask) | (pm.config & pm.mask);
                }
            }
        }
    }

    fn port(&self, dpid: Dpid, port: PortNo) -> Option<PortDesc> {
        self.switches.get(&dpid).and_then(|s| s.ports.get(&port)).cloned()
    }

    fn connected_switches(&self) -> Vec<Dpid> {
        self.switches.keys().copied().collect()
    }
}

/// True if a frame on `in_port` matches the given fields.
fn frame_matches(mtch: &Match, in_port: PortNo, frame: &EthFrame) -> bool {
    mtch.in_port.map(|p| p == in_port).unwrap_or(true)
        && mtch.dl_src.map(|m| m == frame.src).unwrap_or(true)
        && mtch.dl_dst.map(|m| m == frame.dst).unwrap_or(true)
        && mtch.dl_type.map(|t| t == frame.ethertype).unwrap_or(true)
}

/// Delete semantics: an entry is covered when it agrees with every field the filter pins.
fn entry_covered_by(entry: &Match, filter: &Match) -> bool {
    filter.in_port.map(|p| entry.in_port == Some(p)).unwrap_or(true)
        && filter.dl_src.map(|m| entry.dl_src == Some(m)).unwrap_or(true)
        && filter.dl_dst.map(|m| entry.dl_dst == Some(m)).unwrap_or(true)
        && filter.dl_type.map(|t| entry.dl_type == Some(t)).unwrap_or(true)
}

/// A frame that reached a host.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    /// The switch the host hangs off.
    pub dpid: Dpid,
    /// The port the frame left through.
    pub port: PortNo,
    /// The delivered frame.
    pub frame: EthFrame,
}

/// Feed a frame into the fabric at a switch port and carry it until it settles, punting to the
/// controller wherever a flow table misses. Returns every frame that reached a host.
pub fn inject<E: RoutingEngine<TestFabric>>(
    ctrl: &mut Controller<TestFabric, E>,
    dpid: Dpid,
    port: PortNo,
    frame: EthFrame,
) -> Vec<Delivery> {
    let mut deliveries = Vec::new();
    let mut queue: VecDeque<(Dpid, PortNo, EthFrame)> = VecDeque::new();
    queue.push_back((dpid, port, frame));
    let mut budget = HOP_LIMIT;
    while let Some((sw, in_port, frame)) = queue.pop_front() {
        if budget == 0 {
            warn!("hop budget exhausted, dropping in-flight frames");
            break;
        }
        budget -= 1;
        match ctrl.plane().fabric().lookup(sw, in_port, &frame) {
            Some(entry) => apply_actions(
                ctrl.plane().fabric(),
                sw,
                Some(in_port),
                &frame,
                &entry.actions,
                &mut queue,
                &mut deliveries,
            ),
            None => {
                ctrl.handle_packet_in(&PacketIn { dpid: sw, port: in_port, frame });
                let outs = ctrl.plane_mut().fabric_mut().take_packet_outs();
                for (out_dpid, out) in outs {
                    apply_actions(
                        ctrl.plane().fabric(),
                        out_dpid,
                        out.in_port,
                        &out.frame,
                        &out.actions,
                        &mut queue,
                        &mut deliveries,
                    );
                }
            }
        }
    }
    deliveries
}

fn apply_actions(
    fabric: &TestFabric,
    sw: Dpid,
    in_port: Option<PortNo>,
    frame: &EthFrame,
    actions: &[Action],
    queue: &mut VecDeque<(Dpid, PortNo, EthFrame)>,
    deliveries: &mut Vec<Delivery>,
) {
    for action in actions {
        let Action::Output(target) = action;
        match target {
            OutputPort::Port(port) => emit(fabric, sw, *port, frame, queue, deliveries),
            OutputPort::Flood => {
                for (port, desc) in fabric.ports(sw) {
                    if Some(port) == in_port || desc.config & PORT_NO_FLOOD != 0 {
                        continue;
                    }
                    emit(fabric, sw, port, frame, queue, deliveries);
                }
            }
            OutputPort::Table => {
                // re-match against the (freshly updated) flow table; a miss here drops the
                // frame instead of ping-ponging with the controller
                if let Some(in_port) = in_port {
                    if let Some(entry) = fabric.lookup(sw, in_port, frame) {
                        apply_actions(
                            fabric,
                            sw,
                            Some(in_port),
                            frame,
                            &entry.actions,
                            queue,
                            deliveries,
                        );
                    }
                }
            }
        }
    }
}

fn emit(
    fabric: &TestFabric,
    sw: Dpid,
    port: PortNo,
    frame: &EthFrame,
    queue: &mut VecDeque<(Dpid, PortNo, EthFrame)>,
    deliveries: &mut Vec<Delivery>,
) {
    if fabric.host_at(sw, port).is_some() {
        deliveries.push(Delivery { dpid: sw, port, frame: frame.clone() });
    } else if let Some((peer, peer_port)) = fabric.wire_peer_if_up(sw, port) {
        queue.push_back((peer, peer_port, frame.clone()));
    }
}

/// Activate a wire and report the link to the controller, as link discovery would.
pub fn bring_link_up<E: RoutingEngine<TestFabric>>(
    ctrl: &mut Controller<TestFabric, E>,
    a: Dpid,
    pa: PortNo,
    b: Dpid,
    pb: PortNo,
) {
    ctrl.plane_mut().fabric_mut().set_wire_state(a, pa, true);
    ctrl.handle_link_event(&LinkEvent {
        change: LinkChange::Added,
        link: Link { dpid1: a, port1: pa, dpid2: b, port2: pb },
    });
}

/// Deactivate a wire and report the loss to the controller.
pub fn take_link_down<E: RoutingEngine<TestFabric>>(
    ctrl: &mut Controller<TestFabric, E>,
    a: Dpid,
    pa: PortNo,
    b: Dpid,
    pb: PortNo,
) {
    ctrl.plane_mut().fabric_mut().set_wire_state(a, pa, false);
    ctrl.handle_link_event(&LinkEvent {
        change: LinkChange::Removed,
        link: Link { dpid1: a, port1: pa, dpid2: b, port2: pb },
    });
}

/// Emulate one echo exchange between the hosts of two switches: resolve the destination MAC
/// via ARP, send the request, and send the reply back. True if all three legs arrived.
pub fn ping<E: RoutingEngine<TestFabric>>(
    ctrl: &mut Controller<TestFabric, E>,
    src: Dpid,
    dst: Dpid,
) -> bool {
    let (src_host, dst_host) = {
        let fabric = ctrl.plane().fabric();
        match (fabric.host_at(src, HOST_PORT), fabric.host_at(dst, HOST_PORT)) {
            (Some(s), Some(d)) => (s, d),
            _ => return false,
        }
    };

    // resolve the destination: the controller answers on behalf of the target
    let request = EthFrame {
        src: src_host.mac,
        dst: Mac::BROADCAST,
        ethertype: ETH_TYPE_ARP,
        payload: EthPayload::Arp(ArpPacket {
            op: ArpOp::Request,
            sender_hw: src_host.mac,
            sender_ip: src_host.ip,
            target_hw: Mac([0; 6]),
            target_ip: dst_host.ip,
        }),
    };
    let deliveries = inject(ctrl, src, HOST_PORT, request);
    let dst_mac = deliveries.iter().find_map(|d| {
        if d.dpid != src || d.port != HOST_PORT {
            return None;
        }
        match &d.frame.payload {
            EthPayload::Arp(a) if a.op == ArpOp::Reply && a.sender_ip == dst_host.ip => {
                Some(a.sender_hw)
            }
            _ => None,
        }
    });
    let dst_mac = match dst_mac {
        Some(mac) => mac,
        None => return false,
    };

    // echo request
    let request = EthFrame {
        src: src_host.mac,
        dst: dst_mac,
        ethertype: ETH_TYPE_IPV4,
        payload: EthPayload::Ipv4(Ipv4Packet { src: src_host.ip, dst: dst_host.ip }),
    };
    let deliveries = inject(ctrl, src, HOST_PORT, request);
    if !deliveries.iter().any(|d| d.dpid == dst && d.port == HOST_PORT) {
        return false;
    }

    // echo reply
    let reply = EthFrame {
        src: dst_host.mac,
        dst: src_host.mac,
        ethertype: ETH_TYPE_IPV4,
        payload: EthPayload::Ipv4(Ipv4Packet { src: dst_host.ip, dst: src_host.ip }),
    };
    let deliveries = inject(ctrl, dst, HOST_PORT, reply);
    deliveries.iter().any(|d| d.dpid == src && d.port == HOST_PORT)
}

#[cfg(test)]
mod test {
    use super::*;

    fn frame(src: Mac, dst: Mac) -> EthFrame {
        EthFrame {
            src,
            dst,
            ethertype: ETH_TYPE_IPV4,
            payload: EthPayload::Ipv4(Ipv4Packet {
                src: Ipv4Addr::new(10, 0, 0, 1),
                dst: Ipv4Addr::new(10, 0, 0, 2),
            }),
        }
    }

    #[test]
    fn test_flow_add_and_wildcard_delete() {
        let mut fabric = TestFabric::new();
        fabric.add_switch(Dpid(1), 3);
        let m1 = Mac([0x02, 0, 0, 0, 0xff, 1]);
        let m2 = Mac([0x02, 0, 0, 0, 0xff, 2]);
        fabric.send(
            Dpid(1),
            OfMessage::FlowMod(crate::ofproto::FlowMod {
                command: FlowModCommand::Add,
                mtch: Match {
                    in_port: Some(PortNo(1)),
                    dl_src: Some(m1),
                    dl_dst: Some(m2),
                    dl_type: Some(ETH_TYPE_IPV4),
                },
                actions: vec![Action::Output(OutputPort::Port(PortNo(2)))],
                idle_timeout: 120,
                priority: 1,
            }),
        );
        assert_eq!(fabric.flows(Dpid(1)).len(), 1);
        assert!(fabric.lookup(Dpid(1), PortNo(1), &frame(m1, m2)).is_some());
        // wrong ingress port misses
        assert!(fabric.lookup(Dpid(1), PortNo(3), &frame(m1, m2)).is_none());

        // a delete filtering on dl_dst removes the entry
        fabric.send(
            Dpid(1),
            OfMessage::FlowMod(crate::ofproto::FlowMod::delete_matching(Match {
                dl_dst: Some(m2),
                ..Match::default()
            })),
        );
        assert!(fabric.flows(Dpid(1)).is_empty());
    }

    #[test]
    fn test_port_mod_flood_bit() {
        let mut fabric = TestFabric::new();
        fabric.add_switch(Dpid(1), 2);
        let desc = fabric.port(Dpid(1), PortNo(2)).unwrap();
        fabric.send(
            Dpid(1),
            OfMessage::PortMod(crate::ofproto::PortMod {
                port_no: PortNo(2),
                hw_addr: desc.hw_addr,
                config: PORT_NO_FLOOD,
                mask: PORT_NO_FLOOD,
            }),
        );
        assert_ne!(fabric.port(Dpid(1), PortNo(2)).unwrap().config & PORT_NO_FLOOD, 0);
    }

    #[test]
    fn test_send_to_vanished_switch_is_silent() {
        let mut fabric = TestFabric::new();
        fabric.send(Dpid(9), OfMessage::FlowMod(crate::ofproto::FlowMod::delete_all()));
        assert!(fabric.port(Dpid(9), PortNo(1)).is_none());
    }
}
