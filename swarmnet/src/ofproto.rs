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

//! # Southbound interface
//!
//! This module defines the narrow surface between the control plane and the OpenFlow
//! collaborator: the events the controller consumes (`ConnectionUp`, `LinkEvent`, `PacketIn`),
//! the messages it emits (`FlowMod`, `PacketOut`, `PortMod`), and the [`Fabric`] trait through
//! which messages reach the switches. The wire dialect itself (framing, handshake, echo) lives
//! outside this crate; packets arrive here already parsed.

use std::fmt;
use std::net::Ipv4Addr;

/// Datapath identifier, naming a switch. Stable for the switch's lifetime.
#[derive(PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Clone, Copy)]
pub struct Dpid(pub u64);

impl fmt::Display for Dpid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Ethernet hardware address.
#[derive(PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Clone, Copy)]
pub struct Mac(pub [u8; 6]);

impl Mac {
    /// The all-ones broadcast address.
    pub const BROADCAST: Mac = Mac([0xff; 6]);
}

impl fmt::Display for Mac {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            self.0[0], self.0[1], self.0[2], self.0[3], self.0[4], self.0[5]
        )
    }
}

/// Switch port number.
#[derive(PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Clone, Copy)]
pub struct PortNo(pub u16);

impl fmt::Display for PortNo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Ethertype of IPv4.
pub const ETH_TYPE_IPV4: u16 = 0x0800;
/// Ethertype of ARP.
pub const ETH_TYPE_ARP: u16 = 0x0806;
/// Ethertype of IPv6. Such packets are dropped without further processing.
pub const ETH_TYPE_IPV6: u16 = 0x86dd;

/// Port config bit disabling the port's participation in `Flood` output.
pub const PORT_NO_FLOOD: u32 = 1 << 4;

/// ARP operation code.
#[derive(PartialEq, Eq, Debug, Clone, Copy)]
pub enum ArpOp {
    /// Who-has request.
    Request,
    /// Is-at reply.
    Reply,
}

/// A parsed ARP packet.
#[derive(Debug, Clone, PartialEq)]
pub struct ArpPacket {
    /// Operation (request or reply).
    pub op: ArpOp,
    /// Sender hardware address.
    pub sender_hw: Mac,
    /// Sender protocol address.
    pub sender_ip: Ipv4Addr,
    /// Target hardware address.
    pub target_hw: Mac,
    /// Target protocol address.
    pub target_ip: Ipv4Addr,
}

/// The fields of an IPv4 header that the control plane reads.
#[derive(Debug, Clone, PartialEq)]
pub struct Ipv4Packet {
    /// Source address.
    pub src: Ipv4Addr,
    /// Destination address.
    pub dst: Ipv4Addr,
}

/// Payload of a parsed Ethernet frame.
#[derive(Debug, Clone, PartialEq)]
pub enum EthPayload {
    /// An ARP packet.
    Arp(ArpPacket),
    /// An IPv4 packet.
    Ipv4(Ipv4Packet),
    /// Anything the collaborator did not parse further.
    Other,
}

/// A parsed Ethernet frame, as surfaced by the OpenFlow collaborator.
#[derive(Debug, Clone, PartialEq)]
pub struct EthFrame {
    /// Source hardware address.
    pub src: Mac,
    /// Destination hardware address.
    pub dst: Mac,
    /// Effective ethertype of the innermost payload.
    pub ethertype: u16,
    /// Parsed payload.
    pub payload: EthPayload,
}

/// A switch completed its handshake with the controller.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionUp {
    /// The switch that connected.
    pub dpid: Dpid,
}

/// An inter-switch link, as reported by link discovery.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Link {
    /// First endpoint switch.
    pub dpid1: Dpid,
    /// Port on the first endpoint.
    pub port1: PortNo,
    /// Second endpoint switch.
    pub dpid2: Dpid,
    /// Port on the second endpoint.
    pub port2: PortNo,
}

/// Direction of a link-discovery event.
#[derive(PartialEq, Eq, Debug, Clone, Copy)]
pub enum LinkChange {
    /// The link came up.
    Added,
    /// The link went down.
    Removed,
}

/// A link appeared or vanished between two switches.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkEvent {
    /// Whether the link was added or removed.
    pub change: LinkChange,
    /// The affected link.
    pub link: Link,
}

/// A packet was punted to the controller.
#[derive(Debug, Clone, PartialEq)]
pub struct PacketIn {
    /// The switch that punted the packet.
    pub dpid: Dpid,
    /// The ingress port.
    pub port: PortNo,
    /// The parsed frame.
    pub frame: EthFrame,
}

/// Classification of a packet the control plane routes.
#[derive(PartialEq, Eq, Debug, Clone, Copy)]
pub enum PacketKind {
    /// Address resolution traffic, answered by the controller itself.
    Arp,
    /// Regular IPv4 traffic, forwarded along the computed routes.
    Ipv4,
}

/// Per-packet metadata handed to the routing hooks.
#[derive(Debug, Clone, PartialEq)]
pub struct PacketMeta {
    /// Ingress port on the punting switch.
    pub iport: PortNo,
    /// Source hardware address.
    pub smac: Mac,
    /// Destination hardware address.
    pub dmac: Mac,
    /// Source protocol address.
    pub src_ip: Ipv4Addr,
    /// Destination protocol address.
    pub dst_ip: Ipv4Addr,
    /// Effective ethertype.
    pub ethertype: u16,
    /// The frame itself, re-emitted on flood or table output.
    pub frame: EthFrame,
}

/// Flow match fields. An absent field is a wildcard. On a [`FlowModCommand::Delete`] the match
/// acts as a filter: an entry is deleted when it agrees with every field the filter pins.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Match {
    /// Ingress port.
    pub in_port: Option<PortNo>,
    /// Source hardware address.
    pub dl_src: Option<Mac>,
    /// Destination hardware address.
    pub dl_dst: Option<Mac>,
    /// Ethertype.
    pub dl_type: Option<u16>,
}

/// Target of an output action.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OutputPort {
    /// A concrete switch port.
    Port(PortNo),
    /// Re-run the packet through the switch's own flow table.
    Table,
    /// All ports except the ingress port and ports flagged [`PORT_NO_FLOOD`].
    Flood,
}

/// A flow action.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Action {
    /// Output the packet.
    Output(OutputPort),
}

/// Flow-mod command.
#[derive(PartialEq, Eq, Debug, Clone, Copy)]
pub enum FlowModCommand {
    /// Install an entry.
    Add,
    /// Delete all entries matching the filter.
    Delete,
}

/// A flow-table modification.
#[derive(Debug, Clone, PartialEq)]
pub struct FlowMod {
    /// Add or delete.
    pub command: FlowModCommand,
    /// Match fields (or delete filter).
    pub mtch: Match,
    /// Actions applied to matching packets.
    pub actions: Vec<Action>,
    /// Seconds of inactivity after which the switch reaps the entry.
    pub idle_timeout: u16,
    /// Entry priority.
    pub priority: u16,
}

impl FlowMod {
    /// A delete covering the entire flow table.
    pub fn delete_all() -> Self {
        Self {
            command: FlowModCommand::Delete,
            mtch: Match::default(),
            actions: Vec::new(),
            idle_timeout: 0,
            priority: 0,
        }
    }

    /// A delete covering all entries that agree with the given filter.
    pub fn delete_matching(mtch: Match) -> Self {
        Self {
            command: FlowModCommand::Delete,
            mtch,
            actions: Vec::new(),
            idle_timeout: 0,
            priority: 0,
        }
    }
}

/// A packet handed back to a switch for transmission.
#[derive(Debug, Clone, PartialEq)]
pub struct PacketOut {
    /// The port the packet originally arrived on, if any. Consulted by `Flood` output.
    pub in_port: Option<PortNo>,
    /// The frame to transmit.
    pub frame: EthFrame,
    /// Output actions.
    pub actions: Vec<Action>,
}

/// A port configuration change.
#[derive(Debug, Clone, PartialEq)]
pub struct PortMod {
    /// The port to reconfigure.
    pub port_no: PortNo,
    /// Hardware address of the port, read back from the connection.
    pub hw_addr: Mac,
    /// New values for the bits selected by `mask`.
    pub config: u32,
    /// Which config bits to touch.
    pub mask: u32,
}

/// Description of a physical switch port.
#[derive(Debug, Clone, PartialEq)]
pub struct PortDesc {
    /// Port number.
    pub port_no: PortNo,
    /// Hardware address.
    pub hw_addr: Mac,
    /// Current config bits.
    pub config: u32,
}

/// A message sent down a switch connection.
#[derive(Debug, Clone, PartialEq)]
pub enum OfMessage {
    /// Flow-table modification.
    FlowMod(FlowMod),
    /// Packet transmission.
    PacketOut(PacketOut),
    /// Port reconfiguration.
    PortMod(PortMod),
}

/// The controller's view of the connected switches. Implementations deliver messages to the
/// switches and answer port queries. A message to a vanished connection is silently dropped;
/// the control plane never treats a peer disconnect as fatal.
pub trait Fabric {
    /// Send a message to a switch. Dropped without error if the switch is not connected.
    fn send(&mut self, dpid: Dpid, msg: OfMessage);

    /// Look up a port descriptor on a connection. `None` if the connection or port vanished.
    fn port(&self, dpid: Dpid, port: PortNo) -> Option<PortDesc>;

    /// Enumerate the currently connected switches.
    fn connected_switches(&self) -> Vec<Dpid>;
}
