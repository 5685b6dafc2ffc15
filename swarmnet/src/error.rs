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

//! Error types of the control plane

use crate::ofproto::Dpid;
use thiserror::Error;

/// Control-plane errors. Wire-level anomalies are recovered locally (the offending packet is
/// logged and dropped); none of these variants ever crashes the event loop.
#[derive(Error, Debug, PartialEq)]
pub enum ControllerError {
    /// The frame carries an ethertype the control plane does not handle (neither IPv4 nor ARP).
    #[error("unhandled ethertype 0x{0:04x}")]
    UnsupportedEtherType(u16),
    /// A packet arrived from a switch that never completed a connection handshake.
    #[error("switch {0} is not connected")]
    UnknownSwitch(Dpid),
}
