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

//! # Synthetic address scheme
//!
//! Switches and hosts share the locally-administered OUI `02:00:00:00:ff:00/40`; the last byte
//! is the switch dpid or the host byte of a `10.0.0.0/24` address. The deployment guarantees
//! that a host shares its byte with the dpid of the switch it hangs off, which lets the
//! controller synthesize the answer to any ARP request without flooding.

use crate::ofproto::{Dpid, Mac};
use std::net::Ipv4Addr;

/// The MAC assigned to a switch: `02:00:00:00:ff:<dpid low byte>`.
pub fn dpid_to_mac(dpid: Dpid) -> Mac {
    Mac([0x02, 0x00, 0x00, 0x00, 0xff, (dpid.0 & 0xff) as u8])
}

/// The MAC assigned to a host: `02:00:00:00:ff:<last address octet>`.
pub fn host_ip_to_mac(ip: Ipv4Addr) -> Mac {
    Mac([0x02, 0x00, 0x00, 0x00, 0xff, ip.octets()[3]])
}
