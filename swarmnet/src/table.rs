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

//! Per-switch forwarding table

use crate::ofproto::{Mac, PortNo};
use std::collections::{HashMap, HashSet};

/// The forwarding decisions of a single switch: `mac -> port`, with a reverse `port -> {mac}`
/// index used to invalidate entries when a port goes down.
///
/// Invariant: a MAC appears in exactly one reverse set, the one for the port it maps to.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MacTable {
    mac_table: HashMap<Mac, PortNo>,
    reverse_map: HashMap<PortNo, HashSet<Mac>>,
}

impl MacTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Map `mac` to `port`. If the MAC was mapped to a different port before, its old reverse
    /// entry is dropped first.
    pub fn set(&mut self, mac: Mac, port: PortNo) {
        if let Some(old) = self.mac_table.insert(mac, port) {
            if old != port {
                self.drop_reverse(old, mac);
            }
        }
        self.reverse_map.entry(port).or_insert_with(HashSet::new).insert(mac);
    }

    /// The port `mac` maps to, if any.
    pub fn get(&self, mac: Mac) -> Option<PortNo> {
        self.mac_table.get(&mac).copied()
    }

    /// Forget `mac`. Removing an unknown MAC is silent.
    pub fn remove(&mut self, mac: Mac) {
        if let Some(port) = self.mac_table.remove(&mac) {
            self.drop_reverse(port, mac);
        }
    }

    /// All MACs currently mapped to `port`.
    pub fn macs_on_port(&self, port: PortNo) -> impl Iterator<Item = Mac> + '_ {
        self.reverse_map.get(&port).into_iter().flatten().copied()
    }

    /// Iterate over all entries.
    pub fn iter(&self) -> impl Iterator<Item = (Mac, PortNo)> + '_ {
        self.mac_table.iter().map(|(m, p)| (*m, *p))
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.mac_table.len()
    }

    /// True if the table holds no entry.
    pub fn is_empty(&self) -> bool {
        self.mac_table.is_empty()
    }

    /// Drop every entry.
    pub fn flush(&mut self) {
        self.mac_table.clear();
        self.reverse_map.clear();
    }

    fn drop_reverse(&mut self, port: PortNo, mac: Mac) {
        if let Some(set) = self.reverse_map.get_mut(&port) {
            set.remove(&mac);
            if set.is_empty() {
                self.reverse_map.remove(&port);
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use maplit::hashset;

    const M1: Mac = Mac([0x02, 0, 0, 0, 0xff, 1]);
    const M2: Mac = Mac([0x02, 0, 0, 0, 0xff, 2]);

    #[test]
    fn test_set_get() {
        let mut t = MacTable::new();
        assert_eq!(t.get(M1), None);
        t.set(M1, PortNo(3));
        assert_eq!(t.get(M1), Some(PortNo(3)));
        assert_eq!(t.macs_on_port(PortNo(3)).collect::<HashSet<_>>(), hashset![M1]);
    }

    #[test]
    fn test_remap_moves_reverse_entry() {
        let mut t = MacTable::new();
        t.set(M1, PortNo(3));
        t.set(M2, PortNo(3));
        t.set(M1, PortNo(5));
        assert_eq!(t.get(M1), Some(PortNo(5)));
        assert_eq!(t.macs_on_port(PortNo(3)).collect::<HashSet<_>>(), hashset![M2]);
        assert_eq!(t.macs_on_port(PortNo(5)).collect::<HashSet<_>>(), hashset![M1]);
    }

    #[test]
    fn test_remove_unknown_is_silent() {
        let mut t = MacTable::new();
        t.remove(M1);
        t.set(M1, PortNo(1));
        t.remove(M1);
        assert_eq!(t.get(M1), None);
        assert_eq!(t.macs_on_port(PortNo(1)).count(), 0);
    }

    #[test]
    fn test_flush() {
        let mut t = MacTable::new();
        t.set(M1, PortNo(1));
        t.set(M2, PortNo(2));
        t.flush();
        assert!(t.is_empty());
        assert_eq!(t.macs_on_port(PortNo(1)).count(), 0);
    }

    #[test]
    fn test_reverse_index_consistency() {
        // the reverse index must always equal {m : mac[m] == p}
        let mut t = MacTable::new();
        t.set(M1, PortNo(1));
        t.set(M2, PortNo(1));
        t.set(M1, PortNo(2));
        t.remove(M2);
        for (mac, port) in t.iter().collect::<Vec<_>>() {
            assert!(t.macs_on_port(port).any(|m| m == mac));
        }
        assert_eq!(t.macs_on_port(PortNo(1)).count() + t.macs_on_port(PortNo(2)).count(), t.len());
    }
}
