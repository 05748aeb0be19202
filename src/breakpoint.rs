//! Breakpoint data (§3 "Breakpoint"). Insert/hit/restore logic lives in [`crate::controller`];
//! this module only owns the set and the byte a trap overwrote.

use crate::address::Address;
use std::collections::BTreeMap;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Breakpoint {
    pub address: Address,
    pub func: String,
    pub line: u32,
    /// The byte originally at `address`, saved before a software trap (0xCC) replaced it.
    pub saved: u8,
}

/// Unordered set of breakpoints keyed by address; at most one breakpoint per address.
#[derive(Debug, Default)]
pub struct BreakpointTable {
    by_address: BTreeMap<u64, Breakpoint>,
}

impl BreakpointTable {
    pub fn insert(&mut self, bp: Breakpoint) {
        self.by_address.insert(bp.address.as_u64(), bp);
    }

    pub fn remove(&mut self, address: Address) -> Option<Breakpoint> {
        self.by_address.remove(&address.as_u64())
    }

    pub fn get(&self, address: Address) -> Option<&Breakpoint> {
        self.by_address.get(&address.as_u64())
    }

    pub fn is_empty(&self) -> bool {
        self.by_address.is_empty()
    }

    pub fn len(&self) -> usize {
        self.by_address.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Breakpoint> {
        self.by_address.values()
    }
}
