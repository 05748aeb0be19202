//! Debug-info model and loader.
//!
//! `type_graph` and `unit` are pure data (C1/C2); `loader` builds them from an object
//! file's DWARF sections (C3); `eval` interprets a local's location descriptor (C5).

pub mod eval;
pub mod loader;
pub mod type_graph;
pub mod unit;

use crate::address::Address;
use unit::CompUnit;

pub type EndianRcSlice = gimli::EndianRcSlice<gimli::RunTimeEndian>;

/// The loaded debug-info model: an ordered set of compilation units (§3, "Info"). Built
/// once by the loader and immutable thereafter.
#[derive(Debug, Default)]
pub struct Info {
    pub units: Vec<CompUnit>,
}

impl Info {
    pub fn surrounding_comp_unit(&self, addr: Address) -> Option<&CompUnit> {
        self.units.iter().find(|u| u.contains(addr))
    }

    pub fn surrounding_function(&self, addr: Address) -> Option<&unit::Function> {
        self.surrounding_comp_unit(addr)
            .and_then(|u| u.surrounding_function(addr))
    }

    pub fn function_by_name(&self, name: &str) -> Option<&unit::Function> {
        self.units.iter().find_map(|u| u.function_by_name(name))
    }

    /// Greatest line address not exceeding `addr`, tie-broken by original order (§4.5).
    pub fn nearest_line(&self, func: &unit::Function, addr: Address) -> Option<unit::Line> {
        func.nearest_line(addr).copied()
    }
}
