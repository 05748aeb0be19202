//! Compilation-unit-scoped data: functions, locals, line tables and the type arena they
//! all reference (C2).

use crate::address::Address;
use crate::dwarf::type_graph::{Edge, TypeArena};

/// Offset of a DIE within its compilation unit's `.debug_info` contribution. Used both as
/// the key placeholders carry during the loader's structural pass and as the identity a
/// type node's `die_offset` is matched against during resolution.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DieOffset(pub u64);

impl From<u64> for DieOffset {
    fn from(v: u64) -> Self {
        DieOffset(v)
    }
}

/// A DWARF location expression together with the base address a `bra`/`skip` offset or a
/// `push_object_address` operand resolves against, if any.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LocDesc {
    pub expr: Vec<u8>,
}

impl LocDesc {
    pub fn new(expr: Vec<u8>) -> Self {
        LocDesc { expr }
    }
}

#[derive(Clone, Debug)]
pub struct Local {
    pub name: String,
    pub locdesc: LocDesc,
    pub ty: Edge,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Line {
    pub number: u32,
    pub address: Address,
}

#[derive(Clone, Debug)]
pub struct Function {
    pub name: String,
    pub begin: Address,
    pub end: Address,
    /// Ascending by address; the first row a compiler emits for the prologue is dropped
    /// (§4.1, scenario S5) so `nearestLine` never reports the opening brace as "the call site".
    pub lines: Vec<Line>,
    pub locals: Vec<Local>,
}

impl Function {
    pub fn contains(&self, addr: Address) -> bool {
        addr >= self.begin && addr < self.end
    }

    /// Greatest line address not exceeding `addr`, or `None` if `addr` precedes every row.
    pub fn nearest_line(&self, addr: Address) -> Option<&Line> {
        self.lines.iter().rev().find(|l| l.address <= addr)
    }

    pub fn local(&self, name: &str) -> Option<&Local> {
        self.locals.iter().find(|l| l.name == name)
    }
}

#[derive(Debug)]
pub struct CompUnit {
    pub name: String,
    pub comp_dir: String,
    pub producer: String,
    pub begin: Address,
    pub end: Address,
    pub functions: Vec<Function>,
    pub types: TypeArena,
}

impl CompUnit {
    /// Inclusive range membership, matching the original loader's `[begin, end]` merge of
    /// `low_pc`/`high_pc` rather than the half-open convention `Function::contains` uses.
    pub fn contains(&self, addr: Address) -> bool {
        addr >= self.begin && addr <= self.end
    }

    pub fn surrounding_function(&self, addr: Address) -> Option<&Function> {
        self.functions.iter().find(|f| f.contains(addr))
    }

    pub fn function_by_name(&self, name: &str) -> Option<&Function> {
        self.functions.iter().find(|f| f.name == name)
    }
}
