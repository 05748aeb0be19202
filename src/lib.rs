//! A source-level debugger for native x86-64 programs: attaches to a traced child,
//! loads its DWARF debug information, and exposes line-granular stepping, breakpoints,
//! stack unwinding, and typed inspection of locals and C-like expressions.

pub mod address;
pub mod breakpoint;
pub mod controller;
pub mod dwarf;
pub mod error;
pub mod expr;
pub mod process;
pub mod register;
pub mod trace;

use crate::address::Address;
use crate::breakpoint::BreakpointTable;
use crate::dwarf::Info;
use crate::error::Result;
use crate::trace::{PtraceControl, Status, TraceControl};
use nix::unistd::Pid;

/// Per-session root (§3 "Context"): owns the child's trace handle and the loaded Info.
///
/// Fields are public rather than hidden behind a `controller()` accessor: a
/// [`controller::Controller`] borrows `info`, `trace`, and `breakpoints` as three disjoint
/// fields, so callers build one with `Controller::new(&ctx.info, &ctx.trace, &mut
/// ctx.breakpoints)` wherever it's needed instead of routing through an owning wrapper.
pub struct Context {
    pub pid: Pid,
    pub trace: PtraceControl,
    pub info: Info,
    pub breakpoints: BreakpointTable,
}

impl Context {
    pub fn new(pid: Pid, info: Info) -> Self {
        Self {
            pid,
            trace: PtraceControl::new(pid),
            info,
            breakpoints: BreakpointTable::default(),
        }
    }

    pub fn last_status(&self) -> Status {
        self.trace.last_status()
    }

    pub fn controller(&mut self) -> controller::Controller<'_> {
        controller::Controller::new(&self.info, &self.trace, &mut self.breakpoints)
    }

    pub fn read_ip(&self) -> Result<Address> {
        self.trace.read_ip()
    }
}
