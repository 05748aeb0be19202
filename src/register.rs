//! Register file access.
//!
//! [`RegisterMap`] is a snapshot of the child's general-purpose registers taken through
//! `PTRACE_GETREGS`. [`DwarfRegisterMap`] re-indexes that snapshot by DWARF register
//! number so the location evaluator's (currently unused, but wired up) register family
//! and `readRtLoc`'s `REGISTER` region can resolve a number straight from a snapshot.

use crate::error::{Error, Result};
use nix::libc::user_regs_struct;
use nix::sys;
use nix::unistd::Pid;
use smallvec::{smallvec, SmallVec};
use strum_macros::Display;
use strum_macros::EnumString;

#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, EnumString, Display)]
#[strum(serialize_all = "snake_case")]
pub enum Register {
    Rax,
    Rbx,
    Rcx,
    Rdx,
    Rdi,
    Rsi,
    Rbp,
    Rsp,
    R8,
    R9,
    R10,
    R11,
    R12,
    R13,
    R14,
    R15,
    Rip,
    Eflags,
}

impl From<gimli::Register> for Register {
    fn from(value: gimli::Register) -> Self {
        match value.0 as i32 {
            -1 => Register::Rip,
            0 => Register::Rax,
            1 => Register::Rdx,
            2 => Register::Rcx,
            3 => Register::Rbx,
            4 => Register::Rsi,
            5 => Register::Rdi,
            6 => Register::Rbp,
            7 => Register::Rsp,
            8 => Register::R8,
            9 => Register::R9,
            10 => Register::R10,
            11 => Register::R11,
            12 => Register::R12,
            13 => Register::R13,
            14 => Register::R14,
            15 => Register::R15,
            49 => Register::Eflags,
            _ => Register::Rax,
        }
    }
}

/// Snapshot of the child's general-purpose registers.
pub struct RegisterMap {
    rax: u64,
    rbx: u64,
    rcx: u64,
    rdx: u64,
    rdi: u64,
    rsi: u64,
    rbp: u64,
    rsp: u64,
    r8: u64,
    r9: u64,
    r10: u64,
    r11: u64,
    r12: u64,
    r13: u64,
    r14: u64,
    r15: u64,
    rip: u64,
    eflags: u64,
}

impl From<user_regs_struct> for RegisterMap {
    fn from(v: user_regs_struct) -> Self {
        Self {
            rax: v.rax,
            rbx: v.rbx,
            rcx: v.rcx,
            rdx: v.rdx,
            rdi: v.rdi,
            rsi: v.rsi,
            rbp: v.rbp,
            rsp: v.rsp,
            r8: v.r8,
            r9: v.r9,
            r10: v.r10,
            r11: v.r11,
            r12: v.r12,
            r13: v.r13,
            r14: v.r14,
            r15: v.r15,
            rip: v.rip,
            eflags: v.eflags,
        }
    }
}

impl From<RegisterMap> for user_regs_struct {
    fn from(m: RegisterMap) -> user_regs_struct {
        // SAFETY: `user_regs_struct` is a plain-old-data struct of `u64`s; fields not
        // tracked by `RegisterMap` (segment registers, etc) are zeroed, which is safe
        // to write back since this crate never inspects them.
        let mut regs: user_regs_struct = unsafe { std::mem::zeroed() };
        regs.rax = m.rax;
        regs.rbx = m.rbx;
        regs.rcx = m.rcx;
        regs.rdx = m.rdx;
        regs.rdi = m.rdi;
        regs.rsi = m.rsi;
        regs.rbp = m.rbp;
        regs.rsp = m.rsp;
        regs.r8 = m.r8;
        regs.r9 = m.r9;
        regs.r10 = m.r10;
        regs.r11 = m.r11;
        regs.r12 = m.r12;
        regs.r13 = m.r13;
        regs.r14 = m.r14;
        regs.r15 = m.r15;
        regs.rip = m.rip;
        regs.eflags = m.eflags;
        regs
    }
}

impl RegisterMap {
    pub fn current(pid: Pid) -> Result<Self> {
        let regs = sys::ptrace::getregs(pid).map_err(Error::Ptrace)?;
        Ok(regs.into())
    }

    pub fn value(&self, register: impl Into<Register>) -> u64 {
        match register.into() {
            Register::Rax => self.rax,
            Register::Rbx => self.rbx,
            Register::Rcx => self.rcx,
            Register::Rdx => self.rdx,
            Register::Rdi => self.rdi,
            Register::Rsi => self.rsi,
            Register::Rbp => self.rbp,
            Register::Rsp => self.rsp,
            Register::R8 => self.r8,
            Register::R9 => self.r9,
            Register::R10 => self.r10,
            Register::R11 => self.r11,
            Register::R12 => self.r12,
            Register::R13 => self.r13,
            Register::R14 => self.r14,
            Register::R15 => self.r15,
            Register::Rip => self.rip,
            Register::Eflags => self.eflags,
        }
    }

    pub fn update(&mut self, register: impl Into<Register>, value: u64) {
        match register.into() {
            Register::Rax => self.rax = value,
            Register::Rbx => self.rbx = value,
            Register::Rcx => self.rcx = value,
            Register::Rdx => self.rdx = value,
            Register::Rdi => self.rdi = value,
            Register::Rsi => self.rsi = value,
            Register::Rbp => self.rbp = value,
            Register::Rsp => self.rsp = value,
            Register::R8 => self.r8 = value,
            Register::R9 => self.r9 = value,
            Register::R10 => self.r10 = value,
            Register::R11 => self.r11 = value,
            Register::R12 => self.r12 = value,
            Register::R13 => self.r13 = value,
            Register::R14 => self.r14 = value,
            Register::R15 => self.r15 = value,
            Register::Rip => self.rip = value,
            Register::Eflags => self.eflags = value,
        };
    }

    pub fn persist(self, pid: Pid) -> Result<()> {
        sys::ptrace::setregs(pid, self.into()).map_err(Error::Ptrace)
    }
}

/// Registers re-indexed by DWARF register number, for the `REGISTER` [`crate::dwarf::eval::RtLoc`]
/// region and the reserved `reg*`/`breg*` opcode families.
#[derive(Debug)]
pub struct DwarfRegisterMap(SmallVec<[Option<u64>; 0x20]>);

impl DwarfRegisterMap {
    pub fn value(&self, register: u16) -> Result<u64> {
        self.0
            .get(register as usize)
            .copied()
            .flatten()
            .ok_or(Error::EvalRegisterOutOfRange(register))
    }
}

impl From<&RegisterMap> for DwarfRegisterMap {
    fn from(map: &RegisterMap) -> Self {
        let mut dwarf_map = smallvec![None; 0x20];
        dwarf_map[0] = Some(map.rax);
        dwarf_map[1] = Some(map.rdx);
        dwarf_map[2] = Some(map.rcx);
        dwarf_map[3] = Some(map.rbx);
        dwarf_map[4] = Some(map.rsi);
        dwarf_map[5] = Some(map.rdi);
        dwarf_map[6] = Some(map.rbp);
        dwarf_map[7] = Some(map.rsp);
        dwarf_map[8] = Some(map.r8);
        dwarf_map[9] = Some(map.r9);
        dwarf_map[10] = Some(map.r10);
        dwarf_map[11] = Some(map.r11);
        dwarf_map[12] = Some(map.r12);
        dwarf_map[13] = Some(map.r13);
        dwarf_map[14] = Some(map.r14);
        dwarf_map[15] = Some(map.r15);
        DwarfRegisterMap(dwarf_map)
    }
}
