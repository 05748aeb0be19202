//! Trace-control primitives (C4).
//!
//! The contract is expressed as a trait rather than free functions over a raw pid so the
//! controller (C6) can be driven against a real `ptrace`-backed child in production and
//! against a deterministic in-memory fake in tests — the scenarios in the spec's §8
//! (S1, S4, breakpoint invariant 4) never need a compiled fixture or a live traced
//! process to exercise the controller's state machine.
//!
//! All operations require the child to be stopped; callers must call [`TraceControl::sync_status`]
//! after every [`TraceControl::cont`]/[`TraceControl::step_instruction`] before invoking anything
//! else (§5, "Ordering").

use crate::address::Address;
use crate::error::{Error, Result};
use crate::register::RegisterMap;
use nix::libc::c_void;
use nix::sys;
use nix::sys::ptrace::AddressType;
use nix::sys::signal::Signal;
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::Pid;
use std::cell::Cell;
use std::mem;

/// The traced child's last-observed status, as recorded by `syncStatus`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Status {
    /// The process has not yet been synced.
    Unknown,
    Stopped(Signal),
    Exited(i32),
    Signaled(Signal),
}

impl Status {
    pub fn is_stopped(self) -> bool {
        matches!(self, Status::Stopped(_))
    }

    pub fn is_alive(self) -> bool {
        matches!(self, Status::Stopped(_) | Status::Unknown)
    }
}

impl From<WaitStatus> for Status {
    fn from(ws: WaitStatus) -> Self {
        match ws {
            WaitStatus::Exited(_, code) => Status::Exited(code),
            WaitStatus::Signaled(_, sig, _) => Status::Signaled(sig),
            WaitStatus::Stopped(_, sig) => Status::Stopped(sig),
            WaitStatus::PtraceEvent(_, sig, _) => Status::Stopped(sig),
            _ => Status::Stopped(Signal::SIGTRAP),
        }
    }
}

/// Contract for driving a traced child (C4).
pub trait TraceControl {
    /// Blocks until the child's status changes; records it as `last_status`.
    fn sync_status(&self) -> Result<Status>;
    fn last_status(&self) -> Status;

    /// Reads exactly `len` bytes starting at `addr`.
    fn read_memory(&self, addr: Address, len: usize) -> Result<Vec<u8>>;
    /// Writes `data` starting at `addr`.
    fn write_memory(&self, addr: Address, data: &[u8]) -> Result<()>;

    fn read_ip(&self) -> Result<Address>;
    fn read_bp(&self) -> Result<Address>;
    fn set_ip(&self, addr: Address) -> Result<()>;

    /// Reads the register identified by its DWARF register number.
    fn read_dwarf_register(&self, num: u16) -> Result<u64>;

    /// Requests a single-instruction step without blocking; pair with `sync_status`.
    fn step_instruction(&self) -> Result<()>;
    fn cont(&self) -> Result<()>;
    fn kill(&self) -> Result<()>;
}

/// Real implementation over Linux `ptrace(2)`/`waitpid(2)`.
pub struct PtraceControl {
    pid: Pid,
    status: Cell<Status>,
}

impl PtraceControl {
    pub fn new(pid: Pid) -> Self {
        Self {
            pid,
            status: Cell::new(Status::Unknown),
        }
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }
}

impl TraceControl for PtraceControl {
    fn sync_status(&self) -> Result<Status> {
        let ws = waitpid(self.pid, None).map_err(Error::Waitpid)?;
        let status = Status::from(ws);
        self.status.set(status);
        Ok(status)
    }

    fn last_status(&self) -> Status {
        self.status.get()
    }

    fn read_memory(&self, addr: Address, len: usize) -> Result<Vec<u8>> {
        let word_size = mem::size_of::<i64>();
        let mut out = vec![0u8; len];
        let mut i = 0;
        while i < len {
            let word = sys::ptrace::read(self.pid, (addr + i as u64).as_u64() as AddressType)
                .map_err(Error::Ptrace)?;
            let bytes = (word as u64).to_ne_bytes();
            let n = word_size.min(len - i);
            out[i..i + n].copy_from_slice(&bytes[..n]);
            i += word_size;
        }
        Ok(out)
    }

    fn write_memory(&self, addr: Address, data: &[u8]) -> Result<()> {
        let word_size = mem::size_of::<i64>();
        let mut i = 0;
        while i < data.len() {
            let remaining = data.len() - i;
            let word_addr = (addr + i as u64).as_u64() as AddressType;
            let word = if remaining >= word_size {
                let mut bytes = [0u8; 8];
                bytes.copy_from_slice(&data[i..i + word_size]);
                i64::from_ne_bytes(bytes)
            } else {
                // partial trailing word: read-modify-write so untouched bytes survive.
                let existing = sys::ptrace::read(self.pid, word_addr).map_err(Error::Ptrace)?;
                let mut bytes = (existing as u64).to_ne_bytes();
                bytes[..remaining].copy_from_slice(&data[i..]);
                i64::from_ne_bytes(bytes)
            };
            unsafe {
                sys::ptrace::write(self.pid, word_addr, word as *mut c_void).map_err(Error::Ptrace)?;
            }
            i += word_size;
        }
        Ok(())
    }

    fn read_ip(&self) -> Result<Address> {
        Ok(Address::from(RegisterMap::current(self.pid)?.value(crate::register::Register::Rip)))
    }

    fn read_bp(&self) -> Result<Address> {
        Ok(Address::from(RegisterMap::current(self.pid)?.value(crate::register::Register::Rbp)))
    }

    fn set_ip(&self, addr: Address) -> Result<()> {
        let mut regs = RegisterMap::current(self.pid)?;
        regs.update(crate::register::Register::Rip, addr.as_u64());
        regs.persist(self.pid)
    }

    fn read_dwarf_register(&self, num: u16) -> Result<u64> {
        let regs = RegisterMap::current(self.pid)?;
        crate::register::DwarfRegisterMap::from(&regs).value(num)
    }

    fn step_instruction(&self) -> Result<()> {
        sys::ptrace::step(self.pid, None).map_err(Error::Ptrace)
    }

    fn cont(&self) -> Result<()> {
        sys::ptrace::cont(self.pid, None).map_err(Error::Ptrace)
    }

    fn kill(&self) -> Result<()> {
        sys::ptrace::kill(self.pid).map_err(Error::Ptrace)
    }
}

#[cfg(test)]
pub mod fake {
    //! A deterministic in-memory [`TraceControl`] fake: a byte-addressable memory map, a
    //! register file, and a scripted list of "what happens after the next resume" used to
    //! drive the controller's state machine without an actual traced process.
    use super::*;
    use std::cell::RefCell;
    use std::collections::{BTreeMap, VecDeque};

    pub struct FakeTrace {
        pub memory: RefCell<BTreeMap<u64, u8>>,
        pub ip: Cell<u64>,
        pub bp: Cell<u64>,
        pub status: Cell<Status>,
        /// IPs to visit, in order, each time `step_instruction`+`sync_status` runs.
        pub script: RefCell<VecDeque<(u64, u64)>>, // (ip, bp) pairs
    }

    impl FakeTrace {
        pub fn new() -> Self {
            Self {
                memory: RefCell::new(BTreeMap::new()),
                ip: Cell::new(0),
                bp: Cell::new(0),
                status: Cell::new(Status::Stopped(Signal::SIGTRAP)),
                script: RefCell::new(VecDeque::new()),
            }
        }

        pub fn set_memory(&self, addr: u64, bytes: &[u8]) {
            let mut mem = self.memory.borrow_mut();
            for (i, b) in bytes.iter().enumerate() {
                mem.insert(addr + i as u64, *b);
            }
        }
    }

    impl TraceControl for FakeTrace {
        fn sync_status(&self) -> Result<Status> {
            Ok(self.status.get())
        }

        fn last_status(&self) -> Status {
            self.status.get()
        }

        fn read_memory(&self, addr: Address, len: usize) -> Result<Vec<u8>> {
            let mem = self.memory.borrow();
            Ok((0..len)
                .map(|i| *mem.get(&(addr.as_u64() + i as u64)).unwrap_or(&0))
                .collect())
        }

        fn write_memory(&self, addr: Address, data: &[u8]) -> Result<()> {
            let mut mem = self.memory.borrow_mut();
            for (i, b) in data.iter().enumerate() {
                mem.insert(addr.as_u64() + i as u64, *b);
            }
            Ok(())
        }

        fn read_ip(&self) -> Result<Address> {
            Ok(Address::from(self.ip.get()))
        }

        fn read_bp(&self) -> Result<Address> {
            Ok(Address::from(self.bp.get()))
        }

        fn set_ip(&self, addr: Address) -> Result<()> {
            self.ip.set(addr.as_u64());
            Ok(())
        }

        fn read_dwarf_register(&self, _num: u16) -> Result<u64> {
            Ok(0)
        }

        fn step_instruction(&self) -> Result<()> {
            if let Some((ip, bp)) = self.script.borrow_mut().pop_front() {
                self.ip.set(ip);
                self.bp.set(bp);
            } else {
                self.status.set(Status::Exited(0));
            }
            Ok(())
        }

        fn cont(&self) -> Result<()> {
            Ok(())
        }

        fn kill(&self) -> Result<()> {
            self.status.set(Status::Exited(0));
            Ok(())
        }
    }
}
