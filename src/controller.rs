//! Execution controller (C6): breakpoint insert/hit, source-line step/next, stack
//! unwind, and the lookup services C6/C7 share. All operations require the child to be
//! stopped (§5 "Ordering") and drive a [`TraceControl`] rather than `ptrace` directly, so
//! the whole state machine is testable against [`crate::trace::fake::FakeTrace`].

use crate::address::Address;
use crate::breakpoint::{Breakpoint, BreakpointTable};
use crate::dwarf::unit::{CompUnit, Function, Line};
use crate::dwarf::Info;
use crate::error::Result;
use crate::trace::TraceControl;
use log::debug;

pub struct Controller<'a> {
    pub info: &'a Info,
    pub trace: &'a dyn TraceControl,
    pub breakpoints: &'a mut BreakpointTable,
}

impl<'a> Controller<'a> {
    pub fn new(info: &'a Info, trace: &'a dyn TraceControl, breakpoints: &'a mut BreakpointTable) -> Self {
        Self {
            info,
            trace,
            breakpoints,
        }
    }

    pub fn surrounding_comp_unit(&self, addr: Address) -> Option<&CompUnit> {
        self.info.surrounding_comp_unit(addr)
    }

    pub fn surrounding_function(&self, addr: Address) -> Option<&Function> {
        self.info.surrounding_function(addr)
    }

    pub fn function_by_name(&self, name: &str) -> Option<&Function> {
        self.info.function_by_name(name)
    }

    pub fn nearest_line(&self, func: &Function, addr: Address) -> Option<Line> {
        self.info.nearest_line(func, addr)
    }

    /// Read one byte at `addr`, save it, write the software trap (0xCC) in its place
    /// (§4.5). `func`/`line` are carried for display only.
    pub fn insert_breakpoint(&mut self, addr: Address, func: impl Into<String>, line: u32) -> Result<()> {
        let saved = self.trace.read_memory(addr, 1)?[0];
        self.trace.write_memory(addr, &[0xCC])?;
        self.breakpoints.insert(Breakpoint {
            address: addr,
            func: func.into(),
            line,
            saved,
        });
        debug!("breakpoint inserted at {addr}");
        Ok(())
    }

    /// Called every time `syncStatus` observes a stop: if the trap byte just executed
    /// belongs to a tracked breakpoint, consume it (remove from the set, restore the
    /// saved byte, rewind IP onto it) so the child is left exactly as it would have been
    /// without the trap. Single-shot: a caller wanting a sticky breakpoint re-inserts.
    pub fn handle_breakpoint_hit(&mut self) -> Result<Option<Breakpoint>> {
        let ip = self.trace.read_ip()?;
        let bip = ip - 1;
        let Some(bp) = self.breakpoints.remove(bip) else {
            return Ok(None);
        };
        self.trace.write_memory(bip, &[bp.saved])?;
        self.trace.set_ip(bip)?;
        debug!("breakpoint at {bip} consumed");
        Ok(Some(bp))
    }

    /// Single-instruction-step until the child stops being stopped, or the new IP lands
    /// exactly on a line record of its (possibly newly entered) surrounding function.
    pub fn step(&self) -> Result<Address> {
        loop {
            self.trace.step_instruction()?;
            let status = self.trace.sync_status()?;
            if !status.is_stopped() {
                return Ok(self.trace.read_ip().unwrap_or_default());
            }
            let ip = self.trace.read_ip()?;
            if let Some(func) = self.info.surrounding_function(ip) {
                if func.lines.iter().any(|l| l.address == ip) {
                    debug!("step landed at {ip}");
                    return Ok(ip);
                }
            }
        }
    }

    /// Like [`Controller::step`] but also requires the frame-base pointer to never drop
    /// below its value at entry, so calls into deeper frames are stepped over rather than
    /// stopped inside.
    pub fn next(&self) -> Result<Address> {
        let entry_bp = self.trace.read_bp()?;
        loop {
            self.trace.step_instruction()?;
            let status = self.trace.sync_status()?;
            if !status.is_stopped() {
                return Ok(self.trace.read_ip().unwrap_or_default());
            }
            let ip = self.trace.read_ip()?;
            let bp = self.trace.read_bp()?;
            if bp < entry_bp {
                continue;
            }
            if let Some(func) = self.info.surrounding_function(ip) {
                if func.lines.iter().any(|l| l.address == ip) {
                    debug!("next landed at {ip}");
                    return Ok(ip);
                }
            }
        }
    }

    /// Walk the frame-pointer chain from the current IP/BP. Stops at `main`'s range, at
    /// `max_depth` frames, or when BP can no longer be read. Newest-frame-first. Returns
    /// an empty list if `Info` has no `main` (§4.5).
    pub fn stack_trace(&self, max_depth: usize) -> Result<Vec<Address>> {
        if self.info.function_by_name("main").is_none() {
            return Ok(Vec::new());
        }

        let mut trace = Vec::new();
        let mut ip = self.trace.read_ip()?;
        let mut bp = self.trace.read_bp()?;

        loop {
            trace.push(ip);
            if trace.len() >= max_depth {
                break;
            }
            let in_main = self
                .info
                .function_by_name("main")
                .map(|f| f.contains(ip))
                .unwrap_or(false);
            if in_main {
                break;
            }

            let Ok(saved_bp_bytes) = self.trace.read_memory(bp, 8) else {
                break;
            };
            let Ok(ret_addr_bytes) = self.trace.read_memory(bp + 8, 8) else {
                break;
            };
            let saved_bp = u64::from_ne_bytes(saved_bp_bytes.try_into().unwrap());
            let ret_addr = u64::from_ne_bytes(ret_addr_bytes.try_into().unwrap());

            ip = Address::from(ret_addr);
            bp = Address::from(saved_bp);
        }

        Ok(trace)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dwarf::type_graph::TypeArena;
    use crate::dwarf::unit::Line as DwarfLine;
    use crate::trace::fake::FakeTrace;

    fn info_with_main_and_lines() -> Info {
        Info {
            units: vec![CompUnit {
                name: "main.c".into(),
                comp_dir: "/".into(),
                producer: "cc".into(),
                begin: Address::from(0x401000u64),
                end: Address::from(0x401030u64),
                functions: vec![Function {
                    name: "main".into(),
                    begin: Address::from(0x401000u64),
                    end: Address::from(0x401030u64),
                    lines: vec![DwarfLine { number: 4, address: Address::from(0x401004u64) }],
                    locals: Vec::new(),
                }],
                types: TypeArena::default(),
            }],
        }
    }

    /// Scenario S1: insert a breakpoint, let the child run to it, and observe it consumed.
    #[test]
    fn breakpoint_hit_is_single_shot() {
        let info = info_with_main_and_lines();
        let fake = FakeTrace::new();
        fake.set_memory(0x401004, &[0x90]); // original byte under the trap
        let mut bp_table = BreakpointTable::default();
        let mut controller = Controller::new(&info, &fake, &mut bp_table);

        controller.insert_breakpoint(Address::from(0x401004u64), "main", 4).unwrap();
        assert_eq!(fake.read_memory(Address::from(0x401004u64), 1).unwrap(), vec![0xCC]);

        // simulate the trap firing: ip lands one past the trapped instruction
        fake.ip.set(0x401005);
        let hit = controller.handle_breakpoint_hit().unwrap();
        assert!(hit.is_some());
        assert!(controller.breakpoints.is_empty());
        assert_eq!(fake.read_ip().unwrap(), Address::from(0x401004u64));
        assert_eq!(fake.read_memory(Address::from(0x401004u64), 1).unwrap(), vec![0x90]);
    }

    /// Scenario S4: a 3-frame BP chain unwinds newest-frame-first and stops inside main.
    #[test]
    fn stack_trace_walks_frame_pointer_chain_to_main() {
        let info = info_with_main_and_lines();
        let fake = FakeTrace::new();

        // g's frame: bp=0x7fff_ff60, saved bp -> f's frame, return addr into f
        fake.set_memory(0x7fff_ff60, &0x7fff_ff80u64.to_ne_bytes());
        fake.set_memory(0x7fff_ff68, &0x401010u64.to_ne_bytes());
        // f's frame: bp=0x7fff_ff80, saved bp -> main's frame, return addr into main
        fake.set_memory(0x7fff_ff80, &0x7fff_ffa0u64.to_ne_bytes());
        fake.set_memory(0x7fff_ff88, &0x401020u64.to_ne_bytes());

        fake.ip.set(0x401025); // currently inside g, conceptually
        fake.bp.set(0x7fff_ff60);

        let mut bp_table = BreakpointTable::default();
        let controller = Controller::new(&info, &fake, &mut bp_table);
        let trace = controller.stack_trace(10).unwrap();

        assert_eq!(trace.len(), 3);
        assert_eq!(trace[0], Address::from(0x401025u64));
        assert_eq!(trace[1], Address::from(0x401010u64));
        assert_eq!(trace[2], Address::from(0x401020u64));
        assert!(info.function_by_name("main").unwrap().contains(trace[2]));
    }

    #[test]
    fn stack_trace_empty_without_main() {
        let info = Info { units: Vec::new() };
        let fake = FakeTrace::new();
        let mut bp_table = BreakpointTable::default();
        let controller = Controller::new(&info, &fake, &mut bp_table);
        assert!(controller.stack_trace(10).unwrap().is_empty());
    }

    #[test]
    fn step_stops_exactly_on_a_line_address() {
        let info = info_with_main_and_lines();
        let fake = FakeTrace::new();
        fake.ip.set(0x401000);
        fake.script.borrow_mut().push_back((0x401002, 0x0));
        fake.script.borrow_mut().push_back((0x401004, 0x0));

        let mut bp_table = BreakpointTable::default();
        let controller = Controller::new(&info, &fake, &mut bp_table);
        let landed = controller.step().unwrap();
        assert_eq!(landed, Address::from(0x401004u64));
    }
}
