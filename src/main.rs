//! Command-line front end (§4.8, C8): parses a command line, dispatches to the controller
//! or the expression evaluator, and prints a result or error. Not itself a subject of this
//! crate's correctness claims (§1) — present so the crate is a runnable program.

use clap::Parser;
use log::{info, warn};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use tcdbg::address::Address;
use tcdbg::controller::Controller;
use tcdbg::dwarf::eval::{self, RtLoc};
use tcdbg::dwarf::loader;
use tcdbg::dwarf::type_graph::{Edge, Interp, TypeArena, TypeKind};
use tcdbg::dwarf::Info;
use tcdbg::error::Result;
use tcdbg::expr;
use tcdbg::process::Child;
use tcdbg::register::{Register, RegisterMap};
use tcdbg::trace::TraceControl;
use tcdbg::Context;

#[derive(Parser, Debug)]
#[command(author, version, about = "a small source-level debugger for x86-64 native programs", long_about = None)]
struct Args {
    /// Executable to trace (must carry embedded DWARF debug information)
    debugee: String,

    /// Minimum log level (error, warn, info, debug, trace)
    #[arg(long, env = "TCDBG_LOG", default_value = "warn")]
    log_level: String,

    /// Arguments passed through to the debugee
    #[arg(raw(true))]
    args: Vec<String>,
}

fn main() {
    let args = Args::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&args.log_level)).init();

    let info = match loader::load_info(&args.debugee) {
        Ok(info) => info,
        Err(e) => {
            eprintln!("failed to load debug information: {e}");
            std::process::exit(1);
        }
    };
    info!("loaded {} compilation unit(s)", info.units.len());

    let child = match Child::new(args.debugee.as_str(), args.args.clone()).install() {
        Ok(child) => child,
        Err(e) => {
            eprintln!("failed to launch debugee: {e}");
            std::process::exit(1);
        }
    };

    let mut ctx = Context::new(child.pid(), info);
    if let Err(e) = ctx.trace.sync_status() {
        eprintln!("initial sync failed: {e}");
        std::process::exit(1);
    }

    let mut rl = DefaultEditor::new().expect("line editor init failed");
    let prompt = format!("tcdbg/{}] ", ctx.pid.as_raw());

    loop {
        if !ctx.last_status().is_alive() {
            println!("process {} terminated", ctx.pid.as_raw());
            break;
        }

        if ctx.last_status().is_stopped() {
            let mut controller = ctx.controller();
            match controller.handle_breakpoint_hit() {
                Ok(Some(bp)) => {
                    print!("stopped [at breakpoint] at ");
                    print_where(&controller, bp.address);
                }
                Ok(None) => {}
                Err(e) => warn!("breakpoint hit handling failed: {e}"),
            }
        }

        let line = match rl.readline(&prompt) {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(e) => {
                warn!("readline error: {e}");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        let _ = rl.add_history_entry(line.as_str());

        let mut parts = line.trim().splitn(2, ' ');
        let op = parts.next().unwrap_or("");
        let rest = parts.next().unwrap_or("").trim();

        info!("dispatching command '{op}'");
        if let Err(e) = dispatch(&mut ctx, op, rest) {
            println!("error: {e}");
        }
    }
}

fn dispatch(ctx: &mut Context, op: &str, rest: &str) -> Result<()> {
    match op {
        "continue" => {
            ctx.trace.cont()?;
            ctx.trace.sync_status()?;
        }
        "kill" => {
            ctx.trace.kill()?;
            ctx.trace.sync_status()?;
        }
        "step" => {
            let controller = ctx.controller();
            let ip = controller.step()?;
            print!("stepped to ");
            print_where(&controller, ip);
        }
        "next" => {
            let controller = ctx.controller();
            let ip = controller.next()?;
            print!("stepped to ");
            print_where(&controller, ip);
        }
        "trace" => {
            let controller = ctx.controller();
            for (level, addr) in controller.stack_trace(128)?.into_iter().enumerate() {
                print!("<{level}> ");
                print_where(&controller, addr);
            }
        }
        "where" => {
            let controller = ctx.controller();
            let ip = controller.trace.read_ip()?;
            print!("at ");
            print_where(&controller, ip);
        }
        "registers" => print_registers(ctx)?,
        "lines" => print_lines(&ctx.info),
        "types" => print_types(&ctx.info),
        "locals" => print_locals(ctx)?,
        "points" => print_points(ctx),
        "break" => insert_breakpoint(ctx, rest)?,
        "dump" => dump_memory(ctx, rest)?,
        "print" => print_expr(ctx, rest)?,
        _ => println!("invalid or unknown command"),
    }
    Ok(())
}

fn print_where(controller: &Controller, addr: Address) {
    print!("{addr}");
    if let Some(func) = controller.surrounding_function(addr) {
        print!(", in function '{}'", func.name);
        if let Some(line) = controller.nearest_line(func, addr) {
            print!(", line {}", line.number);
        }
    }
    println!(".");
}

fn print_registers(ctx: &mut Context) -> Result<()> {
    let regs = RegisterMap::current(ctx.pid)?;
    const ALL: [Register; 18] = [
        Register::Rax,
        Register::Rbx,
        Register::Rcx,
        Register::Rdx,
        Register::Rsi,
        Register::Rdi,
        Register::Rbp,
        Register::Rsp,
        Register::R8,
        Register::R9,
        Register::R10,
        Register::R11,
        Register::R12,
        Register::R13,
        Register::R14,
        Register::R15,
        Register::Rip,
        Register::Eflags,
    ];
    for reg in ALL {
        println!("{reg} {:#x}", regs.value(reg));
    }
    Ok(())
}

fn print_lines(info: &Info) {
    for unit in &info.units {
        println!("{}/{}:", unit.comp_dir, unit.name);
        for func in &unit.functions {
            println!("  {}:", func.name);
            for line in &func.lines {
                println!("    {}:{}", line.number, line.address);
            }
        }
    }
}

fn print_types(info: &Info) {
    for unit in &info.units {
        println!("{}/{}:", unit.comp_dir, unit.name);
        for node in &unit.types.nodes {
            match &node.kind {
                TypeKind::Base { name, interp } => {
                    println!("  {name}: size={} interp={:?}", node.size, interp)
                }
                TypeKind::Pointer { .. } => println!("  <pointer>: size={}", node.size),
                TypeKind::Array { .. } => println!("  <array>: size={}", node.size),
                TypeKind::Struct { name } => println!("  struct {name}: size={}", node.size),
            }
        }
    }
}

fn print_locals(ctx: &mut Context) -> Result<()> {
    let controller = ctx.controller();
    let ip = controller.trace.read_ip()?;
    let Some(unit) = controller.surrounding_comp_unit(ip) else {
        return Ok(());
    };
    let Some(func) = unit.surrounding_function(ip) else {
        return Ok(());
    };
    for local in &func.locals {
        let ty = type_to_string(&unit.types, local.ty);
        match eval::evaluate(&local.locdesc, controller.trace, None) {
            Ok(rtloc) => println!("{} ({ty}) {}", local.name, rtloc_to_string(&rtloc)),
            Err(e) => warn!("could not evaluate location of '{}': {e}", local.name),
        }
    }
    Ok(())
}

fn print_points(ctx: &Context) {
    for (i, bp) in ctx.breakpoints.iter().enumerate() {
        println!("{i}:{} (line {})", bp.address, bp.line);
    }
}

fn insert_breakpoint(ctx: &mut Context, symbol: &str) -> Result<()> {
    if symbol.is_empty() {
        println!("usage: break <symbol>");
        return Ok(());
    }
    let mut controller = ctx.controller();
    let Some((address, line, name)) = controller.function_by_name(symbol).and_then(|func| {
        func.lines
            .first()
            .map(|l| (l.address, l.number, func.name.clone()))
    }) else {
        println!("couldn't find function '{symbol}'.");
        return Ok(());
    };
    controller.insert_breakpoint(address, name, line)?;
    print!("set breakpoint at ");
    print_where(&controller, address);
    Ok(())
}

fn dump_memory(ctx: &Context, arg: &str) -> Result<()> {
    let Ok(addr) = u64::from_str_radix(arg.trim_start_matches("0x"), 16) else {
        println!("couldn't parse address '{arg}'.");
        return Ok(());
    };
    let bytes = ctx.trace.read_memory(Address::from(addr), 32)?;
    for (i, b) in bytes.iter().enumerate() {
        print!("{b:02X} ");
        if (i + 1) % 8 == 0 {
            println!();
        }
    }
    println!();
    Ok(())
}

fn print_expr(ctx: &mut Context, text: &str) -> Result<()> {
    if text.is_empty() {
        println!("usage: print <expr>");
        return Ok(());
    }
    let controller = ctx.controller();
    let (ty, rtloc) = expr::evaluate(text, &controller)?;
    let node = ty.root();
    let size = (node.size as usize).max(1);
    let bytes = rtloc.read(controller.trace, size)?;
    match &node.kind {
        TypeKind::Base { interp, .. } => println!("{}", format_base(interp, &bytes)),
        TypeKind::Pointer { .. } => println!("{:#x}", read_unsigned(&bytes)),
        TypeKind::Array { .. } => println!("{}", rtloc_to_string(&rtloc)),
        TypeKind::Struct { name } => println!("struct {name} at {}", rtloc_to_string(&rtloc)),
    }
    Ok(())
}

/// Recursive, mirroring the original debugger's `*`-for-pointer / `[]`-for-array type
/// stringification, just expressed over this crate's indexed arena instead of raw pointers.
fn type_to_string(arena: &TypeArena, edge: Edge) -> String {
    let Some(id) = edge.resolved() else {
        return "<unresolved>".into();
    };
    let Some(node) = arena.get(id) else {
        return "<unresolved>".into();
    };
    match &node.kind {
        TypeKind::Base { name, .. } => name.clone(),
        TypeKind::Pointer { pointee } => format!("*{}", type_to_string(arena, *pointee)),
        TypeKind::Array { element } => format!("[]{}", type_to_string(arena, *element)),
        TypeKind::Struct { name } => format!("struct {name}"),
    }
}

fn rtloc_to_string(rtloc: &RtLoc) -> String {
    match rtloc {
        RtLoc::Address(a) => format!("{a:#x}"),
        RtLoc::Register(n) => format!("reg{n}"),
        RtLoc::HostTemp(bits) => format!("{bits:#x}"),
    }
}

fn read_unsigned(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    let n = bytes.len().min(8);
    buf[..n].copy_from_slice(&bytes[..n]);
    u64::from_ne_bytes(buf)
}

fn read_signed(bytes: &[u8]) -> i64 {
    let n = bytes.len().min(8);
    let raw = read_unsigned(bytes);
    if n == 0 || n >= 8 {
        return raw as i64;
    }
    let shift = 64 - n * 8;
    ((raw << shift) as i64) >> shift
}

fn format_base(interp: &Interp, bytes: &[u8]) -> String {
    match interp {
        Interp::Signed => read_signed(bytes).to_string(),
        Interp::Unsigned | Interp::Address => read_unsigned(bytes).to_string(),
        Interp::SignedChar => (bytes.first().copied().unwrap_or(0) as i8).to_string(),
        Interp::UnsignedChar => bytes.first().copied().unwrap_or(0).to_string(),
        Interp::Bool => (bytes.first().copied().unwrap_or(0) != 0).to_string(),
        Interp::Float => {
            if bytes.len() >= 8 {
                let mut b = [0u8; 8];
                b.copy_from_slice(&bytes[..8]);
                f64::from_bits(u64::from_ne_bytes(b)).to_string()
            } else {
                let mut b = [0u8; 4];
                let n = bytes.len().min(4);
                b[..n].copy_from_slice(&bytes[..n]);
                f32::from_bits(u32::from_ne_bytes(b)).to_string()
            }
        }
    }
}
