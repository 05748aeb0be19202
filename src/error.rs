//! Crate-wide error taxonomy.
//!
//! Every fallible operation in the core returns a variant of [`Error`]. Callers propagate
//! without wrapping; the command loop is the only place error variants get turned into text.

use crate::dwarf::unit::DieOffset;
use std::str::Utf8Error;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    // ------------------------------------------------------------- generic ---
    #[error(transparent)]
    IO(#[from] std::io::Error),
    #[error(transparent)]
    Utf8(#[from] Utf8Error),

    // ------------------------------------------------------------- load errors ---
    #[error("could not open executable: {0}")]
    Open(std::io::Error),
    #[error("debug info malformed: {0}")]
    Info(String),
    #[error("compilation unit header malformed: {0}")]
    CompUnit(String),
    #[error("line program malformed: {0}")]
    Lines(String),
    #[error("function DIE malformed: {0}")]
    Function(String),
    #[error("local variable DIE malformed: {0}")]
    Local(String),
    #[error("type DIE malformed: {0}")]
    Type(String),
    #[error("object file parsing error: {0}")]
    ObjParsing(#[from] object::Error),
    #[error("dwarf parsing error: {0}")]
    DwarfParsing(#[from] gimli::Error),

    // ------------------------------------------------------------- lookup errors ---
    #[error("function not found: {0}")]
    FunctionNotFound(String),
    #[error("no compilation unit surrounds address {0:#x}")]
    UnitNotFound(u64),
    #[error("no function surrounds address {0:#x}")]
    FunctionNotFoundAt(u64),
    #[error("type not found for die {0:?}")]
    TypeNotFound(DieOffset),
    #[error("no main function present, stack trace unavailable")]
    NoMain,

    // ------------------------------------------------------------- evaluation errors ---
    #[error("unknown dwarf expression opcode {0:#x}")]
    EvalUnknownOpcode(u8),
    #[error("dwarf expression stack underflow")]
    EvalStackUnderflow,
    #[error("register {0} out of range")]
    EvalRegisterOutOfRange(u16),

    // ------------------------------------------------------------- expression errors ---
    #[error("unknown identifier: {0}")]
    UnknownIdentifier(String),
    #[error("could not parse expression: {0}")]
    ParseFailure(String),
    #[error("type mismatch: {0}")]
    TypeMismatch(String),
    #[error("no function surrounds the current instruction pointer")]
    NoSurroundingFunction,

    // ------------------------------------------------------------- trace errors ---
    #[error("waitpid syscall error: {0}")]
    Waitpid(nix::Error),
    #[error("ptrace syscall error: {0}")]
    Ptrace(nix::Error),
    #[error("the debugee is not running")]
    NotRunning,

    // ------------------------------------------------------------- breakpoint errors ---
    #[error("no breakpoint at address {0:#x}")]
    BreakpointNotFound(u64),
}

pub type Result<T> = std::result::Result<T, Error>;
