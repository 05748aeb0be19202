//! Fork/exec bootstrap for the traced child.
//!
//! Out of scope for the core's correctness claims (§1), but a debugger with nothing to
//! attach to isn't a runnable program. Grounded on the same fork-then-`SIGSTOP`-then-`seize`
//! dance the wider ecosystem uses to get a stopped, traceable child without racing its
//! first instructions.

use crate::error::{Error, Result};
use nix::sys;
use nix::sys::personality::Persona;
use nix::sys::ptrace::Options;
use nix::sys::signal::SIGSTOP;
use nix::sys::wait::{waitpid, WaitPidFlag};
use nix::unistd::{fork, ForkResult, Pid};
use std::marker::PhantomData;
use std::os::unix::process::CommandExt;
use std::process::Command;

/// Process state, tracked at the type level so an un-started [`Child`] can't be asked
/// for a pid and a running one can't be `install`ed twice.
pub trait State {}

/// Process forked, `SIGSTOP`ped and seized with `ptrace`.
pub struct Installed;
impl State for Installed {}

/// Process described but not yet forked.
pub struct Template;
impl State for Template {}

pub struct Child<S: State> {
    pub program: String,
    args: Vec<String>,
    pid: Option<Pid>,
    _p: PhantomData<S>,
}

impl Child<Template> {
    pub fn new<ARGS, I>(program: impl Into<String>, args: ARGS) -> Child<Template>
    where
        ARGS: IntoIterator<Item = I>,
        I: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            pid: None,
            _p: PhantomData,
        }
    }

    /// Fork, stop the child before it execs, and attach to it with `ptrace::seize`.
    pub fn install(&self) -> Result<Child<Installed>> {
        let mut cmd = Command::new(&self.program);
        let cmd = cmd.args(&self.args);

        unsafe {
            cmd.pre_exec(move || {
                sys::personality::set(Persona::ADDR_NO_RANDOMIZE)?;
                Ok(())
            });
        }

        match unsafe { fork() }.expect("fork() failed") {
            ForkResult::Parent { child: pid } => {
                waitpid(Pid::from_raw(-1), Some(WaitPidFlag::WSTOPPED)).map_err(Error::Waitpid)?;
                sys::ptrace::seize(pid, Options::PTRACE_O_TRACEEXIT).map_err(Error::Ptrace)?;

                Ok(Child {
                    program: self.program.clone(),
                    args: self.args.clone(),
                    pid: Some(pid),
                    _p: PhantomData,
                })
            }
            ForkResult::Child => {
                sys::signal::raise(SIGSTOP).expect("raise(SIGSTOP) failed");
                let err = cmd.exec();
                panic!("exec of debugee failed: {err}");
            }
        }
    }
}

impl Child<Installed> {
    pub fn pid(&self) -> Pid {
        self.pid.expect("installed child always has a pid")
    }
}
