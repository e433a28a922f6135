use crate::register::Word;
use libc::user_regs_struct;
use nix::sys::ptrace;
use nix::unistd::Pid;
use std::fmt;

/// An invalid syscall number; the kernel answers it with ENOSYS and
/// executes nothing.
const VOID_SYSNUM: Word = Word::MAX;

#[derive(Debug, Copy, Clone)]
pub enum SysArgIndex {
    SysArg1,
    SysArg2,
    SysArg3,
    SysArg4,
    SysArg5,
    SysArg6,
}

#[derive(Debug, Copy, Clone)]
pub enum Register {
    SysNum,
    SysArg(SysArgIndex),
    SysResult,
}
use self::Register::*;
use self::SysArgIndex::*;

/// One process's general-purpose registers, cached at a ptrace stop.
///
/// `fetch_regs` pulls a fresh snapshot, `get`/`set` work on the cache, and
/// `push_regs` writes the cache back only if something was modified.
/// Writes must be pushed before the resume that makes them observable.
pub struct Registers {
    pid: Pid,
    regs: Option<user_regs_struct>,
    regs_were_changed: bool,
}

impl Registers {
    /// Creates an empty register bundle; call `fetch_regs` at a stop
    /// before reading from it.
    pub fn new(pid: Pid) -> Self {
        Self {
            pid,
            regs: None,
            regs_were_changed: false,
        }
    }

    #[cfg(test)]
    /// Same, but pre-filled with raw regs. Useful for tests.
    pub fn from(pid: Pid, raw_regs: user_regs_struct) -> Self {
        Self {
            pid,
            regs: Some(raw_regs),
            regs_were_changed: false,
        }
    }

    /// Retrieves the process's registers and replaces the cache with them.
    pub fn fetch_regs(&mut self) -> nix::Result<()> {
        self.regs = Some(ptrace::getregs(self.pid)?);
        self.regs_were_changed = false;
        Ok(())
    }

    /// Pushes the cached registers back to the process, if any value was
    /// actually modified since the last fetch.
    pub fn push_regs(&mut self) -> nix::Result<()> {
        if !self.regs_were_changed {
            return Ok(());
        }
        ptrace::setregs(self.pid, *self.regs())?;
        self.regs_were_changed = false;
        Ok(())
    }

    /// Retrieves a value from one of the cached registers.
    ///
    /// Panics if no registers were fetched; that is always a sequencing
    /// bug in the caller, and the backtrace is the useful artifact.
    #[inline]
    pub fn get(&self, register: Register) -> Word {
        let raw_regs = self.regs();

        match register {
            SysNum => get_reg!(raw_regs, SysNum),
            SysArg(SysArg1) => get_reg!(raw_regs, SysArg1),
            SysArg(SysArg2) => get_reg!(raw_regs, SysArg2),
            SysArg(SysArg3) => get_reg!(raw_regs, SysArg3),
            SysArg(SysArg4) => get_reg!(raw_regs, SysArg4),
            SysArg(SysArg5) => get_reg!(raw_regs, SysArg5),
            SysArg(SysArg6) => get_reg!(raw_regs, SysArg6),
            SysResult => get_reg!(raw_regs, SysResult),
        }
    }

    /// Modifies one of the cached registers. If `new_value` equals the
    /// current one, the dirty flag is not raised, to avoid an unnecessary
    /// `push_regs`.
    #[inline]
    pub fn set(&mut self, register: Register, new_value: Word, justification: &'static str) {
        let current_value = self.get(register);

        debug!(
            "-- {}, modifying reg {:?}: {:#x} -> {:#x}, {}",
            self.pid, register, current_value, new_value, justification
        );

        if current_value == new_value {
            return;
        }

        let raw_regs = self.regs_mut();
        match register {
            SysNum => get_reg!(raw_regs, SysNum) = new_value,
            SysArg(SysArg1) => get_reg!(raw_regs, SysArg1) = new_value,
            SysArg(SysArg2) => get_reg!(raw_regs, SysArg2) = new_value,
            SysArg(SysArg3) => get_reg!(raw_regs, SysArg3) = new_value,
            SysArg(SysArg4) => get_reg!(raw_regs, SysArg4) = new_value,
            SysArg(SysArg5) => get_reg!(raw_regs, SysArg5) = new_value,
            SysArg(SysArg6) => get_reg!(raw_regs, SysArg6) = new_value,
            SysResult => get_reg!(raw_regs, SysResult) = new_value,
        };
        self.regs_were_changed = true;
    }

    #[inline]
    pub fn get_sys_num(&self) -> Word {
        self.get(SysNum)
    }

    /// Voids the syscall number so the kernel refuses to execute the call.
    #[inline]
    pub fn cancel_syscall(&mut self, justification: &'static str) {
        self.set(SysNum, VOID_SYSNUM, justification);
    }

    #[inline]
    fn regs(&self) -> &user_regs_struct {
        match self.regs {
            Some(ref regs) => regs,
            None => unreachable!("registers were not fetched"),
        }
    }

    #[inline]
    fn regs_mut(&mut self) -> &mut user_regs_struct {
        match self.regs {
            Some(ref mut regs) => regs,
            None => unreachable!("registers were not fetched"),
        }
    }
}

impl fmt::Debug for Registers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.regs {
            None => write!(f, "(pid {}: no registers fetched)", self.pid),
            Some(_) => write!(
                f,
                "(pid {}: syscall {} - args [{:#x}, {:#x}, {:#x}, {:#x}, {:#x}, {:#x}], result {:#x})",
                self.pid,
                self.get(SysNum),
                self.get(SysArg(SysArg1)),
                self.get(SysArg(SysArg2)),
                self.get(SysArg(SysArg3)),
                self.get(SysArg(SysArg4)),
                self.get(SysArg(SysArg5)),
                self.get(SysArg(SysArg6)),
                self.get(SysResult),
            ),
        }
    }
}
