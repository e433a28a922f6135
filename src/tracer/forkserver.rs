//! Forkserver-side operations: attach once, pump to the idle state, then
//! pick up one fork event per player.

use crate::errors::{Result, Role};
use crate::register::{Registers, SysArg, SysArg1, Word};
use crate::tracer::wait::{check_stop, checked, syscall_step, wait_raw, ExpectedStop};
use crate::tracer::Tracer;
use libc::pid_t;
use nix::sys::ptrace;
use nix::unistd::Pid;
use sc::nr;

impl Tracer {
    /// Attach to the forkserver and arm tracing.
    ///
    /// PTRACE_ATTACH (not SEIZE) on purpose: the attach stop is what lets
    /// us walk the forkserver to its first `read` next. The options make
    /// every forked player auto-traced from birth, kill the whole tree if
    /// the supervisor dies, and mark syscall traps with bit 7.
    pub fn forkserver_attach(&self, pid: Pid) -> Result<()> {
        checked(
            ptrace::attach(pid),
            pid,
            Role::Forkserver,
            "attach to the forkserver",
        )?;
        check_stop(wait_raw(pid), ExpectedStop::SigStop, Role::Forkserver)?;

        let options = ptrace::Options::PTRACE_O_TRACEFORK
            | ptrace::Options::PTRACE_O_EXITKILL
            | ptrace::Options::PTRACE_O_TRACESYSGOOD;
        checked(
            ptrace::setoptions(pid, options),
            pid,
            Role::Forkserver,
            "set forkserver trace options",
        )?;
        Ok(())
    }

    /// Step the forkserver by syscalls until it issues `read` on its
    /// control pipe, then let it run free. That read is the forkserver's
    /// way of saying its pipes are set up and it is idle; whatever
    /// syscalls it makes beforehand are its own business and are stepped
    /// over.
    pub fn forkserver_wait_first_read(&self, pid: Pid) -> Result<()> {
        let mut regs = Registers::new(pid);

        loop {
            syscall_step(pid, Role::Forkserver, "step forkserver to next syscall")?;
            checked(
                regs.fetch_regs(),
                pid,
                Role::Forkserver,
                "read forkserver registers",
            )?;

            // Arguments survive the exit stop (only rax, rcx and r11 are
            // clobbered on syscall return), so it does not matter whether
            // this match happens at the enter or the exit stop.
            if regs.get_sys_num() == nr::READ as Word
                && regs.get(SysArg(SysArg1)) == self.config.forkserver_read_fd as Word
            {
                debug!("-- {}, forkserver reached its control read", pid);
                checked(
                    ptrace::cont(pid, None),
                    pid,
                    Role::Forkserver,
                    "release forkserver after its first read",
                )?;
                return Ok(());
            }
        }
    }

    /// Wait for the forkserver's next stop after the supervisor ordered a
    /// fork: the fork event arrives as a plain SIGTRAP.
    pub fn forkserver_wait_stop(&self, pid: Pid) -> Result<()> {
        check_stop(wait_raw(pid), ExpectedStop::EventTrap, Role::Forkserver)
    }

    /// Extract the just-forked player's pid from the fork event.
    ///
    /// The pid the forkserver itself could report lives in its pid
    /// namespace; the event message carries the one that is valid for
    /// tracing from here.
    pub fn forkserver_forked_pid(&self, pid: Pid) -> Result<Pid> {
        let msg = checked(
            ptrace::getevent(pid),
            pid,
            Role::Forkserver,
            "read the fork event message",
        )?;
        Ok(Pid::from_raw(msg as pid_t))
    }

    /// Continue the stopped forkserver. Needed after every fork event,
    /// and again after each SIGCHLD stop caused by a dying player.
    pub fn forkserver_resume(&self, pid: Pid) -> Result<()> {
        checked(
            ptrace::cont(pid, None),
            pid,
            Role::Forkserver,
            "resume the forkserver",
        )
    }
}
