//! Raw waitpid plumbing: the total classification of every kernel
//! notification, and the recovery path for failed ptrace requests.

use crate::errors::{Error, Errno, Result, Role};
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;

/// With PTRACE_O_TRACESYSGOOD set, syscall stops carry SIGTRAP with bit 7
/// set, so they cannot be confused with SIGTRAPs from other sources.
pub(crate) const SYSCALL_SIGTRAP: i32 = libc::SIGTRAP | 0x80;

/// The three stop kinds the gate ever waits for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ExpectedStop {
    /// Attach, or the automatic stop of a freshly forked player.
    SigStop,
    /// Syscall-enter or syscall-exit under PTRACE_O_TRACESYSGOOD.
    SyscallTrap,
    /// A ptrace event, e.g. the fork notification: a plain SIGTRAP.
    EventTrap,
}

impl ExpectedStop {
    fn stop_signal(self) -> i32 {
        match self {
            ExpectedStop::SigStop => libc::SIGSTOP,
            ExpectedStop::SyscallTrap => SYSCALL_SIGTRAP,
            ExpectedStop::EventTrap => libc::SIGTRAP,
        }
    }
}

/// Block until the next notification for `pid` and return the raw status
/// word. The raw word (not a decoded enum) is what error payloads carry,
/// so the supervisor can re-inspect it.
///
/// The return value of waitpid itself is not checked here: without
/// WNOHANG it only fails if the calling process is interrupted by a
/// signal, which the supervisor does not allow, or if the pid was already
/// reaped, which the recovery path below handles on its own.
pub(crate) fn wait_raw(pid: Pid) -> i32 {
    let mut status: libc::c_int = 0;
    unsafe { libc::waitpid(pid.as_raw(), &mut status, libc::__WALL) };
    status
}

/// Classify a raw waitpid status against the stop the state machine
/// expected. Every notification lands in exactly one bucket:
///
/// - killed outright (only SIGKILL or seccomp's SIGSYS can do this to a
///   traced process; everything else stops first) -> unknown kill;
/// - stopped with the expected signal -> OK;
/// - stopped with any other signal -> unknown signal;
/// - anything else -> unexpected continuation. Neither process is allowed
///   to exit under the gate, so a SIGCONT slipped in before we observed
///   the stop (or a bug made the process exit early).
pub(crate) fn check_stop(status: i32, expected: ExpectedStop, role: Role) -> Result<()> {
    if libc::WIFSIGNALED(status) {
        return Err(Error::unknown_kill(role, status));
    }
    if libc::WIFSTOPPED(status) {
        if libc::WSTOPSIG(status) != expected.stop_signal() {
            return Err(Error::unknown_signal(role, status));
        }
        return Ok(());
    }
    Err(Error::unexpected_cont(role, status))
}

/// Turn a failed ptrace request into the error the supervisor should see.
///
/// ESRCH means the target died or was continued after our last look at
/// it; a notification is therefore pending and the follow-up waitpid
/// cannot block. Signalled and continued map to their classes; any other
/// outcome (an exit caused by a bug in the player setup) gets the target
/// force-killed and reported as an unknown kill. When waitpid itself
/// fails, the status payload is `-1`.
///
/// Any other errno is a bug in the gate, not a policy violation: the
/// target is killed and the errno is surfaced as a system error.
pub(crate) fn recover_ptrace_error(
    err: nix::Error,
    pid: Pid,
    role: Role,
    context: &'static str,
) -> Error {
    let errno = err.as_errno().unwrap_or(Errno::UnknownErrno);

    if errno != Errno::ESRCH {
        warn!("-- {}, ptrace failed with {} while trying to {}", pid, errno, context);
        let _ = kill(pid, Signal::SIGKILL);
        return Error::System { errno, context };
    }

    let mut status: libc::c_int = 0;
    let ret = unsafe { libc::waitpid(pid.as_raw(), &mut status, libc::__WALL) };
    if ret == -1 {
        return Error::unknown_kill(role, -1);
    }

    if libc::WIFSIGNALED(status) {
        Error::unknown_kill(role, status)
    } else if libc::WIFCONTINUED(status) {
        Error::unexpected_cont(role, status)
    } else {
        let _ = kill(pid, Signal::SIGKILL);
        Error::unknown_kill(role, status)
    }
}

/// Run a ptrace request's result through the recovery path.
pub(crate) fn checked<T>(
    result: nix::Result<T>,
    pid: Pid,
    role: Role,
    context: &'static str,
) -> Result<T> {
    result.map_err(|err| recover_ptrace_error(err, pid, role, context))
}

/// One syscall step: resume with PTRACE_SYSCALL and classify the next
/// stop, which must be a syscall trap.
pub(crate) fn syscall_step(pid: Pid, role: Role, context: &'static str) -> Result<()> {
    checked(nix::sys::ptrace::syscall(pid, None), pid, role, context)?;
    check_stop(wait_raw(pid), ExpectedStop::SyscallTrap, role)
}

#[cfg(test)]
mod tests {
    use super::*;

    // raw wait status encodings, as the kernel builds them
    fn killed_by(sig: i32) -> i32 {
        sig
    }
    fn stopped_by(sig: i32) -> i32 {
        0x7f | (sig << 8)
    }
    fn exited_with(code: i32) -> i32 {
        code << 8
    }
    const CONTINUED: i32 = 0xffff;

    #[test]
    fn expected_stops_pass() {
        check_stop(
            stopped_by(libc::SIGSTOP),
            ExpectedStop::SigStop,
            Role::Tracee,
        )
        .unwrap();
        check_stop(
            stopped_by(SYSCALL_SIGTRAP),
            ExpectedStop::SyscallTrap,
            Role::Forkserver,
        )
        .unwrap();
        check_stop(
            stopped_by(libc::SIGTRAP),
            ExpectedStop::EventTrap,
            Role::Forkserver,
        )
        .unwrap();
    }

    #[test]
    fn killed_processes_classify_by_role() {
        let status = killed_by(libc::SIGKILL);
        assert_eq!(
            check_stop(status, ExpectedStop::SyscallTrap, Role::Tracee),
            Err(Error::TraceeKill(status))
        );
        assert_eq!(
            check_stop(status, ExpectedStop::SigStop, Role::Forkserver),
            Err(Error::ForkserverKill(status))
        );
    }

    #[test]
    fn wrong_stop_signal_is_an_unknown_signal() {
        // a plain SIGTRAP where a syscall trap was expected must not be
        // silently absorbed: TRACESYSGOOD makes the two distinguishable
        let status = stopped_by(libc::SIGTRAP);
        assert_eq!(
            check_stop(status, ExpectedStop::SyscallTrap, Role::Tracee),
            Err(Error::TraceeSignal(status))
        );

        let status = stopped_by(libc::SIGPROF);
        assert_eq!(
            check_stop(status, ExpectedStop::SyscallTrap, Role::Tracee),
            Err(Error::TraceeSignal(status))
        );
    }

    #[test]
    fn continued_and_exited_are_unexpected_continuations() {
        assert_eq!(
            check_stop(CONTINUED, ExpectedStop::SigStop, Role::Tracee),
            Err(Error::TraceeCont(CONTINUED))
        );
        // a bug-induced early exit lands in the same bucket
        let status = exited_with(0);
        assert_eq!(
            check_stop(status, ExpectedStop::SyscallTrap, Role::Forkserver),
            Err(Error::ForkserverCont(status))
        );
    }
}
