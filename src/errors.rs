pub use nix::errno::Errno;
use std::{fmt, result};

pub type Result<T> = result::Result<T, Error>;

/// Which of the two sandboxed processes a kernel notification belongs to.
///
/// The forkserver runs trusted code and is only ever killed from outside
/// (OS, operator); a player process can additionally violate the syscall
/// policy. Both share the same waitpid classification, parameterized by
/// this role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Forkserver,
    Tracee,
}

/// Everything a gate operation can report to the supervisor.
///
/// The supervisor branches on the variant to produce a verdict, so each
/// condition is a distinct class rather than a return code. Kill, signal
/// and continuation variants carry the raw `waitpid` status word (`-1`
/// when the status could not be read back during error recovery).
#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    /// The forkserver was killed outright (SIGKILL by the OS or an
    /// operator; nothing the forkserver runs can be killed by seccomp).
    ForkserverKill(i32),
    /// The forkserver stopped with a signal the gate did not expect.
    ForkserverSignal(i32),
    /// The forkserver was continued behind the gate's back.
    ForkserverCont(i32),
    /// The player was killed without a preceding ptrace stop
    /// (SIGKILL, or SIGSYS from the in-kernel filter).
    TraceeKill(i32),
    /// The player stopped with an unexpected signal, e.g. the CPU-time
    /// budget firing.
    TraceeSignal(i32),
    /// The player was continued behind the gate's back.
    TraceeCont(i32),
    /// The player attempted a syscall outside the policy: not in the
    /// allow-list, or a pipe operation with the wrong fd, byte count or
    /// turn. `fd` and `count` are `-1` when they were never validated.
    IllegalSyscall { sysnum: i64, fd: i64, count: i64 },
    /// A memory-sizing syscall returned `-ENOMEM`.
    OutOfMemory,
    /// `ptrace` failed with an errno other than ESRCH. This is a bug
    /// surface, not a policy violation; the target has been killed.
    System {
        errno: Errno,
        context: &'static str,
    },
    /// The construction-time platform probe failed.
    Platform(String),
    /// A configuration setter rejected its value.
    Config(String),
}

impl Error {
    pub(crate) fn unknown_kill(role: Role, status: i32) -> Error {
        match role {
            Role::Forkserver => Error::ForkserverKill(status),
            Role::Tracee => Error::TraceeKill(status),
        }
    }

    pub(crate) fn unknown_signal(role: Role, status: i32) -> Error {
        match role {
            Role::Forkserver => Error::ForkserverSignal(status),
            Role::Tracee => Error::TraceeSignal(status),
        }
    }

    pub(crate) fn unexpected_cont(role: Role, status: i32) -> Error {
        match role {
            Role::Forkserver => Error::ForkserverCont(status),
            Role::Tracee => Error::TraceeCont(status),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::ForkserverKill(status) => {
                write!(f, "forkserver killed, waitpid status {}", status)
            }
            Error::ForkserverSignal(status) => {
                write!(f, "forkserver stopped by unexpected signal, waitpid status {}", status)
            }
            Error::ForkserverCont(status) => {
                write!(f, "forkserver unexpectedly continued, waitpid status {}", status)
            }
            Error::TraceeKill(status) => write!(f, "player killed, waitpid status {}", status),
            Error::TraceeSignal(status) => {
                write!(f, "player stopped by unexpected signal, waitpid status {}", status)
            }
            Error::TraceeCont(status) => {
                write!(f, "player unexpectedly continued, waitpid status {}", status)
            }
            Error::IllegalSyscall { sysnum, fd, count } => write!(
                f,
                "player attempted illegal syscall {} (fd {}, count {})",
                sysnum, fd, count
            ),
            Error::OutOfMemory => write!(f, "player ran out of memory"),
            Error::System { errno, context } => {
                write!(f, "unexpected ptrace error {}({}) while trying to {}", errno, *errno as i32, context)
            }
            Error::Platform(msg) => write!(f, "unsupported platform: {}", msg),
            Error::Config(msg) => write!(f, "invalid configuration: {}", msg),
        }
    }
}

impl std::error::Error for Error {}
