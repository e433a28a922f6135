use crate::errors::{Error, Result};
use crate::register::Word;
use crate::syscall::MAX_SYSCALL_NUMBER;
use sc::nr;
use std::fmt;
use std::os::unix::io::RawFd;

/// Sandbox parameters, set once by the supervisor before tracing begins
/// and only read by the controller afterwards.
///
/// Pipe fds default to `-1` so that an unconfigured gate can never match
/// a real descriptor.
#[derive(Clone)]
pub struct Config {
    /// Index map over syscall numbers; `true` means allowed for players.
    allowed_syscalls: [bool; MAX_SYSCALL_NUMBER + 1],
    pub(crate) tracee_read_fd: RawFd,
    pub(crate) tracee_write_fd: RawFd,
    pub(crate) forkserver_read_fd: RawFd,
    /// Unused by the controller; kept for symmetry with the tracee pair.
    pub(crate) forkserver_write_fd: RawFd,
    pub(crate) write_max_bytes: u64,
}

impl Config {
    pub fn new() -> Config {
        Config {
            allowed_syscalls: [false; MAX_SYSCALL_NUMBER + 1],
            tracee_read_fd: -1,
            tracee_write_fd: -1,
            forkserver_read_fd: -1,
            forkserver_write_fd: -1,
            write_max_bytes: 0,
        }
    }

    /// Replace the allowed-syscall set.
    ///
    /// `read` and `write` are the supervisor-driven protocol events and
    /// must never be generally allowed; they are rejected here, as is any
    /// number above [`MAX_SYSCALL_NUMBER`]. Rejection is atomic: on error
    /// the previous set stays in force, and on success the new set fully
    /// replaces it.
    pub fn set_allowed_syscalls(&mut self, sysnums: &[usize]) -> Result<()> {
        let mut map = [false; MAX_SYSCALL_NUMBER + 1];

        for &sysnum in sysnums {
            if sysnum == nr::READ || sysnum == nr::WRITE {
                return Err(Error::Config(
                    "the read() and write() syscalls are driven by the tracer \
                     and must not be in the allowed set"
                        .into(),
                ));
            }
            if sysnum > MAX_SYSCALL_NUMBER {
                return Err(Error::Config(format!(
                    "syscall number {} is outside 0..={}",
                    sysnum, MAX_SYSCALL_NUMBER
                )));
            }
            map[sysnum] = true;
        }

        self.allowed_syscalls = map;
        Ok(())
    }

    /// Set the only fds a player may read from and write to.
    pub fn set_tracee_pipe_fds(&mut self, read_fd: RawFd, write_fd: RawFd) -> Result<()> {
        if read_fd < 0 || write_fd < 0 {
            return Err(Error::Config("pipe fds must be non-negative".into()));
        }
        self.tracee_read_fd = read_fd;
        self.tracee_write_fd = write_fd;
        Ok(())
    }

    /// Set the forkserver's control-pipe fds. The read side is the one
    /// whose first `read` marks the forkserver as set up and idle.
    pub fn set_forkserver_pipe_fds(&mut self, read_fd: RawFd, write_fd: RawFd) -> Result<()> {
        if read_fd < 0 || write_fd < 0 {
            return Err(Error::Config("pipe fds must be non-negative".into()));
        }
        self.forkserver_read_fd = read_fd;
        self.forkserver_write_fd = write_fd;
        Ok(())
    }

    /// Cap the byte count of a player `write`. Must be kept well below
    /// the pipe capacity by the caller, or the kernel can park the player
    /// in a write the supervisor never drains.
    pub fn set_write_max_bytes(&mut self, max: u64) {
        self.write_max_bytes = max;
    }

    pub(crate) fn is_allowed(&self, sysnum: Word) -> bool {
        (sysnum as usize) <= MAX_SYSCALL_NUMBER && self.allowed_syscalls[sysnum as usize]
    }
}

impl Default for Config {
    fn default() -> Config {
        Config::new()
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let allowed: Vec<usize> = (0..=MAX_SYSCALL_NUMBER)
            .filter(|&n| self.allowed_syscalls[n])
            .collect();
        f.debug_struct("Config")
            .field("allowed_syscalls", &allowed)
            .field("tracee_read_fd", &self.tracee_read_fd)
            .field("tracee_write_fd", &self.tracee_write_fd)
            .field("forkserver_read_fd", &self.forkserver_read_fd)
            .field("forkserver_write_fd", &self.forkserver_write_fd)
            .field("write_max_bytes", &self.write_max_bytes)
            .finish()
    }
}
