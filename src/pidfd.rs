use std::os::unix::io::RawFd;

/// Duplicate a file descriptor out of a sandboxed process, addressed by
/// pidfd. This is how the supervisor lifts a player's pipe end without
/// the player's cooperation; it needs a kernel of 5.6 or later, which the
/// platform probe guarantees.
///
/// Thin by design: returns the new fd, or the negated errno exactly as
/// the kernel reported it, and leaves policy to the caller.
pub fn pidfd_getfd(pidfd: RawFd, fd: RawFd) -> i64 {
    let ret = unsafe { libc::syscall(libc::SYS_pidfd_getfd, pidfd, fd, 0) };
    if ret < 0 {
        return -(nix::errno::errno() as i64);
    }
    ret as i64
}
