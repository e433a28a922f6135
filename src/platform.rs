use crate::errors::{Error, Result};
use nix::sys::utsname;

lazy_static! {
    /// Probed once per process; construction of every `Tracer` consults
    /// the same result.
    static ref PROBE: std::result::Result<(), String> = probe();
}

/// The gate reads and rewrites syscall registers through the x86-64
/// calling convention and relies on two kernel behaviors: `pidfd_getfd`
/// (5.6) and seccomp filters running after ptrace inspection (4.8, or the
/// filter would hide syscalls from the tracer). There is no fallback for
/// older kernels or other machines.
pub(crate) fn check() -> Result<()> {
    PROBE.clone().map_err(Error::Platform)
}

fn probe() -> std::result::Result<(), String> {
    let info = utsname::uname();

    if info.machine() != "x86_64" {
        return Err(format!(
            "machine is '{}', but the syscall register mapping is x86-64 only",
            info.machine()
        ));
    }

    let release = info.release();
    let (major, minor) = parse_release(release)
        .ok_or_else(|| format!("cannot parse kernel release '{}'", release))?;
    if (major, minor) < (5, 6) {
        return Err(format!(
            "kernel {}.{} is too old, 5.6 or later is required",
            major, minor
        ));
    }

    Ok(())
}

fn parse_release(release: &str) -> Option<(u32, u32)> {
    let mut parts = release.split(|c: char| !c.is_ascii_digit());
    let major = parts.next()?.parse().ok()?;
    let minor = parts.next()?.parse().ok()?;
    Some((major, minor))
}
