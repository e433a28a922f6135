//! Setup that runs *inside* a freshly forked player process, before any
//! player code: the CPU-time budget and the in-kernel syscall filter.
//!
//! Both operations terminate the process with status 1 on failure. At
//! this point the process is already the player: there is no channel back
//! to the supervisor that is not itself policed, and a player without a
//! budget or filter must never run. The supervisor observes the abnormal
//! exit instead.

use libc::{c_long, time_t};
use libseccomp::{ScmpAction, ScmpFilterContext, ScmpSyscall};
use std::process::exit;

/// Arm the per-process CPU-time budget.
///
/// Creates a timer on the process CPU-time clock that fires `signal` at
/// the absolute expiry `initial` (seconds, nanoseconds) and then every
/// `interval`. Absolute on this clock means "once the process has
/// consumed that much CPU time in total", independent of wall-clock
/// scheduling. An `interval` of zero fires once.
pub fn arm_cpu_timer(signal: i32, initial: (time_t, c_long), interval: (time_t, c_long)) {
    let mut sev: libc::sigevent = unsafe { std::mem::zeroed() };
    sev.sigev_notify = libc::SIGEV_SIGNAL;
    sev.sigev_signo = signal;

    let spec = libc::itimerspec {
        it_interval: libc::timespec {
            tv_sec: interval.0,
            tv_nsec: interval.1,
        },
        it_value: libc::timespec {
            tv_sec: initial.0,
            tv_nsec: initial.1,
        },
    };

    let mut timer: libc::timer_t = std::ptr::null_mut();
    if unsafe { libc::timer_create(libc::CLOCK_PROCESS_CPUTIME_ID, &mut sev, &mut timer) } != 0 {
        error!("timer_create failed: {}", nix::errno::Errno::last());
        exit(1);
    }
    if unsafe { libc::timer_settime(timer, libc::TIMER_ABSTIME, &spec, std::ptr::null_mut()) } != 0
    {
        error!("timer_settime failed: {}", nix::errno::Errno::last());
        exit(1);
    }
}

/// Install the in-kernel backstop filter: any syscall outside `allowed`
/// kills the whole process (not just the calling thread).
///
/// The ptrace gate enforces the same policy from outside; this filter
/// still holds if ptrace is ever circumvented. Names are resolved through
/// the platform's canonical syscall table, so the list can be shared with
/// the supervisor's number-based configuration.
pub fn install_syscall_filter(allowed: &[&str]) {
    let mut ctx = match ScmpFilterContext::new_filter(ScmpAction::KillProcess) {
        Ok(ctx) => ctx,
        Err(err) => {
            error!("seccomp filter init failed: {}", err);
            exit(1);
        }
    };

    for name in allowed {
        let syscall = match ScmpSyscall::from_name(name) {
            Ok(syscall) => syscall,
            Err(err) => {
                error!("cannot resolve syscall '{}': {}", name, err);
                exit(1);
            }
        };
        if let Err(err) = ctx.add_rule(ScmpAction::Allow, syscall) {
            error!("cannot allow syscall '{}': {}", name, err);
            exit(1);
        }
    }

    if let Err(err) = ctx.load() {
        error!("seccomp filter load failed: {}", err);
        exit(1);
    }
}
