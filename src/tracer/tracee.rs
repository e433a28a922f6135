//! Player-side operations: the alternating read/write protocol engine and
//! the policing of every syscall in between.

use crate::errors::{Errno, Error, Result, Role};
use crate::register::{Registers, SysArg, SysArg1, SysArg3, SysResult, Word};
use crate::syscall::{is_enomem_syscall, PipeOp};
use crate::tracer::wait::{check_stop, checked, syscall_step, wait_raw, ExpectedStop};
use crate::tracer::Tracer;
use nix::unistd::Pid;
use sc::nr;

impl Tracer {
    /// Consume the SIGSTOP a freshly forked player arrives with; only
    /// after this are stop-requiring ptrace requests legal on it.
    pub fn tracee_wait_initial_stop(&self, pid: Pid) -> Result<()> {
        check_stop(wait_raw(pid), ExpectedStop::SigStop, Role::Tracee)
    }

    /// Step the player by syscalls until its first `read`. On the
    /// configured pipe fd the player is left held at the syscall-enter
    /// stop for the supervisor to drive; on any other fd the call is
    /// neutralized and reported. Syscalls before that first read are the
    /// player runtime's setup and are stepped over unchecked.
    pub fn tracee_resume_until_read(&self, pid: Pid) -> Result<()> {
        let mut regs = Registers::new(pid);

        loop {
            syscall_step(pid, Role::Tracee, "step player to next syscall")?;
            checked(regs.fetch_regs(), pid, Role::Tracee, "read player registers")?;

            if regs.get_sys_num() == nr::READ as Word {
                let fd = regs.get(SysArg(SysArg1));
                let count = regs.get(SysArg(SysArg3));

                if fd != self.config.tracee_read_fd as Word {
                    self.neutralize(pid, &mut regs)?;
                    return Err(Error::IllegalSyscall {
                        sysnum: nr::READ as i64,
                        fd: fd as i64,
                        count: count as i64,
                    });
                }
                debug!("-- {}, player reached its first read", pid);
                return Ok(());
            }
        }
    }

    /// Drive the player from the current syscall-exit stop to the enter
    /// stop of the next expected pipe operation.
    ///
    /// Between pipe operations the player may make any syscall in the
    /// allowed set; each is run through its exit stop, and the
    /// memory-sizing ones have their result screened for `-ENOMEM`.
    /// Everything else, including a pipe operation out of turn or with a
    /// bad fd or byte count, is neutralized before the kernel can execute
    /// it and reported as an illegal syscall.
    pub fn tracee_trace_until(&self, pid: Pid, next: PipeOp) -> Result<()> {
        let mut regs = Registers::new(pid);

        loop {
            syscall_step(pid, Role::Tracee, "step player to next syscall")?;
            checked(regs.fetch_regs(), pid, Role::Tracee, "read player registers")?;
            let sysnum = regs.get_sys_num();

            if sysnum == next.sysnum() {
                let fd = regs.get(SysArg(SysArg1));
                let count = regs.get(SysArg(SysArg3));

                let well_formed = match next {
                    PipeOp::Read => fd == self.config.tracee_read_fd as Word,
                    PipeOp::Write => {
                        fd == self.config.tracee_write_fd as Word
                            && count <= self.config.write_max_bytes
                    }
                };
                if !well_formed {
                    self.neutralize(pid, &mut regs)?;
                    return Err(Error::IllegalSyscall {
                        sysnum: sysnum as i64,
                        fd: fd as i64,
                        count: count as i64,
                    });
                }
                return Ok(());
            } else if self.config.is_allowed(sysnum) {
                // Let the call run, then look at it again at the exit
                // stop, before its result reaches the player.
                syscall_step(pid, Role::Tracee, "run allowed syscall to its exit stop")?;

                if is_enomem_syscall(sysnum) {
                    checked(regs.fetch_regs(), pid, Role::Tracee, "read syscall result")?;
                    if regs.get(SysResult) == -(Errno::ENOMEM as i64) as Word {
                        self.neutralize(pid, &mut regs)?;
                        return Err(Error::OutOfMemory);
                    }
                }
            } else {
                self.neutralize(pid, &mut regs)?;
                return Err(Error::IllegalSyscall {
                    sysnum: sysnum as i64,
                    fd: -1,
                    count: -1,
                });
            }
        }
    }

    /// From the enter stop of a held `read`, optionally rewrite its byte
    /// count, then run the call through the kernel and hold the player at
    /// the syscall-exit stop. The result is in the return register,
    /// readable via [`Tracer::tracee_syscall_result`].
    pub fn tracee_complete_read(&self, pid: Pid, byte_cap: Option<u64>) -> Result<()> {
        if let Some(cap) = byte_cap {
            let mut regs = Registers::new(pid);
            checked(regs.fetch_regs(), pid, Role::Tracee, "read player registers")?;
            regs.set(SysArg(SysArg3), cap as Word, "cap the read byte count");
            checked(
                regs.push_regs(),
                pid,
                Role::Tracee,
                "write back the capped byte count",
            )?;
        }
        syscall_step(pid, Role::Tracee, "run the read to its exit stop")
    }

    /// From the enter stop of a held `write`, run the call through the
    /// kernel and hold the player at the syscall-exit stop.
    pub fn tracee_complete_write(&self, pid: Pid) -> Result<()> {
        syscall_step(pid, Role::Tracee, "run the write to its exit stop")
    }

    /// Fetch the return register of the player's last completed syscall.
    pub fn tracee_syscall_result(&self, pid: Pid) -> Result<i64> {
        let mut regs = Registers::new(pid);
        checked(regs.fetch_regs(), pid, Role::Tracee, "read player registers")?;
        Ok(regs.get(SysResult) as i64)
    }

    /// Void the syscall number at the current enter stop and commit, so
    /// the resume executes nothing and the kernel answers ENOSYS. Must
    /// happen before the registers become observable again.
    fn neutralize(&self, pid: Pid, regs: &mut Registers) -> Result<()> {
        regs.cancel_syscall("blocked by the sandbox policy");
        checked(
            regs.push_regs(),
            pid,
            Role::Tracee,
            "write back the voided syscall number",
        )
    }
}

#[cfg(test)]
mod tests {
    use crate::errors::Error;
    use crate::syscall::PipeOp;
    use crate::utils::tests::{test_in_subprocess, trace_player};
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::pipe;
    use sc::nr;

    #[test]
    /// The clean alternation: read, an allowed brk in between, write,
    /// read. Five controller operations, no errors, data intact.
    fn clean_round_trip() {
        test_in_subprocess(|| {
            let (r_in, w_in) = pipe().unwrap();
            let (r_out, w_out) = pipe().unwrap();

            let scenario = trace_player(
                |config| {
                    config.set_allowed_syscalls(&[nr::BRK]).unwrap();
                    config.set_tracee_pipe_fds(r_in, w_out).unwrap();
                    config.set_write_max_bytes(1024);
                },
                move || unsafe {
                    let mut buf = [0u8; 16];
                    libc::read(r_in, buf.as_mut_ptr() as *mut libc::c_void, 16);
                    libc::syscall(libc::SYS_brk, 0usize);
                    libc::write(w_out, buf.as_ptr() as *const libc::c_void, 16);
                    libc::read(r_in, buf.as_mut_ptr() as *mut libc::c_void, 16);
                },
            );

            let (tracer, player) = (&scenario.tracer, scenario.player);
            tracer.tracee_resume_until_read(player).unwrap();

            // feed the pipe before letting the read run, or it blocks
            let payload = *b"sixteen bytes !!";
            unsafe {
                libc::write(w_in, payload.as_ptr() as *const libc::c_void, 16);
            }
            tracer.tracee_complete_read(player, None).unwrap();
            assert_eq!(tracer.tracee_syscall_result(player).unwrap(), 16);

            tracer.tracee_trace_until(player, PipeOp::Write).unwrap();
            tracer.tracee_complete_write(player).unwrap();
            assert_eq!(tracer.tracee_syscall_result(player).unwrap(), 16);

            let mut echoed = [0u8; 16];
            unsafe {
                libc::read(r_out, echoed.as_mut_ptr() as *mut libc::c_void, 16);
            }
            assert_eq!(echoed, payload);

            tracer.tracee_trace_until(player, PipeOp::Read).unwrap();
            scenario.finish();
        });
    }

    #[test]
    /// A first read on the wrong fd is neutralized and reported with the
    /// offending fd and count; the kernel never executes it.
    fn first_read_on_wrong_fd() {
        test_in_subprocess(|| {
            let (r_in, _w_in) = pipe().unwrap();
            let (_r_out, w_out) = pipe().unwrap();
            let bogus_fd = 99;

            let scenario = trace_player(
                |config| {
                    config.set_tracee_pipe_fds(r_in, w_out).unwrap();
                    config.set_write_max_bytes(1024);
                },
                move || unsafe {
                    let mut buf = [0u8; 16];
                    // neutralized: returns ENOSYS instead of blocking
                    libc::read(bogus_fd, buf.as_mut_ptr() as *mut libc::c_void, 16);
                },
            );

            assert_eq!(
                scenario.tracer.tracee_resume_until_read(scenario.player),
                Err(Error::IllegalSyscall {
                    sysnum: nr::READ as i64,
                    fd: bogus_fd as i64,
                    count: 16,
                })
            );
            scenario.finish();
        });
    }

    #[test]
    /// A disallowed syscall between turns carries -1 sentinels for the
    /// fields that were never validated.
    fn disallowed_syscall_between_turns() {
        test_in_subprocess(|| {
            let (r_in, w_in) = pipe().unwrap();
            let (_r_out, w_out) = pipe().unwrap();

            let scenario = trace_player(
                |config| {
                    config.set_tracee_pipe_fds(r_in, w_out).unwrap();
                    config.set_write_max_bytes(1024);
                },
                move || unsafe {
                    let mut buf = [0u8; 16];
                    libc::read(r_in, buf.as_mut_ptr() as *mut libc::c_void, 16);
                    libc::syscall(libc::SYS_getpid);
                },
            );

            let (tracer, player) = (&scenario.tracer, scenario.player);
            tracer.tracee_resume_until_read(player).unwrap();
            unsafe {
                libc::write(w_in, [0u8; 16].as_ptr() as *const libc::c_void, 16);
            }
            tracer.tracee_complete_read(player, None).unwrap();

            assert_eq!(
                tracer.tracee_trace_until(player, PipeOp::Write),
                Err(Error::IllegalSyscall {
                    sysnum: nr::GETPID as i64,
                    fd: -1,
                    count: -1,
                })
            );
            scenario.finish();
        });
    }

    #[test]
    /// write(count) above the cap is illegal; at the cap it is legal.
    fn oversize_write_is_rejected() {
        test_in_subprocess(|| {
            let (r_in, w_in) = pipe().unwrap();
            let (_r_out, w_out) = pipe().unwrap();

            let scenario = trace_player(
                |config| {
                    config.set_tracee_pipe_fds(r_in, w_out).unwrap();
                    config.set_write_max_bytes(1024);
                },
                move || unsafe {
                    let mut buf = [0u8; 2048];
                    libc::read(r_in, buf.as_mut_ptr() as *mut libc::c_void, 16);
                    libc::write(w_out, buf.as_ptr() as *const libc::c_void, 2048);
                },
            );

            let (tracer, player) = (&scenario.tracer, scenario.player);
            tracer.tracee_resume_until_read(player).unwrap();
            unsafe {
                libc::write(w_in, [0u8; 16].as_ptr() as *const libc::c_void, 16);
            }
            tracer.tracee_complete_read(player, None).unwrap();

            assert_eq!(
                tracer.tracee_trace_until(player, PipeOp::Write),
                Err(Error::IllegalSyscall {
                    sysnum: nr::WRITE as i64,
                    fd: w_out as i64,
                    count: 2048,
                })
            );
            scenario.finish();
        });
    }

    #[test]
    /// A write at exactly the cap passes the gate.
    fn write_at_the_cap_is_legal() {
        test_in_subprocess(|| {
            let (r_in, w_in) = pipe().unwrap();
            let (r_out, w_out) = pipe().unwrap();

            let scenario = trace_player(
                |config| {
                    config.set_tracee_pipe_fds(r_in, w_out).unwrap();
                    config.set_write_max_bytes(16);
                },
                move || unsafe {
                    let mut buf = [0u8; 16];
                    libc::read(r_in, buf.as_mut_ptr() as *mut libc::c_void, 16);
                    libc::write(w_out, buf.as_ptr() as *const libc::c_void, 16);
                },
            );

            let (tracer, player) = (&scenario.tracer, scenario.player);
            tracer.tracee_resume_until_read(player).unwrap();
            unsafe {
                libc::write(w_in, [7u8; 16].as_ptr() as *const libc::c_void, 16);
            }
            tracer.tracee_complete_read(player, None).unwrap();

            tracer.tracee_trace_until(player, PipeOp::Write).unwrap();
            tracer.tracee_complete_write(player).unwrap();

            let mut echoed = [0u8; 16];
            unsafe {
                libc::read(r_out, echoed.as_mut_ptr() as *mut libc::c_void, 16);
            }
            assert_eq!(echoed, [7u8; 16]);
            scenario.finish();
        });
    }

    #[test]
    /// A pipe operation out of turn: the player reads again while the
    /// supervisor expects a write. `read` can never be in the allowed
    /// set, so the out-of-turn call lands in the illegal bucket with
    /// unvalidated sentinels.
    fn pipe_op_out_of_turn_is_illegal() {
        test_in_subprocess(|| {
            let (r_in, w_in) = pipe().unwrap();
            let (_r_out, w_out) = pipe().unwrap();

            let scenario = trace_player(
                |config| {
                    config.set_tracee_pipe_fds(r_in, w_out).unwrap();
                    config.set_write_max_bytes(1024);
                },
                move || unsafe {
                    let mut buf = [0u8; 32];
                    libc::read(r_in, buf.as_mut_ptr() as *mut libc::c_void, 16);
                    libc::read(r_in, buf.as_mut_ptr() as *mut libc::c_void, 16);
                },
            );

            let (tracer, player) = (&scenario.tracer, scenario.player);
            tracer.tracee_resume_until_read(player).unwrap();
            unsafe {
                libc::write(w_in, [0u8; 32].as_ptr() as *const libc::c_void, 32);
            }
            tracer.tracee_complete_read(player, None).unwrap();

            assert_eq!(
                tracer.tracee_trace_until(player, PipeOp::Write),
                Err(Error::IllegalSyscall {
                    sysnum: nr::READ as i64,
                    fd: -1,
                    count: -1,
                })
            );
            scenario.finish();
        });
    }

    #[test]
    /// An allowed memory-sizing syscall that comes back with -ENOMEM is
    /// reported as out-of-memory, not as a policy violation.
    fn enomem_on_mmap_is_out_of_memory() {
        test_in_subprocess(|| {
            let (r_in, w_in) = pipe().unwrap();
            let (_r_out, w_out) = pipe().unwrap();

            let scenario = trace_player(
                |config| {
                    config.set_allowed_syscalls(&[nr::MMAP]).unwrap();
                    config.set_tracee_pipe_fds(r_in, w_out).unwrap();
                    config.set_write_max_bytes(1024);
                },
                move || unsafe {
                    let mut buf = [0u8; 16];
                    libc::read(r_in, buf.as_mut_ptr() as *mut libc::c_void, 16);
                    // longer than the address space itself: always ENOMEM
                    libc::syscall(
                        libc::SYS_mmap,
                        0usize,
                        1usize << 60,
                        libc::PROT_READ | libc::PROT_WRITE,
                        libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                        -1i32,
                        0usize,
                    );
                },
            );

            let (tracer, player) = (&scenario.tracer, scenario.player);
            tracer.tracee_resume_until_read(player).unwrap();
            unsafe {
                libc::write(w_in, [0u8; 16].as_ptr() as *const libc::c_void, 16);
            }
            tracer.tracee_complete_read(player, None).unwrap();

            assert_eq!(
                tracer.tracee_trace_until(player, PipeOp::Write),
                Err(Error::OutOfMemory)
            );
            scenario.finish();
        });
    }

    #[test]
    /// SIGKILL lands while the player is held between stops; whichever
    /// ptrace request or waitpid sees it first, the classification is a
    /// player kill carrying the signalled status.
    fn player_killed_mid_flight_reports_a_kill() {
        test_in_subprocess(|| {
            let (r_in, _w_in) = pipe().unwrap();
            let (_r_out, w_out) = pipe().unwrap();

            let scenario = trace_player(
                |config| {
                    config.set_tracee_pipe_fds(r_in, w_out).unwrap();
                    config.set_write_max_bytes(1024);
                },
                move || unsafe {
                    let mut buf = [0u8; 16];
                    libc::read(r_in, buf.as_mut_ptr() as *mut libc::c_void, 16);
                },
            );

            let (tracer, player) = (&scenario.tracer, scenario.player);
            tracer.tracee_resume_until_read(player).unwrap();

            // the OS (or the judge) kills the player while it is held
            kill(player, Signal::SIGKILL).unwrap();

            match tracer.tracee_complete_read(player, None).unwrap_err() {
                Error::TraceeKill(status) => assert!(libc::WIFSIGNALED(status)),
                other => panic!("expected a player kill, got {:?}", other),
            }
            scenario.finish();
        });
    }

    #[test]
    /// A memory syscall failing with anything other than ENOMEM is the
    /// player's own problem; the gate passes the result through.
    fn non_enomem_failure_passes_through() {
        test_in_subprocess(|| {
            let (r_in, w_in) = pipe().unwrap();
            let (_r_out, w_out) = pipe().unwrap();

            let scenario = trace_player(
                |config| {
                    config.set_allowed_syscalls(&[nr::MMAP]).unwrap();
                    config.set_tracee_pipe_fds(r_in, w_out).unwrap();
                    config.set_write_max_bytes(1024);
                },
                move || unsafe {
                    let mut buf = [0u8; 16];
                    libc::read(r_in, buf.as_mut_ptr() as *mut libc::c_void, 16);
                    // zero length: EINVAL, not ENOMEM
                    libc::syscall(
                        libc::SYS_mmap,
                        0usize,
                        0usize,
                        libc::PROT_READ,
                        libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                        -1i32,
                        0usize,
                    );
                    libc::write(w_out, buf.as_ptr() as *const libc::c_void, 8);
                },
            );

            let (tracer, player) = (&scenario.tracer, scenario.player);
            tracer.tracee_resume_until_read(player).unwrap();
            unsafe {
                libc::write(w_in, [0u8; 16].as_ptr() as *const libc::c_void, 16);
            }
            tracer.tracee_complete_read(player, None).unwrap();

            // the failed mmap is stepped over, the write still arrives
            tracer.tracee_trace_until(player, PipeOp::Write).unwrap();
            scenario.finish();
        });
    }

    #[test]
    /// The supervisor can shrink a read's byte count before running it.
    fn read_byte_cap_is_applied() {
        test_in_subprocess(|| {
            let (r_in, w_in) = pipe().unwrap();
            let (_r_out, w_out) = pipe().unwrap();

            let scenario = trace_player(
                |config| {
                    config.set_tracee_pipe_fds(r_in, w_out).unwrap();
                    config.set_write_max_bytes(1024);
                },
                move || unsafe {
                    let mut buf = [0u8; 64];
                    libc::read(r_in, buf.as_mut_ptr() as *mut libc::c_void, 64);
                },
            );

            let (tracer, player) = (&scenario.tracer, scenario.player);
            tracer.tracee_resume_until_read(player).unwrap();

            // 64 bytes available, but the read is capped to 4
            unsafe {
                libc::write(w_in, [1u8; 64].as_ptr() as *const libc::c_void, 64);
            }
            tracer.tracee_complete_read(player, Some(4)).unwrap();
            assert_eq!(tracer.tracee_syscall_result(player).unwrap(), 4);
            scenario.finish();
        });
    }
}
