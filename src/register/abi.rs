/// Specify the ABI registers used for syscall argument passing.
/// See sysdeps/unix/sysv/linux/${ARCH}/syscall.S from the GNU C Library.
///
/// `SysNum` maps to `orig_rax`: `rax` doubles as the return-value register,
/// so the kernel preserves the syscall number here and it stays readable at
/// both the enter and the exit stop. Porting the gate to another
/// architecture means providing this mapping for it.
#[cfg(all(target_os = "linux", any(target_arch = "x86_64")))]
#[macro_use]
pub mod regs_offset {
    macro_rules! get_reg {
        ($regs:expr, SysNum)    => ($regs.orig_rax);
        ($regs:expr, SysArg1)   => ($regs.rdi);
        ($regs:expr, SysArg2)   => ($regs.rsi);
        ($regs:expr, SysArg3)   => ($regs.rdx);
        ($regs:expr, SysArg4)   => ($regs.r10);
        ($regs:expr, SysArg5)   => ($regs.r8);
        ($regs:expr, SysArg6)   => ($regs.r9);
        ($regs:expr, SysResult) => ($regs.rax);
    }
}
