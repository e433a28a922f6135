#[macro_use]
mod abi;
mod regs;

use libc::c_ulong;

pub type Word = c_ulong;

pub use self::regs::Register::*;
pub use self::regs::Registers;
pub use self::regs::SysArgIndex::*;
