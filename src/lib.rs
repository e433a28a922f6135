//! Process sandbox and I/O gate for untrusted player code.
//!
//! A judge worker (the supervisor) attaches the [`Tracer`] to a long-lived
//! forkserver, picks up each player process the forkserver forks, and then
//! drives the player's `read`/`write` turns on the communication pipe while
//! every other syscall is checked against an allow-list. The [`primer`]
//! module is the counterpart that runs *inside* a freshly forked player:
//! it arms the CPU-time budget and installs the in-kernel syscall filter
//! before any player code runs.

#[macro_use]
extern crate lazy_static;
#[macro_use]
extern crate log;

mod config;
mod errors;
mod pidfd;
mod platform;
pub mod primer;
mod register;
mod syscall;
mod tracer;

pub use crate::config::Config;
pub use crate::errors::{Errno, Error, Result, Role};
pub use crate::pidfd::pidfd_getfd;
pub use crate::syscall::PipeOp;
pub use crate::tracer::Tracer;
