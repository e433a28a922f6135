//! The ptrace-driven controller. All operations are blocking and
//! single-threaded: each one drives the forkserver or a player process to
//! a named next stop, then returns, and the supervisor chains them into
//! the judge protocol.

mod forkserver;
mod tracee;
pub(crate) mod wait;

use crate::config::Config;
use crate::errors::Result;
use crate::platform;

/// Stateful facade over `ptrace`/`waitpid`.
///
/// Owns the configuration for the whole session; construction runs the
/// one-shot platform probe and fails on anything that is not x86-64
/// Linux 5.6+.
#[derive(Debug)]
pub struct Tracer {
    pub(crate) config: Config,
}

impl Tracer {
    pub fn new(config: Config) -> Result<Tracer> {
        platform::check()?;
        Ok(Tracer { config })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}
