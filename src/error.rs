//! Fatal configuration errors raised by the simulation setters.
//!
//! These mark invariant violations that would corrupt global consistency. They are
//! never retried: the binary propagates them out of `main` and exits before stepping.

/// Errors raised while configuring timescales, species and periodicity.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A sub-stepping rate is not an integer multiple of the velocity update timescale.
    #[error("{what} timescale {rate} is not divisible by the particle velocity update timescale {velocity_timescale}")]
    TimescaleNotDivisible {
        what: String,
        rate: u32,
        velocity_timescale: u32,
    },
    /// A rate of zero would gate an operation forever.
    #[error("{what} timescale must be at least 1")]
    InvalidRate { what: String },
    #[error("unknown species '{0}'")]
    UnknownSpecies(String),
    /// An operation was requested before the state it depends on exists.
    #[error("{operation} requires {prerequisite} to be created first")]
    MissingPrerequisite {
        operation: &'static str,
        prerequisite: &'static str,
    },
    #[error("axis {0} is out of range, expected 0, 1 or 2")]
    InvalidAxis(usize),
}
