//! Errors for scheduler construction and configuration
//!
//! Scheduling decisions themselves never fail; only building a scheduler set
//! or poking tunables by name can.

use core::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedError {
    /// No tunable with the given name
    UnknownTunable,
    /// Topology tree is malformed (overlapping or uncovered CPUs)
    InvalidTopology,
    /// More CPUs requested than a CpuMask can hold
    TooManyCpus,
    /// A scheduler set needs at least one CPU
    NoCpus,
    /// CPU id outside the scheduler set
    CpuOutOfRange,
}

impl SchedError {
    /// Convert to POSIX errno value
    pub fn to_errno(&self) -> i32 {
        match self {
            SchedError::UnknownTunable => -2,   // ENOENT
            SchedError::InvalidTopology => -22, // EINVAL
            SchedError::TooManyCpus => -7,      // E2BIG
            SchedError::NoCpus => -22,          // EINVAL
            SchedError::CpuOutOfRange => -6,    // ENXIO
        }
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            SchedError::UnknownTunable => "unknown tunable",
            SchedError::InvalidTopology => "invalid cpu topology",
            SchedError::TooManyCpus => "too many cpus",
            SchedError::NoCpus => "no cpus",
            SchedError::CpuOutOfRange => "cpu out of range",
        }
    }
}

impl fmt::Display for SchedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub type SchedResult<T> = Result<T, SchedError>;
