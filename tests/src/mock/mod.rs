//! Mock implementations for testing
//!
//! Stands in for the kernel pieces the scheduler talks to.


pub use logger::{captured, clear_captured, init_test_logger};
pub use thread_ops::{bind_cpu, bound_cpu, MockThreadOps, ThreadEvent};

use std::sync::Arc;

use nexa_usched::{Lwp, ProcInfo, RtPrio};

/// Normal-class lwp of its own process, homed on `cpu`.
pub fn normal_lwp(tid: u32, cpu: usize) -> Arc<Lwp> {
    Lwp::new(tid, ProcInfo::new(tid, 0), RtPrio::normal(), cpu)
}

/// Normal-class lwp with a preset estcpu.
pub fn busy_lwp(tid: u32, cpu: usize, estcpu: u32) -> Arc<Lwp> {
    Lwp::with_estcpu(tid, ProcInfo::new(tid, 0), RtPrio::normal(), cpu, estcpu)
}
